//! FileSpool - ファイルシステム上の永続キュー
//!
//! ```text
//! <root>/
//!   pending/<millis>_<uuid>.json   配送待ち
//!   dead/<millis>_<uuid>.json      リトライ上限到達（自動では再送しない）
//! ```
//!
//! # クラッシュ耐性
//! - 書き込みは `*.json.tmp` → fsync → rename（中途半端なレコードは正式名にならない）
//! - 起動時に `pending/` を列挙・ソートしてインデックスを再構築（他の状態は信用しない）
//! - 残っていた `*.tmp` は起動時に削除

use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::domain::{RecordId, SpoolError, WorkItem};
use crate::ports::{EnqueueReceipt, Spool};

const PENDING_DIR: &str = "pending";
const DEAD_DIR: &str = "dead";
const TMP_SUFFIX: &str = ".tmp";

/// Filesystem-backed spool.
///
/// The in-memory index is only touched while holding `index`, and every
/// disk mutation happens under the same lock, so the index never drifts
/// from what is on disk.
pub struct FileSpool {
    pending_dir: PathBuf,
    dead_dir: PathBuf,
    max_on_disk: usize,
    index: Mutex<BTreeSet<RecordId>>,
}

impl FileSpool {
    /// Open (or create) a spool rooted at `root` and rebuild the pending
    /// index from disk.
    pub async fn open(root: impl AsRef<Path>, max_on_disk: usize) -> Result<Self, SpoolError> {
        let root = root.as_ref();
        let pending_dir = root.join(PENDING_DIR);
        let dead_dir = root.join(DEAD_DIR);

        for dir in [&pending_dir, &dead_dir] {
            fs::create_dir_all(dir)
                .await
                .map_err(|e| SpoolError::io(dir, e))?;
        }

        let recovered = scan_records(&pending_dir, true).await?;
        info!(
            root = %root.display(),
            pending = recovered.len(),
            "spool opened"
        );

        Ok(Self {
            pending_dir,
            dead_dir,
            max_on_disk: max_on_disk.max(1),
            index: Mutex::new(recovered.into_iter().collect()),
        })
    }

    pub fn pending_dir(&self) -> &Path {
        &self.pending_dir
    }

    fn pending_path(&self, record_id: &RecordId) -> PathBuf {
        self.pending_dir.join(record_id.file_name())
    }

    fn dead_path(&self, record_id: &RecordId) -> PathBuf {
        self.dead_dir.join(record_id.file_name())
    }

    async fn write_record(&self, item: &WorkItem) -> Result<(), SpoolError> {
        let bytes = item.to_record_bytes()?;
        let path = self.pending_path(item.id());
        let tmp = tmp_path(&path);

        let mut file = fs::File::create(&tmp)
            .await
            .map_err(|e| SpoolError::io(&tmp, e))?;
        file.write_all(&bytes)
            .await
            .map_err(|e| SpoolError::io(&tmp, e))?;
        file.sync_all().await.map_err(|e| SpoolError::io(&tmp, e))?;
        drop(file);

        fs::rename(&tmp, &path)
            .await
            .map_err(|e| SpoolError::io(&path, e))
    }

    async fn read_record(&self, record_id: &RecordId) -> Result<WorkItem, SpoolError> {
        let path = self.pending_path(record_id);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(SpoolError::Corrupt {
                    record_id: record_id.clone(),
                    reason: "record file is missing".to_string(),
                });
            }
            Err(e) => return Err(SpoolError::io(&path, e)),
        };
        WorkItem::from_record_bytes(&bytes).map_err(|e| SpoolError::Corrupt {
            record_id: record_id.clone(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl Spool for FileSpool {
    async fn enqueue(&self, item: &WorkItem) -> Result<EnqueueReceipt, SpoolError> {
        let mut index = self.index.lock().await;

        self.write_record(item).await?;
        index.insert(item.id().clone());
        debug!(record_id = %item.id(), pending = index.len(), "record enqueued");

        // 新しいレコードは書き込み済みなので、追い出しの失敗で enqueue 自体は失敗させない
        let mut dropped = 0;
        while index.len() > self.max_on_disk {
            let Some(oldest) = index.first().cloned() else {
                break;
            };
            if let Err(e) = remove_if_exists(&self.pending_path(&oldest)).await {
                error!(record_id = %oldest, error = %e, "failed to evict oldest record, spool stays over capacity");
                break;
            }
            index.remove(&oldest);
            dropped += 1;
        }
        if dropped > 0 {
            warn!(
                dropped,
                max_on_disk = self.max_on_disk,
                "spool over capacity, dropped oldest pending records"
            );
        }

        Ok(EnqueueReceipt {
            record_id: item.id().clone(),
            dropped,
        })
    }

    async fn peek_next(&self) -> Option<RecordId> {
        self.index.lock().await.first().cloned()
    }

    async fn load(&self, record_id: &RecordId) -> Result<WorkItem, SpoolError> {
        let index = self.index.lock().await;
        if !index.contains(record_id) {
            return Err(SpoolError::NotFound(record_id.clone()));
        }
        self.read_record(record_id).await
    }

    async fn dequeue(&self) -> Result<Option<(WorkItem, RecordId)>, SpoolError> {
        let mut index = self.index.lock().await;
        let Some(record_id) = index.first().cloned() else {
            return Ok(None);
        };

        let item = match self.read_record(&record_id).await {
            Ok(item) => Some(item),
            Err(SpoolError::Corrupt { reason, .. }) => {
                warn!(%record_id, %reason, "dropping corrupt record");
                None
            }
            Err(e) => return Err(e),
        };

        remove_if_exists(&self.pending_path(&record_id)).await?;
        index.remove(&record_id);

        Ok(item.map(|item| (item, record_id)))
    }

    async fn remove(&self, record_id: &RecordId) -> Result<(), SpoolError> {
        let mut index = self.index.lock().await;
        remove_if_exists(&self.pending_path(record_id)).await?;
        index.remove(record_id);
        Ok(())
    }

    async fn move_to_dead(&self, record_id: &RecordId) -> Result<bool, SpoolError> {
        let mut index = self.index.lock().await;
        if !index.contains(record_id) {
            return Ok(false);
        }

        let from = self.pending_path(record_id);
        let to = self.dead_path(record_id);
        remove_if_exists(&to).await?;
        let moved = match fs::rename(&from, &to).await {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(%record_id, "pending record vanished before dead-lettering");
                false
            }
            Err(e) => return Err(SpoolError::io(&from, e)),
        };
        index.remove(record_id);
        Ok(moved)
    }

    async fn clear_all(&self) -> Result<usize, SpoolError> {
        let mut index = self.index.lock().await;
        let ids: Vec<RecordId> = index.iter().cloned().collect();
        let mut removed = 0;
        for record_id in ids {
            // 消せたものだけインデックスから外す
            remove_if_exists(&self.pending_path(&record_id)).await?;
            index.remove(&record_id);
            removed += 1;
        }
        info!(removed, "pending spool cleared");
        Ok(removed)
    }

    async fn count(&self) -> usize {
        self.index.lock().await.len()
    }

    async fn dead_letters(&self) -> Result<Vec<RecordId>, SpoolError> {
        let _index = self.index.lock().await;
        scan_records(&self.dead_dir, false).await
    }

    async fn requeue_dead(&self, record_id: &RecordId) -> Result<bool, SpoolError> {
        let mut index = self.index.lock().await;
        let from = self.dead_path(record_id);
        let to = self.pending_path(record_id);
        match fs::rename(&from, &to).await {
            Ok(()) => {
                index.insert(record_id.clone());
                info!(%record_id, "dead record requeued");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(SpoolError::io(&from, e)),
        }
    }

    async fn clear_dead(&self) -> Result<usize, SpoolError> {
        let _index = self.index.lock().await;
        let dead = scan_records(&self.dead_dir, false).await?;
        for record_id in &dead {
            remove_if_exists(&self.dead_path(record_id)).await?;
        }
        Ok(dead.len())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(TMP_SUFFIX);
    PathBuf::from(name)
}

async fn remove_if_exists(path: &Path) -> Result<(), SpoolError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SpoolError::io(path, e)),
    }
}

/// List record ids in `dir`, sorted. Other files are skipped; leftover
/// temp files are deleted when `sweep_tmp` is set.
async fn scan_records(dir: &Path, sweep_tmp: bool) -> Result<Vec<RecordId>, SpoolError> {
    let mut entries = fs::read_dir(dir)
        .await
        .map_err(|e| SpoolError::io(dir, e))?;

    let mut ids = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| SpoolError::io(dir, e))?
    {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };

        if let Some(record_id) = RecordId::from_file_name(name) {
            ids.push(record_id);
        } else if sweep_tmp && name.ends_with(TMP_SUFFIX) {
            debug!(file = name, "removing partial write left by a previous run");
            remove_if_exists(&entry.path()).await?;
        }
    }

    ids.sort();
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::WorkPayload;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;
    use uuid::Uuid;

    fn item_at(millis: i64, text: &str) -> WorkItem {
        let at = Utc.timestamp_millis_opt(millis).unwrap();
        WorkItem::new(
            RecordId::from_parts(at, Uuid::new_v4()),
            at,
            WorkPayload::new("Slack", text).with_captured_at(at),
        )
    }

    async fn open(dir: &TempDir, max: usize) -> FileSpool {
        FileSpool::open(dir.path(), max).await.unwrap()
    }

    #[tokio::test]
    async fn drains_in_fifo_order() {
        let dir = TempDir::new().unwrap();
        let spool = open(&dir, 100).await;

        let items: Vec<_> = (0..5).map(|i| item_at(1_000 + i, &format!("t{i}"))).collect();
        // わざと逆順に投入しても、取り出しは作成順
        for item in items.iter().rev() {
            spool.enqueue(item).await.unwrap();
        }

        let mut drained = Vec::new();
        while let Some((item, record_id)) = spool.dequeue().await.unwrap() {
            assert_eq!(item.id(), &record_id);
            drained.push(record_id);
        }
        let expected: Vec<_> = items.iter().map(|i| i.id().clone()).collect();
        assert_eq!(drained, expected);
        assert_eq!(spool.count().await, 0);
    }

    #[tokio::test]
    async fn overflow_drops_oldest() {
        let dir = TempDir::new().unwrap();
        let spool = open(&dir, 2).await;
        let a = item_at(1, "A");
        let b = item_at(2, "B");
        let c = item_at(3, "C");

        assert_eq!(spool.enqueue(&a).await.unwrap().dropped, 0);
        assert_eq!(spool.enqueue(&b).await.unwrap().dropped, 0);
        assert_eq!(spool.enqueue(&c).await.unwrap().dropped, 1);

        assert_eq!(spool.peek_next().await, Some(b.id().clone()));
        assert!(!spool.pending_path(a.id()).exists());
        assert_eq!(spool.count().await, 2);
    }

    #[tokio::test]
    async fn peek_is_non_destructive() {
        let dir = TempDir::new().unwrap();
        let spool = open(&dir, 10).await;
        let a = item_at(1, "A");
        spool.enqueue(&a).await.unwrap();

        assert_eq!(spool.peek_next().await, Some(a.id().clone()));
        assert_eq!(spool.peek_next().await, Some(a.id().clone()));
        assert_eq!(spool.load(a.id()).await.unwrap(), a);
        assert_eq!(spool.count().await, 1);
    }

    #[tokio::test]
    async fn remove_and_move_to_dead_are_idempotent() {
        let dir = TempDir::new().unwrap();
        let spool = open(&dir, 10).await;
        let a = item_at(1, "A");
        let b = item_at(2, "B");
        spool.enqueue(&a).await.unwrap();
        spool.enqueue(&b).await.unwrap();

        spool.remove(a.id()).await.unwrap();
        spool.remove(a.id()).await.unwrap();

        assert!(spool.move_to_dead(b.id()).await.unwrap());
        assert!(!spool.move_to_dead(b.id()).await.unwrap());

        assert_eq!(spool.count().await, 0);
        assert_eq!(spool.dead_letters().await.unwrap(), vec![b.id().clone()]);
        assert!(spool.dead_path(b.id()).exists());
        assert!(!spool.pending_path(b.id()).exists());
    }

    #[tokio::test]
    async fn move_to_dead_overwrites_existing_dead_record() {
        let dir = TempDir::new().unwrap();
        let spool = open(&dir, 10).await;
        let a = item_at(1, "fresh");
        fs::write(spool.dead_path(a.id()), b"stale").await.unwrap();

        spool.enqueue(&a).await.unwrap();
        spool.move_to_dead(a.id()).await.unwrap();

        let bytes = fs::read(spool.dead_path(a.id())).await.unwrap();
        assert_eq!(WorkItem::from_record_bytes(&bytes).unwrap(), a);
    }

    #[tokio::test]
    async fn recovery_rebuilds_pending_and_ignores_dead() {
        let dir = TempDir::new().unwrap();
        {
            let spool = open(&dir, 10).await;
            for i in 0..3 {
                spool.enqueue(&item_at(10 + i, "p")).await.unwrap();
            }
            for i in 0..2 {
                let dead = item_at(20 + i, "d");
                spool.enqueue(&dead).await.unwrap();
                spool.move_to_dead(dead.id()).await.unwrap();
            }
            // クラッシュで残った書きかけファイルと無関係なファイル
            fs::write(dir.path().join("pending/0000000000099_x.json.tmp"), b"{")
                .await
                .unwrap();
            fs::write(dir.path().join("pending/notes.txt"), b"hi")
                .await
                .unwrap();
        }

        let reopened = open(&dir, 10).await;
        assert_eq!(reopened.count().await, 3);
        assert_eq!(reopened.dead_count().await.unwrap(), 2);
        assert!(!dir.path().join("pending/0000000000099_x.json.tmp").exists());
        assert!(dir.path().join("pending/notes.txt").exists());
    }

    #[tokio::test]
    async fn corrupt_record_is_removed_by_dequeue() {
        let dir = TempDir::new().unwrap();
        let spool = open(&dir, 10).await;
        let good = item_at(5, "good");
        spool.enqueue(&good).await.unwrap();

        let bad = RecordId::from_parts(Utc.timestamp_millis_opt(1).unwrap(), Uuid::new_v4());
        fs::write(dir.path().join("pending").join(bad.file_name()), b"\x00garbage")
            .await
            .unwrap();
        let spool = open(&dir, 10).await;

        assert_eq!(spool.peek_next().await, Some(bad.clone()));
        assert!(spool.load(&bad).await.unwrap_err().is_corrupt());
        assert!(spool.dequeue().await.unwrap().is_none());
        assert!(!spool.pending_path(&bad).exists());

        let (item, _) = spool.dequeue().await.unwrap().unwrap();
        assert_eq!(item, good);
    }

    #[tokio::test]
    async fn clear_all_reports_count() {
        let dir = TempDir::new().unwrap();
        let spool = open(&dir, 10).await;
        for i in 0..4 {
            spool.enqueue(&item_at(i, "x")).await.unwrap();
        }
        assert_eq!(spool.clear_all().await.unwrap(), 4);
        assert_eq!(spool.count().await, 0);
        assert_eq!(scan_records(spool.pending_dir(), false).await.unwrap().len(), 0);
    }

    /// 同名の空でないディレクトリに差し替えると unlink が必ず失敗する（root でも）
    async fn block_unlink(spool: &FileSpool, record_id: &RecordId) {
        let path = spool.pending_path(record_id);
        fs::remove_file(&path).await.unwrap();
        fs::create_dir(&path).await.unwrap();
        fs::write(path.join("keep"), b"x").await.unwrap();
    }

    #[tokio::test]
    async fn failed_eviction_keeps_record_indexed_and_enqueue_succeeds() {
        let dir = TempDir::new().unwrap();
        let spool = open(&dir, 2).await;
        let a = item_at(1, "A");
        let b = item_at(2, "B");
        let c = item_at(3, "C");
        spool.enqueue(&a).await.unwrap();
        spool.enqueue(&b).await.unwrap();
        block_unlink(&spool, a.id()).await;

        let receipt = spool.enqueue(&c).await.unwrap();
        assert_eq!(receipt.dropped, 0);
        assert_eq!(spool.count().await, 3);
        assert_eq!(spool.peek_next().await, Some(a.id().clone()));

        // 再起動後もインデックスはディスクと一致する
        let reopened = open(&dir, 2).await;
        assert_eq!(reopened.count().await, 3);
        assert_eq!(reopened.peek_next().await, Some(a.id().clone()));
    }

    #[tokio::test]
    async fn failed_clear_keeps_unremoved_records_indexed() {
        let dir = TempDir::new().unwrap();
        let spool = open(&dir, 10).await;
        let a = item_at(1, "A");
        let b = item_at(2, "B");
        let c = item_at(3, "C");
        for item in [&a, &b, &c] {
            spool.enqueue(item).await.unwrap();
        }
        block_unlink(&spool, b.id()).await;

        assert!(spool.clear_all().await.is_err());
        assert!(!spool.pending_path(a.id()).exists());
        assert_eq!(spool.count().await, 2);
        assert_eq!(spool.peek_next().await, Some(b.id().clone()));

        let reopened = open(&dir, 10).await;
        assert_eq!(reopened.count().await, 2);
    }

    #[tokio::test]
    async fn requeue_dead_restores_fifo_position() {
        let dir = TempDir::new().unwrap();
        let spool = open(&dir, 10).await;
        let old = item_at(1, "old");
        let newer = item_at(2, "newer");
        spool.enqueue(&old).await.unwrap();
        spool.move_to_dead(old.id()).await.unwrap();
        spool.enqueue(&newer).await.unwrap();

        assert!(spool.requeue_dead(old.id()).await.unwrap());
        assert!(!spool.requeue_dead(old.id()).await.unwrap());
        assert_eq!(spool.peek_next().await, Some(old.id().clone()));
        assert_eq!(spool.clear_dead().await.unwrap(), 0);
    }
}

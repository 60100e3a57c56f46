//! Spool port - 永続キュー（ファイルシステム または InMemory）
//!
//! Spool は WorkItem を FIFO で保持し、配送できなかったものを dead-letter に隔離します。
//!
//! # 実装
//! - **FileSpool**: `pending/` と `dead/` ディレクトリ（本番用）
//! - **InMemorySpool**: テスト用

use async_trait::async_trait;

use crate::domain::{RecordId, SpoolError, WorkItem};

/// Result of one `enqueue`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueReceipt {
    pub record_id: RecordId,
    /// Oldest pending records evicted to stay within capacity.
    pub dropped: usize,
}

/// Spool は WorkItem の永続キュー
///
/// # 設計原則
/// - 変更操作はすべて内部で直列化（インデックスとディスクが乖離しない）
/// - 順序は RecordId の辞書順 = 作成順
/// - レコードは pending か dead のどちらか一方にのみ存在する
/// - `remove` / `move_to_dead` は冪等（存在しない ID は no-op）
#[async_trait]
pub trait Spool: Send + Sync {
    /// Persist a new record. Evicts the oldest pending records when the
    /// pending count exceeds capacity.
    async fn enqueue(&self, item: &WorkItem) -> Result<EnqueueReceipt, SpoolError>;

    /// Oldest pending record id, without removing it.
    async fn peek_next(&self) -> Option<RecordId>;

    /// Read and decode one pending record.
    ///
    /// Returns `SpoolError::Corrupt` if the record cannot be decoded and
    /// `SpoolError::NotFound` if it is not pending.
    async fn load(&self, record_id: &RecordId) -> Result<WorkItem, SpoolError>;

    /// Read, decode and remove the oldest record in one step.
    ///
    /// `None` when empty. A corrupt head record is removed and also
    /// yields `None`, so it can never block the queue.
    async fn dequeue(&self) -> Result<Option<(WorkItem, RecordId)>, SpoolError>;

    async fn remove(&self, record_id: &RecordId) -> Result<(), SpoolError>;

    /// Relocate a pending record to the dead-letter store, replacing any
    /// dead record with the same name.
    ///
    /// Returns `false` when the record was no longer pending (nothing moved).
    async fn move_to_dead(&self, record_id: &RecordId) -> Result<bool, SpoolError>;

    /// Drop every pending record. Returns how many were removed.
    ///
    /// On error, records already removed stay removed.
    async fn clear_all(&self) -> Result<usize, SpoolError>;

    /// Pending record count.
    async fn count(&self) -> usize;

    /// Dead-letter ids, oldest first.
    async fn dead_letters(&self) -> Result<Vec<RecordId>, SpoolError>;

    async fn dead_count(&self) -> Result<usize, SpoolError> {
        Ok(self.dead_letters().await?.len())
    }

    /// Move a dead record back into pending (operator replay).
    /// Returns `false` if no such dead record exists.
    async fn requeue_dead(&self, record_id: &RecordId) -> Result<bool, SpoolError>;

    async fn clear_dead(&self) -> Result<usize, SpoolError>;

    async fn is_empty(&self) -> bool {
        self.count().await == 0
    }
}

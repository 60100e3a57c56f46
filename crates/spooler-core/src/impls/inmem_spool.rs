//! InMemorySpool - テスト・開発用の Spool
//!
//! FileSpool と同じ契約を、ディスクに触れずに満たします。
//! レコードはシリアライズ済みバイト列で保持するため、破損レコードも再現できます。

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{RecordId, SpoolError, WorkItem};
use crate::ports::{EnqueueReceipt, Spool};

struct InMemorySpoolState {
    /// BTreeMap なので先頭が常に最古
    pending: BTreeMap<RecordId, Vec<u8>>,
    dead: BTreeMap<RecordId, Vec<u8>>,
}

/// In-memory spool.
pub struct InMemorySpool {
    state: Mutex<InMemorySpoolState>,
    max_pending: usize,
}

impl InMemorySpool {
    pub fn new(max_pending: usize) -> Self {
        Self {
            state: Mutex::new(InMemorySpoolState {
                pending: BTreeMap::new(),
                dead: BTreeMap::new(),
            }),
            max_pending: max_pending.max(1),
        }
    }

    /// Insert raw record bytes under `record_id`, bypassing serialization.
    /// Used to simulate records damaged on disk.
    pub async fn insert_raw(&self, record_id: RecordId, bytes: Vec<u8>) {
        self.state.lock().await.pending.insert(record_id, bytes);
    }
}

impl Default for InMemorySpool {
    fn default() -> Self {
        Self::new(usize::MAX)
    }
}

fn decode(record_id: &RecordId, bytes: &[u8]) -> Result<WorkItem, SpoolError> {
    WorkItem::from_record_bytes(bytes).map_err(|e| SpoolError::Corrupt {
        record_id: record_id.clone(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl Spool for InMemorySpool {
    async fn enqueue(&self, item: &WorkItem) -> Result<EnqueueReceipt, SpoolError> {
        let bytes = item.to_record_bytes()?;
        let mut state = self.state.lock().await;
        state.pending.insert(item.id().clone(), bytes);

        let overflow = state.pending.len().saturating_sub(self.max_pending);
        for _ in 0..overflow {
            state.pending.pop_first();
        }

        Ok(EnqueueReceipt {
            record_id: item.id().clone(),
            dropped: overflow,
        })
    }

    async fn peek_next(&self) -> Option<RecordId> {
        let state = self.state.lock().await;
        state.pending.keys().next().cloned()
    }

    async fn load(&self, record_id: &RecordId) -> Result<WorkItem, SpoolError> {
        let state = self.state.lock().await;
        let bytes = state
            .pending
            .get(record_id)
            .ok_or_else(|| SpoolError::NotFound(record_id.clone()))?;
        decode(record_id, bytes)
    }

    async fn dequeue(&self) -> Result<Option<(WorkItem, RecordId)>, SpoolError> {
        let mut state = self.state.lock().await;
        let Some((record_id, bytes)) = state.pending.pop_first() else {
            return Ok(None);
        };
        match decode(&record_id, &bytes) {
            Ok(item) => Ok(Some((item, record_id))),
            Err(_) => Ok(None),
        }
    }

    async fn remove(&self, record_id: &RecordId) -> Result<(), SpoolError> {
        self.state.lock().await.pending.remove(record_id);
        Ok(())
    }

    async fn move_to_dead(&self, record_id: &RecordId) -> Result<bool, SpoolError> {
        let mut state = self.state.lock().await;
        let Some(bytes) = state.pending.remove(record_id) else {
            return Ok(false);
        };
        state.dead.insert(record_id.clone(), bytes);
        Ok(true)
    }

    async fn clear_all(&self) -> Result<usize, SpoolError> {
        let mut state = self.state.lock().await;
        let removed = state.pending.len();
        state.pending.clear();
        Ok(removed)
    }

    async fn count(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    async fn dead_letters(&self) -> Result<Vec<RecordId>, SpoolError> {
        Ok(self.state.lock().await.dead.keys().cloned().collect())
    }

    async fn requeue_dead(&self, record_id: &RecordId) -> Result<bool, SpoolError> {
        let mut state = self.state.lock().await;
        match state.dead.remove(record_id) {
            Some(bytes) => {
                state.pending.insert(record_id.clone(), bytes);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn clear_dead(&self) -> Result<usize, SpoolError> {
        let mut state = self.state.lock().await;
        let removed = state.dead.len();
        state.dead.clear();
        Ok(removed)
    }
}

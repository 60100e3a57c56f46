//! Status - 配送ワーカーの状態とカウンタ
//!
//! CLI の `status` サブコマンドやホストアプリの診断表示に使う読み取り専用スナップショット。

use serde::Serialize;

/// Lifecycle of a [`DeliveryWorker`](super::DeliveryWorker).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Stopped,
    Running,
}

/// Counters since the worker was created. Memory only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryStats {
    pub delivered: u64,
    /// Every failed attempt, including the one that dead-letters an item.
    pub failed_attempts: u64,
    pub dead_lettered: u64,
    pub corrupt_dropped: u64,
    pub last_error: Option<String>,
    /// `None` until a probe has run.
    pub last_probe_healthy: Option<bool>,
}

/// Result of one bounded `process_once` pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub delivered: usize,
    pub dead_lettered: usize,
    pub corrupt_dropped: usize,
    /// The pass ended early because a delivery failed.
    pub stopped_on_failure: bool,
}

impl FlushReport {
    /// Records taken off the pending queue by this pass.
    pub fn processed(&self) -> usize {
        self.delivered + self.dead_lettered + self.corrupt_dropped
    }
}

/// Pending / dead-letter sizes, as seen by `status`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SpoolCounts {
    pub pending: usize,
    pub dead: usize,
}

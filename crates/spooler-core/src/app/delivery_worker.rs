//! DeliveryWorker - spool の先頭から 1 件ずつ解析サービスへ送る
//!
//! # ループ（1 サイクル）
//! 1. `peek_next` で最古のレコードを見る（空なら idle_poll だけ待つ）
//! 2. `load` で復元。壊れていれば削除して次へ
//! 3. `submit_for_result`（request id = レコード ID）
//! 4. 成功: spool から削除 → 試行回数クリア → sink 通知 → backoff リセット
//! 5. 失敗: 試行回数 +1。上限なら dead-letter へ移して即次へ、
//!    そうでなければ backoff + jitter だけ待って同じレコードを再試行
//!
//! backoff はワーカー全体で 1 つ（レコードごとではない）。
//! 停止要求は idle 待ち・backoff 待ち・送信中のいずれでもすぐに効く。

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex as AsyncMutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::attempts::AttemptTracker;
use super::retry::{Backoff, BackoffPolicy};
use super::status::{DeliveryStats, FlushReport, WorkerStatus};
use crate::config::DeliveryConfig;
use crate::domain::{AnalysisOutcome, RecordId, ResponseMeta, SpoolError};
use crate::ports::{AnalysisClient, NoopResultSink, ResultSink, Spool};

/// Background delivery loop over a [`Spool`].
///
/// - `start()` / `stop()` は冪等
/// - `process_once()` はループとは独立に呼べる（同時に走っても 1 件ずつ直列化される）
pub struct DeliveryWorker {
    inner: Arc<WorkerInner>,
    running: Mutex<Option<RunningLoop>>,
}

struct RunningLoop {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

struct WorkerInner {
    spool: Arc<dyn Spool>,
    client: Arc<dyn AnalysisClient>,
    sink: Weak<dyn ResultSink>,
    config: DeliveryConfig,
    attempts: Mutex<AttemptTracker>,
    backoff: Mutex<Backoff>,
    stats: Mutex<DeliveryStats>,
    /// One delivery cycle at a time, across the loop and `process_once`.
    gate: AsyncMutex<()>,
}

/// What one cycle did.
enum Cycle {
    Idle,
    Delivered,
    /// Removed by someone else (evicted, cleared) before it could be
    /// delivered or dead-lettered.
    Vanished,
    CorruptDropped,
    DeadLettered,
    Failed,
    Cancelled,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DeliveryWorker {
    pub fn new(
        spool: Arc<dyn Spool>,
        client: Arc<dyn AnalysisClient>,
        sink: Weak<dyn ResultSink>,
        config: DeliveryConfig,
    ) -> Self {
        let backoff = Backoff::new(BackoffPolicy::from_config(&config));
        Self {
            inner: Arc::new(WorkerInner {
                spool,
                client,
                sink,
                config,
                attempts: Mutex::new(AttemptTracker::new()),
                backoff: Mutex::new(backoff),
                stats: Mutex::new(DeliveryStats::default()),
                gate: AsyncMutex::new(()),
            }),
            running: Mutex::new(None),
        }
    }

    /// Worker whose outcomes go nowhere.
    pub fn without_sink(
        spool: Arc<dyn Spool>,
        client: Arc<dyn AnalysisClient>,
        config: DeliveryConfig,
    ) -> Self {
        Self::new(spool, client, Weak::<NoopResultSink>::new(), config)
    }

    /// Spawn the delivery loop. No-op while already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut running = lock(&self.running);
        if let Some(current) = running.as_ref()
            && !current.join.is_finished()
        {
            debug!("delivery worker already running");
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let inner = Arc::clone(&self.inner);
        let join = tokio::spawn(delivery_loop(inner, shutdown_rx));
        *running = Some(RunningLoop { shutdown_tx, join });

        info!(
            max_attempts = self.inner.config.max_attempts_per_item,
            probe_on_start = self.inner.config.probe_on_start,
            "delivery worker started"
        );
    }

    /// Request shutdown and wait for the loop to exit. No-op when stopped.
    ///
    /// An in-flight request is abandoned and does not count as an attempt.
    pub async fn stop(&self) {
        let running = lock(&self.running).take();
        let Some(running) = running else {
            return;
        };

        // ignore send error: the loop may already be gone
        let _ = running.shutdown_tx.send(true);
        if let Err(e) = running.join.await
            && e.is_panic()
        {
            error!("delivery loop panicked");
        }
        info!("delivery worker stopped");
    }

    pub fn status(&self) -> WorkerStatus {
        match lock(&self.running).as_ref() {
            Some(current) if !current.join.is_finished() => WorkerStatus::Running,
            _ => WorkerStatus::Stopped,
        }
    }

    pub fn stats(&self) -> DeliveryStats {
        lock(&self.inner.stats).clone()
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.inner.config
    }

    /// Deliver up to `limit` records without sleeping.
    ///
    /// Stops at the first failed delivery; that failure still counts toward
    /// the record's attempt ceiling, but no backoff delay is taken.
    pub async fn process_once(&self, limit: usize) -> FlushReport {
        // sender を保持している間は cancel されない
        let (_keep_open, mut never) = watch::channel(false);
        let mut report = FlushReport::default();

        for _ in 0..limit {
            match self.inner.run_cycle(&mut never).await {
                Cycle::Idle | Cycle::Cancelled => break,
                Cycle::Delivered => report.delivered += 1,
                Cycle::DeadLettered => report.dead_lettered += 1,
                Cycle::CorruptDropped => report.corrupt_dropped += 1,
                Cycle::Vanished => {}
                Cycle::Failed => {
                    report.stopped_on_failure = true;
                    break;
                }
            }
        }

        debug!(
            delivered = report.delivered,
            dead_lettered = report.dead_lettered,
            corrupt_dropped = report.corrupt_dropped,
            stopped_on_failure = report.stopped_on_failure,
            "process_once finished"
        );
        report
    }
}

impl Drop for DeliveryWorker {
    fn drop(&mut self) {
        if let Ok(Some(running)) = self.running.get_mut() {
            let _ = running.shutdown_tx.send(true);
        }
    }
}

impl WorkerInner {
    fn update_stats(&self, f: impl FnOnce(&mut DeliveryStats)) {
        f(&mut lock(&self.stats));
    }

    async fn run_cycle(&self, shutdown_rx: &mut watch::Receiver<bool>) -> Cycle {
        let _gate = self.gate.lock().await;

        let Some(record_id) = self.spool.peek_next().await else {
            lock(&self.attempts).clear_all();
            return Cycle::Idle;
        };
        // 先頭より古いレコードは追い出し・clear などで既にキューにない
        lock(&self.attempts).prune_before(&record_id);

        let item = match self.spool.load(&record_id).await {
            Ok(item) => item,
            Err(SpoolError::NotFound(_)) => {
                debug!(%record_id, "record vanished before delivery");
                lock(&self.attempts).clear(&record_id);
                return Cycle::Vanished;
            }
            Err(e) if e.is_corrupt() => return self.drop_corrupt(&record_id, &e).await,
            Err(e) => return self.on_failure(&record_id, e.to_string()).await,
        };

        debug!(
            %record_id,
            queued_ms = (Utc::now() - item.created_at()).num_milliseconds(),
            "submitting record"
        );
        let result = tokio::select! {
            _ = cancelled(shutdown_rx) => {
                debug!(%record_id, "shutdown during request, attempt abandoned");
                return Cycle::Cancelled;
            }
            result = self.client.submit_for_result(item.payload(), record_id.correlation_id()) => result,
        };

        match result {
            Ok((outcome, meta)) => self.on_success(&record_id, outcome, &meta).await,
            Err(e) => self.on_failure(&record_id, e.to_string()).await,
        }
    }

    async fn drop_corrupt(&self, record_id: &RecordId, err: &SpoolError) -> Cycle {
        warn!(%record_id, error = %err, "dropping corrupt record");
        if let Err(e) = self.spool.remove(record_id).await {
            // 消せないままだと先頭を塞ぐので、通常の失敗として数える
            return self.on_failure(record_id, e.to_string()).await;
        }
        lock(&self.attempts).clear(record_id);
        self.update_stats(|s| s.corrupt_dropped += 1);
        Cycle::CorruptDropped
    }

    async fn on_success(
        &self,
        record_id: &RecordId,
        outcome: Option<AnalysisOutcome>,
        meta: &ResponseMeta,
    ) -> Cycle {
        if let Err(e) = self.spool.remove(record_id).await {
            error!(%record_id, error = %e, "failed to remove delivered record, it may be sent again");
        }
        lock(&self.attempts).clear(record_id);
        lock(&self.backoff).reset();
        self.update_stats(|s| s.delivered += 1);

        info!(
            %record_id,
            status = meta.status,
            elapsed_ms = meta.elapsed.as_millis() as u64,
            has_outcome = outcome.is_some(),
            "record delivered"
        );

        match self.sink.upgrade() {
            Some(sink) => sink.apply(record_id, outcome).await,
            None => debug!(%record_id, "result sink is gone, outcome discarded"),
        }
        Cycle::Delivered
    }

    async fn on_failure(&self, record_id: &RecordId, reason: String) -> Cycle {
        let attempt = lock(&self.attempts).record_failure(record_id);
        let max_attempts = self.config.max_attempts_per_item;
        self.update_stats(|s| {
            s.failed_attempts += 1;
            s.last_error = Some(reason.clone());
        });

        if attempt < max_attempts {
            warn!(%record_id, attempt, max_attempts, error = %reason, "delivery failed, will retry");
            return Cycle::Failed;
        }

        warn!(%record_id, attempt, error = %reason, "delivery failed too many times, moving to dead-letter");
        match self.spool.move_to_dead(record_id).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(%record_id, "record left the queue while in flight, nothing to dead-letter");
                lock(&self.attempts).clear(record_id);
                return Cycle::Vanished;
            }
            Err(e) => {
                error!(%record_id, error = %e, "failed to move record to dead-letter");
                return Cycle::Failed;
            }
        }
        lock(&self.attempts).clear(record_id);
        lock(&self.backoff).reset();
        self.update_stats(|s| s.dead_lettered += 1);
        Cycle::DeadLettered
    }
}

async fn delivery_loop(inner: Arc<WorkerInner>, mut shutdown_rx: watch::Receiver<bool>) {
    if inner.config.probe_on_start {
        let healthy = tokio::select! {
            _ = cancelled(&mut shutdown_rx) => return,
            healthy = inner.client.health_check() => healthy,
        };
        inner.update_stats(|s| s.last_probe_healthy = Some(healthy));
        if healthy {
            info!("analysis service is reachable");
        } else {
            warn!("analysis service health probe failed, delivering anyway");
        }
    }

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let pause = match inner.run_cycle(&mut shutdown_rx).await {
            Cycle::Idle => inner.config.idle_poll(),
            Cycle::Failed => {
                let delay = lock(&inner.backoff).next_delay();
                debug!(delay_ms = delay.as_millis() as u64, "backing off");
                delay
            }
            Cycle::Cancelled => break,
            Cycle::Delivered | Cycle::Vanished | Cycle::CorruptDropped | Cycle::DeadLettered => {
                continue;
            }
        };

        if !sleep_or_cancel(pause, &mut shutdown_rx).await {
            break;
        }
    }

    debug!("delivery loop exited");
}

/// Resolves once shutdown is requested (or the sender is gone).
async fn cancelled(shutdown_rx: &mut watch::Receiver<bool>) {
    let _ = shutdown_rx.wait_for(|stop| *stop).await;
}

/// `true` if the full duration elapsed, `false` if shutdown came first.
async fn sleep_or_cancel(duration: Duration, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = cancelled(shutdown_rx) => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

//! Spooler - spool・client・worker のワイヤリング
//!
//! # 使用例
//! ```ignore
//! let spooler = SpoolerBuilder::new(config)
//!     .with_sink(Arc::downgrade(&sink))
//!     .build()
//!     .await?;
//! spooler.start();
//! spooler.submit(WorkPayload::new("TextEdit", "teh")).await?;
//! ```
//!
//! producer 側は `submit` を呼ぶだけ。配送・再試行・dead-letter は worker が担当します。

use std::sync::{Arc, Weak};

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::delivery_worker::DeliveryWorker;
use super::status::{DeliveryStats, FlushReport, SpoolCounts, WorkerStatus};
use crate::config::{ConfigError, SpoolerConfig};
use crate::domain::{RecordId, RemoteError, ResponseMeta, SpoolError, WorkItem, WorkPayload};
use crate::impls::{FileSpool, HttpAnalysisClient};
use crate::ports::{
    AnalysisClient, Clock, EnqueueReceipt, NoopResultSink, RecordIdGenerator, ResultSink, Spool,
    SystemClock, UuidRecordIdGenerator,
};

/// BuildError は Spooler 構築時のエラー
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to open spool: {0}")]
    Spool(#[from] SpoolError),

    #[error("failed to create analysis client: {0}")]
    Remote(#[from] RemoteError),
}

/// SpoolerBuilder は Spooler を構築
///
/// 明示しなかった部品は config から作る:
/// - spool: `FileSpool`（`spool.root_dir`）
/// - client: `HttpAnalysisClient`（`remote.*`）
/// - sink: なし（結果は捨てる）
pub struct SpoolerBuilder {
    config: SpoolerConfig,
    spool: Option<Arc<dyn Spool>>,
    client: Option<Arc<dyn AnalysisClient>>,
    sink: Option<Weak<dyn ResultSink>>,
    clock: Arc<dyn Clock>,
    id_generator: Option<Arc<dyn RecordIdGenerator>>,
}

impl SpoolerBuilder {
    pub fn new(config: SpoolerConfig) -> Self {
        Self {
            config,
            spool: None,
            client: None,
            sink: None,
            clock: Arc::new(SystemClock),
            id_generator: None,
        }
    }

    pub fn with_spool(mut self, spool: Arc<dyn Spool>) -> Self {
        self.spool = Some(spool);
        self
    }

    pub fn with_client(mut self, client: Arc<dyn AnalysisClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// The sink is held weakly; keep your own `Arc` alive.
    pub fn with_sink(mut self, sink: Weak<dyn ResultSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_id_generator(mut self, id_generator: Arc<dyn RecordIdGenerator>) -> Self {
        self.id_generator = Some(id_generator);
        self
    }

    /// Validate the config and open whatever was not supplied.
    pub async fn build(self) -> Result<Spooler, BuildError> {
        self.config.validate()?;

        let spool: Arc<dyn Spool> = match self.spool {
            Some(spool) => spool,
            None => Arc::new(
                FileSpool::open(&self.config.spool.root_dir, self.config.spool.max_on_disk).await?,
            ),
        };
        let client: Arc<dyn AnalysisClient> = match self.client {
            Some(client) => client,
            None => Arc::new(HttpAnalysisClient::new(&self.config.remote)?),
        };
        let id_generator = self
            .id_generator
            .unwrap_or_else(|| Arc::new(UuidRecordIdGenerator::new(Arc::clone(&self.clock))));
        let sink = self
            .sink
            .unwrap_or_else(|| Weak::<NoopResultSink>::new());

        let worker = DeliveryWorker::new(
            Arc::clone(&spool),
            Arc::clone(&client),
            sink,
            self.config.delivery.clone(),
        );

        Ok(Spooler {
            config: self.config,
            spool,
            client,
            clock: self.clock,
            id_generator,
            worker,
        })
    }
}

/// Spooler は producer 向けの窓口
pub struct Spooler {
    config: SpoolerConfig,
    spool: Arc<dyn Spool>,
    client: Arc<dyn AnalysisClient>,
    clock: Arc<dyn Clock>,
    id_generator: Arc<dyn RecordIdGenerator>,
    worker: DeliveryWorker,
}

impl Spooler {
    pub fn config(&self) -> &SpoolerConfig {
        &self.config
    }

    pub fn spool(&self) -> &Arc<dyn Spool> {
        &self.spool
    }

    fn new_item(&self, payload: WorkPayload) -> WorkItem {
        WorkItem::new(self.id_generator.generate(), self.clock.now(), payload)
    }

    /// Persist a payload for delivery.
    pub async fn submit(&self, payload: WorkPayload) -> Result<EnqueueReceipt, SpoolError> {
        let item = self.new_item(payload);
        let receipt = self.spool.enqueue(&item).await?;
        info!(
            record_id = %receipt.record_id,
            dropped = receipt.dropped,
            "work item spooled"
        );
        Ok(receipt)
    }

    /// Like [`submit`](Self::submit), on a spawned task.
    ///
    /// The record id is assigned before returning, so the caller can match
    /// it against sink notifications. Enqueue errors are logged.
    pub fn submit_detached(
        &self,
        payload: WorkPayload,
    ) -> (RecordId, JoinHandle<Result<EnqueueReceipt, SpoolError>>) {
        let item = self.new_item(payload);
        let record_id = item.id().clone();
        let spool = Arc::clone(&self.spool);

        let join = tokio::spawn(async move {
            let result = spool.enqueue(&item).await;
            match &result {
                Ok(receipt) => {
                    debug!(record_id = %receipt.record_id, dropped = receipt.dropped, "work item spooled")
                }
                Err(e) => warn!(record_id = %item.id(), error = %e, "failed to spool work item"),
            }
            result
        });
        (record_id, join)
    }

    /// Send once, bypassing the spool. Nothing is retried or persisted.
    pub async fn send_direct(&self, payload: WorkPayload) -> Result<ResponseMeta, RemoteError> {
        let record_id = self.id_generator.generate();
        self.client
            .submit(&payload, record_id.correlation_id())
            .await
    }

    pub fn start(&self) {
        self.worker.start();
    }

    pub async fn stop(&self) {
        self.worker.stop().await;
    }

    pub fn status(&self) -> WorkerStatus {
        self.worker.status()
    }

    pub fn stats(&self) -> DeliveryStats {
        self.worker.stats()
    }

    pub async fn flush(&self, limit: usize) -> FlushReport {
        self.worker.process_once(limit).await
    }

    pub async fn health_check(&self) -> bool {
        self.client.health_check().await
    }

    pub async fn counts(&self) -> Result<SpoolCounts, SpoolError> {
        Ok(SpoolCounts {
            pending: self.spool.count().await,
            dead: self.spool.dead_count().await?,
        })
    }

    pub async fn dead_letters(&self) -> Result<Vec<RecordId>, SpoolError> {
        self.spool.dead_letters().await
    }

    /// Move one dead record back to pending.
    pub async fn replay(&self, record_id: &RecordId) -> Result<bool, SpoolError> {
        self.spool.requeue_dead(record_id).await
    }

    /// Move every dead record back to pending, oldest first.
    pub async fn replay_all(&self) -> Result<usize, SpoolError> {
        let mut replayed = 0;
        for record_id in self.spool.dead_letters().await? {
            if self.replay(&record_id).await? {
                replayed += 1;
            }
        }
        Ok(replayed)
    }

    pub async fn clear_pending(&self) -> Result<usize, SpoolError> {
        self.spool.clear_all().await
    }

    pub async fn clear_dead(&self) -> Result<usize, SpoolError> {
        self.spool.clear_dead().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeliveryConfig;
    use crate::domain::AnalysisOutcome;
    use crate::impls::{InMemorySpool, REQUEST_ID_HEADER};
    use crate::ports::FixedClock;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;
    use wiremock::{Mock, MockServer, ResponseTemplate, matchers};

    #[derive(Default)]
    struct RecordingSink {
        applied: Mutex<Vec<(RecordId, Option<AnalysisOutcome>)>>,
    }

    #[async_trait]
    impl ResultSink for RecordingSink {
        async fn apply(&self, id: &RecordId, outcome: Option<AnalysisOutcome>) {
            self.applied.lock().unwrap().push((id.clone(), outcome));
        }
    }

    fn config_for(server: &MockServer, root: &std::path::Path) -> SpoolerConfig {
        let mut config = SpoolerConfig::default();
        config.spool.root_dir = root.to_path_buf();
        config.spool.max_on_disk = 10;
        config.remote.base_url = server.uri();
        config.delivery = DeliveryConfig {
            max_attempts_per_item: 3,
            probe_on_start: false,
            ..DeliveryConfig::default()
        };
        config
    }

    #[tokio::test]
    async fn submitted_item_is_delivered_end_to_end() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/analyze"))
            .and(matchers::header_exists(REQUEST_ID_HEADER))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"replacementChunk": "the cat"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let weak = Arc::downgrade(&sink);
        let weak: Weak<dyn ResultSink> = weak;
        let spooler = SpoolerBuilder::new(config_for(&server, dir.path()))
            .with_sink(weak)
            .build()
            .await
            .unwrap();

        let receipt = spooler
            .submit(WorkPayload::new("TextEdit", "teh cat"))
            .await
            .unwrap();
        assert_eq!(receipt.dropped, 0);
        assert_eq!(spooler.counts().await.unwrap().pending, 1);

        let report = spooler.flush(10).await;
        assert_eq!(report.delivered, 1);
        assert_eq!(spooler.counts().await.unwrap(), SpoolCounts::default());

        let applied = sink.applied.lock().unwrap().clone();
        assert_eq!(
            applied,
            vec![(
                receipt.record_id,
                Some(AnalysisOutcome {
                    replacement_chunk: "the cat".to_string()
                })
            )]
        );
    }

    #[tokio::test]
    async fn failing_service_dead_letters_and_replay_restores() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let spooler = SpoolerBuilder::new(config_for(&server, dir.path()))
            .build()
            .await
            .unwrap();
        let receipt = spooler
            .submit(WorkPayload::new("Mail", "hello"))
            .await
            .unwrap();

        for _ in 0..3 {
            spooler.flush(1).await;
        }
        assert_eq!(
            spooler.counts().await.unwrap(),
            SpoolCounts { pending: 0, dead: 1 }
        );
        assert_eq!(spooler.stats().dead_lettered, 1);

        assert_eq!(spooler.replay_all().await.unwrap(), 1);
        assert_eq!(spooler.spool().peek_next().await, Some(receipt.record_id));
        assert_eq!(spooler.clear_pending().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn record_ids_follow_the_clock() {
        let clock = Arc::new(FixedClock::new(
            Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
        ));
        let spooler = SpoolerBuilder::new(SpoolerConfig::default())
            .with_spool(Arc::new(InMemorySpool::new(2)))
            .with_client(Arc::new(HttpAnalysisClient::new(&Default::default()).unwrap()))
            .with_clock(clock.clone())
            .build()
            .await
            .unwrap();

        let first = spooler.submit(WorkPayload::new("a", "1")).await.unwrap();
        clock.advance(chrono::Duration::milliseconds(5));
        let (second, join) = spooler.submit_detached(WorkPayload::new("a", "2"));
        join.await.unwrap().unwrap();

        assert_eq!(first.record_id.created_millis(), 1_700_000_000_000);
        assert_eq!(second.created_millis(), 1_700_000_000_005);
        assert!(first.record_id < second);

        // capacity 2 を超えたら最古が落ちる
        clock.advance(chrono::Duration::milliseconds(5));
        let third = spooler.submit(WorkPayload::new("a", "3")).await.unwrap();
        assert_eq!(third.dropped, 1);
        assert_eq!(spooler.spool().peek_next().await, Some(second));
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_before_opening_anything() {
        let mut config = SpoolerConfig::default();
        config.delivery.max_attempts_per_item = 0;
        let result = SpoolerBuilder::new(config).build().await;
        assert!(matches!(result, Err(BuildError::Config(ConfigError::Invalid(_)))));
    }
}

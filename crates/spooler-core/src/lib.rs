//! spooler-core
//!
//! Durable delivery of captured work items to a remote analysis service.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（RecordId, WorkItem, AnalysisOutcome, errors）
//! - **ports**: 抽象化レイヤー（Spool, AnalysisClient, ResultSink, Clock, RecordIdGenerator）
//! - **impls**: 実装（FileSpool, InMemorySpool, HttpAnalysisClient）
//! - **app**: 配送ロジック（DeliveryWorker, Backoff, Spooler）
//! - **config**: TOML 設定

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;

pub use app::{
    DeliveryStats, DeliveryWorker, FlushReport, SpoolCounts, Spooler, SpoolerBuilder, WorkerStatus,
};
pub use config::{ConfigError, SpoolerConfig};
pub use domain::{
    AnalysisOutcome, ImageAttachment, RecordId, RemoteError, SpoolError, WorkItem, WorkPayload,
};
pub use ports::{AnalysisClient, EnqueueReceipt, ResultSink, Spool};

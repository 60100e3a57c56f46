//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせて配送ロジックを実装します。
//!
//! # 主要コンポーネント
//! - **SpoolerBuilder / Spooler**: ワイヤリングと producer 向け API
//! - **DeliveryWorker**: spool → 解析サービスの配送ループ
//! - **Backoff**: ワーカー全体で共有する指数バックオフ
//! - **AttemptTracker**: レコードごとの連続失敗回数（メモリのみ）

pub mod attempts;
pub mod delivery_worker;
pub mod retry;
pub mod spooler;
pub mod status;

// 主要な型を再エクスポート
pub use self::attempts::AttemptTracker;
pub use self::delivery_worker::DeliveryWorker;
pub use self::retry::{Backoff, BackoffPolicy};
pub use self::spooler::{BuildError, Spooler, SpoolerBuilder};
pub use self::status::{DeliveryStats, FlushReport, SpoolCounts, WorkerStatus};

//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部（ファイルシステム、解析サービス、ホストアプリの UI）への
//! インターフェースを提供し、実装の詳細を隠蔽します。

pub mod clock;
pub mod id_generator;
pub mod remote;
pub mod result_sink;
pub mod spool;

// 主要な trait を再エクスポート
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{RecordIdGenerator, UuidRecordIdGenerator};
pub use self::remote::AnalysisClient;
pub use self::result_sink::{NoopResultSink, ResultSink};
pub use self::spool::{EnqueueReceipt, Spool};

//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **FileSpool**: `pending/` + `dead/` のディレクトリ spool（本番用）
//! - **InMemorySpool**: テスト用の spool
//! - **HttpAnalysisClient**: reqwest による解析サービス client

pub mod fs_spool;
pub mod http_client;
pub mod inmem_spool;

// 主要な型を再エクスポート
pub use self::fs_spool::FileSpool;
pub use self::http_client::{HttpAnalysisClient, REQUEST_ID_HEADER};
pub use self::inmem_spool::InMemorySpool;

//! Errors - エラー型と分類
//!
//! - `SpoolError`: 永続キュー（ディスク・インデックス）のエラー
//! - `RemoteError`: 解析サービスへの送信エラー（すべてリトライ対象）

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use super::ids::RecordId;

#[derive(Debug, Error)]
pub enum SpoolError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize work item: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The record exists but cannot be decoded. Never retryable.
    #[error("corrupt record {record_id}: {reason}")]
    Corrupt { record_id: RecordId, reason: String },

    #[error("invalid record id: {0}")]
    InvalidRecordId(String),

    #[error("record not found: {0}")]
    NotFound(RecordId),
}

impl SpoolError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::Corrupt { .. })
    }
}

/// Failure of one remote submission.
///
/// Transport failures and non-2xx responses are treated the same way by
/// the delivery worker: counted toward the attempt ceiling, then retried.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("server error: HTTP {status}")]
    Server { status: u16, body: String },

    #[error("client configuration error: {0}")]
    Configuration(String),
}

impl RemoteError {
    /// Connection-level failure (no HTTP response was received).
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_))
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Server { status, .. } => Some(*status),
            _ => None,
        }
    }
}

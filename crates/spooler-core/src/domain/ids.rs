//! Record identifiers.
//!
//! # `<unix-millis>_<uuid>` 形式
//! - 先頭の millis は 13 桁ゼロ埋め（文字列ソート = 数値ソート）
//! - 後半の UUID v4 で同一ミリ秒内の衝突を避ける
//! - 文字列の辞書順がそのまま FIFO 順になる
//!
//! ファイル名（`<id>.json`）・ワークアイテム ID・相関 ID はすべてこの値を共有します。

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use super::errors::SpoolError;

/// Width of the zero-padded millis prefix.
const MILLIS_WIDTH: usize = 13;

/// Identifier of one queued work item (and of its on-disk record).
///
/// Ordering is plain string ordering, which is what the spool relies on
/// for FIFO delivery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(String);

impl RecordId {
    /// Build an id from its parts.
    pub fn from_parts(created_at: DateTime<Utc>, suffix: Uuid) -> Self {
        let millis = created_at.timestamp_millis().max(0);
        Self(format!(
            "{millis:0width$}_{suffix}",
            width = MILLIS_WIDTH
        ))
    }

    /// Parse and validate a record name (without the `.json` extension).
    pub fn parse(raw: &str) -> Result<Self, SpoolError> {
        let invalid = || SpoolError::InvalidRecordId(raw.to_string());

        let (millis, suffix) = raw.split_once('_').ok_or_else(invalid)?;
        if millis.is_empty() || !millis.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        Uuid::parse_str(suffix).map_err(|_| invalid())?;

        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Creation time encoded in the prefix.
    pub fn created_millis(&self) -> u64 {
        self.0
            .split_once('_')
            .and_then(|(millis, _)| millis.parse().ok())
            .unwrap_or(0)
    }

    /// Correlation id sent as `X-Request-Id`.
    ///
    /// Every attempt for the same record carries the same value so the
    /// remote side can deduplicate retried deliveries.
    pub fn correlation_id(&self) -> &str {
        &self.0
    }

    /// File name used by the filesystem spool.
    pub fn file_name(&self) -> String {
        format!("{}.json", self.0)
    }

    /// Inverse of [`RecordId::file_name`]; `None` for anything that is not a record.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let stem = name.strip_suffix(".json")?;
        Self::parse(stem).ok()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RecordId {
    type Err = SpoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for RecordId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

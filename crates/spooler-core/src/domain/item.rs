//! Work items: the unit of delivery.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::RecordId;

/// Screenshot (or any image) attached to a payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageAttachment {
    pub mime_type: String,
    pub data_base64: String,
}

impl ImageAttachment {
    pub fn from_bytes(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            mime_type: mime_type.into(),
            data_base64: STANDARD.encode(bytes),
        }
    }

    pub fn decoded_len(&self) -> Option<usize> {
        STANDARD.decode(&self.data_base64).ok().map(|b| b.len())
    }
}

/// Body of `POST /analyze`.
///
/// Opaque to the delivery path: the spool stores it, the client sends it,
/// nothing in between looks inside. `context` is a `BTreeMap` so the
/// serialized form has a stable key order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkPayload {
    pub app_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_title: Option<String>,

    pub text: String,

    pub captured_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<ImageAttachment>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, String>,
}

impl WorkPayload {
    pub fn new(app_name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            bundle_id: None,
            window_title: None,
            text: text.into(),
            captured_at: Utc::now(),
            screenshot: None,
            context: BTreeMap::new(),
        }
    }

    pub fn with_bundle_id(mut self, bundle_id: impl Into<String>) -> Self {
        self.bundle_id = Some(bundle_id.into());
        self
    }

    pub fn with_window_title(mut self, title: impl Into<String>) -> Self {
        self.window_title = Some(title.into());
        self
    }

    pub fn with_screenshot(mut self, screenshot: ImageAttachment) -> Self {
        self.screenshot = Some(screenshot);
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_captured_at(mut self, at: DateTime<Utc>) -> Self {
        self.captured_at = at;
        self
    }
}

/// One immutable unit of work, as persisted in the spool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    id: RecordId,
    created_at: DateTime<Utc>,
    payload: WorkPayload,
}

impl WorkItem {
    pub fn new(id: RecordId, created_at: DateTime<Utc>, payload: WorkPayload) -> Self {
        Self {
            id,
            created_at,
            payload,
        }
    }

    pub fn id(&self) -> &RecordId {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn payload(&self) -> &WorkPayload {
        &self.payload
    }

    /// Serialized record contents (pretty-printed, stable key order).
    pub fn to_record_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }

    pub fn from_record_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

//! HTTP client for the analysis service.
//!
//! - `POST {base}/analyze` with the payload as JSON and `X-Request-Id`
//! - `GET {base}/healthz` for the liveness probe
//!
//! Non-2xx responses become `RemoteError::Server`; connection problems and
//! timeouts become `Transport` / `Timeout`.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{Instrument, debug, info_span, warn};

use crate::config::RemoteConfig;
use crate::domain::{AnalysisOutcome, AnalysisResponse, RemoteError, ResponseMeta, WorkPayload};
use crate::ports::AnalysisClient;

pub const REQUEST_ID_HEADER: &str = "X-Request-Id";
const ANALYZE_PATH: &str = "/analyze";
const HEALTH_PATH: &str = "/healthz";

/// Error bodies are kept for logs only.
const MAX_ERROR_BODY: usize = 1024;

/// reqwest-backed [`AnalysisClient`].
#[derive(Debug, Clone)]
pub struct HttpAnalysisClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpAnalysisClient {
    pub fn new(config: &RemoteConfig) -> Result<Self, RemoteError> {
        let timeout = config.request_timeout();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| RemoteError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn classify(&self, err: reqwest::Error) -> RemoteError {
        if err.is_timeout() {
            RemoteError::Timeout(self.timeout)
        } else if err.is_connect() {
            RemoteError::Transport(format!("connection failed: {err}"))
        } else {
            RemoteError::Transport(err.to_string())
        }
    }

    /// One POST; returns the raw body of a 2xx response.
    async fn post_analyze(
        &self,
        payload: &WorkPayload,
        request_id: &str,
    ) -> Result<(Vec<u8>, ResponseMeta), RemoteError> {
        let started = Instant::now();

        let response = self
            .client
            .post(self.url(ANALYZE_PATH))
            .header(REQUEST_ID_HEADER, request_id)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                let err = self.classify(e);
                warn!(elapsed_ms = started.elapsed().as_millis() as u64, error = %err, "request failed");
                err
            })?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| self.classify(e))?;
        let meta = ResponseMeta {
            status: status.as_u16(),
            request_id: request_id.to_string(),
            elapsed: started.elapsed(),
            body_len: body.len(),
        };

        if !status.is_success() {
            let end = body.len().min(MAX_ERROR_BODY);
            let body = String::from_utf8_lossy(&body[..end]).into_owned();
            warn!(status = meta.status, "analysis service returned an error");
            return Err(RemoteError::Server {
                status: meta.status,
                body,
            });
        }

        debug!(
            status = meta.status,
            elapsed_ms = meta.elapsed.as_millis() as u64,
            "analysis request accepted"
        );
        Ok((body.to_vec(), meta))
    }
}

#[async_trait]
impl AnalysisClient for HttpAnalysisClient {
    async fn health_check(&self) -> bool {
        match self.client.get(self.url(HEALTH_PATH)).send().await {
            Ok(response) => response.status() == StatusCode::OK,
            Err(e) => {
                debug!(error = %e, "health probe failed");
                false
            }
        }
    }

    async fn submit(
        &self,
        payload: &WorkPayload,
        request_id: &str,
    ) -> Result<ResponseMeta, RemoteError> {
        let span = info_span!("analyze", request_id, mode = "submit");
        async move { self.post_analyze(payload, request_id).await.map(|(_, meta)| meta) }
            .instrument(span)
            .await
    }

    async fn submit_for_result(
        &self,
        payload: &WorkPayload,
        request_id: &str,
    ) -> Result<(Option<AnalysisOutcome>, ResponseMeta), RemoteError> {
        let span = info_span!("analyze", request_id, mode = "submit_for_result");
        async move {
            let (body, meta) = self.post_analyze(payload, request_id).await?;

            // 2xx なのにボディが読めない場合は「結果なし」として扱う（エラーにしない）
            let outcome = match serde_json::from_slice::<AnalysisResponse>(&body) {
                Ok(response) => response.into_outcome(),
                Err(e) => {
                    debug!(error = %e, body_len = body.len(), "undecodable success body, no outcome");
                    None
                }
            };
            Ok((outcome, meta))
        }
        .instrument(span)
        .await
    }
}

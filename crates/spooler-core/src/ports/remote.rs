//! AnalysisClient port - 解析サービスへの送信
//!
//! # 実装
//! - **HttpAnalysisClient**: reqwest（本番用）
//! - テストではスクリプト化した fake を使用

use async_trait::async_trait;

use crate::domain::{AnalysisOutcome, RemoteError, ResponseMeta, WorkPayload};

/// AnalysisClient は 1 件の WorkPayload を送信して結果を返す
///
/// # 設計原則
/// - `request_id` は `X-Request-Id` として送る（サーバー側の重複排除用）
/// - クライアント自身は重複排除しない
/// - 2xx だがボディが解釈できない応答はエラーではなく「結果なし」
#[async_trait]
pub trait AnalysisClient: Send + Sync {
    /// Best-effort liveness probe. Never fails; any problem is `false`.
    async fn health_check(&self) -> bool;

    /// Fire-and-forget submission.
    async fn submit(
        &self,
        payload: &WorkPayload,
        request_id: &str,
    ) -> Result<ResponseMeta, RemoteError>;

    /// Submission that also decodes the response body.
    async fn submit_for_result(
        &self,
        payload: &WorkPayload,
        request_id: &str,
    ) -> Result<(Option<AnalysisOutcome>, ResponseMeta), RemoteError>;
}

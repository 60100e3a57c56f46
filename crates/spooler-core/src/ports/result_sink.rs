//! ResultSink port - 解析結果の通知先
//!
//! 実装はホストアプリケーション側（UI 状態の更新など）にあります。
//! DeliveryWorker は `Weak` で参照するため、sink が先に破棄されても問題ありません。

use async_trait::async_trait;

use crate::domain::{AnalysisOutcome, RecordId};

/// ResultSink は配送成功時に `(id, outcome)` を受け取る
///
/// # 契約
/// - もう関心のない ID（置き換え済みなど）で呼ばれても no-op で済ませる
/// - エラーを返さない
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn apply(&self, id: &RecordId, outcome: Option<AnalysisOutcome>);
}

/// 何もしない ResultSink（テスト・CLI の既定値）
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopResultSink;

#[async_trait]
impl ResultSink for NoopResultSink {
    async fn apply(&self, _id: &RecordId, _outcome: Option<AnalysisOutcome>) {}
}

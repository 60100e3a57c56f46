//! Outcome model: what comes back from the analysis service.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Raw `POST /analyze` response body.
///
/// Every field is optional: `{}` is a valid (empty) answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResponse {
    #[serde(default)]
    pub replacement_chunk: Option<String>,
}

impl AnalysisResponse {
    /// Collapse into an actionable outcome.
    ///
    /// A response without a replacement carries nothing for the sink to
    /// apply, so it becomes `None`.
    pub fn into_outcome(self) -> Option<AnalysisOutcome> {
        self.replacement_chunk
            .map(|replacement_chunk| AnalysisOutcome { replacement_chunk })
    }
}

/// Parsed verdict routed to the [`ResultSink`](crate::ports::ResultSink).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisOutcome {
    pub replacement_chunk: String,
}

/// Metadata about one completed HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseMeta {
    pub status: u16,
    pub request_id: String,
    pub elapsed: Duration,
    pub body_len: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::empty_object("{}", None)]
    #[case::explicit_null(r#"{"replacementChunk":null}"#, None)]
    #[case::with_chunk(r#"{"replacementChunk":"hello world"}"#, Some("hello world"))]
    #[case::extra_fields(r#"{"replacementChunk":"x","score":0.9}"#, Some("x"))]
    fn response_collapses_to_outcome(#[case] body: &str, #[case] expected: Option<&str>) {
        let resp: AnalysisResponse = serde_json::from_str(body).unwrap();
        let outcome = resp.into_outcome();
        assert_eq!(
            outcome.as_ref().map(|o| o.replacement_chunk.as_str()),
            expected
        );
    }
}

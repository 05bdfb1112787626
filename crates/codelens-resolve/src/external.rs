//! Out-of-process resolver protocol
//!
//! One request document is written per line to the resolver's stdin and one
//! response document is read back from its stdout:
//!
//! ```text
//! {"requests":[{"id":"r1","file":"src/app.ts","line":12,"column":4}]}
//! {"results":[{"id":"r1","nodeId":"src.util.format","confidence":"resolved","reason":null}]}
//! ```

use std::path::PathBuf;

use codelens_core::{Confidence, ReasonCode, Resolution, UnitId};
use serde::{Deserialize, Serialize};

use crate::error::ResolveError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalRequest {
    pub id: String,
    /// Project-relative path of the referencing file.
    pub file: PathBuf,
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestBatch {
    pub requests: Vec<ExternalRequest>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalResult {
    pub id: String,
    #[serde(rename = "nodeId", default)]
    pub node_id: Option<String>,
    pub confidence: String,
    #[serde(default)]
    pub reason: Option<String>,
}

impl ExternalResult {
    /// Convert a wire result, treating anything inconsistent as a resolver failure.
    pub fn into_resolution(self) -> Resolution {
        let reason = self.reason.as_deref().and_then(ReasonCode::parse);
        match (Confidence::parse(&self.confidence), self.node_id) {
            (None, _) => Resolution::unresolved(ReasonCode::ResolverFailed),
            (Some(Confidence::Unresolved), _) => Resolution::unresolved(reason.unwrap_or(ReasonCode::NoSymbol)),
            (Some(_), None) => Resolution::unresolved(ReasonCode::ResolverFailed),
            (Some(confidence), Some(id)) => Resolution { target: Some(UnitId::new(id)), confidence, reason },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseBatch {
    pub results: Vec<ExternalResult>,
}

/// A resolver running outside this process.
#[async_trait::async_trait]
pub trait ExternalResolver: Send + Sync {
    /// Resolve one batch. Per-call timeouts are applied by the caller.
    async fn resolve(&self, batch: &RequestBatch) -> Result<ResponseBatch, ResolveError>;

    /// Get provider name
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        let line = r#"{"results":[{"id":"a","nodeId":"m.f","confidence":"resolved","reason":null},{"id":"b","nodeId":null,"confidence":"unresolved","reason":"no_symbol"}]}"#;
        let batch: ResponseBatch = serde_json::from_str(line).unwrap();
        let mut results = batch.results.into_iter();

        let first = results.next().unwrap().into_resolution();
        assert_eq!(first, Resolution::resolved("m.f"));

        let second = results.next().unwrap().into_resolution();
        assert_eq!(second, Resolution::unresolved(ReasonCode::NoSymbol));
    }

    #[test]
    fn test_inconsistent_results_fail_closed() {
        let missing_target = ExternalResult {
            id: "a".into(),
            node_id: None,
            confidence: "resolved".into(),
            reason: None,
        };
        assert_eq!(missing_target.into_resolution(), Resolution::unresolved(ReasonCode::ResolverFailed));

        let bad_confidence = ExternalResult {
            id: "a".into(),
            node_id: Some("m.f".into()),
            confidence: "certain".into(),
            reason: None,
        };
        assert_eq!(bad_confidence.into_resolution(), Resolution::unresolved(ReasonCode::ResolverFailed));
    }

    #[test]
    fn test_request_serialization() {
        let batch = RequestBatch {
            requests: vec![ExternalRequest { id: "r1".into(), file: "src/app.ts".into(), line: 3, column: 7 }],
        };
        let json = serde_json::to_string(&batch).unwrap();
        assert_eq!(json, r#"{"requests":[{"id":"r1","file":"src/app.ts","line":3,"column":7}]}"#);
    }
}

//! Consumer-facing operations
//!
//! Each function wraps a [`ProjectContext`] call in a [`ToolResponse`]
//! envelope: `success` plus either `data` or a structured `error`, and any
//! warnings collected along the way. Failures never escape as `Err`.

use codelens_core::{CoreError, Cycle, Edge, ImpactReport, MergeStats, ObservedEdge, SourceUnit, UnitId, Usage};
use serde::Serialize;
use serde_json::{Value, json};

use crate::context::ProjectContext;
use crate::error::EngineError;
use crate::patch::{BatchReport, CancelToken, PatchError, PatchProposal, PatchRequest, PatchState};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub details: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolError>,
    pub warnings: Vec<String>,
}

impl<T> ToolResponse<T> {
    pub fn ok(data: T) -> Self {
        ToolResponse { success: true, data: Some(data), error: None, warnings: Vec::new() }
    }

    pub fn fail(error: ToolError) -> Self {
        ToolResponse { success: false, data: None, error: Some(error), warnings: Vec::new() }
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings.extend(warnings);
        self
    }
}

impl From<CoreError> for ToolError {
    fn from(e: CoreError) -> Self {
        let details = match &e {
            CoreError::UnitNotFound { suggestions, .. } => json!({ "suggestions": suggestions }),
            _ => Value::Null,
        };
        let message = e.to_string();
        ToolError { code: EngineError::Core(e).code().to_string(), message, details }
    }
}

impl From<PatchError> for ToolError {
    fn from(e: PatchError) -> Self {
        let mut details = serde_json::Map::new();
        if let Some(index) = e.failing_index() {
            details.insert("failing_index".into(), json!(index));
        }
        match &e {
            PatchError::UnitNotFound { suggestions, .. } => {
                details.insert("suggestions".into(), json!(suggestions));
            }
            PatchError::Validation { failure, report, .. } => {
                details.insert("level".into(), json!(failure.level));
                details.insert("check".into(), json!(failure.check));
                details.insert("reason".into(), json!(failure.reason));
                details.insert("breaking_changes".into(), json!(report.breaking_changes));
            }
            PatchError::Overlap { other, path, .. } => {
                details.insert("overlaps".into(), json!(other));
                details.insert("file".into(), json!(path));
            }
            PatchError::Io { path, rolled_back, .. } => {
                details.insert("file".into(), json!(path));
                details.insert("rolled_back".into(), json!(rolled_back));
            }
            PatchError::Cancelled { rolled_back } | PatchError::Resync { rolled_back, .. } => {
                details.insert("rolled_back".into(), json!(rolled_back));
            }
            _ => {}
        }
        let details = if details.is_empty() { Value::Null } else { Value::Object(details) };
        ToolError { code: e.code().to_string(), message: e.to_string(), details }
    }
}

impl From<EngineError> for ToolError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Core(e) => e.into(),
            EngineError::Patch(e) => e.into(),
            other => ToolError { code: other.code().to_string(), message: other.to_string(), details: Value::Null },
        }
    }
}

fn respond<T>(result: Result<T, CoreError>) -> ToolResponse<T> {
    match result {
        Ok(data) => ToolResponse::ok(data),
        Err(e) => ToolResponse::fail(e.into()),
    }
}

pub fn get_unit(ctx: &ProjectContext, id: &str) -> ToolResponse<SourceUnit> {
    respond(ctx.get_unit(id))
}

pub fn find_usages(ctx: &ProjectContext, id: &str) -> ToolResponse<Vec<Usage>> {
    respond(ctx.find_usages(id))
}

pub fn check_impact(ctx: &ProjectContext, id: &str, depth: Option<usize>) -> ToolResponse<ImpactReport> {
    match ctx.check_impact(id, depth) {
        Ok(report) => {
            let warnings = report.warnings.clone();
            ToolResponse::ok(report).with_warnings(warnings)
        }
        Err(e) => ToolResponse::fail(e.into()),
    }
}

/// Validate a patch without applying it. A rejected patch is still a
/// successful call; its proposal carries the failures.
pub fn propose_patch(ctx: &ProjectContext, request: &PatchRequest) -> ToolResponse<PatchProposal> {
    match ctx.propose_patch(request) {
        Ok(proposal) => {
            let mut warnings = proposal.impact.warnings.clone();
            warnings.extend(proposal.validation.warnings.iter().cloned());
            if proposal.state == PatchState::Rejected {
                warnings.extend(proposal.validation.failures.iter().map(|f| f.to_string()));
            }
            ToolResponse::ok(proposal).with_warnings(warnings)
        }
        Err(e) => ToolResponse::fail(e.into()),
    }
}

pub async fn apply_batch(ctx: &ProjectContext, requests: Vec<PatchRequest>, cancel: &CancelToken) -> ToolResponse<BatchReport> {
    match ctx.apply_batch(requests, cancel).await {
        Ok(report) => {
            let warnings = report.warnings.clone();
            ToolResponse::ok(report).with_warnings(warnings)
        }
        Err(e) => ToolResponse::fail(e.into()),
    }
}

/// Unreachable definitions. Unknown entry ids are reported as warnings.
pub fn dead_code(ctx: &ProjectContext, entry_points: Option<Vec<UnitId>>) -> ToolResponse<Vec<UnitId>> {
    let snapshot = ctx.snapshot();
    let warnings: Vec<String> = entry_points
        .iter()
        .flatten()
        .filter(|id| !snapshot.contains(id.as_str()))
        .map(|id| format!("unknown entry point: {}", id))
        .collect();
    ToolResponse::ok(ctx.dead_code(entry_points.as_deref())).with_warnings(warnings)
}

pub fn cycles(ctx: &ProjectContext) -> ToolResponse<Vec<Cycle>> {
    ToolResponse::ok(ctx.cycles())
}

pub fn unresolved(ctx: &ProjectContext) -> ToolResponse<Vec<Edge>> {
    ToolResponse::ok(ctx.unresolved())
}

/// Merge runtime-observed edges into the graph and save it.
pub fn merge_observed(ctx: &ProjectContext, observed: Vec<ObservedEdge>) -> ToolResponse<MergeStats> {
    let stats = match ctx.merge_observed(observed) {
        Ok(stats) => stats,
        Err(e) => return ToolResponse::fail(e.into()),
    };
    if let Err(e) = ctx.save() {
        return ToolResponse::fail(e.into());
    }
    let warnings = match stats.skipped {
        0 => Vec::new(),
        n => vec![format!("{} observation(s) skipped: source unit not in the graph", n)],
    };
    ToolResponse::ok(stats).with_warnings(warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::{ValidationFailure, ValidationLevel, ValidationReport};

    #[test]
    fn test_not_found_carries_suggestions() {
        let error: ToolError =
            CoreError::UnitNotFound { id: "user.validate".into(), suggestions: vec!["user.validate_email".into()] }.into();
        assert_eq!(error.code, "unit_not_found");
        assert_eq!(error.details["suggestions"][0], "user.validate_email");
    }

    #[test]
    fn test_validation_error_names_level_and_index() {
        let failure = ValidationFailure::new(ValidationLevel::Structure, "kind", "replacement is a class, unit is a function");
        let error: ToolError = PatchError::Validation { index: 1, failure, report: ValidationReport::default() }.into();
        assert_eq!(error.code, "validation_failed");
        assert_eq!(error.details["failing_index"], 1);
        assert_eq!(error.details["level"], "structure");
        assert_eq!(error.details["check"], "kind");
    }

    #[test]
    fn test_response_shape() {
        let response = ToolResponse::ok(vec![1, 2]).with_warnings(vec!["careful".into()]);
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value, json!({ "success": true, "data": [1, 2], "warnings": ["careful"] }));

        let response: ToolResponse<()> = ToolResponse::fail(PatchError::Empty.into());
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["error"]["code"], "empty_batch");
        assert!(value.get("data").is_none());
    }
}

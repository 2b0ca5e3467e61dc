//! The pension tool set.
//!
//! Every tool follows the same discipline: coerce the free-text input
//! through the shared helpers, fall back to the request context for the
//! caller id, resolve scope through [`crate::scope`] before any read, and
//! return a JSON document with user-facing failures under an `"error"` key.
//! Tools never panic and never surface `Err` for conditions a summarizer
//! should report.

mod aggregate;
mod analysis;
mod project;
mod retrieval;

use std::sync::Arc;

use serde_json::{json, Value};

use pensionflow::context::RequestContext;
use pensionflow::tools::{Tool, ToolInput};
use pensionflow::vector_stores::VectorStoreGateway;

use crate::ml::PredictorService;
use crate::record::RecordStore;

pub use aggregate::{
    GeographicRiskTool, PortfolioTrendsTool, SystemWideFraudTool, SystemWideRiskTool,
};
pub use analysis::{DetectFraudTool, RiskProfileTool};
pub use project::ProjectPensionTool;
pub use retrieval::{
    AnalyzeUploadedDocumentTool, KnowledgeBaseSearchTool, QueryKnowledgeBaseTool,
    OCR_PLACEHOLDER_MARKER,
};

/// Shared handles the tools read through.
#[derive(Clone)]
pub struct ToolDeps {
    pub store: Arc<dyn RecordStore>,
    pub vectors: Arc<VectorStoreGateway>,
    pub predictor: Arc<PredictorService>,
}

/// Builds the full registry handed to every specialist.
pub fn all_pension_tools(deps: &ToolDeps) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(RiskProfileTool::new(deps.clone())),
        Arc::new(DetectFraudTool::new(deps.clone())),
        Arc::new(ProjectPensionTool::new(deps.clone())),
        Arc::new(QueryKnowledgeBaseTool::new(deps.clone())),
        Arc::new(AnalyzeUploadedDocumentTool::new(deps.clone())),
        Arc::new(KnowledgeBaseSearchTool::new(deps.clone())),
        Arc::new(SystemWideRiskTool::new(deps.clone())),
        Arc::new(SystemWideFraudTool::new(deps.clone())),
        Arc::new(GeographicRiskTool::new(deps.clone())),
        Arc::new(PortfolioTrendsTool::new(deps.clone())),
    ]
}

/// The caller id for this invocation: explicit input first, then the
/// request context.
pub(crate) fn effective_caller_id(input: &ToolInput) -> Option<i64> {
    input.user_id().or_else(RequestContext::current_user_id)
}

/// The query for this invocation: explicit input first, then the request
/// context, else empty.
pub(crate) fn effective_query(input: &ToolInput) -> String {
    input
        .query()
        .or_else(RequestContext::current_query)
        .unwrap_or_default()
}

pub(crate) fn not_authenticated() -> Value {
    json!({"error": "User not authenticated"})
}

pub(crate) fn no_pension_data(user_id: i64) -> Value {
    json!({"error": format!("No pension data found for User ID: {user_id}")})
}

pub(crate) fn internal_error(message: impl std::fmt::Display) -> Value {
    json!({"error": format!("{message}")})
}

/// Standard arguments schema for the per-user tools.
pub(crate) fn per_user_args_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "user_id": {
                "type": "integer",
                "description": "Numeric database id of the user. Falls back to the authenticated caller when omitted."
            },
            "query": {
                "type": "string",
                "description": "The user's original question, for context and time-period parsing."
            }
        }
    })
}

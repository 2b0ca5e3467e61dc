//! Response envelopes returned to the transport layer.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The consolidated result the summarizer writes into workflow state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FinalResponse {
    pub summary: String,
    #[serde(default)]
    pub charts: Map<String, Value>,
    #[serde(default)]
    pub plotly_figs: Map<String, Value>,
    #[serde(default)]
    pub chart_images: BTreeMap<String, String>,
    /// Where the numbers came from, e.g. `DATABASE_PENSION_DATA`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_source: Option<String>,
    /// Set when a retrieval tool ran, e.g. `PDF_DOCUMENT_SEARCH`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_type: Option<String>,
    /// Document-search outcome, e.g. `PDFS_FOUND_AND_SEARCHED`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf_status: Option<String>,
}

/// The envelope handed back to the HTTP transport for `/prompt`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptResponse {
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart_data: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plotly_figures: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart_images: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf_status: Option<String>,
}

impl PromptResponse {
    /// Builds the transport envelope from the summarizer's final response.
    pub fn from_final(final_response: FinalResponse, user_id: i64, query: &str) -> Self {
        let metadata = serde_json::json!({
            "user_id": user_id,
            "query": query,
            "workflow_completed": true,
        });
        Self {
            summary: final_response.summary,
            chart_data: Some(final_response.charts),
            plotly_figures: Some(final_response.plotly_figs),
            chart_images: Some(final_response.chart_images),
            metadata: Some(metadata),
            data_source: final_response.data_source,
            search_type: final_response.search_type,
            pdf_status: final_response.pdf_status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_tags_are_omitted_from_json() {
        let response = FinalResponse {
            summary: "done".to_string(),
            ..FinalResponse::default()
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(!json.contains("data_source"));
        assert!(!json.contains("pdf_status"));
    }

    #[test]
    fn envelope_carries_tags_and_metadata() {
        let final_response = FinalResponse {
            summary: "projected balance is 208900".to_string(),
            data_source: Some("DATABASE_PENSION_DATA".to_string()),
            search_type: Some("PDF_DOCUMENT_SEARCH".to_string()),
            pdf_status: Some("PDFS_FOUND_AND_SEARCHED".to_string()),
            ..FinalResponse::default()
        };
        let envelope = PromptResponse::from_final(final_response, 520, "projection please");

        assert_eq!(envelope.summary, "projected balance is 208900");
        assert_eq!(envelope.data_source.as_deref(), Some("DATABASE_PENSION_DATA"));
        let metadata = envelope.metadata.unwrap();
        assert_eq!(metadata["user_id"], 520);
        assert_eq!(metadata["workflow_completed"], true);
    }

    #[test]
    fn final_response_round_trips() {
        let mut charts = Map::new();
        charts.insert("pension_growth".to_string(), serde_json::json!({"mark": "line"}));
        let original = FinalResponse {
            summary: "s".to_string(),
            charts,
            ..FinalResponse::default()
        };
        let json = serde_json::to_string(&original).unwrap();
        let parsed: FinalResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.summary, "s");
        assert!(parsed.charts.contains_key("pension_growth"));
    }
}

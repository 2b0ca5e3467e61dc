//! Final consolidation.
//!
//! The summarizer turns the transcript and tool trace into one user-facing
//! answer, applies the content gate to the outbound text, and packages the
//! structured `final_response` the transport returns. Retrieval tags found
//! in the trace (`data_source`, `search_type`, `pdf_status`) are propagated
//! so a UI can tell database-derived results from document-derived ones.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use pensionflow::language_models::ChatModel;
use pensionflow::messages::{render_transcript, Message};

use crate::policy::PolicyGate;
use crate::response::FinalResponse;
use crate::workflow::AgentState;

const SUMMARY_PROMPT: &str = "You are an expert financial advisor. A team of \
specialist tools has analyzed a user's pension question; their raw results are \
below. Synthesize one cohesive, friendly answer for the user. Quote the concrete \
numbers from the results. Do not mention the internal team or tools by name, and \
stick strictly to pension analysis, risk assessment, and fraud detection.\n\n\
Conversation so far:\n{transcript}\n\nTool results:\n{observations}\n\n\
Your consolidated answer:";

/// The summarizer node.
#[derive(Clone)]
pub struct Summarizer {
    model: Arc<dyn ChatModel>,
    gate: PolicyGate,
    llm_timeout: Duration,
}

impl Summarizer {
    pub fn new(model: Arc<dyn ChatModel>, llm_timeout: Duration) -> Self {
        Self {
            model,
            gate: PolicyGate::new(),
            llm_timeout,
        }
    }

    pub async fn summarize(&self, mut state: AgentState) -> AgentState {
        let summary = match self.generate_summary(&state).await {
            Some(text) => text,
            None => fallback_summary(&state),
        };
        let summary = self.gate.redact(&summary);

        let (data_source, search_type, pdf_status) = scan_trace_tags(&state);

        let final_response = FinalResponse {
            summary: summary.clone(),
            charts: state.charts.clone(),
            plotly_figs: state.plotly_figs.clone(),
            chart_images: state.chart_images.clone(),
            data_source,
            search_type,
            pdf_status,
        };

        debug!(
            charts = final_response.charts.len(),
            has_data_source = final_response.data_source.is_some(),
            "summarization complete"
        );
        state.messages.push(Message::ai(summary));
        state.final_response = Some(final_response);
        state
    }

    async fn generate_summary(&self, state: &AgentState) -> Option<String> {
        let observations = state
            .intermediate_steps
            .iter()
            .map(|step| format!("{}: {}", step.invocation.tool, step.observation))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = SUMMARY_PROMPT
            .replace("{transcript}", &render_transcript(&state.messages))
            .replace("{observations}", &observations);
        let transcript = [Message::human(prompt)];

        match tokio::time::timeout(self.llm_timeout, self.model.generate(&transcript)).await {
            Ok(Ok(message)) => Some(message.content().to_string()),
            Ok(Err(err)) => {
                warn!(%err, "summary model failed, using deterministic digest");
                None
            }
            Err(_) => {
                warn!("summary model timed out, using deterministic digest");
                None
            }
        }
    }
}

/// Deterministic digest used when the model is unavailable: report the key
/// figures straight from the observations.
fn fallback_summary(state: &AgentState) -> String {
    let mut lines: Vec<String> = Vec::new();

    for step in &state.intermediate_steps {
        let observation = &step.observation;
        if let Some(error) = observation.get("error").and_then(Value::as_str) {
            lines.push(format!("The {} check reported: {error}.", step.invocation.tool));
            continue;
        }
        match step.invocation.tool.as_str() {
            "project_pension" => {
                if let Some(balance) =
                    observation["projection_analysis"]["projected_balance"].as_f64()
                {
                    let years = observation["projection_analysis"]["years_to_retirement"]
                        .as_f64()
                        .unwrap_or(0.0);
                    lines.push(format!(
                        "Your projected pension balance in {years:.0} years is {balance:.0}."
                    ));
                }
                if let Some(status) = observation["status"].as_str() {
                    lines.push(format!("Current status: {status}."));
                }
            }
            "analyze_risk_profile" => {
                if let (Some(level), Some(score)) = (
                    observation["risk_level"].as_str(),
                    observation["risk_score"].as_f64(),
                ) {
                    lines.push(format!("Your risk level is {level} (score {score:.2})."));
                }
            }
            "detect_fraud" => {
                if let (Some(level), Some(score)) = (
                    observation["fraud_risk"].as_str(),
                    observation["fraud_score"].as_f64(),
                ) {
                    lines.push(format!("Fraud exposure is {level} (score {score:.2})."));
                }
            }
            _ => {
                if let Some(total) = observation["total_results"].as_u64() {
                    lines.push(format!(
                        "Found {total} relevant passages in the searched documents."
                    ));
                }
            }
        }
    }

    if lines.is_empty() {
        // No tool ever ran; fall back to the last model message, if any.
        state
            .messages
            .iter()
            .rev()
            .find(|m| m.is_ai())
            .map(|m| m.content().to_string())
            .unwrap_or_else(|| "The analysis completed without any results.".to_string())
    } else {
        lines.join(" ")
    }
}

/// Pulls the most recent retrieval tags out of the trace.
fn scan_trace_tags(state: &AgentState) -> (Option<String>, Option<String>, Option<String>) {
    let mut data_source = None;
    let mut search_type = None;
    let mut pdf_status = None;

    for step in &state.intermediate_steps {
        if let Some(value) = step.observation.get("data_source").and_then(Value::as_str) {
            data_source = Some(value.to_string());
        }
        if let Some(value) = step.observation.get("search_type").and_then(Value::as_str) {
            search_type = Some(value.to_string());
        }
        if let Some(value) = step.observation.get("pdf_status").and_then(Value::as_str) {
            pdf_status = Some(value.to_string());
        }
    }
    (data_source, search_type, pdf_status)
}

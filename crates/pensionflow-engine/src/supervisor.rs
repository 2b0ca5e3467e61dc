//! The supervisor router.
//!
//! First entry (no trace yet): document keywords take precedence, then the
//! content-policy gate, then LLM routing with a keyword fallback. Re-entry
//! (after a specialist): route to the visualizer exactly once when charts
//! were requested, otherwise to the summarizer. The turn budget is enforced
//! here and nowhere else.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use pensionflow::language_models::ChatModel;
use pensionflow::messages::Message;

use crate::policy::{PolicyGate, REFUSAL_MESSAGE};
use crate::response::FinalResponse;
use crate::workflow::AgentState;

pub const NODE_SUPERVISOR: &str = "supervisor";
pub const NODE_RISK_ANALYST: &str = "risk_analyst";
pub const NODE_FRAUD_DETECTOR: &str = "fraud_detector";
pub const NODE_PROJECTION_SPECIALIST: &str = "projection_specialist";
pub const NODE_VISUALIZER: &str = "visualizer";
pub const NODE_SUMMARIZER: &str = "summarizer";
pub const ROUTE_FINISH: &str = "FINISH";

/// Hard cap on supervisor entries per run.
pub const MAX_TURNS: u32 = 5;

const PDF_KEYWORDS: &[&str] = &[
    "uploaded",
    "document",
    "pdf",
    "plan",
    "policy",
    "my document",
    "pension plan",
];

const CHART_KEYWORDS: &[&str] = &["chart", "graph", "visual", "show me", "display", "plot"];

const RISK_KEYWORDS: &[&str] = &["risk", "volatility", "diversity", "debt"];

const FRAUD_KEYWORDS: &[&str] = &["fraud", "suspicious", "anomaly", "transaction"];

const PROJECTION_KEYWORDS: &[&str] = &[
    "projection",
    "growth",
    "future",
    "years",
    "retire",
    "savings",
    "income",
    "contribution",
];

fn contains_any(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| text.contains(k))
}

const ROUTABLE_NODES: &[&str] = &[
    NODE_RISK_ANALYST,
    NODE_FRAUD_DETECTOR,
    NODE_PROJECTION_SPECIALIST,
    NODE_VISUALIZER,
    NODE_SUMMARIZER,
    ROUTE_FINISH,
];

const ROUTER_PROMPT: &str = "You are the supervisor of a pension-analysis agent team. \
Route the user's question to exactly one of these workers:\n\
- risk_analyst: financial risk, volatility, portfolio diversity, debt\n\
- fraud_detector: suspicious transactions, anomalies, fraud\n\
- projection_specialist: pension balances, projections, savings, income, \
contributions, and questions about uploaded documents\n\
Reply with a JSON object of the form {\"next\": \"<worker>\"} and nothing else.\n\n\
User question: ";

/// The supervisor node. Cheap to clone; shared by every graph invocation.
#[derive(Clone)]
pub struct Supervisor {
    router_model: Option<Arc<dyn ChatModel>>,
    gate: PolicyGate,
    llm_timeout: Duration,
}

impl Supervisor {
    pub fn new(router_model: Option<Arc<dyn ChatModel>>, llm_timeout: Duration) -> Self {
        Self {
            router_model,
            gate: PolicyGate::new(),
            llm_timeout,
        }
    }

    /// Executes one supervisor entry: increments the turn counter and writes
    /// the next route (plus, on a policy hit, the prepared refusal).
    pub async fn route(&self, mut state: AgentState) -> AgentState {
        state.turns = (state.turns + 1).min(MAX_TURNS);

        if state.turns >= MAX_TURNS {
            warn!(turns = state.turns, "turn budget exhausted");
            state.next = if state.final_response.is_some() {
                ROUTE_FINISH.to_string()
            } else {
                NODE_SUMMARIZER.to_string()
            };
            return state;
        }

        if state.intermediate_steps.is_empty() && !state.visualizer_done {
            self.first_entry(state).await
        } else {
            self.re_entry(state)
        }
    }

    async fn first_entry(&self, mut state: AgentState) -> AgentState {
        let query = state.original_query().to_lowercase();
        state.wants_charts = contains_any(&query, CHART_KEYWORDS);

        // Document questions always go to the projection specialist, which
        // owns the document-search tool.
        if contains_any(&query, PDF_KEYWORDS) {
            debug!("document keywords detected");
            state.next = NODE_PROJECTION_SPECIALIST.to_string();
            return state;
        }

        if let Some(category) = self.gate.check(&query) {
            debug!(category = category.label(), "content gate triggered");
            state.next = ROUTE_FINISH.to_string();
            state.messages.push(Message::ai(REFUSAL_MESSAGE));
            state.final_response = Some(FinalResponse {
                summary: REFUSAL_MESSAGE.to_string(),
                ..FinalResponse::default()
            });
            return state;
        }

        if let Some(route) = self.llm_route(state.original_query()).await {
            debug!(%route, "router model selected the route");
            state.next = route;
            return state;
        }

        state.next = keyword_route(&query).to_string();
        debug!(route = %state.next, "keyword routing");
        state
    }

    fn re_entry(&self, mut state: AgentState) -> AgentState {
        let has_visualization_data = !state.charts.is_empty()
            || !state.plotly_figs.is_empty()
            || !state.chart_images.is_empty();

        state.next = if has_visualization_data || state.visualizer_done {
            NODE_SUMMARIZER.to_string()
        } else if state.wants_charts {
            NODE_VISUALIZER.to_string()
        } else {
            NODE_SUMMARIZER.to_string()
        };
        debug!(route = %state.next, "re-entry routing");
        state
    }

    /// Asks the router model for a destination. Any failure - no model, a
    /// timeout, unparseable output, an unknown node - returns `None` and the
    /// keyword fallback takes over.
    async fn llm_route(&self, query: &str) -> Option<String> {
        let model = self.router_model.as_ref()?;
        let transcript = [Message::human(format!("{ROUTER_PROMPT}{query}"))];

        let reply = match tokio::time::timeout(self.llm_timeout, model.generate(&transcript)).await
        {
            Ok(Ok(message)) => message.content().to_string(),
            Ok(Err(err)) => {
                warn!(%err, "router model failed, falling back to keywords");
                return None;
            }
            Err(_) => {
                warn!("router model timed out, falling back to keywords");
                return None;
            }
        };

        let candidate = parse_route(&reply)?;
        if ROUTABLE_NODES.contains(&candidate.as_str()) {
            Some(candidate)
        } else {
            warn!(%candidate, "router model chose an unknown node");
            None
        }
    }
}

fn parse_route(reply: &str) -> Option<String> {
    let trimmed = reply.trim();
    if trimmed.starts_with('{') {
        let value: Value = serde_json::from_str(trimmed).ok()?;
        return value.get("next")?.as_str().map(ToString::to_string);
    }
    Some(trimmed.to_string())
}

/// Keyword routing, in priority order; projections are the default because
/// most pension questions reduce to the user's record.
fn keyword_route(query: &str) -> &'static str {
    if contains_any(query, RISK_KEYWORDS) {
        NODE_RISK_ANALYST
    } else if contains_any(query, FRAUD_KEYWORDS) {
        NODE_FRAUD_DETECTOR
    } else if contains_any(query, PROJECTION_KEYWORDS) {
        NODE_PROJECTION_SPECIALIST
    } else {
        debug!("no routing keywords matched, defaulting to projection specialist");
        NODE_PROJECTION_SPECIALIST
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{ToolInvocation, TraceStep};
    use pensionflow_testing::ScriptedChatModel;
    use serde_json::json;

    fn state_with_query(query: &str) -> AgentState {
        AgentState::seed(520, query)
    }

    fn supervisor() -> Supervisor {
        Supervisor::new(None, Duration::from_secs(5))
    }

    fn step(tool: &str) -> TraceStep {
        TraceStep {
            invocation: ToolInvocation {
                tool: tool.to_string(),
                input: String::new(),
            },
            observation: json!({}),
        }
    }

    #[tokio::test]
    async fn pdf_keywords_outrank_everything() {
        let state = supervisor()
            .route(state_with_query(
                "What does my uploaded pension plan document say about risk?",
            ))
            .await;
        assert_eq!(state.next, NODE_PROJECTION_SPECIALIST);
        assert_eq!(state.turns, 1);
    }

    #[tokio::test]
    async fn policy_violation_short_circuits_to_finish() {
        let state = supervisor()
            .route(state_with_query("Should I pray before investing?"))
            .await;
        assert_eq!(state.next, ROUTE_FINISH);
        let final_response = state.final_response.unwrap();
        assert!(final_response.summary.contains("cannot process this request"));
        assert!(state.intermediate_steps.is_empty());
        // The refusal is also visible in the transcript.
        assert!(state
            .messages
            .iter()
            .any(|m| m.content().contains("cannot process this request")));
    }

    #[tokio::test]
    async fn keyword_routing_priorities() {
        let cases = [
            ("what is my risk score and volatility", NODE_RISK_ANALYST),
            ("is this transaction suspicious", NODE_FRAUD_DETECTOR),
            ("how much will I have when I retire", NODE_PROJECTION_SPECIALIST),
            ("hello there", NODE_PROJECTION_SPECIALIST),
        ];
        for (query, expected) in cases {
            let state = supervisor().route(state_with_query(query)).await;
            assert_eq!(state.next, expected, "query: {query}");
        }
    }

    #[tokio::test]
    async fn empty_query_defaults_to_projection() {
        let state = supervisor().route(state_with_query("")).await;
        assert_eq!(state.next, NODE_PROJECTION_SPECIALIST);
    }

    #[tokio::test]
    async fn chart_request_sets_wants_charts() {
        let state = supervisor()
            .route(state_with_query("Show me a chart of my pension growth"))
            .await;
        assert!(state.wants_charts);
        assert_eq!(state.next, NODE_PROJECTION_SPECIALIST);

        let state = supervisor()
            .route(state_with_query("how are my savings doing"))
            .await;
        assert!(!state.wants_charts);
    }

    #[tokio::test]
    async fn router_model_wins_when_it_answers_cleanly() {
        let model = ScriptedChatModel::new().with_response(r#"{"next": "fraud_detector"}"#);
        let supervisor = Supervisor::new(Some(Arc::new(model)), Duration::from_secs(5));

        let state = supervisor
            .route(state_with_query("please look at my account"))
            .await;
        assert_eq!(state.next, NODE_FRAUD_DETECTOR);
    }

    #[tokio::test]
    async fn router_model_failure_falls_back_to_keywords() {
        let model = ScriptedChatModel::new().with_error("unavailable");
        let supervisor = Supervisor::new(Some(Arc::new(model)), Duration::from_secs(5));

        let state = supervisor
            .route(state_with_query("what is my fraud exposure"))
            .await;
        assert_eq!(state.next, NODE_FRAUD_DETECTOR);
    }

    #[tokio::test]
    async fn router_model_nonsense_falls_back_to_keywords() {
        let model = ScriptedChatModel::new().with_response("the moon node");
        let supervisor = Supervisor::new(Some(Arc::new(model)), Duration::from_secs(5));

        let state = supervisor
            .route(state_with_query("volatility report"))
            .await;
        assert_eq!(state.next, NODE_RISK_ANALYST);
    }

    #[tokio::test]
    async fn re_entry_routes_to_summarizer_without_chart_request() {
        let mut state = state_with_query("what is my risk");
        state.turns = 1;
        state.intermediate_steps.push(step("analyze_risk_profile"));

        let state = supervisor().route(state).await;
        assert_eq!(state.next, NODE_SUMMARIZER);
        assert_eq!(state.turns, 2);
    }

    #[tokio::test]
    async fn re_entry_routes_to_visualizer_once_when_charts_requested() {
        let mut state = state_with_query("show me a chart of my pension");
        state.turns = 1;
        state.wants_charts = true;
        state.intermediate_steps.push(step("project_pension"));

        let state = supervisor().route(state).await;
        assert_eq!(state.next, NODE_VISUALIZER);

        // Once the visualizer has run, the next entry goes to the summarizer.
        let mut after_viz = state;
        after_viz.visualizer_done = true;
        after_viz
            .charts
            .insert("pension_growth".to_string(), json!({"mark": "line"}));
        let after_viz = supervisor().route(after_viz).await;
        assert_eq!(after_viz.next, NODE_SUMMARIZER);
    }

    #[tokio::test]
    async fn turn_budget_forces_an_exit() {
        let mut state = state_with_query("anything");
        state.turns = MAX_TURNS - 1;
        state.intermediate_steps.push(step("project_pension"));

        let state = supervisor().route(state).await;
        assert_eq!(state.turns, MAX_TURNS);
        assert_eq!(state.next, NODE_SUMMARIZER);

        // With a final response already in place the run just ends.
        let mut finished = state_with_query("anything");
        finished.turns = MAX_TURNS;
        finished.final_response = Some(FinalResponse::default());
        let finished = supervisor().route(finished).await;
        assert_eq!(finished.next, ROUTE_FINISH);
        assert!(finished.turns <= MAX_TURNS);
    }
}

//! Workflow state and graph assembly.
//!
//! The graph mirrors the routing table: the supervisor fans out to the three
//! specialists, each of which edges back to the supervisor; the visualizer
//! also returns to the supervisor; the summarizer terminates the run. All
//! transitions are serial - the supervisor always observes the complete
//! state produced by the previous node.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use pensionflow::context::RequestContext;
use pensionflow::error::Result;
use pensionflow::graph::{CompiledGraph, MergeableState, StateGraph, END};
use pensionflow::language_models::ChatModel;
use pensionflow::messages::Message;
use pensionflow::vector_stores::VectorStoreGateway;

use crate::agents::{prompts, SpecialistAgent, TraceStep};
use crate::ml::PredictorService;
use crate::record::RecordStore;
use crate::response::{FinalResponse, PromptResponse};
use crate::summarizer::Summarizer;
use crate::supervisor::{
    Supervisor, NODE_FRAUD_DETECTOR, NODE_PROJECTION_SPECIALIST, NODE_RISK_ANALYST,
    NODE_SUMMARIZER, NODE_SUPERVISOR, NODE_VISUALIZER, ROUTE_FINISH,
};
use crate::tools::{all_pension_tools, ToolDeps};
use crate::visualizer::{ChartRenderer, Visualizer};

/// The mutable state flowing through the graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentState {
    pub messages: Vec<Message>,
    /// Append-only (invocation, observation) trace.
    pub intermediate_steps: Vec<TraceStep>,
    /// Next node name; written only by the supervisor.
    pub next: String,
    /// Supervisor entry counter; hard-capped.
    pub turns: u32,
    pub user_id: i64,
    pub wants_charts: bool,
    /// Set once the visualizer has run, so it runs at most once.
    pub visualizer_done: bool,
    pub charts: Map<String, Value>,
    pub plotly_figs: Map<String, Value>,
    pub chart_images: BTreeMap<String, String>,
    pub final_response: Option<FinalResponse>,
}

impl AgentState {
    /// Seeds a run: the query becomes the first human message.
    pub fn seed(user_id: i64, query: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::human(query)],
            user_id,
            ..Self::default()
        }
    }

    /// The user's original question (the first human message).
    pub fn original_query(&self) -> &str {
        pensionflow::messages::first_human_content(&self.messages).unwrap_or_default()
    }

    /// The most recent human message, which specialists answer.
    pub fn latest_question(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.is_human())
            .map(Message::content)
    }
}

impl MergeableState for AgentState {
    fn merge(&mut self, other: &Self) {
        // Sequences append, maps union, scalars overwrite.
        self.messages.extend(other.messages.iter().cloned());
        self.intermediate_steps
            .extend(other.intermediate_steps.iter().cloned());
        self.next = other.next.clone();
        self.turns = self.turns.max(other.turns);
        self.user_id = other.user_id;
        self.wants_charts = self.wants_charts || other.wants_charts;
        self.visualizer_done = self.visualizer_done || other.visualizer_done;
        self.charts.extend(other.charts.clone());
        self.plotly_figs.extend(other.plotly_figs.clone());
        self.chart_images.extend(other.chart_images.clone());
        if other.final_response.is_some() {
            self.final_response = other.final_response.clone();
        }
    }
}

/// Everything the engine needs wired in.
#[derive(Clone)]
pub struct EngineDeps {
    pub store: Arc<dyn RecordStore>,
    pub vectors: Arc<VectorStoreGateway>,
    pub predictor: Arc<PredictorService>,
    pub model: Arc<dyn ChatModel>,
    pub router_model: Option<Arc<dyn ChatModel>>,
    pub renderer: Option<Arc<dyn ChartRenderer>>,
    pub llm_timeout: Duration,
}

impl EngineDeps {
    pub fn new(
        store: Arc<dyn RecordStore>,
        vectors: Arc<VectorStoreGateway>,
        predictor: Arc<PredictorService>,
        model: Arc<dyn ChatModel>,
    ) -> Self {
        Self {
            store,
            vectors,
            predictor,
            model,
            router_model: None,
            renderer: None,
            llm_timeout: Duration::from_secs(30),
        }
    }

    /// Uses a model for first-pass routing (keyword fallback stays in place).
    #[must_use]
    pub fn with_router_model(mut self, model: Arc<dyn ChatModel>) -> Self {
        self.router_model = Some(model);
        self
    }

    #[must_use]
    pub fn with_renderer(mut self, renderer: Arc<dyn ChartRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    #[must_use]
    pub fn with_llm_timeout(mut self, timeout: Duration) -> Self {
        self.llm_timeout = timeout;
        self
    }
}

fn specialist_node(
    graph: &mut StateGraph<AgentState>,
    name: &'static str,
    agent: SpecialistAgent,
) {
    let agent = Arc::new(agent);
    graph.add_node_from_fn(name, move |mut state: AgentState| {
        let agent = Arc::clone(&agent);
        Box::pin(async move {
            let Some(question) = state.latest_question().map(ToString::to_string) else {
                warn!(specialist = name, "no user message to answer");
                state
                    .messages
                    .push(Message::ai("No user message found to process."));
                return Ok(state);
            };
            let outcome = agent.run(&question, state.user_id).await;
            state.messages.push(Message::ai(outcome.answer));
            state.intermediate_steps.extend(outcome.steps);
            Ok(state)
        })
    });
}

/// Builds and compiles the workflow graph.
pub fn build_workflow(deps: &EngineDeps) -> Result<CompiledGraph<AgentState>> {
    let tool_deps = ToolDeps {
        store: Arc::clone(&deps.store),
        vectors: Arc::clone(&deps.vectors),
        predictor: Arc::clone(&deps.predictor),
    };
    let tools = all_pension_tools(&tool_deps);

    let supervisor = Supervisor::new(deps.router_model.clone(), deps.llm_timeout);
    let summarizer = Summarizer::new(Arc::clone(&deps.model), deps.llm_timeout);
    let visualizer = Visualizer::new(deps.renderer.clone());

    let mut graph: StateGraph<AgentState> = StateGraph::new();

    graph.add_node_from_fn(NODE_SUPERVISOR, move |state: AgentState| {
        let supervisor = supervisor.clone();
        Box::pin(async move { Ok(supervisor.route(state).await) })
    });

    specialist_node(
        &mut graph,
        NODE_RISK_ANALYST,
        SpecialistAgent::new(
            NODE_RISK_ANALYST,
            Arc::clone(&deps.model),
            tools.clone(),
            prompts::RISK_ANALYST_TEMPLATE,
            deps.llm_timeout,
        ),
    );
    specialist_node(
        &mut graph,
        NODE_FRAUD_DETECTOR,
        SpecialistAgent::new(
            NODE_FRAUD_DETECTOR,
            Arc::clone(&deps.model),
            tools.clone(),
            prompts::FRAUD_DETECTOR_TEMPLATE,
            deps.llm_timeout,
        ),
    );
    specialist_node(
        &mut graph,
        NODE_PROJECTION_SPECIALIST,
        SpecialistAgent::new(
            NODE_PROJECTION_SPECIALIST,
            Arc::clone(&deps.model),
            tools,
            prompts::PROJECTION_SPECIALIST_TEMPLATE,
            deps.llm_timeout,
        ),
    );

    graph.add_node_from_fn(NODE_VISUALIZER, move |state: AgentState| {
        let visualizer = visualizer.clone();
        Box::pin(async move { Ok(visualizer.visualize(state)) })
    });

    graph.add_node_from_fn(NODE_SUMMARIZER, move |state: AgentState| {
        let summarizer = summarizer.clone();
        Box::pin(async move { Ok(summarizer.summarize(state).await) })
    });

    let mut routes = HashMap::new();
    for node in [
        NODE_RISK_ANALYST,
        NODE_FRAUD_DETECTOR,
        NODE_PROJECTION_SPECIALIST,
        NODE_VISUALIZER,
        NODE_SUMMARIZER,
    ] {
        routes.insert(node.to_string(), node.to_string());
    }
    routes.insert(ROUTE_FINISH.to_string(), END.to_string());

    graph
        .add_conditional_edges(
            NODE_SUPERVISOR,
            |state: &AgentState| state.next.clone(),
            routes,
        )
        .add_edge(NODE_RISK_ANALYST, NODE_SUPERVISOR)
        .add_edge(NODE_FRAUD_DETECTOR, NODE_SUPERVISOR)
        .add_edge(NODE_PROJECTION_SPECIALIST, NODE_SUPERVISOR)
        .add_edge(NODE_VISUALIZER, NODE_SUPERVISOR)
        .add_edge(NODE_SUMMARIZER, END)
        .set_entry_point(NODE_SUPERVISOR);

    graph.compile()
}

/// The compiled engine: one instance serves many concurrent requests.
pub struct PensionWorkflow {
    graph: CompiledGraph<AgentState>,
    vectors: Arc<VectorStoreGateway>,
}

impl PensionWorkflow {
    pub fn new(deps: EngineDeps) -> Result<Self> {
        let graph = build_workflow(&deps)?;
        Ok(Self {
            graph,
            vectors: deps.vectors,
        })
    }

    /// Runs one authenticated query through the graph. The request context
    /// brackets the invocation: tools can read the caller identity for the
    /// duration and not a moment longer.
    pub async fn run(&self, user_id: i64, query: &str) -> Result<PromptResponse> {
        info!(user_id, %query, "workflow starting");
        let state = AgentState::seed(user_id, query);

        let result = RequestContext::scope(user_id, query, self.graph.invoke(state)).await?;
        let final_state = result.final_state;

        let final_response = final_state.final_response.unwrap_or_else(|| {
            // Reached on FINISH short-circuits that skipped the summarizer.
            let summary = final_state
                .messages
                .iter()
                .rev()
                .find(|m| m.is_ai())
                .map(|m| m.content().to_string())
                .unwrap_or_else(|| "No summary available".to_string());
            FinalResponse {
                summary,
                ..FinalResponse::default()
            }
        });

        self.log_conversation(user_id, query, &final_response.summary)
            .await;

        Ok(PromptResponse::from_final(final_response, user_id, query))
    }

    /// Writes the exchange into the caller's conversation collection.
    /// Best-effort: a storage failure never fails the request.
    async fn log_conversation(&self, user_id: i64, query: &str, answer: &str) {
        let collection_name = format!("user_{user_id}_conversations");
        let collection = match self.vectors.collection(&collection_name) {
            Ok(collection) => collection,
            Err(err) => {
                warn!(%err, "conversation log collection unavailable");
                return;
            }
        };
        let metadata = json!({
            "user_id": user_id,
            "query": query,
            "answer": answer,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        if let Err(err) = collection
            .add(
                &[query.to_string()],
                &[uuid::Uuid::new_v4().to_string()],
                &[metadata],
            )
            .await
        {
            warn!(%err, "failed to log conversation");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::ToolInvocation;
    use pensionflow::embeddings::MockEmbeddings;
    use pensionflow_testing::ScriptedChatModel;

    fn test_deps(model: ScriptedChatModel, dir: &std::path::Path) -> EngineDeps {
        let store = crate::tools::test_support::basic_store();
        EngineDeps::new(
            Arc::new(store),
            Arc::new(
                VectorStoreGateway::new(dir, Arc::new(MockEmbeddings::new(64))).unwrap(),
            ),
            Arc::new(PredictorService::disabled()),
            Arc::new(model),
        )
        .with_llm_timeout(Duration::from_secs(5))
    }

    #[test]
    fn seed_state_shape() {
        let state = AgentState::seed(520, "hello");
        assert_eq!(state.user_id, 520);
        assert_eq!(state.original_query(), "hello");
        assert_eq!(state.latest_question(), Some("hello"));
        assert_eq!(state.turns, 0);
        assert!(state.intermediate_steps.is_empty());
    }

    #[test]
    fn merge_appends_sequences_and_overwrites_scalars() {
        let mut base = AgentState::seed(1, "q");
        base.turns = 1;

        let mut update = AgentState::default();
        update.messages.push(Message::ai("answer"));
        update.intermediate_steps.push(TraceStep {
            invocation: ToolInvocation {
                tool: "project_pension".to_string(),
                input: String::new(),
            },
            observation: json!({}),
        });
        update.next = "summarizer".to_string();
        update.turns = 2;
        update.user_id = 1;
        update.wants_charts = true;
        update
            .charts
            .insert("pension_growth".to_string(), json!({"mark": "line"}));

        base.merge(&update);
        assert_eq!(base.messages.len(), 2);
        assert_eq!(base.intermediate_steps.len(), 1);
        assert_eq!(base.next, "summarizer");
        assert_eq!(base.turns, 2);
        assert!(base.wants_charts);
        assert!(base.charts.contains_key("pension_growth"));
    }

    #[test]
    fn graph_compiles_with_all_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let deps = test_deps(ScriptedChatModel::new().with_fallback("Final Answer: ok"), dir.path());
        let graph = build_workflow(&deps).unwrap();
        assert_eq!(graph.entry_point(), NODE_SUPERVISOR);
        assert_eq!(graph.node_count(), 6);
    }

    #[tokio::test]
    async fn simple_run_produces_a_response() {
        let dir = tempfile::tempdir().unwrap();
        let model = ScriptedChatModel::new()
            // Specialist: one tool call, then a final answer.
            .with_response(
                "Thought: project it\nAction: project_pension\nAction Input: {\"user_id\": 520, \"query\": \"How much will my pension be if I retire in 10 years?\"}",
            )
            .with_response("Final Answer: Your projected balance is about 208900.")
            // Summarizer.
            .with_response("Your projected pension balance in 10 years is about 208900.");

        let workflow = PensionWorkflow::new(test_deps(model, dir.path())).unwrap();
        let response = workflow
            .run(520, "How much will my pension be if I retire in 10 years?")
            .await
            .unwrap();

        assert!(response.summary.contains("208900"));
        assert_eq!(
            response.data_source.as_deref(),
            Some("DATABASE_PENSION_DATA")
        );
        let metadata = response.metadata.unwrap();
        assert_eq!(metadata["user_id"], 520);
    }

    #[tokio::test]
    async fn conversation_is_logged_per_user() {
        let dir = tempfile::tempdir().unwrap();
        let model = ScriptedChatModel::new()
            .with_response("Final Answer: nothing to compute.")
            .with_fallback("All done.");

        let deps = test_deps(model, dir.path());
        let vectors = Arc::clone(&deps.vectors);
        let workflow = PensionWorkflow::new(deps).unwrap();
        workflow.run(520, "what are my savings").await.unwrap();

        let log = vectors.collection("user_520_conversations").unwrap();
        assert_eq!(log.len(), 1);
    }
}

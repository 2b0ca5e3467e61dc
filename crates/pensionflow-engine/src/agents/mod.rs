//! Specialist reasoners.
//!
//! All three specialists share one executor: a Thought / Action /
//! Action Input / Observation loop over the full tool registry, terminated
//! by a `Final Answer:` line. The executor is where free-text model output
//! becomes deterministic tool dispatch, and where every failure - unknown
//! tool, tool error, model timeout - degrades into an observation or a
//! best-effort answer instead of an error.

pub mod prompts;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use pensionflow::language_models::ChatModel;
use pensionflow::messages::Message;
use pensionflow::tools::{Tool, ToolInput};

/// Upper bound on Thought/Action rounds per specialist run.
const MAX_ITERATIONS: usize = 6;

/// One tool call as the specialist requested it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub tool: String,
    pub input: String,
}

/// One (invocation, observation) pair in the trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceStep {
    pub invocation: ToolInvocation,
    pub observation: Value,
}

/// The result of one specialist run.
#[derive(Debug, Clone)]
pub struct SpecialistOutcome {
    pub answer: String,
    pub steps: Vec<TraceStep>,
}

/// A prompted tool-using reasoner.
pub struct SpecialistAgent {
    name: String,
    model: Arc<dyn ChatModel>,
    tools: Vec<Arc<dyn Tool>>,
    template: &'static str,
    llm_timeout: Duration,
}

impl SpecialistAgent {
    pub fn new(
        name: impl Into<String>,
        model: Arc<dyn ChatModel>,
        tools: Vec<Arc<dyn Tool>>,
        template: &'static str,
        llm_timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            model,
            tools,
            template,
            llm_timeout,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn tool_descriptions(&self) -> String {
        self.tools
            .iter()
            .map(|t| format!("- {}: {}", t.name(), t.description()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn tool_names(&self) -> String {
        self.tools
            .iter()
            .map(|t| t.name())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Runs the reasoning loop. Never errors: model failures produce a
    /// best-effort answer assembled from the observations collected so far.
    pub async fn run(&self, question: &str, user_id: i64) -> SpecialistOutcome {
        let mut scratchpad = String::new();
        let mut steps: Vec<TraceStep> = Vec::new();

        for iteration in 0..MAX_ITERATIONS {
            let prompt = prompts::render_template(
                self.template,
                question,
                user_id,
                &self.tool_descriptions(),
                &self.tool_names(),
                &scratchpad,
            );
            let transcript = [Message::human(prompt)];

            let reply = match tokio::time::timeout(
                self.llm_timeout,
                self.model.generate(&transcript),
            )
            .await
            {
                Ok(Ok(message)) => message.content().to_string(),
                Ok(Err(err)) => {
                    warn!(specialist = %self.name, %err, "model call failed");
                    return SpecialistOutcome {
                        answer: best_effort_answer(&steps),
                        steps,
                    };
                }
                Err(_) => {
                    warn!(specialist = %self.name, "model call timed out");
                    return SpecialistOutcome {
                        answer: best_effort_answer(&steps),
                        steps,
                    };
                }
            };

            if let Some(answer) = parse_final_answer(&reply) {
                debug!(specialist = %self.name, iteration, "final answer");
                return SpecialistOutcome { answer, steps };
            }

            let Some((tool_name, raw_input)) = parse_action(&reply) else {
                // The model ignored the protocol; treat its text as the answer.
                debug!(specialist = %self.name, iteration, "non-protocol reply");
                return SpecialistOutcome {
                    answer: reply.trim().to_string(),
                    steps,
                };
            };

            let observation = self.dispatch(&tool_name, &raw_input, user_id).await;
            scratchpad.push_str(&format!(
                "Thought: I will call {tool_name}.\nAction: {tool_name}\nAction Input: {raw_input}\nObservation: {observation}\n",
            ));
            steps.push(TraceStep {
                invocation: ToolInvocation {
                    tool: tool_name,
                    input: raw_input,
                },
                observation,
            });
        }

        warn!(specialist = %self.name, "iteration limit reached");
        SpecialistOutcome {
            answer: best_effort_answer(&steps),
            steps,
        }
    }

    /// Executes one tool call, injecting the caller's user id, and folds any
    /// failure into the observation.
    async fn dispatch(&self, tool_name: &str, raw_input: &str, user_id: i64) -> Value {
        let Some(tool) = self.tools.iter().find(|t| t.name() == tool_name) else {
            return json!({"error": format!("Unknown tool: {tool_name}")});
        };

        let input = with_caller_id(ToolInput::from_action_input(raw_input), user_id);
        match tool.call(input).await {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or(Value::String(raw)),
            Err(err) => json!({"error": err.to_string()}),
        }
    }
}

/// Ensures the caller id rides along on every dispatch: structured inputs
/// get a `user_id` field when missing; free-text inputs that are not a bare
/// integer are wrapped into `{user_id, query}`.
fn with_caller_id(input: ToolInput, user_id: i64) -> ToolInput {
    match input {
        ToolInput::Structured(mut value) => {
            if let Some(map) = value.as_object_mut() {
                map.entry("user_id").or_insert(json!(user_id));
            }
            ToolInput::Structured(value)
        }
        ToolInput::String(text) => {
            if text.trim().parse::<i64>().is_ok() {
                ToolInput::String(text)
            } else if text.trim().is_empty() {
                ToolInput::Structured(json!({"user_id": user_id}))
            } else {
                ToolInput::Structured(json!({"user_id": user_id, "query": text}))
            }
        }
    }
}

fn parse_final_answer(text: &str) -> Option<String> {
    let index = text.find("Final Answer:")?;
    let answer = text[index + "Final Answer:".len()..].trim();
    Some(answer.to_string())
}

/// Extracts the first `Action:` / `Action Input:` pair. The input runs to
/// the next `Observation:` line (models sometimes hallucinate one) or the
/// end of the text.
fn parse_action(text: &str) -> Option<(String, String)> {
    let action_index = text.find("Action:")?;
    let after_action = &text[action_index + "Action:".len()..];
    let tool_name = after_action.lines().next()?.trim().to_string();
    if tool_name.is_empty() {
        return None;
    }

    let raw_input = match after_action.find("Action Input:") {
        Some(input_index) => {
            let after_input = &after_action[input_index + "Action Input:".len()..];
            let end = after_input.find("\nObservation:").unwrap_or(after_input.len());
            after_input[..end].trim().to_string()
        }
        None => String::new(),
    };
    Some((tool_name, raw_input))
}

/// A grounded answer when the model cannot produce one: report the last
/// observation rather than nothing.
fn best_effort_answer(steps: &[TraceStep]) -> String {
    match steps.last() {
        Some(step) => format!(
            "I could not complete the full analysis, but the {} tool reported: {}",
            step.invocation.tool, step.observation
        ),
        None => "I was unable to complete the analysis for this request. Please try again."
            .to_string(),
    }
}

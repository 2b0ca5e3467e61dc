//! Chart generation from the tool trace.
//!
//! The visualizer reads the most recent risk, fraud, and projection
//! observations and emits two parallel chart representations: a declarative
//! Vega-Lite spec (the authoritative one) and an imperative Plotly figure
//! derived from it. Raster PNGs are best-effort through the
//! [`ChartRenderer`] seam; with no renderer wired in, `chart_images` simply
//! stays empty.

use std::sync::Arc;

use base64::Engine;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use pensionflow::error::Result;
use pensionflow::messages::Message;

use crate::projection::growth_series;
use crate::workflow::AgentState;

/// Rasterizes a declarative chart spec into PNG bytes. External concern;
/// absence is normal.
pub trait ChartRenderer: Send + Sync {
    fn render_png(&self, spec: &Value) -> Result<Vec<u8>>;
}

/// The visualizer node.
#[derive(Clone, Default)]
pub struct Visualizer {
    renderer: Option<Arc<dyn ChartRenderer>>,
}

impl Visualizer {
    pub fn new(renderer: Option<Arc<dyn ChartRenderer>>) -> Self {
        Self { renderer }
    }

    /// Builds charts from the trace. Without a chart request this appends a
    /// single completion message and nothing else.
    pub fn visualize(&self, mut state: AgentState) -> AgentState {
        state.visualizer_done = true;

        if !state.wants_charts {
            debug!("charts not requested, skipping visualization");
            state
                .messages
                .push(Message::ai("Your pension analysis is complete."));
            return state;
        }

        let projection = latest_observation(&state, "project_pension");
        let risk = latest_observation(&state, "analyze_risk_profile");
        let fraud = latest_observation(&state, "detect_fraud");

        let mut charts = Map::new();
        let mut plotly_figs = Map::new();

        if let Some(projection) = projection {
            self.projection_charts(&projection, &mut charts, &mut plotly_figs);
        }
        if let Some(risk) = risk {
            score_bar_chart(
                &risk,
                "risk_score",
                "risk",
                "Risk Score",
                &mut charts,
                &mut plotly_figs,
            );
        }
        if let Some(fraud) = fraud {
            score_bar_chart(
                &fraud,
                "fraud_score",
                "fraud",
                "Fraud Score",
                &mut charts,
                &mut plotly_figs,
            );
        }

        if let Some(renderer) = &self.renderer {
            for (name, spec) in &charts {
                match renderer.render_png(spec) {
                    Ok(png) => {
                        let encoded = base64::engine::general_purpose::STANDARD.encode(png);
                        state
                            .chart_images
                            .insert(name.clone(), format!("data:image/png;base64,{encoded}"));
                    }
                    Err(err) => {
                        // Best-effort: a failed raster just means no image.
                        warn!(chart = %name, %err, "chart rasterization failed");
                    }
                }
            }
        }

        debug!(
            charts = charts.len(),
            figures = plotly_figs.len(),
            images = state.chart_images.len(),
            "visualization complete"
        );
        state.charts.extend(charts);
        state.plotly_figs.extend(plotly_figs);
        state
            .messages
            .push(Message::ai("Your pension analysis is complete with visualizations."));
        state
    }

    /// Exactly three projection charts: progress-to-goal, pension-growth
    /// (a smooth line, no markers), and savings-vs-income.
    fn projection_charts(
        &self,
        observation: &Value,
        charts: &mut Map<String, Value>,
        plotly_figs: &mut Map<String, Value>,
    ) {
        let current_data = &observation["current_data"];
        let analysis = &observation["projection_analysis"];
        if !current_data.is_object() || !analysis.is_object() {
            return;
        }

        let current_savings = current_data["current_savings"].as_f64().unwrap_or(0.0);
        let annual_income = current_data["annual_income"].as_f64().unwrap_or(0.0);
        let annual_contribution = current_data["annual_contribution"].as_f64().unwrap_or(0.0);
        let age = current_data["age"].as_u64().unwrap_or(0) as u32;
        let progress = observation["progress_to_goal"].as_f64().unwrap_or(0.0);
        let years = analysis["years_to_retirement"].as_f64().unwrap_or(0.0);
        let rate = analysis["effective_return_rate"].as_f64().unwrap_or(0.0);
        let projected_balance = analysis["projected_balance"].as_f64().unwrap_or(0.0);

        // Progress to goal: two bars, current vs remaining.
        charts.insert(
            "progress_to_goal".to_string(),
            json!({
                "$schema": "https://vega.github.io/schema/vega-lite/v5.json",
                "description": "Progress to Goal",
                "data": {"values": [
                    {"category": "Current Progress", "amount": progress},
                    {"category": "Remaining Goal", "amount": 100.0 - progress}
                ]},
                "mark": "bar",
                "encoding": {
                    "x": {"field": "category", "type": "nominal", "title": ""},
                    "y": {"field": "amount", "type": "quantitative", "title": "Percentage (%)"},
                    "color": {"field": "category", "type": "nominal"}
                }
            }),
        );
        plotly_figs.insert(
            "progress_to_goal".to_string(),
            json!({
                "data": [{
                    "type": "bar",
                    "x": ["Current Progress", "Remaining Goal"],
                    "y": [progress, 100.0 - progress],
                    "name": "Percentage"
                }],
                "layout": {
                    "title": {"text": "Progress to Goal"},
                    "yaxis": {"title": "Percentage (%)", "range": [0, 100]}
                }
            }),
        );

        // Pension growth: the same formula as the projection, with every
        // point clamped to the reported balance so the curve endpoint agrees
        // with the number the user was told.
        let span = years.round().max(0.0) as u32;
        let series = growth_series(
            current_savings,
            annual_contribution,
            rate,
            age,
            span,
            projected_balance.max(current_savings),
        );
        let ages: Vec<u32> = series.iter().map(|p| p.age).collect();
        let values: Vec<f64> = series.iter().map(|p| p.projected_value).collect();

        charts.insert(
            "pension_growth".to_string(),
            json!({
                "$schema": "https://vega.github.io/schema/vega-lite/v5.json",
                "description": "Pension Growth Over Time",
                "data": {"values": series},
                "mark": "line",
                "encoding": {
                    "x": {"field": "age", "type": "quantitative", "title": "Age"},
                    "y": {"field": "projected_value", "type": "quantitative", "title": "Projected Pension Value"}
                }
            }),
        );
        plotly_figs.insert(
            "pension_growth".to_string(),
            json!({
                "data": [{
                    "type": "scatter",
                    "mode": "lines",
                    "x": ages,
                    "y": values,
                    "name": "Pension Value",
                    "line": {"width": 3}
                }],
                "layout": {
                    "title": {"text": "Pension Growth Over Time"},
                    "xaxis": {"title": "Age"},
                    "yaxis": {"title": "Pension Value"}
                }
            }),
        );

        // Savings analysis: two bars, savings vs income.
        charts.insert(
            "savings_analysis".to_string(),
            json!({
                "$schema": "https://vega.github.io/schema/vega-lite/v5.json",
                "description": "Current Savings vs Annual Income",
                "data": {"values": [
                    {"category": "Current Savings", "amount": current_savings},
                    {"category": "Annual Income", "amount": annual_income}
                ]},
                "mark": "bar",
                "encoding": {
                    "x": {"field": "category", "type": "nominal", "title": ""},
                    "y": {"field": "amount", "type": "quantitative", "title": "Amount"},
                    "color": {"field": "category", "type": "nominal"}
                }
            }),
        );
        plotly_figs.insert(
            "savings_analysis".to_string(),
            json!({
                "data": [{
                    "type": "bar",
                    "x": ["Current Savings", "Annual Income"],
                    "y": [current_savings, annual_income],
                    "name": "Amount"
                }],
                "layout": {
                    "title": {"text": "Current Savings vs Annual Income"},
                    "yaxis": {"title": "Amount"}
                }
            }),
        );
    }
}

/// Most recent observation produced by `tool_name`, skipping error results.
fn latest_observation(state: &AgentState, tool_name: &str) -> Option<Value> {
    state
        .intermediate_steps
        .iter()
        .rev()
        .find(|step| step.invocation.tool == tool_name && step.observation.get("error").is_none())
        .map(|step| step.observation.clone())
}

/// A single-bar score chart shared by the risk and fraud observations.
fn score_bar_chart(
    observation: &Value,
    score_field: &str,
    chart_name: &str,
    title: &str,
    charts: &mut Map<String, Value>,
    plotly_figs: &mut Map<String, Value>,
) {
    let Some(score) = observation[score_field].as_f64() else {
        return;
    };
    charts.insert(
        chart_name.to_string(),
        json!({
            "$schema": "https://vega.github.io/schema/vega-lite/v5.json",
            "description": title,
            "data": {"values": [{"metric": title, "value": score}]},
            "mark": "bar",
            "encoding": {
                "x": {"field": "metric", "type": "nominal", "title": ""},
                "y": {"field": "value", "type": "quantitative", "title": "Score"}
            }
        }),
    );
    plotly_figs.insert(
        chart_name.to_string(),
        json!({
            "data": [{"type": "bar", "x": [title], "y": [score], "name": title}],
            "layout": {"title": {"text": title}}
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{ToolInvocation, TraceStep};
    use crate::projection::project;
    use crate::record::PensionRecord;
    use pensionflow::error::Error;

    fn projection_state(query: &str) -> AgentState {
        let mut record = PensionRecord::new(520);
        record.age = Some(33);
        record.retirement_age_goal = Some(65);
        record.current_savings = Some(50_000.0);
        record.annual_income = Some(80_000.0);
        record.contribution_amount = Some(8_000.0);
        record.annual_return_rate = Some(0.08);
        record.pension_type = Some("Defined Contribution".to_string());

        let outcome = project(&record, Some(query));
        let mut observation = serde_json::to_value(&outcome).unwrap();
        observation["user_id"] = json!(520);

        let mut state = AgentState::seed(520, query);
        state.wants_charts = true;
        state.intermediate_steps.push(TraceStep {
            invocation: ToolInvocation {
                tool: "project_pension".to_string(),
                input: String::new(),
            },
            observation,
        });
        state
    }

    #[test]
    fn no_chart_request_appends_completion_message_only() {
        let mut state = projection_state("retire in 10 years");
        state.wants_charts = false;

        let state = Visualizer::new(None).visualize(state);
        assert!(state.charts.is_empty());
        assert!(state.plotly_figs.is_empty());
        assert!(state.visualizer_done);
        assert_eq!(
            state.messages.last().unwrap().content(),
            "Your pension analysis is complete."
        );
    }

    #[test]
    fn projection_yields_exactly_three_charts() {
        let state = Visualizer::new(None).visualize(projection_state(
            "show me a chart of my pension if I retire in 10 years",
        ));

        assert_eq!(state.charts.len(), 3);
        for name in ["progress_to_goal", "pension_growth", "savings_analysis"] {
            assert!(state.charts.contains_key(name), "missing chart {name}");
            assert!(state.plotly_figs.contains_key(name), "missing figure {name}");
        }
        // No renderer wired in: images stay empty.
        assert!(state.chart_images.is_empty());
    }

    #[test]
    fn growth_curve_endpoint_matches_reported_projection() {
        let state = Visualizer::new(None).visualize(projection_state(
            "show me a chart of my pension if I retire in 10 years",
        ));

        let reported = state.intermediate_steps[0].observation["projection_analysis"]
            ["projected_balance"]
            .as_f64()
            .unwrap();
        let series = state.charts["pension_growth"]["data"]["values"]
            .as_array()
            .unwrap();
        let final_point = series.last().unwrap()["projected_value"].as_f64().unwrap();
        assert!(
            (final_point - reported).abs() < 1_000.0,
            "curve endpoint {final_point} vs projection {reported}"
        );
        // And the plotly figure mirrors the declarative data.
        let plotly_final = state.plotly_figs["pension_growth"]["data"][0]["y"]
            .as_array()
            .unwrap()
            .last()
            .unwrap()
            .as_f64()
            .unwrap();
        assert!((plotly_final - final_point).abs() < 1e-6);
    }

    #[test]
    fn growth_line_has_no_markers() {
        let state = Visualizer::new(None).visualize(projection_state(
            "chart my pension growth over 10 years",
        ));
        assert_eq!(state.charts["pension_growth"]["mark"], "line");
        assert_eq!(
            state.plotly_figs["pension_growth"]["data"][0]["mode"],
            "lines"
        );
    }

    #[test]
    fn risk_and_fraud_observations_get_score_bars() {
        let mut state = AgentState::seed(1, "chart my risk and fraud scores");
        state.wants_charts = true;
        state.intermediate_steps.push(TraceStep {
            invocation: ToolInvocation {
                tool: "analyze_risk_profile".to_string(),
                input: String::new(),
            },
            observation: json!({"risk_score": 0.5, "risk_level": "Medium"}),
        });
        state.intermediate_steps.push(TraceStep {
            invocation: ToolInvocation {
                tool: "detect_fraud".to_string(),
                input: String::new(),
            },
            observation: json!({"fraud_score": 0.3, "fraud_risk": "Low"}),
        });

        let state = Visualizer::new(None).visualize(state);
        assert!(state.charts.contains_key("risk"));
        assert!(state.charts.contains_key("fraud"));
        assert_eq!(
            state.plotly_figs["risk"]["data"][0]["y"],
            json!([0.5])
        );
    }

    #[test]
    fn error_observations_are_skipped() {
        let mut state = AgentState::seed(1, "chart please");
        state.wants_charts = true;
        state.intermediate_steps.push(TraceStep {
            invocation: ToolInvocation {
                tool: "analyze_risk_profile".to_string(),
                input: String::new(),
            },
            observation: json!({"error": "No pension data found for User ID: 1"}),
        });

        let state = Visualizer::new(None).visualize(state);
        assert!(state.charts.is_empty());
        assert_eq!(
            state.messages.last().unwrap().content(),
            "Your pension analysis is complete with visualizations."
        );
    }

    #[test]
    fn latest_observation_wins() {
        let mut state = AgentState::seed(1, "q");
        for score in [0.2, 0.9] {
            state.intermediate_steps.push(TraceStep {
                invocation: ToolInvocation {
                    tool: "analyze_risk_profile".to_string(),
                    input: String::new(),
                },
                observation: json!({"risk_score": score}),
            });
        }
        let latest = latest_observation(&state, "analyze_risk_profile").unwrap();
        assert_eq!(latest["risk_score"], 0.9);
    }

    struct FixedRenderer(std::result::Result<Vec<u8>, ()>);

    impl ChartRenderer for FixedRenderer {
        fn render_png(&self, _spec: &Value) -> Result<Vec<u8>> {
            match &self.0 {
                Ok(bytes) => Ok(bytes.clone()),
                Err(()) => Err(Error::other("render backend unavailable")),
            }
        }
    }

    #[test]
    fn renderer_produces_data_uris() {
        let visualizer = Visualizer::new(Some(Arc::new(FixedRenderer(Ok(vec![1, 2, 3])))));
        let state = visualizer.visualize(projection_state("chart my pension growth"));
        assert_eq!(state.chart_images.len(), 3);
        for uri in state.chart_images.values() {
            assert!(uri.starts_with("data:image/png;base64,"));
        }
    }

    #[test]
    fn renderer_failures_are_swallowed() {
        let visualizer = Visualizer::new(Some(Arc::new(FixedRenderer(Err(())))));
        let state = visualizer.visualize(projection_state("chart my pension growth"));
        assert!(state.chart_images.is_empty());
        assert_eq!(state.charts.len(), 3);
    }
}

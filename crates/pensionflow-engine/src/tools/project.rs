//! The pension projection tool.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use pensionflow::error::Result;
use pensionflow::tools::{Tool, ToolInput};

use crate::ml::DATA_SOURCE_DATABASE;
use crate::projection::project;
use crate::scope::resolve_scope;

use super::{
    effective_caller_id, effective_query, internal_error, no_pension_data, not_authenticated,
    per_user_args_schema, ToolDeps,
};

/// `project_pension` - a comprehensive pension overview: current standing,
/// goal progress, savings rate, and the projected balance at the horizon
/// parsed from the query.
pub struct ProjectPensionTool {
    deps: ToolDeps,
}

impl ProjectPensionTool {
    pub fn new(deps: ToolDeps) -> Self {
        Self { deps }
    }

    async fn execute(&self, input: &ToolInput) -> Value {
        let Some(caller_id) = effective_caller_id(input) else {
            return not_authenticated();
        };
        let query = effective_query(input);

        let scope = match resolve_scope(self.deps.store.as_ref(), caller_id, &query).await {
            Ok(scope) => scope,
            Err(err) => return internal_error(err),
        };
        debug!(caller_id, target_id = scope.target_id, %query, "projecting pension");

        let record = match self.deps.store.pension_record(scope.target_id).await {
            Ok(Some(record)) => record,
            Ok(None) => return no_pension_data(scope.target_id),
            Err(err) => return internal_error(err),
        };

        let outcome = project(&record, if query.is_empty() { None } else { Some(&query) });
        let mut observation = match serde_json::to_value(&outcome) {
            Ok(value) => value,
            Err(err) => return internal_error(err),
        };
        if let Some(map) = observation.as_object_mut() {
            map.insert("user_id".to_string(), json!(scope.target_id));
            map.insert("scope".to_string(), json!(scope.context));
            map.insert("data_source".to_string(), json!(DATA_SOURCE_DATABASE));
        }
        observation
    }
}

#[async_trait]
impl Tool for ProjectPensionTool {
    fn name(&self) -> &str {
        "project_pension"
    }

    fn description(&self) -> &str {
        "Provides a comprehensive pension overview: current savings, goal \
         progress, years remaining, savings rate, and the projected balance \
         at retirement. Parses time periods from the query, e.g. 'retire in \
         10 years'."
    }

    fn args_schema(&self) -> Value {
        per_user_args_schema()
    }

    async fn call(&self, input: ToolInput) -> Result<String> {
        Ok(self.execute(&input).await.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use serde_json::json;

    fn parse(raw: &str) -> Value {
        serde_json::from_str(raw).unwrap()
    }

    #[tokio::test]
    async fn ten_year_projection_matches_the_calculator() {
        let dir = tempfile::tempdir().unwrap();
        let deps = deps_with(basic_store(), dir.path());
        let tool = ProjectPensionTool::new(deps);

        let out = parse(
            &tool
                .call(ToolInput::Structured(json!({
                    "user_id": 520,
                    "query": "How much will my pension be if I retire in 10 years?"
                })))
                .await
                .unwrap(),
        );

        assert_eq!(out["projection_analysis"]["years_to_retirement"], 10.0);
        let balance = out["projection_analysis"]["projected_balance"]
            .as_f64()
            .unwrap();
        assert!(balance > 205_000.0 && balance < 212_000.0);
        assert_eq!(out["status"], "Needs Attention");
        assert_eq!(out["data_source"], "DATABASE_PENSION_DATA");
        assert_eq!(out["user_id"], 520);
    }

    #[tokio::test]
    async fn observation_includes_chart_data() {
        let dir = tempfile::tempdir().unwrap();
        let deps = deps_with(basic_store(), dir.path());
        let tool = ProjectPensionTool::new(deps);

        let out = parse(
            &tool
                .call(ToolInput::Structured(json!({"user_id": 520})))
                .await
                .unwrap(),
        );
        assert!(out["chart_data"]["pension_growth"].is_object());
        assert!(out["chart_data"]["goal_progress"].is_object());
        assert!(out["chart_data"]["savings_breakdown"].is_object());
    }

    #[tokio::test]
    async fn context_supplies_missing_id_and_query() {
        use pensionflow::context::RequestContext;

        let dir = tempfile::tempdir().unwrap();
        let deps = deps_with(basic_store(), dir.path());
        let tool = ProjectPensionTool::new(deps);

        let out = RequestContext::scope(520, "retire in 5 years", async {
            parse(
                &tool
                    .call(ToolInput::String(String::new()))
                    .await
                    .unwrap(),
            )
        })
        .await;
        assert_eq!(out["projection_analysis"]["years_to_retirement"], 5.0);
        assert_eq!(out["user_id"], 520);
    }

    #[tokio::test]
    async fn bare_integer_input_works() {
        let dir = tempfile::tempdir().unwrap();
        let deps = deps_with(basic_store(), dir.path());
        let tool = ProjectPensionTool::new(deps);

        let out = parse(&tool.call(ToolInput::String("520".to_string())).await.unwrap());
        assert_eq!(out["user_id"], 520);
        // No query: horizon defaults to the retirement-age goal.
        assert_eq!(out["projection_analysis"]["years_to_retirement"], 32.0);
    }

    #[tokio::test]
    async fn unknown_user_reports_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = basic_store().with_user(user(8, crate::record::Role::Resident));
        let deps = deps_with(store, dir.path());
        let tool = ProjectPensionTool::new(deps);

        let out = parse(
            &tool
                .call(ToolInput::Structured(json!({"user_id": 8})))
                .await
                .unwrap(),
        );
        assert_eq!(out["error"], "No pension data found for User ID: 8");
    }
}

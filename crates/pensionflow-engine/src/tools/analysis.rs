//! Per-user risk and fraud analysis tools.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use pensionflow::error::Result;
use pensionflow::tools::{Tool, ToolInput};

use crate::ml::{fraud_observation, risk_observation};
use crate::scope::resolve_scope;

use super::{
    effective_caller_id, effective_query, internal_error, no_pension_data, not_authenticated,
    per_user_args_schema, ToolDeps,
};

/// `analyze_risk_profile` - scores a user's market and portfolio risk.
pub struct RiskProfileTool {
    deps: ToolDeps,
}

impl RiskProfileTool {
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
        debug!(caller_id, target_id = scope.target_id, "running risk analysis");

        let record = match self.deps.store.pension_record(scope.target_id).await {
            Ok(Some(record)) => record,
            Ok(None) => return no_pension_data(scope.target_id),
            Err(err) => return internal_error(err),
        };

        let assessment = self.deps.predictor.predict_risk(&record);
        let mut observation = risk_observation(&assessment);
        if let Some(map) = observation.as_object_mut() {
            map.insert("user_id".to_string(), json!(scope.target_id));
            map.insert("scope".to_string(), json!(scope.context));
        }
        observation
    }
}

#[async_trait]
impl Tool for RiskProfileTool {
    fn name(&self) -> &str {
        "analyze_risk_profile"
    }

    fn description(&self) -> &str {
        "Analyzes a user's risk profile from their pension record: debt load, \
         volatility, and portfolio diversity. Returns a structured risk \
         assessment with a level, score, and recommendations."
    }

    fn args_schema(&self) -> Value {
        per_user_args_schema()
    }

    async fn call(&self, input: ToolInput) -> Result<String> {
        Ok(self.execute(&input).await.to_string())
    }
}

/// `detect_fraud` - scores a user's transaction signals for fraud exposure.
pub struct DetectFraudTool {
    deps: ToolDeps,
}

impl DetectFraudTool {
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
        debug!(caller_id, target_id = scope.target_id, "running fraud detection");

        let record = match self.deps.store.pension_record(scope.target_id).await {
            Ok(Some(record)) => record,
            Ok(None) => return no_pension_data(scope.target_id),
            Err(err) => return internal_error(err),
        };

        let assessment = self.deps.predictor.predict_fraud(&record);
        let mut observation = fraud_observation(&assessment);
        if let Some(map) = observation.as_object_mut() {
            map.insert("user_id".to_string(), json!(scope.target_id));
            map.insert("scope".to_string(), json!(scope.context));
        }
        observation
    }
}

#[async_trait]
impl Tool for DetectFraudTool {
    fn name(&self) -> &str {
        "detect_fraud"
    }

    fn description(&self) -> &str {
        "Analyzes a user's recent transaction signals (suspicious flags, \
         anomaly scores, location) to detect potential fraud. Returns a \
         structured fraud assessment."
    }

    fn args_schema(&self) -> Value {
        per_user_args_schema()
    }

    async fn call(&self, input: ToolInput) -> Result<String> {
        Ok(self.execute(&input).await.to_string())
    }
}

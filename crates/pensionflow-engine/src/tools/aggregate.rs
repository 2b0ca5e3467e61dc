//! Regulator-only aggregation tools.
//!
//! These read across every pension record, so the caller's role is verified
//! before any scan. Any target id in the query is ignored - the analyses
//! are system-wide by definition.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use pensionflow::error::Result;
use pensionflow::tools::{Tool, ToolInput};

use crate::record::{PensionRecord, Role};

use super::{effective_caller_id, internal_error, not_authenticated, ToolDeps};

pub const DATA_SOURCE_SYSTEM_RISK: &str = "SYSTEM_WIDE_ANALYSIS";
pub const DATA_SOURCE_SYSTEM_FRAUD: &str = "SYSTEM_WIDE_FRAUD_ANALYSIS";
pub const DATA_SOURCE_SYSTEM_GEO: &str = "SYSTEM_WIDE_GEOGRAPHIC_ANALYSIS";
pub const DATA_SOURCE_SYSTEM_PORTFOLIO: &str = "SYSTEM_WIDE_PORTFOLIO_ANALYSIS";

pub(crate) fn regulator_only() -> Value {
    json!({"error": "This tool is only available to regulators"})
}

/// Verifies the caller is a regulator. Runs before any record scan.
async fn require_regulator(deps: &ToolDeps, input: &ToolInput) -> std::result::Result<(), Value> {
    let Some(caller_id) = effective_caller_id(input) else {
        return Err(not_authenticated());
    };
    match deps.store.user(caller_id).await {
        Ok(Some(user)) if user.role == Role::Regulator => Ok(()),
        Ok(_) => Err(regulator_only()),
        Err(err) => Err(internal_error(err)),
    }
}

/// Additive risk score over the stability factors: high volatility, low
/// diversification, heavy debt, and poor health each add a point.
fn rule_risk_points(record: &PensionRecord) -> u32 {
    let mut points = 0;
    if record.volatility.unwrap_or(0.0) > 3.5 {
        points += 1;
    }
    if record.portfolio_diversity_score.unwrap_or(1.0) < 0.5 {
        points += 1;
    }
    let income = record.annual_income.unwrap_or(0.0);
    if income > 0.0 && record.debt_level.unwrap_or(0.0) > income * 0.5 {
        points += 1;
    }
    if record
        .health_status
        .as_deref()
        .is_some_and(|h| h.eq_ignore_ascii_case("poor"))
    {
        points += 1;
    }
    points
}

fn risk_bucket(points: u32) -> &'static str {
    match points {
        0 | 1 => "Low",
        2 => "Medium",
        _ => "High",
    }
}

fn fraud_points(record: &PensionRecord) -> u32 {
    let mut points = 0;
    if record.suspicious_flag.unwrap_or(false) {
        points += 1;
    }
    if record.anomaly_score.unwrap_or(0.0) > 0.8 {
        points += 1;
    }
    if record.previous_fraud_flag.unwrap_or(false) {
        points += 1;
    }
    points
}

fn fraud_bucket(points: u32) -> &'static str {
    match points {
        0 => "Low",
        1 => "Medium",
        _ => "High",
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let collected: Vec<f64> = values.collect();
    if collected.is_empty() {
        0.0
    } else {
        collected.iter().sum::<f64>() / collected.len() as f64
    }
}

fn aggregate_args_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

/// `analyze_system_wide_risk` - risk distribution across every record.
pub struct SystemWideRiskTool {
    deps: ToolDeps,
}

impl SystemWideRiskTool {
    pub fn new(deps: ToolDeps) -> Self {
        Self { deps }
    }

    async fn execute(&self, input: &ToolInput) -> Value {
        if let Err(denied) = require_regulator(&self.deps, input).await {
            return denied;
        }
        let records = match self.deps.store.all_records().await {
            Ok(records) => records,
            Err(err) => return internal_error(err),
        };
        debug!(total = records.len(), "system-wide risk scan");

        let mut distribution = BTreeMap::from([("Low", 0u32), ("Medium", 0u32), ("High", 0u32)]);
        let mut high_risk: Vec<(u32, i64)> = Vec::new();
        for record in &records {
            let points = rule_risk_points(record);
            let bucket = risk_bucket(points);
            *distribution.entry(bucket).or_default() += 1;
            if bucket == "High" {
                high_risk.push((points, record.user_id));
            }
        }
        high_risk.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        high_risk.truncate(10);

        json!({
            "system_analysis": true,
            "data_source": DATA_SOURCE_SYSTEM_RISK,
            "total_users": records.len(),
            "risk_distribution": {
                "Low": distribution["Low"],
                "Medium": distribution["Medium"],
                "High": distribution["High"],
            },
            "top_high_risk_users": high_risk
                .iter()
                .map(|(points, user_id)| json!({"user_id": user_id, "risk_points": points}))
                .collect::<Vec<_>>(),
            "averages": {
                "volatility": mean(records.iter().filter_map(|r| r.volatility)),
                "portfolio_diversity_score":
                    mean(records.iter().filter_map(|r| r.portfolio_diversity_score)),
                "debt_level": mean(records.iter().filter_map(|r| r.debt_level)),
            },
        })
    }
}

#[async_trait]
impl Tool for SystemWideRiskTool {
    fn name(&self) -> &str {
        "analyze_system_wide_risk"
    }

    fn description(&self) -> &str {
        "Regulator-only: scores every pension record against the stability \
         factors and returns the system-wide risk distribution, the top \
         high-risk users, and portfolio averages."
    }

    fn args_schema(&self) -> Value {
        aggregate_args_schema()
    }

    async fn call(&self, input: ToolInput) -> Result<String> {
        Ok(self.execute(&input).await.to_string())
    }
}

/// `analyze_system_wide_fraud` - fraud-signal distribution across records.
pub struct SystemWideFraudTool {
    deps: ToolDeps,
}

impl SystemWideFraudTool {
    pub fn new(deps: ToolDeps) -> Self {
        Self { deps }
    }

    async fn execute(&self, input: &ToolInput) -> Value {
        if let Err(denied) = require_regulator(&self.deps, input).await {
            return denied;
        }
        let records = match self.deps.store.all_records().await {
            Ok(records) => records,
            Err(err) => return internal_error(err),
        };

        let suspicious_count = records
            .iter()
            .filter(|r| r.suspicious_flag.unwrap_or(false))
            .count();
        let high_anomaly_count = records
            .iter()
            .filter(|r| r.anomaly_score.unwrap_or(0.0) > 0.8)
            .count();

        let mut distribution = BTreeMap::from([("Low", 0u32), ("Medium", 0u32), ("High", 0u32)]);
        for record in &records {
            *distribution.entry(fraud_bucket(fraud_points(record))).or_default() += 1;
        }

        json!({
            "system_analysis": true,
            "data_source": DATA_SOURCE_SYSTEM_FRAUD,
            "total_users": records.len(),
            "suspicious_flag_count": suspicious_count,
            "high_anomaly_count": high_anomaly_count,
            "fraud_distribution": {
                "Low": distribution["Low"],
                "Medium": distribution["Medium"],
                "High": distribution["High"],
            },
        })
    }
}

#[async_trait]
impl Tool for SystemWideFraudTool {
    fn name(&self) -> &str {
        "analyze_system_wide_fraud"
    }

    fn description(&self) -> &str {
        "Regulator-only: counts suspicious flags and anomaly outliers across \
         all users and buckets the population by fraud exposure."
    }

    fn args_schema(&self) -> Value {
        aggregate_args_schema()
    }

    async fn call(&self, input: ToolInput) -> Result<String> {
        Ok(self.execute(&input).await.to_string())
    }
}

/// `analyze_geographic_risk` - per-country risk and concentration.
pub struct GeographicRiskTool {
    deps: ToolDeps,
}

impl GeographicRiskTool {
    pub fn new(deps: ToolDeps) -> Self {
        Self { deps }
    }

    async fn execute(&self, input: &ToolInput) -> Value {
        if let Err(denied) = require_regulator(&self.deps, input).await {
            return denied;
        }
        let records = match self.deps.store.all_records().await {
            Ok(records) => records,
            Err(err) => return internal_error(err),
        };
        let total = records.len().max(1);

        let mut by_country: BTreeMap<String, Vec<&PensionRecord>> = BTreeMap::new();
        for record in &records {
            let country = record
                .country
                .clone()
                .unwrap_or_else(|| "Unknown".to_string());
            by_country.entry(country).or_default().push(record);
        }

        let countries: Vec<Value> = by_country
            .iter()
            .map(|(country, members)| {
                let avg_points =
                    mean(members.iter().map(|r| f64::from(rule_risk_points(r))));
                let risk_level = if avg_points >= 2.5 {
                    "High"
                } else if avg_points >= 1.5 {
                    "Medium"
                } else {
                    "Low"
                };
                let share = members.len() as f64 / total as f64;
                let concentration = if share > 0.4 {
                    "High"
                } else if share > 0.25 {
                    "Medium"
                } else {
                    "Normal"
                };
                json!({
                    "country": country,
                    "members": members.len(),
                    "share": share,
                    "risk_level": risk_level,
                    "concentration": concentration,
                    "average_volatility": mean(members.iter().filter_map(|r| r.volatility)),
                })
            })
            .collect();

        let concentration_flags: Vec<Value> = countries
            .iter()
            .filter(|c| c["concentration"] != "Normal")
            .cloned()
            .collect();

        json!({
            "system_analysis": true,
            "data_source": DATA_SOURCE_SYSTEM_GEO,
            "total_users": records.len(),
            "countries": countries,
            "concentration_flags": concentration_flags,
        })
    }
}

#[async_trait]
impl Tool for GeographicRiskTool {
    fn name(&self) -> &str {
        "analyze_geographic_risk"
    }

    fn description(&self) -> &str {
        "Regulator-only: groups members by country, derives a per-country \
         risk level from the stability factors, and flags geographic \
         concentration."
    }

    fn args_schema(&self) -> Value {
        aggregate_args_schema()
    }

    async fn call(&self, input: ToolInput) -> Result<String> {
        Ok(self.execute(&input).await.to_string())
    }
}

/// `analyze_portfolio_trends` - plan-type composition and averages.
pub struct PortfolioTrendsTool {
    deps: ToolDeps,
}

impl PortfolioTrendsTool {
    pub fn new(deps: ToolDeps) -> Self {
        Self { deps }
    }

    async fn execute(&self, input: &ToolInput) -> Value {
        if let Err(denied) = require_regulator(&self.deps, input).await {
            return denied;
        }
        let records = match self.deps.store.all_records().await {
            Ok(records) => records,
            Err(err) => return internal_error(err),
        };

        let mut by_type: BTreeMap<&'static str, Vec<&PensionRecord>> = BTreeMap::new();
        for record in &records {
            by_type.entry(record.plan_type().label()).or_default().push(record);
        }

        let trends: Vec<Value> = by_type
            .iter()
            .map(|(plan_type, members)| {
                json!({
                    "pension_type": plan_type,
                    "members": members.len(),
                    "average_return_rate":
                        mean(members.iter().map(|r| r.normalized_return_rate())),
                    "average_diversity":
                        mean(members.iter().filter_map(|r| r.portfolio_diversity_score)),
                })
            })
            .collect();

        json!({
            "system_analysis": true,
            "data_source": DATA_SOURCE_SYSTEM_PORTFOLIO,
            "total_users": records.len(),
            "trends": trends,
        })
    }
}

#[async_trait]
impl Tool for PortfolioTrendsTool {
    fn name(&self) -> &str {
        "analyze_portfolio_trends"
    }

    fn description(&self) -> &str {
        "Regulator-only: groups the book by pension type and reports average \
         return rates and diversification per group."
    }

    fn args_schema(&self) -> Value {
        aggregate_args_schema()
    }

    async fn call(&self, input: ToolInput) -> Result<String> {
        Ok(self.execute(&input).await.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::record::{InMemoryRecordStore, PensionRecord};
    use serde_json::json;

    fn parse(raw: &str) -> Value {
        serde_json::from_str(raw).unwrap()
    }

    fn risky_record(user_id: i64, country: &str) -> PensionRecord {
        let mut record = PensionRecord::new(user_id);
        record.country = Some(country.to_string());
        record.volatility = Some(4.0);
        record.portfolio_diversity_score = Some(0.2);
        record.annual_income = Some(40_000.0);
        record.debt_level = Some(30_000.0);
        record.health_status = Some("Poor".to_string());
        record.suspicious_flag = Some(true);
        record.anomaly_score = Some(0.9);
        record.pension_type = Some("Hybrid".to_string());
        record.annual_return_rate = Some(6.0);
        record
    }

    fn aggregate_store() -> InMemoryRecordStore {
        basic_store()
            .with_record(risky_record(801, "Freedonia"))
            .with_record(risky_record(802, "Freedonia"))
            .with_record(risky_record(803, "Sylvania"))
    }

    #[tokio::test]
    async fn non_regulator_is_denied_before_any_read() {
        let dir = tempfile::tempdir().unwrap();
        let deps = deps_with(aggregate_store(), dir.path());
        let tool = SystemWideRiskTool::new(deps);

        let out = parse(
            &tool
                .call(ToolInput::Structured(json!({"user_id": 520})))
                .await
                .unwrap(),
        );
        assert_eq!(out["error"], "This tool is only available to regulators");
        assert!(out.get("risk_distribution").is_none());
    }

    #[tokio::test]
    async fn unknown_caller_is_denied() {
        let dir = tempfile::tempdir().unwrap();
        let deps = deps_with(aggregate_store(), dir.path());
        let tool = SystemWideFraudTool::new(deps);

        let out = parse(
            &tool
                .call(ToolInput::Structured(json!({"user_id": 424242})))
                .await
                .unwrap(),
        );
        assert_eq!(out["error"], "This tool is only available to regulators");
    }

    #[tokio::test]
    async fn risk_distribution_buckets_and_top_list() {
        let dir = tempfile::tempdir().unwrap();
        let deps = deps_with(aggregate_store(), dir.path());
        let tool = SystemWideRiskTool::new(deps);

        let out = parse(
            &tool
                .call(ToolInput::Structured(json!({"user_id": 3000})))
                .await
                .unwrap(),
        );
        assert_eq!(out["system_analysis"], true);
        assert_eq!(out["data_source"], DATA_SOURCE_SYSTEM_RISK);
        assert_eq!(out["total_users"], 5);
        // The two seeded resident records score 0-1 points (Low); the three
        // risky ones hit all four factors (High).
        assert_eq!(out["risk_distribution"]["Low"], 2);
        assert_eq!(out["risk_distribution"]["High"], 3);
        assert_eq!(out["top_high_risk_users"].as_array().unwrap().len(), 3);
        assert_eq!(out["top_high_risk_users"][0]["risk_points"], 4);
    }

    #[tokio::test]
    async fn fraud_counts_and_buckets() {
        let dir = tempfile::tempdir().unwrap();
        let deps = deps_with(aggregate_store(), dir.path());
        let tool = SystemWideFraudTool::new(deps);

        let out = parse(
            &tool
                .call(ToolInput::Structured(json!({"user_id": 3000})))
                .await
                .unwrap(),
        );
        assert_eq!(out["data_source"], DATA_SOURCE_SYSTEM_FRAUD);
        assert_eq!(out["suspicious_flag_count"], 3);
        assert_eq!(out["high_anomaly_count"], 3);
        assert_eq!(out["fraud_distribution"]["High"], 3);
        assert_eq!(out["fraud_distribution"]["Low"], 2);
    }

    #[tokio::test]
    async fn geographic_grouping_flags_concentration() {
        let dir = tempfile::tempdir().unwrap();
        let deps = deps_with(aggregate_store(), dir.path());
        let tool = GeographicRiskTool::new(deps);

        let out = parse(
            &tool
                .call(ToolInput::Structured(json!({"user_id": 3000})))
                .await
                .unwrap(),
        );
        assert_eq!(out["data_source"], DATA_SOURCE_SYSTEM_GEO);
        let countries = out["countries"].as_array().unwrap();
        assert_eq!(countries.len(), 3); // Freedonia, Sylvania, United Kingdom

        let freedonia = countries
            .iter()
            .find(|c| c["country"] == "Freedonia")
            .unwrap();
        // 2 of 5 users = 40% share -> Medium concentration; all factors hit
        // -> High risk.
        assert_eq!(freedonia["risk_level"], "High");
        assert_eq!(freedonia["concentration"], "Medium");
        assert!(!out["concentration_flags"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn portfolio_trends_group_by_plan_type() {
        let dir = tempfile::tempdir().unwrap();
        let deps = deps_with(aggregate_store(), dir.path());
        let tool = PortfolioTrendsTool::new(deps);

        let out = parse(
            &tool
                .call(ToolInput::Structured(json!({"user_id": 3000})))
                .await
                .unwrap(),
        );
        assert_eq!(out["data_source"], DATA_SOURCE_SYSTEM_PORTFOLIO);
        let trends = out["trends"].as_array().unwrap();
        assert_eq!(trends.len(), 2); // Defined Contribution + Hybrid

        let hybrid = trends
            .iter()
            .find(|t| t["pension_type"] == "Hybrid")
            .unwrap();
        assert_eq!(hybrid["members"], 3);
        // 6.0 stored as a percentage normalizes to 0.06.
        let rate = hybrid["average_return_rate"].as_f64().unwrap();
        assert!((rate - 0.06).abs() < 1e-9);
    }

    #[tokio::test]
    async fn regulator_target_ids_in_query_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let deps = deps_with(aggregate_store(), dir.path());
        let tool = SystemWideRiskTool::new(deps);

        let out = parse(
            &tool
                .call(ToolInput::Structured(json!({
                    "user_id": 3000,
                    "query": "system risk for user 202"
                })))
                .await
                .unwrap(),
        );
        // Still a full-book scan, not a single-user read.
        assert_eq!(out["total_users"], 5);
    }
}

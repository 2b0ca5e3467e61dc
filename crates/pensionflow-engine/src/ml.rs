//! Risk and fraud predictors with a rule-based fallback.
//!
//! Each predictor is a persisted artifact carrying the training-column list
//! it was fitted on. Prediction never fails from the caller's point of view:
//! a missing artifact, a scoring error, or a nonsense class index all take
//! the rules branch, and the result says which path produced it.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use crate::record::PensionRecord;

/// Feature width the risk model was trained on.
pub const RISK_FEATURE_COUNT: usize = 67;
/// Feature width the fraud model was trained on.
pub const FRAUD_FEATURE_COUNT: usize = 69;

/// Stable tag marking results derived from the relational pension view.
pub const DATA_SOURCE_DATABASE: &str = "DATABASE_PENSION_DATA";

/// A persisted linear scoring model: one weight row and intercept per class,
/// over the named training columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub training_columns: Vec<String>,
    pub weights: Vec<Vec<f64>>,
    pub intercepts: Vec<f64>,
}

impl ModelArtifact {
    /// Loads an artifact from a JSON file. Returns `None` (with a warning)
    /// when the file is absent or malformed - an unavailable model is a
    /// normal branch, not an error.
    pub fn load(path: &Path) -> Option<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(path = %path.display(), %err, "model artifact not available");
                return None;
            }
        };
        match serde_json::from_str::<Self>(&raw) {
            Ok(artifact) if artifact.is_consistent() => Some(artifact),
            Ok(_) => {
                warn!(path = %path.display(), "model artifact has inconsistent shapes");
                None
            }
            Err(err) => {
                warn!(path = %path.display(), %err, "model artifact failed to parse");
                None
            }
        }
    }

    fn is_consistent(&self) -> bool {
        !self.weights.is_empty()
            && self.weights.len() == self.intercepts.len()
            && self
                .weights
                .iter()
                .all(|row| row.len() == self.training_columns.len())
    }

    fn class_scores(&self, features: &[f64]) -> Vec<f64> {
        self.weights
            .iter()
            .zip(&self.intercepts)
            .map(|(row, intercept)| {
                intercept + row.iter().zip(features).map(|(w, x)| w * x).sum::<f64>()
            })
            .collect()
    }

    /// Index of the highest-scoring class.
    pub fn predict(&self, features: &[f64]) -> usize {
        let scores = self.class_scores(features);
        scores
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, _)| i)
            .unwrap_or(0)
    }

    /// Softmax over class scores.
    pub fn predict_proba(&self, features: &[f64]) -> Vec<f64> {
        let scores = self.class_scores(features);
        let max = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let exps: Vec<f64> = scores.iter().map(|s| (s - max).exp()).collect();
        let total: f64 = exps.iter().sum();
        exps.into_iter().map(|e| e / total).collect()
    }
}

/// Assembled prediction result, serialized verbatim into tool observations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub risk_level: String,
    pub risk_score: f64,
    pub confidence: f64,
    pub method: String,
    pub ml_model_used: bool,
    pub factors_considered: Vec<String>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FraudAssessment {
    pub fraud_risk: String,
    pub fraud_score: f64,
    pub confidence: f64,
    pub method: String,
    pub ml_model_used: bool,
    pub factors_considered: Vec<String>,
    pub suspicious_indicators: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Holds the optional model artifacts and dispatches ML-or-rules scoring.
#[derive(Default)]
pub struct PredictorService {
    risk_model: Option<ModelArtifact>,
    fraud_model: Option<ModelArtifact>,
}

impl PredictorService {
    /// A service with no artifacts: everything scores through the rules.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Loads `risk_model.json` and `fraud_model.json` from `dir`. Absent or
    /// unreadable files leave the corresponding predictor on the rules path.
    pub fn load_from_dir(dir: &Path) -> Self {
        Self {
            risk_model: ModelArtifact::load(&dir.join("risk_model.json")),
            fraud_model: ModelArtifact::load(&dir.join("fraud_model.json")),
        }
    }

    pub fn with_models(risk: Option<ModelArtifact>, fraud: Option<ModelArtifact>) -> Self {
        Self {
            risk_model: risk,
            fraud_model: fraud,
        }
    }

    /// Scores the user's market/portfolio risk. Never errors.
    pub fn predict_risk(&self, record: &PensionRecord) -> RiskAssessment {
        if let Some(model) = &self.risk_model {
            let features =
                assemble_features(&model.training_columns, record, RISK_FEATURE_COUNT);
            let class = model.predict(&features);
            let (level, score) = match class {
                0 => ("Low", 0.2),
                1 => ("Medium", 0.5),
                2 => ("High", 0.8),
                other => {
                    warn!(class = other, "risk model produced an unknown class, using rules");
                    return fallback_risk(record);
                }
            };
            let confidence = model
                .predict_proba(&features)
                .into_iter()
                .fold(f64::NEG_INFINITY, f64::max)
                .max(0.0);
            let confidence = if confidence.is_finite() && confidence > 0.0 {
                confidence
            } else {
                0.8
            };
            return RiskAssessment {
                risk_level: level.to_string(),
                risk_score: score,
                confidence,
                method: "ML".to_string(),
                ml_model_used: true,
                factors_considered: risk_factor_names(),
                recommendations: risk_recommendations(level),
            };
        }
        fallback_risk(record)
    }

    /// Scores the user's fraud exposure. Never errors.
    pub fn predict_fraud(&self, record: &PensionRecord) -> FraudAssessment {
        if let Some(model) = &self.fraud_model {
            let features =
                assemble_features(&model.training_columns, record, FRAUD_FEATURE_COUNT);
            let class = model.predict(&features);
            let (level, score) = match class {
                0 => ("Low", 0.2),
                1 => ("High", 0.8),
                other => {
                    warn!(class = other, "fraud model produced an unknown class, using rules");
                    return fallback_fraud(record);
                }
            };
            let confidence = model
                .predict_proba(&features)
                .into_iter()
                .fold(f64::NEG_INFINITY, f64::max)
                .max(0.0);
            let confidence = if confidence.is_finite() && confidence > 0.0 {
                confidence
            } else {
                0.8
            };
            return FraudAssessment {
                fraud_risk: level.to_string(),
                fraud_score: score,
                confidence,
                method: "ML".to_string(),
                ml_model_used: true,
                factors_considered: fraud_factor_names(),
                suspicious_indicators: fraud_indicators(record, level),
                recommendations: fraud_recommendations(level),
            };
        }
        fallback_fraud(record)
    }
}

/// Builds the feature vector a model expects: the record value for each
/// training column when resolvable, else a domain default; then padded or
/// truncated to the expected width.
pub fn assemble_features(columns: &[String], record: &PensionRecord, expected: usize) -> Vec<f64> {
    let mut features: Vec<f64> = columns
        .iter()
        .map(|column| feature_value(record, column).unwrap_or_else(|| default_for_column(column)))
        .collect();

    if features.len() != expected {
        warn!(
            expected,
            actual = features.len(),
            "feature count mismatch, padding/truncating"
        );
        features.resize(expected, 0.0);
    }
    features
}

fn feature_value(record: &PensionRecord, column: &str) -> Option<f64> {
    match column.to_lowercase().as_str() {
        "age" => record.age.map(f64::from),
        "annual_income" => record.annual_income,
        "current_savings" => record.current_savings,
        "debt_level" => record.debt_level,
        "monthly_expenses" => record.monthly_expenses,
        "savings_rate" => record.savings_rate,
        "contribution_amount" => record.contribution_amount,
        "employer_contribution" => record.employer_contribution,
        "total_annual_contribution" => record.total_annual_contribution,
        "retirement_age_goal" => record.retirement_age_goal.map(f64::from),
        "years_contributed" => record.years_contributed.map(f64::from),
        "annual_return_rate" => Some(record.normalized_return_rate()),
        "fees_percentage" => record.fees_percentage,
        "volatility" => record.volatility,
        "portfolio_diversity_score" => record.portfolio_diversity_score,
        "risk_tolerance" => record.risk_tolerance.as_deref().map(risk_tolerance_value),
        "health_status" => record.health_status.as_deref().map(health_value),
        "transaction_amount" => record.transaction_amount,
        "anomaly_score" => record.anomaly_score,
        "transaction_pattern_score" => record.transaction_pattern_score,
        "account_age" => record.account_age.map(f64::from),
        "suspicious_flag" => record.suspicious_flag.map(|b| f64::from(u8::from(b))),
        "previous_fraud_flag" => record.previous_fraud_flag.map(|b| f64::from(u8::from(b))),
        "number_of_dependents" => record.number_of_dependents.map(f64::from),
        "life_expectancy_estimate" => record.life_expectancy_estimate.map(f64::from),
        _ => None,
    }
}

fn default_for_column(column: &str) -> f64 {
    let lower = column.to_lowercase();
    if lower.contains("income") || lower.contains("salary") {
        75_000.0
    } else if lower.contains("debt") {
        25_000.0
    } else if lower.contains("risk") || lower.contains("volatility") || lower.contains("diversity")
    {
        0.5
    } else if lower.contains("health") {
        0.67
    } else {
        0.0
    }
}

fn risk_tolerance_value(raw: &str) -> f64 {
    match raw.trim().to_lowercase().as_str() {
        "low" => 0.25,
        "high" => 0.75,
        _ => 0.5,
    }
}

fn health_value(raw: &str) -> f64 {
    match raw.trim().to_lowercase().as_str() {
        "poor" => 0.33,
        "good" | "excellent" => 1.0,
        _ => 0.67,
    }
}

fn risk_factor_names() -> Vec<String> {
    [
        "Annual_Income",
        "Debt_Level",
        "Risk_Tolerance",
        "Volatility",
        "Portfolio_Diversity_Score",
        "Health_Status",
    ]
    .iter()
    .map(ToString::to_string)
    .collect()
}

fn fraud_factor_names() -> Vec<String> {
    [
        "Country",
        "Transaction_Amount",
        "Suspicious_Flag",
        "Anomaly_Score",
        "Geo_Location",
        "Debt_Level",
    ]
    .iter()
    .map(ToString::to_string)
    .collect()
}

/// Rule-based risk scoring: start at 0.5; debt above half of income,
/// high volatility, and poor diversification each push the score up.
pub fn fallback_risk(record: &PensionRecord) -> RiskAssessment {
    let income = record.annual_income.unwrap_or(1.0);
    let mut score: f64 = 0.5;

    if record.debt_level.unwrap_or(0.0) > income * 0.5 {
        score += 0.2;
    }
    if record.volatility.unwrap_or(0.5) > 0.7 {
        score += 0.15;
    }
    if record.portfolio_diversity_score.unwrap_or(0.5) < 0.3 {
        score += 0.1;
    }
    score = score.clamp(0.0, 1.0);

    let level = if score < 0.4 {
        "Low"
    } else if score > 0.7 {
        "High"
    } else {
        "Medium"
    };

    RiskAssessment {
        risk_level: level.to_string(),
        risk_score: score,
        confidence: 0.6,
        method: "rules".to_string(),
        ml_model_used: false,
        factors_considered: risk_factor_names(),
        recommendations: risk_recommendations(level),
    }
}

/// Rule-based fraud scoring: start at 0.3; extreme debt, volatility, and
/// concentration push the anomaly score up.
pub fn fallback_fraud(record: &PensionRecord) -> FraudAssessment {
    let income = record.annual_income.unwrap_or(1.0);
    let mut score: f64 = 0.3;

    if record.debt_level.unwrap_or(0.0) > income * 2.0 {
        score += 0.3;
    }
    if record.volatility.unwrap_or(0.5) > 0.8 {
        score += 0.2;
    }
    if record.portfolio_diversity_score.unwrap_or(0.5) < 0.2 {
        score += 0.2;
    }
    score = score.clamp(0.0, 1.0);

    let level = if score > 0.6 { "High" } else { "Low" };

    FraudAssessment {
        fraud_risk: level.to_string(),
        fraud_score: score,
        confidence: 0.5,
        method: "rules".to_string(),
        ml_model_used: false,
        factors_considered: fraud_factor_names(),
        suspicious_indicators: fraud_indicators(record, level),
        recommendations: fraud_recommendations(level),
    }
}

fn risk_recommendations(level: &str) -> Vec<String> {
    let texts: &[&str] = match level {
        "High" => &[
            "Consider reducing debt levels to improve financial stability",
            "Diversify portfolio to reduce concentration risk",
            "Review and potentially adjust risk tolerance settings",
            "Consider consulting with a financial advisor",
        ],
        "Medium" => &[
            "Monitor portfolio performance regularly",
            "Consider gradual portfolio diversification",
            "Review debt-to-income ratio periodically",
        ],
        _ => &[
            "Maintain current conservative approach",
            "Consider slightly increasing risk for potential higher returns",
            "Continue regular portfolio monitoring",
        ],
    };
    texts.iter().map(ToString::to_string).collect()
}

fn fraud_indicators(record: &PensionRecord, level: &str) -> Vec<String> {
    let mut indicators = Vec::new();
    if level == "High" {
        let income = record.annual_income.unwrap_or(1.0);
        if record.debt_level.unwrap_or(0.0) > income * 2.0 {
            indicators.push("Unusually high debt-to-income ratio".to_string());
        }
        if record.volatility.unwrap_or(0.5) > 0.8 {
            indicators.push("Extremely high portfolio volatility".to_string());
        }
        if record.portfolio_diversity_score.unwrap_or(0.5) < 0.2 {
            indicators.push("Very low portfolio diversity".to_string());
        }
        if record.suspicious_flag.unwrap_or(false) {
            indicators.push("Transaction carries a suspicious flag".to_string());
        }
    }
    indicators
}

fn fraud_recommendations(level: &str) -> Vec<String> {
    let texts: &[&str] = if level == "High" {
        &[
            "Immediate review of all financial transactions",
            "Contact financial institution for account verification",
            "Consider freezing accounts temporarily",
            "Report suspicious activity to authorities if necessary",
        ]
    } else {
        &[
            "Continue regular monitoring of account activity",
            "Report any unusual transactions immediately",
            "Maintain strong security practices",
        ]
    };
    texts.iter().map(ToString::to_string).collect()
}

/// Serializes a risk assessment into the observation document tools return.
pub fn risk_observation(assessment: &RiskAssessment) -> Value {
    let mut value = serde_json::to_value(assessment).unwrap_or_else(|_| json!({}));
    if let Some(map) = value.as_object_mut() {
        map.insert("data_source".to_string(), json!(DATA_SOURCE_DATABASE));
    }
    value
}

/// Serializes a fraud assessment into the observation document tools return.
pub fn fraud_observation(assessment: &FraudAssessment) -> Value {
    let mut value = serde_json::to_value(assessment).unwrap_or_else(|_| json!({}));
    if let Some(map) = value.as_object_mut() {
        map.insert("data_source".to_string(), json!(DATA_SOURCE_DATABASE));
    }
    value
}

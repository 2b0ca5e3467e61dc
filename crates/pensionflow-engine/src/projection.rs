//! Deterministic pension projection math.
//!
//! Raw compound interest over long horizons produces numbers that erode user
//! trust, so every branch applies an explicit sanity cap and reports when it
//! was hit. The caps are policy, not bug-fixes; they are re-emitted in the
//! result so a UI can explain them.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::record::{PensionRecord, PensionType};

/// Assumed yearly inflation for the adjusted figure.
const INFLATION_RATE: f64 = 0.025;

fn horizon_years_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)retire\s+in\s+(\d+)\s+years?").expect("horizon pattern is valid")
    })
}

fn horizon_age_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)retire\s+at\s+age\s+(\d+)").expect("horizon pattern is valid")
    })
}

fn horizon_months_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)retire\s+in\s+(\d+)\s+months?").expect("horizon pattern is valid")
    })
}

/// Extracts the projection horizon (in years) from a natural-language query.
///
/// Rules are tried in order, first match wins, matching is case-insensitive:
/// "retire in N years", "retire at age A", "retire early|soon",
/// "retire next year", "retire in N months" (0.1-year floor), and finally
/// the distance to the stored retirement-age goal.
pub fn parse_time_horizon(query: &str, age: u32, retirement_age: u32) -> f64 {
    let lower = query.to_lowercase();

    if let Some(caps) = horizon_years_regex().captures(&lower) {
        if let Ok(years) = caps[1].parse::<u32>() {
            return f64::from(years);
        }
    }

    if let Some(caps) = horizon_age_regex().captures(&lower) {
        if let Ok(target) = caps[1].parse::<u32>() {
            return f64::from(target.saturating_sub(age));
        }
    }

    if lower.contains("retire early") || lower.contains("retire soon") {
        return f64::from(retirement_age.saturating_sub(age).min(5));
    }

    if lower.contains("retire next year") {
        return 1.0;
    }

    if let Some(caps) = horizon_months_regex().captures(&lower) {
        if let Ok(months) = caps[1].parse::<u32>() {
            return (f64::from(months) / 12.0).max(0.1);
        }
    }

    f64::from(retirement_age.saturating_sub(age))
}

/// Closed-form future value of a lump sum plus level yearly contributions.
pub fn future_value(current_savings: f64, annual_contribution: f64, rate: f64, years: f64) -> f64 {
    if years <= 0.0 {
        return current_savings;
    }
    if rate == 0.0 {
        return current_savings + annual_contribution * years;
    }
    let growth = (1.0 + rate).powf(years);
    current_savings * growth + annual_contribution * (growth - 1.0) / rate
}

/// One point on a growth curve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrowthPoint {
    pub age: u32,
    pub projected_value: f64,
}

/// Year-by-year growth curve using the same formula as the projection,
/// with every point clamped to `cap`. The visualizer shares this helper so
/// the curve endpoint matches the reported projection.
pub fn growth_series(
    current_savings: f64,
    annual_contribution: f64,
    rate: f64,
    start_age: u32,
    years: u32,
    cap: f64,
) -> Vec<GrowthPoint> {
    (0..=years)
        .map(|year| GrowthPoint {
            age: start_age + year,
            projected_value: future_value(
                current_savings,
                annual_contribution,
                rate,
                f64::from(year),
            )
            .min(cap)
            .round(),
        })
        .collect()
}

/// The user's standing data, echoed back alongside the projection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentData {
    pub current_savings: f64,
    pub annual_income: f64,
    pub age: u32,
    pub retirement_age_goal: u32,
    pub annual_contribution: f64,
    pub savings_rate_percentage: f64,
    pub pension_type: String,
}

/// The computed projection block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionAnalysis {
    pub years_to_retirement: f64,
    pub projected_balance: f64,
    pub inflation_adjusted_balance: f64,
    pub scenario_10_percent_increase: f64,
    pub scenario_20_percent_increase: f64,
    pub annual_return_rate: f64,
    pub effective_return_rate: f64,
    pub validation_warnings: Vec<String>,
    pub calculation_notes: Vec<String>,
}

/// Full projection result, serialized verbatim into tool observations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionOutcome {
    pub current_data: CurrentData,
    pub projection_analysis: ProjectionAnalysis,
    pub status: String,
    pub progress_to_goal: f64,
    pub retirement_goal_amount: f64,
    pub chart_data: Value,
}

/// Projects the pension to the horizon parsed from `query` (or the stored
/// retirement goal), applying the plan-type rules and sanity caps.
pub fn project(record: &PensionRecord, query: Option<&str>) -> ProjectionOutcome {
    let current_savings = record.current_savings.unwrap_or(0.0);
    let annual_income = record.annual_income.unwrap_or(0.0);
    let age = record.age.unwrap_or(0);
    let retirement_age_goal = record.retirement_age_goal.unwrap_or(65);
    let annual_contribution = record.total_contribution();
    let plan_type = record.plan_type();

    let years = match query {
        Some(query) if !query.trim().is_empty() => {
            parse_time_horizon(query, age, retirement_age_goal)
        }
        _ => f64::from(retirement_age_goal.saturating_sub(age)),
    };

    let raw_rate = record.normalized_return_rate();
    let fees = record.fees_percentage.unwrap_or(0.0) / 100.0;
    let net_rate = (raw_rate - fees).max(0.0);

    let mut validation_warnings = Vec::new();
    let mut calculation_notes = Vec::new();

    let (projected_balance, scenario_10, scenario_20, effective_rate) = match plan_type {
        PensionType::DefinedContribution => {
            if years > 0.0 {
                // Long horizons use a more conservative rate tier.
                let effective_rate = if years > 20.0 {
                    net_rate.min(0.06)
                } else if years >= 10.0 {
                    net_rate.min(0.07)
                } else {
                    net_rate
                };

                let raw_projection =
                    future_value(current_savings, annual_contribution, effective_rate, years);
                let cap = current_savings * (years * 0.5).min(10.0);
                let projected = if raw_projection > cap {
                    validation_warnings.push(
                        "Projection capped to a realistic multiple of current savings"
                            .to_string(),
                    );
                    cap
                } else {
                    raw_projection
                };
                (
                    projected,
                    (projected * 1.1).min(cap * 1.1),
                    (projected * 1.2).min(cap * 1.2),
                    effective_rate,
                )
            } else {
                (current_savings, current_savings, current_savings, net_rate)
            }
        }
        PensionType::DefinedBenefit => {
            // DB benefits follow the plan formula, not contributions.
            let projected = record
                .projected_pension_amount
                .unwrap_or(annual_income * 0.6);
            calculation_notes
                .push("Defined Benefit plan: payout follows the plan formula".to_string());
            (projected, projected, projected, net_rate)
        }
        PensionType::Hybrid => {
            if years > 0.0 {
                let conservative_rate = (net_rate * 0.8).min(0.06);
                let raw_projection = current_savings * (1.0 + conservative_rate).powf(years);
                let cap = current_savings * (years * 0.4).min(8.0);
                let projected = if raw_projection > cap {
                    validation_warnings.push(
                        "Projection capped to a realistic multiple of current savings"
                            .to_string(),
                    );
                    cap
                } else {
                    raw_projection
                };
                (
                    projected,
                    (projected * 1.1).min(cap * 1.1),
                    (projected * 1.2).min(cap * 1.2),
                    conservative_rate,
                )
            } else {
                (current_savings, current_savings, current_savings, net_rate)
            }
        }
    };

    if projected_balance > current_savings * 20.0 {
        validation_warnings
            .push("Projection may be optimistic - consider reviewing assumptions".to_string());
        calculation_notes.push(
            "Large projection due to long time horizon or high return assumptions".to_string(),
        );
    }
    if years < 1.0 {
        calculation_notes
            .push("User is at or past retirement age - projection shows current status".to_string());
    }
    if years <= 3.0 && projected_balance > current_savings * 2.0 {
        validation_warnings.push(
            "Short-term projection seems high - consider more conservative estimates".to_string(),
        );
        calculation_notes.push("Short time periods typically show smaller growth".to_string());
    }

    let inflation_adjusted_balance = if years > 0.0 {
        projected_balance / (1.0 + INFLATION_RATE).powf(years)
    } else {
        projected_balance
    };

    let retirement_goal_amount = annual_income * 10.0;
    let progress_to_goal = if retirement_goal_amount > 0.0 {
        (current_savings / retirement_goal_amount * 100.0).min(100.0)
    } else {
        0.0
    };

    let status = if age >= retirement_age_goal {
        "At Retirement Age"
    } else if progress_to_goal >= 80.0 {
        "On Track"
    } else if progress_to_goal >= 50.0 {
        "Good Progress"
    } else {
        "Needs Attention"
    };

    let savings_rate_percentage = if annual_income > 0.0 {
        annual_contribution / annual_income * 100.0
    } else {
        0.0
    };

    let chart_data = chart_specs(
        current_savings,
        annual_income,
        annual_contribution,
        retirement_goal_amount,
        effective_rate,
        age,
        retirement_age_goal,
    );

    ProjectionOutcome {
        current_data: CurrentData {
            current_savings,
            annual_income,
            age,
            retirement_age_goal,
            annual_contribution,
            savings_rate_percentage,
            pension_type: plan_type.label().to_string(),
        },
        projection_analysis: ProjectionAnalysis {
            years_to_retirement: years,
            projected_balance,
            inflation_adjusted_balance,
            scenario_10_percent_increase: scenario_10,
            scenario_20_percent_increase: scenario_20,
            annual_return_rate: raw_rate,
            effective_return_rate: effective_rate,
            validation_warnings,
            calculation_notes,
        },
        status: status.to_string(),
        progress_to_goal,
        retirement_goal_amount,
        chart_data,
    }
}

/// The three declarative chart specs every projection carries: a growth
/// line over the full span to the retirement goal (20x cap), a
/// current-vs-goal bar, and an income/contribution/savings bar.
fn chart_specs(
    current_savings: f64,
    annual_income: f64,
    annual_contribution: f64,
    goal_amount: f64,
    rate: f64,
    age: u32,
    retirement_age: u32,
) -> Value {
    let span_years = retirement_age.saturating_sub(age);
    let series = growth_series(
        current_savings,
        annual_contribution,
        rate,
        age,
        span_years,
        current_savings * 20.0,
    );

    json!({
        "pension_growth": {
            "$schema": "https://vega.github.io/schema/vega-lite/v5.json",
            "description": "Pension Growth Over Time",
            "data": {"values": series},
            "mark": "line",
            "encoding": {
                "x": {"field": "age", "type": "quantitative", "title": "Age"},
                "y": {"field": "projected_value", "type": "quantitative", "title": "Projected Pension Value"}
            }
        },
        "goal_progress": {
            "$schema": "https://vega.github.io/schema/vega-lite/v5.json",
            "description": "Current Savings vs Retirement Goal",
            "data": {"values": [
                {"category": "Current Savings", "amount": current_savings},
                {"category": "Goal Amount", "amount": goal_amount}
            ]},
            "mark": "bar",
            "encoding": {
                "x": {"field": "category", "type": "nominal", "title": ""},
                "y": {"field": "amount", "type": "quantitative", "title": "Amount"},
                "color": {"field": "category", "type": "nominal"}
            }
        },
        "savings_breakdown": {
            "$schema": "https://vega.github.io/schema/vega-lite/v5.json",
            "description": "Income vs Contribution vs Savings",
            "data": {"values": [
                {"category": "Annual Income", "amount": annual_income},
                {"category": "Total Contribution", "amount": annual_contribution},
                {"category": "Current Savings", "amount": current_savings}
            ]},
            "mark": "bar",
            "encoding": {
                "x": {"field": "category", "type": "nominal", "title": ""},
                "y": {"field": "amount", "type": "quantitative", "title": "Amount"},
                "color": {"field": "category", "type": "nominal"}
            }
        }
    })
}

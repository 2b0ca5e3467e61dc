//! The pension record data model and the read-only store seam.
//!
//! The relational database is external; the engine sees it as a read-only
//! view keyed by user id. [`InMemoryRecordStore`] is the reference backend
//! used by tests and single-process deployments.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use pensionflow::error::Result;

/// Authenticated-user roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Resident,
    Advisor,
    Regulator,
    Supervisor,
    Other,
}

impl Role {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "resident" => Self::Resident,
            "advisor" => Self::Advisor,
            "regulator" => Self::Regulator,
            "supervisor" => Self::Supervisor,
            _ => Self::Other,
        }
    }
}

/// A registered user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub full_name: String,
    pub email: String,
    pub role: Role,
}

/// Pension plan categories with distinct projection rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PensionType {
    DefinedContribution,
    DefinedBenefit,
    Hybrid,
}

impl PensionType {
    /// Parses the free-text plan type column. Anything that is not clearly
    /// DC or DB is projected with the conservative hybrid rules.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "defined contribution" | "dc" | "defined contribution plan" => {
                Self::DefinedContribution
            }
            "defined benefit" | "db" | "defined benefit plan" => Self::DefinedBenefit,
            _ => Self::Hybrid,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::DefinedContribution => "Defined Contribution",
            Self::DefinedBenefit => "Defined Benefit",
            Self::Hybrid => "Hybrid",
        }
    }
}

/// One pension record per resident. Every column except the key is optional:
/// the upstream import is lossy and tools substitute defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PensionRecord {
    pub user_id: i64,

    // Demographics
    pub age: Option<u32>,
    pub gender: Option<String>,
    pub country: Option<String>,
    pub employment_status: Option<String>,
    pub marital_status: Option<String>,
    pub number_of_dependents: Option<u32>,
    pub health_status: Option<String>,
    pub life_expectancy_estimate: Option<u32>,

    // Financials
    pub annual_income: Option<f64>,
    pub current_savings: Option<f64>,
    pub debt_level: Option<f64>,
    pub monthly_expenses: Option<f64>,
    pub savings_rate: Option<f64>,
    pub contribution_amount: Option<f64>,
    pub employer_contribution: Option<f64>,
    pub total_annual_contribution: Option<f64>,

    // Pension plan
    pub retirement_age_goal: Option<u32>,
    pub years_contributed: Option<u32>,
    pub pension_type: Option<String>,
    pub projected_pension_amount: Option<f64>,
    pub expected_annual_payout: Option<f64>,

    // Investments
    pub risk_tolerance: Option<String>,
    pub volatility: Option<f64>,
    pub portfolio_diversity_score: Option<f64>,
    pub annual_return_rate: Option<f64>,
    pub fees_percentage: Option<f64>,

    // Transaction / fraud signals
    pub transaction_amount: Option<f64>,
    pub suspicious_flag: Option<bool>,
    pub anomaly_score: Option<f64>,
    pub geo_location: Option<String>,
    pub ip_address: Option<String>,
    pub device_id: Option<String>,
    pub time_of_transaction: Option<DateTime<Utc>>,
    pub transaction_pattern_score: Option<f64>,
    pub previous_fraud_flag: Option<bool>,
    pub account_age: Option<u32>,
}

impl PensionRecord {
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            ..Self::default()
        }
    }

    pub fn plan_type(&self) -> PensionType {
        self.pension_type
            .as_deref()
            .map(PensionType::parse)
            .unwrap_or(PensionType::DefinedContribution)
    }

    /// The stored return rate normalized to a decimal fraction.
    ///
    /// The import writes this column as either a decimal (`0.08`) or a
    /// percentage (`8.0`); anything above 1.0 is treated as a percentage.
    /// Absent values default to 8%.
    pub fn normalized_return_rate(&self) -> f64 {
        let raw = self.annual_return_rate.unwrap_or(0.08);
        if raw > 1.0 {
            raw / 100.0
        } else {
            raw
        }
    }

    /// Combined yearly contribution: the precomputed total when present,
    /// otherwise employee plus employer amounts.
    pub fn total_contribution(&self) -> f64 {
        self.total_annual_contribution.unwrap_or_else(|| {
            self.contribution_amount.unwrap_or(0.0) + self.employer_contribution.unwrap_or(0.0)
        })
    }
}

/// Read-only view over users, pension records, and advisor/client pairs.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn user(&self, user_id: i64) -> Result<Option<User>>;

    async fn pension_record(&self, user_id: i64) -> Result<Option<PensionRecord>>;

    /// Full scan, for the regulator-only aggregation tools.
    async fn all_records(&self) -> Result<Vec<PensionRecord>>;

    /// Whether `(advisor_id, resident_id)` is a registered relationship.
    async fn is_advisor_client(&self, advisor_id: i64, resident_id: i64) -> Result<bool>;
}

/// In-memory [`RecordStore`] backend.
#[derive(Default)]
pub struct InMemoryRecordStore {
    users: RwLock<HashMap<i64, User>>,
    records: RwLock<HashMap<i64, PensionRecord>>,
    advisor_clients: RwLock<HashSet<(i64, i64)>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_user(self, user: User) -> Self {
        self.users.write().insert(user.id, user);
        self
    }

    #[must_use]
    pub fn with_record(self, record: PensionRecord) -> Self {
        self.records.write().insert(record.user_id, record);
        self
    }

    #[must_use]
    pub fn with_advisor_client(self, advisor_id: i64, resident_id: i64) -> Self {
        self.advisor_clients.write().insert((advisor_id, resident_id));
        self
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn user(&self, user_id: i64) -> Result<Option<User>> {
        Ok(self.users.read().get(&user_id).cloned())
    }

    async fn pension_record(&self, user_id: i64) -> Result<Option<PensionRecord>> {
        Ok(self.records.read().get(&user_id).cloned())
    }

    async fn all_records(&self) -> Result<Vec<PensionRecord>> {
        let mut records: Vec<_> = self.records.read().values().cloned().collect();
        records.sort_by_key(|r| r.user_id);
        Ok(records)
    }

    async fn is_advisor_client(&self, advisor_id: i64, resident_id: i64) -> Result<bool> {
        Ok(self
            .advisor_clients
            .read()
            .contains(&(advisor_id, resident_id)))
    }
}

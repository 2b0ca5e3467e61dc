//! Content-policy gate.
//!
//! A fixed regex blocklist over three out-of-domain categories. The gate is
//! deliberately coarse: it runs once on the inbound query (before any tool)
//! and once on the outbound summary, and false positives are an accepted
//! trade-off. Tightening happens here alone - the check is never replicated
//! inside tools.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Categories the assistant refuses to engage with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyCategory {
    Religious,
    Political,
    InvestmentStrategy,
}

impl PolicyCategory {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Religious => "religious",
            Self::Political => "political",
            Self::InvestmentStrategy => "investment_strategy",
        }
    }
}

const RELIGIOUS_PATTERNS: &[&str] = &[
    r"\b(pray|prayer|god|jesus|allah|buddha|hindu|islam|christian|jewish|religious|spiritual|faith|blessing|divine|heaven|hell)\b",
    r"\b(amen|hallelujah|om|namaste|shalom|salaam)\b",
    r"\b(church|mosque|temple|synagogue|worship|meditation)\b",
];

const POLITICAL_PATTERNS: &[&str] = &[
    r"\b(democrat|republican|liberal|conservative|left|right|wing|party|election|vote|campaign|politician|senator|congress|president)\b",
    r"\b(government|administration|legislation|bill|regulation)\b",
    r"\b(progressive|moderate|radical|extremist|activist|protest|rally)\b",
    r"\bpolitic\w*\b",
];

const INVESTMENT_PATTERNS: &[&str] = &[
    r"\b(buy|sell|hold|stock|shares|equity|market timing|entry point|exit point|allocation)\b",
    r"\b(day trading|swing trading|momentum|dividend|yield)\b",
    r"\b(cryptocurrency|bitcoin|ethereum|blockchain|ico|token|coin)\b",
    r"\b(real estate|mortgage|leverage)\b",
    r"\b(hedge fund|private equity|venture capital|ipo|merger|acquisition)\b",
];

/// The refusal shown when an inbound query is blocked.
pub const REFUSAL_MESSAGE: &str = "I apologize, but I cannot process this request. \
I am a pension analysis system designed to help with pension projections and \
calculations, risk assessment and portfolio analysis, and fraud detection and \
transaction monitoring. I cannot provide advice on religious matters, political \
topics, or specific investment strategies. Please rephrase your question to focus \
on pension analysis, risk assessment, or fraud detection.";

/// The phrase substituted for blocked fragments in outbound text.
pub const REDACTION_PHRASE: &str =
    "[I cannot advise on this topic; please keep questions to pension analysis, \
risk assessment, or fraud detection]";

struct CategoryPatterns {
    category: PolicyCategory,
    patterns: Vec<Regex>,
}

fn compiled_patterns() -> &'static [CategoryPatterns; 3] {
    static PATTERNS: OnceLock<[CategoryPatterns; 3]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let compile = |patterns: &[&str]| {
            patterns
                .iter()
                .map(|p| Regex::new(p).expect("policy pattern is valid"))
                .collect::<Vec<_>>()
        };
        [
            CategoryPatterns {
                category: PolicyCategory::Religious,
                patterns: compile(RELIGIOUS_PATTERNS),
            },
            CategoryPatterns {
                category: PolicyCategory::Political,
                patterns: compile(POLITICAL_PATTERNS),
            },
            CategoryPatterns {
                category: PolicyCategory::InvestmentStrategy,
                patterns: compile(INVESTMENT_PATTERNS),
            },
        ]
    })
}

/// The content-policy gate. Stateless; cheap to share.
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyGate;

impl PolicyGate {
    pub fn new() -> Self {
        Self
    }

    /// Returns the first matching category, or `None` when the text is in
    /// scope. Matching is over the lowercased text.
    pub fn check(&self, text: &str) -> Option<PolicyCategory> {
        let lower = text.to_lowercase();
        for group in compiled_patterns() {
            if group.patterns.iter().any(|p| p.is_match(&lower)) {
                return Some(group.category);
            }
        }
        None
    }

    /// Output-side filter: replaces every blocked fragment with the standard
    /// redaction phrase, leaving in-scope text untouched.
    pub fn redact(&self, text: &str) -> String {
        let mut result = text.to_string();
        for group in compiled_patterns() {
            for pattern in &group.patterns {
                if pattern.is_match(&result.to_lowercase()) {
                    // Rebuild case-insensitively so mixed-case fragments are
                    // caught too.
                    let ci =
                        Regex::new(&format!("(?i){}", pattern.as_str())).expect("pattern is valid");
                    result = ci.replace_all(&result, REDACTION_PHRASE).into_owned();
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn religious_queries_are_blocked() {
        let gate = PolicyGate::new();
        assert_eq!(
            gate.check("Should I pray before investing?"),
            Some(PolicyCategory::Religious)
        );
        assert_eq!(
            gate.check("what does my CHURCH say about savings"),
            Some(PolicyCategory::Religious)
        );
    }

    #[test]
    fn political_queries_are_blocked() {
        let gate = PolicyGate::new();
        assert_eq!(
            gate.check("which senator supports pension reform"),
            Some(PolicyCategory::Political)
        );
        assert_eq!(
            gate.check("is this political?"),
            Some(PolicyCategory::Political)
        );
    }

    #[test]
    fn investment_strategy_queries_are_blocked() {
        let gate = PolicyGate::new();
        assert_eq!(
            gate.check("should I buy bitcoin with my pension"),
            Some(PolicyCategory::InvestmentStrategy)
        );
        assert_eq!(
            gate.check("tell me about day trading"),
            Some(PolicyCategory::InvestmentStrategy)
        );
    }

    #[test]
    fn in_scope_queries_pass() {
        let gate = PolicyGate::new();
        assert_eq!(gate.check("How much will my pension be in 10 years?"), None);
        assert_eq!(gate.check("what is my risk score"), None);
        assert_eq!(gate.check("is my last transaction suspicious"), None);
        assert_eq!(gate.check(""), None);
    }

    #[test]
    fn first_matching_category_wins() {
        let gate = PolicyGate::new();
        // Religious group is checked before investment strategy.
        assert_eq!(
            gate.check("should I pray before I buy shares"),
            Some(PolicyCategory::Religious)
        );
    }

    #[test]
    fn redaction_replaces_fragments_and_keeps_the_rest() {
        let gate = PolicyGate::new();
        let redacted = gate.redact("Your balance is 50000. You should buy shares now.");
        assert!(redacted.contains("Your balance is 50000."));
        assert!(!redacted.to_lowercase().contains("buy"));
        assert!(redacted.contains(REDACTION_PHRASE));
    }

    #[test]
    fn redaction_leaves_clean_text_unchanged() {
        let gate = PolicyGate::new();
        let text = "Your projected pension is 208900 at age 43.";
        assert_eq!(gate.redact(text), text);
    }

    #[test]
    fn refusal_names_the_in_scope_topics() {
        assert!(REFUSAL_MESSAGE.contains("pension projections"));
        assert!(REFUSAL_MESSAGE.contains("risk assessment"));
        assert!(REFUSAL_MESSAGE.contains("fraud detection"));
    }
}

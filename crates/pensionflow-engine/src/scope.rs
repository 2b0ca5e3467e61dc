//! Role-scoped access resolution.
//!
//! This is the single place access scope is decided: every per-user tool
//! resolves the effective target id here before touching the database. An
//! advisor asking about a non-client silently falls back to their own data -
//! the response never reveals whether the requested id exists.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use pensionflow::error::Result;

use crate::record::{RecordStore, Role};

/// Relationship between the caller and the effective target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeContext {
    /// The caller is reading their own data.
    #[serde(rename = "self")]
    Own,
    /// The caller is reading a client's data.
    Client,
    /// The caller could not be resolved to a known role.
    Unknown,
}

/// The resolved target of a data read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeResolution {
    pub target_id: i64,
    pub context: ScopeContext,
}

fn id_patterns() -> &'static [Regex; 6] {
    static PATTERNS: OnceLock<[Regex; 6]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let compile = |pattern: &str| Regex::new(pattern).expect("id pattern is valid");
        [
            compile(r"(?i)user\s+id\s+(\d+)"),
            compile(r"(?i)for\s+user\s+id\s+(\d+)"),
            compile(r"(?i)user\s+(\d+)"),
            compile(r"(?i)client\s+(\d+)"),
            compile(r"(?i)for\s+user\s+(\d+)"),
            compile(r"(\d+)"),
        ]
    })
}

/// Extracts a candidate target id from the query. Patterns are tried in
/// order and the first match wins; a candidate equal to `caller_id` is
/// discarded (a self-reference, not a cross-user request).
pub fn extract_target_id(query: &str, caller_id: i64) -> Option<i64> {
    for pattern in id_patterns() {
        if let Some(caps) = pattern.captures(query) {
            if let Ok(id) = caps[1].parse::<i64>() {
                if id == caller_id {
                    return None;
                }
                return Some(id);
            }
        }
    }
    None
}

/// Decides whose data this query may read.
pub async fn resolve_scope(
    store: &dyn RecordStore,
    caller_id: i64,
    query: &str,
) -> Result<ScopeResolution> {
    let Some(caller) = store.user(caller_id).await? else {
        return Ok(ScopeResolution {
            target_id: caller_id,
            context: ScopeContext::Unknown,
        });
    };

    let extracted = extract_target_id(query, caller_id);

    let resolution = match caller.role {
        // Residents only ever see themselves, whatever the query says.
        Role::Resident => ScopeResolution {
            target_id: caller_id,
            context: ScopeContext::Own,
        },
        Role::Advisor => match extracted {
            Some(candidate) if store.is_advisor_client(caller_id, candidate).await? => {
                ScopeResolution {
                    target_id: candidate,
                    context: ScopeContext::Client,
                }
            }
            _ => ScopeResolution {
                target_id: caller_id,
                context: ScopeContext::Own,
            },
        },
        Role::Regulator => match extracted {
            Some(candidate) => ScopeResolution {
                target_id: candidate,
                context: ScopeContext::Client,
            },
            None => ScopeResolution {
                target_id: caller_id,
                context: ScopeContext::Own,
            },
        },
        Role::Supervisor | Role::Other => ScopeResolution {
            target_id: caller_id,
            context: ScopeContext::Unknown,
        },
    };
    Ok(resolution)
}

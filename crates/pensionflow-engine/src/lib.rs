//! PensionFlow engine - a multi-agent query-orchestration engine for a
//! pension-advice assistant.
//!
//! An authenticated user submits a natural-language query; a supervisor node
//! routes it through a cyclic graph of specialist reasoners (risk, fraud,
//! projection) that call into a shared tool set, followed by optional chart
//! generation and a summarization pass. Five concerns shape the design:
//!
//! 1. a content-policy gate that refuses out-of-domain topics before any
//!    tool runs ([`policy`]);
//! 2. role-scoped data access through a single resolver choke point
//!    ([`scope`]);
//! 3. a stateful workflow graph with an enforced turn budget ([`workflow`],
//!    [`supervisor`]);
//! 4. deterministic tool dispatch from LLM free-text output ([`agents`],
//!    [`tools`]);
//! 5. ML predictors that always degrade to rule-based heuristics instead of
//!    erroring ([`ml`]).
//!
//! External collaborators (the HTTP transport, JWT validation, the
//! relational store, PDF ingestion, the hosted LLM and embedding models)
//! stay behind the seams defined in the `pensionflow` core crate and
//! [`record::RecordStore`].

pub mod agents;
pub mod ml;
pub mod policy;
pub mod projection;
pub mod record;
pub mod response;
pub mod scope;
pub mod summarizer;
pub mod supervisor;
pub mod tools;
pub mod visualizer;
pub mod workflow;

pub use record::{InMemoryRecordStore, PensionRecord, RecordStore, Role, User};
pub use response::PromptResponse;
pub use workflow::{AgentState, EngineDeps, PensionWorkflow};

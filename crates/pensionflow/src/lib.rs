//! PensionFlow core - the building blocks the pension engine is assembled from.
//!
//! This crate carries everything that is not pension-specific:
//!
//! - [`graph`]: a stateful workflow graph (`StateGraph` / `CompiledGraph`)
//!   driven as a loop over named nodes, with conditional routing and a
//!   terminal [`END`] sentinel.
//! - [`messages`]: the chat transcript model shared by every node.
//! - [`language_models`]: the [`ChatModel`](language_models::ChatModel) seam
//!   behind which a hosted LLM lives.
//! - [`embeddings`]: the [`Embeddings`](embeddings::Embeddings) seam plus a
//!   deterministic in-process embedder for tests.
//! - [`vector_stores`]: a persistent, in-process vector store with named
//!   collections and nearest-neighbor queries.
//! - [`tools`]: the [`Tool`](tools::Tool) trait and the input-coercion
//!   helpers every tool shares.
//! - [`context`]: per-request ambient storage of the caller identity.

pub mod context;
pub mod embeddings;
pub mod error;
pub mod graph;
pub mod language_models;
pub mod messages;
pub mod tools;
pub mod vector_stores;

pub use error::{Error, Result};
pub use graph::{CompiledGraph, ExecutionResult, MergeableState, StateGraph, END};
pub use messages::Message;

//! Stateful workflow graph.
//!
//! A [`StateGraph`] is a table of named async nodes plus direct and
//! conditional edges. [`StateGraph::compile`] validates the wiring and
//! returns a [`CompiledGraph`] whose `invoke` drives the state through the
//! graph as a plain loop on the current node name - back-edges (cycles) are
//! ordinary routing, not recursion, so a turn budget enforced by a routing
//! node is the only thing standing between a cyclic graph and the engine's
//! own step ceiling.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, Result};

/// Terminal sentinel: routing here ends the run.
pub const END: &str = "__end__";

/// Hard ceiling on node executions per invocation. A backstop beneath any
/// domain-level budget; hitting it means a routing bug.
const MAX_STEPS: usize = 64;

/// State that can flow through a graph.
///
/// `merge` defines how a state absorbs another: sequence fields append,
/// scalar fields overwrite. Serial execution passes whole states between
/// nodes, so `merge` is exercised by state-assembly code and tests rather
/// than the scheduler itself.
pub trait MergeableState: Clone + Send + Sync + 'static {
    fn merge(&mut self, other: &Self);
}

type NodeFuture<S> = Pin<Box<dyn Future<Output = Result<S>> + Send>>;
type NodeFn<S> = Arc<dyn Fn(S) -> NodeFuture<S> + Send + Sync>;
type SelectorFn<S> = Arc<dyn Fn(&S) -> String + Send + Sync>;

enum Edge<S> {
    Direct(String),
    Conditional {
        selector: SelectorFn<S>,
        routes: HashMap<String, String>,
    },
}

/// Builder for a workflow graph.
pub struct StateGraph<S: MergeableState> {
    nodes: HashMap<String, NodeFn<S>>,
    edges: HashMap<String, Edge<S>>,
    entry_point: Option<String>,
}

impl<S: MergeableState> Default for StateGraph<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: MergeableState> StateGraph<S> {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            edges: HashMap::new(),
            entry_point: None,
        }
    }

    /// Registers a node from an async closure. Later registrations under the
    /// same name replace earlier ones.
    pub fn add_node_from_fn<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(S) -> NodeFuture<S> + Send + Sync + 'static,
    {
        self.nodes.insert(name.into(), Arc::new(f));
        self
    }

    /// Adds an unconditional edge. The target may be [`END`].
    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        self.edges.insert(from.into(), Edge::Direct(to.into()));
        self
    }

    /// Adds a conditional edge: `selector` maps the state to a route key,
    /// `routes` maps keys to node names (or [`END`]).
    pub fn add_conditional_edges<F>(
        &mut self,
        from: impl Into<String>,
        selector: F,
        routes: HashMap<String, String>,
    ) -> &mut Self
    where
        F: Fn(&S) -> String + Send + Sync + 'static,
    {
        self.edges.insert(
            from.into(),
            Edge::Conditional {
                selector: Arc::new(selector),
                routes,
            },
        );
        self
    }

    pub fn set_entry_point(&mut self, name: impl Into<String>) -> &mut Self {
        self.entry_point = Some(name.into());
        self
    }

    /// Validates the wiring and produces an executable graph.
    pub fn compile(self) -> Result<CompiledGraph<S>> {
        let entry_point = self
            .entry_point
            .clone()
            .ok_or_else(|| Error::graph("no entry point set"))?;
        if !self.nodes.contains_key(&entry_point) {
            return Err(Error::graph(format!(
                "entry point '{entry_point}' is not a registered node"
            )));
        }

        let check_target = |from: &str, target: &str| -> Result<()> {
            if target != END && !self.nodes.contains_key(target) {
                return Err(Error::graph(format!(
                    "edge from '{from}' targets unknown node '{target}'"
                )));
            }
            Ok(())
        };
        for (from, edge) in &self.edges {
            if !self.nodes.contains_key(from) {
                return Err(Error::graph(format!(
                    "edge source '{from}' is not a registered node"
                )));
            }
            match edge {
                Edge::Direct(to) => check_target(from, to)?,
                Edge::Conditional { routes, .. } => {
                    for to in routes.values() {
                        check_target(from, to)?;
                    }
                }
            }
        }

        Ok(CompiledGraph {
            nodes: self.nodes,
            edges: self.edges,
            entry_point,
        })
    }
}

/// The outcome of a graph invocation.
#[derive(Debug)]
pub struct ExecutionResult<S> {
    /// The state after the final node ran.
    pub final_state: S,
    execution_path: Vec<String>,
}

impl<S> ExecutionResult<S> {
    pub fn state(&self) -> &S {
        &self.final_state
    }

    /// Node names in execution order.
    pub fn execution_path(&self) -> &[String] {
        &self.execution_path
    }
}

/// A validated, executable workflow graph.
pub struct CompiledGraph<S: MergeableState> {
    nodes: HashMap<String, NodeFn<S>>,
    edges: HashMap<String, Edge<S>>,
    entry_point: String,
}

impl<S: MergeableState> CompiledGraph<S> {
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Drives `state` through the graph until a route reaches [`END`].
    pub async fn invoke(&self, state: S) -> Result<ExecutionResult<S>> {
        let mut current = self.entry_point.clone();
        let mut state = state;
        let mut execution_path = Vec::new();

        for _ in 0..MAX_STEPS {
            let node = self
                .nodes
                .get(&current)
                .map(Arc::clone)
                .ok_or_else(|| Error::graph(format!("unknown node '{current}'")))?;

            debug!(node = %current, "executing graph node");
            state = node(state).await?;
            execution_path.push(current.clone());

            let next = match self.edges.get(&current) {
                None => END.to_string(),
                Some(Edge::Direct(to)) => to.clone(),
                Some(Edge::Conditional { selector, routes }) => {
                    let key = (selector.as_ref())(&state);
                    routes
                        .get(&key)
                        .cloned()
                        .ok_or_else(|| {
                            Error::graph(format!(
                                "node '{current}' selected unmapped route '{key}'"
                            ))
                        })?
                }
            };

            if next == END {
                return Ok(ExecutionResult {
                    final_state: state,
                    execution_path,
                });
            }
            current = next;
        }

        Err(Error::graph(format!(
            "exceeded {MAX_STEPS} steps without reaching END"
        )))
    }
}

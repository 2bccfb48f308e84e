use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::GraphError;

use super::context::ExecutionContext;

/// An `Action` node performs side-effects against the [`ExecutionContext`]
/// (§3, §4.9).
#[async_trait]
pub trait Action: Send + Sync {
    async fn run(&self, ctx: &ExecutionContext) -> Result<(), GraphError>;
}

/// A `Decision` node returns the name of the next node to run.
#[async_trait]
pub trait Decision: Send + Sync {
    async fn decide(&self, ctx: &ExecutionContext) -> Result<String, GraphError>;
}

/// Guards an outgoing transition from an `Action` node. Evaluated in
/// declaration order; `Always` acts as the node's (at most one) default
/// edge.
pub enum Guard {
    Always,
    Predicate(Box<dyn Fn(&ExecutionContext) -> bool + Send + Sync>),
}

impl Guard {
    fn matches(&self, ctx: &ExecutionContext) -> bool {
        match self {
            Guard::Always => true,
            Guard::Predicate(predicate) => predicate(ctx),
        }
    }

    fn is_default(&self) -> bool {
        matches!(self, Guard::Always)
    }
}

struct Transition {
    to: String,
    guard: Guard,
}

enum NodeKind {
    Action(Arc<dyn Action>),
    Decision(Arc<dyn Decision>),
    /// Fans out to `branches` concurrently; each branch runs until it would
    /// transition into `join`, at which point it stops and waits at the
    /// barrier. `join` itself only runs once all branches have arrived.
    Parallel { branches: Vec<String>, join: String },
}

/// Declarative DAG of action/decision/parallel nodes over a shared
/// [`ExecutionContext`] (§4.9). Cycles are not supported; `Close()`
/// validates reachability and declares the graph immutable.
pub struct Graph {
    nodes: HashMap<String, NodeKind>,
    transitions: HashMap<String, Vec<Transition>>,
    /// Declared possible destinations of `Decision` nodes, kept separately
    /// from `transitions` since they carry no guard and exist purely so
    /// `Close()` can compute reachability over dynamic routing (§4.9).
    decision_routes: HashMap<String, Vec<String>>,
    start: Option<String>,
    closed: bool,
    branch_timeout: Option<Duration>,
}

impl Graph {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            transitions: HashMap::new(),
            decision_routes: HashMap::new(),
            start: None,
            closed: false,
            branch_timeout: None,
        }
    }

    /// Bounds how long each `Parallel` node's branches may run before
    /// `execute` surfaces [`GraphError::BranchTimeout`] for the slow ones
    /// (§10.3 `workflow_branch_timeout_ms`). Unset graphs run branches
    /// unbounded.
    pub fn set_branch_timeout(&mut self, timeout: Duration) {
        self.branch_timeout = Some(timeout);
    }

    pub(super) fn branch_timeout(&self) -> Option<Duration> {
        self.branch_timeout
    }

    pub fn add_action(&mut self, name: impl Into<String>, action: Arc<dyn Action>) -> Result<(), GraphError> {
        self.insert_node(name.into(), NodeKind::Action(action))
    }

    pub fn add_decision(&mut self, name: impl Into<String>, decision: Arc<dyn Decision>) -> Result<(), GraphError> {
        self.insert_node(name.into(), NodeKind::Decision(decision))
    }

    pub fn add_parallel(
        &mut self,
        name: impl Into<String>,
        branches: Vec<String>,
        join: impl Into<String>,
    ) -> Result<(), GraphError> {
        self.insert_node(
            name.into(),
            NodeKind::Parallel {
                branches,
                join: join.into(),
            },
        )
    }

    fn insert_node(&mut self, name: String, kind: NodeKind) -> Result<(), GraphError> {
        if self.closed {
            return Err(GraphError::AlreadyClosed);
        }
        self.nodes.insert(name, kind);
        Ok(())
    }

    pub fn set_start(&mut self, name: impl Into<String>) -> Result<(), GraphError> {
        if self.closed {
            return Err(GraphError::AlreadyClosed);
        }
        self.start = Some(name.into());
        Ok(())
    }

    pub fn add_transition(&mut self, from: impl Into<String>, to: impl Into<String>, guard: Guard) -> Result<(), GraphError> {
        if self.closed {
            return Err(GraphError::AlreadyClosed);
        }
        let from = from.into();
        let to = to.into();

        if guard.is_default() {
            let has_default = self
                .transitions
                .get(&from)
                .map(|edges| edges.iter().any(|t| t.guard.is_default()))
                .unwrap_or(false);
            if has_default {
                return Err(GraphError::MultipleDefaultTransitions(from));
            }
        }

        self.transitions.entry(from).or_default().push(Transition { to, guard });
        Ok(())
    }

    /// Declares a possible destination of a `Decision` node, for reachability
    /// purposes only; `Execute` still consults `Decision::decide` at runtime
    /// and errors if it names a node outside the graph, declared or not.
    pub fn add_decision_route(&mut self, from: impl Into<String>, to: impl Into<String>) -> Result<(), GraphError> {
        if self.closed {
            return Err(GraphError::AlreadyClosed);
        }
        self.decision_routes.entry(from.into()).or_default().push(to.into());
        Ok(())
    }

    /// Validates the graph and declares it immutable. Checks: exactly one
    /// start node, every referenced node exists, and every parallel branch
    /// is reachable from start.
    pub fn close(&mut self) -> Result<(), GraphError> {
        let start = self.start.clone().ok_or(GraphError::NoStartNode)?;
        if !self.nodes.contains_key(&start) {
            return Err(GraphError::UnknownNode(start));
        }

        for (from, edges) in &self.transitions {
            if !self.nodes.contains_key(from) {
                return Err(GraphError::UnknownNode(from.clone()));
            }
            for edge in edges {
                if !self.nodes.contains_key(&edge.to) {
                    return Err(GraphError::UnknownNode(edge.to.clone()));
                }
            }
        }
        for (from, targets) in &self.decision_routes {
            if !self.nodes.contains_key(from) {
                return Err(GraphError::UnknownNode(from.clone()));
            }
            for to in targets {
                if !self.nodes.contains_key(to) {
                    return Err(GraphError::UnknownNode(to.clone()));
                }
            }
        }

        let reachable = self.reachable_from(&start);
        for (name, kind) in &self.nodes {
            if let NodeKind::Parallel { branches, join } = kind {
                if !reachable.contains(name) {
                    return Err(GraphError::UnreachableBranch(name.clone()));
                }
                for branch in branches {
                    if !self.nodes.contains_key(branch) {
                        return Err(GraphError::UnknownNode(branch.clone()));
                    }
                }
                if !self.nodes.contains_key(join) {
                    return Err(GraphError::UnknownNode(join.clone()));
                }
            }
        }

        self.closed = true;
        Ok(())
    }

    fn reachable_from(&self, start: &str) -> HashSet<String> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(start.to_string());
        seen.insert(start.to_string());

        while let Some(node) = queue.pop_front() {
            let mut neighbors = Vec::new();
            if let Some(edges) = self.transitions.get(&node) {
                neighbors.extend(edges.iter().map(|t| t.to.clone()));
            }
            if let Some(targets) = self.decision_routes.get(&node) {
                neighbors.extend(targets.iter().cloned());
            }
            if let Some(NodeKind::Parallel { branches, join }) = self.nodes.get(&node) {
                neighbors.extend(branches.iter().cloned());
                neighbors.push(join.clone());
            }
            for next in neighbors {
                if seen.insert(next.clone()) {
                    queue.push_back(next);
                }
            }
        }
        seen
    }

    pub(super) fn start_node(&self) -> &str {
        self.start.as_deref().expect("graph closed implies a start node")
    }

    pub(super) fn next_after_action(&self, from: &str, ctx: &ExecutionContext) -> Result<Option<String>, GraphError> {
        let edges = match self.transitions.get(from) {
            Some(edges) => edges,
            None => return Ok(None),
        };
        for edge in edges {
            if edge.guard.matches(ctx) {
                return Ok(Some(edge.to.clone()));
            }
        }
        if edges.is_empty() {
            Ok(None)
        } else {
            Err(GraphError::NoTransition(from.to_string()))
        }
    }

    pub(super) fn node_kind(&self, name: &str) -> Option<NodeKindRef<'_>> {
        self.nodes.get(name).map(|kind| match kind {
            NodeKind::Action(action) => NodeKindRef::Action(action),
            NodeKind::Decision(decision) => NodeKindRef::Decision(decision),
            NodeKind::Parallel { branches, join } => NodeKindRef::Parallel { branches, join },
        })
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

pub(super) enum NodeKindRef<'a> {
    Action(&'a Arc<dyn Action>),
    Decision(&'a Arc<dyn Decision>),
    Parallel { branches: &'a [String], join: &'a str },
}

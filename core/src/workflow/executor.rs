use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::task::JoinSet;

use crate::error::GraphError;

use super::context::ExecutionContext;
use super::graph::Graph;
use super::graph::NodeKindRef;

/// Walks `graph` starting at its start node until it reaches a node with no
/// outgoing transition left (§4.9). Parallel nodes fan out their branches
/// concurrently via a `JoinSet` and converge at the declared join node.
pub async fn execute(graph: &Arc<Graph>, ctx: &Arc<ExecutionContext>) -> Result<(), GraphError> {
    let mut current = graph.start_node().to_string();
    loop {
        match run_node(graph, &current, ctx).await? {
            Some(next) => current = next,
            None => return Ok(()),
        }
    }
}

fn run_node<'a>(
    graph: &'a Arc<Graph>,
    name: &'a str,
    ctx: &'a Arc<ExecutionContext>,
) -> Pin<Box<dyn Future<Output = Result<Option<String>, GraphError>> + Send + 'a>> {
    Box::pin(async move {
        match graph.node_kind(name).ok_or_else(|| GraphError::UnknownNode(name.to_string()))? {
            NodeKindRef::Action(action) => {
                action.run(ctx).await?;
                graph.next_after_action(name, ctx)
            }
            NodeKindRef::Decision(decision) => {
                let next = decision.decide(ctx).await?;
                if graph.node_kind(&next).is_none() {
                    return Err(GraphError::UnknownDecisionTarget(name.to_string(), next));
                }
                Ok(Some(next))
            }
            NodeKindRef::Parallel { branches, join } => {
                run_parallel(graph, branches, ctx).await?;
                Ok(Some(join.to_string()))
            }
        }
    })
}

/// Runs every branch to completion concurrently, tie-breaking declaration
/// order when collecting results; the join node itself only runs once every
/// branch's sub-walk has reached its own terminal node. A branch task that
/// panics aborts the remaining siblings immediately; a branch that returns
/// its own `GraphError` is awaited alongside its siblings and reported after
/// all of them finish, in declaration order. When the graph carries a
/// `branch_timeout`, a branch still running past it is reported as
/// `GraphError::BranchTimeout` rather than left running.
async fn run_parallel(graph: &Arc<Graph>, branches: &[String], ctx: &Arc<ExecutionContext>) -> Result<(), GraphError> {
    let timeout = graph.branch_timeout();
    let mut set = JoinSet::new();
    for (index, branch) in branches.iter().enumerate() {
        let graph = Arc::clone(graph);
        let ctx = Arc::clone(ctx);
        let branch = branch.clone();
        set.spawn(async move {
            let walk = walk_branch(&graph, branch.clone(), &ctx);
            let result = match timeout {
                Some(limit) => match tokio::time::timeout(limit, walk).await {
                    Ok(result) => result,
                    Err(_) => Err(GraphError::BranchTimeout(branch)),
                },
                None => walk.await,
            };
            (index, result)
        });
    }

    let mut results: Vec<(usize, Result<(), GraphError>)> = Vec::with_capacity(branches.len());
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(pair) => results.push(pair),
            Err(join_err) => {
                set.abort_all();
                return Err(GraphError::BranchFailed(join_err.to_string()));
            }
        }
    }

    results.sort_by_key(|(index, _)| *index);
    for (_, result) in results {
        result?;
    }
    Ok(())
}

async fn walk_branch(graph: &Arc<Graph>, start: String, ctx: &Arc<ExecutionContext>) -> Result<(), GraphError> {
    let mut current = start;
    loop {
        match run_node(graph, &current, ctx).await? {
            Some(next) => current = next,
            None => return Ok(()),
        }
    }
}

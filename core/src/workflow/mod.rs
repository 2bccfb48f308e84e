mod context;
mod executor;
mod graph;

pub use context::ExecutionContext;
pub use executor::execute;
pub use graph::Action;
pub use graph::Decision;
pub use graph::Graph;
pub use graph::Guard;

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::error::GraphError;

    struct Collect;

    #[async_trait]
    impl Action for Collect {
        async fn run(&self, ctx: &ExecutionContext) -> Result<(), GraphError> {
            ctx.set("collected", json!(true));
            Ok(())
        }
    }

    /// Returns "manual" or "auto" depending on initial data, mirroring a
    /// workflow that routes approval review based on requester trust.
    struct RouteByTrust;

    #[async_trait]
    impl Decision for RouteByTrust {
        async fn decide(&self, ctx: &ExecutionContext) -> Result<String, GraphError> {
            let trusted = ctx.get("trusted").and_then(|v| v.as_bool()).unwrap_or(false);
            Ok(if trusted { "auto".to_string() } else { "manual".to_string() })
        }
    }

    struct Manual;

    #[async_trait]
    impl Action for Manual {
        async fn run(&self, ctx: &ExecutionContext) -> Result<(), GraphError> {
            ctx.set("reviewed_by", json!("manual"));
            Ok(())
        }
    }

    struct Auto;

    #[async_trait]
    impl Action for Auto {
        async fn run(&self, ctx: &ExecutionContext) -> Result<(), GraphError> {
            ctx.set("reviewed_by", json!("auto"));
            Ok(())
        }
    }

    /// Notifies one recipient, recording delivery into a shared log so the
    /// test can assert both branches of the parallel node actually ran.
    struct Notify {
        recipient: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
        delay: Duration,
    }

    #[async_trait]
    impl Action for Notify {
        async fn run(&self, _ctx: &ExecutionContext) -> Result<(), GraphError> {
            tokio::time::sleep(self.delay).await;
            self.log.lock().expect("log lock").push(self.recipient);
            Ok(())
        }
    }

    struct Summarize {
        calls: Arc<std::sync::atomic::AtomicUsize>,
    }

    #[async_trait]
    impl Action for Summarize {
        async fn run(&self, ctx: &ExecutionContext) -> Result<(), GraphError> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            ctx.set("summarized", json!(true));
            Ok(())
        }
    }

    /// Exercises the collect -> decide -> (manual|auto) -> notify_all
    /// -> summarize shape: a fan-out to two notification branches that must
    /// both complete before the single summarize action runs.
    #[tokio::test]
    async fn parallel_notify_converges_before_summarize_runs_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let summarize_calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let mut graph = Graph::new();
        graph.add_action("collect", Arc::new(Collect)).expect("add collect");
        graph.add_decision("decide", Arc::new(RouteByTrust)).expect("add decide");
        graph.add_action("manual", Arc::new(Manual)).expect("add manual");
        graph.add_action("auto", Arc::new(Auto)).expect("add auto");
        graph
            .add_parallel(
                "notify_all",
                vec!["notify_finance".to_string(), "notify_owner".to_string()],
                "summarize",
            )
            .expect("add parallel");
        graph
            .add_action(
                "notify_finance",
                Arc::new(Notify {
                    recipient: "finance",
                    log: log.clone(),
                    delay: Duration::from_millis(30),
                }),
            )
            .expect("add notify_finance");
        graph
            .add_action(
                "notify_owner",
                Arc::new(Notify {
                    recipient: "owner",
                    log: log.clone(),
                    delay: Duration::from_millis(30),
                }),
            )
            .expect("add notify_owner");
        graph
            .add_action(
                "summarize",
                Arc::new(Summarize {
                    calls: summarize_calls.clone(),
                }),
            )
            .expect("add summarize");

        graph.add_transition("collect", "decide", Guard::Always).expect("transition");
        graph.add_decision_route("decide", "manual").expect("decision route");
        graph.add_decision_route("decide", "auto").expect("decision route");
        graph.add_transition("manual", "notify_all", Guard::Always).expect("transition");
        graph.add_transition("auto", "notify_all", Guard::Always).expect("transition");
        graph.set_start("collect").expect("set start");
        graph.close().expect("close");

        let graph = Arc::new(graph);
        let ctx = Arc::new(ExecutionContext::with_initial_data(HashMap::from([(
            "trusted".to_string(),
            json!(false),
        )])));

        let started = tokio::time::Instant::now();
        execute(&graph, &ctx).await.expect("execute");
        let elapsed = started.elapsed();

        assert!(elapsed < Duration::from_millis(55), "branches should run concurrently, took {elapsed:?}");
        assert_eq!(summarize_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(ctx.get("reviewed_by"), Some(json!("manual")));
        assert_eq!(ctx.get("summarized"), Some(json!(true)));

        let mut delivered = log.lock().expect("log lock").clone();
        delivered.sort();
        assert_eq!(delivered, vec!["finance", "owner"]);
    }

    #[tokio::test]
    async fn close_rejects_unreachable_parallel_branch() {
        let mut graph = Graph::new();
        graph.add_action("start", Arc::new(Collect)).expect("add start");
        graph
            .add_parallel("fanout", vec!["orphan".to_string()], "join")
            .expect("add parallel");
        graph.add_action("orphan", Arc::new(Collect)).expect("add orphan");
        graph.add_action("join", Arc::new(Collect)).expect("add join");
        graph.set_start("start").expect("set start");

        let err = graph.close().expect_err("fanout unreachable from start");
        assert!(matches!(err, GraphError::UnreachableBranch(ref name) if name == "fanout"));
    }

    #[tokio::test]
    async fn action_with_no_matching_guard_and_no_default_errors() {
        struct AlwaysFalse;
        #[async_trait]
        impl Action for AlwaysFalse {
            async fn run(&self, _ctx: &ExecutionContext) -> Result<(), GraphError> {
                Ok(())
            }
        }

        let mut graph = Graph::new();
        graph.add_action("a", Arc::new(AlwaysFalse)).expect("add a");
        graph.add_action("b", Arc::new(AlwaysFalse)).expect("add b");
        graph
            .add_transition("a", "b", Guard::Predicate(Box::new(|_| false)))
            .expect("transition");
        graph.set_start("a").expect("set start");
        graph.close().expect("close");

        let graph = Arc::new(graph);
        let ctx = Arc::new(ExecutionContext::new());
        let err = execute(&graph, &ctx).await.expect_err("no transition matches");
        assert!(matches!(err, GraphError::NoTransition(ref name) if name == "a"));
    }

    #[tokio::test]
    async fn slow_branch_times_out_without_blocking_the_fast_one() {
        struct Sleep {
            delay: Duration,
        }

        #[async_trait]
        impl Action for Sleep {
            async fn run(&self, _ctx: &ExecutionContext) -> Result<(), GraphError> {
                tokio::time::sleep(self.delay).await;
                Ok(())
            }
        }

        let mut graph = Graph::new();
        graph.set_branch_timeout(Duration::from_millis(20));
        graph.add_action("start", Arc::new(Collect)).expect("add start");
        graph
            .add_parallel("fanout", vec!["slow".to_string(), "fast".to_string()], "join")
            .expect("add parallel");
        graph
            .add_action("slow", Arc::new(Sleep { delay: Duration::from_millis(200) }))
            .expect("add slow");
        graph
            .add_action("fast", Arc::new(Sleep { delay: Duration::from_millis(1) }))
            .expect("add fast");
        graph.add_action("join", Arc::new(Collect)).expect("add join");
        graph.add_transition("start", "fanout", Guard::Always).expect("transition");
        graph.set_start("start").expect("set start");
        graph.close().expect("close");

        let graph = Arc::new(graph);
        let ctx = Arc::new(ExecutionContext::new());
        let err = execute(&graph, &ctx).await.expect_err("slow branch should time out");
        assert!(matches!(err, GraphError::BranchTimeout(ref name) if name == "slow"));
    }

    #[tokio::test]
    async fn adding_a_second_default_transition_is_rejected() {
        let mut graph = Graph::new();
        graph.add_action("a", Arc::new(Collect)).expect("add a");
        graph.add_action("b", Arc::new(Collect)).expect("add b");
        graph.add_action("c", Arc::new(Collect)).expect("add c");
        graph.add_transition("a", "b", Guard::Always).expect("first default");

        let err = graph
            .add_transition("a", "c", Guard::Always)
            .expect_err("second default should be rejected");
        assert!(matches!(err, GraphError::MultipleDefaultTransitions(ref name) if name == "a"));
    }
}

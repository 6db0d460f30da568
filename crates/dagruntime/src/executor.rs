use crate::Dag;
use chrono::Utc;
use dagcore::{
    DagError, DagState, EventBus, ExecutionContext, ExecutionEvent, ExecutionResult, NodeError,
    NodeHandle, NodeState,
};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;

/// Default bound on concurrently running nodes
pub const DEFAULT_MAX_PARALLEL: usize = 4;

/// Per-node results of one run, keyed by node id
pub type RunResults = HashMap<String, ExecutionResult>;

/// Runs a DAG frontier by frontier with bounded parallelism
pub struct DagExecutor {
    max_parallel: usize,
    events: Option<Arc<EventBus>>,
}

impl DagExecutor {
    pub fn new(max_parallel: usize) -> Self {
        let max_parallel = if max_parallel == 0 {
            tracing::warn!("max_parallel of 0 would never make progress; using 1");
            1
        } else {
            max_parallel
        };

        Self {
            max_parallel,
            events: None,
        }
    }

    /// Publish run and node lifecycle events on `bus`
    pub fn with_events(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    /// Execute every node of `dag` once.
    ///
    /// Node failures are contained in the returned map. Errors are returned
    /// only when validation fails (nothing runs) or when the run stalls
    /// because every unresolved node sits behind a failure.
    pub async fn execute(
        &self,
        dag: &mut Dag,
        context: &ExecutionContext,
    ) -> Result<RunResults, DagError> {
        let start_time = Instant::now();
        let run_id = context.run_id.clone();

        dag.set_state(DagState::Running);
        self.emit(|| ExecutionEvent::RunStarted {
            run_id: run_id.clone(),
            dag_id: dag.id().to_string(),
            total_nodes: dag.len(),
            timestamp: Utc::now(),
        });
        tracing::info!("Starting run {} of DAG {} ({} nodes)", run_id, dag.id(), dag.len());

        let issues = dag.validate();
        if !issues.is_empty() {
            tracing::error!("DAG {} failed validation: {:?}", dag.id(), issues);
            self.finish(dag, DagState::Failed, &run_id, start_time);
            return Err(DagError::Validation(issues));
        }

        let total = dag.len();
        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let mut completed: HashSet<String> = HashSet::new();
        let mut failed: HashSet<String> = HashSet::new();
        let mut results = RunResults::new();

        while completed.len() + failed.len() < total {
            let ready = dag.get_ready_nodes(&completed);

            if ready.is_empty() {
                let remaining = self.skip_blocked(dag, &run_id, &completed, &mut results);
                tracing::error!(
                    "Run {} stalled: no ready nodes, {} unresolved ({:?})",
                    run_id,
                    remaining.len(),
                    remaining
                );
                self.finish(dag, DagState::Failed, &run_id, start_time);
                return Err(DagError::Stalled { remaining, results });
            }

            tracing::debug!(
                "Dispatching {} ready nodes (max_parallel = {})",
                ready.len(),
                self.max_parallel
            );

            let mut running = FuturesUnordered::new();
            for node in ready {
                let upstream = node
                    .dependencies()
                    .iter()
                    .filter_map(|dep| results.get(dep))
                    .filter(|result| result.state == NodeState::Completed)
                    .map(|result| &result.outputs);
                let ctx = context.for_invocation(upstream);

                let node_id = node.id().to_string();
                let task = tokio::spawn(run_node(
                    node,
                    ctx,
                    Arc::clone(&semaphore),
                    self.events.clone(),
                ));
                running.push(async move { (node_id, task.await) });
            }

            while let Some((node_id, joined)) = running.next().await {
                let mut result = match joined {
                    Ok(result) => result,
                    Err(e) => {
                        let error = if e.is_panic() {
                            NodeError::from_panic(e.into_panic())
                        } else {
                            NodeError::ExecutionFailed(e.to_string())
                        };
                        ExecutionResult::failed(&node_id, error.to_string())
                    }
                };
                result.node_id = node_id.clone();
                if !matches!(result.state, NodeState::Completed | NodeState::Failed) {
                    result.state = NodeState::Failed;
                }

                if let Some(node) = dag.node(&node_id) {
                    node.set_state(result.state);
                }

                if result.state == NodeState::Completed {
                    tracing::debug!("Node {} completed in {}ms", node_id, result.execution_time_ms);
                    self.emit(|| ExecutionEvent::NodeCompleted {
                        run_id: run_id.clone(),
                        node_id: node_id.clone(),
                        duration_ms: result.execution_time_ms,
                        timestamp: Utc::now(),
                    });
                    completed.insert(node_id.clone());
                } else {
                    let error = result.error.clone().unwrap_or_default();
                    tracing::warn!("Node {} failed: {}", node_id, error);
                    self.emit(|| ExecutionEvent::NodeFailed {
                        run_id: run_id.clone(),
                        node_id: node_id.clone(),
                        error,
                        timestamp: Utc::now(),
                    });
                    failed.insert(node_id.clone());
                }

                results.insert(node_id, result);
            }
        }

        let state = if failed.is_empty() {
            DagState::Completed
        } else {
            DagState::Failed
        };
        self.finish(dag, state, &run_id, start_time);

        Ok(results)
    }

    /// Mark every unresolved node SKIPPED and record why
    fn skip_blocked(
        &self,
        dag: &Dag,
        run_id: &str,
        completed: &HashSet<String>,
        results: &mut RunResults,
    ) -> Vec<String> {
        let remaining: Vec<&NodeHandle> = dag
            .nodes()
            .filter(|node| !results.contains_key(node.id()))
            .collect();

        for node in &remaining {
            let blocking: Vec<&str> = node
                .dependencies()
                .iter()
                .filter(|dep| !completed.contains(*dep))
                .map(String::as_str)
                .collect();
            let reason = if blocking.is_empty() {
                format!("Node was not pending (state: {})", node.state())
            } else {
                format!("Upstream dependencies did not complete: {}", blocking.join(", "))
            };

            node.set_state(NodeState::Skipped);
            self.emit(|| ExecutionEvent::NodeSkipped {
                run_id: run_id.to_string(),
                node_id: node.id().to_string(),
                reason: reason.clone(),
                timestamp: Utc::now(),
            });
            results.insert(node.id().to_string(), ExecutionResult::skipped(node.id(), reason));
        }

        remaining.iter().map(|node| node.id().to_string()).collect()
    }

    fn finish(&self, dag: &mut Dag, state: DagState, run_id: &str, start_time: Instant) {
        dag.set_state(state);
        let duration_ms = start_time.elapsed().as_millis() as u64;

        self.emit(|| ExecutionEvent::RunCompleted {
            run_id: run_id.to_string(),
            dag_id: dag.id().to_string(),
            state,
            duration_ms,
            timestamp: Utc::now(),
        });
        tracing::info!("Run {} of DAG {} finished {} in {}ms", run_id, dag.id(), state, duration_ms);
    }

    fn emit(&self, event: impl FnOnce() -> ExecutionEvent) {
        if let Some(bus) = &self.events {
            bus.emit(event());
        }
    }
}

impl Default for DagExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PARALLEL)
    }
}

/// Wait for a permit, then run the node. The permit is held until the
/// node's result is ready.
async fn run_node(
    node: NodeHandle,
    ctx: ExecutionContext,
    semaphore: Arc<Semaphore>,
    events: Option<Arc<EventBus>>,
) -> ExecutionResult {
    let _permit = match semaphore.acquire_owned().await {
        Ok(permit) => permit,
        Err(e) => return ExecutionResult::failed(node.id(), e.to_string()),
    };

    node.set_state(NodeState::Running);
    if let Some(bus) = &events {
        bus.emit(ExecutionEvent::NodeStarted {
            run_id: ctx.run_id.clone(),
            node_id: node.id().to_string(),
            node_type: node.node_type().to_string(),
            timestamp: Utc::now(),
        });
    }
    tracing::debug!("Node {} started", node.id());

    node.node().execute(ctx).await
}

impl Dag {
    /// Execute the DAG with at most `max_parallel` nodes in flight
    pub async fn execute(
        &mut self,
        context: &ExecutionContext,
        max_parallel: usize,
    ) -> Result<RunResults, DagError> {
        DagExecutor::new(max_parallel).execute(self, context).await
    }
}

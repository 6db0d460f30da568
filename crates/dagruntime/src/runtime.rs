use crate::executor::{DagExecutor, RunResults, DEFAULT_MAX_PARALLEL};
use crate::registry::NodeRegistry;
use crate::Dag;
use dagcore::{DagDefinition, DagError, EventBus, ExecutionContext, ExecutionEvent};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Builds DAGs from definitions and runs them with shared settings
pub struct DagRuntime {
    registry: Arc<NodeRegistry>,
    event_bus: Arc<EventBus>,
    config: RuntimeConfig,
}

impl DagRuntime {
    /// Create a runtime with an empty registry and default settings
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Self::with_registry(Arc::new(NodeRegistry::new()), config)
    }

    /// Create a runtime with a pre-configured registry
    pub fn with_registry(registry: Arc<NodeRegistry>, config: RuntimeConfig) -> Self {
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));

        Self {
            registry,
            event_bus,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Instantiate every node through the registry and wire the edges.
    ///
    /// Edges go through `Dag::add_edge`, so unknown ids and cycles are
    /// rejected here rather than at run time.
    pub fn build(&self, definition: &DagDefinition) -> Result<Dag, DagError> {
        let mut dag = Dag::new(definition.dag_id.clone());
        dag.metadata = definition.metadata.clone();

        for config in &definition.nodes {
            let node = self.registry.create_node(config)?;
            if node.id() != config.node_id {
                return Err(DagError::InvalidDefinition(format!(
                    "factory for {} produced a node with id {}",
                    config.node_id,
                    node.id()
                )));
            }
            dag.add_shared_node(node)?;
        }

        for edge in &definition.edges {
            dag.add_edge(&edge.from, &edge.to)?;
        }

        tracing::debug!(
            "Built DAG {} with {} nodes and {} edges",
            dag.id(),
            dag.len(),
            dag.edge_count()
        );
        Ok(dag)
    }

    /// Execute `dag` with the configured parallelism, publishing events
    pub async fn execute(
        &self,
        dag: &mut Dag,
        context: &ExecutionContext,
    ) -> Result<RunResults, DagError> {
        DagExecutor::new(self.config.max_parallel_nodes)
            .with_events(Arc::clone(&self.event_bus))
            .execute(dag, context)
            .await
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }
}

impl Default for DagRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub max_parallel_nodes: usize,
    pub event_buffer_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_parallel_nodes: DEFAULT_MAX_PARALLEL,
            event_buffer_size: 1000,
        }
    }
}

use dagcore::{DagError, InputSpec, Node, NodeConfig, NodeError, OutputSpec};
use std::collections::HashMap;
use std::sync::Arc;

/// Factory trait for creating node instances from configuration
pub trait NodeFactory: Send + Sync {
    /// Create a new node; the node id comes from `config.node_id`
    fn create(&self, config: &NodeConfig) -> Result<Arc<dyn Node>, NodeError>;

    /// Node type identifier matched against `NodeConfig::node_type`
    fn node_type(&self) -> &str;

    /// Optional: description and declared ports for listings
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::default()
    }
}

/// Metadata about a node type
#[derive(Debug, Clone)]
pub struct NodeMetadata {
    pub description: String,
    pub category: String,
    pub inputs: Vec<InputSpec>,
    pub outputs: Vec<OutputSpec>,
}

impl Default for NodeMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }
}

/// Registry of available node types.
///
/// Constructed and passed around explicitly; there is no process-wide
/// instance.
pub struct NodeRegistry {
    factories: HashMap<String, Arc<dyn NodeFactory>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a node factory, replacing any factory of the same type
    pub fn register(&mut self, factory: Arc<dyn NodeFactory>) {
        let node_type = factory.node_type().to_string();
        tracing::info!("Registering node type: {}", node_type);
        self.factories.insert(node_type, factory);
    }

    /// Create a node instance from its configuration
    pub fn create_node(&self, config: &NodeConfig) -> Result<Arc<dyn Node>, DagError> {
        let factory = self
            .factories
            .get(&config.node_type)
            .ok_or_else(|| DagError::UnknownNodeType(config.node_type.clone()))?;

        factory.create(config).map_err(|e| {
            DagError::InvalidDefinition(format!("Failed to create node {}: {}", config.node_id, e))
        })
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.factories.contains_key(node_type)
    }

    /// All registered node types, sorted
    pub fn list_node_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn get_metadata(&self, node_type: &str) -> Option<NodeMetadata> {
        self.factories.get(node_type).map(|f| f.metadata())
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

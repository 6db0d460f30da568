use dagcore::{
    DagError, DagState, Node, NodeConfig, NodeHandle, NodeState, ValidationIssue, Value,
};
use petgraph::algo::{is_cyclic_directed, toposort};
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::Direction;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

/// Directed acyclic graph of nodes.
///
/// Acyclicity is enforced on every `add_edge`, so a graph built through this
/// API can always be linearised. Structure is expected to be frozen once a
/// run starts.
pub struct Dag {
    dag_id: String,
    graph: StableDiGraph<String, ()>,
    indices: HashMap<String, NodeIndex>,
    nodes: BTreeMap<String, NodeHandle>,
    state: DagState,
    pub metadata: HashMap<String, Value>,
}

impl Dag {
    pub fn new(dag_id: impl Into<String>) -> Self {
        Self {
            dag_id: dag_id.into(),
            graph: StableDiGraph::new(),
            indices: HashMap::new(),
            nodes: BTreeMap::new(),
            state: DagState::Pending,
            metadata: HashMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.dag_id
    }

    pub fn state(&self) -> DagState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: DagState) {
        self.state = state;
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn node(&self, node_id: &str) -> Option<&NodeHandle> {
        self.nodes.get(node_id)
    }

    /// Direct access to a registered handle. Changing its dependency sets
    /// here bypasses the edge bookkeeping; `validate` reports the mismatch.
    pub fn node_mut(&mut self, node_id: &str) -> Option<&mut NodeHandle> {
        self.nodes.get_mut(node_id)
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id)
    }

    /// Node ids in insertion order
    pub fn node_ids(&self) -> Vec<String> {
        self.graph
            .node_indices()
            .map(|idx| self.graph[idx].clone())
            .collect()
    }

    /// Handles in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = &NodeHandle> {
        self.graph
            .node_indices()
            .filter_map(|idx| self.nodes.get(&self.graph[idx]))
    }

    pub fn edges(&self) -> Vec<(String, String)> {
        self.graph
            .edge_indices()
            .filter_map(|e| self.graph.edge_endpoints(e))
            .map(|(from, to)| (self.graph[from].clone(), self.graph[to].clone()))
            .collect()
    }

    pub fn add_node(&mut self, node: impl Node + 'static) -> Result<(), DagError> {
        self.add_shared_node(Arc::new(node))
    }

    /// Register a node that may also be referenced elsewhere
    pub fn add_shared_node(&mut self, node: Arc<dyn Node>) -> Result<(), DagError> {
        let handle = NodeHandle::from_arc(node);
        let node_id = handle.id().to_string();
        if self.nodes.contains_key(&node_id) {
            return Err(DagError::DuplicateNode(node_id));
        }

        let idx = self.graph.add_node(node_id.clone());
        self.indices.insert(node_id.clone(), idx);
        self.nodes.insert(node_id, handle);
        Ok(())
    }

    /// Declare that `from` must finish before `to` starts.
    ///
    /// Fails with `NodeNotFound` for unregistered ids and with
    /// `CycleDetected` if the edge would close a cycle; in the latter case
    /// the graph and both nodes' bookkeeping are left exactly as they were.
    pub fn add_edge(&mut self, from: &str, to: &str) -> Result<(), DagError> {
        let from_idx = self.index_of(from)?;
        let to_idx = self.index_of(to)?;

        if self.graph.contains_edge(from_idx, to_idx) {
            return Ok(());
        }

        let edge = self.graph.add_edge(from_idx, to_idx, ());
        let (added_dependency, added_dependent) = self.link(from, to);

        if is_cyclic_directed(&self.graph) {
            self.graph.remove_edge(edge);
            if added_dependency {
                if let Some(node) = self.nodes.get_mut(to) {
                    node.remove_dependency(from);
                }
            }
            if added_dependent {
                if let Some(node) = self.nodes.get_mut(from) {
                    node.remove_dependent(to);
                }
            }
            tracing::debug!("Rejected edge {} -> {} in DAG {}: cycle", from, to, self.dag_id);
            return Err(DagError::CycleDetected {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        Ok(())
    }

    /// Remove a node and every edge touching it. Returns the node detached
    /// from this graph.
    pub fn remove_node(&mut self, node_id: &str) -> Option<NodeHandle> {
        let handle = self.nodes.remove(node_id)?;

        for dep in handle.dependencies() {
            if let Some(node) = self.nodes.get_mut(dep) {
                node.remove_dependent(node_id);
            }
        }
        for dependent in handle.dependents() {
            if let Some(node) = self.nodes.get_mut(dependent) {
                node.remove_dependency(node_id);
            }
        }

        if let Some(idx) = self.indices.remove(node_id) {
            self.graph.remove_node(idx);
        }

        Some(handle.detached())
    }

    /// Returns whether the edge existed
    pub fn remove_edge(&mut self, from: &str, to: &str) -> bool {
        let (Some(&from_idx), Some(&to_idx)) = (self.indices.get(from), self.indices.get(to)) else {
            return false;
        };
        let Some(edge) = self.graph.find_edge(from_idx, to_idx) else {
            return false;
        };

        self.graph.remove_edge(edge);
        if let Some(node) = self.nodes.get_mut(to) {
            node.remove_dependency(from);
        }
        if let Some(node) = self.nodes.get_mut(from) {
            node.remove_dependent(to);
        }
        true
    }

    /// Report every structural problem without modifying anything
    pub fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if is_cyclic_directed(&self.graph) {
            issues.push(ValidationIssue::Cycle);
        }

        if self.nodes.len() > 1 {
            let isolated: Vec<String> = self
                .graph
                .node_indices()
                .filter(|&idx| self.graph.neighbors_undirected(idx).next().is_none())
                .map(|idx| self.graph[idx].clone())
                .collect();
            if !isolated.is_empty() {
                issues.push(ValidationIssue::IsolatedNodes(isolated));
            }
        }

        for idx in self.graph.node_indices() {
            let node_id = &self.graph[idx];
            if !self.nodes.contains_key(node_id) {
                issues.push(ValidationIssue::DanglingGraphEntry(node_id.clone()));
            }
        }

        for (node_id, node) in &self.nodes {
            let Some(&idx) = self.indices.get(node_id) else {
                issues.push(ValidationIssue::UnindexedNode(node_id.clone()));
                continue;
            };
            if *node.dependencies() != self.neighbor_ids(idx, Direction::Incoming) {
                issues.push(ValidationIssue::DependencyMismatch(node_id.clone()));
            }
            if *node.dependents() != self.neighbor_ids(idx, Direction::Outgoing) {
                issues.push(ValidationIssue::DependentMismatch(node_id.clone()));
            }
        }

        issues
    }

    /// PENDING nodes whose dependencies are all in `completed`, in
    /// insertion order
    pub fn get_ready_nodes(&self, completed: &HashSet<String>) -> Vec<NodeHandle> {
        self.nodes()
            .filter(|node| node.state() == NodeState::Pending && node.can_execute(completed))
            .cloned()
            .collect()
    }

    pub fn get_topological_order(&self) -> Result<Vec<String>, DagError> {
        let order = toposort(&self.graph, None).map_err(|_| DagError::Cyclic)?;
        Ok(order.into_iter().map(|idx| self.graph[idx].clone()).collect())
    }

    /// Static level partition for capacity planning. A node's level is one
    /// more than the deepest of its dependencies; roots are level 0.
    pub fn get_execution_plan(&self) -> Result<ExecutionPlan, DagError> {
        let order = toposort(&self.graph, None).map_err(|_| DagError::Cyclic)?;

        let mut levels: HashMap<NodeIndex, usize> = HashMap::new();
        for idx in order {
            let level = self
                .graph
                .neighbors_directed(idx, Direction::Incoming)
                .filter_map(|dep| levels.get(&dep))
                .map(|dep_level| dep_level + 1)
                .max()
                .unwrap_or(0);
            levels.insert(idx, level);
        }

        let depth = levels.values().max().map_or(0, |max| max + 1);
        let mut execution_levels = vec![Vec::new(); depth];
        for idx in self.graph.node_indices() {
            if let Some(&level) = levels.get(&idx) {
                execution_levels[level].push(self.graph[idx].clone());
            }
        }

        Ok(ExecutionPlan {
            dag_id: self.dag_id.clone(),
            total_nodes: self.nodes.len(),
            max_parallelism: execution_levels.iter().map(Vec::len).max().unwrap_or(0),
            estimated_steps: execution_levels.len(),
            execution_levels,
        })
    }

    /// Plain-text summary of the graph in execution order
    pub fn visualize(&self) -> String {
        let mut lines = vec![
            format!("DAG: {}", self.dag_id),
            format!("Nodes: {}", self.nodes.len()),
            format!("Edges: {}", self.graph.edge_count()),
            String::new(),
        ];

        match self.get_topological_order() {
            Ok(order) => {
                lines.push("Execution Order:".to_string());
                for (i, node_id) in order.iter().enumerate() {
                    let deps = self
                        .nodes
                        .get(node_id)
                        .map(|node| node.dependencies())
                        .filter(|deps| !deps.is_empty())
                        .map(|deps| deps.iter().cloned().collect::<Vec<_>>().join(", "))
                        .unwrap_or_else(|| "None".to_string());
                    lines.push(format!("  {}. {} (deps: {})", i + 1, node_id, deps));
                }
            }
            Err(e) => lines.push(format!("Invalid DAG: {}", e)),
        }

        lines.join("\n")
    }

    pub fn to_dict(&self) -> DagDescription {
        DagDescription {
            dag_id: self.dag_id.clone(),
            nodes: self
                .nodes
                .iter()
                .map(|(node_id, node)| {
                    let description = NodeDescription {
                        node_type: node.node_type().to_string(),
                        config: node.config().clone(),
                    };
                    (node_id.clone(), description)
                })
                .collect(),
            edges: self.edges(),
            state: self.state,
            metadata: self.metadata.clone(),
        }
    }

    /// Copy under a new id. Nodes and their state cells are shared with this
    /// DAG, so resetting or running the copy also moves the source's node
    /// states. Only the DAG-level state is separate.
    pub fn clone_as(&self, new_dag_id: impl Into<String>) -> Dag {
        Dag {
            dag_id: new_dag_id.into(),
            graph: self.graph.clone(),
            indices: self.indices.clone(),
            nodes: self.nodes.clone(),
            state: DagState::Pending,
            metadata: self.metadata.clone(),
        }
    }

    /// Return every node to PENDING and the DAG itself to PENDING
    pub fn reset_states(&mut self) {
        for node in self.nodes.values() {
            node.set_state(NodeState::Pending);
        }
        self.state = DagState::Pending;
    }

    fn index_of(&self, node_id: &str) -> Result<NodeIndex, DagError> {
        self.indices
            .get(node_id)
            .copied()
            .filter(|_| self.nodes.contains_key(node_id))
            .ok_or_else(|| DagError::NodeNotFound(node_id.to_string()))
    }

    fn link(&mut self, from: &str, to: &str) -> (bool, bool) {
        let added_dependency = self
            .nodes
            .get_mut(to)
            .map_or(false, |node| node.add_dependency(from));
        let added_dependent = self
            .nodes
            .get_mut(from)
            .map_or(false, |node| node.add_dependent(to));
        (added_dependency, added_dependent)
    }

    fn neighbor_ids(&self, idx: NodeIndex, direction: Direction) -> BTreeSet<String> {
        self.graph
            .neighbors_directed(idx, direction)
            .map(|n| self.graph[n].clone())
            .collect()
    }
}

/// Static estimate returned by `Dag::get_execution_plan`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionPlan {
    pub dag_id: String,
    pub total_nodes: usize,
    pub execution_levels: Vec<Vec<String>>,
    pub max_parallelism: usize,
    pub estimated_steps: usize,
}

impl ExecutionPlan {
    pub fn level_of(&self, node_id: &str) -> Option<usize> {
        self.execution_levels
            .iter()
            .position(|level| level.iter().any(|id| id == node_id))
    }
}

/// Dictionary form of a DAG
#[derive(Debug, Clone, Serialize)]
pub struct DagDescription {
    pub dag_id: String,
    pub nodes: BTreeMap<String, NodeDescription>,
    pub edges: Vec<(String, String)>,
    pub state: DagState,
    pub metadata: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeDescription {
    pub node_type: String,
    pub config: NodeConfig,
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dagcore::{ExecutionContext, NodeOutcome, NodeOutput};

    struct Noop {
        config: NodeConfig,
    }

    impl Noop {
        fn new(id: &str) -> Self {
            Self {
                config: NodeConfig::new(id, "noop"),
            }
        }
    }

    #[async_trait]
    impl Node for Noop {
        fn config(&self) -> &NodeConfig {
            &self.config
        }

        async fn run(&self, _ctx: ExecutionContext) -> NodeOutcome {
            NodeOutcome::Completed(NodeOutput::new())
        }
    }

    fn chain(ids: &[&str]) -> Dag {
        let mut dag = Dag::new("test");
        for id in ids {
            dag.add_node(Noop::new(id)).unwrap();
        }
        for pair in ids.windows(2) {
            dag.add_edge(pair[0], pair[1]).unwrap();
        }
        dag
    }

    #[test]
    fn test_cycle_behind_the_api_is_reported() {
        let mut dag = chain(&["a", "b"]);
        let a = dag.indices["a"];
        let b = dag.indices["b"];
        dag.graph.add_edge(b, a, ());

        assert!(matches!(dag.get_topological_order(), Err(DagError::Cyclic)));
        assert!(matches!(dag.get_execution_plan(), Err(DagError::Cyclic)));
        assert!(dag.validate().contains(&ValidationIssue::Cycle));
        assert!(dag.visualize().contains("Invalid DAG"));
    }

    #[test]
    fn test_dangling_graph_entry_is_reported() {
        let mut dag = chain(&["a", "b"]);
        dag.graph.add_node("ghost".to_string());

        let issues = dag.validate();
        assert!(issues.contains(&ValidationIssue::DanglingGraphEntry("ghost".to_string())));
    }

    #[test]
    fn test_unindexed_node_is_reported() {
        let mut dag = chain(&["a", "b"]);
        let b = dag.indices.remove("b").unwrap();
        dag.graph.remove_node(b);

        let issues = dag.validate();
        assert!(issues.contains(&ValidationIssue::UnindexedNode("b".to_string())));
    }

    #[test]
    fn test_rejected_edge_keeps_preexisting_bookkeeping() {
        let mut dag = chain(&["a", "b"]);
        // a already lists b as a dependency through a direct mutation
        dag.node_mut("a").unwrap().add_dependency("b");

        assert!(matches!(
            dag.add_edge("b", "a"),
            Err(DagError::CycleDetected { .. })
        ));
        assert!(dag.node("a").unwrap().dependencies().contains("b"));
        assert_eq!(dag.graph.edge_count(), 1);
    }
}

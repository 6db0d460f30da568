use crate::NodeState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// State of a DAG across one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DagState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for DagState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DagState::Pending => "pending",
            DagState::Running => "running",
            DagState::Completed => "completed",
            DagState::Failed => "failed",
            DagState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Events emitted while a DAG runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutionEvent {
    RunStarted {
        run_id: String,
        dag_id: String,
        total_nodes: usize,
        timestamp: DateTime<Utc>,
    },
    NodeStarted {
        run_id: String,
        node_id: String,
        node_type: String,
        timestamp: DateTime<Utc>,
    },
    NodeCompleted {
        run_id: String,
        node_id: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    NodeFailed {
        run_id: String,
        node_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    NodeSkipped {
        run_id: String,
        node_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    RunCompleted {
        run_id: String,
        dag_id: String,
        state: DagState,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
}

impl ExecutionEvent {
    pub fn run_id(&self) -> &str {
        match self {
            ExecutionEvent::RunStarted { run_id, .. }
            | ExecutionEvent::NodeStarted { run_id, .. }
            | ExecutionEvent::NodeCompleted { run_id, .. }
            | ExecutionEvent::NodeFailed { run_id, .. }
            | ExecutionEvent::NodeSkipped { run_id, .. }
            | ExecutionEvent::RunCompleted { run_id, .. } => run_id,
        }
    }

    /// Node id and the state the event moves it into, for node events
    pub fn node_transition(&self) -> Option<(&str, NodeState)> {
        match self {
            ExecutionEvent::NodeStarted { node_id, .. } => Some((node_id, NodeState::Running)),
            ExecutionEvent::NodeCompleted { node_id, .. } => Some((node_id, NodeState::Completed)),
            ExecutionEvent::NodeFailed { node_id, .. } => Some((node_id, NodeState::Failed)),
            ExecutionEvent::NodeSkipped { node_id, .. } => Some((node_id, NodeState::Skipped)),
            _ => None,
        }
    }
}

/// Broadcast bus for run events
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    /// Publishing without subscribers is fine; the event is dropped.
    pub fn emit(&self, event: ExecutionEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}

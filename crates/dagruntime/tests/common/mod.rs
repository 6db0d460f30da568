// crates/dagruntime/tests/common/mod.rs
#![allow(dead_code)]

use async_trait::async_trait;
use dagcore::{
    ExecutionContext, Node, NodeConfig, NodeError, NodeOutcome, NodeOutput, Value,
};
use dagruntime::Dag;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Emits fixed outputs and records the upstream outputs it was given
pub struct Emit {
    config: NodeConfig,
    outputs: HashMap<String, Value>,
    pub seen: Arc<Mutex<Option<HashMap<String, Value>>>>,
}

impl Emit {
    pub fn new(id: &str) -> Self {
        Self {
            config: NodeConfig::new(id, "emit"),
            outputs: HashMap::new(),
            seen: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_output(mut self, port: &str, value: impl Into<Value>) -> Self {
        self.outputs.insert(port.to_string(), value.into());
        self
    }
}

#[async_trait]
impl Node for Emit {
    fn config(&self) -> &NodeConfig {
        &self.config
    }

    async fn run(&self, ctx: ExecutionContext) -> NodeOutcome {
        *self.seen.lock().unwrap() = Some(ctx.upstream_outputs.clone());
        NodeOutcome::Completed(NodeOutput {
            outputs: self.outputs.clone(),
            ..NodeOutput::default()
        })
    }
}

/// Always fails with the given message
pub struct Fail {
    config: NodeConfig,
    message: String,
}

impl Fail {
    pub fn new(id: &str, message: &str) -> Self {
        Self {
            config: NodeConfig::new(id, "fail"),
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl Node for Fail {
    fn config(&self) -> &NodeConfig {
        &self.config
    }

    async fn run(&self, _ctx: ExecutionContext) -> NodeOutcome {
        NodeOutcome::failed(NodeError::ExecutionFailed(self.message.clone()))
    }
}

/// Panics when run
pub struct Explode {
    config: NodeConfig,
}

impl Explode {
    pub fn new(id: &str) -> Self {
        Self {
            config: NodeConfig::new(id, "explode"),
        }
    }
}

#[async_trait]
impl Node for Explode {
    fn config(&self) -> &NodeConfig {
        &self.config
    }

    async fn run(&self, ctx: ExecutionContext) -> NodeOutcome {
        if !ctx.run_id.is_empty() {
            panic!("node blew up");
        }
        NodeOutcome::Completed(NodeOutput::new())
    }
}

/// Tracks how many instances run at once across a shared gauge
#[derive(Clone, Default)]
pub struct Gauge {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    runs: Arc<AtomicUsize>,
}

impl Gauge {
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

pub struct Slow {
    config: NodeConfig,
    delay: Duration,
    gauge: Gauge,
}

impl Slow {
    pub fn new(id: &str, delay_ms: u64, gauge: &Gauge) -> Self {
        Self {
            config: NodeConfig::new(id, "slow"),
            delay: Duration::from_millis(delay_ms),
            gauge: gauge.clone(),
        }
    }
}

#[async_trait]
impl Node for Slow {
    fn config(&self) -> &NodeConfig {
        &self.config
    }

    async fn run(&self, _ctx: ExecutionContext) -> NodeOutcome {
        let now = self.gauge.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.gauge.peak.fetch_max(now, Ordering::SeqCst);
        self.gauge.runs.fetch_add(1, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;

        self.gauge.current.fetch_sub(1, Ordering::SeqCst);
        NodeOutcome::Completed(NodeOutput::new().with_output(self.config.node_id.clone(), true))
    }
}

/// A -> {B, C} -> D
pub fn diamond<N: Node + 'static>(make: impl Fn(&str) -> N) -> Dag {
    let mut dag = Dag::new("diamond");
    for id in ["A", "B", "C", "D"] {
        dag.add_node(make(id)).unwrap();
    }
    dag.add_edge("A", "B").unwrap();
    dag.add_edge("A", "C").unwrap();
    dag.add_edge("B", "D").unwrap();
    dag.add_edge("C", "D").unwrap();
    dag
}

pub fn chain(ids: &[&str]) -> Dag {
    let mut dag = Dag::new("chain");
    for id in ids {
        dag.add_node(Emit::new(id)).unwrap();
    }
    for pair in ids.windows(2) {
        dag.add_edge(pair[0], pair[1]).unwrap();
    }
    dag
}

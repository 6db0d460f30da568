use crate::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Kinds of resources a node can declare a need for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Cpu,
    Memory,
    Gpu,
    Disk,
    Network,
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceType::Cpu => "cpu",
            ResourceType::Memory => "memory",
            ResourceType::Gpu => "gpu",
            ResourceType::Disk => "disk",
            ResourceType::Network => "network",
        };
        f.write_str(name)
    }
}

/// A single resource requirement, e.g. 2 GB of memory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequirement {
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    pub amount: f64,
    pub unit: String,
    #[serde(default)]
    pub optional: bool,
}

impl ResourceRequirement {
    pub fn new(resource_type: ResourceType, amount: f64, unit: impl Into<String>) -> Self {
        Self {
            resource_type,
            amount,
            unit: unit.into(),
            optional: false,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

/// Static configuration of one node.
///
/// `retry_policy` and `timeout` are declared here but the scheduler never
/// interprets them; see the node variants for timeout handling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub node_id: String,
    pub node_type: String,
    #[serde(default)]
    pub parameters: HashMap<String, Value>,
    #[serde(default)]
    pub resource_requirements: Vec<ResourceRequirement>,
    #[serde(default)]
    pub retry_policy: HashMap<String, Value>,
    #[serde(default)]
    pub timeout: Option<f64>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub environment: HashMap<String, String>,
}

impl NodeConfig {
    pub fn new(node_id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            node_type: node_type.into(),
            parameters: HashMap::new(),
            resource_requirements: Vec::new(),
            retry_policy: HashMap::new(),
            timeout: None,
            tags: BTreeSet::new(),
            environment: HashMap::new(),
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_resource(mut self, requirement: ResourceRequirement) -> Self {
        self.resource_requirements.push(requirement);
        self
    }

    pub fn with_retry(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.retry_policy.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout = Some(seconds);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Dictionary form used for persistence and the CLI's pipeline files
    pub fn to_dict(&self) -> serde_json::Value {
        // Every field is plain data; serialisation to a JSON tree cannot fail.
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    pub fn from_dict(dict: &serde_json::Value) -> Result<Self, serde_json::Error> {
        Self::deserialize(dict)
    }
}

use crate::types::AgentRole;
use async_trait::async_trait;
use civica_core::CivicaResult;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

fn default_slots() -> u32 {
    1
}

/// Metadata an agent declares about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub role: AgentRole,
    pub capabilities: Vec<String>,
    /// Concurrency slots held while the agent runs.
    #[serde(default = "default_slots")]
    pub slots: u32,
    #[serde(default)]
    pub memory_mb: u64,
    #[serde(default)]
    pub cpu_millis: u64,
}

impl AgentDescriptor {
    pub fn new(id: impl Into<String>, role: AgentRole, capabilities: &[&str]) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            role,
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
            slots: 1,
            memory_mb: 0,
            cpu_millis: 0,
        }
    }

    pub fn with_slots(mut self, slots: u32) -> Self {
        self.slots = slots;
        self
    }

    pub fn with_limits(mut self, memory_mb: u64, cpu_millis: u64) -> Self {
        self.memory_mb = memory_mb;
        self.cpu_millis = cpu_millis;
        self
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}

/// What one agent invocation is told about its surroundings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseContext {
    pub workflow_id: String,
    pub phase: String,
    pub municipality: String,
    pub canton: String,
    pub languages: Vec<String>,
    /// The definition's constraints bag.
    pub attributes: BTreeMap<String, Value>,
    pub completed_phases: Vec<String>,
    pub max_api_calls_per_hour: u32,
}

/// What an agent hands back after a successful invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub agent_id: String,
    pub output: String,
    /// Facts reported by the agent, fed into the phase compliance check.
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

impl AgentResult {
    pub fn new(agent_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            output: output.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }
}

/// An opaque capability provider invoked by the execution engine.
#[async_trait]
pub trait Agent: Send + Sync {
    fn descriptor(&self) -> &AgentDescriptor;

    async fn invoke(&self, ctx: &PhaseContext) -> CivicaResult<AgentResult>;
}

/// Known agents, looked up by id or capability tag.
///
/// Reads and writes may happen from any task; lookups return clones of the
/// `Arc` so no lock is held while an agent runs.
#[derive(Default)]
pub struct AgentRegistry {
    agents: RwLock<BTreeMap<String, Arc<dyn Agent>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent, replacing and returning any agent with the same id.
    pub fn register(&self, agent: Arc<dyn Agent>) -> Option<Arc<dyn Agent>> {
        let descriptor = agent.descriptor();
        let id = descriptor.id.clone();
        info!(
            agent = %id,
            role = %descriptor.role,
            capabilities = ?descriptor.capabilities,
            "Registered agent"
        );
        self.agents.write().insert(id, agent)
    }

    pub fn unregister(&self, id: &str) -> Option<Arc<dyn Agent>> {
        self.agents.write().remove(id)
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Agent>> {
        self.agents.read().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.agents.read().contains_key(id)
    }

    /// Agents declaring `capability`, ordered by id.
    pub fn find_by_capability(&self, capability: &str) -> Vec<Arc<dyn Agent>> {
        self.agents
            .read()
            .values()
            .filter(|a| a.descriptor().has_capability(capability))
            .cloned()
            .collect()
    }

    pub fn descriptors(&self) -> Vec<AgentDescriptor> {
        self.agents
            .read()
            .values()
            .map(|a| a.descriptor().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.agents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.read().is_empty()
    }
}

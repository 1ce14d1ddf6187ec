//! Simulated agents for running workflows from the command line.

use async_trait::async_trait;
use civica_core::{CivicaError, CivicaResult};
use civica_orchestrator::{
    Agent, AgentDescriptor, AgentRegistry, AgentResult, AgentRole, PhaseContext,
};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// One `[[agents]]` entry of `civica.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct SimulatedAgentConfig {
    #[serde(flatten)]
    pub descriptor: AgentDescriptor,
    /// Simulated work time per invocation.
    #[serde(default)]
    pub delay_ms: u64,
    /// Facts reported on every invocation, visible to phase compliance checks.
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
    /// Phases in which the agent reports a failure.
    #[serde(default)]
    pub fail_in: Vec<String>,
}

/// Agent that sleeps for a configured time and reports fixed attributes.
pub struct SimulatedAgent {
    config: SimulatedAgentConfig,
}

impl SimulatedAgent {
    pub fn new(config: SimulatedAgentConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Agent for SimulatedAgent {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.config.descriptor
    }

    async fn invoke(&self, ctx: &PhaseContext) -> CivicaResult<AgentResult> {
        let id = &self.config.descriptor.id;
        debug!(agent = %id, phase = %ctx.phase, "Simulated agent working");
        if self.config.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.delay_ms)).await;
        }
        if self.config.fail_in.iter().any(|p| p == &ctx.phase) {
            return Err(CivicaError::Agent(format!(
                "simulated failure in phase '{}'",
                ctx.phase
            )));
        }

        let capabilities = self.config.descriptor.capabilities.join(", ");
        let mut result = AgentResult::new(
            id,
            format!("{id} provided [{capabilities}] for {}", ctx.municipality),
        );
        result.attributes = self.config.attributes.clone();
        Ok(result)
    }
}

/// One agent per role covering every capability of the default keyword table.
pub fn demo_agents() -> Vec<SimulatedAgentConfig> {
    let agent = |id: &str, role: AgentRole, caps: &[&str]| SimulatedAgentConfig {
        descriptor: AgentDescriptor::new(id, role, caps).with_limits(512, 500),
        delay_ms: 50,
        attributes: BTreeMap::new(),
        fail_in: Vec::new(),
    };
    vec![
        agent(
            "portal-builder",
            AgentRole::Core,
            &[
                "environment_setup",
                "project_initialization",
                "content_architecture",
                "data_migration",
                "deployment",
            ],
        ),
        agent(
            "municipal-configurator",
            AgentRole::Municipal,
            &["municipal_configuration"],
        ),
        agent(
            "compliance-auditor",
            AgentRole::Compliance,
            &["compliance_audit", "accessibility_audit"],
        ),
        agent(
            "citizen-assistant",
            AgentRole::Ai,
            &["ai_integration", "ai_translation"],
        ),
        agent("test-runner", AgentRole::Qa, &["test_automation"]),
    ]
}

/// Register the configured agents, or the demo set when none are configured.
pub fn build_registry(configured: &[SimulatedAgentConfig]) -> Arc<AgentRegistry> {
    let agents = if configured.is_empty() {
        demo_agents()
    } else {
        configured.to_vec()
    };
    let registry = Arc::new(AgentRegistry::new());
    for config in agents {
        registry.register(Arc::new(SimulatedAgent::new(config)));
    }
    registry
}

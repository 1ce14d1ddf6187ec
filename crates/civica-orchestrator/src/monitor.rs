use crate::types::AgentRole;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// What an agent is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Idle,
    Working,
    Error,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentMetrics {
    pub invocations: u64,
    pub errors: u64,
    /// Cumulative invocation time.
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentState {
    pub agent_id: String,
    pub role: AgentRole,
    /// `workflow_id/phase` of the running invocation.
    pub current_work: Option<String>,
    pub status: WorkerStatus,
    pub metrics: AgentMetrics,
}

/// Tracks state and metrics for every agent the engine has invoked.
pub struct AgentMonitor {
    states: Arc<RwLock<BTreeMap<String, AgentState>>>,
}

impl AgentMonitor {
    pub fn new() -> Self {
        Self {
            states: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Mark an agent as working; creates its entry on first use.
    pub async fn start_invocation(&self, agent_id: &str, role: AgentRole, work: String) {
        let mut states = self.states.write().await;
        let state = states
            .entry(agent_id.to_string())
            .or_insert_with(|| AgentState {
                agent_id: agent_id.to_string(),
                role,
                current_work: None,
                status: WorkerStatus::Idle,
                metrics: AgentMetrics::default(),
            });
        state.current_work = Some(work);
        state.status = WorkerStatus::Working;
        state.metrics.invocations += 1;
    }

    /// Record the end of an invocation.
    pub async fn finish_invocation(&self, agent_id: &str, success: bool, duration_ms: u64) {
        let mut states = self.states.write().await;
        if let Some(state) = states.get_mut(agent_id) {
            state.current_work = None;
            state.metrics.duration_ms += duration_ms;
            if success {
                state.status = WorkerStatus::Idle;
            } else {
                state.metrics.errors += 1;
                state.status = WorkerStatus::Error;
            }
        }
    }

    /// Mark every agent still working for `workflow_id` as failed.
    ///
    /// Used when a workflow is cut off and its invocations are dropped
    /// before they could finish. Returns the affected agent ids.
    pub async fn abandon_workflow(&self, workflow_id: &str) -> Vec<String> {
        let prefix = format!("{workflow_id}/");
        let mut states = self.states.write().await;
        let mut abandoned = Vec::new();
        for state in states.values_mut() {
            let owned = state
                .current_work
                .as_deref()
                .is_some_and(|work| work.starts_with(&prefix));
            if state.status == WorkerStatus::Working && owned {
                state.current_work = None;
                state.status = WorkerStatus::Error;
                state.metrics.errors += 1;
                abandoned.push(state.agent_id.clone());
            }
        }
        abandoned
    }

    pub async fn snapshot(&self) -> Vec<AgentState> {
        self.states.read().await.values().cloned().collect()
    }

    pub async fn get_state(&self, agent_id: &str) -> Option<AgentState> {
        self.states.read().await.get(agent_id).cloned()
    }

    /// Number of agents currently running an invocation.
    pub async fn working_count(&self) -> usize {
        self.states
            .read()
            .await
            .values()
            .filter(|s| s.status == WorkerStatus::Working)
            .count()
    }

    pub async fn aggregate_metrics(&self) -> AgentMetrics {
        let states = self.states.read().await;
        let mut total = AgentMetrics::default();
        for state in states.values() {
            total.invocations += state.metrics.invocations;
            total.errors += state.metrics.errors;
            total.duration_ms += state.metrics.duration_ms;
        }
        total
    }

    /// Serialize the current state as JSON.
    pub async fn to_json(&self) -> serde_json::Value {
        let states = self.snapshot().await;
        let aggregate = self.aggregate_metrics().await;
        serde_json::json!({
            "agents": states,
            "aggregate": aggregate,
        })
    }
}

impl Default for AgentMonitor {
    fn default() -> Self {
        Self::new()
    }
}

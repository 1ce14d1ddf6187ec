use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Events emitted by the execution engine that are relevant for compliance tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ComplianceEvent {
    /// A workflow passed validation and started executing.
    WorkflowStarted {
        workflow_id: String,
        municipality: String,
        canton: String,
        timestamp: DateTime<Utc>,
    },
    /// A phase acquired its resources and is about to invoke agents.
    PhaseStarted {
        workflow_id: String,
        phase: String,
        agents: Vec<String>,
        timestamp: DateTime<Utc>,
    },
    /// A phase finished running its agents.
    PhaseCompleted {
        workflow_id: String,
        phase: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// A compliance report was generated.
    ComplianceEvaluated {
        operation_id: String,
        passed: bool,
        failed_categories: Vec<String>,
        timestamp: DateTime<Utc>,
    },
    /// A workflow reached a terminal state.
    WorkflowFinished {
        workflow_id: String,
        status: String,
        timestamp: DateTime<Utc>,
    },
}

/// Trait for receiving compliance-relevant events from the runtime.
#[async_trait]
pub trait ComplianceHook: Send + Sync {
    async fn on_event(&self, event: &ComplianceEvent);
}

/// Composite hook that dispatches events to multiple hooks.
pub struct ComplianceHookChain {
    hooks: Vec<Arc<dyn ComplianceHook>>,
}

impl ComplianceHookChain {
    pub fn new() -> Self {
        Self { hooks: Vec::new() }
    }

    /// Add a hook to the chain.
    pub fn add(&mut self, hook: Arc<dyn ComplianceHook>) {
        self.hooks.push(hook);
    }

    /// Emit an event to all hooks in the chain.
    pub async fn emit(&self, event: ComplianceEvent) {
        for hook in &self.hooks {
            hook.on_event(&event).await;
        }
    }

    /// Get the number of hooks in the chain.
    pub fn hook_count(&self) -> usize {
        self.hooks.len()
    }
}

impl Default for ComplianceHookChain {
    fn default() -> Self {
        Self::new()
    }
}

/// Hook that keeps every event in memory, in emission order.
#[derive(Default)]
pub struct AuditTrailHook {
    events: RwLock<Vec<ComplianceEvent>>,
}

impl AuditTrailHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<ComplianceEvent> {
        self.events.read().await.clone()
    }

    pub async fn event_count(&self) -> usize {
        self.events.read().await.len()
    }

    /// Events belonging to one workflow (phase and compliance events included).
    pub async fn events_for(&self, workflow_id: &str) -> Vec<ComplianceEvent> {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| match e {
                ComplianceEvent::WorkflowStarted { workflow_id: id, .. }
                | ComplianceEvent::PhaseStarted { workflow_id: id, .. }
                | ComplianceEvent::PhaseCompleted { workflow_id: id, .. }
                | ComplianceEvent::WorkflowFinished { workflow_id: id, .. } => id == workflow_id,
                ComplianceEvent::ComplianceEvaluated { operation_id, .. } => {
                    operation_id.starts_with(workflow_id)
                }
            })
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ComplianceHook for AuditTrailHook {
    async fn on_event(&self, event: &ComplianceEvent) {
        self.events.write().await.push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hook_chain_dispatch() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct CountingHook(Arc<AtomicUsize>);

        #[async_trait]
        impl ComplianceHook for CountingHook {
            async fn on_event(&self, _event: &ComplianceEvent) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let count = Arc::new(AtomicUsize::new(0));
        let mut chain = ComplianceHookChain::new();
        chain.add(Arc::new(CountingHook(count.clone())));
        chain.add(Arc::new(CountingHook(count.clone())));

        chain
            .emit(ComplianceEvent::WorkflowFinished {
                workflow_id: "WF-1".into(),
                status: "completed".into(),
                timestamp: Utc::now(),
            })
            .await;

        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(chain.hook_count(), 2);
    }

    #[tokio::test]
    async fn test_audit_trail_filters_by_workflow() {
        let trail = AuditTrailHook::new();
        trail
            .on_event(&ComplianceEvent::PhaseStarted {
                workflow_id: "WF-1".into(),
                phase: "Setup".into(),
                agents: vec!["builder".into()],
                timestamp: Utc::now(),
            })
            .await;
        trail
            .on_event(&ComplianceEvent::ComplianceEvaluated {
                operation_id: "WF-1/Setup".into(),
                passed: true,
                failed_categories: Vec::new(),
                timestamp: Utc::now(),
            })
            .await;
        trail
            .on_event(&ComplianceEvent::WorkflowFinished {
                workflow_id: "WF-2".into(),
                status: "failed".into(),
                timestamp: Utc::now(),
            })
            .await;

        assert_eq!(trail.event_count().await, 3);
        assert_eq!(trail.events_for("WF-1").await.len(), 2);
        assert_eq!(trail.events_for("WF-2").await.len(), 1);
    }
}

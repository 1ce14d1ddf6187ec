use crate::config::RecoveryKind;
use crate::types::{ExecutionReport, PhaseStatus};
use async_trait::async_trait;
use civica_core::{CivicaError, WorkflowId};
use std::sync::Arc;
use tracing::warn;

/// What went wrong, handed to the recovery strategy.
#[derive(Debug)]
pub struct FailureContext<'a> {
    pub workflow_id: &'a WorkflowId,
    /// `None` when the failure happened outside a phase, e.g. a timeout between phases.
    pub phase: Option<&'a str>,
    pub error: &'a CivicaError,
}

/// Invoked once when a phase fails, before the workflow is marked failed.
///
/// Implementations may only touch the report; they cannot resume execution.
#[async_trait]
pub trait RecoveryStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn on_phase_failure(&self, ctx: &FailureContext<'_>, report: &mut ExecutionReport);
}

/// Stop the remaining phases and keep everything gathered so far.
pub struct AbortAndReport;

#[async_trait]
impl RecoveryStrategy for AbortAndReport {
    fn name(&self) -> &'static str {
        "abort_and_report"
    }

    async fn on_phase_failure(&self, ctx: &FailureContext<'_>, report: &mut ExecutionReport) {
        let mut skipped = 0usize;
        for phase in report
            .phases
            .iter_mut()
            .filter(|p| p.status == PhaseStatus::Pending)
        {
            phase.status = PhaseStatus::Skipped;
            skipped += 1;
        }
        report.recovery = Some(self.name().to_string());
        warn!(
            workflow_id = %ctx.workflow_id,
            phase = ctx.phase.unwrap_or("-"),
            error = %ctx.error,
            skipped,
            "Workflow aborted, remaining phases skipped"
        );
    }
}

/// Build the strategy selected in configuration.
pub fn strategy_for(kind: RecoveryKind) -> Arc<dyn RecoveryStrategy> {
    match kind {
        RecoveryKind::AbortAndReport => Arc::new(AbortAndReport),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::{ExecutionStrategy, PhaseReport, WorkflowStatus};
    use chrono::Utc;

    fn report() -> ExecutionReport {
        ExecutionReport {
            workflow_id: WorkflowId::from("WF-1"),
            status: WorkflowStatus::Executing,
            strategy: ExecutionStrategy::Sequential,
            precheck: None,
            phases: vec![
                PhaseReport::new("A", PhaseStatus::Completed),
                PhaseReport::new("B", PhaseStatus::Failed),
                PhaseReport::new("C", PhaseStatus::Pending),
                PhaseReport::new("D", PhaseStatus::Pending),
            ],
            error: None,
            recovery: None,
            peak_concurrent_slots: 0,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            duration_ms: 0,
            summary: String::new(),
        }
    }

    #[tokio::test]
    async fn test_abort_marks_pending_skipped() {
        let mut report = report();
        let error = CivicaError::Agent("boom".into());
        let strategy = strategy_for(RecoveryKind::AbortAndReport);
        strategy
            .on_phase_failure(
                &FailureContext {
                    workflow_id: &WorkflowId::from("WF-1"),
                    phase: Some("B"),
                    error: &error,
                },
                &mut report,
            )
            .await;

        assert_eq!(report.phases_with_status(PhaseStatus::Skipped), vec!["C", "D"]);
        assert_eq!(report.phases_with_status(PhaseStatus::Completed), vec!["A"]);
        assert_eq!(report.recovery.as_deref(), Some("abort_and_report"));
    }
}

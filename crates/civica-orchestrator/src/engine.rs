use crate::monitor::AgentMonitor;
use crate::recovery::{FailureContext, RecoveryStrategy};
use crate::registry::{Agent, AgentRegistry, AgentResult, PhaseContext};
use crate::resources::{AllocationRequest, ResourceManager};
use crate::types::{
    AgentOutcome, ExecutionPlan, ExecutionReport, ExecutionResult, ExecutionStrategy, Phase,
    PhaseReport, PhaseStatus, ResourceAllocation, Workflow, WorkflowStatus,
};
use chrono::Utc;
use civica_compliance::{
    ComplianceEvent, ComplianceHookChain, ComplianceOperation, ComplianceValidator,
    OperationAgent, OperationScope,
};
use civica_core::{CivicaError, CivicaResult, ComplianceReport};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Slots held by running agents of one workflow, with the high-water mark.
#[derive(Default)]
struct SlotGauge {
    current: AtomicU32,
    peak: AtomicU32,
}

impl SlotGauge {
    fn enter(&self, slots: u32) {
        let now = self.current.fetch_add(slots, Ordering::SeqCst) + slots;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self, slots: u32) {
        self.current.fetch_sub(slots, Ordering::SeqCst);
    }
}

/// Drives a workflow through `initializing → validated → executing →
/// {completed | failed}`.
pub struct ExecutionEngine {
    registry: Arc<AgentRegistry>,
    resources: Arc<ResourceManager>,
    validator: Arc<ComplianceValidator>,
    hooks: Arc<ComplianceHookChain>,
    monitor: Arc<AgentMonitor>,
    recovery: Arc<dyn RecoveryStrategy>,
    workflow_checks: Vec<String>,
}

impl ExecutionEngine {
    pub fn new(
        registry: Arc<AgentRegistry>,
        resources: Arc<ResourceManager>,
        validator: Arc<ComplianceValidator>,
        hooks: Arc<ComplianceHookChain>,
        monitor: Arc<AgentMonitor>,
        recovery: Arc<dyn RecoveryStrategy>,
        workflow_checks: Vec<String>,
    ) -> Self {
        Self {
            registry,
            resources,
            validator,
            hooks,
            monitor,
            recovery,
            workflow_checks,
        }
    }

    /// Run the four pre-execution validations and move the workflow to
    /// `validated`, or to `failed` with every failing reason.
    ///
    /// Returns the whole-workflow compliance pre-check report.
    pub async fn validate(&self, workflow: &mut Workflow) -> CivicaResult<ComplianceReport> {
        let mut reasons = Vec::new();

        let plan = workflow.execution_plan.as_ref();
        let allocation = workflow.resource_allocation.as_ref();

        // Resource availability
        match (allocation, workflow.composition.as_ref()) {
            (Some(allocation), Some(composition)) => {
                let capacity = self.resources.capacity();
                let needed = composition.requirements.max_agent_slots;
                if needed > capacity {
                    reasons.push(format!(
                        "resources: an agent needs {needed} slots but capacity is {capacity}"
                    ));
                }
                if allocation.max_concurrent_agents == 0 {
                    reasons.push("resources: granted budget has no concurrency".to_string());
                }
            }
            _ => reasons.push("resources: no budget granted".to_string()),
        }

        // Agent compatibility
        match (plan, allocation) {
            (Some(plan), Some(allocation)) => {
                for id in plan.agent_ids() {
                    match self.registry.get(id) {
                        Some(agent) => agent_fits(agent.descriptor(), allocation, &mut reasons),
                        None => reasons.push(format!("agents: '{id}' is not registered")),
                    }
                }
            }
            (None, _) => reasons.push("agents: no execution plan".to_string()),
            _ => {}
        }

        // Municipal context
        let definition = &workflow.definition;
        if definition.municipality.trim().is_empty() {
            reasons.push("context: municipality is missing".to_string());
        }
        if definition.canton.trim().is_empty() {
            reasons.push("context: canton is missing".to_string());
        }
        if definition.languages.is_empty() {
            reasons.push("context: no service language declared".to_string());
        }

        // Whole-workflow compliance pre-check
        let checks = if definition.compliance_requirements.is_empty() {
            self.workflow_checks.clone()
        } else {
            definition.compliance_requirements.clone()
        };
        let mut operation = ComplianceOperation::new(
            workflow.id.as_str(),
            OperationScope::Workflow,
            &definition.municipality,
            &definition.canton,
        )
        .with_languages(definition.languages.clone())
        .with_agents(self.operation_agents(plan.map(ExecutionPlan::agent_ids).unwrap_or_default()));
        operation.attributes.extend(definition.constraints.clone());

        let precheck = self.validator.validate(&operation, &checks).await;
        self.emit_evaluated(&precheck).await;
        for failure in precheck.failures() {
            reasons.push(format!("compliance: {}: {}", failure.category, failure.reason));
        }

        if reasons.is_empty() {
            workflow.transition(WorkflowStatus::Validated);
            info!(workflow_id = %workflow.id, "Workflow validated");
            Ok(precheck)
        } else {
            workflow.fail();
            warn!(
                workflow_id = %workflow.id,
                reasons = reasons.len(),
                "Workflow validation failed"
            );
            Err(CivicaError::ValidationFailed { reasons })
        }
    }

    /// Execute a validated workflow phase by phase.
    ///
    /// Always returns a result with a report attached; the workflow ends in
    /// `completed` or `failed`.
    pub async fn execute(
        &self,
        workflow: &mut Workflow,
        precheck: Option<ComplianceReport>,
    ) -> ExecutionResult {
        let started_at = Utc::now();
        let start = Instant::now();
        workflow.transition(WorkflowStatus::Executing);

        let plan = workflow.execution_plan.clone().unwrap_or_default();
        let strategy = workflow
            .composition
            .as_ref()
            .map(|c| c.strategy)
            .unwrap_or(ExecutionStrategy::Sequential);
        let mut report = ExecutionReport {
            workflow_id: workflow.id.clone(),
            status: WorkflowStatus::Executing,
            strategy,
            precheck,
            phases: plan
                .phases
                .iter()
                .map(|p| PhaseReport::new(&p.name, PhaseStatus::Pending))
                .collect(),
            error: None,
            recovery: None,
            peak_concurrent_slots: 0,
            started_at,
            finished_at: started_at,
            duration_ms: 0,
            summary: String::new(),
        };

        self.hooks
            .emit(ComplianceEvent::WorkflowStarted {
                workflow_id: workflow.id.to_string(),
                municipality: workflow.definition.municipality.clone(),
                canton: workflow.definition.canton.clone(),
                timestamp: started_at,
            })
            .await;
        info!(
            workflow_id = %workflow.id,
            phases = plan.phases.len(),
            strategy = ?strategy,
            "Workflow execution started"
        );

        let gauge = Arc::new(SlotGauge::default());
        let outcome = match workflow.resource_allocation.clone() {
            Some(allocation) => {
                let limit = allocation.max_execution_time();
                let timed = tokio::time::timeout(
                    limit,
                    self.run_phases(workflow, &plan, &allocation, &mut report, &gauge),
                )
                .await;
                match timed {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        let abandoned = self.monitor.abandon_workflow(workflow.id.as_str()).await;
                        if !abandoned.is_empty() {
                            warn!(
                                workflow_id = %workflow.id,
                                agents = ?abandoned,
                                "Agents cut off by the execution time limit"
                            );
                        }
                        for phase in report
                            .phases
                            .iter_mut()
                            .filter(|p| p.status == PhaseStatus::Running)
                        {
                            phase.status = PhaseStatus::Failed;
                            phase.error = Some("execution time limit reached".to_string());
                        }
                        Err(CivicaError::ExecutionTimeout {
                            limit_secs: allocation.max_execution_time_secs,
                        })
                    }
                }
            }
            None => Err(CivicaError::ResourceExhausted {
                requested: 1,
                available: 0,
            }),
        };

        let (status, error) = match outcome {
            Ok(()) => (WorkflowStatus::Completed, None),
            Err(e) => {
                let failed_phase = report
                    .phases
                    .iter()
                    .find(|p| p.status == PhaseStatus::Failed)
                    .map(|p| p.name.clone());
                error!(
                    workflow_id = %workflow.id,
                    phase = failed_phase.as_deref().unwrap_or("-"),
                    kind = e.kind(),
                    error = %e,
                    "Workflow execution failed"
                );
                self.recovery
                    .on_phase_failure(
                        &FailureContext {
                            workflow_id: &workflow.id,
                            phase: failed_phase.as_deref(),
                            error: &e,
                        },
                        &mut report,
                    )
                    .await;
                (WorkflowStatus::Failed, Some(e))
            }
        };

        let completed = report.phases_with_status(PhaseStatus::Completed).len();
        report.status = status;
        report.error = error.as_ref().map(ToString::to_string);
        report.peak_concurrent_slots = gauge.peak.load(Ordering::SeqCst);
        report.finished_at = Utc::now();
        report.duration_ms = start.elapsed().as_millis() as u64;
        report.summary = format!(
            "{}: {completed}/{} phases completed, status {status}",
            workflow.id,
            report.phases.len()
        );

        workflow.transition(status);
        workflow.report = Some(report.clone());

        self.hooks
            .emit(ComplianceEvent::WorkflowFinished {
                workflow_id: workflow.id.to_string(),
                status: status.to_string(),
                timestamp: report.finished_at,
            })
            .await;
        info!(
            workflow_id = %workflow.id,
            status = %status,
            duration_ms = report.duration_ms,
            peak_slots = report.peak_concurrent_slots,
            "Workflow execution finished"
        );

        ExecutionResult {
            workflow_id: workflow.id.clone(),
            status,
            report,
            error,
        }
    }

    async fn run_phases(
        &self,
        workflow: &Workflow,
        plan: &ExecutionPlan,
        allocation: &ResourceAllocation,
        report: &mut ExecutionReport,
        gauge: &Arc<SlotGauge>,
    ) -> CivicaResult<()> {
        for (index, phase) in plan.phases.iter().enumerate() {
            let missing: Vec<&String> = phase
                .depends_on
                .iter()
                .filter(|dep| {
                    report
                        .phase(dep)
                        .map_or(true, |p| p.status != PhaseStatus::Completed)
                })
                .collect();
            if let Some(dep) = missing.first() {
                let err = CivicaError::DependencyViolation {
                    phase: phase.name.clone(),
                    missing: dep.to_string(),
                };
                let phase_report = &mut report.phases[index];
                phase_report.status = PhaseStatus::Failed;
                phase_report.error = Some(err.to_string());
                return Err(err);
            }

            report.phases[index].status = PhaseStatus::Running;
            let started = Instant::now();
            let result = self
                .run_phase(workflow, phase, allocation, report, index, gauge)
                .await;

            let phase_report = &mut report.phases[index];
            phase_report.duration_ms = started.elapsed().as_millis() as u64;
            match result {
                Ok(()) => {
                    phase_report.status = PhaseStatus::Completed;
                    info!(
                        workflow_id = %workflow.id,
                        phase = %phase.name,
                        duration_ms = phase_report.duration_ms,
                        "Phase completed"
                    );
                }
                Err(e) => {
                    phase_report.status = PhaseStatus::Failed;
                    phase_report.error = Some(e.to_string());
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// One phase: allocate, run agents, check compliance. The allocation
    /// guard releases the slots on every exit path.
    async fn run_phase(
        &self,
        workflow: &Workflow,
        phase: &Phase,
        allocation: &ResourceAllocation,
        report: &mut ExecutionReport,
        index: usize,
        gauge: &Arc<SlotGauge>,
    ) -> CivicaResult<()> {
        let agents: Vec<Arc<dyn Agent>> = phase
            .agents
            .iter()
            .map(|id| {
                self.registry.get(id).ok_or_else(|| CivicaError::AgentInvocation {
                    agent: id.clone(),
                    phase: phase.name.clone(),
                    message: "agent is not registered".to_string(),
                })
            })
            .collect::<CivicaResult<_>>()?;

        let need: u32 = if phase.parallel {
            agents.iter().map(|a| a.descriptor().slots).sum()
        } else {
            agents.iter().map(|a| a.descriptor().slots).max().unwrap_or(0)
        };
        let slots = need.min(allocation.max_concurrent_agents);

        let guard = self
            .resources
            .acquire_guard(&AllocationRequest {
                workflow_id: workflow.id.clone(),
                phase: phase.name.clone(),
                slots,
            })
            .await?;
        report.phases[index].allocated_slots = guard.allocation().slots;

        self.hooks
            .emit(ComplianceEvent::PhaseStarted {
                workflow_id: workflow.id.to_string(),
                phase: phase.name.clone(),
                agents: phase.agents.clone(),
                timestamp: Utc::now(),
            })
            .await;
        info!(
            workflow_id = %workflow.id,
            phase = %phase.name,
            agents = phase.agents.len(),
            slots,
            parallel = phase.parallel,
            "Phase started"
        );

        let ctx = PhaseContext {
            workflow_id: workflow.id.to_string(),
            phase: phase.name.clone(),
            municipality: workflow.definition.municipality.clone(),
            canton: workflow.definition.canton.clone(),
            languages: workflow.definition.languages.clone(),
            attributes: workflow.definition.constraints.clone(),
            completed_phases: report
                .phases_with_status(PhaseStatus::Completed)
                .into_iter()
                .map(str::to_string)
                .collect(),
            max_api_calls_per_hour: allocation.max_api_calls_per_hour,
        };

        let started = Instant::now();
        let (outcomes, results, failure) = if phase.parallel {
            self.run_parallel(&agents, &ctx, slots, gauge).await
        } else {
            self.run_sequential(&agents, &ctx, gauge).await
        };
        report.phases[index].agents = outcomes;

        self.hooks
            .emit(ComplianceEvent::PhaseCompleted {
                workflow_id: workflow.id.to_string(),
                phase: phase.name.clone(),
                success: failure.is_none(),
                duration_ms: started.elapsed().as_millis() as u64,
                timestamp: Utc::now(),
            })
            .await;

        if let Some(e) = failure {
            return Err(e);
        }
        if phase.compliance_checks.is_empty() {
            return Ok(());
        }

        let mut operation = ComplianceOperation::new(
            format!("{}/{}", workflow.id, phase.name),
            OperationScope::Phase {
                name: phase.name.clone(),
            },
            &workflow.definition.municipality,
            &workflow.definition.canton,
        )
        .with_languages(workflow.definition.languages.clone())
        .with_agents(self.operation_agents(phase.agents.iter().map(String::as_str).collect()));
        operation.attributes.extend(workflow.definition.constraints.clone());
        for result in results {
            operation.attributes.extend(result.attributes);
        }

        let compliance = self
            .validator
            .validate(&operation, &phase.compliance_checks)
            .await;
        self.emit_evaluated(&compliance).await;
        report.phases[index].compliance = Some(compliance.clone());

        if compliance.passed() {
            Ok(())
        } else {
            Err(CivicaError::CompliancePhaseFailure {
                phase: phase.name.clone(),
                report: Box::new(compliance),
            })
        }
    }

    /// Invoke agents in listed order, stopping at the first failure.
    async fn run_sequential(
        &self,
        agents: &[Arc<dyn Agent>],
        ctx: &PhaseContext,
        gauge: &Arc<SlotGauge>,
    ) -> (Vec<AgentOutcome>, Vec<AgentResult>, Option<CivicaError>) {
        let mut outcomes = Vec::new();
        let mut results = Vec::new();
        for agent in agents {
            let (outcome, result) = invoke(agent.clone(), ctx, &self.monitor, gauge).await;
            outcomes.push(outcome);
            match result {
                Ok(result) => results.push(result),
                Err(e) => return (outcomes, results, Some(e)),
            }
        }
        (outcomes, results, None)
    }

    /// Fan out all agents, bounded by `permits` slots, and wait for every
    /// started agent. After the first failure no further agent starts;
    /// agents already running are allowed to finish.
    async fn run_parallel(
        &self,
        agents: &[Arc<dyn Agent>],
        ctx: &PhaseContext,
        permits: u32,
        gauge: &Arc<SlotGauge>,
    ) -> (Vec<AgentOutcome>, Vec<AgentResult>, Option<CivicaError>) {
        let semaphore = Arc::new(Semaphore::new(permits as usize));
        let aborted = Arc::new(AtomicBool::new(false));
        let mut set = JoinSet::new();

        for (index, agent) in agents.iter().enumerate() {
            let agent = agent.clone();
            let ctx = ctx.clone();
            let semaphore = semaphore.clone();
            let aborted = aborted.clone();
            let monitor = self.monitor.clone();
            let gauge = gauge.clone();
            set.spawn(async move {
                let slots = agent.descriptor().slots;
                let Ok(_permit) = semaphore.acquire_many_owned(slots).await else {
                    return (index, None);
                };
                if aborted.load(Ordering::SeqCst) {
                    return (index, None);
                }
                let (outcome, result) = invoke(agent, &ctx, &monitor, &gauge).await;
                if result.is_err() {
                    aborted.store(true, Ordering::SeqCst);
                }
                (index, Some((outcome, result)))
            });
        }

        let mut outcomes = Vec::new();
        let mut results = Vec::new();
        let mut failure = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, Some((outcome, result)))) => {
                    match result {
                        Ok(result) => results.push((index, result)),
                        Err(e) if failure.is_none() => {
                            warn!(
                                phase = %ctx.phase,
                                agent = %outcome.agent_id,
                                error = %e,
                                "Agent failed, no further agents start in this phase"
                            );
                            failure = Some(e);
                        }
                        Err(_) => {}
                    }
                    outcomes.push((index, outcome));
                }
                Ok((_, None)) => {}
                Err(join_error) => {
                    aborted.store(true, Ordering::SeqCst);
                    failure.get_or_insert(CivicaError::AgentInvocation {
                        agent: "-".to_string(),
                        phase: ctx.phase.clone(),
                        message: format!("agent task panicked: {join_error}"),
                    });
                }
            }
        }

        outcomes.sort_by_key(|(index, _)| *index);
        results.sort_by_key(|(index, _)| *index);
        let outcomes = outcomes.into_iter().map(|(_, o)| o).collect();
        let results = results.into_iter().map(|(_, r)| r).collect();
        (outcomes, results, failure)
    }

    fn operation_agents(&self, ids: Vec<&str>) -> Vec<OperationAgent> {
        ids.into_iter()
            .filter_map(|id| self.registry.get(id))
            .map(|agent| {
                let d = agent.descriptor();
                OperationAgent {
                    id: d.id.clone(),
                    role: d.role.to_string(),
                    capabilities: d.capabilities.clone(),
                }
            })
            .collect()
    }

    async fn emit_evaluated(&self, report: &ComplianceReport) {
        self.hooks
            .emit(ComplianceEvent::ComplianceEvaluated {
                operation_id: report.operation_id.clone(),
                passed: report.passed(),
                failed_categories: report.failed_categories(),
                timestamp: report.generated_at,
            })
            .await;
    }
}

fn agent_fits(
    descriptor: &crate::registry::AgentDescriptor,
    allocation: &ResourceAllocation,
    reasons: &mut Vec<String>,
) {
    let id = &descriptor.id;
    if descriptor.slots > allocation.max_concurrent_agents {
        reasons.push(format!(
            "agents: '{id}' needs {} slots, budget allows {}",
            descriptor.slots, allocation.max_concurrent_agents
        ));
    }
    if descriptor.memory_mb > allocation.max_memory_per_agent_mb {
        reasons.push(format!(
            "agents: '{id}' needs {} MB, limit is {} MB",
            descriptor.memory_mb, allocation.max_memory_per_agent_mb
        ));
    }
    if descriptor.cpu_millis > allocation.max_cpu_millis_per_agent {
        reasons.push(format!(
            "agents: '{id}' needs {} mCPU, limit is {} mCPU",
            descriptor.cpu_millis, allocation.max_cpu_millis_per_agent
        ));
    }
}

/// Invoke one agent, keeping the monitor and slot gauge current.
async fn invoke(
    agent: Arc<dyn Agent>,
    ctx: &PhaseContext,
    monitor: &AgentMonitor,
    gauge: &SlotGauge,
) -> (AgentOutcome, CivicaResult<AgentResult>) {
    let descriptor = agent.descriptor();
    let id = descriptor.id.clone();
    monitor
        .start_invocation(
            &id,
            descriptor.role,
            format!("{}/{}", ctx.workflow_id, ctx.phase),
        )
        .await;
    gauge.enter(descriptor.slots);
    let started = Instant::now();

    let result = agent.invoke(ctx).await;

    gauge.leave(descriptor.slots);
    let duration_ms = started.elapsed().as_millis() as u64;
    monitor
        .finish_invocation(&id, result.is_ok(), duration_ms)
        .await;

    match result {
        Ok(result) => (
            AgentOutcome {
                agent_id: id,
                success: true,
                output: Some(result.output.clone()),
                error: None,
                duration_ms,
            },
            Ok(result),
        ),
        Err(e) => {
            let message = e.to_string();
            (
                AgentOutcome {
                    agent_id: id.clone(),
                    success: false,
                    output: None,
                    error: Some(message.clone()),
                    duration_ms,
                },
                Err(CivicaError::AgentInvocation {
                    agent: id,
                    phase: ctx.phase.clone(),
                    message,
                }),
            )
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::ResourceLimits;
    use crate::recovery::AbortAndReport;
    use crate::registry::AgentDescriptor;
    use crate::types::{AgentRole, ResourceRequirements, WorkflowDefinition};
    use async_trait::async_trait;
    use civica_compliance::{AuditTrailHook, RuleTable};
    use std::collections::BTreeSet;

    struct EchoAgent(AgentDescriptor);

    #[async_trait]
    impl Agent for EchoAgent {
        fn descriptor(&self) -> &AgentDescriptor {
            &self.0
        }

        async fn invoke(&self, ctx: &PhaseContext) -> CivicaResult<AgentResult> {
            Ok(AgentResult::new(&self.0.id, format!("{} done", ctx.phase)))
        }
    }

    struct Fixture {
        engine: ExecutionEngine,
        resources: Arc<ResourceManager>,
        monitor: Arc<AgentMonitor>,
        trail: Arc<AuditTrailHook>,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(AgentRegistry::new());
        for id in ["builder", "checker"] {
            registry.register(Arc::new(EchoAgent(AgentDescriptor::new(
                id,
                AgentRole::Core,
                &["environment_setup"],
            ))));
        }
        let resources = Arc::new(ResourceManager::new(ResourceLimits::default(), 2, 5));
        let monitor = Arc::new(AgentMonitor::new());
        let trail = Arc::new(AuditTrailHook::new());
        let mut hooks = ComplianceHookChain::new();
        hooks.add(trail.clone());
        let engine = ExecutionEngine::new(
            registry,
            resources.clone(),
            Arc::new(ComplianceValidator::new(
                RuleTable::swiss_defaults(),
                Vec::<String>::new(),
            )),
            Arc::new(hooks),
            monitor.clone(),
            Arc::new(AbortAndReport),
            Vec::new(),
        );
        Fixture {
            engine,
            resources,
            monitor,
            trail,
        }
    }

    fn phase(name: &str, agent: &str, depends_on: &[&str]) -> Phase {
        Phase {
            name: name.to_string(),
            agents: vec![agent.to_string()],
            depends_on: depends_on.iter().map(|d| d.to_string()).collect::<BTreeSet<_>>(),
            parallel: false,
            compliance_checks: Vec::new(),
        }
    }

    fn validated_workflow(f: &Fixture, phases: Vec<Phase>) -> Workflow {
        let mut workflow =
            Workflow::new(WorkflowDefinition::new("Bruchtal", "ZH").with_requirement("environment"));
        let requirements = ResourceRequirements {
            peak_concurrency: 1,
            max_agent_slots: 1,
            total_agents: 2,
            memory_mb: 512,
            cpu_millis: 500,
        };
        workflow.resource_allocation = Some(f.resources.grant(&workflow.id, &requirements).unwrap());
        workflow.execution_plan = Some(ExecutionPlan { phases });
        workflow.status = WorkflowStatus::Validated;
        workflow
    }

    #[tokio::test]
    async fn test_ordered_plan_completes() {
        let f = fixture();
        let mut workflow = validated_workflow(
            &f,
            vec![
                phase("First", "builder", &[]),
                phase("Second", "checker", &["First"]),
            ],
        );

        let result = f.engine.execute(&mut workflow, None).await;

        assert_eq!(result.status, WorkflowStatus::Completed);
        assert_eq!(workflow.status, WorkflowStatus::Completed);
        assert_eq!(
            result.report.phases_with_status(PhaseStatus::Completed),
            vec!["First", "Second"]
        );
        assert_eq!(f.monitor.aggregate_metrics().await.invocations, 2);
        assert_eq!(f.resources.allocated_slots(), 0);
    }

    #[tokio::test]
    async fn test_phase_before_prerequisite_fails_fast() {
        let f = fixture();
        let mut workflow = validated_workflow(
            &f,
            vec![
                phase("Second", "checker", &["First"]),
                phase("First", "builder", &[]),
            ],
        );

        let result = f.engine.execute(&mut workflow, None).await;

        assert_eq!(result.status, WorkflowStatus::Failed);
        assert_eq!(workflow.status, WorkflowStatus::Failed);
        match &result.error {
            Some(CivicaError::DependencyViolation { phase, missing }) => {
                assert_eq!(phase, "Second");
                assert_eq!(missing, "First");
            }
            other => panic!("expected a dependency violation, got {other:?}"),
        }
        assert_eq!(result.report.phase("Second").unwrap().status, PhaseStatus::Failed);
        assert_eq!(result.report.phase("First").unwrap().status, PhaseStatus::Skipped);
        assert_eq!(result.report.recovery.as_deref(), Some("abort_and_report"));

        // No agent ran and nothing stayed allocated
        assert_eq!(f.monitor.aggregate_metrics().await.invocations, 0);
        assert_eq!(f.resources.allocated_slots(), 0);
        assert_eq!(f.resources.stats().granted, 0);

        let events = f.trail.events().await;
        assert!(!events
            .iter()
            .any(|e| matches!(e, ComplianceEvent::PhaseStarted { .. })));
        assert!(matches!(
            events.last(),
            Some(ComplianceEvent::WorkflowFinished { status, .. }) if status == "failed"
        ));
    }
}

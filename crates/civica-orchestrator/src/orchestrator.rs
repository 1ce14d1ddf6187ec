use crate::analyzer::WorkflowAnalyzer;
use crate::composer::AgentComposer;
use crate::config::OrchestratorConfig;
use crate::engine::ExecutionEngine;
use crate::learning::{template_key, OrchestrationInsights, OutcomeHistory};
use crate::monitor::AgentMonitor;
use crate::recovery::{strategy_for, RecoveryStrategy};
use crate::registry::AgentRegistry;
use crate::resources::ResourceManager;
use crate::scaling::{ScalingDecision, ScalingManager};
use crate::types::{
    ExecutionResult, Workflow, WorkflowAnalysis, WorkflowDefinition, WorkflowStatus,
};
use civica_compliance::{ComplianceHookChain, ComplianceValidator, RuleTable};
use civica_core::{CivicaResult, ComplianceReport, WorkflowId};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Single entry point turning workflow definitions into executions.
///
/// Owns every workflow record for its lifetime: active workflows are kept
/// until they reach a terminal state with a report, then move to the archive.
/// The archive holds at most `history.max_archived` workflows; outcome
/// statistics survive eviction.
pub struct Orchestrator {
    config: OrchestratorConfig,
    registry: Arc<AgentRegistry>,
    resources: Arc<ResourceManager>,
    validator: Arc<ComplianceValidator>,
    hooks: Arc<ComplianceHookChain>,
    monitor: Arc<AgentMonitor>,
    recovery: Arc<dyn RecoveryStrategy>,
    analyzer: WorkflowAnalyzer,
    composer: AgentComposer,
    scaling: Arc<ScalingManager>,
    history: OutcomeHistory,
    active: RwLock<HashMap<WorkflowId, Workflow>>,
    archive: RwLock<BTreeMap<WorkflowId, Workflow>>,
}

impl Orchestrator {
    /// Build an orchestrator from a validated configuration.
    pub fn new(
        config: OrchestratorConfig,
        registry: Arc<AgentRegistry>,
        rules: RuleTable,
    ) -> CivicaResult<Self> {
        config.validate()?;

        let resources = Arc::new(ResourceManager::new(
            config.resources.clone(),
            config.scaling.initial_instances,
            config.scaling.per_instance_concurrency,
        ));
        let validator = Arc::new(ComplianceValidator::new(
            rules,
            config.compliance.auto_remediable.clone(),
        ));
        let scaling = Arc::new(ScalingManager::new(
            config.scaling.clone(),
            resources.clone(),
        ));

        Ok(Self {
            analyzer: WorkflowAnalyzer::new(config.analyzer.clone(), config.capabilities.clone()),
            composer: AgentComposer::new(
                config.capabilities.clone(),
                config.phase_template.phases.clone(),
            ),
            recovery: strategy_for(config.recovery),
            history: OutcomeHistory::new(config.history.min_samples),
            config,
            registry,
            resources,
            validator,
            hooks: Arc::new(ComplianceHookChain::new()),
            monitor: Arc::new(AgentMonitor::new()),
            scaling,
            active: RwLock::new(HashMap::new()),
            archive: RwLock::new(BTreeMap::new()),
        })
    }

    /// Replace the compliance hook chain.
    pub fn with_hooks(mut self, hooks: ComplianceHookChain) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    /// Replace the recovery strategy.
    pub fn with_recovery(mut self, recovery: Arc<dyn RecoveryStrategy>) -> Self {
        self.recovery = recovery;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn resources(&self) -> &Arc<ResourceManager> {
        &self.resources
    }

    pub fn validator(&self) -> &Arc<ComplianceValidator> {
        &self.validator
    }

    pub fn monitor(&self) -> &Arc<AgentMonitor> {
        &self.monitor
    }

    pub fn scaling(&self) -> &Arc<ScalingManager> {
        &self.scaling
    }

    /// Analyze a definition without running it.
    ///
    /// The success probability is blended with the observed success rate of
    /// the definition's template once enough runs finished.
    pub fn analyze(&self, definition: &WorkflowDefinition) -> CivicaResult<WorkflowAnalysis> {
        let mut analysis = self.analyzer.analyze(definition)?;
        analysis.success_probability = self
            .history
            .adjust_success_probability(&template_key(definition), analysis.success_probability);
        Ok(analysis)
    }

    /// Analyze, compose, budget, validate and execute a workflow.
    ///
    /// Failures before execution starts are returned as `Err`; nothing is
    /// allocated by then. Once execution starts the result always carries a
    /// report, and an execution failure is reported in `ExecutionResult::error`.
    pub async fn orchestrate_workflow(
        &self,
        definition: WorkflowDefinition,
    ) -> CivicaResult<ExecutionResult> {
        let mut workflow = Workflow::new(definition);
        let id = workflow.id.clone();
        info!(
            workflow_id = %id,
            municipality = %workflow.definition.municipality,
            canton = %workflow.definition.canton,
            "Workflow submitted"
        );
        self.track(&workflow);

        let prepared = self.prepare(&mut workflow).await;
        let precheck = match prepared {
            Ok(precheck) => precheck,
            Err(e) => {
                workflow.fail();
                warn!(workflow_id = %id, kind = e.kind(), error = %e, "Workflow rejected");
                self.retire(workflow);
                return Err(e);
            }
        };

        let mut executing = workflow.clone();
        executing.transition(WorkflowStatus::Executing);
        self.track(&executing);

        let result = self.engine().execute(&mut workflow, Some(precheck)).await;
        self.retire(workflow);
        Ok(result)
    }

    async fn prepare(
        &self,
        workflow: &mut Workflow,
    ) -> CivicaResult<ComplianceReport> {
        let analysis = self.analyze(&workflow.definition)?;
        info!(
            workflow_id = %workflow.id,
            complexity = analysis.complexity,
            risks = analysis.risk_factors.len(),
            success_probability = analysis.success_probability,
            "Workflow analyzed"
        );
        workflow.analysis = Some(analysis);

        let composed = self
            .composer
            .compose(&workflow.id, &workflow.definition, &self.registry)?;
        let allocation = self
            .resources
            .grant(&workflow.id, &composed.composition.requirements)?;
        workflow.composition = Some(composed.composition);
        workflow.execution_plan = Some(composed.plan);
        workflow.resource_allocation = Some(allocation);
        self.track(workflow);

        let precheck = self.engine().validate(workflow).await;
        self.track(workflow);
        precheck
    }

    fn engine(&self) -> ExecutionEngine {
        ExecutionEngine::new(
            self.registry.clone(),
            self.resources.clone(),
            self.validator.clone(),
            self.hooks.clone(),
            self.monitor.clone(),
            self.recovery.clone(),
            self.config.compliance.workflow_checks.clone(),
        )
    }

    /// Refresh the active-set snapshot of a workflow.
    fn track(&self, workflow: &Workflow) {
        self.active.write().insert(workflow.id.clone(), workflow.clone());
    }

    /// Move a terminal workflow from the active set to the archive, evicting
    /// the oldest archived workflows beyond the retention limit.
    fn retire(&self, workflow: Workflow) {
        self.history.record(&workflow);
        self.active.write().remove(&workflow.id);

        let mut archive = self.archive.write();
        archive.insert(workflow.id.clone(), workflow);
        while archive.len() > self.config.history.max_archived {
            if let Some((evicted, _)) = archive.pop_first() {
                debug!(workflow_id = %evicted, "Archived workflow evicted");
            }
        }
    }

    /// Run one scaling tick. Meant to be called on a timer by a host process.
    pub fn manage_scaling(&self) -> ScalingDecision {
        self.scaling.evaluate()
    }

    /// Spawn the scaling loop at the configured tick interval.
    pub fn start_scaling_loop(&self) -> tokio::task::JoinHandle<()> {
        self.scaling.clone().start(self.config.scaling.tick_interval())
    }

    /// Look up a workflow, active or archived.
    pub fn workflow(&self, id: &WorkflowId) -> Option<Workflow> {
        if let Some(workflow) = self.active.read().get(id) {
            return Some(workflow.clone());
        }
        self.archive.read().get(id).cloned()
    }

    pub fn active_count(&self) -> usize {
        self.active.read().len()
    }

    /// Snapshots of the workflows that have not finished yet.
    pub fn active_workflows(&self) -> Vec<Workflow> {
        self.active.read().values().cloned().collect()
    }

    /// Archived workflows in submission order.
    pub fn archived(&self) -> Vec<Workflow> {
        self.archive.read().values().cloned().collect()
    }

    /// Remove and return every archived workflow, oldest first.
    pub fn drain_archive(&self) -> Vec<Workflow> {
        std::mem::take(&mut *self.archive.write())
            .into_values()
            .collect()
    }

    /// Statistics over every workflow that finished, evicted ones included.
    pub fn insights(&self) -> OrchestrationInsights {
        self.history.insights()
    }
}

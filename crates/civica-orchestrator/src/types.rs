use crate::config::PhaseTemplate;
use chrono::{DateTime, Utc};
use civica_core::{CivicaError, ComplianceReport, WorkflowId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Role bucket an agent belongs to. Every agent belongs to exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    /// General build and setup work.
    Core,
    /// Municipality-specific configuration and content.
    Municipal,
    /// Regulatory and standards auditing.
    Compliance,
    /// AI integration.
    Ai,
    /// Testing and quality assurance.
    Qa,
}

impl AgentRole {
    pub const ALL: [AgentRole; 5] = [
        AgentRole::Core,
        AgentRole::Municipal,
        AgentRole::Compliance,
        AgentRole::Ai,
        AgentRole::Qa,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Core => "core",
            AgentRole::Municipal => "municipal",
            AgentRole::Compliance => "compliance",
            AgentRole::Ai => "ai",
            AgentRole::Qa => "qa",
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A party affected by the workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stakeholder {
    pub name: String,
    /// Canton code of the stakeholder; empty when unknown.
    #[serde(default)]
    pub canton: String,
}

impl Stakeholder {
    pub fn new(name: impl Into<String>, canton: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            canton: canton.into(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_languages() -> Vec<String> {
    vec!["de".to_string()]
}

/// Immutable workflow input supplied by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub municipality: String,
    #[serde(default)]
    pub canton: String,
    #[serde(default = "default_languages")]
    pub languages: Vec<String>,
    /// Free-form requirement text. Each entry is matched against the
    /// capability table; unmatched entries are taken as literal capability tags.
    #[serde(default)]
    pub requirements: Vec<String>,
    /// Citizen-facing requirements. Only keyword matches contribute capabilities.
    #[serde(default)]
    pub citizen_requirements: Vec<String>,
    #[serde(default)]
    pub stakeholders: Vec<Stakeholder>,
    #[serde(default)]
    pub constraints: BTreeMap<String, Value>,
    #[serde(default = "default_true")]
    pub allow_parallel: bool,
    /// Name of a built-in workflow template.
    #[serde(default)]
    pub template: Option<String>,
    /// Explicit phase template; takes precedence over `template`.
    #[serde(default)]
    pub phase_template: Option<Vec<PhaseTemplate>>,
    /// Categories for the whole-workflow pre-check; empty means the configured defaults.
    #[serde(default)]
    pub compliance_requirements: Vec<String>,
}

impl WorkflowDefinition {
    pub fn new(municipality: impl Into<String>, canton: impl Into<String>) -> Self {
        Self {
            municipality: municipality.into(),
            canton: canton.into(),
            languages: default_languages(),
            requirements: Vec::new(),
            citizen_requirements: Vec::new(),
            stakeholders: Vec::new(),
            constraints: BTreeMap::new(),
            allow_parallel: true,
            template: None,
            phase_template: None,
            compliance_requirements: Vec::new(),
        }
    }

    pub fn with_requirement(mut self, requirement: impl Into<String>) -> Self {
        self.requirements.push(requirement.into());
        self
    }

    pub fn with_citizen_requirement(mut self, requirement: impl Into<String>) -> Self {
        self.citizen_requirements.push(requirement.into());
        self
    }

    pub fn with_stakeholder(mut self, stakeholder: Stakeholder) -> Self {
        self.stakeholders.push(stakeholder);
        self
    }

    pub fn with_constraint(mut self, key: impl Into<String>, value: Value) -> Self {
        self.constraints.insert(key.into(), value);
        self
    }

    pub fn with_languages(mut self, languages: Vec<String>) -> Self {
        self.languages = languages;
        self
    }

    pub fn with_allow_parallel(mut self, allow: bool) -> Self {
        self.allow_parallel = allow;
        self
    }

    pub fn with_template(mut self, name: impl Into<String>) -> Self {
        self.template = Some(name.into());
        self
    }

    pub fn with_phase_template(mut self, phases: Vec<PhaseTemplate>) -> Self {
        self.phase_template = Some(phases);
        self
    }
}

/// Lifecycle status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Initializing,
    Validated,
    Executing,
    Completed,
    Failed,
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowStatus::Completed | WorkflowStatus::Failed)
    }

    /// Legal transitions: `initializing → validated → executing → {completed | failed}`,
    /// plus `→ failed` from any non-terminal state.
    pub fn can_transition_to(&self, next: WorkflowStatus) -> bool {
        use WorkflowStatus::*;
        matches!(
            (self, next),
            (Initializing, Validated)
                | (Validated, Executing)
                | (Executing, Completed)
                | (Initializing | Validated | Executing, Failed)
        )
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkflowStatus::Initializing => "initializing",
            WorkflowStatus::Validated => "validated",
            WorkflowStatus::Executing => "executing",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Kind of risk flagged by the analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTag {
    CrossCanton,
    AiPrivacy,
    HighComplexity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFactor {
    pub tag: RiskTag,
    pub description: String,
}

/// Estimated resource needs of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceEstimate {
    pub agents: usize,
    pub memory_mb: u64,
    pub cpu_millis: u64,
}

/// Read-only analysis computed once, before composition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowAnalysis {
    pub complexity: f64,
    pub estimated_duration_secs: u64,
    pub resource_estimate: ResourceEstimate,
    pub risk_factors: Vec<RiskFactor>,
    /// In `0.0..=1.0`.
    pub success_probability: f64,
    /// Distinct capability tags, sorted.
    pub required_capabilities: Vec<String>,
}

impl WorkflowAnalysis {
    pub fn has_risk(&self, tag: RiskTag) -> bool {
        self.risk_factors.iter().any(|r| r.tag == tag)
    }
}

/// How phases of a plan run their agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStrategy {
    Sequential,
    Parallel,
    Hybrid,
}

/// Aggregated resource needs of a composition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    /// Largest number of slots any single phase needs at once.
    pub peak_concurrency: u32,
    /// Largest slot need of a single agent.
    pub max_agent_slots: u32,
    pub total_agents: usize,
    /// Largest per-agent memory declaration.
    pub memory_mb: u64,
    /// Largest per-agent CPU declaration.
    pub cpu_millis: u64,
}

/// Selected agents partitioned by role, with the phase dependency graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentComposition {
    pub buckets: BTreeMap<AgentRole, Vec<String>>,
    /// Phase name → prerequisite phase names.
    pub dependencies: BTreeMap<String, Vec<String>>,
    pub strategy: ExecutionStrategy,
    pub requirements: ResourceRequirements,
    /// Capability tag → agent chosen to provide it.
    pub capability_assignments: BTreeMap<String, String>,
}

impl AgentComposition {
    pub fn agents_in(&self, role: AgentRole) -> &[String] {
        self.buckets.get(&role).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn all_agents(&self) -> Vec<&str> {
        self.buckets
            .values()
            .flat_map(|ids| ids.iter().map(String::as_str))
            .collect()
    }
}

/// A named group of agent invocations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
    pub name: String,
    pub agents: Vec<String>,
    pub depends_on: BTreeSet<String>,
    pub parallel: bool,
    pub compliance_checks: Vec<String>,
}

/// Phases in topological order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub phases: Vec<Phase>,
}

impl ExecutionPlan {
    pub fn phase(&self, name: &str) -> Option<&Phase> {
        self.phases.iter().find(|p| p.name == name)
    }

    pub fn phase_names(&self) -> Vec<&str> {
        self.phases.iter().map(|p| p.name.as_str()).collect()
    }

    /// Every agent referenced by the plan, in order of first appearance.
    pub fn agent_ids(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        self.phases
            .iter()
            .flat_map(|p| p.agents.iter())
            .filter(|id| seen.insert(id.as_str()))
            .map(String::as_str)
            .collect()
    }
}

/// Snapshot of the budget granted to one workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceAllocation {
    pub workflow_id: WorkflowId,
    pub max_concurrent_agents: u32,
    pub max_memory_per_agent_mb: u64,
    pub max_cpu_millis_per_agent: u64,
    pub max_execution_time_secs: u64,
    pub max_api_calls_per_hour: u32,
    pub granted_at: DateTime<Utc>,
}

impl ResourceAllocation {
    pub fn max_execution_time(&self) -> Duration {
        Duration::from_secs(self.max_execution_time_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

/// Result of one agent invocation inside a phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentOutcome {
    pub agent_id: String,
    pub success: bool,
    pub output: Option<String>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseReport {
    pub name: String,
    pub status: PhaseStatus,
    pub agents: Vec<AgentOutcome>,
    pub compliance: Option<ComplianceReport>,
    pub allocated_slots: u32,
    pub duration_ms: u64,
    pub error: Option<String>,
}

impl PhaseReport {
    pub fn new(name: impl Into<String>, status: PhaseStatus) -> Self {
        Self {
            name: name.into(),
            status,
            agents: Vec::new(),
            compliance: None,
            allocated_slots: 0,
            duration_ms: 0,
            error: None,
        }
    }
}

/// Final report of a workflow run. Produced on every exit path once execution started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub workflow_id: WorkflowId,
    pub status: WorkflowStatus,
    pub strategy: ExecutionStrategy,
    pub precheck: Option<ComplianceReport>,
    pub phases: Vec<PhaseReport>,
    pub error: Option<String>,
    /// Name of the recovery strategy that handled a failure.
    pub recovery: Option<String>,
    /// Highest number of slots held by running agents at once.
    pub peak_concurrent_slots: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub summary: String,
}

impl ExecutionReport {
    pub fn phase(&self, name: &str) -> Option<&PhaseReport> {
        self.phases.iter().find(|p| p.name == name)
    }

    pub fn phases_with_status(&self, status: PhaseStatus) -> Vec<&str> {
        self.phases
            .iter()
            .filter(|p| p.status == status)
            .map(|p| p.name.as_str())
            .collect()
    }

    /// Every failed compliance category across the pre-check and all phases.
    pub fn failed_categories(&self) -> Vec<String> {
        self.precheck
            .iter()
            .chain(self.phases.iter().filter_map(|p| p.compliance.as_ref()))
            .flat_map(ComplianceReport::failed_categories)
            .collect()
    }
}

/// Outcome returned by the orchestrator once a workflow started executing.
#[derive(Debug)]
pub struct ExecutionResult {
    pub workflow_id: WorkflowId,
    pub status: WorkflowStatus,
    pub report: ExecutionReport,
    /// The execution-phase error that failed the workflow, if any.
    pub error: Option<CivicaError>,
}

/// The mutable run record, owned by the orchestrator for its lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub status: WorkflowStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub definition: WorkflowDefinition,
    pub analysis: Option<WorkflowAnalysis>,
    pub composition: Option<AgentComposition>,
    pub resource_allocation: Option<ResourceAllocation>,
    pub execution_plan: Option<ExecutionPlan>,
    pub report: Option<ExecutionReport>,
}

impl Workflow {
    pub fn new(definition: WorkflowDefinition) -> Self {
        Self {
            id: WorkflowId::generate(),
            status: WorkflowStatus::Initializing,
            start_time: Utc::now(),
            end_time: None,
            definition,
            analysis: None,
            composition: None,
            resource_allocation: None,
            execution_plan: None,
            report: None,
        }
    }

    /// Move to `next` if the transition is legal. Returns whether it happened.
    pub fn transition(&mut self, next: WorkflowStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        if next.is_terminal() {
            self.end_time = Some(Utc::now());
        }
        true
    }

    /// Mark the workflow failed unless it already reached a terminal state.
    pub fn fail(&mut self) {
        self.transition(WorkflowStatus::Failed);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_definition_defaults_from_json() {
        let def: WorkflowDefinition =
            serde_json::from_value(json!({"municipality": "Bruchtal", "canton": "ZH"})).unwrap();
        assert!(def.allow_parallel);
        assert_eq!(def.languages, vec!["de".to_string()]);
        assert!(def.requirements.is_empty());
    }

    #[test]
    fn test_status_transitions() {
        use WorkflowStatus::*;
        assert!(Initializing.can_transition_to(Validated));
        assert!(Initializing.can_transition_to(Failed));
        assert!(Executing.can_transition_to(Completed));
        assert!(!Initializing.can_transition_to(Executing));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Executing));
    }

    #[test]
    fn test_terminal_workflow_stays_terminal() {
        let mut wf = Workflow::new(WorkflowDefinition::new("Bruchtal", "ZH"));
        assert!(wf.transition(WorkflowStatus::Validated));
        assert!(wf.transition(WorkflowStatus::Executing));
        assert!(wf.transition(WorkflowStatus::Completed));
        assert!(wf.end_time.is_some());

        wf.fail();
        assert_eq!(wf.status, WorkflowStatus::Completed);
        assert!(!wf.transition(WorkflowStatus::Executing));
    }

    #[test]
    fn test_plan_agent_ids_deduplicated() {
        let plan = ExecutionPlan {
            phases: vec![
                Phase {
                    name: "A".into(),
                    agents: vec!["x".into(), "y".into()],
                    depends_on: BTreeSet::new(),
                    parallel: true,
                    compliance_checks: Vec::new(),
                },
                Phase {
                    name: "B".into(),
                    agents: vec!["y".into(), "z".into()],
                    depends_on: ["A".to_string()].into_iter().collect(),
                    parallel: false,
                    compliance_checks: Vec::new(),
                },
            ],
        };
        assert_eq!(plan.agent_ids(), vec!["x", "y", "z"]);
        assert_eq!(plan.phase_names(), vec!["A", "B"]);
    }

    #[test]
    fn test_agent_role_display() {
        assert_eq!(AgentRole::Ai.to_string(), "ai");
        assert_eq!(AgentRole::Municipal.to_string(), "municipal");
        let json = serde_json::to_string(&AgentRole::Qa).unwrap();
        assert_eq!(json, "\"qa\"");
    }
}

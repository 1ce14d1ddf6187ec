//! Agent orchestration and scaling engine for municipal workflows.
//!
//! Turns a declarative [`WorkflowDefinition`] into a validated, resourced,
//! phased execution across registered agents, gating every phase on
//! compliance checks, while a separate control loop grows and shrinks the
//! agent pool.
//!
//! # Main types
//!
//! - [`Orchestrator`]: Entry point: `orchestrate_workflow` and `manage_scaling`.
//! - [`AgentRegistry`]: Known agents and their declared capabilities.
//! - [`ResourceManager`]: Shared concurrency-slot counter with idempotent release.
//! - [`WorkflowAnalyzer`]: Deterministic complexity, duration and risk estimates.
//! - [`AgentComposer`]: Capability-to-agent selection and phase plan construction.
//! - [`ExecutionEngine`]: Dependency-gated phase execution with compliance gates.
//! - [`ScalingManager`]: Threshold-and-cooldown scaling control loop.
//! - [`OrchestratorConfig`]: TOML-loadable configuration with defaults.

/// Workflow analysis.
pub mod analyzer;
/// Agent selection and execution plan construction.
pub mod composer;
/// Orchestrator configuration.
pub mod config;
/// Workflow validation and phase execution.
pub mod engine;
/// Outcome statistics learned from finished workflows.
pub mod learning;
/// Agent state and metrics.
pub mod monitor;
/// The orchestrator facade.
pub mod orchestrator;
/// Failure recovery strategies.
pub mod recovery;
/// Agent trait and registry.
pub mod registry;
/// Concurrency-slot accounting.
pub mod resources;
/// Pool scaling control loop.
pub mod scaling;
/// Built-in workflow templates.
pub mod templates;
/// Workflow, plan, and report types.
pub mod types;

pub use analyzer::WorkflowAnalyzer;
pub use composer::{AgentComposer, ComposedWorkflow};
pub use config::{
    AnalyzerConfig, CapabilityMapping, CapabilityTable, ComplianceConfig, HistoryConfig,
    OrchestratorConfig, PhaseTemplate, PhaseTemplateConfig, RecoveryKind, ResourceLimits,
    ScalingPolicy,
};
pub use engine::ExecutionEngine;
pub use learning::{template_key, OrchestrationInsights, OutcomeHistory, OutcomeStats};
pub use monitor::{AgentMetrics, AgentMonitor, AgentState, WorkerStatus};
pub use orchestrator::Orchestrator;
pub use recovery::{AbortAndReport, FailureContext, RecoveryStrategy};
pub use registry::{Agent, AgentDescriptor, AgentRegistry, AgentResult, PhaseContext};
pub use resources::{Allocation, AllocationGuard, AllocationRequest, ResourceManager, ResourceStats};
pub use scaling::{ScalingAction, ScalingDecision, ScalingManager};
pub use templates::{default_templates, find_template, WorkflowTemplate};
pub use types::{
    AgentComposition, AgentOutcome, AgentRole, ExecutionPlan, ExecutionReport, ExecutionResult,
    ExecutionStrategy, Phase, PhaseReport, PhaseStatus, ResourceAllocation, ResourceEstimate,
    ResourceRequirements, RiskFactor, RiskTag, Stakeholder, Workflow, WorkflowAnalysis,
    WorkflowDefinition, WorkflowStatus,
};

use crate::compliance::ComplianceReport;
use thiserror::Error;

/// A convenience `Result` alias using [`CivicaError`].
pub type CivicaResult<T> = Result<T, CivicaError>;

/// Closed error taxonomy for workflow orchestration.
///
/// Validation-time errors are collected and surfaced together through
/// [`CivicaError::ValidationFailed`]. Resource and timeout errors are terminal
/// for a workflow and are never retried by the engine.
#[derive(Error, Debug)]
pub enum CivicaError {
    /// The workflow definition is missing mandatory fields.
    #[error("Invalid workflow definition: {0}")]
    InvalidDefinition(String),

    /// A mandatory capability has no registered provider.
    #[error("No registered agent provides mandatory capability '{0}'")]
    UnsatisfiableCapability(String),

    /// The composed phase graph cannot be executed (cycle, unknown phase, uncovered agent).
    #[error("Composition infeasible: {0}")]
    CompositionInfeasible(String),

    /// Not enough concurrency capacity to grant an allocation.
    #[error("Resource exhausted: requested {requested} slot(s), {available} available")]
    ResourceExhausted {
        /// Slots requested.
        requested: u32,
        /// Slots available when the request was made.
        available: u32,
    },

    /// A phase was reached before one of its prerequisites completed.
    #[error("Dependency violation: phase '{phase}' requires '{missing}' to be completed")]
    DependencyViolation {
        /// Phase about to run.
        phase: String,
        /// Prerequisite that is not completed.
        missing: String,
    },

    /// A per-phase compliance gate reported at least one failing category.
    #[error(
        "Compliance failure in phase '{phase}': {}",
        .report.failed_categories().join(", ")
    )]
    CompliancePhaseFailure {
        /// Phase whose checks failed.
        phase: String,
        /// The complete report, including passing categories.
        report: Box<ComplianceReport>,
    },

    /// The workflow exceeded its granted maximum execution time.
    #[error("Execution timed out after {limit_secs}s")]
    ExecutionTimeout {
        /// Granted limit in seconds.
        limit_secs: u64,
    },

    /// An agent invocation failed inside a phase.
    #[error("Agent '{agent}' failed in phase '{phase}': {message}")]
    AgentInvocation {
        /// Agent identifier.
        agent: String,
        /// Phase the agent ran in.
        phase: String,
        /// Failure description.
        message: String,
    },

    /// Pre-execution validation failed; every failing reason is listed.
    #[error("Workflow validation failed: {}", .reasons.join(", "))]
    ValidationFailed {
        /// All failing reasons, in check order.
        reasons: Vec<String>,
    },

    /// An error raised by an agent implementation.
    #[error("Agent error: {0}")]
    Agent(String),

    /// A compliance rule evaluator failed internally.
    #[error("Compliance error: {0}")]
    Compliance(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CivicaError {
    /// Short, stable name of the variant, used in reports and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            CivicaError::InvalidDefinition(_) => "invalid_definition",
            CivicaError::UnsatisfiableCapability(_) => "unsatisfiable_capability",
            CivicaError::CompositionInfeasible(_) => "composition_infeasible",
            CivicaError::ResourceExhausted { .. } => "resource_exhausted",
            CivicaError::DependencyViolation { .. } => "dependency_violation",
            CivicaError::CompliancePhaseFailure { .. } => "compliance_phase_failure",
            CivicaError::ExecutionTimeout { .. } => "execution_timeout",
            CivicaError::AgentInvocation { .. } => "agent_invocation_error",
            CivicaError::ValidationFailed { .. } => "validation_failed",
            CivicaError::Agent(_) => "agent",
            CivicaError::Compliance(_) => "compliance",
            CivicaError::Config(_) => "config",
            CivicaError::Json(_) => "json",
            CivicaError::Io(_) => "io",
        }
    }

    /// Whether this error ends a workflow without any engine-side retry.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CivicaError::ResourceExhausted { .. } | CivicaError::ExecutionTimeout { .. }
        )
    }
}

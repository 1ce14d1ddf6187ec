//! Compliance validation for orchestrated municipal workflows.
//!
//! Evaluates workflows and phases against a pluggable rule table of
//! compliance categories, produces complete reports with remediation
//! proposals, and records runtime events for auditing.
//!
//! # Main types
//!
//! - [`ComplianceValidator`]: Evaluates every requested category and builds a [`ComplianceReport`].
//! - [`RuleTable`]: Category tag to [`ComplianceRule`] mapping, with Swiss defaults.
//! - [`ComplianceOperation`]: The validated subject: a workflow or a single phase.
//! - [`ComplianceHookChain`]: Dispatches [`ComplianceEvent`]s to registered hooks.
//! - [`JsonReportStore`]: Persists reports as JSON files.

/// Runtime compliance event hooks.
pub mod hooks;
/// The validated operation and its attributes.
pub mod operation;
/// Report persistence to JSON files.
pub mod persistence;
/// Rule trait, rule table, and built-in Swiss rules.
pub mod rules;
/// Report generation and explicit fix application.
pub mod validator;

pub use civica_core::{CheckResult, CheckStatus, ComplianceReport, Fix};
pub use hooks::{AuditTrailHook, ComplianceEvent, ComplianceHook, ComplianceHookChain};
pub use operation::{ComplianceOperation, OperationAgent, OperationScope};
pub use persistence::JsonReportStore;
pub use rules::{ComplianceRule, CompositeRule, FnRule, RuleOutcome, RuleTable};
pub use validator::{ComplianceValidator, FixOutcome, RemediationHandler};

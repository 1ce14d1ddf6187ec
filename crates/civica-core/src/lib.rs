//! Core types and error definitions for the Civica orchestration framework.
//!
//! This crate provides the foundational types shared across all Civica crates:
//! the closed error taxonomy, compliance report types, and workflow identifiers.
//!
//! # Main types
//!
//! - [`CivicaError`]: Unified error enum for orchestration, composition, and execution.
//! - [`CivicaResult`]: Convenience alias for `Result<T, CivicaError>`.
//! - [`ComplianceReport`]: Per-operation compliance outcome with required fixes.
//! - [`WorkflowId`]: Unique, submission-ordered workflow identifier.

/// Compliance report types shared by the validator and the engine.
pub mod compliance;
/// Error taxonomy.
pub mod error;
/// Workflow identifiers.
pub mod id;

pub use compliance::{CheckResult, CheckStatus, ComplianceReport, Fix};
pub use error::{CivicaError, CivicaResult};
pub use id::WorkflowId;

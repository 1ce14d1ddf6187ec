use crate::operation::ComplianceOperation;
use crate::rules::RuleTable;
use async_trait::async_trait;
use civica_core::{CheckResult, CivicaResult, ComplianceReport, Fix};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, info, warn};

/// Applies a single remediation action. Supplied by the host.
#[async_trait]
pub trait RemediationHandler: Send + Sync {
    async fn remediate(&self, fix: &Fix) -> CivicaResult<()>;
}

/// Outcome of applying one fix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixOutcome {
    pub fix: Fix,
    pub applied: bool,
    pub error: Option<String>,
}

/// Evaluates operations against the rule table.
///
/// Every requested category is evaluated; a failing or broken category never
/// prevents the others from running. Unknown categories and evaluator errors
/// are recorded as failures.
pub struct ComplianceValidator {
    rules: RuleTable,
    auto_remediable: BTreeSet<String>,
}

impl ComplianceValidator {
    pub fn new(rules: RuleTable, auto_remediable: impl IntoIterator<Item = String>) -> Self {
        Self {
            rules,
            auto_remediable: auto_remediable.into_iter().collect(),
        }
    }

    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    pub fn is_auto_remediable(&self, category: &str) -> bool {
        self.auto_remediable.contains(category)
    }

    /// Validate `operation` against `checks`. Duplicate categories are evaluated once.
    pub async fn validate(
        &self,
        operation: &ComplianceOperation,
        checks: &[String],
    ) -> ComplianceReport {
        let mut seen = HashSet::new();
        let mut results = Vec::with_capacity(checks.len());
        let mut fixes = Vec::new();

        for category in checks {
            if !seen.insert(category.as_str()) {
                continue;
            }

            let Some(rule) = self.rules.get(category) else {
                warn!(operation = %operation.id, category = %category, "No rule registered");
                results.push(CheckResult::fail(
                    category,
                    "no rule registered for category",
                ));
                continue;
            };

            match rule.evaluate(operation).await {
                Ok(outcome) if outcome.passed => {
                    results.push(CheckResult::pass(category, outcome.reason));
                }
                Ok(outcome) => {
                    debug!(operation = %operation.id, category = %category, reason = %outcome.reason, "Check failed");
                    if self.is_auto_remediable(category) {
                        fixes.extend(
                            outcome
                                .fixes
                                .into_iter()
                                .map(|f| Fix::new(category.clone(), f.action)),
                        );
                    }
                    results.push(CheckResult::fail(category, outcome.reason));
                }
                Err(e) => {
                    warn!(operation = %operation.id, category = %category, error = %e, "Rule evaluator failed");
                    results.push(CheckResult::fail(
                        category,
                        format!("evaluator error: {e}"),
                    ));
                }
            }
        }

        let report = ComplianceReport::new(operation.id.clone(), results, fixes);
        info!(
            operation = %operation.id,
            passed = report.passed(),
            fixes = report.fixes_required.len(),
            "Compliance validation complete"
        );
        report
    }

    /// Apply the fixes listed in `report` through `handler`, in order.
    ///
    /// Never called by [`ComplianceValidator::validate`]; remediation is an
    /// explicit step. A failing fix does not stop the remaining ones.
    pub async fn apply_fixes(
        &self,
        report: &ComplianceReport,
        handler: &dyn RemediationHandler,
    ) -> Vec<FixOutcome> {
        let mut outcomes = Vec::with_capacity(report.fixes_required.len());
        for fix in &report.fixes_required {
            let outcome = match handler.remediate(fix).await {
                Ok(()) => FixOutcome {
                    fix: fix.clone(),
                    applied: true,
                    error: None,
                },
                Err(e) => {
                    warn!(category = %fix.category, action = %fix.action, error = %e, "Fix failed");
                    FixOutcome {
                        fix: fix.clone(),
                        applied: false,
                        error: Some(e.to_string()),
                    }
                }
            };
            outcomes.push(outcome);
        }
        outcomes
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::operation::OperationScope;
    use crate::rules::RuleOutcome;
    use civica_core::{CheckStatus, CivicaError};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn op() -> ComplianceOperation {
        ComplianceOperation::new("WF-1", OperationScope::Workflow, "Bruchtal", "ZH")
            .with_languages(vec!["de".into()])
    }

    fn checks(tags: &[&str]) -> Vec<String> {
        tags.iter().map(|t| t.to_string()).collect()
    }

    #[tokio::test]
    async fn test_all_categories_evaluated_after_failure() {
        let validator = ComplianceValidator::new(RuleTable::swiss_defaults(), Vec::new());
        let op = op().with_attribute("tls", json!(false));
        let report = validator
            .validate(&op, &checks(&["security", "privacy", "multilingual"]))
            .await;
        assert_eq!(report.results.len(), 3);
        assert_eq!(report.failed_categories(), vec!["security".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_category_fails_closed() {
        let validator = ComplianceValidator::new(RuleTable::new(), Vec::new());
        let report = validator.validate(&op(), &checks(&["mystery"])).await;
        let result = report.result_for("mystery").unwrap();
        assert_eq!(result.status, CheckStatus::Fail);
        assert!(result.reason.contains("no rule registered"));
    }

    #[tokio::test]
    async fn test_evaluator_error_fails_closed() {
        let mut table = RuleTable::new();
        table.register_fn("broken", |_| Err(CivicaError::Compliance("lookup failed".into())));
        let validator = ComplianceValidator::new(table, Vec::new());
        let report = validator.validate(&op(), &checks(&["broken"])).await;
        assert!(!report.passed());
        assert!(report.results[0].reason.contains("lookup failed"));
    }

    #[tokio::test]
    async fn test_fixes_only_for_auto_remediable() {
        let validator = ComplianceValidator::new(
            RuleTable::swiss_defaults(),
            vec!["security".to_string()],
        );
        let op = op()
            .with_attribute("tls", json!(false))
            .with_attribute("wcag_level", json!("A"));
        let report = validator
            .validate(&op, &checks(&["security", "accessibility"]))
            .await;
        assert_eq!(report.failures().len(), 2);
        assert_eq!(report.fixes_required.len(), 1);
        assert_eq!(report.fixes_required[0].category, "security");
    }

    #[tokio::test]
    async fn test_duplicate_checks_evaluated_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut table = RuleTable::new();
        table.register_fn("counted", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(RuleOutcome::pass("ok"))
        });
        let validator = ComplianceValidator::new(table, Vec::new());
        let report = validator
            .validate(&op(), &checks(&["counted", "counted"]))
            .await;
        assert_eq!(report.results.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    struct FlakyHandler;

    #[async_trait]
    impl RemediationHandler for FlakyHandler {
        async fn remediate(&self, fix: &Fix) -> CivicaResult<()> {
            if fix.category == "accessibility" {
                Err(CivicaError::Compliance("theme locked".into()))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_apply_fixes_is_explicit_and_continues_on_error() {
        let validator = ComplianceValidator::new(
            RuleTable::swiss_defaults(),
            vec!["security".to_string(), "accessibility".to_string()],
        );
        let op = op()
            .with_attribute("tls", json!(false))
            .with_attribute("wcag_level", json!("A"));
        let report = validator
            .validate(&op, &checks(&["accessibility", "security"]))
            .await;
        assert_eq!(report.fixes_required.len(), 2);

        let outcomes = validator.apply_fixes(&report, &FlakyHandler).await;
        assert_eq!(outcomes.len(), 2);
        assert!(!outcomes[0].applied);
        assert!(outcomes[1].applied);
    }
}

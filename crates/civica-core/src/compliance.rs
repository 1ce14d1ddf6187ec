use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a single compliance category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Fail,
}

/// Result of evaluating one compliance category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub category: String,
    pub status: CheckStatus,
    /// Human-readable reason, present for passes and failures alike.
    pub reason: String,
}

impl CheckResult {
    /// A passing result.
    pub fn pass(category: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            status: CheckStatus::Pass,
            reason: reason.into(),
        }
    }

    /// A failing result.
    pub fn fail(category: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            status: CheckStatus::Fail,
            reason: reason.into(),
        }
    }

    pub fn passed(&self) -> bool {
        self.status == CheckStatus::Pass
    }
}

/// A remediation action proposed by a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fix {
    /// Category that proposed the fix.
    pub category: String,
    /// What should be done.
    pub action: String,
}

impl Fix {
    pub fn new(category: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            action: action.into(),
        }
    }
}

/// A compliance report for one validated operation.
///
/// Reports are immutable once generated; re-validation produces a new report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceReport {
    /// Identifier of the validated operation (workflow id or `workflow/phase`).
    pub operation_id: String,
    pub results: Vec<CheckResult>,
    /// Ordered remediation actions for auto-remediable categories.
    pub fixes_required: Vec<Fix>,
    pub generated_at: DateTime<Utc>,
    pub summary: String,
}

impl ComplianceReport {
    pub fn new(
        operation_id: impl Into<String>,
        results: Vec<CheckResult>,
        fixes_required: Vec<Fix>,
    ) -> Self {
        let operation_id = operation_id.into();
        let passed = results.iter().filter(|r| r.passed()).count();
        let summary = format!(
            "{}: {}/{} categories passed, {} fix(es) required",
            operation_id,
            passed,
            results.len(),
            fixes_required.len()
        );

        Self {
            operation_id,
            results,
            fixes_required,
            generated_at: Utc::now(),
            summary,
        }
    }

    /// True when no category failed. An empty report passes.
    pub fn passed(&self) -> bool {
        self.results.iter().all(CheckResult::passed)
    }

    pub fn failures(&self) -> Vec<&CheckResult> {
        self.results.iter().filter(|r| !r.passed()).collect()
    }

    pub fn failed_categories(&self) -> Vec<String> {
        self.failures().iter().map(|r| r.category.clone()).collect()
    }

    pub fn result_for(&self, category: &str) -> Option<&CheckResult> {
        self.results.iter().find(|r| r.category == category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_passes_when_all_pass() {
        let report = ComplianceReport::new(
            "WF-1",
            vec![
                CheckResult::pass("privacy", "data stays in CH"),
                CheckResult::pass("security", "tls enabled"),
            ],
            Vec::new(),
        );
        assert!(report.passed());
        assert!(report.failures().is_empty());
        assert_eq!(report.summary, "WF-1: 2/2 categories passed, 0 fix(es) required");
    }

    #[test]
    fn test_report_collects_failures() {
        let report = ComplianceReport::new(
            "WF-2/Setup",
            vec![
                CheckResult::fail("multilingual", "no official language"),
                CheckResult::pass("security", "ok"),
                CheckResult::fail("accessibility", "WCAG level 'A' below AA"),
            ],
            vec![Fix::new("multilingual", "Enable German (de)")],
        );
        assert!(!report.passed());
        assert_eq!(
            report.failed_categories(),
            vec!["multilingual".to_string(), "accessibility".to_string()]
        );
        assert_eq!(
            report.result_for("security").map(|r| r.status),
            Some(CheckStatus::Pass)
        );
    }

    #[test]
    fn test_empty_report_passes() {
        let report = ComplianceReport::new("WF-3", Vec::new(), Vec::new());
        assert!(report.passed());
    }

    #[test]
    fn test_check_status_serialization() {
        let json = serde_json::to_string(&CheckStatus::Fail).unwrap();
        assert_eq!(json, "\"fail\"");
    }
}

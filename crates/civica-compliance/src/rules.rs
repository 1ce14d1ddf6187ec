use crate::operation::ComplianceOperation;
use async_trait::async_trait;
use civica_core::{CivicaResult, Fix};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Official Swiss languages accepted by the multilingual rule.
pub const OFFICIAL_LANGUAGES: &[&str] = &["de", "fr", "it", "rm"];

/// The 26 Swiss canton codes.
pub const SWISS_CANTONS: &[&str] = &[
    "AG", "AI", "AR", "BE", "BL", "BS", "FR", "GE", "GL", "GR", "JU", "LU", "NE", "NW", "OW",
    "SG", "SH", "SO", "SZ", "TG", "TI", "UR", "VD", "VS", "ZG", "ZH",
];

/// Base categories of the Swiss digital-government rule set.
pub const BASE_CATEGORIES: &[&str] = &[
    "accessibility",
    "multilingual",
    "privacy",
    "security",
    "canton_requirements",
    "service_standards",
    "ai_compliance",
];

/// What a single rule evaluation produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleOutcome {
    pub passed: bool,
    pub reason: String,
    /// Remediation proposals; only meaningful when `passed` is false.
    pub fixes: Vec<Fix>,
}

impl RuleOutcome {
    pub fn pass(reason: impl Into<String>) -> Self {
        Self {
            passed: true,
            reason: reason.into(),
            fixes: Vec::new(),
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            reason: reason.into(),
            fixes: Vec::new(),
        }
    }

    /// Attach a remediation action. The validator re-tags it with the evaluated category.
    pub fn with_fix(mut self, action: impl Into<String>) -> Self {
        self.fixes.push(Fix::new("", action));
        self
    }
}

/// Evaluator for one compliance category.
///
/// Returning `Err` means the evaluator itself broke; the validator records
/// the category as failed with the error as reason.
#[async_trait]
pub trait ComplianceRule: Send + Sync {
    async fn evaluate(&self, operation: &ComplianceOperation) -> CivicaResult<RuleOutcome>;
}

/// Adapter turning a plain function into a [`ComplianceRule`].
pub struct FnRule<F>(pub F);

#[async_trait]
impl<F> ComplianceRule for FnRule<F>
where
    F: Fn(&ComplianceOperation) -> CivicaResult<RuleOutcome> + Send + Sync,
{
    async fn evaluate(&self, operation: &ComplianceOperation) -> CivicaResult<RuleOutcome> {
        (self.0)(operation)
    }
}

/// A rule that passes only when every member rule passes.
pub struct CompositeRule {
    members: Vec<(String, Arc<dyn ComplianceRule>)>,
}

impl CompositeRule {
    pub fn new(members: Vec<(String, Arc<dyn ComplianceRule>)>) -> Self {
        Self { members }
    }
}

#[async_trait]
impl ComplianceRule for CompositeRule {
    async fn evaluate(&self, operation: &ComplianceOperation) -> CivicaResult<RuleOutcome> {
        let mut failed = Vec::new();
        let mut fixes = Vec::new();
        for (name, rule) in &self.members {
            match rule.evaluate(operation).await {
                Ok(outcome) if outcome.passed => {}
                Ok(outcome) => {
                    failed.push(format!("{name} ({})", outcome.reason));
                    fixes.extend(outcome.fixes);
                }
                Err(e) => failed.push(format!("{name} (evaluator error: {e})")),
            }
        }

        if failed.is_empty() {
            Ok(RuleOutcome::pass(format!(
                "all {} member categories passed",
                self.members.len()
            )))
        } else {
            Ok(RuleOutcome {
                passed: false,
                reason: format!("failing: {}", failed.join("; ")),
                fixes,
            })
        }
    }
}

/// Mapping from category tag to evaluator.
#[derive(Clone, Default)]
pub struct RuleTable {
    rules: BTreeMap<String, Arc<dyn ComplianceRule>>,
}

impl RuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the evaluator for a category.
    pub fn register(&mut self, category: impl Into<String>, rule: Arc<dyn ComplianceRule>) {
        self.rules.insert(category.into(), rule);
    }

    /// Register a plain function as evaluator.
    pub fn register_fn<F>(&mut self, category: impl Into<String>, f: F)
    where
        F: Fn(&ComplianceOperation) -> CivicaResult<RuleOutcome> + Send + Sync + 'static,
    {
        self.register(category, Arc::new(FnRule(f)));
    }

    pub fn get(&self, category: &str) -> Option<&Arc<dyn ComplianceRule>> {
        self.rules.get(category)
    }

    pub fn contains(&self, category: &str) -> bool {
        self.rules.contains_key(category)
    }

    pub fn categories(&self) -> Vec<&str> {
        self.rules.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn composite(&self, members: &[&str]) -> CompositeRule {
        CompositeRule::new(
            members
                .iter()
                .filter_map(|m| self.rules.get(*m).map(|r| (m.to_string(), r.clone())))
                .collect(),
        )
    }

    fn alias(&mut self, alias: &str, target: &str) {
        if let Some(rule) = self.rules.get(target).cloned() {
            self.rules.insert(alias.to_string(), rule);
        }
    }

    /// The built-in Swiss digital-government rule set, including the
    /// category tags used by the built-in workflow templates.
    pub fn swiss_defaults() -> Self {
        let mut table = Self::new();
        table.register_fn("accessibility", accessibility);
        table.register_fn("multilingual", multilingual);
        table.register_fn("privacy", privacy);
        table.register_fn("security", security);
        table.register_fn("canton_requirements", canton_requirements);
        table.register_fn("service_standards", service_standards);
        table.register_fn("ai_compliance", ai_compliance);
        table.register_fn("citizen_consent", citizen_consent);
        table.register_fn("comprehensive_testing", comprehensive_testing);

        for (alias, target) in [
            ("security_baseline", "security"),
            ("privacy_configuration", "privacy"),
            ("privacy_protection", "privacy"),
            ("privacy_assessment", "privacy"),
            ("privacy_compliance", "privacy"),
            ("citizen_privacy", "privacy"),
            ("ai_privacy", "privacy"),
            ("transparency", "ai_compliance"),
            ("ai_transparency", "ai_compliance"),
            ("ai_data_processing", "ai_compliance"),
            ("accessibility_development", "accessibility"),
            ("multilingual_support", "multilingual"),
            ("service_requirements", "service_standards"),
            ("citizen_needs", "service_standards"),
            ("service_availability", "service_standards"),
            ("citizen_notification", "service_standards"),
        ] {
            table.alias(alias, target);
        }

        let swiss = table.composite(&["multilingual", "accessibility", "canton_requirements"]);
        table.register("swiss_standards", Arc::new(swiss));

        let governance = table.composite(&["privacy", "security"]);
        let governance: Arc<dyn ComplianceRule> = Arc::new(governance);
        table.register("data_governance", governance.clone());
        table.register("data_integrity", governance.clone());
        table.register("retention_policies", governance);

        let full: Arc<dyn ComplianceRule> = Arc::new(table.composite(BASE_CATEGORIES));
        table.register("full_compliance_validation", full.clone());
        table.register("compliance_validation", full);

        table
    }
}

fn accessibility(op: &ComplianceOperation) -> CivicaResult<RuleOutcome> {
    Ok(match op.str_attr("wcag_level")? {
        None => RuleOutcome::pass("no WCAG override declared, AA applies"),
        Some(level) if matches!(level, "AA" | "AAA") => {
            RuleOutcome::pass(format!("WCAG 2.1 {level} declared"))
        }
        Some(level) => RuleOutcome::fail(format!("WCAG level '{level}' is below AA"))
            .with_fix("Raise the WCAG 2.1 conformance target to AA"),
    })
}

fn multilingual(op: &ComplianceOperation) -> CivicaResult<RuleOutcome> {
    let official: Vec<&str> = op
        .languages
        .iter()
        .map(String::as_str)
        .filter(|l| OFFICIAL_LANGUAGES.contains(l))
        .collect();
    Ok(if official.is_empty() {
        RuleOutcome::fail(format!(
            "no official Swiss language among {:?}",
            op.languages
        ))
        .with_fix("Enable German (de) as default content language")
    } else {
        RuleOutcome::pass(format!("official languages: {}", official.join(", ")))
    })
}

fn privacy(op: &ComplianceOperation) -> CivicaResult<RuleOutcome> {
    if let Some(region) = op.str_attr("data_residency")? {
        if region != "CH" {
            return Ok(RuleOutcome::fail(format!(
                "personal data stored outside Switzerland ({region})"
            ))
            .with_fix("Move personal data storage to a Swiss hosting region"));
        }
    }
    if op.uses_ai() && op.bool_attr("citizen_consent")? == Some(false) {
        return Ok(RuleOutcome::fail(
            "AI processing of citizen data without consent",
        ));
    }
    Ok(RuleOutcome::pass("data residency and consent requirements met"))
}

fn security(op: &ComplianceOperation) -> CivicaResult<RuleOutcome> {
    if op.bool_attr("tls")? == Some(false) {
        return Ok(RuleOutcome::fail("TLS is disabled").with_fix("Enable TLS for all endpoints"));
    }
    if op.bool_attr("security_headers")? == Some(false) {
        return Ok(RuleOutcome::fail("security headers are not sent")
            .with_fix("Send Content-Security-Policy and HSTS headers"));
    }
    Ok(RuleOutcome::pass("transport security baseline met"))
}

fn canton_requirements(op: &ComplianceOperation) -> CivicaResult<RuleOutcome> {
    Ok(if SWISS_CANTONS.contains(&op.canton.as_str()) {
        RuleOutcome::pass(format!("canton {} recognised", op.canton))
    } else {
        RuleOutcome::fail(format!("'{}' is not a Swiss canton code", op.canton))
    })
}

fn service_standards(op: &ComplianceOperation) -> CivicaResult<RuleOutcome> {
    Ok(match op.u64_attr("max_response_days")? {
        Some(days) if days > 30 => RuleOutcome::fail(format!(
            "citizen response time of {days} days exceeds 30"
        ))
        .with_fix("Commit to a citizen response time of at most 30 days"),
        _ => RuleOutcome::pass("service level within municipal standards"),
    })
}

fn ai_compliance(op: &ComplianceOperation) -> CivicaResult<RuleOutcome> {
    if !op.uses_ai() {
        return Ok(RuleOutcome::pass("no AI agents involved"));
    }
    Ok(if op.bool_attr("ai_transparency_notice")? == Some(false) {
        RuleOutcome::fail("AI use is not disclosed to citizens")
            .with_fix("Publish an AI transparency notice")
    } else {
        RuleOutcome::pass("AI use disclosed")
    })
}

fn citizen_consent(op: &ComplianceOperation) -> CivicaResult<RuleOutcome> {
    if !op.uses_ai() {
        return Ok(RuleOutcome::pass("no AI processing of citizen data"));
    }
    Ok(if op.bool_attr("citizen_consent")? == Some(false) {
        RuleOutcome::fail("citizen consent for AI processing is missing")
            .with_fix("Collect explicit citizen consent before AI processing")
    } else {
        RuleOutcome::pass("citizen consent recorded")
    })
}

fn comprehensive_testing(op: &ComplianceOperation) -> CivicaResult<RuleOutcome> {
    Ok(
        if op.agents.iter().any(|a| a.role == "qa" || a.role == "compliance") {
            RuleOutcome::pass("QA or compliance agent participated")
        } else {
            RuleOutcome::fail("no QA or compliance agent participated")
        },
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::operation::{OperationAgent, OperationScope};
    use serde_json::json;

    fn op() -> ComplianceOperation {
        ComplianceOperation::new("WF-1", OperationScope::Workflow, "Bruchtal", "ZH")
            .with_languages(vec!["de".into(), "en".into()])
    }

    fn ai_agent() -> OperationAgent {
        OperationAgent {
            id: "assistant".into(),
            role: "ai".into(),
            capabilities: vec!["ai_chatbot".into()],
        }
    }

    #[tokio::test]
    async fn test_defaults_cover_base_categories() {
        let table = RuleTable::swiss_defaults();
        for category in BASE_CATEGORIES {
            assert!(table.contains(category), "missing {category}");
        }
        assert!(table.contains("full_compliance_validation"));
        assert!(table.contains("security_baseline"));
    }

    #[tokio::test]
    async fn test_default_operation_passes_everything() {
        let table = RuleTable::swiss_defaults();
        let op = op();
        for category in table.categories() {
            if category == "comprehensive_testing" {
                continue;
            }
            let outcome = table.get(category).unwrap().evaluate(&op).await.unwrap();
            assert!(outcome.passed, "{category}: {}", outcome.reason);
        }
    }

    #[tokio::test]
    async fn test_security_fails_without_tls() {
        let table = RuleTable::swiss_defaults();
        let op = op().with_attribute("tls", json!(false));
        let outcome = table
            .get("security_baseline")
            .unwrap()
            .evaluate(&op)
            .await
            .unwrap();
        assert!(!outcome.passed);
        assert_eq!(outcome.fixes.len(), 1);
    }

    #[tokio::test]
    async fn test_multilingual_requires_official_language() {
        let op = ComplianceOperation::new("WF-1", OperationScope::Workflow, "Bruchtal", "ZH")
            .with_languages(vec!["en".into()]);
        let outcome = multilingual(&op).unwrap();
        assert!(!outcome.passed);
        assert!(outcome.reason.contains("no official Swiss language"));
    }

    #[tokio::test]
    async fn test_canton_code_validation() {
        let bad = ComplianceOperation::new("WF-1", OperationScope::Workflow, "Bruchtal", "XX");
        assert!(!canton_requirements(&bad).unwrap().passed);
        assert!(canton_requirements(&op()).unwrap().passed);
    }

    #[tokio::test]
    async fn test_ai_rules_only_apply_with_ai_agents() {
        let without_ai = op().with_attribute("citizen_consent", json!(false));
        assert!(citizen_consent(&without_ai).unwrap().passed);

        let with_ai = without_ai.with_agents(vec![ai_agent()]);
        assert!(!citizen_consent(&with_ai).unwrap().passed);
        assert!(!privacy(&with_ai).unwrap().passed);
    }

    #[tokio::test]
    async fn test_composite_lists_failing_members() {
        let table = RuleTable::swiss_defaults();
        let op = op()
            .with_attribute("tls", json!(false))
            .with_attribute("wcag_level", json!("A"));
        let outcome = table
            .get("full_compliance_validation")
            .unwrap()
            .evaluate(&op)
            .await
            .unwrap();
        assert!(!outcome.passed);
        assert!(outcome.reason.contains("security"));
        assert!(outcome.reason.contains("accessibility"));
        assert_eq!(outcome.fixes.len(), 2);
    }

    #[tokio::test]
    async fn test_wrong_attribute_type_is_evaluator_error() {
        let op = op().with_attribute("max_response_days", json!("soon"));
        assert!(service_standards(&op).is_err());
    }

    #[tokio::test]
    async fn test_register_fn_replaces_rule() {
        let mut table = RuleTable::swiss_defaults();
        let before = table.len();
        table.register_fn("security", |_| Ok(RuleOutcome::fail("always")));
        assert_eq!(table.len(), before);
        let outcome = table.get("security").unwrap().evaluate(&op()).await.unwrap();
        assert!(!outcome.passed);
    }
}

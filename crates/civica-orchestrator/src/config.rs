//! Typed orchestrator configuration.
//!
//! Every section carries defaults so a partial TOML file is accepted.

use crate::templates::default_phase_template;
use crate::types::AgentRole;
use civica_core::{CivicaError, CivicaResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::time::Duration;

/// Top-level configuration of an [`Orchestrator`](crate::Orchestrator).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub resources: ResourceLimits,
    pub scaling: ScalingPolicy,
    pub capabilities: CapabilityTable,
    pub phase_template: PhaseTemplateConfig,
    pub analyzer: AnalyzerConfig,
    pub compliance: ComplianceConfig,
    pub recovery: RecoveryKind,
    pub history: HistoryConfig,
}

impl OrchestratorConfig {
    pub fn from_toml_str(s: &str) -> CivicaResult<Self> {
        let config: Self = toml::from_str(s)
            .map_err(|e| CivicaError::Config(format!("Invalid orchestrator config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field invariants.
    pub fn validate(&self) -> CivicaResult<()> {
        self.scaling.validate()?;
        validate_phase_template(&self.phase_template.phases)?;
        if self.resources.max_concurrent_agents == 0 {
            return Err(CivicaError::Config(
                "resources.max_concurrent_agents must be positive".into(),
            ));
        }
        if self.resources.max_execution_time_secs == 0 {
            return Err(CivicaError::Config(
                "resources.max_execution_time_secs must be positive".into(),
            ));
        }
        if self.history.max_archived == 0 {
            return Err(CivicaError::Config(
                "history.max_archived must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Per-workflow resource ceilings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    pub max_concurrent_agents: u32,
    pub max_memory_per_agent_mb: u64,
    pub max_cpu_millis_per_agent: u64,
    pub max_execution_time_secs: u64,
    pub max_api_calls_per_hour: u32,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_concurrent_agents: 10,
            max_memory_per_agent_mb: 2048,
            max_cpu_millis_per_agent: 2000,
            max_execution_time_secs: 4 * 60 * 60,
            max_api_calls_per_hour: 1000,
        }
    }
}

/// Scaling thresholds and pool sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalingPolicy {
    pub scale_up_threshold: f64,
    pub scale_down_threshold: f64,
    pub scale_up_increment: u32,
    pub scale_down_increment: u32,
    pub cooldown_period_secs: u64,
    pub max_instances: u32,
    /// Concurrency slots contributed by each instance.
    pub per_instance_concurrency: u32,
    pub initial_instances: u32,
    pub tick_interval_secs: u64,
}

impl Default for ScalingPolicy {
    fn default() -> Self {
        Self {
            scale_up_threshold: 0.80,
            scale_down_threshold: 0.30,
            scale_up_increment: 2,
            scale_down_increment: 1,
            cooldown_period_secs: 300,
            max_instances: 20,
            per_instance_concurrency: 5,
            initial_instances: 2,
            tick_interval_secs: 30,
        }
    }
}

impl ScalingPolicy {
    pub fn cooldown_period(&self) -> Duration {
        Duration::from_secs(self.cooldown_period_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }

    pub fn validate(&self) -> CivicaResult<()> {
        let in_unit = |v: f64| (0.0..=1.0).contains(&v);
        if !in_unit(self.scale_up_threshold) || !in_unit(self.scale_down_threshold) {
            return Err(CivicaError::Config(
                "scaling thresholds must be within 0..1".into(),
            ));
        }
        if self.scale_down_threshold >= self.scale_up_threshold {
            return Err(CivicaError::Config(format!(
                "scale_down_threshold ({}) must be below scale_up_threshold ({})",
                self.scale_down_threshold, self.scale_up_threshold
            )));
        }
        if self.scale_up_increment == 0 || self.scale_down_increment == 0 {
            return Err(CivicaError::Config(
                "scaling increments must be positive".into(),
            ));
        }
        if self.max_instances == 0 || self.per_instance_concurrency == 0 {
            return Err(CivicaError::Config(
                "max_instances and per_instance_concurrency must be positive".into(),
            ));
        }
        if self.initial_instances == 0 || self.initial_instances > self.max_instances {
            return Err(CivicaError::Config(format!(
                "initial_instances must be within [1, {}]",
                self.max_instances
            )));
        }
        Ok(())
    }
}

/// One keyword → capability mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityMapping {
    /// Case-insensitive word or word sequence matched against requirement text.
    pub keyword: String,
    pub capabilities: Vec<String>,
    /// A mandatory capability without providers fails composition.
    #[serde(default = "default_mandatory")]
    pub mandatory: bool,
}

fn default_mandatory() -> bool {
    true
}

/// Static lookup table from requirement keywords to capability tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityTable {
    #[serde(default)]
    pub mappings: Vec<CapabilityMapping>,
}

impl CapabilityTable {
    pub fn new(mappings: Vec<CapabilityMapping>) -> Self {
        Self { mappings }
    }

    /// Resolve requirement text into capability tags with their mandatory flag.
    ///
    /// `requirements` that match no keyword are taken as literal, mandatory
    /// tags; `citizen_requirements` only contribute through keyword matches.
    /// A tag is mandatory if any contributing mapping marks it mandatory.
    pub fn resolve(
        &self,
        requirements: &[String],
        citizen_requirements: &[String],
    ) -> BTreeMap<String, bool> {
        let mut resolved: BTreeMap<String, bool> = BTreeMap::new();
        let literal = requirements.iter().map(|r| (r, true));
        let citizen = citizen_requirements.iter().map(|r| (r, false));

        for (text, allow_literal) in literal.chain(citizen) {
            let words = tokenize(text);
            let mut matched = false;
            for mapping in &self.mappings {
                if contains_keyword(&words, &tokenize(&mapping.keyword)) {
                    matched = true;
                    for cap in &mapping.capabilities {
                        let entry = resolved.entry(cap.clone()).or_insert(false);
                        *entry |= mapping.mandatory;
                    }
                }
            }
            if !matched && allow_literal {
                let tag = text.trim();
                if !tag.is_empty() {
                    resolved.insert(tag.to_string(), true);
                }
            }
        }
        resolved
    }
}

/// Plural and verb endings a requirement word may add to a keyword word.
const WORD_SUFFIXES: &[&str] = &["s", "es", "ing", "ed", "ment", "ments", "er", "ers"];

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn word_matches(word: &str, keyword: &str) -> bool {
    match word.strip_prefix(keyword) {
        Some("") => true,
        Some(rest) => WORD_SUFFIXES.contains(&rest),
        None => false,
    }
}

/// True when `keyword` occurs in `words` as a contiguous run of whole words.
fn contains_keyword(words: &[String], keyword: &[String]) -> bool {
    if keyword.is_empty() || keyword.len() > words.len() {
        return false;
    }
    words.windows(keyword.len()).any(|window| {
        window
            .iter()
            .zip(keyword)
            .all(|(word, kw)| word_matches(word, kw))
    })
}

impl Default for CapabilityTable {
    fn default() -> Self {
        let m = |keyword: &str, caps: &[&str], mandatory: bool| CapabilityMapping {
            keyword: keyword.to_string(),
            capabilities: caps.iter().map(|c| c.to_string()).collect(),
            mandatory,
        };
        Self::new(vec![
            m("portal", &["environment_setup", "project_initialization"], true),
            m("environment", &["environment_setup"], true),
            m("content", &["content_architecture"], true),
            m("migration", &["data_migration"], true),
            m("municipal", &["municipal_configuration"], true),
            m("chatbot", &["ai_integration"], true),
            m("ai", &["ai_integration"], true),
            m("translation", &["ai_translation"], false),
            m("accessibility", &["accessibility_audit"], true),
            m("compliance", &["compliance_audit"], true),
            m("test", &["test_automation"], false),
            m("deploy", &["deployment"], true),
        ])
    }
}

/// Declarative phase used to build execution plans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTemplate {
    pub name: String,
    /// Roles whose agents run in this phase.
    pub roles: Vec<AgentRole>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub parallel: bool,
    #[serde(default)]
    pub compliance_checks: Vec<String>,
}

impl PhaseTemplate {
    pub fn new(name: impl Into<String>, roles: Vec<AgentRole>) -> Self {
        Self {
            name: name.into(),
            roles,
            depends_on: Vec::new(),
            parallel: false,
            compliance_checks: Vec::new(),
        }
    }

    pub fn depends_on(mut self, phases: &[&str]) -> Self {
        self.depends_on = phases.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn checks(mut self, checks: &[&str]) -> Self {
        self.compliance_checks = checks.iter().map(|c| c.to_string()).collect();
        self
    }
}

/// Wrapper so the default template survives partial TOML files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTemplateConfig {
    pub phases: Vec<PhaseTemplate>,
}

impl Default for PhaseTemplateConfig {
    fn default() -> Self {
        Self {
            phases: default_phase_template(),
        }
    }
}

/// Validate names and dependencies of a phase template.
///
/// Rejects empty or duplicate names, references to unknown phases, and cycles.
pub fn validate_phase_template(phases: &[PhaseTemplate]) -> CivicaResult<()> {
    if phases.is_empty() {
        return Err(CivicaError::Config("phase template is empty".into()));
    }
    let mut names = HashSet::new();
    for phase in phases {
        if phase.name.trim().is_empty() {
            return Err(CivicaError::Config("phase name must not be empty".into()));
        }
        if !names.insert(phase.name.as_str()) {
            return Err(CivicaError::Config(format!(
                "duplicate phase name '{}'",
                phase.name
            )));
        }
    }
    for phase in phases {
        for dep in &phase.depends_on {
            if !names.contains(dep.as_str()) {
                return Err(CivicaError::Config(format!(
                    "phase '{}' depends on unknown phase '{dep}'",
                    phase.name
                )));
            }
        }
    }

    let graph: Vec<(&str, BTreeSet<&str>)> = phases
        .iter()
        .map(|p| {
            (
                p.name.as_str(),
                p.depends_on.iter().map(String::as_str).collect(),
            )
        })
        .collect();
    if crate::composer::topological_order(&graph).is_none() {
        return Err(CivicaError::Config(
            "phase template contains a dependency cycle".into(),
        ));
    }
    Ok(())
}

/// Weights and thresholds of the workflow analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub capability_weight: f64,
    pub stakeholder_weight: f64,
    pub constraint_weight: f64,
    pub base_duration_secs: u64,
    pub secs_per_complexity_point: u64,
    /// Complexity above this value is flagged as a risk.
    pub complexity_risk_threshold: f64,
    /// Capability tags that count as AI processing. Tags prefixed `ai` always do.
    pub ai_capabilities: Vec<String>,
    pub memory_mb_per_agent: u64,
    pub cpu_millis_per_agent: u64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            capability_weight: 3.0,
            stakeholder_weight: 1.0,
            constraint_weight: 0.5,
            base_duration_secs: 30 * 60,
            secs_per_complexity_point: 10 * 60,
            complexity_risk_threshold: 25.0,
            ai_capabilities: vec!["chatbot".to_string(), "machine_translation".to_string()],
            memory_mb_per_agent: 2048,
            cpu_millis_per_agent: 1000,
        }
    }
}

/// Compliance categories used by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComplianceConfig {
    /// Categories of the whole-workflow pre-check.
    pub workflow_checks: Vec<String>,
    /// Categories whose fixes are listed in reports.
    pub auto_remediable: Vec<String>,
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        let tags = |list: &[&str]| list.iter().map(|s| s.to_string()).collect();
        Self {
            workflow_checks: tags(&[
                "accessibility",
                "multilingual",
                "privacy",
                "security",
                "canton_requirements",
                "service_standards",
                "ai_compliance",
            ]),
            auto_remediable: tags(&[
                "accessibility",
                "multilingual",
                "security",
                "security_baseline",
                "service_standards",
                "ai_compliance",
                "transparency",
                "citizen_consent",
            ]),
        }
    }
}

/// Retention of finished workflows and use of their outcomes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Finished workflows kept in the archive; the oldest are evicted first.
    pub max_archived: usize,
    /// Finished runs of a template needed before its observed success rate
    /// is blended into new analyses.
    pub min_samples: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_archived: 500,
            min_samples: 5,
        }
    }
}

/// Recovery strategy applied when a phase fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryKind {
    #[default]
    AbortAndReport,
}

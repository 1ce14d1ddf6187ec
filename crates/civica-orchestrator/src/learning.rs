use crate::types::{Workflow, WorkflowDefinition, WorkflowStatus};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Finished runs and how many of them completed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeStats {
    pub runs: u64,
    pub completed: u64,
}

impl OutcomeStats {
    fn record(&mut self, success: bool) {
        self.runs += 1;
        if success {
            self.completed += 1;
        }
    }

    pub fn success_rate(&self) -> Option<f64> {
        (self.runs > 0).then(|| self.completed as f64 / self.runs as f64)
    }
}

/// What past workflows say about templates, agents and compliance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationInsights {
    /// Keyed by [`template_key`].
    pub templates: BTreeMap<String, OutcomeStats>,
    /// Per-agent invocation outcomes.
    pub agents: BTreeMap<String, OutcomeStats>,
    /// Compliance category → number of failed evaluations.
    pub failed_categories: BTreeMap<String, u64>,
}

impl OrchestrationInsights {
    /// Failed compliance categories, most frequent first.
    pub fn recurring_failures(&self) -> Vec<(&str, u64)> {
        let mut failures: Vec<(&str, u64)> = self
            .failed_categories
            .iter()
            .map(|(category, count)| (category.as_str(), *count))
            .collect();
        failures.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        failures
    }
}

/// Which template a definition runs with: the named template, `custom` for
/// an inline phase template, or `default`.
pub fn template_key(definition: &WorkflowDefinition) -> String {
    if definition.phase_template.is_some() {
        return "custom".to_string();
    }
    definition
        .template
        .clone()
        .unwrap_or_else(|| "default".to_string())
}

/// Running statistics over every workflow that reached a terminal state.
///
/// Kept separately from the archive so evicting old workflows does not
/// forget their outcomes.
pub struct OutcomeHistory {
    min_samples: u64,
    insights: RwLock<OrchestrationInsights>,
}

impl OutcomeHistory {
    pub fn new(min_samples: u64) -> Self {
        Self {
            min_samples,
            insights: RwLock::new(OrchestrationInsights::default()),
        }
    }

    /// Fold a terminal workflow into the statistics. Non-terminal workflows
    /// are ignored.
    pub fn record(&self, workflow: &Workflow) {
        if !workflow.status.is_terminal() {
            return;
        }
        let mut insights = self.insights.write();
        insights
            .templates
            .entry(template_key(&workflow.definition))
            .or_default()
            .record(workflow.status == WorkflowStatus::Completed);

        let Some(report) = &workflow.report else {
            return;
        };
        for outcome in report.phases.iter().flat_map(|p| &p.agents) {
            insights
                .agents
                .entry(outcome.agent_id.clone())
                .or_default()
                .record(outcome.success);
        }
        for category in report.failed_categories() {
            *insights.failed_categories.entry(category).or_default() += 1;
        }
    }

    pub fn insights(&self) -> OrchestrationInsights {
        self.insights.read().clone()
    }

    /// Blend an estimated success probability with the observed success
    /// rate of `template`, once enough runs were recorded.
    pub fn adjust_success_probability(&self, template: &str, estimate: f64) -> f64 {
        let insights = self.insights.read();
        match insights.templates.get(template) {
            Some(stats) if stats.runs >= self.min_samples.max(1) => {
                let observed = stats.success_rate().unwrap_or(estimate);
                ((estimate + observed) / 2.0).clamp(0.05, 0.99)
            }
            _ => estimate,
        }
    }
}

use crate::config::{AnalyzerConfig, CapabilityTable};
use crate::types::{ResourceEstimate, RiskFactor, RiskTag, WorkflowAnalysis, WorkflowDefinition};
use civica_core::{CivicaError, CivicaResult};
use std::collections::BTreeSet;

/// Pure, deterministic estimator run before composition.
#[derive(Debug, Clone)]
pub struct WorkflowAnalyzer {
    config: AnalyzerConfig,
    capabilities: CapabilityTable,
}

impl WorkflowAnalyzer {
    pub fn new(config: AnalyzerConfig, capabilities: CapabilityTable) -> Self {
        Self {
            config,
            capabilities,
        }
    }

    pub fn analyze(&self, definition: &WorkflowDefinition) -> CivicaResult<WorkflowAnalysis> {
        if definition.municipality.trim().is_empty() {
            return Err(CivicaError::InvalidDefinition(
                "municipality is required".into(),
            ));
        }
        if definition.requirements.is_empty() && definition.citizen_requirements.is_empty() {
            return Err(CivicaError::InvalidDefinition(
                "at least one requirement is required".into(),
            ));
        }

        let required: Vec<String> = self
            .capabilities
            .resolve(&definition.requirements, &definition.citizen_requirements)
            .into_keys()
            .collect();

        let complexity = self.config.capability_weight * required.len() as f64
            + self.config.stakeholder_weight * definition.stakeholders.len() as f64
            + self.config.constraint_weight * definition.constraints.len() as f64;

        let estimated_duration_secs = self.config.base_duration_secs
            + (complexity * self.config.secs_per_complexity_point as f64).round() as u64;

        let mut risk_factors = Vec::new();

        let foreign_cantons: BTreeSet<&str> = definition
            .stakeholders
            .iter()
            .map(|s| s.canton.trim())
            .filter(|c| !c.is_empty() && !c.eq_ignore_ascii_case(&definition.canton))
            .collect();
        if !foreign_cantons.is_empty() {
            risk_factors.push(RiskFactor {
                tag: RiskTag::CrossCanton,
                description: format!(
                    "stakeholders from other cantons: {}",
                    foreign_cantons.into_iter().collect::<Vec<_>>().join(", ")
                ),
            });
        }

        let ai: Vec<&str> = required
            .iter()
            .map(String::as_str)
            .filter(|c| self.is_ai_capability(c))
            .collect();
        if !ai.is_empty() {
            risk_factors.push(RiskFactor {
                tag: RiskTag::AiPrivacy,
                description: format!("AI processing of citizen data via {}", ai.join(", ")),
            });
        }

        if complexity > self.config.complexity_risk_threshold {
            risk_factors.push(RiskFactor {
                tag: RiskTag::HighComplexity,
                description: format!(
                    "complexity {complexity:.1} exceeds {:.1}",
                    self.config.complexity_risk_threshold
                ),
            });
        }

        let success_probability =
            (0.95 - 0.1 * risk_factors.len() as f64 - 0.005 * complexity).clamp(0.05, 0.99);

        let agents = required.len();
        Ok(WorkflowAnalysis {
            complexity,
            estimated_duration_secs,
            resource_estimate: ResourceEstimate {
                agents,
                memory_mb: agents as u64 * self.config.memory_mb_per_agent,
                cpu_millis: agents as u64 * self.config.cpu_millis_per_agent,
            },
            risk_factors,
            success_probability,
            required_capabilities: required,
        })
    }

    fn is_ai_capability(&self, capability: &str) -> bool {
        capability == "ai"
            || capability.starts_with("ai_")
            || self.config.ai_capabilities.iter().any(|c| c == capability)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::Stakeholder;
    use serde_json::json;

    fn analyzer() -> WorkflowAnalyzer {
        WorkflowAnalyzer::new(AnalyzerConfig::default(), CapabilityTable::default())
    }

    fn portal() -> WorkflowDefinition {
        WorkflowDefinition::new("Bruchtal", "ZH")
            .with_requirement("Municipal portal")
            .with_stakeholder(Stakeholder::new("Citizens", "ZH"))
            .with_constraint("budget_chf", json!(120_000))
    }

    #[test]
    fn test_missing_municipality_rejected() {
        let def = WorkflowDefinition::new("  ", "ZH").with_requirement("portal");
        let err = analyzer().analyze(&def).unwrap_err();
        assert!(matches!(err, CivicaError::InvalidDefinition(_)));
    }

    #[test]
    fn test_zero_requirements_rejected() {
        let def = WorkflowDefinition::new("Bruchtal", "ZH");
        let err = analyzer().analyze(&def).unwrap_err();
        assert!(err.to_string().contains("requirement"));
    }

    #[test]
    fn test_complexity_is_weighted_sum() {
        let analysis = analyzer().analyze(&portal()).unwrap();
        // portal → 2 tags, municipal → 1 tag; 1 stakeholder; 1 constraint
        assert_eq!(analysis.required_capabilities.len(), 3);
        assert!((analysis.complexity - (3.0 * 3.0 + 1.0 + 0.5)).abs() < f64::EPSILON);
        assert_eq!(analysis.resource_estimate.agents, 3);
        assert!(analysis.risk_factors.is_empty());
    }

    #[test]
    fn test_duration_monotone_in_complexity() {
        let a = analyzer();
        let small = a.analyze(&portal()).unwrap();
        let large = a
            .analyze(
                &portal()
                    .with_requirement("content migration")
                    .with_requirement("accessibility review"),
            )
            .unwrap();
        assert!(large.complexity > small.complexity);
        assert!(large.estimated_duration_secs > small.estimated_duration_secs);
    }

    #[test]
    fn test_risk_flags() {
        let def = portal()
            .with_citizen_requirement("AI chatbot for permits")
            .with_stakeholder(Stakeholder::new("Regional office", "AG"));
        let analysis = analyzer().analyze(&def).unwrap();
        assert!(analysis.has_risk(RiskTag::CrossCanton));
        assert!(analysis.has_risk(RiskTag::AiPrivacy));
        assert!(!analysis.has_risk(RiskTag::HighComplexity));
        assert!(analysis.success_probability < 0.95);
    }

    #[test]
    fn test_email_requirement_is_not_ai() {
        let def = portal()
            .with_requirement("Email notifications for residents")
            .with_citizen_requirement("latest minutes");
        let analysis = analyzer().analyze(&def).unwrap();
        assert!(!analysis
            .required_capabilities
            .contains(&"ai_integration".to_string()));
        assert!(!analysis
            .required_capabilities
            .contains(&"test_automation".to_string()));
        assert!(!analysis.has_risk(RiskTag::AiPrivacy));
    }

    #[test]
    fn test_ai_tag_classification() {
        let a = analyzer();
        assert!(a.is_ai_capability("ai"));
        assert!(a.is_ai_capability("ai_translation"));
        assert!(a.is_ai_capability("chatbot"));
        assert!(!a.is_ai_capability("aid_applications"));
        assert!(!a.is_ai_capability("email"));
    }

    #[test]
    fn test_high_complexity_flag() {
        let config = AnalyzerConfig {
            complexity_risk_threshold: 1.0,
            ..AnalyzerConfig::default()
        };
        let analyzer = WorkflowAnalyzer::new(config, CapabilityTable::default());
        let analysis = analyzer.analyze(&portal()).unwrap();
        assert!(analysis.has_risk(RiskTag::HighComplexity));
    }

    #[test]
    fn test_analysis_is_deterministic() {
        let def = portal()
            .with_citizen_requirement("AI chatbot")
            .with_stakeholder(Stakeholder::new("Canton office", "BE"))
            .with_stakeholder(Stakeholder::new("Regional office", "AG"));
        let a = analyzer();
        let first = a.analyze(&def).unwrap();
        for _ in 0..10 {
            assert_eq!(a.analyze(&def).unwrap(), first);
        }
        assert_eq!(
            first.risk_factors[0].description,
            "stakeholders from other cantons: AG, BE"
        );
    }
}

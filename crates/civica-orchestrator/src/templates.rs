use crate::config::PhaseTemplate;
use crate::types::AgentRole;
use serde::{Deserialize, Serialize};

/// Name of the template used when neither the definition nor the
/// configuration selects one.
pub const DEFAULT_TEMPLATE: &str = "municipal_portal_setup";

/// A named, reusable phase layout for a class of municipal workflows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    /// Lookup key, e.g. `municipal_portal_setup`.
    pub key: String,
    pub name: String,
    pub description: String,
    pub phases: Vec<PhaseTemplate>,
    pub min_hours: u32,
    pub max_hours: u32,
}

impl WorkflowTemplate {
    pub fn estimated_duration(&self) -> String {
        format!("{}-{} hours", self.min_hours, self.max_hours)
    }
}

/// The built-in templates, in a stable order.
pub fn default_templates() -> Vec<WorkflowTemplate> {
    vec![
        portal_setup_template(),
        citizen_service_template(),
        data_migration_template(),
    ]
}

/// Look up a built-in template by key.
pub fn find_template(key: &str) -> Option<WorkflowTemplate> {
    default_templates().into_iter().find(|t| t.key == key)
}

/// Phases of the default portal setup template.
pub fn default_phase_template() -> Vec<PhaseTemplate> {
    portal_setup_template().phases
}

fn portal_setup_template() -> WorkflowTemplate {
    WorkflowTemplate {
        key: DEFAULT_TEMPLATE.to_string(),
        name: "Swiss Municipal Portal Setup".to_string(),
        description: "Complete setup of a municipal portal with Swiss compliance".to_string(),
        phases: vec![
            PhaseTemplate::new("Environment Setup", vec![AgentRole::Core])
                .parallel(true)
                .checks(&["security_baseline", "privacy_configuration"]),
            PhaseTemplate::new("Municipal Configuration", vec![AgentRole::Municipal])
                .depends_on(&["Environment Setup"])
                .checks(&["swiss_standards", "canton_requirements"]),
            PhaseTemplate::new("AI Integration", vec![AgentRole::Ai])
                .depends_on(&["Municipal Configuration"])
                .checks(&["ai_privacy", "citizen_consent", "transparency"]),
            PhaseTemplate::new(
                "Quality Assurance",
                vec![AgentRole::Compliance, AgentRole::Qa],
            )
            .depends_on(&["AI Integration"])
            .parallel(true)
            .checks(&["full_compliance_validation"]),
        ],
        min_hours: 4,
        max_hours: 6,
    }
}

fn citizen_service_template() -> WorkflowTemplate {
    WorkflowTemplate {
        key: "citizen_service_development".to_string(),
        name: "Citizen Service Feature Development".to_string(),
        description: "Development of new citizen-facing services with AI enhancement"
            .to_string(),
        phases: vec![
            PhaseTemplate::new("Service Analysis", vec![AgentRole::Municipal])
                .checks(&["service_requirements", "citizen_needs"]),
            PhaseTemplate::new("Implementation", vec![AgentRole::Core])
                .depends_on(&["Service Analysis"])
                .parallel(true)
                .checks(&["accessibility_development", "multilingual_support"]),
            PhaseTemplate::new("AI Enhancement", vec![AgentRole::Ai])
                .depends_on(&["Implementation"])
                .checks(&["ai_transparency", "privacy_protection"]),
            PhaseTemplate::new(
                "Testing and Validation",
                vec![AgentRole::Qa, AgentRole::Compliance],
            )
            .depends_on(&["AI Enhancement"])
            .parallel(true)
            .checks(&["comprehensive_testing", "compliance_validation"]),
        ],
        min_hours: 2,
        max_hours: 4,
    }
}

fn data_migration_template() -> WorkflowTemplate {
    WorkflowTemplate {
        key: "municipal_data_migration".to_string(),
        name: "Municipal Data Migration".to_string(),
        description: "AI-enhanced migration of municipal data with compliance validation"
            .to_string(),
        phases: vec![
            PhaseTemplate::new("Migration Planning", vec![AgentRole::Core])
                .checks(&["data_governance", "privacy_assessment"]),
            PhaseTemplate::new("AI-Enhanced Processing", vec![AgentRole::Ai])
                .depends_on(&["Migration Planning"])
                .checks(&["ai_data_processing", "citizen_privacy"]),
            PhaseTemplate::new(
                "Compliance Validation",
                vec![AgentRole::Compliance, AgentRole::Qa],
            )
            .depends_on(&["AI-Enhanced Processing"])
            .checks(&["data_integrity", "privacy_compliance", "retention_policies"]),
            PhaseTemplate::new("Service Continuity", vec![AgentRole::Municipal])
                .depends_on(&["Compliance Validation"])
                .checks(&["service_availability", "citizen_notification"]),
        ],
        min_hours: 3,
        max_hours: 8,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::validate_phase_template;
    use civica_compliance::RuleTable;

    #[test]
    fn test_default_templates_count() {
        let templates = default_templates();
        assert_eq!(templates.len(), 3);
        assert_eq!(templates[0].key, DEFAULT_TEMPLATE);
    }

    #[test]
    fn test_templates_are_valid_dags() {
        for template in default_templates() {
            validate_phase_template(&template.phases).unwrap();
        }
    }

    #[test]
    fn test_every_role_is_placed() {
        for template in default_templates() {
            for role in AgentRole::ALL {
                assert!(
                    template.phases.iter().any(|p| p.roles.contains(&role)),
                    "{} does not place {role}",
                    template.key
                );
            }
        }
    }

    #[test]
    fn test_template_checks_have_rules() {
        let rules = RuleTable::swiss_defaults();
        for template in default_templates() {
            for phase in &template.phases {
                for check in &phase.compliance_checks {
                    assert!(rules.contains(check), "no rule for {check}");
                }
            }
        }
    }

    #[test]
    fn test_find_template() {
        let migration = find_template("municipal_data_migration").unwrap();
        assert_eq!(migration.estimated_duration(), "3-8 hours");
        assert!(find_template("unknown").is_none());
    }
}

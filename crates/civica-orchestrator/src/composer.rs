use crate::config::{CapabilityTable, PhaseTemplate};
use crate::registry::{Agent, AgentRegistry};
use crate::templates::find_template;
use crate::types::{
    AgentComposition, AgentRole, ExecutionPlan, ExecutionStrategy, Phase, ResourceRequirements,
    WorkflowDefinition,
};
use civica_core::{CivicaError, CivicaResult, WorkflowId};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Output of a successful composition.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedWorkflow {
    pub composition: AgentComposition,
    pub plan: ExecutionPlan,
}

/// Maps required capabilities onto registered agents and lays them out
/// into phases.
///
/// Selection is deterministic: capabilities are visited in sorted order, an
/// agent already selected is reused when it provides the capability, and
/// otherwise the candidate with the fewest slots wins (ties broken by id).
#[derive(Debug, Clone)]
pub struct AgentComposer {
    capabilities: CapabilityTable,
    default_template: Vec<PhaseTemplate>,
}

impl AgentComposer {
    pub fn new(capabilities: CapabilityTable, default_template: Vec<PhaseTemplate>) -> Self {
        Self {
            capabilities,
            default_template,
        }
    }

    pub fn compose(
        &self,
        workflow_id: &WorkflowId,
        definition: &WorkflowDefinition,
        registry: &AgentRegistry,
    ) -> CivicaResult<ComposedWorkflow> {
        let required = self
            .capabilities
            .resolve(&definition.requirements, &definition.citizen_requirements);

        let mut selected: BTreeMap<String, Arc<dyn Agent>> = BTreeMap::new();
        let mut assignments = BTreeMap::new();
        let mut missing = Vec::new();

        for (capability, mandatory) in &required {
            let reused = selected
                .values()
                .find(|a| a.descriptor().has_capability(capability))
                .map(|a| a.descriptor().id.clone());
            if let Some(id) = reused {
                assignments.insert(capability.clone(), id);
                continue;
            }

            let best = registry
                .find_by_capability(capability)
                .into_iter()
                .min_by(|a, b| {
                    let (a, b) = (a.descriptor(), b.descriptor());
                    a.slots.cmp(&b.slots).then_with(|| a.id.cmp(&b.id))
                });
            match best {
                Some(agent) => {
                    let id = agent.descriptor().id.clone();
                    debug!(capability = %capability, agent = %id, "Capability assigned");
                    assignments.insert(capability.clone(), id.clone());
                    selected.insert(id, agent);
                }
                None if *mandatory => missing.push(capability.clone()),
                None => {
                    warn!(
                        workflow_id = %workflow_id,
                        capability = %capability,
                        "No agent provides optional capability, skipping"
                    );
                }
            }
        }

        if !missing.is_empty() {
            return Err(CivicaError::UnsatisfiableCapability(missing.join(", ")));
        }
        if selected.is_empty() {
            return Err(CivicaError::CompositionInfeasible(
                "no agents could be selected for the requirements".into(),
            ));
        }

        let mut buckets: BTreeMap<AgentRole, Vec<String>> = BTreeMap::new();
        for (id, agent) in &selected {
            buckets
                .entry(agent.descriptor().role)
                .or_default()
                .push(id.clone());
        }

        let template = self.template_for(definition)?;
        let mut phases = build_phases(&template, &buckets)?;

        let strategy = if !definition.allow_parallel {
            for phase in &mut phases {
                phase.parallel = false;
            }
            ExecutionStrategy::Sequential
        } else if phases.iter().all(|p| p.parallel) {
            ExecutionStrategy::Parallel
        } else if phases.iter().any(|p| p.parallel) {
            ExecutionStrategy::Hybrid
        } else {
            ExecutionStrategy::Sequential
        };

        let requirements = requirements_for(&phases, &selected);
        let dependencies = phases
            .iter()
            .map(|p| (p.name.clone(), p.depends_on.iter().cloned().collect()))
            .collect();

        info!(
            workflow_id = %workflow_id,
            agents = selected.len(),
            phases = phases.len(),
            strategy = ?strategy,
            peak_concurrency = requirements.peak_concurrency,
            "Composition built"
        );

        Ok(ComposedWorkflow {
            composition: AgentComposition {
                buckets,
                dependencies,
                strategy,
                requirements,
                capability_assignments: assignments,
            },
            plan: ExecutionPlan { phases },
        })
    }

    /// Explicit phase template first, then a named template, then the default.
    fn template_for(&self, definition: &WorkflowDefinition) -> CivicaResult<Vec<PhaseTemplate>> {
        if let Some(phases) = &definition.phase_template {
            return Ok(phases.clone());
        }
        match &definition.template {
            Some(name) => find_template(name).map(|t| t.phases).ok_or_else(|| {
                CivicaError::InvalidDefinition(format!("unknown workflow template '{name}'"))
            }),
            None => Ok(self.default_template.clone()),
        }
    }
}

/// Bind role buckets to template phases and order them topologically.
///
/// Phases that end up without agents are dropped and their dependents
/// inherit the dropped phase's prerequisites.
fn build_phases(
    template: &[PhaseTemplate],
    buckets: &BTreeMap<AgentRole, Vec<String>>,
) -> CivicaResult<Vec<Phase>> {
    let mut names = HashSet::new();
    for phase in template {
        if !names.insert(phase.name.as_str()) {
            return Err(CivicaError::CompositionInfeasible(format!(
                "duplicate phase name '{}'",
                phase.name
            )));
        }
    }
    for phase in template {
        if let Some(dep) = phase.depends_on.iter().find(|d| !names.contains(d.as_str())) {
            return Err(CivicaError::CompositionInfeasible(format!(
                "phase '{}' depends on unknown phase '{dep}'",
                phase.name
            )));
        }
    }

    let graph: Vec<(&str, BTreeSet<&str>)> = template
        .iter()
        .map(|p| {
            (
                p.name.as_str(),
                p.depends_on.iter().map(String::as_str).collect(),
            )
        })
        .collect();
    let order = topological_order(&graph).ok_or_else(|| {
        CivicaError::CompositionInfeasible("phase dependency graph contains a cycle".into())
    })?;

    let placed: HashSet<AgentRole> = template.iter().flat_map(|p| p.roles.iter().copied()).collect();
    for (role, ids) in buckets {
        if !placed.contains(role) {
            return Err(CivicaError::CompositionInfeasible(format!(
                "no phase runs {role} agents ({})",
                ids.join(", ")
            )));
        }
    }

    // Kept phases resolve to themselves, dropped ones to their own
    // prerequisites. Filled in topological order.
    let mut effective: HashMap<&str, BTreeSet<String>> = HashMap::new();
    let mut phases = Vec::new();
    for index in order {
        let entry = &template[index];
        let depends_on: BTreeSet<String> = entry
            .depends_on
            .iter()
            .filter_map(|dep| effective.get(dep.as_str()))
            .flatten()
            .cloned()
            .collect();

        let agents: Vec<String> = entry
            .roles
            .iter()
            .filter_map(|role| buckets.get(role))
            .flatten()
            .cloned()
            .collect();

        if agents.is_empty() {
            debug!(phase = %entry.name, "Dropping phase without agents");
            effective.insert(entry.name.as_str(), depends_on);
            continue;
        }

        effective.insert(entry.name.as_str(), BTreeSet::from([entry.name.clone()]));
        phases.push(Phase {
            name: entry.name.clone(),
            agents,
            depends_on,
            parallel: entry.parallel,
            compliance_checks: entry.compliance_checks.clone(),
        });
    }
    Ok(phases)
}

fn requirements_for(
    phases: &[Phase],
    selected: &BTreeMap<String, Arc<dyn Agent>>,
) -> ResourceRequirements {
    let slots = |id: &String| selected.get(id).map(|a| a.descriptor().slots).unwrap_or(0);
    let peak_concurrency = phases
        .iter()
        .map(|p| {
            if p.parallel {
                p.agents.iter().map(slots).sum::<u32>()
            } else {
                p.agents.iter().map(slots).max().unwrap_or(0)
            }
        })
        .max()
        .unwrap_or(0);

    let descriptors = selected.values().map(|a| a.descriptor());
    ResourceRequirements {
        peak_concurrency,
        max_agent_slots: descriptors.clone().map(|d| d.slots).max().unwrap_or(0),
        total_agents: selected.len(),
        memory_mb: descriptors.clone().map(|d| d.memory_mb).max().unwrap_or(0),
        cpu_millis: descriptors.map(|d| d.cpu_millis).max().unwrap_or(0),
    }
}

/// Kahn's algorithm, stable with respect to declaration order.
///
/// Returns node indices in execution order, or `None` when the graph has a
/// cycle or references a node that does not exist.
pub(crate) fn topological_order<'a>(graph: &[(&'a str, BTreeSet<&'a str>)]) -> Option<Vec<usize>> {
    let mut emitted: BTreeSet<&str> = BTreeSet::new();
    let mut done = vec![false; graph.len()];
    let mut order = Vec::with_capacity(graph.len());

    while order.len() < graph.len() {
        let next = (0..graph.len())
            .find(|&i| !done[i] && graph[i].1.iter().all(|d| emitted.contains(d)))?;
        done[next] = true;
        emitted.insert(graph[next].0);
        order.push(next);
    }
    Some(order)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::registry::{AgentDescriptor, AgentResult, PhaseContext};
    use crate::templates::default_phase_template;
    use async_trait::async_trait;

    struct StubAgent(AgentDescriptor);

    #[async_trait]
    impl Agent for StubAgent {
        fn descriptor(&self) -> &AgentDescriptor {
            &self.0
        }

        async fn invoke(&self, _ctx: &PhaseContext) -> CivicaResult<AgentResult> {
            Ok(AgentResult::new(&self.0.id, "ok"))
        }
    }

    fn register(registry: &AgentRegistry, descriptor: AgentDescriptor) {
        registry.register(Arc::new(StubAgent(descriptor)));
    }

    fn composer() -> AgentComposer {
        AgentComposer::new(CapabilityTable::default(), default_phase_template())
    }

    fn standard_registry() -> AgentRegistry {
        let registry = AgentRegistry::new();
        register(
            &registry,
            AgentDescriptor::new(
                "env-setup",
                AgentRole::Core,
                &["environment_setup", "project_initialization"],
            ),
        );
        register(
            &registry,
            AgentDescriptor::new("municipal", AgentRole::Municipal, &["municipal_configuration"]),
        );
        register(
            &registry,
            AgentDescriptor::new("assistant", AgentRole::Ai, &["ai_integration"]).with_slots(2),
        );
        register(
            &registry,
            AgentDescriptor::new("auditor", AgentRole::Compliance, &["compliance_audit"]),
        );
        registry
    }

    fn id() -> WorkflowId {
        WorkflowId::from("WF-test")
    }

    #[test]
    fn test_compose_portal() {
        let def = WorkflowDefinition::new("Bruchtal", "ZH")
            .with_requirement("Municipal portal")
            .with_requirement("compliance review");
        let composed = composer().compose(&id(), &def, &standard_registry()).unwrap();

        assert_eq!(composed.composition.agents_in(AgentRole::Core), ["env-setup"]);
        assert_eq!(
            composed.composition.capability_assignments["project_initialization"],
            "env-setup"
        );
        // The AI Integration phase has no agents and is dropped; QA inherits its prerequisite
        assert_eq!(
            composed.plan.phase_names(),
            vec!["Environment Setup", "Municipal Configuration", "Quality Assurance"]
        );
        let qa = composed.plan.phase("Quality Assurance").unwrap();
        assert_eq!(
            qa.depends_on,
            BTreeSet::from(["Municipal Configuration".to_string()])
        );
        assert_eq!(composed.composition.strategy, ExecutionStrategy::Hybrid);
    }

    #[test]
    fn test_unsatisfiable_mandatory_capability() {
        let def = WorkflowDefinition::new("Bruchtal", "ZH").with_requirement("geodata_export");
        let err = composer()
            .compose(&id(), &def, &standard_registry())
            .unwrap_err();
        assert!(matches!(err, CivicaError::UnsatisfiableCapability(ref m) if m == "geodata_export"));
        assert_eq!(
            err.to_string(),
            "No registered agent provides mandatory capability 'geodata_export'"
        );
    }

    #[test]
    fn test_optional_capability_skipped() {
        let def = WorkflowDefinition::new("Bruchtal", "ZH")
            .with_requirement("environment")
            .with_citizen_requirement("translation of forms");
        let composed = composer().compose(&id(), &def, &standard_registry()).unwrap();
        assert!(!composed
            .composition
            .capability_assignments
            .contains_key("ai_translation"));
        assert_eq!(composed.plan.phases.len(), 1);
    }

    #[test]
    fn test_prefers_fewest_slots_then_id() {
        let registry = AgentRegistry::new();
        register(
            &registry,
            AgentDescriptor::new("b-heavy", AgentRole::Core, &["deployment"]).with_slots(3),
        );
        register(
            &registry,
            AgentDescriptor::new("c-light", AgentRole::Core, &["deployment"]),
        );
        register(
            &registry,
            AgentDescriptor::new("d-light", AgentRole::Core, &["deployment"]),
        );
        let def = WorkflowDefinition::new("Bruchtal", "ZH").with_requirement("deploy");
        let composed = composer().compose(&id(), &def, &registry).unwrap();
        assert_eq!(composed.composition.capability_assignments["deployment"], "c-light");
    }

    #[test]
    fn test_cycle_rejected() {
        let def = WorkflowDefinition::new("Bruchtal", "ZH")
            .with_requirement("environment")
            .with_phase_template(vec![
                PhaseTemplate::new("A", vec![AgentRole::Core]).depends_on(&["B"]),
                PhaseTemplate::new("B", vec![AgentRole::Qa]).depends_on(&["A"]),
            ]);
        let err = composer()
            .compose(&id(), &def, &standard_registry())
            .unwrap_err();
        assert!(matches!(err, CivicaError::CompositionInfeasible(ref m) if m.contains("cycle")));
    }

    #[test]
    fn test_agent_without_phase_rejected() {
        let def = WorkflowDefinition::new("Bruchtal", "ZH")
            .with_requirement("environment")
            .with_requirement("municipal")
            .with_phase_template(vec![PhaseTemplate::new("Setup", vec![AgentRole::Core])]);
        let err = composer()
            .compose(&id(), &def, &standard_registry())
            .unwrap_err();
        assert!(matches!(err, CivicaError::CompositionInfeasible(_)));
    }

    #[test]
    fn test_disallow_parallel_forces_sequential() {
        let def = WorkflowDefinition::new("Bruchtal", "ZH")
            .with_requirement("Municipal portal with AI")
            .with_allow_parallel(false);
        let composed = composer().compose(&id(), &def, &standard_registry()).unwrap();
        assert_eq!(composed.composition.strategy, ExecutionStrategy::Sequential);
        assert!(composed.plan.phases.iter().all(|p| !p.parallel));
    }

    #[test]
    fn test_peak_concurrency_sums_parallel_phases() {
        let registry = standard_registry();
        register(
            &registry,
            AgentDescriptor::new("deployer", AgentRole::Core, &["deployment"]).with_slots(2),
        );
        let def = WorkflowDefinition::new("Bruchtal", "ZH")
            .with_requirement("environment")
            .with_requirement("deploy");
        let composed = composer().compose(&id(), &def, &registry).unwrap();
        // Environment Setup is parallel: env-setup (1) + deployer (2)
        assert_eq!(composed.composition.requirements.peak_concurrency, 3);
        assert_eq!(composed.composition.requirements.max_agent_slots, 2);
        assert_eq!(composed.composition.strategy, ExecutionStrategy::Parallel);
    }

    #[test]
    fn test_named_template() {
        let def = WorkflowDefinition::new("Bruchtal", "ZH")
            .with_requirement("municipal")
            .with_template("citizen_service_development");
        let composed = composer().compose(&id(), &def, &standard_registry()).unwrap();
        assert_eq!(composed.plan.phase_names(), vec!["Service Analysis"]);

        let unknown = WorkflowDefinition::new("Bruchtal", "ZH")
            .with_requirement("municipal")
            .with_template("nope");
        assert!(matches!(
            composer().compose(&id(), &unknown, &standard_registry()),
            Err(CivicaError::InvalidDefinition(_))
        ));
    }

    #[test]
    fn test_topological_order_stable() {
        let graph = vec![
            ("c", BTreeSet::from(["a"])),
            ("a", BTreeSet::new()),
            ("b", BTreeSet::new()),
        ];
        assert_eq!(topological_order(&graph), Some(vec![1, 0, 2]));
    }
}

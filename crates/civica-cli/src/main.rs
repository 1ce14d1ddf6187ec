//! `civica`: run municipal workflows against simulated agents.

mod agents;
mod config;

use crate::agents::build_registry;
use crate::config::{load_definition, CivicaConfig};
use civica_compliance::{AuditTrailHook, ComplianceHookChain, JsonReportStore, RuleTable};
use civica_orchestrator::{default_templates, ExecutionResult, Orchestrator, WorkflowStatus};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "civica", about = "Civica: municipal agent orchestration engine")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "civica.toml")]
    config: PathBuf,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze, compose, validate and execute a workflow definition
    Run {
        /// Workflow definition file (.json or .toml)
        workflow: PathBuf,
    },
    /// Print the analysis of a workflow definition without running it
    Analyze {
        /// Workflow definition file (.json or .toml)
        workflow: PathBuf,
    },
    /// List the built-in workflow templates
    Templates,
    /// List the registered agents
    Agents,
    /// Evaluate one scaling tick
    Scale {
        /// Utilization sample in 0..1; defaults to the live pool utilization
        #[arg(long)]
        utilization: Option<f64>,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = CivicaConfig::load(&cli.config).await?;
    let registry = build_registry(&config.agents);
    info!(agents = registry.len(), "Agents registered");

    match cli.command {
        Commands::Run { workflow } => {
            let definition = load_definition(&workflow).await?;
            let trail = Arc::new(AuditTrailHook::new());
            let mut hooks = ComplianceHookChain::new();
            hooks.add(trail.clone());

            let orchestrator =
                Orchestrator::new(config.orchestrator, registry, RuleTable::swiss_defaults())?
                    .with_hooks(hooks);
            let result = orchestrator.orchestrate_workflow(definition).await?;

            let store = JsonReportStore::new(config.data_dir.join("compliance"));
            let saved = save_compliance_reports(&store, &result).await;
            info!(
                workflow_id = %result.workflow_id,
                reports = saved,
                events = trail.event_count().await,
                "Compliance reports saved"
            );

            println!("{}", serde_json::to_string_pretty(&result.report)?);
            if result.status == WorkflowStatus::Failed {
                let reason = result
                    .error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "unknown error".to_string());
                anyhow::bail!("workflow {} failed: {reason}", result.workflow_id);
            }
        }
        Commands::Analyze { workflow } => {
            let definition = load_definition(&workflow).await?;
            let orchestrator =
                Orchestrator::new(config.orchestrator, registry, RuleTable::swiss_defaults())?;
            let analysis = orchestrator.analyze(&definition)?;
            println!("{}", serde_json::to_string_pretty(&analysis)?);
        }
        Commands::Templates => {
            let templates = default_templates();
            println!("Workflow templates:");
            for template in &templates {
                println!(
                    "  {} ({}, {})",
                    template.key,
                    template.name,
                    template.estimated_duration()
                );
                println!("    {}", template.description);
                for phase in &template.phases {
                    let after = if phase.depends_on.is_empty() {
                        String::new()
                    } else {
                        format!(" after {}", phase.depends_on.join(", "))
                    };
                    println!(
                        "    - {}{after}{}",
                        phase.name,
                        if phase.parallel { " [parallel]" } else { "" }
                    );
                }
            }
            println!("\nTotal: {} template(s)", templates.len());
        }
        Commands::Agents => {
            let descriptors = registry.descriptors();
            if descriptors.is_empty() {
                println!("No agents registered.");
            } else {
                println!("Registered agents:");
                for d in &descriptors {
                    println!(
                        "  {} [{}] slots={} memory={}MB cpu={}m",
                        d.id, d.role, d.slots, d.memory_mb, d.cpu_millis
                    );
                    println!("    capabilities: {}", d.capabilities.join(", "));
                }
                println!("\nTotal: {} agent(s)", descriptors.len());
            }
        }
        Commands::Scale { utilization } => {
            let orchestrator =
                Orchestrator::new(config.orchestrator, registry, RuleTable::swiss_defaults())?;
            let decision = match utilization {
                Some(sample) if (0.0..=1.0).contains(&sample) => {
                    orchestrator.scaling().evaluate_at(sample, Instant::now())
                }
                Some(sample) => anyhow::bail!("utilization {sample} is outside 0..1"),
                None => orchestrator.manage_scaling(),
            };
            println!("{}", serde_json::to_string_pretty(&decision)?);
        }
    }

    Ok(())
}

/// Persist the pre-check and every phase compliance report. Write failures
/// are logged; returns how many reports were written.
async fn save_compliance_reports(
    store: &JsonReportStore,
    result: &ExecutionResult,
) -> usize {
    let reports = result.report.precheck.iter().chain(
        result
            .report
            .phases
            .iter()
            .filter_map(|p| p.compliance.as_ref()),
    );
    let mut saved = 0;
    for report in reports {
        match store.save_report(report).await {
            Ok(path) => {
                saved += 1;
                tracing::debug!(path = %path.display(), "Compliance report written");
            }
            Err(e) => warn!(
                operation_id = %report.operation_id,
                error = %e,
                "Failed to write compliance report"
            ),
        }
    }
    saved
}

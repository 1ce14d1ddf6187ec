//! `civica.toml` loading.
//!
//! The orchestrator sections (`[resources]`, `[scaling]`, `[[capabilities.mappings]]`,
//! `[[phase_template.phases]]`, ...) sit at the top level next to the
//! host-only keys `data_dir` and `[[agents]]`.

use crate::agents::SimulatedAgentConfig;
use civica_orchestrator::{OrchestratorConfig, WorkflowDefinition};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
pub struct CivicaConfig {
    /// Where compliance reports are written.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Simulated agents to register. Empty means the built-in demo set.
    #[serde(default)]
    pub agents: Vec<SimulatedAgentConfig>,
    #[serde(flatten)]
    pub orchestrator: OrchestratorConfig,
}

impl Default for CivicaConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            agents: Vec::new(),
            orchestrator: OrchestratorConfig::default(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl CivicaConfig {
    pub fn parse(s: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.orchestrator.validate()?;
        Ok(config)
    }

    /// Load `path`, falling back to defaults when the file does not exist.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(s) => Self::parse(&s).map_err(|e| {
                anyhow::anyhow!("Failed to parse config file '{}': {e}", path.display())
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Failed to read config file '{}': {e}",
                path.display()
            )),
        }
    }
}

/// Read a workflow definition. `.json` files are parsed as JSON, anything
/// else as TOML.
pub async fn load_definition(path: &Path) -> anyhow::Result<WorkflowDefinition> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        anyhow::anyhow!("Failed to read workflow file '{}': {e}", path.display())
    })?;
    let definition = if path.extension().is_some_and(|ext| ext == "json") {
        serde_json::from_str(&content)?
    } else {
        toml::from_str(&content)?
    };
    Ok(definition)
}

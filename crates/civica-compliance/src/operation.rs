use civica_core::{CivicaError, CivicaResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// What a compliance operation covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum OperationScope {
    /// The whole workflow, before execution.
    Workflow,
    /// A single phase, after it completed.
    Phase { name: String },
}

/// An agent taking part in the validated operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationAgent {
    pub id: String,
    /// Role bucket name (`core`, `municipal`, `compliance`, `ai`, `qa`).
    pub role: String,
    pub capabilities: Vec<String>,
}

/// The subject of a compliance validation: a workflow or one of its phases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceOperation {
    pub id: String,
    pub scope: OperationScope,
    pub municipality: String,
    pub canton: String,
    pub languages: Vec<String>,
    pub agents: Vec<OperationAgent>,
    /// Declared constraints merged with attributes reported by agents.
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

impl ComplianceOperation {
    pub fn new(
        id: impl Into<String>,
        scope: OperationScope,
        municipality: impl Into<String>,
        canton: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            scope,
            municipality: municipality.into(),
            canton: canton.into(),
            languages: Vec::new(),
            agents: Vec::new(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_languages(mut self, languages: Vec<String>) -> Self {
        self.languages = languages;
        self
    }

    pub fn with_agents(mut self, agents: Vec<OperationAgent>) -> Self {
        self.agents = agents;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Whether any participating agent is an AI agent.
    pub fn uses_ai(&self) -> bool {
        self.agents.iter().any(|a| {
            a.role == "ai" || a.capabilities.iter().any(|c| c.starts_with("ai"))
        })
    }

    /// Read a boolean attribute. A present attribute of another type is an error.
    pub fn bool_attr(&self, key: &str) -> CivicaResult<Option<bool>> {
        match self.attributes.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(other) => Err(type_error(key, "boolean", other)),
        }
    }

    /// Read a string attribute. A present attribute of another type is an error.
    pub fn str_attr(&self, key: &str) -> CivicaResult<Option<&str>> {
        match self.attributes.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(other) => Err(type_error(key, "string", other)),
        }
    }

    /// Read a non-negative integer attribute.
    pub fn u64_attr(&self, key: &str) -> CivicaResult<Option<u64>> {
        match self.attributes.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => v
                .as_u64()
                .map(Some)
                .ok_or_else(|| type_error(key, "non-negative integer", v)),
        }
    }
}

fn type_error(key: &str, expected: &str, found: &Value) -> CivicaError {
    CivicaError::Compliance(format!(
        "attribute '{key}' must be a {expected}, found {found}"
    ))
}

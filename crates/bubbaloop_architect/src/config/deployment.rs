//! Deployment-level overrides: the last overlay layer

use crate::diagnostic::Diagnostic;
use crate::model::{check_overrides, NodeOverride, ParameterOverride, ParameterValue};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Entity name used in locators for deployment overrides
pub const DEPLOYMENT_ENTITY: &str = "deployment";

/// Overrides supplied at deployment time, from a file and/or the command line
///
/// ```yaml
/// args:
///   vehicle_id: demo
/// parameters:
///   - node: /perception/perception_1/detector
///     parameters:
///       - { name: score_threshold, value: 0.8 }
///     parameter_files:
///       model_param: /opt/$(arg vehicle_id)/detector.param.yaml
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeploymentOverrides {
    /// Optional label, ignored by compilation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Substitution arguments for `$(arg ...)`
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub args: IndexMap<String, ParameterValue>,

    #[serde(default)]
    pub parameters: Vec<NodeOverride>,
}

impl DeploymentOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load overrides from a YAML file
    pub fn from_file(path: &str) -> Result<Self, OverrideError> {
        let content = std::fs::read_to_string(path).map_err(|e| OverrideError::Io {
            path: path.to_string(),
            source: e,
        })?;
        Self::from_yaml(&content)
    }

    /// Parse overrides from a YAML string
    pub fn from_yaml(content: &str) -> Result<Self, OverrideError> {
        let overrides: DeploymentOverrides =
            serde_yaml::from_str(content).map_err(OverrideError::Parse)?;
        overrides.validate()?;
        Ok(overrides)
    }

    /// Reject malformed entries (empty targets, bad names, type clashes)
    pub fn validate(&self) -> Result<(), OverrideError> {
        let diagnostics = self.check();
        if diagnostics.is_empty() {
            return Ok(());
        }
        let messages: Vec<String> = diagnostics
            .iter()
            .map(|d| format!("{}: {}", d.locator.field, d.violation))
            .collect();
        Err(OverrideError::Validation(messages.join("; ")))
    }

    pub fn check(&self) -> Vec<Diagnostic> {
        check_overrides(DEPLOYMENT_ENTITY, "parameters", &self.parameters)
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty() && self.parameters.is_empty()
    }

    /// Set a substitution argument
    pub fn with_arg(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.args
            .insert(name.into(), ParameterValue::String(value.into()));
        self
    }

    /// Set a parameter value on one instance, replacing an earlier value for the same key
    pub fn with_parameter(
        mut self,
        node: impl Into<String>,
        name: impl Into<String>,
        value: ParameterValue,
    ) -> Self {
        let name = name.into();
        let entry = self.entry(node.into());
        match entry.parameters.iter_mut().find(|p| p.name == name) {
            Some(existing) => existing.value = value,
            None => entry.parameters.push(ParameterOverride {
                name,
                ty: None,
                value,
            }),
        }
        self
    }

    /// Point a parameter file slot of one instance at another file
    pub fn with_parameter_file(
        mut self,
        node: impl Into<String>,
        name: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        self.entry(node.into())
            .parameter_files
            .insert(name.into(), path.into());
        self
    }

    /// Apply `other` on top of `self`
    pub fn merge(mut self, other: DeploymentOverrides) -> Self {
        self.args.extend(other.args);
        for o in other.parameters {
            for p in o.parameters {
                self = self.with_parameter(o.node.clone(), p.name, p.value);
            }
            for (name, path) in o.parameter_files {
                self = self.with_parameter_file(o.node.clone(), name, path);
            }
        }
        self
    }

    /// Substitution arguments rendered as strings
    pub fn arg_strings(&self) -> impl Iterator<Item = (String, String)> + '_ {
        self.args.iter().map(|(k, v)| (k.clone(), v.to_string()))
    }

    fn entry(&mut self, node: String) -> &mut NodeOverride {
        let position = match self.parameters.iter().position(|o| o.node == node) {
            Some(position) => position,
            None => {
                self.parameters.push(NodeOverride {
                    node,
                    parameter_files: IndexMap::new(),
                    parameters: Vec::new(),
                });
                self.parameters.len() - 1
            }
        };
        &mut self.parameters[position]
    }
}

/// A single `--param` / `--param-file` override from the command line
#[derive(Debug, Clone, PartialEq)]
pub struct CliOverride {
    pub node: String,
    pub key: String,
    pub value: String,
}

impl CliOverride {
    /// Parse `<instance path>:<key>:=<value>`
    pub fn parse(s: &str) -> Result<Self, OverrideError> {
        let invalid = || {
            OverrideError::Invalid(format!(
                "Invalid override format '{}'. Expected '<instance path>:<key>:=<value>'",
                s
            ))
        };
        let (target, value) = s.split_once(":=").ok_or_else(invalid)?;
        let (node, key) = target.rsplit_once(':').ok_or_else(invalid)?;
        if node.is_empty() || key.is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            node: node.to_string(),
            key: key.to_string(),
            value: value.to_string(),
        })
    }
}

/// Errors that can occur when reading deployment overrides
#[derive(Debug, thiserror::Error)]
pub enum OverrideError {
    #[error("Failed to read override file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse override file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{0}")]
    Invalid(String),
}

//! Parameters, parameter files and parameter sets

use super::{is_parameter_name, EntityRef};
use crate::diagnostic::{Diagnostic, Locator, Violation};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// Declared parameter type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    Bool,
    Int,
    Double,
    String,
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterType::Bool => write!(f, "bool"),
            ParameterType::Int => write!(f, "int"),
            ParameterType::Double => write!(f, "double"),
            ParameterType::String => write!(f, "string"),
        }
    }
}

/// Parameter values can be booleans, integers, doubles or strings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
}

/// Command-line text: booleans, integers and floats are recognized, anything
/// else stays a string
impl From<&str> for ParameterValue {
    fn from(s: &str) -> Self {
        if s.eq_ignore_ascii_case("true") {
            return ParameterValue::Bool(true);
        }
        if s.eq_ignore_ascii_case("false") {
            return ParameterValue::Bool(false);
        }
        if let Ok(i) = s.parse::<i64>() {
            return ParameterValue::Int(i);
        }
        if let Ok(f) = s.parse::<f64>() {
            return ParameterValue::Double(f);
        }
        ParameterValue::String(s.to_string())
    }
}

impl FromStr for ParameterValue {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(ParameterValue::from(s))
    }
}

impl ParameterValue {
    /// Type this value has on its own
    pub fn inferred_type(&self) -> ParameterType {
        match self {
            ParameterValue::Bool(_) => ParameterType::Bool,
            ParameterValue::Int(_) => ParameterType::Int,
            ParameterValue::Double(_) => ParameterType::Double,
            ParameterValue::String(_) => ParameterType::String,
        }
    }

    /// Convert to the given type. Integers widen to doubles and any scalar can
    /// be rendered as a string; every other conversion fails.
    pub fn coerce(&self, ty: ParameterType) -> Option<ParameterValue> {
        match (ty, self) {
            (ParameterType::Bool, ParameterValue::Bool(b)) => Some(ParameterValue::Bool(*b)),
            (ParameterType::Int, ParameterValue::Int(i)) => Some(ParameterValue::Int(*i)),
            (ParameterType::Double, ParameterValue::Double(f)) => Some(ParameterValue::Double(*f)),
            (ParameterType::Double, ParameterValue::Int(i)) => {
                Some(ParameterValue::Double(*i as f64))
            }
            (ParameterType::String, value) => Some(ParameterValue::String(value.to_string())),
            _ => None,
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::Bool(b) => write!(f, "{}", b),
            ParameterValue::Int(i) => write!(f, "{}", i),
            ParameterValue::Double(v) if v.fract() == 0.0 && v.is_finite() => {
                write!(f, "{:.1}", v)
            }
            ParameterValue::Double(v) => write!(f, "{}", v),
            ParameterValue::String(s) => f.write_str(s),
        }
    }
}

/// A parameter declared by a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ParameterType,
    pub default: ParameterValue,
}

/// A parameter file slot declared by a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterFileDef {
    pub name: String,
    /// Default file path
    pub default: String,
    /// JSON schema validating the file contents (checked downstream)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
}

/// A single value override
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterOverride {
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub ty: Option<ParameterType>,
    pub value: ParameterValue,
}

/// Overrides addressed to one node instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeOverride {
    /// Instance path; absolute in parameter sets, relative in module defaults
    pub node: String,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub parameter_files: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<ParameterOverride>,
}

/// A named, reusable list of node overrides
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSetDef {
    pub name: EntityRef,
    #[serde(default)]
    pub parameters: Vec<NodeOverride>,
}

impl ParameterSetDef {
    pub fn check(&self) -> Vec<Diagnostic> {
        check_overrides(&self.name.to_string(), "parameters", &self.parameters)
    }
}

/// Shape checks shared by parameter sets, module defaults and deployment overrides
pub(crate) fn check_overrides(
    entity: &str,
    field: &str,
    overrides: &[NodeOverride],
) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    for (i, o) in overrides.iter().enumerate() {
        let field = format!("{}[{}]", field, i);
        if o.node.trim_matches('/').is_empty() {
            diagnostics.push(Diagnostic::new(
                Violation::InvalidDefinition {
                    reason: "override target 'node' must not be empty".to_string(),
                },
                Locator::new(entity, format!("{}.node", field)),
            ));
        }

        let mut seen = HashSet::new();
        for (j, p) in o.parameters.iter().enumerate() {
            let locator = Locator::new(entity, format!("{}.parameters[{}]", field, j));
            if !is_parameter_name(&p.name) {
                diagnostics.push(Diagnostic::new(
                    Violation::InvalidDefinition {
                        reason: format!("invalid parameter name '{}'", p.name),
                    },
                    locator.clone(),
                ));
            }
            if !seen.insert(p.name.as_str()) {
                diagnostics.push(Diagnostic::new(
                    Violation::DuplicateName {
                        what: "parameter override".to_string(),
                        name: p.name.clone(),
                    },
                    locator.clone(),
                ));
            }
            if let Some(ty) = p.ty {
                if p.value.coerce(ty).is_none() {
                    diagnostics.push(Diagnostic::new(
                        Violation::TypeMismatch {
                            expected: ty.to_string(),
                            found: p.value.inferred_type().to_string(),
                        },
                        locator,
                    ));
                }
            }
        }
    }

    diagnostics
}

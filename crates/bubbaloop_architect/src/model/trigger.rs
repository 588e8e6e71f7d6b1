//! Process trigger expressions and outcomes
//!
//! ```yaml
//! trigger_conditions:
//!   - or:
//!       - on_input: pointcloud
//!         warn_rate: 8.0
//!       - periodic: 10.0
//! outcomes:
//!   - to_output: objects
//! ```

use super::SyntaxError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::Value;

const CONDITION_KEYS: [&str; 6] = ["and", "or", "on_input", "on_trigger", "periodic", "once"];

/// Monitoring attributes attached to a leaf condition
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Monitor {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warn_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f64>,
}

impl Monitor {
    pub fn is_empty(&self) -> bool {
        self.warn_rate.is_none() && self.error_rate.is_none() && self.timeout.is_none()
    }
}

/// A single trigger condition
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// A message arrives on an input port
    OnInput(String),
    /// Another process of the same node finished
    OnTrigger(String),
    /// Timer at the given rate in Hz
    Periodic(f64),
    /// Runs once at startup
    Once,
}

/// Boolean tree over trigger conditions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", rename_all = "snake_case")]
pub enum TriggerExpr {
    Leaf {
        condition: Condition,
        #[serde(skip_serializing_if = "Monitor::is_empty")]
        monitor: Monitor,
    },
    And(Vec<TriggerExpr>),
    Or(Vec<TriggerExpr>),
}

impl TriggerExpr {
    pub fn leaf(condition: Condition) -> Self {
        TriggerExpr::Leaf {
            condition,
            monitor: Monitor::default(),
        }
    }

    /// All leaf conditions, depth first
    pub fn conditions(&self) -> Vec<&Condition> {
        let mut out = Vec::new();
        self.collect_conditions(&mut out);
        out
    }

    fn collect_conditions<'a>(&'a self, out: &mut Vec<&'a Condition>) {
        match self {
            TriggerExpr::Leaf { condition, .. } => out.push(condition),
            TriggerExpr::And(children) | TriggerExpr::Or(children) => {
                for child in children {
                    child.collect_conditions(out);
                }
            }
        }
    }
}

impl TryFrom<Value> for TriggerExpr {
    type Error = SyntaxError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        parse_expr(&value)
    }
}

fn trigger_error(msg: impl Into<String>) -> SyntaxError {
    SyntaxError::Trigger(msg.into())
}

fn parse_expr(value: &Value) -> Result<TriggerExpr, SyntaxError> {
    let map = match value {
        Value::String(s) if s == "once" => return Ok(TriggerExpr::leaf(Condition::Once)),
        Value::Mapping(map) => map,
        other => {
            return Err(trigger_error(format!(
                "expected a mapping, got {}",
                describe(other)
            )))
        }
    };

    let mut condition: Option<(&str, &Value)> = None;
    let mut monitor = Monitor::default();

    for (key, value) in map {
        let key = key
            .as_str()
            .ok_or_else(|| trigger_error("condition keys must be strings"))?;
        match key {
            k if CONDITION_KEYS.contains(&k) => {
                if let Some((previous, _)) = condition.replace((k, value)) {
                    return Err(trigger_error(format!(
                        "'{}' and '{}' in one entry; use 'and'/'or' to combine",
                        previous, k
                    )));
                }
            }
            "warn_rate" => monitor.warn_rate = Some(positive(key, value)?),
            "error_rate" => monitor.error_rate = Some(positive(key, value)?),
            "timeout" => monitor.timeout = Some(positive(key, value)?),
            other => return Err(trigger_error(format!("unknown key '{}'", other))),
        }
    }

    let (key, value) = condition.ok_or_else(|| trigger_error("entry has no condition"))?;
    let condition = match key {
        "and" | "or" => {
            if !monitor.is_empty() {
                return Err(trigger_error(
                    "monitoring attributes only apply to leaf conditions",
                ));
            }
            let items = value
                .as_sequence()
                .ok_or_else(|| trigger_error(format!("'{}' expects a list", key)))?;
            if items.is_empty() {
                return Err(trigger_error(format!("'{}' must not be empty", key)));
            }
            let children = items.iter().map(parse_expr).collect::<Result<Vec<_>, _>>()?;
            return Ok(if key == "and" {
                TriggerExpr::And(children)
            } else {
                TriggerExpr::Or(children)
            });
        }
        "on_input" => Condition::OnInput(name(key, value)?),
        "on_trigger" => Condition::OnTrigger(name(key, value)?),
        "periodic" => Condition::Periodic(positive(key, value)?),
        _ => Condition::Once,
    };

    Ok(TriggerExpr::Leaf { condition, monitor })
}

fn name(key: &str, value: &Value) -> Result<String, SyntaxError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| trigger_error(format!("'{}' expects a name", key)))
}

fn positive(key: &str, value: &Value) -> Result<f64, SyntaxError> {
    match value.as_f64() {
        Some(v) if v.is_finite() && v > 0.0 => Ok(v),
        _ => Err(trigger_error(format!("'{}' expects a positive number", key))),
    }
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a list",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

/// Deserialize a `trigger_conditions` list. Several entries form an implicit `or`.
pub(crate) fn deserialize_conditions<'de, D>(deserializer: D) -> Result<TriggerExpr, D::Error>
where
    D: Deserializer<'de>,
{
    let mut conditions = Vec::<TriggerExpr>::deserialize(deserializer)?;
    match conditions.len() {
        0 => Err(serde::de::Error::custom(
            "trigger_conditions must contain at least one condition",
        )),
        1 => Ok(conditions.remove(0)),
        _ => Ok(TriggerExpr::Or(conditions)),
    }
}

/// What a process produces when it runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Value", rename_all = "snake_case")]
pub enum Outcome {
    ToOutput(String),
    ToTrigger(String),
    Terminal,
}

impl TryFrom<Value> for Outcome {
    type Error = SyntaxError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let map = match value {
            Value::String(ref s) if s == "terminal" => return Ok(Outcome::Terminal),
            Value::Mapping(map) => map,
            other => {
                return Err(SyntaxError::Outcome(format!(
                    "expected a mapping, got {}",
                    describe(&other)
                )))
            }
        };
        if map.len() != 1 {
            return Err(SyntaxError::Outcome(
                "each outcome has exactly one key".to_string(),
            ));
        }
        let (key, value) = map
            .into_iter()
            .next()
            .ok_or_else(|| SyntaxError::Outcome("empty outcome".to_string()))?;
        let target = || {
            value
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| SyntaxError::Outcome("outcome target must be a name".to_string()))
        };
        match key.as_str() {
            Some("to_output") => Ok(Outcome::ToOutput(target()?)),
            Some("to_trigger") => Ok(Outcome::ToTrigger(target()?)),
            Some("terminal") => Ok(Outcome::Terminal),
            _ => Err(SyntaxError::Outcome(
                "expected one of to_output, to_trigger, terminal".to_string(),
            )),
        }
    }
}

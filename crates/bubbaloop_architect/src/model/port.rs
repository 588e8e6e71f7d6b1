//! Ports, QoS and port paths

use super::SyntaxError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Port direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Input => "input",
            Direction::Output => "output",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "input" => Some(Direction::Input),
            "output" => Some(Direction::Output),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message type carried by a port, e.g. `sensor_msgs/msg/Image`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataType(pub String);

impl DataType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reliability {
    Reliable,
    BestEffort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Durability {
    Volatile,
    TransientLocal,
}

/// Quality of service settings. Unset fields mean "middleware default".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Qos {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reliability: Option<Reliability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub durability: Option<Durability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<u32>,
}

impl Qos {
    /// Why a publisher with `self` cannot serve a subscriber with `subscriber`,
    /// following DDS request/offered rules.
    pub fn incompatibility(&self, subscriber: &Qos) -> Option<String> {
        if self.reliability == Some(Reliability::BestEffort)
            && subscriber.reliability == Some(Reliability::Reliable)
        {
            return Some("best_effort publisher cannot serve a reliable subscriber".to_string());
        }
        if self.durability == Some(Durability::Volatile)
            && subscriber.durability == Some(Durability::TransientLocal)
        {
            return Some(
                "volatile publisher cannot serve a transient_local subscriber".to_string(),
            );
        }
        None
    }
}

/// A port declared by a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortDef {
    pub name: String,
    pub message_type: DataType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qos: Option<Qos>,
}

/// Reference to a port inside a module or system scope.
///
/// `input.<port>` / `output.<port>` name the scope's external interface,
/// `<instance>.<input|output>.<port>` a port of a child instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PortPath {
    External {
        direction: Direction,
        port: String,
    },
    Internal {
        instance: String,
        direction: Direction,
        port: String,
    },
}

impl PortPath {
    pub fn direction(&self) -> Direction {
        match self {
            PortPath::External { direction, .. } | PortPath::Internal { direction, .. } => {
                *direction
            }
        }
    }

    pub fn port(&self) -> &str {
        match self {
            PortPath::External { port, .. } | PortPath::Internal { port, .. } => port,
        }
    }

    pub fn instance(&self) -> Option<&str> {
        match self {
            PortPath::External { .. } => None,
            PortPath::Internal { instance, .. } => Some(instance),
        }
    }
}

impl FromStr for PortPath {
    type Err = SyntaxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('.').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(SyntaxError::PortPath(s.to_string()));
        }
        match parts.as_slice() {
            [scope, port] => {
                let direction =
                    Direction::parse(scope).ok_or_else(|| SyntaxError::PortPath(s.to_string()))?;
                Ok(PortPath::External {
                    direction,
                    port: port.to_string(),
                })
            }
            [instance, dir, port] => {
                let direction =
                    Direction::parse(dir).ok_or_else(|| SyntaxError::PortPath(s.to_string()))?;
                Ok(PortPath::Internal {
                    instance: instance.to_string(),
                    direction,
                    port: port.to_string(),
                })
            }
            _ => Err(SyntaxError::PortPath(s.to_string())),
        }
    }
}

impl TryFrom<String> for PortPath {
    type Error = SyntaxError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PortPath> for String {
    fn from(value: PortPath) -> Self {
        value.to_string()
    }
}

impl fmt::Display for PortPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortPath::External { direction, port } => write!(f, "{}.{}", direction, port),
            PortPath::Internal {
                instance,
                direction,
                port,
            } => write!(f, "{}.{}.{}", instance, direction, port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_external_port_path() {
        let path: PortPath = "input.image".parse().unwrap();
        assert_eq!(
            path,
            PortPath::External {
                direction: Direction::Input,
                port: "image".to_string()
            }
        );
        assert_eq!(path.to_string(), "input.image");
    }

    #[test]
    fn test_parse_internal_port_path() {
        let path: PortPath = "detector.output.objects".parse().unwrap();
        assert_eq!(path.instance(), Some("detector"));
        assert_eq!(path.direction(), Direction::Output);
        assert_eq!(path.port(), "objects");
    }

    #[test]
    fn test_instance_named_like_a_direction() {
        let path: PortPath = "input.input.image".parse().unwrap();
        assert_eq!(path.instance(), Some("input"));
    }

    #[test]
    fn test_parse_port_path_invalid() {
        assert!("image".parse::<PortPath>().is_err());
        assert!("detector.inout.image".parse::<PortPath>().is_err());
        assert!("sideways.image".parse::<PortPath>().is_err());
        assert!("a.b.c.d".parse::<PortPath>().is_err());
        assert!("detector..image".parse::<PortPath>().is_err());
    }

    #[test]
    fn test_qos_compatibility() {
        let best_effort = Qos {
            reliability: Some(Reliability::BestEffort),
            ..Default::default()
        };
        let reliable = Qos {
            reliability: Some(Reliability::Reliable),
            ..Default::default()
        };
        assert!(best_effort.incompatibility(&reliable).is_some());
        assert!(reliable.incompatibility(&best_effort).is_none());
        assert!(Qos::default().incompatibility(&reliable).is_none());

        let transient = Qos {
            durability: Some(Durability::TransientLocal),
            ..Default::default()
        };
        let volatile = Qos {
            durability: Some(Durability::Volatile),
            ..Default::default()
        };
        assert!(volatile.incompatibility(&transient).is_some());
    }
}

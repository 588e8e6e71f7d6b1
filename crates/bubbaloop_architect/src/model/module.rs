//! Module definitions: reusable groupings of nodes and modules

use super::{
    check_overrides, is_local_name, DataType, Direction, EntityKind, EntityRef, NodeOverride,
    PortPath,
};
use crate::diagnostic::{Diagnostic, Locator, Violation};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A placement of a node or module inside a module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceDef {
    #[serde(rename = "instance")]
    pub name: String,
    pub entity: EntityRef,
}

/// A port on a module boundary. The type is inferred from connections when omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalPortDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<DataType>,
}

/// An exposed parameter namespace, named after the instance it exposes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterNamespaceDef {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExternalInterfaces {
    #[serde(default)]
    pub input: Vec<ExternalPortDef>,
    #[serde(default)]
    pub output: Vec<ExternalPortDef>,
    #[serde(default)]
    pub parameter: Vec<ParameterNamespaceDef>,
}

impl ExternalInterfaces {
    pub fn ports(&self, direction: Direction) -> &[ExternalPortDef] {
        match direction {
            Direction::Input => &self.input,
            Direction::Output => &self.output,
        }
    }

    pub fn port(&self, direction: Direction, name: &str) -> Option<&ExternalPortDef> {
        self.ports(direction).iter().find(|p| p.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionDef {
    pub from: PortPath,
    pub to: PortPath,
}

/// Module definition document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDef {
    pub name: EntityRef,
    #[serde(default)]
    pub instances: Vec<InstanceDef>,
    #[serde(default)]
    pub external_interfaces: ExternalInterfaces,
    /// Module-level parameter defaults, addressed by path relative to the module
    #[serde(default)]
    pub parameters: Vec<NodeOverride>,
    #[serde(default)]
    pub connections: Vec<ConnectionDef>,
}

impl ModuleDef {
    pub fn instance(&self, name: &str) -> Option<&InstanceDef> {
        self.instances.iter().find(|i| i.name == name)
    }

    /// Validate field shapes. Connections are checked later, once the
    /// referenced entities are known.
    pub fn check(&self) -> Vec<Diagnostic> {
        let entity = self.name.to_string();
        let mut diagnostics = Vec::new();

        let mut names = HashSet::new();
        for (i, instance) in self.instances.iter().enumerate() {
            let locator = Locator::new(&entity, format!("instances[{}]", i));
            if !is_local_name(&instance.name) {
                diagnostics.push(Diagnostic::new(
                    Violation::InvalidDefinition {
                        reason: format!("invalid instance name '{}'", instance.name),
                    },
                    locator.clone(),
                ));
            }
            if !names.insert(instance.name.as_str()) {
                diagnostics.push(Diagnostic::new(
                    Violation::DuplicateName {
                        what: "instance".to_string(),
                        name: instance.name.clone(),
                    },
                    locator.clone(),
                ));
            }
            if !matches!(instance.entity.kind, EntityKind::Node | EntityKind::Module) {
                diagnostics.push(Diagnostic::new(
                    Violation::InvalidDefinition {
                        reason: format!(
                            "instance '{}' must reference a node or module, not '{}'",
                            instance.name, instance.entity
                        ),
                    },
                    Locator::new(&entity, format!("instances[{}].entity", i)),
                ));
            }
        }

        for direction in [Direction::Input, Direction::Output] {
            let mut seen = HashSet::new();
            for (i, port) in self.external_interfaces.ports(direction).iter().enumerate() {
                let locator =
                    Locator::new(&entity, format!("external_interfaces.{}[{}]", direction, i));
                if !is_local_name(&port.name) {
                    diagnostics.push(Diagnostic::new(
                        Violation::InvalidDefinition {
                            reason: format!("invalid port name '{}'", port.name),
                        },
                        locator.clone(),
                    ));
                }
                if !seen.insert(port.name.as_str()) {
                    diagnostics.push(Diagnostic::new(
                        Violation::DuplicateName {
                            what: format!("external {}", direction),
                            name: port.name.clone(),
                        },
                        locator,
                    ));
                }
            }
        }

        for (i, namespace) in self.external_interfaces.parameter.iter().enumerate() {
            if self.instance(&namespace.name).is_none() {
                diagnostics.push(Diagnostic::new(
                    Violation::ReferenceNotFound {
                        what: "instance".to_string(),
                        name: namespace.name.clone(),
                    },
                    Locator::new(&entity, format!("external_interfaces.parameter[{}]", i)),
                ));
            }
        }

        diagnostics.extend(check_overrides(&entity, "parameters", &self.parameters));
        diagnostics
    }
}

//! Node definitions: the atomic execution units

use super::{
    deserialize_conditions, is_local_name, is_parameter_name, Condition, Direction, EntityRef,
    Outcome, ParameterDef, ParameterFileDef, PortDef, TriggerExpr,
};
use crate::diagnostic::{Diagnostic, Locator, Violation};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// How a node is started
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchDescriptor {
    /// Package providing the node
    pub package: String,

    /// Component plugin class. Mutually exclusive with `executable`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,

    /// Standalone executable. Mutually exclusive with `plugin`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executable: Option<String>,

    /// Load the plugin into a component container
    #[serde(default)]
    pub use_container: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,

    #[serde(default = "default_node_output")]
    pub node_output: String,
}

fn default_node_output() -> String {
    "screen".to_string()
}

/// A unit of work inside a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessDef {
    pub name: String,
    #[serde(rename = "trigger_conditions", deserialize_with = "deserialize_conditions")]
    pub trigger: TriggerExpr,
    #[serde(default)]
    pub outcomes: Vec<Outcome>,
}

/// Node definition document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDef {
    pub name: EntityRef,
    pub launch: LaunchDescriptor,
    #[serde(default)]
    pub inputs: Vec<PortDef>,
    #[serde(default)]
    pub outputs: Vec<PortDef>,
    #[serde(default)]
    pub parameters: Vec<ParameterDef>,
    #[serde(default)]
    pub parameter_files: Vec<ParameterFileDef>,
    #[serde(default)]
    pub processes: Vec<ProcessDef>,
}

impl NodeDef {
    pub fn ports(&self, direction: Direction) -> &[PortDef] {
        match direction {
            Direction::Input => &self.inputs,
            Direction::Output => &self.outputs,
        }
    }

    pub fn port(&self, direction: Direction, name: &str) -> Option<&PortDef> {
        self.ports(direction).iter().find(|p| p.name == name)
    }

    /// Validate field shapes and internal references
    pub fn check(&self) -> Vec<Diagnostic> {
        let entity = self.name.to_string();
        let mut diagnostics = Vec::new();
        let mut push = |violation: Violation, field: String| {
            diagnostics.push(Diagnostic::new(violation, Locator::new(&entity, field)));
        };
        let invalid = |reason: String| Violation::InvalidDefinition { reason };

        let launch = &self.launch;
        if launch.package.is_empty() {
            push(invalid("'package' must not be empty".into()), "launch.package".into());
        }
        match (&launch.plugin, &launch.executable) {
            (Some(_), None) => {}
            (None, Some(_)) => {
                if launch.use_container {
                    push(
                        invalid("'use_container' requires 'plugin'".into()),
                        "launch.use_container".into(),
                    );
                }
            }
            (Some(_), Some(_)) => push(
                invalid("cannot specify both 'plugin' and 'executable'".into()),
                "launch".into(),
            ),
            (None, None) => push(
                invalid("must specify either 'plugin' or 'executable'".into()),
                "launch".into(),
            ),
        }

        // Port names are unique per direction
        for direction in [Direction::Input, Direction::Output] {
            let mut port_names = HashSet::new();
            for (i, port) in self.ports(direction).iter().enumerate() {
                let field = format!("{}s[{}]", direction, i);
                if !is_local_name(&port.name) {
                    push(invalid(format!("invalid port name '{}'", port.name)), field.clone());
                }
                if port.message_type.as_str().is_empty() {
                    push(
                        invalid(format!("port '{}' has no message_type", port.name)),
                        field.clone(),
                    );
                }
                if !port_names.insert(port.name.as_str()) {
                    push(
                        Violation::DuplicateName {
                            what: "port".into(),
                            name: port.name.clone(),
                        },
                        field,
                    );
                }
            }
        }

        let mut parameter_names = HashSet::new();
        for (i, param) in self.parameters.iter().enumerate() {
            let field = format!("parameters[{}]", i);
            if !is_parameter_name(&param.name) {
                push(invalid(format!("invalid parameter name '{}'", param.name)), field.clone());
            }
            if !parameter_names.insert(param.name.as_str()) {
                push(
                    Violation::DuplicateName {
                        what: "parameter".into(),
                        name: param.name.clone(),
                    },
                    field.clone(),
                );
            }
            if param.default.coerce(param.ty).is_none() {
                push(
                    Violation::TypeMismatch {
                        expected: param.ty.to_string(),
                        found: param.default.inferred_type().to_string(),
                    },
                    format!("{}.default", field),
                );
            }
        }

        let mut file_names = HashSet::new();
        for (i, file) in self.parameter_files.iter().enumerate() {
            if !file_names.insert(file.name.as_str()) {
                push(
                    Violation::DuplicateName {
                        what: "parameter file".into(),
                        name: file.name.clone(),
                    },
                    format!("parameter_files[{}]", i),
                );
            }
        }

        let process_names: HashSet<&str> = self.processes.iter().map(|p| p.name.as_str()).collect();
        let mut seen_processes = HashSet::new();
        for (i, process) in self.processes.iter().enumerate() {
            let field = format!("processes[{}]", i);
            if !seen_processes.insert(process.name.as_str()) {
                push(
                    Violation::DuplicateName {
                        what: "process".into(),
                        name: process.name.clone(),
                    },
                    field.clone(),
                );
            }

            for condition in process.trigger.conditions() {
                let missing = match condition {
                    Condition::OnInput(port) if self.port(Direction::Input, port).is_none() => {
                        Some(("input port", port))
                    }
                    Condition::OnTrigger(name) if !process_names.contains(name.as_str()) => {
                        Some(("process", name))
                    }
                    _ => None,
                };
                if let Some((what, name)) = missing {
                    push(
                        Violation::ReferenceNotFound {
                            what: what.into(),
                            name: name.clone(),
                        },
                        format!("{}.trigger_conditions", field),
                    );
                }
            }

            for (j, outcome) in process.outcomes.iter().enumerate() {
                let missing = match outcome {
                    Outcome::ToOutput(port) if self.port(Direction::Output, port).is_none() => {
                        Some(("output port", port))
                    }
                    Outcome::ToTrigger(name) if !process_names.contains(name.as_str()) => {
                        Some(("process", name))
                    }
                    _ => None,
                };
                if let Some((what, name)) = missing {
                    push(
                        Violation::ReferenceNotFound {
                            what: what.into(),
                            name: name.clone(),
                        },
                        format!("{}.outcomes[{}]", field, j),
                    );
                }
            }
        }

        diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DETECTOR: &str = r#"
name: Detector.node
launch:
  package: perception_pkg
  plugin: perception::Detector
  use_container: true
inputs:
  - name: image
    message_type: sensor_msgs/msg/Image
    qos: { reliability: best_effort, depth: 1 }
outputs:
  - name: objects
    message_type: DetectedObjects
parameters:
  - { name: score_threshold, type: double, default: 0.5 }
  - { name: max_objects, type: int, default: 100 }
parameter_files:
  - { name: model_param, default: config/detector.param.yaml }
processes:
  - name: detect
    trigger_conditions:
      - on_input: image
        warn_rate: 5.0
    outcomes:
      - to_output: objects
"#;

    #[test]
    fn test_parse_node() {
        let node: NodeDef = serde_yaml::from_str(DETECTOR).unwrap();
        assert_eq!(node.name.to_string(), "Detector.node");
        assert_eq!(node.launch.node_output, "screen");
        assert_eq!(node.inputs.len(), 1);
        assert!(node.port(Direction::Output, "objects").is_some());
        assert!(node.port(Direction::Input, "objects").is_none());
        assert!(node.check().is_empty(), "{:?}", node.check());
    }

    #[test]
    fn test_launch_checks() {
        let yaml = r#"
name: Broken.node
launch:
  package: pkg
  plugin: a::B
  executable: b
"#;
        let node: NodeDef = serde_yaml::from_str(yaml).unwrap();
        let diags = node.check();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].locator.field, "launch");

        let yaml = r#"
name: Broken.node
launch:
  package: pkg
  executable: b
  use_container: true
"#;
        let node: NodeDef = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(node.check()[0].locator.field, "launch.use_container");
    }

    #[test]
    fn test_process_references() {
        let yaml = r#"
name: Filter.node
launch: { package: pkg, executable: filter }
inputs:
  - { name: points, message_type: PointCloud2 }
outputs:
  - { name: points, message_type: PointCloud2 }
  - { name: points, message_type: PointCloud2 }
parameters:
  - { name: enabled, type: bool, default: 1 }
processes:
  - name: filter
    trigger_conditions:
      - or: [ { on_input: scan }, { on_trigger: missing } ]
    outcomes:
      - to_output: filtered
"#;
        let node: NodeDef = serde_yaml::from_str(yaml).unwrap();
        let diags = node.check();
        let not_found = diags
            .iter()
            .filter(|d| matches!(d.violation, Violation::ReferenceNotFound { .. }))
            .count();
        assert_eq!(not_found, 3);
        assert!(diags
            .iter()
            .any(|d| matches!(d.violation, Violation::DuplicateName { ref name, .. } if name == "points")));
        let duplicates: Vec<&str> = diags
            .iter()
            .filter(|d| matches!(d.violation, Violation::DuplicateName { .. }))
            .map(|d| d.locator.field.as_str())
            .collect();
        assert_eq!(duplicates, vec!["outputs[1]"]);
        assert!(diags
            .iter()
            .any(|d| matches!(d.violation, Violation::TypeMismatch { .. })));
    }

    #[test]
    fn test_same_port_name_in_both_directions() {
        let yaml = r#"
name: Filter.node
launch: { package: pkg, executable: filter }
inputs:
  - { name: points, message_type: sensor_msgs/msg/PointCloud2 }
outputs:
  - { name: points, message_type: sensor_msgs/msg/PointCloud2 }
processes:
  - name: filter
    trigger_conditions:
      - on_input: points
    outcomes:
      - to_output: points
"#;
        let node: NodeDef = serde_yaml::from_str(yaml).unwrap();
        assert!(node.check().is_empty());
        assert!(node.port(Direction::Input, "points").is_some());
        assert!(node.port(Direction::Output, "points").is_some());
    }
}

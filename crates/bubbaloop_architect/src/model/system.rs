//! System definitions: the top-level deployable description

use super::{
    is_local_name, is_valid_namespace, one_or_many, ConnectionDef, EntityKind, EntityRef,
};
use crate::diagnostic::{Diagnostic, Locator, Violation};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Mode used when a system declares none
pub const DEFAULT_MODE: &str = "default";

/// A top-level placement of a module or node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDef {
    #[serde(rename = "component")]
    pub name: String,
    pub entity: EntityRef,
    #[serde(default)]
    pub namespace: String,
    /// Opaque hardware label, carried through to the output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compute_unit: Option<String>,
    #[serde(
        rename = "parameter_set",
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub parameter_sets: Vec<EntityRef>,
    /// Modes this component is active in. Empty means all modes.
    #[serde(
        rename = "mode",
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub modes: Vec<String>,
}

impl ComponentDef {
    pub fn is_active_in(&self, mode: &str) -> bool {
        self.modes.is_empty() || self.modes.iter().any(|m| m == mode)
    }
}

/// System definition document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemDef {
    pub name: EntityRef,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modes: Vec<String>,
    #[serde(default)]
    pub components: Vec<ComponentDef>,
    #[serde(default)]
    pub connections: Vec<ConnectionDef>,
}

impl SystemDef {
    /// Declared modes, or the implicit `default` mode
    pub fn declared_modes(&self) -> Vec<String> {
        if self.modes.is_empty() {
            vec![DEFAULT_MODE.to_string()]
        } else {
            self.modes.clone()
        }
    }

    pub fn component(&self, name: &str) -> Option<&ComponentDef> {
        self.components.iter().find(|c| c.name == name)
    }

    pub fn check(&self) -> Vec<Diagnostic> {
        let entity = self.name.to_string();
        let mut diagnostics = Vec::new();

        let mut modes = HashSet::new();
        for (i, mode) in self.modes.iter().enumerate() {
            let locator = Locator::new(&entity, format!("modes[{}]", i));
            if !is_local_name(mode) {
                diagnostics.push(Diagnostic::new(
                    Violation::InvalidDefinition {
                        reason: format!("invalid mode name '{}'", mode),
                    },
                    locator.clone(),
                ));
            }
            if !modes.insert(mode.as_str()) {
                diagnostics.push(Diagnostic::new(
                    Violation::DuplicateName {
                        what: "mode".to_string(),
                        name: mode.clone(),
                    },
                    locator,
                ));
            }
        }
        let declared = self.declared_modes();

        let mut names = HashSet::new();
        for (i, component) in self.components.iter().enumerate() {
            let field = format!("components[{}]", i);
            let scope = [component.name.clone()];
            let mut push = |violation: Violation, field: String| {
                diagnostics.push(
                    Diagnostic::new(violation, Locator::new(&entity, field)).scoped(scope.clone()),
                );
            };

            if !is_local_name(&component.name) {
                push(
                    Violation::InvalidDefinition {
                        reason: format!("invalid component name '{}'", component.name),
                    },
                    field.clone(),
                );
            }
            if !names.insert(component.name.as_str()) {
                push(
                    Violation::DuplicateName {
                        what: "component".to_string(),
                        name: component.name.clone(),
                    },
                    field.clone(),
                );
            }
            if !matches!(component.entity.kind, EntityKind::Node | EntityKind::Module) {
                push(
                    Violation::InvalidDefinition {
                        reason: format!(
                            "component '{}' must reference a node or module, not '{}'",
                            component.name, component.entity
                        ),
                    },
                    format!("{}.entity", field),
                );
            }
            if !is_valid_namespace(&component.namespace) {
                push(
                    Violation::InvalidDefinition {
                        reason: format!("invalid namespace '{}'", component.namespace),
                    },
                    format!("{}.namespace", field),
                );
            }
            for (j, set) in component.parameter_sets.iter().enumerate() {
                if set.kind != EntityKind::ParameterSet {
                    push(
                        Violation::InvalidDefinition {
                            reason: format!("'{}' is not a parameter set", set),
                        },
                        format!("{}.parameter_set[{}]", field, j),
                    );
                }
            }
            for (j, mode) in component.modes.iter().enumerate() {
                if !declared.contains(mode) {
                    push(
                        Violation::UnknownMode {
                            mode: mode.clone(),
                            declared: declared.clone(),
                        },
                        format!("{}.mode[{}]", field, j),
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

    const VEHICLE: &str = r#"
name: Vehicle.system
modes: [ default, simulation ]
components:
  - component: perception_1
    entity: Perception.module
    namespace: /perception
    compute_unit: main_ecu
    parameter_set: Tuning.parameter_set
  - component: simulator
    entity: Simulator.node
    mode: simulation
connections:
  - { from: simulator.output.image, to: perception_1.input.image }
"#;

    #[test]
    fn test_parse_system() {
        let system: SystemDef = serde_yaml::from_str(VEHICLE).unwrap();
        assert_eq!(system.components.len(), 2);

        let perception = system.component("perception_1").unwrap();
        assert_eq!(perception.parameter_sets.len(), 1);
        assert!(perception.is_active_in("default"));
        assert!(perception.is_active_in("simulation"));

        let simulator = system.component("simulator").unwrap();
        assert_eq!(simulator.modes, vec!["simulation".to_string()]);
        assert!(!simulator.is_active_in("default"));
        assert_eq!(simulator.namespace, "");

        assert!(system.check().is_empty(), "{:?}", system.check());
    }

    #[test]
    fn test_implicit_default_mode() {
        let system: SystemDef = serde_yaml::from_str("name: Tiny.system").unwrap();
        assert_eq!(system.declared_modes(), vec![DEFAULT_MODE.to_string()]);
    }

    #[test]
    fn test_system_checks() {
        let yaml = r#"
name: Bad.system
components:
  - { component: a, entity: A.module, mode: [ simulation ] }
  - { component: a, entity: B.module, namespace: "/bad ns" }
  - { component: c, entity: C.module, parameter_set: [ D.module ] }
"#;
        let system: SystemDef = serde_yaml::from_str(yaml).unwrap();
        let diags = system.check();
        assert_eq!(diags.len(), 4, "{:#?}", diags);

        let unknown = diags
            .iter()
            .find(|d| matches!(d.violation, Violation::UnknownMode { .. }))
            .unwrap();
        assert_eq!(unknown.scope, vec!["a".to_string()]);
    }
}

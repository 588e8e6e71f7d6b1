//! Mode selection and graph assembly
//!
//! A prepared system holds everything that does not depend on the mode.
//! Selecting a mode keeps the active components, drops diagnostics that
//! only concern inactive ones, wires the remaining instances and builds the
//! deployment graph if no error is left.

use super::flatten::{assemble_wires, Edge, FlatInstance, FlatSystem};
use super::overlay::SystemOverlay;
use super::registry::EntityRegistry;
use super::resolver::ResolvedSystem;
use crate::diagnostic::{dedup, has_errors, Diagnostic, Locator, Violation};
use crate::graph::{DeploymentGraph, Endpoint, PortBinding, ResolvedConnection, ResolvedNodeInstance};
use crate::model::Direction;
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};

/// Mode-independent compilation state of one system
#[derive(Debug, Clone)]
pub struct PreparedSystem {
    pub resolved: ResolvedSystem,
    pub flat: FlatSystem,
    pub overlay: SystemOverlay,
    /// Resolver, validator and overlay diagnostics, scoped to components
    pub diagnostics: Vec<Diagnostic>,
}

/// Outcome of selecting one mode
#[derive(Debug, Clone)]
pub struct Selection {
    pub diagnostics: Vec<Diagnostic>,
    pub graph: Option<DeploymentGraph>,
}

/// Build the deployment graph of `system` in `mode`
pub fn select_mode(registry: &EntityRegistry, system: &PreparedSystem, mode: &str) -> Selection {
    let def = registry.system(system.resolved.id);
    let entity = def.name.to_string();

    let declared = def.declared_modes();
    if !declared.iter().any(|m| m == mode) {
        return Selection {
            diagnostics: vec![Diagnostic::new(
                Violation::UnknownMode {
                    mode: mode.to_string(),
                    declared,
                },
                Locator::new(&entity, "modes"),
            )],
            graph: None,
        };
    }

    let active: Vec<bool> = def.components.iter().map(|c| c.is_active_in(mode)).collect();
    let active_names: HashSet<&str> = def
        .components
        .iter()
        .filter(|c| c.is_active_in(mode))
        .map(|c| c.name.as_str())
        .collect();

    let mut diagnostics: Vec<Diagnostic> = system
        .diagnostics
        .iter()
        .filter(|d| d.scope.iter().all(|c| active_names.contains(c.as_str())))
        .cloned()
        .collect();

    // Instances of active components, in component order
    let mut instances: Vec<(usize, &FlatInstance)> = Vec::new();
    let mut edges: Vec<&Edge> = Vec::new();
    for component in system.flat.components.iter().flatten() {
        if !active[component.index] {
            continue;
        }
        instances.extend(component.instances.iter().enumerate());
        edges.extend(component.edges.iter());
    }

    let mut paths: IndexMap<&str, usize> = IndexMap::new();
    for (_, instance) in &instances {
        *paths.entry(instance.path.as_str()).or_default() += 1;
    }
    for (path, count) in &paths {
        if *count > 1 {
            diagnostics.push(
                Diagnostic::new(
                    Violation::DuplicateName {
                        what: "instance path".to_string(),
                        name: path.to_string(),
                    },
                    Locator::new(&entity, "components"),
                )
                .at(path.to_string()),
            );
        }
    }

    for (i, edge) in &system.flat.edges {
        let inactive = [edge.from.component, edge.to.component]
            .into_iter()
            .find(|c| !active[*c]);
        match inactive {
            None => edges.push(edge),
            Some(component) => {
                let connection = &def.connections[*i];
                diagnostics.push(Diagnostic::new(
                    Violation::DanglingConnection {
                        from: connection.from.to_string(),
                        to: connection.to.to_string(),
                        component: def.components[component].name.clone(),
                    },
                    Locator::new(&entity, format!("connections[{}]", i)),
                ));
            }
        }
    }

    let leaves: Vec<&FlatInstance> = instances.iter().map(|(_, instance)| *instance).collect();
    let (wires, wire_diagnostics) = assemble_wires(registry, &entity, &leaves, &edges);
    diagnostics.extend(wire_diagnostics);

    // Consumer port -> wire id; the first wire wins when fan-in was reported
    let mut bound: HashMap<(usize, &str), String> = HashMap::new();
    let mut connections = Vec::with_capacity(wires.len());
    for wire in &wires {
        let producer = leaves[wire.producer];
        let node = registry.node(producer.node);
        let Some(port) = node.port(Direction::Output, &wire.port) else {
            continue;
        };
        let id = format!("{}/{}", producer.path, wire.port);

        if wire.consumers.is_empty() {
            diagnostics.push(
                Diagnostic::new(
                    Violation::UnusedOutput { wire: id.clone() },
                    Locator::new(node.name.to_string(), format!("outputs.{}", wire.port)),
                )
                .at(producer.path.clone()),
            );
        }

        let mut consumers = Vec::with_capacity(wire.consumers.len());
        for (consumer, input) in &wire.consumers {
            let instance = leaves[*consumer];
            bound
                .entry((*consumer, input.as_str()))
                .or_insert_with(|| id.clone());

            let consumer_node = registry.node(instance.node);
            let consumer_port = consumer_node.port(Direction::Input, input);

            // Untyped module boundaries let a wire reach an input of another type
            if let Some(consumer_port) = consumer_port {
                if consumer_port.message_type != port.message_type {
                    diagnostics.push(
                        Diagnostic::new(
                            Violation::TypeMismatch {
                                expected: consumer_port.message_type.to_string(),
                                found: port.message_type.to_string(),
                            },
                            Locator::new(consumer_node.name.to_string(), format!("inputs.{}", input)),
                        )
                        .at(instance.path.clone()),
                    );
                }
            }

            let subscriber = consumer_port.and_then(|p| p.qos.as_ref());
            if let (Some(publisher), Some(subscriber)) = (port.qos.as_ref(), subscriber) {
                if let Some(reason) = publisher.incompatibility(subscriber) {
                    diagnostics.push(
                        Diagnostic::new(
                            Violation::QosMismatch {
                                wire: id.clone(),
                                consumer: format!("{}/{}", instance.path, input),
                                reason,
                            },
                            Locator::new(consumer_node.name.to_string(), format!("inputs.{}", input)),
                        )
                        .at(instance.path.clone()),
                    );
                }
            }

            consumers.push(Endpoint {
                path: instance.path.clone(),
                port: input.clone(),
            });
        }

        connections.push(ResolvedConnection {
            wire: id,
            data_type: port.message_type.clone(),
            producer: Endpoint {
                path: producer.path.clone(),
                port: wire.port.clone(),
            },
            consumers,
        });
    }

    for (i, instance) in leaves.iter().enumerate() {
        let node = registry.node(instance.node);
        for input in &node.inputs {
            if !bound.contains_key(&(i, input.name.as_str())) {
                diagnostics.push(
                    Diagnostic::new(
                        Violation::UnconnectedInput {
                            port: format!("{}/{}", instance.path, input.name),
                        },
                        Locator::new(node.name.to_string(), format!("inputs.{}", input.name)),
                    )
                    .at(instance.path.clone()),
                );
            }
        }
    }

    let diagnostics = dedup(diagnostics);
    if has_errors(&diagnostics) {
        log::info!(
            "{} [{}]: not built, {} diagnostics",
            entity,
            mode,
            diagnostics.len()
        );
        return Selection {
            diagnostics,
            graph: None,
        };
    }

    let mut resolved_instances: Vec<ResolvedNodeInstance> = instances
        .iter()
        .enumerate()
        .map(|(i, (slot, instance))| {
            let node = registry.node(instance.node);
            let component = &def.components[instance.component];
            let params = system
                .overlay
                .get(instance.component, *slot)
                .cloned()
                .unwrap_or_default();
            let (namespace, name) = ResolvedNodeInstance::split_path(&instance.path);
            let outputs_wire = |port: &str| Some(format!("{}/{}", instance.path, port));

            ResolvedNodeInstance {
                path: instance.path.clone(),
                name,
                namespace,
                entity: node.name.to_string(),
                component: component.name.clone(),
                compute_unit: component.compute_unit.clone(),
                launch: node.launch.clone(),
                parameters: params.parameters,
                parameter_files: params.parameter_files,
                inputs: node
                    .inputs
                    .iter()
                    .map(|p| {
                        let binding = PortBinding {
                            data_type: p.message_type.clone(),
                            wire: bound.get(&(i, p.name.as_str())).cloned(),
                            qos: p.qos.clone(),
                        };
                        (p.name.clone(), binding)
                    })
                    .collect(),
                outputs: node
                    .outputs
                    .iter()
                    .map(|p| {
                        let binding = PortBinding {
                            data_type: p.message_type.clone(),
                            wire: outputs_wire(&p.name),
                            qos: p.qos.clone(),
                        };
                        (p.name.clone(), binding)
                    })
                    .collect(),
                processes: node.processes.clone(),
            }
        })
        .collect();
    resolved_instances.sort_by(|a, b| a.path.cmp(&b.path));
    connections.sort_by(|a, b| a.wire.cmp(&b.wire));

    log::info!(
        "{} [{}]: {} instances, {} connections",
        entity,
        mode,
        resolved_instances.len(),
        connections.len()
    );

    Selection {
        diagnostics,
        graph: Some(DeploymentGraph {
            system: entity,
            mode: mode.to_string(),
            instances: resolved_instances,
            connections,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::flatten::flatten_system;
    use crate::compile::overlay::overlay_system;
    use crate::compile::resolver::Resolver;
    use crate::compile::validator::PortChecker;
    use crate::config::{DeploymentOverrides, SubstitutionContext};
    use crate::model::{Entity, EntityKind};

    const CAMERA: &str = r#"
name: Camera.node
launch: { package: camera_pkg, executable: camera }
outputs:
  - name: image
    message_type: sensor_msgs/msg/Image
    qos: { reliability: best_effort }
"#;

    const VIEWER: &str = r#"
name: Viewer.node
launch: { package: viewer_pkg, executable: viewer }
inputs:
  - name: image
    message_type: sensor_msgs/msg/Image
    qos: { reliability: reliable }
"#;

    const SYSTEM: &str = r#"
name: Rig.system
modes: [ default, debug ]
components:
  - { component: camera, entity: Camera.node, namespace: sensing, compute_unit: ecu }
  - { component: viewer, entity: Viewer.node, mode: debug }
  - { component: ghost, entity: Missing.node, mode: debug }
connections:
  - { from: camera.output.image, to: viewer.input.image }
"#;

    fn prepare(registry: &EntityRegistry) -> PreparedSystem {
        let mut resolver = Resolver::new(registry);
        let resolved = resolver.resolve_system(registry.find_system("Rig").unwrap());
        let mut diagnostics = resolved.diagnostics.clone();
        diagnostics.extend(PortChecker::new(registry).check_system(&resolved));
        let flat = flatten_system(registry, &resolved);
        let (overlay, overlay_diagnostics) = overlay_system(
            registry,
            &resolved,
            &flat,
            &DeploymentOverrides::new(),
            &SubstitutionContext::new(),
        );
        diagnostics.extend(overlay_diagnostics);
        PreparedSystem {
            resolved,
            flat,
            overlay,
            diagnostics,
        }
    }

    fn registry() -> EntityRegistry {
        EntityRegistry::from_entities([
            Entity::from_yaml(EntityKind::Node, CAMERA).unwrap(),
            Entity::from_yaml(EntityKind::Node, VIEWER).unwrap(),
            Entity::from_yaml(EntityKind::System, SYSTEM).unwrap(),
        ])
    }

    #[test]
    fn test_default_mode_prunes_inactive_components() {
        let registry = registry();
        let prepared = prepare(&registry);
        let selection = select_mode(&registry, &prepared, "default");

        // The missing entity only matters for the debug mode
        let graph = selection.graph.expect("default mode builds");
        assert_eq!(graph.instances.len(), 1);
        assert_eq!(graph.instances[0].path, "/sensing/camera");
        assert_eq!(graph.instances[0].compute_unit.as_deref(), Some("ecu"));

        let codes: Vec<&str> = selection.diagnostics.iter().map(|d| d.violation.code()).collect();
        assert_eq!(codes, vec!["dangling_connection", "unused_output"]);
        assert_eq!(graph.connections[0].wire, "/sensing/camera/image");
        assert!(graph.connections[0].consumers.is_empty());
    }

    #[test]
    fn test_debug_mode_fails_on_missing_entity() {
        let registry = registry();
        let prepared = prepare(&registry);
        let selection = select_mode(&registry, &prepared, "debug");
        assert!(selection.graph.is_none());
        assert!(selection
            .diagnostics
            .iter()
            .any(|d| matches!(d.violation, Violation::ReferenceNotFound { .. })));
        assert!(selection
            .diagnostics
            .iter()
            .any(|d| matches!(d.violation, Violation::QosMismatch { .. })));
    }

    #[test]
    fn test_unknown_mode() {
        let registry = registry();
        let prepared = prepare(&registry);
        let selection = select_mode(&registry, &prepared, "flight");
        assert!(selection.graph.is_none());
        assert!(matches!(
            selection.diagnostics[0].violation,
            Violation::UnknownMode { ref mode, .. } if mode == "flight"
        ));
    }

    #[test]
    fn test_wire_bindings() {
        let system = SYSTEM.replace("  - { component: ghost, entity: Missing.node, mode: debug }\n", "");
        let registry = EntityRegistry::from_entities([
            Entity::from_yaml(EntityKind::Node, CAMERA).unwrap(),
            Entity::from_yaml(EntityKind::Node, VIEWER).unwrap(),
            Entity::from_yaml(EntityKind::System, &system).unwrap(),
        ]);
        let prepared = prepare(&registry);
        let selection = select_mode(&registry, &prepared, "debug");
        let graph = selection.graph.expect("debug mode builds");

        let viewer = graph.instance("/viewer").unwrap();
        assert_eq!(viewer.inputs["image"].wire.as_deref(), Some("/sensing/camera/image"));
        let wire = graph.connection("/sensing/camera/image").unwrap();
        assert_eq!(
            wire.consumers,
            vec![Endpoint {
                path: "/viewer".to_string(),
                port: "image".to_string()
            }]
        );
        assert_eq!(selection.diagnostics.len(), 1);
        assert!(matches!(
            selection.diagnostics[0].violation,
            Violation::QosMismatch { .. }
        ));
    }
}

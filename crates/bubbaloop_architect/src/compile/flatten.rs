//! Hierarchy flattening
//!
//! Every component is expanded into the leaf node instances below it. Module
//! boundaries stay visible as *terminals*: `(component, local path, direction,
//! port)` where the local path names a leaf or a module instance relative to
//! the component (the empty path is the component itself). A module's
//! `output.objects` seen from inside and `sub.output.objects` seen from the
//! parent are the same terminal, so splicing a connection through a module
//! boundary needs no rewriting. Wires are assembled later, per mode, by a
//! forward walk from every leaf output over the terminal edges.

use super::registry::{EntityRegistry, ModuleId, NodeId};
use super::resolver::{ResolvedModule, ResolvedSystem, ResolvedTarget};
use crate::diagnostic::{Diagnostic, Locator, Violation};
use crate::model::{join_path, normalize_namespace, Direction, PortPath};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet, VecDeque};

/// An enclosing module of a leaf instance
#[derive(Debug, Clone, PartialEq)]
pub struct Ancestor {
    pub module: ModuleId,
    /// Path of the leaf relative to that module
    pub relative: String,
}

/// A leaf node instance
#[derive(Debug, Clone)]
pub struct FlatInstance {
    /// Globally unique hierarchical path
    pub path: String,
    /// Index of the owning component in the system
    pub component: usize,
    /// Path relative to the component root
    pub local: String,
    pub node: NodeId,
    /// Enclosing modules, innermost first
    pub ancestry: Vec<Ancestor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Terminal {
    pub component: usize,
    pub local: String,
    pub direction: Direction,
    pub port: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Edge {
    pub from: Terminal,
    pub to: Terminal,
}

/// One system component, expanded
#[derive(Debug, Clone)]
pub struct FlatComponent {
    pub index: usize,
    pub name: String,
    /// `<namespace>/<component>`
    pub root: String,
    pub instances: Vec<FlatInstance>,
    /// Connections inside the component's modules
    pub edges: Vec<Edge>,
}

/// A system with every resolved component expanded
#[derive(Debug, Clone)]
pub struct FlatSystem {
    /// Indexed like the system's components; `None` where resolution failed
    pub components: Vec<Option<FlatComponent>>,
    /// Top-level connections, with the index of the connection they come from
    pub edges: Vec<(usize, Edge)>,
}

impl FlatSystem {
    pub fn instances(&self) -> impl Iterator<Item = &FlatInstance> {
        self.components.iter().flatten().flat_map(|c| c.instances.iter())
    }
}

/// Expand every resolved component of a system
pub fn flatten_system(registry: &EntityRegistry, system: &ResolvedSystem) -> FlatSystem {
    let def = registry.system(system.id);

    let components: Vec<Option<FlatComponent>> = system
        .components
        .iter()
        .enumerate()
        .map(|(index, resolved)| {
            let target = resolved.target.as_ref()?;
            let declared = &def.components[index];
            let root = format!("{}/{}", normalize_namespace(&declared.namespace), declared.name);
            let mut component = FlatComponent {
                index,
                name: declared.name.clone(),
                root,
                instances: Vec::new(),
                edges: Vec::new(),
            };
            match target {
                ResolvedTarget::Node(node) => component.instances.push(FlatInstance {
                    path: component.root.clone(),
                    component: index,
                    local: String::new(),
                    node: *node,
                    ancestry: Vec::new(),
                }),
                ResolvedTarget::Module(module) => {
                    let mut stack = Vec::new();
                    expand_module(registry, module, "", &mut stack, &mut component);
                }
            }
            log::debug!(
                "Flattened component {} into {} instances",
                component.root,
                component.instances.len()
            );
            Some(component)
        })
        .collect();

    let edges = def
        .connections
        .iter()
        .enumerate()
        .filter_map(|(i, connection)| {
            let endpoint = |path: &PortPath| {
                let (index, _) = system.component(path.instance()?)?;
                Some(Terminal {
                    component: index,
                    local: String::new(),
                    direction: path.direction(),
                    port: path.port().to_string(),
                })
            };
            Some((
                i,
                Edge {
                    from: endpoint(&connection.from)?,
                    to: endpoint(&connection.to)?,
                },
            ))
        })
        .collect();

    FlatSystem { components, edges }
}

fn expand_module(
    registry: &EntityRegistry,
    module: &ResolvedModule,
    prefix: &str,
    stack: &mut Vec<(ModuleId, String)>,
    component: &mut FlatComponent,
) {
    stack.push((module.id, prefix.to_string()));

    for child in &module.children {
        let local = join_path(prefix, &child.name);
        match child.target {
            ResolvedTarget::Node(node) => {
                let ancestry = stack
                    .iter()
                    .rev()
                    .map(|(module, module_prefix)| Ancestor {
                        module: *module,
                        relative: strip_prefix(&local, module_prefix),
                    })
                    .collect();
                component.instances.push(FlatInstance {
                    path: join_path(&component.root, &local),
                    component: component.index,
                    local,
                    node,
                    ancestry,
                });
            }
            ResolvedTarget::Module(ref sub) => {
                expand_module(registry, sub, &local, stack, component);
            }
        }
    }

    let terminal = |path: &PortPath| Terminal {
        component: component.index,
        local: match path.instance() {
            Some(instance) => join_path(prefix, instance),
            None => prefix.to_string(),
        },
        direction: path.direction(),
        port: path.port().to_string(),
    };
    let edges: Vec<Edge> = registry
        .module(module.id)
        .connections
        .iter()
        .map(|c| Edge {
            from: terminal(&c.from),
            to: terminal(&c.to),
        })
        .collect();
    component.edges.extend(edges);

    stack.pop();
}

fn strip_prefix(local: &str, prefix: &str) -> String {
    if prefix.is_empty() {
        return local.to_string();
    }
    local
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('/'))
        .unwrap_or(local)
        .to_string()
}

/// A resolved wire: one producing leaf port and the leaf ports it reaches
#[derive(Debug, Clone)]
pub struct Wire {
    /// Index into the instance list handed to [`assemble_wires`]
    pub producer: usize,
    pub port: String,
    /// `(instance index, input port)`, sorted by instance path then port
    pub consumers: Vec<(usize, String)>,
}

/// Follow edges from every leaf output to the leaf inputs it reaches.
///
/// `instances` are the active leaf instances; `edges` every active edge.
/// Returns wires in instance order, then output declaration order, plus a
/// diagnostic for every input port reached from more than one producer.
pub fn assemble_wires(
    registry: &EntityRegistry,
    entity: &str,
    instances: &[&FlatInstance],
    edges: &[&Edge],
) -> (Vec<Wire>, Vec<Diagnostic>) {
    let mut adjacency: HashMap<&Terminal, Vec<&Terminal>> = HashMap::new();
    for edge in edges {
        adjacency.entry(&edge.from).or_default().push(&edge.to);
    }

    let leaves: HashMap<(usize, &str), usize> = instances
        .iter()
        .enumerate()
        .map(|(i, instance)| ((instance.component, instance.local.as_str()), i))
        .collect();

    let mut wires = Vec::new();
    let mut bound: IndexMap<(usize, String), usize> = IndexMap::new();
    let mut diagnostics = Vec::new();

    for (producer, instance) in instances.iter().enumerate() {
        let node = registry.node(instance.node);
        for port in &node.outputs {
            let start = Terminal {
                component: instance.component,
                local: instance.local.clone(),
                direction: Direction::Output,
                port: port.name.clone(),
            };

            let mut consumers = Vec::new();
            let mut visited: HashSet<&Terminal> = HashSet::new();
            let mut queue: VecDeque<&Terminal> = VecDeque::new();
            queue.push_back(&start);

            while let Some(terminal) = queue.pop_front() {
                for &next in adjacency.get(terminal).into_iter().flatten() {
                    if !visited.insert(next) {
                        continue;
                    }
                    if next.direction == Direction::Input {
                        if let Some(&consumer) = leaves.get(&(next.component, next.local.as_str())) {
                            consumers.push((consumer, next.port.clone()));
                            continue;
                        }
                    }
                    queue.push_back(next);
                }
            }

            consumers.sort_by(|a, b| {
                (instances[a.0].path.as_str(), a.1.as_str())
                    .cmp(&(instances[b.0].path.as_str(), b.1.as_str()))
            });
            consumers.dedup();

            for (consumer, input) in &consumers {
                if let Some(&previous) = bound.get(&(*consumer, input.clone())) {
                    let earlier: &Wire = &wires[previous];
                    diagnostics.push(
                        Diagnostic::new(
                            Violation::MultiplePublishersOnTopic {
                                destination: format!("{}/{}", instances[*consumer].path, input),
                                publishers: vec![
                                    format!("{}/{}", instances[earlier.producer].path, earlier.port),
                                    format!("{}/{}", instance.path, port.name),
                                ],
                            },
                            Locator::new(entity, "connections"),
                        )
                        .at(instances[*consumer].path.clone()),
                    );
                } else {
                    bound.insert((*consumer, input.clone()), wires.len());
                }
            }

            wires.push(Wire {
                producer,
                port: port.name.clone(),
                consumers,
            });
        }
    }

    (wires, diagnostics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::resolver::Resolver;
    use crate::model::{Entity, EntityKind};

    const DOCS: &[(EntityKind, &str)] = &[
        (
            EntityKind::Node,
            r#"
name: Lidar.node
launch: { package: lidar_pkg, executable: lidar }
outputs: [ { name: points, message_type: PointCloud2 } ]
"#,
        ),
        (
            EntityKind::Node,
            r#"
name: Filter.node
launch: { package: filter_pkg, plugin: filter::Crop }
inputs: [ { name: points, message_type: PointCloud2 } ]
outputs: [ { name: points, message_type: PointCloud2 } ]
"#,
        ),
        (
            EntityKind::Module,
            r#"
name: Preprocess.module
instances:
  - { instance: crop, entity: Filter.node }
  - { instance: downsample, entity: Filter.node }
external_interfaces:
  input: [ { name: points } ]
  output: [ { name: points } ]
connections:
  - { from: input.points, to: crop.input.points }
  - { from: crop.output.points, to: downsample.input.points }
  - { from: downsample.output.points, to: output.points }
"#,
        ),
        (
            EntityKind::Module,
            r#"
name: Sensing.module
instances:
  - { instance: lidar, entity: Lidar.node }
  - { instance: preprocess, entity: Preprocess.module }
external_interfaces:
  output: [ { name: points } ]
connections:
  - { from: lidar.output.points, to: preprocess.input.points }
  - { from: preprocess.output.points, to: output.points }
"#,
        ),
        (
            EntityKind::System,
            r#"
name: Vehicle.system
components:
  - { component: sensing, entity: Sensing.module, namespace: /sensing }
  - { component: consumer, entity: Filter.node }
connections:
  - { from: sensing.output.points, to: consumer.input.points }
"#,
        ),
    ];

    fn flatten() -> (EntityRegistry, FlatSystem) {
        let registry = EntityRegistry::from_entities(
            DOCS.iter()
                .map(|(kind, yaml)| Entity::from_yaml(*kind, yaml).unwrap()),
        );
        let mut resolver = Resolver::new(&registry);
        let resolved = resolver.resolve_system(registry.find_system("Vehicle").unwrap());
        assert!(resolved.diagnostics.is_empty(), "{:#?}", resolved.diagnostics);
        let flat = flatten_system(&registry, &resolved);
        (registry, flat)
    }

    #[test]
    fn test_instance_paths() {
        let (_, flat) = flatten();
        let paths: Vec<&str> = flat.instances().map(|i| i.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "/sensing/sensing/lidar",
                "/sensing/sensing/preprocess/crop",
                "/sensing/sensing/preprocess/downsample",
                "/consumer",
            ]
        );
    }

    #[test]
    fn test_ancestry() {
        let (_, flat) = flatten();
        let crop = flat
            .instances()
            .find(|i| i.path.ends_with("/crop"))
            .unwrap();
        let relative: Vec<&str> = crop.ancestry.iter().map(|a| a.relative.as_str()).collect();
        assert_eq!(relative, vec!["crop", "preprocess/crop"]);
    }

    #[test]
    fn test_wires_splice_through_modules() {
        let (registry, flat) = flatten();
        let instances: Vec<&FlatInstance> = flat.instances().collect();
        let edges: Vec<&Edge> = flat
            .components
            .iter()
            .flatten()
            .flat_map(|c| c.edges.iter())
            .chain(flat.edges.iter().map(|(_, e)| e))
            .collect();
        let (wires, diagnostics) = assemble_wires(&registry, "Vehicle.system", &instances, &edges);
        assert!(diagnostics.is_empty());
        assert_eq!(wires.len(), 4);

        let describe = |w: &Wire| {
            (
                instances[w.producer].path.clone(),
                w.consumers
                    .iter()
                    .map(|(c, _)| instances[*c].path.clone())
                    .collect::<Vec<_>>(),
            )
        };
        assert_eq!(
            describe(&wires[0]),
            (
                "/sensing/sensing/lidar".to_string(),
                vec!["/sensing/sensing/preprocess/crop".to_string()]
            )
        );
        assert_eq!(
            describe(&wires[2]),
            (
                "/sensing/sensing/preprocess/downsample".to_string(),
                vec!["/consumer".to_string()]
            )
        );
        assert!(wires[3].consumers.is_empty());
    }

    #[test]
    fn test_strip_prefix() {
        assert_eq!(strip_prefix("a/b/c", "a"), "b/c");
        assert_eq!(strip_prefix("a/b/c", ""), "a/b/c");
        assert_eq!(strip_prefix("ab/c", "a"), "ab/c");
    }
}

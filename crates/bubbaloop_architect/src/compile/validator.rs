//! Port and connection checks at every module and system boundary
//!
//! Inside a scope, a connection source must face outward from a producer:
//! the scope's own `input.<port>` or a child's `output.<port>`. A sink is the
//! scope's `output.<port>` or a child's `input.<port>`. Every sink may be
//! fed by one source only, which makes one producer per wire structural.

use super::registry::{EntityRegistry, ModuleId};
use super::resolver::{ResolvedModule, ResolvedSystem, ResolvedTarget};
use crate::diagnostic::{Diagnostic, Locator, Violation};
use crate::model::{
    join_path, normalize_namespace, ConnectionDef, DataType, Direction, ModuleDef, NodeDef,
    PortPath,
};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Ports visible from outside a node or module. `None` types could not be inferred.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Interface {
    pub inputs: IndexMap<String, Option<DataType>>,
    pub outputs: IndexMap<String, Option<DataType>>,
}

impl Interface {
    pub fn of_node(node: &NodeDef) -> Self {
        let collect = |direction| {
            node.ports(direction)
                .iter()
                .map(|p| (p.name.clone(), Some(p.message_type.clone())))
                .collect()
        };
        Self {
            inputs: collect(Direction::Input),
            outputs: collect(Direction::Output),
        }
    }

    pub fn ports(&self, direction: Direction) -> &IndexMap<String, Option<DataType>> {
        match direction {
            Direction::Input => &self.inputs,
            Direction::Output => &self.outputs,
        }
    }
}

/// Result of checking one module and everything below it
#[derive(Debug, Clone)]
pub struct ModuleCheck {
    pub interface: Interface,
    pub diagnostics: Vec<Diagnostic>,
}

/// Relative paths of every leaf node below a module (`detector`, `lidar/filter`)
pub fn leaf_paths(module: &ResolvedModule) -> Vec<String> {
    let mut out = Vec::new();
    collect_leaves(module, "", &mut out);
    out
}

fn collect_leaves(module: &ResolvedModule, prefix: &str, out: &mut Vec<String>) {
    for child in &module.children {
        let local = join_path(prefix, &child.name);
        match child.target {
            ResolvedTarget::Node(_) => out.push(local),
            ResolvedTarget::Module(ref sub) => collect_leaves(sub, &local, out),
        }
    }
}

/// Normalize a module-relative instance path (`/a//b/` to `a/b`)
pub fn relative_path(path: &str) -> String {
    normalize_namespace(path).trim_start_matches('/').to_string()
}

/// An endpoint resolved inside one scope
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Slot {
    External(Direction, String),
    Child(usize, Direction, String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Role {
    Source,
    Sink,
}

/// One module or system scope under check
struct Scope<'s> {
    entity: String,
    children: Vec<(&'s str, Option<&'s Interface>)>,
    /// External port types; `None` for systems, which have no boundary
    external: Option<IndexMap<(Direction, String), Option<DataType>>>,
}

impl Scope<'_> {
    fn resolve(
        &self,
        path: &PortPath,
        role: Role,
    ) -> Result<Option<(Slot, Option<DataType>)>, String> {
        let expected = match role {
            Role::Source => "source",
            Role::Sink => "sink",
        };
        match path {
            PortPath::External { direction, port } => {
                let external = self
                    .external
                    .as_ref()
                    .ok_or_else(|| "a system has no external interface".to_string())?;
                let allowed = match role {
                    Role::Source => Direction::Input,
                    Role::Sink => Direction::Output,
                };
                if *direction != allowed {
                    return Err(format!(
                        "an external {} cannot be a connection {}",
                        direction, expected
                    ));
                }
                let ty = external
                    .get(&(*direction, port.clone()))
                    .ok_or_else(|| format!("no external {} '{}'", direction, port))?;
                Ok(Some((Slot::External(*direction, port.clone()), ty.clone())))
            }
            PortPath::Internal {
                instance,
                direction,
                port,
            } => {
                let allowed = match role {
                    Role::Source => Direction::Output,
                    Role::Sink => Direction::Input,
                };
                if *direction != allowed {
                    return Err(format!(
                        "{} ports of '{}' cannot be a connection {}",
                        direction, instance, expected
                    ));
                }
                let (index, interface) = self
                    .children
                    .iter()
                    .enumerate()
                    .find(|(_, (name, _))| *name == instance.as_str())
                    .map(|(i, (_, interface))| (i, *interface))
                    .ok_or_else(|| format!("no instance '{}'", instance))?;
                // Unresolved child: already reported
                let Some(interface) = interface else {
                    return Ok(None);
                };
                let ty = interface.ports(*direction).get(port).ok_or_else(|| {
                    format!("'{}' has no {} port '{}'", instance, direction, port)
                })?;
                Ok(Some((Slot::Child(index, *direction, port.clone()), ty.clone())))
            }
        }
    }

    fn slot_type(&self, slot: &Slot, fixed: &Option<DataType>) -> Option<DataType> {
        match slot {
            Slot::External(direction, port) => self
                .external
                .as_ref()
                .and_then(|e| e.get(&(*direction, port.clone())))
                .cloned()
                .flatten(),
            Slot::Child(..) => fixed.clone(),
        }
    }

    /// Check all connections of the scope. Returns each diagnostic with the
    /// index of the connection it belongs to.
    fn check(&mut self, connections: &[ConnectionDef]) -> Vec<(usize, Diagnostic)> {
        let mut issues = Vec::new();
        let mut valid: Vec<(usize, Slot, Option<DataType>, Slot, Option<DataType>)> = Vec::new();
        let mut seen = HashSet::new();

        for (i, connection) in connections.iter().enumerate() {
            if !seen.insert(connection) {
                issues.push((
                    i,
                    Diagnostic::new(
                        Violation::DuplicateName {
                            what: "connection".to_string(),
                            name: format!("{} -> {}", connection.from, connection.to),
                        },
                        Locator::new(&self.entity, format!("connections[{}]", i)),
                    ),
                ));
                continue;
            }

            let mut endpoint = |path: &PortPath, role: Role, field: &str| {
                match self.resolve(path, role) {
                    Ok(resolved) => resolved,
                    Err(reason) => {
                        issues.push((
                            i,
                            Diagnostic::new(
                                Violation::InvalidPortPath {
                                    path: path.to_string(),
                                    reason,
                                },
                                Locator::new(&self.entity, format!("connections[{}].{}", i, field)),
                            ),
                        ));
                        None
                    }
                }
            };
            let from = endpoint(&connection.from, Role::Source, "from");
            let to = endpoint(&connection.to, Role::Sink, "to");
            if let (Some((src, src_ty)), Some((dst, dst_ty))) = (from, to) {
                valid.push((i, src, src_ty, dst, dst_ty));
            }
        }

        // Undeclared external port types flow in from whatever they connect to
        if let Some(external) = self.external.as_mut() {
            loop {
                let mut changed = false;
                for (_, src, src_ty, dst, dst_ty) in &valid {
                    for (slot, other) in [(src, (dst, dst_ty)), (dst, (src, src_ty))] {
                        let Slot::External(direction, port) = slot else {
                            continue;
                        };
                        let other_ty = match other.0 {
                            Slot::External(d, p) => {
                                external.get(&(*d, p.clone())).cloned().flatten()
                            }
                            Slot::Child(..) => other.1.clone(),
                        };
                        if let (Some(entry), Some(ty)) =
                            (external.get_mut(&(*direction, port.clone())), other_ty)
                        {
                            if entry.is_none() {
                                *entry = Some(ty);
                                changed = true;
                            }
                        }
                    }
                }
                if !changed {
                    break;
                }
            }
        }

        for (i, src, src_ty, dst, dst_ty) in &valid {
            let src_ty = self.slot_type(src, src_ty);
            let dst_ty = self.slot_type(dst, dst_ty);
            if let (Some(expected), Some(found)) = (src_ty, dst_ty) {
                if expected != found {
                    issues.push((
                        *i,
                        Diagnostic::new(
                            Violation::TypeMismatch {
                                expected: expected.to_string(),
                                found: found.to_string(),
                            },
                            Locator::new(&self.entity, format!("connections[{}]", i)),
                        ),
                    ));
                }
            }
        }

        // Identical connections were dropped above, so every entry is a distinct source
        let mut by_sink: IndexMap<&Slot, Vec<usize>> = IndexMap::new();
        for (i, _, _, dst, _) in &valid {
            by_sink.entry(dst).or_default().push(*i);
        }
        for sources in by_sink.values().filter(|s| s.len() > 1) {
            let first = sources[0];
            let last = sources[sources.len() - 1];
            issues.push((
                last,
                Diagnostic::new(
                    Violation::MultiplePublishersOnTopic {
                        destination: connections[first].to.to_string(),
                        publishers: sources
                            .iter()
                            .map(|j| connections[*j].from.to_string())
                            .collect(),
                    },
                    Locator::new(&self.entity, format!("connections[{}].to", last)),
                ),
            ));
        }

        issues.sort_by_key(|(i, _)| *i);
        issues
    }
}

/// Memoizing port checker, shared by all systems of a run
pub struct PortChecker<'a> {
    registry: &'a EntityRegistry,
    memo: HashMap<ModuleId, Arc<ModuleCheck>>,
}

impl<'a> PortChecker<'a> {
    pub fn new(registry: &'a EntityRegistry) -> Self {
        Self {
            registry,
            memo: HashMap::new(),
        }
    }

    /// Check a resolved module and its subtree; the result lists subtree diagnostics too
    pub fn check_module(&mut self, module: &ResolvedModule) -> Arc<ModuleCheck> {
        if let Some(check) = self.memo.get(&module.id) {
            return Arc::clone(check);
        }

        let registry = self.registry;
        let def = registry.module(module.id);
        let mut diagnostics = Vec::new();

        let mut interfaces: Vec<Interface> = Vec::with_capacity(module.children.len());
        for child in &module.children {
            let (interface, subtree) = self.interface_of(&child.target);
            interfaces.push(interface);
            diagnostics.extend(subtree);
        }

        let mut external = IndexMap::new();
        for direction in [Direction::Input, Direction::Output] {
            for port in def.external_interfaces.ports(direction) {
                external.insert((direction, port.name.clone()), port.message_type.clone());
            }
        }

        let mut scope = Scope {
            entity: def.name.to_string(),
            children: module
                .children
                .iter()
                .zip(&interfaces)
                .map(|(child, interface)| (child.name.as_str(), Some(interface)))
                .collect(),
            external: Some(external),
        };
        diagnostics.extend(scope.check(&def.connections).into_iter().map(|(_, d)| d));
        diagnostics.extend(check_module_defaults(def, module));

        let mut interface = Interface::default();
        for ((direction, port), ty) in scope.external.take().unwrap_or_default() {
            match direction {
                Direction::Input => interface.inputs.insert(port, ty),
                Direction::Output => interface.outputs.insert(port, ty),
            };
        }

        log::debug!(
            "Checked {}: {} inputs, {} outputs",
            def.name,
            interface.inputs.len(),
            interface.outputs.len()
        );
        let check = Arc::new(ModuleCheck {
            interface,
            diagnostics,
        });
        self.memo.insert(module.id, Arc::clone(&check));
        check
    }

    /// Check the top-level connections of a system and every component below it.
    /// Diagnostics are scoped to the components they concern.
    pub fn check_system(&mut self, system: &ResolvedSystem) -> Vec<Diagnostic> {
        let registry = self.registry;
        let def = registry.system(system.id);
        let mut diagnostics = Vec::new();

        let mut interfaces: Vec<Option<Interface>> = Vec::with_capacity(system.components.len());
        for component in &system.components {
            match component.target {
                Some(ref target) => {
                    let (interface, subtree) = self.interface_of(target);
                    diagnostics.extend(
                        subtree
                            .into_iter()
                            .map(|d| d.scoped([component.name.clone()])),
                    );
                    interfaces.push(Some(interface));
                }
                None => interfaces.push(None),
            }
        }

        let mut scope = Scope {
            entity: def.name.to_string(),
            children: system
                .components
                .iter()
                .zip(&interfaces)
                .map(|(component, interface)| (component.name.as_str(), interface.as_ref()))
                .collect(),
            external: None,
        };
        for (i, diagnostic) in scope.check(&def.connections) {
            let connection = &def.connections[i];
            let involved = [&connection.from, &connection.to]
                .into_iter()
                .filter_map(|p| p.instance())
                .filter(|name| system.component(name).is_some())
                .map(str::to_string)
                .collect::<Vec<_>>();
            diagnostics.push(diagnostic.scoped(involved));
        }

        diagnostics
    }

    fn interface_of(&mut self, target: &ResolvedTarget) -> (Interface, Vec<Diagnostic>) {
        match target {
            ResolvedTarget::Node(id) => (Interface::of_node(self.registry.node(*id)), Vec::new()),
            ResolvedTarget::Module(module) => {
                let check = self.check_module(module);
                (check.interface.clone(), check.diagnostics.clone())
            }
        }
    }
}

/// Module-level parameter defaults must address a leaf below the module
fn check_module_defaults(def: &ModuleDef, module: &ResolvedModule) -> Vec<Diagnostic> {
    if def.parameters.is_empty() {
        return Vec::new();
    }
    let leaves = leaf_paths(module);
    def.parameters
        .iter()
        .enumerate()
        .filter(|(_, o)| !leaves.contains(&relative_path(&o.node)))
        .map(|(i, o)| {
            Diagnostic::new(
                Violation::ParameterOverrideTargetNotFound {
                    target: o.node.clone(),
                },
                Locator::new(def.name.to_string(), format!("parameters[{}].node", i)),
            )
        })
        .collect()
}

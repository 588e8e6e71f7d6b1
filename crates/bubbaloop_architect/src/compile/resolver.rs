//! Reference resolution and cycle detection
//!
//! Systems are resolved first, since their components name the roots. Modules
//! are then resolved lazily and memoized: a module reached from several places
//! is resolved once and its [`ResolvedModule`] shared through an `Arc`.

use super::registry::{EntityHandle, EntityRegistry, ModuleId, NodeId, ParameterSetId, SystemId};
use crate::diagnostic::{Diagnostic, Locator, Violation};
use crate::model::{EntityKind, EntityRef};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// What an instance or component resolved to
#[derive(Debug, Clone)]
pub enum ResolvedTarget {
    Node(NodeId),
    Module(Arc<ResolvedModule>),
}

#[derive(Debug, Clone)]
pub struct ResolvedChild {
    pub name: String,
    pub target: ResolvedTarget,
}

/// A module whose whole subtree resolved
#[derive(Debug)]
pub struct ResolvedModule {
    pub id: ModuleId,
    /// Children in declaration order
    pub children: Vec<ResolvedChild>,
}

#[derive(Debug, Clone)]
pub struct ResolvedComponent {
    pub name: String,
    /// `None` when the component's entity or part of its subtree is missing
    pub target: Option<ResolvedTarget>,
    pub parameter_sets: Vec<ParameterSetId>,
}

#[derive(Debug, Clone)]
pub struct ResolvedSystem {
    pub id: SystemId,
    pub components: Vec<ResolvedComponent>,
    /// Resolution and structural diagnostics, scoped to components where possible
    pub diagnostics: Vec<Diagnostic>,
}

impl ResolvedSystem {
    pub fn component(&self, name: &str) -> Option<(usize, &ResolvedComponent)> {
        self.components
            .iter()
            .enumerate()
            .find(|(_, c)| c.name == name)
    }
}

/// Outcome of resolving one module, including everything below it
#[derive(Debug, Clone)]
struct ModuleResolution {
    module: Option<Arc<ResolvedModule>>,
    diagnostics: Vec<Diagnostic>,
}

#[derive(Debug)]
enum Memo {
    Visiting,
    Done(ModuleResolution),
}

/// Resolves references against a registry. One resolver is shared by all
/// systems of a run so that memoized modules are reused across systems.
pub struct Resolver<'a> {
    registry: &'a EntityRegistry,
    memo: HashMap<ModuleId, Memo>,
    stack: Vec<ModuleId>,
    reached: HashSet<EntityRef>,
}

impl<'a> Resolver<'a> {
    pub fn new(registry: &'a EntityRegistry) -> Self {
        Self {
            registry,
            memo: HashMap::new(),
            stack: Vec::new(),
            reached: HashSet::new(),
        }
    }

    /// Resolve every component reference of a system
    pub fn resolve_system(&mut self, id: SystemId) -> ResolvedSystem {
        let registry = self.registry;
        let system = registry.system(id);
        let entity = system.name.to_string();
        self.reached.insert(system.name.clone());

        let mut diagnostics = registry.checks(&system.name).to_vec();
        let mut components = Vec::with_capacity(system.components.len());

        for (i, component) in system.components.iter().enumerate() {
            let scope = [component.name.clone()];
            let field = format!("components[{}]", i);

            let (target, subtree) = self.resolve_reference(
                &component.entity,
                Locator::new(&entity, format!("{}.entity", field)),
            );
            diagnostics.extend(subtree.into_iter().map(|d| d.scoped(scope.clone())));

            let mut parameter_sets = Vec::new();
            for (j, set) in component.parameter_sets.iter().enumerate() {
                if set.kind != EntityKind::ParameterSet {
                    continue;
                }
                match registry.find_parameter_set(set) {
                    Some(set_id) => {
                        self.reached.insert(set.clone());
                        diagnostics.extend(
                            registry
                                .checks(set)
                                .iter()
                                .cloned()
                                .map(|d| d.scoped(scope.clone())),
                        );
                        parameter_sets.push(set_id);
                    }
                    None => diagnostics.push(
                        Diagnostic::new(
                            Violation::ReferenceNotFound {
                                what: "parameter set".to_string(),
                                name: set.to_string(),
                            },
                            Locator::new(&entity, format!("{}.parameter_set[{}]", field, j)),
                        )
                        .scoped(scope.clone()),
                    ),
                }
            }

            components.push(ResolvedComponent {
                name: component.name.clone(),
                target,
                parameter_sets,
            });
        }

        log::debug!(
            "Resolved {}: {} of {} components complete",
            entity,
            components.iter().filter(|c| c.target.is_some()).count(),
            components.len()
        );

        ResolvedSystem {
            id,
            components,
            diagnostics,
        }
    }

    /// Structural diagnostics of definitions no resolved system reaches
    pub fn unreached_diagnostics(&self) -> Vec<Diagnostic> {
        self.registry
            .names()
            .into_iter()
            .filter(|name| !self.reached.contains(*name))
            .flat_map(|name| self.registry.checks(name).iter().cloned())
            .collect()
    }

    /// Resolve one `entity:` reference. Returns the target (if the whole
    /// subtree resolved) and every diagnostic found below it.
    fn resolve_reference(
        &mut self,
        reference: &EntityRef,
        locator: Locator,
    ) -> (Option<ResolvedTarget>, Vec<Diagnostic>) {
        match reference.kind {
            EntityKind::Node | EntityKind::Module => {}
            // Rejected by the structural checks already
            EntityKind::System | EntityKind::ParameterSet => return (None, Vec::new()),
        }

        match self.registry.lookup(reference) {
            None => (
                None,
                vec![Diagnostic::new(
                    Violation::ReferenceNotFound {
                        what: reference.kind.to_string(),
                        name: reference.to_string(),
                    },
                    locator,
                )],
            ),
            Some(EntityHandle::Node(id)) => {
                self.reached.insert(reference.clone());
                let checks = self.registry.checks(reference).to_vec();
                (Some(ResolvedTarget::Node(id)), checks)
            }
            Some(EntityHandle::Module(id)) => {
                if let Some(cycle) = self.cycle_through(id) {
                    return (
                        None,
                        vec![Diagnostic::new(
                            Violation::CyclicComposition { cycle },
                            locator,
                        )],
                    );
                }
                let resolution = self.resolve_module(id);
                (
                    resolution.module.map(ResolvedTarget::Module),
                    resolution.diagnostics,
                )
            }
        }
    }

    /// If `id` is on the current traversal stack, the cycle it closes
    fn cycle_through(&self, id: ModuleId) -> Option<Vec<String>> {
        let start = self.stack.iter().position(|m| *m == id)?;
        let mut cycle: Vec<String> = self.stack[start..]
            .iter()
            .map(|m| self.registry.module(*m).name.to_string())
            .collect();
        cycle.push(self.registry.module(id).name.to_string());
        Some(cycle)
    }

    fn resolve_module(&mut self, id: ModuleId) -> ModuleResolution {
        match self.memo.get(&id) {
            Some(Memo::Done(resolution)) => return resolution.clone(),
            // Only reachable through a cycle, which `cycle_through` reports first
            Some(Memo::Visiting) => {
                return ModuleResolution {
                    module: None,
                    diagnostics: Vec::new(),
                }
            }
            None => {}
        }

        let registry = self.registry;
        let module = registry.module(id);
        let entity = module.name.to_string();
        self.reached.insert(module.name.clone());
        self.memo.insert(id, Memo::Visiting);
        self.stack.push(id);

        let mut diagnostics = registry.checks(&module.name).to_vec();
        let mut children = Vec::with_capacity(module.instances.len());
        let mut complete = true;

        for (i, instance) in module.instances.iter().enumerate() {
            let (target, subtree) = self.resolve_reference(
                &instance.entity,
                Locator::new(&entity, format!("instances[{}].entity", i)),
            );
            diagnostics.extend(subtree);
            match target {
                Some(target) => children.push(ResolvedChild {
                    name: instance.name.clone(),
                    target,
                }),
                None => complete = false,
            }
        }

        self.stack.pop();
        let resolution = ModuleResolution {
            module: complete.then(|| Arc::new(ResolvedModule { id, children })),
            diagnostics,
        };
        log::debug!(
            "Resolved {} ({})",
            entity,
            if complete { "complete" } else { "incomplete" }
        );
        self.memo.insert(id, Memo::Done(resolution.clone()));
        resolution
    }
}

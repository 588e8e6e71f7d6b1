//! Entity registry: one name index per kind, handed out as integer handles

use crate::diagnostic::{Diagnostic, Locator, Violation};
use crate::model::{Entity, EntityKind, EntityRef, ModuleDef, NodeDef, ParameterSetDef, SystemDef};
use std::collections::HashMap;

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub(crate) usize);

        impl $name {
            pub fn index(&self) -> usize {
                self.0
            }
        }
    };
}

handle!(
    /// Handle to a registered node
    NodeId
);
handle!(
    /// Handle to a registered module
    ModuleId
);
handle!(
    /// Handle to a registered system
    SystemId
);
handle!(
    /// Handle to a registered parameter set
    ParameterSetId
);

/// What an instance or component may point at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityHandle {
    Node(NodeId),
    Module(ModuleId),
}

/// All loaded definitions, immutable once registration is over.
///
/// Names are unique per kind: registering a second definition under a taken
/// name keeps the first one and records a `DuplicateName` diagnostic.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    nodes: Vec<NodeDef>,
    modules: Vec<ModuleDef>,
    systems: Vec<SystemDef>,
    parameter_sets: Vec<ParameterSetDef>,
    index: HashMap<EntityRef, usize>,
    checks: HashMap<EntityRef, Vec<Diagnostic>>,
    diagnostics: Vec<Diagnostic>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every entity in order
    pub fn from_entities<I: IntoIterator<Item = Entity>>(entities: I) -> Self {
        let mut registry = Self::new();
        for entity in entities {
            registry.register(entity);
        }
        registry
    }

    /// Insert an entity, or reject it if its name is taken. Returns whether it was inserted.
    pub fn register(&mut self, entity: Entity) -> bool {
        let name = entity.name().clone();
        if self.index.contains_key(&name) {
            log::debug!("Rejecting duplicate definition {}", name);
            self.diagnostics.push(Diagnostic::new(
                Violation::DuplicateName {
                    what: name.kind.to_string(),
                    name: name.to_string(),
                },
                Locator::new(name.to_string(), "name"),
            ));
            return false;
        }

        let checks = entity.check();
        let slot = match entity {
            Entity::Node(def) => push(&mut self.nodes, def),
            Entity::Module(def) => push(&mut self.modules, def),
            Entity::System(def) => push(&mut self.systems, def),
            Entity::ParameterSet(def) => push(&mut self.parameter_sets, def),
        };
        if !checks.is_empty() {
            self.checks.insert(name.clone(), checks);
        }
        self.index.insert(name, slot);
        true
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Registry-level diagnostics (duplicate names)
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Structural check results for one registered entity
    pub fn checks(&self, name: &EntityRef) -> &[Diagnostic] {
        self.checks.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every registered entity name, sorted
    pub fn names(&self) -> Vec<&EntityRef> {
        let mut names: Vec<&EntityRef> = self.index.keys().collect();
        names.sort();
        names
    }

    /// Look up an instance or component target
    pub fn lookup(&self, name: &EntityRef) -> Option<EntityHandle> {
        let slot = *self.index.get(name)?;
        match name.kind {
            EntityKind::Node => Some(EntityHandle::Node(NodeId(slot))),
            EntityKind::Module => Some(EntityHandle::Module(ModuleId(slot))),
            EntityKind::System | EntityKind::ParameterSet => None,
        }
    }

    pub fn find_system(&self, name: &str) -> Option<SystemId> {
        let key = EntityRef::new(name, EntityKind::System);
        self.index.get(&key).map(|&slot| SystemId(slot))
    }

    pub fn find_parameter_set(&self, name: &EntityRef) -> Option<ParameterSetId> {
        if name.kind != EntityKind::ParameterSet {
            return None;
        }
        self.index.get(name).map(|&slot| ParameterSetId(slot))
    }

    pub fn node(&self, id: NodeId) -> &NodeDef {
        &self.nodes[id.0]
    }

    pub fn module(&self, id: ModuleId) -> &ModuleDef {
        &self.modules[id.0]
    }

    pub fn system(&self, id: SystemId) -> &SystemDef {
        &self.systems[id.0]
    }

    pub fn parameter_set(&self, id: ParameterSetId) -> &ParameterSetDef {
        &self.parameter_sets[id.0]
    }

    /// All systems, sorted by name
    pub fn systems(&self) -> Vec<SystemId> {
        let mut ids: Vec<SystemId> = (0..self.systems.len()).map(SystemId).collect();
        ids.sort_by(|a, b| self.system(*a).name.cmp(&self.system(*b).name));
        ids
    }
}

fn push<T>(items: &mut Vec<T>, item: T) -> usize {
    items.push(item);
    items.len() - 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str) -> Entity {
        let yaml = format!("name: {}.node\nlaunch: {{ package: pkg, executable: bin }}\n", name);
        Entity::from_yaml(EntityKind::Node, &yaml).unwrap()
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = EntityRegistry::from_entities([node("Camera"), node("Lidar")]);
        assert_eq!(registry.len(), 2);

        let handle = registry.lookup(&"Lidar.node".parse().unwrap());
        match handle {
            Some(EntityHandle::Node(id)) => assert_eq!(registry.node(id).name.name, "Lidar"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(registry.lookup(&"Lidar.module".parse().unwrap()).is_none());
        assert!(registry.diagnostics().is_empty());
    }

    #[test]
    fn test_duplicate_names_keep_first() {
        let mut registry = EntityRegistry::new();
        assert!(registry.register(node("Camera")));
        assert!(!registry.register(node("Camera")));
        assert_eq!(registry.len(), 1);
        assert!(matches!(
            registry.diagnostics()[0].violation,
            Violation::DuplicateName { .. }
        ));
    }

    #[test]
    fn test_same_name_different_kind() {
        let module = Entity::from_yaml(EntityKind::Module, "name: Camera.module").unwrap();
        let registry = EntityRegistry::from_entities([node("Camera"), module]);
        assert_eq!(registry.len(), 2);
        assert!(registry.diagnostics().is_empty());
    }

    #[test]
    fn test_checks_are_recorded() {
        let broken =
            Entity::from_yaml(EntityKind::Node, "name: Broken.node\nlaunch: { package: pkg }")
                .unwrap();
        let registry = EntityRegistry::from_entities([broken]);
        assert_eq!(registry.checks(&"Broken.node".parse().unwrap()).len(), 1);
    }

    #[test]
    fn test_systems_sorted_by_name() {
        let b = Entity::from_yaml(EntityKind::System, "name: Bravo.system").unwrap();
        let a = Entity::from_yaml(EntityKind::System, "name: Alpha.system").unwrap();
        let registry = EntityRegistry::from_entities([b, a]);
        let names: Vec<_> = registry
            .systems()
            .into_iter()
            .map(|id| registry.system(id).name.name.clone())
            .collect();
        assert_eq!(names, vec!["Alpha", "Bravo"]);
        assert!(registry.find_system("Alpha").is_some());
    }
}

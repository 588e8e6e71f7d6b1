//! Entity kinds and references

use super::{is_entity_name, ModuleDef, NodeDef, ParameterSetDef, SyntaxError, SystemDef};
use crate::diagnostic::Diagnostic;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The four kinds of definition documents
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Node,
    Module,
    System,
    ParameterSet,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Node,
        EntityKind::Module,
        EntityKind::System,
        EntityKind::ParameterSet,
    ];

    /// Suffix used in names and file names (`Detector.node`, `x.node.yaml`)
    pub fn suffix(&self) -> &'static str {
        match self {
            EntityKind::Node => "node",
            EntityKind::Module => "module",
            EntityKind::System => "system",
            EntityKind::ParameterSet => "parameter_set",
        }
    }

    pub fn from_suffix(suffix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.suffix() == suffix)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

/// Reference to an entity, written `Name.kind`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityRef {
    pub name: String,
    pub kind: EntityKind,
}

impl EntityRef {
    pub fn new(name: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

impl FromStr for EntityRef {
    type Err = SyntaxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, suffix) = s
            .rsplit_once('.')
            .ok_or_else(|| SyntaxError::EntityRef(s.to_string(), "missing '.<kind>' suffix"))?;
        let kind = EntityKind::from_suffix(suffix).ok_or_else(|| {
            SyntaxError::EntityRef(
                s.to_string(),
                "kind must be one of node, module, system, parameter_set",
            )
        })?;
        if !is_entity_name(name) {
            return Err(SyntaxError::EntityRef(
                s.to_string(),
                "name must match [A-Za-z][A-Za-z0-9_]*",
            ));
        }
        Ok(Self::new(name, kind))
    }
}

impl TryFrom<String> for EntityRef {
    type Error = SyntaxError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EntityRef> for String {
    fn from(value: EntityRef) -> Self {
        value.to_string()
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.name, self.kind)
    }
}

/// One loaded definition document
#[derive(Debug, Clone)]
pub enum Entity {
    Node(NodeDef),
    Module(ModuleDef),
    System(SystemDef),
    ParameterSet(ParameterSetDef),
}

impl Entity {
    /// Parse a document of a known kind
    pub fn from_yaml(kind: EntityKind, content: &str) -> Result<Self, serde_yaml::Error> {
        Ok(match kind {
            EntityKind::Node => Entity::Node(serde_yaml::from_str(content)?),
            EntityKind::Module => Entity::Module(serde_yaml::from_str(content)?),
            EntityKind::System => Entity::System(serde_yaml::from_str(content)?),
            EntityKind::ParameterSet => Entity::ParameterSet(serde_yaml::from_str(content)?),
        })
    }

    /// The `name` the document declares
    pub fn name(&self) -> &EntityRef {
        match self {
            Entity::Node(n) => &n.name,
            Entity::Module(m) => &m.name,
            Entity::System(s) => &s.name,
            Entity::ParameterSet(p) => &p.name,
        }
    }

    /// Structural checks on field shapes, independent of other entities
    pub fn check(&self) -> Vec<Diagnostic> {
        match self {
            Entity::Node(n) => n.check(),
            Entity::Module(m) => m.check(),
            Entity::System(s) => s.check(),
            Entity::ParameterSet(p) => p.check(),
        }
    }
}

//! Entity definitions: nodes, modules, systems and parameter sets
//!
//! These are the YAML document schemas. Deserialization turns loosely typed
//! fields (entity references, port paths, trigger conditions) into typed
//! values once; later stages never look at raw YAML again.

mod entity;
mod module;
mod node;
mod parameter;
mod port;
mod system;
mod trigger;

pub use entity::*;
pub use module::*;
pub use node::*;
pub use parameter::*;
pub use port::*;
pub use system::*;
pub use trigger::*;

use regex::Regex;
use serde::{Deserialize, Deserializer};
use std::sync::LazyLock;

/// Entity names: `Detector` in `Detector.node`
static ENTITY_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").unwrap());

/// Instance, component, port, process and parameter names
static LOCAL_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// Namespace segments between slashes
static NAMESPACE_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

pub(crate) fn is_entity_name(name: &str) -> bool {
    ENTITY_NAME.is_match(name)
}

pub(crate) fn is_local_name(name: &str) -> bool {
    LOCAL_NAME.is_match(name)
}

/// Parameter names may be dotted (`detection.range`)
pub(crate) fn is_parameter_name(name: &str) -> bool {
    name.split('.').all(is_local_name)
}

/// Syntax errors raised while deserializing typed fields
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SyntaxError {
    #[error("invalid entity reference '{0}': {1}")]
    EntityRef(String, &'static str),

    #[error("invalid port path '{0}': expected '<input|output>.<port>' or '<instance>.<input|output>.<port>'")]
    PortPath(String),

    #[error("invalid trigger condition: {0}")]
    Trigger(String),

    #[error("invalid outcome: {0}")]
    Outcome(String),
}

/// Normalize a namespace: leading `/`, no empty segments, no trailing `/`.
/// The root namespace is the empty string.
pub fn normalize_namespace(namespace: &str) -> String {
    let segments: Vec<&str> = namespace.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        String::new()
    } else {
        format!("/{}", segments.join("/"))
    }
}

/// Check the segments of a (normalized or raw) namespace
pub(crate) fn is_valid_namespace(namespace: &str) -> bool {
    namespace
        .split('/')
        .filter(|s| !s.is_empty())
        .all(|s| NAMESPACE_SEGMENT.is_match(s))
}

/// Join a parent path and a child name with `/`
pub fn join_path(parent: &str, child: &str) -> String {
    match (parent.is_empty(), child.is_empty()) {
        (_, true) => parent.to_string(),
        (true, false) => child.to_string(),
        (false, false) => format!("{}/{}", parent, child),
    }
}

/// A field that accepts a single value or a list of values
#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

pub(crate) fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(value) => vec![value],
        OneOrMany::Many(values) => values,
    })
}

//! Diagnostics collected while compiling a system
//!
//! Model violations are not early `Err` returns: every stage pushes
//! [`Diagnostic`] values and compilation of a (System, mode) pair only fails
//! once all of them have been collected.

use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

/// How serious a diagnostic is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Blocks the deployment graph of the affected pair
    Error,
    /// Suspicious, but the graph is still produced
    Warning,
    /// Informational observation
    Note,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Note => write!(f, "note"),
        }
    }
}

/// Points back at the offending definition
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Locator {
    /// Entity reference, e.g. `Perception.module`
    pub entity: String,
    /// Field path inside the entity, e.g. `connections[1].to`
    pub field: String,
    /// Flattened instance path, when the violation is tied to one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
}

impl Locator {
    pub fn new(entity: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            field: field.into(),
            instance: None,
        }
    }

    /// Attach an instance path
    pub fn at(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.entity)?;
        if !self.field.is_empty() {
            write!(f, ": {}", self.field)?;
        }
        if let Some(ref instance) = self.instance {
            write!(f, " (instance {})", instance)?;
        }
        Ok(())
    }
}

/// Everything that can be wrong with a set of definitions
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    #[error("{what} '{name}' not found")]
    ReferenceNotFound { what: String, name: String },

    #[error("duplicate {what} '{name}'")]
    DuplicateName { what: String, name: String },

    #[error("data type mismatch: '{expected}' vs '{found}'")]
    TypeMismatch { expected: String, found: String },

    #[error("invalid port path '{path}': {reason}")]
    InvalidPortPath { path: String, reason: String },

    #[error("'{destination}' has multiple publishers: {}", .publishers.join(", "))]
    MultiplePublishersOnTopic {
        destination: String,
        publishers: Vec<String>,
    },

    #[error("cyclic composition: {}", .cycle.join(" -> "))]
    CyclicComposition { cycle: Vec<String> },

    #[error("unknown mode '{mode}' (declared: {})", .declared.join(", "))]
    UnknownMode { mode: String, declared: Vec<String> },

    #[error("parameter override target '{target}' not found")]
    ParameterOverrideTargetNotFound { target: String },

    #[error("invalid definition: {reason}")]
    InvalidDefinition { reason: String },

    #[error("output '{wire}' has no consumers")]
    UnusedOutput { wire: String },

    #[error("input '{port}' has no producer")]
    UnconnectedInput { port: String },

    #[error("connection '{from}' -> '{to}' dropped: component '{component}' is not active")]
    DanglingConnection {
        from: String,
        to: String,
        component: String,
    },

    #[error("QoS mismatch on '{wire}' for consumer '{consumer}': {reason}")]
    QosMismatch {
        wire: String,
        consumer: String,
        reason: String,
    },
}

impl Violation {
    /// Severity a violation carries unless stated otherwise
    pub fn severity(&self) -> Severity {
        match self {
            Violation::UnusedOutput { .. } => Severity::Note,
            Violation::UnconnectedInput { .. }
            | Violation::DanglingConnection { .. }
            | Violation::QosMismatch { .. } => Severity::Warning,
            _ => Severity::Error,
        }
    }

    /// Short stable identifier used in reports
    pub fn code(&self) -> &'static str {
        match self {
            Violation::ReferenceNotFound { .. } => "reference_not_found",
            Violation::DuplicateName { .. } => "duplicate_name",
            Violation::TypeMismatch { .. } => "type_mismatch",
            Violation::InvalidPortPath { .. } => "invalid_port_path",
            Violation::MultiplePublishersOnTopic { .. } => "multiple_publishers_on_topic",
            Violation::CyclicComposition { .. } => "cyclic_composition",
            Violation::UnknownMode { .. } => "unknown_mode",
            Violation::ParameterOverrideTargetNotFound { .. } => {
                "parameter_override_target_not_found"
            }
            Violation::InvalidDefinition { .. } => "invalid_definition",
            Violation::UnusedOutput { .. } => "unused_output",
            Violation::UnconnectedInput { .. } => "unconnected_input",
            Violation::DanglingConnection { .. } => "dangling_connection",
            Violation::QosMismatch { .. } => "qos_mismatch",
        }
    }
}

/// A located violation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub violation: Violation,
    pub locator: Locator,
    /// System components this diagnostic belongs to. Empty means it applies
    /// to every mode of the system.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub scope: Vec<String>,
}

impl Diagnostic {
    pub fn new(violation: Violation, locator: Locator) -> Self {
        Self {
            severity: violation.severity(),
            violation,
            locator,
            scope: Vec::new(),
        }
    }

    /// Point the diagnostic at a resolved instance path
    pub fn at(mut self, instance: impl Into<String>) -> Self {
        self.locator.instance = Some(instance.into());
        self
    }

    /// Tie the diagnostic to the given components
    pub fn scoped<I, S>(mut self, components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for component in components {
            let component = component.into();
            if !self.scope.contains(&component) {
                self.scope.push(component);
            }
        }
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{}[{}]: {}",
            self.severity,
            self.violation.code(),
            self.violation
        )?;
        write!(f, "  --> {}", self.locator)
    }
}

/// Whether any diagnostic in the slice is an error
pub fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(Diagnostic::is_error)
}

/// Drop repeated diagnostics, keeping first-seen order.
///
/// A module used by several components reports the same violation once per
/// component; only the first copy survives.
pub fn dedup(diagnostics: Vec<Diagnostic>) -> Vec<Diagnostic> {
    let mut seen = HashSet::new();
    diagnostics
        .into_iter()
        .filter(|d| seen.insert((d.violation.clone(), d.locator.clone())))
        .collect()
}

//! Compilation driver
//!
//! Resolution and port checks run once per system on the calling thread so
//! that memoized modules are shared across systems. Flattening, overlay and
//! per-mode selection only read the registry and run in parallel.

use super::flatten::flatten_system;
use super::overlay::{overlay_system, unmatched_deployment_targets};
use super::registry::{EntityRegistry, SystemId};
use super::resolver::Resolver;
use super::select::{select_mode, PreparedSystem};
use super::validator::PortChecker;
use crate::config::{DeploymentOverrides, SubstitutionContext};
use crate::diagnostic::{has_errors, Diagnostic, Severity};
use crate::graph::DeploymentGraph;
use rayon::prelude::*;
use std::collections::HashSet;
use std::fmt;

/// What to compile
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// System names (without suffix). Empty means every registered system.
    pub systems: Vec<String>,
    /// Modes to build. Empty means every mode each system declares.
    pub modes: Vec<String>,
    /// Deployment layer, applied last
    pub deployment: DeploymentOverrides,
}

impl CompileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_system(mut self, name: impl Into<String>) -> Self {
        self.systems.push(name.into());
        self
    }

    pub fn with_mode(mut self, name: impl Into<String>) -> Self {
        self.modes.push(name.into());
        self
    }

    pub fn with_deployment(mut self, deployment: DeploymentOverrides) -> Self {
        self.deployment = deployment;
        self
    }
}

/// Errors in how the compiler was invoked
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("Unknown system '{name}' (available: {})", .available.join(", "))]
    UnknownSystem { name: String, available: Vec<String> },
}

/// Result of compiling one (system, mode) pair
#[derive(Debug, Clone)]
pub struct PairOutcome {
    pub system: String,
    pub mode: String,
    pub diagnostics: Vec<Diagnostic>,
    /// Present only if no error was found for this pair
    pub graph: Option<DeploymentGraph>,
}

impl PairOutcome {
    pub fn is_success(&self) -> bool {
        self.graph.is_some()
    }
}

/// Everything a compilation run found
#[derive(Debug, Clone, Default)]
pub struct CompileReport {
    /// Diagnostics not tied to a single pair: duplicate definitions, broken
    /// definitions no system uses, deployment overrides that match nothing
    pub definitions: Vec<Diagnostic>,
    /// One entry per (system, mode), ordered by system name then mode
    pub outcomes: Vec<PairOutcome>,
}

impl CompileReport {
    /// False if any error was found anywhere
    pub fn is_success(&self) -> bool {
        !has_errors(&self.definitions)
            && self
                .outcomes
                .iter()
                .all(|o| o.is_success() && !has_errors(&o.diagnostics))
    }

    pub fn graphs(&self) -> impl Iterator<Item = &DeploymentGraph> {
        self.outcomes.iter().filter_map(|o| o.graph.as_ref())
    }

    /// Look up a pair by system name (with or without suffix) and mode
    pub fn outcome(&self, system: &str, mode: &str) -> Option<&PairOutcome> {
        let system = system.strip_suffix(".system").unwrap_or(system);
        self.outcomes.iter().find(|o| {
            o.system.strip_suffix(".system") == Some(system) && o.mode == mode
        })
    }

    /// Every diagnostic of the run
    pub fn diagnostics(&self) -> impl Iterator<Item = &Diagnostic> {
        self.definitions
            .iter()
            .chain(self.outcomes.iter().flat_map(|o| o.diagnostics.iter()))
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics().filter(|d| d.severity == severity).count()
    }
}

/// Compile the requested systems and modes against a loaded registry
pub fn compile(
    registry: &EntityRegistry,
    options: &CompileOptions,
) -> Result<CompileReport, CompileError> {
    let ids = select_systems(registry, &options.systems)?;

    let mut definitions = registry.diagnostics().to_vec();
    definitions.extend(options.deployment.check());

    let mut resolver = Resolver::new(registry);
    let mut checker = PortChecker::new(registry);
    let resolved: Vec<_> = ids
        .iter()
        .map(|&id| {
            let system = resolver.resolve_system(id);
            let mut diagnostics = system.diagnostics.clone();
            diagnostics.extend(checker.check_system(&system));
            (system, diagnostics)
        })
        .collect();
    definitions.extend(resolver.unreached_diagnostics());

    let context = SubstitutionContext::new().with_args(options.deployment.arg_strings());
    let prepared: Vec<PreparedSystem> = resolved
        .into_par_iter()
        .map(|(system, mut diagnostics)| {
            let flat = flatten_system(registry, &system);
            let (overlay, overlay_diagnostics) =
                overlay_system(registry, &system, &flat, &options.deployment, &context);
            diagnostics.extend(overlay_diagnostics);
            PreparedSystem {
                resolved: system,
                flat,
                overlay,
                diagnostics,
            }
        })
        .collect();

    let paths: HashSet<String> = prepared
        .iter()
        .flat_map(|p| p.flat.instances().map(|i| i.path.clone()))
        .collect();
    definitions.extend(unmatched_deployment_targets(&options.deployment, &paths));

    let pairs: Vec<(&PreparedSystem, String)> = prepared
        .iter()
        .flat_map(|p| {
            let modes = if options.modes.is_empty() {
                registry.system(p.resolved.id).declared_modes()
            } else {
                options.modes.clone()
            };
            modes.into_iter().map(move |mode| (p, mode))
        })
        .collect();

    let outcomes: Vec<PairOutcome> = pairs
        .into_par_iter()
        .map(|(system, mode)| {
            let selection = select_mode(registry, system, &mode);
            PairOutcome {
                system: registry.system(system.resolved.id).name.to_string(),
                mode,
                diagnostics: selection.diagnostics,
                graph: selection.graph,
            }
        })
        .collect();

    let report = CompileReport {
        definitions,
        outcomes,
    };
    log::info!(
        "Compiled {} systems into {} of {} deployment graphs",
        ids.len(),
        report.graphs().count(),
        report.outcomes.len()
    );
    Ok(report)
}

/// Requested systems sorted by name, or all of them
fn select_systems(
    registry: &EntityRegistry,
    names: &[String],
) -> Result<Vec<SystemId>, CompileError> {
    if names.is_empty() {
        return Ok(registry.systems());
    }

    let mut ids = Vec::with_capacity(names.len());
    for name in names {
        let bare = name.strip_suffix(".system").unwrap_or(name);
        match registry.find_system(bare) {
            Some(id) => ids.push(id),
            None => {
                return Err(CompileError::UnknownSystem {
                    name: name.clone(),
                    available: registry
                        .systems()
                        .into_iter()
                        .map(|id| registry.system(id).name.name.clone())
                        .collect(),
                })
            }
        }
    }
    ids.sort_by(|a, b| registry.system(*a).name.cmp(&registry.system(*b).name));
    ids.dedup();
    Ok(ids)
}

fn write_diagnostics(f: &mut fmt::Formatter<'_>, diagnostics: &[Diagnostic]) -> fmt::Result {
    for diagnostic in diagnostics {
        for line in diagnostic.to_string().lines() {
            writeln!(f, "  {}", line)?;
        }
    }
    Ok(())
}

/// Display the report in a human-readable format
impl fmt::Display for CompileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Compile Report")?;
        writeln!(f, "==============")?;
        writeln!(f)?;

        if !self.definitions.is_empty() {
            writeln!(f, "Definitions:")?;
            write_diagnostics(f, &self.definitions)?;
            writeln!(f)?;
        }

        for outcome in &self.outcomes {
            match outcome.graph {
                Some(ref graph) => writeln!(
                    f,
                    "{} [{}]: built ({} instances, {} connections)",
                    outcome.system,
                    outcome.mode,
                    graph.instances.len(),
                    graph.connections.len()
                )?,
                None => writeln!(
                    f,
                    "{} [{}]: failed ({} errors)",
                    outcome.system,
                    outcome.mode,
                    outcome.diagnostics.iter().filter(|d| d.is_error()).count()
                )?,
            }
            write_diagnostics(f, &outcome.diagnostics)?;
        }

        writeln!(f)?;
        write!(
            f,
            "Result: {} of {} deployment graphs built, {} errors, {} warnings, {} notes",
            self.graphs().count(),
            self.outcomes.len(),
            self.count(Severity::Error),
            self.count(Severity::Warning),
            self.count(Severity::Note)
        )
    }
}

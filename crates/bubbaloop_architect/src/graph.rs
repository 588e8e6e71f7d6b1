//! Deployment graph: the self-contained output of one (system, mode) compilation

use crate::compile::{EffectiveFile, EffectiveParameter};
use crate::model::{
    DataType, EntityKind, EntityRef, LaunchDescriptor, NodeOverride, ParameterOverride,
    ParameterSetDef, ProcessDef, Qos,
};
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Port of an instance and the wire it is bound to
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortBinding {
    pub data_type: DataType,
    /// Unbound inputs have no wire
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wire: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qos: Option<Qos>,
}

/// A flattened node instance with everything an emitter needs to launch it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedNodeInstance {
    /// Fully qualified instance path, e.g. `/perception/perception_1/detector`
    pub path: String,
    /// Last path segment
    pub name: String,
    /// Path without the last segment, `/` at the root
    pub namespace: String,
    /// Node definition this instance was created from
    pub entity: String,
    /// System component the instance belongs to
    pub component: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compute_unit: Option<String>,
    pub launch: LaunchDescriptor,
    pub parameters: IndexMap<String, EffectiveParameter>,
    pub parameter_files: IndexMap<String, EffectiveFile>,
    pub inputs: IndexMap<String, PortBinding>,
    pub outputs: IndexMap<String, PortBinding>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub processes: Vec<ProcessDef>,
}

impl ResolvedNodeInstance {
    /// Split an instance path into `(namespace, name)`
    pub fn split_path(path: &str) -> (String, String) {
        match path.rsplit_once('/') {
            Some(("", name)) => ("/".to_string(), name.to_string()),
            Some((namespace, name)) => (namespace.to_string(), name.to_string()),
            None => ("/".to_string(), path.to_string()),
        }
    }
}

/// One end of a wire
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Endpoint {
    pub path: String,
    pub port: String,
}

/// A wire: one producer, zero or more consumers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedConnection {
    /// `<producer path>/<output port>`
    pub wire: String,
    pub data_type: DataType,
    pub producer: Endpoint,
    pub consumers: Vec<Endpoint>,
}

/// Fully resolved, mode-filtered, parameter-overlaid system
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeploymentGraph {
    pub system: String,
    pub mode: String,
    /// Sorted by path
    pub instances: Vec<ResolvedNodeInstance>,
    /// Sorted by wire id
    pub connections: Vec<ResolvedConnection>,
}

impl DeploymentGraph {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn instance(&self, path: &str) -> Option<&ResolvedNodeInstance> {
        self.instances.iter().find(|i| i.path == path)
    }

    pub fn connection(&self, wire: &str) -> Option<&ResolvedConnection> {
        self.connections.iter().find(|c| c.wire == wire)
    }

    /// A parameter set listing every instance with its effective values.
    /// Feeding it back as a component's parameter set reproduces the graph's
    /// configuration.
    pub fn parameter_set_template(&self) -> ParameterSetDef {
        let system = self.system.strip_suffix(".system").unwrap_or(&self.system);
        let mode = self.mode.replace(|c: char| !c.is_ascii_alphanumeric(), "_");
        let name = EntityRef::new(format!("{}_{}", system, mode), EntityKind::ParameterSet);

        let parameters = self
            .instances
            .iter()
            .filter(|i| !i.parameters.is_empty() || !i.parameter_files.is_empty())
            .map(|i| NodeOverride {
                node: i.path.clone(),
                parameter_files: i
                    .parameter_files
                    .iter()
                    .map(|(name, file)| (name.clone(), file.path.clone()))
                    .collect(),
                parameters: i
                    .parameters
                    .iter()
                    .map(|(name, p)| ParameterOverride {
                        name: name.clone(),
                        ty: Some(p.ty),
                        value: p.value.clone(),
                    })
                    .collect(),
            })
            .collect();

        ParameterSetDef { name, parameters }
    }

    /// Launch packages needed on each compute unit, sorted and deduplicated.
    /// Instances without a compute unit are left out.
    pub fn packages_by_compute_unit(&self) -> IndexMap<String, Vec<String>> {
        let mut units: IndexMap<String, BTreeSet<String>> = IndexMap::new();
        for instance in &self.instances {
            if let Some(ref unit) = instance.compute_unit {
                units
                    .entry(unit.clone())
                    .or_default()
                    .insert(instance.launch.package.clone());
            }
        }
        units.sort_keys();
        units
            .into_iter()
            .map(|(unit, packages)| (unit, packages.into_iter().collect()))
            .collect()
    }
}

/// Write `deployment.json`, `parameter_set.yaml` and `packages.yaml` for a graph
/// into `<out>/<system>/<mode>/`. Returns the written files.
pub fn write_artifacts(
    graph: &DeploymentGraph,
    out: &Path,
) -> Result<Vec<PathBuf>, ArtifactError> {
    let system = graph.system.strip_suffix(".system").unwrap_or(&graph.system);
    let dir = out.join(system).join(&graph.mode);
    std::fs::create_dir_all(&dir).map_err(|source| ArtifactError::Io {
        path: dir.display().to_string(),
        source,
    })?;

    let files = [
        ("deployment.json", graph.to_json()?),
        (
            "parameter_set.yaml",
            serde_yaml::to_string(&graph.parameter_set_template())?,
        ),
        (
            "packages.yaml",
            serde_yaml::to_string(&graph.packages_by_compute_unit())?,
        ),
    ];

    let mut written = Vec::with_capacity(files.len());
    for (name, content) in files {
        let path = dir.join(name);
        std::fs::write(&path, content).map_err(|source| ArtifactError::Io {
            path: path.display().to_string(),
            source,
        })?;
        log::debug!("Wrote {}", path.display());
        written.push(path);
    }
    Ok(written)
}

/// Errors that can occur when writing artifacts
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("Failed to write '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize deployment graph: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to serialize artifact: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

//! Discovery and parsing of definition files
//!
//! The kind of a document is taken from its file name: `detector.node.yaml`,
//! `perception.module.yaml`, `vehicle.system.yaml`, `tuning.parameter_set.yaml`.

use crate::model::{Entity, EntityKind, EntityRef};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A parsed definition and where it came from
#[derive(Debug, Clone)]
pub struct LoadedEntity {
    pub path: PathBuf,
    pub entity: Entity,
}

/// Everything read from the definition roots
#[derive(Debug, Default)]
pub struct LoadResult {
    /// Parsed definitions, in path order
    pub entities: Vec<LoadedEntity>,
    /// Files that could not be read or parsed
    pub errors: Vec<LoadError>,
}

impl LoadResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Kind of a definition file, from its name
pub fn kind_of(path: &Path) -> Option<EntityKind> {
    let file_name = path.file_name()?.to_str()?;
    let stem = file_name
        .strip_suffix(".yaml")
        .or_else(|| file_name.strip_suffix(".yml"))?;
    let (_, suffix) = stem.rsplit_once('.')?;
    EntityKind::from_suffix(suffix)
}

/// Find definition files below the given roots. Files given directly must
/// carry a known kind suffix; inside directories other files are ignored.
pub fn discover<P: AsRef<Path>>(roots: &[P]) -> Result<Vec<PathBuf>, LoadError> {
    let mut files = Vec::new();

    for root in roots {
        let root = root.as_ref();
        if root.is_file() {
            if kind_of(root).is_none() {
                return Err(LoadError::UnknownKind {
                    path: root.display().to_string(),
                });
            }
            files.push(root.to_path_buf());
            continue;
        }

        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry?;
            if entry.file_type().is_file() && kind_of(entry.path()).is_some() {
                files.push(entry.into_path());
            }
        }
    }

    files.sort();
    files.dedup();
    log::debug!("Discovered {} definition files", files.len());
    Ok(files)
}

/// Read and parse one definition file
pub fn load_file(path: &Path) -> Result<Entity, LoadError> {
    let display = path.display().to_string();
    let kind = kind_of(path).ok_or_else(|| LoadError::UnknownKind {
        path: display.clone(),
    })?;
    let content = std::fs::read_to_string(path).map_err(|e| LoadError::Io {
        path: display.clone(),
        source: e,
    })?;
    let entity = Entity::from_yaml(kind, &content).map_err(|e| LoadError::Parse {
        path: display.clone(),
        source: e,
    })?;
    if entity.name().kind != kind {
        return Err(LoadError::KindMismatch {
            path: display,
            expected: kind,
            found: entity.name().clone(),
        });
    }
    Ok(entity)
}

/// Discover and parse every definition below `roots`.
///
/// Files are parsed in parallel; all of them are attempted even when some fail.
pub fn load_definitions<P: AsRef<Path>>(roots: &[P]) -> Result<LoadResult, LoadError> {
    let files = discover(roots)?;

    let parsed: Vec<Result<LoadedEntity, LoadError>> = files
        .par_iter()
        .map(|path| {
            load_file(path).map(|entity| LoadedEntity {
                path: path.clone(),
                entity,
            })
        })
        .collect();

    let mut result = LoadResult::default();
    for item in parsed {
        match item {
            Ok(loaded) => {
                log::debug!("Loaded {} from {}", loaded.entity.name(), loaded.path.display());
                result.entities.push(loaded);
            }
            Err(e) => result.errors.push(e),
        }
    }

    log::info!(
        "Loaded {} definitions ({} failed)",
        result.entities.len(),
        result.errors.len()
    );
    Ok(result)
}

/// Errors that can occur when loading definition files
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Failed to read definition file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse definition file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("'{path}' is not a definition file (expected *.node.yaml, *.module.yaml, *.system.yaml or *.parameter_set.yaml)")]
    UnknownKind { path: String },

    #[error("'{path}' should define a {expected}, but declares '{found}'")]
    KindMismatch {
        path: String,
        expected: EntityKind,
        found: EntityRef,
    },

    #[error("Failed to scan definition directory: {0}")]
    Walk(#[from] walkdir::Error),
}

//! Stable label to class-ID mapping shared by every dataset a model type trains on.
//!
//! IDs are handed out once and never renumbered or removed, so label files
//! written by earlier preparations stay valid after new labels appear.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fs_atomic;

/// Default filename of the persisted class mapping.
pub const CLASS_MAP_FILE_NAME: &str = "classes.json";

/// Label text to class ID.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassMap(BTreeMap<String, u32>);

impl ClassMap {
    pub fn get(&self, label: &str) -> Option<u32> {
        self.0.get(label).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.0.iter().map(|(label, id)| (label.as_str(), *id))
    }

    pub fn max_id(&self) -> Option<u32> {
        self.0.values().copied().max()
    }

    /// Label for a class ID, if one is assigned.
    pub fn label_for(&self, id: u32) -> Option<&str> {
        self.0
            .iter()
            .find(|(_, class_id)| **class_id == id)
            .map(|(label, _)| label.as_str())
    }

    /// Class names indexed by ID; unassigned IDs below the maximum become `class_<id>`.
    pub fn names_by_id(&self) -> Vec<String> {
        let Some(max) = self.max_id() else {
            return Vec::new();
        };
        let mut names: Vec<String> = (0..=max).map(|id| format!("class_{id}")).collect();
        for (label, id) in self.iter() {
            names[id as usize] = label.to_string();
        }
        names
    }

    fn insert(&mut self, label: String, id: u32) {
        self.0.insert(label, id);
    }

    fn has_duplicate_ids(&self) -> bool {
        let mut seen = BTreeSet::new();
        !self.0.values().all(|id| seen.insert(*id))
    }
}

impl FromIterator<(String, u32)> for ClassMap {
    fn from_iter<T: IntoIterator<Item = (String, u32)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("No verified labels to train on")]
    NoLabels,
    #[error("Failed to read class map {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid class map {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Class map {path} assigns the same ID to several labels")]
    DuplicateIds { path: PathBuf },
    #[error("Failed to write class map {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// File-backed class registry for one model type.
#[derive(Debug, Clone)]
pub struct ClassRegistry {
    path: PathBuf,
}

impl ClassRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Registry stored as `classes.json` inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(CLASS_MAP_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current mapping on disk; a missing file is an empty mapping.
    pub fn load(&self) -> Result<ClassMap, RegistryError> {
        if !self.path.exists() {
            return Ok(ClassMap::default());
        }
        let bytes = std::fs::read(&self.path).map_err(|source| RegistryError::Read {
            path: self.path.clone(),
            source,
        })?;
        let map: ClassMap =
            serde_json::from_slice(&bytes).map_err(|source| RegistryError::Parse {
                path: self.path.clone(),
                source,
            })?;
        if map.has_duplicate_ids() {
            return Err(RegistryError::DuplicateIds {
                path: self.path.clone(),
            });
        }
        Ok(map)
    }

    /// Extend the mapping with `labels` and persist it before returning.
    pub fn update(&self, labels: &BTreeSet<String>) -> Result<ClassMap, RegistryError> {
        if labels.is_empty() {
            return Err(RegistryError::NoLabels);
        }
        let mut map = self.load()?;
        let mut next_id = map.max_id().map(|id| id + 1).unwrap_or(0);
        let mut added = Vec::new();
        for label in labels {
            if map.get(label).is_none() {
                map.insert(label.clone(), next_id);
                added.push((label.as_str(), next_id));
                next_id += 1;
            }
        }
        if !added.is_empty() || !self.path.exists() {
            fs_atomic::write_json_atomic(&self.path, &map).map_err(|source| {
                RegistryError::Write {
                    path: self.path.clone(),
                    source,
                }
            })?;
        }
        if !added.is_empty() {
            tracing::info!(
                "Class map {} extended with {:?} ({} classes total)",
                self.path.display(),
                added,
                map.len()
            );
        }
        Ok(map)
    }
}

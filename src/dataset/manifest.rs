use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::fs_atomic;

pub const MANIFEST_FILE_NAME: &str = "dataset.json";
pub const MANIFEST_FORMAT_VERSION: u32 = 1;

/// Which partition a file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Val,
}

impl Split {
    pub fn as_str(self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Val => "val",
        }
    }
}

/// Dataset description consumed by the fit step (`dataset.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetManifest {
    pub format_version: u32,
    /// Absolute dataset root; the other paths are relative to it.
    pub path: PathBuf,
    pub train: String,
    pub val: String,
    pub train_labels: String,
    pub val_labels: String,
    /// Number of class slots (`names.len()`).
    pub nc: usize,
    /// Class names indexed by class ID.
    pub names: Vec<String>,
}

impl DatasetManifest {
    pub fn new(root: &Path, names: Vec<String>) -> Self {
        Self {
            format_version: MANIFEST_FORMAT_VERSION,
            path: root.to_path_buf(),
            train: "train/images".to_string(),
            val: "val/images".to_string(),
            train_labels: "train/labels".to_string(),
            val_labels: "val/labels".to_string(),
            nc: names.len(),
            names,
        }
    }

    pub fn images_dir(&self, split: Split) -> PathBuf {
        match split {
            Split::Train => self.path.join(&self.train),
            Split::Val => self.path.join(&self.val),
        }
    }

    pub fn labels_dir(&self, split: Split) -> PathBuf {
        match split {
            Split::Train => self.path.join(&self.train_labels),
            Split::Val => self.path.join(&self.val_labels),
        }
    }

    /// Label file paired with an image inside `split`.
    pub fn label_path_for(&self, split: Split, image_path: &Path) -> PathBuf {
        let stem = image_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.labels_dir(split).join(format!("{stem}.txt"))
    }

    /// Image files of a partition, sorted by name.
    pub fn list_images(&self, split: Split) -> std::io::Result<Vec<PathBuf>> {
        list_files(&self.images_dir(split), |path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| image::ImageFormat::from_extension(ext).is_some())
                .unwrap_or(false)
        })
    }

    /// Label files of a partition, sorted by name.
    pub fn list_labels(&self, split: Split) -> std::io::Result<Vec<PathBuf>> {
        list_files(&self.labels_dir(split), |path| {
            path.extension().and_then(|ext| ext.to_str()) == Some("txt")
        })
    }

    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let bytes = std::fs::read(path).map_err(|source| ManifestError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|source| ManifestError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ManifestError> {
        fs_atomic::write_json_atomic(path, self).map_err(|source| ManifestError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("Failed to read manifest {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid manifest {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Failed to write manifest {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

fn list_files(dir: &Path, keep: impl Fn(&Path) -> bool) -> std::io::Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && keep(path))
        .collect();
    files.sort();
    Ok(files)
}

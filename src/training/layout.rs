//! On-disk layout of one model type under the workspace.
//!
//! ```text
//! <workspace>/<kind>/classes.json
//! <workspace>/<kind>/dataset.json
//! <workspace>/<kind>/weights.json
//! <workspace>/<kind>/jobs/<job_id>/classes.json
//! <workspace>/<kind>/jobs/<job_id>/dataset/...
//! <workspace>/<kind>/jobs/<job_id>/weights.json
//! ```

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::backend::{ModelKind, WEIGHTS_FILE_NAME};
use crate::dataset::MANIFEST_FILE_NAME;
use crate::registry::ClassRegistry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelLayout {
    root: PathBuf,
}

impl ModelLayout {
    pub fn new(workspace: &Path, kind: ModelKind) -> Self {
        Self {
            root: workspace.join(kind.as_str()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn registry(&self) -> ClassRegistry {
        ClassRegistry::in_dir(&self.root)
    }

    pub fn weights_path(&self) -> PathBuf {
        self.root.join(WEIGHTS_FILE_NAME)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE_NAME)
    }

    pub fn jobs_dir(&self) -> PathBuf {
        self.root.join("jobs")
    }

    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.jobs_dir().join(job_id)
    }

    /// Class map a job extends before it is committed.
    pub fn job_registry(&self, job_id: &str) -> ClassRegistry {
        ClassRegistry::in_dir(&self.job_dir(job_id))
    }

    pub fn job_dataset_dir(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id).join("dataset")
    }

    /// Fit output of the most recently written job, if any job left one.
    pub fn latest_job_output(&self) -> Option<PathBuf> {
        let entries = std::fs::read_dir(self.jobs_dir()).ok()?;
        entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path().join(WEIGHTS_FILE_NAME))
            .filter_map(|path| {
                let modified = path
                    .metadata()
                    .ok()
                    .filter(|meta| meta.is_file())?
                    .modified()
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                Some((modified, path))
            })
            .max()
            .map(|(_, path)| path)
    }

    /// Artifact paths in load priority order: canonical weights, then the latest job output.
    pub fn artifact_candidates(&self) -> Vec<PathBuf> {
        let mut candidates = vec![self.weights_path()];
        if let Some(latest) = self.latest_job_output() {
            candidates.push(latest);
        }
        candidates
    }

    /// Job directories other than `keep`.
    pub fn other_job_dirs(&self, keep: &str) -> Vec<PathBuf> {
        let Ok(entries) = std::fs::read_dir(self.jobs_dir()) else {
            return Vec::new();
        };
        entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy() != keep)
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect()
    }
}

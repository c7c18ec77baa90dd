//! Cross-checks between the class map, a dataset manifest and its label files.
//!
//! `check` only reads. `repair` rewrites offending label files in place
//! (keeping a `.bak` copy) and refreshes the manifest's class list.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::augment::{is_variant, original_stem};
use crate::dataset::labels::{LabelLine, ParsedLine, parse_line, read_label_file, write_label_file};
use crate::dataset::{DatasetManifest, ManifestError, Split};
use crate::registry::ClassMap;

#[derive(Debug, Error)]
pub enum ConsistencyError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Issue {
    ClassCountMismatch { class_map: usize, manifest: usize },
    NamesMismatch { expected: Vec<String>, found: Vec<String> },
    InvalidClassId { file: PathBuf, line: usize, class_id: String },
    MalformedLine { file: PathBuf, line: usize, text: String },
    MissingLabelFile { image: PathBuf },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartitionCounts {
    pub images: usize,
    pub labels: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsistencyReport {
    pub class_count: usize,
    pub manifest_nc: usize,
    pub train: PartitionCounts,
    pub val: PartitionCounts,
    pub issues: Vec<Issue>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.issues.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RepairSummary {
    pub files_fixed: usize,
    pub lines_fixed: usize,
    pub lines_dropped: usize,
    pub manifest_rewritten: bool,
}

/// Number of class slots a label may reference: one past the highest assigned ID.
fn class_slots(class_map: &ClassMap) -> usize {
    class_map.names_by_id().len()
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ConsistencyError + '_ {
    move |source| ConsistencyError::Io {
        path: path.to_path_buf(),
        source,
    }
}

pub fn check(
    manifest: &DatasetManifest,
    class_map: &ClassMap,
) -> Result<ConsistencyReport, ConsistencyError> {
    let expected = class_map.names_by_id();
    let mut report = ConsistencyReport {
        class_count: expected.len(),
        manifest_nc: manifest.nc,
        ..ConsistencyReport::default()
    };
    if manifest.nc != expected.len() {
        report.issues.push(Issue::ClassCountMismatch {
            class_map: expected.len(),
            manifest: manifest.nc,
        });
    }
    if manifest.names != expected {
        report.issues.push(Issue::NamesMismatch {
            expected: expected.clone(),
            found: manifest.names.clone(),
        });
    }

    let slots = expected.len();
    for split in [Split::Train, Split::Val] {
        let images = manifest
            .list_images(split)
            .map_err(io_error(&manifest.images_dir(split)))?;
        let labels = manifest
            .list_labels(split)
            .map_err(io_error(&manifest.labels_dir(split)))?;
        for image in &images {
            if !manifest.label_path_for(split, image).is_file() {
                report.issues.push(Issue::MissingLabelFile {
                    image: image.clone(),
                });
            }
        }
        for file in &labels {
            let lines = read_label_file(file).map_err(io_error(file))?;
            for (idx, line) in lines.into_iter().enumerate() {
                match line {
                    ParsedLine::Valid(line) if (line.class_id as usize) < slots => {}
                    ParsedLine::Valid(line) => report.issues.push(Issue::InvalidClassId {
                        file: file.clone(),
                        line: idx + 1,
                        class_id: line.class_id.to_string(),
                    }),
                    ParsedLine::BadClass { token, .. } => {
                        report.issues.push(Issue::InvalidClassId {
                            file: file.clone(),
                            line: idx + 1,
                            class_id: token,
                        })
                    }
                    ParsedLine::Malformed(text) => report.issues.push(Issue::MalformedLine {
                        file: file.clone(),
                        line: idx + 1,
                        text,
                    }),
                }
            }
        }
        let counts = PartitionCounts {
            images: images.len(),
            labels: labels.len(),
        };
        match split {
            Split::Train => report.train = counts,
            Split::Val => report.val = counts,
        }
    }
    Ok(report)
}

/// Class ID an augmented label file should fall back to: its original's first line, else 0.
fn fallback_class(file: &Path, slots: usize) -> u32 {
    if !is_variant(file) {
        return 0;
    }
    let Some(stem) = original_stem(file) else {
        return 0;
    };
    let original = file.with_file_name(format!("{stem}.txt"));
    let first = std::fs::read_to_string(&original)
        .ok()
        .and_then(|text| text.lines().find(|l| !l.trim().is_empty()).map(parse_line));
    match first {
        Some(ParsedLine::Valid(line)) if (line.class_id as usize) < slots => line.class_id,
        _ => 0,
    }
}

pub fn repair(
    manifest_path: &Path,
    class_map: &ClassMap,
) -> Result<RepairSummary, ConsistencyError> {
    let mut manifest = DatasetManifest::load(manifest_path)?;
    let slots = class_slots(class_map);
    let mut summary = RepairSummary::default();

    for split in [Split::Train, Split::Val] {
        let labels = manifest
            .list_labels(split)
            .map_err(io_error(&manifest.labels_dir(split)))?;
        for file in labels {
            let parsed = read_label_file(&file).map_err(io_error(&file))?;
            let mut fixed = Vec::with_capacity(parsed.len());
            let mut changed = false;
            for line in parsed {
                match line {
                    ParsedLine::Valid(line) if (line.class_id as usize) < slots => fixed.push(line),
                    ParsedLine::Valid(LabelLine { center, .. })
                    | ParsedLine::BadClass { center, .. } => {
                        let class_id = fallback_class(&file, slots);
                        tracing::warn!(
                            "Reassigning invalid class in {} to {class_id}",
                            file.display()
                        );
                        fixed.push(LabelLine::clamped(class_id, center));
                        summary.lines_fixed += 1;
                        changed = true;
                    }
                    ParsedLine::Malformed(text) => {
                        tracing::warn!("Dropping malformed line in {}: {text}", file.display());
                        summary.lines_dropped += 1;
                        changed = true;
                    }
                }
            }
            if !changed {
                continue;
            }
            let backup = backup_path(&file);
            std::fs::copy(&file, &backup).map_err(io_error(&backup))?;
            write_label_file(&file, &fixed).map_err(io_error(&file))?;
            summary.files_fixed += 1;
        }
    }

    let names = class_map.names_by_id();
    if manifest.names != names || manifest.nc != names.len() {
        manifest.nc = names.len();
        manifest.names = names;
        manifest.save(manifest_path)?;
        summary.manifest_rewritten = true;
    }
    tracing::info!(
        "Repaired {} label files ({} lines fixed, {} dropped)",
        summary.files_fixed,
        summary.lines_fixed,
        summary.lines_dropped
    );
    Ok(summary)
}

fn backup_path(file: &Path) -> PathBuf {
    let mut name = file.file_name().unwrap_or_default().to_os_string();
    name.push(".bak");
    file.with_file_name(name)
}

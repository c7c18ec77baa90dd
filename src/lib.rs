//! Training and inference orchestration for an image annotation workflow.
//!
//! Maintains two model types, a sliding-window detector and a whole-image
//! few-shot classifier, each trained in the background from verified
//! annotations and served through a lazily loaded cache.

/// Annotation records and the store they are read from.
pub mod annotations;
/// Application directory resolution.
pub mod app_dirs;
/// Augmentation boundary and the default image augmenter.
pub mod augment;
/// Fit/predict capability shared by every model type.
pub mod backend;
/// Lazily loaded, memoized model artifacts.
pub mod cache;
/// TOML configuration.
pub mod config;
/// Dataset class consistency checks and repairs.
pub mod consistency;
/// Train/val dataset preparation.
pub mod dataset;
/// Atomic file replacement helpers.
pub mod fs_atomic;
/// Normalized rectangle math.
pub mod geometry;
/// Batch prediction over uploaded images.
pub mod inference;
/// Logging setup.
pub mod logging;
/// Small numeric learners used by the model backends.
pub mod ml;
/// Concrete model backends.
pub mod models;
/// Public entry point routing requests by model type.
pub mod orchestrator;
/// Normalized prediction records.
pub mod prediction;
/// Persistent label to class ID mapping.
pub mod registry;
/// Background training controllers.
pub mod training;
/// Disagreement score between the two model types.
pub mod uncertainty;

pub use backend::ModelKind;
pub use orchestrator::{Orchestrator, OrchestratorError, UncertaintyReport};

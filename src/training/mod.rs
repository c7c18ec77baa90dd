//! Background training jobs, one controller per model type.

mod controller;
mod job;
pub mod layout;
pub mod status;

pub use controller::{ControllerSettings, TrainingController, TrainingError};
pub use job::{JobOutcome, TrainingJob};
pub use layout::ModelLayout;
pub use status::{TrainingPhase, TrainingStatus};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::{BoundingBox, BoxSource, LabeledImage};
    use crate::augment::{AugmentError, AugmentRequest, Augmenter};
    use crate::backend::{FitError, FitRequest, ModelBackend, ModelKind};
    use crate::cache::CacheError;
    use crate::dataset::{DatasetManifest, DatasetOptions};
    use crate::prediction::RawDetection;
    use image::{Rgb, RgbImage};
    use std::path::{Path, PathBuf};
    use std::sync::mpsc::{self, Receiver, Sender};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::tempdir;

    struct NoAugment;

    impl Augmenter for NoAugment {
        fn augment(&self, _request: &AugmentRequest<'_>) -> Result<usize, AugmentError> {
            Ok(0)
        }
    }

    enum Behaviour {
        Succeed,
        Fail,
        Panic,
    }

    /// Fit blocks until the test releases it, reporting the progress values it is fed.
    struct GatedBackend {
        gate: Mutex<Receiver<Vec<f32>>>,
        reported: Mutex<Option<Sender<()>>>,
        behaviour: Behaviour,
    }

    impl GatedBackend {
        fn new(behaviour: Behaviour) -> (Self, Sender<Vec<f32>>) {
            let (tx, rx) = mpsc::channel();
            (
                Self {
                    gate: Mutex::new(rx),
                    reported: Mutex::new(None),
                    behaviour,
                },
                tx,
            )
        }

        /// After reporting progress, signal the test and wait for a second release.
        fn pausing(self) -> (Self, Receiver<()>) {
            let (tx, rx) = mpsc::channel();
            *self.reported.lock().unwrap() = Some(tx);
            (self, rx)
        }
    }

    impl ModelBackend for GatedBackend {
        type Model = String;

        fn kind(&self) -> ModelKind {
            ModelKind::Detector
        }

        fn fit(&self, request: &FitRequest, progress: &dyn Fn(f32)) -> Result<PathBuf, FitError> {
            let steps = self.gate.lock().unwrap().recv().unwrap_or_default();
            for step in steps {
                progress(step);
            }
            if let Some(reported) = self.reported.lock().unwrap().as_ref() {
                reported.send(()).unwrap();
                let _ = self.gate.lock().unwrap().recv();
            }
            match self.behaviour {
                Behaviour::Succeed => {
                    let path = request.output_path();
                    std::fs::write(&path, "w".repeat(128)).unwrap();
                    Ok(path)
                }
                Behaviour::Fail => Err(FitError::NoSamples(request.manifest_path.clone())),
                Behaviour::Panic => panic!("fit exploded"),
            }
        }

        fn load(&self, path: &Path) -> Result<String, CacheError> {
            std::fs::read_to_string(path).map_err(|err| CacheError::Corrupt {
                path: path.to_path_buf(),
                reason: err.to_string(),
            })
        }

        fn predict(&self, _model: &String, _image: &RgbImage) -> Vec<RawDetection> {
            Vec::new()
        }
    }

    fn fixtures(root: &Path, count: usize) -> Vec<LabeledImage> {
        let uploads = root.join("uploads");
        std::fs::create_dir_all(&uploads).unwrap();
        (0..count)
            .map(|i| {
                let filename = format!("img{i}.png");
                RgbImage::from_pixel(8, 8, Rgb([i as u8 * 20, 40, 80]))
                    .save(uploads.join(&filename))
                    .unwrap();
                LabeledImage {
                    filename,
                    annotations: vec![BoundingBox {
                        x: 0.2,
                        y: 0.2,
                        width: 0.5,
                        height: 0.5,
                        label: "cat".into(),
                        is_verified: true,
                        source: BoxSource::Human,
                        confidence: None,
                    }],
                    is_fully_annotated: true,
                }
            })
            .collect()
    }

    fn controller(root: &Path, backend: GatedBackend) -> TrainingController<GatedBackend> {
        TrainingController::new(
            backend,
            &root.join("workspace"),
            Arc::new(NoAugment),
            ControllerSettings {
                uploads_dir: root.join("uploads"),
                dataset: DatasetOptions::default(),
                min_artifact_bytes: 64,
            },
        )
    }

    #[test]
    fn second_start_is_rejected_while_running() {
        let dir = tempdir().unwrap();
        let images = fixtures(dir.path(), 5);
        let (backend, gate) = GatedBackend::new(Behaviour::Succeed);
        let controller = controller(dir.path(), backend);
        let job = controller.start_job(images.clone()).unwrap();
        assert!(!controller.start(images));
        let status = controller.status();
        assert!(status.training_in_progress);
        assert!(!status.is_ready);
        gate.send(Vec::new()).unwrap();
        assert!(matches!(job.wait(), JobOutcome::Ready { .. }));
        let status = controller.status();
        assert!(status.is_ready && status.is_available && !status.training_in_progress);
        assert_eq!(status.progress, 1.0);
        assert_eq!(controller.phase(), TrainingPhase::Ready);
        assert!(controller.layout().weights_path().is_file());
        assert!(controller.layout().manifest_path().is_file());
    }

    #[test]
    fn progress_never_moves_backwards() {
        let dir = tempdir().unwrap();
        let images = fixtures(dir.path(), 3);
        let (backend, gate) = GatedBackend::new(Behaviour::Fail);
        let (backend, reported) = backend.pausing();
        let controller = controller(dir.path(), backend);
        let job = controller.start_job(images).unwrap();
        gate.send(vec![0.2, 0.6, 0.4, f32::NAN]).unwrap();
        reported.recv().unwrap();
        let status = controller.status();
        assert!(status.training_in_progress);
        assert!((status.progress - 0.6).abs() < 1e-6);

        gate.send(Vec::new()).unwrap();
        assert!(matches!(job.wait(), JobOutcome::Failed(_)));
        assert_eq!(controller.status(), TrainingStatus::unavailable());
    }

    #[test]
    fn failure_restores_previous_readiness() {
        let dir = tempdir().unwrap();
        let images = fixtures(dir.path(), 4);
        let (backend, gate) = GatedBackend::new(Behaviour::Succeed);
        let first = controller(dir.path(), backend);
        gate.send(Vec::new()).unwrap();
        first.start_job(images.clone()).unwrap().wait();
        let committed = std::fs::read(first.layout().weights_path()).unwrap();

        let (backend, gate) = GatedBackend::new(Behaviour::Fail);
        let second = controller(dir.path(), backend);
        let before = second.status();
        assert!(before.is_ready);
        gate.send(vec![0.3]).unwrap();
        let outcome = second.start_job(images).unwrap().wait();
        assert!(matches!(outcome, JobOutcome::Failed(_)));
        assert_eq!(second.status(), before);
        assert_eq!(second.status().progress, 1.0);
        assert_eq!(second.phase(), TrainingPhase::Failed);
        assert!(second.last_error().is_some());
        assert_eq!(std::fs::read(second.layout().weights_path()).unwrap(), committed);
    }

    #[test]
    fn weights_alone_do_not_make_the_model_ready() {
        let dir = tempdir().unwrap();
        let (backend, _gate) = GatedBackend::new(Behaviour::Succeed);
        let layout = ModelLayout::new(&dir.path().join("workspace"), ModelKind::Detector);
        std::fs::create_dir_all(layout.root()).unwrap();
        std::fs::write(layout.weights_path(), "w".repeat(200)).unwrap();
        let controller = controller(dir.path(), backend);
        assert_eq!(controller.status(), TrainingStatus::unavailable());
        assert_eq!(controller.phase(), TrainingPhase::Idle);

        std::fs::write(layout.manifest_path(), "{}").unwrap();
        std::fs::write(layout.registry().path(), "{}").unwrap();
        let (backend, _gate) = GatedBackend::new(Behaviour::Succeed);
        let reopened = self::controller(dir.path(), backend);
        assert!(reopened.status().is_ready);
    }

    #[test]
    fn failed_retrain_keeps_the_committed_class_map() {
        let dir = tempdir().unwrap();
        let images = fixtures(dir.path(), 4);
        let (backend, gate) = GatedBackend::new(Behaviour::Succeed);
        let first = controller(dir.path(), backend);
        gate.send(Vec::new()).unwrap();
        first.start_job(images.clone()).unwrap().wait();
        let committed = first.layout().registry().load().unwrap();
        assert_eq!(committed.names_by_id(), vec!["cat"]);

        let mut relabeled = images;
        relabeled[0].annotations[0].label = "dog".into();
        let (backend, gate) = GatedBackend::new(Behaviour::Fail);
        let second = controller(dir.path(), backend);
        gate.send(Vec::new()).unwrap();
        let outcome = second.start_job(relabeled).unwrap().wait();
        assert!(matches!(outcome, JobOutcome::Failed(_)));
        assert_eq!(second.layout().registry().load().unwrap(), committed);
        assert!(second.status().is_ready);

        let manifest = DatasetManifest::load(&second.layout().manifest_path()).unwrap();
        assert_eq!(manifest.names, vec!["cat"]);
    }

    #[test]
    fn panicking_fit_is_reported_as_failure() {
        let dir = tempdir().unwrap();
        let images = fixtures(dir.path(), 2);
        let (backend, gate) = GatedBackend::new(Behaviour::Panic);
        let controller = controller(dir.path(), backend);
        gate.send(Vec::new()).unwrap();
        let outcome = controller.start_job(images).unwrap().wait();
        let JobOutcome::Failed(message) = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert!(message.contains("fit exploded"));
        assert!(!controller.status().training_in_progress);
        assert!(controller.start_job(Vec::new()).is_some());
    }

    #[test]
    fn dataset_errors_fail_the_job() {
        let dir = tempdir().unwrap();
        let (backend, _gate) = GatedBackend::new(Behaviour::Succeed);
        let controller = controller(dir.path(), backend);
        let outcome = controller.start_job(Vec::new()).unwrap().wait();
        assert!(matches!(outcome, JobOutcome::Failed(_)));
        assert!(!controller.status().is_available);
    }

    #[test]
    fn reset_makes_running_job_stale() {
        let dir = tempdir().unwrap();
        let images = fixtures(dir.path(), 3);
        let (backend, gate) = GatedBackend::new(Behaviour::Succeed);
        let controller = controller(dir.path(), backend);
        let job = controller.start_job(images.clone()).unwrap();
        let job = job.wait_timeout(Duration::from_millis(50)).unwrap_err();
        controller.reset().unwrap();
        assert_eq!(controller.status(), TrainingStatus::unavailable());
        assert!(!controller.start(images.clone()));
        gate.send(vec![0.9]).unwrap();
        assert_eq!(job.wait(), JobOutcome::Stale);
        assert_eq!(controller.status(), TrainingStatus::unavailable());
        assert!(!controller.layout().weights_path().exists());
        assert!(controller.layout().latest_job_output().is_none());

        let next = controller.start_job(images).expect("stale worker has exited");
        gate.send(Vec::new()).unwrap();
        assert!(matches!(next.wait(), JobOutcome::Ready { .. }));
    }

    #[test]
    fn reset_keeps_the_class_map() {
        let dir = tempdir().unwrap();
        let images = fixtures(dir.path(), 2);
        let (backend, gate) = GatedBackend::new(Behaviour::Succeed);
        let controller = controller(dir.path(), backend);
        gate.send(Vec::new()).unwrap();
        controller.start_job(images).unwrap().wait();
        controller.reset().unwrap();
        assert!(controller.layout().registry().path().is_file());
        assert!(!controller.layout().manifest_path().exists());
        assert!(!controller.layout().jobs_dir().exists());
        assert!(matches!(controller.cache().load(), Err(CacheError::NotReady)));
    }
}

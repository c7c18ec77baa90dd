mod support;

use std::path::Path;
use std::sync::Arc;

use annolab::augment::{AugmentError, AugmentRequest, Augmenter};
use annolab::config::OrchestratorConfig;
use annolab::dataset::{DatasetBuilder, DatasetOptions, Split};
use annolab::registry::ClassRegistry;
use annolab::training::{JobOutcome, TrainingPhase, TrainingStatus};
use annolab::{ModelKind, Orchestrator};
use support::images::{square_image, write_fixture_set};
use tempfile::tempdir;

struct NoAugment;

impl Augmenter for NoAugment {
    fn augment(&self, _request: &AugmentRequest<'_>) -> Result<usize, AugmentError> {
        Ok(0)
    }
}

fn test_config(root: &Path) -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.paths.uploads_dir = Some(root.join("uploads"));
    config.paths.workspace_dir = Some(root.join("workspace"));
    config.training.detector.epochs = 5;
    config.training.few_shot.epochs = 5;
    config
}

fn train(orchestrator: &Orchestrator, kind: ModelKind, images: Vec<annolab::annotations::LabeledImage>) {
    let job = orchestrator
        .start_training_job(kind, images)
        .expect("no job running yet");
    match job.wait() {
        JobOutcome::Ready { artifact } => assert!(artifact.is_file()),
        other => panic!("{kind} training did not finish: {other:?}"),
    }
}

#[test]
fn end_to_end_training_and_prediction() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let images = write_fixture_set(&dir.path().join("uploads"), 10);
    let orchestrator = Orchestrator::from_config(&config).unwrap();

    for kind in ModelKind::ALL {
        train(&orchestrator, kind, images.clone());
        let status = orchestrator.status(kind);
        assert_eq!(
            status,
            TrainingStatus {
                training_in_progress: false,
                progress: 1.0,
                is_available: true,
                is_ready: true,
            }
        );
        assert_eq!(orchestrator.phase(kind), TrainingPhase::Ready);
    }

    // Never part of any training set.
    let held_out = "held_out.png".to_string();
    square_image([220, 20, 20], 30, 6, 20)
        .save(dir.path().join("uploads").join(&held_out))
        .unwrap();
    let mut filenames: Vec<String> = images.iter().map(|image| image.filename.clone()).collect();
    filenames.push(held_out.clone());
    for kind in ModelKind::ALL {
        let results = orchestrator.predict(kind, &filenames);
        assert_eq!(results.len(), filenames.len());
        assert!(results.contains_key(&held_out));
        for prediction in results.values().flatten() {
            assert!(prediction.x >= 0.0 && prediction.y >= 0.0);
            assert!(prediction.x + prediction.width <= 0.999 + 1e-5);
            assert!(prediction.y + prediction.height <= 0.999 + 1e-5);
            assert!((0.0..=1.0).contains(&prediction.confidence));
            assert!(prediction.label == "red" || prediction.label == "blue");
            assert!(!prediction.is_verified);
        }
    }

    let report = orchestrator.compute_uncertainty(&filenames[0]);
    assert!((0.0..=1.0).contains(&report.score));
    let report = orchestrator.compute_uncertainty(&held_out);
    assert!((0.0..=1.0).contains(&report.score));
    assert_eq!(report.detector, orchestrator.predict_one(ModelKind::Detector, &held_out));

    let consistency = orchestrator.check_consistency(ModelKind::Detector).unwrap();
    assert!(consistency.is_consistent(), "{:?}", consistency.issues);
    assert_eq!(consistency.class_count, 2);
    assert_eq!(consistency.train.images, consistency.train.labels);
}

#[test]
fn second_start_while_running_is_rejected() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let images = write_fixture_set(&dir.path().join("uploads"), 6);
    let orchestrator = Orchestrator::from_config(&config).unwrap();

    let first = orchestrator.start_training_job(ModelKind::FewShot, images.clone());
    let second = orchestrator.start_training(ModelKind::FewShot, images.clone());
    assert!(first.is_some());
    assert!(!second);
    assert!(matches!(first.unwrap().wait(), JobOutcome::Ready { .. }));
    let again = orchestrator
        .start_training_job(ModelKind::FewShot, images)
        .expect("previous job finished");
    assert!(matches!(again.wait(), JobOutcome::Ready { .. }));
}

#[test]
fn reset_makes_the_model_unavailable() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let images = write_fixture_set(&dir.path().join("uploads"), 6);
    let orchestrator = Orchestrator::from_config(&config).unwrap();
    train(&orchestrator, ModelKind::Detector, images.clone());

    orchestrator.reset(ModelKind::Detector).unwrap();
    assert_eq!(
        orchestrator.status(ModelKind::Detector),
        TrainingStatus::unavailable()
    );
    let results = orchestrator.predict(ModelKind::Detector, &[images[0].filename.clone()]);
    assert!(results[&images[0].filename].is_empty());

    let reopened = Orchestrator::from_config(&config).unwrap();
    assert!(!reopened.status(ModelKind::Detector).is_available);
}

#[test]
fn committed_model_is_available_after_restart() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let images = write_fixture_set(&dir.path().join("uploads"), 6);
    let orchestrator = Orchestrator::from_config(&config).unwrap();
    train(&orchestrator, ModelKind::FewShot, images);
    drop(orchestrator);

    let reopened = Orchestrator::from_config(&config).unwrap();
    let status = reopened.status(ModelKind::FewShot);
    assert!(status.is_available && status.is_ready);
    assert!(!status.training_in_progress);
}

#[test]
fn class_ids_survive_new_labels() {
    let dir = tempdir().unwrap();
    let uploads = dir.path().join("uploads");
    let images = write_fixture_set(&uploads, 6);
    let registry_dir = dir.path().join("registry");
    let red_only: Vec<_> = images
        .iter()
        .filter(|image| image.annotations[0].label == "red")
        .cloned()
        .collect();

    let build = |images: &[annolab::annotations::LabeledImage], out: &str| {
        DatasetBuilder::new(
            uploads.clone(),
            dir.path().join(out),
            ClassRegistry::in_dir(&registry_dir),
            Arc::new(NoAugment),
            DatasetOptions::default(),
        )
        .prepare(images)
        .unwrap()
    };
    let first = build(&red_only, "first");
    assert_eq!(first.class_map.get("red"), Some(0));
    let second = build(&images, "second");
    assert_eq!(second.class_map.get("red"), Some(0));
    assert_eq!(second.class_map.get("blue"), Some(1));
    assert_eq!(second.manifest.names, vec!["red", "blue"]);
}

#[test]
fn split_is_deterministic_for_the_same_inputs() {
    let dir = tempdir().unwrap();
    let uploads = dir.path().join("uploads");
    let images = write_fixture_set(&uploads, 10);
    let names_in = |out: &str, images: &[annolab::annotations::LabeledImage]| {
        let prepared = DatasetBuilder::new(
            uploads.clone(),
            dir.path().join(out),
            ClassRegistry::in_dir(&dir.path().join(out).with_extension("reg")),
            Arc::new(NoAugment),
            DatasetOptions::default(),
        )
        .prepare(images)
        .unwrap();
        assert_eq!((prepared.train_count, prepared.val_count), (8, 2));
        prepared
            .manifest
            .list_images(Split::Train)
            .unwrap()
            .into_iter()
            .map(|path| path.file_name().unwrap().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
    };
    let mut reversed = images.clone();
    reversed.reverse();
    assert_eq!(names_in("a", &images), names_in("b", &reversed));
}

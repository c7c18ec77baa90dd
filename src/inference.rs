//! Batch prediction over uploaded images.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::backend::ModelBackend;
use crate::cache::ModelCache;
use crate::prediction::Prediction;

pub struct BatchInference<B: ModelBackend> {
    cache: ModelCache<B>,
    uploads_dir: PathBuf,
}

impl<B: ModelBackend> BatchInference<B> {
    pub fn new(cache: ModelCache<B>, uploads_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache,
            uploads_dir: uploads_dir.into(),
        }
    }

    /// Predictions for every requested filename; failures yield an empty list for that file.
    pub fn predict(&self, filenames: &[String]) -> BTreeMap<String, Vec<Prediction>> {
        let mut results: BTreeMap<String, Vec<Prediction>> = filenames
            .iter()
            .map(|filename| (filename.clone(), Vec::new()))
            .collect();
        if filenames.is_empty() {
            return results;
        }
        let kind = self.cache.backend().kind();
        let model = match self.cache.load() {
            Ok(model) => model,
            Err(err) => {
                tracing::info!("{kind} model unavailable for prediction: {err}");
                return results;
            }
        };
        for (filename, predictions) in results.iter_mut() {
            let Some(path) = self.resolve(filename) else {
                tracing::warn!("Rejecting filename {filename:?}");
                continue;
            };
            if !path.is_file() {
                tracing::warn!("Image file not found: {}", path.display());
                continue;
            }
            let image = match image::open(&path) {
                Ok(image) => image.to_rgb8(),
                Err(err) => {
                    tracing::warn!("Failed to decode {}: {err}", path.display());
                    continue;
                }
            };
            let (width, height) = image.dimensions();
            *predictions = self
                .cache
                .backend()
                .predict(&model.weights, &image)
                .iter()
                .map(|raw| Prediction::new(raw, &model.class_map, width, height))
                .collect();
            tracing::debug!(
                "{kind} produced {} predictions for {filename}",
                predictions.len()
            );
        }
        tracing::info!("{kind} batch prediction completed for {} images", filenames.len());
        results
    }

    /// Single-image form of [`predict`](Self::predict).
    pub fn predict_one(&self, filename: &str) -> Vec<Prediction> {
        self.predict(&[filename.to_string()])
            .remove(filename)
            .unwrap_or_default()
    }

    fn resolve(&self, filename: &str) -> Option<PathBuf> {
        let name = Path::new(filename).file_name()?;
        Some(self.uploads_dir.join(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{FitError, FitRequest, ModelKind, WEIGHTS_FILE_NAME};
    use crate::cache::CacheError;
    use crate::prediction::RawDetection;
    use crate::registry::ClassRegistry;
    use crate::training::ModelLayout;
    use crate::training::status::SlotState;
    use image::{Rgb, RgbImage};
    use std::collections::BTreeSet;
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;

    struct StubBackend;

    impl ModelBackend for StubBackend {
        type Model = ();

        fn kind(&self) -> ModelKind {
            ModelKind::Detector
        }

        fn fit(&self, request: &FitRequest, _progress: &dyn Fn(f32)) -> Result<PathBuf, FitError> {
            Ok(request.output_path())
        }

        fn load(&self, _path: &Path) -> Result<(), CacheError> {
            Ok(())
        }

        fn predict(&self, _model: &(), image: &RgbImage) -> Vec<RawDetection> {
            let (w, h) = image.dimensions();
            vec![
                RawDetection {
                    x1: -5.0,
                    y1: 2.0,
                    x2: w as f32 + 10.0,
                    y2: h as f32,
                    class_id: 0,
                    confidence: 0.8,
                },
                RawDetection {
                    x1: 1.0,
                    y1: 1.0,
                    x2: 2.0,
                    y2: 2.0,
                    class_id: 7,
                    confidence: 1.5,
                },
            ]
        }
    }

    fn engine(root: &Path, ready: bool) -> BatchInference<StubBackend> {
        let layout = ModelLayout::new(&root.join("ws"), ModelKind::Detector);
        std::fs::create_dir_all(layout.root()).unwrap();
        std::fs::write(layout.root().join(WEIGHTS_FILE_NAME), "w".repeat(100)).unwrap();
        let labels: BTreeSet<String> = ["cat".to_string()].into_iter().collect();
        ClassRegistry::in_dir(layout.root()).update(&labels).unwrap();
        let cache = ModelCache::new(
            Arc::new(StubBackend),
            layout,
            Arc::new(Mutex::new(SlotState::probed(ready))),
            64,
        );
        let uploads = root.join("uploads");
        std::fs::create_dir_all(&uploads).unwrap();
        RgbImage::from_pixel(40, 20, Rgb([0, 0, 0]))
            .save(uploads.join("a.png"))
            .unwrap();
        std::fs::write(uploads.join("broken.png"), b"not an image").unwrap();
        BatchInference::new(cache, uploads)
    }

    #[test]
    fn every_filename_gets_an_entry() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path(), true);
        let names = vec![
            "a.png".to_string(),
            "missing.png".to_string(),
            "broken.png".to_string(),
        ];
        let results = engine.predict(&names);
        assert_eq!(results.len(), 3);
        assert!(results["missing.png"].is_empty());
        assert!(results["broken.png"].is_empty());
        let preds = &results["a.png"];
        assert_eq!(preds.len(), 2);
        assert_eq!(preds[0].label, "cat");
        assert_eq!(preds[1].label, "unknown_7");
        assert_eq!(preds[1].confidence, 1.0);
        for p in preds {
            assert!(p.x >= 0.0 && p.x + p.width <= 0.999 + 1e-6);
            assert!(p.y >= 0.0 && p.y + p.height <= 0.999 + 1e-6);
        }
    }

    #[test]
    fn unavailable_model_yields_empty_lists() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path(), false);
        let results = engine.predict(&["a.png".to_string()]);
        assert_eq!(results.len(), 1);
        assert!(results["a.png"].is_empty());
        assert!(engine.predict_one("a.png").is_empty());
    }

    #[test]
    fn single_image_form_matches_batch() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path(), true);
        assert_eq!(engine.predict_one("a.png").len(), 2);
        assert!(engine.predict_one("../a.png").len() == 2);
    }
}

//! Independent per-class sigmoid head trained with binary cross-entropy.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::ml::logreg::LogRegError;
use crate::ml::sigmoid;

#[derive(Debug, Clone)]
pub struct MultiLabelOptions {
    pub max_epochs: usize,
    pub learning_rate: f32,
    pub l2: f32,
    pub batch_size: usize,
    /// Epochs without loss improvement before training stops.
    pub patience: usize,
    pub seed: u64,
}

impl Default for MultiLabelOptions {
    fn default() -> Self {
        Self {
            max_epochs: 20,
            learning_rate: 0.5,
            l2: 1e-4,
            batch_size: 32,
            patience: 5,
            seed: 42,
        }
    }
}

/// Feature rows with a 0/1 target per class.
#[derive(Debug, Clone, Default)]
pub struct MultiLabelDataset {
    pub classes: usize,
    pub x: Vec<Vec<f32>>,
    pub targets: Vec<Vec<f32>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MultiLabelModel {
    pub dim: usize,
    pub classes: usize,
    pub weights: Vec<f32>,
    pub bias: Vec<f32>,
}

/// Result of a training run together with its loss history.
#[derive(Debug, Clone)]
pub struct MultiLabelFit {
    /// Parameters of the epoch with the lowest loss.
    pub model: MultiLabelModel,
    pub best_loss: f32,
    pub epochs_run: usize,
    pub stopped_early: bool,
}

impl MultiLabelModel {
    pub fn validate(&self) -> Result<(), LogRegError> {
        if self.classes == 0 {
            return Err(LogRegError::NoClasses);
        }
        if self.weights.len() != self.classes * self.dim || self.bias.len() != self.classes {
            return Err(LogRegError::Invalid("parameter shape mismatch"));
        }
        Ok(())
    }

    /// Per-class probabilities; empty when the dimension does not match.
    pub fn predict_proba(&self, x: &[f32]) -> Vec<f32> {
        if x.len() != self.dim {
            return Vec::new();
        }
        (0..self.classes)
            .map(|c| {
                let row = &self.weights[c * self.dim..(c + 1) * self.dim];
                sigmoid(self.bias[c] + row.iter().zip(x).map(|(w, v)| w * v).sum::<f32>())
            })
            .collect()
    }

    fn mean_loss(&self, dataset: &MultiLabelDataset) -> f32 {
        let mut total = 0.0f32;
        let mut n = 0usize;
        for (x, target) in dataset.x.iter().zip(&dataset.targets) {
            for (p, t) in self.predict_proba(x).iter().zip(target) {
                let p = p.clamp(1e-6, 1.0 - 1e-6);
                total -= t * p.ln() + (1.0 - t) * (1.0 - p).ln();
                n += 1;
            }
        }
        if n == 0 { 0.0 } else { total / n as f32 }
    }
}

/// Initialise each class row with the difference between positive and negative feature means.
fn prototype_init(dataset: &MultiLabelDataset, dim: usize) -> MultiLabelModel {
    let classes = dataset.classes;
    let mut model = MultiLabelModel {
        dim,
        classes,
        weights: vec![0.0; classes * dim],
        bias: vec![0.0; classes],
    };
    for c in 0..classes {
        let mut pos = vec![0.0f32; dim];
        let mut neg = vec![0.0f32; dim];
        let (mut n_pos, mut n_neg) = (0f32, 0f32);
        for (x, target) in dataset.x.iter().zip(&dataset.targets) {
            let (acc, count) = if target[c] > 0.5 {
                (&mut pos, &mut n_pos)
            } else {
                (&mut neg, &mut n_neg)
            };
            for (slot, value) in acc.iter_mut().zip(x) {
                *slot += value;
            }
            *count += 1.0;
        }
        if n_pos == 0.0 || n_neg == 0.0 {
            continue;
        }
        let row = &mut model.weights[c * dim..(c + 1) * dim];
        for i in 0..dim {
            row[i] = pos[i] / n_pos - neg[i] / n_neg;
        }
    }
    model
}

/// Gradient descent with best-loss checkpointing and early stopping.
///
/// `on_epoch(done, max_epochs)` is called after every epoch that runs.
pub fn train_multilabel(
    dataset: &MultiLabelDataset,
    options: &MultiLabelOptions,
    on_epoch: &dyn Fn(usize, usize),
) -> Result<MultiLabelFit, LogRegError> {
    if dataset.x.is_empty() {
        return Err(LogRegError::EmptyTrainingSet);
    }
    if dataset.x.len() != dataset.targets.len() {
        return Err(LogRegError::MismatchedInputs);
    }
    if dataset.classes == 0 {
        return Err(LogRegError::NoClasses);
    }
    let dim = dataset.x[0].len();
    for (row, target) in dataset.x.iter().zip(&dataset.targets) {
        if row.len() != dim {
            return Err(LogRegError::RowLength {
                expected: dim,
                got: row.len(),
            });
        }
        if target.len() != dataset.classes {
            return Err(LogRegError::MismatchedInputs);
        }
    }

    let classes = dataset.classes;
    let mut rng = StdRng::seed_from_u64(options.seed);
    let mut model = prototype_init(dataset, dim);
    let mut best = model.clone();
    let mut best_loss = model.mean_loss(dataset);
    let mut stale = 0usize;
    let mut epochs_run = 0usize;
    let mut stopped_early = false;
    let max_epochs = options.max_epochs.max(1);
    let batch_size = options.batch_size.max(1);
    let lr = options.learning_rate;
    let l2 = options.l2.max(0.0);
    let mut indices: Vec<usize> = (0..dataset.x.len()).collect();

    for epoch in 0..max_epochs {
        indices.shuffle(&mut rng);
        for chunk in indices.chunks(batch_size) {
            let mut grad_w = vec![0.0f32; model.weights.len()];
            let mut grad_b = vec![0.0f32; classes];
            for &idx in chunk {
                let x = &dataset.x[idx];
                let probs = model.predict_proba(x);
                for c in 0..classes {
                    let diff = probs[c] - dataset.targets[idx][c];
                    let base = c * dim;
                    for i in 0..dim {
                        grad_w[base + i] += diff * x[i];
                    }
                    grad_b[c] += diff;
                }
            }
            let inv = 1.0 / chunk.len() as f32;
            for (idx, w) in model.weights.iter_mut().enumerate() {
                *w -= lr * (grad_w[idx] * inv + l2 * *w);
            }
            for (c, b) in model.bias.iter_mut().enumerate() {
                *b -= lr * grad_b[c] * inv;
            }
        }
        epochs_run = epoch + 1;
        on_epoch(epochs_run, max_epochs);

        let loss = model.mean_loss(dataset);
        tracing::debug!("Multi-label epoch {epochs_run}/{max_epochs}, loss {loss:.4}");
        if loss < best_loss {
            best_loss = loss;
            best = model.clone();
            stale = 0;
        } else {
            stale += 1;
            if stale >= options.patience.max(1) {
                stopped_early = true;
                break;
            }
        }
    }

    best.validate()?;
    Ok(MultiLabelFit {
        model: best,
        best_loss,
        epochs_run,
        stopped_early,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_class() -> MultiLabelDataset {
        let mut dataset = MultiLabelDataset {
            classes: 2,
            ..MultiLabelDataset::default()
        };
        for i in 0..10 {
            let jitter = i as f32 * 0.01;
            dataset.x.push(vec![0.9 - jitter, 0.1]);
            dataset.targets.push(vec![1.0, 0.0]);
            dataset.x.push(vec![0.1, 0.9 - jitter]);
            dataset.targets.push(vec![0.0, 1.0]);
        }
        dataset
    }

    #[test]
    fn learns_independent_labels() {
        let options = MultiLabelOptions {
            max_epochs: 80,
            patience: 80,
            ..MultiLabelOptions::default()
        };
        let fit = train_multilabel(&two_class(), &options, &|_, _| {}).unwrap();
        let probs = fit.model.predict_proba(&[0.9, 0.1]);
        assert!(probs[0] > 0.5);
        assert!(probs[1] < 0.5);
    }

    #[test]
    fn stops_once_loss_plateaus() {
        let options = MultiLabelOptions {
            max_epochs: 50,
            learning_rate: 0.0,
            patience: 3,
            ..MultiLabelOptions::default()
        };
        let fit = train_multilabel(&two_class(), &options, &|_, _| {}).unwrap();
        assert!(fit.stopped_early);
        assert_eq!(fit.epochs_run, 3);
    }

    #[test]
    fn target_width_must_match_classes() {
        let mut dataset = two_class();
        dataset.targets[0].push(1.0);
        assert!(train_multilabel(&dataset, &MultiLabelOptions::default(), &|_, _| {}).is_err());
    }
}

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng, seq::SliceRandom};

use super::{LogRegError, LogRegModel};
use crate::ml::softmax;

/// Training options for the softmax head.
#[derive(Debug, Clone)]
pub struct TrainOptions {
    pub epochs: usize,
    pub learning_rate: f32,
    pub l2: f32,
    pub batch_size: usize,
    pub seed: u64,
    pub balance_classes: bool,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            epochs: 20,
            learning_rate: 0.5,
            l2: 1e-4,
            batch_size: 32,
            seed: 42,
            balance_classes: true,
        }
    }
}

/// In-memory training dataset: one feature row and one class index per sample.
#[derive(Debug, Clone, Default)]
pub struct TrainDataset {
    pub classes: usize,
    pub x: Vec<Vec<f32>>,
    pub y: Vec<usize>,
}

/// Mini-batch gradient descent on cross-entropy.
///
/// `init` warm-starts from existing parameters when its shape matches.
/// `on_epoch(done, total)` is called after every epoch.
pub fn train_logreg(
    dataset: &TrainDataset,
    options: &TrainOptions,
    init: Option<&LogRegModel>,
    on_epoch: &dyn Fn(usize, usize),
) -> Result<LogRegModel, LogRegError> {
    if dataset.x.is_empty() || dataset.y.is_empty() {
        return Err(LogRegError::EmptyTrainingSet);
    }
    if dataset.x.len() != dataset.y.len() {
        return Err(LogRegError::MismatchedInputs);
    }
    let classes = dataset.classes;
    if classes == 0 {
        return Err(LogRegError::NoClasses);
    }
    let dim = dataset.x[0].len();
    for row in &dataset.x {
        if row.len() != dim {
            return Err(LogRegError::RowLength {
                expected: dim,
                got: row.len(),
            });
        }
    }

    let mut rng = StdRng::seed_from_u64(options.seed);
    let mut model = match init {
        Some(init) if init.classes == classes && init.dim == dim && init.validate().is_ok() => {
            init.clone()
        }
        _ => {
            let mut model = LogRegModel::zeros(classes, dim);
            for w in &mut model.weights {
                *w = (rng.random::<f32>() - 0.5) * 0.01;
            }
            model
        }
    };

    let mut indices: Vec<usize> = (0..dataset.x.len()).collect();
    let batch_size = options.batch_size.max(1);
    let lr = options.learning_rate;
    let l2 = options.l2.max(0.0);
    let class_weights = class_weights(dataset, options.balance_classes);
    let epochs = options.epochs.max(1);

    for epoch in 0..epochs {
        indices.shuffle(&mut rng);
        for chunk in indices.chunks(batch_size) {
            let mut grad_w = vec![0.0f32; model.weights.len()];
            let mut grad_b = vec![0.0f32; model.bias.len()];
            let mut batch_weight = 0.0f32;
            for &idx in chunk {
                let x = &dataset.x[idx];
                let y = dataset.y[idx];
                if y >= classes {
                    continue;
                }
                let weight = class_weights[y];
                if weight == 0.0 {
                    continue;
                }
                let probs = softmax(&model.logits(x));
                for c in 0..classes {
                    let diff = probs[c] - if c == y { 1.0 } else { 0.0 };
                    let base = c * dim;
                    for i in 0..dim {
                        grad_w[base + i] += diff * x[i] * weight;
                    }
                    grad_b[c] += diff * weight;
                }
                batch_weight += weight;
            }
            if batch_weight == 0.0 {
                continue;
            }
            let inv = 1.0 / batch_weight;
            for (idx, w) in model.weights.iter_mut().enumerate() {
                *w -= lr * (grad_w[idx] * inv + l2 * *w);
            }
            for (c, b) in model.bias.iter_mut().enumerate() {
                *b -= lr * grad_b[c] * inv;
            }
        }
        on_epoch(epoch + 1, epochs);
    }

    model.validate()?;
    Ok(model)
}

fn class_weights(dataset: &TrainDataset, balance: bool) -> Vec<f32> {
    let classes = dataset.classes;
    if !balance {
        return vec![1.0; classes];
    }
    let mut counts = vec![0f32; classes];
    for &y in &dataset.y {
        if y < classes {
            counts[y] += 1.0;
        }
    }
    let present = counts.iter().filter(|count| **count > 0.0).count().max(1) as f32;
    let total: f32 = counts.iter().sum();
    counts
        .into_iter()
        .map(|count| {
            if count == 0.0 {
                0.0
            } else {
                total / (present * count)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn separable() -> TrainDataset {
        let mut dataset = TrainDataset {
            classes: 2,
            ..TrainDataset::default()
        };
        for i in 0..20 {
            let jitter = i as f32 * 0.005;
            dataset.x.push(vec![0.9 - jitter, 0.1 + jitter]);
            dataset.y.push(0);
            dataset.x.push(vec![0.1 + jitter, 0.9 - jitter]);
            dataset.y.push(1);
        }
        dataset
    }

    #[test]
    fn learns_a_separable_problem() {
        let options = TrainOptions {
            epochs: 60,
            ..TrainOptions::default()
        };
        let model = train_logreg(&separable(), &options, None, &|_, _| {}).unwrap();
        assert_eq!(model.predict_class_index(&[0.95, 0.05]), 0);
        assert_eq!(model.predict_class_index(&[0.05, 0.95]), 1);
    }

    #[test]
    fn reports_every_epoch() {
        let seen = RefCell::new(Vec::new());
        let options = TrainOptions {
            epochs: 3,
            ..TrainOptions::default()
        };
        train_logreg(&separable(), &options, None, &|done, total| {
            seen.borrow_mut().push((done, total))
        })
        .unwrap();
        assert_eq!(seen.into_inner(), vec![(1, 3), (2, 3), (3, 3)]);
    }

    #[test]
    fn warm_start_requires_matching_shape() {
        let options = TrainOptions {
            epochs: 1,
            learning_rate: 0.0,
            ..TrainOptions::default()
        };
        let mut init = LogRegModel::zeros(2, 2);
        init.bias = vec![3.0, -3.0];
        let warm = train_logreg(&separable(), &options, Some(&init), &|_, _| {}).unwrap();
        assert_eq!(warm.bias, vec![3.0, -3.0]);
        let wrong = LogRegModel::zeros(3, 2);
        let cold = train_logreg(&separable(), &options, Some(&wrong), &|_, _| {}).unwrap();
        assert_eq!(cold.classes, 2);
        assert_eq!(cold.bias, vec![0.0, 0.0]);
    }

    #[test]
    fn empty_dataset_is_rejected() {
        let dataset = TrainDataset {
            classes: 2,
            ..TrainDataset::default()
        };
        assert_eq!(
            train_logreg(&dataset, &TrainOptions::default(), None, &|_, _| {}),
            Err(LogRegError::EmptyTrainingSet)
        );
    }
}

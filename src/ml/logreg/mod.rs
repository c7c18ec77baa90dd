//! Softmax (multinomial logistic regression) classifier over feature vectors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ml::{argmax, softmax};

mod train;
pub use train::{TrainDataset, TrainOptions, train_logreg};

#[derive(Debug, Error, PartialEq)]
pub enum LogRegError {
    #[error("Empty training set")]
    EmptyTrainingSet,
    #[error("Mismatched training inputs/labels")]
    MismatchedInputs,
    #[error("No classes available for training")]
    NoClasses,
    #[error("Inconsistent feature row length (expected {expected}, got {got})")]
    RowLength { expected: usize, got: usize },
    #[error("{0}")]
    Invalid(&'static str),
}

/// Row-major `classes x dim` weights plus one bias per class.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogRegModel {
    pub dim: usize,
    pub classes: usize,
    pub weights: Vec<f32>,
    pub bias: Vec<f32>,
}

impl LogRegModel {
    pub fn zeros(classes: usize, dim: usize) -> Self {
        Self {
            dim,
            classes,
            weights: vec![0.0; classes * dim],
            bias: vec![0.0; classes],
        }
    }

    pub fn validate(&self) -> Result<(), LogRegError> {
        if self.classes == 0 {
            return Err(LogRegError::NoClasses);
        }
        if self.weights.len() != self.classes * self.dim {
            return Err(LogRegError::Invalid("weights length mismatch"));
        }
        if self.bias.len() != self.classes {
            return Err(LogRegError::Invalid("bias length mismatch"));
        }
        if self
            .weights
            .iter()
            .chain(self.bias.iter())
            .any(|value| !value.is_finite())
        {
            return Err(LogRegError::Invalid("non-finite parameter"));
        }
        Ok(())
    }

    pub fn logits(&self, x: &[f32]) -> Vec<f32> {
        if x.len() != self.dim {
            return Vec::new();
        }
        (0..self.classes)
            .map(|c| {
                let row = &self.weights[c * self.dim..(c + 1) * self.dim];
                self.bias[c] + row.iter().zip(x).map(|(w, v)| w * v).sum::<f32>()
            })
            .collect()
    }

    /// Class probabilities for `x`; empty when the dimension does not match.
    pub fn predict_proba(&self, x: &[f32]) -> Vec<f32> {
        softmax(&self.logits(x))
    }

    pub fn predict_class_index(&self, x: &[f32]) -> usize {
        argmax(&self.predict_proba(x))
    }
}

//! Binary logistic regression

use ca_common::{Error, Result};
use serde::{Deserialize, Serialize};

/// Gradient descent settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LogisticParams {
    pub learning_rate: f64,
    pub epochs: usize,
    pub l2: f64,
}

impl Default for LogisticParams {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            epochs: 500,
            l2: 1e-3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    pub weights: Vec<f64>,
    pub bias: f64,
    /// Set when training saw a single class; predictions return this prior
    pub constant: Option<f64>,
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

impl LogisticModel {
    /// Full-batch gradient descent with balanced class weights
    pub fn fit(rows: &[Vec<f64>], labels: &[bool], params: LogisticParams) -> Result<Self> {
        if rows.is_empty() {
            return Err(Error::InsufficientData(
                "Cannot train a classifier without samples".to_string(),
            ));
        }
        if rows.len() != labels.len() {
            return Err(Error::InvalidInput(format!(
                "{} rows but {} labels",
                rows.len(),
                labels.len()
            )));
        }

        let width = rows[0].len();
        let n = rows.len() as f64;
        let positives = labels.iter().filter(|&&y| y).count();
        let negatives = labels.len() - positives;

        if positives == 0 || negatives == 0 {
            // Laplace-smoothed prior of the only class present
            let prior = (positives as f64 + 1.0) / (n + 2.0);
            return Ok(Self {
                weights: vec![0.0; width],
                bias: 0.0,
                constant: Some(prior),
            });
        }

        let weight_pos = n / (2.0 * positives as f64);
        let weight_neg = n / (2.0 * negatives as f64);
        let total_weight = weight_pos * positives as f64 + weight_neg * negatives as f64;

        let mut weights = vec![0.0; width];
        let mut bias = 0.0;

        for _ in 0..params.epochs {
            let mut grad_w = vec![0.0; width];
            let mut grad_b = 0.0;

            for (row, &label) in rows.iter().zip(labels) {
                let z = bias + row.iter().zip(&weights).map(|(x, w)| x * w).sum::<f64>();
                let target = if label { 1.0 } else { 0.0 };
                let sample_weight = if label { weight_pos } else { weight_neg };
                let error = (sigmoid(z) - target) * sample_weight;

                for (g, x) in grad_w.iter_mut().zip(row) {
                    *g += error * x;
                }
                grad_b += error;
            }

            for (w, g) in weights.iter_mut().zip(&grad_w) {
                *w -= params.learning_rate * (g / total_weight + params.l2 * *w);
            }
            bias -= params.learning_rate * grad_b / total_weight;
        }

        Ok(Self {
            weights,
            bias,
            constant: None,
        })
    }

    pub fn predict_proba(&self, row: &[f64]) -> f64 {
        if let Some(p) = self.constant {
            return p;
        }
        let z = self.bias
            + row
                .iter()
                .zip(&self.weights)
                .map(|(x, w)| x * w)
                .sum::<f64>();
        sigmoid(z)
    }

    pub fn predict_all(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        rows.iter().map(|r| self.predict_proba(r)).collect()
    }

    /// Absolute weights normalised to sum to 1 (all zero for a constant model)
    pub fn feature_importance(&self) -> Vec<f64> {
        let total: f64 = self.weights.iter().map(|w| w.abs()).sum();
        if total == 0.0 {
            return vec![0.0; self.weights.len()];
        }
        self.weights.iter().map(|w| w.abs() / total).collect()
    }
}

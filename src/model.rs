//! A shallow, hand-differentiated policy/value/latent/atlas network. This
//! is deliberately not a general autograd engine (Non-goal, spec.md §1):
//! each head is a single linear layer with a closed-form gradient, trained
//! by plain SGD. `latent` and the atlas auxiliary head exist so the atlas
//! corpus's 6-dim source embeddings (zero-padded to 8 dims, §9 open
//! question (c)) have somewhere to supervise during seeding.

use serde::{Deserialize, Serialize};

const LATENT_DIM: usize = 16;
const ATLAS_DIM: usize = 8;
const LEARNING_RATE: f64 = 0.01;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Net {
    pub input_dim: usize,
    pub action_size: usize,
    policy_w: Vec<Vec<f64>>, // action_size x input_dim
    policy_b: Vec<f64>,
    value_w: Vec<f64>, // input_dim
    value_b: f64,
    latent_w: Vec<Vec<f64>>, // LATENT_DIM x input_dim
    atlas_w: Vec<Vec<f64>>,  // ATLAS_DIM x LATENT_DIM
}

#[derive(Debug, Clone)]
pub struct Sample {
    pub planes: Vec<f32>,
    pub target_pi: Vec<f64>,
    pub target_z: f64,
    pub atlas_target: Option<[f64; ATLAS_DIM]>,
}

impl Net {
    pub fn new(input_dim: usize, action_size: usize, seed: u64) -> Self {
        use rand::Rng;
        use rand::rngs::SmallRng;
        use rand::SeedableRng;
        let mut rng = SmallRng::seed_from_u64(seed);
        let mut rand_row = |n: usize| (0..n).map(|_| rng.random_range(-0.05..0.05)).collect::<Vec<_>>();
        Self {
            input_dim,
            action_size,
            policy_w: (0..action_size).map(|_| rand_row(input_dim)).collect(),
            policy_b: vec![0.0; action_size],
            value_w: rand_row(input_dim),
            value_b: 0.0,
            latent_w: (0..LATENT_DIM).map(|_| rand_row(input_dim)).collect(),
            atlas_w: (0..ATLAS_DIM).map(|_| rand_row(LATENT_DIM)).collect(),
        }
    }

    fn x64(planes: &[f32]) -> Vec<f64> {
        planes.iter().map(|&v| v as f64).collect()
    }

    fn dot(w: &[f64], x: &[f64]) -> f64 {
        w.iter().zip(x).map(|(a, b)| a * b).sum()
    }

    pub fn latent(&self, planes: &[f32]) -> Vec<f64> {
        let x = Self::x64(planes);
        self.latent_w.iter().map(|row| Self::dot(row, &x)).collect()
    }

    pub fn atlas(&self, latent: &[f64]) -> Vec<f64> {
        self.atlas_w.iter().map(|row| Self::dot(row, latent)).collect()
    }

    /// `(policy_logits, value in [0,1], latent)`.
    pub fn forward(&self, planes: &[f32]) -> (Vec<f64>, f64, Vec<f64>) {
        let x = Self::x64(planes);
        let logits: Vec<f64> = self
            .policy_w
            .iter()
            .zip(&self.policy_b)
            .map(|(row, b)| Self::dot(row, &x) + b)
            .collect();
        let raw_value = Self::dot(&self.value_w, &x) + self.value_b;
        let value = 1.0 / (1.0 + (-raw_value).exp());
        let latent = self.latent(planes);
        (logits, value, latent)
    }

    /// One SGD step over a batch: cross-entropy gradient for policy,
    /// squared-error gradient for value, squared-error gradient for the
    /// atlas head on samples that carry an `atlas_target`.
    pub fn train_step(&mut self, batch: &[Sample]) {
        if batch.is_empty() {
            return;
        }
        let lr = LEARNING_RATE / batch.len() as f64;
        for sample in batch {
            let x = Self::x64(&sample.planes);
            let (logits, value, latent) = self.forward(&sample.planes);
            let max_logit = logits.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            let exps: Vec<f64> = logits.iter().map(|l| (l - max_logit).exp()).collect();
            let sum: f64 = exps.iter().sum();
            let probs: Vec<f64> = exps.iter().map(|e| e / sum).collect();

            for a in 0..self.action_size {
                let target = sample.target_pi.get(a).copied().unwrap_or(0.0);
                let grad = probs[a] - target;
                for (w, xi) in self.policy_w[a].iter_mut().zip(&x) {
                    *w -= lr * grad * xi;
                }
                self.policy_b[a] -= lr * grad;
            }

            let value_grad = (value - sample.target_z) * value * (1.0 - value);
            for (w, xi) in self.value_w.iter_mut().zip(&x) {
                *w -= lr * value_grad * xi;
            }
            self.value_b -= lr * value_grad;

            if let Some(target) = sample.atlas_target {
                let pred = self.atlas(&latent);
                for (row, (p, t)) in self.atlas_w.iter_mut().zip(pred.iter().zip(target.iter())) {
                    let grad = p - t;
                    for (w, li) in row.iter_mut().zip(&latent) {
                        *w -= lr * grad * li;
                    }
                }
            }
        }
    }

    pub fn clone_weights(&self) -> Self {
        self.clone()
    }
}

/// Zero-pads a 6-dim atlas source embedding into the network's 8-dim
/// auxiliary training target, preserving the original's padding
/// convention (§9 open question (c): flagged as a modelling choice, not
/// a contract other callers should assume is load-bearing).
pub fn pad_atlas_embedding(source: [f64; 6]) -> [f64; ATLAS_DIM] {
    let mut out = [0.0; ATLAS_DIM];
    out[..6].copy_from_slice(&source);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_value_in_unit_interval() {
        let net = Net::new(27, 9, 1);
        let planes = vec![0.5f32; 27];
        let (_, value, latent) = net.forward(&planes);
        assert!((0.0..=1.0).contains(&value));
        assert_eq!(latent.len(), LATENT_DIM);
    }

    #[test]
    fn train_step_reduces_value_error() {
        let mut net = Net::new(9, 3, 2);
        let planes = vec![1.0f32; 9];
        let sample = Sample {
            planes: planes.clone(),
            target_pi: vec![1.0, 0.0, 0.0],
            target_z: 1.0,
            atlas_target: None,
        };
        let (_, before, _) = net.forward(&planes);
        for _ in 0..20 {
            net.train_step(&[sample.clone()]);
        }
        let (_, after, _) = net.forward(&planes);
        assert!((after - 1.0).abs() <= (before - 1.0).abs());
    }

    #[test]
    fn atlas_padding_preserves_source() {
        let padded = pad_atlas_embedding([1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(&padded[..6], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(&padded[6..], &[0.0, 0.0]);
    }
}

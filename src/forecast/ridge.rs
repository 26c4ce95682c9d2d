//! Closed-form ridge regression with intercept (§4.4).

use nalgebra::{DMatrix, DVector};

const DELTA_CLIP: f64 = 0.8;

#[derive(Debug, Clone)]
pub struct RidgeModel {
    pub beta: DVector<f64>,
    pub singular_fallback: bool,
}

/// Augments `x` (n rows x k cols, row-major) with a leading bias column of
/// ones, solves `(X^T X + alpha*I')beta = X^T y` where `I'` zeroes the
/// intercept diagonal entry, and falls back to the Moore-Penrose
/// pseudo-inverse on a singular normal-equation matrix.
pub fn fit(x: &[Vec<f64>], y: &[f64], alpha: f64) -> RidgeModel {
    let n = x.len();
    let k = x.first().map(|row| row.len()).unwrap_or(0);
    let design = DMatrix::from_fn(n, k + 1, |r, c| if c == 0 { 1.0 } else { x[r][c - 1] });
    let target = DVector::from_row_slice(y);

    let xtx = design.transpose() * &design;
    let mut reg = DMatrix::identity(k + 1, k + 1) * alpha;
    reg[(0, 0)] = 0.0;
    let normal = &xtx + reg;
    let xty = design.transpose() * &target;

    match normal.clone().cholesky() {
        Some(chol) => RidgeModel {
            beta: chol.solve(&xty),
            singular_fallback: false,
        },
        None => {
            log::warn!("ridge normal-equation matrix singular, falling back to pseudo-inverse");
            let pinv = normal
                .pseudo_inverse(1e-10)
                .unwrap_or_else(|_| DMatrix::zeros(k + 1, k + 1));
            RidgeModel {
                beta: pinv * xty,
                singular_fallback: true,
            }
        }
    }
}

impl RidgeModel {
    pub fn predict(&self, x: &[Vec<f64>]) -> Vec<f64> {
        x.iter()
            .map(|row| {
                let mut acc = self.beta[0];
                for (j, v) in row.iter().enumerate() {
                    acc += self.beta[j + 1] * v;
                }
                acc
            })
            .collect()
    }

    /// `predicted_price = close * (1 + clip(delta, +-0.8))` for the return
    /// delta target convention used by the evaluator.
    pub fn predict_price(&self, x: &[Vec<f64>], close: &[f64]) -> Vec<f64> {
        self.predict(x)
            .into_iter()
            .zip(close)
            .map(|(delta, c)| c * (1.0 + delta.clamp(-DELTA_CLIP, DELTA_CLIP)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ridge_constant_fit_predicts_constant() {
        let x = vec![vec![1.0], vec![1.0], vec![1.0]];
        let y = vec![2.0, 2.0, 2.0];
        let model = fit(&x, &y, 0.01);
        let preds = model.predict(&x);
        for p in preds {
            assert!((p - 2.0).abs() < 1e-6);
        }
    }

    #[test]
    fn singular_design_falls_back() {
        let x = vec![vec![1.0, 1.0], vec![2.0, 2.0], vec![3.0, 3.0]];
        let y = vec![1.0, 2.0, 3.0];
        let model = fit(&x, &y, 0.0);
        assert!(model.beta.iter().all(|v| v.is_finite()));
    }
}

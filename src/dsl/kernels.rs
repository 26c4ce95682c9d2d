//! Numerically stable rolling-window kernels over contiguous float slices.

const EPS: f64 = 1e-9;

/// O(n) simple moving average via cumulative-sum prefix differences.
pub fn sma(x: &[f64], window: usize) -> Vec<f64> {
    let n = x.len();
    let mut prefix = vec![0.0; n + 1];
    for i in 0..n {
        prefix[i + 1] = prefix[i] + x[i];
    }
    (0..n)
        .map(|i| {
            let start = i.saturating_sub(window - 1);
            let count = (i - start + 1) as f64;
            (prefix[i + 1] - prefix[start]) / count
        })
        .collect()
}

/// Rolling standard deviation via two-pass (mean, then variance): avoids
/// the cancellation that `mean(x^2) - mean(x)^2` can produce for the
/// naive single-pass prefix form.
pub fn std(x: &[f64], window: usize) -> Vec<f64> {
    let means = sma(x, window);
    let n = x.len();
    (0..n)
        .map(|i| {
            let start = i.saturating_sub(window - 1);
            let mean = means[i];
            let var = (start..=i)
                .map(|j| {
                    let d = x[j] - mean;
                    d * d
                })
                .sum::<f64>()
                / (i - start + 1) as f64;
            var.max(0.0).sqrt()
        })
        .collect()
}

/// Naive O(n*w) rolling minimum; correctness over cleverness per spec.
pub fn min(x: &[f64], window: usize) -> Vec<f64> {
    rolling_extreme(x, window, f64::min)
}

pub fn max(x: &[f64], window: usize) -> Vec<f64> {
    rolling_extreme(x, window, f64::max)
}

fn rolling_extreme(x: &[f64], window: usize, combine: fn(f64, f64) -> f64) -> Vec<f64> {
    (0..x.len())
        .map(|i| {
            let start = i.saturating_sub(window - 1);
            x[start..=i].iter().copied().fold(x[start], combine)
        })
        .collect()
}

/// `out[0] = x[0]`; `out[i] = alpha*x[i] + (1-alpha)*out[i-1]`, `alpha = 2/(w+1)`.
pub fn ema(x: &[f64], window: usize) -> Vec<f64> {
    let alpha = 2.0 / (window as f64 + 1.0);
    let mut out = Vec::with_capacity(x.len());
    for (i, &xi) in x.iter().enumerate() {
        if i == 0 {
            out.push(xi);
        } else {
            out.push(alpha * xi + (1.0 - alpha) * out[i - 1]);
        }
    }
    out
}

/// EMA with alpha interpolated between `slow` and `fast` by the normalised
/// per-step change magnitude `|dx| / (|x[i-1]| + eps)`.
pub fn adaptive_smooth(x: &[f64], fast: f64, slow: f64) -> Vec<f64> {
    let mut out = Vec::with_capacity(x.len());
    for (i, &xi) in x.iter().enumerate() {
        if i == 0 {
            out.push(xi);
            continue;
        }
        let change = (xi - x[i - 1]).abs() / (x[i - 1].abs() + EPS);
        let change = change.clamp(0.0, 1.0);
        let alpha = slow + (fast - slow) * change;
        out.push(alpha * xi + (1.0 - alpha) * out[i - 1]);
    }
    out
}

/// Final sanitisation pass over an evaluated output vector: Infs -> 0.0,
/// NaNs forward-filled from the first non-NaN value, leading NaNs
/// back-filled, all-NaN collapses to all-zeros.
pub fn sanitize(x: &mut [f64]) {
    if x.iter().all(|v| v.is_nan()) {
        x.fill(0.0);
        return;
    }
    for v in x.iter_mut() {
        if v.is_infinite() {
            *v = 0.0;
        }
    }
    let first_valid = x.iter().position(|v| !v.is_nan());
    if let Some(first) = first_valid {
        let fill = x[first];
        for v in x[..first].iter_mut() {
            *v = fill;
        }
        let mut last = x[first];
        for v in x[first..].iter_mut() {
            if v.is_nan() {
                *v = last;
            } else {
                last = *v;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sma_constant_vector_equals_constant() {
        let x = vec![3.0; 10];
        let out = sma(&x, 4);
        assert!(out.iter().all(|v| (v - 3.0).abs() < 1e-9));
    }

    #[test]
    fn std_never_negative() {
        let x = vec![1.0, 5.0, 2.0, 9.0, -3.0, 4.0];
        for v in std(&x, 3) {
            assert!(v >= 0.0);
        }
    }

    #[test]
    fn ema_first_equals_input() {
        let x = vec![10.0, 12.0, 8.0];
        let out = ema(&x, 5);
        assert_eq!(out[0], 10.0);
    }

    #[test]
    fn sanitize_all_nan_becomes_zeros() {
        let mut x = vec![f64::NAN; 5];
        sanitize(&mut x);
        assert!(x.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn sanitize_forward_fills_and_backfills() {
        let mut x = vec![f64::NAN, f64::NAN, 2.0, f64::NAN, 4.0, f64::INFINITY];
        sanitize(&mut x);
        assert_eq!(x, vec![2.0, 2.0, 2.0, 2.0, 4.0, 0.0]);
    }
}

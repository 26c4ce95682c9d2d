//! Novelty + collinearity filter (§4.3).

use std::collections::HashSet;

const CONSTANT_STD_FLOOR: f64 = 1e-12;

#[derive(Debug, Clone)]
pub struct NoveltyFilter {
    similarity_threshold: f64,
    collinearity_threshold: f64,
    canonical_signatures: Vec<String>,
    accepted: Vec<(String, Vec<f64>)>,
}

fn tokenize(signature: &str) -> HashSet<String> {
    signature
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let inter = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    if union == 0.0 { 0.0 } else { inter / union }
}

fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len() as f64;
    if n == 0.0 {
        return 0.0;
    }
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a.iter().zip(b) {
        let da = x - mean_a;
        let db = y - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    let denom = (var_a * var_b).sqrt();
    if denom < 1e-12 { 0.0 } else { cov / denom }
}

fn std_dev(x: &[f64]) -> f64 {
    let n = x.len() as f64;
    if n == 0.0 {
        return 0.0;
    }
    let mean = x.iter().sum::<f64>() / n;
    (x.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt()
}

impl NoveltyFilter {
    pub fn new(
        similarity_threshold: f64,
        collinearity_threshold: f64,
        canonical_signatures: Vec<String>,
    ) -> Self {
        Self {
            similarity_threshold,
            collinearity_threshold,
            canonical_signatures,
            accepted: Vec::new(),
        }
    }

    /// `true` iff the candidate is accepted; acceptance appends it to both
    /// the signature and series lists so subsequent candidates are scored
    /// against it too.
    pub fn consider(&mut self, signature: &str, series: &[f64]) -> bool {
        if std_dev(series) < CONSTANT_STD_FLOOR {
            return false;
        }
        let tokens = tokenize(signature);
        for canonical in &self.canonical_signatures {
            if jaccard(&tokens, &tokenize(canonical)) >= self.similarity_threshold {
                return false;
            }
        }
        for (accepted_sig, accepted_series) in &self.accepted {
            if jaccard(&tokens, &tokenize(accepted_sig)) >= self.similarity_threshold {
                return false;
            }
            if pearson(series, accepted_series).abs() >= self.collinearity_threshold {
                return false;
            }
        }
        self.accepted.push((signature.to_string(), series.to_vec()));
        true
    }

    pub fn accepted_count(&self) -> usize {
        self.accepted.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_constant_series() {
        let mut f = NoveltyFilter::new(0.8, 0.95, vec![]);
        assert!(!f.consider("F:close", &[1.0; 20]));
    }

    #[test]
    fn rejects_collinear_series() {
        let mut f = NoveltyFilter::new(0.99, 0.8, vec![]);
        let a: Vec<f64> = (0..50).map(|i| i as f64).collect();
        let b: Vec<f64> = (0..50).map(|i| i as f64 * 2.0 + 1.0).collect();
        assert!(f.consider("R:sma:5(F:close)", &a));
        assert!(!f.consider("R:sma:7(F:open)", &b));
    }

    #[test]
    fn accepts_distinct_candidates() {
        let mut f = NoveltyFilter::new(0.9, 0.95, vec![]);
        let a: Vec<f64> = (0..50).map(|i| (i as f64).sin()).collect();
        let b: Vec<f64> = (0..50).map(|i| (i as f64 * 0.3).cos()).collect();
        assert!(f.consider("U:abs(F:close)", &a));
        assert!(f.consider("U:sqrt(F:volume)", &b));
        assert_eq!(f.accepted_count(), 2);
    }
}

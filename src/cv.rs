//! Purged, embargoed walk-forward cross-validation fold construction.

use crate::error::DiscoveryError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    pub train: std::ops::Range<usize>,
    pub val: std::ops::Range<usize>,
}

impl Fold {
    pub fn is_disjoint(&self) -> bool {
        self.train.end <= self.val.start || self.val.end <= self.train.start
    }
}

/// `chunk = (n_rows - max_horizon - 1) / (folds + 1)`; each fold's train
/// segment is an expanding window ending `purge + max_horizon` bars before
/// the chunk boundary; validation begins `embargo` bars after the train
/// end and spans up to one chunk.
pub fn build_folds(
    n_rows: usize,
    folds: u32,
    max_horizon: usize,
    purge: usize,
    embargo: usize,
) -> Result<Vec<Fold>, DiscoveryError> {
    if n_rows <= max_horizon + 1 {
        return Err(DiscoveryError::InsufficientData(format!(
            "n_rows={n_rows} too small for max_horizon={max_horizon}"
        )));
    }
    let chunk = (n_rows - max_horizon - 1) / (folds as usize + 1);
    if chunk < 100 {
        return Err(DiscoveryError::InsufficientData(format!(
            "chunk size {chunk} below minimum of 100 rows"
        )));
    }

    let mut out = Vec::new();
    for i in 0..folds as usize {
        let chunk_end = chunk * (i + 1);
        let train_end = chunk_end.saturating_sub(purge + max_horizon);
        let val_start = chunk_end + embargo;
        let val_end = (val_start + chunk).min(n_rows.saturating_sub(max_horizon));
        if train_end == 0 || val_start >= val_end {
            continue;
        }
        let fold = Fold {
            train: 0..train_end,
            val: val_start..val_end,
        };
        if !fold.is_disjoint() {
            return Err(DiscoveryError::Leakage(format!(
                "fold {i}: train {:?} overlaps val {:?}",
                fold.train, fold.val
            )));
        }
        out.push(fold);
    }

    if out.len() < 2 {
        return Err(DiscoveryError::InsufficientData(
            "fewer than 2 usable folds".into(),
        ));
    }
    Ok(out)
}

/// `∀i: feature_ts[i] < target_ts[i]`, where `target_ts` is the feature
/// timestamp series shifted forward by the forecast horizon.
pub fn assert_no_lookahead(feature_ts: &[i64], target_ts: &[i64]) -> Result<(), DiscoveryError> {
    for (i, (&f, &t)) in feature_ts.iter().zip(target_ts).enumerate() {
        if f >= t {
            return Err(DiscoveryError::Leakage(format!(
                "lookahead at index {i}: feature_ts={f} >= target_ts={t}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn purged_cv_scenario() {
        let folds = build_folds(5000, 5, 200, 8, 8).expect("builds");
        assert!(folds.len() >= 2);
        for f in &folds {
            assert!(f.is_disjoint());
        }
    }

    #[test]
    fn too_few_rows_is_insufficient_data() {
        let err = build_folds(50, 5, 200, 8, 8).unwrap_err();
        assert!(matches!(err, DiscoveryError::InsufficientData(_)));
    }

    #[test]
    fn lookahead_detected() {
        let feature_ts = vec![1, 2, 3];
        let target_ts = vec![2, 2, 4];
        assert!(assert_no_lookahead(&feature_ts, &target_ts).is_err());
    }

    #[test]
    fn no_lookahead_passes() {
        let feature_ts = vec![1, 2, 3];
        let target_ts = vec![11, 12, 13];
        assert!(assert_no_lookahead(&feature_ts, &target_ts).is_ok());
    }
}

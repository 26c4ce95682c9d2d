//! Run configuration envelope (§6) and the budget scaler that derives an
//! effective config from `budget_minutes / (symbols * timeframes)`.

use crate::error::DiscoveryError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HorizonConfig {
    pub min_bar: u32,
    pub max_bar: u32,
    pub coarse_step: u32,
    pub refine_radius: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CvConfig {
    pub folds: u32,
    pub embargo_bars: u32,
    pub purge_bars: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub candidate_pool_size: u32,
    pub stage_a_keep: u32,
    pub stage_b_keep: u32,
    pub tuning_trials: u32,
    pub max_combo_size: u32,
    pub novelty_similarity_threshold: f64,
    pub collinearity_threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub fee_bps: f64,
    pub slippage_bps: f64,
    pub signal_threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub top_n_symbols: u32,
    pub symbols: Option<Vec<String>>,
    pub timeframes: Vec<String>,
    pub history_windows: std::collections::BTreeMap<String, u32>,
    pub horizon: HorizonConfig,
    pub cv: CvConfig,
    pub search: SearchConfig,
    pub backtest: BacktestConfig,
    pub budget_minutes: u32,
    pub random_seed: u64,
}

const VALID_TIMEFRAMES: [&str; 3] = ["5m", "1h", "4h"];

fn timeframe_floor_days(tf: &str) -> u32 {
    match tf {
        "5m" => 60,
        "1h" => 365,
        "4h" => 730,
        _ => 60,
    }
}

impl RunConfig {
    /// Ingress validation. Matches spec.md §6's envelope constraints.
    pub fn validate(&self) -> Result<(), DiscoveryError> {
        if !(1..=40).contains(&self.top_n_symbols) {
            return Err(DiscoveryError::InvalidConfig(
                "top_n_symbols must be in [1,40]".into(),
            ));
        }
        if let Some(symbols) = &self.symbols
            && (symbols.is_empty() || symbols.len() > 40) {
                return Err(DiscoveryError::InvalidConfig(
                    "symbols list must have 1..40 entries".into(),
                ));
            }
        if self.timeframes.is_empty()
            || self
                .timeframes
                .iter()
                .any(|tf| !VALID_TIMEFRAMES.contains(&tf.as_str()))
        {
            return Err(DiscoveryError::InvalidConfig(
                "timeframes must be a non-empty subset of {5m,1h,4h}".into(),
            ));
        }
        if self.horizon.min_bar < 1 || self.horizon.max_bar <= self.horizon.min_bar {
            return Err(DiscoveryError::InvalidConfig(
                "horizon.max_bar must exceed horizon.min_bar >= 1".into(),
            ));
        }
        if self.horizon.coarse_step < 1 {
            return Err(DiscoveryError::InvalidConfig(
                "horizon.coarse_step must be >= 1".into(),
            ));
        }
        if self.search.stage_b_keep > self.search.stage_a_keep {
            return Err(DiscoveryError::InvalidConfig(
                "search.stage_b_keep must be <= stage_a_keep".into(),
            ));
        }
        if !(5..=480).contains(&self.budget_minutes) {
            return Err(DiscoveryError::InvalidConfig(
                "budget_minutes must be in [5,480]".into(),
            ));
        }
        Ok(())
    }

    /// Stable hash of the config, used both as a dedup key for the run store
    /// and as part of the per-search PRNG seed (`seed + stable_hash(symbol|timeframe)`).
    pub fn config_hash(&self) -> String {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        serde_json::to_string(self)
            .expect("config serializes")
            .hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }

    fn jobs(&self) -> u32 {
        let symbols = self
            .symbols
            .as_ref()
            .map(|s| s.len() as u32)
            .unwrap_or(self.top_n_symbols);
        (symbols * self.timeframes.len() as u32).max(1)
    }

    /// `scale = clamp(budget_minutes / (jobs * 4), 0.35, 1.4)`
    pub fn budget_scale(&self) -> f64 {
        let raw = self.budget_minutes as f64 / (self.jobs() as f64 * crate::BUDGET_SCALE_DIVISOR);
        raw.clamp(crate::BUDGET_SCALE_MIN, crate::BUDGET_SCALE_MAX)
    }

    /// Derives the effective config applied at run time. Integer fields are
    /// scaled and floored; `stage_b_keep` is re-clamped to `<= stage_a_keep`
    /// after scaling since the two floors can otherwise invert it.
    pub fn scaled(&self) -> RunConfig {
        let scale = self.budget_scale();
        let mut out = self.clone();

        out.search.candidate_pool_size =
            scaled_floor(self.search.candidate_pool_size, scale, 48);
        out.search.stage_a_keep = scaled_floor(self.search.stage_a_keep, scale, 18);
        out.search.stage_b_keep =
            scaled_floor(self.search.stage_b_keep, scale, 8).min(out.search.stage_a_keep);
        out.search.tuning_trials = scaled_floor(self.search.tuning_trials, scale, 1);

        let fold_cap = if scale >= 0.75 { 5 } else { 4 };
        out.cv.folds = ((self.cv.folds as f64 * scale).round() as u32).clamp(3, fold_cap);

        let step = (self.horizon.coarse_step as f64 / scale.max(crate::BUDGET_SCALE_MIN)).round();
        out.horizon.coarse_step = (step as u32).clamp(1, 36);

        let history_scale = scale.sqrt().clamp(0.68, 1.0);
        out.history_windows = self
            .history_windows
            .iter()
            .map(|(tf, days)| {
                let floor = timeframe_floor_days(tf);
                let scaled = (*days as f64 * history_scale).round() as u32;
                (tf.clone(), scaled.max(floor))
            })
            .collect();

        out
    }
}

fn scaled_floor(value: u32, scale: f64, floor: u32) -> u32 {
    ((value as f64 * scale).round() as u32).max(floor)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> RunConfig {
        RunConfig {
            top_n_symbols: 30,
            symbols: None,
            timeframes: vec!["5m".into()],
            history_windows: [("5m".into(), 120)].into_iter().collect(),
            horizon: HorizonConfig {
                min_bar: 1,
                max_bar: 50,
                coarse_step: 5,
                refine_radius: 3,
            },
            cv: CvConfig {
                folds: 5,
                embargo_bars: 8,
                purge_bars: 8,
            },
            search: SearchConfig {
                candidate_pool_size: 200,
                stage_a_keep: 40,
                stage_b_keep: 20,
                tuning_trials: 6,
                max_combo_size: 3,
                novelty_similarity_threshold: 0.8,
                collinearity_threshold: 0.95,
            },
            backtest: BacktestConfig {
                fee_bps: 5.0,
                slippage_bps: 2.0,
                signal_threshold: 0.0005,
            },
            budget_minutes: 20,
            random_seed: 42,
        }
    }

    #[test]
    fn budget_scaler_tight_scenario() {
        let mut cfg = base();
        cfg.budget_minutes = 20;
        cfg.top_n_symbols = 30;
        let scaled = cfg.scaled();
        assert!(scaled.search.candidate_pool_size < 180);
        assert!(scaled.search.stage_b_keep <= scaled.search.stage_a_keep);
    }

    #[test]
    fn folds_never_below_three() {
        let mut cfg = base();
        cfg.budget_minutes = 5;
        cfg.cv.folds = 5;
        assert!(cfg.scaled().cv.folds >= 3);
    }

    #[test]
    fn history_respects_timeframe_floor() {
        let mut cfg = base();
        cfg.budget_minutes = 5;
        cfg.history_windows = [("1h".into(), 10)].into_iter().collect();
        cfg.timeframes = vec!["1h".into()];
        let scaled = cfg.scaled();
        assert!(scaled.history_windows["1h"] >= 365);
    }

    #[test]
    fn rejects_inverted_stage_keep() {
        let mut cfg = base();
        cfg.search.stage_b_keep = cfg.search.stage_a_keep + 1;
        assert!(cfg.validate().is_err());
    }
}

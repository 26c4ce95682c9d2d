//! Per-candidate, per-horizon scoring with a memoized feature/target/score
//! cache scoped to one `(symbol, timeframe)` search (§4.5).

use crate::cv::Fold;
use crate::dsl::{Context, Expr};
use crate::forecast::RidgeModel;
use std::collections::HashMap;

const EPS: f64 = 1e-9;
const MIN_TRAIN_ROWS: usize = 30;
const MIN_VAL_ROWS: usize = 20;
pub const DEGENERATE_ERROR: f64 = 9999.0;

#[derive(Debug, Clone)]
pub struct HorizonScore {
    pub horizon: u32,
    pub normalized_rmse: f64,
    pub normalized_mae: f64,
    pub composite_error: f64,
    pub directional_hit_rate: f64,
    pub y_true: Vec<f64>,
    pub y_pred: Vec<f64>,
    pub close_ref: Vec<f64>,
    pub degenerate: bool,
}

/// Three baseline columns: 1-bar return, 5-bar momentum, 10-bar return std.
pub fn baseline_columns(close: &[f64]) -> Vec<[f64; 3]> {
    let n = close.len();
    let ret1: Vec<f64> = (0..n)
        .map(|i| if i >= 1 { (close[i] - close[i - 1]) / close[i - 1] } else { 0.0 })
        .collect();
    let mom5: Vec<f64> = (0..n)
        .map(|i| if i >= 5 { (close[i] - close[i - 5]) / close[i - 5] } else { 0.0 })
        .collect();
    let retstd10: Vec<f64> = (0..n)
        .map(|i| {
            let start = i.saturating_sub(9);
            let window = &ret1[start..=i];
            let mean = window.iter().sum::<f64>() / window.len() as f64;
            (window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / window.len() as f64).sqrt()
        })
        .collect();
    (0..n).map(|i| [ret1[i], mom5[i], retstd10[i]]).collect()
}

pub fn design_matrix(feature: &[f64], baseline: &[[f64; 3]]) -> Vec<Vec<f64>> {
    feature
        .iter()
        .zip(baseline)
        .map(|(f, b)| vec![*f, b[0], b[1], b[2]])
        .collect()
}

/// Per-`(symbol,timeframe)` search scope: memoizes feature vectors, target
/// vectors, horizon scores, and augmented design matrices. Invalidated only
/// when the owning search ends (dropped).
#[derive(Debug, Default)]
pub struct EvalCache {
    features: HashMap<String, Vec<f64>>,
    targets: HashMap<u32, (Vec<f64>, Vec<f64>)>, // horizon -> (delta target, price target)
    scores: HashMap<(String, u32), HorizonScore>,
    designs: HashMap<String, Vec<Vec<f64>>>,
}

impl EvalCache {
    pub fn feature(&mut self, expr: &Expr, ctx: &Context) -> &Vec<f64> {
        self.features
            .entry(expr.signature())
            .or_insert_with(|| expr.eval(ctx))
    }

    fn target_for(&mut self, close: &[f64], horizon: u32) -> &(Vec<f64>, Vec<f64>) {
        self.targets.entry(horizon).or_insert_with(|| {
            let h = horizon as usize;
            let n = close.len();
            let price: Vec<f64> = (0..n.saturating_sub(h)).map(|i| close[i + h]).collect();
            let delta: Vec<f64> = price
                .iter()
                .enumerate()
                .map(|(i, p)| (p - close[i]) / close[i])
                .collect();
            (delta, price)
        })
    }

    pub fn design_for(&mut self, expr: &Expr, ctx: &Context, baseline: &[[f64; 3]]) -> &Vec<Vec<f64>> {
        let sig = expr.signature();
        if !self.designs.contains_key(&sig) {
            let feature = expr.eval(ctx);
            let design = design_matrix(&feature, baseline);
            self.features.insert(sig.clone(), feature);
            self.designs.insert(sig.clone(), design);
        }
        self.designs.get(&sig).unwrap()
    }

    /// Cache key eliminates duplicate work across search stages that
    /// re-evaluate the same `(expression, horizon)` pair.
    pub fn score(
        &mut self,
        expr: &Expr,
        ctx: &Context,
        close: &[f64],
        baseline: &[[f64; 3]],
        horizon: u32,
        folds: &[Fold],
        alpha: f64,
    ) -> HorizonScore {
        let key = (expr.signature(), horizon);
        if let Some(cached) = self.scores.get(&key) {
            return cached.clone();
        }
        let design = self.design_for(expr, ctx, baseline).clone();
        let (delta_target, price_target) = self.target_for(close, horizon).clone();

        let mut y_true = Vec::new();
        let mut y_pred = Vec::new();
        let mut close_ref = Vec::new();
        let mut any_fold_used = false;

        for fold in folds {
            let train_end = fold.train.end.min(delta_target.len());
            let val_end = fold.val.end.min(delta_target.len());
            let val_start = fold.val.start.min(val_end);
            if fold.train.start >= train_end || val_start >= val_end {
                continue;
            }
            let train_rows = train_end - fold.train.start;
            let val_rows = val_end - val_start;
            if train_rows < MIN_TRAIN_ROWS || val_rows < MIN_VAL_ROWS {
                continue;
            }
            let train_x = &design[fold.train.start..train_end];
            let train_y = &delta_target[fold.train.start..train_end];
            let model: RidgeModel = crate::forecast::ridge::fit(train_x, train_y, alpha);

            let val_x = &design[val_start..val_end];
            let val_close: Vec<f64> = close[val_start..val_end].to_vec();
            let preds = model.predict_price(val_x, &val_close);

            y_true.extend_from_slice(&price_target[val_start..val_end]);
            y_pred.extend(preds);
            close_ref.extend(val_close);
            any_fold_used = true;
        }

        let score = if !any_fold_used {
            HorizonScore {
                horizon,
                normalized_rmse: 0.0,
                normalized_mae: 0.0,
                composite_error: DEGENERATE_ERROR,
                directional_hit_rate: 0.0,
                y_true,
                y_pred,
                close_ref,
                degenerate: true,
            }
        } else {
            score_from_predictions(horizon, y_true, y_pred, close_ref)
        };

        self.scores.insert(key, score.clone());
        score
    }
}

fn score_from_predictions(
    horizon: u32,
    y_true: Vec<f64>,
    y_pred: Vec<f64>,
    close_ref: Vec<f64>,
) -> HorizonScore {
    let n = y_true.len() as f64;
    let mean_true = y_true.iter().sum::<f64>() / n;
    let std_true = (y_true.iter().map(|v| (v - mean_true).powi(2)).sum::<f64>() / n).sqrt();
    let mean_abs_true = y_true.iter().map(|v| v.abs()).sum::<f64>() / n;

    let se: f64 = y_true.iter().zip(&y_pred).map(|(t, p)| (t - p).powi(2)).sum();
    let ae: f64 = y_true.iter().zip(&y_pred).map(|(t, p)| (t - p).abs()).sum();
    let rmse = (se / n).sqrt();
    let mae = ae / n;

    let nrmse = rmse / (std_true + EPS);
    let nmae = mae / (mean_abs_true + EPS);
    let composite = 0.5 * (nrmse + nmae);

    let hits = y_true
        .iter()
        .zip(&y_pred)
        .zip(&close_ref)
        .filter(|((t, p), c)| (**t - **c).signum() == (**p - **c).signum())
        .count();
    let hit_rate = hits as f64 / n;

    HorizonScore {
        horizon,
        normalized_rmse: nrmse,
        normalized_mae: nmae,
        composite_error: composite,
        directional_hit_rate: hit_rate,
        y_true,
        y_pred,
        close_ref,
        degenerate: false,
    }
}

/// Coarse grid `[min, min+step, ..., max]`.
pub fn horizon_grid(min_bar: u32, max_bar: u32, step: u32) -> Vec<u32> {
    let step = step.max(1);
    let mut out = Vec::new();
    let mut h = min_bar;
    while h <= max_bar {
        out.push(h);
        h += step;
    }
    out
}

/// Top-k from a coarse scan: k=7 if the best coarse composite error is
/// <= 0.35, else k=4.
pub fn top_k_seeds(scored: &[(u32, f64)], best_coarse: f64) -> Vec<u32> {
    let k = if best_coarse <= 0.35 { 7 } else { 4 };
    let mut sorted = scored.to_vec();
    sorted.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
    sorted.into_iter().take(k).map(|(h, _)| h).collect()
}

/// Expand a `+-radius` window around each seed horizon, clamped to
/// `[min_bar, max_bar]`.
pub fn expand_window(seeds: &[u32], radius: u32, min_bar: u32, max_bar: u32) -> Vec<u32> {
    let mut set = std::collections::BTreeSet::new();
    for &seed in seeds {
        let lo = seed.saturating_sub(radius).max(min_bar);
        let hi = (seed + radius).min(max_bar);
        for h in lo..=hi {
            set.insert(h);
        }
    }
    set.into_iter().collect()
}

/// Two-level horizon search: score the coarse grid, pick top-k seeds, then
/// score the union of `+-refine_radius` windows around each seed (skipping
/// horizons already scored). Returns every horizon scored, keyed by
/// horizon, so callers can take the best.
pub fn evaluate_candidate_horizons(
    expr: &Expr,
    ctx: &Context,
    close: &[f64],
    baseline: &[[f64; 3]],
    min_bar: u32,
    max_bar: u32,
    coarse_step: u32,
    refine_radius: u32,
    folds: &[Fold],
    alpha: f64,
    cache: &mut EvalCache,
) -> HashMap<u32, HorizonScore> {
    let grid = horizon_grid(min_bar, max_bar, coarse_step);
    let mut scored: HashMap<u32, HorizonScore> = HashMap::new();
    let mut coarse_errors = Vec::new();
    for &h in &grid {
        let s = cache.score(expr, ctx, close, baseline, h, folds, alpha);
        coarse_errors.push((h, s.composite_error));
        scored.insert(h, s);
    }
    let best_coarse = coarse_errors
        .iter()
        .map(|(_, e)| *e)
        .fold(f64::INFINITY, f64::min);
    let seeds = top_k_seeds(&coarse_errors, best_coarse);
    let expanded = expand_window(&seeds, refine_radius, min_bar, max_bar);
    for h in expanded {
        scored.entry(h).or_insert_with(|| cache.score(expr, ctx, close, baseline, h, folds, alpha));
    }
    scored
}

pub fn best_horizon(scored: &HashMap<u32, HorizonScore>) -> Option<u32> {
    scored
        .values()
        .min_by(|a, b| a.composite_error.partial_cmp(&b.composite_error).unwrap())
        .map(|s| s.horizon)
}

/// Column-stacks several features' design matrices (each feature contributes
/// one column; the baseline columns are shared and appended once) and fits
/// at a single fixed horizon. Used by the search optimizer's greedy-combo
/// stage, which re-weights via ridge but never re-weights beyond that.
pub fn score_combo(
    exprs: &[Expr],
    ctx: &Context,
    close: &[f64],
    baseline: &[[f64; 3]],
    horizon: u32,
    folds: &[Fold],
    alpha: f64,
    cache: &mut EvalCache,
) -> HorizonScore {
    let features: Vec<Vec<f64>> = exprs.iter().map(|e| cache.feature(e, ctx).clone()).collect();
    let n = close.len();
    let design: Vec<Vec<f64>> = (0..n)
        .map(|i| {
            let mut row: Vec<f64> = features.iter().map(|f| f[i]).collect();
            row.extend_from_slice(&baseline[i]);
            row
        })
        .collect();
    let (delta_target, price_target) = cache.target_for(close, horizon).clone();

    let mut y_true = Vec::new();
    let mut y_pred = Vec::new();
    let mut close_ref = Vec::new();
    let mut any_fold_used = false;

    for fold in folds {
        let train_end = fold.train.end.min(delta_target.len());
        let val_end = fold.val.end.min(delta_target.len());
        let val_start = fold.val.start.min(val_end);
        if fold.train.start >= train_end || val_start >= val_end {
            continue;
        }
        if train_end - fold.train.start < MIN_TRAIN_ROWS || val_end - val_start < MIN_VAL_ROWS {
            continue;
        }
        let train_x = &design[fold.train.start..train_end];
        let train_y = &delta_target[fold.train.start..train_end];
        let model = crate::forecast::ridge::fit(train_x, train_y, alpha);
        let val_x = &design[val_start..val_end];
        let val_close: Vec<f64> = close[val_start..val_end].to_vec();
        let preds = model.predict_price(val_x, &val_close);
        y_true.extend_from_slice(&price_target[val_start..val_end]);
        y_pred.extend(preds);
        close_ref.extend(val_close);
        any_fold_used = true;
    }

    if !any_fold_used {
        HorizonScore {
            horizon,
            normalized_rmse: 0.0,
            normalized_mae: 0.0,
            composite_error: DEGENERATE_ERROR,
            directional_hit_rate: 0.0,
            y_true,
            y_pred,
            close_ref,
            degenerate: true,
        }
    } else {
        score_from_predictions(horizon, y_true, y_pred, close_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cv::build_folds;

    fn ctx_and_close(n: usize) -> (Context, Vec<f64>) {
        let close: Vec<f64> = (0..n).map(|i| 100.0 + (i as f64 * 0.1).sin() * 5.0 + i as f64 * 0.01).collect();
        let ctx = Context::new(n).with_field("close", close.clone());
        (ctx, close)
    }

    #[test]
    fn horizon_score_bounds() {
        let (ctx, close) = ctx_and_close(2000);
        let folds = build_folds(close.len(), 5, 30, 4, 4).unwrap();
        let baseline = baseline_columns(&close);
        let mut cache = EvalCache::default();
        let expr = Expr::Rolling(crate::dsl::RollingOp::Sma, Box::new(Expr::Field("close".into())), 10);
        let score = cache.score(&expr, &ctx, &close, &baseline, 10, &folds, 1.0);
        assert!(score.directional_hit_rate >= 0.0 && score.directional_hit_rate <= 1.0);
        assert!(score.composite_error >= 0.0);
    }

    #[test]
    fn cache_hits_on_repeat_lookup() {
        let (ctx, close) = ctx_and_close(2000);
        let folds = build_folds(close.len(), 5, 30, 4, 4).unwrap();
        let baseline = baseline_columns(&close);
        let mut cache = EvalCache::default();
        let expr = Expr::Field("close".into());
        let first = cache.score(&expr, &ctx, &close, &baseline, 10, &folds, 1.0);
        let second = cache.score(&expr, &ctx, &close, &baseline, 10, &folds, 1.0);
        assert_eq!(first.composite_error, second.composite_error);
    }

    #[test]
    fn horizon_grid_covers_range() {
        let grid = horizon_grid(1, 10, 3);
        assert_eq!(grid, vec![1, 4, 7, 10]);
    }
}

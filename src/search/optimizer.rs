//! 4-stage search funnel: screen (A) -> refine (B) -> mutate (C) ->
//! greedy combo (D). All randomness flows from one seeded PRNG per search;
//! stage ordering is deterministic given identical inputs (§4.6).

use crate::config::RunConfig;
use crate::cv::Fold;
use crate::dsl::{Context, Expr};
use crate::evaluate::{self, EvalCache};
use crate::generate;
use crate::novelty::NoveltyFilter;
use rand::SeedableRng;
use rand::rngs::SmallRng;

#[derive(Debug, Clone)]
pub struct Candidate {
    pub id: String,
    pub root: Expr,
    pub complexity: usize,
    pub best_horizon: u32,
    pub composite_error: f64,
}

#[derive(Debug, Clone)]
pub struct FunnelResult {
    pub stage_a: Vec<Candidate>,
    pub stage_b: Vec<Candidate>,
    pub stage_c: Vec<Candidate>,
    pub combo: Vec<Candidate>,
    pub combo_composite_error: f64,
}

fn stable_hash(s: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    s.hash(&mut hasher);
    hasher.finish()
}

fn seed_for(seed: u64, symbol: &str, timeframe: &str) -> u64 {
    seed.wrapping_add(stable_hash(&format!("{symbol}|{timeframe}")))
}

const CANONICAL_SIGNATURES: &[&str] = &["R:sma:20(F:close)", "R:ema:20(F:close)", "R:std:20(F:close)"];

/// Runs the full funnel for one `(symbol, timeframe)` search against an
/// already-built fold set and context.
pub fn run_funnel(
    config: &RunConfig,
    symbol: &str,
    timeframe: &str,
    ctx: &Context,
    close: &[f64],
    folds: &[Fold],
    fields: &[&str],
) -> FunnelResult {
    let seed = seed_for(config.random_seed, symbol, timeframe);
    let mut rng = SmallRng::seed_from_u64(seed);
    let baseline = evaluate::baseline_columns(close);
    let mut cache = EvalCache::default();
    let mut novelty = NoveltyFilter::new(
        config.search.novelty_similarity_threshold,
        config.search.collinearity_threshold,
        CANONICAL_SIGNATURES.iter().map(|s| s.to_string()).collect(),
    );

    let stage_a = stage_a_screen(
        config, &mut rng, ctx, close, &baseline, folds, fields, &mut cache, &mut novelty,
    );
    let stage_b = stage_b_refine(config, &stage_a, ctx, close, &baseline, folds, &mut cache);
    let stage_c = stage_c_mutate(config, &mut rng, &stage_b, ctx, close, &baseline, folds, fields, &mut cache);
    let (combo, combo_error) = stage_d_combo(config, &stage_c, ctx, close, &baseline, folds, &mut cache);

    FunnelResult {
        stage_a,
        stage_b,
        stage_c,
        combo,
        combo_composite_error: combo_error,
    }
}

fn candidate_from(
    idx: usize,
    root: Expr,
    ctx: &Context,
    close: &[f64],
    baseline: &[[f64; 3]],
    min_bar: u32,
    max_bar: u32,
    coarse_step: u32,
    refine_radius: u32,
    folds: &[Fold],
    cache: &mut EvalCache,
) -> Candidate {
    let scored = evaluate::evaluate_candidate_horizons(
        &root, ctx, close, baseline, min_bar, max_bar, coarse_step, refine_radius, folds, 1.0, cache,
    );
    let best = evaluate::best_horizon(&scored).unwrap_or(min_bar);
    let error = scored.get(&best).map(|s| s.composite_error).unwrap_or(evaluate::DEGENERATE_ERROR);
    Candidate {
        id: format!("cand-{idx}"),
        complexity: root.complexity(),
        root,
        best_horizon: best,
        composite_error: error,
    }
}

fn stage_a_screen(
    config: &RunConfig,
    rng: &mut SmallRng,
    ctx: &Context,
    close: &[f64],
    baseline: &[[f64; 3]],
    folds: &[Fold],
    fields: &[&str],
    cache: &mut EvalCache,
    novelty: &mut NoveltyFilter,
) -> Vec<Candidate> {
    let pool = config.search.candidate_pool_size as usize;
    let screen_folds: Vec<Fold> = folds.iter().take(2).cloned().collect();
    let coarse_step = config.horizon.coarse_step * 2;
    let refine_radius = (config.horizon.refine_radius / 2).max(1);

    let mut accepted = Vec::new();
    for i in 0..pool {
        let tree = generate::random_tree(rng, 5, fields);
        let series = tree.eval(ctx);
        if !novelty.consider(&tree.signature(), &series) {
            continue;
        }
        let candidate = candidate_from(
            i, tree, ctx, close, baseline,
            config.horizon.min_bar, config.horizon.max_bar, coarse_step, refine_radius,
            &screen_folds, cache,
        );
        accepted.push(candidate);
    }
    accepted.sort_by(|a, b| a.composite_error.partial_cmp(&b.composite_error).unwrap());
    accepted.truncate(config.search.stage_a_keep as usize);
    accepted
}

fn stage_b_refine(
    config: &RunConfig,
    stage_a: &[Candidate],
    ctx: &Context,
    close: &[f64],
    baseline: &[[f64; 3]],
    folds: &[Fold],
    cache: &mut EvalCache,
) -> Vec<Candidate> {
    let window = (4 * config.horizon.refine_radius).max(18);
    let mut rescored: Vec<Candidate> = stage_a
        .iter()
        .map(|c| {
            let min_bar = c.best_horizon.saturating_sub(window).max(config.horizon.min_bar);
            let max_bar = (c.best_horizon + window).min(config.horizon.max_bar);
            candidate_from(
                0, c.root.clone(), ctx, close, baseline,
                min_bar, max_bar, config.horizon.coarse_step, config.horizon.refine_radius,
                folds, cache,
            )
        })
        .collect();
    rescored.sort_by(|a, b| a.composite_error.partial_cmp(&b.composite_error).unwrap());
    rescored.truncate(config.search.stage_b_keep as usize);
    rescored
}

fn stage_c_mutate(
    config: &RunConfig,
    rng: &mut SmallRng,
    stage_b: &[Candidate],
    ctx: &Context,
    close: &[f64],
    baseline: &[[f64; 3]],
    folds: &[Fold],
    fields: &[&str],
    cache: &mut EvalCache,
) -> Vec<Candidate> {
    let best_stage_b_error = stage_b
        .iter()
        .map(|c| c.composite_error)
        .fold(f64::INFINITY, f64::min);

    stage_b
        .iter()
        .map(|c| {
            let mut best = c.clone();
            let trial_cap = if c.composite_error > 1.35 * best_stage_b_error {
                2
            } else {
                config.search.tuning_trials as usize
            };
            let mut non_improving = 0;
            for _ in 0..trial_cap {
                if non_improving >= 2 {
                    break;
                }
                let mutated_root = generate::mutate(rng, &best.root, fields);
                let candidate = candidate_from(
                    0, mutated_root, ctx, close, baseline,
                    config.horizon.min_bar, config.horizon.max_bar,
                    config.horizon.coarse_step, config.horizon.refine_radius,
                    folds, cache,
                );
                if candidate.composite_error < best.composite_error {
                    best = candidate;
                    non_improving = 0;
                } else {
                    non_improving += 1;
                }
            }
            best
        })
        .collect()
}

fn stage_d_combo(
    config: &RunConfig,
    stage_c: &[Candidate],
    ctx: &Context,
    close: &[f64],
    baseline: &[[f64; 3]],
    folds: &[Fold],
    cache: &mut EvalCache,
) -> (Vec<Candidate>, f64) {
    let mut sorted = stage_c.to_vec();
    sorted.sort_by(|a, b| a.composite_error.partial_cmp(&b.composite_error).unwrap());
    let Some(best) = sorted.first().cloned() else {
        return (Vec::new(), evaluate::DEGENERATE_ERROR);
    };

    let horizon = best.best_horizon;
    let mut combo = vec![best.clone()];
    let mut combo_error = best.composite_error;

    for candidate in sorted.iter().skip(1) {
        if combo.len() >= config.search.max_combo_size as usize {
            break;
        }
        let exprs: Vec<Expr> = combo.iter().map(|c| c.root.clone()).chain(std::iter::once(candidate.root.clone())).collect();
        let score = evaluate::score_combo(&exprs, ctx, close, baseline, horizon, folds, 1.0, cache);
        if score.composite_error < combo_error {
            combo_error = score.composite_error;
            combo.push(candidate.clone());
        }
    }

    (combo, combo_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BacktestConfig, CvConfig, HorizonConfig, SearchConfig};
    use crate::cv::build_folds;

    fn small_config() -> RunConfig {
        RunConfig {
            top_n_symbols: 1,
            symbols: Some(vec!["BTCUSDT".into()]),
            timeframes: vec!["5m".into()],
            history_windows: Default::default(),
            horizon: HorizonConfig { min_bar: 2, max_bar: 20, coarse_step: 4, refine_radius: 2 },
            cv: CvConfig { folds: 3, embargo_bars: 4, purge_bars: 4 },
            search: SearchConfig {
                candidate_pool_size: 12,
                stage_a_keep: 5,
                stage_b_keep: 3,
                tuning_trials: 2,
                max_combo_size: 2,
                novelty_similarity_threshold: 0.85,
                collinearity_threshold: 0.95,
            },
            backtest: BacktestConfig { fee_bps: 5.0, slippage_bps: 2.0, signal_threshold: 0.0005 },
            budget_minutes: 30,
            random_seed: 11,
        }
    }

    #[test]
    fn funnel_runs_end_to_end() {
        let config = small_config();
        let n = 1500;
        let close: Vec<f64> = (0..n).map(|i| 100.0 + (i as f64 * 0.05).sin() * 3.0 + i as f64 * 0.01).collect();
        let volume: Vec<f64> = (0..n).map(|i| 1000.0 + (i % 50) as f64).collect();
        let ctx = Context::new(n)
            .with_field("close", close.clone())
            .with_field("volume", volume);
        let folds = build_folds(n, 3, 20, 4, 4).unwrap();
        let fields = ["close", "volume"];
        let result = run_funnel(&config, "BTCUSDT", "5m", &ctx, &close, &folds, &fields);
        assert!(!result.stage_a.is_empty());
        assert!(result.stage_b.len() <= config.search.stage_b_keep as usize);
        assert!(!result.combo.is_empty());
        assert!(result.combo_composite_error.is_finite());
    }

    #[test]
    fn funnel_deterministic_given_same_seed() {
        let config = small_config();
        let n = 1000;
        let close: Vec<f64> = (0..n).map(|i| 50.0 + (i as f64 * 0.1).cos() * 2.0).collect();
        let ctx = Context::new(n).with_field("close", close.clone());
        let folds = build_folds(n, 3, 20, 4, 4).unwrap();
        let fields = ["close"];
        let r1 = run_funnel(&config, "ETHUSDT", "1h", &ctx, &close, &folds, &fields);
        let r2 = run_funnel(&config, "ETHUSDT", "1h", &ctx, &close, &folds, &fields);
        assert_eq!(r1.stage_a.len(), r2.stage_a.len());
        assert_eq!(
            r1.stage_a.iter().map(|c| c.root.signature()).collect::<Vec<_>>(),
            r2.stage_a.iter().map(|c| c.root.signature()).collect::<Vec<_>>(),
        );
    }
}

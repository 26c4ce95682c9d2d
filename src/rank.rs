//! Per-asset scorecards and the universal combo recommendation (§4.8).

use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct ScoreCard {
    pub symbol: String,
    pub timeframe: String,
    pub combo_signature: String,
    pub composite_error: f64,
    pub directional_hit_rate: f64,
    pub pnl_total: f64,
    pub max_drawdown: f64,
    pub stability_score: f64,
    pub best_horizon: u32,
}

fn std_dev(x: &[f64]) -> f64 {
    let n = x.len() as f64;
    if n == 0.0 {
        return 0.0;
    }
    let mean = x.iter().sum::<f64>() / n;
    (x.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt()
}

/// `stability = 1 / (std(top-5 composite errors) + 1e-6)`.
pub fn stability_score(top5_composite_errors: &[f64]) -> f64 {
    1.0 / (std_dev(top5_composite_errors) + 1e-6)
}

pub fn build_scorecard(
    symbol: &str,
    timeframe: &str,
    combo_signature: String,
    composite_error: f64,
    directional_hit_rate: f64,
    best_horizon: u32,
    backtest: &crate::backtest::BacktestResult,
    top5_composite_errors: &[f64],
) -> ScoreCard {
    ScoreCard {
        symbol: symbol.to_string(),
        timeframe: timeframe.to_string(),
        combo_signature,
        composite_error,
        directional_hit_rate,
        pnl_total: backtest.pnl_total,
        max_drawdown: backtest.max_drawdown,
        stability_score: stability_score(top5_composite_errors),
        best_horizon,
    }
}

/// The combination whose mean composite error across all assets it covers,
/// penalised by `0.05/coverage + 0.001*std(best_horizons)`, is smallest.
/// `total_assets` is the denominator for coverage (assets searched, not
/// just assets where this combo happened to be a top candidate).
pub fn universal_recommendation(
    scorecards: &[ScoreCard],
    total_assets: usize,
) -> Option<(String, f64)> {
    if scorecards.is_empty() || total_assets == 0 {
        return None;
    }
    let mut grouped: HashMap<&str, Vec<&ScoreCard>> = HashMap::new();
    for card in scorecards {
        grouped.entry(card.combo_signature.as_str()).or_default().push(card);
    }

    grouped
        .into_iter()
        .map(|(signature, cards)| {
            let errors: Vec<f64> = cards.iter().map(|c| c.composite_error).collect();
            let horizons: Vec<f64> = cards.iter().map(|c| c.best_horizon as f64).collect();
            let mean_error = errors.iter().sum::<f64>() / errors.len() as f64;
            let coverage = cards.len() as f64 / total_assets as f64;
            let penalty = 0.05 * (1.0 / coverage) + 0.001 * std_dev(&horizons);
            (signature.to_string(), mean_error + penalty)
        })
        .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::BacktestResult;

    fn card(symbol: &str, combo: &str, error: f64) -> ScoreCard {
        build_scorecard(
            symbol,
            "5m",
            combo.to_string(),
            error,
            0.55,
            10,
            &BacktestResult { pnl_total: 0.1, max_drawdown: 0.05, turnover: 1.0, equity_curve: vec![1.0, 1.1] },
            &[error, error + 0.01],
        )
    }

    #[test]
    fn wider_coverage_beats_narrower_tie() {
        let cards = vec![
            card("BTCUSDT", "combo-a", 0.3),
            card("ETHUSDT", "combo-a", 0.3),
            card("SOLUSDT", "combo-b", 0.3),
        ];
        let (winner, _) = universal_recommendation(&cards, 3).unwrap();
        assert_eq!(winner, "combo-a");
    }

    #[test]
    fn stability_score_positive() {
        assert!(stability_score(&[0.1, 0.2, 0.15]) > 0.0);
    }
}

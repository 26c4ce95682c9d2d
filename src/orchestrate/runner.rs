//! Fixed-size worker pools and the per-(symbol, timeframe) research job
//! (§4.12, §5). Cancellation is cooperative: checked at stage boundaries
//! and between per-asset iterations, never preempted mid-fold.

use super::artifacts::{ArtifactType, ArtifactWriter};
use super::store::RunStore;
use super::telemetry::{sample_resources, CpuSampler, RateTracker, Telemetry, TelemetryBus};
use crate::backtest::BacktestResult;
use crate::config::RunConfig;
use crate::cv::build_folds;
use crate::dsl::Context;
use crate::error::{DiscoveryError, Result};
use crate::games::tictactoe::TicTacToe;
use crate::games::GameState;
use crate::market::{Candle, MarketDataClient};
use crate::mcts::{Evaluator, Mcts};
use crate::rank::{build_scorecard, universal_recommendation, ScoreCard};
use crate::search::optimizer::{run_funnel, Candidate, FunnelResult};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Research-run pool: long jobs, max 3 concurrent (§5).
pub const RESEARCH_POOL_SIZE: usize = 3;
/// AI-move pool: interactive MCTS requests, max 4 concurrent (§5). Bounded
/// independently of the research pool so a long-running research job can
/// never starve an interactive move request.
pub const AI_MOVE_POOL_SIZE: usize = 4;

#[derive(Debug, Clone)]
pub struct StageLogEntry {
    pub stage: String,
    pub message: String,
    pub timestamp_secs: u64,
}

pub struct StageLog {
    entries: std::sync::Mutex<Vec<StageLogEntry>>,
    sink: Option<(Arc<Mutex<RunStore>>, String)>,
}

impl StageLog {
    pub fn new() -> Self {
        Self { entries: std::sync::Mutex::new(Vec::new()), sink: None }
    }

    /// A log that mirrors every entry into the persistent `run_logs` table
    /// as it's written, not just in memory.
    pub fn with_store(store: Arc<Mutex<RunStore>>, run_id: impl Into<String>) -> Self {
        Self { entries: std::sync::Mutex::new(Vec::new()), sink: Some((store, run_id.into())) }
    }

    pub fn push(&self, stage: &str, message: &str) {
        let timestamp_secs = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time moves forward")
            .as_secs();
        self.entries.lock().expect("stage log lock poisoned").push(StageLogEntry {
            stage: stage.to_string(),
            message: message.to_string(),
            timestamp_secs,
        });

        if let Some((store, run_id)) = &self.sink {
            if let Err(e) = store.lock().expect("run store lock poisoned").append_log(run_id, stage, message) {
                log::warn!("failed to persist stage log line for {run_id}: {e}");
            }
        }
    }

    pub fn entries(&self) -> Vec<StageLogEntry> {
        self.entries.lock().expect("stage log lock poisoned").clone()
    }
}

impl Default for StageLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Raised when the cancellation token is observed at a stage boundary.
fn check_cancel(cancel: &AtomicBool) -> Result<()> {
    if cancel.load(Ordering::Relaxed) {
        Err(DiscoveryError::Cancelled)
    } else {
        Ok(())
    }
}

fn bars_columnar_json(candles: &[Candle]) -> serde_json::Value {
    serde_json::json!({
        "open_time_ms": candles.iter().map(|c| c.open_time_ms).collect::<Vec<_>>(),
        "open": candles.iter().map(|c| c.open).collect::<Vec<_>>(),
        "high": candles.iter().map(|c| c.high).collect::<Vec<_>>(),
        "low": candles.iter().map(|c| c.low).collect::<Vec<_>>(),
        "close": candles.iter().map(|c| c.close).collect::<Vec<_>>(),
        "volume": candles.iter().map(|c| c.volume).collect::<Vec<_>>(),
    })
}

fn candidates_json(candidates: &[Candidate]) -> Vec<serde_json::Value> {
    candidates
        .iter()
        .map(|c| {
            serde_json::json!({
                "id": c.id,
                "signature": c.root.signature(),
                "complexity": c.complexity,
                "best_horizon": c.best_horizon,
                "composite_error": c.composite_error,
            })
        })
        .collect()
}

fn debug_search_json(funnel: &FunnelResult) -> serde_json::Value {
    serde_json::json!({
        "stage_a": candidates_json(&funnel.stage_a),
        "stage_b": candidates_json(&funnel.stage_b),
        "stage_c": candidates_json(&funnel.stage_c),
        "combo": candidates_json(&funnel.combo),
        "combo_composite_error": funnel.combo_composite_error,
    })
}

fn plot_json(symbol: &str, timeframe: &str, backtest: &BacktestResult) -> serde_json::Value {
    serde_json::json!({
        "symbol": symbol,
        "timeframe": timeframe,
        "equity_curve": backtest.equity_curve,
        "pnl_total": backtest.pnl_total,
        "max_drawdown": backtest.max_drawdown,
        "turnover": backtest.turnover,
    })
}

fn expression_map_json(funnel: &FunnelResult) -> serde_json::Value {
    let map: serde_json::Map<String, serde_json::Value> = funnel
        .combo
        .iter()
        .map(|c| (c.root.signature(), serde_json::Value::String(c.root.to_pine())))
        .collect();
    serde_json::Value::Object(map)
}

/// Writes the four per-job artifact kinds (bars, debug search, plot,
/// expression map) and records each one in the durable index. Best-effort:
/// a write failure is logged, not propagated, since artifacts are
/// supplementary to the scorecard a job returns.
#[allow(clippy::too_many_arguments)]
fn write_job_artifacts(
    writer: &Arc<Mutex<ArtifactWriter>>,
    store: Option<&Arc<Mutex<RunStore>>>,
    run_id: &str,
    symbol: &str,
    timeframe: &str,
    candles: &[Candle],
    funnel: &FunnelResult,
    backtest: &BacktestResult,
) {
    let mut writer = writer.lock().expect("artifact writer lock poisoned");
    let mut record = |kind: ArtifactType, name: String, payload: serde_json::Value| {
        let bytes = match serde_json::to_vec(&payload) {
            Ok(b) => b,
            Err(e) => {
                log::warn!("failed to serialize {} artifact for {symbol}/{timeframe}: {e}", kind.as_str());
                return;
            }
        };
        match writer.write(kind, &name, &bytes) {
            Ok(path) => {
                if let Some(store) = store {
                    let store = store.lock().expect("run store lock poisoned");
                    if let Err(e) = store.record_artifact(run_id, kind.as_str(), &path.to_string_lossy()) {
                        log::warn!("failed to record {} artifact: {e}", kind.as_str());
                    }
                    if kind == ArtifactType::Plot {
                        if let Err(e) = store.upsert_plot(run_id, &format!("{symbol}_{timeframe}"), &payload.to_string()) {
                            log::warn!("failed to persist plot payload: {e}");
                        }
                    }
                }
            }
            Err(e) => log::warn!("failed to write {} artifact for {symbol}/{timeframe}: {e}", kind.as_str()),
        }
    };

    record(ArtifactType::Bars, format!("{symbol}_{timeframe}_bars.json"), bars_columnar_json(candles));
    record(ArtifactType::DebugSearch, format!("{symbol}_{timeframe}_debug.json"), debug_search_json(funnel));
    record(ArtifactType::Plot, format!("{symbol}_{timeframe}_plot.json"), plot_json(symbol, timeframe, backtest));
    record(ArtifactType::ExpressionMap, format!("{symbol}_{timeframe}_expressions.json"), expression_map_json(funnel));
}

/// Runs the full research job for one `(symbol, timeframe)`: fetch bars,
/// build purged CV folds, run the search funnel, backtest the winning
/// combo, build its scorecard, and persist the bars/debug/plot/expression
/// artifacts this job produced along the way. Returns `Cancelled` if the
/// token flips at any stage boundary; partial work already done is simply
/// discarded by the caller (no rollback of already-persisted bars, per §5).
#[allow(clippy::too_many_arguments)]
pub async fn run_research_job(
    config: &RunConfig,
    market: &dyn MarketDataClient,
    symbol: &str,
    timeframe: &str,
    history_days: u32,
    cancel: &AtomicBool,
    log: &StageLog,
    writer: Arc<Mutex<ArtifactWriter>>,
    store: Option<Arc<Mutex<RunStore>>>,
    run_id: &str,
) -> Result<ScoreCard> {
    check_cancel(cancel)?;
    log.push("fetch", &format!("fetching {symbol}/{timeframe}"));

    let step_ms = timeframe_step_ms(timeframe);
    let end_ms = history_days as i64 * 86_400_000;
    let candles = market
        .klines(symbol, timeframe, 0, end_ms, step_ms)
        .await
        .map_err(|_| DiscoveryError::UpstreamFetch(format!("klines fetch failed for {symbol}/{timeframe}")))?;

    check_cancel(cancel)?;
    log.push("prepare", &format!("building context for {symbol}/{timeframe}"));

    let close: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let volume: Vec<f64> = candles.iter().map(|c| c.volume).collect();
    let n = close.len();
    let ctx = Context::new(n).with_field("close", close.clone()).with_field("volume", volume);
    let fields = ["close", "volume"];

    let folds = build_folds(
        n,
        config.cv.folds,
        config.horizon.max_bar as usize,
        config.cv.purge_bars as usize,
        config.cv.embargo_bars as usize,
    )?;

    check_cancel(cancel)?;
    log.push("search", &format!("running search funnel for {symbol}/{timeframe}"));

    let funnel = run_funnel(config, symbol, timeframe, &ctx, &close, &folds, &fields);

    check_cancel(cancel)?;
    log.push("backtest", &format!("backtesting combo for {symbol}/{timeframe}"));

    let baseline = crate::evaluate::baseline_columns(&close);
    let mut cache = crate::evaluate::EvalCache::default();
    let best_horizon = funnel.combo.first().map(|c| c.best_horizon).unwrap_or(config.horizon.min_bar);
    let exprs: Vec<_> = funnel.combo.iter().map(|c| c.root.clone()).collect();
    let score = if exprs.is_empty() {
        return Err(DiscoveryError::EvaluationDegenerate(format!("no surviving candidates for {symbol}/{timeframe}")));
    } else {
        crate::evaluate::score_combo(&exprs, &ctx, &close, &baseline, best_horizon, &folds, 1.0, &mut cache)
    };

    let backtest = crate::backtest::run_backtest(
        &score.y_true,
        &score.y_pred,
        &score.close_ref,
        config.backtest.signal_threshold,
        config.backtest.fee_bps,
        config.backtest.slippage_bps,
    );

    write_job_artifacts(&writer, store.as_ref(), run_id, symbol, timeframe, &candles, &funnel, &backtest);

    let top5: Vec<f64> = funnel.stage_c.iter().map(|c| c.composite_error).take(5).collect();
    let combo_signature = funnel.combo.iter().map(|c| c.root.signature()).collect::<Vec<_>>().join("+");

    log.push("done", &format!("{symbol}/{timeframe} composite_error={:.4}", score.composite_error));

    Ok(build_scorecard(
        symbol,
        timeframe,
        combo_signature,
        score.composite_error,
        score.directional_hit_rate,
        best_horizon,
        &backtest,
        &top5,
    ))
}

fn timeframe_step_ms(timeframe: &str) -> i64 {
    match timeframe {
        "5m" => 5 * 60_000,
        "1h" => 60 * 60_000,
        "4h" => 4 * 60 * 60_000,
        _ => 60_000,
    }
}

/// Drives one run to completion: resolves the symbol universe, iterates
/// `(symbol, timeframe)` jobs bounded by `RESEARCH_POOL_SIZE` concurrent
/// tasks, publishes telemetry, computes the universal recommendation across
/// the collected scorecards, and writes/persists the result-summary
/// artifact.
pub async fn run(
    run_id: &str,
    config: &RunConfig,
    market: Arc<dyn MarketDataClient>,
    runs_root: impl AsRef<std::path::Path>,
    cancel: Arc<AtomicBool>,
    log: Arc<StageLog>,
    telemetry: Arc<TelemetryBus>,
    store: Arc<Mutex<RunStore>>,
) -> Result<Vec<ScoreCard>> {
    let effective = config.scaled();
    let symbols = match &effective.symbols {
        Some(s) => s.clone(),
        None => market
            .top_symbols_by_volume("USDT", effective.top_n_symbols as usize, true)
            .await
            .map_err(|_| DiscoveryError::UpstreamFetch("symbol universe fetch failed".into()))?,
    };
    let total_assets = symbols.len();

    let jobs: Vec<(String, String)> = symbols
        .iter()
        .flat_map(|s| effective.timeframes.iter().map(move |tf| (s.clone(), tf.clone())))
        .collect();
    let total = jobs.len() as u64;

    log.push("init", &format!("run {run_id} starting with {total} jobs"));

    let writer = Arc::new(Mutex::new(
        ArtifactWriter::new(&runs_root, run_id).map_err(|e| DiscoveryError::Internal(e.to_string()))?,
    ));
    let semaphore = Arc::new(tokio::sync::Semaphore::new(RESEARCH_POOL_SIZE));
    let mut handles = Vec::new();
    let mut rate = RateTracker::new();
    let mut cpu = CpuSampler::new();
    let achieved = Arc::new(std::sync::atomic::AtomicU64::new(0));

    for (symbol, timeframe) in jobs {
        let permit = semaphore.clone().acquire_owned().await.expect("semaphore never closed");
        let config = effective.clone();
        let market = market.clone();
        let cancel = cancel.clone();
        let log = log.clone();
        let writer = writer.clone();
        let store = store.clone();
        let run_id = run_id.to_string();
        let achieved = achieved.clone();
        let history_days = *effective.history_windows.get(&timeframe).unwrap_or(&365);

        handles.push(tokio::spawn(async move {
            let _permit = permit;
            let result = run_research_job(
                &config, market.as_ref(), &symbol, &timeframe, history_days, &cancel, &log, writer, Some(store), &run_id,
            )
            .await;
            achieved.fetch_add(1, Ordering::Relaxed);
            result
        }));
    }

    let mut scorecards = Vec::new();
    for (i, handle) in handles.into_iter().enumerate() {
        match handle.await.expect("research job task panicked") {
            Ok(card) => scorecards.push(card),
            Err(DiscoveryError::Cancelled) => {
                log.push("canceled", "run canceled mid-flight");
                break;
            }
            Err(e) if !e.fails_run() => {
                log.push("degenerate", &e.to_string());
            }
            Err(e) => return Err(e),
        }
        rate.record(1);
        let done = achieved.load(Ordering::Relaxed);
        let (cpu_system, cpu_process) = cpu.sample_percent();
        let (ram_used_mb, ram_total_mb, cpu_temp_celsius) = sample_resources();
        telemetry.publish(Telemetry {
            stage: "research".into(),
            working_on: format!("job {}/{}", i + 1, total),
            achieved: done,
            remaining: total.saturating_sub(done),
            overall_progress: done as f64 / total.max(1) as f64,
            stage_progress: done as f64 / total.max(1) as f64,
            elapsed_secs: rate.elapsed_secs(),
            eta_secs: rate.eta_secs(total.saturating_sub(done)),
            cpu_percent_system: cpu_system,
            cpu_percent_process: cpu_process,
            ram_used_mb,
            ram_total_mb,
            cpu_temp_celsius,
        });
    }

    let recommendation = universal_recommendation(&scorecards, total_assets);
    let summary = serde_json::json!({
        "scorecards": scorecards_as_json(&scorecards),
        "universal_recommendation": recommendation.as_ref().map(|(signature, score)| serde_json::json!({
            "combo_signature": signature,
            "score": score,
        })),
    });
    let summary_bytes = serde_json::to_vec_pretty(&summary).expect("scorecards serialize");
    let result_path = {
        let mut w = writer.lock().expect("artifact writer lock poisoned");
        w.write(ArtifactType::ResultSummary, "result_summary.json", &summary_bytes)
            .map_err(|e| DiscoveryError::Internal(e.to_string()))?
    };

    {
        let store = store.lock().expect("run store lock poisoned");
        store
            .record_artifact(run_id, ArtifactType::ResultSummary.as_str(), &result_path.to_string_lossy())
            .map_err(|e| DiscoveryError::Internal(e.to_string()))?;
        store.upsert_result(run_id, &summary.to_string()).map_err(|e| DiscoveryError::Internal(e.to_string()))?;
    }

    log.push("complete", &format!("run {run_id} finished with {} scorecards", scorecards.len()));
    Ok(scorecards)
}

fn scorecards_as_json(cards: &[ScoreCard]) -> Vec<serde_json::Value> {
    cards
        .iter()
        .map(|c| {
            serde_json::json!({
                "symbol": c.symbol,
                "timeframe": c.timeframe,
                "combo_signature": c.combo_signature,
                "composite_error": c.composite_error,
                "directional_hit_rate": c.directional_hit_rate,
                "pnl_total": c.pnl_total,
                "max_drawdown": c.max_drawdown,
                "stability_score": c.stability_score,
                "best_horizon": c.best_horizon,
            })
        })
        .collect()
}

/// Uniform-prior stand-in evaluator for the interactive move endpoint; a
/// trained `Net` can replace this once a model-serving path is wired up to
/// the HTTP boundary.
struct UniformEvaluator;

impl Evaluator<TicTacToe> for UniformEvaluator {
    fn evaluate(&self, _state: &TicTacToe) -> (Vec<f64>, f64, Vec<f64>) {
        (vec![0.0; TicTacToe::action_size()], 0.5, vec![0.0; 8])
    }
}

/// Serves one ad hoc MCTS move request against the AI-move pool (§5):
/// bounded independently of the research pool so interactive latency isn't
/// starved by a long-running research run.
pub async fn request_tictactoe_move(
    pool: &tokio::sync::Semaphore,
    board: [i8; 9],
    to_play: i8,
    sims: usize,
    seed: u64,
) -> Result<HashMap<usize, f64>> {
    let _permit = pool.acquire().await.map_err(|_| DiscoveryError::Internal("AI move pool closed".into()))?;
    let state = TicTacToe::from_board(board, to_play);
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut mcts = Mcts::new(state, &UniformEvaluator, &mut rng);
    mcts.run(&UniformEvaluator, sims, None, |_| {});
    Ok(mcts.policy(1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BacktestConfig, CvConfig, HorizonConfig, SearchConfig};
    use crate::market::Candle;

    struct FakeMarket {
        candles: Vec<Candle>,
    }

    #[async_trait::async_trait]
    impl MarketDataClient for FakeMarket {
        async fn top_symbols_by_volume(&self, _quote: &str, limit: usize, _exclude_leveraged: bool) -> Result<Vec<String>> {
            Ok(vec!["BTCUSDT".to_string()].into_iter().take(limit).collect())
        }

        async fn klines(&self, _symbol: &str, _timeframe: &str, _start_ms: i64, _end_ms: i64, _step_ms: i64) -> Result<Vec<Candle>> {
            Ok(self.candles.clone())
        }
    }

    fn fake_candles(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| Candle {
                open_time_ms: i as i64 * 60_000,
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.0 + (i as f64 * 0.05).sin() * 3.0 + i as f64 * 0.01,
                volume: 1000.0 + (i % 50) as f64,
            })
            .collect()
    }

    fn config() -> RunConfig {
        RunConfig {
            top_n_symbols: 1,
            symbols: Some(vec!["BTCUSDT".into()]),
            timeframes: vec!["5m".into()],
            history_windows: [("5m".into(), 60)].into_iter().collect(),
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

    fn test_writer() -> Arc<Mutex<ArtifactWriter>> {
        let dir = std::env::temp_dir().join(format!("discovery-runner-test-{}-{:?}", std::process::id(), std::thread::current().id()));
        Arc::new(Mutex::new(ArtifactWriter::new(&dir, "run-test").unwrap()))
    }

    #[tokio::test]
    async fn research_job_produces_a_scorecard() {
        let market = FakeMarket { candles: fake_candles(1500) };
        let cancel = AtomicBool::new(false);
        let log = StageLog::new();
        let card = run_research_job(
            &config(), &market, "BTCUSDT", "5m", 60, &cancel, &log, test_writer(), None, "run-test",
        )
        .await
        .unwrap();
        assert_eq!(card.symbol, "BTCUSDT");
        assert!(card.composite_error.is_finite());
    }

    #[tokio::test]
    async fn cancellation_before_start_short_circuits() {
        let market = FakeMarket { candles: fake_candles(1500) };
        let cancel = AtomicBool::new(true);
        let log = StageLog::new();
        let result = run_research_job(
            &config(), &market, "BTCUSDT", "5m", 60, &cancel, &log, test_writer(), None, "run-test",
        )
        .await;
        assert!(matches!(result, Err(DiscoveryError::Cancelled)));
    }

    #[tokio::test]
    async fn research_job_writes_all_four_artifact_kinds() {
        let market = FakeMarket { candles: fake_candles(1500) };
        let cancel = AtomicBool::new(false);
        let log = StageLog::new();
        let writer = test_writer();
        run_research_job(
            &config(), &market, "BTCUSDT", "5m", 60, &cancel, &log, writer.clone(), None, "run-test",
        )
        .await
        .unwrap();
        let index = writer.lock().unwrap().index().to_vec();
        for kind in [ArtifactType::Bars, ArtifactType::DebugSearch, ArtifactType::Plot, ArtifactType::ExpressionMap] {
            assert!(index.iter().any(|(k, _)| *k == kind), "missing artifact kind {kind:?}");
        }
    }

    #[tokio::test]
    async fn ai_move_pool_returns_a_policy() {
        let pool = tokio::sync::Semaphore::new(AI_MOVE_POOL_SIZE);
        let policy = request_tictactoe_move(&pool, [0; 9], 1, 20, 7).await.unwrap();
        assert!(!policy.is_empty());
        let sum: f64 = policy.values().sum();
        assert!((sum - 1.0).abs() < 1e-6);
    }
}

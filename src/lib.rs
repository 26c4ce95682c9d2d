pub mod backtest;
pub mod config;
pub mod cv;
pub mod dsl;
pub mod error;
pub mod evaluate;
pub mod forecast;
pub mod games;
pub mod generate;
pub mod market;
pub mod mcts;
pub mod model;
pub mod novelty;
pub mod rank;
pub mod replay;
pub mod search;
pub mod selfplay;
pub mod train;

#[cfg(feature = "server")]
pub mod orchestrate;

/// dimensional aliases
pub type Symbol = String;
pub type Timeframe = String;

// search funnel constants
const BUDGET_SCALE_DIVISOR: f64 = 4.0;
const BUDGET_SCALE_MIN: f64 = 0.35;
const BUDGET_SCALE_MAX: f64 = 1.4;

/// initialize logging; combined term+file logger for long-running server
/// binaries, matching the split Debug-to-file / Info-to-terminal split.
#[cfg(feature = "server")]
pub fn init_logging() {
    std::fs::create_dir_all("logs").expect("create logs directory");
    let config = simplelog::ConfigBuilder::new()
        .set_location_level(log::LevelFilter::Off)
        .set_target_level(log::LevelFilter::Off)
        .set_thread_level(log::LevelFilter::Off)
        .build();
    let time = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("time moves forward")
        .as_secs();
    let file = simplelog::WriteLogger::new(
        log::LevelFilter::Debug,
        config.clone(),
        std::fs::File::create(format!("logs/{}.log", time)).expect("create log file"),
    );
    let term = simplelog::TermLogger::new(
        log::LevelFilter::Info,
        config,
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );
    simplelog::CombinedLogger::init(vec![term, file]).expect("initialize logger");
}

/// trait for seeded deterministic construction, mirrored on every stochastic
/// component (tree sampling, mutation, self-play, Dirichlet noise): every
/// instance draws from one seeded PRNG, never global random state.
pub trait Seeded {
    fn seeded(seed: u64) -> Self;
}

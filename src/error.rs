//! Typed error taxonomy for the orchestrator boundary. Everywhere else in
//! the crate keeps propagating with `anyhow::Result`/`?`; the orchestrator
//! is the single place that matches on these variants to persist run status.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("leakage detected: {0}")]
    Leakage(String),

    #[error("upstream fetch failed after retries: {0}")]
    UpstreamFetch(String),

    #[error("all folds degenerate for candidate: {0}")]
    EvaluationDegenerate(String),

    #[error("numerically singular, fell back to pseudo-inverse: {0}")]
    NumericalSingular(String),

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl DiscoveryError {
    /// Whether this kind fails the enclosing run outright (vs. being
    /// absorbed and scored as a degenerate candidate).
    pub fn fails_run(&self) -> bool {
        !matches!(self, DiscoveryError::EvaluationDegenerate(_))
    }
}

pub type Result<T> = std::result::Result<T, DiscoveryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluation_degenerate_does_not_fail_run() {
        let e = DiscoveryError::EvaluationDegenerate("all folds skipped".into());
        assert!(!e.fails_run());
    }

    #[test]
    fn leakage_fails_run() {
        let e = DiscoveryError::Leakage("train/val overlap".into());
        assert!(e.fails_run());
    }
}

//! Exchange market data client: symbol universe discovery and paginated
//! OHLCV history fetch, with linear-backoff retry (§6 supplement).

use crate::error::{DiscoveryError, Result};
use serde::Deserialize;
use std::time::Duration;

const MAX_PAGINATION_ITERATIONS: usize = 5000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candle {
    pub open_time_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Boundary trait so callers can substitute a deterministic fake in tests
/// without reaching over HTTP.
#[async_trait::async_trait]
pub trait MarketDataClient: Send + Sync {
    async fn top_symbols_by_volume(&self, quote: &str, limit: usize, exclude_leveraged: bool) -> Result<Vec<String>>;
    async fn klines(&self, symbol: &str, timeframe: &str, start_ms: i64, end_ms: i64, step_ms: i64) -> Result<Vec<Candle>>;
}

#[derive(Debug, Deserialize)]
struct Ticker24h {
    symbol: String,
    #[serde(rename = "quoteVolume")]
    quote_volume: String,
}

pub struct HttpMarketDataClient {
    base_url: String,
    max_retries: u32,
    http: reqwest::Client,
}

impl HttpMarketDataClient {
    pub fn new(base_url: impl Into<String>, max_retries: u32) -> Self {
        Self { base_url: base_url.into(), max_retries, http: reqwest::Client::new() }
    }

    async fn get_with_retry(&self, path: &str) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt = 0;
        loop {
            match self.http.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS && attempt < self.max_retries => {
                    attempt += 1;
                    std::thread::sleep(Duration::from_millis(250 * attempt as u64));
                }
                Ok(resp) => {
                    return Err(DiscoveryError::UpstreamFetch(format!("{} -> status {}", url, resp.status())));
                }
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    log::warn!("market data transport error ({attempt}/{}): {e}", self.max_retries);
                    std::thread::sleep(Duration::from_millis(250 * attempt as u64));
                }
                Err(e) => return Err(DiscoveryError::UpstreamFetch(e.to_string())),
            }
        }
    }
}

/// Leveraged-token suffixes stripped from the discovery universe; these
/// symbols decay by design and would poison a return-forecasting corpus.
const LEVERAGED_SUFFIXES: [&str; 4] = ["UP", "DOWN", "BULL", "BEAR"];

fn is_leveraged(symbol: &str, quote: &str) -> bool {
    let base = symbol.strip_suffix(quote).unwrap_or(symbol);
    LEVERAGED_SUFFIXES.iter().any(|suf| base.ends_with(suf))
}

#[async_trait::async_trait]
impl MarketDataClient for HttpMarketDataClient {
    async fn top_symbols_by_volume(&self, quote: &str, limit: usize, exclude_leveraged: bool) -> Result<Vec<String>> {
        let resp = self.get_with_retry("/api/v3/ticker/24hr").await?;
        let tickers: Vec<Ticker24h> = resp
            .json()
            .await
            .map_err(|e| DiscoveryError::UpstreamFetch(format!("malformed ticker payload: {e}")))?;

        let mut filtered: Vec<(String, f64)> = tickers
            .into_iter()
            .filter(|t| t.symbol.ends_with(quote))
            .filter(|t| !exclude_leveraged || !is_leveraged(&t.symbol, quote))
            .filter_map(|t| t.quote_volume.parse::<f64>().ok().map(|v| (t.symbol, v)))
            .collect();

        filtered.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(filtered.into_iter().take(limit).map(|(s, _)| s).collect())
    }

    async fn klines(&self, symbol: &str, timeframe: &str, start_ms: i64, end_ms: i64, step_ms: i64) -> Result<Vec<Candle>> {
        let mut out = Vec::new();
        let mut cursor = start_ms;
        let mut iterations = 0;

        while cursor < end_ms && iterations < MAX_PAGINATION_ITERATIONS {
            iterations += 1;
            let path = format!(
                "/api/v3/klines?symbol={symbol}&interval={timeframe}&startTime={cursor}&endTime={end_ms}&limit=1000"
            );
            let resp = self.get_with_retry(&path).await?;
            let raw: Vec<(i64, String, String, String, String, String)> = resp
                .json()
                .await
                .map_err(|e| DiscoveryError::UpstreamFetch(format!("malformed kline payload: {e}")))?;

            if raw.is_empty() {
                break;
            }

            let page: Vec<Candle> = raw
                .into_iter()
                .filter_map(|(open_time_ms, open, high, low, close, volume)| {
                    Some(Candle {
                        open_time_ms,
                        open: open.parse().ok()?,
                        high: high.parse().ok()?,
                        low: low.parse().ok()?,
                        close: close.parse().ok()?,
                        volume: volume.parse().ok()?,
                    })
                })
                .collect();

            let underfull = page.len() < 1000;
            let last_open_time = page.last().map(|c| c.open_time_ms);
            out.extend(page);

            match last_open_time {
                Some(t) => cursor = t + step_ms,
                None => break,
            }
            if underfull {
                break;
            }
        }

        if iterations >= MAX_PAGINATION_ITERATIONS {
            log::warn!("klines pagination for {symbol}/{timeframe} hit the {MAX_PAGINATION_ITERATIONS}-iteration cap");
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leveraged_tokens_are_detected() {
        assert!(is_leveraged("BTCUPUSDT", "USDT"));
        assert!(is_leveraged("ETHBEARUSDT", "USDT"));
        assert!(!is_leveraged("BTCUSDT", "USDT"));
    }
}

//! Live telemetry: 1 Hz ticker plus edge-triggered snapshots on stage
//! transitions (§4.12, §5). Resource sampling is best-effort and never
//! fails the run — absent sensors just mean an absent field.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Telemetry {
    pub stage: String,
    pub working_on: String,
    pub achieved: u64,
    pub remaining: u64,
    pub overall_progress: f64,
    pub stage_progress: f64,
    pub elapsed_secs: f64,
    pub eta_secs: Option<f64>,
    pub cpu_percent_system: Option<f64>,
    pub cpu_percent_process: Option<f64>,
    pub ram_used_mb: Option<f64>,
    pub ram_total_mb: Option<f64>,
    pub cpu_temp_celsius: Option<f64>,
}

/// Tracks throughput with exponential smoothing so ETA doesn't jitter on a
/// single slow or fast unit of work.
pub struct RateTracker {
    started: Instant,
    last_tick: Instant,
    smoothed_rate: f64,
    alpha: f64,
}

impl Default for RateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RateTracker {
    pub fn new() -> Self {
        let now = Instant::now();
        Self { started: now, last_tick: now, smoothed_rate: 0.0, alpha: 0.3 }
    }

    /// Records that `delta` units of work completed since the last tick.
    pub fn record(&mut self, delta: u64) {
        let now = Instant::now();
        let dt = now.duration_since(self.last_tick).as_secs_f64().max(1e-6);
        let instant_rate = delta as f64 / dt;
        self.smoothed_rate = self.alpha * instant_rate + (1.0 - self.alpha) * self.smoothed_rate;
        self.last_tick = now;
    }

    pub fn eta_secs(&self, remaining: u64) -> Option<f64> {
        if self.smoothed_rate <= 1e-9 {
            None
        } else {
            Some(remaining as f64 / self.smoothed_rate)
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }
}

pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Serialises snapshot publication through a single lock so consumers
/// observe monotonic `overall_progress` (§5 ordering guarantee).
pub struct TelemetryBus {
    latest: Mutex<Option<Telemetry>>,
}

impl TelemetryBus {
    pub fn new() -> Self {
        Self { latest: Mutex::new(None) }
    }

    pub fn publish(&self, snapshot: Telemetry) {
        let mut guard = self.latest.lock().expect("telemetry lock poisoned");
        *guard = Some(snapshot);
    }

    pub fn latest(&self) -> Option<Telemetry> {
        self.latest.lock().expect("telemetry lock poisoned").clone()
    }
}

impl Default for TelemetryBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Best-effort resource sampling. Returns `None` per field on platforms
/// without the corresponding `/proc` entry (e.g. non-Linux); this never
/// raises an error because telemetry is advisory, not load-bearing.
pub fn sample_resources() -> (Option<f64>, Option<f64>, Option<f64>) {
    let ram = read_ram_used_total_mb();
    let cpu_temp = read_cpu_temp_celsius();
    (ram.map(|(used, _)| used), ram.map(|(_, total)| total), cpu_temp)
}

/// Linux clock ticks per second (`sysconf(_SC_CLK_TCK)`), fixed at 100 on
/// effectively every Linux build; no dependency in the pack exposes the
/// runtime value, so it's taken as a constant like the teacher's telemetry
/// sampling elsewhere in this module.
const CLK_TCK: f64 = 100.0;

/// CPU% (system + process), computed from successive `/proc` reads. The
/// first call always returns `(None, None)` since a percentage needs a
/// delta; from the second call on it reports usage since the prior sample.
pub struct CpuSampler {
    prev_system: Option<(u64, u64)>,
    prev_process: Option<(u64, Instant)>,
}

impl CpuSampler {
    pub fn new() -> Self {
        Self { prev_system: None, prev_process: None }
    }

    pub fn sample_percent(&mut self) -> (Option<f64>, Option<f64>) {
        (self.sample_system(), self.sample_process())
    }

    fn sample_system(&mut self) -> Option<f64> {
        let text = std::fs::read_to_string("/proc/stat").ok()?;
        let line = text.lines().next()?;
        let fields: Vec<u64> = line.strip_prefix("cpu ")?.split_whitespace().filter_map(|f| f.parse().ok()).collect();
        if fields.len() < 4 {
            return None;
        }
        let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
        let total: u64 = fields.iter().sum();
        let busy = total.saturating_sub(idle);

        let percent = self.prev_system.and_then(|(prev_busy, prev_total)| {
            let d_total = total.saturating_sub(prev_total);
            let d_busy = busy.saturating_sub(prev_busy);
            if d_total == 0 {
                None
            } else {
                Some(d_busy as f64 / d_total as f64 * 100.0)
            }
        });
        self.prev_system = Some((busy, total));
        percent
    }

    fn sample_process(&mut self) -> Option<f64> {
        let text = std::fs::read_to_string("/proc/self/stat").ok()?;
        let after_comm = text.rsplit_once(')')?.1;
        let fields: Vec<&str> = after_comm.split_whitespace().collect();
        let utime: u64 = fields.get(11)?.parse().ok()?;
        let stime: u64 = fields.get(12)?.parse().ok()?;
        let ticks = utime + stime;
        let now = Instant::now();

        let percent = self.prev_process.and_then(|(prev_ticks, prev_time)| {
            let dt = now.duration_since(prev_time).as_secs_f64();
            if dt <= 0.0 {
                None
            } else {
                Some((ticks.saturating_sub(prev_ticks) as f64 / CLK_TCK) / dt * 100.0)
            }
        });
        self.prev_process = Some((ticks, now));
        percent
    }
}

impl Default for CpuSampler {
    fn default() -> Self {
        Self::new()
    }
}

fn read_ram_used_total_mb() -> Option<(f64, f64)> {
    let text = std::fs::read_to_string("/proc/meminfo").ok()?;
    let mut total_kb = None;
    let mut available_kb = None;
    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            total_kb = parse_kb(rest);
        } else if let Some(rest) = line.strip_prefix("MemAvailable:") {
            available_kb = parse_kb(rest);
        }
    }
    let total = total_kb?;
    let available = available_kb?;
    Some(((total - available) / 1024.0, total / 1024.0))
}

fn parse_kb(field: &str) -> Option<f64> {
    field.trim().trim_end_matches(" kB").trim().parse::<f64>().ok()
}

fn read_cpu_temp_celsius() -> Option<f64> {
    let text = std::fs::read_to_string("/sys/class/thermal/thermal_zone0/temp").ok()?;
    text.trim().parse::<f64>().ok().map(|millidegrees| millidegrees / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_tracker_eta_shrinks_as_work_completes() {
        let mut tracker = RateTracker::new();
        std::thread::sleep(Duration::from_millis(10));
        tracker.record(5);
        let eta_full = tracker.eta_secs(100);
        let eta_partial = tracker.eta_secs(10);
        assert!(eta_full.is_some());
        assert!(eta_partial.unwrap() < eta_full.unwrap());
    }

    #[test]
    fn cpu_sampler_first_call_has_no_baseline() {
        let mut sampler = CpuSampler::new();
        let (system, process) = sampler.sample_percent();
        assert!(system.is_none());
        assert!(process.is_none());
    }

    #[test]
    fn cpu_sampler_second_call_reports_a_percentage() {
        let mut sampler = CpuSampler::new();
        sampler.sample_percent();
        std::thread::sleep(Duration::from_millis(20));
        let (_, process) = sampler.sample_percent();
        assert!(process.is_some());
        assert!(process.unwrap() >= 0.0);
    }

    #[test]
    fn telemetry_bus_publishes_latest_only() {
        let bus = TelemetryBus::new();
        assert!(bus.latest().is_none());
        bus.publish(Telemetry {
            stage: "stage_a".into(),
            working_on: "BTCUSDT/1h".into(),
            achieved: 1,
            remaining: 9,
            overall_progress: 0.1,
            stage_progress: 0.1,
            elapsed_secs: 1.0,
            eta_secs: Some(9.0),
            cpu_percent_system: None,
            cpu_percent_process: None,
            ram_used_mb: None,
            ram_total_mb: None,
            cpu_temp_celsius: None,
        });
        assert_eq!(bus.latest().unwrap().stage, "stage_a");
    }
}

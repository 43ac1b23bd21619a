//! Engine configuration.
//!
//! Everything here is plain data with serde derives; the binary loads it
//! from a JSON file, tests use `default_test()`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Observed window length in days, including the as-of day.
    pub history_days: u32,
    /// Forecast horizon in days beyond the as-of day.
    pub forecast_days: u32,
    /// Minimum simulated-day gap before an unchanged-evidence alert of the
    /// same fingerprint is re-emitted instead of suppressed.
    pub cooldown_days: i64,
    /// Cap on the simulation window derived from observed data.
    pub simulation_window_days: i64,
    /// Fraction of capacity each ingredient is seeded at on reset.
    pub seed_fill_ratio: f64,
    /// Deterministic step budget per script invocation.
    pub script_fuel: u64,
    /// Wall-clock backstop per script invocation, in milliseconds.
    pub script_timeout_ms: u64,
    /// Worker threads for the backtest/compare fan-out.
    pub compare_workers: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_days: 7,
            forecast_days: 7,
            cooldown_days: 1,
            simulation_window_days: 30,
            seed_fill_ratio: 0.9,
            script_fuel: 2_000_000,
            script_timeout_ms: 250,
            compare_workers: 4,
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file. Missing fields fall back to defaults.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Config with defaults suitable for unit tests: tight fuel so runaway
    /// scripts fail fast.
    pub fn default_test() -> Self {
        Self {
            script_fuel: 200_000,
            script_timeout_ms: 1_000,
            compare_workers: 2,
            ..Self::default()
        }
    }
}

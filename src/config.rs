use crate::data_structures::Severity;
use crate::error::{EngineError, EngineResult};
use crate::global_variables::*;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Numeric policy of the preemption engine. Distances are in km, durations in ms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Max perpendicular distance from the route segment for a signal to be on the corridor.
    pub corridor_width_km: f64,
    /// Requests farther than this are deferred.
    pub prepare_band_km: f64,
    /// At or inside this distance the signal must be green.
    pub immediate_band_km: f64,
    pub max_active_signals: usize,
    pub green_time_ms: u64,
    pub cooldown_ms: u64,
    pub suppression_ms: u64,
    pub distance_epsilon_km: f64,
    pub decision_log_capacity: usize,
    pub decision_tail_len: usize,
    pub signal_history_len: usize,
    pub min_priority_severity: Severity,
    pub timer_tick_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            corridor_width_km: DEFAULT_CORRIDOR_WIDTH_KM,
            prepare_band_km: DEFAULT_PREPARE_BAND_KM,
            immediate_band_km: DEFAULT_IMMEDIATE_BAND_KM,
            max_active_signals: DEFAULT_MAX_ACTIVE_SIGNALS,
            green_time_ms: DEFAULT_GREEN_TIME_MS,
            cooldown_ms: DEFAULT_COOLDOWN_MS,
            suppression_ms: DEFAULT_SUPPRESSION_MS,
            distance_epsilon_km: DEFAULT_DISTANCE_EPSILON_KM,
            decision_log_capacity: DEFAULT_DECISION_LOG_CAPACITY,
            decision_tail_len: DEFAULT_DECISION_TAIL_LEN,
            signal_history_len: DEFAULT_SIGNAL_HISTORY_LEN,
            min_priority_severity: Severity::Low,
            timer_tick_ms: DEFAULT_TIMER_TICK_MS,
        }
    }
}

impl EngineConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let file = File::open(path.as_ref())?;
        let config: EngineConfig = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads the file named by `GREEN_CORRIDOR_CONFIG`, or the defaults when unset.
    pub fn from_env() -> EngineResult<Self> {
        match std::env::var(ENV_CONFIG_PATH) {
            Ok(path) => Self::from_json_file(path),
            Err(_) => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        let positive = [
            ("corridor_width_km", self.corridor_width_km),
            ("prepare_band_km", self.prepare_band_km),
            ("immediate_band_km", self.immediate_band_km),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(EngineError::Config(format!("{} must be positive", name)));
            }
        }
        if self.immediate_band_km > self.prepare_band_km {
            return Err(EngineError::Config(
                "immediate_band_km must not exceed prepare_band_km".to_string(),
            ));
        }
        if !self.distance_epsilon_km.is_finite() || self.distance_epsilon_km < 0.0 {
            return Err(EngineError::Config(
                "distance_epsilon_km must be non-negative".to_string(),
            ));
        }
        if self.max_active_signals == 0
            || self.decision_log_capacity == 0
            || self.signal_history_len == 0
        {
            return Err(EngineError::Config("capacities must be at least 1".to_string()));
        }
        if self.timer_tick_ms == 0 {
            return Err(EngineError::Config("timer_tick_ms must be at least 1".to_string()));
        }
        let durations = [
            ("green_time_ms", self.green_time_ms),
            ("cooldown_ms", self.cooldown_ms),
            ("suppression_ms", self.suppression_ms),
            ("timer_tick_ms", self.timer_tick_ms),
        ];
        for (name, value) in durations {
            if value > MAX_DURATION_MS {
                return Err(EngineError::Config(format!(
                    "{} must not exceed {} ms",
                    name, MAX_DURATION_MS
                )));
            }
        }
        if self.green_time_ms == 0 || self.suppression_ms == 0 {
            return Err(EngineError::Config(
                "green_time_ms and suppression_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "green_time_ms": 30000, "min_priority_severity": "HIGH" }}"#).unwrap();

        let config = EngineConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.green_time_ms, 30_000);
        assert_eq!(config.min_priority_severity, Severity::High);
        assert_eq!(config.prepare_band_km, DEFAULT_PREPARE_BAND_KM);
    }

    #[test]
    fn out_of_range_durations_are_rejected() {
        let huge = EngineConfig {
            green_time_ms: u64::MAX,
            ..EngineConfig::default()
        };
        assert!(matches!(huge.validate(), Err(EngineError::Config(_))));

        let no_suppression = EngineConfig {
            suppression_ms: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(no_suppression.validate(), Err(EngineError::Config(_))));

        let day = EngineConfig {
            cooldown_ms: MAX_DURATION_MS,
            ..EngineConfig::default()
        };
        assert!(day.validate().is_ok());
    }

    #[test]
    fn inverted_bands_are_rejected() {
        let config = EngineConfig {
            immediate_band_km: 2.0,
            prepare_band_km: 1.0,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
    }
}

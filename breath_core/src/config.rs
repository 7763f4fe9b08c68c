//! Configuration file support for breathe.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/breathe/config.toml`.
//! Every field has a default, so a partial file only overrides what it names.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub kernel: KernelConfig,

    #[serde(default)]
    pub estimator: EstimatorConfig,

    #[serde(default)]
    pub safety: SafetyConfig,

    #[serde(default)]
    pub patterns: PatternsConfig,
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Kernel orchestration parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KernelConfig {
    /// Events kept in the in-memory log before the oldest is evicted
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,

    /// Largest frame step a driver should pass to `tick`
    #[serde(default = "default_max_tick_dt")]
    pub max_tick_dt: f64,

    /// Frame rate used by the simulated session driver
    #[serde(default = "default_frames_per_second")]
    pub frames_per_second: u32,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            log_capacity: default_log_capacity(),
            max_tick_dt: default_max_tick_dt(),
            frames_per_second: default_frames_per_second(),
        }
    }
}

/// Time constants and noise terms for the state estimator
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EstimatorConfig {
    pub tau_arousal: f64,
    pub tau_attention: f64,
    pub tau_rhythm: f64,
    pub process_noise_arousal: f64,
    pub process_noise_attention: f64,
    pub process_noise_rhythm: f64,
    pub measurement_noise_hr: f64,
    pub measurement_noise_attention: f64,
    /// Readings at or below this confidence carry no information
    pub hr_confidence_threshold: f64,
    pub variance_floor: f64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            tau_arousal: 15.0,
            tau_attention: 5.0,
            tau_rhythm: 10.0,
            process_noise_arousal: 0.01,
            process_noise_attention: 0.02,
            process_noise_rhythm: 0.01,
            measurement_noise_hr: 0.1,
            measurement_noise_attention: 0.05,
            hr_confidence_threshold: 0.5,
            variance_floor: 0.05,
        }
    }
}

/// Safety guard, circuit breaker and tier gating thresholds
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SafetyConfig {
    pub emergency_prediction_error: f64,
    pub emergency_min_session_secs: f64,
    pub success_min_duration_secs: f64,
    pub success_max_prediction_error: f64,
    /// Breaker trips once the stress score exceeds this value
    pub stress_threshold: u32,
    pub lock_hours: f64,
    pub quality_session_secs: f64,
    pub tier2_quality_sessions: usize,
    pub tier2_min_resonance: f64,
    pub tier3_quality_sessions: usize,
    pub tier3_perfect_sessions: usize,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            emergency_prediction_error: 0.95,
            emergency_min_session_secs: 10.0,
            success_min_duration_secs: 45.0,
            success_max_prediction_error: 0.5,
            stress_threshold: 5,
            lock_hours: 24.0,
            quality_session_secs: 60.0,
            tier2_quality_sessions: 5,
            tier2_min_resonance: 0.4,
            tier3_quality_sessions: 20,
            tier3_perfect_sessions: 5,
        }
    }
}

impl SafetyConfig {
    pub fn lock_seconds(&self) -> f64 {
        self.lock_hours * 3600.0
    }
}

/// User-defined breathing pattern
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CustomPattern {
    pub id: String,
    pub label: String,
    pub inhale: f64,
    #[serde(default)]
    pub hold_in: f64,
    pub exhale: f64,
    #[serde(default)]
    pub hold_out: f64,
    #[serde(default = "default_custom_tier")]
    pub tier: u8,
    #[serde(default = "default_custom_cycles")]
    pub recommended_cycles: u32,
    #[serde(default)]
    pub target: crate::TargetProfile,
}

/// Pattern catalog extensions
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct PatternsConfig {
    #[serde(default)]
    pub custom: Vec<CustomPattern>,
}

// Default value functions
fn default_data_dir() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(|| {
        std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(".local/share"))
            .unwrap_or_else(|| PathBuf::from("."))
    });
    base.join("breathe")
}

fn default_log_capacity() -> usize {
    1000
}

fn default_max_tick_dt() -> f64 {
    0.1
}

fn default_frames_per_second() -> u32 {
    10
}

fn default_custom_tier() -> u8 {
    1
}

fn default_custom_cycles() -> u32 {
    6
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!(
                "No config file found at {:?}, using defaults",
                config_path
            );
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Reject values that would break the estimator or the kernel
    pub fn validate(&self) -> Result<()> {
        let est = &self.estimator;
        for (name, tau) in [
            ("tau_arousal", est.tau_arousal),
            ("tau_attention", est.tau_attention),
            ("tau_rhythm", est.tau_rhythm),
        ] {
            if !(tau.is_finite() && tau > 0.0) {
                return Err(Error::Config(format!("estimator.{} must be > 0", name)));
            }
        }
        if !(est.measurement_noise_hr > 0.0 && est.measurement_noise_attention > 0.0) {
            return Err(Error::Config(
                "estimator measurement noise must be > 0".into(),
            ));
        }
        if self.kernel.log_capacity == 0 {
            return Err(Error::Config("kernel.log_capacity must be > 0".into()));
        }
        if !(self.kernel.max_tick_dt > 0.0) || self.kernel.frames_per_second == 0 {
            return Err(Error::Config(
                "kernel.max_tick_dt and kernel.frames_per_second must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir().unwrap_or_else(|| {
            std::env::var_os("HOME")
                .map(|home| PathBuf::from(home).join(".config"))
                .unwrap_or_else(|| PathBuf::from("."))
        });
        base.join("breathe").join("config.toml")
    }

    /// Save the current configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.kernel.log_capacity, 1000);
        assert_eq!(config.estimator.tau_arousal, 15.0);
        assert_eq!(config.safety.stress_threshold, 5);
        assert_eq!(config.safety.lock_seconds(), 86_400.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_roundtrip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");

        let mut config = Config::default();
        config.safety.lock_hours = 12.0;
        config.save_to(&path).unwrap();

        let parsed = Config::load_from(&path).unwrap();
        assert_eq!(parsed.safety.lock_hours, 12.0);
        assert_eq!(parsed.estimator, config.estimator);
    }

    #[test]
    fn test_partial_config() {
        let toml_str = r#"
[estimator]
tau_attention = 3.0

[[patterns.custom]]
id = "long-exhale"
label = "Long Exhale"
inhale = 3
exhale = 9
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.estimator.tau_attention, 3.0);
        assert_eq!(config.estimator.tau_arousal, 15.0); // default
        assert_eq!(config.patterns.custom.len(), 1);
        assert_eq!(config.patterns.custom[0].tier, 1);
        assert_eq!(config.patterns.custom[0].hold_in, 0.0);
    }

    #[test]
    fn test_validate_rejects_zero_tau() {
        let mut config = Config::default();
        config.estimator.tau_rhythm = 0.0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}

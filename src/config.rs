//! Runtime configuration using Figment.
//!
//! Configuration is layered:
//! 1. built-in defaults (every field has one),
//! 2. a TOML file (`vna.toml` unless another path is given),
//! 3. environment variables prefixed with `VNA_`, nested with `__`,
//!    e.g. `VNA_SERIAL__PORT=/dev/ttyACM1` or `VNA_SWEEP__MAX_RETRIES=5`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::calibration::InterpolationPolicy;
use crate::frequency::SweepSpacing;
use crate::result::{Error, Result};

pub const DEFAULT_CONFIG_FILE: &str = "vna.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VnaConfig {
    pub serial: SerialSettings,
    pub sweep: SweepSettings,
    pub calibration: CalibrationSettings,
    pub logging: LoggingConfig,
}

/// Serial link to the analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    pub port: String,
    pub baud_rate: u32,
    /// How long a single read may block before the driver checks its deadline.
    pub poll_interval_ms: u64,
    /// Deadline for one complete command exchange, including a full segment.
    pub read_timeout_ms: u64,
}

impl Default for SerialSettings {
    fn default() -> Self {
        SerialSettings {
            port: "/dev/ttyACM0".to_string(),
            baud_rate: 115_200,
            poll_interval_ms: 50,
            read_timeout_ms: 5_000,
        }
    }
}

impl SerialSettings {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Defaults for sweeps requested without explicit parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepSettings {
    pub start_hz: u64,
    pub stop_hz: u64,
    pub points: usize,
    pub spacing: SweepSpacing,
    pub averages: usize,
    /// Retries per segment before the sweep is aborted.
    pub max_retries: u32,
    /// Capacity of the sweep worker's request queue.
    pub queue_depth: usize,
}

impl Default for SweepSettings {
    fn default() -> Self {
        SweepSettings {
            start_hz: 50_000,
            stop_hz: 900_000_000,
            points: 101,
            spacing: SweepSpacing::Linear,
            averages: 1,
            max_retries: 3,
            queue_depth: 8,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationSettings {
    /// Calibration loaded at startup, if any.
    pub file: Option<PathBuf>,
    pub interpolation: InterpolationPolicy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is not set, e.g. `info` or `vna_core=debug`.
    pub level: String,
    pub format: LogFormat,
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            ansi: true,
        }
    }
}

impl VnaConfig {
    /// Loads `vna.toml` from the working directory (if present) and the environment.
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: VnaConfig = Self::figment(path.as_ref())
            .extract()
            .map_err(|e| Error::Config(Box::new(e)))?;
        config.validate()?;
        Ok(config)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(VnaConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("VNA_").split("__"))
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| Err(Error::Config(Box::new(figment::Error::from(message))));
        if self.serial.baud_rate == 0 {
            return invalid("serial.baud_rate must be > 0".to_string());
        }
        if self.serial.read_timeout_ms < self.serial.poll_interval_ms {
            return invalid(format!(
                "serial.read_timeout_ms ({}) is shorter than serial.poll_interval_ms ({})",
                self.serial.read_timeout_ms, self.serial.poll_interval_ms
            ));
        }
        if self.sweep.averages == 0 {
            return invalid("sweep.averages must be at least 1".to_string());
        }
        if self.sweep.queue_depth == 0 {
            return invalid("sweep.queue_depth must be at least 1".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_without_file() {
        Jail::expect_with(|_jail| {
            let config = VnaConfig::load_from("missing.toml").unwrap();
            assert_eq!(config, VnaConfig::default());
            assert_eq!(config.serial.baud_rate, 115_200);
            Ok(())
        });
    }

    #[test]
    fn file_and_env_layers() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "vna.toml",
                r#"
                [serial]
                port = "/dev/ttyUSB3"

                [sweep]
                points = 401
                spacing = "logarithmic"

                [calibration]
                interpolation = "linear"
                "#,
            )?;
            jail.set_env("VNA_SWEEP__MAX_RETRIES", "7");
            jail.set_env("VNA_LOGGING__FORMAT", "json");

            let config = VnaConfig::load().unwrap();
            assert_eq!(config.serial.port, "/dev/ttyUSB3");
            assert_eq!(config.serial.baud_rate, 115_200);
            assert_eq!(config.sweep.points, 401);
            assert_eq!(config.sweep.spacing, SweepSpacing::Logarithmic);
            assert_eq!(config.sweep.max_retries, 7);
            assert_eq!(config.calibration.interpolation, InterpolationPolicy::Linear);
            assert_eq!(config.logging.format, LogFormat::Json);
            Ok(())
        });
    }

    #[test]
    fn rejects_zero_averages() {
        Jail::expect_with(|jail| {
            jail.create_file("vna.toml", "[sweep]\naverages = 0\n")?;
            assert!(matches!(VnaConfig::load(), Err(Error::Config(_))));
            Ok(())
        });
    }
}

//! Beamline configuration using Figment
//!
//! Configuration is loaded from:
//! 1. `config/mxtools.toml` (base configuration)
//! 2. Environment variables prefixed with `MXTOOLS_`, nested with `__`
//!
//! Every section has defaults matching the FMX beamline, so a file only needs
//! to list what differs.
//!
//! # Example
//! ```no_run
//! use mxtools::config::BeamlineConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // MXTOOLS_EIGER__WRITE_PATH_TEMPLATE=/data/{date}/ overrides the file
//! let config = BeamlineConfig::load()?;
//! config.validate()?;
//! println!("Detector: {}", config.eiger.prefix);
//! # Ok(())
//! # }
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::eiger::{EigerStageSettings, FilePluginSettings};
use crate::error::{MxError, MxResult};
use crate::registers::SettleConfig;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/mxtools.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "MXTOOLS_";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BeamlineConfig {
    /// Application name and logging
    pub application: ApplicationConfig,
    /// Eiger detector
    pub eiger: EigerConfig,
    /// Zebra trigger box
    pub zebra: DeviceConfig,
    /// Goniometer vector program
    pub vector: DeviceConfig,
    /// Settle and acquisition timeouts
    pub timing: TimingConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "mxtools".to_string(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

/// Values applied to the cam on stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    /// `ImageMode` (1 = Multiple)
    pub image_mode: i64,
    /// `TriggerMode` (0 = internal series)
    pub trigger_mode: i64,
    /// `NumTriggers`
    pub num_triggers: i64,
    /// `CompressionAlgo`
    pub compression_algo: String,
}

impl Default for StageConfig {
    fn default() -> Self {
        let defaults = EigerStageSettings::default();
        Self {
            image_mode: defaults.image_mode,
            trigger_mode: defaults.trigger_mode,
            num_triggers: defaults.num_triggers,
            compression_algo: defaults.compression_algo,
        }
    }
}

impl From<&StageConfig> for EigerStageSettings {
    fn from(config: &StageConfig) -> Self {
        Self {
            image_mode: config.image_mode,
            trigger_mode: config.trigger_mode,
            num_triggers: config.num_triggers,
            compression_algo: config.compression_algo.clone(),
        }
    }
}

/// Eiger detector configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EigerConfig {
    /// Device name; prefixes every data key
    pub name: String,
    /// PV prefix of the detector IOC
    pub prefix: String,
    /// Suffix of the driver and file-writer registers
    pub cam_suffix: String,
    /// Write directory template (`{date}`, `{year}`, `{month}`, `{day}`, strftime)
    pub write_path_template: String,
    /// Root every write path must live under
    pub root: String,
    /// Image data key; defaults to `<name>_image`
    pub image_name: Option<String>,
    /// Values applied on stage
    pub stage: StageConfig,
    /// Group recorded as file owner group; defaults to the process primary group
    pub file_owner_group: Option<String>,
    /// Extra cam attributes reported by `read()`
    pub read_attrs: Vec<String>,
    /// Report only the image key
    pub streaming: bool,
}

impl Default for EigerConfig {
    fn default() -> Self {
        Self {
            name: "eiger_single".to_string(),
            prefix: "XF:17IDC-ES:FMX{Det:Eig16M}".to_string(),
            cam_suffix: "cam1:".to_string(),
            write_path_template: "/GPFS/CENTRAL/xf17id2/%Y%m%d/".to_string(),
            root: "/GPFS/CENTRAL/xf17id2".to_string(),
            image_name: None,
            stage: StageConfig::default(),
            file_owner_group: None,
            read_attrs: Vec::new(),
            streaming: false,
        }
    }
}

impl EigerConfig {
    /// Full PV prefix of the driver registers.
    pub fn cam_prefix(&self) -> String {
        format!("{}{}", self.prefix, self.cam_suffix)
    }

    /// Image data key, `<name>_image` unless set.
    pub fn image_name(&self) -> String {
        self.image_name
            .clone()
            .unwrap_or_else(|| format!("{}_image", self.name))
    }

    /// Write path settings for the file plugin.
    pub fn file_plugin_settings(&self) -> FilePluginSettings {
        FilePluginSettings::new(self.write_path_template.clone(), self.root.clone())
    }
}

/// A device addressed only by name and PV prefix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DeviceConfig {
    /// Device name, prefix of every attribute name
    pub name: String,
    /// PV prefix
    pub prefix: String,
}

/// Readback settle and acquisition timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// How long `set` waits for a readback, milliseconds
    pub readback_timeout_ms: u64,
    /// Readback poll interval, milliseconds
    pub poll_interval_ms: u64,
    /// How long a trigger waits for `Acquire` to drop, milliseconds
    pub acquire_timeout_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            readback_timeout_ms: 2000,
            poll_interval_ms: 10,
            acquire_timeout_ms: 60_000,
        }
    }
}

impl TimingConfig {
    /// Settle behaviour for every register `set`.
    pub fn settle(&self) -> SettleConfig {
        SettleConfig {
            timeout: Duration::from_millis(self.readback_timeout_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }

    /// Upper bound on one software-triggered exposure.
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

impl BeamlineConfig {
    /// Load configuration from `config/mxtools.toml` and environment variables
    ///
    /// Environment variables override the file with prefix `MXTOOLS_`.
    /// Example: `MXTOOLS_APPLICATION__LOG_LEVEL=debug`
    pub fn load() -> MxResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> MxResult<Self> {
        let config = Figment::from(Serialized::defaults(BeamlineConfig::fmx_defaults()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(config)
    }

    /// Defaults for the FMX beamline devices.
    pub fn fmx_defaults() -> Self {
        Self {
            zebra: DeviceConfig {
                name: "zebra".to_string(),
                prefix: "XF:17IDB-ES:FMX{Zeb:3}:".to_string(),
            },
            vector: DeviceConfig {
                name: "vector".to_string(),
                prefix: "XF:17IDC-ES:FMX{Gon:1-Vec}".to_string(),
            },
            ..Self::default()
        }
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> MxResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(MxError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.as_str()) {
            return Err(MxError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        for (section, device) in [
            ("eiger", (&self.eiger.name, &self.eiger.prefix)),
            ("zebra", (&self.zebra.name, &self.zebra.prefix)),
            ("vector", (&self.vector.name, &self.vector.prefix)),
        ] {
            if device.0.is_empty() || device.1.is_empty() {
                return Err(MxError::Configuration(format!(
                    "[{}] needs both a name and a prefix",
                    section
                )));
            }
        }

        if !self.eiger.root.starts_with('/') {
            return Err(MxError::Configuration(format!(
                "eiger.root '{}' must be an absolute path",
                self.eiger.root
            )));
        }
        if self.eiger.write_path_template.trim().is_empty() {
            return Err(MxError::Configuration(
                "eiger.write_path_template must not be empty".to_string(),
            ));
        }

        if self.timing.poll_interval_ms == 0 {
            return Err(MxError::Configuration(
                "timing.poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.timing.readback_timeout_ms < self.timing.poll_interval_ms {
            return Err(MxError::Configuration(format!(
                "timing.readback_timeout_ms ({}) is shorter than poll_interval_ms ({})",
                self.timing.readback_timeout_ms, self.timing.poll_interval_ms
            )));
        }
        if self.timing.acquire_timeout_ms < self.timing.poll_interval_ms {
            return Err(MxError::Configuration(format!(
                "timing.acquire_timeout_ms ({}) is shorter than poll_interval_ms ({})",
                self.timing.acquire_timeout_ms, self.timing.poll_interval_ms
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = BeamlineConfig::fmx_defaults();
        assert!(config.validate().is_ok());
        assert_eq!(config.eiger.cam_prefix(), "XF:17IDC-ES:FMX{Det:Eig16M}cam1:");
        assert_eq!(config.eiger.image_name(), "eiger_single_image");
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[application]
log_level = "debug"

[eiger]
write_path_template = "/data/{{date}}/"
root = "/data"
read_attrs = ["acquire_time"]

[timing]
readback_timeout_ms = 500
"#
        )
        .unwrap();

        let config = BeamlineConfig::load_from(file.path()).unwrap();
        assert_eq!(config.application.log_level, "debug");
        assert_eq!(config.eiger.write_path_template, "/data/{date}/");
        assert_eq!(config.eiger.read_attrs, vec!["acquire_time"]);
        assert_eq!(config.eiger.name, "eiger_single");
        assert_eq!(config.zebra.prefix, "XF:17IDB-ES:FMX{Zeb:3}:");
        assert_eq!(config.timing.settle().timeout, Duration::from_millis(500));
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::env::set_var("MXTOOLS_EIGER__PREFIX", "TEST:EIG4M:");
        let config = BeamlineConfig::load_from(file.path());
        std::env::remove_var("MXTOOLS_EIGER__PREFIX");

        assert_eq!(config.unwrap().eiger.prefix, "TEST:EIG4M:");
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = BeamlineConfig::fmx_defaults();
        config.application.log_level = "loud".to_string();
        assert!(matches!(config.validate(), Err(MxError::Configuration(_))));
    }

    #[test]
    fn test_missing_prefix() {
        let mut config = BeamlineConfig::fmx_defaults();
        config.zebra.prefix.clear();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("[zebra]"));
    }

    #[test]
    fn test_timing_validation() {
        let mut config = BeamlineConfig::fmx_defaults();
        config.timing.readback_timeout_ms = 5;
        config.timing.poll_interval_ms = 10;
        assert!(config.validate().is_err());

        let mut config = BeamlineConfig::fmx_defaults();
        config.timing.acquire_timeout_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("acquire_timeout_ms"));
    }
}

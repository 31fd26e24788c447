//! Configuration management for StatWatch
//!
//! This module defines the main `Config` struct and its sub-structs,
//! responsible for holding all application settings. It uses `figment` to
//! layer built-in defaults, an optional TOML file, `STATWATCH_` environment
//! variables and finally command-line arguments.

use crate::cli::Cli;
use crate::core::DeviceSelector;
use anyhow::{bail, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// The main configuration struct for the application.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub core: CoreConfig,
    pub sampling: SamplingConfig,
    pub target: TargetConfig,
    pub devices: DevicesConfig,
    pub reference: ReferenceConfig,
    pub output: OutputConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct CoreConfig {
    /// The logging level for the application.
    pub log_level: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Tick cadence and window shape.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct SamplingConfig {
    /// Seconds between two snapshots.
    pub tick_interval_seconds: u64,
    /// Derived records per window (reporting period / tick interval).
    pub window_length: usize,
    /// Stop after this many closed windows. Unset runs until shutdown.
    pub windows: Option<u64>,
}

impl SamplingConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_seconds)
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            tick_interval_seconds: 1,
            window_length: 60,
            windows: None,
        }
    }
}

/// The process whose group is tracked. A pid takes precedence over a name.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct TargetConfig {
    pub process_name: Option<String>,
    pub pid: Option<u32>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct DevicesConfig {
    /// Interface name, or "all" for every non-loopback interface.
    pub network_interface: DeviceSelector,
    /// Block device name, or "all" for every whole disk.
    pub disk_device: DeviceSelector,
    /// Mount point of procfs.
    pub procfs_root: PathBuf,
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            network_interface: DeviceSelector::All,
            disk_device: DeviceSelector::All,
            procfs_root: PathBuf::from("/proc"),
        }
    }
}

/// Where reference files are found and how long to wait for them.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct ReferenceConfig {
    pub enabled: bool,
    pub base_dir: PathBuf,
    /// Defaults to the system host name.
    pub hostname: Option<String>,
    /// Literal hardware id. When unset, `hwid_command` is run instead.
    pub hardware_id: Option<String>,
    pub hwid_command: Option<String>,
    /// Window closes to wait for a missing reference before giving up.
    pub max_attempts: u32,
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_dir: PathBuf::from("/opt/rubackup/monitoring"),
            hostname: None,
            hardware_id: None,
            hwid_command: Some("/opt/rubackup/bin/rubackup_client hwid".to_string()),
            max_attempts: 3,
        }
    }
}

/// The format of report blocks.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    Json,
    #[default]
    PlainText,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct OutputConfig {
    pub format: OutputFormat,
    /// Append reports to this file instead of writing them to stdout.
    pub report_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    /// Serve Prometheus metrics on `listen_address`.
    pub enabled: bool,
    pub listen_address: SocketAddr,
    /// Log internal metrics periodically (ignored when `enabled` is set).
    pub log_metrics: bool,
    pub log_aggregation_seconds: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_address: SocketAddr::from(([127, 0, 0, 1], 9464)),
            log_metrics: false,
            log_aggregation_seconds: 60,
        }
    }
}

impl Config {
    /// Loads the configuration, layering defaults, the TOML file named on the
    /// command line, `STATWATCH_` environment variables and CLI arguments.
    ///
    /// Nested keys are separated by a double underscore in the environment,
    /// e.g. `STATWATCH_SAMPLING__WINDOW_LENGTH=30`.
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));
        if let Some(path) = &cli.config {
            figment = figment.merge(Toml::file(path));
        }
        let mut config: Config = figment
            .merge(Env::prefixed("STATWATCH_").split("__"))
            .merge(cli.clone())
            .extract()?;
        // A name given on the command line replaces a pid from a lower layer.
        if cli.process_name.is_some() && cli.pid.is_none() {
            config.target.pid = None;
        }
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the sampler cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.sampling.tick_interval_seconds == 0 {
            bail!("sampling.tick_interval_seconds must be greater than zero");
        }
        if self.sampling.window_length == 0 {
            bail!("sampling.window_length must be greater than zero");
        }
        if self.sampling.windows == Some(0) {
            bail!("sampling.windows must be greater than zero when set");
        }
        match (&self.target.process_name, self.target.pid) {
            (None, None) => bail!("either target.process_name or target.pid must be set"),
            (Some(name), None) if name.trim().is_empty() => {
                bail!("target.process_name must not be empty")
            }
            _ => {}
        }
        if self.reference.enabled {
            if self.reference.max_attempts == 0 {
                bail!("reference.max_attempts must be greater than zero");
            }
            if self.reference.hardware_id.is_none() && self.reference.hwid_command.is_none() {
                bail!("reference.hardware_id or reference.hwid_command must be set");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Config {
        Config {
            target: TargetConfig {
                process_name: Some("rubackup_client".to_string()),
                pid: None,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_accepts_defaults_with_target() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_degenerate_sampling() {
        let mut config = valid();
        config.sampling.tick_interval_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.sampling.window_length = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.sampling.windows = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_requires_a_target() {
        let mut config = valid();
        config.target.process_name = None;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("target.process_name"));

        config.target.pid = Some(42);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_reference_needs_hwid_source() {
        let mut config = valid();
        config.reference.enabled = true;
        config.reference.hwid_command = None;
        assert!(config.validate().is_err());

        config.reference.hardware_id = Some("abcdef01".to_string());
        assert!(config.validate().is_ok());
    }
}

//! Command-Line Interface (CLI) argument parsing.
//!
//! Arguments are parsed with `clap` and merged as the last, highest
//! priority `figment` layer on top of the configuration file and the
//! environment. Only arguments that were actually given override anything.

use clap::{Parser, ValueEnum};
use figment::{
    value::{Dict, Map, Tag, Value},
    Error, Metadata, Profile, Provider,
};
use std::path::PathBuf;

/// Samples host and process-group resource counters and compares
/// per-window summaries against externally written reference files.
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long = "config-file", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Name (or part of the name) of the process to track; replaces a pid
    /// set in the configuration file or environment.
    #[arg(short = 'p', long, value_name = "NAME")]
    pub process_name: Option<String>,

    /// Pid of the process to track; overrides --process-name.
    #[arg(long, value_name = "PID")]
    pub pid: Option<u32>,

    /// Seconds between samples.
    #[arg(short, long, value_name = "SECONDS")]
    pub interval: Option<u64>,

    /// Samples per reported window.
    #[arg(short = 'w', long, value_name = "SAMPLES")]
    pub window_length: Option<usize>,

    /// Stop after this many windows.
    #[arg(short = 'n', long, value_name = "COUNT")]
    pub windows: Option<u64>,

    /// Network interface to measure, or "all".
    #[arg(long, value_name = "IFACE")]
    pub interface: Option<String>,

    /// Block device to measure, or "all".
    #[arg(long, value_name = "DEVICE")]
    pub disk: Option<String>,

    /// Base directory of reference files; enables correlation.
    #[arg(long, value_name = "DIR")]
    pub reference_dir: Option<PathBuf>,

    /// Hardware id used in the reference directory name.
    #[arg(long, value_name = "ID")]
    pub hardware_id: Option<String>,

    /// Report format.
    #[arg(long, value_enum)]
    pub format: Option<FormatArg>,

    /// Append reports to this file instead of stdout.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatArg {
    Json,
    Plain,
}

/// Inserts `value` at `section.key`, creating the section on first use.
fn put(dict: &mut Dict, section: &str, key: &str, value: Value) {
    let entry = dict
        .entry(section.to_string())
        .or_insert_with(|| Value::Dict(Tag::Default, Dict::new()));
    if let Value::Dict(_, inner) = entry {
        inner.insert(key.to_string(), value);
    }
}

impl Provider for Cli {
    fn metadata(&self) -> Metadata {
        Metadata::named("Command-Line Arguments")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, Error> {
        let mut dict = Dict::new();

        if let Some(level) = &self.log_level {
            put(&mut dict, "core", "log_level", Value::from(level.clone()));
        }
        if let Some(name) = &self.process_name {
            put(&mut dict, "target", "process_name", Value::from(name.clone()));
        }
        if let Some(pid) = self.pid {
            put(&mut dict, "target", "pid", Value::from(pid));
        }
        if let Some(seconds) = self.interval {
            put(&mut dict, "sampling", "tick_interval_seconds", Value::from(seconds));
        }
        if let Some(length) = self.window_length {
            put(&mut dict, "sampling", "window_length", Value::from(length as u64));
        }
        if let Some(windows) = self.windows {
            put(&mut dict, "sampling", "windows", Value::from(windows));
        }
        if let Some(interface) = &self.interface {
            put(&mut dict, "devices", "network_interface", Value::from(interface.clone()));
        }
        if let Some(disk) = &self.disk {
            put(&mut dict, "devices", "disk_device", Value::from(disk.clone()));
        }
        // Naming a reference directory on the command line implies correlation.
        if let Some(dir) = &self.reference_dir {
            put(&mut dict, "reference", "enabled", Value::from(true));
            put(&mut dict, "reference", "base_dir", Value::from(dir.display().to_string()));
        }
        if let Some(id) = &self.hardware_id {
            put(&mut dict, "reference", "hardware_id", Value::from(id.clone()));
        }
        if let Some(format) = self.format {
            let name = match format {
                FormatArg::Json => "Json",
                FormatArg::Plain => "PlainText",
            };
            put(&mut dict, "output", "format", Value::from(name));
        }
        if let Some(path) = &self.output {
            put(&mut dict, "output", "report_path", Value::from(path.display().to_string()));
        }

        let mut map = Map::new();
        map.insert(Profile::Default, dict);
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_given_arguments_are_provided() {
        let cli = Cli::try_parse_from(["statwatch", "-p", "rubackup", "--interval", "2"]).unwrap();
        let data = cli.data().unwrap();
        let dict = &data[&Profile::Default];
        assert_eq!(dict.len(), 2);
        assert!(dict.contains_key("target"));
        assert!(dict.contains_key("sampling"));
    }

    #[test]
    fn test_reference_dir_enables_correlation() {
        let cli = Cli::try_parse_from(["statwatch", "--reference-dir", "/tmp/refs"]).unwrap();
        let data = cli.data().unwrap();
        let Value::Dict(_, reference) = &data[&Profile::Default]["reference"] else {
            panic!("reference section missing");
        };
        assert_eq!(reference["enabled"], Value::from(true));
        assert_eq!(reference["base_dir"], Value::from("/tmp/refs"));
    }
}

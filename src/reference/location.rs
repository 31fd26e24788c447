//! Where the external writer puts its reference files.

use crate::config::ReferenceConfig;
use crate::platform::HostProvider;
use anyhow::{anyhow, bail, Context, Result};
use regex::Regex;
use std::path::PathBuf;
use std::sync::OnceLock;
use tokio::process::Command;
use tracing::{debug, info};

/// The directory layout `<base_dir>/<hostname>_<hardware_id>/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceLocation {
    pub base_dir: PathBuf,
    pub hostname: String,
    pub hardware_id: String,
}

impl ReferenceLocation {
    pub fn dir(&self) -> PathBuf {
        self.base_dir.join(format!("{}_{}", self.hostname, self.hardware_id))
    }

    /// Fills in the host name and hardware id, discovering whichever the
    /// configuration leaves unset.
    pub async fn resolve(config: &ReferenceConfig) -> Result<Self> {
        let hostname = match &config.hostname {
            Some(name) => name.clone(),
            None => HostProvider::host_name().ok_or_else(|| anyhow!("cannot determine host name"))?,
        };

        let hardware_id = match (&config.hardware_id, &config.hwid_command) {
            (Some(id), _) => id.clone(),
            (None, Some(command)) => discover_hardware_id(command).await?,
            (None, None) => bail!("reference.hardware_id or reference.hwid_command must be set"),
        };

        let location = Self {
            base_dir: config.base_dir.clone(),
            hostname,
            hardware_id,
        };
        info!(dir = %location.dir().display(), "Reference directory resolved");
        Ok(location)
    }
}

/// Runs `command` and picks the hardware id out of its output.
async fn discover_hardware_id(command: &str) -> Result<String> {
    let mut parts = command.split_whitespace();
    let program = parts.next().ok_or_else(|| anyhow!("hwid_command is empty"))?;
    let output = Command::new(program)
        .args(parts)
        .output()
        .await
        .with_context(|| format!("failed to run hwid command '{}'", command))?;
    if !output.status.success() {
        bail!("hwid command '{}' exited with {}", command, output.status);
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    debug!(lines = stdout.lines().count(), "hwid command finished");
    parse_hwid_output(&stdout)
        .ok_or_else(|| anyhow!("hwid command '{}' printed no hardware id", command))
}

/// The first output line that is a bare hexadecimal identifier.
pub fn parse_hwid_output(output: &str) -> Option<String> {
    static HWID: OnceLock<Regex> = OnceLock::new();
    let pattern = HWID.get_or_init(|| Regex::new(r"^[0-9A-Fa-f]{8,}$").expect("hwid pattern is valid"));
    output
        .lines()
        .map(str::trim)
        .find(|line| pattern.is_match(line))
        .map(str::to_string)
}

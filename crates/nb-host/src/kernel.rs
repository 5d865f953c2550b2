use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::process::Command;

pub const IP_FORWARD_PROC: &str = "/proc/sys/net/ipv4/ip_forward";

/// Live kernel forwarding flag and sysctl file reloads.
pub struct KernelParams {
    ip_forward_path: PathBuf,
}

impl KernelParams {
    pub fn new() -> Self {
        Self::with_proc_path(IP_FORWARD_PROC)
    }

    pub fn with_proc_path(path: impl Into<PathBuf>) -> Self {
        Self {
            ip_forward_path: path.into(),
        }
    }

    pub fn ip_forward_enabled(&self) -> Result<bool> {
        let value = std::fs::read_to_string(&self.ip_forward_path)
            .context(format!("Failed to read {}", self.ip_forward_path.display()))?;
        Ok(value.trim() == "1")
    }

    pub fn set_ip_forward(&self, enabled: bool) -> Result<()> {
        let value = if enabled { "1" } else { "0" };
        std::fs::write(&self.ip_forward_path, value)
            .context(format!("Failed to write {}", self.ip_forward_path.display()))?;

        tracing::info!(enabled, "set kernel IPv4 forwarding");
        Ok(())
    }

    /// `sysctl -p <path>`
    pub async fn reload(&self, path: &Path) -> Result<()> {
        let output = Command::new("sysctl")
            .arg("-p")
            .arg(path)
            .output()
            .await
            .context("Failed to run sysctl -p")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("sysctl -p {} failed: {}", path.display(), stderr.trim());
        }

        tracing::info!(path = %path.display(), "reloaded kernel parameters");
        Ok(())
    }
}

impl Default for KernelParams {
    fn default() -> Self {
        Self::new()
    }
}

use anyhow::{Context, Result};
use tokio::process::Command;

/// systemd unit control
pub struct ServiceManager;

impl ServiceManager {
    pub fn new() -> Self {
        Self
    }

    pub async fn restart(&self, unit: &str) -> Result<()> {
        let output = Command::new("systemctl")
            .arg("restart")
            .arg(unit)
            .output()
            .await
            .context(format!("Failed to run systemctl restart {}", unit))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("Failed to restart {}: {}", unit, stderr.trim());
        }

        tracing::info!(unit, "restarted service");
        Ok(())
    }
}

impl Default for ServiceManager {
    fn default() -> Self {
        Self::new()
    }
}

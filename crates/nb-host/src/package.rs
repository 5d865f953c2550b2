use anyhow::{Context, Result};
use tokio::process::Command;

/// dpkg/apt package queries and non-interactive installs.
pub struct PackageManager;

impl PackageManager {
    pub fn new() -> Self {
        Self
    }

    pub async fn is_installed(&self, package: &str) -> Result<bool> {
        let output = Command::new("dpkg-query")
            .arg("-W")
            .arg("-f=${Status}")
            .arg(package)
            .output()
            .await
            .context("Failed to run dpkg-query")?;

        if !output.status.success() {
            // dpkg-query exits 1 for unknown packages
            return Ok(false);
        }

        Ok(status_is_installed(&String::from_utf8_lossy(&output.stdout)))
    }

    /// `apt-get install -y` with debconf prompts suppressed.
    pub async fn install(&self, package: &str) -> Result<()> {
        let output = Command::new("apt-get")
            .env("DEBIAN_FRONTEND", "noninteractive")
            .arg("install")
            .arg("-y")
            .arg(package)
            .output()
            .await
            .context("Failed to run apt-get install")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("apt-get install {} failed: {}", package, stderr.trim());
        }

        tracing::info!(package, "installed package");
        Ok(())
    }
}

impl Default for PackageManager {
    fn default() -> Self {
        Self::new()
    }
}

fn status_is_installed(status: &str) -> bool {
    status.split_whitespace().last() == Some("installed")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dpkg_status_parsing() {
        assert!(status_is_installed("install ok installed"));
        assert!(!status_is_installed("deinstall ok config-files"));
        assert!(!status_is_installed("unknown ok not-installed"));
        assert!(!status_is_installed(""));
    }
}

// iptables rule checks, upserts and table persistence
use anyhow::{Context, Result};
use nb_core::FirewallRule;
use tokio::process::Command;

pub const PERSISTENCE_HELPER: &str = "netfilter-persistent";

pub struct IptablesManager;

impl IptablesManager {
    pub fn new() -> Self {
        Self
    }

    /// `iptables -C`: exit 0 means present, exit 1 means absent.
    pub async fn rule_exists(&self, rule: &FirewallRule) -> Result<bool> {
        let output = Command::new("iptables")
            .args(rule.command_args("-C"))
            .output()
            .await
            .context("Failed to run iptables -C")?;

        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                // A missing chain also means the rule is absent
                if stderr.contains("does not exist") || stderr.contains("No chain") {
                    return Ok(false);
                }
                anyhow::bail!("iptables -C {} failed: {}", rule, stderr.trim());
            }
        }
    }

    pub async fn insert_rule(&self, rule: &FirewallRule) -> Result<()> {
        self.run(rule, "-I").await?;
        tracing::info!(%rule, "inserted firewall rule");
        Ok(())
    }

    pub async fn delete_rule(&self, rule: &FirewallRule) -> Result<()> {
        self.run(rule, "-D").await?;
        tracing::info!(%rule, "deleted firewall rule");
        Ok(())
    }

    async fn run(&self, rule: &FirewallRule, op: &str) -> Result<()> {
        let output = Command::new("iptables")
            .args(rule.command_args(op))
            .output()
            .await
            .context(format!("Failed to run iptables {}", op))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("iptables {} {} failed: {}", op, rule, stderr.trim());
        }

        Ok(())
    }

    /// Snapshot the full IPv4 rule table
    pub async fn save_rules(&self) -> Result<String> {
        let output = Command::new("iptables-save")
            .output()
            .await
            .context("Failed to run iptables-save")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("iptables-save failed: {}", stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    pub fn has_persistence_helper(&self) -> bool {
        on_path(PERSISTENCE_HELPER)
    }

    /// `netfilter-persistent save`
    pub async fn run_persistence_helper(&self) -> Result<()> {
        let output = Command::new(PERSISTENCE_HELPER)
            .arg("save")
            .output()
            .await
            .context("Failed to run netfilter-persistent save")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("netfilter-persistent save failed: {}", stderr.trim());
        }

        tracing::info!("saved firewall rules with netfilter-persistent");
        Ok(())
    }
}

impl Default for IptablesManager {
    fn default() -> Self {
        Self::new()
    }
}

fn on_path(binary: &str) -> bool {
    which::which(binary).is_ok()
}

pub mod backup;
pub mod checks;
pub mod inspect;
pub mod remediate;
pub mod report;
pub mod verify;

#[cfg(test)]
mod testing;

pub use backup::{BackupManager, BackupSet};
pub use checks::evaluate;
pub use inspect::{Inspector, Snapshot, SubnetSource};
pub use remediate::{ActionOutcome, ActionStatus, Remediation, Remediator};
pub use report::RunReport;
pub use verify::{RestartPath, Verification, Verifier};

use anyhow::Result;
use nb_core::{IssueSet, Settings, SystemGateway};

/// Diagnose, classify and repair the NAT bridge setup of one host.
pub struct NatDoctor<'a, G> {
    gateway: &'a G,
    settings: &'a Settings,
}

impl<'a, G: SystemGateway> NatDoctor<'a, G> {
    pub fn new(gateway: &'a G, settings: &'a Settings) -> Self {
        Self { gateway, settings }
    }

    /// Inspect and evaluate without touching anything.
    pub async fn diagnose(&self) -> Result<(Snapshot, IssueSet)> {
        let snapshot = Inspector::new(self.gateway, self.settings).inspect().await?;
        let issues = evaluate(&snapshot);
        Ok((snapshot, issues))
    }

    /// Backup, inspect, evaluate and, when anything is wrong, remediate and
    /// verify. Only a failed backup or an unreadable host aborts the run.
    pub async fn run(&self) -> Result<RunReport> {
        let backup = BackupManager::new(self.gateway, self.settings)
            .snapshot()
            .await?;

        let (snapshot, issues) = self.diagnose().await?;

        if issues.is_empty() {
            tracing::info!("no issues found, nothing to remediate");
            return Ok(RunReport {
                backup: Some(backup),
                subnet: snapshot.subnet,
                egress: snapshot.egress,
                issues,
                actions: Vec::new(),
                verification: None,
            });
        }

        tracing::info!(count = issues.len(), "remediating");
        let remediation = Remediator::new(self.gateway, self.settings)
            .remediate(&snapshot, &issues)
            .await;
        if remediation.failures() > 0 {
            tracing::warn!(failed = remediation.failures(), "some remediation steps failed");
        }

        let verification = Verifier::new(self.gateway, self.settings)
            .verify(&snapshot, &remediation.document)
            .await;

        Ok(RunReport {
            backup: Some(backup),
            subnet: snapshot.subnet,
            egress: snapshot.egress,
            issues,
            actions: remediation.outcomes,
            verification: Some(verification),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeGateway, HEALTHY_INTERFACES, HEALTHY_SYSCTL, bridge, temp_settings};
    use nb_core::{FirewallRule, Issue};

    const BARE_INTERFACES: &str = "auto lo\niface lo inet loopback\n\nauto br0\niface br0 inet dhcp\n    bridge_ports eth0\n";

    fn broken_host(settings: &Settings) -> FakeGateway {
        std::fs::write(&settings.interfaces_file, BARE_INTERFACES).unwrap();
        std::fs::write(&settings.sysctl_file, "vm.swappiness=10\n").unwrap();

        let gateway = FakeGateway::healthy();
        {
            let mut state = gateway.state();
            state.rules.clear();
            state.ip_forward = false;
            state.packages.clear();
        }
        gateway
    }

    #[tokio::test]
    async fn healthy_host_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let settings = temp_settings(dir.path());
        std::fs::write(&settings.interfaces_file, HEALTHY_INTERFACES).unwrap();
        std::fs::write(&settings.sysctl_file, HEALTHY_SYSCTL).unwrap();
        let gateway = FakeGateway::healthy();

        let report = NatDoctor::new(&gateway, &settings).run().await.unwrap();

        assert!(report.issues.is_empty());
        assert!(report.healthy());
        assert!(report.verification.is_none());
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn backup_holds_pre_run_copies() {
        let dir = tempfile::tempdir().unwrap();
        let settings = temp_settings(dir.path());
        let gateway = broken_host(&settings);

        let report = NatDoctor::new(&gateway, &settings).run().await.unwrap();

        let backup = report.backup.unwrap();
        let saved = std::fs::read_to_string(backup.dir.join(backup::INTERFACES_BACKUP)).unwrap();
        assert_eq!(saved, BARE_INTERFACES);
        let saved = std::fs::read_to_string(backup.dir.join(backup::SYSCTL_BACKUP)).unwrap();
        assert_eq!(saved, "vm.swappiness=10\n");
        let rules = std::fs::read_to_string(backup.dir.join(backup::RULES_BACKUP)).unwrap();
        assert!(!rules.contains("MASQUERADE"));

        assert_ne!(std::fs::read_to_string(&settings.interfaces_file).unwrap(), BARE_INTERFACES);
    }

    #[tokio::test]
    async fn second_run_finds_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let settings = temp_settings(dir.path());
        let gateway = broken_host(&settings);
        let doctor = NatDoctor::new(&gateway, &settings);

        let first = doctor.run().await.unwrap();
        assert_eq!(
            first.issues.as_slice(),
            &[
                Issue::NatBridgeNotConfigured,
                Issue::IpForwardDisabled,
                Issue::IpForwardNotPersistent,
                Issue::MasqueradeRuleMissing,
                Issue::IptablesPersistentMissing,
                Issue::ForwardRuleMissing,
            ]
        );
        assert_eq!(first.failed_actions(), 0);
        assert!(first.healthy());

        let second = doctor.run().await.unwrap();
        assert!(second.issues.is_empty(), "left over: {:?}", second.issues);
    }

    #[tokio::test]
    async fn only_masquerade_missing() {
        let dir = tempfile::tempdir().unwrap();
        let settings = temp_settings(dir.path());
        let subnet = "192.168.1.0/24".parse().unwrap();
        let interfaces = HEALTHY_INTERFACES.replace("192.168.100.", "192.168.1.");
        std::fs::write(&settings.interfaces_file, &interfaces).unwrap();
        std::fs::write(&settings.sysctl_file, HEALTHY_SYSCTL).unwrap();

        let gateway = FakeGateway::healthy();
        {
            let mut state = gateway.state();
            state.links[3] = bridge("br1", 4, "52:54:00:20:00:01", "192.168.1.1/24");
            state.rules = vec![FirewallRule::forward_accept(subnet)];
        }

        let report = NatDoctor::new(&gateway, &settings).run().await.unwrap();

        assert_eq!(report.issues.as_slice(), &[Issue::MasqueradeRuleMissing]);
        assert_eq!(report.subnet, subnet);
        assert_eq!(gateway.count_rules(&FirewallRule::masquerade(subnet, "br0")), 1);
        assert_eq!(std::fs::read_to_string(&settings.interfaces_file).unwrap(), interfaces);
    }

    #[tokio::test]
    async fn diagnose_does_not_mutate() {
        let dir = tempfile::tempdir().unwrap();
        let settings = temp_settings(dir.path());
        let gateway = broken_host(&settings);

        let (_, issues) = NatDoctor::new(&gateway, &settings).diagnose().await.unwrap();

        assert!(!issues.is_empty());
        assert!(gateway.calls().is_empty());
        assert!(!settings.backup_dir.exists());
    }
}

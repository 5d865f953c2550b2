use crate::inspect::Snapshot;
use anyhow::{Context, Result, anyhow};
use nb_core::{
    FirewallRule, InterfacesDocument, Issue, IssueSet, MacAddr, NatDirectives, Settings,
    SystemGateway, sysctl,
};
use similar::TextDiff;
use std::fmt;
use std::path::Path;

/// Most copies of one rule removed by a single upsert.
const MAX_RULE_COPIES: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionStatus {
    Applied,
    AlreadySatisfied,
    /// Left to the network reload.
    Deferred,
    Failed(String),
}

impl ActionStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, ActionStatus::Failed(_))
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionStatus::Applied => write!(f, "applied"),
            ActionStatus::AlreadySatisfied => write!(f, "already satisfied"),
            ActionStatus::Deferred => write!(f, "deferred to network reload"),
            ActionStatus::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// One corrective step and how it went.
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    /// `None` for the steps every remediation ends with.
    pub issue: Option<Issue>,
    pub action: String,
    pub status: ActionStatus,
}

#[derive(Debug, Clone)]
pub struct Remediation {
    pub outcomes: Vec<ActionOutcome>,
    /// Interfaces document after every edit.
    pub document: InterfacesDocument,
    pub document_written: bool,
}

impl Remediation {
    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|o| o.status.is_failure()).count()
    }
}

pub struct Remediator<'a, G> {
    gateway: &'a G,
    settings: &'a Settings,
}

impl<'a, G: SystemGateway> Remediator<'a, G> {
    pub fn new(gateway: &'a G, settings: &'a Settings) -> Self {
        Self { gateway, settings }
    }

    /// Apply one handler per issue in detection order, write the interfaces
    /// file if it changed, then persist the firewall table. A failing
    /// handler is recorded and the rest still run.
    pub async fn remediate(&self, snapshot: &Snapshot, issues: &IssueSet) -> Remediation {
        let mut document = snapshot.document.clone();
        let mut outcomes = Vec::new();

        for issue in issues.iter() {
            let action = describe(issue);
            let status = match self.dispatch(issue, snapshot, &mut document).await {
                Ok(status) => {
                    tracing::info!(issue = %issue, %status, "{}", action);
                    status
                }
                Err(err) => {
                    let reason = format!("{err:#}");
                    tracing::error!(issue = %issue, error = %reason, "{} failed", action);
                    ActionStatus::Failed(reason)
                }
            };
            outcomes.push(ActionOutcome {
                issue: Some(issue),
                action: action.to_string(),
                status,
            });
        }

        let document_written = document != snapshot.document;
        if document_written {
            let status = match self.write_document(&snapshot.document, &document) {
                Ok(()) => ActionStatus::Applied,
                Err(err) => {
                    let reason = format!("{err:#}");
                    tracing::error!(error = %reason, "could not write interfaces file");
                    ActionStatus::Failed(reason)
                }
            };
            outcomes.push(ActionOutcome {
                issue: None,
                action: format!("write {}", self.settings.interfaces_file.display()),
                status,
            });
        }

        let status = match self.persist_rules().await {
            Ok(status) => status,
            Err(err) => {
                let reason = format!("{err:#}");
                tracing::error!(error = %reason, "could not persist firewall rules");
                ActionStatus::Failed(reason)
            }
        };
        outcomes.push(ActionOutcome {
            issue: None,
            action: "persist firewall rules".to_string(),
            status,
        });

        Remediation {
            outcomes,
            document,
            document_written,
        }
    }

    async fn dispatch(
        &self,
        issue: Issue,
        snapshot: &Snapshot,
        document: &mut InterfacesDocument,
    ) -> Result<ActionStatus> {
        match issue {
            Issue::IpForwardDisabled => {
                self.gateway.set_ip_forward(true).await?;
                Ok(ActionStatus::Applied)
            }
            Issue::IpForwardNotPersistent => self.persist_ip_forward().await,
            Issue::MasqueradeRuleMissing => self.upsert_rule(&snapshot.masquerade_rule()).await,
            Issue::ForwardRuleMissing => self.upsert_rule(&snapshot.forward_rule()).await,
            Issue::IptablesPersistentMissing => {
                self.gateway
                    .install_package(&self.settings.persistence_package)
                    .await?;
                Ok(ActionStatus::Applied)
            }
            Issue::NatBridgeNotConfigured => self.create_stanza(snapshot, document),
            Issue::BridgeStpNotConfigured
            | Issue::BridgeFdNotConfigured
            | Issue::BridgePortsNotConfigured
            | Issue::PostUpRulesMissing => Ok(complete_stanza(snapshot, document)),
            Issue::MacAddressConflict => self.assign_mac(document),
            Issue::PrimaryBridgeMissing
            | Issue::PrimaryBridgeNoIp
            | Issue::NatBridgeMissing
            | Issue::NatBridgeNoIp
            | Issue::NoInternet => Ok(ActionStatus::Deferred),
        }
    }

    async fn persist_ip_forward(&self) -> Result<ActionStatus> {
        let path = &self.settings.sysctl_file;
        let current = sysctl::read(path)?;
        let updated = sysctl::persist_ip_forward(&current);

        if updated == current {
            return Ok(ActionStatus::AlreadySatisfied);
        }

        std::fs::write(path, &updated).context(format!("Failed to write {}", path.display()))?;
        self.gateway.reload_sysctl(path).await?;
        Ok(ActionStatus::Applied)
    }

    /// Delete every copy that matches, then insert exactly one.
    async fn upsert_rule(&self, rule: &FirewallRule) -> Result<ActionStatus> {
        let mut deleted = 0;
        while deleted < MAX_RULE_COPIES {
            match self.gateway.delete_rule(rule).await {
                Ok(()) => deleted += 1,
                Err(err) => {
                    tracing::debug!(%rule, error = %format!("{err:#}"), "no further copy to delete");
                    break;
                }
            }
        }
        if deleted > 1 {
            tracing::info!(%rule, copies = deleted, "removed duplicate rules");
        }
        self.gateway
            .insert_rule(rule)
            .await
            .context(format!("Failed to insert {}", rule))?;
        Ok(ActionStatus::Applied)
    }

    fn create_stanza(
        &self,
        snapshot: &Snapshot,
        document: &mut InterfacesDocument,
    ) -> Result<ActionStatus> {
        let address = match snapshot.nat.cidr {
            Some(cidr) => cidr,
            None => self.settings.nat_interface()?,
        };
        let directives = NatDirectives::new(snapshot.subnet, &snapshot.egress);

        if document.append_nat_bridge(&snapshot.nat.name, address, &directives) {
            Ok(ActionStatus::Applied)
        } else {
            Ok(ActionStatus::AlreadySatisfied)
        }
    }

    fn assign_mac(&self, document: &mut InterfacesDocument) -> Result<ActionStatus> {
        let bridge = &self.settings.nat_bridge;
        if document.iface_stanza(bridge).is_none() {
            return Err(anyhow!("no iface stanza for {} to carry a hwaddress", bridge));
        }

        let mac = MacAddr::random();
        document.set_hwaddress(bridge, &mac.to_string());
        tracing::info!(bridge = %bridge, %mac, "assigned new MAC address");
        Ok(ActionStatus::Applied)
    }

    fn write_document(&self, before: &InterfacesDocument, after: &InterfacesDocument) -> Result<()> {
        let path = &self.settings.interfaces_file;
        let diff = render_diff(&before.to_string(), &after.to_string(), path);
        tracing::info!("updating {}\n{}", path.display(), diff);
        after.write_to(path)
    }

    /// Prefer the persistence helper; fall back to writing `iptables-save`
    /// output to the restore location.
    async fn persist_rules(&self) -> Result<ActionStatus> {
        if self.gateway.has_persistence_helper().await.unwrap_or(false) {
            match self.gateway.run_persistence_helper().await {
                Ok(()) => return Ok(ActionStatus::Applied),
                Err(err) => {
                    tracing::warn!(error = %format!("{err:#}"), "persistence helper failed, writing rules file directly");
                }
            }
        }

        let rules = self.gateway.save_rules().await?;
        write_rules_file(&self.settings.rules_file, &rules)?;
        Ok(ActionStatus::Applied)
    }
}

/// Bridge defaults after the header and missing post-up hooks at the end of
/// the body. Every funnelled issue lands here; later calls find nothing left
/// to add.
fn complete_stanza(snapshot: &Snapshot, document: &mut InterfacesDocument) -> ActionStatus {
    let directives = NatDirectives::new(snapshot.subnet, &snapshot.egress);
    let defaults = document.ensure_bridge_defaults(&snapshot.nat.name);
    let hooks = document.ensure_post_up(&snapshot.nat.name, &directives);

    if defaults || hooks {
        ActionStatus::Applied
    } else {
        ActionStatus::AlreadySatisfied
    }
}

fn describe(issue: Issue) -> &'static str {
    match issue {
        Issue::IpForwardDisabled => "enable kernel IPv4 forwarding",
        Issue::IpForwardNotPersistent => "persist net.ipv4.ip_forward=1",
        Issue::MasqueradeRuleMissing => "install NAT MASQUERADE rule",
        Issue::ForwardRuleMissing => "install FORWARD ACCEPT rule",
        Issue::IptablesPersistentMissing => "install firewall persistence package",
        Issue::NatBridgeNotConfigured => "append NAT bridge stanza",
        Issue::BridgeStpNotConfigured
        | Issue::BridgeFdNotConfigured
        | Issue::BridgePortsNotConfigured
        | Issue::PostUpRulesMissing => "complete NAT bridge stanza",
        Issue::MacAddressConflict => "assign a fresh MAC address",
        Issue::PrimaryBridgeMissing
        | Issue::PrimaryBridgeNoIp
        | Issue::NatBridgeMissing
        | Issue::NatBridgeNoIp
        | Issue::NoInternet => "wait for network reload",
    }
}

fn write_rules_file(path: &Path, rules: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .context(format!("Failed to create directory {:?}", parent))?;
    }
    std::fs::write(path, rules).context(format!("Failed to write rules to {}", path.display()))?;

    tracing::info!(path = %path.display(), "wrote firewall rules");
    Ok(())
}

fn render_diff(current: &str, desired: &str, path: &Path) -> String {
    let name = path.display().to_string();
    TextDiff::from_lines(current, desired)
        .unified_diff()
        .context_radius(2)
        .header(&name, &name)
        .to_string()
}

use serde::{Deserialize, Serialize};
use std::fmt;

/// A named misconfiguration detected by the evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Issue {
    PrimaryBridgeMissing,
    PrimaryBridgeNoIp,
    NatBridgeMissing,
    NatBridgeNoIp,
    NatBridgeNotConfigured,
    IpForwardDisabled,
    IpForwardNotPersistent,
    MasqueradeRuleMissing,
    ForwardRuleMissing,
    IptablesPersistentMissing,
    BridgeStpNotConfigured,
    BridgeFdNotConfigured,
    BridgePortsNotConfigured,
    PostUpRulesMissing,
    MacAddressConflict,
    NoInternet,
}

impl Issue {
    pub fn as_str(&self) -> &'static str {
        match self {
            Issue::PrimaryBridgeMissing => "primary_bridge_missing",
            Issue::PrimaryBridgeNoIp => "primary_bridge_no_ip",
            Issue::NatBridgeMissing => "nat_bridge_missing",
            Issue::NatBridgeNoIp => "nat_bridge_no_ip",
            Issue::NatBridgeNotConfigured => "nat_bridge_not_configured",
            Issue::IpForwardDisabled => "ip_forward_disabled",
            Issue::IpForwardNotPersistent => "ip_forward_not_persistent",
            Issue::MasqueradeRuleMissing => "masquerade_rule_missing",
            Issue::ForwardRuleMissing => "forward_rule_missing",
            Issue::IptablesPersistentMissing => "iptables_persistent_missing",
            Issue::BridgeStpNotConfigured => "bridge_stp_not_configured",
            Issue::BridgeFdNotConfigured => "bridge_fd_not_configured",
            Issue::BridgePortsNotConfigured => "bridge_ports_not_configured",
            Issue::PostUpRulesMissing => "post_up_rules_missing",
            Issue::MacAddressConflict => "mac_address_conflict",
            Issue::NoInternet => "no_internet",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Issue::PrimaryBridgeMissing => "primary bridge does not exist",
            Issue::PrimaryBridgeNoIp => "primary bridge has no IPv4 address",
            Issue::NatBridgeMissing => "NAT bridge does not exist",
            Issue::NatBridgeNoIp => "NAT bridge has no IPv4 address",
            Issue::NatBridgeNotConfigured => "NAT bridge is not declared in the interfaces file",
            Issue::IpForwardDisabled => "kernel IPv4 forwarding is disabled",
            Issue::IpForwardNotPersistent => "IPv4 forwarding is not persisted in sysctl.conf",
            Issue::MasqueradeRuleMissing => "NAT MASQUERADE rule is missing",
            Issue::ForwardRuleMissing => "FORWARD ACCEPT rule is missing",
            Issue::IptablesPersistentMissing => "firewall persistence package is not installed",
            Issue::BridgeStpNotConfigured => "NAT bridge stanza lacks bridge_stp",
            Issue::BridgeFdNotConfigured => "NAT bridge stanza lacks bridge_fd",
            Issue::BridgePortsNotConfigured => "NAT bridge stanza lacks bridge_ports",
            Issue::PostUpRulesMissing => "NAT bridge stanza lacks forwarding/MASQUERADE post-up",
            Issue::MacAddressConflict => "two interfaces share the same MAC address",
            Issue::NoInternet => "host cannot reach the internet",
        }
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered, de-duplicated collection of issues. The first detection of an
/// issue fixes its position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssueSet {
    issues: Vec<Issue>,
}

impl IssueSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an issue. Returns `false` when it was already present.
    pub fn insert(&mut self, issue: Issue) -> bool {
        if self.issues.contains(&issue) {
            return false;
        }
        self.issues.push(issue);
        true
    }

    pub fn extend(&mut self, issues: impl IntoIterator<Item = Issue>) {
        for issue in issues {
            self.insert(issue);
        }
    }

    pub fn contains(&self, issue: Issue) -> bool {
        self.issues.contains(&issue)
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Issue> + '_ {
        self.issues.iter().copied()
    }

    pub fn as_slice(&self) -> &[Issue] {
        &self.issues
    }
}

impl IntoIterator for IssueSet {
    type Item = Issue;
    type IntoIter = std::vec::IntoIter<Issue>;

    fn into_iter(self) -> Self::IntoIter {
        self.issues.into_iter()
    }
}

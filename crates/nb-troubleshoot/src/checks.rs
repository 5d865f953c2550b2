use crate::inspect::Snapshot;
use nb_core::{BridgeState, Issue, IssueSet, LinkState, MacAddr};
use std::collections::HashMap;

/// Run every check against `snapshot`. Checks never short-circuit; the
/// resulting set keeps first-detection order.
pub fn evaluate(snapshot: &Snapshot) -> IssueSet {
    let mut issues = IssueSet::new();

    issues.extend(check_bridge(&snapshot.primary, Issue::PrimaryBridgeMissing, Issue::PrimaryBridgeNoIp));
    issues.extend(check_bridge(&snapshot.nat, Issue::NatBridgeMissing, Issue::NatBridgeNoIp));
    issues.extend(check_nat_declared(snapshot));
    issues.extend(check_forwarding(snapshot));
    issues.extend(check_nat(snapshot));
    issues.extend(check_bridge_directives(snapshot));
    issues.extend(check_forward_rule(snapshot));
    issues.extend(check_internet(snapshot));
    issues.extend(check_mac_conflicts(&snapshot.links));

    for issue in issues.iter() {
        tracing::warn!(issue = %issue, "{}", issue.description());
    }
    tracing::info!(count = issues.len(), "evaluation complete");

    issues
}

fn check_bridge(bridge: &BridgeState, missing: Issue, no_ip: Issue) -> Vec<Issue> {
    if !bridge.exists {
        return vec![missing];
    }
    if !bridge.has_ipv4 {
        return vec![no_ip];
    }

    tracing::debug!(bridge = %bridge.name, cidr = ?bridge.cidr, "bridge present");
    Vec::new()
}

fn check_nat_declared(snapshot: &Snapshot) -> Vec<Issue> {
    if snapshot.document.iface_stanza(&snapshot.nat.name).is_some() {
        return Vec::new();
    }
    vec![Issue::NatBridgeNotConfigured]
}

fn check_forwarding(snapshot: &Snapshot) -> Vec<Issue> {
    let mut issues = Vec::new();

    if !snapshot.ip_forward_live {
        issues.push(Issue::IpForwardDisabled);
    }
    if !snapshot.ip_forward_persisted {
        issues.push(Issue::IpForwardNotPersistent);
    }

    let declared = snapshot
        .document
        .iface_stanza(&snapshot.nat.name)
        .map(|stanza| stanza.has_forward_post_up());
    if declared == Some(false) {
        issues.push(Issue::PostUpRulesMissing);
    }

    issues
}

fn check_nat(snapshot: &Snapshot) -> Vec<Issue> {
    let mut issues = Vec::new();

    if !snapshot.masquerade_present {
        tracing::debug!(rule = %snapshot.masquerade_rule(), "rule not found");
        issues.push(Issue::MasqueradeRuleMissing);
    }

    let persisted = snapshot
        .document
        .iface_stanza(&snapshot.nat.name)
        .map(|stanza| stanza.has_masquerade_post_up());
    if persisted == Some(false) {
        issues.push(Issue::PostUpRulesMissing);
    }

    if !snapshot.persistence_installed {
        issues.push(Issue::IptablesPersistentMissing);
    }

    issues
}

fn check_bridge_directives(snapshot: &Snapshot) -> Vec<Issue> {
    let Some(stanza) = snapshot.document.iface_stanza(&snapshot.nat.name) else {
        return Vec::new();
    };

    [
        ("bridge_stp", Issue::BridgeStpNotConfigured),
        ("bridge_fd", Issue::BridgeFdNotConfigured),
        ("bridge_ports", Issue::BridgePortsNotConfigured),
    ]
    .into_iter()
    .filter(|(key, _)| !stanza.has_directive(key))
    .map(|(_, issue)| issue)
    .collect()
}

fn check_forward_rule(snapshot: &Snapshot) -> Vec<Issue> {
    if snapshot.forward_present {
        return Vec::new();
    }
    tracing::debug!(rule = %snapshot.forward_rule(), "rule not found");
    vec![Issue::ForwardRuleMissing]
}

fn check_internet(snapshot: &Snapshot) -> Vec<Issue> {
    if snapshot.internet_reachable {
        return Vec::new();
    }
    vec![Issue::NoInternet]
}

/// A second link reusing a non-zero MAC is a collision, unless one of the
/// two is the bridge the other is enslaved to.
pub fn check_mac_conflicts(links: &[LinkState]) -> Vec<Issue> {
    let mut seen: HashMap<MacAddr, &LinkState> = HashMap::new();
    let mut conflict = false;

    for link in links {
        let Some(mac) = link.mac.filter(|mac| !mac.is_zero()) else {
            continue;
        };

        match seen.get(&mac) {
            Some(first) if is_bridge_and_port(first, link) => {}
            Some(first) => {
                tracing::warn!(%mac, first = %first.name, second = %link.name, "duplicate MAC address");
                conflict = true;
            }
            None => {
                seen.insert(mac, link);
            }
        }
    }

    if conflict {
        vec![Issue::MacAddressConflict]
    } else {
        Vec::new()
    }
}

fn is_bridge_and_port(a: &LinkState, b: &LinkState) -> bool {
    a.controller == Some(b.index) || b.controller == Some(a.index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{healthy_snapshot, link};

    #[test]
    fn healthy_host_has_no_issues() {
        assert!(evaluate(&healthy_snapshot()).is_empty());
    }

    #[test]
    fn missing_bridge_does_not_also_report_no_ip() {
        let mut snapshot = healthy_snapshot();
        snapshot.primary = BridgeState::absent("br0");

        let issues = evaluate(&snapshot);
        assert!(issues.contains(Issue::PrimaryBridgeMissing));
        assert!(!issues.contains(Issue::PrimaryBridgeNoIp));
    }

    #[test]
    fn bridge_without_address() {
        let mut snapshot = healthy_snapshot();
        snapshot.nat.has_ipv4 = false;
        snapshot.nat.cidr = None;

        let issues = evaluate(&snapshot);
        assert_eq!(issues.as_slice(), &[Issue::NatBridgeNoIp]);
    }

    #[test]
    fn undeclared_stanza_skips_directive_checks() {
        let mut snapshot = healthy_snapshot();
        snapshot.document = nb_core::InterfacesDocument::parse("auto br0\niface br0 inet dhcp\n");

        let issues = evaluate(&snapshot);
        assert_eq!(issues.as_slice(), &[Issue::NatBridgeNotConfigured]);
    }

    #[test]
    fn inet6_stanza_does_not_declare_the_bridge() {
        let mut snapshot = healthy_snapshot();
        snapshot.document = nb_core::InterfacesDocument::parse(
            "auto br1\niface br1 inet6 static\n    address fd00::1/64\n",
        );

        let issues = evaluate(&snapshot);
        assert_eq!(issues.as_slice(), &[Issue::NatBridgeNotConfigured]);
    }

    #[test]
    fn missing_post_up_is_reported_once() {
        let mut snapshot = healthy_snapshot();
        snapshot.document = nb_core::InterfacesDocument::parse(
            "iface br1 inet static\n    address 192.168.100.1/24\n    bridge_ports none\n    bridge_stp off\n    bridge_fd 0\n",
        );

        let issues = evaluate(&snapshot);
        assert_eq!(issues.as_slice(), &[Issue::PostUpRulesMissing]);
    }

    #[test]
    fn every_failing_check_contributes_in_order() {
        let mut snapshot = healthy_snapshot();
        snapshot.ip_forward_live = false;
        snapshot.ip_forward_persisted = false;
        snapshot.masquerade_present = false;
        snapshot.forward_present = false;
        snapshot.persistence_installed = false;
        snapshot.internet_reachable = false;

        let issues = evaluate(&snapshot);
        assert_eq!(
            issues.as_slice(),
            &[
                Issue::IpForwardDisabled,
                Issue::IpForwardNotPersistent,
                Issue::MasqueradeRuleMissing,
                Issue::IptablesPersistentMissing,
                Issue::ForwardRuleMissing,
                Issue::NoInternet,
            ]
        );
    }

    #[test]
    fn stanza_directive_checks() {
        let mut snapshot = healthy_snapshot();
        snapshot.document = nb_core::InterfacesDocument::parse(
            "iface br1 inet static\n    address 192.168.100.1/24\n    bridge-stp off\n    post-up echo 1 > /proc/sys/net/ipv4/ip_forward\n    post-up iptables -t nat -A POSTROUTING -s 192.168.100.0/24 -o br0 -j MASQUERADE\n",
        );

        let issues = evaluate(&snapshot);
        assert_eq!(
            issues.as_slice(),
            &[Issue::BridgeFdNotConfigured, Issue::BridgePortsNotConfigured]
        );
    }

    #[test]
    fn shared_mac_between_unrelated_links() {
        let links = vec![
            link("eth0", 2, "52:54:00:aa:bb:cc", None),
            link("eth1", 3, "52:54:00:aa:bb:cc", None),
            link("eth2", 4, "52:54:00:aa:bb:cc", None),
        ];
        assert_eq!(check_mac_conflicts(&links), vec![Issue::MacAddressConflict]);
    }

    #[test]
    fn bridge_sharing_mac_with_its_port_is_fine() {
        let links = vec![
            link("br0", 5, "52:54:00:aa:bb:cc", None),
            link("eth0", 2, "52:54:00:aa:bb:cc", Some(5)),
            link("lo", 1, "00:00:00:00:00:00", None),
            link("dummy0", 6, "00:00:00:00:00:00", None),
        ];
        assert!(check_mac_conflicts(&links).is_empty());
    }
}

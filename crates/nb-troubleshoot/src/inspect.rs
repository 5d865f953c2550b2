use anyhow::{Context, Result};
use ipnet::Ipv4Net;
use nb_core::{
    BridgeState, FirewallRule, InterfacesDocument, LinkState, Settings, SystemGateway, sysctl,
};
use std::fmt;

/// Where the NAT subnet was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubnetSource {
    LiveBridge,
    InterfacesFile,
    Default,
}

impl fmt::Display for SubnetSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SubnetSource::LiveBridge => "live bridge",
            SubnetSource::InterfacesFile => "interfaces file",
            SubnetSource::Default => "default",
        };
        f.write_str(name)
    }
}

/// Immutable view of the host taken once per run. Every check and handler
/// reads from this instead of querying the system again.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub primary: BridgeState,
    pub nat: BridgeState,
    pub links: Vec<LinkState>,
    /// Outbound interface for internet traffic.
    pub egress: String,
    pub document: InterfacesDocument,
    pub ip_forward_live: bool,
    pub ip_forward_persisted: bool,
    pub subnet: Ipv4Net,
    pub subnet_source: SubnetSource,
    pub masquerade_present: bool,
    pub forward_present: bool,
    pub persistence_installed: bool,
    pub internet_reachable: bool,
}

impl Snapshot {
    pub fn masquerade_rule(&self) -> FirewallRule {
        FirewallRule::masquerade(self.subnet, &self.egress)
    }

    pub fn forward_rule(&self) -> FirewallRule {
        FirewallRule::forward_accept(self.subnet)
    }
}

/// Pick the NAT subnet: live bridge, then the stanza's first address, then
/// the configured default.
pub fn resolve_subnet(
    nat: &BridgeState,
    document: &InterfacesDocument,
    settings: &Settings,
) -> Result<(Ipv4Net, SubnetSource)> {
    if let Some(subnet) = nat.subnet {
        return Ok((subnet, SubnetSource::LiveBridge));
    }
    if let Some(address) = document.configured_address(&nat.name) {
        return Ok((address.trunc(), SubnetSource::InterfacesFile));
    }
    Ok((settings.default_subnet()?, SubnetSource::Default))
}

fn or_warn<T>(result: Result<T>, fallback: T, what: &str) -> T {
    match result {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!(error = %format!("{err:#}"), "could not determine {what}");
            fallback
        }
    }
}

/// Read-only collection of live and persisted state.
pub struct Inspector<'a, G> {
    gateway: &'a G,
    settings: &'a Settings,
}

impl<'a, G: SystemGateway> Inspector<'a, G> {
    pub fn new(gateway: &'a G, settings: &'a Settings) -> Self {
        Self { gateway, settings }
    }

    pub async fn inspect(&self) -> Result<Snapshot> {
        let settings = self.settings;

        let links = self.gateway.links().await.context("Failed to list links")?;
        let primary = BridgeState::from_links(&settings.primary_bridge, &links);
        let nat = BridgeState::from_links(&settings.nat_bridge, &links);
        tracing::debug!(?primary, ?nat, "bridge state");

        let egress = or_warn(
            self.gateway.egress_interface(settings.probe_host).await,
            None,
            "egress interface",
        )
        .filter(|iface| *iface != settings.nat_bridge)
        .unwrap_or_else(|| {
            tracing::warn!(
                fallback = %settings.primary_bridge,
                "no route to {}, using primary bridge as egress",
                settings.probe_host
            );
            settings.primary_bridge.clone()
        });

        let document = InterfacesDocument::from_file(&settings.interfaces_file)?;
        if document.is_empty() {
            tracing::warn!(path = %settings.interfaces_file.display(), "interfaces file is empty or missing");
        }

        let ip_forward_live = or_warn(self.gateway.ip_forward_enabled().await, false, "kernel ip_forward");
        let sysctl_text = sysctl::read(&settings.sysctl_file)?;
        let ip_forward_persisted = sysctl::ip_forward_persisted(&sysctl_text);

        let (subnet, subnet_source) = resolve_subnet(&nat, &document, settings)?;
        tracing::info!(%subnet, source = %subnet_source, egress = %egress, "NAT parameters");

        let masquerade_present = or_warn(
            self.gateway
                .rule_exists(&FirewallRule::masquerade(subnet, &egress))
                .await,
            false,
            "MASQUERADE rule",
        );
        let forward_present = or_warn(
            self.gateway
                .rule_exists(&FirewallRule::forward_accept(subnet))
                .await,
            false,
            "FORWARD rule",
        );
        let persistence_installed = or_warn(
            self.gateway.package_installed(&settings.persistence_package).await,
            false,
            "persistence package",
        );
        let internet_reachable = or_warn(
            self.gateway
                .probe_internet(settings.probe_addr(), settings.probe_timeout())
                .await,
            false,
            "internet reachability",
        );

        Ok(Snapshot {
            primary,
            nat,
            links,
            egress,
            document,
            ip_forward_live,
            ip_forward_persisted,
            subnet,
            subnet_source,
            masquerade_present,
            forward_present,
            persistence_installed,
            internet_reachable,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeGateway, HEALTHY_INTERFACES, temp_settings};

    fn settings() -> Settings {
        Settings::default()
    }

    #[test]
    fn live_subnet_wins() {
        let nat = BridgeState {
            subnet: Some("10.1.2.0/24".parse().unwrap()),
            ..BridgeState::absent("br1")
        };
        let doc = InterfacesDocument::parse("iface br1 inet static\n address 172.16.0.1/16\n");

        let (subnet, source) = resolve_subnet(&nat, &doc, &settings()).unwrap();
        assert_eq!(subnet.to_string(), "10.1.2.0/24");
        assert_eq!(source, SubnetSource::LiveBridge);
    }

    #[test]
    fn interfaces_file_zeroes_host_octet() {
        let doc = InterfacesDocument::parse("iface br1 inet static\n address 172.16.5.1\n");

        let (subnet, source) = resolve_subnet(&BridgeState::absent("br1"), &doc, &settings()).unwrap();
        assert_eq!(subnet.to_string(), "172.16.5.0/24");
        assert_eq!(source, SubnetSource::InterfacesFile);
    }

    #[test]
    fn default_subnet_is_last_resort() {
        let doc = InterfacesDocument::parse("iface br0 inet dhcp\n");

        let (subnet, source) = resolve_subnet(&BridgeState::absent("br1"), &doc, &settings()).unwrap();
        assert_eq!(subnet.to_string(), "192.168.100.0/24");
        assert_eq!(source, SubnetSource::Default);
    }

    async fn inspect_with_egress(egress: Option<&str>) -> Snapshot {
        let dir = tempfile::tempdir().unwrap();
        let settings = temp_settings(dir.path());
        std::fs::write(&settings.interfaces_file, HEALTHY_INTERFACES).unwrap();
        let gateway = FakeGateway::healthy();
        gateway.state().egress = egress.map(str::to_string);

        Inspector::new(&gateway, &settings).inspect().await.unwrap()
    }

    #[tokio::test]
    async fn missing_route_falls_back_to_primary_bridge() {
        let snapshot = inspect_with_egress(None).await;

        assert_eq!(snapshot.egress, "br0");
        assert_eq!(snapshot.masquerade_rule().out_iface.as_deref(), Some("br0"));
        assert!(snapshot.masquerade_present);
    }

    #[tokio::test]
    async fn route_through_nat_bridge_is_rejected() {
        let snapshot = inspect_with_egress(Some("br1")).await;

        assert_eq!(snapshot.egress, "br0");
        assert_eq!(snapshot.masquerade_rule().out_iface.as_deref(), Some("br0"));
    }

    #[tokio::test]
    async fn masquerade_rule_follows_routed_egress() {
        let snapshot = inspect_with_egress(Some("eth9")).await;

        assert_eq!(snapshot.egress, "eth9");
        assert_eq!(snapshot.masquerade_rule().out_iface.as_deref(), Some("eth9"));
        // installed rule leaves through br0, not eth9
        assert!(!snapshot.masquerade_present);
        assert!(snapshot.forward_present);
    }
}

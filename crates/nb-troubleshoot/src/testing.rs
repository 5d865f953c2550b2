//! In-memory host used by the engine tests.

use crate::inspect::{Snapshot, SubnetSource};
use anyhow::{Result, bail};
use ipnet::Ipv4Net;
use nb_core::{BridgeState, FirewallRule, InterfacesDocument, LinkState, Settings, SystemGateway};
use std::cell::{RefCell, RefMut};
use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

pub const HEALTHY_INTERFACES: &str = "\
# managed by hand
source /etc/network/interfaces.d/*

auto lo
iface lo inet loopback

auto br0
iface br0 inet dhcp
    bridge_ports eth0

auto br1
iface br1 inet static
    address 192.168.100.1/24
    bridge_ports none
    bridge_stp off
    bridge_fd 0
    post-up echo 1 > /proc/sys/net/ipv4/ip_forward
    post-up iptables -t nat -A POSTROUTING -s 192.168.100.0/24 -o br0 -j MASQUERADE
    post-down iptables -t nat -D POSTROUTING -s 192.168.100.0/24 -o br0 -j MASQUERADE
";

pub const HEALTHY_SYSCTL: &str = "# kernel tuning\nvm.swappiness=10\nnet.ipv4.ip_forward=1\n";

pub fn link(name: &str, index: u32, mac: &str, controller: Option<u32>) -> LinkState {
    LinkState {
        name: name.to_string(),
        index,
        admin_up: true,
        addresses: Vec::new(),
        mac: Some(mac.parse().unwrap()),
        controller,
    }
}

pub fn bridge(name: &str, index: u32, mac: &str, cidr: &str) -> LinkState {
    LinkState {
        addresses: vec![cidr.parse().unwrap()],
        ..link(name, index, mac, None)
    }
}

pub fn healthy_links() -> Vec<LinkState> {
    vec![
        link("lo", 1, "00:00:00:00:00:00", None),
        link("eth0", 2, "52:54:00:10:00:01", Some(3)),
        bridge("br0", 3, "52:54:00:10:00:01", "10.0.0.2/24"),
        bridge("br1", 4, "52:54:00:20:00:01", "192.168.100.1/24"),
    ]
}

pub fn subnet() -> Ipv4Net {
    "192.168.100.0/24".parse().unwrap()
}

pub fn healthy_snapshot() -> Snapshot {
    let links = healthy_links();
    Snapshot {
        primary: BridgeState::from_links("br0", &links),
        nat: BridgeState::from_links("br1", &links),
        links,
        egress: "br0".to_string(),
        document: InterfacesDocument::parse(HEALTHY_INTERFACES),
        ip_forward_live: true,
        ip_forward_persisted: true,
        subnet: subnet(),
        subnet_source: SubnetSource::LiveBridge,
        masquerade_present: true,
        forward_present: true,
        persistence_installed: true,
        internet_reachable: true,
    }
}

/// Settings whose files all live under `dir`, with no settle delay.
pub fn temp_settings(dir: &Path) -> Settings {
    Settings {
        interfaces_file: dir.join("interfaces"),
        sysctl_file: dir.join("sysctl.conf"),
        rules_file: dir.join("iptables/rules.v4"),
        backup_dir: dir.join("backups"),
        settle_delay_secs: 0,
        ..Settings::default()
    }
}

#[derive(Debug)]
pub struct FakeState {
    pub links: Vec<LinkState>,
    pub egress: Option<String>,
    pub ip_forward: bool,
    pub rules: Vec<FirewallRule>,
    pub helper: bool,
    pub helper_fails: bool,
    pub packages: HashSet<String>,
    pub service_ok: bool,
    pub reachable: bool,
    /// Mutating calls in the order they were made.
    pub calls: Vec<String>,
}

#[derive(Debug)]
pub struct FakeGateway {
    state: RefCell<FakeState>,
}

impl FakeGateway {
    /// A host on which every check passes.
    pub fn healthy() -> Self {
        let rules = vec![
            FirewallRule::masquerade(subnet(), "br0"),
            FirewallRule::forward_accept(subnet()),
        ];
        Self {
            state: RefCell::new(FakeState {
                links: healthy_links(),
                egress: Some("br0".to_string()),
                ip_forward: true,
                rules,
                helper: true,
                helper_fails: false,
                packages: HashSet::from(["iptables-persistent".to_string()]),
                service_ok: true,
                reachable: true,
                calls: Vec::new(),
            }),
        }
    }

    pub fn state(&self) -> RefMut<'_, FakeState> {
        self.state.borrow_mut()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.borrow().calls.clone()
    }

    pub fn count_rules(&self, rule: &FirewallRule) -> usize {
        self.state.borrow().rules.iter().filter(|r| *r == rule).count()
    }

    fn record(&self, call: String) {
        self.state.borrow_mut().calls.push(call);
    }
}

impl SystemGateway for FakeGateway {
    async fn links(&self) -> Result<Vec<LinkState>> {
        Ok(self.state.borrow().links.clone())
    }

    async fn egress_interface(&self, _probe: Ipv4Addr) -> Result<Option<String>> {
        Ok(self.state.borrow().egress.clone())
    }

    async fn set_link_up(&self, name: &str) -> Result<()> {
        self.record(format!("up {name}"));
        let mut state = self.state.borrow_mut();
        match state.links.iter_mut().find(|l| l.name == name) {
            Some(link) => {
                link.admin_up = true;
                Ok(())
            }
            None => bail!("no such link {name}"),
        }
    }

    async fn set_link_down(&self, name: &str) -> Result<()> {
        self.record(format!("down {name}"));
        let mut state = self.state.borrow_mut();
        match state.links.iter_mut().find(|l| l.name == name) {
            Some(link) => {
                link.admin_up = false;
                Ok(())
            }
            None => bail!("no such link {name}"),
        }
    }

    async fn add_address(&self, name: &str, address: Ipv4Net) -> Result<()> {
        self.record(format!("addr {name} {address}"));
        let mut state = self.state.borrow_mut();
        let Some(link) = state.links.iter_mut().find(|l| l.name == name) else {
            bail!("no such link {name}");
        };
        if !link.addresses.contains(&address) {
            link.addresses.push(address);
        }
        Ok(())
    }

    async fn ip_forward_enabled(&self) -> Result<bool> {
        Ok(self.state.borrow().ip_forward)
    }

    async fn set_ip_forward(&self, enabled: bool) -> Result<()> {
        self.record(format!("ip_forward {enabled}"));
        self.state.borrow_mut().ip_forward = enabled;
        Ok(())
    }

    async fn reload_sysctl(&self, path: &Path) -> Result<()> {
        self.record(format!("sysctl -p {}", path.display()));
        Ok(())
    }

    async fn rule_exists(&self, rule: &FirewallRule) -> Result<bool> {
        Ok(self.state.borrow().rules.contains(rule))
    }

    async fn insert_rule(&self, rule: &FirewallRule) -> Result<()> {
        self.record(rule.shell_command("-I"));
        self.state.borrow_mut().rules.insert(0, rule.clone());
        Ok(())
    }

    async fn delete_rule(&self, rule: &FirewallRule) -> Result<()> {
        self.record(rule.shell_command("-D"));
        let mut state = self.state.borrow_mut();
        match state.rules.iter().position(|r| r == rule) {
            Some(idx) => {
                state.rules.remove(idx);
                Ok(())
            }
            None => bail!("iptables: Bad rule (does a matching rule exist in that chain?)."),
        }
    }

    async fn save_rules(&self) -> Result<String> {
        let state = self.state.borrow();
        let mut text = String::from("# Generated by fake-save\n");
        for rule in &state.rules {
            text.push_str(&rule.command_args("-A").join(" "));
            text.push('\n');
        }
        text.push_str("COMMIT\n");
        Ok(text)
    }

    async fn has_persistence_helper(&self) -> Result<bool> {
        Ok(self.state.borrow().helper)
    }

    async fn run_persistence_helper(&self) -> Result<()> {
        self.record("netfilter-persistent save".to_string());
        if self.state.borrow().helper_fails {
            bail!("netfilter-persistent save failed");
        }
        Ok(())
    }

    async fn package_installed(&self, package: &str) -> Result<bool> {
        Ok(self.state.borrow().packages.contains(package))
    }

    async fn install_package(&self, package: &str) -> Result<()> {
        self.record(format!("install {package}"));
        self.state.borrow_mut().packages.insert(package.to_string());
        Ok(())
    }

    async fn restart_service(&self, service: &str) -> Result<()> {
        self.record(format!("restart {service}"));
        if !self.state.borrow().service_ok {
            bail!("Failed to restart {service}: unit failed");
        }
        Ok(())
    }

    async fn probe_internet(&self, _target: SocketAddr, _timeout: Duration) -> Result<bool> {
        Ok(self.state.borrow().reachable)
    }

    async fn sleep(&self, duration: Duration) {
        self.record(format!("sleep {}", duration.as_secs()));
    }
}

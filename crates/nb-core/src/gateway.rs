use crate::bridge::LinkState;
use crate::firewall::FirewallRule;
use anyhow::Result;
use ipnet::Ipv4Net;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

/// Everything the engine needs from the live host.
///
/// The live implementation shells out to iproute2/iptables/systemctl and
/// talks rtnetlink; tests substitute an in-memory fake. Calls are awaited
/// one at a time, so implementations never see concurrent use.
#[allow(async_fn_in_trait)]
pub trait SystemGateway {
    /// Every link with its flags, IPv4 addresses, MAC and controller.
    async fn links(&self) -> Result<Vec<LinkState>>;

    /// Interface the kernel would route `probe` through.
    async fn egress_interface(&self, probe: Ipv4Addr) -> Result<Option<String>>;

    async fn set_link_up(&self, name: &str) -> Result<()>;

    async fn set_link_down(&self, name: &str) -> Result<()>;

    /// Assign an address; an already assigned address is not an error.
    async fn add_address(&self, name: &str, address: Ipv4Net) -> Result<()>;

    async fn ip_forward_enabled(&self) -> Result<bool>;

    async fn set_ip_forward(&self, enabled: bool) -> Result<()>;

    /// Re-apply a kernel parameter file.
    async fn reload_sysctl(&self, path: &Path) -> Result<()>;

    async fn rule_exists(&self, rule: &FirewallRule) -> Result<bool>;

    async fn insert_rule(&self, rule: &FirewallRule) -> Result<()>;

    /// Fails when no matching rule exists.
    async fn delete_rule(&self, rule: &FirewallRule) -> Result<()>;

    /// Full rule table in `iptables-save` format.
    async fn save_rules(&self) -> Result<String>;

    /// Whether a dedicated rule persistence helper is installed.
    async fn has_persistence_helper(&self) -> Result<bool>;

    async fn run_persistence_helper(&self) -> Result<()>;

    async fn package_installed(&self, package: &str) -> Result<bool>;

    async fn install_package(&self, package: &str) -> Result<()>;

    async fn restart_service(&self, service: &str) -> Result<()>;

    async fn probe_internet(&self, target: SocketAddr, timeout: Duration) -> Result<bool>;

    async fn sleep(&self, duration: Duration);
}

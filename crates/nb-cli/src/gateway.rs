use anyhow::Result;
use ipnet::Ipv4Net;
use nb_core::{FirewallRule, LinkState, SystemGateway};
use nb_fw::IptablesManager;
use nb_host::{KernelParams, PackageManager, ServiceManager, check_tcp_connectivity};
use nb_nl::{AddressManager, LinkManager, RouteResolver};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

/// The real host: rtnetlink for links and addresses, iptables, procfs,
/// systemd and apt.
pub struct LiveGateway {
    links: LinkManager,
    addresses: AddressManager,
    routes: RouteResolver,
    firewall: IptablesManager,
    kernel: KernelParams,
    services: ServiceManager,
    packages: PackageManager,
}

impl LiveGateway {
    /// Must be called from within the runtime; the netlink connections are
    /// spawned onto it.
    pub async fn connect() -> Result<Self> {
        Ok(Self {
            links: LinkManager::new().await?,
            addresses: AddressManager::new().await?,
            routes: RouteResolver::new(),
            firewall: IptablesManager::new(),
            kernel: KernelParams::new(),
            services: ServiceManager::new(),
            packages: PackageManager::new(),
        })
    }
}

impl SystemGateway for LiveGateway {
    async fn links(&self) -> Result<Vec<LinkState>> {
        self.links.links().await
    }

    async fn egress_interface(&self, probe: Ipv4Addr) -> Result<Option<String>> {
        self.routes.egress_interface(probe).await
    }

    async fn set_link_up(&self, name: &str) -> Result<()> {
        self.links.set_up(name).await
    }

    async fn set_link_down(&self, name: &str) -> Result<()> {
        self.links.set_down(name).await
    }

    async fn add_address(&self, name: &str, address: Ipv4Net) -> Result<()> {
        self.addresses.add_address(name, address).await
    }

    async fn ip_forward_enabled(&self) -> Result<bool> {
        self.kernel.ip_forward_enabled()
    }

    async fn set_ip_forward(&self, enabled: bool) -> Result<()> {
        self.kernel.set_ip_forward(enabled)
    }

    async fn reload_sysctl(&self, path: &Path) -> Result<()> {
        self.kernel.reload(path).await
    }

    async fn rule_exists(&self, rule: &FirewallRule) -> Result<bool> {
        self.firewall.rule_exists(rule).await
    }

    async fn insert_rule(&self, rule: &FirewallRule) -> Result<()> {
        self.firewall.insert_rule(rule).await
    }

    async fn delete_rule(&self, rule: &FirewallRule) -> Result<()> {
        self.firewall.delete_rule(rule).await
    }

    async fn save_rules(&self) -> Result<String> {
        self.firewall.save_rules().await
    }

    async fn has_persistence_helper(&self) -> Result<bool> {
        Ok(self.firewall.has_persistence_helper())
    }

    async fn run_persistence_helper(&self) -> Result<()> {
        self.firewall.run_persistence_helper().await
    }

    async fn package_installed(&self, package: &str) -> Result<bool> {
        self.packages.is_installed(package).await
    }

    async fn install_package(&self, package: &str) -> Result<()> {
        self.packages.install(package).await
    }

    async fn restart_service(&self, service: &str) -> Result<()> {
        self.services.restart(service).await
    }

    async fn probe_internet(&self, target: SocketAddr, timeout: Duration) -> Result<bool> {
        Ok(check_tcp_connectivity(target, timeout).await)
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

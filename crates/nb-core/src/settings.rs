use crate::error::NatError;
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that overrides the settings file location.
pub const SETTINGS_ENV: &str = "NATBRIDGE_CONFIG";

pub const DEFAULT_SETTINGS_PATH: &str = "/etc/natbridge/natbridge.yaml";

/// Host layout the engine operates on. Every field is optional in the YAML
/// file; missing fields fall back to the Debian/ifupdown defaults below.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Bridge that carries the uplink.
    pub primary_bridge: String,
    /// Bridge whose subnet is masqueraded through the primary bridge.
    pub nat_bridge: String,
    /// Static address written into a freshly created NAT bridge stanza.
    pub nat_address: String,
    pub interfaces_file: PathBuf,
    pub sysctl_file: PathBuf,
    pub rules_file: PathBuf,
    pub backup_dir: PathBuf,
    pub probe_host: Ipv4Addr,
    pub probe_port: u16,
    pub probe_timeout_secs: u64,
    pub settle_delay_secs: u64,
    pub network_service: String,
    pub persistence_package: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            primary_bridge: "br0".to_string(),
            nat_bridge: "br1".to_string(),
            nat_address: "192.168.100.1/24".to_string(),
            interfaces_file: PathBuf::from("/etc/network/interfaces"),
            sysctl_file: PathBuf::from("/etc/sysctl.conf"),
            rules_file: PathBuf::from("/etc/iptables/rules.v4"),
            backup_dir: PathBuf::from("/var/backups/natbridge"),
            probe_host: Ipv4Addr::new(8, 8, 8, 8),
            probe_port: 53,
            probe_timeout_secs: 3,
            settle_delay_secs: 5,
            network_service: "networking".to_string(),
            persistence_package: "iptables-persistent".to_string(),
        }
    }
}

impl Settings {
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let settings: Settings = serde_yaml::from_str(yaml)?;
        settings.nat_interface()?;
        Ok(settings)
    }

    /// Load settings from `path`. A missing file yields the defaults.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let settings: Settings =
            serde_yaml::from_str(&content).map_err(|source| NatError::Settings {
                path: path.display().to_string(),
                source,
            })?;
        settings.nat_interface()?;
        Ok(settings)
    }

    /// Resolve the settings path from the environment, then load it.
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var_os(SETTINGS_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_PATH));
        Self::from_file(&path)
    }

    /// Default NAT bridge address with its prefix length.
    pub fn nat_interface(&self) -> Result<Ipv4Net, NatError> {
        self.nat_address
            .parse::<Ipv4Net>()
            .map_err(|e| NatError::InvalidCidr {
                value: self.nat_address.clone(),
                reason: e.to_string(),
            })
    }

    /// Fallback NAT subnet when neither live state nor the interfaces file
    /// yield one.
    pub fn default_subnet(&self) -> Result<Ipv4Net, NatError> {
        Ok(self.nat_interface()?.trunc())
    }

    pub fn probe_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.probe_host, self.probe_port))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }
}

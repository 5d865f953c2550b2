use crate::inspect::Snapshot;
use anyhow::Result;
use nb_core::{BridgeState, InterfacesDocument, Settings, SystemGateway};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPath {
    /// The network service restarted cleanly.
    Service,
    /// Manual down/up of the NAT bridge after the service failed.
    ManualBridge,
    /// Neither worked.
    Failed,
}

impl fmt::Display for RestartPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartPath::Service => write!(f, "service restart"),
            RestartPath::ManualBridge => write!(f, "manual bridge restart"),
            RestartPath::Failed => write!(f, "restart failed"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Verification {
    pub restart_path: RestartPath,
    /// Bridges that were found administratively down and brought up.
    pub raised: Vec<String>,
    pub bridges_up: bool,
    pub internet: bool,
}

impl Verification {
    pub fn passed(&self) -> bool {
        self.bridges_up && self.internet
    }
}

pub struct Verifier<'a, G> {
    gateway: &'a G,
    settings: &'a Settings,
}

impl<'a, G: SystemGateway> Verifier<'a, G> {
    pub fn new(gateway: &'a G, settings: &'a Settings) -> Self {
        Self { gateway, settings }
    }

    /// Reload networking, wait for it to settle, then re-check that both
    /// bridges are up and the internet answers. Failures are reported in
    /// the result, never retried.
    pub async fn verify(&self, snapshot: &Snapshot, document: &InterfacesDocument) -> Verification {
        let restart_path = self.restart(document).await;

        self.gateway.sleep(self.settings.settle_delay()).await;

        let (raised, bridges_up) = self.raise_bridges().await;

        let internet = self
            .gateway
            .probe_internet(self.settings.probe_addr(), self.settings.probe_timeout())
            .await
            .unwrap_or_else(|err| {
                tracing::warn!(error = %format!("{err:#}"), "reachability probe failed to run");
                false
            });

        if internet {
            tracing::info!(egress = %snapshot.egress, "internet reachable");
        } else {
            tracing::warn!(probe = %self.settings.probe_addr(), "internet still unreachable after remediation");
        }

        Verification {
            restart_path,
            raised,
            bridges_up,
            internet,
        }
    }

    async fn restart(&self, document: &InterfacesDocument) -> RestartPath {
        let service = &self.settings.network_service;
        match self.gateway.restart_service(service).await {
            Ok(()) => return RestartPath::Service,
            Err(err) => {
                tracing::warn!(service = %service, error = %format!("{err:#}"), "service restart failed, restarting bridge manually");
            }
        }

        match self.restart_bridge(document).await {
            Ok(()) => RestartPath::ManualBridge,
            Err(err) => {
                tracing::error!(error = %format!("{err:#}"), "manual bridge restart failed");
                RestartPath::Failed
            }
        }
    }

    async fn restart_bridge(&self, document: &InterfacesDocument) -> Result<()> {
        let bridge = &self.settings.nat_bridge;
        let address = match document.configured_address(bridge) {
            Some(address) => address,
            None => self.settings.nat_interface()?,
        };

        self.gateway.set_link_down(bridge).await?;
        self.gateway.set_link_up(bridge).await?;
        self.gateway.add_address(bridge, address).await?;

        tracing::info!(bridge = %bridge, %address, "bridge restarted");
        Ok(())
    }

    /// Bring up any of the two bridges that is down. Returns the names
    /// raised and whether both ended up present and up.
    async fn raise_bridges(&self) -> (Vec<String>, bool) {
        let links = match self.gateway.links().await {
            Ok(links) => links,
            Err(err) => {
                tracing::error!(error = %format!("{err:#}"), "could not re-read links");
                return (Vec::new(), false);
            }
        };

        let mut raised = Vec::new();
        let mut all_up = true;
        for name in [&self.settings.primary_bridge, &self.settings.nat_bridge] {
            let state = BridgeState::from_links(name, &links);
            if !state.exists {
                tracing::warn!(bridge = %name, "bridge still missing");
                all_up = false;
                continue;
            }
            if state.admin_up {
                continue;
            }

            match self.gateway.set_link_up(name).await {
                Ok(()) => {
                    tracing::info!(bridge = %name, "brought bridge up");
                    raised.push(name.clone());
                }
                Err(err) => {
                    tracing::error!(bridge = %name, error = %format!("{err:#}"), "could not bring bridge up");
                    all_up = false;
                }
            }
        }

        (raised, all_up)
    }
}

// Netlink link inspection and admin state changes
use anyhow::{Context, Result};
use futures::stream::TryStreamExt;
use ipnet::Ipv4Net;
use nb_core::{LinkState, MacAddr};
use netlink_packet_route::address::AddressAttribute;
use netlink_packet_route::link::{LinkAttribute, LinkFlag, LinkMessage};
use rtnetlink::{Handle, new_connection};
use std::net::IpAddr;

pub struct LinkManager {
    handle: Handle,
}

impl LinkManager {
    pub async fn new() -> Result<Self> {
        let (connection, handle, _) = new_connection()?;
        tokio::spawn(connection);
        Ok(Self { handle })
    }

    /// Dump every link together with its IPv4 addresses.
    pub async fn links(&self) -> Result<Vec<LinkState>> {
        let mut links = self.handle.link().get().execute();
        let mut states = Vec::new();

        while let Some(link) = links.try_next().await? {
            let Some(name) = link_name(&link) else {
                continue;
            };

            let addresses = self.ipv4_addresses(link.header.index).await?;
            states.push(LinkState {
                name,
                index: link.header.index,
                admin_up: link.header.flags.contains(&LinkFlag::Up),
                addresses,
                mac: link_mac(&link),
                controller: link_controller(&link),
            });
        }

        Ok(states)
    }

    pub async fn set_up(&self, name: &str) -> Result<()> {
        let index = self.get_link_by_name(name).await?;
        self.handle
            .link()
            .set(index)
            .up()
            .execute()
            .await
            .context(format!("Failed to set {} up", name))?;

        tracing::info!(link = name, "link set up");
        Ok(())
    }

    pub async fn set_down(&self, name: &str) -> Result<()> {
        let index = self.get_link_by_name(name).await?;
        self.handle
            .link()
            .set(index)
            .down()
            .execute()
            .await
            .context(format!("Failed to set {} down", name))?;

        tracing::info!(link = name, "link set down");
        Ok(())
    }

    async fn ipv4_addresses(&self, link_index: u32) -> Result<Vec<Ipv4Net>> {
        let mut addresses = vec![];
        let mut addrs = self
            .handle
            .address()
            .get()
            .set_link_index_filter(link_index)
            .execute();

        while let Some(addr) = addrs.try_next().await? {
            for attr in &addr.attributes {
                if let AddressAttribute::Address(IpAddr::V4(ip)) = attr {
                    if let Ok(net) = Ipv4Net::new(*ip, addr.header.prefix_len) {
                        addresses.push(net);
                    }
                }
            }
        }

        Ok(addresses)
    }

    async fn get_link_by_name(&self, name: &str) -> Result<u32> {
        let mut links = self.handle.link().get().match_name(name.to_string()).execute();

        if let Some(link) = links.try_next().await? {
            Ok(link.header.index)
        } else {
            anyhow::bail!("Link {} not found", name)
        }
    }
}

fn link_name(link: &LinkMessage) -> Option<String> {
    link.attributes.iter().find_map(|attr| {
        if let LinkAttribute::IfName(n) = attr {
            Some(n.clone())
        } else {
            None
        }
    })
}

fn link_mac(link: &LinkMessage) -> Option<MacAddr> {
    link.attributes.iter().find_map(|attr| {
        if let LinkAttribute::Address(bytes) = attr {
            MacAddr::from_bytes(bytes)
        } else {
            None
        }
    })
}

fn link_controller(link: &LinkMessage) -> Option<u32> {
    link.attributes.iter().find_map(|attr| {
        if let LinkAttribute::Controller(index) = attr {
            Some(*index)
        } else {
            None
        }
    })
}

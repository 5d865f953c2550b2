use anyhow::{Context, Result};
use futures::stream::TryStreamExt;
use ipnet::Ipv4Net;
use netlink_packet_route::address::AddressAttribute;
use rtnetlink::{Handle, new_connection};
use std::net::IpAddr;

pub struct AddressManager {
    handle: Handle,
}

impl AddressManager {
    pub async fn new() -> Result<Self> {
        let (connection, handle, _) = new_connection()?;
        tokio::spawn(connection);
        Ok(Self { handle })
    }

    /// Assign `cidr` to `iface`. Already assigned is fine (idempotent).
    pub async fn add_address(&self, iface: &str, cidr: Ipv4Net) -> Result<()> {
        let link_index = self.get_link_by_name(iface).await?;

        if self.has_address(link_index, cidr).await? {
            tracing::info!(iface, %cidr, "address already assigned");
            return Ok(());
        }

        self.handle
            .address()
            .add(link_index, IpAddr::V4(cidr.addr()), cidr.prefix_len())
            .execute()
            .await
            .context(format!("Failed to add address {} to {}", cidr, iface))?;

        tracing::info!(iface, %cidr, "added address");
        Ok(())
    }

    async fn has_address(&self, link_index: u32, cidr: Ipv4Net) -> Result<bool> {
        let mut addrs = self
            .handle
            .address()
            .get()
            .set_link_index_filter(link_index)
            .execute();

        while let Some(addr_msg) = addrs.try_next().await? {
            if addr_msg.header.prefix_len != cidr.prefix_len() {
                continue;
            }

            let matches = addr_msg.attributes.iter().any(|attr| {
                matches!(attr, AddressAttribute::Address(IpAddr::V4(ip)) if *ip == cidr.addr())
            });
            if matches {
                return Ok(true);
            }
        }

        Ok(false)
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

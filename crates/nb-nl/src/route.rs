use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::Ipv4Addr;
use tokio::process::Command;

#[derive(Debug, Deserialize)]
struct RouteEntry {
    dev: Option<String>,
}

/// Resolve the outbound interface for a destination via `ip -j route get`.
pub struct RouteResolver;

impl RouteResolver {
    pub fn new() -> Self {
        Self
    }

    pub async fn egress_interface(&self, destination: Ipv4Addr) -> Result<Option<String>> {
        let output = Command::new("ip")
            .arg("-j")
            .arg("route")
            .arg("get")
            .arg(destination.to_string())
            .output()
            .await
            .context("Failed to run ip route get")?;

        if !output.status.success() {
            // No route to the destination
            tracing::debug!(
                %destination,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "route lookup failed"
            );
            return Ok(None);
        }

        parse_route_get(&String::from_utf8_lossy(&output.stdout))
    }
}

impl Default for RouteResolver {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_route_get(json: &str) -> Result<Option<String>> {
    let entries: Vec<RouteEntry> =
        serde_json::from_str(json).context("Failed to parse ip route get output")?;
    Ok(entries.into_iter().find_map(|entry| entry.dev))
}

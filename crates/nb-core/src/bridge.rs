use crate::error::NatError;
use ipnet::Ipv4Net;
use std::fmt;
use std::str::FromStr;

/// Vendor prefix used for generated MACs (QEMU/libvirt, locally administered).
pub const MAC_PREFIX: [u8; 3] = [0x52, 0x54, 0x00];

/// A 48-bit link-layer address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    /// Generate a random MAC in the range 52:54:00:xx:xx:xx
    pub fn random() -> Self {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        let tail: [u8; 3] = rng.r#gen();
        Self([
            MAC_PREFIX[0],
            MAC_PREFIX[1],
            MAC_PREFIX[2],
            tail[0],
            tail[1],
            tail[2],
        ])
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let octets: [u8; 6] = bytes.try_into().ok()?;
        Some(Self(octets))
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    pub fn is_locally_administered(&self) -> bool {
        self.0[0] & 0x02 != 0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl FromStr for MacAddr {
    type Err = NatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 {
            return Err(NatError::InvalidMac(s.to_string()));
        }

        let mut octets = [0u8; 6];
        for (slot, part) in octets.iter_mut().zip(parts) {
            if part.len() != 2 {
                return Err(NatError::InvalidMac(s.to_string()));
            }
            *slot = u8::from_str_radix(part, 16).map_err(|_| NatError::InvalidMac(s.to_string()))?;
        }
        Ok(Self(octets))
    }
}

/// One live link as reported by the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkState {
    pub name: String,
    pub index: u32,
    pub admin_up: bool,
    pub addresses: Vec<Ipv4Net>,
    pub mac: Option<MacAddr>,
    /// Index of the bridge this link is enslaved to, if any.
    pub controller: Option<u32>,
}

/// Live view of one of the two bridges the engine cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeState {
    pub name: String,
    pub exists: bool,
    pub has_ipv4: bool,
    /// First IPv4 address with prefix, e.g. `192.168.1.1/24`.
    pub cidr: Option<Ipv4Net>,
    /// `cidr` with the host part zeroed.
    pub subnet: Option<Ipv4Net>,
    pub admin_up: bool,
    pub mac: Option<MacAddr>,
}

impl BridgeState {
    pub fn absent(name: &str) -> Self {
        Self {
            name: name.to_string(),
            exists: false,
            has_ipv4: false,
            cidr: None,
            subnet: None,
            admin_up: false,
            mac: None,
        }
    }

    /// Derive the bridge state for `name` from a link dump.
    pub fn from_links(name: &str, links: &[LinkState]) -> Self {
        let Some(link) = links.iter().find(|l| l.name == name) else {
            return Self::absent(name);
        };

        let cidr = link.addresses.first().copied();
        Self {
            name: name.to_string(),
            exists: true,
            has_ipv4: cidr.is_some(),
            cidr,
            subnet: cidr.map(|c| c.trunc()),
            admin_up: link.admin_up,
            mac: link.mac,
        }
    }
}

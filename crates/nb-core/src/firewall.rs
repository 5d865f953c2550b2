use ipnet::Ipv4Net;
use std::fmt;

/// The two rule shapes the engine manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleKind {
    /// `-t nat POSTROUTING -s <subnet> -o <iface> -j MASQUERADE`
    Masquerade,
    /// `-t filter FORWARD -s <subnet> -j ACCEPT`
    ForwardAccept,
}

/// A firewall rule keyed by source subnet, output interface and action.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FirewallRule {
    pub kind: RuleKind,
    pub source: Ipv4Net,
    pub out_iface: Option<String>,
}

impl FirewallRule {
    pub fn masquerade(source: Ipv4Net, out_iface: &str) -> Self {
        Self {
            kind: RuleKind::Masquerade,
            source,
            out_iface: Some(out_iface.to_string()),
        }
    }

    pub fn forward_accept(source: Ipv4Net) -> Self {
        Self {
            kind: RuleKind::ForwardAccept,
            source,
            out_iface: None,
        }
    }

    pub fn table(&self) -> &'static str {
        match self.kind {
            RuleKind::Masquerade => "nat",
            RuleKind::ForwardAccept => "filter",
        }
    }

    pub fn chain(&self) -> &'static str {
        match self.kind {
            RuleKind::Masquerade => "POSTROUTING",
            RuleKind::ForwardAccept => "FORWARD",
        }
    }

    pub fn target(&self) -> &'static str {
        match self.kind {
            RuleKind::Masquerade => "MASQUERADE",
            RuleKind::ForwardAccept => "ACCEPT",
        }
    }

    /// Match/target arguments, without table, chain or operation.
    pub fn spec_args(&self) -> Vec<String> {
        let mut args = vec!["-s".to_string(), self.source.to_string()];
        if let Some(iface) = &self.out_iface {
            args.push("-o".to_string());
            args.push(iface.clone());
        }
        args.push("-j".to_string());
        args.push(self.target().to_string());
        args
    }

    /// Full `iptables` argument list for `op` (`-C`, `-D`, `-I`, `-A`).
    pub fn command_args(&self, op: &str) -> Vec<String> {
        let mut args = vec![
            "-t".to_string(),
            self.table().to_string(),
            op.to_string(),
            self.chain().to_string(),
        ];
        args.extend(self.spec_args());
        args
    }

    /// The rule as an `iptables ...` shell command, as used in post-up lines.
    pub fn shell_command(&self, op: &str) -> String {
        format!("iptables {}", self.command_args(op).join(" "))
    }
}

impl fmt::Display for FirewallRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.table(), self.chain(), self.spec_args().join(" "))
    }
}

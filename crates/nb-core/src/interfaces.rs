//! ifupdown `interfaces(5)` document model.
//!
//! The document is split into stanzas at header lines (`auto`, `iface`,
//! `mapping`, `allow-*`). Every original line is kept verbatim, so a document
//! that is parsed and serialized without edits is byte-identical to its
//! source. Within a stanza, the *body* is the run of lines after the header
//! up to the first blank line (or the end of the stanza); directive lookups
//! and insertions operate on the body only.

use crate::firewall::FirewallRule;
use anyhow::{Context, Result};
use ipnet::Ipv4Net;
use regex::Regex;
use std::fmt;
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::LazyLock;

static HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(auto|iface|mapping|allow-[A-Za-z0-9_-]+)(\s|$)").expect("valid header regex")
});

const DEFAULT_INDENT: &str = "    ";

/// Bridge directives a NAT bridge stanza must carry, in insertion order.
pub const BRIDGE_DEFAULTS: [(&str, &str); 3] = [
    ("bridge_ports", "none"),
    ("bridge_stp", "off"),
    ("bridge_fd", "0"),
];

/// Post-activation commands that enable forwarding and NAT for a bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatDirectives {
    pub forward_up: String,
    pub masquerade_up: String,
    pub masquerade_down: String,
}

impl NatDirectives {
    pub fn new(subnet: Ipv4Net, egress: &str) -> Self {
        let rule = FirewallRule::masquerade(subnet, egress);
        Self {
            forward_up: "post-up echo 1 > /proc/sys/net/ipv4/ip_forward".to_string(),
            masquerade_up: format!("post-up {}", rule.shell_command("-A")),
            masquerade_down: format!("post-down {}", rule.shell_command("-D")),
        }
    }
}

pub fn is_header(line: &str) -> bool {
    HEADER_RE.is_match(line)
}

fn normalize_key(key: &str) -> String {
    key.replace('_', "-").to_ascii_lowercase()
}

fn split_directive(line: &str) -> Option<(&str, &str)> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    match trimmed.split_once(char::is_whitespace) {
        Some((key, value)) => Some((key, value.trim())),
        None => Some((trimmed, "")),
    }
}

fn line_ending_of(line: &str) -> &'static str {
    if line.ends_with('\r') { "\r" } else { "" }
}

fn parse_netmask(value: &str) -> Option<u8> {
    if let Ok(prefix) = value.parse::<u8>() {
        return (prefix <= 32).then_some(prefix);
    }
    let mask: Ipv4Addr = value.parse().ok()?;
    ipnet::ipv4_mask_to_prefix(mask).ok()
}

/// One header line plus everything up to the next header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stanza {
    lines: Vec<String>,
}

impl Stanza {
    fn from_header(header: String) -> Self {
        Self { lines: vec![header] }
    }

    pub fn header(&self) -> &str {
        &self.lines[0]
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// `auto`, `iface`, `mapping` or `allow-*`.
    pub fn kind(&self) -> &str {
        self.header().split_whitespace().next().unwrap_or_default()
    }

    /// Interface names the header refers to.
    pub fn names(&self) -> Vec<&str> {
        let mut tokens = self.header().split_whitespace();
        let kind = tokens.next().unwrap_or_default();
        if kind == "iface" {
            tokens.next().into_iter().collect()
        } else {
            tokens.collect()
        }
    }

    /// `iface <name> inet ...`. Other address families such as `inet6`
    /// are separate stanzas and never match.
    pub fn is_iface_for(&self, name: &str) -> bool {
        let mut tokens = self.header().split_whitespace();
        tokens.next() == Some("iface") && tokens.next() == Some(name) && tokens.next() == Some("inet")
    }

    /// `"\r"` when the header is CRLF terminated, so inserted lines match.
    fn line_ending(&self) -> &'static str {
        line_ending_of(self.header())
    }

    pub fn mentions(&self, name: &str) -> bool {
        self.names().contains(&name)
    }

    fn body_end(&self) -> usize {
        self.lines
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, line)| line.trim().is_empty())
            .map(|(idx, _)| idx)
            .unwrap_or(self.lines.len())
    }

    pub fn body(&self) -> &[String] {
        &self.lines[1..self.body_end()]
    }

    /// Values of every body directive named `key`. `bridge_fd` and
    /// `bridge-fd` are the same key.
    pub fn directives<'a>(&'a self, key: &str) -> impl Iterator<Item = &'a str> + 'a {
        let wanted = normalize_key(key);
        self.body().iter().filter_map(move |line| {
            let (k, v) = split_directive(line)?;
            (normalize_key(k) == wanted).then_some(v)
        })
    }

    pub fn directive(&self, key: &str) -> Option<&str> {
        self.directives(key).next()
    }

    pub fn has_directive(&self, key: &str) -> bool {
        self.directive(key).is_some()
    }

    fn has_hook(&self, keys: &[&str], needle: &str) -> bool {
        keys.iter()
            .any(|key| self.directives(key).any(|value| value.contains(needle)))
    }

    /// `post-up` (or `up`) enabling IPv4 forwarding.
    pub fn has_forward_post_up(&self) -> bool {
        self.has_hook(&["post-up", "up"], "ip_forward")
    }

    /// `post-up` (or `up`) installing a MASQUERADE rule.
    pub fn has_masquerade_post_up(&self) -> bool {
        self.has_hook(&["post-up", "up"], "MASQUERADE")
    }

    fn has_masquerade_post_down(&self) -> bool {
        self.has_hook(&["post-down", "down"], "MASQUERADE")
    }

    fn indent(&self) -> String {
        self.body()
            .iter()
            .find(|line| !line.trim().is_empty())
            .map(|line| {
                let width = line.len() - line.trim_start().len();
                line[..width].to_string()
            })
            .filter(|indent| !indent.is_empty())
            .unwrap_or_else(|| DEFAULT_INDENT.to_string())
    }
}

/// A parsed interfaces file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfacesDocument {
    preamble: Vec<String>,
    stanzas: Vec<Stanza>,
    trailing_newline: bool,
}

impl InterfacesDocument {
    pub fn parse(text: &str) -> Self {
        let mut doc = Self {
            trailing_newline: text.ends_with('\n'),
            ..Self::default()
        };
        if text.is_empty() {
            return doc;
        }

        let content = text.strip_suffix('\n').unwrap_or(text);
        for line in content.split('\n') {
            if is_header(line) {
                doc.stanzas.push(Stanza::from_header(line.to_string()));
            } else if let Some(current) = doc.stanzas.last_mut() {
                current.lines.push(line.to_string());
            } else {
                doc.preamble.push(line.to_string());
            }
        }
        doc
    }

    /// Read and parse `path`. A missing file is an empty document.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(Self::parse(&text))
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_string())
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    pub fn stanzas(&self) -> &[Stanza] {
        &self.stanzas
    }

    pub fn is_empty(&self) -> bool {
        self.preamble.is_empty() && self.stanzas.is_empty()
    }

    /// Whether any header names `name` (`auto`, `iface`, `allow-*`, ...).
    pub fn declares(&self, name: &str) -> bool {
        self.stanzas.iter().any(|s| s.mentions(name))
    }

    pub fn iface_stanza(&self, name: &str) -> Option<&Stanza> {
        self.stanzas.iter().find(|s| s.is_iface_for(name))
    }

    fn iface_stanza_mut(&mut self, name: &str) -> Option<&mut Stanza> {
        self.stanzas.iter_mut().find(|s| s.is_iface_for(name))
    }

    /// Line ending of the first line, so appended text keeps CRLF files CRLF.
    fn line_ending(&self) -> &'static str {
        self.preamble
            .first()
            .or_else(|| self.stanzas.first().map(|s| &s.lines[0]))
            .map(|line| line_ending_of(line))
            .unwrap_or("")
    }

    fn has_auto(&self, name: &str) -> bool {
        self.stanzas
            .iter()
            .any(|s| (s.kind() == "auto" || s.kind().starts_with("allow-")) && s.mentions(name))
    }

    /// First `address` of `name`'s stanza with its prefix. The prefix comes
    /// from `/n`, then a `netmask` directive, then defaults to /24.
    pub fn configured_address(&self, name: &str) -> Option<Ipv4Net> {
        let stanza = self.iface_stanza(name)?;
        let raw = stanza.directive("address")?.split_whitespace().next()?;

        if let Ok(net) = raw.parse::<Ipv4Net>() {
            return Some(net);
        }

        let addr: Ipv4Addr = raw.parse().ok()?;
        let prefix = stanza
            .directive("netmask")
            .and_then(parse_netmask)
            .unwrap_or(24);
        Ipv4Net::new(addr, prefix).ok()
    }

    /// Insert any of [`BRIDGE_DEFAULTS`] missing from `name`'s stanza right
    /// after its `iface` header. Returns whether the document changed.
    pub fn ensure_bridge_defaults(&mut self, name: &str) -> bool {
        let Some(stanza) = self.iface_stanza_mut(name) else {
            return false;
        };

        let indent = stanza.indent();
        let eol = stanza.line_ending();
        let missing: Vec<String> = BRIDGE_DEFAULTS
            .iter()
            .filter(|(key, _)| !stanza.has_directive(key))
            .map(|(key, value)| format!("{indent}{key} {value}{eol}"))
            .collect();

        let changed = !missing.is_empty();
        for (offset, line) in missing.into_iter().enumerate() {
            stanza.lines.insert(1 + offset, line);
        }
        changed
    }

    /// Insert the forwarding and MASQUERADE post-up commands that are missing
    /// from `name`'s stanza at the end of its body. A MASQUERADE post-up
    /// brings its matching post-down along.
    pub fn ensure_post_up(&mut self, name: &str, directives: &NatDirectives) -> bool {
        let Some(stanza) = self.iface_stanza_mut(name) else {
            return false;
        };

        let indent = stanza.indent();
        let eol = stanza.line_ending();
        let mut missing = Vec::new();
        if !stanza.has_forward_post_up() {
            missing.push(format!("{indent}{}{eol}", directives.forward_up));
        }
        if !stanza.has_masquerade_post_up() {
            missing.push(format!("{indent}{}{eol}", directives.masquerade_up));
            if !stanza.has_masquerade_post_down() {
                missing.push(format!("{indent}{}{eol}", directives.masquerade_down));
            }
        }

        let changed = !missing.is_empty();
        let at = stanza.body_end();
        stanza.lines.splice(at..at, missing);
        changed
    }

    /// Replace the `hwaddress` directive of `name`'s stanza, or insert one
    /// right after the `iface` header.
    pub fn set_hwaddress(&mut self, name: &str, mac: &str) -> bool {
        let Some(stanza) = self.iface_stanza_mut(name) else {
            return false;
        };

        let body_end = stanza.body_end();
        let existing = (1..body_end).find(|&idx| {
            split_directive(&stanza.lines[idx])
                .map(|(key, _)| normalize_key(key) == "hwaddress")
                .unwrap_or(false)
        });

        match existing {
            Some(idx) => {
                let line = &stanza.lines[idx];
                let width = line.len() - line.trim_start().len();
                let replacement = format!(
                    "{}hwaddress ether {}{}",
                    &line[..width],
                    mac,
                    line_ending_of(line)
                );
                if *line == replacement {
                    return false;
                }
                stanza.lines[idx] = replacement;
            }
            None => {
                let indent = stanza.indent();
                let eol = stanza.line_ending();
                stanza
                    .lines
                    .insert(1, format!("{indent}hwaddress ether {mac}{eol}"));
            }
        }
        true
    }

    /// Append a complete static NAT bridge stanza for `name` unless an
    /// `iface` stanza for it already exists.
    pub fn append_nat_bridge(
        &mut self,
        name: &str,
        address: Ipv4Net,
        directives: &NatDirectives,
    ) -> bool {
        if self.iface_stanza(name).is_some() {
            return false;
        }

        let needs_auto = !self.has_auto(name);
        let eol = self.line_ending();
        let last_line = self
            .stanzas
            .last()
            .and_then(|s| s.lines.last())
            .or_else(|| self.preamble.last());
        if last_line.is_some_and(|line| !line.trim().is_empty()) {
            match self.stanzas.last_mut() {
                Some(stanza) => stanza.lines.push(eol.to_string()),
                None => self.preamble.push(eol.to_string()),
            }
        }

        if needs_auto {
            self.stanzas.push(Stanza::from_header(format!("auto {name}{eol}")));
        }

        let mut stanza = Stanza::from_header(format!("iface {name} inet static{eol}"));
        stanza.lines.push(format!("{DEFAULT_INDENT}address {address}{eol}"));
        for (key, value) in BRIDGE_DEFAULTS {
            stanza.lines.push(format!("{DEFAULT_INDENT}{key} {value}{eol}"));
        }
        for directive in [
            &directives.forward_up,
            &directives.masquerade_up,
            &directives.masquerade_down,
        ] {
            stanza.lines.push(format!("{DEFAULT_INDENT}{directive}{eol}"));
        }
        self.stanzas.push(stanza);

        self.trailing_newline = true;
        true
    }
}

impl fmt::Display for InterfacesDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        let all = self
            .preamble
            .iter()
            .chain(self.stanzas.iter().flat_map(|s| s.lines.iter()));
        for line in all {
            if !first {
                f.write_str("\n")?;
            }
            f.write_str(line)?;
            first = false;
        }
        if self.trailing_newline {
            f.write_str("\n")?;
        }
        Ok(())
    }
}

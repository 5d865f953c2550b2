//! Line-oriented edits of `sysctl.conf` style files.

use anyhow::{Context, Result};
use std::path::Path;

pub const IP_FORWARD_KEY: &str = "net.ipv4.ip_forward";

/// Canonical persisted form of the forwarding directive.
pub const IP_FORWARD_LINE: &str = "net.ipv4.ip_forward=1";

fn parse_assignment(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once('=')?;
    Some((key.trim(), value.trim()))
}

/// Value assigned to `key` by the last active (uncommented) line.
pub fn value_of<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#') && !line.starts_with(';'))
        .filter_map(parse_assignment)
        .filter(|(k, _)| *k == key)
        .map(|(_, v)| v)
        .last()
}

pub fn ip_forward_persisted(text: &str) -> bool {
    value_of(text, IP_FORWARD_KEY) == Some("1")
}

/// Rewrite every line assigning `net.ipv4.ip_forward`, commented out or
/// not, to the canonical form; append it when no such line exists. Other
/// lines are preserved verbatim.
pub fn persist_ip_forward(text: &str) -> String {
    let mut found = false;
    let mut out: Vec<&str> = Vec::new();

    for line in text.split_inclusive('\n') {
        let content = line.trim_end_matches(['\n', '\r']);
        let uncommented = content.trim_start().trim_start_matches(['#', ';']);
        let is_forward = parse_assignment(uncommented)
            .map(|(k, _)| k == IP_FORWARD_KEY)
            .unwrap_or(false);

        if is_forward {
            out.push(IP_FORWARD_LINE);
            out.push(&line[content.len()..]);
            found = true;
        } else {
            out.push(line);
        }
    }

    let mut result = out.concat();
    if !found {
        if !result.is_empty() && !result.ends_with('\n') {
            result.push('\n');
        }
        result.push_str(IP_FORWARD_LINE);
        result.push('\n');
    }
    result
}

/// Read a parameter file; a missing file reads as empty.
pub fn read(path: &Path) -> Result<String> {
    if !path.exists() {
        return Ok(String::new());
    }
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

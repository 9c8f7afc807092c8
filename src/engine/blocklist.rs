//! Peer blocklist
//!
//! Parses P2P-style blocklist files where each line reads
//! `description:first-last`. Lines starting with `#` are comments.

use regex::Regex;
use std::net::IpAddr;
use std::path::Path;

/// Inclusive address range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpRange {
    pub start: IpAddr,
    pub end: IpAddr,
}

impl IpRange {
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.start, self.end, ip) {
            (IpAddr::V4(s), IpAddr::V4(e), IpAddr::V4(ip)) => s <= ip && ip <= e,
            (IpAddr::V6(s), IpAddr::V6(e), IpAddr::V6(ip)) => s <= ip && ip <= e,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Blocklist {
    ranges: Vec<IpRange>,
}

impl Blocklist {
    /// Parse blocklist text. Malformed lines are skipped.
    pub fn parse(text: &str) -> Self {
        let Some(re) =
            Regex::new(r"^\s*[^#].*?\s*:\s*([a-f0-9.:]+?)\s*-\s*([a-f0-9.:]+?)\s*$").ok()
        else {
            return Self::default();
        };
        let ranges = text
            .lines()
            .filter_map(|line| {
                let caps = re.captures(line)?;
                let start = caps.get(1)?.as_str().parse().ok()?;
                let end = caps.get(2)?.as_str().parse().ok()?;
                Some(IpRange { start, end })
            })
            .collect();
        Self { ranges }
    }

    pub fn load(path: &Path) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let list = Self::parse(&text);
        tracing::debug!(path = %path.display(), ranges = list.len(), "loaded blocklist");
        Ok(list)
    }

    pub fn is_blocked(&self, ip: IpAddr) -> bool {
        self.ranges.iter().any(|r| r.contains(ip))
    }

    pub fn ranges(&self) -> &[IpRange] {
        &self.ranges
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

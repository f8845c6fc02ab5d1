//! Known VPN address ranges

use std::net::{IpAddr, Ipv4Addr};
use warden_core::ban::parse_address;
use warden_core::{Result, WardenError};

/// IPv4 CIDR ranges
#[derive(Debug, Clone, Default)]
pub struct VpnRanges {
    ranges: Vec<(u32, u32)>,
}

impl VpnRanges {
    /// Parse `a.b.c.d/n` entries. Blank lines and `#` comments are skipped.
    pub fn parse<I, S>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut ranges = Vec::new();
        for entry in entries {
            let entry = entry.as_ref().trim();
            if entry.is_empty() || entry.starts_with('#') {
                continue;
            }
            let (address, bits) = entry.split_once('/').unwrap_or((entry, "32"));
            let address: Ipv4Addr = address
                .parse()
                .map_err(|_| WardenError::Config(format!("Invalid VPN range address: {}", entry)))?;
            let bits: u32 = bits
                .parse()
                .ok()
                .filter(|bits| *bits <= 32)
                .ok_or_else(|| WardenError::Config(format!("Invalid VPN range prefix: {}", entry)))?;
            let mask = if bits == 0 { 0 } else { u32::MAX << (32 - bits) };
            ranges.push((u32::from(address) & mask, mask));
        }
        Ok(Self { ranges })
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Whether an address (with or without port) falls in any range
    pub fn contains(&self, address: &str) -> bool {
        match parse_address(address) {
            Some(IpAddr::V4(ip)) => {
                let ip = u32::from(ip);
                self.ranges.iter().any(|(network, mask)| ip & mask == *network)
            }
            _ => false,
        }
    }
}

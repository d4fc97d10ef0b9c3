//! Blocklist parsing.
//!
//! Accepted lines: a single address, an `start-end` range, or an IPv4/IPv6 CIDR block. Blank
//! lines, `#` comments and unparsable lines are skipped.

use std::fs;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tinytorrent_core::IpRange;
use tracing::debug;

use crate::error::{EngineError, EngineResult};

/// Parsed blocklist plus the time it was read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blocklist {
    /// Blocked ranges, in file order.
    pub ranges: Vec<IpRange>,
    /// When the file was parsed.
    pub loaded_at: DateTime<Utc>,
}

/// Entry count and load time of the active blocklist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlocklistStatus {
    /// Number of ranges in effect.
    pub entries: usize,
    /// When the ranges were loaded.
    pub updated_at: Option<DateTime<Utc>>,
}

/// Parse one blocklist line.
#[must_use]
pub fn parse_entry(raw: &str) -> Option<IpRange> {
    let value = raw.trim();
    if value.is_empty() || value.starts_with('#') {
        return None;
    }
    if let Some((first, last)) = value.split_once('-') {
        let start: IpAddr = first.trim().parse().ok()?;
        let end: IpAddr = last.trim().parse().ok()?;
        return Some(IpRange { start, end });
    }
    if let Some((address, prefix)) = value.split_once('/') {
        let prefix: u32 = prefix.trim().parse().ok()?;
        return match address.trim().parse::<IpAddr>().ok()? {
            IpAddr::V4(network) => cidr_v4(network, prefix),
            IpAddr::V6(network) => cidr_v6(network, prefix),
        };
    }
    let address: IpAddr = value.parse().ok()?;
    Some(IpRange {
        start: address,
        end: address,
    })
}

fn cidr_v4(network: Ipv4Addr, prefix: u32) -> Option<IpRange> {
    if prefix > 32 {
        return None;
    }
    let host_mask = u32::MAX.checked_shr(prefix).unwrap_or(0);
    let base = u32::from(network) & !host_mask;
    Some(IpRange {
        start: IpAddr::V4(Ipv4Addr::from(base)),
        end: IpAddr::V4(Ipv4Addr::from(base | host_mask)),
    })
}

fn cidr_v6(network: Ipv6Addr, prefix: u32) -> Option<IpRange> {
    if prefix > 128 {
        return None;
    }
    let host_mask = u128::MAX.checked_shr(prefix).unwrap_or(0);
    let base = u128::from(network) & !host_mask;
    Some(IpRange {
        start: IpAddr::V6(Ipv6Addr::from(base)),
        end: IpAddr::V6(Ipv6Addr::from(base | host_mask)),
    })
}

/// Parse every line of `text`.
#[must_use]
pub fn parse_blocklist(text: &str) -> Vec<IpRange> {
    text.lines().filter_map(parse_entry).collect()
}

/// Read and parse the blocklist at `path`.
///
/// # Errors
///
/// Returns an error when the path is empty or the file cannot be read.
pub fn load_blocklist(path: &Path) -> EngineResult<Blocklist> {
    if path.as_os_str().is_empty() {
        return Err(EngineError::InvalidInput {
            field: "blocklist_path",
            reason: "no blocklist configured",
        });
    }
    let bytes = fs::read(path).map_err(|source| EngineError::Blocklist {
        path: PathBuf::from(path),
        source,
    })?;
    let ranges = parse_blocklist(&String::from_utf8_lossy(&bytes));
    debug!(path = %path.display(), entries = ranges.len(), "blocklist parsed");
    Ok(Blocklist {
        ranges,
        loaded_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn v4(a: u8, b: u8, c: u8, d: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(a, b, c, d))
    }

    #[test]
    fn parses_single_addresses_and_ranges() {
        assert_eq!(
            parse_entry(" 10.0.0.1 "),
            Some(IpRange {
                start: v4(10, 0, 0, 1),
                end: v4(10, 0, 0, 1)
            })
        );
        assert_eq!(
            parse_entry("1.2.3.0 - 1.2.3.255"),
            Some(IpRange {
                start: v4(1, 2, 3, 0),
                end: v4(1, 2, 3, 255)
            })
        );
    }

    #[test]
    fn cidr_blocks_expand_to_network_bounds() {
        assert_eq!(
            parse_entry("192.168.7.9/16"),
            Some(IpRange {
                start: v4(192, 168, 0, 0),
                end: v4(192, 168, 255, 255)
            })
        );
        let v6 = parse_entry("2001:db8::/32").expect("v6 cidr");
        assert_eq!(v6.start, "2001:db8::".parse::<IpAddr>().expect("addr"));
        assert_eq!(
            v6.end,
            "2001:db8:ffff:ffff:ffff:ffff:ffff:ffff"
                .parse::<IpAddr>()
                .expect("addr")
        );
        assert!(parse_entry("0.0.0.0/0").is_some());
        assert!(parse_entry("10.0.0.0/33").is_none());
    }

    #[test]
    fn comments_blanks_and_garbage_are_skipped() {
        let text = "# header\n\n10.0.0.1\r\nnot-an-address\n10.0.0.0/8\n";
        assert_eq!(parse_blocklist(text).len(), 2);
    }

    #[test]
    fn load_reads_file_and_rejects_missing_paths() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("block.txt");
        fs::write(&path, "10.0.0.1\n10.0.0.2-10.0.0.9\n")?;
        assert_eq!(load_blocklist(&path)?.ranges.len(), 2);

        assert!(matches!(
            load_blocklist(&dir.path().join("missing.txt")),
            Err(EngineError::Blocklist { .. })
        ));
        assert!(matches!(
            load_blocklist(Path::new("")),
            Err(EngineError::InvalidInput { .. })
        ));
        Ok(())
    }
}

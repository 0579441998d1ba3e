use std::fs::File;
use std::io::{BufRead, BufReader};
use std::net::IpAddr;
use std::path::Path;

use ipnet::IpNet;
use tracing::warn;

use super::AdmissionError;

/// Value of `allowed_senders` meaning "no filtering".
pub const ALLOW_ALL: &str = "*";

/// Which originating addresses may relay mail.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SenderRules {
    #[default]
    AllowAll,
    Filter {
        allowed: Vec<IpNet>,
        block_by_default: bool,
    },
}

impl SenderRules {
    /// Build a filter from textual IPs and CIDRs. Entries that are neither
    /// are skipped.
    pub fn allow_list<I, S>(entries: I, block_by_default: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let allowed = entries
            .into_iter()
            .filter_map(|entry| parse_entry(entry.as_ref()))
            .collect();
        Self::Filter {
            allowed,
            block_by_default,
        }
    }

    /// One IP or CIDR per line; blank lines and `#` comments are ignored.
    /// Anything not listed is blocked.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self, AdmissionError> {
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line.map_err(|source| AdmissionError::Read { source })?;
            let entry = line.trim();
            if entry.is_empty() || entry.starts_with('#') {
                continue;
            }
            entries.push(entry.to_string());
        }
        Ok(Self::allow_list(entries, true))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AdmissionError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| AdmissionError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(BufReader::new(file))
    }

    /// `*` allows everybody, anything else is the path of a rule file.
    pub fn from_source(source: &str) -> Result<Self, AdmissionError> {
        if source.trim() == ALLOW_ALL {
            Ok(Self::AllowAll)
        } else {
            Self::from_file(source)
        }
    }

    pub fn is_allowed(&self, ip: &str) -> bool {
        let (allowed, block_by_default) = match self {
            Self::AllowAll => return true,
            Self::Filter {
                allowed,
                block_by_default,
            } => (allowed, *block_by_default),
        };
        let Some(addr) = parse_remote(ip) else {
            return false;
        };
        if allowed.iter().any(|net| net.contains(&addr)) {
            return true;
        }
        !block_by_default
    }

    pub fn is_blocked(&self, ip: &str) -> bool {
        !self.is_allowed(ip)
    }
}

fn parse_entry(entry: &str) -> Option<IpNet> {
    let entry = entry.trim();
    let parsed = entry
        .parse::<IpNet>()
        .map(|net| net.trunc())
        .or_else(|_| entry.parse::<IpAddr>().map(|addr| IpNet::from(normalize(addr))))
        .ok();
    if parsed.is_none() {
        warn!(entry, "ignoring allowed sender entry that is neither an IP nor a CIDR");
    }
    parsed
}

fn parse_remote(ip: &str) -> Option<IpAddr> {
    let trimmed = ip.trim().trim_start_matches('[').trim_end_matches(']');
    trimmed.parse::<IpAddr>().ok().map(normalize)
}

fn normalize(addr: IpAddr) -> IpAddr {
    match addr {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(addr, IpAddr::V4),
        v4 => v4,
    }
}

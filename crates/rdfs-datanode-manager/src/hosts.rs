use std::fmt;
use std::net::IpAddr;
use std::path::Path;

use parking_lot::RwLock;
use tracing::info;

use rdfs_proto::DatanodeId;

/// One line of an include or exclude file: an IP address or host name
/// prefix, optionally qualified by a transfer port. Port 0 matches any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEntry {
    /// Literal IP address, when the entry was one. Empty otherwise.
    pub ip_address: String,
    /// Host name prefix, when the entry was not an IP. Empty otherwise.
    pub prefix: String,
    pub port: u16,
}

impl HostEntry {
    /// Parse `host`, `ip`, `host:port`, or `ip:port`.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let (host, port) = match line.rsplit_once(':') {
            Some((host, port_str)) => (host, port_str.parse().ok()?),
            None => (line, 0),
        };
        if host.is_empty() {
            return None;
        }
        if host.parse::<IpAddr>().is_ok() {
            Some(Self {
                ip_address: host.to_string(),
                prefix: String::new(),
                port,
            })
        } else {
            Some(Self {
                ip_address: String::new(),
                prefix: host.to_string(),
                port,
            })
        }
    }

    /// Whether this entry covers the given node identity.
    pub fn matches(&self, id: &DatanodeId) -> bool {
        let name_matches = (!self.ip_address.is_empty() && self.ip_address == id.ip_addr)
            || (!self.prefix.is_empty()
                && (self.prefix == id.host_name || self.prefix == id.peer_host_name));
        name_matches && (self.port == 0 || self.port == id.xfer_port)
    }
}

impl fmt::Display for HostEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = if self.ip_address.is_empty() {
            &self.prefix
        } else {
            &self.ip_address
        };
        if self.port == 0 {
            f.write_str(name)
        } else {
            write!(f, "{}:{}", name, self.port)
        }
    }
}

/// An immutable set of host entries parsed from one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostSet {
    entries: Vec<HostEntry>,
}

impl HostSet {
    pub fn from_text(text: &str) -> Self {
        let entries = text
            .lines()
            .map(|line| line.split('#').next().unwrap_or(""))
            .filter_map(HostEntry::parse)
            .collect();
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &DatanodeId) -> bool {
        self.entries.iter().any(|e| e.matches(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &HostEntry> {
        self.entries.iter()
    }
}

#[derive(Default)]
struct HostLists {
    includes: HostSet,
    excludes: HostSet,
}

/// The operator-curated include/exclude policy.
///
/// An empty include file admits every host; the exclude file schedules
/// decommissioning. Both sets are swapped together on refresh so no reader
/// observes a half-updated policy.
#[derive(Default)]
pub struct HostFileManager {
    lists: RwLock<HostLists>,
}

impl HostFileManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-read both files. An empty path yields an empty set. On error the
    /// previous policy stays in effect.
    pub fn refresh(&self, include_file: &str, exclude_file: &str) -> std::io::Result<()> {
        let includes = read_host_file(include_file)?;
        let excludes = read_host_file(exclude_file)?;
        info!(
            includes = includes.entries.len(),
            excludes = excludes.entries.len(),
            "refreshed host files"
        );
        *self.lists.write() = HostLists { includes, excludes };
        Ok(())
    }

    /// Whether the node is admitted: covered by the include list, or the
    /// include list is empty.
    pub fn is_included(&self, id: &DatanodeId) -> bool {
        let lists = self.lists.read();
        lists.includes.is_empty() || lists.includes.contains(id)
    }

    pub fn is_excluded(&self, id: &DatanodeId) -> bool {
        self.lists.read().excludes.contains(id)
    }

    pub fn has_includes(&self) -> bool {
        !self.lists.read().includes.is_empty()
    }

    pub fn includes(&self) -> HostSet {
        self.lists.read().includes.clone()
    }

    pub fn excludes(&self) -> HostSet {
        self.lists.read().excludes.clone()
    }
}

fn read_host_file(path: &str) -> std::io::Result<HostSet> {
    if path.is_empty() {
        return Ok(HostSet::default());
    }
    let text = std::fs::read_to_string(Path::new(path))?;
    Ok(HostSet::from_text(&text))
}

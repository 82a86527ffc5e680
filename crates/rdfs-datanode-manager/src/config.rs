use serde::{Deserialize, Serialize};
use tracing::warn;

use rdfs_config::{Config, ConfigError};

/// Tuning knobs of the Datanode Manager.
///
/// Times are expressed in the unit their name carries. Fields absent from
/// the TOML document keep their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatanodeManagerConfig {
    /// Expected heartbeat cadence of storage nodes, seconds.
    pub heartbeat_interval_secs: u64,
    /// Cadence of the dead-node sweep, milliseconds.
    pub heartbeat_recheck_interval_ms: u64,
    /// Per-heartbeat cap on invalidation work. Unset derives
    /// `max(20 * heartbeat_interval_secs, 1000)`.
    pub block_invalidate_limit: Option<usize>,
    /// Reject registrations whose address failed reverse resolution.
    pub registration_ip_hostname_check: bool,
    /// Demote stale nodes when sorting block locations for reads.
    pub avoid_stale_datanodes_for_read: bool,
    /// Advisory: avoid stale nodes as write targets. Dynamically disabled
    /// when too much of the cluster is stale.
    pub avoid_stale_datanodes_for_write: bool,
    /// Age after which a node counts as stale, milliseconds.
    pub stale_datanode_interval_ms: u64,
    /// Floor for the stale interval, in heartbeat intervals.
    pub stale_datanode_min_heartbeats: u64,
    /// Stop avoiding stale write targets when
    /// `stale / live > use_stale_write_ratio`. Must be in (0, 1].
    pub use_stale_write_ratio: f32,
    /// Cadence of the decommission monitor, seconds.
    pub decommission_interval_secs: u64,
    /// Decommissioning nodes examined per monitor tick.
    pub decommission_nodes_per_interval: usize,
    /// Path of the include host file; empty admits every host.
    pub hosts_file: String,
    /// Path of the exclude host file; empty excludes nothing.
    pub hosts_exclude_file: String,
    /// Ports assumed for hosts listed in the include file that have never
    /// registered.
    pub default_xfer_port: u16,
    pub default_info_port: u16,
    pub default_info_secure_port: u16,
    pub default_ipc_port: u16,
}

impl Default for DatanodeManagerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 3,
            heartbeat_recheck_interval_ms: 5 * 60 * 1000,
            block_invalidate_limit: None,
            registration_ip_hostname_check: true,
            avoid_stale_datanodes_for_read: false,
            avoid_stale_datanodes_for_write: false,
            stale_datanode_interval_ms: 30_000,
            stale_datanode_min_heartbeats: 3,
            use_stale_write_ratio: 0.5,
            decommission_interval_secs: 30,
            decommission_nodes_per_interval: 5,
            hosts_file: String::new(),
            hosts_exclude_file: String::new(),
            default_xfer_port: 50010,
            default_info_port: 50075,
            default_info_secure_port: 50475,
            default_ipc_port: 50020,
        }
    }
}

impl DatanodeManagerConfig {
    /// A node whose last heartbeat is older than this is dead.
    pub fn heartbeat_expire_interval_ms(&self) -> u64 {
        2 * self.heartbeat_recheck_interval_ms + 10 * 1000 * self.heartbeat_interval_secs
    }

    /// The effective per-heartbeat invalidation cap.
    pub fn effective_block_invalidate_limit(&self) -> usize {
        self.block_invalidate_limit
            .unwrap_or_else(|| usize::max(20 * self.heartbeat_interval_secs as usize, 1000))
    }

    /// The effective stale interval: raised to the configured floor, and
    /// warned about (but kept) when it exceeds the dead threshold.
    pub fn effective_stale_interval_ms(&self) -> u64 {
        let floor = self.stale_datanode_min_heartbeats * self.heartbeat_interval_secs * 1000;
        let mut interval = self.stale_datanode_interval_ms;
        if interval < floor {
            warn!(
                configured = interval,
                floor,
                "stale interval below {} heartbeat intervals; raising to the floor",
                self.stale_datanode_min_heartbeats
            );
            interval = floor;
        }
        let expire = self.heartbeat_expire_interval_ms();
        if interval > expire {
            warn!(
                interval,
                expire, "stale interval exceeds the heartbeat expiry interval"
            );
        }
        interval
    }
}

impl Config for DatanodeManagerConfig {
    fn from_toml(value: &toml::Value) -> Result<Self, ConfigError> {
        Ok(value.clone().try_into::<Self>()?)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat_interval_secs == 0 {
            return Err(ConfigError::OutOfRange {
                field: "heartbeat_interval_secs".into(),
                value: "0".into(),
                min: Some("1".into()),
                max: None,
            });
        }
        if self.stale_datanode_interval_ms == 0 {
            return Err(ConfigError::OutOfRange {
                field: "stale_datanode_interval_ms".into(),
                value: "0".into(),
                min: Some("1".into()),
                max: None,
            });
        }
        if !(self.use_stale_write_ratio > 0.0 && self.use_stale_write_ratio <= 1.0) {
            return Err(ConfigError::OutOfRange {
                field: "use_stale_write_ratio".into(),
                value: self.use_stale_write_ratio.to_string(),
                min: Some("0 (exclusive)".into()),
                max: Some("1".into()),
            });
        }
        if self.decommission_nodes_per_interval == 0 {
            return Err(ConfigError::OutOfRange {
                field: "decommission_nodes_per_interval".into(),
                value: "0".into(),
                min: Some("1".into()),
                max: None,
            });
        }
        Ok(())
    }

    fn hot_update(&mut self, other: &Self) {
        self.block_invalidate_limit = other.block_invalidate_limit;
        self.avoid_stale_datanodes_for_read = other.avoid_stale_datanodes_for_read;
        self.avoid_stale_datanodes_for_write = other.avoid_stale_datanodes_for_write;
        self.stale_datanode_interval_ms = other.stale_datanode_interval_ms;
        self.use_stale_write_ratio = other.use_stale_write_ratio;
        self.decommission_interval_secs = other.decommission_interval_secs;
        self.decommission_nodes_per_interval = other.decommission_nodes_per_interval;
        self.hosts_file = other.hosts_file.clone();
        self.hosts_exclude_file = other.hosts_exclude_file.clone();
    }

    fn render(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let cfg = DatanodeManagerConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.heartbeat_interval_secs, 3);
        assert_eq!(cfg.default_xfer_port, 50010);
    }

    #[test]
    fn test_expire_interval_formula() {
        let cfg = DatanodeManagerConfig::default();
        // 2 * 300_000 + 10 * 1000 * 3
        assert_eq!(cfg.heartbeat_expire_interval_ms(), 630_000);
    }

    #[test]
    fn test_block_invalidate_limit_default() {
        let mut cfg = DatanodeManagerConfig::default();
        // 20 * 3 = 60 is below the floor of 1000.
        assert_eq!(cfg.effective_block_invalidate_limit(), 1000);

        cfg.heartbeat_interval_secs = 100;
        assert_eq!(cfg.effective_block_invalidate_limit(), 2000);

        cfg.block_invalidate_limit = Some(42);
        assert_eq!(cfg.effective_block_invalidate_limit(), 42);
    }

    #[test]
    fn test_stale_interval_floor() {
        let mut cfg = DatanodeManagerConfig::default();
        cfg.stale_datanode_interval_ms = 1_000;
        // Floor is 3 heartbeats * 3s = 9000ms.
        assert_eq!(cfg.effective_stale_interval_ms(), 9_000);

        cfg.stale_datanode_interval_ms = 30_000;
        assert_eq!(cfg.effective_stale_interval_ms(), 30_000);

        // Above the expiry interval it is warned about but kept.
        cfg.stale_datanode_interval_ms = 700_000;
        assert_eq!(cfg.effective_stale_interval_ms(), 700_000);
    }

    #[test]
    fn test_validate_rejects_bad_ratio() {
        let mut cfg = DatanodeManagerConfig::default();
        cfg.use_stale_write_ratio = 0.0;
        assert!(cfg.validate().is_err());
        cfg.use_stale_write_ratio = 1.5;
        assert!(cfg.validate().is_err());
        cfg.use_stale_write_ratio = 1.0;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_from_toml_partial_override() {
        let value: toml::Value = "heartbeat_interval_secs = 5\nhosts_file = \"/etc/rdfs/hosts\""
            .parse()
            .unwrap();
        let cfg = DatanodeManagerConfig::from_toml(&value).unwrap();
        assert_eq!(cfg.heartbeat_interval_secs, 5);
        assert_eq!(cfg.hosts_file, "/etc/rdfs/hosts");
        // Untouched fields keep their defaults.
        assert_eq!(cfg.heartbeat_recheck_interval_ms, 300_000);
    }

    #[test]
    fn test_hot_update_keeps_restart_only_fields() {
        let mut cfg = DatanodeManagerConfig::default();
        let mut fresh = DatanodeManagerConfig::default();
        fresh.heartbeat_interval_secs = 9;
        fresh.stale_datanode_interval_ms = 60_000;
        fresh.hosts_exclude_file = "/etc/rdfs/hosts.exclude".into();

        cfg.hot_update(&fresh);
        assert_eq!(cfg.heartbeat_interval_secs, 3);
        assert_eq!(cfg.stale_datanode_interval_ms, 60_000);
        assert_eq!(cfg.hosts_exclude_file, "/etc/rdfs/hosts.exclude");
    }

    #[test]
    fn test_render_roundtrip() {
        let cfg = DatanodeManagerConfig::default();
        let text = cfg.render();
        let value: toml::Value = text.parse().unwrap();
        let back = DatanodeManagerConfig::from_toml(&value).unwrap();
        assert_eq!(back, cfg);
    }
}

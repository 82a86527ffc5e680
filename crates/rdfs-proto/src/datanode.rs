use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

use rdfs_types::{BlockId, GenerationStamp, StorageId};

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Identity and addressing of one storage node.
///
/// `storage_id` names the data volume set and is the registry key; the
/// remaining fields describe where the node currently lives on the network.
/// `peer_host_name` is the name observed by the coordinator on the RPC
/// connection and may be empty when the node has never been heard from.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DatanodeId {
    pub storage_id: StorageId,
    pub ip_addr: String,
    pub host_name: String,
    pub peer_host_name: String,
    pub xfer_port: u16,
    pub info_port: u16,
    pub info_secure_port: u16,
    pub ipc_port: u16,
}

impl DatanodeId {
    /// The data transfer endpoint, `ip:port`. Unique across live nodes.
    pub fn xfer_addr(&self) -> String {
        format!("{}:{}", self.ip_addr, self.xfer_port)
    }
}

impl std::fmt::Display for DatanodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.xfer_addr(), self.host_name)
    }
}

/// A registration presented by a storage node.
///
/// An empty `storage_id` asks the coordinator to assign a fresh one.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DatanodeRegistration {
    pub id: DatanodeId,
    pub software_version: Option<String>,
    /// Block access keys exported to the node; filled in by the coordinator.
    pub keys: ExportedBlockKeys,
}

/// Opaque block access key material handed to datanodes at registration
/// and refreshed through `KeyUpdate` commands.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExportedBlockKeys(pub Vec<u8>);

// ---------------------------------------------------------------------------
// Blocks
// ---------------------------------------------------------------------------

/// A block within a single block pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub num_bytes: u64,
    pub generation_stamp: GenerationStamp,
}

/// A block qualified by the pool it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExtendedBlock {
    pub pool_id: String,
    pub block: Block,
}

/// A block together with the nodes it should be transferred to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockTargetPair {
    pub block: Block,
    pub targets: Vec<DatanodeId>,
}

/// A block under construction that needs lease recovery, with the replica
/// locations that should participate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveringBlock {
    pub block: ExtendedBlock,
    pub locations: Vec<DatanodeId>,
    pub recovery_id: GenerationStamp,
}

// ---------------------------------------------------------------------------
// Heartbeat payload
// ---------------------------------------------------------------------------

/// Capacity and activity counters reported on every heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StorageReport {
    pub capacity: u64,
    pub dfs_used: u64,
    pub remaining: u64,
    pub block_pool_used: u64,
    pub cache_capacity: u64,
    pub cache_used: u64,
    pub xceiver_count: u32,
    pub failed_volumes: u32,
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Discriminant of a [`DatanodeCommand`], for logging and metrics.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum DatanodeCommandKind {
    Register = 0,
    Transfer = 1,
    Invalidate = 2,
    Cache = 3,
    Uncache = 4,
    KeyUpdate = 5,
    BalancerBandwidth = 6,
    Recovery = 7,
}

/// An instruction piggybacked on a heartbeat response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatanodeCommand {
    /// Re-register before doing anything else.
    Register,
    /// Replicate the listed blocks to the given target nodes.
    Transfer {
        pool_id: String,
        blocks: Vec<BlockTargetPair>,
    },
    /// Delete the listed block replicas.
    Invalidate { pool_id: String, blocks: Vec<Block> },
    /// Pull the listed blocks into the node's cache.
    Cache {
        pool_id: String,
        block_ids: Vec<BlockId>,
    },
    /// Drop the listed blocks from the node's cache.
    Uncache {
        pool_id: String,
        block_ids: Vec<BlockId>,
    },
    /// Replace the node's block access keys.
    KeyUpdate { keys: ExportedBlockKeys },
    /// New balancer bandwidth, bytes per second.
    BalancerBandwidth { bandwidth: u64 },
    /// Run lease recovery for the listed blocks.
    Recovery { blocks: Vec<RecoveringBlock> },
}

impl DatanodeCommand {
    pub fn kind(&self) -> DatanodeCommandKind {
        match self {
            DatanodeCommand::Register => DatanodeCommandKind::Register,
            DatanodeCommand::Transfer { .. } => DatanodeCommandKind::Transfer,
            DatanodeCommand::Invalidate { .. } => DatanodeCommandKind::Invalidate,
            DatanodeCommand::Cache { .. } => DatanodeCommandKind::Cache,
            DatanodeCommand::Uncache { .. } => DatanodeCommandKind::Uncache,
            DatanodeCommand::KeyUpdate { .. } => DatanodeCommandKind::KeyUpdate,
            DatanodeCommand::BalancerBandwidth { .. } => DatanodeCommandKind::BalancerBandwidth,
            DatanodeCommand::Recovery { .. } => DatanodeCommandKind::Recovery,
        }
    }
}

// ---------------------------------------------------------------------------
// Admin state and reports
// ---------------------------------------------------------------------------

/// Administrative lifecycle state of a storage node.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    IntoPrimitive,
    TryFromPrimitive,
    Serialize,
    Deserialize,
)]
#[repr(u8)]
pub enum AdminState {
    #[default]
    Normal = 0,
    DecommissionInProgress = 1,
    Decommissioned = 2,
}

/// Which nodes a datanode report should cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatanodeReportKind {
    All,
    Live,
    Dead,
}

/// One entry of a datanode report.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DatanodeInfo {
    pub id: DatanodeId,
    pub network_location: String,
    pub admin_state: AdminState,
    /// Milliseconds since epoch of the last heartbeat; 0 means forced dead.
    pub last_update: u64,
    pub software_version: Option<String>,
    pub report: StorageReport,
}

// ---------------------------------------------------------------------------
// Service request / response types
// ---------------------------------------------------------------------------

/// Request to register a storage node.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RegisterDatanodeReq {
    pub registration: DatanodeRegistration,
}

/// Response carrying the (possibly updated) registration back to the node.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RegisterDatanodeRsp {
    pub registration: DatanodeRegistration,
}

/// Periodic heartbeat from a storage node.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HeartbeatReq {
    pub registration: DatanodeId,
    pub pool_id: String,
    pub report: StorageReport,
    /// Remaining transfer slots on the node; caps the Transfer command.
    pub max_transfers: usize,
}

/// Heartbeat response: an ordered list of commands, possibly empty, or the
/// single `Register` command when the node must re-register.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HeartbeatRsp {
    pub commands: Vec<DatanodeCommand>,
}

/// Request a membership report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetDatanodeReportReq {
    pub kind: DatanodeReportKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GetDatanodeReportRsp {
    pub nodes: Vec<DatanodeInfo>,
}

/// Reload the include/exclude host files and reclassify every node.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RefreshNodesReq {}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RefreshNodesRsp {}

/// Broadcast a new balancer bandwidth to every node.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SetBalancerBandwidthReq {
    pub bandwidth: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SetBalancerBandwidthRsp {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_id() -> DatanodeId {
        DatanodeId {
            storage_id: StorageId::new("DS-1"),
            ip_addr: "10.0.0.1".to_string(),
            host_name: "dn1.example.com".to_string(),
            peer_host_name: "dn1.example.com".to_string(),
            xfer_port: 50010,
            info_port: 50075,
            info_secure_port: 50475,
            ipc_port: 50020,
        }
    }

    #[test]
    fn test_xfer_addr() {
        assert_eq!(sample_id().xfer_addr(), "10.0.0.1:50010");
    }

    #[test]
    fn test_datanode_id_display() {
        let s = format!("{}", sample_id());
        assert_eq!(s, "10.0.0.1:50010 (dn1.example.com)");
    }

    #[test]
    fn test_command_kind() {
        let cmd = DatanodeCommand::BalancerBandwidth { bandwidth: 1024 };
        assert_eq!(cmd.kind(), DatanodeCommandKind::BalancerBandwidth);
        assert_eq!(DatanodeCommand::Register.kind(), DatanodeCommandKind::Register);
    }

    #[test]
    fn test_command_kind_primitive_roundtrip() {
        let raw: u8 = DatanodeCommandKind::Recovery.into();
        assert_eq!(
            DatanodeCommandKind::try_from(raw).unwrap(),
            DatanodeCommandKind::Recovery
        );
        assert!(DatanodeCommandKind::try_from(99u8).is_err());
    }

    #[test]
    fn test_admin_state_default() {
        assert_eq!(AdminState::default(), AdminState::Normal);
    }

    #[test]
    fn test_command_serde_roundtrip() {
        let cmd = DatanodeCommand::Transfer {
            pool_id: "BP-1".to_string(),
            blocks: vec![BlockTargetPair {
                block: Block {
                    id: BlockId(7),
                    num_bytes: 1 << 20,
                    generation_stamp: GenerationStamp(3),
                },
                targets: vec![sample_id()],
            }],
        };
        let json = serde_json::to_string(&cmd).unwrap();
        let back: DatanodeCommand = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cmd);
    }

    #[test]
    fn test_heartbeat_rsp_default_is_empty() {
        assert!(HeartbeatRsp::default().commands.is_empty());
    }
}

//! The Datanode Manager: the coordinator's authoritative registry and
//! lifecycle controller for storage nodes.
//!
//! Four concerns stay mutually consistent under concurrent RPC load: the
//! membership map keyed by storage id, the network topology used to rank
//! replica locations, the include/exclude admission policy, and the
//! per-node command queues drained on each heartbeat. A registration or a
//! heartbeat touches all four.
//!
//! Block accounting and the namesystem proper are collaborator contracts
//! ([`block_manager::BlockManager`], [`namesystem::Namesystem`]); membership
//! itself is in-memory only and rebuilt from registrations after a restart.

pub mod block_manager;
pub mod config;
mod decommission;
pub mod descriptor;
pub mod heartbeat;
pub mod host_map;
pub mod hosts;
pub mod manager;
pub mod namesystem;
pub mod service;

pub use block_manager::{BlockManager, MockBlockManager};
pub use config::DatanodeManagerConfig;
pub use descriptor::{BlockTargets, BlockUnderConstruction, DatanodeDescriptor};
pub use heartbeat::{ClusterStats, HeartbeatManager};
pub use host_map::Host2NodesMap;
pub use hosts::{HostEntry, HostFileManager, HostSet};
pub use manager::{DatanodeManager, HeartbeatOutcome, LocatedBlock, RemoteEndpoint};
pub use namesystem::{MockNamesystem, Namesystem};
pub use service::{DatanodeServiceImpl, IDatanodeService};

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::descriptor::DatanodeDescriptor;
use rdfs_proto::{DatanodeCommand, ExportedBlockKeys};
use rdfs_types::StorageId;

/// The block replication accounting the Datanode Manager delegates to.
///
/// The manager never inspects block state itself: it asks this contract to
/// drop the blocks of a departing node, to tell whether a decommissioning
/// node still has replication in flight, and to produce key-update
/// commands for heartbeats.
pub trait BlockManager: Send + Sync {
    /// Forget every replica hosted by the given node.
    fn remove_blocks_associated_to(&self, node: &DatanodeDescriptor);

    /// Whether any block on the node still waits for re-replication.
    /// `false` lets a decommissioning node complete.
    fn is_replication_in_progress(&self, node: &DatanodeDescriptor) -> bool;

    /// Re-examine the node's replicas after it returned to service.
    fn process_over_replicated_blocks_on_recommission(&self, node: &DatanodeDescriptor);

    /// Scan all blocks for placement violations; invoked once when the
    /// cluster first becomes multi-rack.
    fn process_mis_replicated_blocks(&self);

    /// Current block access keys, exported to registering nodes.
    fn block_keys(&self) -> ExportedBlockKeys;

    /// A key-update command for the node's next heartbeat, if one is due.
    fn key_update_command(&self, node: &DatanodeDescriptor) -> Option<DatanodeCommand>;
}

/// A configurable [`BlockManager`] test double that records what the
/// manager asked of it.
#[derive(Default)]
pub struct MockBlockManager {
    /// Answer for [`BlockManager::is_replication_in_progress`].
    pub replication_in_progress: AtomicBool,
    pub removed_nodes: Mutex<Vec<StorageId>>,
    pub recommissioned_nodes: Mutex<Vec<StorageId>>,
    pub mis_replication_scans: AtomicUsize,
    key_update_handler: Mutex<Option<Box<dyn Fn(&DatanodeDescriptor) -> Option<DatanodeCommand> + Send + Sync>>>,
}

impl MockBlockManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn set_replication_in_progress(&self, value: bool) {
        self.replication_in_progress.store(value, Ordering::Release);
    }

    pub fn on_key_update(
        &self,
        f: impl Fn(&DatanodeDescriptor) -> Option<DatanodeCommand> + Send + Sync + 'static,
    ) {
        *self.key_update_handler.lock() = Some(Box::new(f));
    }

    pub fn removed(&self) -> Vec<StorageId> {
        self.removed_nodes.lock().clone()
    }
}

impl BlockManager for MockBlockManager {
    fn remove_blocks_associated_to(&self, node: &DatanodeDescriptor) {
        self.removed_nodes.lock().push(node.storage_id());
    }

    fn is_replication_in_progress(&self, _node: &DatanodeDescriptor) -> bool {
        self.replication_in_progress.load(Ordering::Acquire)
    }

    fn process_over_replicated_blocks_on_recommission(&self, node: &DatanodeDescriptor) {
        self.recommissioned_nodes.lock().push(node.storage_id());
    }

    fn process_mis_replicated_blocks(&self) {
        self.mis_replication_scans.fetch_add(1, Ordering::AcqRel);
    }

    fn block_keys(&self) -> ExportedBlockKeys {
        ExportedBlockKeys::default()
    }

    fn key_update_command(&self, node: &DatanodeDescriptor) -> Option<DatanodeCommand> {
        let guard = self.key_update_handler.lock();
        match guard.as_ref() {
            Some(f) => f(node),
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdfs_proto::DatanodeId;

    fn descriptor() -> DatanodeDescriptor {
        DatanodeDescriptor::new(
            DatanodeId {
                storage_id: StorageId::new("DS-1"),
                ip_addr: "10.0.0.1".into(),
                host_name: "dn1".into(),
                peer_host_name: String::new(),
                xfer_port: 50010,
                info_port: 0,
                info_secure_port: 0,
                ipc_port: 0,
            },
            "/default-rack",
        )
    }

    #[test]
    fn test_mock_records_removals() {
        let mock = MockBlockManager::new();
        let d = descriptor();
        mock.remove_blocks_associated_to(&d);
        assert_eq!(mock.removed(), vec![StorageId::new("DS-1")]);
    }

    #[test]
    fn test_mock_replication_flag() {
        let mock = MockBlockManager::new();
        let d = descriptor();
        assert!(!mock.is_replication_in_progress(&d));
        mock.set_replication_in_progress(true);
        assert!(mock.is_replication_in_progress(&d));
    }

    #[test]
    fn test_mock_key_update_handler() {
        let mock = MockBlockManager::new();
        let d = descriptor();
        assert!(mock.key_update_command(&d).is_none());

        mock.on_key_update(|_| {
            Some(DatanodeCommand::KeyUpdate {
                keys: ExportedBlockKeys(vec![1, 2, 3]),
            })
        });
        let cmd = mock.key_update_command(&d).unwrap();
        assert!(matches!(cmd, DatanodeCommand::KeyUpdate { .. }));
    }
}

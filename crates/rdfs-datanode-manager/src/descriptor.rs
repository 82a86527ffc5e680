use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use rdfs_net::Node;
use rdfs_proto::{AdminState, Block, DatanodeId, DatanodeInfo, StorageReport};
use rdfs_types::{now_millis, BlockId, GenerationStamp, StorageId};

/// A block scheduled for replication, with the nodes it should be copied to.
#[derive(Clone)]
pub struct BlockTargets {
    pub block: Block,
    pub targets: Vec<Arc<DatanodeDescriptor>>,
}

/// A block left under construction by a failed writer, queued for lease
/// recovery on the primary node.
#[derive(Clone)]
pub struct BlockUnderConstruction {
    pub block: Block,
    pub expected_locations: Vec<Arc<DatanodeDescriptor>>,
    pub recovery_id: GenerationStamp,
}

#[derive(Default)]
struct WorkQueues {
    /// Blocks to replicate elsewhere, drained FIFO up to the node's
    /// transfer budget.
    replication: VecDeque<BlockTargets>,
    /// Blocks under construction awaiting lease recovery. Drained ahead of
    /// everything else.
    recovery: VecDeque<BlockUnderConstruction>,
    /// Replicas to delete, drained up to the invalidate limit.
    invalidate: VecDeque<Block>,
    pending_cache: Vec<BlockId>,
    pending_uncache: Vec<BlockId>,
}

/// Identity and runtime state of one storage node, shared across the
/// registry, the host index, and the topology.
///
/// Identity fields change only on re-registration; liveness flags and the
/// balancer bandwidth are atomics flipped from the heartbeat and admin
/// paths; the command queues sit behind their own short mutex.
pub struct DatanodeDescriptor {
    reg: RwLock<DatanodeId>,
    software_version: RwLock<Option<String>>,
    network_location: RwLock<String>,
    admin_state: AtomicU8,
    /// Set when the node fell off the include list while registered; the
    /// next heartbeat is refused.
    disallowed: AtomicBool,
    is_alive: AtomicBool,
    /// Milliseconds since epoch of the last heartbeat. 0 forces dead.
    last_update: AtomicU64,
    /// Treat the node as stale until it heartbeats again (set after a
    /// coordinator failover).
    stale_after_failover: AtomicBool,
    /// Pending balancer bandwidth announcement; 0 means nothing to send.
    balancer_bandwidth: AtomicU64,
    /// Milliseconds since epoch when decommissioning started; 0 when unset.
    decommission_start: AtomicU64,
    stats: Mutex<StorageReport>,
    queues: Mutex<WorkQueues>,
}

impl DatanodeDescriptor {
    pub fn new(id: DatanodeId, network_location: impl Into<String>) -> Self {
        Self {
            reg: RwLock::new(id),
            software_version: RwLock::new(None),
            network_location: RwLock::new(network_location.into()),
            admin_state: AtomicU8::new(AdminState::Normal.into()),
            disallowed: AtomicBool::new(false),
            is_alive: AtomicBool::new(false),
            last_update: AtomicU64::new(now_millis()),
            stale_after_failover: AtomicBool::new(false),
            balancer_bandwidth: AtomicU64::new(0),
            decommission_start: AtomicU64::new(0),
            stats: Mutex::new(StorageReport::default()),
            queues: Mutex::new(WorkQueues::default()),
        }
    }

    // ---- identity ----

    pub fn id(&self) -> DatanodeId {
        self.reg.read().clone()
    }

    pub fn storage_id(&self) -> StorageId {
        self.reg.read().storage_id.clone()
    }

    pub fn ip_addr(&self) -> String {
        self.reg.read().ip_addr.clone()
    }

    pub fn host_name(&self) -> String {
        self.reg.read().host_name.clone()
    }

    pub fn xfer_addr(&self) -> String {
        self.reg.read().xfer_addr()
    }

    pub fn xfer_port(&self) -> u16 {
        self.reg.read().xfer_port
    }

    /// Overwrite the identity fields from a fresh registration. The caller
    /// guarantees the storage id matches.
    pub fn update_reg_info(&self, id: &DatanodeId) {
        *self.reg.write() = id.clone();
    }

    pub fn software_version(&self) -> Option<String> {
        self.software_version.read().clone()
    }

    pub fn set_software_version(&self, version: Option<String>) {
        *self.software_version.write() = version;
    }

    pub fn set_network_location(&self, location: impl Into<String>) {
        *self.network_location.write() = location.into();
    }

    // ---- admin state ----

    pub fn admin_state(&self) -> AdminState {
        AdminState::try_from(self.admin_state.load(Ordering::Acquire))
            .unwrap_or(AdminState::Normal)
    }

    pub fn is_decommission_in_progress(&self) -> bool {
        self.admin_state() == AdminState::DecommissionInProgress
    }

    pub fn is_decommissioned(&self) -> bool {
        self.admin_state() == AdminState::Decommissioned
    }

    pub fn start_decommission(&self) {
        self.admin_state
            .store(AdminState::DecommissionInProgress.into(), Ordering::Release);
        self.decommission_start.store(now_millis(), Ordering::Release);
    }

    pub fn set_decommissioned(&self) {
        self.admin_state
            .store(AdminState::Decommissioned.into(), Ordering::Release);
    }

    pub fn stop_decommission(&self) {
        self.admin_state
            .store(AdminState::Normal.into(), Ordering::Release);
        self.decommission_start.store(0, Ordering::Release);
    }

    /// Milliseconds since epoch when decommissioning started, 0 when not
    /// decommissioning.
    pub fn decommission_start_time(&self) -> u64 {
        self.decommission_start.load(Ordering::Acquire)
    }

    pub fn is_disallowed(&self) -> bool {
        self.disallowed.load(Ordering::Acquire)
    }

    pub fn set_disallowed(&self, disallowed: bool) {
        self.disallowed.store(disallowed, Ordering::Release);
    }

    // ---- liveness ----

    pub fn is_alive(&self) -> bool {
        self.is_alive.load(Ordering::Acquire)
    }

    pub fn set_alive(&self, alive: bool) {
        self.is_alive.store(alive, Ordering::Release);
    }

    pub fn last_update(&self) -> u64 {
        self.last_update.load(Ordering::Acquire)
    }

    /// Force the node to be classified dead on the next check.
    pub fn force_dead(&self) {
        self.last_update.store(0, Ordering::Release);
    }

    /// Alive but not heard from within `stale_interval_ms`, or flagged
    /// stale after a failover.
    pub fn is_stale(&self, stale_interval_ms: u64, now_ms: u64) -> bool {
        if self.stale_after_failover.load(Ordering::Acquire) {
            return true;
        }
        self.last_update().saturating_add(stale_interval_ms) < now_ms
    }

    pub fn mark_stale_after_failover(&self) {
        self.stale_after_failover.store(true, Ordering::Release);
    }

    /// Fold a heartbeat into the counters and refresh liveness.
    pub fn update_heartbeat(&self, report: &StorageReport) {
        *self.stats.lock() = *report;
        self.last_update.store(now_millis(), Ordering::Release);
        self.is_alive.store(true, Ordering::Release);
        self.stale_after_failover.store(false, Ordering::Release);
    }

    pub fn stats(&self) -> StorageReport {
        *self.stats.lock()
    }

    // ---- balancer bandwidth ----

    pub fn balancer_bandwidth(&self) -> u64 {
        self.balancer_bandwidth.load(Ordering::Acquire)
    }

    pub fn set_balancer_bandwidth(&self, bandwidth: u64) {
        self.balancer_bandwidth.store(bandwidth, Ordering::Release);
    }

    // ---- work queues ----

    pub fn add_block_to_be_replicated(
        &self,
        block: Block,
        targets: Vec<Arc<DatanodeDescriptor>>,
    ) {
        self.queues
            .lock()
            .replication
            .push_back(BlockTargets { block, targets });
    }

    /// Drain up to `max_transfers` pending replication entries, FIFO.
    pub fn replication_command(&self, max_transfers: usize) -> Option<Vec<BlockTargets>> {
        drain_front(&mut self.queues.lock().replication, max_transfers)
    }

    pub fn add_blocks_to_be_invalidated(&self, blocks: Vec<Block>) {
        self.queues.lock().invalidate.extend(blocks);
    }

    /// Drain up to `limit` blocks awaiting invalidation, FIFO.
    pub fn invalidate_command(&self, limit: usize) -> Option<Vec<Block>> {
        drain_front(&mut self.queues.lock().invalidate, limit)
    }

    pub fn add_block_to_be_recovered(&self, block: BlockUnderConstruction) {
        let mut queues = self.queues.lock();
        if queues.recovery.iter().any(|b| b.block.id == block.block.id) {
            // The lease manager retries; the block is already queued.
            debug!(block = %block.block.id, node = %self.xfer_addr(),
                "block already queued for recovery");
            return;
        }
        queues.recovery.push_back(block);
    }

    /// Drain every block awaiting lease recovery, FIFO.
    pub fn lease_recovery_command(&self) -> Option<Vec<BlockUnderConstruction>> {
        drain_front(&mut self.queues.lock().recovery, usize::MAX)
    }

    pub fn add_pending_cached(&self, block: BlockId) {
        self.queues.lock().pending_cache.push(block);
    }

    pub fn add_pending_uncached(&self, block: BlockId) {
        self.queues.lock().pending_uncache.push(block);
    }

    /// Take and clear the pending-cache list.
    pub fn drain_pending_cached(&self) -> Vec<BlockId> {
        std::mem::take(&mut self.queues.lock().pending_cache)
    }

    /// Take and clear the pending-uncache list.
    pub fn drain_pending_uncached(&self) -> Vec<BlockId> {
        std::mem::take(&mut self.queues.lock().pending_uncache)
    }

    pub fn pending_replication_count(&self) -> usize {
        self.queues.lock().replication.len()
    }

    pub fn pending_invalidate_count(&self) -> usize {
        self.queues.lock().invalidate.len()
    }

    pub fn pending_recovery_count(&self) -> usize {
        self.queues.lock().recovery.len()
    }

    /// Drop every queued action: replication, recovery, invalidation, and
    /// cache work.
    pub fn clear_block_queues(&self) {
        *self.queues.lock() = WorkQueues::default();
    }

    // ---- reporting ----

    pub fn to_info(&self) -> DatanodeInfo {
        DatanodeInfo {
            id: self.id(),
            network_location: self.network_location(),
            admin_state: self.admin_state(),
            last_update: self.last_update(),
            software_version: self.software_version(),
            report: self.stats(),
        }
    }

    /// One-line diagnostic used by the registry dump.
    pub fn dump(&self) -> String {
        let stats = self.stats();
        format!(
            "{} {} {:?} alive={} lastUpdate={} capacity={} used={} remaining={}",
            self.xfer_addr(),
            self.network_location(),
            self.admin_state(),
            self.is_alive(),
            self.last_update(),
            stats.capacity,
            stats.dfs_used,
            stats.remaining,
        )
    }
}

impl Node for DatanodeDescriptor {
    fn name(&self) -> String {
        self.xfer_addr()
    }

    fn network_location(&self) -> String {
        self.network_location.read().clone()
    }
}

impl DatanodeDescriptor {
    pub fn network_location(&self) -> String {
        self.network_location.read().clone()
    }
}

impl std::fmt::Debug for DatanodeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "DatanodeDescriptor({}, {})",
            self.storage_id(),
            self.xfer_addr()
        )
    }
}

fn drain_front<T>(queue: &mut VecDeque<T>, max: usize) -> Option<Vec<T>> {
    if queue.is_empty() {
        return None;
    }
    let take = max.min(queue.len());
    Some(queue.drain(..take).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(ip: &str, port: u16) -> DatanodeDescriptor {
        DatanodeDescriptor::new(
            DatanodeId {
                storage_id: StorageId::new(format!("DS-{}", ip)),
                ip_addr: ip.to_string(),
                host_name: format!("host-{}", ip),
                peer_host_name: String::new(),
                xfer_port: port,
                info_port: 50075,
                info_secure_port: 50475,
                ipc_port: 50020,
            },
            "/d1/r1",
        )
    }

    #[test]
    fn test_new_descriptor_defaults() {
        let d = descriptor("10.0.0.1", 50010);
        assert!(!d.is_alive());
        assert!(!d.is_disallowed());
        assert_eq!(d.admin_state(), AdminState::Normal);
        assert!(d.last_update() > 0);
        assert_eq!(d.balancer_bandwidth(), 0);
    }

    #[test]
    fn test_update_reg_info_changes_address() {
        let d = descriptor("10.0.0.1", 50010);
        let mut id = d.id();
        id.ip_addr = "10.0.0.2".to_string();
        d.update_reg_info(&id);
        assert_eq!(d.xfer_addr(), "10.0.0.2:50010");
        assert_eq!(d.storage_id(), StorageId::new("DS-10.0.0.1"));
    }

    #[test]
    fn test_admin_state_transitions() {
        let d = descriptor("10.0.0.1", 50010);
        d.start_decommission();
        assert!(d.is_decommission_in_progress());
        assert!(d.decommission_start_time() > 0);

        d.set_decommissioned();
        assert!(d.is_decommissioned());

        d.stop_decommission();
        assert_eq!(d.admin_state(), AdminState::Normal);
        assert_eq!(d.decommission_start_time(), 0);
    }

    #[test]
    fn test_staleness() {
        let d = descriptor("10.0.0.1", 50010);
        d.update_heartbeat(&StorageReport::default());
        let now = now_millis();
        assert!(!d.is_stale(30_000, now));
        assert!(d.is_stale(30_000, now + 60_000));

        d.mark_stale_after_failover();
        assert!(d.is_stale(30_000, now));
        // The next heartbeat clears the failover flag.
        d.update_heartbeat(&StorageReport::default());
        assert!(!d.is_stale(30_000, now_millis()));
    }

    #[test]
    fn test_force_dead() {
        let d = descriptor("10.0.0.1", 50010);
        d.force_dead();
        assert_eq!(d.last_update(), 0);
    }

    #[test]
    fn test_replication_queue_fifo_and_cap() {
        let d = descriptor("10.0.0.1", 50010);
        assert!(d.replication_command(10).is_none());

        for i in 0..5 {
            let block = Block {
                id: BlockId(i),
                num_bytes: 1,
                generation_stamp: GenerationStamp(1),
            };
            d.add_block_to_be_replicated(block, vec![]);
        }
        let first = d.replication_command(3).unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(first[0].block.id, BlockId(0));
        let rest = d.replication_command(10).unwrap();
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].block.id, BlockId(3));
        assert!(d.replication_command(10).is_none());
    }

    #[test]
    fn test_recovery_queue_dedupes_by_block() {
        let d = descriptor("10.0.0.1", 50010);
        let buc = BlockUnderConstruction {
            block: Block {
                id: BlockId(9),
                num_bytes: 0,
                generation_stamp: GenerationStamp(1),
            },
            expected_locations: vec![],
            recovery_id: GenerationStamp(2),
        };
        d.add_block_to_be_recovered(buc.clone());
        d.add_block_to_be_recovered(buc);
        assert_eq!(d.pending_recovery_count(), 1);

        let drained = d.lease_recovery_command().unwrap();
        assert_eq!(drained.len(), 1);
        assert!(d.lease_recovery_command().is_none());
    }

    #[test]
    fn test_cache_queues_clear_on_drain() {
        let d = descriptor("10.0.0.1", 50010);
        d.add_pending_cached(BlockId(1));
        d.add_pending_cached(BlockId(2));
        d.add_pending_uncached(BlockId(3));

        assert_eq!(d.drain_pending_cached(), vec![BlockId(1), BlockId(2)]);
        assert!(d.drain_pending_cached().is_empty());
        assert_eq!(d.drain_pending_uncached(), vec![BlockId(3)]);
    }

    #[test]
    fn test_clear_block_queues() {
        let d = descriptor("10.0.0.1", 50010);
        d.add_blocks_to_be_invalidated(vec![Block::default()]);
        d.add_pending_cached(BlockId(1));
        d.clear_block_queues();
        assert_eq!(d.pending_invalidate_count(), 0);
        assert!(d.drain_pending_cached().is_empty());
    }

    #[test]
    fn test_node_impl() {
        let d = descriptor("10.0.0.1", 50010);
        assert_eq!(Node::name(&d), "10.0.0.1:50010");
        assert_eq!(Node::network_location(&d), "/d1/r1");
    }
}

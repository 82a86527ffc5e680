use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::descriptor::DatanodeDescriptor;
use rdfs_proto::StorageReport;

/// Aggregate capacity and usage across live nodes.
///
/// Nodes being decommissioned (or already decommissioned) contribute only
/// their used space: their capacity is on its way out of the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClusterStats {
    pub capacity_total: u64,
    pub capacity_used: u64,
    pub capacity_remaining: u64,
    pub block_pool_used: u64,
    pub cache_capacity: u64,
    pub cache_used: u64,
    pub xceiver_count: u64,
    pub nodes_in_service: usize,
}

impl ClusterStats {
    fn add(&mut self, node: &DatanodeDescriptor) {
        let report = node.stats();
        self.capacity_used += report.dfs_used;
        self.block_pool_used += report.block_pool_used;
        self.cache_capacity += report.cache_capacity;
        self.cache_used += report.cache_used;
        self.xceiver_count += u64::from(report.xceiver_count);
        if node.is_decommission_in_progress() || node.is_decommissioned() {
            self.capacity_total += report.dfs_used;
        } else {
            self.nodes_in_service += 1;
            self.capacity_total += report.capacity;
            self.capacity_remaining += report.remaining;
        }
    }

    fn subtract(&mut self, node: &DatanodeDescriptor) {
        let report = node.stats();
        self.capacity_used = self.capacity_used.saturating_sub(report.dfs_used);
        self.block_pool_used = self.block_pool_used.saturating_sub(report.block_pool_used);
        self.cache_capacity = self.cache_capacity.saturating_sub(report.cache_capacity);
        self.cache_used = self.cache_used.saturating_sub(report.cache_used);
        self.xceiver_count = self
            .xceiver_count
            .saturating_sub(u64::from(report.xceiver_count));
        if node.is_decommission_in_progress() || node.is_decommissioned() {
            self.capacity_total = self.capacity_total.saturating_sub(report.dfs_used);
        } else {
            self.nodes_in_service = self.nodes_in_service.saturating_sub(1);
            self.capacity_total = self.capacity_total.saturating_sub(report.capacity);
            self.capacity_remaining = self.capacity_remaining.saturating_sub(report.remaining);
        }
    }
}

pub struct HeartbeatState {
    stats: ClusterStats,
    datanodes: Vec<Arc<DatanodeDescriptor>>,
}

impl HeartbeatState {
    fn contains(&self, node: &Arc<DatanodeDescriptor>) -> bool {
        self.datanodes.iter().any(|d| Arc::ptr_eq(d, node))
    }

    /// Fold a heartbeat into the node and the aggregate totals.
    pub fn update_heartbeat(&mut self, node: &Arc<DatanodeDescriptor>, report: &StorageReport) {
        self.stats.subtract(node);
        node.update_heartbeat(report);
        self.stats.add(node);
    }
}

/// Tracks which descriptors are heartbeating and keeps [`ClusterStats`]
/// consistent with every liveness and admin-state change.
///
/// Lock ordering: where both are needed, this lock is taken before the
/// registry lock and after the namesystem lock.
pub struct HeartbeatManager {
    state: Mutex<HeartbeatState>,
}

impl Default for HeartbeatManager {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatManager {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HeartbeatState {
                stats: ClusterStats::default(),
                datanodes: Vec::new(),
            }),
        }
    }

    /// Take the statistics lock. Used by the heartbeat path, which must
    /// hold it across the liveness update and the command drain.
    pub fn lock(&self) -> MutexGuard<'_, HeartbeatState> {
        self.state.lock()
    }

    /// Begin tracking a node and mark it alive.
    pub fn add_datanode(&self, node: &Arc<DatanodeDescriptor>) {
        let mut state = self.state.lock();
        if !state.contains(node) {
            node.set_alive(true);
            state.stats.add(node);
            state.datanodes.push(Arc::clone(node));
        }
    }

    /// Track a (re-)registered node; the registration doubles as its first
    /// heartbeat.
    pub fn register(&self, node: &Arc<DatanodeDescriptor>) {
        let mut state = self.state.lock();
        if !state.contains(node) {
            node.set_alive(true);
            state.stats.add(node);
            state.datanodes.push(Arc::clone(node));
        }
        state.update_heartbeat(node, &StorageReport::default());
    }

    /// Stop tracking a node and mark it no longer alive.
    pub fn remove_datanode(&self, node: &Arc<DatanodeDescriptor>) {
        let mut state = self.state.lock();
        if state.contains(node) {
            state.stats.subtract(node);
            state.datanodes.retain(|d| !Arc::ptr_eq(d, node));
            node.set_alive(false);
        }
    }

    pub fn update_heartbeat(&self, node: &Arc<DatanodeDescriptor>, report: &StorageReport) {
        self.state.lock().update_heartbeat(node, report);
    }

    /// Flip the node into decommission-in-progress, keeping totals right.
    pub fn start_decommission(&self, node: &Arc<DatanodeDescriptor>) {
        let mut state = self.state.lock();
        state.stats.subtract(node);
        node.start_decommission();
        state.stats.add(node);
    }

    /// Return the node to normal service, keeping totals right.
    pub fn stop_decommission(&self, node: &Arc<DatanodeDescriptor>) {
        let mut state = self.state.lock();
        state.stats.subtract(node);
        node.stop_decommission();
        state.stats.add(node);
    }

    pub fn live_datanode_count(&self) -> usize {
        self.state.lock().datanodes.len()
    }

    pub fn stats(&self) -> ClusterStats {
        self.state.lock().stats
    }

    /// Snapshot of the tracked descriptors, for the dead/stale sweep.
    pub fn datanodes(&self) -> Vec<Arc<DatanodeDescriptor>> {
        self.state.lock().datanodes.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdfs_proto::DatanodeId;
    use rdfs_types::StorageId;

    fn descriptor(n: u8) -> Arc<DatanodeDescriptor> {
        Arc::new(DatanodeDescriptor::new(
            DatanodeId {
                storage_id: StorageId::new(format!("DS-{}", n)),
                ip_addr: format!("10.0.0.{}", n),
                host_name: format!("dn{}", n),
                peer_host_name: String::new(),
                xfer_port: 50010,
                info_port: 0,
                info_secure_port: 0,
                ipc_port: 0,
            },
            "/default-rack",
        ))
    }

    fn report(capacity: u64, used: u64) -> StorageReport {
        StorageReport {
            capacity,
            dfs_used: used,
            remaining: capacity - used,
            block_pool_used: used,
            cache_capacity: 0,
            cache_used: 0,
            xceiver_count: 2,
            failed_volumes: 0,
        }
    }

    #[test]
    fn test_add_marks_alive_and_counts() {
        let hm = HeartbeatManager::new();
        let d = descriptor(1);
        assert!(!d.is_alive());
        hm.add_datanode(&d);
        assert!(d.is_alive());
        assert_eq!(hm.live_datanode_count(), 1);

        // Adding again is a no-op.
        hm.add_datanode(&d);
        assert_eq!(hm.live_datanode_count(), 1);
    }

    #[test]
    fn test_update_heartbeat_accumulates() {
        let hm = HeartbeatManager::new();
        let a = descriptor(1);
        let b = descriptor(2);
        hm.add_datanode(&a);
        hm.add_datanode(&b);

        hm.update_heartbeat(&a, &report(1000, 100));
        hm.update_heartbeat(&b, &report(500, 50));
        let stats = hm.stats();
        assert_eq!(stats.capacity_total, 1500);
        assert_eq!(stats.capacity_used, 150);
        assert_eq!(stats.capacity_remaining, 1350);
        assert_eq!(stats.nodes_in_service, 2);
        assert_eq!(stats.xceiver_count, 4);

        // A later heartbeat replaces, not adds.
        hm.update_heartbeat(&a, &report(1000, 200));
        assert_eq!(hm.stats().capacity_used, 250);
    }

    #[test]
    fn test_remove_subtracts() {
        let hm = HeartbeatManager::new();
        let d = descriptor(1);
        hm.add_datanode(&d);
        hm.update_heartbeat(&d, &report(1000, 100));

        hm.remove_datanode(&d);
        assert!(!d.is_alive());
        assert_eq!(hm.live_datanode_count(), 0);
        assert_eq!(hm.stats(), ClusterStats::default());
    }

    #[test]
    fn test_decommission_moves_capacity_out() {
        let hm = HeartbeatManager::new();
        let d = descriptor(1);
        hm.add_datanode(&d);
        hm.update_heartbeat(&d, &report(1000, 100));

        hm.start_decommission(&d);
        let stats = hm.stats();
        assert!(d.is_decommission_in_progress());
        assert_eq!(stats.nodes_in_service, 0);
        // Only the used space remains visible.
        assert_eq!(stats.capacity_total, 100);
        assert_eq!(stats.capacity_remaining, 0);

        hm.stop_decommission(&d);
        let stats = hm.stats();
        assert_eq!(stats.nodes_in_service, 1);
        assert_eq!(stats.capacity_total, 1000);
    }

    #[test]
    fn test_register_counts_as_heartbeat() {
        let hm = HeartbeatManager::new();
        let d = descriptor(1);
        d.force_dead();
        hm.register(&d);
        assert!(d.is_alive());
        assert!(d.last_update() > 0);
    }
}

use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::block_manager::BlockManager;
use crate::config::DatanodeManagerConfig;
use crate::decommission;
use crate::descriptor::DatanodeDescriptor;
use crate::heartbeat::HeartbeatManager;
use crate::host_map::Host2NodesMap;
use crate::hosts::{HostEntry, HostFileManager};
use crate::namesystem::Namesystem;
use rdfs_net::topology::ROOT;
use rdfs_net::{DnsToSwitchMapping, NetworkTopology, Node, NodeBase, DEFAULT_RACK};
use rdfs_proto::{
    BlockTargetPair, DatanodeCommand, DatanodeId, DatanodeRegistration, DatanodeReportKind,
    ExtendedBlock, RecoveringBlock, StorageReport,
};
use rdfs_types::{make_error_msg, now_millis, NodeCode, Result, Status, StatusCode, StorageId};

/// The address a registration RPC actually arrived from. When present it
/// overrides whatever the node claimed about itself.
#[derive(Debug, Clone)]
pub struct RemoteEndpoint {
    pub ip: String,
    pub host_name: String,
}

/// A block and the nodes currently holding replicas, as handed to readers.
#[derive(Clone)]
pub struct LocatedBlock {
    pub block: ExtendedBlock,
    pub locations: Vec<Arc<DatanodeDescriptor>>,
}

/// Result of processing one heartbeat.
///
/// The RPC layer encodes `Commands` as the ordered command array,
/// `AskReregister` as the single register command, and `Disallowed` as an
/// error response.
#[derive(Debug)]
pub enum HeartbeatOutcome {
    Commands(Vec<DatanodeCommand>),
    AskReregister,
    Disallowed(Status),
}

#[derive(Default)]
struct Registry {
    /// Storage id -> descriptor, for every storage currently registered.
    map: BTreeMap<StorageId, Arc<DatanodeDescriptor>>,
    /// Software version -> number of live nodes running it.
    software_versions: HashMap<String, u64>,
}

/// The authoritative registry and lifecycle controller for storage nodes.
///
/// Keeps the primary storage-id map, the host index, and the topology tree
/// mutually consistent under concurrent registrations, heartbeats, report
/// queries, and the periodic decommission and dead-node sweeps.
///
/// Lock order, outermost first: namesystem lock, heartbeat statistics,
/// registry.
pub struct DatanodeManager {
    namesystem: Arc<dyn Namesystem>,
    block_manager: Arc<dyn BlockManager>,
    heartbeat_manager: HeartbeatManager,
    topology: NetworkTopology<DatanodeDescriptor>,
    host_map: Host2NodesMap,
    host_files: HostFileManager,
    dns_resolver: Arc<dyn DnsToSwitchMapping>,
    registry: Mutex<Registry>,

    config: DatanodeManagerConfig,
    heartbeat_expire_interval_ms: u64,
    block_invalidate_limit: usize,
    stale_interval_ms: u64,

    /// Written by the dead/stale sweep, read by the write-placement hint.
    /// Momentarily stale reads are acceptable.
    num_stale_nodes: AtomicUsize,
    /// Sticky: set the first time the topology reports a second rack.
    ever_multi_rack: AtomicBool,
    /// Whether heartbeat responses may carry cache/uncache commands.
    send_caching_commands: AtomicBool,

    shutdown_tx: watch::Sender<bool>,
    background: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl DatanodeManager {
    pub fn new(
        config: DatanodeManagerConfig,
        namesystem: Arc<dyn Namesystem>,
        block_manager: Arc<dyn BlockManager>,
        dns_resolver: Arc<dyn DnsToSwitchMapping>,
    ) -> Result<Self> {
        use rdfs_config::Config as _;
        config
            .validate()
            .map_err(|e| Status::with_message(StatusCode::INVALID_CONFIG, e.to_string()))?;

        let host_files = HostFileManager::new();
        if let Err(e) = host_files.refresh(&config.hosts_file, &config.hosts_exclude_file) {
            error!(error = %e, "error reading host files");
        }

        // A caching resolver is pre-warmed with the include list so the
        // first registrations resolve from cache.
        if dns_resolver.is_cached() {
            let addresses: Vec<String> = host_files
                .includes()
                .iter()
                .filter(|e| !e.ip_address.is_empty())
                .map(|e| e.ip_address.clone())
                .collect();
            if !addresses.is_empty() {
                dns_resolver.resolve(&addresses);
            }
        }

        let heartbeat_expire_interval_ms = config.heartbeat_expire_interval_ms();
        let block_invalidate_limit = config.effective_block_invalidate_limit();
        let stale_interval_ms = config.effective_stale_interval_ms();
        info!(
            block_invalidate_limit,
            stale_interval_ms, "datanode manager initialized"
        );

        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            namesystem,
            block_manager,
            heartbeat_manager: HeartbeatManager::new(),
            topology: NetworkTopology::new(),
            host_map: Host2NodesMap::new(),
            host_files,
            dns_resolver,
            registry: Mutex::new(Registry::default()),
            config,
            heartbeat_expire_interval_ms,
            block_invalidate_limit,
            stale_interval_ms,
            num_stale_nodes: AtomicUsize::new(0),
            ever_multi_rack: AtomicBool::new(false),
            send_caching_commands: AtomicBool::new(false),
            shutdown_tx,
            background: Mutex::new(Vec::new()),
        })
    }

    /// Start the decommission monitor and the dead-node sweep.
    pub fn activate(self: &Arc<Self>) {
        let monitor = decommission::spawn_monitor(
            Arc::clone(self),
            Duration::from_secs(self.config.decommission_interval_secs.max(1)),
            self.config.decommission_nodes_per_interval,
            self.shutdown_tx.subscribe(),
        );

        let sweeper = Arc::clone(self);
        let mut shutdown = self.shutdown_tx.subscribe();
        let recheck = Duration::from_millis(self.config.heartbeat_recheck_interval_ms.max(1));
        let sweep = tokio::spawn(async move {
            let mut tick = tokio::time::interval(recheck);
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = tick.tick() => sweeper.heartbeat_check(),
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("heartbeat sweep stopped");
        });

        self.background.lock().extend([monitor, sweep]);
    }

    /// Stop the background tasks, waiting up to three seconds for each.
    pub async fn close(&self) {
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<_> = std::mem::take(&mut *self.background.lock());
        for handle in handles {
            if tokio::time::timeout(Duration::from_secs(3), handle)
                .await
                .is_err()
            {
                warn!("background task did not stop within the shutdown budget");
            }
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn network_topology(&self) -> &NetworkTopology<DatanodeDescriptor> {
        &self.topology
    }

    pub(crate) fn namesystem(&self) -> &Arc<dyn Namesystem> {
        &self.namesystem
    }

    pub fn heartbeat_manager(&self) -> &HeartbeatManager {
        &self.heartbeat_manager
    }

    pub fn host_file_manager(&self) -> &HostFileManager {
        &self.host_files
    }

    pub fn get_datanode(&self, storage_id: &StorageId) -> Option<Arc<DatanodeDescriptor>> {
        self.registry.lock().map.get(storage_id).cloned()
    }

    pub fn get_datanode_by_host(&self, ip: &str) -> Option<Arc<DatanodeDescriptor>> {
        self.host_map.get_by_host(ip)
    }

    pub fn get_datanode_by_xfer_addr(
        &self,
        ip: &str,
        xfer_port: u16,
    ) -> Option<Arc<DatanodeDescriptor>> {
        self.host_map.get_by_xfer_addr(ip, xfer_port)
    }

    pub fn num_datanodes(&self) -> usize {
        self.registry.lock().map.len()
    }

    /// Snapshot of the registry keys, in order. Used by the cyclic
    /// decommission scan.
    pub(crate) fn registry_snapshot(&self) -> Vec<(StorageId, Arc<DatanodeDescriptor>)> {
        self.registry
            .lock()
            .map
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect()
    }

    pub fn stale_interval_ms(&self) -> u64 {
        self.stale_interval_ms
    }

    pub fn heartbeat_expire_interval_ms(&self) -> u64 {
        self.heartbeat_expire_interval_ms
    }

    pub fn has_cluster_ever_been_multi_rack(&self) -> bool {
        self.ever_multi_rack.load(Ordering::Acquire)
    }

    pub fn set_send_caching_commands(&self, send: bool) {
        self.send_caching_commands.store(send, Ordering::Release);
    }

    pub fn set_num_stale_nodes(&self, n: usize) {
        self.num_stale_nodes.store(n, Ordering::Release);
    }

    pub fn num_stale_nodes(&self) -> usize {
        self.num_stale_nodes.load(Ordering::Acquire)
    }

    /// Whether the write path should currently avoid stale nodes. Disabled
    /// on the fly once too much of the cluster is stale.
    pub fn should_avoid_stale_datanodes_for_write(&self) -> bool {
        self.config.avoid_stale_datanodes_for_write
            && self.num_stale_nodes() as f32
                <= self.heartbeat_manager.live_datanode_count() as f32
                    * self.config.use_stale_write_ratio
    }

    /// Live-node count histogram by software version.
    pub fn datanode_software_versions(&self) -> HashMap<String, u64> {
        self.registry.lock().software_versions.clone()
    }

    pub fn is_datanode_dead(&self, node: &DatanodeDescriptor) -> bool {
        node.last_update() < now_millis().saturating_sub(self.heartbeat_expire_interval_ms)
    }

    // ------------------------------------------------------------------
    // Registry mutators
    // ------------------------------------------------------------------

    /// Insert a descriptor into the primary map, the topology, and the
    /// host index, evicting any prior holder of the same storage id from
    /// the host index first.
    pub(crate) fn add_datanode(&self, node: Arc<DatanodeDescriptor>) -> Result<()> {
        {
            let mut registry = self.registry.lock();
            if let Some(prev) = registry.map.insert(node.storage_id(), Arc::clone(&node)) {
                if !Arc::ptr_eq(&prev, &node) {
                    self.host_map.remove(&prev);
                }
            }
        }

        self.topology
            .add(Arc::clone(&node))
            .map_err(|e| Status::with_message(NodeCode::INVALID_TOPOLOGY, e.to_string()))?;
        self.host_map.add(Arc::clone(&node));
        self.check_if_cluster_is_now_multi_rack(&node);

        debug!(node = %node.xfer_addr(), storage = %node.storage_id(), "added to registry");
        Ok(())
    }

    /// Remove a descriptor from the primary map and the host index. The
    /// topology is left alone.
    pub(crate) fn wipe_datanode(&self, node: &DatanodeDescriptor) {
        let key = node.storage_id();
        let mut registry = self.registry.lock();
        if let Some(prev) = registry.map.remove(&key) {
            self.host_map.remove(&prev);
        }
        debug!(storage = %key, "wiped from registry");
    }

    /// Remove a node from service: statistics, block accounting, topology,
    /// and the version histogram. Requires the namesystem write lock.
    fn remove_datanode_locked(&self, node: &Arc<DatanodeDescriptor>) {
        debug_assert!(self.namesystem.fs_lock().is_locked());
        self.heartbeat_manager.remove_datanode(node);
        self.block_manager.remove_blocks_associated_to(node);
        self.topology.remove(node);
        self.decrement_version_count(node.software_version().as_deref());
        debug!(node = %node.xfer_addr(), "removed datanode");
        self.namesystem.check_safe_mode();
    }

    /// Operator-initiated removal of a node, by identity.
    pub fn remove_datanode(&self, node_id: &DatanodeId) {
        let _fs = self.namesystem.fs_lock().write();
        let node = self.get_datanode(&node_id.storage_id);
        match node {
            Some(node) => {
                self.remove_datanode_locked(&node);
                self.wipe_datanode(&node);
            }
            None => warn!(node = %node_id, "remove_datanode: node does not exist"),
        }
    }

    /// Remove a node that stopped heartbeating, re-checking deadness under
    /// the lock.
    pub(crate) fn remove_dead_datanode(&self, node: &Arc<DatanodeDescriptor>) {
        let _fs = self.namesystem.fs_lock().write();
        if self.is_datanode_dead(node) {
            info!(node = %node.xfer_addr(), "lost heartbeat; removing dead datanode");
            self.remove_datanode_locked(node);
            self.wipe_datanode(node);
        }
    }

    /// One pass of the dead/stale sweep: refresh the stale count and
    /// remove every node past the expiry interval.
    pub fn heartbeat_check(&self) {
        let now = now_millis();
        let nodes = self.heartbeat_manager.datanodes();
        let stale = nodes
            .iter()
            .filter(|d| d.is_stale(self.stale_interval_ms, now))
            .count();
        self.set_num_stale_nodes(stale);

        for node in nodes {
            if self.is_datanode_dead(&node) {
                self.remove_dead_datanode(&node);
            }
        }
    }

    // ---- software version histogram ----

    fn should_count_version(&self, node: &DatanodeDescriptor) -> bool {
        node.software_version().is_some() && node.is_alive() && !self.is_datanode_dead(node)
    }

    fn increment_version_count(&self, version: Option<&str>) {
        if let Some(version) = version {
            *self
                .registry
                .lock()
                .software_versions
                .entry(version.to_string())
                .or_insert(0) += 1;
        }
    }

    fn decrement_version_count(&self, version: Option<&str>) {
        if let Some(version) = version {
            let mut registry = self.registry.lock();
            if let Some(count) = registry.software_versions.get_mut(version) {
                if *count > 1 {
                    *count -= 1;
                } else {
                    registry.software_versions.remove(version);
                }
            }
        }
    }

    fn recount_software_versions(&self) {
        let mut registry = self.registry.lock();
        let mut counts: HashMap<String, u64> = HashMap::new();
        for node in registry.map.values() {
            if self.should_count_version(node) {
                if let Some(version) = node.software_version() {
                    *counts.entry(version).or_insert(0) += 1;
                }
            }
        }
        registry.software_versions = counts;
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    fn resolve_network_location(&self, id: &DatanodeId) -> String {
        // Caching resolvers are keyed by address; script-backed ones by
        // host name.
        let name = if self.dns_resolver.is_cached() {
            id.ip_addr.clone()
        } else {
            id.host_name.clone()
        };
        let names = vec![name];
        match self
            .dns_resolver
            .resolve(&names)
            .and_then(|mut racks| (!racks.is_empty()).then(|| racks.remove(0)))
        {
            Some(rack) => rack,
            None => {
                error!(host = %names[0], "rack resolution failed; using {}", DEFAULT_RACK);
                DEFAULT_RACK.to_string()
            }
        }
    }

    fn new_storage_id(&self) -> StorageId {
        let registry = self.registry.lock();
        let mut rng = rand::thread_rng();
        loop {
            let candidate = StorageId::new(format!("DS{}", rng.gen::<i32>()));
            if !registry.map.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    /// Admit, replace, or restart a node presenting a registration.
    ///
    /// The registration is mutated in place (assigned storage id, exported
    /// keys, remote-address override) and handed back to the node. The
    /// whole operation runs under the namesystem write lock; every
    /// state-mutating path is all-or-nothing.
    pub fn register_datanode(
        &self,
        reg: &mut DatanodeRegistration,
        remote: Option<RemoteEndpoint>,
    ) -> Result<()> {
        let _fs = self.namesystem.fs_lock().write();

        if let Some(remote) = remote {
            if self.config.registration_ip_hostname_check && !name_resolved(&remote) {
                let message = format!(
                    "hostname cannot be resolved (ip={}, hostname={})",
                    remote.ip, remote.host_name
                );
                warn!(ip = %remote.ip, "unresolved datanode registration rejected");
                return make_error_msg(NodeCode::DISALLOWED, message);
            }
            // The connection address is authoritative.
            reg.id.ip_addr = remote.ip;
            reg.id.peer_host_name = remote.host_name;
        }

        let result = self.register_datanode_inner(reg);
        if let Err(status) = &result {
            if status.code() == NodeCode::INVALID_TOPOLOGY {
                // Evict stale rack mappings so a retry can re-resolve.
                let names = vec![
                    reg.id.ip_addr.clone(),
                    reg.id.host_name.clone(),
                    reg.id.peer_host_name.clone(),
                ];
                self.dns_resolver.reload_cached_mappings(&names);
            }
        }
        result
    }

    fn register_datanode_inner(&self, reg: &mut DatanodeRegistration) -> Result<()> {
        reg.keys = self.block_manager.block_keys();

        if !self.host_files.is_included(&reg.id) {
            return make_error_msg(
                NodeCode::DISALLOWED,
                format!("datanode {} is not in the include list", reg.id),
            );
        }

        info!(node = %reg.id, storage = %reg.id.storage_id, "registering datanode");

        let node_s = self.get_datanode(&reg.id.storage_id);
        let node_n = self
            .host_map
            .get_by_xfer_addr(&reg.id.ip_addr, reg.id.xfer_port);

        if let Some(node_n) = node_n {
            let same = node_s
                .as_ref()
                .map_or(false, |s| Arc::ptr_eq(s, &node_n));
            if !same {
                // node_n previously served a different storage which is
                // not served by anybody anymore.
                info!(node = %node_n.xfer_addr(), storage = %node_n.storage_id(),
                    "address re-registered for a different storage; evicting prior node");
                self.remove_datanode_locked(&node_n);
                self.wipe_datanode(&node_n);
            }
        }

        if let Some(node_s) = node_s {
            if node_s.xfer_addr() == reg.id.xfer_addr() {
                // Same node restarted on the same storage; the block delta
                // arrives with its next block report.
                debug!(storage = %reg.id.storage_id, "datanode restarted");
            } else {
                info!(old = %node_s.xfer_addr(), new = %reg.id.xfer_addr(),
                    storage = %reg.id.storage_id,
                    "datanode replaced by a new node serving the same storage");
            }

            let updated = (|| -> Result<()> {
                self.topology.remove(&node_s);
                if self.should_count_version(&node_s) {
                    self.decrement_version_count(node_s.software_version().as_deref());
                }
                self.host_map.remove(&node_s);
                node_s.update_reg_info(&reg.id);
                node_s.set_software_version(reg.software_version.clone());
                node_s.set_disallowed(false);

                let location = self.resolve_network_location(&node_s.id());
                node_s.set_network_location(location);
                self.topology
                    .add(Arc::clone(&node_s))
                    .map_err(|e| Status::with_message(NodeCode::INVALID_TOPOLOGY, e.to_string()))?;
                self.host_map.add(Arc::clone(&node_s));
                self.check_if_cluster_is_now_multi_rack(&node_s);

                // The registration doubles as a heartbeat.
                self.heartbeat_manager.register(&node_s);
                self.increment_version_count(node_s.software_version().as_deref());
                self.check_decommissioning(&node_s);
                Ok(())
            })();

            if updated.is_err() {
                self.remove_datanode_locked(&node_s);
                self.wipe_datanode(&node_s);
                self.recount_software_versions();
            }
            return updated;
        }

        // A new datanode serving a new storage.
        if reg.id.storage_id.is_empty() {
            reg.id.storage_id = self.new_storage_id();
            debug!(storage = %reg.id.storage_id, "assigned new storage id");
        }

        let node = Arc::new(DatanodeDescriptor::new(reg.id.clone(), DEFAULT_RACK));
        node.set_software_version(reg.software_version.clone());

        let added = (|| -> Result<()> {
            let location = self.resolve_network_location(&reg.id);
            node.set_network_location(location);
            self.add_datanode(Arc::clone(&node))?;
            self.check_decommissioning(&node);
            self.heartbeat_manager.add_datanode(&node);
            self.increment_version_count(node.software_version().as_deref());
            Ok(())
        })();

        if added.is_err() {
            self.remove_datanode_locked(&node);
            self.wipe_datanode(&node);
            self.recount_software_versions();
        }
        added
    }

    fn check_if_cluster_is_now_multi_rack(&self, node: &Arc<DatanodeDescriptor>) {
        if !self.ever_multi_rack.load(Ordering::Acquire) && self.topology.num_racks() > 1 {
            self.ever_multi_rack.store(true, Ordering::Release);
            if self.namesystem.is_populating_repl_queues() {
                info!(node = %node.xfer_addr(),
                    "node expanded a single-rack cluster to multi-rack; re-checking block placement");
                self.block_manager.process_mis_replicated_blocks();
            } else {
                debug!(node = %node.xfer_addr(),
                    "cluster is now multi-rack; replication queues not yet populated");
            }
        }
    }

    // ------------------------------------------------------------------
    // Decommissioning
    // ------------------------------------------------------------------

    /// Start decommissioning the node if the exclude list names it.
    fn check_decommissioning(&self, node: &Arc<DatanodeDescriptor>) {
        if self.host_files.is_excluded(&node.id()) {
            self.start_decommission(node);
        }
    }

    pub(crate) fn start_decommission(&self, node: &Arc<DatanodeDescriptor>) {
        if !node.is_decommission_in_progress() && !node.is_decommissioned() {
            info!(node = %node.xfer_addr(), "starting decommission");
            self.heartbeat_manager.start_decommission(node);
            // Blocks may already be fully replicated elsewhere.
            self.check_decommission_state(node);
        }
    }

    pub(crate) fn stop_decommission(&self, node: &Arc<DatanodeDescriptor>) {
        if node.is_decommission_in_progress() || node.is_decommissioned() {
            info!(node = %node.xfer_addr(), "stopping decommission");
            self.heartbeat_manager.stop_decommission(node);
            // A dead node re-joining is handled by its next block report.
            if node.is_alive() {
                self.block_manager
                    .process_over_replicated_blocks_on_recommission(node);
            }
        }
    }

    /// Complete decommissioning once no replication remains in flight.
    /// Returns whether the node is now decommissioned.
    pub(crate) fn check_decommission_state(&self, node: &Arc<DatanodeDescriptor>) -> bool {
        if node.is_decommission_in_progress()
            && !self.block_manager.is_replication_in_progress(node)
        {
            node.set_decommissioned();
            info!(node = %node.xfer_addr(), "decommission complete");
        }
        node.is_decommissioned()
    }

    // ------------------------------------------------------------------
    // Host file refresh
    // ------------------------------------------------------------------

    /// Reload the include/exclude files and reclassify every node:
    /// not included -> disallowed; included and excluded -> decommission;
    /// included only -> back in service.
    pub fn refresh_nodes(&self, config: &DatanodeManagerConfig) {
        if let Err(e) = self
            .host_files
            .refresh(&config.hosts_file, &config.hosts_exclude_file)
        {
            // The previous policy stays in effect.
            error!(error = %e, "error reading host files during refresh");
        }

        let _fs = self.namesystem.fs_lock().write();
        let nodes: Vec<_> = self.registry.lock().map.values().cloned().collect();
        for node in nodes {
            let id = node.id();
            if !self.host_files.is_included(&id) {
                node.set_disallowed(true);
            } else {
                node.set_disallowed(false);
                if self.host_files.is_excluded(&id) {
                    self.start_decommission(&node);
                } else {
                    self.stop_decommission(&node);
                }
            }
        }
        self.recount_software_versions();
    }

    // ------------------------------------------------------------------
    // Heartbeats
    // ------------------------------------------------------------------

    /// Process one heartbeat: refresh liveness, then hand back the node's
    /// pending work. Lease recovery preempts every other command kind.
    pub fn handle_heartbeat(
        &self,
        reg: &DatanodeId,
        report: &StorageReport,
        pool_id: &str,
        max_transfers: usize,
    ) -> HeartbeatOutcome {
        let mut hb = self.heartbeat_manager.lock();

        let node = self.get_datanode(&reg.storage_id);
        let node = match node {
            Some(node) => {
                if node.xfer_addr() != reg.xfer_addr() {
                    error!(presented = %reg.xfer_addr(), known = %node.xfer_addr(),
                        storage = %reg.storage_id,
                        "heartbeat address does not match registered node");
                    return HeartbeatOutcome::AskReregister;
                }
                node
            }
            None => return HeartbeatOutcome::AskReregister,
        };

        // A node dropped from the include list is refused and forced dead.
        if node.is_disallowed() {
            node.force_dead();
            return HeartbeatOutcome::Disallowed(Status::with_message(
                NodeCode::DISALLOWED,
                format!("datanode {} is not allowed to connect", reg),
            ));
        }

        if !node.is_alive() {
            return HeartbeatOutcome::AskReregister;
        }

        hb.update_heartbeat(&node, report);

        // In safe mode no work is handed out; queues are not even drained.
        if self.namesystem.is_in_safe_mode() {
            return HeartbeatOutcome::Commands(Vec::new());
        }

        if let Some(blocks) = node.lease_recovery_command() {
            let now = now_millis();
            let mut recovering = Vec::with_capacity(blocks.len());
            for under_construction in blocks {
                let expected = &under_construction.expected_locations;
                let fresh: Vec<_> = expected
                    .iter()
                    .filter(|loc| !loc.is_stale(self.stale_interval_ms, now))
                    .cloned()
                    .collect();
                // With at most one fresh replica, every replica takes part
                // and the primary drives error handling.
                let participants = if fresh.len() > 1 {
                    if fresh.len() != expected.len() {
                        info!(
                            skipped = expected.len() - fresh.len(),
                            block = %under_construction.block.id,
                            "skipped stale nodes for lease recovery"
                        );
                    }
                    fresh
                } else {
                    expected.clone()
                };
                recovering.push(RecoveringBlock {
                    block: ExtendedBlock {
                        pool_id: pool_id.to_string(),
                        block: under_construction.block,
                    },
                    locations: participants.iter().map(|d| d.id()).collect(),
                    recovery_id: under_construction.recovery_id,
                });
            }
            return HeartbeatOutcome::Commands(vec![DatanodeCommand::Recovery {
                blocks: recovering,
            }]);
        }

        let mut commands = Vec::new();

        if let Some(pending) = node.replication_command(max_transfers) {
            commands.push(DatanodeCommand::Transfer {
                pool_id: pool_id.to_string(),
                blocks: pending
                    .into_iter()
                    .map(|bt| BlockTargetPair {
                        block: bt.block,
                        targets: bt.targets.iter().map(|t| t.id()).collect(),
                    })
                    .collect(),
            });
        }

        if let Some(blocks) = node.invalidate_command(self.block_invalidate_limit) {
            commands.push(DatanodeCommand::Invalidate {
                pool_id: pool_id.to_string(),
                blocks,
            });
        }

        // Cache queues are cleared either way; commands only go out when
        // globally enabled.
        let send_caching = self.send_caching_commands.load(Ordering::Acquire);
        let cached = node.drain_pending_cached();
        if !cached.is_empty() && send_caching {
            commands.push(DatanodeCommand::Cache {
                pool_id: pool_id.to_string(),
                block_ids: cached,
            });
        }
        let uncached = node.drain_pending_uncached();
        if !uncached.is_empty() && send_caching {
            commands.push(DatanodeCommand::Uncache {
                pool_id: pool_id.to_string(),
                block_ids: uncached,
            });
        }

        if let Some(cmd) = self.block_manager.key_update_command(&node) {
            commands.push(cmd);
        }

        let bandwidth = node.balancer_bandwidth();
        if bandwidth > 0 {
            commands.push(DatanodeCommand::BalancerBandwidth { bandwidth });
            // Reset acknowledges delivery.
            node.set_balancer_bandwidth(0);
        }

        HeartbeatOutcome::Commands(commands)
    }

    // ------------------------------------------------------------------
    // Reports and queries
    // ------------------------------------------------------------------

    /// Nodes for a membership report. A DEAD (or ALL) listing also
    /// synthesizes dead placeholders for include-file hosts never heard
    /// from, unless they are excluded.
    pub fn datanode_list_for_report(
        &self,
        kind: DatanodeReportKind,
    ) -> Vec<Arc<DatanodeDescriptor>> {
        let list_live = matches!(kind, DatanodeReportKind::All | DatanodeReportKind::Live);
        let list_dead = matches!(kind, DatanodeReportKind::All | DatanodeReportKind::Dead);

        let mut nodes = Vec::new();
        let mut found = Vec::new();
        {
            let registry = self.registry.lock();
            for node in registry.map.values() {
                let dead = self.is_datanode_dead(node);
                if (dead && list_dead) || (!dead && list_live) {
                    nodes.push(Arc::clone(node));
                }
                found.push(node.id());
            }
        }

        if list_dead {
            let includes = self.host_files.includes();
            let excludes = self.host_files.excludes();
            for entry in includes.iter() {
                if found.iter().any(|id| entry.matches(id)) {
                    continue;
                }
                // We cannot ask a host we never heard from which port it
                // uses; entries without one get the configured default.
                let id = DatanodeId {
                    storage_id: StorageId::default(),
                    ip_addr: entry.ip_address.clone(),
                    host_name: entry.prefix.clone(),
                    peer_host_name: String::new(),
                    xfer_port: if entry.port == 0 {
                        self.config.default_xfer_port
                    } else {
                        entry.port
                    },
                    info_port: self.config.default_info_port,
                    info_secure_port: self.config.default_info_secure_port,
                    ipc_port: self.config.default_ipc_port,
                };
                if excludes.contains(&id) {
                    continue;
                }
                let placeholder = DatanodeDescriptor::new(id, DEFAULT_RACK);
                placeholder.force_dead();
                nodes.push(Arc::new(placeholder));
            }
        }
        nodes
    }

    /// Live nodes currently decommissioning.
    pub fn get_decommissioning_nodes(&self) -> Vec<Arc<DatanodeDescriptor>> {
        let _fs = self.namesystem.fs_lock().read();
        self.datanode_list_for_report(DatanodeReportKind::Live)
            .into_iter()
            .filter(|d| d.is_decommission_in_progress())
            .collect()
    }

    /// Strip nodes the operator has fully retired: decommissioned, and in
    /// neither host list while an include list exists.
    pub fn remove_decommissioned_from_list(&self, nodes: &mut Vec<Arc<DatanodeDescriptor>>) {
        if !self.host_files.has_includes() {
            return;
        }
        nodes.retain(|node| {
            let id = node.id();
            !(node.is_decommissioned()
                && !self.host_files.is_included(&id)
                && !self.host_files.is_excluded(&id))
        });
    }

    /// Live and dead nodes, optionally with retired nodes stripped.
    pub fn fetch_datanodes(
        &self,
        remove_decommissioned: bool,
    ) -> (Vec<Arc<DatanodeDescriptor>>, Vec<Arc<DatanodeDescriptor>>) {
        let (mut live, mut dead) = {
            let _fs = self.namesystem.fs_lock().read();
            let mut live = Vec::new();
            let mut dead = Vec::new();
            for node in self.datanode_list_for_report(DatanodeReportKind::All) {
                if self.is_datanode_dead(&node) {
                    dead.push(node);
                } else {
                    live.push(node);
                }
            }
            (live, dead)
        };
        if remove_decommissioned {
            self.remove_decommissioned_from_list(&mut live);
            self.remove_decommissioned_from_list(&mut dead);
        }
        (live, dead)
    }

    pub fn num_live_datanodes(&self) -> usize {
        let registry = self.registry.lock();
        registry
            .map
            .values()
            .filter(|d| !self.is_datanode_dead(d))
            .count()
    }

    pub fn num_dead_datanodes(&self) -> usize {
        let registry = self.registry.lock();
        registry
            .map
            .values()
            .filter(|d| self.is_datanode_dead(d))
            .count()
    }

    /// Order each block's replica locations for a reader: nearest first,
    /// with decommissioned (and optionally stale) nodes pushed to the end.
    pub fn sort_located_blocks(&self, reader_host: &str, blocks: &mut [LocatedBlock]) {
        let registered = self.host_map.get_by_host(reader_host);
        let synthesized: Option<NodeBase> = if registered.is_none() {
            let names = vec![reader_host.to_string()];
            self.dns_resolver
                .resolve(&names)
                .and_then(|mut racks| (!racks.is_empty()).then(|| racks.remove(0)))
                .map(|rack| NodeBase::new(reader_host, rack))
        } else {
            None
        };

        let now = now_millis();
        let consider_stale = self.config.avoid_stale_datanodes_for_read;
        for block in blocks.iter_mut() {
            let reader: Option<&dyn Node> = match (&registered, &synthesized) {
                (Some(node), _) => Some(node.as_ref() as &dyn Node),
                (None, Some(base)) => Some(base as &dyn Node),
                (None, None) => None,
            };
            self.topology
                .pseudo_sort_by_distance(reader, &mut block.locations);
            block.locations.sort_by_key(|d| {
                if d.is_decommissioned() {
                    2u8
                } else if consider_stale && d.is_stale(self.stale_interval_ms, now) {
                    1
                } else {
                    0
                }
            });
        }
    }

    /// Best-effort resolution of a host-file style `host[:port]` entry to
    /// a descriptor: exact transfer address, then host, then a node in the
    /// same rack, then anything in the cluster.
    pub fn get_datanode_descriptor(&self, address: &str) -> Option<Arc<DatanodeDescriptor>> {
        let entry = HostEntry::parse(address)?;
        let host = if entry.ip_address.is_empty() {
            entry.prefix.clone()
        } else {
            entry.ip_address.clone()
        };
        let port = if entry.port == 0 {
            self.config.default_xfer_port
        } else {
            entry.port
        };

        if let Some(node) = self.host_map.get_by_xfer_addr(&host, port) {
            return Some(node);
        }
        if let Some(node) = self.host_map.get_by_host(&host) {
            return Some(node);
        }

        let id = DatanodeId {
            storage_id: StorageId::default(),
            ip_addr: host.clone(),
            host_name: entry.prefix.clone(),
            peer_host_name: String::new(),
            xfer_port: port,
            info_port: self.config.default_info_port,
            info_secure_port: self.config.default_info_secure_port,
            ipc_port: self.config.default_ipc_port,
        };
        let rack = self.resolve_network_location(&id);
        if let Some(rack_nodes) = self.topology.nodes_in_rack(&rack) {
            if let Some(machine_local) = rack_nodes.iter().find(|n| n.ip_addr() == host) {
                return Some(Arc::clone(machine_local));
            }
            if !rack_nodes.is_empty() {
                let pick = rand::thread_rng().gen_range(0..rack_nodes.len());
                return Some(Arc::clone(&rack_nodes[pick]));
            }
        }
        self.topology.choose_random(ROOT)
    }

    // ------------------------------------------------------------------
    // Administrative operations
    // ------------------------------------------------------------------

    /// Queue a one-shot balancer bandwidth announcement on every node.
    pub fn set_balancer_bandwidth(&self, bandwidth: u64) {
        let registry = self.registry.lock();
        for node in registry.map.values() {
            node.set_balancer_bandwidth(bandwidth);
        }
    }

    /// After a failover, distrust every node until it heartbeats again.
    pub fn mark_all_datanodes_stale(&self) {
        info!("marking all datanodes as stale");
        let registry = self.registry.lock();
        for node in registry.map.values() {
            node.mark_stale_after_failover();
        }
    }

    /// Drop every queued action (invalidation, recovery, replication,
    /// caching) across all nodes.
    pub fn clear_pending_queues(&self) {
        let registry = self.registry.lock();
        for node in registry.map.values() {
            node.clear_block_queues();
        }
    }

    /// Diagnostic dump of every registered node.
    pub fn datanode_dump(&self) -> String {
        let registry = self.registry.lock();
        let mut out = format!("Number of datanodes: {}\n", registry.map.len());
        for node in registry.map.values() {
            out.push_str(&node.dump());
            out.push('\n');
        }
        out
    }
}

/// Reverse resolution succeeded if the host name differs from the bare
/// address, or the address is local.
fn name_resolved(remote: &RemoteEndpoint) -> bool {
    if remote.host_name != remote.ip {
        return true;
    }
    remote
        .ip
        .parse::<IpAddr>()
        .map(|ip| ip.is_loopback() || ip.is_unspecified())
        .unwrap_or(false)
}

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::manager::DatanodeManager;
use rdfs_types::StorageId;

/// Tracks where the monitor stopped scanning so each tick resumes where
/// the previous one left off, cycling across the registry key-space.
#[derive(Default)]
pub(crate) struct MonitorCursor {
    last_key: Option<StorageId>,
}

impl MonitorCursor {
    /// Examine decommission-in-progress nodes, at most `nodes_per_interval`
    /// of them, resuming after the previously visited key.
    pub(crate) fn check(&mut self, manager: &DatanodeManager, nodes_per_interval: usize) {
        let _fs = manager_fs_write(manager);

        let snapshot = manager.registry_snapshot();
        if snapshot.is_empty() {
            return;
        }

        let start = match &self.last_key {
            Some(last) => snapshot
                .iter()
                .position(|(key, _)| key > last)
                .unwrap_or(0),
            None => 0,
        };

        let mut checked = 0;
        for offset in 0..snapshot.len() {
            let (key, node) = &snapshot[(start + offset) % snapshot.len()];
            self.last_key = Some(key.clone());
            if node.is_decommission_in_progress() {
                manager.check_decommission_state(node);
                checked += 1;
                if checked >= nodes_per_interval {
                    break;
                }
            }
        }
    }
}

fn manager_fs_write(manager: &DatanodeManager) -> parking_lot::RwLockWriteGuard<'_, ()> {
    manager.namesystem().fs_lock().write()
}

/// Run the decommission monitor until shutdown: every `interval`, scan for
/// decommission-in-progress nodes whose replication has drained.
pub(crate) fn spawn_monitor(
    manager: Arc<DatanodeManager>,
    interval: Duration,
    nodes_per_interval: usize,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut cursor = MonitorCursor::default();
        let mut tick = tokio::time::interval(interval);
        // The first tick of a tokio interval fires immediately.
        tick.tick().await;
        loop {
            tokio::select! {
                _ = tick.tick() => cursor.check(&manager, nodes_per_interval),
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("decommission monitor stopped");
    })
}

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

/// The slice of the coordinator namesystem the Datanode Manager needs.
///
/// `fs_lock` is the outermost lock of the system: registration, node
/// removal, and refresh hold it in write mode so that Block Manager
/// callbacks observe a consistent membership view. It is always acquired
/// before the heartbeat-statistics and registry locks, never after.
pub trait Namesystem: Send + Sync {
    fn fs_lock(&self) -> &RwLock<()>;

    /// In safe mode heartbeats return no work at all.
    fn is_in_safe_mode(&self) -> bool;

    /// Whether replication queues are being populated; gates the
    /// mis-replication scan on the first multi-rack transition.
    fn is_populating_repl_queues(&self) -> bool;

    /// Re-evaluate safe-mode thresholds after membership shrank.
    fn check_safe_mode(&self);
}

/// An in-memory [`Namesystem`] for tests and single-process use.
#[derive(Default)]
pub struct MockNamesystem {
    lock: RwLock<()>,
    pub safe_mode: AtomicBool,
    pub populating_repl_queues: AtomicBool,
    pub safe_mode_checks: AtomicUsize,
}

impl MockNamesystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn set_safe_mode(&self, on: bool) {
        self.safe_mode.store(on, Ordering::Release);
    }

    pub fn set_populating_repl_queues(&self, on: bool) {
        self.populating_repl_queues.store(on, Ordering::Release);
    }
}

impl Namesystem for MockNamesystem {
    fn fs_lock(&self) -> &RwLock<()> {
        &self.lock
    }

    fn is_in_safe_mode(&self) -> bool {
        self.safe_mode.load(Ordering::Acquire)
    }

    fn is_populating_repl_queues(&self) -> bool {
        self.populating_repl_queues.load(Ordering::Acquire)
    }

    fn check_safe_mode(&self) {
        self.safe_mode_checks.fetch_add(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_defaults() {
        let ns = MockNamesystem::new();
        assert!(!ns.is_in_safe_mode());
        assert!(!ns.is_populating_repl_queues());
        assert_eq!(ns.safe_mode_checks.load(Ordering::Acquire), 0);
    }

    #[test]
    fn test_mock_flags() {
        let ns = MockNamesystem::new();
        ns.set_safe_mode(true);
        ns.set_populating_repl_queues(true);
        assert!(ns.is_in_safe_mode());
        assert!(ns.is_populating_repl_queues());

        ns.check_safe_mode();
        assert_eq!(ns.safe_mode_checks.load(Ordering::Acquire), 1);
    }

    #[test]
    fn test_fs_lock_guards() {
        let ns = MockNamesystem::new();
        {
            let _w = ns.fs_lock().write();
            assert!(ns.fs_lock().is_locked());
        }
        let _r1 = ns.fs_lock().read();
        let _r2 = ns.fs_lock().read();
    }
}

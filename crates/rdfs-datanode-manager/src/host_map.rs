use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::descriptor::DatanodeDescriptor;

/// Secondary index from IP address to the descriptors living on that host.
///
/// Kept in lockstep with the primary registry map: a descriptor is present
/// here exactly while its storage id is registered.
#[derive(Default)]
pub struct Host2NodesMap {
    map: RwLock<HashMap<String, Vec<Arc<DatanodeDescriptor>>>>,
}

impl Host2NodesMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, node: Arc<DatanodeDescriptor>) {
        let ip = node.ip_addr();
        let mut map = self.map.write();
        let nodes = map.entry(ip).or_default();
        if !nodes.iter().any(|n| Arc::ptr_eq(n, &node)) {
            nodes.push(node);
        }
    }

    /// Remove a descriptor, matched by identity. Returns whether it was
    /// present.
    pub fn remove(&self, node: &Arc<DatanodeDescriptor>) -> bool {
        let ip = node.ip_addr();
        let mut map = self.map.write();
        let Some(nodes) = map.get_mut(&ip) else {
            return false;
        };
        let before = nodes.len();
        nodes.retain(|n| !Arc::ptr_eq(n, node));
        let removed = nodes.len() != before;
        if nodes.is_empty() {
            map.remove(&ip);
        }
        removed
    }

    /// Any one descriptor on the host, when several share it.
    pub fn get_by_host(&self, ip: &str) -> Option<Arc<DatanodeDescriptor>> {
        self.map.read().get(ip).and_then(|nodes| nodes.first().cloned())
    }

    /// The unique descriptor bound to `(ip, xfer_port)`, if any.
    pub fn get_by_xfer_addr(&self, ip: &str, xfer_port: u16) -> Option<Arc<DatanodeDescriptor>> {
        self.map
            .read()
            .get(ip)?
            .iter()
            .find(|n| n.xfer_port() == xfer_port)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.map.read().values().map(|v| v.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdfs_proto::DatanodeId;
    use rdfs_types::StorageId;

    fn descriptor(storage: &str, ip: &str, port: u16) -> Arc<DatanodeDescriptor> {
        Arc::new(DatanodeDescriptor::new(
            DatanodeId {
                storage_id: StorageId::new(storage),
                ip_addr: ip.to_string(),
                host_name: ip.to_string(),
                peer_host_name: String::new(),
                xfer_port: port,
                info_port: 0,
                info_secure_port: 0,
                ipc_port: 0,
            },
            "/default-rack",
        ))
    }

    #[test]
    fn test_add_and_lookup() {
        let index = Host2NodesMap::new();
        let a = descriptor("DS-1", "10.0.0.1", 50010);
        let b = descriptor("DS-2", "10.0.0.1", 50011);
        index.add(a.clone());
        index.add(b.clone());
        assert_eq!(index.len(), 2);

        let by_host = index.get_by_host("10.0.0.1").unwrap();
        assert!(Arc::ptr_eq(&by_host, &a) || Arc::ptr_eq(&by_host, &b));

        let exact = index.get_by_xfer_addr("10.0.0.1", 50011).unwrap();
        assert!(Arc::ptr_eq(&exact, &b));
        assert!(index.get_by_xfer_addr("10.0.0.1", 50012).is_none());
        assert!(index.get_by_xfer_addr("10.0.0.2", 50010).is_none());
    }

    #[test]
    fn test_add_is_idempotent() {
        let index = Host2NodesMap::new();
        let a = descriptor("DS-1", "10.0.0.1", 50010);
        index.add(a.clone());
        index.add(a);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_remove() {
        let index = Host2NodesMap::new();
        let a = descriptor("DS-1", "10.0.0.1", 50010);
        index.add(a.clone());
        assert!(index.remove(&a));
        assert!(!index.remove(&a));
        assert!(index.get_by_host("10.0.0.1").is_none());
        assert!(index.is_empty());
    }

    #[test]
    fn test_remove_matches_identity_not_address() {
        let index = Host2NodesMap::new();
        let a = descriptor("DS-1", "10.0.0.1", 50010);
        let twin = descriptor("DS-1", "10.0.0.1", 50010);
        index.add(a);
        // A distinct descriptor with the same address is not "the" entry.
        assert!(!index.remove(&twin));
        assert_eq!(index.len(), 1);
    }
}

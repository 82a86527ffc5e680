use std::collections::HashMap;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::debug;

use crate::topology::DEFAULT_RACK;

/// Maps host names or IP addresses to rack paths.
///
/// Resolution may shell out to an operator script or an external service,
/// so callers must treat it as potentially slow and keep it off the
/// heartbeat fast path.
pub trait DnsToSwitchMapping: Send + Sync {
    /// Resolve each name to a rack path, in order. `None` signals that the
    /// resolver itself failed; callers fall back to [`DEFAULT_RACK`].
    fn resolve(&self, names: &[String]) -> Option<Vec<String>>;

    /// Drop any cached entries for the given names so the next resolve
    /// starts fresh. Non-caching resolvers ignore this.
    fn reload_cached_mappings(&self, _names: &[String]) {}

    /// Whether this resolver caches. Caching resolvers are keyed by IP
    /// address and are pre-warmed with the include list at startup.
    fn is_cached(&self) -> bool {
        false
    }
}

/// A fixed name-to-rack table with a default for unknown names.
///
/// The table can be extended at runtime, which also makes this the
/// resolver of choice in tests.
pub struct StaticMapping {
    table: RwLock<HashMap<String, String>>,
    default_rack: String,
}

impl StaticMapping {
    pub fn new() -> Self {
        Self::with_default(DEFAULT_RACK)
    }

    pub fn with_default(default_rack: impl Into<String>) -> Self {
        Self {
            table: RwLock::new(HashMap::new()),
            default_rack: default_rack.into(),
        }
    }

    pub fn assign(&self, name: impl Into<String>, rack: impl Into<String>) {
        self.table.write().insert(name.into(), rack.into());
    }
}

impl Default for StaticMapping {
    fn default() -> Self {
        Self::new()
    }
}

impl DnsToSwitchMapping for StaticMapping {
    fn resolve(&self, names: &[String]) -> Option<Vec<String>> {
        let table = self.table.read();
        Some(
            names
                .iter()
                .map(|n| table.get(n).cloned().unwrap_or_else(|| self.default_rack.clone()))
                .collect(),
        )
    }
}

/// Caches successful resolutions of an inner resolver, keyed by name.
pub struct CachedMapping<M> {
    inner: M,
    cache: DashMap<String, String>,
}

impl<M: DnsToSwitchMapping> CachedMapping<M> {
    pub fn new(inner: M) -> Self {
        Self {
            inner,
            cache: DashMap::new(),
        }
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }
}

impl<M: DnsToSwitchMapping> DnsToSwitchMapping for CachedMapping<M> {
    fn resolve(&self, names: &[String]) -> Option<Vec<String>> {
        let misses: Vec<String> = names
            .iter()
            .filter(|n| !self.cache.contains_key(*n))
            .cloned()
            .collect();

        if !misses.is_empty() {
            let resolved = self.inner.resolve(&misses)?;
            for (name, rack) in misses.iter().zip(resolved) {
                self.cache.insert(name.clone(), rack);
            }
        }

        names
            .iter()
            .map(|n| self.cache.get(n).map(|r| r.value().clone()))
            .collect()
    }

    fn reload_cached_mappings(&self, names: &[String]) {
        for name in names {
            if self.cache.remove(name).is_some() {
                debug!(name = %name, "evicted cached rack mapping");
            }
        }
    }

    fn is_cached(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_static_mapping_with_default() {
        let mapping = StaticMapping::new();
        mapping.assign("10.0.0.1", "/d1/r1");
        let racks = mapping.resolve(&names(&["10.0.0.1", "10.0.0.9"])).unwrap();
        assert_eq!(racks, vec!["/d1/r1".to_string(), DEFAULT_RACK.to_string()]);
    }

    #[test]
    fn test_cached_mapping_hits_and_eviction() {
        let inner = StaticMapping::new();
        inner.assign("10.0.0.1", "/d1/r1");
        let cached = CachedMapping::new(inner);
        assert!(!StaticMapping::new().is_cached());
        assert!(cached.is_cached());

        let racks = cached.resolve(&names(&["10.0.0.1"])).unwrap();
        assert_eq!(racks, vec!["/d1/r1".to_string()]);
        assert_eq!(cached.cached_len(), 1);

        // A stale cache entry survives an inner-table change...
        cached.inner.assign("10.0.0.1", "/d1/r9");
        let racks = cached.resolve(&names(&["10.0.0.1"])).unwrap();
        assert_eq!(racks, vec!["/d1/r1".to_string()]);

        // ...until it is explicitly reloaded.
        cached.reload_cached_mappings(&names(&["10.0.0.1"]));
        let racks = cached.resolve(&names(&["10.0.0.1"])).unwrap();
        assert_eq!(racks, vec!["/d1/r9".to_string()]);
    }

    struct FailingMapping;

    impl DnsToSwitchMapping for FailingMapping {
        fn resolve(&self, _names: &[String]) -> Option<Vec<String>> {
            None
        }
    }

    #[test]
    fn test_cached_mapping_propagates_failure() {
        let cached = CachedMapping::new(FailingMapping);
        assert!(cached.resolve(&names(&["h1"])).is_none());
        assert_eq!(cached.cached_len(), 0);
    }
}

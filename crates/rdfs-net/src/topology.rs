use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use rand::seq::SliceRandom;
use tracing::{debug, info};

/// Rack assigned to nodes whose location could not be resolved.
pub const DEFAULT_RACK: &str = "/default-rack";

/// Scope naming the whole cluster in [`NetworkTopology::choose_random`].
pub const ROOT: &str = "";

/// A member of the topology tree.
///
/// `name` must be unique across the cluster (for storage nodes, the
/// transfer address); `network_location` is the rack path the node hangs
/// under.
pub trait Node: Send + Sync {
    fn name(&self) -> String;
    fn network_location(&self) -> String;
}

/// A plain (name, location) pair.
///
/// Used for readers that are not registered storage nodes, e.g. a client
/// host that was resolved to a rack only for sorting block locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeBase {
    name: String,
    location: String,
}

impl NodeBase {
    pub fn new(name: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            location: normalize(&location.into()),
        }
    }
}

impl Node for NodeBase {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn network_location(&self) -> String {
        self.location.clone()
    }
}

/// The requested rack path conflicts with the existing tree structure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid topology: {0}")]
pub struct InvalidTopologyError(pub String);

/// Normalize a rack path: leading separator, no trailing separator.
pub fn normalize(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

struct Tree<N> {
    /// Rack path -> nodes in that rack, insertion ordered.
    racks: BTreeMap<String, Vec<Arc<N>>>,
    /// Node name -> rack path, for O(1) membership and removal.
    leaves: HashMap<String, String>,
}

/// The cluster tree of rack paths and storage nodes.
///
/// All operations take a short internal lock; the structure is shared
/// freely between the registration path, the heartbeat path, and readers.
pub struct NetworkTopology<N: Node> {
    tree: RwLock<Tree<N>>,
}

impl<N: Node> Default for NetworkTopology<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: Node> NetworkTopology<N> {
    pub fn new() -> Self {
        Self {
            tree: RwLock::new(Tree {
                racks: BTreeMap::new(),
                leaves: HashMap::new(),
            }),
        }
    }

    /// Attach a node under its rack path.
    ///
    /// Fails when the rack path nests under (or above) an existing rack,
    /// which would make one rack both a leaf holder and an inner node. A
    /// node already present under the same name is re-attached.
    pub fn add(&self, node: Arc<N>) -> Result<(), InvalidTopologyError> {
        let name = node.name();
        let rack = normalize(&node.network_location());

        let mut tree = self.tree.write();
        for existing in tree.racks.keys() {
            if existing != &rack
                && (existing.starts_with(&format!("{}/", rack))
                    || rack.starts_with(&format!("{}/", existing)))
            {
                return Err(InvalidTopologyError(format!(
                    "rack {} conflicts with existing rack {}",
                    rack, existing
                )));
            }
        }

        if let Some(old_rack) = tree.leaves.remove(&name) {
            detach(&mut tree, &old_rack, &name);
        }

        tree.racks.entry(rack.clone()).or_default().push(node);
        tree.leaves.insert(name.clone(), rack.clone());
        info!(node = %name, rack = %rack, "added node to topology");
        Ok(())
    }

    /// Detach a node, by name. Unknown nodes are ignored.
    pub fn remove(&self, node: &N) {
        let name = node.name();
        let mut tree = self.tree.write();
        if let Some(rack) = tree.leaves.remove(&name) {
            detach(&mut tree, &rack, &name);
            debug!(node = %name, rack = %rack, "removed node from topology");
        }
    }

    pub fn contains(&self, node: &N) -> bool {
        self.tree.read().leaves.contains_key(&node.name())
    }

    pub fn num_leaves(&self) -> usize {
        self.tree.read().leaves.len()
    }

    pub fn num_racks(&self) -> usize {
        self.tree.read().racks.len()
    }

    /// The nodes currently attached under `rack`, or `None` for an unknown
    /// rack path.
    pub fn nodes_in_rack(&self, rack: &str) -> Option<Vec<Arc<N>>> {
        self.tree.read().racks.get(&normalize(rack)).cloned()
    }

    /// A uniformly random node within `scope`: a rack path, or
    /// [`ROOT`]/`"/"` for the whole cluster.
    pub fn choose_random(&self, scope: &str) -> Option<Arc<N>> {
        let tree = self.tree.read();
        let mut rng = rand::thread_rng();
        if scope.is_empty() || scope == "/" {
            let total = tree.leaves.len();
            if total == 0 {
                return None;
            }
            let pick = rand::Rng::gen_range(&mut rng, 0..total);
            let mut seen = 0;
            for nodes in tree.racks.values() {
                if pick < seen + nodes.len() {
                    return Some(Arc::clone(&nodes[pick - seen]));
                }
                seen += nodes.len();
            }
            None
        } else {
            tree.racks
                .get(&normalize(scope))
                .and_then(|nodes| nodes.choose(&mut rng).cloned())
        }
    }

    /// Stably reorder `nodes` so topologically closer entries come first:
    /// the reader itself, then reader-rack-local nodes, then the rest.
    /// Entries within a tier keep their relative order; no total order is
    /// imposed.
    pub fn pseudo_sort_by_distance(&self, reader: Option<&dyn Node>, nodes: &mut [Arc<N>]) {
        let Some(reader) = reader else {
            return;
        };
        let reader_name = reader.name();
        let reader_rack = normalize(&reader.network_location());
        nodes.sort_by_key(|n| {
            if n.name() == reader_name {
                0u8
            } else if normalize(&n.network_location()) == reader_rack {
                1
            } else {
                2
            }
        });
    }
}

fn detach<N>(tree: &mut Tree<N>, rack: &str, name: &str)
where
    N: Node,
{
    if let Some(nodes) = tree.racks.get_mut(rack) {
        nodes.retain(|n| n.name() != name);
        if nodes.is_empty() {
            tree.racks.remove(rack);
        }
    }
}

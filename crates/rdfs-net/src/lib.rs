//! Cluster network topology and rack resolution.
//!
//! The coordinator places every storage node at a rack path such as
//! `/dc1/rack7` and uses the resulting tree to rank replica locations by
//! distance from a reader. Rack paths come from a pluggable
//! [`DnsToSwitchMapping`] resolver.

pub mod dns;
pub mod topology;

pub use dns::{CachedMapping, DnsToSwitchMapping, StaticMapping};
pub use topology::{InvalidTopologyError, NetworkTopology, Node, NodeBase, DEFAULT_RACK};

//! Wire-facing types of the datanode protocol.
//!
//! These are the structures exchanged between storage nodes and the
//! coordinator: identity and registration records, block descriptions, the
//! per-heartbeat command set, and the request/response pairs of the
//! datanode management service. Transport encoding is left to the RPC
//! layer; everything here is plain serde data.

pub mod datanode;

pub use datanode::*;

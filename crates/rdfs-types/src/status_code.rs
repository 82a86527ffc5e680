/// Raw status code carried by [`crate::Status`].
pub type Code = u16;

/// Common status codes (0-999).
pub mod StatusCode {
    use super::Code;

    pub const OK: Code = 0;
    pub const NOT_IMPLEMENTED: Code = 1;
    pub const INVALID_ARG: Code = 3;
    pub const INVALID_CONFIG: Code = 4;
    pub const INTERRUPTED: Code = 27;
    pub const IO_ERROR: Code = 69;
    pub const UNKNOWN: Code = 999;
}

/// Datanode management codes (4xxx).
pub mod NodeCode {
    use super::Code;

    /// Registration or heartbeat refused by the include/exclude policy.
    pub const DISALLOWED: Code = 4000;
    /// The presented storage id is known, but the transfer address diverged.
    pub const UNREGISTERED: Code = 4001;
    /// The resolved rack path conflicts with existing topology structure.
    pub const INVALID_TOPOLOGY: Code = 4002;
    pub const NOT_FOUND: Code = 4003;
}

/// Human-readable name of a status code, for log and error rendering.
pub fn to_string(code: Code) -> &'static str {
    match code {
        StatusCode::OK => "OK",
        StatusCode::NOT_IMPLEMENTED => "NotImplemented",
        StatusCode::INVALID_ARG => "InvalidArg",
        StatusCode::INVALID_CONFIG => "InvalidConfig",
        StatusCode::INTERRUPTED => "Interrupted",
        StatusCode::IO_ERROR => "IoError",
        StatusCode::UNKNOWN => "Unknown",
        NodeCode::DISALLOWED => "Node::Disallowed",
        NodeCode::UNREGISTERED => "Node::Unregistered",
        NodeCode::INVALID_TOPOLOGY => "Node::InvalidTopology",
        NodeCode::NOT_FOUND => "Node::NotFound",
        _ => "Unrecognized",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_string_known() {
        assert_eq!(to_string(StatusCode::OK), "OK");
        assert_eq!(to_string(NodeCode::DISALLOWED), "Node::Disallowed");
        assert_eq!(to_string(NodeCode::UNREGISTERED), "Node::Unregistered");
    }

    #[test]
    fn test_to_string_unknown() {
        assert_eq!(to_string(54321), "Unrecognized");
    }
}

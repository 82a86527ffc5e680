use std::fmt;

use crate::status_code::{self, Code, StatusCode};

/// A status value carrying a numeric code and an optional message.
///
/// `#[must_use]` so error statuses cannot be silently dropped.
#[derive(Debug, Clone)]
#[must_use]
pub struct Status {
    code: Code,
    message: Option<String>,
}

impl Status {
    /// Create a status with just a code.
    pub fn new(code: Code) -> Self {
        Self {
            code,
            message: None,
        }
    }

    /// Create a status with a code and a descriptive message.
    pub fn with_message(code: Code, msg: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(msg.into()),
        }
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Whether this status represents success (code == OK).
    pub fn is_ok(&self) -> bool {
        self.code == StatusCode::OK
    }

    /// Render as `"Node::Disallowed(4000) not in the include list"`.
    pub fn describe(&self) -> String {
        let name = status_code::to_string(self.code);
        match &self.message {
            Some(msg) => format!("{}({}) {}", name, self.code, msg),
            None => format!("{}({})", name, self.code),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

impl std::error::Error for Status {}

impl From<Code> for Status {
    fn from(code: Code) -> Self {
        Self::new(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status_code::NodeCode;

    #[test]
    fn test_status_ok() {
        let s = Status::new(StatusCode::OK);
        assert!(s.is_ok());
        assert_eq!(s.code(), 0);
        assert!(s.message().is_none());
        assert_eq!(s.describe(), "OK(0)");
    }

    #[test]
    fn test_status_with_message() {
        let s = Status::with_message(NodeCode::DISALLOWED, "not in the include list");
        assert!(!s.is_ok());
        assert_eq!(s.code(), 4000);
        assert_eq!(
            s.describe(),
            "Node::Disallowed(4000) not in the include list"
        );
    }

    #[test]
    fn test_status_display_and_error() {
        let s = Status::new(NodeCode::UNREGISTERED);
        assert_eq!(format!("{}", s), "Node::Unregistered(4001)");
        let e: &dyn std::error::Error = &s;
        assert!(e.to_string().contains("Unregistered"));
    }

    #[test]
    fn test_status_from_code() {
        let s: Status = StatusCode::INVALID_ARG.into();
        assert_eq!(s.code(), 3);
    }
}

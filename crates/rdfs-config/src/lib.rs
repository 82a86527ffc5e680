//! Configuration support: a [`Config`] trait for TOML-backed config types
//! and a [`ConfigManager`] providing lock-free snapshots with hot update.

mod manager;

pub use manager::ConfigManager;

/// Errors produced while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("toml parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("field `{field}`: expected {expected}")]
    TypeMismatch { field: String, expected: String },

    #[error("field `{field}` = {value} is out of range")]
    OutOfRange {
        field: String,
        value: String,
        min: Option<String>,
        max: Option<String>,
    },

    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: String, reason: String },
}

/// A configuration type that can be built from TOML, validated, rendered
/// back, and partially refreshed at runtime.
pub trait Config: Sized + Send + Sync + 'static {
    /// Build a config from a parsed TOML document. Absent keys take their
    /// defaults; present keys of the wrong type are an error.
    fn from_toml(value: &toml::Value) -> Result<Self, ConfigError>;

    /// Check cross-field constraints. Called after every load and update.
    fn validate(&self) -> Result<(), ConfigError> {
        Ok(())
    }

    /// Copy the hot-updatable fields of `other` into `self`, leaving
    /// restart-only fields untouched.
    fn hot_update(&mut self, other: &Self);

    /// Render the effective configuration as TOML text.
    fn render(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let e = ConfigError::TypeMismatch {
            field: "port".into(),
            expected: "integer".into(),
        };
        assert_eq!(e.to_string(), "field `port`: expected integer");

        let e = ConfigError::OutOfRange {
            field: "ratio".into(),
            value: "1.5".into(),
            min: Some("0".into()),
            max: Some("1".into()),
        };
        assert!(e.to_string().contains("ratio"));
    }
}

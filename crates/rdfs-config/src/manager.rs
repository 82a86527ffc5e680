use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::{Config, ConfigError};

/// Holds the active configuration and supports reload with hot update.
///
/// Readers take cheap lock-free snapshots via [`ConfigManager::get`];
/// writers swap in a whole new value.
pub struct ConfigManager<T: Config> {
    current: ArcSwap<T>,
    path: Option<PathBuf>,
}

impl<T: Config> ConfigManager<T> {
    /// Wrap an already-constructed configuration (no backing file).
    pub fn new(config: T) -> Self {
        Self {
            current: ArcSwap::from_pointee(config),
            path: None,
        }
    }

    /// Load and validate a configuration from a TOML file, remembering the
    /// path for later [`ConfigManager::reload`] calls.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config = read_config::<T>(path)?;
        Ok(Self {
            current: ArcSwap::from_pointee(config),
            path: Some(path.to_path_buf()),
        })
    }

    /// A lock-free snapshot of the active configuration.
    pub fn get(&self) -> arc_swap::Guard<Arc<T>> {
        self.current.load()
    }

    /// Validate and install a new configuration.
    pub fn update(&self, new_config: T) -> Result<(), ConfigError> {
        new_config.validate()?;
        self.current.store(Arc::new(new_config));
        Ok(())
    }
}

impl<T: Config + Clone> ConfigManager<T> {
    /// Re-read the backing file and apply only the hot-updatable fields to
    /// the active configuration. A manager without a backing file is a
    /// no-op.
    pub fn reload(&self) -> Result<(), ConfigError> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        let fresh = read_config::<T>(path)?;

        let mut merged = (*self.current.load_full()).clone();
        merged.hot_update(&fresh);
        merged.validate()?;
        self.current.store(Arc::new(merged));

        tracing::info!(path = %path.display(), "configuration reloaded");
        Ok(())
    }

    /// An owned copy of the active configuration.
    pub fn snapshot(&self) -> T {
        (*self.current.load_full()).clone()
    }
}

fn read_config<T: Config>(path: &Path) -> Result<T, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let value: toml::Value = content.parse()?;
    let config = T::from_toml(&value)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct TestConfig {
        threads: i64,
        name: String,
    }

    impl Default for TestConfig {
        fn default() -> Self {
            Self {
                threads: 4,
                name: "default".to_string(),
            }
        }
    }

    impl Config for TestConfig {
        fn from_toml(value: &toml::Value) -> Result<Self, ConfigError> {
            let mut cfg = Self::default();
            if let Some(v) = value.get("threads") {
                cfg.threads = v.as_integer().ok_or_else(|| ConfigError::TypeMismatch {
                    field: "threads".into(),
                    expected: "integer".into(),
                })?;
            }
            if let Some(v) = value.get("name") {
                cfg.name = v
                    .as_str()
                    .ok_or_else(|| ConfigError::TypeMismatch {
                        field: "name".into(),
                        expected: "string".into(),
                    })?
                    .to_string();
            }
            Ok(cfg)
        }

        fn validate(&self) -> Result<(), ConfigError> {
            if self.threads < 1 {
                return Err(ConfigError::OutOfRange {
                    field: "threads".into(),
                    value: self.threads.to_string(),
                    min: Some("1".into()),
                    max: None,
                });
            }
            Ok(())
        }

        fn hot_update(&mut self, other: &Self) {
            // Only threads is hot-updatable.
            self.threads = other.threads;
        }

        fn render(&self) -> String {
            format!("threads = {}\nname = \"{}\"", self.threads, self.name)
        }
    }

    #[test]
    fn test_new_and_get() {
        let mgr = ConfigManager::new(TestConfig::default());
        assert_eq!(mgr.get().threads, 4);
        assert!(mgr.path.is_none());
    }

    #[test]
    fn test_update_validates() {
        let mgr = ConfigManager::new(TestConfig::default());
        let bad = TestConfig {
            threads: 0,
            name: "x".into(),
        };
        assert!(mgr.update(bad).is_err());
        assert_eq!(mgr.get().threads, 4);

        let good = TestConfig {
            threads: 8,
            name: "x".into(),
        };
        mgr.update(good.clone()).unwrap();
        assert_eq!(mgr.snapshot(), good);
    }

    #[test]
    fn test_load_and_reload() {
        let dir = std::env::temp_dir().join(format!("rdfs-config-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join("test.toml");
        std::fs::write(&file, "threads = 2\nname = \"a\"").unwrap();

        let mgr: ConfigManager<TestConfig> = ConfigManager::load(&file).unwrap();
        assert_eq!(mgr.get().threads, 2);
        assert_eq!(mgr.get().name, "a");

        // name is not hot-updatable and must keep its old value on reload.
        std::fs::write(&file, "threads = 6\nname = \"b\"").unwrap();
        mgr.reload().unwrap();
        assert_eq!(mgr.get().threads, 6);
        assert_eq!(mgr.get().name, "a");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_reload_without_path_is_noop() {
        let mgr = ConfigManager::new(TestConfig::default());
        mgr.reload().unwrap();
        assert_eq!(mgr.get().threads, 4);
    }
}

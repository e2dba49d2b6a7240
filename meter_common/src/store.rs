//! Persistent configuration store.
//!
//! The snapshot lives in a single TOML file. At boot the store is read
//! once; if the file is absent, unreadable, or fails validation, the
//! defaults are written back and used; the meter must always come up.
//!
//! Writes go through a temp-file rename so a power loss mid-write never
//! leaves a truncated store behind.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config::Config;
use crate::error::ConfigError;

/// Handle to the on-disk configuration file.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored snapshot, falling back to (and persisting) the
    /// defaults when the blob is absent or unusable.
    pub fn load_or_default(&self) -> Config {
        match self.try_load() {
            Ok(config) => config,
            Err(e) => {
                warn!("config store unusable ({e}); writing defaults");
                let defaults = Config::default();
                if let Err(e) = self.save(&defaults) {
                    warn!("failed to persist default config: {e}");
                }
                defaults
            }
        }
    }

    /// Strict load: parse and validate, no fallback.
    pub fn try_load(&self) -> Result<Config, ConfigError> {
        let text = fs::read_to_string(&self.path)
            .map_err(|e| ConfigError::Io(format!("{}: {e}", self.path.display())))?;
        let config: Config =
            toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Persist a snapshot atomically (write temp, then rename).
    pub fn save(&self, config: &Config) -> Result<(), ConfigError> {
        let text =
            toml::to_string_pretty(config).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let tmp = self.path.with_extension("toml.tmp");
        fs::write(&tmp, text)
            .map_err(|e| ConfigError::Io(format!("{}: {e}", tmp.display())))?;
        fs::rename(&tmp, &self.path)
            .map_err(|e| ConfigError::Io(format!("{}: {e}", self.path.display())))?;
        info!("config persisted to {}", self.path.display());
        Ok(())
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn absent_file_yields_defaults_and_writes_them() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("meter.toml"));
        let config = store.load_or_default();
        assert_eq!(config, Config::default());
        // The defaults were persisted for the next boot.
        assert_eq!(store.try_load().unwrap(), Config::default());
    }

    #[test]
    fn corrupt_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("meter.toml");
        fs::write(&path, "not = [valid").unwrap();
        let store = ConfigStore::new(&path);
        assert_eq!(store.load_or_default(), Config::default());
    }

    #[test]
    fn invalid_values_yield_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("meter.toml");
        fs::write(&path, "sleep_timeout_s = 5\n").unwrap();
        let store = ConfigStore::new(&path);
        assert_eq!(store.load_or_default(), Config::default());
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("meter.toml"));
        let mut config = Config::default();
        config.left.zero_offset = 9_848_390.0;
        config.right.zero_offset = 6_252_516.0;
        config.sleep_timeout_s = 900;
        store.save(&config).unwrap();
        assert_eq!(store.try_load().unwrap(), config);
    }
}

//! Watch-pattern persistence.
//!
//! Patterns live in a JSON file under the user config directory
//! (override with `VIGIL_PATTERNS`). The supervision core only ever
//! reads the loaded list; editing happens through the CLI subcommands,
//! which rewrite the file and nudge a running daemon via SIGHUP.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use vigil_core::WatchPattern;

/// Environment variable overriding the pattern file location.
pub const PATTERNS_ENV: &str = "VIGIL_PATTERNS";

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while editing the pattern file.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The file or its directory could not be written.
    #[error("failed to write pattern file {path}: {source}")]
    Write {
        /// Pattern file path
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Serialization failed.
    #[error("failed to encode patterns: {0}")]
    Encode(#[from] serde_json::Error),

    /// No stored pattern has the given id.
    #[error("no pattern with id {0}")]
    UnknownPattern(Uuid),
}

// ============================================================================
// Pattern Store
// ============================================================================

/// Loads and edits the watch-pattern file.
#[derive(Debug, Clone)]
pub struct PatternStore {
    path: PathBuf,
}

impl PatternStore {
    /// Creates a store over an explicit file path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Resolves the pattern file location: `VIGIL_PATTERNS` when set,
    /// else `<config dir>/vigil/patterns.json`.
    #[must_use]
    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var(PATTERNS_ENV) {
            return PathBuf::from(path);
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("vigil")
            .join("patterns.json")
    }

    /// The file this store reads and writes.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the stored patterns.
    ///
    /// A missing file yields the defaults; a corrupt file is logged and
    /// also yields the defaults rather than failing the caller.
    #[must_use]
    pub fn load(&self) -> Vec<WatchPattern> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(error) => {
                debug!(
                    path = %self.path.display(),
                    %error,
                    "No pattern file, using defaults"
                );
                return WatchPattern::defaults();
            }
        };

        match serde_json::from_str(&contents) {
            Ok(patterns) => patterns,
            Err(error) => {
                warn!(
                    path = %self.path.display(),
                    %error,
                    "Pattern file is corrupt, using defaults"
                );
                WatchPattern::defaults()
            }
        }
    }

    /// Writes the full pattern list, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Write`] or [`StoreError::Encode`].
    pub fn save(&self, patterns: &[WatchPattern]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| StoreError::Write {
                path: self.path.clone(),
                source,
            })?;
        }

        let contents = serde_json::to_string_pretty(patterns)?;
        fs::write(&self.path, contents).map_err(|source| StoreError::Write {
            path: self.path.clone(),
            source,
        })
    }

    /// Appends a new enabled pattern and returns it.
    pub fn add(&self, pattern: &str) -> Result<WatchPattern, StoreError> {
        let mut patterns = self.load();
        let added = WatchPattern::new(pattern);
        patterns.push(added.clone());
        self.save(&patterns)?;
        Ok(added)
    }

    /// Removes the pattern with the given id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownPattern`] if the id is not stored.
    pub fn remove(&self, id: Uuid) -> Result<(), StoreError> {
        let mut patterns = self.load();
        let before = patterns.len();
        patterns.retain(|p| p.id != id);
        if patterns.len() == before {
            return Err(StoreError::UnknownPattern(id));
        }
        self.save(&patterns)
    }

    /// Flips the enabled flag of one pattern.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownPattern`] if the id is not stored.
    pub fn set_enabled(&self, id: Uuid, enabled: bool) -> Result<(), StoreError> {
        let mut patterns = self.load();
        let Some(pattern) = patterns.iter_mut().find(|p| p.id == id) else {
            return Err(StoreError::UnknownPattern(id));
        };
        pattern.enabled = enabled;
        self.save(&patterns)
    }

    /// Replaces the stored patterns with the defaults.
    pub fn reset(&self) -> Result<Vec<WatchPattern>, StoreError> {
        let defaults = WatchPattern::defaults();
        self.save(&defaults)?;
        Ok(defaults)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> PatternStore {
        PatternStore::new(dir.path().join("patterns.json"))
    }

    #[test]
    fn test_load_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let patterns = store.load();
        assert_eq!(patterns.len(), 2);
        assert_eq!(patterns[0].pattern, "*gulp*watch-client*");
    }

    #[test]
    fn test_load_corrupt_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        fs::write(store.path(), "not json at all").unwrap();

        let patterns = store.load();
        assert_eq!(patterns.len(), 2);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let patterns = vec![WatchPattern::new("*cargo*"), WatchPattern::new("*make*")];
        store.save(&patterns).unwrap();

        assert_eq!(store.load(), patterns);
    }

    #[test]
    fn test_add_appends() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.save(&[]).unwrap();

        let added = store.add("*node*").unwrap();
        let patterns = store.load();
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0], added);
        assert!(added.enabled);
    }

    #[test]
    fn test_remove_unknown_id_errors() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.save(&[]).unwrap();

        let result = store.remove(Uuid::new_v4());
        assert!(matches!(result, Err(StoreError::UnknownPattern(_))));
    }

    #[test]
    fn test_set_enabled() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let pattern = WatchPattern::new("*gulp*");
        let id = pattern.id;
        store.save(std::slice::from_ref(&pattern)).unwrap();

        store.set_enabled(id, false).unwrap();
        assert!(!store.load()[0].enabled);

        store.set_enabled(id, true).unwrap();
        assert!(store.load()[0].enabled);
    }

    #[test]
    fn test_reset_restores_defaults() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.save(&[WatchPattern::new("*custom*")]).unwrap();

        let defaults = store.reset().unwrap();
        assert_eq!(defaults.len(), 2);
        assert_eq!(store.load(), defaults);
    }

    #[test]
    fn test_save_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let store = PatternStore::new(dir.path().join("nested/deeper/patterns.json"));

        store.save(&WatchPattern::defaults()).unwrap();
        assert_eq!(store.load().len(), 2);
    }
}

//! Persistence of the user-defined alias and trigger overlay.
//!
//! The overlay is stored as pretty-printed JSON:
//!
//! ```json
//! {
//!   "aliases": { "hi": "echo hello $1" },
//!   "triggers": { "ping": "pong" }
//! }
//! ```

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use sibyl_framework::Overlay;
use thiserror::Error;
use tracing::debug;

pub const ALIAS_FILE: &str = "aliases.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("alias store I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("alias store {path} is corrupt: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// JSON file holding the registry overlay.
#[derive(Debug, Clone)]
pub struct AliasStore {
    path: PathBuf,
}

impl AliasStore {
    /// A store at `<dir>/aliases.json`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(ALIAS_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Reads the overlay. A missing file is an empty overlay.
    pub async fn load(&self) -> Result<Overlay, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No alias store yet");
                return Ok(Overlay::default());
            }
            Err(e) => return Err(self.io_error(e)),
        };
        serde_json::from_slice(&bytes).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })
    }

    /// Writes the overlay through a temporary file and a rename.
    pub async fn save(&self, overlay: &Overlay) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| self.io_error(e))?;
        }
        let json = serde_json::to_vec_pretty(overlay).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| self.io_error(e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.io_error(e))?;
        debug!(
            path = %self.path.display(),
            aliases = overlay.aliases.len(),
            triggers = overlay.triggers.len(),
            "Alias store saved"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("sibyl-store-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let store = AliasStore::in_dir(scratch_dir("missing"));
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = scratch_dir("save");
        let store = AliasStore::in_dir(&dir);
        let mut overlay = Overlay::default();
        overlay.aliases.insert("hi".into(), "echo hello $1".into());
        overlay.triggers.insert("ping".into(), "pong".into());

        store.save(&overlay).await.unwrap();
        assert_eq!(store.load().await.unwrap(), overlay);
        assert!(!dir.join("aliases.json.tmp").exists());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_corrupt_file() {
        let dir = scratch_dir("corrupt");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(ALIAS_FILE), "{ not json").unwrap();
        let err = AliasStore::in_dir(&dir).load().await.unwrap_err();
        assert!(matches!(err, StoreError::Json { .. }));
        let _ = std::fs::remove_dir_all(dir);
    }
}

//! Settings persistence port and the default JSON-file implementation.
//!
//! The pipeline works with [`NarrationSettings`] directly; storage details
//! (path layout, serialization format) stay behind this trait.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::settings::NarrationSettings;

/// Errors from loading or saving settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsStoreError {
    /// Underlying file I/O failed.
    #[error("settings I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stored settings could not be (de)serialized.
    #[error("settings serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Repository for narration settings persistence.
///
/// Implementations handle serialization internally; missing storage yields
/// default settings rather than an error.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Load settings, falling back to defaults if none are stored.
    async fn load(&self) -> Result<NarrationSettings, SettingsStoreError>;

    /// Save settings.
    async fn save(&self, settings: &NarrationSettings) -> Result<(), SettingsStoreError>;
}

/// File-backed settings store (pretty-printed JSON).
#[derive(Debug, Clone)]
pub struct JsonSettingsStore {
    path: PathBuf,
}

impl JsonSettingsStore {
    /// Create a store persisting to `path`. Parent directories are created
    /// on first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The file this store reads and writes.
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl SettingsStore for JsonSettingsStore {
    async fn load(&self) -> Result<NarrationSettings, SettingsStoreError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "No settings file, using defaults");
                Ok(NarrationSettings::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, settings: &NarrationSettings) -> Result<(), SettingsStoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let raw = serde_json::to_string_pretty(settings)?;
        tokio::fs::write(&self.path, raw).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn load_missing_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSettingsStore::new(dir.path().join("settings.json"));
        let settings = store.load().await.unwrap();
        assert_eq!(settings, NarrationSettings::default());
    }

    #[tokio::test]
    async fn save_and_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSettingsStore::new(dir.path().join("nested/settings.json"));

        let mut settings = NarrationSettings::default();
        settings.enabled = true;
        settings.current_provider = "openai-compatible".to_string();
        settings.set_provider_block(
            "openai-compatible",
            serde_json::json!({ "voice_map": { "Aria": "nova" } }),
        );

        store.save(&settings).await.unwrap();
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, settings);
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        tokio::fs::write(&path, "not json").await.unwrap();

        let store = JsonSettingsStore::new(path);
        assert!(matches!(
            store.load().await,
            Err(SettingsStoreError::Serde(_))
        ));
    }
}

//! Durable album records.
//!
//! Each album persists as a JSON document at
//! `<root>/<album id>/album.json`, next to its downloaded images. The
//! aggregator saves after every update, so a killed process can resume
//! from the last recorded `finished` list.

use std::path::{Path, PathBuf};

use easel_core::album::Album;
use easel_core::error::CoreError;

/// File name of the album record inside the album directory.
pub const ALBUM_FILE: &str = "album.json";

/// File-backed album store rooted at the output directory.
#[derive(Debug, Clone)]
pub struct AlbumStore {
    root: PathBuf,
}

impl AlbumStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding one album's record and images.
    pub fn album_dir(&self, album_id: &str) -> PathBuf {
        self.root.join(album_id)
    }

    /// Load an album record, or `None` when it was never saved.
    pub async fn load(&self, album_id: &str) -> Result<Option<Album>, CoreError> {
        let path = self.album_path(album_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(CoreError::Storage(format!(
                    "couldn't read {}: {e}",
                    path.display()
                )))
            }
        };
        let album = serde_json::from_slice(&bytes)
            .map_err(|e| CoreError::Storage(format!("couldn't parse {}: {e}", path.display())))?;
        Ok(Some(album))
    }

    /// Persist an album record, replacing any previous version
    /// atomically (write to a temp file, then rename).
    pub async fn save(&self, album: &Album) -> Result<(), CoreError> {
        let dir = self.album_dir(&album.id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| CoreError::Storage(format!("couldn't create {}: {e}", dir.display())))?;

        let bytes = serde_json::to_vec_pretty(album)
            .map_err(|e| CoreError::Storage(format!("couldn't encode album: {e}")))?;

        let path = self.album_path(&album.id);
        let tmp = dir.join(format!("{ALBUM_FILE}.tmp"));
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| CoreError::Storage(format!("couldn't write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| CoreError::Storage(format!("couldn't replace {}: {e}", path.display())))?;

        tracing::debug!(album_id = %album.id, path = %path.display(), "Album saved");
        Ok(())
    }

    fn album_path(&self, album_id: &str) -> PathBuf {
        self.album_dir(album_id).join(ALBUM_FILE)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

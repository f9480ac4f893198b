//! The persisted last-sync timestamp.
//!
//! Stored as decimal UNIX seconds in `.synclog` at the vault root and
//! rewritten through a temp file plus rename so readers never observe a
//! partial value. The value never moves backwards.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::{Result, VaultError};

/// Marker file name at the vault root. Excluded from scans.
pub const MARKER_FILE_NAME: &str = ".synclog";

/// Temp file used while rewriting the marker. Excluded from scans.
pub const MARKER_TEMP_NAME: &str = ".synclog.tmp";

/// Handle to a vault's sync marker.
#[derive(Debug, Clone)]
pub struct SyncMarker {
    path: PathBuf,
    temp: PathBuf,
}

impl SyncMarker {
    /// Marker for the vault at `root`.
    pub fn new(root: &Path) -> Self {
        Self {
            path: root.join(MARKER_FILE_NAME),
            temp: root.join(MARKER_TEMP_NAME),
        }
    }

    /// Path of the marker file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current value; 0 if the marker is missing or unreadable as a number.
    pub async fn load(&self) -> Result<u64> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => match content.trim().parse() {
                Ok(ts) => Ok(ts),
                Err(_) => {
                    warn!("ignoring unparseable sync marker {:?}", content.trim());
                    Ok(0)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(VaultError::fs(&self.path, e)),
        }
    }

    /// Advance to `now - 1`, never backwards. Returns the stored value.
    pub async fn advance(&self) -> Result<u64> {
        self.advance_to(now_secs().saturating_sub(1)).await
    }

    /// Advance to `timestamp` unless the stored value is already later.
    pub async fn advance_to(&self, timestamp: u64) -> Result<u64> {
        let current = self.load().await?;
        if timestamp <= current {
            return Ok(current);
        }
        write_synced(&self.temp, timestamp.to_string().as_bytes()).await?;
        tokio::fs::rename(&self.temp, &self.path)
            .await
            .map_err(|e| VaultError::fs(&self.path, e))?;
        Ok(timestamp)
    }
}

/// Replace `path` with `bytes` and flush it to disk before returning.
pub(crate) async fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| VaultError::fs(path, e))?;
    file.write_all(bytes)
        .await
        .map_err(|e| VaultError::fs(path, e))?;
    file.sync_all().await.map_err(|e| VaultError::fs(path, e))
}

/// Current UNIX time in seconds.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_marker_reads_as_zero() {
        let dir = tempfile::tempdir().unwrap();
        let marker = SyncMarker::new(dir.path());
        assert_eq!(marker.load().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn advance_backdates_one_second() {
        let dir = tempfile::tempdir().unwrap();
        let marker = SyncMarker::new(dir.path());
        let before = now_secs();
        let stored = marker.advance().await.unwrap();
        assert!(stored + 1 >= before && stored < now_secs());
        assert_eq!(marker.load().await.unwrap(), stored);

        let raw = std::fs::read_to_string(dir.path().join(MARKER_FILE_NAME)).unwrap();
        assert_eq!(raw, stored.to_string());
        assert!(!dir.path().join(MARKER_TEMP_NAME).exists());
    }

    #[tokio::test]
    async fn never_moves_backwards() {
        let dir = tempfile::tempdir().unwrap();
        let marker = SyncMarker::new(dir.path());
        marker.advance_to(5_000_000_000).await.unwrap();
        assert_eq!(marker.advance().await.unwrap(), 5_000_000_000);
        assert_eq!(marker.advance_to(10).await.unwrap(), 5_000_000_000);
    }

    #[tokio::test]
    async fn stale_temp_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(MARKER_TEMP_NAME), "99999999999999999999").unwrap();
        let marker = SyncMarker::new(dir.path());

        assert_eq!(marker.advance_to(42).await.unwrap(), 42);
        let raw = std::fs::read_to_string(dir.path().join(MARKER_FILE_NAME)).unwrap();
        assert_eq!(raw, "42");
        assert!(!dir.path().join(MARKER_TEMP_NAME).exists());
    }

    #[tokio::test]
    async fn write_synced_truncates_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.md");
        std::fs::write(&path, "a much longer previous body").unwrap();

        write_synced(&path, b"short").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "short");
    }

    #[tokio::test]
    async fn write_synced_reports_path_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("note.md");

        let err = write_synced(&path, b"x").await.unwrap_err();
        assert!(err.to_string().contains("note.md"));
    }

    #[tokio::test]
    async fn garbage_marker_reads_as_zero() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(MARKER_FILE_NAME), "2024-01-01T00:00:00Z").unwrap();
        let marker = SyncMarker::new(dir.path());
        assert_eq!(marker.load().await.unwrap(), 0);
    }
}

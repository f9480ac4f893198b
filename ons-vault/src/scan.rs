//! Vault tree scanning.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use ons_types::FileEntry;
use walkdir::{DirEntry, WalkDir};

use crate::marker::{MARKER_FILE_NAME, MARKER_TEMP_NAME};
use crate::paths::relative;
use crate::{Result, VaultError};

/// Scan the vault at `root` on a blocking thread.
pub async fn scan(root: &Path) -> Result<Vec<FileEntry>> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || scan_blocking(&root))
        .await
        .map_err(|e| VaultError::Scan(e.to_string()))?
}

/// Walk `root` and list every entry except the root and the marker files.
///
/// Entries come back sorted by path. Any unreadable entry fails the whole
/// scan so that a partial listing is never used for reconciliation.
pub fn scan_blocking(root: &Path) -> Result<Vec<FileEntry>> {
    let walker = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_marker(e));

    let mut entries = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|e| VaultError::Scan(e.to_string()))?;
        let Some(path) = relative(root, entry.path()) else {
            continue;
        };
        let meta = entry
            .metadata()
            .map_err(|e| VaultError::Scan(e.to_string()))?;

        let mtime = meta.modified().map(unix_secs).unwrap_or(0);
        let ctime = meta.created().map(unix_secs).unwrap_or(mtime);
        let (name, size) = if meta.is_dir() {
            (String::new(), 0)
        } else {
            (entry.file_name().to_string_lossy().into_owned(), meta.len())
        };

        entries.push(FileEntry {
            path,
            name,
            size,
            mtime,
            ctime,
        });
    }

    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}

fn is_marker(entry: &DirEntry) -> bool {
    entry.depth() == 1
        && (entry.file_name() == MARKER_FILE_NAME || entry.file_name() == MARKER_TEMP_NAME)
}

fn unix_secs(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

//! Mapping of wire paths onto the vault root.

use std::path::{Component, Path, PathBuf};

use crate::marker::{MARKER_FILE_NAME, MARKER_TEMP_NAME};
use crate::{Result, VaultError};

/// Resolve a `/`-separated relative path under `root`.
///
/// `""` and `"."` resolve to the root itself. Absolute paths, `..`
/// components and the marker files are rejected.
pub fn resolve(root: &Path, relative: &str) -> Result<PathBuf> {
    let mut resolved = root.to_path_buf();
    for component in Path::new(relative).components() {
        match component {
            Component::CurDir => {}
            Component::Normal(part) => {
                if part == MARKER_FILE_NAME || part == MARKER_TEMP_NAME {
                    return Err(VaultError::PathNotAllowed(relative.to_string()));
                }
                resolved.push(part);
            }
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(VaultError::PathNotAllowed(relative.to_string()));
            }
        }
    }
    Ok(resolved)
}

/// Validate a bare leaf name (no separators, not `.` or `..`).
pub fn leaf(name: &str) -> Result<&str> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !name.contains('/') && !name.contains('\\') => {
            Ok(name)
        }
        _ => Err(VaultError::PathNotAllowed(name.to_string())),
    }
}

/// `/`-joined path of `path` relative to `root`, or `None` for the root itself.
pub fn relative(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_nested_and_current_dir() {
        let root = Path::new("/vault");
        assert_eq!(resolve(root, "notes/a.md").unwrap(), PathBuf::from("/vault/notes/a.md"));
        assert_eq!(resolve(root, "./a.md").unwrap(), PathBuf::from("/vault/a.md"));
        assert_eq!(resolve(root, ".").unwrap(), PathBuf::from("/vault"));
        assert_eq!(resolve(root, "").unwrap(), PathBuf::from("/vault"));
    }

    #[test]
    fn rejects_escapes_and_marker() {
        let root = Path::new("/vault");
        assert!(resolve(root, "../etc/passwd").is_err());
        assert!(resolve(root, "notes/../../x").is_err());
        assert!(resolve(root, "/etc/passwd").is_err());
        assert!(resolve(root, ".synclog").is_err());
    }

    #[test]
    fn leaf_names() {
        assert_eq!(leaf("new.txt").unwrap(), "new.txt");
        assert!(leaf("a/b").is_err());
        assert!(leaf("..").is_err());
        assert!(leaf("").is_err());
    }

    #[test]
    fn relative_paths_use_forward_slashes() {
        let root = Path::new("/vault");
        assert_eq!(
            relative(root, Path::new("/vault/notes/a.md")).as_deref(),
            Some("notes/a.md")
        );
        assert_eq!(relative(root, Path::new("/vault")), None);
        assert_eq!(relative(root, Path::new("/elsewhere")), None);
    }
}

//! Tree reconciliation.
//!
//! [`reconcile`] compares an authoritative tree against another side's tree
//! and plans the operations that make the other side match. Entries are
//! matched by relative path. Deletes come first, deepest path first, so a
//! type change at one path (file replaced by directory) is applied cleanly;
//! creates follow in path order so parents exist before their children.

use std::collections::HashMap;

use ons_types::FileEntry;

use crate::check::TIMESTAMP_TOLERANCE_SECS;

/// One planned operation against the other side's tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedOp {
    /// Create the entry (empty file or directory).
    Create(FileEntry),
    /// Send the entry's content.
    Update(FileEntry),
    /// Remove the entry.
    Delete(FileEntry),
}

impl PlannedOp {
    /// The entry this operation addresses.
    pub fn entry(&self) -> &FileEntry {
        match self {
            PlannedOp::Create(e) | PlannedOp::Update(e) | PlannedOp::Delete(e) => e,
        }
    }
}

/// Plan the operations that bring `other` in line with `authority`.
///
/// - present in `authority` only: `Create`, then `Update` for files
/// - present in both, sizes differ and mtimes differ by more than the tolerance: `Update`
/// - present in `other` only: `Delete`
pub fn reconcile(authority: &[FileEntry], other: &[FileEntry]) -> Vec<PlannedOp> {
    let ours: HashMap<&str, &FileEntry> = authority.iter().map(|e| (e.path.as_str(), e)).collect();
    let theirs: HashMap<&str, &FileEntry> = other.iter().map(|e| (e.path.as_str(), e)).collect();

    let mut ops = Vec::new();

    let mut stale: Vec<&FileEntry> = other
        .iter()
        .filter(|e| match ours.get(e.path.as_str()) {
            None => true,
            Some(mine) => mine.is_dir() != e.is_dir(),
        })
        .collect();
    stale.sort_by(|a, b| b.path.cmp(&a.path));
    ops.extend(stale.into_iter().cloned().map(PlannedOp::Delete));

    let mut wanted: Vec<&FileEntry> = authority.iter().collect();
    wanted.sort_by(|a, b| a.path.cmp(&b.path));
    for entry in wanted {
        match theirs.get(entry.path.as_str()) {
            Some(theirs) if theirs.is_dir() == entry.is_dir() => {
                if !entry.is_dir() && is_stale(entry, theirs) {
                    ops.push(PlannedOp::Update(entry.clone()));
                }
            }
            _ => {
                ops.push(PlannedOp::Create(entry.clone()));
                if !entry.is_dir() {
                    ops.push(PlannedOp::Update(entry.clone()));
                }
            }
        }
    }

    ops
}

fn is_stale(mine: &FileEntry, theirs: &FileEntry) -> bool {
    mine.size != theirs.size && mine.mtime.abs_diff(theirs.mtime) > TIMESTAMP_TOLERANCE_SECS
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn file(path: &str, size: u64, mtime: u64) -> FileEntry {
        FileEntry {
            path: path.to_string(),
            name: path.rsplit('/').next().unwrap_or_default().to_string(),
            size,
            mtime,
            ctime: 0,
        }
    }

    fn dir(path: &str) -> FileEntry {
        FileEntry {
            path: path.to_string(),
            name: String::new(),
            size: 0,
            mtime: 0,
            ctime: 0,
        }
    }

    /// Apply planned ops to a path -> (is_dir, size) model.
    fn apply(tree: &[FileEntry], ops: &[PlannedOp]) -> BTreeMap<String, (bool, u64)> {
        let mut model: BTreeMap<String, (bool, u64)> = tree
            .iter()
            .map(|e| (e.path.clone(), (e.is_dir(), e.size)))
            .collect();
        for op in ops {
            match op {
                PlannedOp::Delete(e) => {
                    let prefix = format!("{}/", e.path);
                    model.retain(|p, _| p != &e.path && !p.starts_with(&prefix));
                }
                PlannedOp::Create(e) => {
                    model.insert(e.path.clone(), (e.is_dir(), 0));
                }
                PlannedOp::Update(e) => {
                    model.insert(e.path.clone(), (false, e.size));
                }
            }
        }
        model
    }

    fn model(tree: &[FileEntry]) -> BTreeMap<String, (bool, u64)> {
        tree.iter()
            .map(|e| (e.path.clone(), (e.is_dir(), e.size)))
            .collect()
    }

    #[test]
    fn identical_trees_need_nothing() {
        let tree = vec![dir("notes"), file("notes/a.md", 10, 100)];
        assert!(reconcile(&tree, &tree).is_empty());
    }

    #[test]
    fn missing_file_is_created_then_filled() {
        let ours = vec![file("a.md", 5, 100)];
        let ops = reconcile(&ours, &[]);
        assert_eq!(
            ops,
            vec![
                PlannedOp::Create(file("a.md", 5, 100)),
                PlannedOp::Update(file("a.md", 5, 100)),
            ]
        );
    }

    #[test]
    fn missing_directory_is_created_without_content() {
        let ops = reconcile(&[dir("photos")], &[]);
        assert_eq!(ops, vec![PlannedOp::Create(dir("photos"))]);
    }

    #[test]
    fn extra_entries_are_deleted_deepest_first() {
        let theirs = vec![dir("old"), file("old/x.bin", 1, 1), file("old/y.bin", 1, 1)];
        let ops = reconcile(&[], &theirs);
        let paths: Vec<_> = ops.iter().map(|op| op.entry().path.as_str()).collect();
        assert_eq!(paths, vec!["old/y.bin", "old/x.bin", "old"]);
        assert!(ops.iter().all(|op| matches!(op, PlannedOp::Delete(_))));
    }

    #[test]
    fn update_needs_size_and_time_difference() {
        let ours = vec![file("a.md", 10, 200)];

        // size differs, mtime within tolerance
        assert!(reconcile(&ours, &[file("a.md", 9, 198)]).is_empty());
        // mtime differs, same size
        assert!(reconcile(&ours, &[file("a.md", 10, 100)]).is_empty());
        // both differ
        assert_eq!(
            reconcile(&ours, &[file("a.md", 9, 100)]),
            vec![PlannedOp::Update(file("a.md", 10, 200))]
        );
    }

    #[test]
    fn type_change_deletes_then_recreates() {
        let ours = vec![dir("thing")];
        let theirs = vec![file("thing", 3, 1)];
        let ops = reconcile(&ours, &theirs);
        assert_eq!(
            ops,
            vec![
                PlannedOp::Delete(file("thing", 3, 1)),
                PlannedOp::Create(dir("thing")),
            ]
        );
    }

    #[test]
    fn applying_ops_makes_trees_equal() {
        let a = vec![
            dir("notes"),
            file("notes/a.md", 10, 500),
            file("notes/b.md", 20, 500),
            dir("notes/sub"),
            file("notes/sub/c.png", 4000, 500),
            file("root.txt", 1, 500),
        ];
        let b = vec![
            dir("notes"),
            file("notes/a.md", 10, 500),
            file("notes/b.md", 7, 100),
            dir("trash"),
            file("trash/old.md", 3, 100),
            dir("root.txt"),
        ];
        let ops = reconcile(&a, &b);
        assert_eq!(apply(&b, &ops), model(&a));
    }
}

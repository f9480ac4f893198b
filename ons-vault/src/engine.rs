//! The vault sync engine.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ons_core::check::{decide, CheckOutcome};
use ons_core::chunk::encode_chunks;
use ons_core::diff::{reconcile, PlannedOp};
use ons_core::ChunkAssembly;
use ons_types::{ContentKind, FileEntry, FileOp, RenameOp, VaultMessage};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::channel::Channel;
use crate::marker::{write_synced, SyncMarker};
use crate::paths::{leaf, resolve};
use crate::scan::scan;
use crate::{Result, VaultConfig, VaultError};

/// Syncs one vault with one peer.
///
/// Messages are handled one at a time in arrival order. The chunk assembly
/// lock is never held across an await.
pub struct VaultSyncEngine {
    root: PathBuf,
    config: VaultConfig,
    channel: Arc<dyn Channel>,
    marker: SyncMarker,
    assembly: Mutex<ChunkAssembly>,
}

impl VaultSyncEngine {
    /// Create an engine for `config.root`, creating the directory if needed.
    pub async fn new(config: VaultConfig, channel: Arc<dyn Channel>) -> Result<Self> {
        let root = config.root.clone();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| VaultError::fs(&root, e))?;
        Ok(Self {
            marker: SyncMarker::new(&root),
            root,
            config,
            channel,
            assembly: Mutex::new(ChunkAssembly::new()),
        })
    }

    /// Vault root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The vault's sync marker.
    pub fn marker(&self) -> &SyncMarker {
        &self.marker
    }

    /// Number of binary transfers waiting for more chunks.
    pub fn pending_transfers(&self) -> usize {
        self.assembly.lock().map(|a| a.pending_count()).unwrap_or(0)
    }

    /// Process inbound frames until the sender is dropped.
    ///
    /// Errors are logged per frame; they never stop the loop.
    pub async fn run(self: Arc<Self>, mut inbound: mpsc::Receiver<String>) {
        if self.config.initiate_check {
            if let Err(e) = self.send_check().await {
                warn!("initial check failed: {}", e);
            }
        }
        while let Some(frame) = inbound.recv().await {
            if let Err(e) = self.handle_text(&frame).await {
                warn!("vault message dropped: {}", e);
            }
        }
        debug!("vault channel closed for {}", self.root.display());
    }

    /// Decode and handle one text frame.
    pub async fn handle_text(&self, text: &str) -> Result<()> {
        let message = VaultMessage::decode(text)?;
        self.handle(message).await
    }

    /// Handle one message.
    pub async fn handle(&self, message: VaultMessage) -> Result<()> {
        debug!("vault operation: {}", message.operation());
        match message {
            VaultMessage::Check { timestamp } => self.on_check(timestamp).await,
            VaultMessage::Tree { files: None } => self.send_tree().await,
            VaultMessage::Tree { files: Some(files) } => self.on_tree(files).await,
            VaultMessage::Create(op) => self.on_create(op).await,
            VaultMessage::Update(op) => self.on_update(op).await,
            VaultMessage::Delete(op) => self.on_delete(op).await,
            VaultMessage::Rename(op) => self.on_rename(op).await,
        }
    }

    /// Announce our marker to the peer.
    pub async fn send_check(&self) -> Result<()> {
        let timestamp = self.marker.load().await?;
        self.send(&VaultMessage::Check { timestamp }).await
    }

    /// Send a fresh scan of the vault.
    pub async fn send_tree(&self) -> Result<()> {
        let files = scan(&self.root).await?;
        self.send(&VaultMessage::Tree { files: Some(files) }).await
    }

    async fn on_check(&self, remote: u64) -> Result<()> {
        let local = self.marker.load().await?;
        match decide(local, remote) {
            CheckOutcome::InSync => {
                debug!("vault in sync (local {}, remote {})", local, remote);
                Ok(())
            }
            CheckOutcome::RequestTree => self.send(&VaultMessage::Tree { files: None }).await,
            CheckOutcome::SendTree => self.send_tree().await,
        }
    }

    /// We are authoritative: push whatever the peer's tree is missing.
    async fn on_tree(&self, remote: Vec<FileEntry>) -> Result<()> {
        let local = scan(&self.root).await?;
        let ops = reconcile(&local, &remote);
        info!("reconciling vault: {} operations", ops.len());
        for op in ops {
            self.push(op).await?;
        }
        Ok(())
    }

    async fn push(&self, op: PlannedOp) -> Result<()> {
        match op {
            PlannedOp::Delete(entry) => {
                let op = FileOp::for_entry(&entry, self.kind_of(&entry));
                self.send(&VaultMessage::Delete(op)).await
            }
            PlannedOp::Create(entry) => {
                let op = FileOp::for_entry(&entry, self.kind_of(&entry));
                self.send(&VaultMessage::Create(op)).await
            }
            PlannedOp::Update(entry) => self.send_content(&entry).await,
        }
    }

    async fn send_content(&self, entry: &FileEntry) -> Result<()> {
        let kind = self.kind_of(entry);
        if kind == ContentKind::Directory {
            return Ok(());
        }
        let path = resolve(&self.root, &entry.path)?;
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| VaultError::fs(&path, e))?;

        let template = FileOp::for_entry(entry, kind);
        let payloads = match kind {
            ContentKind::Text => vec![STANDARD.encode(&bytes)],
            _ => encode_chunks(&bytes, self.config.chunk_size),
        };
        for data in payloads {
            let op = FileOp {
                data,
                ..template.clone()
            };
            self.send(&VaultMessage::Update(op)).await?;
        }
        Ok(())
    }

    async fn on_create(&self, op: FileOp) -> Result<()> {
        let target = resolve(&self.root, &op.target())?;
        if target == self.root {
            return Err(VaultError::PathNotAllowed(op.target()));
        }
        if op.kind == ContentKind::Directory {
            tokio::fs::create_dir_all(&target)
                .await
                .map_err(|e| VaultError::fs(&target, e))?;
            return self.mutated().await;
        }
        if !op.data.is_empty() {
            return self.write_content(&op, &target).await;
        }
        ensure_parent(&target).await?;
        write_synced(&target, b"").await?;
        self.mutated().await
    }

    async fn on_update(&self, op: FileOp) -> Result<()> {
        let target = resolve(&self.root, &op.target())?;
        if target == self.root {
            return Err(VaultError::PathNotAllowed(op.target()));
        }
        if op.kind == ContentKind::Directory {
            tokio::fs::create_dir_all(&target)
                .await
                .map_err(|e| VaultError::fs(&target, e))?;
            return self.mutated().await;
        }
        self.write_content(&op, &target).await
    }

    async fn write_content(&self, op: &FileOp, target: &Path) -> Result<()> {
        let bytes = match op.kind {
            ContentKind::Binary => {
                let completed = {
                    let mut assembly = self
                        .assembly
                        .lock()
                        .map_err(|_| VaultError::Channel("chunk assembly poisoned".into()))?;
                    assembly.accept(target, &op.data)?
                };
                match completed {
                    Some(bytes) => bytes,
                    None => return Ok(()),
                }
            }
            _ => STANDARD
                .decode(op.data.as_bytes())
                .map_err(|_| VaultError::Encoding(op.target()))?,
        };

        ensure_parent(target).await?;
        write_synced(target, &bytes).await?;
        debug!("wrote {} bytes to {}", bytes.len(), target.display());
        self.mutated().await
    }

    async fn on_delete(&self, op: FileOp) -> Result<()> {
        let target = resolve(&self.root, &op.target())?;
        if target == self.root {
            return Err(VaultError::PathNotAllowed(op.target()));
        }
        let result = match tokio::fs::symlink_metadata(&target).await {
            Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(&target).await,
            Ok(_) => tokio::fs::remove_file(&target).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("delete of missing {} ignored", target.display());
            }
            Err(e) => return Err(VaultError::fs(&target, e)),
        }
        self.mutated().await
    }

    async fn on_rename(&self, op: RenameOp) -> Result<()> {
        let dest_dir = resolve(&self.root, &op.path)?;
        let dest = dest_dir.join(leaf(&op.name)?);
        let source = resolve(&self.root, &op.old_path)?;
        if source == self.root {
            return Err(VaultError::PathNotAllowed(op.old_path));
        }

        tokio::fs::create_dir_all(&dest_dir)
            .await
            .map_err(|e| VaultError::fs(&dest_dir, e))?;
        tokio::fs::rename(&source, &dest)
            .await
            .map_err(|e| VaultError::fs(&source, e))?;
        info!("renamed {} -> {}", source.display(), dest.display());
        self.mutated().await
    }

    async fn mutated(&self) -> Result<()> {
        let ts = self.marker.advance().await?;
        debug!("sync marker at {}", ts);
        Ok(())
    }

    fn kind_of(&self, entry: &FileEntry) -> ContentKind {
        if entry.is_dir() {
            ContentKind::Directory
        } else if self.config.is_text(&entry.name) {
            ContentKind::Text
        } else {
            ContentKind::Binary
        }
    }

    async fn send(&self, message: &VaultMessage) -> Result<()> {
        self.channel.send_text(message.encode()?).await
    }
}

async fn ensure_parent(target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| VaultError::fs(parent, e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryChannel;
    use crate::marker::MARKER_FILE_NAME;
    use std::fs;

    async fn engine(dir: &Path) -> (VaultSyncEngine, MemoryChannel) {
        let channel = MemoryChannel::new();
        let engine = VaultSyncEngine::new(VaultConfig::with_root(dir), Arc::new(channel.clone()))
            .await
            .unwrap();
        (engine, channel)
    }

    fn decode_all(frames: Vec<String>) -> Vec<VaultMessage> {
        frames
            .iter()
            .map(|f| VaultMessage::decode(f).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn rename_moves_file_and_advances_marker() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("old.txt"), "content").unwrap();
        let (engine, _) = engine(dir.path()).await;

        let rename =
            r#"{"type":"text","operate":"rename","path":".","name":"new.txt","data":"old.txt"}"#;
        engine.handle_text(rename).await.unwrap();

        assert!(dir.path().join("new.txt").exists());
        assert!(!dir.path().join("old.txt").exists());
        assert!(engine.marker().load().await.unwrap() > 0);
    }

    #[tokio::test]
    async fn rename_into_new_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.md"), "x").unwrap();
        let (engine, _) = engine(dir.path()).await;

        engine
            .handle(VaultMessage::Rename(RenameOp {
                path: "archive/2024".into(),
                name: "b.md".into(),
                old_path: "a.md".into(),
            }))
            .await
            .unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("archive/2024/b.md")).unwrap(), "x");
    }

    #[tokio::test]
    async fn failed_rename_keeps_marker() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = engine(dir.path()).await;

        let result = engine
            .handle(VaultMessage::Rename(RenameOp {
                path: ".".into(),
                name: "new.txt".into(),
                old_path: "missing.txt".into(),
            }))
            .await;
        assert!(matches!(result, Err(VaultError::Filesystem { .. })));
        assert_eq!(engine.marker().load().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn check_within_tolerance_does_nothing() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(MARKER_FILE_NAME), "1000").unwrap();
        fs::write(dir.path().join("a.md"), "x").unwrap();
        let (engine, channel) = engine(dir.path()).await;

        engine.handle(VaultMessage::Check { timestamp: 1003 }).await.unwrap();
        engine.handle(VaultMessage::Check { timestamp: 997 }).await.unwrap();

        assert!(channel.sent().is_empty());
        assert_eq!(engine.marker().load().await.unwrap(), 1000);
    }

    #[tokio::test]
    async fn newer_local_marker_requests_tree() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(MARKER_FILE_NAME), "2000").unwrap();
        let (engine, channel) = engine(dir.path()).await;

        engine.handle(VaultMessage::Check { timestamp: 1000 }).await.unwrap();
        assert_eq!(
            decode_all(channel.take_sent()),
            vec![VaultMessage::Tree { files: None }]
        );
    }

    #[tokio::test]
    async fn newer_remote_marker_sends_tree() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.md"), "x").unwrap();
        let (engine, channel) = engine(dir.path()).await;

        engine.handle(VaultMessage::Check { timestamp: 5000 }).await.unwrap();
        let sent = decode_all(channel.take_sent());
        match &sent[..] {
            [VaultMessage::Tree { files: Some(files) }] => {
                assert_eq!(files.len(), 1);
                assert_eq!(files[0].path, "a.md");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn tree_request_is_answered_with_scan() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, channel) = engine(dir.path()).await;
        engine.handle(VaultMessage::Tree { files: None }).await.unwrap();
        assert_eq!(
            decode_all(channel.take_sent()),
            vec![VaultMessage::Tree { files: Some(vec![]) }]
        );
    }

    #[tokio::test]
    async fn tree_reconciliation_emits_ops_with_content() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("notes")).unwrap();
        fs::write(dir.path().join("notes/a.md"), "hello").unwrap();
        let (engine, channel) = engine(dir.path()).await;

        let remote = vec![FileEntry {
            path: "stale.bin".into(),
            name: "stale.bin".into(),
            size: 1,
            mtime: 1,
            ctime: 1,
        }];
        engine.handle(VaultMessage::Tree { files: Some(remote) }).await.unwrap();

        let sent = decode_all(channel.take_sent());
        assert_eq!(sent.len(), 4);
        assert!(matches!(&sent[0], VaultMessage::Delete(op) if op.target() == "stale.bin"));
        assert!(matches!(
            &sent[1],
            VaultMessage::Create(op) if op.kind == ContentKind::Directory && op.target() == "notes"
        ));
        assert!(matches!(
            &sent[2],
            VaultMessage::Create(op) if op.target() == "notes/a.md" && op.data.is_empty()
        ));
        match &sent[3] {
            VaultMessage::Update(op) => {
                assert_eq!(op.kind, ContentKind::Text);
                assert_eq!(STANDARD.decode(&op.data).unwrap(), b"hello");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn binary_updates_are_chunked() {
        let dir = tempfile::tempdir().unwrap();
        let content: Vec<u8> = (0..200u8).collect();
        fs::write(dir.path().join("img.png"), &content).unwrap();
        let channel = MemoryChannel::new();
        let config = VaultConfig {
            chunk_size: 64,
            ..VaultConfig::with_root(dir.path())
        };
        let engine = VaultSyncEngine::new(config, Arc::new(channel.clone()))
            .await
            .unwrap();

        engine.handle(VaultMessage::Tree { files: Some(vec![]) }).await.unwrap();
        let sent = decode_all(channel.take_sent());
        // create + ceil(268 / 64) chunks
        assert_eq!(sent.len(), 1 + 5);
        for msg in &sent[1..] {
            assert!(matches!(msg, VaultMessage::Update(op) if op.kind == ContentKind::Binary));
        }
    }

    #[tokio::test]
    async fn text_update_writes_file_and_advances_marker() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = engine(dir.path()).await;

        engine
            .handle(VaultMessage::Update(FileOp {
                kind: ContentKind::Text,
                path: "deep/er".into(),
                name: "n.md".into(),
                data: STANDARD.encode("# title"),
            }))
            .await
            .unwrap();

        assert_eq!(fs::read_to_string(dir.path().join("deep/er/n.md")).unwrap(), "# title");
        assert!(engine.marker().load().await.unwrap() > 0);
    }

    #[tokio::test]
    async fn binary_chunks_out_of_order_write_once_complete() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = engine(dir.path()).await;
        let chunk = |data: &str| {
            VaultMessage::Update(FileOp {
                kind: ContentKind::Binary,
                path: ".".into(),
                name: "x.bin".into(),
                data: data.into(),
            })
        };

        engine.handle(chunk("2:3:Qg==")).await.unwrap();
        engine.handle(chunk("1:3:QQ==")).await.unwrap();
        assert!(!dir.path().join("x.bin").exists());
        assert_eq!(engine.marker().load().await.unwrap(), 0);
        assert_eq!(engine.pending_transfers(), 1);

        engine.handle(chunk("3:3:Qw==")).await.unwrap();
        assert_eq!(fs::read(dir.path().join("x.bin")).unwrap(), b"ABC");
        assert_eq!(engine.pending_transfers(), 0);
        assert!(engine.marker().load().await.unwrap() > 0);
    }

    #[tokio::test]
    async fn malformed_chunk_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = engine(dir.path()).await;
        let result = engine
            .handle(VaultMessage::Update(FileOp {
                kind: ContentKind::Binary,
                path: String::new(),
                name: "x.bin".into(),
                data: "nonsense".into(),
            }))
            .await;
        assert!(matches!(result, Err(VaultError::Chunk(_))));
        assert_eq!(engine.pending_transfers(), 0);
        assert_eq!(engine.marker().load().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_removes_files_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("d/e")).unwrap();
        fs::write(dir.path().join("d/e/f.md"), "x").unwrap();
        fs::write(dir.path().join("g.md"), "x").unwrap();
        let (engine, _) = engine(dir.path()).await;

        engine
            .handle(VaultMessage::Delete(FileOp {
                kind: ContentKind::Directory,
                path: "d".into(),
                name: String::new(),
                data: String::new(),
            }))
            .await
            .unwrap();
        engine
            .handle(VaultMessage::Delete(FileOp {
                kind: ContentKind::Text,
                path: String::new(),
                name: "g.md".into(),
                data: String::new(),
            }))
            .await
            .unwrap();
        assert!(!dir.path().join("d").exists());
        assert!(!dir.path().join("g.md").exists());

        // already gone is fine
        engine
            .handle(VaultMessage::Delete(FileOp {
                kind: ContentKind::Text,
                path: String::new(),
                name: "g.md".into(),
                data: String::new(),
            }))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn escaping_paths_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let vault = dir.path().join("vault");
        let (engine, _) = engine(&vault).await;

        let result = engine
            .handle(VaultMessage::Update(FileOp {
                kind: ContentKind::Text,
                path: "..".into(),
                name: "escape.md".into(),
                data: STANDARD.encode("x"),
            }))
            .await;
        assert!(matches!(result, Err(VaultError::PathNotAllowed(_))));
        assert!(!dir.path().join("escape.md").exists());

        let result = engine
            .handle(VaultMessage::Delete(FileOp {
                kind: ContentKind::Directory,
                path: ".".into(),
                name: String::new(),
                data: String::new(),
            }))
            .await;
        assert!(matches!(result, Err(VaultError::PathNotAllowed(_))));
        assert!(vault.exists());
    }

    #[tokio::test]
    async fn run_processes_frames_in_order_and_survives_errors() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = engine(dir.path()).await;
        let engine = Arc::new(engine);
        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(engine.clone().run(rx));

        tx.send("garbage".into()).await.unwrap();
        let create = VaultMessage::Create(FileOp {
            kind: ContentKind::Directory,
            path: "made".into(),
            name: String::new(),
            data: String::new(),
        });
        tx.send(create.encode().unwrap()).await.unwrap();
        drop(tx);
        task.await.unwrap();

        assert!(dir.path().join("made").is_dir());
    }
}

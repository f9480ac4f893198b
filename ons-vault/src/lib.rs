//! # ons-vault
//!
//! Keeps a local directory (the vault) in sync with a remote peer over an
//! ordered message channel.
//!
//! A sync round starts with a `check` carrying each side's last-sync
//! timestamp. The side with the newer marker is authoritative: it obtains
//! the other side's tree, diffs it against a fresh scan of its own, and
//! pushes `create`/`update`/`delete` operations until the trees match.
//!
//! - [`VaultSyncEngine`] - message handling and reconciliation
//! - [`Channel`] - the outbound half of the peer data channel
//! - [`SyncMarker`] - the persisted `.synclog` timestamp
//! - [`scan`] - vault tree scanning

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod config;
pub mod engine;
pub mod error;
pub mod marker;
pub mod paths;
pub mod scan;

pub use channel::{Channel, MemoryChannel};
pub use config::VaultConfig;
pub use engine::VaultSyncEngine;
pub use error::{Result, VaultError};
pub use marker::{SyncMarker, MARKER_FILE_NAME};

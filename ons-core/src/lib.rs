//! # ons-core
//!
//! Pure logic for ONS (no I/O, instant tests).
//!
//! This crate holds the decisions that the device session and the vault
//! sync engine make, without touching sockets or the filesystem:
//!
//! - [`SessionState`] - relay session lifecycle as a state machine
//! - [`CandidateQueue`] - FIFO buffer for candidates that arrive before an offer
//! - [`check::decide`] - timestamp gate for a sync round
//! - [`diff::reconcile`] - tree diff producing create/update/delete operations
//! - [`chunk`] - binary content chunk codec and reassembly
//!
//! The async crates (`ons-device`, `ons-vault`) interpret the results.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod candidates;
pub mod check;
pub mod chunk;
pub mod diff;
pub mod state;

pub use candidates::{CandidateQueue, QueueFull};
pub use check::{CheckOutcome, TIMESTAMP_TOLERANCE_SECS};
pub use chunk::{ChunkAssembly, ChunkFormatError, ChunkHeader, DEFAULT_CHUNK_SIZE};
pub use diff::PlannedOp;
pub use state::{Action, Event, SessionState};

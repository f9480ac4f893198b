//! # ons-types
//!
//! Wire format types shared by every ONS crate.
//!
//! - [`Envelope`], [`EventKind`], [`Role`] - signaling messages exchanged through the relay
//! - [`SessionDescription`], [`IceCandidate`] - negotiation payloads carried inside envelopes
//! - [`VaultMessage`], [`FileEntry`], [`FileOp`] - vault sync operations on the data channel
//! - [`EnvelopeError`], [`ErrorCode`] - decode errors and relay error codes

#![warn(missing_docs)]
#![warn(clippy::all)]

mod envelope;
mod error;
mod negotiation;
mod vault;

pub use envelope::{Envelope, EventKind, Role};
pub use error::{EnvelopeError, ErrorCode};
pub use negotiation::{AnswerPayload, DescriptionPayload, IceCandidate, SdpType, SessionDescription};
pub use vault::{ContentKind, FileEntry, FileOp, RenameOp, VaultMessage};

//! Timestamp gate for a sync round.

/// Marker timestamps closer than this are considered equal.
pub const TIMESTAMP_TOLERANCE_SECS: u64 = 3;

/// What a `check` message should trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Markers agree within tolerance.
    InSync,
    /// Our marker is newer: ask the peer for its tree and reconcile it against ours.
    RequestTree,
    /// The peer's marker is newer: send our tree so the peer can reconcile.
    SendTree,
}

/// Compare our marker to the peer's.
pub fn decide(local: u64, remote: u64) -> CheckOutcome {
    if local.abs_diff(remote) <= TIMESTAMP_TOLERANCE_SECS {
        CheckOutcome::InSync
    } else if local > remote {
        CheckOutcome::RequestTree
    } else {
        CheckOutcome::SendTree
    }
}

//! Candidate buffer for out-of-order negotiation messages.
//!
//! Clients may send candidates before their offer reaches the device. Those
//! candidates are held here in arrival order and replayed right after the
//! next offer is applied. The queue is bounded so that a client streaming
//! candidates without ever offering cannot grow it without limit.

use std::collections::VecDeque;

use ons_types::IceCandidate;
use thiserror::Error;

/// Default capacity of a [`CandidateQueue`].
pub const DEFAULT_CANDIDATE_CAPACITY: usize = 256;

/// Returned when the queue is at capacity. Carries the rejected candidate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("candidate queue full")]
pub struct QueueFull(pub IceCandidate);

/// FIFO of candidates waiting for a negotiation context.
#[derive(Debug)]
pub struct CandidateQueue {
    capacity: usize,
    queue: VecDeque<IceCandidate>,
}

impl CandidateQueue {
    /// Create a queue holding at most `capacity` candidates.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            queue: VecDeque::new(),
        }
    }

    /// Append a candidate.
    pub fn push(&mut self, candidate: IceCandidate) -> Result<(), QueueFull> {
        if self.queue.len() >= self.capacity {
            return Err(QueueFull(candidate));
        }
        self.queue.push_back(candidate);
        Ok(())
    }

    /// Remove and return every queued candidate in arrival order.
    pub fn drain(&mut self) -> Vec<IceCandidate> {
        self.queue.drain(..).collect()
    }

    /// Number of queued candidates.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

impl Default for CandidateQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CANDIDATE_CAPACITY)
    }
}

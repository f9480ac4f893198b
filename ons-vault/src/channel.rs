//! Outbound half of the peer data channel.
//!
//! The engine only ever sends text frames; inbound frames are fed to
//! [`VaultSyncEngine::run`](crate::VaultSyncEngine::run) by whoever owns the
//! channel.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::{Result, VaultError};

/// Anything the engine can send text frames through.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Send one text frame, preserving order relative to earlier sends.
    async fn send_text(&self, text: String) -> Result<()>;
}

/// In-memory channel for testing.
///
/// Records every frame; can be told to fail the next send.
#[derive(Default, Clone)]
pub struct MemoryChannel {
    inner: Arc<Mutex<MemoryChannelInner>>,
}

#[derive(Default)]
struct MemoryChannelInner {
    sent: Vec<String>,
    fail_next: bool,
}

impl MemoryChannel {
    /// Create an empty channel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames sent so far.
    pub fn sent(&self) -> Vec<String> {
        self.inner.lock().unwrap().sent.clone()
    }

    /// Remove and return frames sent so far.
    pub fn take_sent(&self) -> Vec<String> {
        std::mem::take(&mut self.inner.lock().unwrap().sent)
    }

    /// Make the next send fail.
    pub fn fail_next_send(&self) {
        self.inner.lock().unwrap().fail_next = true;
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn send_text(&self, text: String) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_next {
            inner.fail_next = false;
            return Err(VaultError::Channel("simulated send failure".into()));
        }
        inner.sent.push(text);
        Ok(())
    }
}

//! In-process peer backend.
//!
//! Records what the negotiator feeds each context and lets tests play the
//! backend's part: emit local candidates, open and close the data channel.

use super::{
    DataChannel, PeerConnector, PeerEvent, PeerEventKind, PeerEventSender, PeerLink,
    DATA_CHANNEL_LABEL,
};
use async_trait::async_trait;
use ons_types::{IceCandidate, SessionDescription};
use std::sync::{Arc, Mutex};

use crate::config::IceConfig;
use crate::error::NegotiationError;

/// Frames buffered per direction on channels opened by the mock.
const CHANNEL_CAPACITY: usize = 256;

/// Mock peer-connection backend.
#[derive(Debug, Default, Clone)]
pub struct MockConnector {
    inner: Arc<Mutex<MockConnectorInner>>,
}

#[derive(Debug, Default)]
struct MockConnectorInner {
    links: Vec<LinkRecord>,
    stun_servers: Vec<String>,
    fail_next_create: Option<String>,
    fail_next_offer: Option<String>,
    fail_next_answer: Option<String>,
}

#[derive(Debug)]
struct LinkRecord {
    generation: u64,
    offers: Vec<String>,
    candidates: Vec<IceCandidate>,
    closed: bool,
    events: PeerEventSender,
}

impl MockConnectorInner {
    fn record(&mut self, generation: u64) -> Option<&mut LinkRecord> {
        self.links.iter_mut().find(|l| l.generation == generation)
    }
}

impl MockConnector {
    /// Create a new mock backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of contexts created so far.
    pub fn links_created(&self) -> usize {
        self.inner.lock().unwrap().links.len()
    }

    /// Generation of the newest context.
    pub fn latest_generation(&self) -> Option<u64> {
        self.inner.lock().unwrap().links.last().map(|l| l.generation)
    }

    /// Offer bodies applied to context `generation`.
    pub fn offers(&self, generation: u64) -> Vec<String> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .record(generation)
            .map(|l| l.offers.clone())
            .unwrap_or_default()
    }

    /// Candidates applied to context `generation`, in order.
    pub fn candidates(&self, generation: u64) -> Vec<IceCandidate> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .record(generation)
            .map(|l| l.candidates.clone())
            .unwrap_or_default()
    }

    /// Whether context `generation` was closed.
    pub fn is_closed(&self, generation: u64) -> bool {
        let mut inner = self.inner.lock().unwrap();
        inner.record(generation).map(|l| l.closed).unwrap_or(false)
    }

    /// STUN servers handed to the most recent `create()`.
    pub fn stun_servers(&self) -> Vec<String> {
        self.inner.lock().unwrap().stun_servers.clone()
    }

    /// Cause the next create() to fail.
    pub fn fail_next_create(&self, error: &str) {
        self.inner.lock().unwrap().fail_next_create = Some(error.to_string());
    }

    /// Cause the next apply_offer() to fail.
    pub fn fail_next_offer(&self, error: &str) {
        self.inner.lock().unwrap().fail_next_offer = Some(error.to_string());
    }

    /// Cause the next create_answer() to fail.
    pub fn fail_next_answer(&self, error: &str) {
        self.inner.lock().unwrap().fail_next_answer = Some(error.to_string());
    }

    /// Report a local candidate from context `generation`.
    pub fn emit_candidate(&self, generation: u64, candidate: IceCandidate) -> bool {
        self.emit(generation, PeerEventKind::LocalCandidate(candidate))
    }

    /// Open the data channel of context `generation`.
    ///
    /// Returns the client's end of the channel.
    pub fn open_channel(&self, generation: u64) -> Option<DataChannel> {
        let (device_end, client_end) = DataChannel::pair(DATA_CHANNEL_LABEL, CHANNEL_CAPACITY);
        self.emit(generation, PeerEventKind::ChannelOpen(device_end))
            .then_some(client_end)
    }

    /// Report that the data channel of context `generation` closed.
    pub fn close_channel(&self, generation: u64) -> bool {
        self.emit(generation, PeerEventKind::ChannelClosed)
    }

    fn emit(&self, generation: u64, kind: PeerEventKind) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(record) = inner.record(generation) else {
            return false;
        };
        record.events.send(PeerEvent { generation, kind }).is_ok()
    }
}

#[async_trait]
impl PeerConnector for MockConnector {
    async fn create(
        &self,
        generation: u64,
        ice: &IceConfig,
        events: PeerEventSender,
    ) -> Result<Box<dyn PeerLink>, NegotiationError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(error) = inner.fail_next_create.take() {
            return Err(NegotiationError::Backend(error));
        }
        inner.stun_servers = ice.stun_servers.clone();
        inner.links.push(LinkRecord {
            generation,
            offers: Vec::new(),
            candidates: Vec::new(),
            closed: false,
            events,
        });
        Ok(Box::new(MockLink {
            generation,
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct MockLink {
    generation: u64,
    inner: Arc<Mutex<MockConnectorInner>>,
}

impl MockLink {
    fn with_record<T>(
        &self,
        f: impl FnOnce(&mut LinkRecord) -> T,
    ) -> Result<T, NegotiationError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .record(self.generation)
            .map(f)
            .ok_or_else(|| NegotiationError::Backend("unknown link".into()))
    }
}

#[async_trait]
impl PeerLink for MockLink {
    async fn apply_offer(&mut self, offer: &SessionDescription) -> Result<(), NegotiationError> {
        if let Some(error) = self.inner.lock().unwrap().fail_next_offer.take() {
            return Err(NegotiationError::Backend(error));
        }
        self.with_record(|l| l.offers.push(offer.sdp.clone()))
    }

    async fn add_candidate(&mut self, candidate: &IceCandidate) -> Result<(), NegotiationError> {
        self.with_record(|l| l.candidates.push(candidate.clone()))
    }

    async fn create_answer(&mut self) -> Result<SessionDescription, NegotiationError> {
        if let Some(error) = self.inner.lock().unwrap().fail_next_answer.take() {
            return Err(NegotiationError::Backend(error));
        }
        let generation = self.generation;
        Ok(SessionDescription::answer(format!(
            "v=0\r\no=- {generation} 1 IN IP4 127.0.0.1\r\ns=mock\r\n"
        )))
    }

    async fn close(&mut self) {
        let _ = self.with_record(|l| l.closed = true);
    }
}

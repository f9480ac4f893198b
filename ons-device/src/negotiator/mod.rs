//! Peer link negotiation.
//!
//! The [`Negotiator`] owns at most one negotiation context (a [`PeerLink`])
//! at a time. Every context gets a new generation number; events the
//! backend reports are tagged with it, so the session can discard anything
//! a torn-down context emits late.
//!
//! Candidates that arrive before any offer are held in a bounded
//! [`CandidateQueue`] and replayed right after the next offer is applied.
//!
//! The backend itself sits behind [`PeerConnector`]. [`RtcConnector`] drives
//! real WebRTC peer connections; [`MockConnector`] is the in-process double.

mod mock;
mod rtc;

pub use mock::MockConnector;
pub use rtc::RtcConnector;

use std::sync::Arc;

use async_trait::async_trait;
use ons_core::CandidateQueue;
use ons_types::{IceCandidate, SdpType, SessionDescription};
use ons_vault::{Channel, VaultError};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::IceConfig;
use crate::error::NegotiationError;

/// Label of the data channel the vault syncs over.
pub const DATA_CHANNEL_LABEL: &str = "NSChanel";

/// Sender half every link reports its events through.
pub type PeerEventSender = mpsc::UnboundedSender<PeerEvent>;

/// Something a negotiation context reported.
#[derive(Debug)]
pub struct PeerEvent {
    /// Generation of the context that produced the event.
    pub generation: u64,
    /// What happened.
    pub kind: PeerEventKind,
}

/// Kinds of [`PeerEvent`].
#[derive(Debug)]
pub enum PeerEventKind {
    /// A local candidate to send to the client.
    LocalCandidate(IceCandidate),
    /// The data channel opened.
    ChannelOpen(DataChannel),
    /// The data channel closed.
    ChannelClosed,
}

/// An open data channel: an outbound [`Channel`] plus the inbound frames.
pub struct DataChannel {
    /// Channel label.
    pub label: String,
    /// Outbound half.
    pub outbound: Arc<dyn Channel>,
    /// Inbound text frames.
    pub inbound: mpsc::Receiver<String>,
}

impl std::fmt::Debug for DataChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataChannel")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

impl DataChannel {
    /// Two connected ends of an in-process channel.
    ///
    /// Frames sent through one end's `outbound` arrive on the other end's
    /// `inbound`, in order.
    pub fn pair(label: &str, capacity: usize) -> (DataChannel, DataChannel) {
        let (a_tx, a_rx) = mpsc::channel(capacity.max(1));
        let (b_tx, b_rx) = mpsc::channel(capacity.max(1));
        let a = DataChannel {
            label: label.to_string(),
            outbound: Arc::new(QueueChannel { tx: b_tx }),
            inbound: a_rx,
        };
        let b = DataChannel {
            label: label.to_string(),
            outbound: Arc::new(QueueChannel { tx: a_tx }),
            inbound: b_rx,
        };
        (a, b)
    }
}

/// [`Channel`] that feeds a bounded queue.
struct QueueChannel {
    tx: mpsc::Sender<String>,
}

#[async_trait]
impl Channel for QueueChannel {
    async fn send_text(&self, text: String) -> ons_vault::Result<()> {
        self.tx
            .send(text)
            .await
            .map_err(|_| VaultError::Channel("data channel closed".into()))
    }
}

/// Creates negotiation contexts.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Create a fresh context for `generation`, reporting through `events`.
    async fn create(
        &self,
        generation: u64,
        ice: &IceConfig,
        events: PeerEventSender,
    ) -> Result<Box<dyn PeerLink>, NegotiationError>;
}

/// One negotiation context.
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Apply the client's offer as the remote description.
    async fn apply_offer(&mut self, offer: &SessionDescription) -> Result<(), NegotiationError>;

    /// Apply a remote candidate.
    async fn add_candidate(&mut self, candidate: &IceCandidate) -> Result<(), NegotiationError>;

    /// Build the local answer and set it as the local description.
    async fn create_answer(&mut self) -> Result<SessionDescription, NegotiationError>;

    /// Tear the context down. Events it emits afterwards are stale.
    async fn close(&mut self);
}

/// What happened to a remote candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateDisposition {
    /// Applied to the live context.
    Applied,
    /// Queued until the next offer.
    Queued,
}

/// Drives offer/answer/candidate exchange for one device session.
pub struct Negotiator {
    connector: Arc<dyn PeerConnector>,
    ice: IceConfig,
    events: PeerEventSender,
    link: Option<Box<dyn PeerLink>>,
    generation: u64,
    pending: CandidateQueue,
}

impl Negotiator {
    /// Create a negotiator with no live context.
    pub fn new(
        connector: Arc<dyn PeerConnector>,
        ice: IceConfig,
        events: PeerEventSender,
    ) -> Self {
        Self {
            connector,
            ice,
            events,
            link: None,
            generation: 0,
            pending: CandidateQueue::default(),
        }
    }

    /// Generation of the most recent context.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether a context is live.
    pub fn has_link(&self) -> bool {
        self.link.is_some()
    }

    /// Whether events tagged `generation` come from the live context.
    pub fn is_current(&self, generation: u64) -> bool {
        self.link.is_some() && generation == self.generation
    }

    /// Candidates waiting for an offer.
    pub fn queued_candidates(&self) -> usize {
        self.pending.len()
    }

    /// Replace any live context with one built from `offer` and return the
    /// local answer.
    ///
    /// On failure the new context is discarded; queued candidates that
    /// were already replayed are gone with it.
    pub async fn on_remote_offer(
        &mut self,
        offer: &SessionDescription,
    ) -> Result<SessionDescription, NegotiationError> {
        if offer.sdp_type != SdpType::Offer {
            return Err(NegotiationError::UnexpectedDescription(offer.sdp_type));
        }

        self.teardown().await;
        self.generation += 1;
        let generation = self.generation;
        debug!("negotiation context {} created", generation);

        let mut link = self
            .connector
            .create(generation, &self.ice, self.events.clone())
            .await?;

        match Self::answer(link.as_mut(), offer, self.pending.drain()).await {
            Ok(answer) => {
                self.link = Some(link);
                Ok(answer)
            }
            Err(e) => {
                link.close().await;
                Err(e)
            }
        }
    }

    async fn answer(
        link: &mut dyn PeerLink,
        offer: &SessionDescription,
        queued: Vec<IceCandidate>,
    ) -> Result<SessionDescription, NegotiationError> {
        link.apply_offer(offer).await?;
        for candidate in queued {
            if let Err(e) = link.add_candidate(&candidate).await {
                warn!("queued candidate rejected: {}", e);
            }
        }
        link.create_answer().await
    }

    /// Apply `candidate` to the live context, or queue it for the next offer.
    pub async fn set_remote_candidate(
        &mut self,
        candidate: IceCandidate,
    ) -> Result<CandidateDisposition, NegotiationError> {
        match self.link.as_mut() {
            Some(link) => {
                link.add_candidate(&candidate).await?;
                Ok(CandidateDisposition::Applied)
            }
            None => {
                self.pending
                    .push(candidate)
                    .map_err(|_| NegotiationError::CandidateQueueFull)?;
                Ok(CandidateDisposition::Queued)
            }
        }
    }

    /// Close the live context, keeping queued candidates.
    pub async fn teardown(&mut self) {
        if let Some(mut link) = self.link.take() {
            debug!("negotiation context {} torn down", self.generation);
            link.close().await;
        }
    }

    /// Close the live context and drop queued candidates.
    pub async fn reset(&mut self) {
        self.teardown().await;
        self.pending.clear();
    }
}

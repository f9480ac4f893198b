//! WebRTC peer backend built on webrtc-rs.
//!
//! Each context is one `RTCPeerConnection` configured with the STUN servers
//! from [`IceConfig`]. The client opens the data channel; this side only
//! answers and reports what the connection does through [`PeerEvent`]s.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ons_types::{IceCandidate, SdpType, SessionDescription};
use ons_vault::{Channel, VaultError};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use super::{DataChannel, PeerConnector, PeerEvent, PeerEventKind, PeerEventSender, PeerLink};
use crate::config::IceConfig;
use crate::error::NegotiationError;

/// Inbound frames buffered per data channel.
const INBOUND_CAPACITY: usize = 256;

fn backend(e: webrtc::Error) -> NegotiationError {
    NegotiationError::Backend(e.to_string())
}

/// [`PeerConnector`] that creates real WebRTC peer connections.
pub struct RtcConnector {
    api: API,
}

impl std::fmt::Debug for RtcConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtcConnector").finish_non_exhaustive()
    }
}

impl RtcConnector {
    /// Connector with the default media engine and interceptors.
    pub fn new() -> Result<Self, NegotiationError> {
        Self::build(false)
    }

    fn build(include_loopback: bool) -> Result<Self, NegotiationError> {
        let mut media = MediaEngine::default();
        let registry = register_default_interceptors(Registry::new(), &mut media).map_err(backend)?;
        let mut settings = SettingEngine::default();
        settings.set_include_loopback_candidate(include_loopback);
        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .with_setting_engine(settings)
            .build();
        Ok(Self { api })
    }

    async fn peer_connection(
        &self,
        ice: &IceConfig,
    ) -> Result<Arc<RTCPeerConnection>, NegotiationError> {
        let ice_servers = if ice.stun_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: ice.stun_servers.clone(),
                ..Default::default()
            }]
        };
        let config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };
        let pc = self
            .api
            .new_peer_connection(config)
            .await
            .map_err(backend)?;
        Ok(Arc::new(pc))
    }
}

#[async_trait]
impl PeerConnector for RtcConnector {
    async fn create(
        &self,
        generation: u64,
        ice: &IceConfig,
        events: PeerEventSender,
    ) -> Result<Box<dyn PeerLink>, NegotiationError> {
        let pc = self.peer_connection(ice).await?;

        let candidates = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let events = candidates.clone();
            Box::pin(async move {
                // None marks the end of gathering
                let Some(candidate) = candidate else { return };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = events.send(PeerEvent {
                            generation,
                            kind: PeerEventKind::LocalCandidate(from_init(init)),
                        });
                    }
                    Err(e) => warn!("dropping local candidate: {}", e),
                }
            })
        }));

        pc.on_data_channel(Box::new(move |channel: Arc<RTCDataChannel>| {
            let events = events.clone();
            Box::pin(async move {
                attach_channel(generation, channel, events);
            })
        }));

        debug!("peer connection created for generation {}", generation);
        Ok(Box::new(RtcLink { generation, pc }))
    }
}

/// Wire a remote-opened data channel to the event stream.
fn attach_channel(generation: u64, channel: Arc<RTCDataChannel>, events: PeerEventSender) {
    let label = channel.label().to_string();
    info!("data channel {:?} offered (generation {})", label, generation);

    let (inbound_tx, inbound) = mpsc::channel(INBOUND_CAPACITY);
    let pending = Mutex::new(Some(DataChannel {
        label: label.clone(),
        outbound: Arc::new(RtcChannel {
            channel: channel.clone(),
        }),
        inbound,
    }));

    channel.on_message(Box::new(move |msg: DataChannelMessage| {
        let inbound_tx = inbound_tx.clone();
        Box::pin(async move {
            match String::from_utf8(msg.data.to_vec()) {
                Ok(text) if msg.is_string => {
                    let _ = inbound_tx.send(text).await;
                }
                Ok(_) | Err(_) => warn!("dropping non-text data channel frame"),
            }
        })
    }));

    let opened = events.clone();
    channel.on_open(Box::new(move || {
        Box::pin(async move {
            let channel = pending.lock().ok().and_then(|mut slot| slot.take());
            if let Some(channel) = channel {
                let _ = opened.send(PeerEvent {
                    generation,
                    kind: PeerEventKind::ChannelOpen(channel),
                });
            }
        })
    }));

    channel.on_close(Box::new(move || {
        let events = events.clone();
        Box::pin(async move {
            debug!("data channel closed (generation {})", generation);
            let _ = events.send(PeerEvent {
                generation,
                kind: PeerEventKind::ChannelClosed,
            });
        })
    }));
}

/// Outbound half of a WebRTC data channel.
struct RtcChannel {
    channel: Arc<RTCDataChannel>,
}

#[async_trait]
impl Channel for RtcChannel {
    async fn send_text(&self, text: String) -> ons_vault::Result<()> {
        self.channel
            .send_text(text)
            .await
            .map(|_| ())
            .map_err(|e| VaultError::Channel(e.to_string()))
    }
}

/// One WebRTC negotiation context.
struct RtcLink {
    generation: u64,
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerLink for RtcLink {
    async fn apply_offer(&mut self, offer: &SessionDescription) -> Result<(), NegotiationError> {
        if offer.sdp_type != SdpType::Offer {
            return Err(NegotiationError::UnexpectedDescription(offer.sdp_type));
        }
        let description = RTCSessionDescription::offer(offer.sdp.clone()).map_err(backend)?;
        self.pc
            .set_remote_description(description)
            .await
            .map_err(backend)
    }

    async fn add_candidate(&mut self, candidate: &IceCandidate) -> Result<(), NegotiationError> {
        self.pc
            .add_ice_candidate(to_init(candidate))
            .await
            .map_err(backend)
    }

    async fn create_answer(&mut self) -> Result<SessionDescription, NegotiationError> {
        let answer = self.pc.create_answer(None).await.map_err(backend)?;
        self.pc
            .set_local_description(answer.clone())
            .await
            .map_err(backend)?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn close(&mut self) {
        if let Err(e) = self.pc.close().await {
            warn!("closing peer connection {} failed: {}", self.generation, e);
        }
    }
}

fn from_init(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_m_line_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

fn to_init(candidate: &IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate.clone(),
        sdp_mid: candidate.sdp_mid.clone(),
        sdp_mline_index: candidate.sdp_m_line_index,
        username_fragment: candidate.username_fragment.clone(),
    }
}

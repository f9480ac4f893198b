//! Device session actor.
//!
//! One task owns the relay connection, the negotiator and the running vault
//! sync. Everything that happens to the session arrives at that task as a
//! message: commands from [`DeviceSession`] handles, frames from the read
//! loop, events from the peer backend, and liveness ticks. The task feeds
//! them through the [`SessionState`] machine from `ons-core` and performs the
//! actions it returns.
//!
//! ```text
//! DeviceSession ──commands──▶ ┌──────────────┐ ◀──frames── read loop ◀── Transport
//!                             │ SessionActor │ ◀──PeerEvent── PeerLink
//! liveness interval ────────▶ └──────────────┘ ──spawn──▶ VaultSyncEngine
//! ```
//!
//! Frames and read-loop failures carry the epoch of the connection they
//! came from; anything from an earlier connection is dropped. Peer events
//! carry the negotiation generation and are dropped the same way.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use ons_core::{Action, Event, SessionState};
use ons_types::{
    AnswerPayload, DescriptionPayload, Envelope, EventKind, IceCandidate, Role, SdpType,
    SessionDescription,
};
use ons_vault::{VaultConfig, VaultSyncEngine};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::{ConnectConfig, IceConfig};
use crate::error::SessionError;
use crate::negotiator::{
    CandidateDisposition, DataChannel, Negotiator, PeerConnector, PeerEvent, PeerEventKind,
};
use crate::transport::{Transport, TransportError};

/// Pending commands per session.
const COMMAND_QUEUE: usize = 16;

/// What a session connects with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Id this device registers under.
    pub device_id: String,
    /// Relay WebSocket URL.
    pub relay_url: String,
    /// Shared secret expected on negotiation envelopes.
    pub password: String,
    /// Time between liveness probes.
    pub liveness_interval: Duration,
}

impl SessionSettings {
    /// Settings taken from the `[connect]` table.
    pub fn from_config(connect: &ConnectConfig) -> Self {
        Self {
            device_id: connect.device_id.clone(),
            relay_url: connect.relay_url(),
            password: connect.password.clone(),
            liveness_interval: connect.liveness_interval(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&ConnectConfig::default())
    }
}

enum Command {
    Open(SessionSettings),
    Close(oneshot::Sender<()>),
}

/// Handle to a running device session.
///
/// Clones share the session. The session task stops once every handle is
/// dropped.
#[derive(Debug, Clone)]
pub struct DeviceSession {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<SessionState>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Open(settings) => f.debug_tuple("Open").field(&settings.device_id).finish(),
            Command::Close(_) => f.write_str("Close"),
        }
    }
}

impl DeviceSession {
    /// Spawn an idle session task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        transport: Arc<dyn Transport>,
        connector: Arc<dyn PeerConnector>,
        ice: IceConfig,
        vault: VaultConfig,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE);
        let (state_tx, state_rx) = watch::channel(SessionState::new());
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();

        let actor = SessionActor {
            settings: SessionSettings::default(),
            transport,
            negotiator: Negotiator::new(connector, ice, peer_tx),
            vault,
            state: SessionState::new(),
            state_tx,
            inbound_tx,
            epoch: 0,
            reader: None,
            liveness: None,
            offer: None,
            channel: None,
            sync: None,
        };
        tokio::spawn(actor.run(commands_rx, inbound_rx, peer_rx));

        Self {
            commands: commands_tx,
            state: state_rx,
        }
    }

    /// Dial the relay, register and keep the connection alive.
    ///
    /// Tears down any existing connection first. Returns once the request
    /// is queued; progress is visible through [`state`](Self::state).
    pub async fn start(&self, settings: SessionSettings) -> Result<(), SessionError> {
        self.commands
            .send(Command::Open(settings))
            .await
            .map_err(|_| SessionError::Closed)
    }

    /// Close the connection and stop the liveness timer.
    ///
    /// Waits until the teardown is done. Calling it again, or after the
    /// session task is gone, does nothing.
    pub async fn stop(&self) -> Result<(), SessionError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.commands.send(Command::Close(ack_tx)).await.is_err() {
            return Ok(());
        }
        let _ = ack_rx.await;
        Ok(())
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Whether the relay connection is up and registered.
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Wait until the state satisfies `predicate` and return it.
    ///
    /// Returns the last known state if the session task exits first.
    pub async fn wait_for(
        &self,
        mut predicate: impl FnMut(SessionState) -> bool,
    ) -> SessionState {
        let mut state = self.state.clone();
        loop {
            let current = *state.borrow_and_update();
            if predicate(current) {
                return current;
            }
            if state.changed().await.is_err() {
                return *state.borrow();
            }
        }
    }
}

enum Inbound {
    Frame { epoch: u64, text: String },
    Lost { epoch: u64, error: TransportError },
}

struct SessionActor {
    settings: SessionSettings,
    transport: Arc<dyn Transport>,
    negotiator: Negotiator,
    vault: VaultConfig,
    state: SessionState,
    state_tx: watch::Sender<SessionState>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    /// Bumped on every dial and close.
    epoch: u64,
    reader: Option<JoinHandle<()>>,
    liveness: Option<Interval>,
    offer: Option<SessionDescription>,
    channel: Option<DataChannel>,
    sync: Option<JoinHandle<()>>,
}

async fn next_tick(liveness: &mut Option<Interval>) {
    match liveness {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

impl SessionActor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut inbound: mpsc::UnboundedReceiver<Inbound>,
        mut peer_events: mpsc::UnboundedReceiver<PeerEvent>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Open(settings)) => {
                        self.settings = settings;
                        self.drive(Event::OpenRequested).await;
                    }
                    Some(Command::Close(ack)) => {
                        self.drive(Event::CloseRequested).await;
                        let _ = ack.send(());
                    }
                    None => break,
                },
                Some(message) = inbound.recv() => self.on_inbound(message).await,
                Some(event) = peer_events.recv() => self.on_peer_event(event).await,
                () = next_tick(&mut self.liveness) => {
                    let alive = self.transport.probe().await;
                    if !alive && self.state.is_connected() {
                        warn!("relay connection failed liveness probe");
                    }
                    self.drive(Event::LivenessTick { alive }).await;
                }
            }
        }

        self.drive(Event::CloseRequested).await;
        debug!("device session task exiting");
    }

    /// Feed `event` and every follow-up event through the state machine.
    async fn drive(&mut self, event: Event) {
        let mut queue = VecDeque::from([event]);
        while let Some(event) = queue.pop_front() {
            let (next, actions) = self.state.on_event(event);
            if next != self.state {
                debug!("session {:?} -> {:?} on {:?}", self.state, next, event);
            }
            self.state = next;
            for action in actions {
                if let Some(follow_up) = self.execute(action).await {
                    queue.push_back(follow_up);
                }
            }
            self.state_tx.send_replace(self.state);
        }
    }

    async fn execute(&mut self, action: Action) -> Option<Event> {
        match action {
            Action::Dial => Some(self.dial().await),
            Action::Register => self.register().await,
            Action::SpawnReadLoop => {
                self.spawn_reader();
                None
            }
            Action::CloseConnection => {
                self.close_connection().await;
                None
            }
            Action::TeardownPeerLink => {
                self.stop_sync();
                self.offer = None;
                self.channel = None;
                self.negotiator.reset().await;
                None
            }
            Action::Negotiate => self.negotiate().await,
            Action::StartVaultSync => self.start_sync().await,
            Action::StopVaultSync => {
                self.stop_sync();
                None
            }
            Action::StartLiveness => {
                self.start_liveness();
                None
            }
            Action::StopLiveness => {
                self.liveness = None;
                None
            }
        }
    }

    // =========================================================================
    // Relay connection
    // =========================================================================

    async fn dial(&mut self) -> Event {
        self.stop_reader();
        info!("dialing relay {}", self.settings.relay_url);
        match self.transport.connect(&self.settings.relay_url).await {
            Ok(()) => {
                self.epoch += 1;
                Event::DialSucceeded
            }
            Err(e) => {
                warn!("relay dial failed: {}", e);
                Event::DialFailed
            }
        }
    }

    async fn register(&mut self) -> Option<Event> {
        info!("registering device #{}", self.settings.device_id);
        match self.send(Envelope::register(&self.settings.device_id)).await {
            Ok(()) => None,
            Err(e) => {
                warn!("registration failed: {}", e);
                Some(Event::ConnectionLost)
            }
        }
    }

    fn spawn_reader(&mut self) {
        self.stop_reader();
        let transport = Arc::clone(&self.transport);
        let inbound = self.inbound_tx.clone();
        let epoch = self.epoch;
        self.reader = Some(tokio::spawn(async move {
            loop {
                match transport.recv().await {
                    Ok(text) => {
                        if inbound.send(Inbound::Frame { epoch, text }).is_err() {
                            return;
                        }
                    }
                    Err(error) => {
                        let _ = inbound.send(Inbound::Lost { epoch, error });
                        return;
                    }
                }
            }
        }));
    }

    fn stop_reader(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }

    async fn close_connection(&mut self) {
        self.stop_reader();
        self.epoch += 1;
        if let Err(e) = self.transport.close().await {
            debug!("closing relay connection: {}", e);
        }
    }

    fn start_liveness(&mut self) {
        let period = self.settings.liveness_interval;
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.liveness = Some(interval);
    }

    async fn send(&mut self, envelope: Envelope) -> Result<(), SessionError> {
        let text = envelope.encode()?;
        self.transport.send(text).await?;
        Ok(())
    }

    async fn send_peer_error(&mut self, reason: &str) {
        let envelope = Envelope::peer_error(&self.settings.device_id, reason);
        if let Err(e) = self.send(envelope).await {
            warn!("could not report negotiation failure: {}", e);
        }
    }

    // =========================================================================
    // Inbound envelopes
    // =========================================================================

    async fn on_inbound(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Frame { epoch, text } if epoch == self.epoch => {
                match Envelope::decode(&text) {
                    Ok(envelope) => self.on_envelope(envelope).await,
                    Err(e) => warn!("ignoring relay frame: {}", e),
                }
            }
            Inbound::Lost { epoch, error } if epoch == self.epoch => {
                warn!("relay connection lost: {}", error);
                self.drive(Event::ConnectionLost).await;
            }
            _ => debug!("dropping event from a previous relay connection"),
        }
    }

    async fn on_envelope(&mut self, envelope: Envelope) {
        match envelope.event {
            EventKind::Online => info!("device #{} online", self.settings.device_id),
            EventKind::Error => match envelope.error_code() {
                Some(code) => warn!("relay reported error {}", code),
                None => warn!("relay reported error {}", envelope.data),
            },
            EventKind::Exchange => {
                if self.authorize(&envelope).await {
                    self.on_exchange(&envelope).await;
                }
            }
            EventKind::Node => {
                if self.authorize(&envelope).await {
                    match IceCandidate::from_value(&envelope.data) {
                        Ok(candidate) => self.on_remote_candidate(candidate).await,
                        Err(e) => warn!("ignoring candidate: {}", e),
                    }
                }
            }
            EventKind::PeerError => warn!("client reported negotiation failure: {}", envelope.data),
            other => debug!("ignoring {} envelope", other),
        }
    }

    /// Check the shared secret; a mismatch is answered with a `p2p-error`.
    async fn authorize(&mut self, envelope: &Envelope) -> bool {
        if envelope.pass.as_deref().unwrap_or("") == self.settings.password {
            return true;
        }
        let err = SessionError::Unauthorized;
        warn!("{} from client rejected: {}", envelope.event, err);
        self.send_peer_error(&err.to_string()).await;
        false
    }

    async fn on_exchange(&mut self, envelope: &Envelope) {
        let payload = match DescriptionPayload::from_value(&envelope.data) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("ignoring exchange: {}", e);
                return;
            }
        };
        if let DescriptionPayload::Candidate(candidate) = payload {
            return self.on_remote_candidate(candidate).await;
        }
        match payload.description() {
            Some(description) if description.sdp_type == SdpType::Offer => {
                self.offer = Some(description.clone());
                self.drive(Event::OfferReceived).await;
            }
            Some(description) => debug!("ignoring {:?} description", description.sdp_type),
            None => {}
        }
    }

    async fn on_remote_candidate(&mut self, candidate: IceCandidate) {
        match self.negotiator.set_remote_candidate(candidate).await {
            Ok(CandidateDisposition::Applied) => debug!("remote candidate applied"),
            Ok(CandidateDisposition::Queued) => debug!(
                "remote candidate queued ({} waiting for an offer)",
                self.negotiator.queued_candidates()
            ),
            Err(e) => warn!("remote candidate dropped: {}", e),
        }
    }

    // =========================================================================
    // Negotiation and vault sync
    // =========================================================================

    async fn negotiate(&mut self) -> Option<Event> {
        let Some(offer) = self.offer.take() else {
            return Some(Event::ChannelClosed);
        };
        // The old link goes away with the new offer; so does its sync
        self.stop_sync();
        self.channel = None;

        let answer = match self.negotiator.on_remote_offer(&offer).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!("negotiation failed: {}", e);
                self.send_peer_error(&e.to_string()).await;
                return Some(Event::ChannelClosed);
            }
        };

        let data = match (AnswerPayload { sdp: answer }).to_value() {
            Ok(data) => data,
            Err(e) => {
                warn!("could not encode answer: {}", e);
                self.send_peer_error("answer encoding failed").await;
                return Some(Event::ChannelClosed);
            }
        };
        let envelope = Envelope::new(EventKind::Exchange)
            .with_data(data)
            .to(&self.settings.device_id)
            .from_role(Role::Device);
        match self.send(envelope).await {
            Ok(()) => info!(
                "answered offer with negotiation context {}",
                self.negotiator.generation()
            ),
            Err(e) => warn!("could not send answer: {}", e),
        }
        None
    }

    async fn on_peer_event(&mut self, event: PeerEvent) {
        if !self.negotiator.is_current(event.generation) {
            debug!(
                "dropping event from negotiation context {}",
                event.generation
            );
            return;
        }
        match event.kind {
            PeerEventKind::LocalCandidate(candidate) => {
                let data = match serde_json::to_value(&candidate) {
                    Ok(data) => data,
                    Err(e) => {
                        warn!("could not encode local candidate: {}", e);
                        return;
                    }
                };
                let envelope = Envelope::new(EventKind::Node)
                    .with_data(data)
                    .to(&self.settings.device_id)
                    .from_role(Role::Device);
                if let Err(e) = self.send(envelope).await {
                    debug!("local candidate not sent: {}", e);
                }
            }
            PeerEventKind::ChannelOpen(channel) => {
                info!("data channel {} open", channel.label);
                self.channel = Some(channel);
                self.drive(Event::ChannelOpened).await;
            }
            PeerEventKind::ChannelClosed => {
                info!("data channel closed");
                self.drive(Event::ChannelClosed).await;
            }
        }
    }

    async fn start_sync(&mut self) -> Option<Event> {
        let Some(channel) = self.channel.take() else {
            return Some(Event::ChannelClosed);
        };
        match VaultSyncEngine::new(self.vault.clone(), channel.outbound).await {
            Ok(engine) => {
                info!("vault sync started on {}", engine.root().display());
                let engine = Arc::new(engine);
                self.sync = Some(tokio::spawn(engine.run(channel.inbound)));
                None
            }
            Err(e) => {
                error!("vault sync could not start: {}", e);
                Some(Event::ChannelClosed)
            }
        }
    }

    fn stop_sync(&mut self) {
        if let Some(sync) = self.sync.take() {
            debug!("stopping vault sync");
            sync.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::negotiator::MockConnector;
    use crate::transport::MockTransport;
    use serde_json::json;

    struct Harness {
        session: DeviceSession,
        transport: MockTransport,
        connector: MockConnector,
        _vault: tempfile::TempDir,
    }

    fn settings(password: &str) -> SessionSettings {
        SessionSettings {
            device_id: "D1".into(),
            relay_url: "ws://relay.test/nat".into(),
            password: password.into(),
            liveness_interval: Duration::from_millis(50),
        }
    }

    async fn started(password: &str) -> Harness {
        let transport = MockTransport::new();
        let connector = MockConnector::new();
        let vault = tempfile::tempdir().unwrap();
        let session = DeviceSession::spawn(
            Arc::new(transport.clone()),
            Arc::new(connector.clone()),
            IceConfig::default(),
            VaultConfig::with_root(vault.path()),
        );
        session.start(settings(password)).await.unwrap();
        session.wait_for(|s| s == SessionState::Registered).await;
        Harness {
            session,
            transport,
            connector,
            _vault: vault,
        }
    }

    fn offer(pass: &str, sdp: &str) -> Envelope {
        Envelope::new(EventKind::Exchange)
            .with_data(json!({"type": "offer", "sdp": sdp}))
            .to("D1")
            .from_role(Role::Client)
            .with_pass(pass)
    }

    fn node(pass: &str, n: u32) -> Envelope {
        let line = format!("candidate:{n} 1 udp 1 10.0.0.{n} 9 typ host");
        Envelope::new(EventKind::Node)
            .with_data(json!({ "candidate": line }))
            .to("D1")
            .from_role(Role::Client)
            .with_pass(pass)
    }

    async fn eventually(mut condition: impl FnMut() -> bool) {
        for _ in 0..100 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    // ===========================================
    // Start / Stop
    // ===========================================

    #[tokio::test]
    async fn start_dials_and_registers() {
        let h = started("").await;

        assert_eq!(
            h.transport.connected_address().as_deref(),
            Some("ws://relay.test/nat")
        );
        assert_eq!(h.transport.sent_envelopes(), vec![Envelope::register("D1")]);
        assert!(h.session.is_connected());
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let h = started("").await;

        h.session.stop().await.unwrap();
        assert_eq!(h.session.state(), SessionState::Closed);
        assert!(!h.transport.is_connected());

        h.session.stop().await.unwrap();
        assert_eq!(h.session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn closed_session_does_not_reconnect() {
        let h = started("").await;
        h.session.stop().await.unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(h.transport.connect_count(), 1);
    }

    #[tokio::test]
    async fn restart_opens_a_fresh_connection() {
        let h = started("").await;
        h.session.start(settings("")).await.unwrap();

        eventually(|| h.transport.sent_envelopes().len() == 2).await;
        assert_eq!(h.transport.connect_count(), 2);
    }

    // ===========================================
    // Reconnect
    // ===========================================

    #[tokio::test]
    async fn dropped_connection_is_redialed_on_next_tick() {
        let h = started("").await;

        h.transport.drop_connection();
        eventually(|| h.transport.connect_count() == 2).await;
        h.session.wait_for(|s| s == SessionState::Registered).await;

        let registers = h
            .transport
            .sent_envelopes()
            .into_iter()
            .filter(|e| e.event == EventKind::Register)
            .count();
        assert_eq!(registers, 2);
    }

    #[tokio::test]
    async fn failed_probe_forces_redial() {
        let h = started("").await;
        h.transport.fail_next_probe();

        eventually(|| h.transport.connect_count() == 2).await;
        assert!(h.transport.is_connected());
    }

    #[tokio::test]
    async fn failed_dial_retries_on_next_tick() {
        let transport = MockTransport::new();
        transport.fail_next_connect("relay down");
        let vault = tempfile::tempdir().unwrap();
        let session = DeviceSession::spawn(
            Arc::new(transport.clone()),
            Arc::new(MockConnector::new()),
            IceConfig::default(),
            VaultConfig::with_root(vault.path()),
        );
        session.start(settings("")).await.unwrap();

        session.wait_for(|s| s == SessionState::Registered).await;
        assert_eq!(transport.connect_count(), 1);
    }

    // ===========================================
    // Negotiation
    // ===========================================

    #[tokio::test]
    async fn offer_is_answered_to_own_id() {
        let h = started("secret").await;
        h.transport.queue_envelope(&offer("secret", "v=0 client"));

        eventually(|| h.transport.sent_envelopes().len() == 2).await;
        let answer = h.transport.sent_envelopes().pop().unwrap();
        assert_eq!(answer.event, EventKind::Exchange);
        assert_eq!(answer.to.as_deref(), Some("D1"));
        assert_eq!(answer.origin_role(), Some(Role::Device));
        assert_eq!(answer.data["sdp"]["type"], "answer");
        assert_eq!(h.connector.offers(1), vec!["v=0 client".to_string()]);
        h.session
            .wait_for(|s| s == SessionState::PeerLinkPending)
            .await;
    }

    #[tokio::test]
    async fn wrong_password_is_rejected_without_negotiation() {
        let h = started("secret").await;
        h.transport.queue_envelope(&offer("guess", "v=0"));
        h.transport.queue_envelope(&node("guess", 1));

        eventually(|| h.transport.sent_envelopes().len() == 3).await;
        let replies = h.transport.sent_envelopes();
        for reply in &replies[1..] {
            assert_eq!(reply.event, EventKind::PeerError);
            assert_eq!(reply.data, json!("password error"));
            assert_eq!(reply.to.as_deref(), Some("D1"));
        }
        assert_eq!(h.connector.links_created(), 0);
        assert_eq!(h.session.state(), SessionState::Registered);
    }

    #[tokio::test]
    async fn early_candidates_are_replayed_after_offer() {
        let h = started("").await;
        h.transport.queue_envelope(&node("", 2));
        h.transport.queue_envelope(&node("", 1));
        h.transport.queue_envelope(&offer("", "v=0"));

        eventually(|| h.connector.candidates(1).len() == 2).await;
        let lines: Vec<String> = h
            .connector
            .candidates(1)
            .into_iter()
            .map(|c| c.candidate)
            .collect();
        assert!(lines[0].starts_with("candidate:2"));
        assert!(lines[1].starts_with("candidate:1"));
    }

    #[tokio::test]
    async fn answer_failure_reports_peer_error_and_keeps_session() {
        let h = started("").await;
        h.connector.fail_next_answer("no codecs");
        h.transport.queue_envelope(&offer("", "v=0"));

        eventually(|| h.transport.sent_envelopes().len() == 2).await;
        let reply = h.transport.sent_envelopes().pop().unwrap();
        assert_eq!(reply.event, EventKind::PeerError);
        h.session.wait_for(|s| s == SessionState::Registered).await;
        assert!(h.session.is_connected());
    }

    #[tokio::test]
    async fn malformed_exchange_is_ignored() {
        let h = started("").await;
        h.transport.queue_envelope(
            &Envelope::new(EventKind::Exchange).with_data(json!({"nonsense": true})),
        );
        h.transport.queue_response("not json at all");
        h.transport.queue_envelope(&offer("", "v=0"));

        eventually(|| h.connector.links_created() == 1).await;
        assert!(h.session.is_connected());
    }

    #[tokio::test]
    async fn local_candidates_are_sent_individually() {
        let h = started("").await;
        h.transport.queue_envelope(&offer("", "v=0"));
        eventually(|| h.connector.links_created() == 1).await;
        eventually(|| h.transport.sent_envelopes().len() == 2).await;

        assert!(h.connector.emit_candidate(1, IceCandidate::new("candidate:a")));
        assert!(h.connector.emit_candidate(1, IceCandidate::new("candidate:b")));

        eventually(|| h.transport.sent_envelopes().len() == 4).await;
        let sent = h.transport.sent_envelopes();
        assert_eq!(sent[2].event, EventKind::Node);
        assert_eq!(sent[2].data["candidate"], "candidate:a");
        assert_eq!(sent[3].data["candidate"], "candidate:b");
        assert_eq!(sent[3].to.as_deref(), Some("D1"));
    }

    #[tokio::test]
    async fn events_from_replaced_context_are_dropped() {
        let h = started("").await;
        h.transport.queue_envelope(&offer("", "one"));
        h.transport.queue_envelope(&offer("", "two"));
        eventually(|| h.connector.links_created() == 2).await;
        eventually(|| h.transport.sent_envelopes().len() == 3).await;

        assert!(h.connector.emit_candidate(1, IceCandidate::new("candidate:stale")));
        assert!(h.connector.open_channel(1).is_some());
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(h.transport.sent_envelopes().len(), 3);
        assert_eq!(h.session.state(), SessionState::PeerLinkPending);
    }

    // ===========================================
    // Data Channel
    // ===========================================

    #[tokio::test]
    async fn open_channel_starts_vault_sync() {
        let h = started("").await;
        h.transport.queue_envelope(&offer("", "v=0"));
        eventually(|| h.connector.links_created() == 1).await;

        let mut client = h.connector.open_channel(1).unwrap();
        h.session
            .wait_for(|s| s == SessionState::PeerLinkEstablished)
            .await;

        // A newer marker on the client side makes the device send its tree
        client
            .outbound
            .send_text(r#"{"type":"","operate":"check","path":"","name":"","data":"1700000000"}"#.into())
            .await
            .unwrap();
        let reply = tokio::time::timeout(Duration::from_secs(2), client.inbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(reply.contains("\"tree\""));

        assert!(h.connector.close_channel(1));
        h.session.wait_for(|s| s == SessionState::Registered).await;
    }
}

//! Relay session state machine for the device side.
//!
//! The machine takes events as input and produces a new state plus a list
//! of actions. The device session actor in `ons-device` performs the I/O
//! the actions describe.

/// Session lifecycle - NO I/O, just state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No relay connection. The liveness timer will re-dial.
    Disconnected,
    /// Dial in progress.
    Connecting,
    /// Connected and registered, no peer link.
    Registered,
    /// An offer was accepted and the answer sent; waiting for the data channel.
    PeerLinkPending,
    /// Data channel open, vault sync running.
    PeerLinkEstablished,
    /// Torn down by request. Only `OpenRequested` leaves this state.
    Closed,
}

impl SessionState {
    /// Create a new state machine in the Disconnected state.
    pub fn new() -> Self {
        Self::Disconnected
    }

    /// Process an event and return the new state plus actions to execute.
    pub fn on_event(self, event: Event) -> (Self, Vec<Action>) {
        use SessionState::*;

        match (self, event) {
            // Opening
            (Disconnected | Closed, Event::OpenRequested) => {
                (Connecting, vec![Action::StartLiveness, Action::Dial])
            }
            (Connecting, Event::OpenRequested) => (Connecting, vec![]),
            (Registered | PeerLinkPending | PeerLinkEstablished, Event::OpenRequested) => (
                Connecting,
                vec![
                    Action::TeardownPeerLink,
                    Action::CloseConnection,
                    Action::Dial,
                ],
            ),

            // Dialing
            (Connecting, Event::DialSucceeded) => {
                (Registered, vec![Action::SpawnReadLoop, Action::Register])
            }
            (Connecting, Event::DialFailed) => (Disconnected, vec![]),

            // Liveness
            (Disconnected, Event::LivenessTick { .. }) => (Connecting, vec![Action::Dial]),
            (
                Registered | PeerLinkPending | PeerLinkEstablished,
                Event::LivenessTick { alive: false },
            ) => (Connecting, vec![Action::CloseConnection, Action::Dial]),

            // Relay connection loss. The direct peer link does not depend on it.
            (Registered | PeerLinkPending | PeerLinkEstablished, Event::ConnectionLost) => {
                (Disconnected, vec![Action::CloseConnection])
            }

            // Negotiation
            (Registered | PeerLinkPending | PeerLinkEstablished, Event::OfferReceived) => {
                (PeerLinkPending, vec![Action::Negotiate])
            }
            (PeerLinkPending, Event::ChannelOpened) => {
                (PeerLinkEstablished, vec![Action::StartVaultSync])
            }
            (PeerLinkEstablished, Event::ChannelClosed) => {
                (Registered, vec![Action::StopVaultSync])
            }
            (PeerLinkPending, Event::ChannelClosed) => (Registered, vec![]),

            // Closing
            (Closed, Event::CloseRequested) => (Closed, vec![]),
            (_, Event::CloseRequested) => (
                Closed,
                vec![
                    Action::StopLiveness,
                    Action::TeardownPeerLink,
                    Action::CloseConnection,
                ],
            ),

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// Whether the relay connection is up and registered.
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            Self::Registered | Self::PeerLinkPending | Self::PeerLinkEstablished
        )
    }

    /// Whether a negotiation or data channel is active.
    pub fn has_peer_link(&self) -> bool {
        matches!(self, Self::PeerLinkPending | Self::PeerLinkEstablished)
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Events that drive the session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Caller asked to (re)open the session.
    OpenRequested,
    /// Relay dial succeeded.
    DialSucceeded,
    /// Relay dial failed.
    DialFailed,
    /// The relay connection's read loop ended.
    ConnectionLost,
    /// The liveness timer fired; `alive` is the probe result.
    LivenessTick {
        /// Whether the connection answered the probe
        alive: bool,
    },
    /// An authorized offer arrived.
    OfferReceived,
    /// The current negotiation's data channel opened.
    ChannelOpened,
    /// The current negotiation's data channel closed.
    ChannelClosed,
    /// Caller asked to stop the session.
    CloseRequested,
}

/// Actions for the session actor to execute, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Open the relay connection.
    Dial,
    /// Send the `register` envelope.
    Register,
    /// Start the task reading relay frames.
    SpawnReadLoop,
    /// Close the relay connection.
    CloseConnection,
    /// Discard the current negotiation context.
    TeardownPeerLink,
    /// Hand the offer to the negotiator.
    Negotiate,
    /// Start the vault sync engine on the open channel.
    StartVaultSync,
    /// Stop the vault sync engine.
    StopVaultSync,
    /// Start the liveness timer.
    StartLiveness,
    /// Stop the liveness timer.
    StopLiveness,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registered() -> SessionState {
        let (state, _) = SessionState::new().on_event(Event::OpenRequested);
        let (state, _) = state.on_event(Event::DialSucceeded);
        state
    }

    #[test]
    fn open_dials_and_starts_liveness() {
        let (state, actions) = SessionState::new().on_event(Event::OpenRequested);
        assert_eq!(state, SessionState::Connecting);
        assert_eq!(actions, vec![Action::StartLiveness, Action::Dial]);
    }

    #[test]
    fn dial_success_reads_before_registering() {
        let (state, _) = SessionState::new().on_event(Event::OpenRequested);
        let (state, actions) = state.on_event(Event::DialSucceeded);
        assert_eq!(state, SessionState::Registered);
        assert_eq!(actions, vec![Action::SpawnReadLoop, Action::Register]);
        assert!(state.is_connected());
    }

    #[test]
    fn dial_failure_waits_for_liveness() {
        let (state, _) = SessionState::new().on_event(Event::OpenRequested);
        let (state, actions) = state.on_event(Event::DialFailed);
        assert_eq!(state, SessionState::Disconnected);
        assert!(actions.is_empty());

        let (state, actions) = state.on_event(Event::LivenessTick { alive: false });
        assert_eq!(state, SessionState::Connecting);
        assert_eq!(actions, vec![Action::Dial]);
    }

    #[test]
    fn dead_probe_redials() {
        let (state, actions) = registered().on_event(Event::LivenessTick { alive: false });
        assert_eq!(state, SessionState::Connecting);
        assert_eq!(actions, vec![Action::CloseConnection, Action::Dial]);
    }

    #[test]
    fn live_probe_is_a_no_op() {
        let (state, actions) = registered().on_event(Event::LivenessTick { alive: true });
        assert_eq!(state, SessionState::Registered);
        assert!(actions.is_empty());
    }

    #[test]
    fn connection_loss_then_tick_reconnects() {
        let (state, actions) = registered().on_event(Event::ConnectionLost);
        assert_eq!(state, SessionState::Disconnected);
        assert_eq!(actions, vec![Action::CloseConnection]);

        let (state, _) = state.on_event(Event::LivenessTick { alive: false });
        let (state, actions) = state.on_event(Event::DialSucceeded);
        assert_eq!(state, SessionState::Registered);
        assert_eq!(actions, vec![Action::SpawnReadLoop, Action::Register]);
    }

    #[test]
    fn offer_then_channel_lifecycle() {
        let (state, actions) = registered().on_event(Event::OfferReceived);
        assert_eq!(state, SessionState::PeerLinkPending);
        assert_eq!(actions, vec![Action::Negotiate]);

        let (state, actions) = state.on_event(Event::ChannelOpened);
        assert_eq!(state, SessionState::PeerLinkEstablished);
        assert_eq!(actions, vec![Action::StartVaultSync]);

        // A second offer replaces the link
        let (state, actions) = state.on_event(Event::OfferReceived);
        assert_eq!(state, SessionState::PeerLinkPending);
        assert_eq!(actions, vec![Action::Negotiate]);

        let (state, _) = state.on_event(Event::ChannelOpened);
        let (state, actions) = state.on_event(Event::ChannelClosed);
        assert_eq!(state, SessionState::Registered);
        assert_eq!(actions, vec![Action::StopVaultSync]);
    }

    #[test]
    fn offers_before_registration_are_ignored() {
        let (state, actions) = SessionState::new().on_event(Event::OfferReceived);
        assert_eq!(state, SessionState::Disconnected);
        assert!(actions.is_empty());
    }

    #[test]
    fn reopen_tears_down_existing_session() {
        let (state, _) = registered().on_event(Event::OfferReceived);
        let (state, actions) = state.on_event(Event::OpenRequested);
        assert_eq!(state, SessionState::Connecting);
        assert_eq!(
            actions,
            vec![
                Action::TeardownPeerLink,
                Action::CloseConnection,
                Action::Dial
            ]
        );
    }

    #[test]
    fn close_is_idempotent_and_sticky() {
        let (state, actions) = registered().on_event(Event::CloseRequested);
        assert_eq!(state, SessionState::Closed);
        assert_eq!(
            actions,
            vec![
                Action::StopLiveness,
                Action::TeardownPeerLink,
                Action::CloseConnection
            ]
        );

        let (state, actions) = state.on_event(Event::CloseRequested);
        assert_eq!(state, SessionState::Closed);
        assert!(actions.is_empty());

        let (state, actions) = state.on_event(Event::LivenessTick { alive: false });
        assert_eq!(state, SessionState::Closed);
        assert!(actions.is_empty());

        let (state, _) = state.on_event(Event::OpenRequested);
        assert_eq!(state, SessionState::Connecting);
    }
}

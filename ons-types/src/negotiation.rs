//! Payloads carried by `p2p-exchange` and `p2p-node` envelopes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::EnvelopeError;

/// Kind of session description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    /// Initial proposal from the client
    Offer,
    /// Provisional answer
    Pranswer,
    /// Final answer from the device
    Answer,
    /// Roll back a pending description
    Rollback,
}

/// A session description as browsers serialize it: `{"type":"offer","sdp":"v=0..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Description kind
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    /// SDP body
    pub sdp: String,
}

impl SessionDescription {
    /// An offer description.
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    /// An answer description.
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// A connectivity candidate in `RTCIceCandidateInit` shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// Candidate line
    pub candidate: String,
    /// Media stream id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    /// Media line index
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
    /// ICE username fragment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    /// A candidate with only the candidate line set.
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
            username_fragment: None,
        }
    }

    /// Parse a `p2p-node` payload.
    pub fn from_value(value: &Value) -> Result<Self, EnvelopeError> {
        let candidate: Self =
            serde_json::from_value(value.clone()).map_err(EnvelopeError::Malformed)?;
        if candidate.candidate.is_empty() {
            return Err(EnvelopeError::MissingField("candidate"));
        }
        Ok(candidate)
    }
}

/// Payload of a `p2p-exchange` envelope.
///
/// Clients send a bare description, devices answer with it wrapped under
/// `sdp`, and some clients push candidates through the exchange event too.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DescriptionPayload {
    /// `{"sdp": {"type": ..., "sdp": ...}}`
    Wrapped {
        /// Wrapped description
        sdp: SessionDescription,
    },
    /// `{"type": ..., "sdp": ...}`
    Bare(SessionDescription),
    /// A candidate sent through the exchange event
    Candidate(IceCandidate),
}

impl DescriptionPayload {
    /// Parse a `p2p-exchange` payload.
    pub fn from_value(value: &Value) -> Result<Self, EnvelopeError> {
        serde_json::from_value(value.clone()).map_err(|_| EnvelopeError::InvalidPayload {
            event: "p2p-exchange".to_string(),
            reason: "expected a session description or candidate".to_string(),
        })
    }

    /// The description, if this payload carries one.
    pub fn description(&self) -> Option<&SessionDescription> {
        match self {
            DescriptionPayload::Wrapped { sdp } | DescriptionPayload::Bare(sdp) => Some(sdp),
            DescriptionPayload::Candidate(_) => None,
        }
    }
}

/// The answer a device sends back: always wrapped under `sdp`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerPayload {
    /// Answer description
    pub sdp: SessionDescription,
}

impl AnswerPayload {
    /// Wrap an answer body.
    pub fn new(sdp: impl Into<String>) -> Self {
        Self {
            sdp: SessionDescription::answer(sdp),
        }
    }

    /// Encode as an envelope payload.
    pub fn to_value(&self) -> Result<Value, EnvelopeError> {
        serde_json::to_value(self).map_err(EnvelopeError::Serialization)
    }
}

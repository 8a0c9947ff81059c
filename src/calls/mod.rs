//! Call orchestration for RedPhone secure calls.
//!
//! # Architecture
//!
//! - [`CallService`]: owns the single call slot, provisions the ZID and
//!   applies [`CallState`] transitions from the events calls emit
//! - [`CallManager`]: one task per call attempt; runs signaling, the ZRTP
//!   handshake and the media hand-off, and tears down exactly once
//! - [`SignalingConnector`] / [`SignalingSession`]: the signaling channel,
//!   provided by the embedding application
//! - [`MediaHandler`]: consumes the negotiated keys and transport
//! - [`CallStateListener`]: receives every [`CallEvent`]
//!
//! Each attempt produces exactly one [`CallEventKind::Outcome`].

mod error;
mod listener;
mod manager;
mod media;
mod service;
mod signaling;

pub use error::{CallError, SignalingError};
pub use listener::{CallStateListener, NoopListener, RecordingListener};
pub use manager::{CallContext, CallHandle, CallManager, CallRole};
pub use media::{IdleMedia, MediaHandler, MediaHandoff};
pub use service::{CallService, CallServiceBuilder};
pub use signaling::{ServerSignal, SignalKind, SignalingConnector, SignalingSession};

pub use rpcore::types::CallState;

use rpcore::types::Zid;

/// Whether this call continues a relationship the store remembers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuity {
    /// No retained secrets were held for the peer.
    FirstContact,
    /// A retained secret matched. `verified` is set once both sides have
    /// confirmed the SAS on an earlier call.
    Matched { verified: bool },
    /// Secrets were held but none matched: the peer lost its cache or
    /// someone is in the middle. The SAS must be compared.
    Mismatch,
}

impl Continuity {
    pub fn new(had_retained_secrets: bool, continuity: bool, verified: bool) -> Self {
        match (had_retained_secrets, continuity) {
            (_, true) => Self::Matched { verified },
            (true, false) => Self::Mismatch,
            (false, false) => Self::FirstContact,
        }
    }
}

/// The user-facing result of one call attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    Connected {
        sas: String,
        continuity: Continuity,
        peer_zid: Zid,
    },
    NoSuchUser,
    LoginFailed,
    ServerMessage(String),
    ServerFailure,
    RecipientUnavailable,
    HandshakeFailed,
    /// The incoming session was already over when we tried to pick it up.
    Stale,
    Busy,
    /// Terminated locally, denied, or hung up before the handshake finished.
    Ended,
    ClientFailure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallEvent {
    pub call_id: u64,
    pub kind: CallEventKind,
}

impl CallEvent {
    pub fn new(call_id: u64, kind: CallEventKind) -> Self {
        Self { call_id, kind }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEventKind {
    /// Outgoing call: contacting the signaling server.
    Connecting,
    /// Outgoing call: session created, waiting for the callee to answer.
    WaitingForResponder,
    /// Incoming call: the session is live and ringing locally.
    IncomingRinging { number: String },
    /// Incoming call: answered, opening the media path.
    ConnectingToInitiator,
    /// A signal from the server, forwarded by the signal task.
    Signal(SignalKind),
    Outcome(CallOutcome),
    /// An incoming call that was never answered here.
    MissedCall { number: String },
    /// Emitted by the service after it applied a transition.
    StateChanged(CallState),
    /// The call task has torn down. Always the last event for a call.
    Ended,
}

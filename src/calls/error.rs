//! Call-related error types.

use super::CallOutcome;
use crate::transport::TransportError;
use rpcore::store::StoreError;
use rpcore::types::InvalidTransition;
use rpcore::zrtp::ZrtpError;
use thiserror::Error;

/// Failures reported by the signaling server or the channel to it.
#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("no such user")]
    NoSuchUser,

    #[error("login failed")]
    LoginFailed,

    #[error("server message: {0}")]
    ServerMessage(String),

    /// The session in a push notification has already ended.
    #[error("session is stale")]
    SessionStale,

    #[error("session initiation failed")]
    SessionInitiationFailure,

    #[error("signaling network error: {0}")]
    Network(String),
}

#[derive(Debug, Error)]
pub enum CallError {
    #[error("signaling failed: {0}")]
    Signaling(#[from] SignalingError),

    #[error("handshake failed: {0}")]
    Zrtp(#[from] ZrtpError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid call state transition: {0}")]
    InvalidTransition(#[from] InvalidTransition),

    #[error("another call is in progress")]
    Busy,

    #[error("call terminated")]
    Terminated,

    #[error("not connected")]
    NotConnected,

    #[error("invalid phone number: {0}")]
    InvalidNumber(String),

    #[error("media error: {0}")]
    Media(String),
}

impl CallError {
    /// The single user-facing outcome this failure is reported as.
    pub fn outcome(&self) -> CallOutcome {
        match self {
            Self::Signaling(SignalingError::NoSuchUser) => CallOutcome::NoSuchUser,
            Self::Signaling(SignalingError::LoginFailed) => CallOutcome::LoginFailed,
            Self::Signaling(SignalingError::ServerMessage(msg)) => {
                CallOutcome::ServerMessage(msg.clone())
            }
            Self::Signaling(SignalingError::SessionStale) => CallOutcome::Stale,
            Self::Signaling(_) => CallOutcome::ServerFailure,
            Self::Zrtp(ZrtpError::RecipientUnavailable) => CallOutcome::RecipientUnavailable,
            Self::Zrtp(ZrtpError::Internal(_)) => CallOutcome::ClientFailure,
            Self::Zrtp(_) => CallOutcome::HandshakeFailed,
            Self::InvalidNumber(_) => CallOutcome::NoSuchUser,
            Self::Busy => CallOutcome::Busy,
            Self::Terminated => CallOutcome::Ended,
            Self::Transport(_)
            | Self::Store(_)
            | Self::InvalidTransition(_)
            | Self::NotConnected
            | Self::Media(_) => CallOutcome::ClientFailure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_each_failure_maps_to_one_outcome() {
        let cases = vec![
            (CallError::from(SignalingError::NoSuchUser), CallOutcome::NoSuchUser),
            (CallError::from(SignalingError::LoginFailed), CallOutcome::LoginFailed),
            (
                CallError::from(SignalingError::ServerMessage("upgrade".into())),
                CallOutcome::ServerMessage("upgrade".into()),
            ),
            (CallError::from(SignalingError::SessionStale), CallOutcome::Stale),
            (
                CallError::from(SignalingError::Network("reset".into())),
                CallOutcome::ServerFailure,
            ),
            (
                CallError::from(SignalingError::SessionInitiationFailure),
                CallOutcome::ServerFailure,
            ),
            (
                CallError::from(ZrtpError::RecipientUnavailable),
                CallOutcome::RecipientUnavailable,
            ),
            (
                CallError::from(ZrtpError::NegotiationFailed("timeout".into())),
                CallOutcome::HandshakeFailed,
            ),
            (
                CallError::from(ZrtpError::invalid("bad mac")),
                CallOutcome::HandshakeFailed,
            ),
            (
                CallError::from(ZrtpError::Internal("role")),
                CallOutcome::ClientFailure,
            ),
            (
                CallError::from(TransportError::Closed),
                CallOutcome::ClientFailure,
            ),
            (CallError::Busy, CallOutcome::Busy),
            (CallError::Terminated, CallOutcome::Ended),
        ];

        for (error, expected) in cases {
            assert_eq!(error.outcome(), expected, "{error}");
        }
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where to meet the peer: a relay address plus the signaling session id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionDescriptor {
    pub relay_host: String,
    pub relay_port: u16,
    pub session_id: u64,
}

impl SessionDescriptor {
    pub fn new(relay_host: impl Into<String>, relay_port: u16, session_id: u64) -> Self {
        Self {
            relay_host: relay_host.into(),
            relay_port,
            session_id,
        }
    }

    pub fn relay_address(&self) -> String {
        format!("{}:{}", self.relay_host, self.relay_port)
    }
}

/// State of the single call the client may have in progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub enum CallState {
    #[default]
    Idle,
    /// Outgoing call: signaling and handshake in progress.
    Dialing,
    /// Incoming call: waiting for the user to answer.
    Ringing,
    /// Incoming call answered, handshake in progress.
    Answering,
    Connected { connected_at: DateTime<Utc> },
}

impl CallState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    pub fn can_answer(&self) -> bool {
        matches!(self, Self::Ringing)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallTransition {
    OutgoingStarted,
    IncomingStarted,
    LocalAnswered,
    HandshakeComplete,
    /// Teardown; legal from every state.
    Terminated,
}

impl CallState {
    /// Apply a state transition. Returns error if transition is invalid.
    pub fn apply_transition(&mut self, transition: CallTransition) -> Result<(), InvalidTransition> {
        let new_state = match (&*self, transition) {
            (_, CallTransition::Terminated) => CallState::Idle,
            (CallState::Idle, CallTransition::OutgoingStarted) => CallState::Dialing,
            (CallState::Idle, CallTransition::IncomingStarted) => CallState::Ringing,
            (CallState::Ringing, CallTransition::LocalAnswered) => CallState::Answering,
            (CallState::Dialing | CallState::Answering, CallTransition::HandshakeComplete) => {
                CallState::Connected {
                    connected_at: Utc::now(),
                }
            }
            (current, transition) => {
                return Err(InvalidTransition {
                    current_state: format!("{:?}", current),
                    attempted: format!("{:?}", transition),
                });
            }
        };
        *self = new_state;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct InvalidTransition {
    pub current_state: String,
    pub attempted: String,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid call state transition {} from {}",
            self.attempted, self.current_state
        )
    }
}

impl std::error::Error for InvalidTransition {}

use super::error::CallError;
use crate::terminator::TerminationSignal;
use crate::transport::DatagramTransport;
use async_trait::async_trait;
use rpcore::types::SessionDescriptor;
use rpcore::zrtp::{MediaKeys, Role};
use std::sync::Arc;

/// Everything the media layer needs once the handshake has succeeded.
pub struct MediaHandoff {
    pub peer_number: String,
    pub session: SessionDescriptor,
    pub role: Role,
    /// Oriented for our side: `local` protects what we send.
    pub keys: MediaKeys,
    pub sas: String,
    /// The transport the handshake ran over; SRTP continues on it.
    pub transport: Arc<dyn DatagramTransport>,
}

impl std::fmt::Debug for MediaHandoff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaHandoff")
            .field("peer_number", &self.peer_number)
            .field("session", &self.session)
            .field("role", &self.role)
            .field("keys", &self.keys)
            .finish()
    }
}

#[async_trait]
pub trait MediaHandler: Send + Sync {
    /// Runs the call's media until it ends or `termination` fires.
    async fn run(
        &self,
        handoff: MediaHandoff,
        termination: TerminationSignal,
    ) -> Result<(), CallError>;
}

/// Holds the call open without moving audio until it is terminated.
#[derive(Debug, Default)]
pub struct IdleMedia;

#[async_trait]
impl MediaHandler for IdleMedia {
    async fn run(
        &self,
        handoff: MediaHandoff,
        mut termination: TerminationSignal,
    ) -> Result<(), CallError> {
        log::debug!("Idle media for session {}", handoff.session.session_id);
        termination.terminated().await;
        Ok(())
    }
}

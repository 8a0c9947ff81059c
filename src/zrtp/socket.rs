use crate::calls::CallError;
use crate::config::CallConfig;
use crate::terminator::TerminationSignal;
use crate::transport::DatagramTransport;
use chrono::Utc;
use log::{debug, info, warn};
use rpcore::store::RetainedSecretsStore;
use rpcore::types::Zid;
use rpcore::zrtp::{EngineEvent, HandshakeOutcome, HandshakeState, Role, ZrtpEngine, ZrtpError};
use std::sync::Arc;
use tokio::time::{Duration, Instant, timeout};

/// Larger than any handshake datagram (DHPart with DH3K is 484 bytes).
const RECEIVE_BUFFER_SIZE: usize = 2048;

/// A negotiated call, ready for media.
pub struct SecureCall {
    pub outcome: HandshakeOutcome,
    /// The store had marked this peer verified before the call.
    pub locally_verified: bool,
    pub transport: Arc<dyn DatagramTransport>,
}

/// Runs one ZRTP handshake over a datagram transport.
///
/// Owns the retransmit timer, the per-read timeout and the overall
/// negotiation deadline. Retained secrets are read when the peer Hello
/// names its ZID and written after the handshake completes.
pub struct ZrtpSocket {
    engine: ZrtpEngine,
    transport: Arc<dyn DatagramTransport>,
    config: CallConfig,
    store: Arc<dyn RetainedSecretsStore>,
    peer_number: String,
    termination: TerminationSignal,
    locally_verified: bool,
}

impl ZrtpSocket {
    pub fn new(
        role: Role,
        zid: Zid,
        config: CallConfig,
        transport: Arc<dyn DatagramTransport>,
        store: Arc<dyn RetainedSecretsStore>,
        peer_number: impl Into<String>,
        termination: TerminationSignal,
    ) -> Self {
        Self {
            engine: ZrtpEngine::new(role, zid, config.handshake.clone()),
            transport,
            config,
            store,
            peer_number: peer_number.into(),
            termination,
            locally_verified: false,
        }
    }

    pub async fn negotiate(mut self) -> Result<SecureCall, CallError> {
        let role = self.engine.role();
        info!("Starting ZRTP negotiation as {:?}", role);

        let mut deadline = Instant::now()
            + match role {
                Role::Initiator => self.config.hello_timeout,
                Role::Responder => self.config.negotiation_timeout,
            };
        let mut interval = self.config.retransmit_initial;
        let mut next_retransmit = Instant::now() + interval;

        if let Some(datagram) = self.engine.start() {
            self.send(&datagram).await?;
        }

        let mut buf = vec![0u8; RECEIVE_BUFFER_SIZE];
        while !self.engine.is_complete() {
            if self.termination.is_terminated() {
                return Err(CallError::Terminated);
            }

            let now = Instant::now();
            if now >= deadline {
                warn!("ZRTP negotiation timed out in {:?}", self.engine.state());
                return Err(self.engine.timeout_error().into());
            }

            if now >= next_retransmit {
                if let Some(datagram) = self.engine.retransmit() {
                    debug!("Retransmitting after {:?}", interval);
                    self.send(&datagram).await?;
                }
                interval = (interval * 2).min(self.config.retransmit_max);
                next_retransmit = now + interval;
            }

            let wait = self
                .config
                .read_timeout
                .min(next_retransmit.saturating_duration_since(now))
                .min(deadline.saturating_duration_since(now))
                .max(Duration::from_millis(1));

            let len = tokio::select! {
                _ = self.termination.terminated() => return Err(CallError::Terminated),
                received = timeout(wait, self.transport.recv(&mut buf)) => match received {
                    Err(_) => continue,
                    Ok(Ok(len)) => len,
                    Ok(Err(e)) if e.is_connection_refused() => {
                        return Err(ZrtpError::RecipientUnavailable.into());
                    }
                    Ok(Err(e)) => return Err(e.into()),
                },
            };

            let was_waiting_for_hello = role == Role::Initiator
                && self.engine.state() == HandshakeState::ExpectingHello;

            let step = self.engine.handle(&buf[..len])?;

            if let Some(EngineEvent::PeerHello { zid, .. }) = &step.event {
                self.load_retained_secrets(zid).await?;
            }

            if was_waiting_for_hello && self.engine.state() != HandshakeState::ExpectingHello {
                deadline = Instant::now() + self.config.negotiation_timeout;
            }

            if let Some(datagram) = step.outgoing {
                self.send(&datagram).await?;
                interval = self.config.retransmit_initial;
                next_retransmit = Instant::now() + interval;
            }
        }

        let outcome = self.engine.into_outcome()?;
        info!(
            "ZRTP negotiated with {} using {}, SAS {}",
            outcome.peer_zid, outcome.key_agreement, outcome.sas
        );
        persist_retained_secret(self.store.as_ref(), &self.peer_number, &outcome).await?;

        Ok(SecureCall {
            outcome,
            locally_verified: self.locally_verified,
            transport: self.transport,
        })
    }

    async fn send(&self, datagram: &[u8]) -> Result<(), CallError> {
        self.transport.send(datagram).await.map_err(|e| -> CallError {
            if e.is_connection_refused() {
                ZrtpError::RecipientUnavailable.into()
            } else {
                e.into()
            }
        })
    }

    async fn load_retained_secrets(&mut self, zid: &Zid) -> Result<(), CallError> {
        let secrets = self
            .store
            .get_retained_secrets(&self.peer_number, zid)
            .await?;
        self.locally_verified = self.store.is_verified(&self.peer_number, zid).await?;
        debug!(
            "Loaded retained secrets for {} (empty: {}, verified: {})",
            zid,
            secrets.is_empty(),
            self.locally_verified
        );
        self.engine
            .install_retained_secrets(secrets, self.locally_verified);
        Ok(())
    }
}

/// Stores the new rs1 for the smaller of both sides' cache expiry.
async fn persist_retained_secret(
    store: &dyn RetainedSecretsStore,
    peer_number: &str,
    outcome: &HandshakeOutcome,
) -> Result<(), CallError> {
    let expiration = Utc::now() + chrono::Duration::seconds(i64::from(outcome.cache_expiry_secs));
    store
        .set_retained_secret(
            peer_number,
            &outcome.peer_zid,
            outcome.master_secret.retained_secret(),
            expiration,
            outcome.continuity,
        )
        .await?;
    Ok(())
}

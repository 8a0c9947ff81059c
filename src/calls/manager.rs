//! Call manager: one task per call attempt.

use super::error::CallError;
use super::media::{MediaHandler, MediaHandoff};
use super::signaling::{SignalingConnector, SignalingSession, spawn_signal_processor};
use super::{CallEvent, CallEventKind, CallOutcome, Continuity};
use crate::config::CallConfig;
use crate::terminator::{TerminationSignal, Terminator};
use crate::transport::TransportConnector;
use crate::zrtp::ZrtpSocket;
use log::{debug, error, info, warn};
use rpcore::store::RetainedSecretsStore;
use rpcore::types::{SessionDescriptor, Zid};
use rpcore::zrtp::Role;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Dependencies shared by every call the service places or accepts.
pub struct CallContext {
    pub zid: Zid,
    pub config: CallConfig,
    pub store: Arc<dyn RetainedSecretsStore>,
    pub signaling: Arc<dyn SignalingConnector>,
    pub transports: Arc<dyn TransportConnector>,
    pub media: Arc<dyn MediaHandler>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallRole {
    /// We dial `number`.
    Initiator { number: String },
    /// `number` is calling us on `session`.
    Responder {
        number: String,
        session: SessionDescriptor,
    },
}

impl CallRole {
    pub fn number(&self) -> &str {
        match self {
            Self::Initiator { number } | Self::Responder { number, .. } => number,
        }
    }

    pub fn zrtp_role(&self) -> Role {
        match self {
            Self::Initiator { .. } => Role::Initiator,
            Self::Responder { .. } => Role::Responder,
        }
    }
}

/// Control surface for a running call. Every method is safe to call at any time.
pub struct CallHandle {
    call_id: u64,
    terminator: Terminator,
    peer_busy: Arc<AtomicBool>,
    answer: Mutex<Option<oneshot::Sender<bool>>>,
    task: JoinHandle<()>,
}

impl CallHandle {
    pub fn call_id(&self) -> u64 {
        self.call_id
    }

    /// Delivers the user's decision to a ringing responder.
    /// Returns false if the call was not waiting for one.
    pub fn answer(&self, accept: bool) -> bool {
        let sender = self.answer.lock().ok().and_then(|mut slot| slot.take());
        match sender {
            Some(tx) => tx.send(accept).is_ok(),
            None => false,
        }
    }

    /// Idempotent. A responder still waiting for an answer sees a deny.
    pub fn terminate(&self) {
        if self.terminator.terminate() {
            info!("Terminating call {}", self.call_id);
        }
    }

    /// Ends the call because the callee's side answered busy.
    /// The call then reports `Busy` instead of `Ended`.
    pub fn peer_busy(&self) {
        self.peer_busy.store(true, Ordering::SeqCst);
        self.terminate();
    }

    pub fn is_terminated(&self) -> bool {
        self.terminator.is_terminated()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the call task, including its teardown, to finish.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            error!("Call {} task failed: {}", self.call_id, e);
        }
    }
}

/// Cleanup that runs exactly once when the call task ends, however it ends.
struct Teardown {
    call_id: u64,
    events: mpsc::UnboundedSender<CallEvent>,
    outcome_reported: bool,
    signaling: Option<Arc<dyn SignalingSession>>,
    signal_task: Option<JoinHandle<()>>,
}

impl Teardown {
    fn new(call_id: u64, events: mpsc::UnboundedSender<CallEvent>) -> Self {
        Self {
            call_id,
            events,
            outcome_reported: false,
            signaling: None,
            signal_task: None,
        }
    }

    fn emit(&self, kind: CallEventKind) {
        let _ = self.events.send(CallEvent::new(self.call_id, kind));
    }

    /// Only the first outcome of a call is reported.
    fn report(&mut self, outcome: CallOutcome) {
        if self.outcome_reported {
            debug!(
                "Call {} already reported its outcome; dropping {:?}",
                self.call_id, outcome
            );
            return;
        }
        self.outcome_reported = true;
        info!("Call {} outcome: {:?}", self.call_id, outcome);
        self.emit(CallEventKind::Outcome(outcome));
    }

    fn finish(mut self) {
        if let Some(task) = self.signal_task.take() {
            task.abort();
        }
        if !self.outcome_reported {
            error!("Call {} ended without an outcome", self.call_id);
            self.report(CallOutcome::ClientFailure);
        }
        if let Some(session) = self.signaling.take() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move { session.close().await });
                }
                Err(_) => warn!("No runtime left to close signaling for call {}", self.call_id),
            }
        }
        debug!("Call {} torn down", self.call_id);
        self.emit(CallEventKind::Ended);
    }
}

/// Sequences signaling, the ZRTP handshake and the media hand-off for one call.
pub struct CallManager {
    call_id: u64,
    role: CallRole,
    ctx: Arc<CallContext>,
    events: mpsc::UnboundedSender<CallEvent>,
    termination: TerminationSignal,
    peer_busy: Arc<AtomicBool>,
}

impl CallManager {
    /// Starts the call on its own task.
    ///
    /// Events for the call, ending with exactly one `Outcome` followed by
    /// `Ended`, are sent to `events`.
    pub fn spawn(
        call_id: u64,
        role: CallRole,
        ctx: Arc<CallContext>,
        events: mpsc::UnboundedSender<CallEvent>,
    ) -> CallHandle {
        let (terminator, termination) = Terminator::new();
        let (answer_tx, answer_rx) = oneshot::channel();
        let peer_busy = Arc::new(AtomicBool::new(false));

        let manager = Self {
            call_id,
            role,
            ctx,
            events,
            termination,
            peer_busy: peer_busy.clone(),
        };
        let task = tokio::spawn(manager.run(answer_rx));

        CallHandle {
            call_id,
            terminator,
            peer_busy,
            answer: Mutex::new(Some(answer_tx)),
            task,
        }
    }

    async fn run(self, answer: oneshot::Receiver<bool>) {
        info!(
            "Call {} starting as {:?} with {}",
            self.call_id,
            self.role.zrtp_role(),
            self.role.number()
        );
        let mut teardown = scopeguard::guard(
            Teardown::new(self.call_id, self.events.clone()),
            Teardown::finish,
        );

        if let Err(e) = self.establish(&mut teardown, answer).await {
            teardown.report(self.failure_outcome(e));
        }
    }

    /// Errors raised after termination are reported as the termination.
    fn failure_outcome(&self, e: CallError) -> CallOutcome {
        let e = match e {
            CallError::Terminated => e,
            other if self.termination.is_terminated() => {
                debug!(
                    "Call {} failed after termination: {}",
                    self.call_id, other
                );
                CallError::Terminated
            }
            other => {
                warn!("Call {} failed: {}", self.call_id, other);
                return other.outcome();
            }
        };
        info!("Call {} terminated", self.call_id);
        if self.peer_busy.load(Ordering::SeqCst) {
            CallOutcome::Busy
        } else {
            e.outcome()
        }
    }

    async fn establish(
        &self,
        teardown: &mut Teardown,
        answer: oneshot::Receiver<bool>,
    ) -> Result<(), CallError> {
        let session = match &self.role {
            CallRole::Initiator { number } => {
                teardown.emit(CallEventKind::Connecting);
                self.until_terminated(self.ctx.signaling.initiate(number))
                    .await??
            }
            CallRole::Responder { session, .. } => {
                self.until_terminated(self.ctx.signaling.open(session))
                    .await??
            }
        };
        teardown.signaling = Some(session.clone());
        teardown.signal_task = Some(spawn_signal_processor(
            session.clone(),
            self.call_id,
            self.events.clone(),
        ));
        let descriptor = session.descriptor().clone();

        match &self.role {
            CallRole::Initiator { .. } => teardown.emit(CallEventKind::WaitingForResponder),
            CallRole::Responder { number, .. } => {
                self.until_terminated(session.set_ringing()).await??;
                teardown.emit(CallEventKind::IncomingRinging {
                    number: number.clone(),
                });
                if !self.wait_for_answer(answer).await {
                    info!("Call {} was not answered", self.call_id);
                    return Err(CallError::Terminated);
                }
                teardown.emit(CallEventKind::ConnectingToInitiator);
            }
        }

        let transport = self
            .until_terminated(self.ctx.transports.connect(&descriptor))
            .await??;

        let role = self.role.zrtp_role();
        let socket = ZrtpSocket::new(
            role,
            self.ctx.zid,
            self.ctx.config.clone(),
            transport,
            self.ctx.store.clone(),
            self.role.number(),
            self.termination.clone(),
        );
        let call = socket.negotiate().await?;
        if self.termination.is_terminated() {
            return Err(CallError::Terminated);
        }

        let outcome = &call.outcome;
        let continuity = Continuity::new(
            outcome.had_retained_secrets,
            outcome.continuity,
            call.locally_verified && outcome.peer_sas_verified,
        );
        if continuity == Continuity::Mismatch {
            warn!(
                "Call {}: retained secrets for {} did not match; compare the SAS",
                self.call_id,
                self.role.number()
            );
        }
        teardown.report(CallOutcome::Connected {
            sas: outcome.sas.clone(),
            continuity,
            peer_zid: outcome.peer_zid,
        });

        let handoff = MediaHandoff {
            peer_number: self.role.number().to_string(),
            session: descriptor,
            role,
            keys: outcome.master_secret.media_keys(role),
            sas: outcome.sas.clone(),
            transport: call.transport.clone(),
        };
        self.ctx
            .media
            .run(handoff, self.termination.clone())
            .await
    }

    /// Resolves to `false` on deny, termination, or a dropped handle.
    async fn wait_for_answer(&self, answer: oneshot::Receiver<bool>) -> bool {
        let mut termination = self.termination.clone();
        tokio::select! {
            biased;
            _ = termination.terminated() => false,
            answered = answer => answered.unwrap_or(false),
        }
    }

    async fn until_terminated<F: Future>(&self, future: F) -> Result<F::Output, CallError> {
        let mut termination = self.termination.clone();
        tokio::select! {
            biased;
            _ = termination.terminated() => Err(CallError::Terminated),
            output = future => Ok(output),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calls::error::SignalingError;
    use crate::calls::media::IdleMedia;
    use crate::store::MemoryStore;
    use crate::transport::{StaticConnector, TransportError};
    use async_trait::async_trait;
    use rpcore::zrtp::ZrtpError;

    struct NoServer;

    #[async_trait]
    impl SignalingConnector for NoServer {
        async fn initiate(
            &self,
            _number: &str,
        ) -> Result<Arc<dyn SignalingSession>, SignalingError> {
            Err(SignalingError::Network("offline".into()))
        }

        async fn open(
            &self,
            _session: &SessionDescriptor,
        ) -> Result<Arc<dyn SignalingSession>, SignalingError> {
            Err(SignalingError::Network("offline".into()))
        }
    }

    fn make_manager() -> (CallManager, Terminator) {
        let (terminator, termination) = Terminator::new();
        let (events, _) = mpsc::unbounded_channel();
        let ctx = CallContext {
            zid: Zid::from([1u8; 12]),
            config: CallConfig::default(),
            store: Arc::new(MemoryStore::new()),
            signaling: Arc::new(NoServer),
            transports: Arc::new(StaticConnector::new(Vec::new())),
            media: Arc::new(IdleMedia),
        };
        let manager = CallManager {
            call_id: 1,
            role: CallRole::Initiator {
                number: "+14155550199".to_string(),
            },
            ctx: Arc::new(ctx),
            events,
            termination,
            peer_busy: Arc::new(AtomicBool::new(false)),
        };
        (manager, terminator)
    }

    #[test]
    fn test_failure_before_termination_keeps_its_outcome() {
        let (manager, _terminator) = make_manager();
        assert_eq!(
            manager.failure_outcome(CallError::Transport(TransportError::Closed)),
            CallOutcome::ClientFailure
        );
        assert_eq!(
            manager.failure_outcome(CallError::Zrtp(ZrtpError::invalid("bad mac"))),
            CallOutcome::HandshakeFailed
        );
    }

    #[test]
    fn test_failure_after_termination_is_reported_as_ended() {
        let (manager, terminator) = make_manager();
        terminator.terminate();
        assert_eq!(
            manager.failure_outcome(CallError::Transport(TransportError::Closed)),
            CallOutcome::Ended
        );
        assert_eq!(
            manager.failure_outcome(CallError::Zrtp(ZrtpError::RecipientUnavailable)),
            CallOutcome::Ended
        );
    }

    #[test]
    fn test_busy_peer_reports_busy() {
        let (manager, terminator) = make_manager();
        manager.peer_busy.store(true, Ordering::SeqCst);
        terminator.terminate();
        assert_eq!(manager.failure_outcome(CallError::Terminated), CallOutcome::Busy);
        assert_eq!(
            manager.failure_outcome(CallError::Transport(TransportError::Closed)),
            CallOutcome::Busy
        );
    }
}

//! The call service: one call slot, and the scheduler that applies call events.

use super::error::CallError;
use super::listener::{CallStateListener, NoopListener};
use super::manager::{CallContext, CallHandle, CallManager, CallRole};
use super::media::{IdleMedia, MediaHandler};
use super::signaling::{SignalKind, SignalingConnector};
use super::{CallEvent, CallEventKind, CallOutcome};
use crate::config::ClientConfig;
use crate::store::{FileStore, MemoryStore};
use crate::transport::{TransportConnector, UdpConnector};
use log::{debug, info, warn};
use rpcore::store::{IdentityStore, RetainedSecretsStore, StoreError};
use rpcore::types::{CallState, CallTransition, PhoneNumberFormatter, SessionDescriptor, Zid};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, mpsc, watch};

struct ActiveCall {
    handle: CallHandle,
    number: String,
    declined: bool,
}

#[derive(Default)]
struct ServiceState {
    call_state: CallState,
    active: Option<ActiveCall>,
    /// Peer of the most recent connected call, for SAS confirmation.
    last_connected: Option<(String, Zid)>,
}

pub struct CallServiceBuilder {
    config: ClientConfig,
    signaling: Arc<dyn SignalingConnector>,
    store: Option<Arc<dyn RetainedSecretsStore>>,
    identity: Option<Arc<dyn IdentityStore>>,
    transports: Option<Arc<dyn TransportConnector>>,
    media: Option<Arc<dyn MediaHandler>>,
    listener: Option<Arc<dyn CallStateListener>>,
}

impl CallServiceBuilder {
    pub fn with_store(mut self, store: Arc<dyn RetainedSecretsStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_identity_store(mut self, identity: Arc<dyn IdentityStore>) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn with_transport_connector(mut self, transports: Arc<dyn TransportConnector>) -> Self {
        self.transports = Some(transports);
        self
    }

    pub fn with_media_handler(mut self, media: Arc<dyn MediaHandler>) -> Self {
        self.media = Some(media);
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn CallStateListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Loads or provisions the ZID and starts the event loop.
    ///
    /// Stores left unset default to a `FileStore` under `data_dir`, or to
    /// memory when no directory is configured.
    pub async fn build(self) -> Result<Arc<CallService>, CallError> {
        let (store, identity) = match (self.store, self.identity) {
            (Some(store), Some(identity)) => (store, identity),
            (store, identity) => {
                let (default_store, default_identity) =
                    default_backend(self.config.data_dir.as_deref()).await?;
                (
                    store.unwrap_or(default_store),
                    identity.unwrap_or(default_identity),
                )
            }
        };

        let zid = match identity.load_zid().await? {
            Some(zid) => zid,
            None => {
                let zid = Zid::generate();
                identity.store_zid(&zid).await?;
                info!("Provisioned new ZID {}", zid);
                zid
            }
        };

        let ctx = Arc::new(CallContext {
            zid,
            config: self.config.call.clone(),
            store,
            signaling: self.signaling,
            transports: self
                .transports
                .unwrap_or_else(|| Arc::new(UdpConnector::new())),
            media: self.media.unwrap_or_else(|| Arc::new(IdleMedia)),
        });

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(CallState::Idle);
        let service = Arc::new(CallService {
            ctx,
            formatter: PhoneNumberFormatter::new(self.config.local_number.clone()),
            listener: self.listener.unwrap_or_else(|| Arc::new(NoopListener)),
            events: events_tx,
            state_tx,
            inner: Mutex::new(ServiceState::default()),
            next_call_id: AtomicU64::new(1),
        });

        tokio::spawn(CallService::run_event_loop(
            Arc::downgrade(&service),
            events_rx,
        ));
        Ok(service)
    }
}

type Backend = (Arc<dyn RetainedSecretsStore>, Arc<dyn IdentityStore>);

async fn default_backend(data_dir: Option<&std::path::Path>) -> Result<Backend, CallError> {
    match data_dir {
        Some(dir) => {
            let store = Arc::new(FileStore::new(dir).await.map_err(StoreError::Io)?);
            let retained: Arc<dyn RetainedSecretsStore> = store.clone();
            let identity: Arc<dyn IdentityStore> = store;
            Ok((retained, identity))
        }
        None => {
            let store = Arc::new(MemoryStore::new());
            let retained: Arc<dyn RetainedSecretsStore> = store.clone();
            let identity: Arc<dyn IdentityStore> = store;
            Ok((retained, identity))
        }
    }
}

/// Places and accepts calls, one at a time.
///
/// Call tasks and their signal processors never touch call state; they send
/// events that the service's event loop applies in order before passing
/// them to the listener.
pub struct CallService {
    ctx: Arc<CallContext>,
    formatter: PhoneNumberFormatter,
    listener: Arc<dyn CallStateListener>,
    events: mpsc::UnboundedSender<CallEvent>,
    state_tx: watch::Sender<CallState>,
    inner: Mutex<ServiceState>,
    next_call_id: AtomicU64,
}

impl CallService {
    pub fn builder(
        config: ClientConfig,
        signaling: Arc<dyn SignalingConnector>,
    ) -> CallServiceBuilder {
        CallServiceBuilder {
            config,
            signaling,
            store: None,
            identity: None,
            transports: None,
            media: None,
            listener: None,
        }
    }

    pub fn zid(&self) -> &Zid {
        &self.ctx.zid
    }

    pub async fn state(&self) -> CallState {
        self.inner.lock().await.call_state.clone()
    }

    /// Follows every state the service applies.
    pub fn subscribe_state(&self) -> watch::Receiver<CallState> {
        self.state_tx.subscribe()
    }

    /// Starts an outgoing call. Fails with `Busy` unless idle.
    pub async fn place_call(&self, number: &str) -> Result<u64, CallError> {
        let number = self.formatter.format_number(number);
        if !PhoneNumberFormatter::is_valid_number(&number) {
            return Err(CallError::InvalidNumber(number));
        }

        let mut inner = self.inner.lock().await;
        if inner.active.is_some() || !inner.call_state.is_idle() {
            info!("Refusing outgoing call to {}: busy", number);
            return Err(CallError::Busy);
        }
        inner
            .call_state
            .apply_transition(CallTransition::OutgoingStarted)?;

        let call_id = self.next_call_id();
        let handle = CallManager::spawn(
            call_id,
            CallRole::Initiator {
                number: number.clone(),
            },
            self.ctx.clone(),
            self.events.clone(),
        );
        inner.active = Some(ActiveCall {
            handle,
            number,
            declined: false,
        });
        self.publish_state(&inner.call_state);
        Ok(call_id)
    }

    /// Handles a call announced by the server.
    ///
    /// While another call is active the new session gets a busy reply, the
    /// listener is told about a missed call, and `Busy` is returned.
    pub async fn incoming_call(
        &self,
        number: &str,
        session: SessionDescriptor,
    ) -> Result<u64, CallError> {
        let number = self.formatter.format_number(number);
        let call_id = self.next_call_id();

        let mut inner = self.inner.lock().await;
        if inner.active.is_some() || !inner.call_state.is_idle() {
            drop(inner);
            info!(
                "Busy; rejecting incoming call from {} (session {})",
                number, session.session_id
            );
            self.send_busy(&session).await;
            let _ = self
                .events
                .send(CallEvent::new(call_id, CallEventKind::MissedCall { number }));
            return Err(CallError::Busy);
        }
        inner
            .call_state
            .apply_transition(CallTransition::IncomingStarted)?;

        let handle = CallManager::spawn(
            call_id,
            CallRole::Responder {
                number: number.clone(),
                session,
            },
            self.ctx.clone(),
            self.events.clone(),
        );
        inner.active = Some(ActiveCall {
            handle,
            number,
            declined: false,
        });
        self.publish_state(&inner.call_state);
        Ok(call_id)
    }

    /// The user's answer to the ringing call.
    pub async fn answer(&self, accept: bool) -> Result<(), CallError> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let active = inner.active.as_mut().ok_or(CallError::NotConnected)?;
        if !inner.call_state.can_answer() {
            return Err(CallError::InvalidTransition(
                rpcore::types::InvalidTransition {
                    current_state: format!("{:?}", inner.call_state),
                    attempted: "answer".to_string(),
                },
            ));
        }

        if accept {
            inner
                .call_state
                .apply_transition(CallTransition::LocalAnswered)?;
        } else {
            active.declined = true;
        }
        if !active.handle.answer(accept) {
            warn!("Call {} was no longer waiting for an answer", active.handle.call_id());
        }
        if accept {
            self.publish_state(&inner.call_state);
        }
        Ok(())
    }

    /// Ends the current call, if any. Safe to call repeatedly and from any state.
    pub async fn terminate(&self) {
        if let Some(active) = &self.inner.lock().await.active {
            active.handle.terminate();
        }
    }

    /// Records that the user compared the SAS of the last connected call.
    pub async fn mark_sas_verified(&self) -> Result<(), CallError> {
        let (number, zid) = self
            .inner
            .lock()
            .await
            .last_connected
            .clone()
            .ok_or(CallError::NotConnected)?;
        self.ctx.store.set_verified(&number, &zid).await?;
        info!("Marked SAS verified for {} ({})", number, zid);
        Ok(())
    }

    fn next_call_id(&self) -> u64 {
        self.next_call_id.fetch_add(1, Ordering::SeqCst)
    }

    async fn send_busy(&self, session: &SessionDescriptor) {
        match self.ctx.signaling.open(session).await {
            Ok(signaling) => {
                if let Err(e) = signaling.set_busy().await {
                    warn!("Failed to send busy for session {}: {}", session.session_id, e);
                }
                signaling.close().await;
            }
            Err(e) => warn!("Could not open session {} to send busy: {}", session.session_id, e),
        }
    }

    fn publish_state(&self, state: &CallState) {
        self.state_tx.send_replace(state.clone());
        self.listener
            .on_call_event(&CallEvent::new(0, CallEventKind::StateChanged(state.clone())));
    }

    async fn run_event_loop(service: Weak<Self>, mut events: mpsc::UnboundedReceiver<CallEvent>) {
        while let Some(event) = events.recv().await {
            let Some(service) = service.upgrade() else {
                break;
            };
            service.apply(event).await;
        }
        debug!("Call service event loop stopped");
    }

    async fn apply(&self, event: CallEvent) {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let is_current = inner
            .active
            .as_ref()
            .is_some_and(|active| active.handle.call_id() == event.call_id);

        let mut state_changed = false;
        let mut missed = None;

        if is_current {
            match &event.kind {
                CallEventKind::Signal(SignalKind::Hangup) => {
                    if let Some(active) = &inner.active {
                        info!("Remote hung up call {}", event.call_id);
                        active.handle.terminate();
                    }
                }
                CallEventKind::Signal(SignalKind::Busy) => {
                    if let Some(active) = &inner.active {
                        info!("Call {} to {} is busy", event.call_id, active.number);
                        active.handle.peer_busy();
                    }
                }
                CallEventKind::Outcome(CallOutcome::Connected { peer_zid, .. }) => {
                    match inner
                        .call_state
                        .apply_transition(CallTransition::HandshakeComplete)
                    {
                        Ok(()) => state_changed = true,
                        Err(e) => warn!("Ignoring connect for call {}: {}", event.call_id, e),
                    }
                    if let Some(active) = &inner.active {
                        inner.last_connected = Some((active.number.clone(), *peer_zid));
                    }
                }
                CallEventKind::Ended => {
                    if let Some(active) = inner.active.take() {
                        if inner.call_state.can_answer() && !active.declined {
                            missed = Some(active.number);
                        }
                    }
                    // Terminated is legal from every state.
                    let _ = inner.call_state.apply_transition(CallTransition::Terminated);
                    state_changed = true;
                }
                _ => {}
            }
        }

        let state = inner.call_state.clone();
        drop(guard);

        self.listener.on_call_event(&event);
        if let Some(number) = missed {
            self.listener.on_call_event(&CallEvent::new(
                event.call_id,
                CallEventKind::MissedCall { number },
            ));
        }
        if state_changed {
            self.publish_state(&state);
        }
    }
}

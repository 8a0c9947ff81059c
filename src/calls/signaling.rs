//! The signaling channel a call uses to set up and monitor its session.
//!
//! The wire protocol belongs to the embedding application. Calls only need
//! a session descriptor and the stream of server signals that follows.

use super::error::SignalingError;
use super::{CallEvent, CallEventKind};
use async_trait::async_trait;
use log::{debug, warn};
use rpcore::types::SessionDescriptor;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Hangup,
    Ringing,
    Busy,
    KeepAlive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSignal {
    pub session_id: u64,
    pub kind: SignalKind,
}

impl ServerSignal {
    pub fn new(session_id: u64, kind: SignalKind) -> Self {
        Self { session_id, kind }
    }

    /// Keep-alives are not tied to a session; everything else must match ours.
    pub fn concerns(&self, session_id: u64) -> bool {
        self.kind == SignalKind::KeepAlive || self.session_id == session_id
    }
}

#[async_trait]
pub trait SignalingConnector: Send + Sync {
    /// Asks the server to set up a call to `number`.
    async fn initiate(&self, number: &str) -> Result<Arc<dyn SignalingSession>, SignalingError>;

    /// Attaches to a session announced by a push notification.
    async fn open(
        &self,
        session: &SessionDescriptor,
    ) -> Result<Arc<dyn SignalingSession>, SignalingError>;
}

#[async_trait]
pub trait SignalingSession: Send + Sync {
    fn descriptor(&self) -> &SessionDescriptor;

    async fn set_ringing(&self) -> Result<(), SignalingError>;

    async fn set_busy(&self) -> Result<(), SignalingError>;

    /// Blocks until the server pushes the next signal.
    async fn read_signal(&self) -> Result<ServerSignal, SignalingError>;

    /// Acknowledges the signal last returned by `read_signal`.
    async fn acknowledge(&self) -> Result<(), SignalingError>;

    async fn close(&self);
}

/// Forwards server signals for one call to the service's event loop.
///
/// The task never touches call state itself. A read error is reported as a
/// hangup, since the session can no longer be monitored.
pub(crate) fn spawn_signal_processor(
    session: Arc<dyn SignalingSession>,
    call_id: u64,
    events: mpsc::UnboundedSender<CallEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let session_id = session.descriptor().session_id;
        loop {
            let signal = match session.read_signal().await {
                Ok(signal) => signal,
                Err(e) => {
                    warn!("Signaling read failed for session {}: {}", session_id, e);
                    let _ = events.send(CallEvent::new(
                        call_id,
                        CallEventKind::Signal(SignalKind::Hangup),
                    ));
                    return;
                }
            };

            if !signal.concerns(session_id) {
                debug!(
                    "Dropping {:?} for session {} (ours is {})",
                    signal.kind, signal.session_id, session_id
                );
            } else if signal.kind == SignalKind::KeepAlive {
                debug!("Received keep-alive for session {}", session_id);
            } else if events
                .send(CallEvent::new(call_id, CallEventKind::Signal(signal.kind)))
                .is_err()
            {
                return;
            }

            if let Err(e) = session.acknowledge().await {
                warn!("Failed to acknowledge signal: {}", e);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedSession {
        descriptor: SessionDescriptor,
        script: Mutex<Vec<Result<ServerSignal, SignalingError>>>,
        acks: AtomicUsize,
    }

    #[async_trait]
    impl SignalingSession for ScriptedSession {
        fn descriptor(&self) -> &SessionDescriptor {
            &self.descriptor
        }
        async fn set_ringing(&self) -> Result<(), SignalingError> {
            Ok(())
        }
        async fn set_busy(&self) -> Result<(), SignalingError> {
            Ok(())
        }
        async fn read_signal(&self) -> Result<ServerSignal, SignalingError> {
            let next = self.script.lock().unwrap().pop();
            next.unwrap_or(Err(SignalingError::Network("closed".into())))
        }
        async fn acknowledge(&self) -> Result<(), SignalingError> {
            self.acks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn close(&self) {}
    }

    #[tokio::test]
    async fn test_signal_processor_filters_and_reports_disconnect() {
        let mut script = vec![
            Ok(ServerSignal::new(7, SignalKind::Ringing)),
            Ok(ServerSignal::new(99, SignalKind::Hangup)),
            Ok(ServerSignal::new(0, SignalKind::KeepAlive)),
            Ok(ServerSignal::new(7, SignalKind::Busy)),
        ];
        script.reverse();
        let session = Arc::new(ScriptedSession {
            descriptor: SessionDescriptor::new("relay", 1, 7),
            script: Mutex::new(script),
            acks: AtomicUsize::new(0),
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        spawn_signal_processor(session.clone(), 3, tx).await.unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            assert_eq!(event.call_id, 3);
            kinds.push(event.kind);
        }
        assert_eq!(
            kinds,
            vec![
                CallEventKind::Signal(SignalKind::Ringing),
                CallEventKind::Signal(SignalKind::Busy),
                // The read error at the end of the script.
                CallEventKind::Signal(SignalKind::Hangup),
            ]
        );
        assert_eq!(session.acks.load(Ordering::SeqCst), 4);
    }
}

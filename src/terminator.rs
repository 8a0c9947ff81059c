use std::sync::Arc;
use tokio::sync::watch;

/// Owner side of a call's termination flag. Cloned handles share one flag.
#[derive(Clone)]
pub struct Terminator {
    tx: Arc<watch::Sender<bool>>,
}

/// Observer side, checked by every blocking step of a call.
#[derive(Clone)]
pub struct TerminationSignal {
    rx: watch::Receiver<bool>,
}

impl Terminator {
    pub fn new() -> (Self, TerminationSignal) {
        let (tx, rx) = watch::channel(false);
        (Self { tx: Arc::new(tx) }, TerminationSignal { rx })
    }

    /// Sets the flag. Returns true only for the call that actually flipped it.
    pub fn terminate(&self) -> bool {
        self.tx.send_if_modified(|terminated| {
            if *terminated {
                false
            } else {
                *terminated = true;
                true
            }
        })
    }

    pub fn is_terminated(&self) -> bool {
        *self.tx.borrow()
    }
}

impl TerminationSignal {
    pub fn is_terminated(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the flag is set. Never resolves if every `Terminator` is dropped first.
    pub async fn terminated(&mut self) {
        if self.rx.wait_for(|terminated| *terminated).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

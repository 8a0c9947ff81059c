use super::CallEvent;
use std::sync::Mutex;

/// Receives every call event after the service has applied it.
///
/// Invoked from the service's event loop; implementations must not block.
pub trait CallStateListener: Send + Sync {
    fn on_call_event(&self, event: &CallEvent);
}

/// Drops every event.
pub struct NoopListener;

impl CallStateListener for NoopListener {
    fn on_call_event(&self, _event: &CallEvent) {}
}

/// Keeps every event in order; handy for tests and diagnostics.
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<CallEvent>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<CallEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl CallStateListener for RecordingListener {
    fn on_call_event(&self, event: &CallEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

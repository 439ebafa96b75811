use std::sync::Arc;

use crate::session::{CallStatus, EndReason};

/// Events emitted by the call engine to UI listeners.
#[derive(Debug, Clone)]
pub enum CallEvent {
    StateChanged(CallStatus),
    RemoteTrackAdded { track_id: String, kind: TrackKind },
    MuteChanged(bool),
    VideoChanged(bool),
    /// The signaling socket dropped while a call was active.
    SignalingLost,
    /// Terminal error (media, negotiation, timeout). The call is over;
    /// a `CallEnded` follows.
    CallFailed { message: String },
    CallEnded(EndReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// Receives engine events. Called from tokio tasks, so implementations
/// must be `Send + Sync` and should not block.
pub trait CallEventListener: Send + Sync {
    fn on_event(&self, event: CallEvent);
}

/// Fans events out to every registered listener. Cheap to clone; clones
/// share the listener set.
#[derive(Clone)]
pub struct EventEmitter {
    listeners: Arc<std::sync::RwLock<Vec<Arc<dyn CallEventListener>>>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(std::sync::RwLock::new(Vec::new())),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn CallEventListener>) {
        self.listeners.write().unwrap().push(listener);
    }

    pub fn emit(&self, event: CallEvent) {
        let listeners = self.listeners.read().unwrap();
        for listener in listeners.iter() {
            listener.on_event(event.clone());
        }
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

use std::time::Instant;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallType {
    Voice,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallDirection {
    Incoming,
    Outgoing,
}

/// Lifecycle of a call attempt. `Ended` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Ringing,
    Connecting,
    Connected,
    Ended,
}

/// Why a call ended. Travels on the wire in `end-call` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    UserEnded,
    Cancelled,
    Rejected,
    Timeout,
    ConnectionLost,
    MediaFailed,
    RemoteEnded,
}

/// One call attempt. Owned exclusively by the call engine; created on
/// dial or on an incoming-call notification, never reused.
#[derive(Debug, Clone)]
pub struct CallSession {
    pub call_id: Uuid,
    pub chat_id: String,
    pub local_user_id: String,
    pub remote_user_id: String,
    pub call_type: CallType,
    pub direction: CallDirection,
    status: CallStatus,
    pub started_at: Option<Instant>,
    pub end_reason: Option<EndReason>,
}

impl CallSession {
    pub fn outgoing(
        chat_id: impl Into<String>,
        local_user_id: impl Into<String>,
        remote_user_id: impl Into<String>,
        call_type: CallType,
    ) -> Self {
        Self::new(
            Uuid::new_v4(),
            chat_id,
            local_user_id,
            remote_user_id,
            call_type,
            CallDirection::Outgoing,
        )
    }

    /// An incoming call carries the id assigned by the backend notification.
    pub fn incoming(
        call_id: Uuid,
        chat_id: impl Into<String>,
        local_user_id: impl Into<String>,
        remote_user_id: impl Into<String>,
        call_type: CallType,
    ) -> Self {
        Self::new(
            call_id,
            chat_id,
            local_user_id,
            remote_user_id,
            call_type,
            CallDirection::Incoming,
        )
    }

    fn new(
        call_id: Uuid,
        chat_id: impl Into<String>,
        local_user_id: impl Into<String>,
        remote_user_id: impl Into<String>,
        call_type: CallType,
        direction: CallDirection,
    ) -> Self {
        Self {
            call_id,
            chat_id: chat_id.into(),
            local_user_id: local_user_id.into(),
            remote_user_id: remote_user_id.into(),
            call_type,
            direction,
            status: CallStatus::Ringing,
            started_at: None,
            end_reason: None,
        }
    }

    pub fn status(&self) -> CallStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status != CallStatus::Ended
    }

    /// Advance to a non-terminal state. Returns false (and leaves the
    /// session untouched) if the session has already ended or the
    /// transition is a no-op.
    pub fn advance(&mut self, to: CallStatus) -> bool {
        if self.status == CallStatus::Ended || self.status == to {
            return false;
        }
        if to == CallStatus::Connected && self.started_at.is_none() {
            self.started_at = Some(Instant::now());
        }
        self.status = to;
        true
    }

    /// Move to `Ended`. The first call wins; later calls return false so
    /// racing teardown paths run exactly once.
    pub fn end(&mut self, reason: EndReason) -> bool {
        if self.status == CallStatus::Ended {
            return false;
        }
        self.status = CallStatus::Ended;
        self.end_reason = Some(reason);
        true
    }
}

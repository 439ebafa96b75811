use serde::{Deserialize, Serialize};

use crate::errors::CallError;
use crate::session::EndReason;

/// An ICE candidate as carried on the wire. Field names follow the
/// WebRTC JSON convention so peers on any platform can apply them
/// without translation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default)]
    pub sdp_m_line_index: Option<u16>,
}

/// Control messages exchanged over the signaling channel.
///
/// Wire shape: a flat JSON object with a `type` tag, e.g.
/// `{"type":"offer","chatId":"c1","from":"alice","to":"bob","sdp":"..."}`.
/// There is no version field; unknown tags fail to parse and the
/// transport drops the frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum SignalMessage {
    /// Announces presence in a call context. Sent once when the
    /// signaling channel opens.
    Join { chat_id: String, user_id: String },
    Offer {
        chat_id: String,
        from: String,
        to: String,
        sdp: String,
    },
    Answer {
        chat_id: String,
        from: String,
        to: String,
        sdp: String,
    },
    IceCandidate {
        chat_id: String,
        from: String,
        to: String,
        candidate: IceCandidate,
    },
    /// The callee accepted; the caller may now start the offer exchange.
    CallAccepted { chat_id: String, from: String },
    CallRejected {
        chat_id: String,
        from: String,
        reason: EndReason,
    },
    EndCall {
        chat_id: String,
        from: String,
        reason: EndReason,
    },
    UserJoined { chat_id: String, user_id: String },
    UserLeft { chat_id: String, user_id: String },
}

impl SignalMessage {
    /// The chat this message belongs to, used for routing.
    pub fn chat_id(&self) -> &str {
        match self {
            SignalMessage::Join { chat_id, .. }
            | SignalMessage::Offer { chat_id, .. }
            | SignalMessage::Answer { chat_id, .. }
            | SignalMessage::IceCandidate { chat_id, .. }
            | SignalMessage::CallAccepted { chat_id, .. }
            | SignalMessage::CallRejected { chat_id, .. }
            | SignalMessage::EndCall { chat_id, .. }
            | SignalMessage::UserJoined { chat_id, .. }
            | SignalMessage::UserLeft { chat_id, .. } => chat_id,
        }
    }

    pub fn parse(text: &str) -> Result<Self, CallError> {
        serde_json::from_str(text).map_err(|e| CallError::InvalidMessage(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, CallError> {
        serde_json::to_string(self).map_err(|e| CallError::InvalidMessage(e.to_string()))
    }
}

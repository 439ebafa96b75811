use thiserror::Error;

#[derive(Debug, Error)]
pub enum CallError {
    #[error("camera/microphone permission denied: {0}")]
    PermissionDenied(String),
    #[error("media failure: {0}")]
    MediaFailed(String),
    #[error("signaling unavailable: {0}")]
    SignalingUnavailable(String),
    #[error("negotiation failed: {0}")]
    NegotiationFailed(String),
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("http error: {0}")]
    Http(String),
    #[error("invalid signaling message: {0}")]
    InvalidMessage(String),
    #[error("a call is already in progress")]
    CallInProgress,
    #[error("operation not valid in current call state: {0}")]
    InvalidState(&'static str),
}

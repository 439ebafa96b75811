//! Ringline call engine.
//!
//! Pure Rust crate with no platform dependencies: signaling channel,
//! call state machine, media session bookkeeping, ring supervision.
//! Media capture and peer connections are provided by a backend crate
//! implementing the traits in [`media`].

pub mod backend;
pub mod config;
pub mod engine;
pub mod errors;
pub mod events;
pub mod media;
pub mod ring;
pub mod session;
pub mod signaling;
pub mod transport;

pub use engine::CallEngine;
pub use errors::CallError;
pub use events::CallEvent;
pub use session::{CallDirection, CallSession, CallStatus, CallType, EndReason};
pub use signaling::SignalMessage;

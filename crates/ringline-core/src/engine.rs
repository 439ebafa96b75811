use std::sync::{Arc, Weak};

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::backend::AcceptanceNotifier;
use crate::config::CallConfig;
use crate::errors::CallError;
use crate::events::{CallEvent, CallEventListener, EventEmitter};
use crate::media::{
    CameraFacing, LinkState, MediaBackend, MediaSession, PeerLinkCallbacks, RemoteTrack,
};
use crate::ring::{RingSupervisor, TonePlayer};
use crate::session::{CallDirection, CallSession, CallStatus, CallType, EndReason};
use crate::signaling::SignalMessage;
use crate::transport::{ChannelNotice, SignalingPort};

struct EngineState {
    session: Option<CallSession>,
    media: Option<Arc<MediaSession>>,
    /// Bumped on every new session and on teardown. Spawned waits and
    /// backend callbacks carry the generation they were created under
    /// and become no-ops once it is stale.
    generation: u64,
}

/// The call state machine.
///
/// Owns the (single) `CallSession`, drives `Ringing -> Connecting ->
/// Connected -> Ended`, and mediates between the signaling channel, the
/// media backend, the ring supervisor, and the backend REST API.
///
/// All handlers serialize on one internal lock and run to completion
/// before the next one is dispatched, so signaling messages are
/// processed strictly in arrival order.
pub struct CallEngine {
    me: Weak<CallEngine>,
    config: CallConfig,
    local_user_id: String,
    signaling: Arc<dyn SignalingPort>,
    media_backend: Arc<dyn MediaBackend>,
    notifier: Arc<dyn AcceptanceNotifier>,
    emitter: EventEmitter,
    ring: RingSupervisor,
    state: Mutex<EngineState>,
}

impl CallEngine {
    pub fn new(
        config: CallConfig,
        local_user_id: impl Into<String>,
        signaling: Arc<dyn SignalingPort>,
        media_backend: Arc<dyn MediaBackend>,
        notifier: Arc<dyn AcceptanceNotifier>,
        tones: Arc<dyn TonePlayer>,
    ) -> Arc<Self> {
        let ring = RingSupervisor::new(config.ring_timeout(), tones);
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            config,
            local_user_id: local_user_id.into(),
            signaling,
            media_backend,
            notifier,
            emitter: EventEmitter::new(),
            ring,
            state: Mutex::new(EngineState {
                session: None,
                media: None,
                generation: 0,
            }),
        })
    }

    pub fn add_listener(&self, listener: Arc<dyn CallEventListener>) {
        self.emitter.add_listener(listener);
    }

    /// Forward signaling inbox notices to the engine, preserving order.
    pub fn drive(self: Arc<Self>, mut inbox: mpsc::UnboundedReceiver<ChannelNotice>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(notice) = inbox.recv().await {
                self.handle_notice(notice).await;
            }
        })
    }

    pub async fn status(&self) -> Option<CallStatus> {
        self.state.lock().await.session.as_ref().map(|s| s.status())
    }

    pub async fn session(&self) -> Option<CallSession> {
        self.state.lock().await.session.clone()
    }

    /// Start an outgoing call: ring locally and wait for the remote
    /// side's explicit `call-accepted` before any offer exchange.
    pub async fn dial(
        &self,
        chat_id: &str,
        remote_user_id: &str,
        call_type: CallType,
    ) -> Result<Uuid, CallError> {
        let mut st = self.state.lock().await;
        if st.session.as_ref().is_some_and(|s| s.is_active()) {
            return Err(CallError::CallInProgress);
        }

        let session =
            CallSession::outgoing(chat_id, &self.local_user_id, remote_user_id, call_type);
        let call_id = session.call_id;
        tracing::info!("dialing {remote_user_id} in {chat_id} ({call_type:?}), call {call_id}");

        st.generation += 1;
        st.media = Some(Arc::new(MediaSession::new(self.media_backend.clone())));
        st.session = Some(session);
        self.start_ring(st.generation, CallDirection::Outgoing);
        self.emitter.emit(CallEvent::StateChanged(CallStatus::Ringing));
        Ok(call_id)
    }

    /// Register an incoming call from a backend notification and start
    /// ringing. The call connects only on an explicit local `answer`.
    pub async fn incoming(
        &self,
        call_id: Uuid,
        chat_id: &str,
        remote_user_id: &str,
        call_type: CallType,
    ) -> Result<(), CallError> {
        let mut st = self.state.lock().await;
        if st.session.as_ref().is_some_and(|s| s.is_active()) {
            return Err(CallError::CallInProgress);
        }

        tracing::info!("incoming call {call_id} from {remote_user_id} in {chat_id}");
        st.generation += 1;
        st.media = Some(Arc::new(MediaSession::new(self.media_backend.clone())));
        st.session = Some(CallSession::incoming(
            call_id,
            chat_id,
            &self.local_user_id,
            remote_user_id,
            call_type,
        ));
        self.start_ring(st.generation, CallDirection::Incoming);
        self.emitter.emit(CallEvent::StateChanged(CallStatus::Ringing));
        Ok(())
    }

    /// Answer a ringing incoming call. Stops the ringtone, acquires
    /// local media and the peer link, and only then notifies the
    /// backend of acceptance, so an inbound offer arriving right after
    /// the acceptance broadcast always finds the link in place.
    ///
    /// Precondition violations return an error; failures after the
    /// transition surface as `CallFailed`/`CallEnded` events.
    pub async fn answer(&self, facing: CameraFacing) -> Result<(), CallError> {
        let mut st = self.state.lock().await;
        let (gen, call_id, call_type, remote, chat) = {
            let session = st
                .session
                .as_ref()
                .ok_or(CallError::InvalidState("no active call"))?;
            if session.direction != CallDirection::Incoming
                || session.status() != CallStatus::Ringing
            {
                return Err(CallError::InvalidState("answer requires a ringing incoming call"));
            }
            (
                st.generation,
                session.call_id,
                session.call_type,
                session.remote_user_id.clone(),
                session.chat_id.clone(),
            )
        };

        self.ring.cancel();
        self.advance_locked(&mut st, CallStatus::Connecting);

        let Some(media) = st.media.clone() else {
            return Err(CallError::InvalidState("no media session"));
        };

        let ready = tokio::time::timeout(self.config.ready_timeout(), async {
            media.ensure_local_media(call_type, facing).await?;
            media
                .ensure_peer_link(&remote, self.link_callbacks(gen, &chat, &remote))
                .await
                .map(|_| ())
        })
        .await;
        match ready {
            Err(_) => {
                self.fail_locked(&mut st, CallError::Timeout("media readiness")).await;
                return Ok(());
            }
            Ok(Err(e)) => {
                self.fail_locked(&mut st, e).await;
                return Ok(());
            }
            Ok(Ok(())) => {}
        }

        // Peer link exists; the backend may now broadcast acceptance.
        if let Err(e) = self.notifier.notify_answer(call_id, true).await {
            self.fail_locked(&mut st, e).await;
        }
        Ok(())
    }

    /// Reject a ringing incoming call without ever entering `Connecting`.
    pub async fn reject(&self) -> Result<(), CallError> {
        let mut st = self.state.lock().await;
        let (call_id, chat) = {
            let session = st
                .session
                .as_ref()
                .ok_or(CallError::InvalidState("no active call"))?;
            if session.direction != CallDirection::Incoming
                || session.status() != CallStatus::Ringing
            {
                return Err(CallError::InvalidState("reject requires a ringing incoming call"));
            }
            (session.call_id, session.chat_id.clone())
        };

        self.ring.cancel();
        if let Err(e) = self.notifier.notify_answer(call_id, false).await {
            tracing::warn!("backend reject notification failed: {e}");
        }
        let msg = SignalMessage::CallRejected {
            chat_id: chat,
            from: self.local_user_id.clone(),
            reason: EndReason::Rejected,
        };
        self.signaling.send(&msg).await;
        self.finish_locked(&mut st, EndReason::Rejected).await;
        Ok(())
    }

    /// Hang up the active call: `user_ended` once connected, `cancelled`
    /// while still ringing or connecting.
    pub async fn hang_up(&self) -> Result<(), CallError> {
        let mut st = self.state.lock().await;
        let (chat, reason) = {
            let session = st
                .session
                .as_ref()
                .filter(|s| s.is_active())
                .ok_or(CallError::InvalidState("no active call"))?;
            let reason = if session.status() == CallStatus::Connected {
                EndReason::UserEnded
            } else {
                EndReason::Cancelled
            };
            (session.chat_id.clone(), reason)
        };

        let msg = SignalMessage::EndCall {
            chat_id: chat,
            from: self.local_user_id.clone(),
            reason,
        };
        self.signaling.send(&msg).await;
        self.finish_locked(&mut st, reason).await;
        Ok(())
    }

    pub async fn toggle_mute(&self) -> Result<bool, CallError> {
        let media = self.active_media().await?;
        let muted = media.toggle_mute().await?;
        self.emitter.emit(CallEvent::MuteChanged(muted));
        Ok(muted)
    }

    pub async fn toggle_video(&self) -> Result<bool, CallError> {
        let media = self.active_media().await?;
        let enabled = media.toggle_video().await?;
        self.emitter.emit(CallEvent::VideoChanged(enabled));
        Ok(enabled)
    }

    pub async fn handle_notice(&self, notice: ChannelNotice) {
        match notice {
            ChannelNotice::Message(msg) => self.handle_signal(msg).await,
            ChannelNotice::Lost => self.on_signaling_lost().await,
            ChannelNotice::Closed => {
                tracing::debug!("signaling channel closed");
            }
        }
    }

    /// Dispatch one inbound signaling message.
    pub async fn handle_signal(&self, msg: SignalMessage) {
        let mut st = self.state.lock().await;
        let Some(session) = st.session.as_ref() else {
            tracing::debug!("no session, ignoring {msg:?}");
            return;
        };
        if msg.chat_id() != session.chat_id {
            tracing::warn!("message for other chat {} ignored", msg.chat_id());
            return;
        }
        if !session.is_active() {
            tracing::debug!("session ended, ignoring {msg:?}");
            return;
        }
        let direction = session.direction;
        let status = session.status();

        match msg {
            SignalMessage::CallAccepted { .. } => {
                if direction != CallDirection::Outgoing || status != CallStatus::Ringing {
                    tracing::warn!("unexpected call-accepted in {status:?}");
                    return;
                }
                self.on_remote_accepted(&mut st).await;
            }
            SignalMessage::Offer { sdp, from, .. } => {
                if status != CallStatus::Connecting {
                    tracing::warn!("offer from {from} in {status:?} ignored");
                    return;
                }
                self.on_remote_offer(&mut st, sdp).await;
            }
            SignalMessage::Answer { sdp, .. } => {
                if status != CallStatus::Connecting {
                    tracing::warn!("answer in {status:?} ignored");
                    return;
                }
                if let Some(media) = st.media.clone() {
                    if let Err(e) = media.apply_remote_answer(sdp).await {
                        self.fail_locked(&mut st, e).await;
                    }
                }
            }
            SignalMessage::IceCandidate { candidate, .. } => {
                if let Some(media) = st.media.clone() {
                    // A bad candidate is not terminal; others may connect us.
                    if let Err(e) = media.add_remote_ice_candidate(candidate).await {
                        tracing::warn!("ICE candidate rejected: {e}");
                    }
                }
            }
            SignalMessage::CallRejected { .. } => {
                self.finish_locked(&mut st, EndReason::Rejected).await;
            }
            SignalMessage::EndCall { reason, .. } => {
                // Preserve why the remote ended, but a plain hangup on
                // their side reads as "remote ended" on ours.
                let local = if reason == EndReason::UserEnded {
                    EndReason::RemoteEnded
                } else {
                    reason
                };
                self.finish_locked(&mut st, local).await;
            }
            SignalMessage::Join { user_id, .. }
            | SignalMessage::UserJoined { user_id, .. }
            | SignalMessage::UserLeft { user_id, .. } => {
                // Presence only. Never a call transition: connecting is
                // gated on the explicit call-accepted message.
                tracing::debug!("presence update for {user_id}");
            }
        }
    }

    /// Caller side: the callee accepted. Get local media and the peer
    /// link ready within the configured bound, then send the offer.
    async fn on_remote_accepted(&self, st: &mut EngineState) {
        self.ring.cancel();
        self.advance_locked(st, CallStatus::Connecting);

        let Some(session) = st.session.as_ref() else { return };
        let gen = st.generation;
        let call_type = session.call_type;
        let remote = session.remote_user_id.clone();
        let chat = session.chat_id.clone();
        let Some(media) = st.media.clone() else { return };

        let ready = tokio::time::timeout(self.config.ready_timeout(), async {
            media.ensure_local_media(call_type, CameraFacing::Front).await?;
            media
                .ensure_peer_link(&remote, self.link_callbacks(gen, &chat, &remote))
                .await?;
            media.create_offer().await
        })
        .await;

        let sdp = match ready {
            Err(_) => {
                self.fail_locked(st, CallError::Timeout("media readiness")).await;
                return;
            }
            Ok(Err(e)) => {
                self.fail_locked(st, e).await;
                return;
            }
            Ok(Ok(sdp)) => sdp,
        };

        let msg = SignalMessage::Offer {
            chat_id: chat,
            from: self.local_user_id.clone(),
            to: remote,
            sdp,
        };
        if !self.signaling.send(&msg).await {
            self.fail_locked(st, CallError::SignalingUnavailable("offer send failed".into()))
                .await;
        }
    }

    /// Callee side: apply the caller's offer and answer it.
    async fn on_remote_offer(&self, st: &mut EngineState, sdp: String) {
        let Some(session) = st.session.as_ref() else { return };
        let remote = session.remote_user_id.clone();
        let chat = session.chat_id.clone();
        let Some(media) = st.media.clone() else { return };

        let answer = match media.apply_remote_offer(sdp).await {
            Ok(answer) => answer,
            Err(e) => {
                self.fail_locked(st, e).await;
                return;
            }
        };

        let msg = SignalMessage::Answer {
            chat_id: chat,
            from: self.local_user_id.clone(),
            to: remote,
            sdp: answer,
        };
        if !self.signaling.send(&msg).await {
            self.fail_locked(st, CallError::SignalingUnavailable("answer send failed".into()))
                .await;
        }
    }

    async fn on_signaling_lost(&self) {
        let mut st = self.state.lock().await;
        if st.session.as_ref().is_some_and(|s| s.is_active()) {
            tracing::warn!("signaling connection lost during active call");
            self.emitter.emit(CallEvent::SignalingLost);
            self.finish_locked(&mut st, EndReason::ConnectionLost).await;
        }
    }

    /// Backend callback: a live remote track. First observation of
    /// either this or the transport connected state completes the call.
    async fn on_remote_track(&self, gen: u64, track: RemoteTrack) {
        let mut st = self.state.lock().await;
        if st.generation != gen {
            tracing::debug!("remote track for stale session ignored");
            return;
        }
        if !st.session.as_ref().is_some_and(|s| s.is_active()) {
            return;
        }
        self.advance_locked(&mut st, CallStatus::Connected);
        self.emitter.emit(CallEvent::RemoteTrackAdded {
            track_id: track.id,
            kind: track.kind,
        });
    }

    async fn on_link_state(&self, gen: u64, state: LinkState) {
        let mut st = self.state.lock().await;
        if st.generation != gen {
            tracing::debug!("link state {state:?} for stale session ignored");
            return;
        }
        if !st.session.as_ref().is_some_and(|s| s.is_active()) {
            return;
        }
        match state {
            LinkState::Connected => {
                self.advance_locked(&mut st, CallStatus::Connected);
            }
            LinkState::Failed => {
                self.fail_locked(&mut st, CallError::NegotiationFailed("peer link failed".into()))
                    .await;
            }
            LinkState::New | LinkState::Connecting | LinkState::Closed => {
                tracing::debug!("peer link state: {state:?}");
            }
        }
    }

    async fn on_local_candidate(&self, gen: u64, msg: SignalMessage) {
        let st = self.state.lock().await;
        if st.generation != gen || !st.session.as_ref().is_some_and(|s| s.is_active()) {
            return;
        }
        self.signaling.send(&msg).await;
    }

    async fn on_ring_timeout(&self, gen: u64) {
        let mut st = self.state.lock().await;
        if st.generation != gen {
            return;
        }
        let Some(session) = st.session.as_ref() else { return };
        if session.status() != CallStatus::Ringing {
            return;
        }
        let msg = SignalMessage::EndCall {
            chat_id: session.chat_id.clone(),
            from: self.local_user_id.clone(),
            reason: EndReason::Timeout,
        };
        self.signaling.send(&msg).await;
        self.finish_locked(&mut st, EndReason::Timeout).await;
    }

    fn start_ring(&self, gen: u64, direction: CallDirection) {
        let me = self.me.clone();
        self.ring.start(direction, move || {
            if let Some(engine) = me.upgrade() {
                tokio::spawn(async move { engine.on_ring_timeout(gen).await });
            }
        });
    }

    fn link_callbacks(&self, gen: u64, chat_id: &str, remote: &str) -> PeerLinkCallbacks {
        let track_me = self.me.clone();
        let state_me = self.me.clone();
        let cand_me = self.me.clone();
        let chat_id = chat_id.to_string();
        let from = self.local_user_id.clone();
        let to = remote.to_string();

        PeerLinkCallbacks {
            on_remote_track: Box::new(move |track| {
                if let Some(engine) = track_me.upgrade() {
                    tokio::spawn(async move { engine.on_remote_track(gen, track).await });
                }
            }),
            on_state_change: Box::new(move |link_state| {
                if let Some(engine) = state_me.upgrade() {
                    tokio::spawn(async move { engine.on_link_state(gen, link_state).await });
                }
            }),
            on_local_candidate: Box::new(move |candidate| {
                if let Some(engine) = cand_me.upgrade() {
                    let msg = SignalMessage::IceCandidate {
                        chat_id: chat_id.clone(),
                        from: from.clone(),
                        to: to.clone(),
                        candidate,
                    };
                    tokio::spawn(async move { engine.on_local_candidate(gen, msg).await });
                }
            }),
        }
    }

    fn advance_locked(&self, st: &mut EngineState, to: CallStatus) {
        if let Some(session) = st.session.as_mut() {
            if session.advance(to) {
                tracing::info!("call {} -> {to:?}", session.call_id);
                self.emitter.emit(CallEvent::StateChanged(to));
            }
        }
    }

    /// Terminal error: tell the user, tell the peer, tear down.
    async fn fail_locked(&self, st: &mut EngineState, err: CallError) {
        tracing::warn!("call failed: {err}");
        self.emitter.emit(CallEvent::CallFailed {
            message: err.to_string(),
        });
        let reason = match err {
            CallError::Timeout(_) => EndReason::Timeout,
            CallError::SignalingUnavailable(_) => EndReason::ConnectionLost,
            _ => EndReason::MediaFailed,
        };
        if let Some(session) = st.session.as_ref().filter(|s| s.is_active()) {
            let msg = SignalMessage::EndCall {
                chat_id: session.chat_id.clone(),
                from: self.local_user_id.clone(),
                reason,
            };
            self.signaling.send(&msg).await;
        }
        self.finish_locked(st, reason).await;
    }

    /// Move to `Ended` and release everything, exactly once.
    async fn finish_locked(&self, st: &mut EngineState, reason: EndReason) -> bool {
        let Some(session) = st.session.as_mut() else {
            return false;
        };
        if !session.end(reason) {
            return false;
        }
        let call_id = session.call_id;
        st.generation += 1;
        self.ring.cancel();
        if let Some(media) = st.media.take() {
            media.teardown().await;
        }
        self.emitter.emit(CallEvent::StateChanged(CallStatus::Ended));
        self.emitter.emit(CallEvent::CallEnded(reason));
        tracing::info!("call {call_id} ended: {reason:?}");
        true
    }

    async fn active_media(&self) -> Result<Arc<MediaSession>, CallError> {
        let st = self.state.lock().await;
        if !st.session.as_ref().is_some_and(|s| s.is_active()) {
            return Err(CallError::InvalidState("no active call"));
        }
        st.media
            .clone()
            .ok_or(CallError::InvalidState("no media session"))
    }
}

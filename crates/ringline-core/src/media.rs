use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::errors::CallError;
use crate::events::TrackKind;
use crate::session::CallType;
use crate::signaling::IceCandidate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraFacing {
    Front,
    Back,
}

/// Peer link transport state, as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    New,
    Connecting,
    Connected,
    Failed,
    Closed,
}

/// A remote media track surfaced by the peer link. The backend owns the
/// actual track; this is a reference for rendering.
#[derive(Debug, Clone)]
pub struct RemoteTrack {
    pub id: String,
    pub kind: TrackKind,
}

/// Callbacks a peer link fires from the backend's own tasks.
pub struct PeerLinkCallbacks {
    pub on_remote_track: Box<dyn Fn(RemoteTrack) + Send + Sync>,
    pub on_state_change: Box<dyn Fn(LinkState) + Send + Sync>,
    /// Local ICE candidates to forward over signaling.
    pub on_local_candidate: Box<dyn Fn(IceCandidate) + Send + Sync>,
}

/// Local capture tracks. The media session owns these and must stop
/// them on teardown; `stop` is idempotent and never fails.
#[async_trait]
pub trait LocalTracks: Send + Sync {
    fn has_video(&self) -> bool;
    /// Flip the mute state; returns the new muted flag.
    async fn toggle_mute(&self) -> bool;
    /// Flip the camera state; returns the new enabled flag.
    async fn toggle_video(&self) -> bool;
    async fn stop(&self);
    /// Backend downcast hook so a concrete backend can attach its own
    /// track objects to the peer connection it creates.
    fn as_any(&self) -> &dyn Any;
}

/// The negotiated point-to-point media connection.
#[async_trait]
pub trait PeerLink: Send + Sync {
    async fn create_offer(&self) -> Result<String, CallError>;
    /// Applies the remote offer and returns the local answer SDP.
    async fn apply_remote_offer(&self, sdp: String) -> Result<String, CallError>;
    async fn apply_remote_answer(&self, sdp: String) -> Result<(), CallError>;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), CallError>;
    async fn close(&self);
}

/// Platform media capability provider: capture devices plus peer
/// connection construction. Implemented by `ringline-webrtc` for
/// native builds and by scripted mocks in tests.
#[async_trait]
pub trait MediaBackend: Send + Sync {
    async fn init_local_media(
        &self,
        call_type: CallType,
        facing: CameraFacing,
    ) -> Result<Arc<dyn LocalTracks>, CallError>;

    async fn create_peer_link(
        &self,
        remote_user_id: &str,
        tracks: Arc<dyn LocalTracks>,
        callbacks: PeerLinkCallbacks,
    ) -> Result<Arc<dyn PeerLink>, CallError>;
}

#[derive(Default)]
struct SessionMedia {
    tracks: Option<Arc<dyn LocalTracks>>,
    link: Option<Arc<dyn PeerLink>>,
    pending_ice: Vec<IceCandidate>,
    remote_description_set: bool,
}

/// Per-call media bookkeeping over a backend.
///
/// Enforces the session contract: exactly one peer link, ICE candidates
/// queued until a remote description exists, teardown idempotent with
/// every release step independently guarded.
pub struct MediaSession {
    backend: Arc<dyn MediaBackend>,
    inner: Mutex<SessionMedia>,
}

impl MediaSession {
    pub fn new(backend: Arc<dyn MediaBackend>) -> Self {
        Self {
            backend,
            inner: Mutex::new(SessionMedia::default()),
        }
    }

    /// Acquire local tracks, or return the existing set. Acquisition
    /// failure is terminal for the call; no retry here.
    pub async fn ensure_local_media(
        &self,
        call_type: CallType,
        facing: CameraFacing,
    ) -> Result<Arc<dyn LocalTracks>, CallError> {
        let mut inner = self.inner.lock().await;
        if let Some(tracks) = &inner.tracks {
            return Ok(tracks.clone());
        }
        let tracks = self.backend.init_local_media(call_type, facing).await?;
        inner.tracks = Some(tracks.clone());
        Ok(tracks)
    }

    /// Create the peer link, or return the existing one (a second call
    /// is a no-op; the new callbacks are discarded). Local media must
    /// exist first so the link publishes it.
    pub async fn ensure_peer_link(
        &self,
        remote_user_id: &str,
        callbacks: PeerLinkCallbacks,
    ) -> Result<Arc<dyn PeerLink>, CallError> {
        let mut inner = self.inner.lock().await;
        if let Some(link) = &inner.link {
            return Ok(link.clone());
        }
        let tracks = inner
            .tracks
            .clone()
            .ok_or(CallError::InvalidState("peer link before local media"))?;
        let link = self
            .backend
            .create_peer_link(remote_user_id, tracks, callbacks)
            .await?;
        inner.link = Some(link.clone());
        Ok(link)
    }

    pub async fn has_link(&self) -> bool {
        self.inner.lock().await.link.is_some()
    }

    pub async fn create_offer(&self) -> Result<String, CallError> {
        let link = self.require_link().await?;
        link.create_offer().await
    }

    /// Apply the remote offer, produce the answer, then flush any ICE
    /// candidates that arrived early, in arrival order.
    pub async fn apply_remote_offer(&self, sdp: String) -> Result<String, CallError> {
        let link = self.require_link().await?;
        let answer = link.apply_remote_offer(sdp).await?;
        self.flush_pending_ice(&link).await;
        Ok(answer)
    }

    pub async fn apply_remote_answer(&self, sdp: String) -> Result<(), CallError> {
        let link = self.require_link().await?;
        link.apply_remote_answer(sdp).await?;
        self.flush_pending_ice(&link).await;
        Ok(())
    }

    /// Apply a remote candidate, or queue it if no remote description
    /// has been set yet.
    pub async fn add_remote_ice_candidate(
        &self,
        candidate: IceCandidate,
    ) -> Result<(), CallError> {
        let link = {
            let mut inner = self.inner.lock().await;
            if !inner.remote_description_set || inner.link.is_none() {
                tracing::debug!("queueing early ICE candidate");
                inner.pending_ice.push(candidate);
                return Ok(());
            }
            inner.link.clone()
        };
        if let Some(link) = link {
            link.add_ice_candidate(candidate).await?;
        }
        Ok(())
    }

    async fn flush_pending_ice(&self, link: &Arc<dyn PeerLink>) {
        let pending = {
            let mut inner = self.inner.lock().await;
            inner.remote_description_set = true;
            std::mem::take(&mut inner.pending_ice)
        };
        if !pending.is_empty() {
            tracing::debug!("flushing {} queued ICE candidates", pending.len());
        }
        for candidate in pending {
            // A single bad candidate must not block the rest.
            if let Err(e) = link.add_ice_candidate(candidate).await {
                tracing::warn!("queued ICE candidate rejected: {e}");
            }
        }
    }

    pub async fn toggle_mute(&self) -> Result<bool, CallError> {
        let tracks = self.require_tracks().await?;
        Ok(tracks.toggle_mute().await)
    }

    pub async fn toggle_video(&self) -> Result<bool, CallError> {
        let tracks = self.require_tracks().await?;
        Ok(tracks.toggle_video().await)
    }

    /// Release everything. Safe to call any number of times, in any
    /// partial state; each step is guarded so one failed release does
    /// not block the rest.
    pub async fn teardown(&self) {
        let (tracks, link) = {
            let mut inner = self.inner.lock().await;
            inner.pending_ice.clear();
            inner.remote_description_set = false;
            (inner.tracks.take(), inner.link.take())
        };
        if let Some(tracks) = tracks {
            tracks.stop().await;
            tracing::debug!("local tracks stopped");
        }
        if let Some(link) = link {
            link.close().await;
            tracing::debug!("peer link closed");
        }
    }

    async fn require_link(&self) -> Result<Arc<dyn PeerLink>, CallError> {
        self.inner
            .lock()
            .await
            .link
            .clone()
            .ok_or(CallError::InvalidState("no peer link"))
    }

    async fn require_tracks(&self) -> Result<Arc<dyn LocalTracks>, CallError> {
        self.inner
            .lock()
            .await
            .tracks
            .clone()
            .ok_or(CallError::InvalidState("no local media"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    struct FakeTracks {
        stopped: AtomicUsize,
        muted: AtomicBool,
    }

    impl FakeTracks {
        fn new() -> Self {
            Self {
                stopped: AtomicUsize::new(0),
                muted: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl LocalTracks for FakeTracks {
        fn has_video(&self) -> bool {
            false
        }
        async fn toggle_mute(&self) -> bool {
            !self.muted.fetch_xor(true, Ordering::SeqCst)
        }
        async fn toggle_video(&self) -> bool {
            false
        }
        async fn stop(&self) {
            self.stopped.fetch_add(1, Ordering::SeqCst);
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct FakeLink {
        applied: StdMutex<Vec<String>>,
        closed: AtomicUsize,
    }

    impl FakeLink {
        fn new() -> Self {
            Self {
                applied: StdMutex::new(Vec::new()),
                closed: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PeerLink for FakeLink {
        async fn create_offer(&self) -> Result<String, CallError> {
            Ok("offer-sdp".into())
        }
        async fn apply_remote_offer(&self, _sdp: String) -> Result<String, CallError> {
            Ok("answer-sdp".into())
        }
        async fn apply_remote_answer(&self, _sdp: String) -> Result<(), CallError> {
            Ok(())
        }
        async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), CallError> {
            self.applied.lock().unwrap().push(candidate.candidate);
            Ok(())
        }
        async fn close(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FakeBackend {
        tracks: Arc<FakeTracks>,
        link: Arc<FakeLink>,
        links_created: AtomicUsize,
    }

    impl FakeBackend {
        fn new() -> Self {
            Self {
                tracks: Arc::new(FakeTracks::new()),
                link: Arc::new(FakeLink::new()),
                links_created: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl MediaBackend for FakeBackend {
        async fn init_local_media(
            &self,
            _call_type: CallType,
            _facing: CameraFacing,
        ) -> Result<Arc<dyn LocalTracks>, CallError> {
            Ok(self.tracks.clone())
        }
        async fn create_peer_link(
            &self,
            _remote_user_id: &str,
            _tracks: Arc<dyn LocalTracks>,
            _callbacks: PeerLinkCallbacks,
        ) -> Result<Arc<dyn PeerLink>, CallError> {
            self.links_created.fetch_add(1, Ordering::SeqCst);
            Ok(self.link.clone())
        }
    }

    fn noop_callbacks() -> PeerLinkCallbacks {
        PeerLinkCallbacks {
            on_remote_track: Box::new(|_| {}),
            on_state_change: Box::new(|_| {}),
            on_local_candidate: Box::new(|_| {}),
        }
    }

    fn candidate(n: u32) -> IceCandidate {
        IceCandidate {
            candidate: format!("candidate-{n}"),
            sdp_mid: Some("0".into()),
            sdp_m_line_index: Some(0),
        }
    }

    async fn ready_session(backend: &Arc<FakeBackend>) -> MediaSession {
        let session = MediaSession::new(backend.clone() as Arc<dyn MediaBackend>);
        session
            .ensure_local_media(CallType::Voice, CameraFacing::Front)
            .await
            .unwrap();
        session
            .ensure_peer_link("bob", noop_callbacks())
            .await
            .unwrap();
        session
    }

    #[tokio::test]
    async fn second_peer_link_is_a_noop() {
        let backend = Arc::new(FakeBackend::new());
        let session = ready_session(&backend).await;
        session
            .ensure_peer_link("bob", noop_callbacks())
            .await
            .unwrap();
        assert_eq!(backend.links_created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn peer_link_requires_local_media() {
        let backend = Arc::new(FakeBackend::new());
        let session = MediaSession::new(backend.clone() as Arc<dyn MediaBackend>);
        assert!(matches!(
            session.ensure_peer_link("bob", noop_callbacks()).await,
            Err(CallError::InvalidState(_))
        ));
        assert_eq!(backend.links_created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn early_ice_is_buffered_and_flushed_in_order() {
        let backend = Arc::new(FakeBackend::new());
        let session = ready_session(&backend).await;

        // Candidates arrive before any remote description.
        for n in 0..3 {
            session.add_remote_ice_candidate(candidate(n)).await.unwrap();
        }
        assert!(backend.link.applied.lock().unwrap().is_empty());

        session.apply_remote_answer("v=0".into()).await.unwrap();
        assert_eq!(
            *backend.link.applied.lock().unwrap(),
            vec!["candidate-0", "candidate-1", "candidate-2"]
        );

        // Later candidates apply directly.
        session.add_remote_ice_candidate(candidate(3)).await.unwrap();
        assert_eq!(backend.link.applied.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn teardown_is_idempotent() {
        let backend = Arc::new(FakeBackend::new());
        let session = ready_session(&backend).await;

        session.teardown().await;
        session.teardown().await;

        assert_eq!(backend.tracks.stopped.load(Ordering::SeqCst), 1);
        assert_eq!(backend.link.closed.load(Ordering::SeqCst), 1);
        assert!(!session.has_link().await);
    }

    #[tokio::test]
    async fn teardown_before_any_setup_is_safe() {
        let backend = Arc::new(FakeBackend::new());
        let session = MediaSession::new(backend as Arc<dyn MediaBackend>);
        session.teardown().await;
        session.teardown().await;
    }

    #[tokio::test]
    async fn toggle_mute_flips_state() {
        let backend = Arc::new(FakeBackend::new());
        let session = ready_session(&backend).await;
        assert!(session.toggle_mute().await.unwrap());
        assert!(!session.toggle_mute().await.unwrap());
    }
}

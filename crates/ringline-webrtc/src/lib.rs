//! webrtc-rs media backend for the ringline call engine.
//!
//! Builds the peer connection, publishes the local tracks, and bridges
//! the connection's callbacks (remote tracks, transport state, local
//! ICE candidates) into the engine's callback surface.

use std::sync::Arc;

use async_trait::async_trait;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use ringline_core::errors::CallError;
use ringline_core::events::TrackKind;
use ringline_core::media::{
    CameraFacing, LinkState, LocalTracks, MediaBackend, PeerLink, PeerLinkCallbacks, RemoteTrack,
};
use ringline_core::session::CallType;

pub mod peer;
pub mod tracks;

pub use peer::RtcPeerLink;
pub use tracks::StaticTracks;

fn setup_err(e: webrtc::Error) -> CallError {
    CallError::MediaFailed(e.to_string())
}

/// [`MediaBackend`] over webrtc-rs.
pub struct WebRtcBackend {
    stun_servers: Vec<String>,
}

impl WebRtcBackend {
    pub fn new(stun_servers: Vec<String>) -> Arc<Self> {
        Arc::new(Self { stun_servers })
    }

    async fn build_peer_connection(&self) -> Result<Arc<RTCPeerConnection>, CallError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(setup_err)?;

        let mut registry = Registry::new();
        registry =
            register_default_interceptors(registry, &mut media_engine).map_err(setup_err)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: self.stun_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let pc = api.new_peer_connection(config).await.map_err(setup_err)?;
        Ok(Arc::new(pc))
    }

    async fn publish_track(
        pc: &Arc<RTCPeerConnection>,
        track: Arc<TrackLocalStaticSample>,
    ) -> Result<(), CallError> {
        let sender = pc
            .add_track(track as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(setup_err)?;
        // Drain sender RTCP so the interceptors keep running.
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while let Ok((_, _)) = sender.read(&mut buf).await {}
        });
        Ok(())
    }
}

#[async_trait]
impl MediaBackend for WebRtcBackend {
    async fn init_local_media(
        &self,
        call_type: CallType,
        facing: CameraFacing,
    ) -> Result<Arc<dyn LocalTracks>, CallError> {
        tracing::debug!("acquiring local media: {call_type:?}, camera {facing:?}");
        let tracks = StaticTracks::new(call_type)?;
        Ok(Arc::new(tracks))
    }

    async fn create_peer_link(
        &self,
        remote_user_id: &str,
        tracks: Arc<dyn LocalTracks>,
        callbacks: PeerLinkCallbacks,
    ) -> Result<Arc<dyn PeerLink>, CallError> {
        let local = tracks
            .as_any()
            .downcast_ref::<StaticTracks>()
            .ok_or(CallError::InvalidState("local tracks from another backend"))?;

        let pc = self.build_peer_connection().await?;
        tracing::debug!("peer connection created for {remote_user_id}");

        Self::publish_track(&pc, local.audio()).await?;
        if let Some(video) = local.video() {
            Self::publish_track(&pc, video).await?;
        }

        let PeerLinkCallbacks {
            on_remote_track,
            on_state_change,
            on_local_candidate,
        } = callbacks;

        pc.on_track(Box::new(move |track: Arc<TrackRemote>, _, _| {
            let kind = match track.kind() {
                RTPCodecType::Audio => Some(TrackKind::Audio),
                RTPCodecType::Video => Some(TrackKind::Video),
                RTPCodecType::Unspecified => None,
            };
            match kind {
                Some(kind) => on_remote_track(RemoteTrack {
                    id: track.id(),
                    kind,
                }),
                None => tracing::warn!("remote track with unspecified codec type ignored"),
            }
            Box::pin(async {})
        }));

        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let mapped = match state {
                RTCPeerConnectionState::New | RTCPeerConnectionState::Unspecified => LinkState::New,
                RTCPeerConnectionState::Connecting => LinkState::Connecting,
                RTCPeerConnectionState::Connected => LinkState::Connected,
                // No reconnection support: a disconnected link is as
                // terminal as a failed one.
                RTCPeerConnectionState::Disconnected | RTCPeerConnectionState::Failed => {
                    LinkState::Failed
                }
                RTCPeerConnectionState::Closed => LinkState::Closed,
            };
            on_state_change(mapped);
            Box::pin(async {})
        }));

        pc.on_ice_candidate(Box::new(move |candidate| {
            if let Some(c) = candidate {
                match c.to_json() {
                    Ok(init) => on_local_candidate(ringline_core::signaling::IceCandidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_m_line_index: init.sdp_mline_index,
                    }),
                    Err(e) => tracing::warn!("local candidate serialization failed: {e}"),
                }
            }
            Box::pin(async {})
        }));

        Ok(Arc::new(RtcPeerLink::new(pc)))
    }
}

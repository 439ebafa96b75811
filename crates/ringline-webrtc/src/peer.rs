use std::sync::Arc;

use async_trait::async_trait;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use ringline_core::errors::CallError;
use ringline_core::media::PeerLink;
use ringline_core::signaling::IceCandidate;

fn negotiation_err(e: webrtc::Error) -> CallError {
    CallError::NegotiationFailed(e.to_string())
}

/// A [`PeerLink`] over a webrtc-rs peer connection. Trickle ICE: the
/// SDP goes out as soon as the local description is set, candidates
/// follow over signaling.
pub struct RtcPeerLink {
    pc: Arc<RTCPeerConnection>,
}

impl RtcPeerLink {
    pub(crate) fn new(pc: Arc<RTCPeerConnection>) -> Self {
        Self { pc }
    }

    async fn local_sdp(&self) -> Result<String, CallError> {
        self.pc
            .local_description()
            .await
            .map(|d| d.sdp)
            .ok_or(CallError::InvalidState("no local description"))
    }
}

#[async_trait]
impl PeerLink for RtcPeerLink {
    async fn create_offer(&self) -> Result<String, CallError> {
        let offer = self.pc.create_offer(None).await.map_err(negotiation_err)?;
        self.pc
            .set_local_description(offer)
            .await
            .map_err(negotiation_err)?;
        self.local_sdp().await
    }

    async fn apply_remote_offer(&self, sdp: String) -> Result<String, CallError> {
        let offer = RTCSessionDescription::offer(sdp).map_err(negotiation_err)?;
        self.pc
            .set_remote_description(offer)
            .await
            .map_err(negotiation_err)?;
        let answer = self.pc.create_answer(None).await.map_err(negotiation_err)?;
        self.pc
            .set_local_description(answer)
            .await
            .map_err(negotiation_err)?;
        self.local_sdp().await
    }

    async fn apply_remote_answer(&self, sdp: String) -> Result<(), CallError> {
        let answer = RTCSessionDescription::answer(sdp).map_err(negotiation_err)?;
        self.pc
            .set_remote_description(answer)
            .await
            .map_err(negotiation_err)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), CallError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_m_line_index,
            username_fragment: None,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(negotiation_err)
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            tracing::warn!("peer connection close failed: {e}");
        }
    }
}

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use ringline_core::errors::CallError;
use ringline_core::media::LocalTracks;
use ringline_core::session::CallType;

/// Local capture tracks published over the peer connection.
///
/// The capture pipeline writes samples into these via
/// [`StaticTracks::audio`] / [`StaticTracks::video`]; mute and camera
/// toggles are flags the pipeline consults before writing, so flipping
/// them never touches the peer connection.
pub struct StaticTracks {
    audio: Arc<TrackLocalStaticSample>,
    video: Option<Arc<TrackLocalStaticSample>>,
    muted: AtomicBool,
    video_enabled: AtomicBool,
    stopped: AtomicBool,
}

impl StaticTracks {
    pub fn new(call_type: CallType) -> Result<Self, CallError> {
        let audio = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                ..Default::default()
            },
            "audio".to_owned(),
            "ringline-audio".to_owned(),
        ));
        let video = match call_type {
            CallType::Voice => None,
            CallType::Video => Some(Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_VP8.to_owned(),
                    ..Default::default()
                },
                "video".to_owned(),
                "ringline-video".to_owned(),
            ))),
        };
        Ok(Self {
            audio,
            video,
            muted: AtomicBool::new(false),
            video_enabled: AtomicBool::new(call_type == CallType::Video),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn audio(&self) -> Arc<TrackLocalStaticSample> {
        self.audio.clone()
    }

    pub fn video(&self) -> Option<Arc<TrackLocalStaticSample>> {
        self.video.clone()
    }

    /// Whether the capture pipeline should currently write audio samples.
    pub fn audio_live(&self) -> bool {
        !self.muted.load(Ordering::SeqCst) && !self.stopped.load(Ordering::SeqCst)
    }

    /// Whether the capture pipeline should currently write video samples.
    pub fn video_live(&self) -> bool {
        self.video.is_some()
            && self.video_enabled.load(Ordering::SeqCst)
            && !self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocalTracks for StaticTracks {
    fn has_video(&self) -> bool {
        self.video.is_some()
    }

    async fn toggle_mute(&self) -> bool {
        !self.muted.fetch_xor(true, Ordering::SeqCst)
    }

    async fn toggle_video(&self) -> bool {
        if self.video.is_none() {
            return false;
        }
        !self.video_enabled.fetch_xor(true, Ordering::SeqCst)
    }

    async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

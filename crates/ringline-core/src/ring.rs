use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::session::CallDirection;

/// Plays the ringtone (incoming) or ringback (outgoing) tone.
///
/// `stop` must be safe to call at any time, including when playback
/// never started.
pub trait TonePlayer: Send + Sync {
    fn start_ringtone(&self);
    fn start_ringback(&self);
    fn stop(&self);
}

/// Tone player for headless use (servers, tests).
pub struct NullTonePlayer;

impl TonePlayer for NullTonePlayer {
    fn start_ringtone(&self) {
        tracing::debug!("ringtone start (null player)");
    }
    fn start_ringback(&self) {
        tracing::debug!("ringback start (null player)");
    }
    fn stop(&self) {
        tracing::debug!("tone stop (null player)");
    }
}

/// Bounded ring timer plus tone playback for one call session.
///
/// `start` arms a single timer; on expiry the timeout callback runs
/// exactly once and the supervisor is inert until the next `start`.
/// `cancel` is idempotent and safe before `start`.
pub struct RingSupervisor {
    duration: Duration,
    tones: Arc<dyn TonePlayer>,
    timer: Mutex<Option<(JoinHandle<()>, Arc<AtomicBool>)>>,
}

impl RingSupervisor {
    pub fn new(duration: Duration, tones: Arc<dyn TonePlayer>) -> Self {
        Self {
            duration,
            tones,
            timer: Mutex::new(None),
        }
    }

    /// Start tone playback and arm the timer. An already-armed timer is
    /// cancelled first so at most one is outstanding.
    pub fn start<F>(&self, direction: CallDirection, on_timeout: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.cancel();

        match direction {
            CallDirection::Incoming => self.tones.start_ringtone(),
            CallDirection::Outgoing => self.tones.start_ringback(),
        }

        let fired = Arc::new(AtomicBool::new(false));
        let fired_task = fired.clone();
        let tones = self.tones.clone();
        let duration = self.duration;

        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if fired_task.swap(true, Ordering::SeqCst) {
                return;
            }
            tracing::info!("ring timed out after {duration:?}");
            tones.stop();
            on_timeout();
        });

        *self.timer.lock().unwrap() = Some((handle, fired));
    }

    /// Stop the tone and disarm the timer, if any.
    pub fn cancel(&self) {
        if let Some((handle, fired)) = self.timer.lock().unwrap().take() {
            fired.store(true, Ordering::SeqCst);
            handle.abort();
        }
        self.tones.stop();
    }
}

impl Drop for RingSupervisor {
    fn drop(&mut self) {
        if let Some((handle, fired)) = self.timer.lock().unwrap().take() {
            fired.store(true, Ordering::SeqCst);
            handle.abort();
        }
        self.tones.stop();
    }
}

//! Audio output controller
//!
//! Sits between the realtime event stream and the playout clock. Streamed
//! base64 deltas are decoded and accumulated into exact frames; the mic
//! gate is armed for the whole time assistant audio is in flight and only
//! reopened when the playout queue actually drains on the wire (or the
//! watchdog gives up waiting). Barge-in tears the whole output path down
//! at once: queue, partial, gate and the in-flight model response.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::bridge::AudioUplink;
use crate::codec::FRAME_DURATION;
use crate::gate::MicGate;
use crate::playout::{PlayoutClock, PlayoutObserver};

/// Events the controller surfaces to the session layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioOutputEvent {
    /// The mic gate reopened
    MicUngated {
        /// True when the watchdog forced it rather than a clean drain
        forced: bool,
    },
}

/// Watchdog tuning for the output controller
#[derive(Debug, Clone)]
pub struct OutputConfig {
    /// Minimum watchdog timeout
    pub watchdog_floor: Duration,
    /// Maximum watchdog timeout
    pub watchdog_ceiling: Duration,
    /// Slack added on top of the queued-audio estimate
    pub watchdog_padding: Duration,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            watchdog_floor: Duration::from_secs(4),
            watchdog_ceiling: Duration::from_secs(15),
            watchdog_padding: Duration::from_secs(2),
        }
    }
}

/// Controller for the assistant → caller audio path
pub struct AudioOutputController {
    gate: Arc<MicGate>,
    playout: Arc<PlayoutClock>,
    uplink: Arc<dyn AudioUplink>,
    events: mpsc::UnboundedSender<AudioOutputEvent>,
    speaking: AtomicBool,
    watchdog: Mutex<Option<JoinHandle<()>>>,
    config: OutputConfig,
    runtime: tokio::runtime::Handle,
}

impl AudioOutputController {
    /// Create a controller.
    ///
    /// Must be called from within a tokio runtime; the drain watchdog is
    /// spawned onto the current runtime handle.
    pub fn new(
        gate: Arc<MicGate>,
        playout: Arc<PlayoutClock>,
        uplink: Arc<dyn AudioUplink>,
        events: mpsc::UnboundedSender<AudioOutputEvent>,
        config: OutputConfig,
    ) -> Self {
        Self {
            gate,
            playout,
            uplink,
            events,
            speaking: AtomicBool::new(false),
            watchdog: Mutex::new(None),
            config,
            runtime: tokio::runtime::Handle::current(),
        }
    }

    /// Whether assistant audio is currently streaming in
    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::Acquire)
    }

    /// Assistant audio started: gate the mic and cancel any pending drain
    /// or watchdog from the previous utterance.
    pub fn handle_audio_started(&self) {
        self.mark_speaking();
    }

    /// One base64 audio delta.
    ///
    /// Some protocol versions skip the explicit start event, so the first
    /// delta performs the same arming. Malformed base64 is discarded.
    pub fn handle_audio_delta(&self, delta_base64: &str) {
        if !self.is_speaking() {
            self.mark_speaking();
        }
        match BASE64.decode(delta_base64) {
            Ok(audio) => self.playout.buffer(&audio),
            Err(err) => trace!(%err, "discarding malformed audio delta"),
        }
    }

    /// Assistant audio finished streaming: flush the partial frame, arm
    /// drain, and start the watchdog in case the drain never comes.
    pub fn handle_audio_done(&self) {
        self.speaking.store(false, Ordering::Release);
        self.playout.flush_partial();
        self.playout.arm_drain();
        self.start_watchdog();
    }

    /// Caller barge-in: drop everything queued, cancel the in-flight model
    /// response, reopen the mic. No-op when nothing is playing.
    pub fn handle_barge_in(&self) {
        let was_speaking = self.speaking.swap(false, Ordering::AcqRel);
        let has_audio = self.playout.queued_frames() > 0 || self.playout.drain_armed();
        if !was_speaking && !has_audio {
            return;
        }
        debug!(was_speaking, "barge-in: flushing output path");
        self.abort_watchdog();
        self.playout.clear();
        self.uplink.send_cancel();
        self.gate.ungate();
    }

    fn mark_speaking(&self) {
        self.speaking.store(true, Ordering::Release);
        self.gate.arm();
        self.playout.disarm_drain();
        self.abort_watchdog();
    }

    /// Timeout scales with the audio left to play: queue depth × 20 ms
    /// plus padding, clamped to the configured floor/ceiling.
    fn watchdog_timeout(&self) -> Duration {
        let queued = self.playout.queued_frames() as u32;
        let estimate = FRAME_DURATION * queued + self.config.watchdog_padding;
        estimate.clamp(self.config.watchdog_floor, self.config.watchdog_ceiling)
    }

    fn start_watchdog(&self) {
        let timeout = self.watchdog_timeout();
        let gate = Arc::clone(&self.gate);
        let playout = Arc::clone(&self.playout);
        let events = self.events.clone();

        let task = self.runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            // Drain never fired; reopen the path by force
            warn!(?timeout, "drain watchdog fired, forcing mic ungate");
            playout.clear();
            if gate.is_gated() {
                gate.ungate();
            }
            let _ = events.send(AudioOutputEvent::MicUngated { forced: true });
        });

        let mut slot = self.watchdog.lock();
        if let Some(old) = slot.replace(task) {
            old.abort();
        }
    }

    fn abort_watchdog(&self) {
        if let Some(task) = self.watchdog.lock().take() {
            task.abort();
        }
    }
}

impl PlayoutObserver for AudioOutputController {
    /// Clean end of the assistant's utterance on the wire: reopen the mic
    /// with zero handoff latency.
    fn on_drained(&self) {
        self.abort_watchdog();
        if self.gate.is_gated() {
            self.gate.ungate();
            let _ = self.events.send(AudioOutputEvent::MicUngated { forced: false });
        }
    }

    fn on_queue_empty(&self) {
        trace!("playout queue empty");
    }
}

impl Drop for AudioOutputController {
    fn drop(&mut self) {
        self.abort_watchdog();
    }
}

//! Mic gate with double-talk guard and barge-in detection
//!
//! While the assistant speaks, its own audio comes back down the phone
//! line as acoustic and line echo. The gate blocks caller audio from
//! reaching the model during that window, with two carve-outs: a short
//! double-talk guard right after arming (echo of the assistant's first
//! syllables must never trigger anything), and barge-in - sustained
//! high-energy caller speech that should preempt the assistant.
//!
//! Hot-path state (gated flag, arm tick, smoothing counter) is atomic;
//! only the frame buffer takes a lock. The gate is called from the RTP
//! receive callback and must stay non-blocking.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::codec::{energy_deviation, G711Codec};

/// Initial window after arming during which frames are discarded outright
pub const DOUBLE_TALK_GUARD: Duration = Duration::from_millis(180);

/// Mean-absolute-deviation threshold above which a frame counts as speech
pub const ENERGY_THRESHOLD: f32 = 18.0;

/// Consecutive high-energy frames required to call barge-in (~60 ms)
pub const BARGE_IN_FRAMES: u32 = 3;

/// Gate buffer capacity in frames; overflow is silently dropped
pub const BUFFER_CAP: usize = 50;

/// Per-frame gate verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateDecision {
    /// Forward this frame to the transport
    pub forward: bool,
    /// This frame completed a barge-in
    pub barge_in: bool,
}

impl GateDecision {
    const PASS: GateDecision = GateDecision {
        forward: true,
        barge_in: false,
    };
    const HOLD: GateDecision = GateDecision {
        forward: false,
        barge_in: false,
    };
    const BARGE_IN: GateDecision = GateDecision {
        forward: true,
        barge_in: true,
    };
}

/// Energy/deviation-based mic gate
pub struct MicGate {
    codec: G711Codec,
    gated: AtomicBool,
    /// Reference point for the monotonic arm tick
    epoch: Instant,
    /// Milliseconds since `epoch` at the moment of the last effective arm
    armed_at_ms: AtomicU64,
    high_frames: AtomicU32,
    buffer: Mutex<VecDeque<Bytes>>,
    dropped_frames: AtomicU64,
}

impl MicGate {
    /// Create an ungated gate for the given codec
    pub fn new(codec: G711Codec) -> Self {
        Self {
            codec,
            gated: AtomicBool::new(false),
            epoch: Instant::now(),
            armed_at_ms: AtomicU64::new(0),
            high_frames: AtomicU32::new(0),
            buffer: Mutex::new(VecDeque::with_capacity(BUFFER_CAP)),
            dropped_frames: AtomicU64::new(0),
        }
    }

    /// Whether caller audio is currently being held back
    pub fn is_gated(&self) -> bool {
        self.gated.load(Ordering::Acquire)
    }

    /// Close the gate.
    ///
    /// Idempotent: re-arming an already gated mic does not move the arm
    /// tick, so a burst of audio-start events cannot stretch the
    /// double-talk guard.
    pub fn arm(&self) {
        if self
            .gated
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let now_ms = self.epoch.elapsed().as_millis() as u64;
            self.armed_at_ms.store(now_ms, Ordering::Release);
            self.buffer.lock().clear();
            trace!("mic gate armed");
        }
        self.high_frames.store(0, Ordering::Release);
    }

    /// Open the gate.
    ///
    /// The buffered frames are discarded, not forwarded: anything captured
    /// while gated is assumed to be echo of the assistant's own speech.
    pub fn ungate(&self) {
        if self
            .gated
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let discarded = {
                let mut buffer = self.buffer.lock();
                let n = buffer.len();
                buffer.clear();
                n
            };
            debug!(discarded, "mic gate opened");
        }
        self.high_frames.store(0, Ordering::Release);
    }

    /// Decide what to do with one inbound caller frame.
    ///
    /// Ungated: forward. Gated within the double-talk guard: discard
    /// without buffering. Gated past the guard: buffer (up to the cap) and
    /// watch for [`BARGE_IN_FRAMES`] consecutive high-energy frames, at
    /// which point the frame is forwarded with `barge_in` set.
    pub fn should_forward(&self, payload: &[u8]) -> GateDecision {
        if !self.is_gated() {
            return GateDecision::PASS;
        }

        let armed_at = Duration::from_millis(self.armed_at_ms.load(Ordering::Acquire));
        let elapsed = self.epoch.elapsed().saturating_sub(armed_at);
        if elapsed < DOUBLE_TALK_GUARD {
            return GateDecision::HOLD;
        }

        let energy = energy_deviation(payload, self.codec.silence_byte());

        {
            let mut buffer = self.buffer.lock();
            if buffer.len() < BUFFER_CAP {
                buffer.push_back(Bytes::copy_from_slice(payload));
            } else {
                self.dropped_frames.fetch_add(1, Ordering::Relaxed);
            }
        }

        if energy > ENERGY_THRESHOLD {
            let streak = self.high_frames.fetch_add(1, Ordering::AcqRel) + 1;
            if streak >= BARGE_IN_FRAMES {
                self.high_frames.store(0, Ordering::Release);
                debug!(energy, streak, "barge-in detected");
                return GateDecision::BARGE_IN;
            }
            GateDecision::HOLD
        } else {
            self.high_frames.store(0, Ordering::Release);
            GateDecision::HOLD
        }
    }

    /// Drain and return the buffered frames.
    ///
    /// No internal path forwards these; the buffer exists for diagnostics
    /// and for integrations that want to inspect what the gate held back.
    pub fn flush_buffer(&self) -> Vec<Bytes> {
        self.buffer.lock().drain(..).collect()
    }

    /// Frames currently held in the gate buffer
    pub fn buffered_frames(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Frames dropped because the buffer was full
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }
}

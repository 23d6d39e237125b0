//! Deterministic 20 ms RTP playout clock
//!
//! The clock is the jitter buffer's consumer: synthesized audio arrives in
//! bursts of arbitrary size, the telephone leg needs exactly one 160-byte
//! frame every 20 ms. A dedicated OS thread runs the cadence; when the
//! queue is empty it sends silence so the RTP stream never starves, and
//! the timestamp advances by 160 per packet regardless.
//!
//! Drain signalling tells the dialogue layer when the assistant's
//! utterance has actually finished *on the wire* (not just in the model):
//! `arm_drain()` is called on "audio done", and the first transition from
//! non-empty to empty afterwards fires `on_drained` exactly once.
//! `clear()` - the barge-in path - empties the queue and disarms without
//! firing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::codec::{G711Codec, FRAME_BYTES, FRAME_DURATION, TIMESTAMP_STEP};
use crate::error::{Error, Result};
use crate::rtp::RtpWriter;

/// Gap below which the wait loop spins instead of sleeping
const SPIN_MARGIN: Duration = Duration::from_millis(2);

/// Lateness beyond which the clock snaps forward instead of catching up
const SNAP_THRESHOLD_FRAMES: u32 = 3;

/// Default soft cap on queued frames (≈ 10 s of audio)
pub const DEFAULT_MAX_QUEUED_FRAMES: usize = 500;

/// Callbacks fired from the clock thread on queue transitions.
///
/// Implementations must be non-blocking; they run inside the 20 ms tick.
pub trait PlayoutObserver: Send + Sync {
    /// Queue went empty while drain was armed (fires once per arm)
    fn on_drained(&self) {}
    /// Queue went empty after having played at least one frame
    fn on_queue_empty(&self) {}
}

/// Playout clock configuration
#[derive(Debug, Clone)]
pub struct PlayoutConfig {
    /// Codec determining silence byte and payload type
    pub codec: G711Codec,
    /// Soft cap on queued frames; oldest frames are dropped past it
    pub max_queued_frames: usize,
    /// First RTP timestamp to emit
    pub initial_timestamp: u32,
}

impl Default for PlayoutConfig {
    fn default() -> Self {
        Self {
            codec: G711Codec::Pcma,
            max_queued_frames: DEFAULT_MAX_QUEUED_FRAMES,
            initial_timestamp: 0,
        }
    }
}

/// Counters for the send loop
#[derive(Debug, Clone, Default)]
pub struct PlayoutStats {
    /// Real audio frames sent
    pub frames_sent: u64,
    /// Silence filler frames sent
    pub silence_sent: u64,
    /// Frames dropped at the soft cap
    pub frames_dropped: u64,
    /// Times the clock snapped forward after falling behind
    pub late_snaps: u64,
    /// Frames currently queued
    pub queued_frames: usize,
}

struct Shared {
    codec: G711Codec,
    max_queued_frames: usize,
    queue: Mutex<VecDeque<Bytes>>,
    partial: Mutex<Vec<u8>>,
    drain_armed: AtomicBool,
    running: AtomicBool,
    observer: Mutex<Option<Arc<dyn PlayoutObserver>>>,
    frames_sent: AtomicU64,
    silence_sent: AtomicU64,
    frames_dropped: AtomicU64,
    late_snaps: AtomicU64,
}

/// Fixed-cadence frame sender with jitter buffering
pub struct PlayoutClock {
    shared: Arc<Shared>,
    initial_timestamp: u32,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PlayoutClock {
    /// Create a stopped clock
    pub fn new(config: PlayoutConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                codec: config.codec,
                max_queued_frames: config.max_queued_frames,
                queue: Mutex::new(VecDeque::new()),
                partial: Mutex::new(Vec::with_capacity(FRAME_BYTES)),
                drain_armed: AtomicBool::new(false),
                running: AtomicBool::new(false),
                observer: Mutex::new(None),
                frames_sent: AtomicU64::new(0),
                silence_sent: AtomicU64::new(0),
                frames_dropped: AtomicU64::new(0),
                late_snaps: AtomicU64::new(0),
            }),
            initial_timestamp: config.initial_timestamp,
            handle: Mutex::new(None),
        }
    }

    /// Register the transition observer. Must be called before `start` to
    /// guarantee no transition is missed.
    pub fn set_observer(&self, observer: Arc<dyn PlayoutObserver>) {
        *self.shared.observer.lock() = Some(observer);
    }

    /// Start the send thread
    pub fn start(&self, writer: Arc<dyn RtpWriter>) -> Result<()> {
        if self.shared.running.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyRunning);
        }
        let shared = Arc::clone(&self.shared);
        let initial_timestamp = self.initial_timestamp;
        let handle = match std::thread::Builder::new()
            .name("rtp-playout".to_string())
            .spawn(move || send_loop(shared, writer, initial_timestamp))
        {
            Ok(handle) => handle,
            Err(_) => {
                self.shared.running.store(false, Ordering::Release);
                return Err(Error::ThreadSpawn);
            }
        };
        *self.handle.lock() = Some(handle);
        debug!("playout clock started");
        Ok(())
    }

    /// Stop the send thread and wait for it to exit
    pub fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
        debug!("playout clock stopped");
    }

    /// Whether the send thread is running
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Append G.711 bytes of any length.
    ///
    /// Bytes accumulate into exact 160-byte frames; a trailing remainder is
    /// held until the next call or until [`flush_partial`](Self::flush_partial).
    pub fn buffer(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let mut partial = self.shared.partial.lock();
        partial.extend_from_slice(data);
        if partial.len() < FRAME_BYTES {
            return;
        }
        let mut queue = self.shared.queue.lock();
        while partial.len() >= FRAME_BYTES {
            let frame = Bytes::copy_from_slice(&partial[..FRAME_BYTES]);
            partial.drain(..FRAME_BYTES);
            if queue.len() >= self.shared.max_queued_frames {
                queue.pop_front();
                self.shared.frames_dropped.fetch_add(1, Ordering::Relaxed);
            }
            queue.push_back(frame);
        }
    }

    /// Pad the partial remainder with silence and enqueue it as a final
    /// frame. No-op when the accumulator is empty.
    pub fn flush_partial(&self) {
        let mut partial = self.shared.partial.lock();
        if partial.is_empty() {
            return;
        }
        partial.resize(FRAME_BYTES, self.shared.codec.silence_byte());
        let frame = Bytes::copy_from_slice(&partial);
        partial.clear();
        drop(partial);

        let mut queue = self.shared.queue.lock();
        if queue.len() >= self.shared.max_queued_frames {
            queue.pop_front();
            self.shared.frames_dropped.fetch_add(1, Ordering::Relaxed);
        }
        queue.push_back(frame);
    }

    /// Atomically drop all queued audio and the partial remainder, and
    /// disarm drain so no stale `on_drained` can fire. This is the
    /// barge-in path.
    pub fn clear(&self) {
        let mut queue = self.shared.queue.lock();
        let dropped = queue.len();
        queue.clear();
        drop(queue);
        self.shared.partial.lock().clear();
        self.shared.drain_armed.store(false, Ordering::Release);
        if dropped > 0 {
            debug!(dropped, "playout queue cleared");
        }
    }

    /// Frames currently queued (excluding the partial remainder)
    pub fn queued_frames(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Arm the drain signal: the next non-empty → empty transition fires
    /// `on_drained` once and disarms.
    pub fn arm_drain(&self) {
        self.shared.drain_armed.store(true, Ordering::Release);
    }

    /// Disarm the drain signal without firing it
    pub fn disarm_drain(&self) {
        self.shared.drain_armed.store(false, Ordering::Release);
    }

    /// Whether drain is currently armed
    pub fn drain_armed(&self) -> bool {
        self.shared.drain_armed.load(Ordering::Acquire)
    }

    /// Snapshot of the send-loop counters
    pub fn stats(&self) -> PlayoutStats {
        PlayoutStats {
            frames_sent: self.shared.frames_sent.load(Ordering::Relaxed),
            silence_sent: self.shared.silence_sent.load(Ordering::Relaxed),
            frames_dropped: self.shared.frames_dropped.load(Ordering::Relaxed),
            late_snaps: self.shared.late_snaps.load(Ordering::Relaxed),
            queued_frames: self.queued_frames(),
        }
    }
}

impl Drop for PlayoutClock {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The 20 ms cadence. Sleeps most of each tick, spins the last stretch,
/// and snaps forward rather than bursting when badly late.
fn send_loop(shared: Arc<Shared>, writer: Arc<dyn RtpWriter>, initial_timestamp: u32) {
    let silence = shared.codec.silence_frame();
    let payload_type = shared.codec.payload_type();
    let period = FRAME_DURATION;
    let mut timestamp = initial_timestamp;
    let mut next_send = Instant::now() + period;

    while shared.running.load(Ordering::Acquire) {
        hybrid_wait(next_send);

        let now = Instant::now();
        if now.saturating_duration_since(next_send) > period * SNAP_THRESHOLD_FRAMES {
            // Scheduler stall; re-anchor instead of bursting catch-up frames
            shared.late_snaps.fetch_add(1, Ordering::Relaxed);
            warn!("playout clock fell behind, snapping forward");
            next_send = now;
        }

        let (frame, emptied) = {
            let mut queue = shared.queue.lock();
            let frame = queue.pop_front();
            let emptied = frame.is_some() && queue.is_empty();
            (frame, emptied)
        };

        match frame {
            Some(payload) => {
                writer.send_frame(timestamp, &payload, payload_type);
                shared.frames_sent.fetch_add(1, Ordering::Relaxed);
            }
            None => {
                writer.send_frame(timestamp, &silence, payload_type);
                shared.silence_sent.fetch_add(1, Ordering::Relaxed);
            }
        }
        timestamp = timestamp.wrapping_add(TIMESTAMP_STEP);

        if emptied {
            trace!("playout queue emptied");
            let observer = shared.observer.lock().clone();
            let drained = shared.drain_armed.swap(false, Ordering::AcqRel);
            if let Some(observer) = observer {
                observer.on_queue_empty();
                if drained {
                    observer.on_drained();
                }
            }
        }

        next_send += period;
    }
}

fn hybrid_wait(deadline: Instant) {
    loop {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        let gap = deadline - now;
        if gap > SPIN_MARGIN {
            std::thread::sleep(gap - SPIN_MARGIN);
        } else {
            std::hint::spin_loop();
        }
    }
}

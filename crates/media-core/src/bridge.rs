//! Audio bridge
//!
//! Owns the mic gate, playout clock and output controller for one call and
//! wires the two audio directions together: inbound RTP frames run through
//! the gate and, when forwarded, are base64-encoded up to the realtime
//! transport; inbound realtime audio signals drive the output controller.
//!
//! The transport itself is behind the [`AudioUplink`] port so this crate
//! never links the wire protocol.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tokio::sync::mpsc;
use tracing::debug;

use crate::codec::{energy_deviation, G711Codec};
use crate::error::Result;
use crate::gate::MicGate;
use crate::output::{AudioOutputController, AudioOutputEvent, OutputConfig};
use crate::playout::{PlayoutClock, PlayoutConfig, PlayoutObserver};
use crate::rtp::RtpWriter;

/// Frames between audio-monitor debug log lines
const MONITOR_LOG_INTERVAL: u64 = 50;

/// Upstream port into the realtime transport
pub trait AudioUplink: Send + Sync {
    /// Forward one base64-encoded caller audio payload
    fn send_audio(&self, payload_base64: String);
    /// Cancel the in-flight model response (barge-in)
    fn send_cancel(&self);
}

/// Audio-relevant realtime events, already parsed by the session layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSignal {
    /// Assistant audio began
    Started,
    /// One base64 audio delta
    Delta(String),
    /// Assistant audio finished streaming
    Done,
    /// Server VAD heard the caller start talking (external barge-in)
    SpeechStarted,
}

/// Rolling counters for the inbound audio path
#[derive(Debug, Clone, Default)]
pub struct AudioMonitorStats {
    /// Frames forwarded to the transport
    pub forwarded_frames: u64,
    /// Frames held back by the gate
    pub gated_frames: u64,
    /// Barge-ins detected
    pub barge_ins: u64,
    /// Mean energy deviation over all observed frames
    pub avg_energy: f32,
}

/// Per-call bidirectional audio wiring
pub struct AudioBridge {
    codec: G711Codec,
    gate: Arc<MicGate>,
    playout: Arc<PlayoutClock>,
    output: Arc<AudioOutputController>,
    uplink: Arc<dyn AudioUplink>,
    forwarded_frames: AtomicU64,
    gated_frames: AtomicU64,
    barge_ins: AtomicU64,
    observed_frames: AtomicU64,
    energy_sum_milli: AtomicU64,
}

impl AudioBridge {
    /// Build the full output path for one call.
    ///
    /// `events` receives the controller's [`AudioOutputEvent`]s. Must be
    /// called inside a tokio runtime (the drain watchdog needs one).
    pub fn new(
        codec: G711Codec,
        uplink: Arc<dyn AudioUplink>,
        events: mpsc::UnboundedSender<AudioOutputEvent>,
        output_config: OutputConfig,
    ) -> Arc<Self> {
        let gate = Arc::new(MicGate::new(codec));
        let playout = Arc::new(PlayoutClock::new(PlayoutConfig {
            codec,
            ..Default::default()
        }));
        let output = Arc::new(AudioOutputController::new(
            Arc::clone(&gate),
            Arc::clone(&playout),
            Arc::clone(&uplink),
            events,
            output_config,
        ));
        playout.set_observer(Arc::clone(&output) as Arc<dyn PlayoutObserver>);

        Arc::new(Self {
            codec,
            gate,
            playout,
            output,
            uplink,
            forwarded_frames: AtomicU64::new(0),
            gated_frames: AtomicU64::new(0),
            barge_ins: AtomicU64::new(0),
            observed_frames: AtomicU64::new(0),
            energy_sum_milli: AtomicU64::new(0),
        })
    }

    /// Start the outbound playout clock
    pub fn start(&self, writer: Arc<dyn RtpWriter>) -> Result<()> {
        self.playout.start(writer)
    }

    /// Stop the playout clock
    pub fn stop(&self) {
        self.playout.stop();
    }

    /// The call's mic gate
    pub fn gate(&self) -> &Arc<MicGate> {
        &self.gate
    }

    /// The call's playout clock
    pub fn playout(&self) -> &Arc<PlayoutClock> {
        &self.playout
    }

    /// The call's output controller
    pub fn output(&self) -> &Arc<AudioOutputController> {
        &self.output
    }

    /// One inbound caller RTP payload.
    ///
    /// Runs the gate decision; a barge-in flushes the output path before
    /// the triggering frame is forwarded.
    pub fn handle_inbound_rtp(&self, payload: &[u8]) {
        self.observe_energy(payload);

        let decision = self.gate.should_forward(payload);
        if decision.barge_in {
            self.barge_ins.fetch_add(1, Ordering::Relaxed);
            self.output.handle_barge_in();
        }
        if decision.forward {
            self.forwarded_frames.fetch_add(1, Ordering::Relaxed);
            self.uplink.send_audio(BASE64.encode(payload));
        } else {
            self.gated_frames.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// One audio-relevant realtime event
    pub fn handle_signal(&self, signal: AudioSignal) {
        match signal {
            AudioSignal::Started => self.output.handle_audio_started(),
            AudioSignal::Delta(delta) => self.output.handle_audio_delta(&delta),
            AudioSignal::Done => self.output.handle_audio_done(),
            AudioSignal::SpeechStarted => self.output.handle_barge_in(),
        }
    }

    /// Snapshot of the inbound monitor counters
    pub fn monitor_stats(&self) -> AudioMonitorStats {
        let observed = self.observed_frames.load(Ordering::Relaxed);
        let avg_energy = if observed == 0 {
            0.0
        } else {
            (self.energy_sum_milli.load(Ordering::Relaxed) as f32 / 1000.0) / observed as f32
        };
        AudioMonitorStats {
            forwarded_frames: self.forwarded_frames.load(Ordering::Relaxed),
            gated_frames: self.gated_frames.load(Ordering::Relaxed),
            barge_ins: self.barge_ins.load(Ordering::Relaxed),
            avg_energy,
        }
    }

    fn observe_energy(&self, payload: &[u8]) {
        let energy = energy_deviation(payload, self.codec.silence_byte());
        self.energy_sum_milli
            .fetch_add((energy * 1000.0) as u64, Ordering::Relaxed);
        let observed = self.observed_frames.fetch_add(1, Ordering::Relaxed) + 1;
        if observed % MONITOR_LOG_INTERVAL == 0 {
            let stats = self.monitor_stats();
            debug!(
                forwarded = stats.forwarded_frames,
                gated = stats.gated_frames,
                barge_ins = stats.barge_ins,
                avg_energy = stats.avg_energy,
                "audio monitor"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::FRAME_BYTES;
    use std::sync::atomic::AtomicUsize;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingUplink {
        audio: Mutex<Vec<String>>,
        cancels: AtomicUsize,
    }

    impl AudioUplink for RecordingUplink {
        fn send_audio(&self, payload_base64: String) {
            self.audio.lock().push(payload_base64);
        }
        fn send_cancel(&self) {
            self.cancels.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn bridge() -> (Arc<AudioBridge>, Arc<RecordingUplink>) {
        let uplink = Arc::new(RecordingUplink::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        let bridge = AudioBridge::new(
            G711Codec::Pcma,
            uplink.clone() as Arc<dyn AudioUplink>,
            tx,
            OutputConfig::default(),
        );
        (bridge, uplink)
    }

    fn loud_frame() -> Vec<u8> {
        (0..FRAME_BYTES)
            .map(|i| if i % 2 == 0 { 0x10 } else { 0x9A })
            .collect()
    }

    #[tokio::test]
    async fn ungated_frames_are_forwarded_base64() {
        let (bridge, uplink) = bridge();
        let frame = loud_frame();
        bridge.handle_inbound_rtp(&frame);

        let sent = uplink.audio.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(BASE64.decode(&sent[0]).unwrap(), frame);
    }

    #[tokio::test]
    async fn gated_frames_are_held() {
        let (bridge, uplink) = bridge();
        bridge.handle_signal(AudioSignal::Started);
        bridge.handle_inbound_rtp(&loud_frame());
        assert!(uplink.audio.lock().is_empty());
        assert_eq!(bridge.monitor_stats().gated_frames, 1);
    }

    #[tokio::test]
    async fn delta_signal_reaches_playout() {
        let (bridge, _uplink) = bridge();
        let delta = BASE64.encode(vec![0u8; FRAME_BYTES * 2]);
        bridge.handle_signal(AudioSignal::Delta(delta));
        assert_eq!(bridge.playout().queued_frames(), 2);
    }

    #[tokio::test]
    async fn speech_started_flushes_output_path() {
        let (bridge, uplink) = bridge();
        bridge.handle_signal(AudioSignal::Started);
        bridge.handle_signal(AudioSignal::Delta(BASE64.encode(vec![0u8; FRAME_BYTES * 5])));
        assert_eq!(bridge.playout().queued_frames(), 5);

        bridge.handle_signal(AudioSignal::SpeechStarted);
        assert_eq!(bridge.playout().queued_frames(), 0);
        assert_eq!(uplink.cancels.load(Ordering::SeqCst), 1);
        assert!(!bridge.gate().is_gated());
    }
}

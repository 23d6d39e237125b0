//! # Media core for the ridebridge project
//!
//! `media-core` owns everything that touches raw G.711 audio on its way
//! between the telephone leg and the realtime model: the mic gate that
//! keeps assistant echo out of the model while allowing barge-in, the
//! 20 ms playout clock that paces synthesized audio onto the RTP leg, the
//! delta accumulator that turns streamed base64 chunks into exact
//! 160-byte frames, and the bridge that wires the pieces together.
//!
//! ## Core components
//!
//! - **MicGate**: energy-based gating with a double-talk guard and
//!   barge-in smoothing
//! - **PlayoutClock**: deterministic 20 ms sender on a dedicated OS
//!   thread, with drain signalling
//! - **AudioOutputController**: base64 delta handling, gate lifecycle,
//!   barge-in flush, drain watchdog
//! - **AudioBridge**: inbound RTP → gate → uplink and realtime audio
//!   signals → output controller
//!
//! Audio is G.711 passthrough in both directions; this crate never
//! transcodes. One frame is always exactly 160 bytes (20 ms at 8 kHz).
//!
//! The realtime transport is reached through the [`AudioUplink`] port so
//! this crate stays independent of the wire protocol; the session layer
//! provides the adapter.

pub mod bridge;
pub mod codec;
pub mod error;
pub mod gate;
pub mod output;
pub mod playout;
pub mod rtp;

pub use bridge::{AudioBridge, AudioMonitorStats, AudioSignal, AudioUplink};
pub use codec::{G711Codec, FRAME_BYTES, FRAME_DURATION, SAMPLE_RATE_HZ, TIMESTAMP_STEP};
pub use error::{Error, Result};
pub use gate::{GateDecision, MicGate};
pub use output::{AudioOutputController, AudioOutputEvent, OutputConfig};
pub use playout::{PlayoutClock, PlayoutConfig, PlayoutObserver, PlayoutStats};
pub use rtp::RtpWriter;

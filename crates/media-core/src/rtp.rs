//! Outbound RTP port
//!
//! The SIP stack owns sockets, SSRC and sequence numbers; this crate only
//! hands it timed payloads. Implementations must be cheap and must not
//! block: `send_frame` is called from the playout clock thread once every
//! 20 ms and a slow implementation will skew the cadence for the whole
//! call.

/// Outbound half of the RTP I/O port
pub trait RtpWriter: Send + Sync {
    /// Transmit one G.711 frame.
    ///
    /// `timestamp` is the RTP timestamp (8 kHz units, advancing by 160 per
    /// frame), `payload` is exactly one frame of companded audio, and
    /// `payload_type` is 8 (PCMA) or 0 (PCMU). Errors are the
    /// implementation's to log; the clock never retries a frame.
    fn send_frame(&self, timestamp: u32, payload: &[u8], payload_type: u8);
}

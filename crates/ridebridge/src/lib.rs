//! # ridebridge
//!
//! Bridges a PSTN G.711 telephone leg to a cloud realtime conversational
//! model for a taxi-booking voice assistant. The SIP stack feeds inbound
//! RTP payloads in and provides an [`RtpWriter`](media::RtpWriter) for the
//! paced outbound leg; everything between - mic gating, barge-in, the
//! 20 ms playout clock, the realtime protocol, the deterministic booking
//! dialogue - lives in the component crates re-exported here.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ridebridge::prelude::*;
//!
//! # async fn run(rtp: Arc<dyn RtpWriter>, backend: Arc<dyn BookingBackend>) -> anyhow::Result<()> {
//! let config = CallConfig {
//!     auth_token: std::env::var("REALTIME_API_KEY")?,
//!     ..Default::default()
//! };
//! let (session, mut events) = CallSession::start(config, G711Codec::Pcma, rtp, backend).await?;
//!
//! // Feed caller audio from the RTP stack:
//! // session.handle_inbound_rtp(payload);
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         SessionEvent::HangupRequested { .. } => break,
//!         SessionEvent::TransferRequested { reason } => {
//!             // hand the leg to an operator
//!             break;
//!         }
//!         _ => {}
//!     }
//! }
//! session.shutdown(EndReason::Completed).await;
//! # Ok(())
//! # }
//! ```

/// Audio path: codec utilities, mic gate, playout clock, bridge
pub use ridebridge_media_core as media;

/// Realtime protocol: transport, events, instruction sequencing
pub use ridebridge_realtime_core as realtime;

/// Deterministic booking dialogue: engine, slots, turn analyzer
pub use ridebridge_dialog_core as dialog;

/// Per-call orchestration: sessions, tool routing, backends
pub use ridebridge_session_core as session;

/// The types an integrator typically needs
pub mod prelude {
    pub use crate::dialog::{BookingSlots, NextAction, Stage};
    pub use crate::media::{AudioBridge, G711Codec, RtpWriter};
    pub use crate::realtime::{ServerEvent, WsConfig};
    pub use crate::session::{
        BookingBackend, CallConfig, CallSession, DispatchOutcome, EndReason, GeocodeOutcome,
        SessionEvent,
    };
}

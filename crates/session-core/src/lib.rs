//! # Session core for the ridebridge project
//!
//! `session-core` ties the other crates into a per-call unit: it connects
//! the realtime transport, configures the session (G.711 both ways, server
//! VAD, the booking tool), speaks the greeting, and then fans every inbound
//! event out to the right component - audio to `media-core`, tool calls to
//! the [`ToolRouter`], transcripts and lifecycle to the orchestrator
//! itself.
//!
//! ## Core components
//!
//! - **ToolRouter**: the single entry point for model tool calls - dedup,
//!   throttling, turn reconciliation, engine stepping, backend execution
//!   and result emission with strict ordering
//! - **CallSession**: per-call lifecycle (connect → greeting → event loop
//!   → teardown) with the no-reply watchdog and the shutdown channel
//! - **BookingBackend**: the injected geocode/dispatch port
//!
//! The embedding SIP stack drives a session with inbound RTP payloads and
//! listens on the [`SessionEvent`] stream for transfer/hangup decisions.

pub mod backend;
pub mod config;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod router;

pub use backend::{BookingBackend, DispatchOutcome, GeocodeOutcome};
pub use config::{CallConfig, VadConfig};
pub use error::{Error, Result};
pub use events::{CallId, EndReason, SessionEvent};
pub use orchestrator::CallSession;
pub use router::ToolRouter;

//! Session event surface
//!
//! The embedding SIP layer reacts to these; the session itself never
//! terminates a SIP leg or bridges an operator.

use std::fmt;

use uuid::Uuid;

/// Opaque per-call identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallId(String);

impl CallId {
    /// Generate a fresh id
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// The id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// Booking completed and the assistant said goodbye
    Completed,
    /// Caller cancelled or the dialogue hung up without a booking
    HungUp,
    /// Handed off to a human operator
    Transferred,
    /// The realtime connection dropped mid-call
    Disconnected,
    /// An unrecoverable internal failure
    Failed(String),
}

/// Events a call session surfaces to its owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The dialogue wants a human operator
    TransferRequested {
        /// Why the engine escalated
        reason: String,
    },
    /// The dialogue wants to end the call after the goodbye plays
    HangupRequested {
        /// Goodbye text being spoken
        goodbye: String,
    },
    /// The mic gate reopened
    MicUngated {
        /// True when forced by the drain watchdog
        forced: bool,
    },
    /// The session is over; no further events follow
    CallEnded {
        /// Why it ended
        reason: EndReason,
    },
}

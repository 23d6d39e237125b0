//! Engine input and output event types
//!
//! These are the only values that cross the engine boundary: tool-call
//! synchronizations and backend lookup results go in, next actions come
//! out.

use serde::{Deserialize, Serialize};

use crate::slots::BookingSlots;

/// Caller intent carried by a tool synchronization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// Provide or change one or more booking fields
    UpdateField,
    /// Accept the read-back booking details
    Confirm,
    /// Reject the read-back booking details
    Decline,
    /// Abandon the booking entirely
    Cancel,
    /// Change a specific field during confirmation
    Amend,
}

impl Intent {
    /// Parse the wire string, defaulting unknown values to `UpdateField`
    pub fn parse(raw: &str) -> Intent {
        match raw.trim().to_ascii_lowercase().as_str() {
            "confirm" => Intent::Confirm,
            "decline" => Intent::Decline,
            "cancel" => Intent::Cancel,
            "amend" => Intent::Amend,
            _ => Intent::UpdateField,
        }
    }

    /// Wire name of the intent
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::UpdateField => "update_field",
            Intent::Confirm => "confirm",
            Intent::Decline => "decline",
            Intent::Cancel => "cancel",
            Intent::Amend => "amend",
        }
    }
}

impl Default for Intent {
    fn default() -> Self {
        Intent::UpdateField
    }
}

/// A booking-data synchronization derived from one model tool call
///
/// Field values are raw strings as heard from the caller; the engine owns
/// validation (passenger bounds, time parsing). Any subset may be present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolSyncEvent {
    /// Tool call id this synchronization came from
    pub call_id: String,
    /// Caller's name, if offered
    pub caller_name: Option<String>,
    /// Caller's area, if offered
    pub caller_area: Option<String>,
    /// Raw pickup address
    pub pickup: Option<String>,
    /// Raw destination address
    pub destination: Option<String>,
    /// Raw passenger count (unvalidated)
    pub passengers: Option<i64>,
    /// Raw pickup time (`"ASAP"` or a datetime string, unvalidated)
    pub pickup_time: Option<String>,
    /// Driver notes
    pub special_instructions: Option<String>,
    /// What the caller is doing this turn
    pub intent: Intent,
    /// Model's reading of the caller's words
    pub interpretation: String,
    /// Verbatim last utterance per the model
    pub last_utterance: String,
}

impl ToolSyncEvent {
    /// True when the event carries no slot payload at all
    pub fn is_empty_update(&self) -> bool {
        self.caller_name.is_none()
            && self.caller_area.is_none()
            && self.pickup.is_none()
            && self.destination.is_none()
            && self.passengers.is_none()
            && self.pickup_time.is_none()
            && self.special_instructions.is_none()
    }
}

/// Which backend lookup a result belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendResultKind {
    /// Pickup address geocode
    GeocodePickup,
    /// Destination address geocode
    GeocodeDropoff,
    /// Booking dispatch
    Dispatch,
}

/// Result of an asynchronous backend lookup fed back into the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendResultEvent {
    /// Lookup this result answers
    pub kind: BackendResultKind,
    /// Whether the lookup succeeded
    pub ok: bool,
    /// Normalized address on geocode success
    pub normalized_address: Option<String>,
    /// Booking reference on dispatch success
    pub booking_id: Option<String>,
    /// Backend error description on failure
    pub error: Option<String>,
}

impl BackendResultEvent {
    /// Successful geocode result
    pub fn geocoded(kind: BackendResultKind, normalized: impl Into<String>) -> Self {
        Self {
            kind,
            ok: true,
            normalized_address: Some(normalized.into()),
            booking_id: None,
            error: None,
        }
    }

    /// Failed lookup of any kind
    pub fn failed(kind: BackendResultKind, error: impl Into<String>) -> Self {
        Self {
            kind,
            ok: false,
            normalized_address: None,
            booking_id: None,
            error: Some(error.into()),
        }
    }

    /// Successful dispatch result
    pub fn dispatched(booking_id: impl Into<String>) -> Self {
        Self {
            kind: BackendResultKind::Dispatch,
            ok: true,
            normalized_address: None,
            booking_id: Some(booking_id.into()),
            error: None,
        }
    }
}

/// Any input the engine can step on
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A tool-call synchronization from the model
    ToolSync(ToolSyncEvent),
    /// A backend lookup result
    BackendResult(BackendResultEvent),
}

/// What the session layer must do next, as decided by the engine
#[derive(Debug, Clone, PartialEq)]
pub enum NextAction {
    /// Speak a question or statement and wait for the caller
    Ask {
        /// Text the assistant is instructed to speak
        text: String,
    },
    /// Speak a goodbye and end the call
    Hangup {
        /// Goodbye text
        text: String,
    },
    /// Hand the call to a human operator
    Transfer {
        /// Why the engine gave up
        reason: String,
    },
    /// Resolve the raw pickup address with the geocoder
    GeocodePickup {
        /// Raw address to resolve
        raw: String,
    },
    /// Resolve the raw destination address with the geocoder
    GeocodeDropoff {
        /// Raw address to resolve
        raw: String,
    },
    /// Submit the completed booking to dispatch
    Dispatch {
        /// Snapshot of the booking at confirmation time
        slots: BookingSlots,
    },
    /// Nothing actionable; acknowledge the tool call and stay put
    None {
        /// Why nothing happened
        why: String,
    },
    /// Nothing actionable and the model should not speak either
    Silence {
        /// Why the engine wants quiet
        why: String,
    },
}

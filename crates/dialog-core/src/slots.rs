//! Booking slot storage and validation
//!
//! Slots are collected incrementally over the call. Address fields hold the
//! caller's raw words until a geocode result replaces them with a
//! normalized form; the `*_normalized` flags track which state each address
//! is in so the engine knows what still needs resolving.

use chrono::{NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

/// Inclusive passenger count bounds for a single vehicle
pub const MIN_PASSENGERS: i64 = 1;
/// Upper bound; larger parties are escalated to a human dispatcher
pub const MAX_PASSENGERS: i64 = 8;

/// Requested pickup time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PickupTime {
    /// Dispatch as soon as a vehicle is available
    Asap,
    /// Dispatch for a specific local date and time
    At(NaiveDateTime),
}

impl PickupTime {
    /// Parse a caller-provided pickup time.
    ///
    /// Accepts the literal `ASAP` (case-insensitive), `YYYY-MM-DD HH:MM`,
    /// the `T`-separated ISO variant, and a bare `HH:MM` which resolves
    /// against the injected `now` (same day, or next day if the time has
    /// already passed).
    pub fn parse(raw: &str, now: NaiveDateTime) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed.eq_ignore_ascii_case("asap") || trimmed.eq_ignore_ascii_case("now") {
            return Some(PickupTime::Asap);
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M") {
            return Some(PickupTime::At(dt));
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M") {
            return Some(PickupTime::At(dt));
        }
        if let Ok(time) = NaiveTime::parse_from_str(trimmed, "%H:%M") {
            let mut date = now.date();
            if time <= now.time() {
                date = date.succ_opt().unwrap_or(date);
            }
            return Some(PickupTime::At(date.and_time(time)));
        }
        None
    }

    /// Human-readable form used in confirmation summaries
    pub fn describe(&self) -> String {
        match self {
            PickupTime::Asap => "as soon as possible".to_string(),
            PickupTime::At(dt) => dt.format("%H:%M on %A %-d %B").to_string(),
        }
    }
}

/// Validate a passenger count into the accepted range
pub fn validate_passengers(count: i64) -> Option<u8> {
    if (MIN_PASSENGERS..=MAX_PASSENGERS).contains(&count) {
        Some(count as u8)
    } else {
        None
    }
}

/// The booking fields collected over the call
///
/// Any subset may be present at any time; the engine decides which missing
/// field to ask for next. Addresses stay opaque caller phrasing until the
/// matching geocode result lands.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BookingSlots {
    /// Name the caller gave, if any
    pub caller_name: Option<String>,
    /// Coarse area the caller mentioned (suburb, district)
    pub caller_area: Option<String>,
    /// Pickup address (raw until `pickup_normalized`)
    pub pickup: Option<String>,
    /// Whether `pickup` holds a geocoder-normalized address
    pub pickup_normalized: bool,
    /// Destination address (raw until `destination_normalized`)
    pub destination: Option<String>,
    /// Whether `destination` holds a geocoder-normalized address
    pub destination_normalized: bool,
    /// Party size, validated into 1..=8
    pub passengers: Option<u8>,
    /// Requested pickup time
    pub pickup_time: Option<PickupTime>,
    /// Free-text notes for the driver
    pub special_instructions: Option<String>,
}

impl BookingSlots {
    /// True once both addresses are normalized and passengers + time are set
    pub fn ready_to_confirm(&self) -> bool {
        self.pickup.is_some()
            && self.pickup_normalized
            && self.destination.is_some()
            && self.destination_normalized
            && self.passengers.is_some()
            && self.pickup_time.is_some()
    }

    /// Replace the pickup address with a new raw value, clearing the
    /// normalized flag when the text actually changed.
    pub fn set_pickup_raw(&mut self, raw: String) {
        if self.pickup.as_deref() != Some(raw.as_str()) {
            self.pickup = Some(raw);
            self.pickup_normalized = false;
        }
    }

    /// Replace the destination address with a new raw value, clearing the
    /// normalized flag when the text actually changed.
    pub fn set_destination_raw(&mut self, raw: String) {
        if self.destination.as_deref() != Some(raw.as_str()) {
            self.destination = Some(raw);
            self.destination_normalized = false;
        }
    }

    /// Store a geocoder-normalized pickup address
    pub fn set_pickup_normalized(&mut self, normalized: String) {
        self.pickup = Some(normalized);
        self.pickup_normalized = true;
    }

    /// Store a geocoder-normalized destination address
    pub fn set_destination_normalized(&mut self, normalized: String) {
        self.destination = Some(normalized);
        self.destination_normalized = true;
    }
}

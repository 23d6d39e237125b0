//! Booking backend port
//!
//! Geocoding and dispatch are external services; the session layer only
//! sees these outcome shapes. Geocode is idempotent on its input and may
//! be retried by the engine; dispatch is not - a failed dispatch escalates
//! to a human instead of retrying.

use async_trait::async_trait;
use ridebridge_dialog_core::BookingSlots;

/// Result of a geocode lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeocodeOutcome {
    /// Whether the address resolved
    pub ok: bool,
    /// Normalized address on success
    pub normalized: Option<String>,
    /// Error description on failure
    pub error: Option<String>,
}

impl GeocodeOutcome {
    /// A successful lookup
    pub fn found(normalized: impl Into<String>) -> Self {
        Self {
            ok: true,
            normalized: Some(normalized.into()),
            error: None,
        }
    }

    /// A failed lookup
    pub fn not_found(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            normalized: None,
            error: Some(error.into()),
        }
    }
}

/// Result of a dispatch submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Whether the booking was accepted
    pub ok: bool,
    /// Booking reference on success
    pub booking_id: Option<String>,
    /// Error description on failure
    pub error: Option<String>,
}

impl DispatchOutcome {
    /// An accepted booking
    pub fn booked(booking_id: impl Into<String>) -> Self {
        Self {
            ok: true,
            booking_id: Some(booking_id.into()),
            error: None,
        }
    }

    /// A rejected booking
    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            booking_id: None,
            error: Some(error.into()),
        }
    }
}

/// External lookups the booking flow depends on
#[async_trait]
pub trait BookingBackend: Send + Sync {
    /// Resolve a raw caller-spoken address to a normalized one
    async fn geocode(&self, raw_address: &str) -> GeocodeOutcome;

    /// Submit a completed booking to dispatch
    async fn dispatch(&self, slots: &BookingSlots) -> DispatchOutcome;
}

//! Fixed assistant texts
//!
//! Every spoken line the engine can demand lives here so the state machine
//! itself stays language-agnostic.

use crate::slots::BookingSlots;

/// Opening line after the call is answered
pub fn greeting() -> String {
    "Hello, you've reached the taxi booking line. Where would you like to be picked up from?"
        .to_string()
}

/// Re-ask for a pickup address when none was captured
pub fn ask_pickup() -> String {
    "Sorry, I didn't catch the pickup address. Where should the driver collect you?".to_string()
}

/// Re-ask after a failed geocode attempt
pub fn ask_address_retry(raw: &str) -> String {
    format!(
        "I couldn't find \"{raw}\" on the map. Could you give me the address again, \
         with the street and the area?"
    )
}

/// Ask for the destination once pickup is resolved
pub fn ask_dropoff(pickup_normalized: &str) -> String {
    format!("Got it, picking up from {pickup_normalized}. And where are you heading?")
}

/// Ask for the party size
pub fn ask_passengers() -> String {
    "How many passengers will be travelling?".to_string()
}

/// Re-ask after an out-of-range passenger count
pub fn ask_passengers_invalid() -> String {
    "We can seat between one and eight passengers in a single booking. \
     How many will be travelling?"
        .to_string()
}

/// Ask for the pickup time
pub fn ask_time() -> String {
    "When would you like the taxi? You can say a time, or ASAP.".to_string()
}

/// Re-ask after an unparseable pickup time
pub fn ask_time_invalid() -> String {
    "Sorry, I didn't catch the time. Please give a time like half past three, \
     or say ASAP."
        .to_string()
}

/// Read the booking back for confirmation
pub fn confirm_summary(slots: &BookingSlots) -> String {
    let pickup = slots.pickup.as_deref().unwrap_or("an unknown address");
    let destination = slots.destination.as_deref().unwrap_or("an unknown address");
    let passengers = slots.passengers.unwrap_or(1);
    let when = slots
        .pickup_time
        .as_ref()
        .map(|t| t.describe())
        .unwrap_or_else(|| "as soon as possible".to_string());
    let plural = if passengers == 1 { "passenger" } else { "passengers" };
    format!(
        "Let me read that back: {passengers} {plural} from {pickup} to {destination}, {when}. \
         Is that all correct?"
    )
}

/// Prompt after the caller declines the summary
pub fn ask_what_to_change() -> String {
    "No problem. What would you like to change?".to_string()
}

/// Goodbye after the caller cancels
pub fn cancel_goodbye() -> String {
    "That's fine, nothing has been booked. Thanks for calling, goodbye.".to_string()
}

/// Goodbye after a successful dispatch
pub fn success_goodbye(booking_id: &str) -> String {
    format!(
        "Your taxi is booked, reference {booking_id}. You'll get a call when the \
         driver is close. Thanks for calling, goodbye."
    )
}

/// Transfer reason after repeated geocode failures
pub fn transfer_geocode_reason(which: &str) -> String {
    format!("Could not resolve the {which} address after repeated attempts")
}

/// Transfer reason after a dispatch failure
pub fn transfer_dispatch_reason(error: &str) -> String {
    format!("Dispatch failed: {error}")
}

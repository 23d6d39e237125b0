//! Deterministic booking state machine
//!
//! The engine is the sole authority for stage transitions. It performs no
//! I/O and reads no clocks; callers inject `now` at construction for
//! pickup-time resolution. Every transition is a pure function of the
//! current `(stage, slots)` state and the incoming event, which is what
//! makes the dialogue unit-testable end to end.

use std::fmt;

use chrono::NaiveDateTime;
use tracing::trace;

use crate::events::{
    BackendResultEvent, BackendResultKind, EngineEvent, Intent, NextAction, ToolSyncEvent,
};
use crate::prompts;
use crate::slots::{validate_passengers, BookingSlots, PickupTime};

/// Geocode attempts per address before escalating to a human
const MAX_GEOCODE_ATTEMPTS: u8 = 3;

/// Discrete state of the booking dialogue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Call answered, greeting not yet spoken
    Greeting,
    /// Waiting for a pickup address
    CollectPickup,
    /// Pickup address sent to the geocoder
    GeocodingPickup,
    /// Waiting for a destination address
    CollectDropoff,
    /// Destination address sent to the geocoder
    GeocodingDropoff,
    /// Waiting for the party size
    CollectPassengers,
    /// Waiting for the pickup time
    CollectTime,
    /// Waiting for the caller to confirm the read-back
    ConfirmDetails,
    /// Booking sent to dispatch
    Dispatching,
    /// Booking completed
    Done,
    /// Handed off to a human operator
    Transferred,
    /// Call ended without a booking
    HungUp,
}

impl Stage {
    /// Terminal stages accept no further events
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Done | Stage::Transferred | Stage::HungUp)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Greeting => "Greeting",
            Stage::CollectPickup => "CollectPickup",
            Stage::GeocodingPickup => "GeocodingPickup",
            Stage::CollectDropoff => "CollectDropoff",
            Stage::GeocodingDropoff => "GeocodingDropoff",
            Stage::CollectPassengers => "CollectPassengers",
            Stage::CollectTime => "CollectTime",
            Stage::ConfirmDetails => "ConfirmDetails",
            Stage::Dispatching => "Dispatching",
            Stage::Done => "Done",
            Stage::Transferred => "Transferred",
            Stage::HungUp => "HungUp",
        };
        f.write_str(name)
    }
}

/// Outcome of applying a tool synchronization's slot payload
#[derive(Debug, Default)]
struct SlotApplication {
    /// At least one slot value changed
    any_applied: bool,
    /// A passenger count was given but out of range
    invalid_passengers: bool,
    /// A pickup time was given but unparseable
    invalid_time: bool,
}

/// Stage-based deterministic booking engine
pub struct BookingEngine {
    stage: Stage,
    slots: BookingSlots,
    now: NaiveDateTime,
    pickup_attempts: u8,
    dropoff_attempts: u8,
}

impl BookingEngine {
    /// Create an engine at the greeting stage.
    ///
    /// `now` anchors relative pickup times; the engine never reads a clock
    /// itself.
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            stage: Stage::Greeting,
            slots: BookingSlots::default(),
            now,
            pickup_attempts: 0,
            dropoff_attempts: 0,
        }
    }

    /// Begin the dialogue: moves to pickup collection and asks the greeting
    pub fn start(&mut self) -> NextAction {
        if self.stage == Stage::Greeting {
            self.transition(Stage::CollectPickup);
        }
        NextAction::Ask {
            text: prompts::greeting(),
        }
    }

    /// Current stage
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Current booking slots
    pub fn slots(&self) -> &BookingSlots {
        &self.slots
    }

    /// Step the machine with one event and return what to do next
    pub fn step(&mut self, event: EngineEvent) -> NextAction {
        if self.stage.is_terminal() {
            return NextAction::None {
                why: format!("call already ended in stage {}", self.stage),
            };
        }
        match event {
            EngineEvent::ToolSync(sync) => self.step_tool_sync(sync),
            EngineEvent::BackendResult(result) => self.step_backend_result(result),
        }
    }

    fn step_tool_sync(&mut self, sync: ToolSyncEvent) -> NextAction {
        if sync.intent == Intent::Cancel {
            self.transition(Stage::HungUp);
            return NextAction::Hangup {
                text: prompts::cancel_goodbye(),
            };
        }

        // A tool call before the greeting fired still counts as the caller
        // talking; fold it into pickup collection.
        if self.stage == Stage::Greeting {
            self.transition(Stage::CollectPickup);
        }

        let applied = self.apply_slots(&sync);

        match self.stage {
            Stage::ConfirmDetails => self.step_confirmation(&sync, &applied),
            Stage::GeocodingPickup => {
                // A corrected address while a geocode is in flight restarts
                // the lookup with the new text.
                if applied.any_applied && !self.slots.pickup_normalized {
                    if let Some(raw) = self.slots.pickup.clone() {
                        return NextAction::GeocodePickup { raw };
                    }
                }
                NextAction::None {
                    why: "awaiting pickup geocode".to_string(),
                }
            }
            Stage::GeocodingDropoff => {
                if applied.any_applied && !self.slots.destination_normalized {
                    if let Some(raw) = self.slots.destination.clone() {
                        return NextAction::GeocodeDropoff { raw };
                    }
                }
                NextAction::None {
                    why: "awaiting destination geocode".to_string(),
                }
            }
            Stage::Dispatching => NextAction::None {
                why: "dispatch already in flight".to_string(),
            },
            _ => self.step_collection(&sync, &applied),
        }
    }

    /// Collection stages: apply whatever arrived, then decide whether the
    /// current stage's slot is satisfied.
    fn step_collection(&mut self, sync: &ToolSyncEvent, applied: &SlotApplication) -> NextAction {
        if let Some(reask) = self.validation_reask(applied) {
            return reask;
        }

        if self.current_slot_satisfied() {
            return self.advance();
        }

        if applied.any_applied {
            // An out-of-stage slot was stored; re-ask for the one this
            // stage still needs.
            return NextAction::Ask {
                text: self.current_stage_question(),
            };
        }

        if sync.is_empty_update() {
            return NextAction::None {
                why: "no actionable slot update in turn".to_string(),
            };
        }

        NextAction::None {
            why: "slot update did not change state".to_string(),
        }
    }

    fn step_confirmation(&mut self, sync: &ToolSyncEvent, applied: &SlotApplication) -> NextAction {
        match sync.intent {
            Intent::Confirm => {
                self.transition(Stage::Dispatching);
                NextAction::Dispatch {
                    slots: self.slots.clone(),
                }
            }
            Intent::Decline => {
                self.transition(Stage::CollectPickup);
                NextAction::Ask {
                    text: prompts::ask_what_to_change(),
                }
            }
            Intent::Amend | Intent::UpdateField => {
                if let Some(reask) = self.validation_reask(applied) {
                    return reask;
                }
                if applied.any_applied {
                    // An amended address may need re-resolving before the
                    // summary can be read back again.
                    return self.advance();
                }
                NextAction::Ask {
                    text: prompts::confirm_summary(&self.slots),
                }
            }
            // Cancel is intercepted before stage dispatch
            Intent::Cancel => NextAction::None {
                why: "cancel handled at turn entry".to_string(),
            },
        }
    }

    fn step_backend_result(&mut self, result: BackendResultEvent) -> NextAction {
        match (self.stage, result.kind) {
            (Stage::GeocodingPickup, BackendResultKind::GeocodePickup) => {
                if result.ok {
                    let normalized = result.normalized_address.unwrap_or_default();
                    self.slots.set_pickup_normalized(normalized);
                    self.pickup_attempts = 0;
                    self.advance()
                } else {
                    self.pickup_attempts += 1;
                    if self.pickup_attempts >= MAX_GEOCODE_ATTEMPTS {
                        self.transition(Stage::Transferred);
                        NextAction::Transfer {
                            reason: prompts::transfer_geocode_reason("pickup"),
                        }
                    } else {
                        let raw = self.slots.pickup.clone().unwrap_or_default();
                        self.slots.pickup = None;
                        self.slots.pickup_normalized = false;
                        self.transition(Stage::CollectPickup);
                        NextAction::Ask {
                            text: prompts::ask_address_retry(&raw),
                        }
                    }
                }
            }
            (Stage::GeocodingDropoff, BackendResultKind::GeocodeDropoff) => {
                if result.ok {
                    let normalized = result.normalized_address.unwrap_or_default();
                    self.slots.set_destination_normalized(normalized);
                    self.dropoff_attempts = 0;
                    self.advance()
                } else {
                    self.dropoff_attempts += 1;
                    if self.dropoff_attempts >= MAX_GEOCODE_ATTEMPTS {
                        self.transition(Stage::Transferred);
                        NextAction::Transfer {
                            reason: prompts::transfer_geocode_reason("destination"),
                        }
                    } else {
                        let raw = self.slots.destination.clone().unwrap_or_default();
                        self.slots.destination = None;
                        self.slots.destination_normalized = false;
                        self.transition(Stage::CollectDropoff);
                        NextAction::Ask {
                            text: prompts::ask_address_retry(&raw),
                        }
                    }
                }
            }
            (Stage::Dispatching, BackendResultKind::Dispatch) => {
                if result.ok {
                    let booking_id = result.booking_id.unwrap_or_default();
                    self.transition(Stage::Done);
                    NextAction::Hangup {
                        text: prompts::success_goodbye(&booking_id),
                    }
                } else {
                    let error = result.error.unwrap_or_else(|| "unknown error".to_string());
                    self.transition(Stage::Transferred);
                    NextAction::Transfer {
                        reason: prompts::transfer_dispatch_reason(&error),
                    }
                }
            }
            (stage, kind) => NextAction::None {
                why: format!("stale backend result {kind:?} in stage {stage}"),
            },
        }
    }

    /// Merge the event's slot payload into the booking, tracking validation
    /// failures for the stage handlers.
    fn apply_slots(&mut self, sync: &ToolSyncEvent) -> SlotApplication {
        let mut applied = SlotApplication::default();

        if let Some(name) = &sync.caller_name {
            if !name.trim().is_empty() {
                self.slots.caller_name = Some(name.trim().to_string());
                applied.any_applied = true;
            }
        }
        if let Some(area) = &sync.caller_area {
            if !area.trim().is_empty() {
                self.slots.caller_area = Some(area.trim().to_string());
                applied.any_applied = true;
            }
        }
        if let Some(pickup) = &sync.pickup {
            if !pickup.trim().is_empty() {
                let before = (self.slots.pickup.clone(), self.slots.pickup_normalized);
                self.slots.set_pickup_raw(pickup.trim().to_string());
                if (self.slots.pickup.clone(), self.slots.pickup_normalized) != before {
                    applied.any_applied = true;
                }
            }
        }
        if let Some(destination) = &sync.destination {
            if !destination.trim().is_empty() {
                let before = (
                    self.slots.destination.clone(),
                    self.slots.destination_normalized,
                );
                self.slots.set_destination_raw(destination.trim().to_string());
                if (self.slots.destination.clone(), self.slots.destination_normalized) != before {
                    applied.any_applied = true;
                }
            }
        }
        if let Some(count) = sync.passengers {
            match validate_passengers(count) {
                Some(valid) => {
                    self.slots.passengers = Some(valid);
                    applied.any_applied = true;
                }
                None => applied.invalid_passengers = true,
            }
        }
        if let Some(raw_time) = &sync.pickup_time {
            match PickupTime::parse(raw_time, self.now) {
                Some(time) => {
                    self.slots.pickup_time = Some(time);
                    applied.any_applied = true;
                }
                None => applied.invalid_time = true,
            }
        }
        if let Some(notes) = &sync.special_instructions {
            if !notes.trim().is_empty() {
                self.slots.special_instructions = Some(notes.trim().to_string());
                applied.any_applied = true;
            }
        }

        applied
    }

    /// A validation failure only produces a re-ask when the failed field is
    /// the one the dialogue is waiting on; otherwise the bad value is
    /// dropped silently and the turn proceeds.
    fn validation_reask(&mut self, applied: &SlotApplication) -> Option<NextAction> {
        if applied.invalid_passengers && self.next_missing_stage() == Stage::CollectPassengers {
            self.transition(Stage::CollectPassengers);
            return Some(NextAction::Ask {
                text: prompts::ask_passengers_invalid(),
            });
        }
        if applied.invalid_time && self.next_missing_stage() == Stage::CollectTime {
            self.transition(Stage::CollectTime);
            return Some(NextAction::Ask {
                text: prompts::ask_time_invalid(),
            });
        }
        None
    }

    /// Whether the slot owned by the current stage is filled
    fn current_slot_satisfied(&self) -> bool {
        match self.stage {
            Stage::CollectPickup => self.slots.pickup.is_some(),
            Stage::CollectDropoff => self.slots.destination.is_some(),
            Stage::CollectPassengers => self.slots.passengers.is_some(),
            Stage::CollectTime => self.slots.pickup_time.is_some(),
            _ => false,
        }
    }

    /// The question belonging to the current collection stage
    fn current_stage_question(&self) -> String {
        match self.stage {
            Stage::CollectPickup => prompts::ask_pickup(),
            Stage::CollectDropoff => {
                let pickup = self.slots.pickup.as_deref().unwrap_or_default();
                prompts::ask_dropoff(pickup)
            }
            Stage::CollectPassengers => prompts::ask_passengers(),
            Stage::CollectTime => prompts::ask_time(),
            _ => prompts::confirm_summary(&self.slots),
        }
    }

    /// The stage the dialogue would move to next given the current slots,
    /// without mutating anything. Unresolved addresses take priority,
    /// pickup first.
    fn next_missing_stage(&self) -> Stage {
        if self.slots.pickup.is_none() {
            Stage::CollectPickup
        } else if !self.slots.pickup_normalized {
            Stage::GeocodingPickup
        } else if self.slots.destination.is_none() {
            Stage::CollectDropoff
        } else if !self.slots.destination_normalized {
            Stage::GeocodingDropoff
        } else if self.slots.passengers.is_none() {
            Stage::CollectPassengers
        } else if self.slots.pickup_time.is_none() {
            Stage::CollectTime
        } else {
            Stage::ConfirmDetails
        }
    }

    /// Move to the next missing slot and emit its action
    fn advance(&mut self) -> NextAction {
        let next = self.next_missing_stage();
        self.transition(next);
        match next {
            Stage::CollectPickup => NextAction::Ask {
                text: prompts::ask_pickup(),
            },
            Stage::GeocodingPickup => {
                let raw = self.slots.pickup.clone().unwrap_or_default();
                NextAction::GeocodePickup { raw }
            }
            Stage::CollectDropoff => {
                let pickup = self.slots.pickup.as_deref().unwrap_or_default();
                NextAction::Ask {
                    text: prompts::ask_dropoff(pickup),
                }
            }
            Stage::GeocodingDropoff => {
                let raw = self.slots.destination.clone().unwrap_or_default();
                NextAction::GeocodeDropoff { raw }
            }
            Stage::CollectPassengers => NextAction::Ask {
                text: prompts::ask_passengers(),
            },
            Stage::CollectTime => NextAction::Ask {
                text: prompts::ask_time(),
            },
            Stage::ConfirmDetails => NextAction::Ask {
                text: prompts::confirm_summary(&self.slots),
            },
            // next_missing_stage never returns these
            Stage::Greeting
            | Stage::Dispatching
            | Stage::Done
            | Stage::Transferred
            | Stage::HungUp => NextAction::None {
                why: format!("unexpected advance target {next}"),
            },
        }
    }

    fn transition(&mut self, next: Stage) {
        if self.stage != next {
            trace!(from = %self.stage, to = %next, "booking stage transition");
            self.stage = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, 2)
            .unwrap()
            .and_hms_opt(14, 30, 0)
            .unwrap()
    }

    fn engine() -> BookingEngine {
        let mut e = BookingEngine::new(now());
        e.start();
        e
    }

    fn sync(f: impl FnOnce(&mut ToolSyncEvent)) -> EngineEvent {
        let mut ev = ToolSyncEvent {
            call_id: "call_1".to_string(),
            interpretation: "test".to_string(),
            last_utterance: "test".to_string(),
            ..Default::default()
        };
        f(&mut ev);
        EngineEvent::ToolSync(ev)
    }

    #[test]
    fn start_greets_and_collects_pickup() {
        let mut e = BookingEngine::new(now());
        let action = e.start();
        assert!(matches!(action, NextAction::Ask { .. }));
        assert_eq!(e.stage(), Stage::CollectPickup);
    }

    #[test]
    fn pickup_address_triggers_geocode() {
        let mut e = engine();
        let action = e.step(sync(|s| s.pickup = Some("52A David Road".into())));
        assert_eq!(
            action,
            NextAction::GeocodePickup {
                raw: "52A David Road".into()
            }
        );
        assert_eq!(e.stage(), Stage::GeocodingPickup);
    }

    #[test]
    fn geocode_success_moves_to_dropoff_with_normalized_text() {
        let mut e = engine();
        e.step(sync(|s| s.pickup = Some("52A David Road".into())));
        let action = e.step(EngineEvent::BackendResult(BackendResultEvent::geocoded(
            BackendResultKind::GeocodePickup,
            "52A David Road, Coventry, CV1 5AB",
        )));
        match action {
            NextAction::Ask { text } => assert!(text.contains("52A David Road, Coventry")),
            other => panic!("expected Ask, got {other:?}"),
        }
        assert_eq!(e.stage(), Stage::CollectDropoff);
        assert!(e.slots().pickup_normalized);
    }

    #[test]
    fn geocode_failure_reasks_then_transfers() {
        let mut e = engine();
        for attempt in 0..MAX_GEOCODE_ATTEMPTS {
            e.step(sync(|s| s.pickup = Some("mumbled address".into())));
            assert_eq!(e.stage(), Stage::GeocodingPickup);
            let action = e.step(EngineEvent::BackendResult(BackendResultEvent::failed(
                BackendResultKind::GeocodePickup,
                "no match",
            )));
            if attempt + 1 < MAX_GEOCODE_ATTEMPTS {
                assert!(matches!(action, NextAction::Ask { .. }), "attempt {attempt}");
                assert_eq!(e.stage(), Stage::CollectPickup);
            } else {
                assert!(matches!(action, NextAction::Transfer { .. }));
                assert_eq!(e.stage(), Stage::Transferred);
            }
        }
    }

    #[test]
    fn new_pickup_during_geocode_restarts_lookup() {
        let mut e = engine();
        e.step(sync(|s| s.pickup = Some("52 David Road".into())));
        let action = e.step(sync(|s| s.pickup = Some("52A David Road".into())));
        assert_eq!(
            action,
            NextAction::GeocodePickup {
                raw: "52A David Road".into()
            }
        );
        assert_eq!(e.stage(), Stage::GeocodingPickup);
    }

    #[test]
    fn compound_utterance_geocodes_pickup_first_then_dropoff() {
        let mut e = engine();
        let action = e.step(sync(|s| {
            s.pickup = Some("52A David Road".into());
            s.destination = Some("Coventry train station".into());
        }));
        assert_eq!(
            action,
            NextAction::GeocodePickup {
                raw: "52A David Road".into()
            }
        );

        // Pickup resolves; the stored destination goes straight to geocode
        let action = e.step(EngineEvent::BackendResult(BackendResultEvent::geocoded(
            BackendResultKind::GeocodePickup,
            "52A David Road, Coventry",
        )));
        assert_eq!(
            action,
            NextAction::GeocodeDropoff {
                raw: "Coventry train station".into()
            }
        );
        assert_eq!(e.stage(), Stage::GeocodingDropoff);

        // Destination resolves; next missing slot is passengers
        let action = e.step(EngineEvent::BackendResult(BackendResultEvent::geocoded(
            BackendResultKind::GeocodeDropoff,
            "Coventry Railway Station, Station Square",
        )));
        assert!(matches!(action, NextAction::Ask { .. }));
        assert_eq!(e.stage(), Stage::CollectPassengers);
    }

    #[test]
    fn invalid_passenger_count_reasks() {
        let mut e = booked_to_passengers();
        let action = e.step(sync(|s| s.passengers = Some(12)));
        match action {
            NextAction::Ask { text } => assert!(text.contains("between one and eight")),
            other => panic!("expected Ask, got {other:?}"),
        }
        assert_eq!(e.stage(), Stage::CollectPassengers);
        assert_eq!(e.slots().passengers, None);
    }

    #[test]
    fn valid_passengers_moves_to_time() {
        let mut e = booked_to_passengers();
        let action = e.step(sync(|s| s.passengers = Some(3)));
        assert!(matches!(action, NextAction::Ask { .. }));
        assert_eq!(e.stage(), Stage::CollectTime);
    }

    #[test]
    fn invalid_time_reasks() {
        let mut e = booked_to_time();
        let action = e.step(sync(|s| s.pickup_time = Some("whenever".into())));
        assert!(matches!(action, NextAction::Ask { .. }));
        assert_eq!(e.stage(), Stage::CollectTime);
    }

    #[test]
    fn asap_time_moves_to_confirmation() {
        let mut e = booked_to_time();
        let action = e.step(sync(|s| s.pickup_time = Some("ASAP".into())));
        match action {
            NextAction::Ask { text } => assert!(text.contains("Is that all correct")),
            other => panic!("expected Ask, got {other:?}"),
        }
        assert_eq!(e.stage(), Stage::ConfirmDetails);
    }

    #[test]
    fn confirm_dispatches_with_slot_snapshot() {
        let mut e = booked_to_confirm();
        let action = e.step(sync(|s| s.intent = Intent::Confirm));
        match action {
            NextAction::Dispatch { slots } => {
                assert_eq!(slots.passengers, Some(2));
                assert!(slots.ready_to_confirm());
            }
            other => panic!("expected Dispatch, got {other:?}"),
        }
        assert_eq!(e.stage(), Stage::Dispatching);
    }

    #[test]
    fn dispatch_success_hangs_up_with_reference() {
        let mut e = booked_to_confirm();
        e.step(sync(|s| s.intent = Intent::Confirm));
        let action = e.step(EngineEvent::BackendResult(BackendResultEvent::dispatched(
            "BK-4417",
        )));
        match action {
            NextAction::Hangup { text } => assert!(text.contains("BK-4417")),
            other => panic!("expected Hangup, got {other:?}"),
        }
        assert_eq!(e.stage(), Stage::Done);
    }

    #[test]
    fn dispatch_failure_transfers() {
        let mut e = booked_to_confirm();
        e.step(sync(|s| s.intent = Intent::Confirm));
        let action = e.step(EngineEvent::BackendResult(BackendResultEvent::failed(
            BackendResultKind::Dispatch,
            "no cars available",
        )));
        assert!(matches!(action, NextAction::Transfer { .. }));
        assert_eq!(e.stage(), Stage::Transferred);
    }

    #[test]
    fn decline_returns_to_collection_with_change_prompt() {
        let mut e = booked_to_confirm();
        let action = e.step(sync(|s| s.intent = Intent::Decline));
        match action {
            NextAction::Ask { text } => assert!(text.contains("What would you like to change")),
            other => panic!("expected Ask, got {other:?}"),
        }
        assert_eq!(e.stage(), Stage::CollectPickup);
    }

    #[test]
    fn amend_passengers_reconfirms() {
        let mut e = booked_to_confirm();
        let action = e.step(sync(|s| {
            s.intent = Intent::Amend;
            s.passengers = Some(4);
        }));
        match action {
            NextAction::Ask { text } => assert!(text.contains("4 passengers")),
            other => panic!("expected Ask, got {other:?}"),
        }
        assert_eq!(e.stage(), Stage::ConfirmDetails);
        assert_eq!(e.slots().passengers, Some(4));
    }

    #[test]
    fn amend_address_regeocodes_before_reconfirming() {
        let mut e = booked_to_confirm();
        let action = e.step(sync(|s| {
            s.intent = Intent::Amend;
            s.pickup = Some("14 Spire View".into());
        }));
        assert_eq!(
            action,
            NextAction::GeocodePickup {
                raw: "14 Spire View".into()
            }
        );
        assert_eq!(e.stage(), Stage::GeocodingPickup);

        let action = e.step(EngineEvent::BackendResult(BackendResultEvent::geocoded(
            BackendResultKind::GeocodePickup,
            "14 Spire View, Coventry",
        )));
        match action {
            NextAction::Ask { text } => assert!(text.contains("Is that all correct")),
            other => panic!("expected Ask, got {other:?}"),
        }
        assert_eq!(e.stage(), Stage::ConfirmDetails);
    }

    #[test]
    fn cancel_hangs_up_from_any_stage() {
        for build in [engine, booked_to_passengers, booked_to_confirm] {
            let mut e = build();
            let action = e.step(sync(|s| s.intent = Intent::Cancel));
            assert!(matches!(action, NextAction::Hangup { .. }));
            assert_eq!(e.stage(), Stage::HungUp);
        }
    }

    #[test]
    fn terminal_stage_ignores_further_events() {
        let mut e = engine();
        e.step(sync(|s| s.intent = Intent::Cancel));
        let action = e.step(sync(|s| s.pickup = Some("1 High St".into())));
        assert!(matches!(action, NextAction::None { .. }));
        assert_eq!(e.stage(), Stage::HungUp);
    }

    #[test]
    fn out_of_stage_destination_is_stored_and_pickup_reasked() {
        let mut e = engine();
        let action = e.step(sync(|s| s.destination = Some("the airport".into())));
        assert!(matches!(action, NextAction::Ask { .. }));
        assert_eq!(e.stage(), Stage::CollectPickup);
        assert_eq!(e.slots().destination.as_deref(), Some("the airport"));
    }

    #[test]
    fn empty_update_is_a_noop() {
        let mut e = engine();
        let action = e.step(sync(|_| {}));
        assert!(matches!(action, NextAction::None { .. }));
        assert_eq!(e.stage(), Stage::CollectPickup);
    }

    #[test]
    fn deterministic_replay_yields_identical_actions() {
        let script: Vec<EngineEvent> = vec![
            sync(|s| s.pickup = Some("52A David Road".into())),
            EngineEvent::BackendResult(BackendResultEvent::geocoded(
                BackendResultKind::GeocodePickup,
                "52A David Road, Coventry",
            )),
            sync(|s| s.destination = Some("the station".into())),
            EngineEvent::BackendResult(BackendResultEvent::geocoded(
                BackendResultKind::GeocodeDropoff,
                "Coventry Railway Station",
            )),
            sync(|s| s.passengers = Some(2)),
            sync(|s| s.pickup_time = Some("ASAP".into())),
            sync(|s| s.intent = Intent::Confirm),
            EngineEvent::BackendResult(BackendResultEvent::dispatched("BK-1")),
        ];

        let run = |events: &[EngineEvent]| {
            let mut e = engine();
            let actions: Vec<NextAction> =
                events.iter().cloned().map(|ev| e.step(ev)).collect();
            (actions, e.stage(), e.slots().clone())
        };

        let first = run(&script);
        let second = run(&script);
        assert_eq!(first, second);
        assert_eq!(first.1, Stage::Done);
    }

    // Helpers that drive the engine to a known mid-call state

    fn booked_to_passengers() -> BookingEngine {
        let mut e = engine();
        e.step(sync(|s| s.pickup = Some("52A David Road".into())));
        e.step(EngineEvent::BackendResult(BackendResultEvent::geocoded(
            BackendResultKind::GeocodePickup,
            "52A David Road, Coventry",
        )));
        e.step(sync(|s| s.destination = Some("the station".into())));
        e.step(EngineEvent::BackendResult(BackendResultEvent::geocoded(
            BackendResultKind::GeocodeDropoff,
            "Coventry Railway Station",
        )));
        assert_eq!(e.stage(), Stage::CollectPassengers);
        e
    }

    fn booked_to_time() -> BookingEngine {
        let mut e = booked_to_passengers();
        e.step(sync(|s| s.passengers = Some(2)));
        assert_eq!(e.stage(), Stage::CollectTime);
        e
    }

    fn booked_to_confirm() -> BookingEngine {
        let mut e = booked_to_time();
        e.step(sync(|s| s.pickup_time = Some("ASAP".into())));
        assert_eq!(e.stage(), Stage::ConfirmDetails);
        e
    }
}

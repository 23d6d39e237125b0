//! Tool-router scenarios over a channel-backed send lane: on-wire
//! ordering, dedup/throttle, turn reconciliation and freezing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use ridebridge_dialog_core::{
    BackendResultEvent, BackendResultKind, BookingEngine, EngineEvent, Stage, ToolSyncEvent,
    TurnAnalyzer,
};
use ridebridge_realtime_core::{InstructionCoordinator, Outbound, RealtimeSender};
use ridebridge_session_core::{
    BookingBackend, DispatchOutcome, GeocodeOutcome, SessionEvent, ToolRouter,
};

#[derive(Default)]
struct MockBackend {
    geocoded: Mutex<Vec<String>>,
    dispatches: AtomicUsize,
    fail_geocode: bool,
}

#[async_trait]
impl BookingBackend for MockBackend {
    async fn geocode(&self, raw_address: &str) -> GeocodeOutcome {
        self.geocoded.lock().unwrap().push(raw_address.to_string());
        if self.fail_geocode {
            GeocodeOutcome::not_found("no match")
        } else {
            GeocodeOutcome::found(format!("{raw_address}, Coventry, CV1 5AB"))
        }
    }

    async fn dispatch(&self, _slots: &ridebridge_dialog_core::BookingSlots) -> DispatchOutcome {
        self.dispatches.fetch_add(1, Ordering::SeqCst);
        DispatchOutcome::booked("BK-77")
    }
}

struct Fixture {
    router: ToolRouter,
    backend: Arc<MockBackend>,
    wire: mpsc::UnboundedReceiver<Outbound>,
    session_events: mpsc::UnboundedReceiver<SessionEvent>,
}

fn now() -> chrono::NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 6, 2)
        .unwrap()
        .and_hms_opt(10, 0, 0)
        .unwrap()
}

/// Build a router around a pre-driven engine and a loopback wire
fn fixture_with_engine(engine: BookingEngine, backend: Arc<MockBackend>) -> Fixture {
    let (sender, wire) = RealtimeSender::channel();
    let coordinator = Arc::new(InstructionCoordinator::new(sender.clone()));
    let (session_tx, session_events) = mpsc::unbounded_channel();
    let router = ToolRouter::new(
        engine,
        TurnAnalyzer::new(),
        coordinator,
        sender,
        backend.clone(),
        session_tx,
    );
    Fixture {
        router,
        backend,
        wire,
        session_events,
    }
}

fn started_engine() -> BookingEngine {
    let mut engine = BookingEngine::new(now());
    engine.start();
    engine
}

/// Engine driven to the confirmation stage with a complete booking
fn engine_at_confirmation() -> BookingEngine {
    let mut engine = started_engine();
    engine.step(EngineEvent::ToolSync(ToolSyncEvent {
        call_id: "setup_1".into(),
        pickup: Some("52A David Road".into()),
        destination: Some("the station".into()),
        ..Default::default()
    }));
    engine.step(EngineEvent::BackendResult(BackendResultEvent::geocoded(
        BackendResultKind::GeocodePickup,
        "52A David Road, Coventry",
    )));
    engine.step(EngineEvent::BackendResult(BackendResultEvent::geocoded(
        BackendResultKind::GeocodeDropoff,
        "Coventry Railway Station",
    )));
    engine.step(EngineEvent::ToolSync(ToolSyncEvent {
        call_id: "setup_2".into(),
        passengers: Some(2),
        pickup_time: Some("ASAP".into()),
        ..Default::default()
    }));
    assert_eq!(engine.stage(), Stage::ConfirmDetails);
    engine
}

fn drain_wire(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<Value> {
    std::iter::from_fn(|| rx.try_recv().ok())
        .map(|out| match out {
            Outbound::Event(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("unexpected outbound {other:?}"),
        })
        .collect()
}

fn args(pickup: Option<&str>, destination: Option<&str>, intent: &str) -> String {
    let mut map = json!({
        "intent": intent,
        "interpretation": "test turn",
        "last_utterance": "test turn",
    });
    if let Some(p) = pickup {
        map["pickup"] = Value::from(p);
    }
    if let Some(d) = destination {
        map["destination"] = Value::from(d);
    }
    map.to_string()
}

#[tokio::test]
async fn happy_path_pickup_orders_tool_result_before_follow_up() {
    let mut f = fixture_with_engine(started_engine(), Arc::new(MockBackend::default()));

    f.router
        .handle_tool_call(
            "call_1",
            "sync_booking_data",
            &args(Some("52A David Road"), None, "update_field"),
        )
        .await
        .unwrap();

    // Geocode callback saw the raw address
    assert_eq!(
        *f.backend.geocoded.lock().unwrap(),
        vec!["52A David Road".to_string()]
    );

    let wire = drain_wire(&mut f.wire);
    assert_eq!(wire[0]["type"], "conversation.item.create");
    assert_eq!(wire[0]["item"]["type"], "function_call_output");
    assert_eq!(wire[0]["item"]["call_id"], "call_1");
    let output: Value =
        serde_json::from_str(wire[0]["item"]["output"].as_str().unwrap()).unwrap();
    assert_eq!(output["status"], "geocoding");
    assert_eq!(output["address"], "52A David Road");
    assert_eq!(output["stage"], "CollectPickup");

    // Follow-up path: session.update precedes response.create
    assert_eq!(wire[1]["type"], "session.update");
    assert_eq!(wire[2]["type"], "response.create");
    assert!(wire[1]["session"]["instructions"]
        .as_str()
        .unwrap()
        .contains("52A David Road, Coventry, CV1 5AB"));

    assert_eq!(f.router.stage(), Stage::CollectDropoff);
}

#[tokio::test]
async fn duplicate_call_id_produces_exactly_one_tool_result() {
    let mut f = fixture_with_engine(started_engine(), Arc::new(MockBackend::default()));
    let payload = args(Some("52A David Road"), None, "update_field");

    f.router
        .handle_tool_call("call_dup", "sync_booking_data", &payload)
        .await
        .unwrap();
    // Past the throttle window so only dedup can drop it
    tokio::time::sleep(Duration::from_millis(600)).await;
    f.router
        .handle_tool_call("call_dup", "sync_booking_data", &payload)
        .await
        .unwrap();

    let wire = drain_wire(&mut f.wire);
    let tool_results = wire
        .iter()
        .filter(|v| v["type"] == "conversation.item.create" && v["item"]["type"] == "function_call_output")
        .count();
    assert_eq!(tool_results, 1);
}

#[tokio::test]
async fn second_call_inside_throttle_window_is_dropped() {
    let mut f = fixture_with_engine(started_engine(), Arc::new(MockBackend::default()));

    f.router
        .handle_tool_call(
            "call_a",
            "sync_booking_data",
            &args(Some("52A David Road"), None, "update_field"),
        )
        .await
        .unwrap();
    f.router
        .handle_tool_call(
            "call_b",
            "sync_booking_data",
            &args(None, Some("the station"), "update_field"),
        )
        .await
        .unwrap();

    let wire = drain_wire(&mut f.wire);
    let tool_results = wire
        .iter()
        .filter(|v| v["item"]["type"] == "function_call_output")
        .count();
    assert_eq!(tool_results, 1, "throttled call must emit nothing");
}

#[tokio::test]
async fn analyzer_confirmation_overrides_missing_intent() {
    let mut f = fixture_with_engine(engine_at_confirmation(), Arc::new(MockBackend::default()));
    f.router
        .note_assistant_turn("Is that all correct?".to_string());
    f.router.note_caller_transcript("yes please".to_string());

    // The model forgot to set intent=confirm; reconciliation fixes it
    f.router
        .handle_tool_call("call_c", "sync_booking_data", &args(None, None, "update_field"))
        .await
        .unwrap();

    assert_eq!(f.backend.dispatches.load(Ordering::SeqCst), 1);
    assert!(f.router.is_frozen());

    // The success goodbye went through the follow-up path
    let wire = drain_wire(&mut f.wire);
    let output: Value =
        serde_json::from_str(wire[0]["item"]["output"].as_str().unwrap()).unwrap();
    assert_eq!(output["status"], "dispatching");
    assert!(wire
        .iter()
        .any(|v| v["type"] == "response.create"
            && v["response"]["instructions"].as_str().unwrap().contains("BK-77")));

    match f.session_events.try_recv().unwrap() {
        SessionEvent::HangupRequested { goodbye } => assert!(goodbye.contains("BK-77")),
        other => panic!("expected HangupRequested, got {other:?}"),
    }
}

#[tokio::test]
async fn frozen_router_drops_further_tool_calls() {
    let mut f = fixture_with_engine(engine_at_confirmation(), Arc::new(MockBackend::default()));
    f.router
        .handle_tool_call("call_1", "sync_booking_data", &args(None, None, "confirm"))
        .await
        .unwrap();
    assert!(f.router.is_frozen());
    drain_wire(&mut f.wire);

    tokio::time::sleep(Duration::from_millis(600)).await;
    f.router
        .handle_tool_call(
            "call_2",
            "sync_booking_data",
            &args(Some("1 New Street"), None, "update_field"),
        )
        .await
        .unwrap();

    assert!(drain_wire(&mut f.wire).is_empty(), "frozen router must be silent");
}

#[tokio::test]
async fn compound_utterance_geocodes_pickup_then_destination() {
    let mut f = fixture_with_engine(started_engine(), Arc::new(MockBackend::default()));

    f.router
        .handle_tool_call(
            "call_1",
            "sync_booking_data",
            &args(
                Some("52A David Road"),
                Some("Coventry train station"),
                "update_field",
            ),
        )
        .await
        .unwrap();

    assert_eq!(
        *f.backend.geocoded.lock().unwrap(),
        vec![
            "52A David Road".to_string(),
            "Coventry train station".to_string()
        ]
    );
    assert_eq!(f.router.stage(), Stage::CollectPassengers);

    // Exactly one tool result, then follow-ups
    let wire = drain_wire(&mut f.wire);
    let tool_results: Vec<&Value> = wire
        .iter()
        .filter(|v| v["item"]["type"] == "function_call_output")
        .collect();
    assert_eq!(tool_results.len(), 1);
}

#[tokio::test]
async fn repeated_geocode_failures_escalate_to_transfer() {
    let backend = Arc::new(MockBackend {
        fail_geocode: true,
        ..Default::default()
    });
    let mut f = fixture_with_engine(started_engine(), backend);

    for (i, call_id) in ["call_1", "call_2", "call_3"].iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(Duration::from_millis(600)).await;
        }
        f.router
            .handle_tool_call(
                call_id,
                "sync_booking_data",
                &args(Some("mumbled address"), None, "update_field"),
            )
            .await
            .unwrap();
    }

    assert!(f.router.is_frozen());
    match f.session_events.try_recv().unwrap() {
        SessionEvent::TransferRequested { reason } => {
            assert!(reason.to_lowercase().contains("pickup"))
        }
        other => panic!("expected TransferRequested, got {other:?}"),
    }
}

#[tokio::test]
async fn malformed_arguments_become_a_noop_result() {
    let mut f = fixture_with_engine(started_engine(), Arc::new(MockBackend::default()));

    f.router
        .handle_tool_call("call_bad", "sync_booking_data", "{{{ not json")
        .await
        .unwrap();

    let wire = drain_wire(&mut f.wire);
    assert_eq!(wire.len(), 1);
    let output: Value =
        serde_json::from_str(wire[0]["item"]["output"].as_str().unwrap()).unwrap();
    assert_eq!(output["status"], "no_op");
}

//! Tool-call routing
//!
//! Single entry point for model tool calls. A call runs through, in order:
//! freeze check, call-id dedup, a 500 ms throttle, argument parsing, turn
//! reconciliation against the analyzer, canonicalization into a
//! [`ToolSyncEvent`], one engine step, and action execution.
//!
//! Ordering guarantees kept here:
//! - at most one tool result is ever sent per `call_id`
//! - the tool result goes on the wire before any speech for that turn
//! - engine follow-ups (geocode/dispatch results) are sent after the tool
//!   result, through the session-update + response-create path, because by
//!   then no tool call is open
//!
//! The router owns the engine; nothing else may step it.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use ridebridge_dialog_core::{
    BackendResultEvent, BackendResultKind, BookingEngine, EngineEvent, ExpectedReply, NextAction,
    Stage, ToolSyncEvent, TurnAnalyzer, TurnRelationship,
};
use ridebridge_realtime_core::{ClientEvent, InstructionCoordinator, RealtimeSender};

use crate::backend::BookingBackend;
use crate::error::Result;
use crate::events::SessionEvent;

/// Minimum spacing between accepted tool calls
pub const TOOL_CALL_THROTTLE: Duration = Duration::from_millis(500);

/// Routes model tool calls through the booking engine
pub struct ToolRouter {
    engine: BookingEngine,
    analyzer: TurnAnalyzer,
    coordinator: Arc<InstructionCoordinator>,
    sender: RealtimeSender,
    backend: Arc<dyn BookingBackend>,
    events: mpsc::UnboundedSender<SessionEvent>,
    frozen: bool,
    processed_calls: HashSet<String>,
    last_accepted_at: Option<Instant>,
    last_caller_transcript: Option<String>,
    last_assistant_turn: Option<String>,
}

impl ToolRouter {
    /// Create a router owning `engine`
    pub fn new(
        engine: BookingEngine,
        analyzer: TurnAnalyzer,
        coordinator: Arc<InstructionCoordinator>,
        sender: RealtimeSender,
        backend: Arc<dyn BookingBackend>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            engine,
            analyzer,
            coordinator,
            sender,
            backend,
            events,
            frozen: false,
            processed_calls: HashSet::new(),
            last_accepted_at: None,
            last_caller_transcript: None,
            last_assistant_turn: None,
        }
    }

    /// Start the dialogue: speaks the greeting through the follow-up path
    pub fn begin(&mut self) -> Result<()> {
        let action = self.engine.start();
        if let NextAction::Ask { text } = &action {
            self.remember_assistant_turn(text.clone());
            self.coordinator.follow_up(text)?;
        }
        Ok(())
    }

    /// Current engine stage
    pub fn stage(&self) -> Stage {
        self.engine.stage()
    }

    /// Whether the router dropped into its terminal frozen state
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// The last question the assistant asked, for silent-caller reprompts
    pub fn pending_question(&self) -> Option<String> {
        self.last_assistant_turn.clone()
    }

    /// Record the latest caller transcript for turn reconciliation
    pub fn note_caller_transcript(&mut self, transcript: String) {
        self.last_caller_transcript = Some(transcript);
    }

    /// Record the assistant's latest spoken turn
    pub fn note_assistant_turn(&mut self, transcript: String) {
        self.remember_assistant_turn(transcript);
    }

    /// Handle one completed tool call from the model
    pub async fn handle_tool_call(
        &mut self,
        call_id: &str,
        name: &str,
        arguments: &str,
    ) -> Result<()> {
        if self.frozen {
            debug!(call_id, "router frozen, dropping tool call");
            return Ok(());
        }
        if self.processed_calls.contains(call_id) {
            warn!(call_id, "duplicate tool call dropped");
            return Ok(());
        }
        if let Some(last) = self.last_accepted_at {
            if last.elapsed() < TOOL_CALL_THROTTLE {
                warn!(call_id, "tool call inside throttle window dropped");
                return Ok(());
            }
        }
        self.processed_calls.insert(call_id.to_string());
        self.last_accepted_at = Some(Instant::now());

        if name != "sync_booking_data" {
            debug!(call_id, name, "unexpected tool name");
        }

        let mut args: Map<String, Value> = serde_json::from_str(arguments).unwrap_or_default();
        self.reconcile_turn(&mut args);
        let event = self.to_tool_sync(call_id, &args);
        // Tool results report the stage the call was processed in, not the
        // stage the step moved to
        let stage_at_call = self.engine.stage();
        info!(call_id, stage = %stage_at_call, intent = event.intent.as_str(), "stepping engine");

        let action = self.engine.step(EngineEvent::ToolSync(event));
        self.execute_with_tool_call(call_id, stage_at_call, action).await
    }

    /// Apply the turn-analyzer verdict to the raw arguments before they
    /// become an engine event.
    fn reconcile_turn(&self, args: &mut Map<String, Value>) {
        let Some(transcript) = self.last_caller_transcript.clone() else {
            return;
        };
        let question = self.last_assistant_turn.clone().unwrap_or_default();
        let stage = self.engine.stage();
        let expected = ExpectedReply::from_stage(stage);
        let assessment = self.analyzer.analyze(&question, expected, &transcript);
        debug!(?assessment, %stage, "turn reconciliation");

        match assessment.relationship {
            TurnRelationship::ConfirmationYes if stage == Stage::ConfirmDetails => {
                args.insert("intent".to_string(), Value::from("confirm"));
            }
            TurnRelationship::ConfirmationNo if stage == Stage::ConfirmDetails => {
                args.insert("intent".to_string(), Value::from("decline"));
            }
            TurnRelationship::Correction => {
                if let (Some(slot), Some(value)) = (&assessment.slot, &assessment.value) {
                    if !value.is_empty() {
                        args.insert(slot.clone(), Value::from(value.clone()));
                        let intent = args.get("intent").and_then(Value::as_str);
                        if intent.is_none() || intent == Some("update_field") {
                            args.insert("intent".to_string(), Value::from("amend"));
                        }
                    }
                }
            }
            TurnRelationship::DirectAnswer => {
                if let (Some(slot), Some(value)) = (&assessment.slot, &assessment.value) {
                    if !args.contains_key(slot) {
                        args.insert(slot.clone(), Value::from(value.clone()));
                    }
                }
            }
            TurnRelationship::ConfirmationYes
            | TurnRelationship::ConfirmationNo
            | TurnRelationship::Irrelevant
            | TurnRelationship::Unclear => {}
        }
    }

    /// Canonicalize the argument map into an engine event
    fn to_tool_sync(&self, call_id: &str, args: &Map<String, Value>) -> ToolSyncEvent {
        let text = |key: &str| -> Option<String> {
            args.get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        // Coerce numbers given as strings; validation stays in the engine
        let passengers = args.get("passengers").and_then(|value| {
            value
                .as_i64()
                .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
        });

        ToolSyncEvent {
            call_id: call_id.to_string(),
            caller_name: text("caller_name"),
            caller_area: text("caller_area"),
            pickup: text("pickup").or_else(|| text("pickup_address")),
            destination: text("destination").or_else(|| text("dropoff")),
            passengers,
            pickup_time: text("pickup_time"),
            special_instructions: text("special_instructions"),
            intent: args
                .get("intent")
                .and_then(Value::as_str)
                .map(ridebridge_dialog_core::Intent::parse)
                .unwrap_or_default(),
            interpretation: text("interpretation").unwrap_or_default(),
            last_utterance: text("last_utterance").unwrap_or_default(),
        }
    }

    /// Execute the first action of a turn, with `call_id` still open.
    /// Exactly one tool result is sent here (or none, for `Silence`).
    async fn execute_with_tool_call(
        &mut self,
        call_id: &str,
        stage_at_call: Stage,
        action: NextAction,
    ) -> Result<()> {
        let stage = stage_at_call.to_string();
        match action {
            NextAction::Ask { text } => {
                self.send_tool_result(
                    call_id,
                    json!({ "status": "ok", "instruction": text, "stage": stage }),
                )?;
                self.remember_assistant_turn(text.clone());
                self.coordinator.speak_after_tool(&text).map_err(Into::into)
            }
            NextAction::Hangup { text } => {
                self.send_tool_result(
                    call_id,
                    json!({ "status": "hangup", "instruction": text, "stage": stage }),
                )?;
                self.coordinator.speak_after_tool(&text)?;
                self.freeze();
                let _ = self.events.send(SessionEvent::HangupRequested { goodbye: text });
                Ok(())
            }
            NextAction::Transfer { reason } => {
                self.send_tool_result(
                    call_id,
                    json!({ "status": "transfer", "reason": reason, "stage": stage }),
                )?;
                self.freeze();
                let _ = self.events.send(SessionEvent::TransferRequested { reason });
                Ok(())
            }
            NextAction::GeocodePickup { raw } => {
                self.send_tool_result(
                    call_id,
                    json!({ "status": "geocoding", "address": raw, "stage": stage }),
                )?;
                let next = self.run_geocode(BackendResultKind::GeocodePickup, &raw).await;
                self.run_follow_up_chain(next).await
            }
            NextAction::GeocodeDropoff { raw } => {
                self.send_tool_result(
                    call_id,
                    json!({ "status": "geocoding", "address": raw, "stage": stage }),
                )?;
                let next = self.run_geocode(BackendResultKind::GeocodeDropoff, &raw).await;
                self.run_follow_up_chain(next).await
            }
            NextAction::Dispatch { slots } => {
                self.send_tool_result(
                    call_id,
                    json!({ "status": "dispatching", "stage": stage }),
                )?;
                let outcome = self.backend.dispatch(&slots).await;
                let result = BackendResultEvent {
                    kind: BackendResultKind::Dispatch,
                    ok: outcome.ok,
                    normalized_address: None,
                    booking_id: outcome.booking_id,
                    error: outcome.error,
                };
                let next = self.engine.step(EngineEvent::BackendResult(result));
                self.run_follow_up_chain(next).await
            }
            NextAction::None { why } => {
                debug!(call_id, %why, "no-op turn");
                self.send_tool_result(call_id, json!({ "status": "no_op" }))
            }
            NextAction::Silence { why } => {
                debug!(call_id, %why, "staying silent");
                Ok(())
            }
        }
    }

    /// Drive backend-bound actions to completion. By the time this runs
    /// the tool result is on the wire, so speech goes through the
    /// follow-up (session.update + response.create) path.
    async fn run_follow_up_chain(&mut self, mut action: NextAction) -> Result<()> {
        loop {
            match action {
                NextAction::GeocodePickup { raw } => {
                    action = self.run_geocode(BackendResultKind::GeocodePickup, &raw).await;
                }
                NextAction::GeocodeDropoff { raw } => {
                    action = self.run_geocode(BackendResultKind::GeocodeDropoff, &raw).await;
                }
                NextAction::Dispatch { slots } => {
                    let outcome = self.backend.dispatch(&slots).await;
                    let result = BackendResultEvent {
                        kind: BackendResultKind::Dispatch,
                        ok: outcome.ok,
                        normalized_address: None,
                        booking_id: outcome.booking_id,
                        error: outcome.error,
                    };
                    action = self.engine.step(EngineEvent::BackendResult(result));
                }
                NextAction::Ask { text } => {
                    self.remember_assistant_turn(text.clone());
                    return self.coordinator.follow_up(&text).map_err(Into::into);
                }
                NextAction::Hangup { text } => {
                    self.coordinator.follow_up(&text)?;
                    self.freeze();
                    let _ = self.events.send(SessionEvent::HangupRequested { goodbye: text });
                    return Ok(());
                }
                NextAction::Transfer { reason } => {
                    self.freeze();
                    let _ = self.events.send(SessionEvent::TransferRequested { reason });
                    return Ok(());
                }
                NextAction::None { why } | NextAction::Silence { why } => {
                    debug!(%why, "follow-up chain settled");
                    return Ok(());
                }
            }
        }
    }

    async fn run_geocode(&mut self, kind: BackendResultKind, raw: &str) -> NextAction {
        let outcome = self.backend.geocode(raw).await;
        let result = BackendResultEvent {
            kind,
            ok: outcome.ok,
            normalized_address: outcome.normalized,
            booking_id: None,
            error: outcome.error,
        };
        self.engine.step(EngineEvent::BackendResult(result))
    }

    fn send_tool_result(&self, call_id: &str, payload: Value) -> Result<()> {
        let output = payload.to_string();
        debug!(call_id, %output, "sending tool result");
        self.sender
            .send(&ClientEvent::tool_output(call_id, output))
            .map_err(Into::into)
    }

    fn remember_assistant_turn(&mut self, text: String) {
        self.last_assistant_turn = Some(text);
    }

    fn freeze(&mut self) {
        self.frozen = true;
        info!(stage = %self.engine.stage(), "tool router frozen");
    }
}

//! # Dialogue core for the ridebridge project
//!
//! `dialog-core` holds the deterministic half of the voice assistant: the
//! booking state machine that decides what happens next on every turn, and
//! the rule-based turn analyzer that classifies a caller utterance against
//! the assistant's last question.
//!
//! The crate is deliberately free of I/O. The engine consumes
//! [`ToolSyncEvent`]s (produced by the tool router from model tool calls)
//! and [`BackendResultEvent`]s (produced when geocode/dispatch lookups
//! resolve) and emits [`NextAction`] values. All side effects - speaking,
//! geocoding, dispatching, hanging up - are executed by the session layer.
//!
//! ## Core components
//!
//! - **BookingEngine**: stage-based state machine, the sole authority for
//!   stage transitions
//! - **BookingSlots**: the collected booking fields
//! - **TurnAnalyzer**: classifies caller replies (answer / correction /
//!   confirmation / irrelevant)
//! - **prompts**: the fixed texts the assistant is instructed to speak
//!
//! Determinism is the contract: the same `(state, event)` sequence always
//! yields the same actions and final state, which is what the unit tests
//! lean on. Nothing in here is fallible: invalid input (out-of-range
//! passenger counts, unparseable times, stale backend results) is part of
//! a phone conversation, so it surfaces as the next [`NextAction`] rather
//! than as an error.

pub mod engine;
pub mod events;
pub mod prompts;
pub mod slots;
pub mod turn;

pub use engine::{BookingEngine, Stage};
pub use events::{
    BackendResultEvent, BackendResultKind, EngineEvent, Intent, NextAction, ToolSyncEvent,
};
pub use slots::{BookingSlots, PickupTime};
pub use turn::{ExpectedReply, TurnAnalyzer, TurnAssessment, TurnRelationship};

//! # Realtime core for the ridebridge project
//!
//! `realtime-core` speaks the realtime conversational API: a duplex
//! WebSocket carrying JSON events in both directions. The crate owns
//!
//! - the serde models for outbound client events ([`client_event`])
//! - the tolerant parser for inbound server events ([`server_event`])
//! - the transport itself ([`transport`]): one persistent connection, a
//!   serialized single-producer send lane, and a receive loop that never
//!   dies to a handler error
//! - the instruction coordinator ([`instructions`]): the fixed payload
//!   sequences that make the model say exactly what the booking engine
//!   decided
//!
//! Audio moves through here too, but only as opaque base64 strings; framing
//! and pacing live in `media-core`.

pub mod client_event;
pub mod error;
pub mod instructions;
pub mod server_event;
pub mod transport;

pub use client_event::{
    AudioFormat, AudioTranscription, ClientEvent, ContentPart, ConversationItem, ResponseParams,
    SessionConfig, ToolChoice, ToolDefinition, TurnDetection,
};
pub use error::{Error, Result};
pub use instructions::InstructionCoordinator;
pub use server_event::{parse, ServerEvent};
pub use transport::{
    DisconnectHandler, EventHandler, Outbound, RealtimeSender, RealtimeTransport, WsConfig,
    WsTransport,
};

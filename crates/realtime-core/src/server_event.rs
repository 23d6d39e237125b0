//! Inbound (server → client) event parsing
//!
//! The realtime protocol has shipped several naming generations for the
//! same logical events, so decoding goes through `serde_json::Value` and a
//! type-string match instead of a derived tagged enum: every known wire
//! name collapses onto one closed tag set, everything else - including
//! malformed JSON - becomes [`ServerEvent::Unknown`]. `parse` never fails.

use serde_json::Value;

/// Every inbound event the bridge reacts to
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// A chunk of synthesized audio
    AudioDelta {
        /// Base64-encoded G.711 bytes
        delta: String,
    },
    /// A model response began
    ResponseCreated,
    /// Assistant audio started streaming
    AudioStarted,
    /// Assistant audio finished streaming
    AudioDone,
    /// A tool call's arguments are complete
    ToolCallDone {
        /// Tool call id
        call_id: String,
        /// Tool name
        name: String,
        /// JSON-encoded arguments
        arguments: String,
    },
    /// A caller utterance was transcribed
    CallerTranscript {
        /// The transcript text
        transcript: String,
    },
    /// The assistant's spoken turn was transcribed
    AssistantTranscriptDone {
        /// The transcript text
        transcript: String,
    },
    /// Server VAD detected caller speech starting
    SpeechStarted,
    /// Server VAD detected caller speech stopping
    SpeechStopped,
    /// A response cancellation was confirmed
    ResponseCanceled,
    /// The session resource was created
    SessionCreated,
    /// The session resource was updated
    SessionUpdated,
    /// The server reported an error
    Error {
        /// Error description
        message: String,
    },
    /// Anything unrecognized or unparseable
    Unknown,
}

/// Decode one complete text frame into a [`ServerEvent`].
///
/// Total: malformed JSON and unknown types yield `Unknown`.
pub fn parse(raw: &str) -> ServerEvent {
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(_) => return ServerEvent::Unknown,
    };
    let kind = value.get("type").and_then(Value::as_str).unwrap_or_default();

    match kind {
        "response.audio.delta" | "response.output_audio.delta" => ServerEvent::AudioDelta {
            delta: string_field(&value, "delta"),
        },
        "response.created" => ServerEvent::ResponseCreated,
        "response.audio.started" => ServerEvent::AudioStarted,
        "response.audio.done" => ServerEvent::AudioDone,
        "response.function_call_arguments.done" => ServerEvent::ToolCallDone {
            call_id: string_field(&value, "call_id"),
            name: string_field(&value, "name"),
            arguments: string_field(&value, "arguments"),
        },
        "conversation.item.input_audio_transcription.completed" => ServerEvent::CallerTranscript {
            transcript: string_field(&value, "transcript"),
        },
        "response.audio_transcript.done" => ServerEvent::AssistantTranscriptDone {
            transcript: string_field(&value, "transcript"),
        },
        "input_audio_buffer.speech_started" => ServerEvent::SpeechStarted,
        "input_audio_buffer.speech_stopped" => ServerEvent::SpeechStopped,
        "response.canceled" => ServerEvent::ResponseCanceled,
        "session.created" => ServerEvent::SessionCreated,
        "session.updated" => ServerEvent::SessionUpdated,
        "error" => ServerEvent::Error {
            message: error_message(&value),
        },
        _ => ServerEvent::Unknown,
    }
}

fn string_field(value: &Value, field: &str) -> String {
    value
        .get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Error payloads nest the message under `error.message` in newer protocol
/// versions and put it at the top level in older ones.
fn error_message(value: &Value) -> String {
    value
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .or_else(|| value.get("message").and_then(Value::as_str))
        .unwrap_or_default()
        .to_string()
}

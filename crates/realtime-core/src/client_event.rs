//! Outbound (client → server) event payloads
//!
//! Everything the bridge ever sends upstream is one of these tagged
//! structures. The session configuration mirrors the realtime API's
//! session resource: only the fields present in an update are applied, so
//! partial updates (instructions only) are routine.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Audio format identifiers accepted by the realtime API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioFormat {
    /// G.711 A-law passthrough
    #[serde(rename = "g711_alaw")]
    G711Alaw,
    /// G.711 µ-law passthrough
    #[serde(rename = "g711_ulaw")]
    G711Ulaw,
    /// 16-bit linear PCM (unused by the bridge, kept for completeness)
    #[serde(rename = "pcm16")]
    Pcm16,
}

/// Input audio transcription configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioTranscription {
    /// Transcription model name
    pub model: String,
}

/// Turn detection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnDetection {
    /// Server-side voice activity detection
    #[serde(rename = "server_vad")]
    ServerVad {
        /// Activation threshold in [0, 1]
        threshold: f32,
        /// Audio included before detected speech start, in milliseconds
        prefix_padding_ms: u32,
        /// Silence required to call speech stop, in milliseconds
        silence_duration_ms: u32,
    },
}

/// Tool exposed to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ToolDefinition {
    /// A callable function with a JSON-schema parameter description
    #[serde(rename = "function")]
    Function {
        /// Function name
        name: String,
        /// What the function does
        description: String,
        /// JSON schema of the arguments
        parameters: Value,
    },
}

/// How the model may choose tools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    /// Model decides freely
    Auto,
    /// Tool use suppressed
    None,
    /// A tool call is required
    Required,
}

/// Session configuration for `session.update`.
///
/// All fields optional; absent fields are left untouched by the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Modalities the model may respond with
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,

    /// System instructions prepended to model turns
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    /// Voice used for synthesized audio
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    /// Format of caller audio uploaded to the model
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_format: Option<AudioFormat>,

    /// Format of synthesized audio streamed back
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_format: Option<AudioFormat>,

    /// Caller transcription configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<AudioTranscription>,

    /// Voice activity detection configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_detection: Option<TurnDetection>,

    /// Tools exposed to the model
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,

    /// Tool selection policy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,

    /// Sampling temperature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

/// Inference parameters for `response.create`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseParams {
    /// Modalities for this response
    pub modalities: Vec<String>,

    /// Per-response instruction override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    /// Per-response tool policy override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
}

/// One content part of a conversation message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    /// Plain text input
    #[serde(rename = "input_text")]
    InputText {
        /// The text
        text: String,
    },
}

/// A conversation item created by the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ConversationItem {
    /// A chat message
    #[serde(rename = "message")]
    Message {
        /// Speaker role (`user`, `system`)
        role: String,
        /// Message content parts
        content: Vec<ContentPart>,
    },
    /// The result of a model tool call
    #[serde(rename = "function_call_output")]
    FunctionCallOutput {
        /// Tool call this output answers
        call_id: String,
        /// JSON-encoded result
        output: String,
    },
}

/// Every client → server event the bridge sends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Update the session configuration
    #[serde(rename = "session.update")]
    SessionUpdate {
        /// Partial session configuration
        session: SessionConfig,
    },

    /// Append caller audio to the input buffer
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend {
        /// Base64-encoded G.711 bytes
        audio: String,
    },

    /// Commit the input buffer into a user message
    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioBufferCommit,

    /// Discard the input buffer
    #[serde(rename = "input_audio_buffer.clear")]
    InputAudioBufferClear,

    /// Add an item to the conversation
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate {
        /// The item to add
        item: ConversationItem,
    },

    /// Trigger model inference
    #[serde(rename = "response.create")]
    ResponseCreate {
        /// Inference parameters
        response: ResponseParams,
    },

    /// Cancel the in-flight response
    #[serde(rename = "response.cancel")]
    ResponseCancel,
}

impl ClientEvent {
    /// A plain user text message item
    pub fn user_message(text: impl Into<String>) -> Self {
        ClientEvent::ConversationItemCreate {
            item: ConversationItem::Message {
                role: "user".to_string(),
                content: vec![ContentPart::InputText { text: text.into() }],
            },
        }
    }

    /// A tool result item for the given call
    pub fn tool_output(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        ClientEvent::ConversationItemCreate {
            item: ConversationItem::FunctionCallOutput {
                call_id: call_id.into(),
                output: output.into(),
            },
        }
    }

    /// Wire type string of this event
    pub fn event_type(&self) -> &'static str {
        match self {
            ClientEvent::SessionUpdate { .. } => "session.update",
            ClientEvent::InputAudioBufferAppend { .. } => "input_audio_buffer.append",
            ClientEvent::InputAudioBufferCommit => "input_audio_buffer.commit",
            ClientEvent::InputAudioBufferClear => "input_audio_buffer.clear",
            ClientEvent::ConversationItemCreate { .. } => "conversation.item.create",
            ClientEvent::ResponseCreate { .. } => "response.create",
            ClientEvent::ResponseCancel => "response.cancel",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_update_serializes_with_tag_and_skips_absent_fields() {
        let event = ClientEvent::SessionUpdate {
            session: SessionConfig {
                instructions: Some("say hi".to_string()),
                ..Default::default()
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "session.update");
        assert_eq!(json["session"]["instructions"], "say hi");
        assert!(json["session"].get("voice").is_none());
    }

    #[test]
    fn audio_append_carries_base64_payload() {
        let event = ClientEvent::InputAudioBufferAppend {
            audio: "AAEC".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "input_audio_buffer.append");
        assert_eq!(json["audio"], "AAEC");
    }

    #[test]
    fn unit_variants_serialize_to_bare_type_objects() {
        let json = serde_json::to_value(ClientEvent::ResponseCancel).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "response.cancel" }));

        let json = serde_json::to_value(ClientEvent::InputAudioBufferCommit).unwrap();
        assert_eq!(json["type"], "input_audio_buffer.commit");
    }

    #[test]
    fn tool_output_item_shape() {
        let event = ClientEvent::tool_output("call_42", r#"{"status":"ok"}"#);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "conversation.item.create");
        assert_eq!(json["item"]["type"], "function_call_output");
        assert_eq!(json["item"]["call_id"], "call_42");
        assert_eq!(json["item"]["output"], r#"{"status":"ok"}"#);
    }

    #[test]
    fn server_vad_turn_detection_shape() {
        let config = SessionConfig {
            turn_detection: Some(TurnDetection::ServerVad {
                threshold: 0.5,
                prefix_padding_ms: 300,
                silence_duration_ms: 500,
            }),
            input_audio_format: Some(AudioFormat::G711Alaw),
            output_audio_format: Some(AudioFormat::G711Alaw),
            ..Default::default()
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["turn_detection"]["type"], "server_vad");
        assert_eq!(json["turn_detection"]["threshold"], 0.5);
        assert_eq!(json["input_audio_format"], "g711_alaw");
    }

    #[test]
    fn response_create_suppresses_tools() {
        let event = ClientEvent::ResponseCreate {
            response: ResponseParams {
                modalities: vec!["audio".to_string(), "text".to_string()],
                instructions: Some("speak".to_string()),
                tool_choice: Some(ToolChoice::None),
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["response"]["tool_choice"], "none");
        assert_eq!(json["response"]["modalities"][0], "audio");
    }
}

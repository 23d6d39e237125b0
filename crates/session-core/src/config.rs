//! Per-call configuration
//!
//! Plain structs with defaults; loading them from files or flags is the
//! embedding application's concern.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;

use ridebridge_media_core::G711Codec;
use ridebridge_realtime_core::{
    AudioFormat, AudioTranscription, SessionConfig, ToolChoice, ToolDefinition, TurnDetection,
};

/// Server VAD tuning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VadConfig {
    /// Activation threshold in [0, 1]
    pub threshold: f32,
    /// Audio included before detected speech start, in milliseconds
    pub prefix_padding_ms: u32,
    /// Silence required to call speech stop, in milliseconds
    pub silence_duration_ms: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 500,
        }
    }
}

/// Everything a call session needs to run
#[derive(Debug, Clone)]
pub struct CallConfig {
    /// Realtime WebSocket URL, including the model query parameter
    pub url: String,
    /// Bearer token for the realtime API
    pub auth_token: String,
    /// Protocol-version header, e.g. `("OpenAI-Beta", "realtime=v1")`
    pub protocol_header: Option<(String, String)>,
    /// Synthesis voice
    pub voice: String,
    /// Sampling temperature
    pub temperature: f32,
    /// Caller transcription model
    pub transcription_model: String,
    /// Base system instructions for the session
    pub base_instructions: String,
    /// Server VAD tuning
    pub vad: VadConfig,
    /// Silence tolerated before a re-prompt
    pub no_reply_timeout: Duration,
    /// Silence tolerated while awaiting booking confirmation
    pub confirmation_timeout: Duration,
    /// Silent re-prompts before giving up on the caller
    pub max_silent_reprompts: u32,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            url: "wss://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview".to_string(),
            auth_token: String::new(),
            protocol_header: Some(("OpenAI-Beta".to_string(), "realtime=v1".to_string())),
            voice: "alloy".to_string(),
            temperature: 0.7,
            transcription_model: "whisper-1".to_string(),
            base_instructions: "You are a taxi booking assistant on a phone line. Keep every \
                                turn short and natural. After each caller turn, call the \
                                sync_booking_data tool with what you heard; the tool result \
                                tells you what to say next. Never invent addresses, prices \
                                or booking references."
                .to_string(),
            vad: VadConfig::default(),
            no_reply_timeout: Duration::from_secs(15),
            confirmation_timeout: Duration::from_secs(30),
            max_silent_reprompts: 3,
        }
    }
}

impl CallConfig {
    /// The initial `session.update` payload for a call on `codec`
    pub fn session_config(&self, codec: G711Codec) -> SessionConfig {
        let format = audio_format(codec);
        SessionConfig {
            modalities: Some(vec!["audio".to_string(), "text".to_string()]),
            instructions: Some(self.base_instructions.clone()),
            voice: Some(self.voice.clone()),
            input_audio_format: Some(format),
            output_audio_format: Some(format),
            input_audio_transcription: Some(AudioTranscription {
                model: self.transcription_model.clone(),
            }),
            turn_detection: Some(TurnDetection::ServerVad {
                threshold: self.vad.threshold,
                prefix_padding_ms: self.vad.prefix_padding_ms,
                silence_duration_ms: self.vad.silence_duration_ms,
            }),
            tools: Some(vec![booking_tool()]),
            tool_choice: Some(ToolChoice::Auto),
            temperature: Some(self.temperature),
        }
    }
}

/// Map the call's G.711 variant to the realtime API format name
pub fn audio_format(codec: G711Codec) -> AudioFormat {
    match codec {
        G711Codec::Pcma => AudioFormat::G711Alaw,
        G711Codec::Pcmu => AudioFormat::G711Ulaw,
    }
}

/// The `sync_booking_data` tool the model calls after every caller turn
pub fn booking_tool() -> ToolDefinition {
    ToolDefinition::Function {
        name: "sync_booking_data".to_string(),
        description: "Synchronize everything learned from the caller's latest turn. Call \
                      this after every caller utterance, even when nothing changed."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "caller_name": { "type": "string", "description": "Caller's name, if given" },
                "caller_area": { "type": "string", "description": "Area or suburb the caller mentioned" },
                "pickup": { "type": "string", "description": "Pickup address exactly as spoken" },
                "destination": { "type": "string", "description": "Destination address exactly as spoken" },
                "passengers": { "type": "integer", "description": "Party size, 1 to 8" },
                "pickup_time": {
                    "type": "string",
                    "description": "Either the literal \"ASAP\" or a time as YYYY-MM-DD HH:MM"
                },
                "special_instructions": { "type": "string", "description": "Notes for the driver" },
                "intent": {
                    "type": "string",
                    "enum": ["update_field", "confirm", "decline", "cancel", "amend"],
                    "description": "What the caller is doing this turn"
                },
                "interpretation": { "type": "string", "description": "Your reading of the caller's words" },
                "last_utterance": { "type": "string", "description": "The caller's words, verbatim" }
            },
            "required": ["intent", "interpretation", "last_utterance"]
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_telephony_profile() {
        let config = CallConfig::default();
        assert_eq!(config.vad.threshold, 0.5);
        assert_eq!(config.vad.prefix_padding_ms, 300);
        assert_eq!(config.vad.silence_duration_ms, 500);
        assert_eq!(config.no_reply_timeout, Duration::from_secs(15));
        assert_eq!(config.confirmation_timeout, Duration::from_secs(30));
        assert_eq!(config.max_silent_reprompts, 3);
    }

    #[test]
    fn session_config_is_g711_passthrough_both_ways() {
        let config = CallConfig::default();
        let session = config.session_config(G711Codec::Pcma);
        assert_eq!(session.input_audio_format, Some(AudioFormat::G711Alaw));
        assert_eq!(session.output_audio_format, Some(AudioFormat::G711Alaw));

        let session = config.session_config(G711Codec::Pcmu);
        assert_eq!(session.input_audio_format, Some(AudioFormat::G711Ulaw));
    }

    #[test]
    fn booking_tool_schema_has_required_fields() {
        let ToolDefinition::Function { name, parameters, .. } = booking_tool();
        assert_eq!(name, "sync_booking_data");
        let required = parameters["required"].as_array().unwrap();
        let required: Vec<&str> = required.iter().map(|v| v.as_str().unwrap()).collect();
        assert!(required.contains(&"intent"));
        assert!(required.contains(&"interpretation"));
        assert!(required.contains(&"last_utterance"));
        assert_eq!(parameters["properties"]["passengers"]["type"], "integer");
    }
}

//! Instruction sequencing
//!
//! The booking engine decides *what* the assistant says; this module owns
//! *how* that text reaches the model without races. Two payload families:
//! a `session.update` that swaps the session instructions, and a
//! `response.create` that triggers speech with tool use suppressed so a
//! scheduled utterance can never be hijacked by a competing tool call.
//!
//! The reprompt path handles the invalidated-response case: cancel the
//! in-flight response (waiting briefly for the confirmation), preserve or
//! discard in-flight caller audio depending on the mic gate, ground the
//! model with a corrective user item, then re-ask with the stronger
//! wrapper.

use std::time::Duration;

use tokio::sync::Notify;
use tracing::debug;

use crate::client_event::{ClientEvent, ResponseParams, SessionConfig, ToolChoice};
use crate::error::Result;
use crate::transport::RealtimeSender;

/// How long to wait for a cancellation confirmation before proceeding.
/// Covers the no-active-response case where no confirmation ever comes.
pub const CANCEL_ACK_TIMEOUT: Duration = Duration::from_millis(300);

/// Builds and sequences the instruction payloads for one call
pub struct InstructionCoordinator {
    sender: RealtimeSender,
    cancel_ack: Notify,
}

impl InstructionCoordinator {
    /// Create a coordinator over the call's send lane
    pub fn new(sender: RealtimeSender) -> Self {
        Self {
            sender,
            cancel_ack: Notify::new(),
        }
    }

    /// The strict frame: one concise turn, no embellishment
    pub fn wrap_strict(text: &str) -> String {
        format!(
            "[INSTRUCTION] Say the following to the caller now, as a single concise turn: \
             {text} Do not greet the caller again, do not say goodbye unless the text itself \
             does, and do not add or invent any booking details."
        )
    }

    /// The reprompt frame: also forbids acknowledging the correction
    pub fn wrap_reprompt(text: &str) -> String {
        format!(
            "[INSTRUCTION] Your previous response was invalid and has been cancelled. Do not \
             acknowledge this, do not apologise, and do not use filler phrases. Say exactly \
             the following, as a single concise turn: {text}"
        )
    }

    /// Speak `text` right after a tool result was sent for the open tool
    /// call. Only a `response.create` is needed - the tool output item is
    /// already in the conversation.
    pub fn speak_after_tool(&self, text: &str) -> Result<()> {
        self.sender.send(&ClientEvent::ResponseCreate {
            response: ResponseParams {
                modalities: speech_modalities(),
                instructions: Some(Self::wrap_strict(text)),
                tool_choice: Some(ToolChoice::None),
            },
        })
    }

    /// Speak `text` outside any tool call (greeting, geocode follow-ups):
    /// `session.update` first, then `response.create`.
    pub fn follow_up(&self, text: &str) -> Result<()> {
        self.sender.send(&ClientEvent::SessionUpdate {
            session: SessionConfig {
                instructions: Some(Self::wrap_strict(text)),
                ..Default::default()
            },
        })?;
        self.sender.send(&ClientEvent::ResponseCreate {
            response: ResponseParams {
                modalities: speech_modalities(),
                instructions: Some(Self::wrap_strict(text)),
                tool_choice: Some(ToolChoice::None),
            },
        })
    }

    /// Record that the server confirmed a response cancellation
    pub fn note_response_canceled(&self) {
        self.cancel_ack.notify_one();
    }

    /// Invalidate the in-flight response and re-ask `text`.
    ///
    /// `mic_gated` decides the input buffer's fate: gated audio is echo
    /// and is cleared; ungated audio is live caller speech and is
    /// committed so it survives the cancellation.
    pub async fn reprompt(&self, text: &str, mic_gated: bool) -> Result<()> {
        self.sender.send(&ClientEvent::ResponseCancel)?;
        if tokio::time::timeout(CANCEL_ACK_TIMEOUT, self.cancel_ack.notified())
            .await
            .is_err()
        {
            debug!("no cancellation confirmation, proceeding with reprompt");
        }

        if mic_gated {
            self.sender.send(&ClientEvent::InputAudioBufferClear)?;
        } else {
            self.sender.send(&ClientEvent::InputAudioBufferCommit)?;
        }

        self.sender.send(&ClientEvent::user_message(
            "[CONTEXT] The previous assistant response was invalid and has been discarded. \
             Re-ask the caller the pending question.",
        ))?;

        self.sender.send(&ClientEvent::SessionUpdate {
            session: SessionConfig {
                instructions: Some(Self::wrap_reprompt(text)),
                ..Default::default()
            },
        })?;
        self.sender.send(&ClientEvent::ResponseCreate {
            response: ResponseParams {
                modalities: speech_modalities(),
                instructions: Some(Self::wrap_reprompt(text)),
                tool_choice: Some(ToolChoice::None),
            },
        })
    }
}

fn speech_modalities() -> Vec<String> {
    vec!["audio".to_string(), "text".to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Outbound;
    use serde_json::Value;

    fn drain_types(rx: &mut tokio::sync::mpsc::UnboundedReceiver<Outbound>) -> Vec<String> {
        std::iter::from_fn(|| rx.try_recv().ok())
            .map(|out| match out {
                Outbound::Event(text) => serde_json::from_str::<Value>(&text).unwrap()["type"]
                    .as_str()
                    .unwrap()
                    .to_string(),
                other => panic!("unexpected outbound {other:?}"),
            })
            .collect()
    }

    #[tokio::test]
    async fn follow_up_sends_update_then_create() {
        let (sender, mut rx) = RealtimeSender::channel();
        let coordinator = InstructionCoordinator::new(sender);

        coordinator.follow_up("Where are you heading?").unwrap();

        assert_eq!(
            drain_types(&mut rx),
            vec!["session.update", "response.create"]
        );
    }

    #[tokio::test]
    async fn speak_after_tool_sends_only_response_create_with_tools_off() {
        let (sender, mut rx) = RealtimeSender::channel();
        let coordinator = InstructionCoordinator::new(sender);

        coordinator.speak_after_tool("How many passengers?").unwrap();

        let out = rx.try_recv().unwrap();
        let Outbound::Event(text) = out else {
            panic!("expected event");
        };
        let json: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["type"], "response.create");
        assert_eq!(json["response"]["tool_choice"], "none");
        assert!(json["response"]["instructions"]
            .as_str()
            .unwrap()
            .contains("How many passengers?"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn reprompt_with_gated_mic_clears_input_buffer() {
        let (sender, mut rx) = RealtimeSender::channel();
        let coordinator = InstructionCoordinator::new(sender);

        // Confirmation already recorded: no timeout wait
        coordinator.note_response_canceled();
        coordinator.reprompt("When would you like the taxi?", true).await.unwrap();

        assert_eq!(
            drain_types(&mut rx),
            vec![
                "response.cancel",
                "input_audio_buffer.clear",
                "conversation.item.create",
                "session.update",
                "response.create"
            ]
        );
    }

    #[tokio::test]
    async fn reprompt_with_open_mic_commits_input_buffer() {
        let (sender, mut rx) = RealtimeSender::channel();
        let coordinator = InstructionCoordinator::new(sender);

        coordinator.note_response_canceled();
        coordinator.reprompt("Where from?", false).await.unwrap();

        let types = drain_types(&mut rx);
        assert_eq!(types[1], "input_audio_buffer.commit");
    }

    #[tokio::test]
    async fn reprompt_proceeds_after_ack_timeout() {
        let (sender, mut rx) = RealtimeSender::channel();
        let coordinator = InstructionCoordinator::new(sender);

        let started = std::time::Instant::now();
        coordinator.reprompt("Where from?", true).await.unwrap();
        assert!(started.elapsed() >= CANCEL_ACK_TIMEOUT);

        let types = drain_types(&mut rx);
        assert_eq!(types.len(), 5);
    }

    #[test]
    fn wrappers_carry_the_text_and_their_constraints() {
        let strict = InstructionCoordinator::wrap_strict("Hello there.");
        assert!(strict.contains("Hello there."));
        assert!(strict.contains("[INSTRUCTION]"));
        assert!(strict.contains("Do not greet"));

        let reprompt = InstructionCoordinator::wrap_reprompt("Where from?");
        assert!(reprompt.contains("Where from?"));
        assert!(reprompt.contains("Do not acknowledge"));
    }
}

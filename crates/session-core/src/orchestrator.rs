//! Per-call session orchestration
//!
//! One [`CallSession`] per answered call. Start wires the whole pipeline:
//! transport connect, session configuration (G.711 both ways, server VAD,
//! the booking tool), audio bridge, tool router, greeting. A single
//! dispatcher task then owns all routing - the transport's receive loop
//! only ever enqueues parsed events, so handler work can never stall the
//! socket.
//!
//! The session never touches SIP. Transfer and hangup decisions surface as
//! [`SessionEvent`]s; the embedding stack acts on them and calls
//! [`CallSession::shutdown`] when the leg is torn down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use ridebridge_dialog_core::{BookingEngine, Stage, TurnAnalyzer};
use ridebridge_media_core::{
    AudioBridge, AudioOutputEvent, AudioSignal, AudioUplink, G711Codec, OutputConfig, RtpWriter,
    FRAME_DURATION,
};
use ridebridge_realtime_core::{
    ClientEvent, DisconnectHandler, EventHandler, InstructionCoordinator, RealtimeSender,
    RealtimeTransport, ServerEvent, WsConfig, WsTransport,
};

use crate::backend::BookingBackend;
use crate::config::CallConfig;
use crate::error::Result;
use crate::events::{CallId, EndReason, SessionEvent};
use crate::router::ToolRouter;

/// Maximum grace period for queued audio to play out on disconnect
const DISCONNECT_DRAIN_CAP: Duration = Duration::from_secs(2);

/// What the dispatcher consumes
enum DispatcherMsg {
    /// A parsed realtime event
    Event(ServerEvent),
    /// The transport dropped
    Disconnected(String),
}

/// Adapts the realtime send lane to the media layer's uplink port
struct SenderUplink {
    sender: RealtimeSender,
}

impl AudioUplink for SenderUplink {
    fn send_audio(&self, payload_base64: String) {
        // Transient send failures drop the frame; the next one retries
        if self
            .sender
            .send(&ClientEvent::InputAudioBufferAppend {
                audio: payload_base64,
            })
            .is_err()
        {
            trace!("audio upload dropped, transport gone");
        }
    }

    fn send_cancel(&self) {
        if self.sender.send(&ClientEvent::ResponseCancel).is_err() {
            debug!("barge-in cancel dropped, transport gone");
        }
    }
}

/// A live bridged call
pub struct CallSession {
    id: CallId,
    transport: Arc<WsTransport>,
    bridge: Arc<AudioBridge>,
    events: mpsc::UnboundedSender<SessionEvent>,
    shutdown_tx: watch::Sender<bool>,
    ended: Arc<AtomicBool>,
    dispatcher: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl CallSession {
    /// Connect, configure, greet, and start dispatching.
    ///
    /// Returns the session handle and its event stream. The caller feeds
    /// inbound RTP payloads via [`handle_inbound_rtp`](Self::handle_inbound_rtp).
    pub async fn start(
        config: CallConfig,
        codec: G711Codec,
        rtp_writer: Arc<dyn RtpWriter>,
        backend: Arc<dyn BookingBackend>,
    ) -> Result<(Arc<CallSession>, mpsc::UnboundedReceiver<SessionEvent>)> {
        let id = CallId::new();
        let (session_tx, session_rx) = mpsc::unbounded_channel();
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel::<DispatcherMsg>();

        let handler: EventHandler = {
            let tx = dispatch_tx.clone();
            Arc::new(move |event: ServerEvent| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(DispatcherMsg::Event(event));
                }
                .boxed()
            })
        };
        let on_disconnected: DisconnectHandler = {
            let tx = dispatch_tx.clone();
            Arc::new(move |reason: String| {
                let _ = tx.send(DispatcherMsg::Disconnected(reason));
            })
        };

        let mut extra_headers = Vec::new();
        if let Some((name, value)) = &config.protocol_header {
            extra_headers.push((name.clone(), value.clone()));
        }

        let transport = Arc::new(
            WsTransport::connect(
                WsConfig {
                    url: config.url.clone(),
                    bearer_token: config.auth_token.clone(),
                    extra_headers,
                },
                handler,
                on_disconnected,
            )
            .await?,
        );

        let sender = transport.sender();
        let uplink: Arc<dyn AudioUplink> = Arc::new(SenderUplink {
            sender: sender.clone(),
        });
        let (audio_tx, audio_rx) = mpsc::unbounded_channel::<AudioOutputEvent>();
        let bridge = AudioBridge::new(codec, uplink, audio_tx, OutputConfig::default());
        bridge.start(Arc::clone(&rtp_writer))?;

        let coordinator = Arc::new(InstructionCoordinator::new(sender.clone()));
        let engine = BookingEngine::new(Utc::now().naive_utc());
        let router = Arc::new(Mutex::new(ToolRouter::new(
            engine,
            TurnAnalyzer::new(),
            Arc::clone(&coordinator),
            sender.clone(),
            backend,
            session_tx.clone(),
        )));

        // Configure before anything can speak, then greet
        sender.send(&ClientEvent::SessionUpdate {
            session: config.session_config(codec),
        })?;
        router.lock().await.begin()?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ended = Arc::new(AtomicBool::new(false));

        let dispatcher = tokio::spawn(run_dispatcher(
            DispatcherCtx {
                bridge: Arc::clone(&bridge),
                router,
                coordinator,
                events: session_tx.clone(),
                config,
                ended: Arc::clone(&ended),
            },
            dispatch_rx,
            audio_rx,
            shutdown_rx,
        ));

        let session = Arc::new(CallSession {
            id,
            transport,
            bridge,
            events: session_tx,
            shutdown_tx,
            ended,
            dispatcher: std::sync::Mutex::new(Some(dispatcher)),
        });
        info!(call = %session.id, "call session started");
        Ok((session, session_rx))
    }

    /// This call's id
    pub fn id(&self) -> &CallId {
        &self.id
    }

    /// The call's audio bridge (monitoring, gate state)
    pub fn bridge(&self) -> &Arc<AudioBridge> {
        &self.bridge
    }

    /// Feed one inbound caller RTP payload
    pub fn handle_inbound_rtp(&self, payload: &[u8]) {
        self.bridge.handle_inbound_rtp(payload);
    }

    /// Tear the session down: stop dispatching, stop the clock, close the
    /// transport, emit the final [`SessionEvent::CallEnded`]. Idempotent.
    pub async fn shutdown(&self, reason: EndReason) {
        if self.ended.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(true);
        let handle = self.dispatcher.lock().ok().and_then(|mut guard| guard.take());
        if let Some(handle) = handle {
            let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
        }
        self.bridge.stop();
        let _ = self.transport.close().await;
        let _ = self.events.send(SessionEvent::CallEnded { reason });
        info!(call = %self.id, "call session ended");
    }
}

struct DispatcherCtx {
    bridge: Arc<AudioBridge>,
    router: Arc<Mutex<ToolRouter>>,
    coordinator: Arc<InstructionCoordinator>,
    events: mpsc::UnboundedSender<SessionEvent>,
    config: CallConfig,
    ended: Arc<AtomicBool>,
}

/// The single consumer of parsed events, audio-path events, the no-reply
/// watchdog and the shutdown signal.
async fn run_dispatcher(
    ctx: DispatcherCtx,
    mut dispatch_rx: mpsc::UnboundedReceiver<DispatcherMsg>,
    mut audio_rx: mpsc::UnboundedReceiver<AudioOutputEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut last_activity = Instant::now();
    let mut silent_reprompts = 0u32;
    let mut watchdog_enabled = true;

    loop {
        let awaiting_confirmation = ctx.router.lock().await.stage() == Stage::ConfirmDetails;
        let timeout = if awaiting_confirmation {
            ctx.config.confirmation_timeout
        } else {
            ctx.config.no_reply_timeout
        };
        let deadline = if watchdog_enabled {
            last_activity + timeout
        } else {
            Instant::now() + Duration::from_secs(86_400)
        };

        tokio::select! {
            _ = shutdown_rx.changed() => break,

            Some(message) = dispatch_rx.recv() => match message {
                DispatcherMsg::Event(event) => {
                    if is_caller_activity(&event) {
                        last_activity = Instant::now();
                        silent_reprompts = 0;
                    }
                    route_event(&ctx, event).await;
                }
                DispatcherMsg::Disconnected(reason) => {
                    warn!(%reason, "realtime transport lost mid-call");
                    // Let whatever audio is queued finish before stopping
                    let queued = ctx.bridge.playout().queued_frames() as u32;
                    let grace = (FRAME_DURATION * queued).min(DISCONNECT_DRAIN_CAP);
                    tokio::time::sleep(grace).await;
                    ctx.bridge.stop();
                    if !ctx.ended.swap(true, Ordering::SeqCst) {
                        let _ = ctx.events.send(SessionEvent::CallEnded {
                            reason: EndReason::Disconnected,
                        });
                    }
                    break;
                }
            },

            Some(event) = audio_rx.recv() => {
                let AudioOutputEvent::MicUngated { forced } = event;
                if forced {
                    warn!("mic ungated by watchdog");
                }
                let _ = ctx.events.send(SessionEvent::MicUngated { forced });
            }

            _ = tokio::time::sleep_until(deadline) => {
                if ctx.router.lock().await.is_frozen() {
                    watchdog_enabled = false;
                    continue;
                }
                silent_reprompts += 1;
                if silent_reprompts > ctx.config.max_silent_reprompts {
                    let goodbye = "I haven't heard anything for a while, so I'll hang up \
                                   now. Please call back any time. Goodbye.";
                    let _ = ctx.coordinator.follow_up(goodbye);
                    let _ = ctx.events.send(SessionEvent::HangupRequested {
                        goodbye: goodbye.to_string(),
                    });
                    watchdog_enabled = false;
                } else {
                    debug!(silent_reprompts, "no reply from caller, reprompting");
                    let question = ctx
                        .router
                        .lock()
                        .await
                        .pending_question()
                        .unwrap_or_else(|| "Are you still there?".to_string());
                    let gated = ctx.bridge.gate().is_gated();
                    let coordinator = Arc::clone(&ctx.coordinator);
                    // Spawned so the dispatcher keeps draining events while
                    // the reprompt waits for its cancellation ack
                    tokio::spawn(async move {
                        if let Err(err) = coordinator.reprompt(&question, gated).await {
                            debug!(%err, "reprompt failed");
                        }
                    });
                    last_activity = Instant::now();
                }
            }
        }
    }
    debug!("dispatcher stopped");
}

/// Events that prove the caller is still there
fn is_caller_activity(event: &ServerEvent) -> bool {
    matches!(
        event,
        ServerEvent::SpeechStarted
            | ServerEvent::SpeechStopped
            | ServerEvent::CallerTranscript { .. }
            | ServerEvent::ToolCallDone { .. }
    )
}

async fn route_event(ctx: &DispatcherCtx, event: ServerEvent) {
    match event {
        ServerEvent::AudioDelta { delta } => {
            ctx.bridge.handle_signal(AudioSignal::Delta(delta));
        }
        ServerEvent::AudioStarted => ctx.bridge.handle_signal(AudioSignal::Started),
        ServerEvent::AudioDone => ctx.bridge.handle_signal(AudioSignal::Done),
        ServerEvent::SpeechStarted => ctx.bridge.handle_signal(AudioSignal::SpeechStarted),
        ServerEvent::SpeechStopped => trace!("caller speech stopped"),
        ServerEvent::ToolCallDone {
            call_id,
            name,
            arguments,
        } => {
            let mut router = ctx.router.lock().await;
            if let Err(err) = router.handle_tool_call(&call_id, &name, &arguments).await {
                warn!(%err, %call_id, "tool call handling failed");
            }
        }
        ServerEvent::CallerTranscript { transcript } => {
            debug!(%transcript, "caller transcript");
            ctx.router.lock().await.note_caller_transcript(transcript);
        }
        ServerEvent::AssistantTranscriptDone { transcript } => {
            debug!(%transcript, "assistant transcript");
            ctx.router.lock().await.note_assistant_turn(transcript);
        }
        ServerEvent::ResponseCanceled => ctx.coordinator.note_response_canceled(),
        ServerEvent::ResponseCreated => trace!("response created"),
        ServerEvent::SessionCreated | ServerEvent::SessionUpdated => {
            debug!("session acknowledged")
        }
        ServerEvent::Error { message } => {
            // Known protocol edges are noisy but harmless
            if message.contains("no active response") || message.contains("buffer too small") {
                debug!(%message, "benign protocol error");
            } else {
                warn!(%message, "realtime error");
            }
        }
        ServerEvent::Unknown => trace!("unknown event ignored"),
    }
}

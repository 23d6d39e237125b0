//! Duplex WebSocket transport
//!
//! One persistent connection per call. Sends from every part of the bridge
//! funnel through a single unbounded channel into one writer task, which
//! serializes them on the wire - the RTP receive callback, the tool router
//! and the watchdogs can all send concurrently without interleaving
//! frames. The receive task parses each complete text frame, awaits the
//! registered handler, and survives anything the handler does; pings are
//! answered through the same writer lane.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use http::header::{HeaderName, HeaderValue, AUTHORIZATION};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace, warn};

use crate::client_event::ClientEvent;
use crate::error::{Error, Result};
use crate::server_event::{parse, ServerEvent};

/// How long `close` waits for the transport tasks to wind down
const CLOSE_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Handler invoked for every parsed inbound event.
///
/// The receive loop awaits the returned future; implementations must
/// swallow their own errors - nothing a handler does may kill the loop.
pub type EventHandler = Arc<dyn Fn(ServerEvent) -> BoxFuture<'static, ()> + Send + Sync>;

/// Fired exactly once when the connection is lost (not on local close)
pub type DisconnectHandler = Arc<dyn Fn(String) + Send + Sync>;

/// Connection parameters
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Full WebSocket URL, including any model query parameter
    pub url: String,
    /// Bearer token for the Authorization header
    pub bearer_token: String,
    /// Additional headers, e.g. the protocol-version indicator
    pub extra_headers: Vec<(String, String)>,
}

/// One message in the serialized writer lane
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// A serialized client event
    Event(String),
    /// A pong answering a server ping
    Pong(Bytes),
    /// Close the connection with a normal-closure frame
    Close,
}

/// Cloneable, thread-safe handle into the writer lane.
///
/// `send` is synchronous and non-blocking; ordering across all clones is
/// the channel order, which is what gives the transport its
/// single-producer guarantee.
#[derive(Clone)]
pub struct RealtimeSender {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl RealtimeSender {
    /// Serialize and enqueue one client event
    pub fn send(&self, event: &ClientEvent) -> Result<()> {
        let text = serde_json::to_string(event)?;
        trace!(kind = event.event_type(), "queueing client event");
        self.tx
            .send(Outbound::Event(text))
            .map_err(|_| Error::NotConnected)
    }

    /// Whether the writer lane is gone
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// A sender wired to a bare receiver instead of a socket.
    ///
    /// Lets tests and loopback integrations observe the exact on-wire
    /// order without a server.
    pub fn channel() -> (RealtimeSender, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (RealtimeSender { tx }, rx)
    }

    fn send_raw(&self, outbound: Outbound) -> Result<()> {
        self.tx.send(outbound).map_err(|_| Error::NotConnected)
    }
}

/// Transport operations available after connect
#[async_trait::async_trait]
pub trait RealtimeTransport: Send + Sync {
    /// Handle into the serialized send lane
    fn sender(&self) -> RealtimeSender;
    /// Whether the connection is still up
    fn is_connected(&self) -> bool;
    /// Close with a normal-closure frame and drain the tasks
    async fn close(&self) -> Result<()>;
}

/// WebSocket-backed realtime transport
pub struct WsTransport {
    sender: RealtimeSender,
    disconnect_fired: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl WsTransport {
    /// Open the connection and start the writer and receive tasks.
    ///
    /// `handler` runs for every parsed inbound event; `on_disconnected`
    /// fires once if the connection drops (a local `close` does not count
    /// as a disconnect).
    pub async fn connect(
        config: WsConfig,
        handler: EventHandler,
        on_disconnected: DisconnectHandler,
    ) -> Result<Self> {
        let mut request = config.url.as_str().into_client_request()?;

        let auth = HeaderValue::from_str(&format!("Bearer {}", config.bearer_token))
            .map_err(|_| Error::InvalidHeader {
                name: AUTHORIZATION.as_str().to_string(),
            })?;
        request.headers_mut().insert(AUTHORIZATION, auth);

        for (name, value) in &config.extra_headers {
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|_| Error::InvalidHeader {
                    name: name.clone(),
                })?;
            let header_value =
                HeaderValue::from_str(value).map_err(|_| Error::InvalidHeader {
                    name: name.clone(),
                })?;
            request.headers_mut().insert(header_name, header_value);
        }

        let (stream, _response) = connect_async(request).await?;
        debug!(url = %config.url, "realtime websocket connected");

        let (mut sink, mut source) = stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
        let sender = RealtimeSender { tx: tx.clone() };
        let disconnect_fired = Arc::new(AtomicBool::new(false));

        // Writer: the single producer onto the socket
        let writer = tokio::spawn(async move {
            while let Some(outbound) = rx.recv().await {
                let message = match outbound {
                    Outbound::Event(text) => Message::Text(text.into()),
                    Outbound::Pong(data) => Message::Pong(data),
                    Outbound::Close => {
                        let frame = CloseFrame {
                            code: CloseCode::Normal,
                            reason: "session ended".into(),
                        };
                        if let Err(err) = sink.send(Message::Close(Some(frame))).await {
                            debug!(%err, "close frame send failed");
                        }
                        break;
                    }
                };
                if let Err(err) = sink.send(message).await {
                    warn!(%err, "websocket send failed");
                    break;
                }
            }
        });

        // Receiver: parse, dispatch, never die to a handler
        let reader = {
            let fired = Arc::clone(&disconnect_fired);
            let pong_tx = tx;
            tokio::spawn(async move {
                while let Some(item) = source.next().await {
                    match item {
                        Ok(Message::Text(text)) => {
                            let event = parse(text.as_str());
                            handler(event).await;
                        }
                        Ok(Message::Ping(data)) => {
                            let _ = pong_tx.send(Outbound::Pong(data));
                        }
                        Ok(Message::Close(_)) => {
                            fire_disconnect(&fired, &on_disconnected, "closed by server");
                            break;
                        }
                        Ok(_) => {}
                        Err(err) => {
                            fire_disconnect(&fired, &on_disconnected, &err.to_string());
                            break;
                        }
                    }
                }
                fire_disconnect(&fired, &on_disconnected, "stream ended");
            })
        };

        Ok(Self {
            sender,
            disconnect_fired,
            tasks: Mutex::new(vec![writer, reader]),
        })
    }
}

#[async_trait::async_trait]
impl RealtimeTransport for WsTransport {
    fn sender(&self) -> RealtimeSender {
        self.sender.clone()
    }

    fn is_connected(&self) -> bool {
        !self.sender.is_closed() && !self.disconnect_fired.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        // A local close is not a disconnect; suppress the callback first
        self.disconnect_fired.store(true, Ordering::SeqCst);
        let _ = self.sender.send_raw(Outbound::Close);

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if tokio::time::timeout(CLOSE_DRAIN_TIMEOUT, task).await.is_err() {
                warn!("transport task did not drain in time");
            }
        }
        debug!("realtime websocket closed");
        Ok(())
    }
}

fn fire_disconnect(fired: &AtomicBool, handler: &DisconnectHandler, reason: &str) {
    if !fired.swap(true, Ordering::SeqCst) {
        debug!(reason, "realtime websocket disconnected");
        handler(reason.to_string());
    }
}

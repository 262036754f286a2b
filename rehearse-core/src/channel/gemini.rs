//! Gemini Live connector over a TLS WebSocket.
//!
//! The connector sends the setup message, waits for `setupComplete`, then
//! splits the socket into a writer task (outbound frames) and a reader task
//! (inbound events). Either side ending closes the other.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{stream::SplitSink, stream::SplitStream, SinkExt, StreamExt};
use tokio::{net::TcpStream, sync::mpsc};
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::{
    channel::{
        protocol::{ClientMessage, ServerMessage},
        ChannelEvent, ChannelLink, Connector, Outbound, RemoteEnd,
    },
    error::{RehearseError, Result},
    setup::SessionSetup,
};

pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

const SETUP_TIMEOUT: Duration = Duration::from_secs(15);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Clone)]
pub struct GeminiConnector {
    endpoint: String,
    api_key: String,
    setup_timeout: Duration,
}

impl std::fmt::Debug for GeminiConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiConnector")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl GeminiConnector {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: api_key.into(),
            setup_timeout: SETUP_TIMEOUT,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_setup_timeout(mut self, timeout: Duration) -> Self {
        self.setup_timeout = timeout;
        self
    }

    fn url(&self) -> String {
        format!("{}?key={}", self.endpoint, self.api_key)
    }
}

#[async_trait]
impl Connector for GeminiConnector {
    async fn open(&self, setup: &SessionSetup) -> Result<ChannelLink> {
        if self.api_key.trim().is_empty() {
            return Err(RehearseError::ChannelOpen("missing API key".into()));
        }

        // The URL carries the key; never log it.
        let (socket, _response) = tokio_tungstenite::connect_async(self.url())
            .await
            .map_err(|e| RehearseError::ChannelOpen(format!("connect: {e}")))?;
        debug!(endpoint = %self.endpoint, "websocket connected");

        let (mut sink, mut stream) = socket.split();
        let setup_json = serde_json::to_string(&ClientMessage::setup(setup))
            .map_err(|e| RehearseError::ChannelOpen(format!("encode setup: {e}")))?;
        sink.send(Message::Text(setup_json))
            .await
            .map_err(|e| RehearseError::ChannelOpen(format!("send setup: {e}")))?;

        match tokio::time::timeout(self.setup_timeout, await_setup_complete(&mut stream)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = sink.close().await;
                return Err(e);
            }
            Err(_) => {
                let _ = sink.close().await;
                return Err(RehearseError::ChannelOpen(
                    "timed out waiting for setup acknowledgement".into(),
                ));
            }
        }
        info!(model = %setup.model, language = %setup.language, "live channel open");

        let (link, RemoteEnd { outbound, events }) = ChannelLink::pair();
        tokio::spawn(write_loop(sink, outbound));
        tokio::spawn(read_loop(stream, events));
        Ok(link)
    }
}

fn parse_frame(msg: &Message) -> Option<std::result::Result<ServerMessage, serde_json::Error>> {
    match msg {
        Message::Text(text) => Some(serde_json::from_str(text)),
        Message::Binary(bytes) => Some(serde_json::from_slice(bytes)),
        _ => None,
    }
}

async fn await_setup_complete(stream: &mut SplitStream<Socket>) -> Result<()> {
    while let Some(frame) = stream.next().await {
        let frame = frame.map_err(|e| RehearseError::ChannelOpen(e.to_string()))?;
        if let Message::Close(close) = &frame {
            let reason = close
                .as_ref()
                .map(|c| c.reason.to_string())
                .unwrap_or_default();
            return Err(RehearseError::ChannelOpen(format!(
                "closed during setup: {reason}"
            )));
        }
        match parse_frame(&frame) {
            Some(Ok(msg)) if msg.is_setup_complete() => return Ok(()),
            Some(Ok(_)) => debug!("ignoring message before setup completed"),
            Some(Err(e)) => warn!("unparseable message during setup: {e}"),
            None => {}
        }
    }
    Err(RehearseError::ChannelOpen("stream ended during setup".into()))
}

async fn write_loop(
    mut sink: SplitSink<Socket, Message>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    let mut sent = 0u64;
    while let Some(item) = outbound.recv().await {
        match item {
            Outbound::Frame(payload) => {
                let json = match serde_json::to_string(&ClientMessage::audio(payload)) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("failed to encode audio frame: {e}");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(json)).await {
                    warn!("send failed, stopping writer: {e}");
                    return;
                }
                sent += 1;
            }
            Outbound::Close => break,
        }
    }
    debug!(sent, "writer closing socket");
    let _ = sink.close().await;
}

async fn read_loop(mut stream: SplitStream<Socket>, events: mpsc::UnboundedSender<ChannelEvent>) {
    let terminal = loop {
        let Some(frame) = stream.next().await else {
            break ChannelEvent::Closed { reason: None };
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => break ChannelEvent::Error(e.to_string()),
        };
        if let Message::Close(close) = &frame {
            break ChannelEvent::Closed {
                reason: close.as_ref().map(|c| c.reason.to_string()),
            };
        }

        let msg = match parse_frame(&frame) {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                warn!("dropping unparseable server message: {e}");
                continue;
            }
            None => continue,
        };
        if let Some(go_away) = msg.go_away() {
            warn!(time_left = ?go_away.time_left, "server announced disconnect");
        }
        if msg.turn_complete() {
            debug!("respondent turn complete");
        }
        for event in msg.into_events() {
            if events.send(event).is_err() {
                debug!("session dropped its link, reader exiting");
                return;
            }
        }
    };
    let _ = events.send(terminal);
}

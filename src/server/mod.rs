pub mod heartbeat;
pub mod messages;
pub mod translator;

pub use heartbeat::{ticker, Heartbeat, HeartbeatAction};
pub use messages::{InboundMessage, OutboundReply};
pub use translator::ProtocolTranslator;

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{Sink, SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::{self, Message};
use uuid::Uuid;

use crate::device::{publish, BridgeEvent, EventSender};
use messages::parse_frame;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Malformed {tag} message: {reason}")]
    MalformedMessage { tag: String, reason: String },

    #[error("Failed to encode reply: {0}")]
    Encode(String),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// WebSocket endpoint the script player connects to
pub struct ConnectionServer {
    listener: TcpListener,
    translator: ProtocolTranslator,
    heartbeat_interval: Duration,
    events: EventSender,
}

impl ConnectionServer {
    pub async fn bind(
        addr: SocketAddr,
        translator: ProtocolTranslator,
        heartbeat_interval: Duration,
        events: EventSender,
    ) -> std::result::Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        Ok(Self::from_listener(listener, translator, heartbeat_interval, events))
    }

    pub fn from_listener(
        listener: TcpListener,
        translator: ProtocolTranslator,
        heartbeat_interval: Duration,
        events: EventSender,
    ) -> Self {
        Self {
            listener,
            translator,
            heartbeat_interval,
            events,
        }
    }

    pub fn local_addr(&self) -> std::result::Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the task is dropped
    pub async fn run(self) -> std::result::Result<(), ServerError> {
        log::info!("Starting websocket server on {}", self.local_addr()?);

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    log::warn!("Failed to accept connection: {}", e);
                    continue;
                }
            };

            let translator = self.translator.clone();
            let events = self.events.clone();
            let heartbeat_interval = self.heartbeat_interval;
            tokio::spawn(async move {
                handle_connection(stream, peer, translator, heartbeat_interval, events).await;
            });
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    translator: ProtocolTranslator,
    heartbeat_interval: Duration,
    events: EventSender,
) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            log::warn!("WebSocket handshake with {} failed: {}", peer, e);
            return;
        }
    };

    let id = Uuid::new_v4();
    log::info!("Client {} connected from {}", id, peer);
    publish(&events, BridgeEvent::ClientConnected { id, peer: peer.to_string() });

    let (mut sink, mut source) = ws.split();
    let mut heartbeat = Heartbeat::new();
    let mut ticker = heartbeat::ticker(heartbeat_interval);

    loop {
        tokio::select! {
            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Err(e) = dispatch_frame(&text, &translator, &mut sink).await {
                        log::info!("Client {} send failed: {}", id, e);
                        break;
                    }
                }
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => {
                        if let Err(e) = dispatch_frame(&text, &translator, &mut sink).await {
                            log::info!("Client {} send failed: {}", id, e);
                            break;
                        }
                    }
                    Err(e) => log::warn!("Dropping non UTF-8 frame from {}: {}", id, e),
                },
                Some(Ok(Message::Pong(_))) => heartbeat.on_pong(),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    log::info!("Client {} read failed: {}", id, e);
                    break;
                }
            },
            _ = ticker.tick() => match heartbeat.on_tick() {
                HeartbeatAction::Terminate => {
                    log::info!("Client {} missed heartbeat, terminating", id);
                    break;
                }
                HeartbeatAction::Ping => {
                    if let Err(e) = sink.send(Message::Ping(Vec::new())).await {
                        log::info!("Client {} ping failed: {}", id, e);
                        break;
                    }
                }
            },
        }
    }

    log::info!("Client {} disconnected", id);
    publish(&events, BridgeEvent::ClientDisconnected { id });
    publish(&events, BridgeEvent::ManualControl { enabled: true });
}

/// Translate every message in a frame, replying to each as soon as it is handled.
/// Malformed input is logged and skipped; only send failures are returned.
async fn dispatch_frame<S>(
    text: &str,
    translator: &ProtocolTranslator,
    sink: &mut S,
) -> std::result::Result<(), tungstenite::Error>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let entries = match parse_frame(text) {
        Ok(entries) => entries,
        Err(e) => {
            log::warn!("Dropping frame: {}", e);
            return Ok(());
        }
    };

    for (tag, body) in entries {
        let message = match InboundMessage::decode(&tag, body) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("Skipping message: {}", e);
                continue;
            }
        };

        if let Some(reply) = translator.handle(message).await {
            match reply.to_frame() {
                Ok(frame) => sink.send(Message::Text(frame)).await?,
                Err(e) => log::error!("{}", e),
            }
        }
    }

    Ok(())
}

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::errors::CallError;
use crate::signaling::SignalMessage;

type RawWs = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<RawWs, Message>;
type WsStream = SplitStream<RawWs>;

/// Build the handshake URL. A bare `ws://host:port` endpoint gets a `/`
/// path so the request URI stays valid once the query is appended.
fn request_url(endpoint: &str, user_id: &str, chat_id: &str) -> String {
    let mut url = endpoint.to_string();
    let path_start = endpoint.find("://").map(|i| i + 3).unwrap_or(0);
    if !endpoint[path_start..].contains('/') {
        url.push('/');
    }
    format!("{url}?userId={user_id}&chatId={chat_id}")
}

/// What the signaling channel delivers to its consumer, in arrival order.
#[derive(Debug, Clone)]
pub enum ChannelNotice {
    Message(SignalMessage),
    /// The socket dropped without a normal close. The consumer decides
    /// what to do with the in-progress call; the channel never reconnects.
    Lost,
    /// The socket closed normally (local `close()` or remote clean close).
    Closed,
}

/// Outbound half of a signaling connection. Object-safe so the engine
/// can be driven by a scripted port in tests.
#[async_trait]
pub trait SignalingPort: Send + Sync {
    /// Returns false if the channel is no longer open.
    async fn send(&self, msg: &SignalMessage) -> bool;
    async fn close(&self, reason: &str);
}

/// A WebSocket signaling connection for one call context.
///
/// One connection per `(user_id, chat_id)`. Sends `join` immediately on
/// open; inbound frames are parsed and forwarded over the inbox channel
/// in the order received. Malformed frames are logged and dropped.
pub struct SignalingChannel {
    sink: Arc<Mutex<Option<WsSink>>>,
    closing: Arc<AtomicBool>,
}

impl SignalingChannel {
    /// Connect, announce presence, and spawn the read loop.
    pub async fn connect(
        endpoint: &str,
        user_id: &str,
        chat_id: &str,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<ChannelNotice>), CallError> {
        let url = request_url(endpoint, user_id, chat_id);
        let (ws, _response) = connect_async(&url)
            .await
            .map_err(|e| CallError::SignalingUnavailable(e.to_string()))?;
        tracing::info!("signaling connected: user={user_id} chat={chat_id}");

        let (sink, stream) = ws.split();
        let channel = Arc::new(Self {
            sink: Arc::new(Mutex::new(Some(sink))),
            closing: Arc::new(AtomicBool::new(false)),
        });

        let join = SignalMessage::Join {
            chat_id: chat_id.to_string(),
            user_id: user_id.to_string(),
        };
        if !channel.send(&join).await {
            return Err(CallError::SignalingUnavailable(
                "socket closed before join".into(),
            ));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(Self::read_loop(stream, tx, channel.closing.clone()));

        Ok((channel, rx))
    }

    async fn read_loop(
        mut stream: WsStream,
        tx: mpsc::UnboundedSender<ChannelNotice>,
        closing: Arc<AtomicBool>,
    ) {
        let mut clean = false;
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => match SignalMessage::parse(&text) {
                    Ok(msg) => {
                        if tx.send(ChannelNotice::Message(msg)).is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("dropping malformed signaling frame: {e}");
                    }
                },
                Ok(Message::Close(close_frame)) => {
                    clean = close_frame
                        .map(|f| f.code == CloseCode::Normal)
                        .unwrap_or(false);
                    break;
                }
                Ok(other) => {
                    tracing::debug!("ignoring non-text frame: {other:?}");
                }
                Err(e) => {
                    tracing::warn!("signaling read error: {e}");
                    break;
                }
            }
        }

        let notice = if clean || closing.load(Ordering::SeqCst) {
            ChannelNotice::Closed
        } else {
            ChannelNotice::Lost
        };
        let _ = tx.send(notice);
        tracing::info!("signaling read loop ended");
    }
}

#[async_trait]
impl SignalingPort for SignalingChannel {
    async fn send(&self, msg: &SignalMessage) -> bool {
        let json = match msg.to_json() {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!("failed to encode signaling message: {e}");
                return false;
            }
        };

        let mut sink = self.sink.lock().await;
        let Some(ws) = sink.as_mut() else {
            return false;
        };
        match ws.send(Message::Text(json.into())).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("signaling send failed: {e}");
                sink.take();
                false
            }
        }
    }

    async fn close(&self, reason: &str) {
        self.closing.store(true, Ordering::SeqCst);
        let mut sink = self.sink.lock().await;
        if let Some(mut ws) = sink.take() {
            let frame = CloseFrame {
                code: CloseCode::Normal,
                reason: reason.to_string().into(),
            };
            if let Err(e) = ws.send(Message::Close(Some(frame))).await {
                tracing::debug!("close frame send failed: {e}");
            }
            tracing::info!("signaling closed: {reason}");
        }
    }
}

use crate::config::Config;
use crate::transport::events::{decode_frame, Frame, TransportEvent};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, instrument, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);

/// Why a connection ended.
enum PumpEnd {
    /// The consumer dropped its receiver; stop for good.
    ConsumerGone,
    Lost(String),
}

/// Live event feed over the backend's Socket.IO websocket endpoint.
///
/// Reconnects forever with capped exponential backoff until the receiving side
/// of the channel is dropped.
#[derive(Debug, Clone)]
pub struct SocketEventSource {
    url: Url,
    max_backoff: Duration,
}

impl SocketEventSource {
    pub fn new(config: &Config) -> Self {
        Self {
            url: config.events_url.clone(),
            max_backoff: config.reconnect_max_backoff,
        }
    }

    pub fn spawn(self, tx: mpsc::Sender<TransportEvent>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(tx).await })
    }

    fn backoff(&self, failures: u32) -> Duration {
        let factor = 1u32 << failures.min(6);
        (INITIAL_BACKOFF * factor).min(self.max_backoff)
    }

    #[instrument(skip(self, tx), fields(url = %self.url))]
    async fn run(self, tx: mpsc::Sender<TransportEvent>) {
        let mut failures: u32 = 0;
        let mut connected_before = false;

        loop {
            if tx.is_closed() {
                break;
            }
            match connect_async(self.url.as_str()).await {
                Ok((ws_stream, _)) => {
                    let event = if connected_before || failures > 0 {
                        info!(attempts = failures, "Reconnected to event channel");
                        TransportEvent::Reconnected { attempts: failures.max(1) }
                    } else {
                        info!("Connected to event channel");
                        TransportEvent::Connected
                    };
                    if tx.send(event).await.is_err() {
                        break;
                    }
                    failures = 0;
                    connected_before = true;

                    match Self::pump(ws_stream, &tx).await {
                        PumpEnd::ConsumerGone => break,
                        PumpEnd::Lost(reason) => {
                            warn!(reason = %reason, "Event channel lost");
                            if tx.send(TransportEvent::Disconnected(reason)).await.is_err() {
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    failures += 1;
                    warn!(error = %e, attempt = failures, "Event channel connection failed");
                    if tx.send(TransportEvent::ConnectError(e.to_string())).await.is_err() {
                        break;
                    }
                }
            }
            tokio::time::sleep(self.backoff(failures)).await;
        }
        debug!("Event source stopped");
    }

    async fn pump(ws_stream: WsStream, tx: &mpsc::Sender<TransportEvent>) -> PumpEnd {
        let (mut write, mut read) = ws_stream.split();

        while let Some(msg_result) = read.next().await {
            let text = match msg_result {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) => return PumpEnd::Lost("closed by server".to_string()),
                Ok(_) => continue,
                Err(e) => return PumpEnd::Lost(e.to_string()),
            };

            let reply = match decode_frame(&text) {
                Frame::Open => Some("40"),
                Frame::Ping => Some("3"),
                Frame::NamespaceConnected => {
                    debug!("Socket.IO namespace connected");
                    None
                }
                Frame::NamespaceDisconnected => {
                    return PumpEnd::Lost("namespace disconnected by server".to_string());
                }
                Frame::Event(event) => {
                    if tx.send(event).await.is_err() {
                        return PumpEnd::ConsumerGone;
                    }
                    None
                }
                Frame::Pong | Frame::Ignored => None,
            };

            if let Some(reply) = reply {
                if let Err(e) = write.send(Message::Text(reply.to_string())).await {
                    return PumpEnd::Lost(e.to_string());
                }
            }
        }
        PumpEnd::Lost("stream ended".to_string())
    }
}

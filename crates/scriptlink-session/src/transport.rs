use futures_util::{SinkExt, StreamExt};
use scriptlink_core::DriverError;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

pub const DEFAULT_LINK_CAPACITY: usize = 256;

#[derive(Debug)]
pub struct TransportLink {
    pub peer: String,
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<String>,
}

#[derive(Debug)]
pub struct RemoteEnd {
    pub commands: mpsc::Receiver<String>,
    pub replies: mpsc::Sender<String>,
}

pub fn memory_link(capacity: usize) -> (TransportLink, RemoteEnd) {
    let capacity = capacity.max(1);
    let (out_tx, out_rx) = mpsc::channel(capacity);
    let (in_tx, in_rx) = mpsc::channel(capacity);
    (
        TransportLink {
            peer: "memory".to_string(),
            outbound: out_tx,
            inbound: in_rx,
        },
        RemoteEnd {
            commands: out_rx,
            replies: in_tx,
        },
    )
}

#[derive(Debug, Clone)]
pub struct WsConnector {
    url: Url,
    capacity: usize,
}

impl WsConnector {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            capacity: DEFAULT_LINK_CAPACITY,
        }
    }

    pub fn parse(raw: &str) -> Result<Self, DriverError> {
        let url = Url::parse(raw.trim())
            .map_err(|err| DriverError::Transport(format!("invalid url {raw}: {err}")))?;
        match url.scheme() {
            "ws" | "wss" => Ok(Self::new(url)),
            other => Err(DriverError::Transport(format!(
                "unsupported scheme {other}, expected ws or wss"
            ))),
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn connect(&self) -> Result<TransportLink, DriverError> {
        let (ws, _) = connect_async(self.url.as_str())
            .await
            .map_err(|err| DriverError::Transport(err.to_string()))?;
        info!(event = "transport_connected", peer = %self.url);
        Ok(spawn_ws_pump(ws, self.url.to_string(), self.capacity))
    }
}

pub fn spawn_ws_pump<S>(ws: WebSocketStream<S>, peer: String, capacity: usize) -> TransportLink
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let capacity = capacity.max(1);
    let (out_tx, out_rx) = mpsc::channel(capacity);
    let (in_tx, in_rx) = mpsc::channel(capacity);
    tokio::spawn(ws_pump(ws, peer.clone(), out_rx, in_tx));
    TransportLink {
        peer,
        outbound: out_tx,
        inbound: in_rx,
    }
}

async fn ws_pump<S>(
    mut ws: WebSocketStream<S>,
    peer: String,
    mut outbound: mpsc::Receiver<String>,
    inbound: mpsc::Sender<String>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            incoming = ws.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => text,
                        Err(_) => {
                            warn!(event = "transport_binary_dropped", peer = %peer);
                            continue;
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => {
                        warn!(event = "transport_read_error", peer = %peer, error = %err);
                        break;
                    }
                };
                if inbound.send(text).await.is_err() {
                    break;
                }
            }
            out = outbound.recv() => {
                let Some(text) = out else {
                    break;
                };
                if let Err(err) = ws.send(Message::Text(text)).await {
                    warn!(event = "transport_write_error", peer = %peer, error = %err);
                    break;
                }
            }
        }
    }
    let _ = ws.close(None).await;
    debug!(event = "transport_pump_stopped", peer = %peer);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rejects_http_scheme() {
        assert!(WsConnector::parse("ws://127.0.0.1:9222/devtools/page/1").is_ok());
        let err = WsConnector::parse("http://127.0.0.1:9222").expect_err("scheme");
        assert_eq!(err.kind(), "transport");
    }

    #[tokio::test]
    async fn memory_link_carries_both_directions() {
        let (mut link, mut remote) = memory_link(4);
        link.outbound.send("ping".to_string()).await.expect("send");
        assert_eq!(remote.commands.recv().await.as_deref(), Some("ping"));
        remote.replies.send("pong".to_string()).await.expect("reply");
        assert_eq!(link.inbound.recv().await.as_deref(), Some("pong"));
        drop(remote);
        assert!(link.inbound.recv().await.is_none());
    }
}

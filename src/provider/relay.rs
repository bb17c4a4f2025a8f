//! Bridge relay transport.
//!
//! # Responsibilities
//! - Define the relay frame format (`{topic, type, payload, silent}`)
//! - Open a WebSocket to the bridge and pump frames in both directions
//! - Signal transport loss by closing the inbound channel
//!
//! # Data Flow
//! ```text
//! RemoteSessionAdapter ── outbound mpsc ──▶ writer task ──▶ WebSocket ──▶ bridge
//! RemoteSessionAdapter ◀── inbound mpsc ─── reader task ◀── WebSocket ◀── bridge
//! ```

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use crate::provider::types::{WalletError, WalletResult};

/// Relay frame type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameKind {
    Pub,
    Sub,
    Ack,
}

/// A message exchanged with the bridge relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayFrame {
    pub topic: String,
    #[serde(rename = "type")]
    pub kind: FrameKind,
    #[serde(default)]
    pub payload: String,
    #[serde(default)]
    pub silent: bool,
}

impl RelayFrame {
    /// Subscribe to messages published on `topic`.
    pub fn subscribe(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            kind: FrameKind::Sub,
            payload: String::new(),
            silent: true,
        }
    }

    /// Publish `payload` to `topic`.
    pub fn publish(topic: impl Into<String>, payload: impl Into<String>, silent: bool) -> Self {
        Self {
            topic: topic.into(),
            kind: FrameKind::Pub,
            payload: payload.into(),
            silent,
        }
    }
}

/// Both directions of an open relay link.
///
/// The inbound side closes when the transport drops.
#[derive(Debug)]
pub struct RelayChannel {
    pub outbound: mpsc::UnboundedSender<RelayFrame>,
    pub inbound: mpsc::UnboundedReceiver<RelayFrame>,
}

/// Opens links to a bridge relay.
#[async_trait]
pub trait RelayConnector: Send + Sync {
    /// Bridge URL advertised in pairing URIs.
    fn bridge_url(&self) -> &str;

    async fn open(&self) -> WalletResult<RelayChannel>;
}

/// WebSocket relay connector.
#[derive(Debug, Clone)]
pub struct WsRelayConnector {
    bridge: String,
    endpoint: Url,
}

impl WsRelayConnector {
    pub fn new(bridge_url: &str) -> WalletResult<Self> {
        let bridge: Url = bridge_url
            .parse()
            .map_err(|e| WalletError::Transport(format!("Invalid bridge URL '{}': {}", bridge_url, e)))?;
        let endpoint = ws_endpoint(&bridge)?;
        Ok(Self {
            bridge: bridge_url.to_string(),
            endpoint,
        })
    }
}

/// Bridges are advertised as http(s); the socket lives at the ws(s) equivalent.
fn ws_endpoint(bridge: &Url) -> WalletResult<Url> {
    let scheme = match bridge.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => return Err(WalletError::Transport(format!("unsupported bridge scheme '{other}'"))),
    };
    let mut endpoint = bridge.clone();
    endpoint
        .set_scheme(scheme)
        .map_err(|_| WalletError::Transport(format!("cannot derive socket URL from {bridge}")))?;
    Ok(endpoint)
}

#[async_trait]
impl RelayConnector for WsRelayConnector {
    fn bridge_url(&self) -> &str {
        &self.bridge
    }

    async fn open(&self) -> WalletResult<RelayChannel> {
        let (socket, _) = connect_async(self.endpoint.as_str())
            .await
            .map_err(|e| WalletError::Transport(format!("bridge {} unreachable: {}", self.endpoint, e)))?;
        let (mut sink, mut stream) = socket.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<RelayFrame>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<RelayFrame>();

        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to encode relay frame");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    tracing::warn!(error = %e, "Relay write failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let endpoint = self.endpoint.clone();
        tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                match message {
                    Ok(Message::Text(text)) => match serde_json::from_str::<RelayFrame>(text.as_str()) {
                        Ok(frame) => {
                            if in_tx.send(frame).is_err() {
                                break;
                            }
                        }
                        Err(e) => tracing::warn!(error = %e, "Ignoring malformed relay frame"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "Relay read failed");
                        break;
                    }
                }
            }
            tracing::debug!(endpoint = %endpoint, "Relay link closed");
        });

        tracing::info!(endpoint = %self.endpoint, "Relay link opened");
        Ok(RelayChannel {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_wire_shape() {
        let frame = RelayFrame::publish("topic-1", "{}", false);
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "pub");
        assert_eq!(json["topic"], "topic-1");
        assert_eq!(json["silent"], false);

        let parsed: RelayFrame = serde_json::from_str(r#"{"topic":"t","type":"ack"}"#).unwrap();
        assert_eq!(parsed.kind, FrameKind::Ack);
        assert!(parsed.payload.is_empty());
    }

    #[test]
    fn test_ws_endpoint_from_bridge() {
        let connector = WsRelayConnector::new("https://bridge.example.org").unwrap();
        assert_eq!(connector.endpoint.scheme(), "wss");
        assert_eq!(connector.bridge_url(), "https://bridge.example.org");

        let local = WsRelayConnector::new("http://127.0.0.1:5001").unwrap();
        assert_eq!(local.endpoint.scheme(), "ws");

        assert!(WsRelayConnector::new("ftp://bridge").is_err());
    }

    #[tokio::test]
    async fn test_unreachable_bridge() {
        let connector = WsRelayConnector::new("http://127.0.0.1:9").unwrap();
        let err = connector.open().await.unwrap_err();
        assert_eq!(err.kind(), crate::provider::ErrorKind::TransportError);
    }
}

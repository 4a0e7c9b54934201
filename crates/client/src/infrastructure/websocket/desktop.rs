//! Desktop WebSocket connector using tokio-tungstenite

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::ports::outbound::{LinkEvent, TransportConnector, TransportError, TransportLink};

/// Opens rosbridge connections over tokio-tungstenite.
///
/// Each link runs one reader task and one writer task. The writer exits (and
/// closes the socket) once the outbound sender is dropped by the bus.
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TransportConnector for WsConnector {
    async fn connect(&self, url: &str) -> Result<TransportLink, TransportError> {
        let (ws_stream, _) = connect_async(url).await.map_err(|e| {
            tracing::error!("Failed to connect to rosbridge: {}", e);
            TransportError::Connect(e.to_string())
        })?;
        tracing::info!("Connected to rosbridge at {}", url);

        let (mut write, mut read) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<LinkEvent>();

        let events = inbound_tx.clone();
        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        if events.send(LinkEvent::Frame(text)).is_err() {
                            // Bus dropped the link
                            return;
                        }
                    }
                    Ok(Message::Close(_)) => {
                        tracing::info!("rosbridge closed connection");
                        let _ = events.send(LinkEvent::Closed);
                        return;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!("WebSocket error: {}", e);
                        let _ = events.send(LinkEvent::Failed(TransportError::Socket(e.to_string())));
                        return;
                    }
                }
            }
            let _ = events.send(LinkEvent::Closed);
        });

        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                if let Err(e) = write.send(Message::Text(frame)).await {
                    tracing::error!("Failed to send frame: {}", e);
                    let _ = inbound_tx.send(LinkEvent::Failed(TransportError::Socket(e.to_string())));
                    return;
                }
            }
            if let Err(e) = write.close().await {
                tracing::debug!("Error while closing socket: {}", e);
            }
        });

        Ok(TransportLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

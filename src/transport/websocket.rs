use super::{Connector, Transport, TransportEvent, TransportSink, CLOSE_ABNORMAL, CLOSE_NO_STATUS};
use crate::error::TransportClosed;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

/// Commands consumed by the write task
enum WriteCommand {
    Text(String),
    Close(u16),
}

/// WebSocket connector backed by `tokio-tungstenite`.
///
/// Each open transport runs two tasks: a write loop draining an unbounded
/// channel, and a read loop turning socket messages into [`TransportEvent`]s.
/// Ping/pong is answered by tungstenite itself.
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

struct WsSink {
    commands: mpsc::UnboundedSender<WriteCommand>,
}

impl TransportSink for WsSink {
    fn send_text(&self, text: String) -> Result<(), TransportClosed> {
        self.commands
            .send(WriteCommand::Text(text))
            .map_err(|_| TransportClosed)
    }

    fn close(&self, code: u16) {
        let _ = self.commands.send(WriteCommand::Close(code));
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Transport> {
        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .with_context(|| format!("WebSocket handshake with {} failed", url))?;

        debug!(url = %url, "WebSocket open");

        let (mut write, mut read) = stream.split();
        let (command_tx, mut command_rx) = mpsc::unbounded_channel::<WriteCommand>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<TransportEvent>();

        tokio::spawn(async move {
            while let Some(command) = command_rx.recv().await {
                match command {
                    WriteCommand::Text(text) => {
                        if let Err(e) = write.send(Message::Text(text.into())).await {
                            warn!(error = %e, "WebSocket write failed, closing write loop");
                            break;
                        }
                    }
                    WriteCommand::Close(code) => {
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: String::new().into(),
                        };
                        if let Err(e) = write.send(Message::Close(Some(frame))).await {
                            debug!(error = %e, "WebSocket close frame not sent");
                        }
                        break;
                    }
                }
            }
        });

        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        if event_tx.send(TransportEvent::Message(text.to_string())).is_err() {
                            return;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        let code = frame
                            .map(|f| u16::from(f.code))
                            .unwrap_or(CLOSE_NO_STATUS);
                        let _ = event_tx.send(TransportEvent::Closed(code));
                        return;
                    }
                    Ok(_) => {
                        // Binary, ping and pong frames carry nothing for subscribers
                    }
                    Err(e) => {
                        let _ = event_tx.send(TransportEvent::Error(e.to_string()));
                        return;
                    }
                }
            }
            let _ = event_tx.send(TransportEvent::Closed(CLOSE_ABNORMAL));
        });

        Ok(Transport::new(
            Arc::new(WsSink {
                commands: command_tx,
            }),
            event_rx,
        ))
    }
}

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use dashsync_core::{Frame, SyncError, Transport, TransportEvent, TransportLink};

const LINK_BUFFER: usize = 256;

/// Newline-delimited JSON over TCP, one connection per channel.
///
/// The first line written on every connection is the subscribe frame
/// `{"type":"subscribe","payload":{"channel":<name>}}`.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    address: String,
    connect_timeout: Duration,
}

impl TcpTransport {
    pub fn new(address: impl Into<String>, connect_timeout: Duration) -> Self {
        TcpTransport {
            address: address.into(),
            connect_timeout,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

fn subscribe_line(channel: &str) -> Result<String, SyncError> {
    let mut line = Frame::new("subscribe", json!({ "channel": channel })).to_json()?;
    line.push('\n');
    Ok(line)
}

/// One received line without its terminator. Blank lines yield `None`.
/// Invalid UTF-8 is replaced rather than rejected, so the frame parser
/// sees it and counts it as malformed instead of the link failing.
fn decode_line(raw: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    let line = text.trim_end_matches(['\n', '\r']);
    if line.trim().is_empty() {
        None
    } else {
        Some(line.to_string())
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self, channel: &str) -> Result<TransportLink, SyncError> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| SyncError::Timeout {
                operation: format!("connect {}", self.address),
                millis: self.connect_timeout.as_millis() as u64,
            })?
            .map_err(|e| SyncError::transport(channel, e))?;
        stream.set_nodelay(true)?;

        let (read_half, mut write_half) = stream.into_split();
        write_half
            .write_all(subscribe_line(channel)?.as_bytes())
            .await
            .map_err(|e| SyncError::transport(channel, e))?;
        debug!(channel = %channel, address = %self.address, "tcp link established");

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(LINK_BUFFER);
        let (events_tx, events_rx) = mpsc::channel(LINK_BUFFER);

        // Writer: ends when the client drops its sender.
        let writer_events = events_tx.clone();
        tokio::spawn(async move {
            while let Some(mut text) = outbound_rx.recv().await {
                text.push('\n');
                if let Err(e) = write_half.write_all(text.as_bytes()).await {
                    let _ = writer_events.send(TransportEvent::Error(e.to_string())).await;
                    return;
                }
            }
            let _ = write_half.shutdown().await;
        });

        // Reader: ends on EOF, on error, or when the client drops its receiver.
        let name = channel.to_string();
        tokio::spawn(async move {
            let mut reader = BufReader::new(read_half);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                let read = tokio::select! {
                    read = reader.read_until(b'\n', &mut buf) => read,
                    _ = events_tx.closed() => return,
                };
                let event = match read {
                    Ok(0) => {
                        let _ = events_tx.send(TransportEvent::Closed { reason: None }).await;
                        return;
                    }
                    Ok(_) => match decode_line(&buf) {
                        Some(line) => {
                            trace!(channel = %name, bytes = line.len(), "tcp line");
                            TransportEvent::Message(line)
                        }
                        None => continue,
                    },
                    Err(e) => {
                        let _ = events_tx.send(TransportEvent::Error(e.to_string())).await;
                        return;
                    }
                };
                if events_tx.send(event).await.is_err() {
                    return;
                }
            }
        });

        Ok(TransportLink::new(outbound_tx, events_rx))
    }

    fn name(&self) -> &str {
        "tcp"
    }
}

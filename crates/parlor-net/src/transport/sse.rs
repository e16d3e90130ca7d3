use async_trait::async_trait;
use futures::StreamExt;
use parlor_shared::types::TransportKind;
use reqwest::{header, Client};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use url::Url;

use super::{post_frames, recv_pumped, Transport, INBOUND_CAPACITY};
use crate::error::{NetError, Result};

/// Server-push fallback: inbound frames arrive as `text/event-stream` events,
/// outbound frames are POSTed.
pub struct SseTransport {
    http: Client,
    endpoint: Url,
    token: Option<String>,
    inbound: mpsc::Receiver<Result<String>>,
    reader: JoinHandle<()>,
}

impl SseTransport {
    pub async fn connect(http: Client, endpoint: Url, token: Option<&str>) -> Result<Self> {
        let mut req = http
            .get(endpoint.clone())
            .header(header::ACCEPT, "text/event-stream");
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        let res = req.send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(NetError::UnexpectedStatus { status, body });
        }

        let (tx, inbound) = mpsc::channel(INBOUND_CAPACITY);
        let mut stream = res.bytes_stream();
        let reader = tokio::spawn(async move {
            let mut parser = EventParser::default();
            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx.send(Err(NetError::from(e))).await;
                        return;
                    }
                };
                for data in parser.feed(&chunk) {
                    if tx.send(Ok(data)).await.is_err() {
                        return;
                    }
                }
            }
            debug!("Event stream ended");
        });

        Ok(Self {
            http,
            endpoint,
            token: token.map(str::to_string),
            inbound,
            reader,
        })
    }
}

#[async_trait]
impl Transport for SseTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::ServerSentEvents
    }

    async fn send(&mut self, payload: String) -> Result<()> {
        post_frames(&self.http, &self.endpoint, self.token.as_deref(), payload).await
    }

    async fn recv(&mut self) -> Result<Option<String>> {
        recv_pumped(&mut self.inbound).await
    }

    async fn close(&mut self) {
        self.reader.abort();
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Incremental `text/event-stream` parser yielding the `data` of each event.
#[derive(Default)]
struct EventParser {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl EventParser {
    fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.data.is_empty() {
                    events.push(self.data.join("\n"));
                    self.data.clear();
                }
            } else if let Some(value) = line.strip_prefix("data:") {
                self.data.push(value.strip_prefix(' ').unwrap_or(value).to_string());
            }
            // comments (":") and other fields carry nothing for the hub protocol
        }
        events
    }
}

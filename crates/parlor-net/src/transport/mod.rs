//! Real-time transports.
//!
//! A [`Transport`] carries record-separated hub frames in both directions.
//! Every implementation pumps inbound payloads from a background task into a
//! channel, so [`Transport::recv`] is cancel-safe and can sit in a
//! `tokio::select!` next to commands and timers.

mod long_polling;
mod sse;
mod websocket;

use async_trait::async_trait;
use parlor_shared::types::TransportKind;
use reqwest::Client;
use tokio::sync::mpsc;
use tracing::debug;
use url::Url;

use crate::error::{NetError, Result};
use crate::negotiate::{self, Negotiation};

pub use long_polling::LongPollingTransport;
pub use sse::SseTransport;
pub use websocket::WebSocketTransport;

/// Capacity of the inbound payload channel of every transport.
pub(crate) const INBOUND_CAPACITY: usize = 64;

/// One open, bidirectional channel to the hub.
#[async_trait]
pub trait Transport: Send {
    fn kind(&self) -> TransportKind;

    /// Send one or more encoded frames.
    async fn send(&mut self, payload: String) -> Result<()>;

    /// Next inbound payload. `Ok(None)` means the hub closed the channel.
    /// Must be cancel-safe.
    async fn recv(&mut self) -> Result<Option<String>>;

    /// Close the channel. Never fails; errors are only logged.
    async fn close(&mut self);
}

/// Opens transports. The connection manager depends on this seam only, so
/// tests can substitute an in-memory hub.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    async fn negotiate(&self, hub_url: &Url, token: Option<&str>) -> Result<Negotiation>;

    async fn open(
        &self,
        kind: TransportKind,
        negotiation: &Negotiation,
        token: Option<&str>,
    ) -> Result<Box<dyn Transport>>;
}

/// Connector for real hubs over HTTP(S) and WebSockets.
#[derive(Clone)]
pub struct HttpConnector {
    http: Client,
}

impl HttpConnector {
    pub fn new(http: Client) -> Self {
        Self { http }
    }
}

impl Default for HttpConnector {
    fn default() -> Self {
        Self::new(Client::new())
    }
}

#[async_trait]
impl TransportConnector for HttpConnector {
    async fn negotiate(&self, hub_url: &Url, token: Option<&str>) -> Result<Negotiation> {
        negotiate::negotiate(&self.http, hub_url, token).await
    }

    async fn open(
        &self,
        kind: TransportKind,
        negotiation: &Negotiation,
        token: Option<&str>,
    ) -> Result<Box<dyn Transport>> {
        let endpoint = negotiation.endpoint();
        let token = negotiation.access_token.as_deref().or(token);
        debug!(transport = %kind, endpoint = %negotiation.hub_url, "Opening transport");

        Ok(match kind {
            TransportKind::WebSockets => Box::new(WebSocketTransport::connect(&endpoint, token).await?),
            TransportKind::ServerSentEvents => {
                Box::new(SseTransport::connect(self.http.clone(), endpoint, token).await?)
            }
            TransportKind::LongPolling => {
                Box::new(LongPollingTransport::connect(self.http.clone(), endpoint, token).await?)
            }
        })
    }
}

/// Receive from a pump channel; a closed channel means the hub went away.
pub(crate) async fn recv_pumped(
    inbound: &mut mpsc::Receiver<Result<String>>,
) -> Result<Option<String>> {
    match inbound.recv().await {
        Some(Ok(payload)) => Ok(Some(payload)),
        Some(Err(e)) => Err(e),
        None => Ok(None),
    }
}

/// `POST` frames to the hub, as the HTTP-based transports send.
pub(crate) async fn post_frames(
    http: &Client,
    endpoint: &Url,
    token: Option<&str>,
    payload: String,
) -> Result<()> {
    let mut req = http
        .post(endpoint.clone())
        .header(reqwest::header::CONTENT_TYPE, "text/plain;charset=UTF-8")
        .body(payload);
    if let Some(token) = token {
        req = req.bearer_auth(token);
    }
    let res = req.send().await?;
    if res.status().is_success() {
        Ok(())
    } else {
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        Err(NetError::UnexpectedStatus { status, body })
    }
}

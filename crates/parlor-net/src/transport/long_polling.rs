use std::time::Duration;

use async_trait::async_trait;
use parlor_shared::types::TransportKind;
use reqwest::{Client, StatusCode};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

use super::{post_frames, recv_pumped, Transport, INBOUND_CAPACITY};
use crate::error::{NetError, Result};

/// Hubs hold a poll for up to 100s; give the request some slack on top.
const POLL_TIMEOUT: Duration = Duration::from_secs(120);

/// Request-polling fallback: inbound frames are fetched by repeated GETs,
/// outbound frames are POSTed.
pub struct LongPollingTransport {
    http: Client,
    endpoint: Url,
    token: Option<String>,
    inbound: mpsc::Receiver<Result<String>>,
    poller: JoinHandle<()>,
}

impl LongPollingTransport {
    pub async fn connect(http: Client, endpoint: Url, token: Option<&str>) -> Result<Self> {
        // The first poll returns immediately and confirms the connection.
        match poll(&http, &endpoint, token).await? {
            Poll::Closed => return Err(NetError::Closed),
            Poll::Payload(_) | Poll::Empty => {}
        }

        let (tx, inbound) = mpsc::channel(INBOUND_CAPACITY);
        let poller = {
            let http = http.clone();
            let endpoint = endpoint.clone();
            let token = token.map(str::to_string);
            tokio::spawn(async move {
                loop {
                    match poll(&http, &endpoint, token.as_deref()).await {
                        Ok(Poll::Payload(body)) => {
                            if tx.send(Ok(body)).await.is_err() {
                                return;
                            }
                        }
                        Ok(Poll::Empty) => continue,
                        Ok(Poll::Closed) => {
                            debug!("Long polling closed by hub");
                            return;
                        }
                        Err(e) => {
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                    }
                }
            })
        };

        Ok(Self {
            http,
            endpoint,
            token: token.map(str::to_string),
            inbound,
            poller,
        })
    }
}

enum Poll {
    Payload(String),
    Empty,
    Closed,
}

async fn poll(http: &Client, endpoint: &Url, token: Option<&str>) -> Result<Poll> {
    let mut url = endpoint.clone();
    url.query_pairs_mut()
        .append_pair("_", &chrono::Utc::now().timestamp_millis().to_string());
    let mut req = http.get(url).timeout(POLL_TIMEOUT);
    if let Some(token) = token {
        req = req.bearer_auth(token);
    }
    let res = req.send().await?;
    match res.status() {
        StatusCode::NO_CONTENT => Ok(Poll::Closed),
        status if status.is_success() => {
            let body = res.text().await?;
            if body.is_empty() {
                Ok(Poll::Empty)
            } else {
                Ok(Poll::Payload(body))
            }
        }
        status => {
            let body = res.text().await.unwrap_or_default();
            Err(NetError::UnexpectedStatus { status, body })
        }
    }
}

#[async_trait]
impl Transport for LongPollingTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::LongPolling
    }

    async fn send(&mut self, payload: String) -> Result<()> {
        post_frames(&self.http, &self.endpoint, self.token.as_deref(), payload).await
    }

    async fn recv(&mut self) -> Result<Option<String>> {
        recv_pumped(&mut self.inbound).await
    }

    async fn close(&mut self) {
        self.poller.abort();
        let mut req = self.http.delete(self.endpoint.clone());
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        if let Err(e) = req.send().await {
            warn!(error = %e, "Failed to end long polling session");
        }
    }
}

impl Drop for LongPollingTransport {
    fn drop(&mut self) {
        self.poller.abort();
    }
}

//! In-process hub.
//!
//! [`MemoryConnector`] hands out [`MemoryTransport`]s whose other ends
//! ([`MemoryLink`]s) are delivered to a [`MemoryHub`]. It lets the connection
//! manager and the chat session run without a network.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use parlor_shared::constants::RECORD_SEPARATOR;
use parlor_shared::protocol::{ChatMessage, HubFrame};
use parlor_shared::types::TransportKind;
use serde_json::json;
use tokio::sync::mpsc;
use url::Url;

use crate::error::{NetError, Result};
use crate::negotiate::Negotiation;
use crate::transport::{Transport, TransportConnector};

/// Client end of an in-memory channel.
pub struct MemoryTransport {
    kind: TransportKind,
    outbound: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<String>,
    sent: Arc<AtomicUsize>,
}

#[async_trait]
impl Transport for MemoryTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn send(&mut self, payload: String) -> Result<()> {
        self.sent.fetch_add(1, Ordering::SeqCst);
        self.outbound.send(payload).map_err(|_| NetError::Closed)
    }

    async fn recv(&mut self) -> Result<Option<String>> {
        Ok(self.inbound.recv().await)
    }

    async fn close(&mut self) {
        self.inbound.close();
    }
}

/// Hub end of an in-memory channel.
pub struct MemoryLink {
    pub kind: TransportKind,
    to_client: mpsc::UnboundedSender<String>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl MemoryLink {
    /// Push a raw payload to the client.
    pub fn push(&self, payload: impl Into<String>) -> bool {
        self.to_client.send(payload.into()).is_ok()
    }

    /// Invoke a client method with a single message argument.
    pub fn invoke(&self, target: &str, message: &ChatMessage) -> bool {
        let mut frame = json!({ "type": 1, "target": target, "arguments": [message] }).to_string();
        frame.push(RECORD_SEPARATOR);
        self.push(frame)
    }

    /// Next invocation frame sent by the client, skipping the handshake and pings.
    pub async fn next_invocation(&mut self) -> Option<HubFrame> {
        while let Some(payload) = self.from_client.recv().await {
            for raw in parlor_shared::protocol::split_frames(&payload) {
                if let Ok(frame @ HubFrame::Invocation { .. }) = HubFrame::parse(raw) {
                    return Some(frame);
                }
            }
        }
        None
    }

    /// Whether the client dropped its end.
    pub fn is_closed(&self) -> bool {
        self.to_client.is_closed()
    }
}

/// Receives the hub end of every transport the connector opens.
pub struct MemoryHub {
    links: mpsc::UnboundedReceiver<MemoryLink>,
}

impl MemoryHub {
    pub async fn accept(&mut self) -> Option<MemoryLink> {
        self.links.recv().await
    }
}

pub struct MemoryConnector {
    available: Vec<TransportKind>,
    refused: Mutex<HashSet<TransportKind>>,
    failures_left: AtomicUsize,
    tokens_seen: Mutex<Vec<Option<String>>>,
    opened: Mutex<Vec<TransportKind>>,
    sent: Arc<AtomicUsize>,
    links: mpsc::UnboundedSender<MemoryLink>,
}

impl MemoryConnector {
    /// Connector advertising every transport and answering handshakes itself.
    pub fn pair() -> (Arc<Self>, MemoryHub) {
        Self::with_transports(TransportKind::PREFERENCE.to_vec())
    }

    pub fn with_transports(available: Vec<TransportKind>) -> (Arc<Self>, MemoryHub) {
        let (links, rx) = mpsc::unbounded_channel();
        let connector = Self {
            available,
            refused: Mutex::new(HashSet::new()),
            failures_left: AtomicUsize::new(0),
            tokens_seen: Mutex::new(Vec::new()),
            opened: Mutex::new(Vec::new()),
            sent: Arc::new(AtomicUsize::new(0)),
            links,
        };
        (Arc::new(connector), MemoryHub { links: rx })
    }

    /// Fail the next `n` negotiations.
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Refuse to open `kind` even though it is advertised.
    pub fn refuse(&self, kind: TransportKind) {
        if let Ok(mut refused) = self.refused.lock() {
            refused.insert(kind);
        }
    }

    /// Tokens presented to each negotiation, in order.
    pub fn tokens_seen(&self) -> Vec<Option<String>> {
        self.tokens_seen.lock().map(|t| t.clone()).unwrap_or_default()
    }

    /// Transports successfully opened, in order.
    pub fn opened(&self) -> Vec<TransportKind> {
        self.opened.lock().map(|o| o.clone()).unwrap_or_default()
    }

    /// Payloads written by every transport this connector opened.
    pub fn payloads_sent(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportConnector for MemoryConnector {
    async fn negotiate(&self, hub_url: &Url, token: Option<&str>) -> Result<Negotiation> {
        if let Ok(mut seen) = self.tokens_seen.lock() {
            seen.push(token.map(str::to_string));
        }
        let fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(NetError::Closed);
        }
        Ok(Negotiation::direct(hub_url.clone(), self.available.clone()))
    }

    async fn open(
        &self,
        kind: TransportKind,
        _negotiation: &Negotiation,
        _token: Option<&str>,
    ) -> Result<Box<dyn Transport>> {
        let refused = self
            .refused
            .lock()
            .map(|r| r.contains(&kind))
            .unwrap_or(false);
        if refused {
            return Err(NetError::Closed);
        }

        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();
        // The hub end accepts every handshake.
        let mut ack = "{}".to_string();
        ack.push(RECORD_SEPARATOR);
        let _ = to_client.send(ack);
        let link = MemoryLink {
            kind,
            to_client,
            from_client,
        };
        self.links.send(link).map_err(|_| NetError::Closed)?;
        if let Ok(mut opened) = self.opened.lock() {
            opened.push(kind);
        }

        Ok(Box::new(MemoryTransport {
            kind,
            outbound,
            inbound,
            sent: self.sent.clone(),
        }))
    }
}

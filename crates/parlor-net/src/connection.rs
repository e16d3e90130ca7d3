//! Connection manager for the chat hub.
//!
//! The connection runs in a dedicated tokio task that owns the transport.
//! Callers talk to it through a typed command channel and receive state
//! transitions and hub events on a notification channel. The current
//! [`ConnectionState`] is also published on a `watch` cell, updated before the
//! matching notification is queued, so a read never lags a transition.

use std::sync::Arc;
use std::time::Duration;

use parlor_shared::constants::{
    DEFAULT_RETRY_DELAYS_MS, HANDSHAKE_TIMEOUT_SECS, KEEP_ALIVE_INTERVAL_SECS, RECORD_SEPARATOR,
    SERVER_TIMEOUT_SECS,
};
use parlor_shared::protocol::{
    handshake_request, parse_handshake_response, ping_frame, split_frames, HubEvent, HubFrame,
    HubInvocation,
};
use parlor_shared::types::{ConnectionState, TransportKind};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};
use url::Url;
use uuid::Uuid;

use crate::error::{NetError, Result};
use crate::token::TokenProvider;
use crate::transport::{Transport, TransportConnector};

const COMMAND_CAPACITY: usize = 64;
const NOTIFICATION_CAPACITY: usize = 256;
/// How long `stop` waits for the task before aborting it.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub hub_url: Url,
    /// Transports to try, most preferred first.
    pub transports: Vec<TransportKind>,
    /// Delay before each reconnection attempt; the connection closes for
    /// good once the list is exhausted.
    pub retry_delays: Vec<Duration>,
    pub keep_alive_interval: Duration,
    pub server_timeout: Duration,
    pub handshake_timeout: Duration,
}

impl ConnectionConfig {
    pub fn new(hub_url: Url) -> Self {
        Self {
            hub_url,
            transports: TransportKind::PREFERENCE.to_vec(),
            retry_delays: DEFAULT_RETRY_DELAYS_MS
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
            keep_alive_interval: Duration::from_secs(KEEP_ALIVE_INTERVAL_SECS),
            server_timeout: Duration::from_secs(SERVER_TIMEOUT_SECS),
            handshake_timeout: Duration::from_secs(HANDSHAKE_TIMEOUT_SECS),
        }
    }
}

// ---------------------------------------------------------------------------
// Command / notification types
// ---------------------------------------------------------------------------

/// Commands sent *into* the connection task.
#[derive(Debug)]
enum ConnectionCommand {
    Invoke {
        invocation: HubInvocation,
        ack: oneshot::Sender<Result<()>>,
    },
    Shutdown,
}

/// Notifications sent *from* the connection task.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionNotification {
    StateChanged(ConnectionState),
    Event(HubEvent),
    /// A transport failure worth telling the user about.
    TransportError(String),
}

/// Cloneable access to a running connection, handed to every part of the
/// session that needs to read the state or invoke the hub.
#[derive(Clone)]
pub struct ConnectionHandle {
    cmd_tx: mpsc::Sender<ConnectionCommand>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl ConnectionHandle {
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Invoke a hub method. Fails fast with [`NetError::NotConnected`] unless
    /// the connection is up; nothing is queued for later.
    pub async fn invoke(&self, invocation: HubInvocation) -> Result<()> {
        if !self.state().is_connected() {
            warn!(method = invocation.target(), state = %self.state(), "Refusing hub invocation");
            return Err(NetError::NotConnected);
        }
        let (ack, done) = oneshot::channel();
        self.cmd_tx
            .send(ConnectionCommand::Invoke { invocation, ack })
            .await
            .map_err(|_| NetError::Closed)?;
        done.await.map_err(|_| NetError::Closed)?
    }

    pub async fn send_message(
        &self,
        recipient: impl Into<String>,
        body: impl Into<String>,
        client_message_id: Uuid,
    ) -> Result<()> {
        self.invoke(HubInvocation::SendMessage {
            recipient: recipient.into(),
            body: body.into(),
            client_message_id,
        })
        .await
    }

    pub async fn mark_viewed(&self, ids: Vec<i64>, counterpart: impl Into<String>) -> Result<()> {
        self.invoke(HubInvocation::MarkViewed {
            ids,
            counterpart: counterpart.into(),
        })
        .await
    }
}

/// Owner of the connection task. Dropping it aborts the task, which closes
/// the transport and cancels any pending reconnection.
pub struct ConnectionManager {
    handle: ConnectionHandle,
    task: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    /// Spawn the connection task. It starts connecting right away.
    ///
    /// Returns the manager and the notification receiver.
    pub fn spawn(
        config: ConnectionConfig,
        connector: Arc<dyn TransportConnector>,
        tokens: Arc<dyn TokenProvider>,
    ) -> (Self, mpsc::Receiver<ConnectionNotification>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (notif_tx, notif_rx) = mpsc::channel(NOTIFICATION_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let task = ConnectionTask {
            link: Link {
                config,
                connector,
                tokens,
            },
            cmd_rx,
            notif_tx,
            state_tx,
        };
        let join = tokio::spawn(task.run());

        let manager = Self {
            handle: ConnectionHandle { cmd_tx, state_rx },
            task: Some(join),
        };
        (manager, notif_rx)
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.handle.state()
    }

    /// Close the connection and wait for the task to finish. A task that does
    /// not finish within a few seconds is aborted.
    pub async fn stop(mut self) {
        let Some(mut task) = self.task.take() else {
            return;
        };
        let cmd_tx = self.handle.cmd_tx.clone();
        let graceful = async {
            let _ = cmd_tx.send(ConnectionCommand::Shutdown).await;
            (&mut task).await
        };
        let outcome = tokio::time::timeout(STOP_TIMEOUT, graceful).await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Connection task ended abnormally"),
            Err(_) => {
                warn!(timeout_ms = STOP_TIMEOUT.as_millis() as u64, "Connection task did not stop, aborting");
                task.abort();
                let _ = task.await;
            }
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            debug!("Aborting connection task");
            task.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Connection task
// ---------------------------------------------------------------------------

struct Link {
    config: ConnectionConfig,
    connector: Arc<dyn TransportConnector>,
    tokens: Arc<dyn TokenProvider>,
}

struct ConnectionTask {
    link: Link,
    cmd_rx: mpsc::Receiver<ConnectionCommand>,
    notif_tx: mpsc::Sender<ConnectionNotification>,
    state_tx: watch::Sender<ConnectionState>,
}

/// Why a live connection ended.
enum Exit {
    Shutdown,
    /// Transient loss; reconnect.
    Dropped(String),
    /// Hub closed the connection and did not allow reconnecting.
    Closed(Option<String>),
}

impl ConnectionTask {
    async fn run(mut self) {
        self.set_state(ConnectionState::Connecting).await;
        let mut retries = 0usize;

        loop {
            let Some(established) = interruptible(&mut self.cmd_rx, establish(&self.link)).await
            else {
                break;
            };

            match established {
                Ok((transport, leftover)) => {
                    retries = 0;
                    info!(transport = %transport.kind(), hub = %self.link.config.hub_url, "Connected to chat hub");
                    self.set_state(ConnectionState::Connected).await;
                    match self.pump(transport, leftover).await {
                        Exit::Shutdown => break,
                        Exit::Closed(reason) => {
                            info!(reason = ?reason, "Hub closed the connection");
                            if let Some(reason) = reason {
                                self.notify(ConnectionNotification::TransportError(reason)).await;
                            }
                            break;
                        }
                        Exit::Dropped(reason) => {
                            warn!(reason = %reason, "Connection to chat hub lost");
                            self.notify(ConnectionNotification::TransportError(reason)).await;
                        }
                    }
                }
                Err(e) => {
                    warn!(attempt = retries + 1, error = %e, "Failed to connect to chat hub");
                    self.notify(ConnectionNotification::TransportError(e.to_string())).await;
                }
            }

            let Some(delay) = self.link.config.retry_delays.get(retries).copied() else {
                warn!(attempts = retries + 1, "Giving up on the chat hub");
                break;
            };
            retries += 1;
            self.set_state(ConnectionState::Reconnecting).await;
            debug!(delay_ms = delay.as_millis() as u64, attempt = retries, "Scheduling reconnect");
            if interruptible(&mut self.cmd_rx, tokio::time::sleep(delay)).await.is_none() {
                break;
            }
        }

        self.set_state(ConnectionState::Disconnected).await;
        debug!("Connection task finished");
    }

    /// Multiplex commands, inbound frames and keep-alive on a live transport.
    async fn pump(&mut self, mut transport: Box<dyn Transport>, leftover: String) -> Exit {
        if let Some(exit) = self.dispatch(&leftover).await {
            transport.close().await;
            return exit;
        }

        let keep_alive = self.link.config.keep_alive_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + keep_alive, keep_alive);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_seen = Instant::now();

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(ConnectionCommand::Invoke { invocation, ack }) => {
                        debug!(method = invocation.target(), "Invoking hub method");
                        match transport.send(invocation.to_frame()).await {
                            Ok(()) => {
                                let _ = ack.send(Ok(()));
                            }
                            Err(e) => {
                                let reason = e.to_string();
                                let _ = ack.send(Err(e));
                                transport.close().await;
                                return Exit::Dropped(reason);
                            }
                        }
                    }
                    Some(ConnectionCommand::Shutdown) | None => {
                        transport.close().await;
                        return Exit::Shutdown;
                    }
                },
                inbound = transport.recv() => match inbound {
                    Ok(Some(payload)) => {
                        last_seen = Instant::now();
                        if let Some(exit) = self.dispatch(&payload).await {
                            transport.close().await;
                            return exit;
                        }
                    }
                    Ok(None) => return Exit::Dropped("connection closed by hub".into()),
                    Err(e) => return Exit::Dropped(e.to_string()),
                },
                _ = ticker.tick() => {
                    if last_seen.elapsed() >= self.link.config.server_timeout {
                        transport.close().await;
                        return Exit::Dropped("hub stopped responding".into());
                    }
                    if let Err(e) = transport.send(ping_frame()).await {
                        return Exit::Dropped(e.to_string());
                    }
                }
            }
        }
    }

    /// Handle every frame of one payload. Returns an exit when a close frame
    /// ends the connection.
    async fn dispatch(&self, payload: &str) -> Option<Exit> {
        for raw in split_frames(payload) {
            match HubFrame::parse(raw) {
                Ok(HubFrame::Invocation { target, arguments }) => {
                    match HubEvent::from_invocation(&target, arguments) {
                        Ok(Some(event)) => {
                            self.notify(ConnectionNotification::Event(event)).await;
                        }
                        Ok(None) => debug!(method = %target, "Ignoring unknown hub method"),
                        Err(e) => warn!(error = %e, "Dropping malformed invocation"),
                    }
                }
                Ok(HubFrame::Ping) => trace!("Hub ping"),
                Ok(HubFrame::Completion {
                    invocation_id,
                    error,
                }) => match error {
                    Some(error) => warn!(id = ?invocation_id, error = %error, "Hub invocation failed"),
                    None => trace!(id = ?invocation_id, "Hub invocation completed"),
                },
                Ok(HubFrame::Close {
                    error,
                    allow_reconnect,
                }) => {
                    return Some(if allow_reconnect {
                        Exit::Dropped(error.unwrap_or_else(|| "hub requested a reconnect".into()))
                    } else {
                        Exit::Closed(error)
                    });
                }
                Ok(HubFrame::Other(kind)) => trace!(kind, "Ignoring hub frame"),
                Err(e) => warn!(error = %e, "Dropping undecodable hub frame"),
            }
        }
        None
    }

    async fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            info!(from = %previous, to = %state, "Connection state changed");
            self.notify(ConnectionNotification::StateChanged(state)).await;
        }
    }

    async fn notify(&self, notification: ConnectionNotification) {
        if self.notif_tx.send(notification).await.is_err() {
            trace!("No listener for connection notifications");
        }
    }
}

/// Run `fut` while answering commands. Invocations are refused since there is
/// no live transport; `None` means a shutdown was requested.
async fn interruptible<F: std::future::Future>(
    cmd_rx: &mut mpsc::Receiver<ConnectionCommand>,
    fut: F,
) -> Option<F::Output> {
    tokio::pin!(fut);
    loop {
        tokio::select! {
            out = &mut fut => return Some(out),
            cmd = cmd_rx.recv() => match cmd {
                Some(ConnectionCommand::Invoke { ack, .. }) => {
                    let _ = ack.send(Err(NetError::NotConnected));
                }
                Some(ConnectionCommand::Shutdown) | None => return None,
            },
        }
    }
}

/// Negotiate, open the first transport that works, and complete the handshake.
/// The token is read here, on every attempt.
async fn establish(link: &Link) -> Result<(Box<dyn Transport>, String)> {
    let token = link.tokens.access_token();
    let negotiation = link
        .connector
        .negotiate(&link.config.hub_url, token.as_deref())
        .await?;

    let candidates = negotiation.candidates(&link.config.transports);
    if candidates.is_empty() {
        return Err(NetError::NoTransport(link.config.transports.clone()));
    }

    let mut last_error = None;
    for kind in candidates {
        match link.connector.open(kind, &negotiation, token.as_deref()).await {
            Ok(mut transport) => {
                match handshake(transport.as_mut(), link.config.handshake_timeout).await {
                    Ok(leftover) => return Ok((transport, leftover)),
                    Err(e) => {
                        warn!(transport = %kind, error = %e, "Hub handshake failed");
                        transport.close().await;
                        last_error = Some(e);
                    }
                }
            }
            Err(e) => {
                warn!(transport = %kind, error = %e, "Transport unavailable, trying next");
                last_error = Some(e);
            }
        }
    }
    Err(last_error.unwrap_or(NetError::NoTransport(link.config.transports.clone())))
}

async fn handshake(transport: &mut dyn Transport, limit: Duration) -> Result<String> {
    transport.send(handshake_request()).await?;
    tokio::time::timeout(limit, read_handshake(transport))
        .await
        .map_err(|_| NetError::Timeout("hub handshake"))?
}

async fn read_handshake(transport: &mut dyn Transport) -> Result<String> {
    let mut buffer = String::new();
    loop {
        let payload = transport.recv().await?.ok_or(NetError::Closed)?;
        buffer.push_str(&payload);
        if buffer.contains(RECORD_SEPARATOR) {
            return Ok(parse_handshake_response(&buffer)?.to_string());
        }
    }
}

//! The chat session: one task owning all chat state.
//!
//! UI commands, connection notifications and the results of spawned network
//! calls are processed strictly one after another by the session task, so
//! chat state needs no locks. Network calls never run on the session task;
//! they are spawned and post their outcome back.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parlor_net::{
    ChatApi, ConnectionConfig, ConnectionHandle, ConnectionManager, ConnectionNotification,
    CookieTokenProvider, HttpChatApi, HttpConnector, JobStatusApi, NetError, TokenProvider,
    TransportConnector,
};
use parlor_shared::constants::{DEFAULT_JOB_POLL_MS, HISTORY_PAGE_SIZE};
use parlor_shared::protocol::{BlockResponse, ChatCounterpart, HistoryPage, HubEvent};
use parlor_shared::types::{ConnectionState, CounterpartId, JobState};
use reqwest::cookie::Jar;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::SessionError;
use crate::events::{emit_event, SessionEvent, ToastLevel};
use crate::history::FetchTicket;
use crate::jobs::{JobPoller, JobUpdate};
use crate::state::ChatState;
use crate::view_sync::ViewSync;

const COMMAND_CAPACITY: usize = 64;

/// Collaborators of a session, injected so tests can swap any of them.
#[derive(Clone)]
pub struct SessionDeps {
    pub api: Arc<dyn ChatApi>,
    pub jobs: Arc<dyn JobStatusApi>,
    pub connector: Arc<dyn TransportConnector>,
    pub tokens: Arc<dyn TokenProvider>,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Username of the signed-in actor
    pub username: String,
    pub page_size: usize,
    pub connection: ConnectionConfig,
    pub job_poll_interval: Duration,
}

impl SessionOptions {
    pub fn new(username: impl Into<String>, connection: ConnectionConfig) -> Self {
        Self {
            username: username.into(),
            page_size: HISTORY_PAGE_SIZE,
            connection,
            job_poll_interval: Duration::from_millis(DEFAULT_JOB_POLL_MS),
        }
    }
}

#[derive(Debug)]
enum SessionCommand {
    LoadRoster,
    Search(String),
    Open(String),
    LoadOlder,
    Send(String),
    ToggleBlock(String),
    WatchJob(String),
    Shutdown,
}

/// Result of a spawned network call.
#[derive(Debug)]
enum Outcome {
    Roster(Result<Vec<ChatCounterpart>, NetError>),
    History {
        epoch: u64,
        result: Result<HistoryPage, NetError>,
    },
    Block {
        counterpart: CounterpartId,
        result: Result<BlockResponse, NetError>,
    },
    Sent(Result<(), NetError>),
}

/// Handle to a running chat session.
pub struct ChatSession {
    cmd_tx: mpsc::Sender<SessionCommand>,
    state_rx: watch::Receiver<ConnectionState>,
    task: Option<JoinHandle<()>>,
}

impl ChatSession {
    /// Start a session: connect to the hub and load the roster.
    pub fn start(
        options: SessionOptions,
        deps: SessionDeps,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let (job_tx, job_rx) = mpsc::unbounded_channel();

        let (manager, notif_rx) = ConnectionManager::spawn(
            options.connection.clone(),
            deps.connector.clone(),
            deps.tokens.clone(),
        );
        let conn = manager.handle();
        let state_rx = conn.watch_state();

        info!(actor = %options.username, hub = %options.connection.hub_url, "Starting chat session");

        let task = SessionTask {
            state: ChatState::new(options.username.clone(), options.page_size),
            view_sync: ViewSync::new(conn.clone()),
            conn,
            manager: Some(manager),
            api: deps.api,
            jobs_api: deps.jobs,
            job_poll_interval: options.job_poll_interval,
            pollers: Vec::new(),
            events: events_tx,
            outcome_tx,
            job_tx,
        };
        let join = tokio::spawn(task.run(cmd_rx, notif_rx, outcome_rx, job_rx));

        let session = Self {
            cmd_tx,
            state_rx,
            task: Some(join),
        };
        (session, events_rx)
    }

    /// Wire the HTTP stack from configuration and start a session.
    pub fn from_config(
        config: &ClientConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SessionEvent>), SessionError> {
        let api_url = config.api_url()?;
        let connection = config.connection()?;

        let jar = Arc::new(Jar::default());
        if let Some(token) = &config.token {
            let cookie = format!("{}={}; Path=/", config.token_cookie, token);
            jar.add_cookie_str(&cookie, &api_url);
            jar.add_cookie_str(&cookie, &connection.hub_url);
        }
        let http = reqwest::Client::builder()
            .cookie_provider(jar.clone())
            .build()?;

        let tokens: Arc<dyn TokenProvider> = Arc::new(CookieTokenProvider::new(
            jar,
            api_url.clone(),
            config.token_cookie.clone(),
        ));
        let api = Arc::new(HttpChatApi::new(http.clone(), api_url, tokens.clone()));
        let deps = SessionDeps {
            api: api.clone(),
            jobs: api,
            connector: Arc::new(HttpConnector::new(http)),
            tokens,
        };

        let mut options = SessionOptions::new(config.username.clone(), connection);
        options.page_size = config.page_size;
        options.job_poll_interval = config.job_poll_interval;
        Ok(Self::start(options, deps))
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    async fn command(&self, cmd: SessionCommand) -> Result<(), SessionError> {
        self.cmd_tx.send(cmd).await.map_err(|_| SessionError::Stopped)
    }

    pub async fn load_roster(&self) -> Result<(), SessionError> {
        self.command(SessionCommand::LoadRoster).await
    }

    pub async fn search(&self, query: impl Into<String>) -> Result<(), SessionError> {
        self.command(SessionCommand::Search(query.into())).await
    }

    /// Open the conversation with a counterpart, by id or username.
    pub async fn open(&self, counterpart: impl Into<String>) -> Result<(), SessionError> {
        self.command(SessionCommand::Open(counterpart.into())).await
    }

    pub async fn load_older(&self) -> Result<(), SessionError> {
        self.command(SessionCommand::LoadOlder).await
    }

    pub async fn send(&self, body: impl Into<String>) -> Result<(), SessionError> {
        self.command(SessionCommand::Send(body.into())).await
    }

    pub async fn toggle_block(&self, counterpart: impl Into<String>) -> Result<(), SessionError> {
        self.command(SessionCommand::ToggleBlock(counterpart.into())).await
    }

    pub async fn watch_job(&self, job_id: impl Into<String>) -> Result<(), SessionError> {
        self.command(SessionCommand::WatchJob(job_id.into())).await
    }

    /// Stop the session, closing the hub connection.
    pub async fn stop(mut self) {
        let _ = self.cmd_tx.send(SessionCommand::Shutdown).await;
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Session task ended abnormally");
            }
        }
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        // Aborting drops the task's ConnectionManager, which tears the
        // connection down too.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct SessionTask {
    state: ChatState,
    conn: ConnectionHandle,
    manager: Option<ConnectionManager>,
    view_sync: ViewSync,
    api: Arc<dyn ChatApi>,
    jobs_api: Arc<dyn JobStatusApi>,
    job_poll_interval: Duration,
    pollers: Vec<JobPoller>,
    events: mpsc::UnboundedSender<SessionEvent>,
    outcome_tx: mpsc::UnboundedSender<Outcome>,
    job_tx: mpsc::UnboundedSender<JobUpdate>,
}

impl SessionTask {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<SessionCommand>,
        mut notif_rx: mpsc::Receiver<ConnectionNotification>,
        mut outcome_rx: mpsc::UnboundedReceiver<Outcome>,
        mut job_rx: mpsc::UnboundedReceiver<JobUpdate>,
    ) {
        self.fetch_roster();

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(SessionCommand::Shutdown) | None => break,
                    Some(cmd) => self.handle_command(cmd),
                },
                Some(notification) = notif_rx.recv() => self.handle_notification(notification),
                Some(outcome) = outcome_rx.recv() => self.handle_outcome(outcome),
                Some(update) = job_rx.recv() => self.handle_job_update(update),
            }
        }

        // A connection task blocked on a full notification channel must see
        // the receiver gone, or it never reads the shutdown command.
        drop(notif_rx);
        self.shutdown().await;
    }

    async fn shutdown(&mut self) {
        info!("Stopping chat session");
        for poller in self.pollers.drain(..) {
            poller.cancel();
        }
        self.state.close();
        if let Some(manager) = self.manager.take() {
            manager.stop().await;
        }
    }

    fn emit(&self, event: SessionEvent) {
        emit_event(&self.events, event);
    }

    fn toast(&self, level: ToastLevel, message: impl Into<String>) {
        self.emit(SessionEvent::toast(level, message));
    }

    fn emit_roster(&self) {
        self.emit(SessionEvent::RosterChanged(self.state.visible_roster()));
    }

    fn emit_timeline(&self) {
        if let Some(id) = self.state.active_id() {
            self.emit(SessionEvent::TimelineChanged {
                counterpart: id.clone(),
                messages: self.state.timeline().messages().to_vec(),
                has_more: self.state.has_more(),
            });
        }
    }

    fn handle_command(&mut self, cmd: SessionCommand) {
        debug!(?cmd, "Session command");
        match cmd {
            SessionCommand::LoadRoster => self.fetch_roster(),
            SessionCommand::Search(query) => {
                self.state.set_query(query);
                self.emit_roster();
            }
            SessionCommand::Open(key) => match self.state.open(&key) {
                Ok(ticket) => {
                    self.emit_roster();
                    self.emit_timeline();
                    self.fetch_history(ticket);
                }
                Err(e) => self.toast(ToastLevel::Error, e.to_string()),
            },
            SessionCommand::LoadOlder => {
                if let Some(ticket) = self.state.next_page() {
                    self.fetch_history(ticket);
                }
            }
            SessionCommand::Send(body) => self.send(body),
            SessionCommand::ToggleBlock(key) => match self.state.roster().resolve(&key) {
                Some(counterpart) => {
                    let counterpart = counterpart.id.clone();
                    let api = self.api.clone();
                    let outcomes = self.outcome_tx.clone();
                    tokio::spawn(async move {
                        let result = api.toggle_block(&counterpart).await;
                        let _ = outcomes.send(Outcome::Block { counterpart, result });
                    });
                }
                None => self.toast(ToastLevel::Error, SessionError::UnknownCounterpart(key).to_string()),
            },
            SessionCommand::WatchJob(job_id) => {
                self.pollers.retain(|p| !p.is_finished());
                if self.pollers.iter().any(|p| p.job_id() == job_id) {
                    debug!(job = %job_id, "Job already watched");
                    return;
                }
                self.toast(ToastLevel::Info, format!("Watching video {job_id}"));
                let poller = JobPoller::spawn(
                    self.jobs_api.clone(),
                    job_id,
                    self.job_poll_interval,
                    self.job_tx.clone(),
                );
                self.pollers.push(poller);
            }
            SessionCommand::Shutdown => {}
        }
    }

    fn send(&mut self, body: String) {
        let body = body.trim().to_string();
        if body.is_empty() {
            return;
        }
        let outgoing = match self.state.begin_send(&body, Utc::now()) {
            Ok(outgoing) => outgoing,
            Err(e) => {
                self.toast(ToastLevel::Error, e.to_string());
                return;
            }
        };
        self.emit_timeline();

        let Some(correlation) = outgoing.message.client_message_id else {
            return;
        };
        let conn = self.conn.clone();
        let outcomes = self.outcome_tx.clone();
        tokio::spawn(async move {
            let result = conn.send_message(outgoing.recipient, body, correlation).await;
            let _ = outcomes.send(Outcome::Sent(result));
        });
    }

    fn fetch_roster(&self) {
        let api = self.api.clone();
        let outcomes = self.outcome_tx.clone();
        tokio::spawn(async move {
            let _ = outcomes.send(Outcome::Roster(api.fetch_roster().await));
        });
    }

    fn fetch_history(&self, ticket: FetchTicket) {
        debug!(
            counterpart = %ticket.request.counterpart,
            page = ticket.request.page,
            before = ?ticket.request.before_id,
            "Fetching history page"
        );
        let api = self.api.clone();
        let outcomes = self.outcome_tx.clone();
        tokio::spawn(async move {
            let result = api.fetch_history(&ticket.request).await;
            let _ = outcomes.send(Outcome::History {
                epoch: ticket.epoch,
                result,
            });
        });
    }

    fn handle_outcome(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Roster(Ok(entries)) => {
                info!(count = entries.len(), "Roster loaded");
                self.state.set_roster(entries);
                self.emit_roster();
            }
            Outcome::Roster(Err(e)) => {
                warn!(error = %e, "Failed to load roster");
                self.toast(ToastLevel::Error, format!("Could not load conversations: {e}"));
            }
            Outcome::History { epoch, result: Ok(page) } => {
                let Some(applied) = self.state.apply_page(epoch, page) else {
                    debug!(epoch, "Discarding stale history page");
                    return;
                };
                self.emit_timeline();
                if applied.page == 0 {
                    self.emit(SessionEvent::ScrollToLatest);
                }
                self.view_sync
                    .report(applied.viewed_ids, &applied.counterpart_username);
            }
            Outcome::History { epoch, result: Err(e) } => {
                if self.state.fail_page(epoch) {
                    warn!(error = %e, "Failed to load history");
                    self.toast(ToastLevel::Error, format!("Could not load messages: {e}"));
                }
            }
            Outcome::Block { counterpart, result: Ok(res) } => {
                if let Some(active) = self.state.toggle_active(&counterpart) {
                    info!(counterpart = %counterpart, active, "Block toggled");
                }
                self.emit_roster();
                self.toast(ToastLevel::Success, res.message);
                self.fetch_roster();
            }
            Outcome::Block { counterpart, result: Err(e) } => {
                warn!(counterpart = %counterpart, error = %e, "Failed to toggle block");
                self.toast(ToastLevel::Error, format!("Could not update the user: {e}"));
            }
            Outcome::Sent(Ok(())) => {}
            Outcome::Sent(Err(e)) => {
                warn!(error = %e, "Failed to send message");
                self.toast(ToastLevel::Error, format!("Message not sent: {e}"));
            }
        }
    }

    fn handle_notification(&mut self, notification: ConnectionNotification) {
        match notification {
            ConnectionNotification::StateChanged(state) => {
                self.emit(SessionEvent::ConnectionStateChanged(state));
            }
            ConnectionNotification::TransportError(reason) => {
                self.toast(ToastLevel::Error, format!("Chat connection problem: {reason}"));
            }
            ConnectionNotification::Event(HubEvent::MessageReceived(message)) => {
                debug!(id = message.id, from = %message.sender_username, "Message received");
                let received = self.state.receive(message);
                if received.roster {
                    self.emit_roster();
                }
                if received.timeline {
                    self.emit_timeline();
                    self.emit(SessionEvent::ScrollToLatest);
                }
            }
            ConnectionNotification::Event(HubEvent::MessageConfirmed(message)) => {
                debug!(id = message.id, "Message confirmed");
                let outcome = self.state.confirm(message);
                if outcome.changed_timeline() {
                    self.emit_timeline();
                    self.emit_roster();
                    self.emit(SessionEvent::ScrollToLatest);
                }
            }
        }
    }

    fn handle_job_update(&mut self, update: JobUpdate) {
        match update.status.status {
            JobState::Completed => {
                self.toast(ToastLevel::Success, format!("Video {} is ready", update.job_id));
            }
            JobState::Failed => {
                self.toast(ToastLevel::Error, format!("Processing of video {} failed", update.job_id));
            }
            JobState::Queued | JobState::Processing => {}
        }
        self.emit(SessionEvent::JobStatusChanged {
            job_id: update.job_id,
            status: update.status,
        });
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone};
    use parlor_net::memory::{MemoryConnector, MemoryHub, MemoryLink};
    use parlor_net::StaticTokenProvider;
    use parlor_shared::protocol::{ChatMessage, HistoryRequest, HubFrame, JobStatus};
    use serde_json::{json, Value};
    use uuid::Uuid;

    use super::*;

    #[derive(Default)]
    struct FakeBackend {
        roster: Mutex<Vec<ChatCounterpart>>,
        pages: Mutex<HashMap<(String, u32), HistoryPage>>,
        history_requests: Mutex<Vec<HistoryRequest>>,
        roster_calls: AtomicUsize,
        fail_history: Mutex<bool>,
    }

    #[async_trait]
    impl ChatApi for FakeBackend {
        async fn fetch_roster(&self) -> parlor_net::Result<Vec<ChatCounterpart>> {
            self.roster_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.roster.lock().unwrap().clone())
        }

        async fn fetch_history(&self, request: &HistoryRequest) -> parlor_net::Result<HistoryPage> {
            self.history_requests.lock().unwrap().push(request.clone());
            if *self.fail_history.lock().unwrap() {
                return Err(NetError::Timeout("history"));
            }
            Ok(self
                .pages
                .lock()
                .unwrap()
                .get(&(request.username.clone(), request.page))
                .cloned()
                .unwrap_or_default())
        }

        async fn toggle_block(&self, counterpart: &CounterpartId) -> parlor_net::Result<BlockResponse> {
            let mut roster = self.roster.lock().unwrap();
            let entry = roster
                .iter_mut()
                .find(|c| &c.id == counterpart)
                .ok_or(NetError::Closed)?;
            entry.active = !entry.active;
            Ok(BlockResponse {
                message: format!("{} has been blocked", entry.name),
            })
        }
    }

    #[async_trait]
    impl JobStatusApi for FakeBackend {
        async fn job_status(&self, _job_id: &str) -> parlor_net::Result<JobStatus> {
            Ok(JobStatus {
                status: JobState::Completed,
                progress: Some(1.0),
            })
        }
    }

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap() + chrono::Duration::minutes(minute)
    }

    fn counterpart(id: &str, username: &str, name: &str, minute: i64) -> ChatCounterpart {
        ChatCounterpart {
            id: CounterpartId::new(id),
            username: username.into(),
            name: name.into(),
            role: "Editor".into(),
            active: true,
            image: None,
            last_message_at: Some(at(minute)),
            unviewed_count: 0,
        }
    }

    fn message(id: i64, sender: &str, minute: i64) -> ChatMessage {
        ChatMessage {
            id,
            body: format!("message {id}"),
            sender_username: sender.into(),
            sender_name: sender.into(),
            sender_image: None,
            receiver_name: "Admin".into(),
            viewed: false,
            created_at: at(minute),
            client_message_id: None,
        }
    }

    struct Harness {
        session: ChatSession,
        events: mpsc::UnboundedReceiver<SessionEvent>,
        backend: Arc<FakeBackend>,
        connector: Arc<MemoryConnector>,
        hub: MemoryHub,
    }

    fn harness(backend: FakeBackend, connector: Arc<MemoryConnector>, hub: MemoryHub) -> Harness {
        let backend = Arc::new(backend);
        let mut connection = ConnectionConfig::new("http://localhost/hubs/chat".parse().unwrap());
        connection.retry_delays = vec![Duration::from_secs(3600)];
        let mut options = SessionOptions::new("admin", connection);
        options.job_poll_interval = Duration::from_millis(10);
        let deps = SessionDeps {
            api: backend.clone(),
            jobs: backend.clone(),
            connector: connector.clone(),
            tokens: Arc::new(StaticTokenProvider::new(Some("token".into()))),
        };
        let (session, events) = ChatSession::start(options, deps);
        Harness {
            session,
            events,
            backend,
            connector,
            hub,
        }
    }

    fn backend_with_bob() -> FakeBackend {
        let backend = FakeBackend::default();
        *backend.roster.lock().unwrap() = vec![
            counterpart("u1", "alice", "Alice", 1),
            counterpart("u2", "bob", "Bob", 2),
        ];
        backend
    }

    async fn wait_for<F>(events: &mut mpsc::UnboundedReceiver<SessionEvent>, mut pred: F) -> SessionEvent
    where
        F: FnMut(&SessionEvent) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = events.recv().await.expect("session ended");
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for session event")
    }

    async fn connected(h: &mut Harness) -> MemoryLink {
        let mut state = h.session.watch_connection();
        state.wait_for(|s| s.is_connected()).await.unwrap();
        h.hub.accept().await.unwrap()
    }

    fn timeline_ids(event: &SessionEvent) -> Option<Vec<i64>> {
        match event {
            SessionEvent::TimelineChanged { messages, .. } => {
                Some(messages.iter().map(|m| m.id).collect())
            }
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_roster_arrives_sorted() {
        let (connector, hub) = MemoryConnector::pair();
        let mut h = harness(backend_with_bob(), connector, hub);

        let event = wait_for(&mut h.events, |e| matches!(e, SessionEvent::RosterChanged(_))).await;
        let SessionEvent::RosterChanged(roster) = event else { unreachable!() };
        let names: Vec<_> = roster.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Bob", "Alice"]);

        h.session.search("ali").await.unwrap();
        let event = wait_for(&mut h.events, |e| matches!(e, SessionEvent::RosterChanged(_))).await;
        assert_eq!(event, SessionEvent::RosterChanged(vec![counterpart("u1", "alice", "Alice", 1)]));
        h.session.stop().await;
    }

    #[tokio::test]
    async fn test_send_is_confirmed_in_place() {
        let (connector, hub) = MemoryConnector::pair();
        let mut h = harness(backend_with_bob(), connector, hub);
        let mut link = connected(&mut h).await;
        wait_for(&mut h.events, |e| matches!(e, SessionEvent::RosterChanged(_))).await;

        h.session.open("bob").await.unwrap();
        wait_for(&mut h.events, |e| matches!(e, SessionEvent::ScrollToLatest)).await;

        h.session.send("hello").await.unwrap();
        let event = wait_for(&mut h.events, |e| timeline_ids(e) == Some(vec![0])).await;
        let SessionEvent::TimelineChanged { messages, .. } = event else { unreachable!() };
        assert_eq!(messages[0].sender_name, "You");

        let Some(HubFrame::Invocation { target, arguments }) = link.next_invocation().await else {
            panic!("expected SendMessage");
        };
        assert_eq!(target, "SendMessage");
        assert_eq!(arguments[0], json!("bob"));
        assert_eq!(arguments[1], json!("hello"));
        let correlation: Uuid = serde_json::from_value(arguments[2].clone()).unwrap();

        let mut echo = message(482, "admin", 30);
        echo.body = "hello".into();
        echo.receiver_name = "Bob".into();
        echo.client_message_id = Some(correlation);
        link.invoke("MessageSent", &echo);

        wait_for(&mut h.events, |e| timeline_ids(e) == Some(vec![482])).await;
        h.session.stop().await;
    }

    #[tokio::test]
    async fn test_send_while_disconnected_stays_pending() {
        let (connector, hub) = MemoryConnector::pair();
        connector.fail_next(usize::MAX);
        let mut h = harness(backend_with_bob(), connector, hub);
        wait_for(&mut h.events, |e| matches!(e, SessionEvent::RosterChanged(_))).await;

        h.session.open("bob").await.unwrap();
        h.session.send("hello").await.unwrap();

        let event = wait_for(&mut h.events, |e| {
            matches!(e, SessionEvent::Toast { level: ToastLevel::Error, message } if message.starts_with("Message not sent"))
        })
        .await;
        assert!(matches!(event, SessionEvent::Toast { .. }));
        assert_ne!(h.session.connection_state(), ConnectionState::Connected);
        assert_eq!(h.connector.payloads_sent(), 0);
        h.session.stop().await;
    }

    #[tokio::test]
    async fn test_history_paging_and_viewed_sync() {
        let backend = backend_with_bob();
        {
            let mut pages = backend.pages.lock().unwrap();
            pages.insert(
                ("bob".into(), 0),
                HistoryPage {
                    messages: (1..=30).rev().map(|id| message(id, "bob", id)).collect(),
                    viewed_ids: vec![29, 30],
                    has_more: None,
                },
            );
        }
        let (connector, hub) = MemoryConnector::pair();
        let mut h = harness(backend, connector, hub);
        let mut link = connected(&mut h).await;
        wait_for(&mut h.events, |e| matches!(e, SessionEvent::RosterChanged(_))).await;

        h.session.open("bob").await.unwrap();
        let event = wait_for(&mut h.events, |e| {
            timeline_ids(e).is_some_and(|ids| ids.len() == 30)
        })
        .await;
        let ids = timeline_ids(&event).unwrap();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert!(matches!(event, SessionEvent::TimelineChanged { has_more: true, .. }));

        let Some(HubFrame::Invocation { target, arguments }) = link.next_invocation().await else {
            panic!("expected MarkViewed");
        };
        assert_eq!(target, "MarkViewed");
        assert_eq!(arguments, vec![json!([29, 30]), Value::from("bob")]);

        // page 1 is empty: has_more drops and no page 2 is ever requested
        h.session.load_older().await.unwrap();
        wait_for(&mut h.events, |e| {
            matches!(e, SessionEvent::TimelineChanged { has_more: false, .. })
        })
        .await;
        h.session.load_older().await.unwrap();
        h.session.load_older().await.unwrap();
        h.session.search("").await.unwrap();
        wait_for(&mut h.events, |e| matches!(e, SessionEvent::RosterChanged(_))).await;

        let requests = h.backend.history_requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].page, 1);
        assert_eq!(requests[1].before_id, Some(1));
        h.session.stop().await;
    }

    #[tokio::test]
    async fn test_failed_history_fetch_toasts() {
        let backend = backend_with_bob();
        *backend.fail_history.lock().unwrap() = true;
        let (connector, hub) = MemoryConnector::pair();
        let mut h = harness(backend, connector, hub);
        wait_for(&mut h.events, |e| matches!(e, SessionEvent::RosterChanged(_))).await;

        h.session.open("bob").await.unwrap();
        wait_for(&mut h.events, |e| {
            matches!(e, SessionEvent::Toast { level: ToastLevel::Error, message } if message.starts_with("Could not load messages"))
        })
        .await;

        // the same page can be retried
        *h.backend.fail_history.lock().unwrap() = false;
        h.session.load_older().await.unwrap();
        wait_for(&mut h.events, |e| matches!(e, SessionEvent::ScrollToLatest)).await;
        let requests = h.backend.history_requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].page, 0);
        h.session.stop().await;
    }

    #[tokio::test]
    async fn test_message_from_other_counterpart_counts_unviewed() {
        let (connector, hub) = MemoryConnector::pair();
        let mut h = harness(backend_with_bob(), connector, hub);
        let link = connected(&mut h).await;
        wait_for(&mut h.events, |e| matches!(e, SessionEvent::RosterChanged(_))).await;

        h.session.open("bob").await.unwrap();
        wait_for(&mut h.events, |e| matches!(e, SessionEvent::ScrollToLatest)).await;

        link.invoke("ReceiveMessage", &message(70, "alice", 40));
        let event = wait_for(&mut h.events, |e| {
            matches!(e, SessionEvent::RosterChanged(r) if r.first().is_some_and(|c| c.unviewed_count == 1))
        })
        .await;
        let SessionEvent::RosterChanged(roster) = event else { unreachable!() };
        assert_eq!(roster[0].username, "alice");

        link.invoke("ReceiveMessage", &message(71, "bob", 41));
        wait_for(&mut h.events, |e| timeline_ids(e) == Some(vec![71])).await;
        wait_for(&mut h.events, |e| matches!(e, SessionEvent::ScrollToLatest)).await;
        h.session.stop().await;
    }

    #[tokio::test]
    async fn test_block_toasts_and_reloads_roster() {
        let (connector, hub) = MemoryConnector::pair();
        let mut h = harness(backend_with_bob(), connector, hub);
        wait_for(&mut h.events, |e| matches!(e, SessionEvent::RosterChanged(_))).await;

        h.session.toggle_block("bob").await.unwrap();
        let event = wait_for(&mut h.events, |e| {
            matches!(e, SessionEvent::Toast { level: ToastLevel::Success, .. })
        })
        .await;
        assert_eq!(event, SessionEvent::toast(ToastLevel::Success, "Bob has been blocked"));

        let event = wait_for(&mut h.events, |e| matches!(e, SessionEvent::RosterChanged(_))).await;
        let SessionEvent::RosterChanged(roster) = event else { unreachable!() };
        assert_eq!(roster.last().map(|c| (c.name.as_str(), c.active)), Some(("Bob", false)));
        assert_eq!(h.backend.roster_calls.load(Ordering::SeqCst), 2);
        h.session.stop().await;
    }

    #[tokio::test]
    async fn test_watch_job_reports_completion() {
        let (connector, hub) = MemoryConnector::pair();
        let mut h = harness(backend_with_bob(), connector, hub);

        h.session.watch_job("v9").await.unwrap();
        let event = wait_for(&mut h.events, |e| matches!(e, SessionEvent::JobStatusChanged { .. })).await;
        let SessionEvent::JobStatusChanged { job_id, status } = event else { unreachable!() };
        assert_eq!(job_id, "v9");
        assert_eq!(status.status, JobState::Completed);
        h.session.stop().await;
    }

    #[tokio::test]
    async fn test_stop_closes_connection() {
        let (connector, hub) = MemoryConnector::pair();
        let mut h = harness(backend_with_bob(), connector, hub);
        let link = connected(&mut h).await;
        let state = h.session.watch_connection();

        h.session.stop().await;
        assert_eq!(*state.borrow(), ConnectionState::Disconnected);
        assert!(link.is_closed());
    }

    #[tokio::test]
    async fn test_stop_during_message_burst() {
        let (connector, hub) = MemoryConnector::pair();
        let mut h = harness(backend_with_bob(), connector, hub);
        let link = connected(&mut h).await;

        let mut burst = String::new();
        for id in 0..300 {
            let frame = json!({
                "type": 1,
                "target": "ReceiveMessage",
                "arguments": [message(1000 + id, "alice", id)]
            });
            burst.push_str(&frame.to_string());
            burst.push('\u{1e}');
        }
        assert!(link.push(burst));

        tokio::time::timeout(Duration::from_secs(2), h.session.stop())
            .await
            .expect("stop must not hang behind queued hub messages");
        assert!(link.is_closed());
    }

    #[tokio::test]
    async fn test_unknown_counterpart_toasts() {
        let (connector, hub) = MemoryConnector::pair();
        let mut h = harness(backend_with_bob(), connector, hub);
        wait_for(&mut h.events, |e| matches!(e, SessionEvent::RosterChanged(_))).await;

        h.session.open("nobody").await.unwrap();
        let event = wait_for(&mut h.events, |e| matches!(e, SessionEvent::Toast { .. })).await;
        assert_eq!(event, SessionEvent::toast(ToastLevel::Error, "Unknown counterpart: nobody"));
        h.session.stop().await;
    }
}

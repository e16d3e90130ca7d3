use parlor_shared::protocol::{ChatCounterpart, ChatMessage, JobStatus};
use parlor_shared::types::{ConnectionState, CounterpartId};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastLevel {
    Info,
    Success,
    Error,
}

/// Everything the front end needs to redraw the chat panel.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    ConnectionStateChanged(ConnectionState),
    /// The roster as currently visible, search filter applied.
    RosterChanged(Vec<ChatCounterpart>),
    TimelineChanged {
        counterpart: CounterpartId,
        messages: Vec<ChatMessage>,
        has_more: bool,
    },
    ScrollToLatest,
    Toast {
        level: ToastLevel,
        message: String,
    },
    JobStatusChanged {
        job_id: String,
        status: JobStatus,
    },
}

impl SessionEvent {
    pub fn toast(level: ToastLevel, message: impl Into<String>) -> Self {
        Self::Toast {
            level,
            message: message.into(),
        }
    }
}

pub fn emit_event(events: &mpsc::UnboundedSender<SessionEvent>, event: SessionEvent) {
    if events.send(event).is_err() {
        tracing::debug!("No front end listening for session events");
    }
}

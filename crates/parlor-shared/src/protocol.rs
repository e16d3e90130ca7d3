use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::constants::{
    HUB_MARK_VIEWED, HUB_MESSAGE_SENT, HUB_PROTOCOL, HUB_PROTOCOL_VERSION, HUB_RECEIVE_MESSAGE,
    HUB_SEND_MESSAGE, OWN_SENDER_LABEL, PENDING_MESSAGE_ID, RECORD_SEPARATOR,
};
use crate::error::ProtocolError;
use crate::types::{CounterpartId, JobState};

/// The other party of a one-to-one conversation, as listed in the roster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatCounterpart {
    pub id: CounterpartId,
    pub username: String,
    /// Display name
    pub name: String,
    #[serde(default)]
    pub role: String,
    /// Whether messaging is permitted (false once blocked)
    pub active: bool,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub last_message_at: Option<DateTime<Utc>>,
    /// Messages addressed to the actor that were not viewed yet
    #[serde(default)]
    pub unviewed_count: u32,
}

/// A chat message, either confirmed by the server or still optimistic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Server-assigned id, `PENDING_MESSAGE_ID` until confirmed
    pub id: i64,
    #[serde(alias = "message")]
    pub body: String,
    pub sender_username: String,
    pub sender_name: String,
    #[serde(default)]
    pub sender_image: Option<String>,
    #[serde(default)]
    pub receiver_name: String,
    #[serde(default)]
    pub viewed: bool,
    pub created_at: DateTime<Utc>,
    /// Correlation id of an optimistic send, echoed back by hubs that support it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_message_id: Option<Uuid>,
}

impl ChatMessage {
    /// Build the local copy of a message the actor just sent.
    pub fn optimistic(
        sender_username: impl Into<String>,
        receiver_name: impl Into<String>,
        body: impl Into<String>,
        client_message_id: Uuid,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: PENDING_MESSAGE_ID,
            body: body.into(),
            sender_username: sender_username.into(),
            sender_name: OWN_SENDER_LABEL.to_string(),
            sender_image: None,
            receiver_name: receiver_name.into(),
            viewed: false,
            created_at,
            client_message_id: Some(client_message_id),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.id == PENDING_MESSAGE_ID
    }
}

/// Parameters of one backward history fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRequest {
    pub counterpart: CounterpartId,
    pub username: String,
    pub page: u32,
    /// Oldest loaded message id, exclusive upper bound of the page
    pub before_id: Option<i64>,
}

/// One page of history as returned by the backend (newest first).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub viewed_ids: Vec<i64>,
    #[serde(default)]
    pub has_more: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockResponse {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub status: JobState,
    #[serde(default)]
    pub progress: Option<f32>,
}

// ---------------------------------------------------------------------------
// Hub wire protocol
// ---------------------------------------------------------------------------

const FRAME_INVOCATION: u8 = 1;
const FRAME_COMPLETION: u8 = 3;
const FRAME_PING: u8 = 6;
const FRAME_CLOSE: u8 = 7;

/// Outbound hub invocations.
#[derive(Debug, Clone, PartialEq)]
pub enum HubInvocation {
    SendMessage {
        recipient: String,
        body: String,
        client_message_id: Uuid,
    },
    MarkViewed {
        ids: Vec<i64>,
        counterpart: String,
    },
}

impl HubInvocation {
    pub fn target(&self) -> &'static str {
        match self {
            Self::SendMessage { .. } => HUB_SEND_MESSAGE,
            Self::MarkViewed { .. } => HUB_MARK_VIEWED,
        }
    }

    /// Encode as a fire-and-forget invocation frame.
    pub fn to_frame(&self) -> String {
        let arguments = match self {
            Self::SendMessage {
                recipient,
                body,
                client_message_id,
            } => json!([recipient, body, client_message_id]),
            Self::MarkViewed { ids, counterpart } => json!([ids, counterpart]),
        };
        let mut frame = json!({
            "type": FRAME_INVOCATION,
            "target": self.target(),
            "arguments": arguments,
        })
        .to_string();
        frame.push(RECORD_SEPARATOR);
        frame
    }
}

/// Inbound events dispatched to session subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum HubEvent {
    /// A counterpart sent the actor a message
    MessageReceived(ChatMessage),
    /// Authoritative echo of a message the actor sent
    MessageConfirmed(ChatMessage),
}

impl HubEvent {
    /// Map an invocation frame to an event. Unknown targets yield `None`.
    pub fn from_invocation(target: &str, arguments: Vec<Value>) -> Result<Option<Self>, ProtocolError> {
        let wrap: fn(ChatMessage) -> HubEvent = match target {
            HUB_RECEIVE_MESSAGE => HubEvent::MessageReceived,
            HUB_MESSAGE_SENT => HubEvent::MessageConfirmed,
            _ => return Ok(None),
        };
        let first = arguments
            .into_iter()
            .next()
            .ok_or_else(|| ProtocolError::BadArguments {
                target: target.to_string(),
                reason: "expected one message argument".into(),
            })?;
        let message: ChatMessage =
            serde_json::from_value(first).map_err(|e| ProtocolError::BadArguments {
                target: target.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Some(wrap(message)))
    }
}

/// A decoded inbound hub frame.
#[derive(Debug, Clone, PartialEq)]
pub enum HubFrame {
    Invocation {
        target: String,
        arguments: Vec<Value>,
    },
    Completion {
        invocation_id: Option<String>,
        error: Option<String>,
    },
    Ping,
    Close {
        error: Option<String>,
        allow_reconnect: bool,
    },
    /// Frame types this client does not act on (streaming, acks)
    Other(u8),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFrame {
    #[serde(rename = "type")]
    kind: Option<u8>,
    target: Option<String>,
    #[serde(default)]
    arguments: Vec<Value>,
    invocation_id: Option<String>,
    error: Option<String>,
    #[serde(default)]
    allow_reconnect: bool,
}

impl HubFrame {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let raw: RawFrame = serde_json::from_str(text)?;
        let kind = raw.kind.ok_or(ProtocolError::MissingField("type"))?;
        Ok(match kind {
            FRAME_INVOCATION => HubFrame::Invocation {
                target: raw.target.ok_or(ProtocolError::MissingField("target"))?,
                arguments: raw.arguments,
            },
            FRAME_COMPLETION => HubFrame::Completion {
                invocation_id: raw.invocation_id,
                error: raw.error,
            },
            FRAME_PING => HubFrame::Ping,
            FRAME_CLOSE => HubFrame::Close {
                error: raw.error,
                allow_reconnect: raw.allow_reconnect,
            },
            other => HubFrame::Other(other),
        })
    }
}

/// Split a transport payload into its record-separated frames.
pub fn split_frames(payload: &str) -> impl Iterator<Item = &str> {
    payload
        .split(RECORD_SEPARATOR)
        .map(str::trim)
        .filter(|frame| !frame.is_empty())
}

pub fn ping_frame() -> String {
    let mut frame = json!({ "type": FRAME_PING }).to_string();
    frame.push(RECORD_SEPARATOR);
    frame
}

pub fn handshake_request() -> String {
    let mut frame = json!({
        "protocol": HUB_PROTOCOL,
        "version": HUB_PROTOCOL_VERSION,
    })
    .to_string();
    frame.push(RECORD_SEPARATOR);
    frame
}

/// Check the handshake response at the head of `payload` and return whatever
/// frames followed it in the same payload.
pub fn parse_handshake_response(payload: &str) -> Result<&str, ProtocolError> {
    let (head, rest) = payload
        .split_once(RECORD_SEPARATOR)
        .ok_or(ProtocolError::MissingField("record separator"))?;

    #[derive(Deserialize)]
    struct HandshakeResponse {
        error: Option<String>,
    }

    let response: HandshakeResponse = serde_json::from_str(head)?;
    match response.error {
        Some(error) => Err(ProtocolError::HandshakeRejected(error)),
        None => Ok(rest),
    }
}

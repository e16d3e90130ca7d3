//! Optimistic sends and their reconciliation with server confirmations.
//!
//! A sent message shows up at once with the pending id and a fresh
//! correlation id. When the hub echoes it back, the pending copy is replaced
//! by the confirmed one. Matching order: correlation id; without one, the
//! oldest pending message with the same body, then the oldest pending
//! message.

use chrono::{DateTime, Utc};
use parlor_shared::protocol::ChatMessage;
use tracing::debug;
use uuid::Uuid;

use crate::timeline::Timeline;

#[derive(Debug, Clone, PartialEq)]
pub enum Reconciled {
    /// A pending message was swapped for the confirmed one.
    Replaced { pending: ChatMessage },
    /// Nothing was pending for it; it was appended.
    Inserted,
    /// Already in the timeline.
    Duplicate,
    /// Belongs to another conversation.
    Ignored,
}

impl Reconciled {
    pub fn changed_timeline(&self) -> bool {
        matches!(self, Self::Replaced { .. } | Self::Inserted)
    }
}

pub fn optimistic_message(
    actor: &str,
    receiver_name: &str,
    body: &str,
    now: DateTime<Utc>,
) -> ChatMessage {
    ChatMessage::optimistic(actor, receiver_name, body, Uuid::new_v4(), now)
}

/// Fold a confirmation into the timeline. `belongs_here` tells whether the
/// confirmed message is part of the open conversation when no pending copy
/// claims it.
pub fn reconcile(timeline: &mut Timeline, confirmed: ChatMessage, belongs_here: bool) -> Reconciled {
    if let Some(index) = find_pending(timeline.messages(), &confirmed) {
        if let Some(pending) = timeline.remove(index) {
            debug!(id = confirmed.id, correlation = ?pending.client_message_id, "Confirmed pending message");
            timeline.insert(confirmed);
            return Reconciled::Replaced { pending };
        }
    }
    if timeline.contains(confirmed.id) {
        return Reconciled::Duplicate;
    }
    if !belongs_here {
        return Reconciled::Ignored;
    }
    timeline.insert(confirmed);
    Reconciled::Inserted
}

fn find_pending(messages: &[ChatMessage], confirmed: &ChatMessage) -> Option<usize> {
    let mut pending = messages.iter().enumerate().filter(|(_, m)| m.is_pending());

    match confirmed.client_message_id {
        // A correlation id that matches nothing pending is someone else's
        // send (another tab of the same actor); leave our copies alone.
        Some(correlation) => pending
            .find(|(_, m)| m.client_message_id == Some(correlation))
            .map(|(i, _)| i),
        None => {
            let candidates: Vec<(usize, &ChatMessage)> = pending.collect();
            candidates
                .iter()
                .find(|(_, m)| m.body == confirmed.body)
                .or_else(|| candidates.first())
                .map(|(i, _)| *i)
        }
    }
}

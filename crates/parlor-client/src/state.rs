//! Chat state owned by the session task.
//!
//! [`ChatState`] holds the roster, the open conversation and its timeline,
//! and the paginator. It performs no I/O: the session feeds it commands and
//! network results one at a time and turns what changed into events.

use chrono::{DateTime, Utc};
use parlor_shared::protocol::{ChatCounterpart, ChatMessage, HistoryPage};
use parlor_shared::types::CounterpartId;
use tracing::debug;

use crate::error::SessionError;
use crate::history::{FetchTicket, Paginator};
use crate::reconciler::{self, Reconciled};
use crate::roster::Roster;
use crate::timeline::Timeline;

/// What a history page changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageApplied {
    pub page: u32,
    pub viewed_ids: Vec<i64>,
    pub counterpart_username: String,
}

/// What an inbound message changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Received {
    pub timeline: bool,
    pub roster: bool,
}

/// A send ready to go out on the hub.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub recipient: String,
    pub message: ChatMessage,
}

pub struct ChatState {
    actor: String,
    roster: Roster,
    query: String,
    active: Option<CounterpartId>,
    timeline: Timeline,
    paginator: Paginator,
}

impl ChatState {
    pub fn new(actor: impl Into<String>, page_size: usize) -> Self {
        Self {
            actor: actor.into(),
            roster: Roster::default(),
            query: String::new(),
            active: None,
            timeline: Timeline::default(),
            paginator: Paginator::new(page_size),
        }
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn has_more(&self) -> bool {
        self.paginator.has_more()
    }

    pub fn active(&self) -> Option<&ChatCounterpart> {
        self.active.as_ref().and_then(|id| self.roster.get(id))
    }

    pub fn active_id(&self) -> Option<&CounterpartId> {
        self.active.as_ref()
    }

    pub fn set_roster(&mut self, entries: Vec<ChatCounterpart>) {
        self.roster.replace(entries);
        // the open conversation has no unread messages by definition
        if let Some(id) = &self.active {
            self.roster.clear_unviewed(id);
        }
    }

    pub fn set_query(&mut self, query: impl Into<String>) {
        self.query = query.into();
    }

    /// The roster with the current search applied.
    pub fn visible_roster(&self) -> Vec<ChatCounterpart> {
        self.roster.search(&self.query).into_iter().cloned().collect()
    }

    pub fn toggle_active(&mut self, id: &CounterpartId) -> Option<bool> {
        self.roster.toggle_active(id)
    }

    /// Open a conversation by id or username. Resets pagination and returns
    /// the page-0 fetch.
    pub fn open(&mut self, key: &str) -> Result<FetchTicket, SessionError> {
        let counterpart = self
            .roster
            .resolve(key)
            .cloned()
            .ok_or_else(|| SessionError::UnknownCounterpart(key.to_string()))?;

        self.roster.clear_unviewed(&counterpart.id);
        self.timeline.clear();
        self.active = Some(counterpart.id.clone());
        Ok(self.paginator.open(counterpart.id, counterpart.username))
    }

    pub fn close(&mut self) {
        self.active = None;
        self.timeline.clear();
        self.paginator.reset();
    }

    pub fn next_page(&mut self) -> Option<FetchTicket> {
        self.paginator.next_page()
    }

    /// Merge a fetched page. Returns `None` when the result is stale or the
    /// open counterpart has left the roster, which closes the conversation.
    pub fn apply_page(&mut self, epoch: u64, page: HistoryPage) -> Option<PageApplied> {
        if epoch != self.paginator.epoch() {
            return None;
        }
        let Some(counterpart_username) = self.active().map(|c| c.username.clone()) else {
            debug!("Open counterpart left the roster, closing the conversation");
            self.close();
            return None;
        };
        let loaded = self.paginator.accept(epoch, &page)?;

        if loaded == 0 {
            self.timeline.replace_with_page(page.messages);
        } else {
            let added = self.timeline.prepend_page(page.messages);
            debug!(page = loaded, added, "Prepended older history");
        }
        self.timeline.mark_viewed(&page.viewed_ids);

        Some(PageApplied {
            page: loaded,
            viewed_ids: page.viewed_ids,
            counterpart_username,
        })
    }

    /// Returns `false` when the failed fetch was stale.
    pub fn fail_page(&mut self, epoch: u64) -> bool {
        self.paginator.fail(epoch)
    }

    /// Append the optimistic copy of a send to the open conversation.
    pub fn begin_send(&mut self, body: &str, now: DateTime<Utc>) -> Result<OutgoingMessage, SessionError> {
        let counterpart = self.active().ok_or(SessionError::NoActiveConversation)?;
        let recipient = counterpart.username.clone();
        let message = reconciler::optimistic_message(&self.actor, &counterpart.name, body, now);
        self.timeline.insert(message.clone());
        Ok(OutgoingMessage { recipient, message })
    }

    /// A counterpart's message. It lands in the timeline when its
    /// conversation is open; otherwise it only counts as unviewed.
    pub fn receive(&mut self, message: ChatMessage) -> Received {
        let open = self
            .active()
            .is_some_and(|c| c.username == message.sender_username);
        let roster = self
            .roster
            .record_message(&message.sender_username, message.created_at, !open);
        let timeline = open && self.timeline.insert(message);
        Received { timeline, roster }
    }

    /// The hub's echo of one of the actor's own messages.
    pub fn confirm(&mut self, message: ChatMessage) -> Reconciled {
        let Some(counterpart) = self.active().cloned() else {
            return Reconciled::Ignored;
        };
        let belongs_here = message.receiver_name == counterpart.name;
        let at = message.created_at;
        let outcome = reconciler::reconcile(&mut self.timeline, message, belongs_here);
        if outcome.changed_timeline() {
            self.roster.record_message(&counterpart.username, at, false);
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn counterpart(id: &str, username: &str, name: &str, hour: u32) -> ChatCounterpart {
        ChatCounterpart {
            id: CounterpartId::new(id),
            username: username.into(),
            name: name.into(),
            role: "Support".into(),
            active: true,
            image: None,
            last_message_at: Some(Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap()),
            unviewed_count: 2,
        }
    }

    fn from(sender: &str, id: i64, minute: i64) -> ChatMessage {
        ChatMessage {
            id,
            body: format!("m{id}"),
            sender_username: sender.into(),
            sender_name: sender.into(),
            sender_image: None,
            receiver_name: "Admin".into(),
            viewed: false,
            created_at: base() + Duration::minutes(minute),
            client_message_id: None,
        }
    }

    fn state() -> ChatState {
        let mut state = ChatState::new("admin", 3);
        state.set_roster(vec![
            counterpart("u1", "alice", "Alice", 10),
            counterpart("u2", "bob", "Bob", 11),
        ]);
        state
    }

    fn ids(state: &ChatState) -> Vec<i64> {
        state.timeline().messages().iter().map(|m| m.id).collect()
    }

    #[test]
    fn test_open_resets_and_clears_unviewed() {
        let mut state = state();
        let ticket = state.open("bob").unwrap();
        assert_eq!(ticket.request.username, "bob");
        assert_eq!(ticket.request.page, 0);
        assert_eq!(state.active().unwrap().unviewed_count, 0);

        assert!(matches!(state.open("zed"), Err(SessionError::UnknownCounterpart(_))));
        // opening by id works too
        assert_eq!(state.open("u1").unwrap().request.username, "alice");
    }

    #[test]
    fn test_pages_build_one_ascending_timeline() {
        let mut state = state();
        let first = state.open("bob").unwrap();
        let mut page = HistoryPage {
            messages: vec![from("bob", 6, 6), from("bob", 5, 5), from("bob", 4, 4)],
            viewed_ids: vec![5, 6],
            has_more: None,
        };
        let applied = state.apply_page(first.epoch, page.clone()).unwrap();
        assert_eq!(applied.viewed_ids, vec![5, 6]);
        assert_eq!(applied.counterpart_username, "bob");
        assert_eq!(ids(&state), vec![4, 5, 6]);
        assert!(state.timeline().messages()[2].viewed);

        let second = state.next_page().unwrap();
        assert_eq!(second.request.before_id, Some(4));
        page.messages = vec![from("bob", 3, 3), from("bob", 2, 2)];
        page.viewed_ids.clear();
        let applied = state.apply_page(second.epoch, page).unwrap();
        assert_eq!(applied.page, 1);
        assert_eq!(ids(&state), vec![2, 3, 4, 5, 6]);
        assert!(!state.has_more());
        assert!(state.next_page().is_none());
    }

    #[test]
    fn test_stale_page_after_switch_is_dropped() {
        let mut state = state();
        let bob = state.open("bob").unwrap();
        let alice = state.open("alice").unwrap();

        let stale = HistoryPage {
            messages: vec![from("bob", 1, 1)],
            ..HistoryPage::default()
        };
        assert!(state.apply_page(bob.epoch, stale).is_none());
        assert!(state.timeline().is_empty());
        assert!(!state.fail_page(bob.epoch));

        let fresh = HistoryPage {
            messages: vec![from("alice", 2, 2)],
            ..HistoryPage::default()
        };
        assert!(state.apply_page(alice.epoch, fresh).is_some());
        assert_eq!(ids(&state), vec![2]);
    }

    #[test]
    fn test_page_for_counterpart_gone_from_roster_closes() {
        let mut state = state();
        let ticket = state.open("bob").unwrap();
        state.set_roster(vec![counterpart("u1", "alice", "Alice", 10)]);

        let page = HistoryPage {
            messages: vec![from("bob", 4, 4), from("bob", 3, 3), from("bob", 2, 2)],
            ..HistoryPage::default()
        };
        assert!(state.apply_page(ticket.epoch, page).is_none());
        assert!(state.active_id().is_none());
        assert!(state.timeline().is_empty());
        assert!(state.next_page().is_none());

        // the paginator is clean for the next conversation
        let ticket = state.open("alice").unwrap();
        assert_eq!(ticket.request.page, 0);
        assert_eq!(ticket.request.before_id, None);
    }

    #[test]
    fn test_receive_routes_by_open_conversation() {
        let mut state = state();
        let ticket = state.open("bob").unwrap();
        state.apply_page(ticket.epoch, HistoryPage::default());

        let received = state.receive(from("bob", 10, 10));
        assert_eq!(received, Received { timeline: true, roster: true });
        assert_eq!(ids(&state), vec![10]);

        let received = state.receive(from("alice", 11, 11));
        assert_eq!(received, Received { timeline: false, roster: true });
        assert_eq!(ids(&state), vec![10]);
        let alice = state.roster().by_username("alice").unwrap();
        assert_eq!(alice.unviewed_count, 3);
        // alice now has the latest message, so she leads the roster
        assert_eq!(state.roster().entries()[0].username, "alice");
    }

    #[test]
    fn test_send_then_confirm() {
        let mut state = state();
        assert!(matches!(
            state.begin_send("hello", base()),
            Err(SessionError::NoActiveConversation)
        ));

        state.open("bob").unwrap();
        let outgoing = state.begin_send("hello", base()).unwrap();
        assert_eq!(outgoing.recipient, "bob");
        assert_eq!(outgoing.message.receiver_name, "Bob");
        assert_eq!(state.timeline().len(), 1);
        assert!(state.timeline().messages()[0].is_pending());

        let mut echo = outgoing.message.clone();
        echo.id = 482;
        echo.sender_name = "Admin".into();
        echo.created_at = base() + Duration::seconds(1);
        assert!(matches!(state.confirm(echo), Reconciled::Replaced { .. }));
        assert_eq!(ids(&state), vec![482]);
    }

    #[test]
    fn test_search_is_a_view() {
        let mut state = state();
        state.set_query("BO");
        let visible: Vec<String> = state.visible_roster().into_iter().map(|c| c.name).collect();
        assert_eq!(visible, vec!["Bob".to_string()]);
        assert_eq!(state.roster().entries().len(), 2);
    }
}

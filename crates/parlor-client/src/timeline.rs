//! Message timeline of the open conversation, ascending by `created_at`.

use parlor_shared::protocol::ChatMessage;

#[derive(Debug, Default)]
pub struct Timeline {
    messages: Vec<ChatMessage>,
}

impl Timeline {
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Whether a confirmed message with this id is already present.
    pub fn contains(&self, id: i64) -> bool {
        self.messages.iter().any(|m| !m.is_pending() && m.id == id)
    }

    /// Replace the timeline with a newest-first page.
    pub fn replace_with_page(&mut self, newest_first: Vec<ChatMessage>) {
        self.messages.clear();
        for message in newest_first.into_iter().rev() {
            self.insert(message);
        }
    }

    /// Prepend an older newest-first page. Messages already present are
    /// skipped. Returns how many were added.
    pub fn prepend_page(&mut self, newest_first: Vec<ChatMessage>) -> usize {
        let before = self.messages.len();
        for message in newest_first {
            self.insert(message);
        }
        self.messages.len() - before
    }

    /// Insert keeping timestamp order; equal timestamps keep arrival order.
    /// A confirmed message whose id is already present is dropped.
    pub fn insert(&mut self, message: ChatMessage) -> bool {
        if !message.is_pending() && self.contains(message.id) {
            return false;
        }
        let at = self
            .messages
            .partition_point(|m| m.created_at <= message.created_at);
        self.messages.insert(at, message);
        true
    }

    pub fn remove(&mut self, index: usize) -> Option<ChatMessage> {
        (index < self.messages.len()).then(|| self.messages.remove(index))
    }

    /// Flag the given messages as viewed. Returns how many flipped.
    pub fn mark_viewed(&mut self, ids: &[i64]) -> usize {
        let mut flipped = 0;
        for m in self.messages.iter_mut() {
            if !m.viewed && !m.is_pending() && ids.contains(&m.id) {
                m.viewed = true;
                flipped += 1;
            }
        }
        flipped
    }
}

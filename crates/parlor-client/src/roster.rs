//! Roster of chat counterparts: ordering, search and local bookkeeping.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use parlor_shared::protocol::ChatCounterpart;
use parlor_shared::types::CounterpartId;

/// Counterparts, always kept in display order.
#[derive(Debug, Default)]
pub struct Roster {
    entries: Vec<ChatCounterpart>,
}

impl Roster {
    pub fn replace(&mut self, entries: Vec<ChatCounterpart>) {
        self.entries = entries;
        sort_counterparts(&mut self.entries);
    }

    pub fn entries(&self) -> &[ChatCounterpart] {
        &self.entries
    }

    pub fn get(&self, id: &CounterpartId) -> Option<&ChatCounterpart> {
        self.entries.iter().find(|c| &c.id == id)
    }

    pub fn by_username(&self, username: &str) -> Option<&ChatCounterpart> {
        self.entries.iter().find(|c| c.username == username)
    }

    /// Look a counterpart up by id, then by username.
    pub fn resolve(&self, key: &str) -> Option<&ChatCounterpart> {
        self.get(&CounterpartId::new(key))
            .or_else(|| self.by_username(key))
    }

    /// Counterparts whose display name or role contains `query`, ignoring
    /// case. An empty query matches everyone.
    pub fn search(&self, query: &str) -> Vec<&ChatCounterpart> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return self.entries.iter().collect();
        }
        self.entries
            .iter()
            .filter(|c| {
                c.name.to_lowercase().contains(&needle) || c.role.to_lowercase().contains(&needle)
            })
            .collect()
    }

    /// Returns whether anything changed.
    pub fn clear_unviewed(&mut self, id: &CounterpartId) -> bool {
        match self.entries.iter_mut().find(|c| &c.id == id) {
            Some(c) if c.unviewed_count > 0 => {
                c.unviewed_count = 0;
                true
            }
            _ => false,
        }
    }

    /// Note a message exchanged with `username` at `at`. `unviewed` bumps the
    /// counter of messages the actor has not seen yet.
    pub fn record_message(&mut self, username: &str, at: DateTime<Utc>, unviewed: bool) -> bool {
        let Some(c) = self.entries.iter_mut().find(|c| c.username == username) else {
            return false;
        };
        if c.last_message_at.map_or(true, |last| last < at) {
            c.last_message_at = Some(at);
        }
        if unviewed {
            c.unviewed_count += 1;
        }
        sort_counterparts(&mut self.entries);
        true
    }

    pub fn toggle_active(&mut self, id: &CounterpartId) -> Option<bool> {
        let c = self.entries.iter_mut().find(|c| &c.id == id)?;
        c.active = !c.active;
        let active = c.active;
        sort_counterparts(&mut self.entries);
        Some(active)
    }
}

/// Active first, then most recent message first; counterparts without any
/// message go last. Ties keep the server's order.
pub fn sort_counterparts(entries: &mut [ChatCounterpart]) {
    entries.sort_by(roster_order);
}

fn roster_order(a: &ChatCounterpart, b: &ChatCounterpart) -> Ordering {
    b.active
        .cmp(&a.active)
        .then_with(|| match (a.last_message_at, b.last_message_at) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(hour: u32) -> Option<DateTime<Utc>> {
        Some(Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap())
    }

    fn counterpart(id: &str, name: &str, role: &str, active: bool, last: Option<DateTime<Utc>>) -> ChatCounterpart {
        ChatCounterpart {
            id: CounterpartId::new(id),
            username: id.to_lowercase(),
            name: name.into(),
            role: role.into(),
            active,
            image: None,
            last_message_at: last,
            unviewed_count: 0,
        }
    }

    fn names(entries: &[ChatCounterpart]) -> Vec<&str> {
        entries.iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn test_active_then_recent_first() {
        let mut roster = Roster::default();
        roster.replace(vec![
            counterpart("alice", "Alice", "Editor", true, at(10)),
            counterpart("bob", "Bob", "Editor", true, at(11)),
            counterpart("carol", "Carol", "Editor", false, at(12)),
        ]);
        assert_eq!(names(roster.entries()), vec!["Bob", "Alice", "Carol"]);
    }

    #[test]
    fn test_missing_timestamp_sorts_last_within_group() {
        let mut roster = Roster::default();
        roster.replace(vec![
            counterpart("dan", "Dan", "", true, None),
            counterpart("eve", "Eve", "", false, at(9)),
            counterpart("fay", "Fay", "", true, at(8)),
            counterpart("gus", "Gus", "", false, None),
        ]);
        assert_eq!(names(roster.entries()), vec!["Fay", "Dan", "Eve", "Gus"]);
    }

    #[test]
    fn test_search_matches_name_or_role_ignoring_case() {
        let mut roster = Roster::default();
        roster.replace(vec![
            counterpart("u1", "Support Team", "Staff", true, at(1)),
            counterpart("u2", "Jane", "SUPPLIER", true, at(2)),
            counterpart("u3", "Mark", "Viewer", true, at(3)),
        ]);

        let hits: Vec<&str> = roster.search("supp").iter().map(|c| c.name.as_str()).collect();
        assert_eq!(hits, vec!["Jane", "Support Team"]);
        assert_eq!(roster.search("").len(), 3);
        assert!(roster.search("zzz").is_empty());
        // searching never reorders or drops entries
        assert_eq!(names(roster.entries()), vec!["Mark", "Jane", "Support Team"]);
    }

    #[test]
    fn test_record_message_resorts_and_counts() {
        let mut roster = Roster::default();
        roster.replace(vec![
            counterpart("alice", "Alice", "", true, at(10)),
            counterpart("bob", "Bob", "", true, at(11)),
        ]);

        assert!(roster.record_message("alice", at(12).unwrap(), true));
        assert_eq!(names(roster.entries()), vec!["Alice", "Bob"]);
        assert_eq!(roster.by_username("alice").unwrap().unviewed_count, 1);

        // an older timestamp never moves last_message_at backwards
        roster.record_message("alice", at(1).unwrap(), false);
        assert_eq!(roster.by_username("alice").unwrap().last_message_at, at(12));

        assert!(!roster.record_message("nobody", at(13).unwrap(), true));
    }

    #[test]
    fn test_clear_unviewed_and_toggle_active() {
        let mut roster = Roster::default();
        let mut bob = counterpart("bob", "Bob", "", true, at(11));
        bob.unviewed_count = 4;
        roster.replace(vec![bob, counterpart("alice", "Alice", "", true, at(10))]);
        let id = CounterpartId::new("bob");

        assert!(roster.clear_unviewed(&id));
        assert!(!roster.clear_unviewed(&id));

        assert_eq!(roster.toggle_active(&id), Some(false));
        assert_eq!(names(roster.entries()), vec!["Alice", "Bob"]);
        assert_eq!(roster.resolve("bob").map(|c| c.active), Some(false));
    }
}

//! Backward pagination over the history of the open conversation.
//!
//! Pages come newest-first. The paginator only tracks what to fetch next:
//! the page index, the cursor (oldest loaded id) and whether the server has
//! more. Each conversation selection starts a new epoch, and a result tagged
//! with an older epoch is rejected so a slow response can never land in the
//! wrong conversation.

use parlor_shared::protocol::{HistoryPage, HistoryRequest};
use parlor_shared::types::CounterpartId;
use tracing::debug;

/// A fetch the caller must run and report back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    pub epoch: u64,
    pub request: HistoryRequest,
}

#[derive(Debug)]
pub struct Paginator {
    page_size: usize,
    epoch: u64,
    target: Option<(CounterpartId, String)>,
    /// Index of the next page to fetch
    page: u32,
    cursor: Option<i64>,
    has_more: bool,
    in_flight: bool,
}

impl Paginator {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            epoch: 0,
            target: None,
            page: 0,
            cursor: None,
            has_more: false,
            in_flight: false,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn is_fetching(&self) -> bool {
        self.in_flight
    }

    pub fn cursor(&self) -> Option<i64> {
        self.cursor
    }

    /// Start over on a conversation and hand out its page-0 fetch.
    pub fn open(&mut self, counterpart: CounterpartId, username: String) -> FetchTicket {
        self.reset();
        self.has_more = true;
        self.in_flight = true;
        let ticket = self.ticket_for(&counterpart, &username);
        self.target = Some((counterpart, username));
        ticket
    }

    /// The next older page, unless one is outstanding or none is left.
    pub fn next_page(&mut self) -> Option<FetchTicket> {
        if self.in_flight {
            debug!(page = self.page, "History fetch already in flight");
            return None;
        }
        if !self.has_more {
            debug!("No older history to fetch");
            return None;
        }
        let (counterpart, username) = self.target.as_ref()?;
        let ticket = self.ticket_for(counterpart, username);
        self.in_flight = true;
        Some(ticket)
    }

    fn ticket_for(&self, counterpart: &CounterpartId, username: &str) -> FetchTicket {
        FetchTicket {
            epoch: self.epoch,
            request: HistoryRequest {
                counterpart: counterpart.clone(),
                username: username.to_string(),
                page: self.page,
                before_id: self.cursor,
            },
        }
    }

    /// Record a successful fetch. Returns the index of the page that was
    /// loaded, or `None` if the result belongs to an earlier epoch.
    pub fn accept(&mut self, epoch: u64, page: &HistoryPage) -> Option<u32> {
        if epoch != self.epoch || !self.in_flight {
            return None;
        }
        self.in_flight = false;
        let loaded = self.page;
        if let Some(oldest) = page.messages.last() {
            self.cursor = Some(oldest.id);
        }
        self.has_more = page
            .has_more
            .unwrap_or(page.messages.len() >= self.page_size);
        self.page += 1;
        Some(loaded)
    }

    /// Record a failed fetch. Nothing but the in-flight flag changes, so the
    /// same page can be retried. Returns `false` for a stale epoch.
    pub fn fail(&mut self, epoch: u64) -> bool {
        if epoch != self.epoch {
            return false;
        }
        self.in_flight = false;
        true
    }

    /// Forget the conversation; outstanding results become stale.
    pub fn reset(&mut self) {
        self.epoch += 1;
        self.target = None;
        self.page = 0;
        self.cursor = None;
        self.has_more = false;
        self.in_flight = false;
    }
}

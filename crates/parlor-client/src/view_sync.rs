//! Tells the hub which messages the actor has now seen.

use parlor_net::ConnectionHandle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct ViewSync {
    conn: ConnectionHandle,
}

impl ViewSync {
    pub fn new(conn: ConnectionHandle) -> Self {
        Self { conn }
    }

    /// Send one `MarkViewed` for a page load. Nothing is sent for an empty
    /// set. Failures are logged and dropped.
    pub fn report(&self, ids: Vec<i64>, counterpart: &str) -> Option<JoinHandle<()>> {
        if ids.is_empty() {
            return None;
        }
        let conn = self.conn.clone();
        let counterpart = counterpart.to_string();
        Some(tokio::spawn(async move {
            let count = ids.len();
            match conn.mark_viewed(ids, counterpart.clone()).await {
                Ok(()) => debug!(count, counterpart = %counterpart, "Marked messages viewed"),
                Err(e) => warn!(count, counterpart = %counterpart, error = %e, "Failed to mark messages viewed"),
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use parlor_net::connection::ConnectionConfig;
    use parlor_net::memory::MemoryConnector;
    use parlor_net::{ConnectionManager, StaticTokenProvider};
    use parlor_shared::protocol::HubFrame;
    use parlor_shared::types::ConnectionState;
    use serde_json::json;

    use super::*;

    fn config() -> ConnectionConfig {
        ConnectionConfig::new("http://localhost/hubs/chat".parse().unwrap())
    }

    #[tokio::test]
    async fn test_one_notification_per_page() {
        let (connector, mut hub) = MemoryConnector::pair();
        let tokens = Arc::new(StaticTokenProvider::new(None));
        let (manager, _rx) = ConnectionManager::spawn(config(), connector.clone(), tokens);
        let mut state = manager.handle().watch_state();
        state.wait_for(|s| s.is_connected()).await.unwrap();
        let mut link = hub.accept().await.unwrap();

        let sync = ViewSync::new(manager.handle());
        assert!(sync.report(Vec::new(), "bob").is_none());
        sync.report(vec![3, 4], "bob").unwrap().await.unwrap();

        let Some(HubFrame::Invocation { target, arguments }) = link.next_invocation().await else {
            panic!("expected MarkViewed");
        };
        assert_eq!(target, "MarkViewed");
        assert_eq!(arguments, vec![json!([3, 4]), json!("bob")]);
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_failure_is_swallowed() {
        let (connector, _hub) = MemoryConnector::pair();
        connector.fail_next(usize::MAX);
        let tokens = Arc::new(StaticTokenProvider::new(None));
        let mut config = config();
        config.retry_delays = vec![Duration::from_secs(3600)];
        let (manager, _rx) = ConnectionManager::spawn(config, connector.clone(), tokens);
        assert_ne!(manager.state(), ConnectionState::Connected);

        let sync = ViewSync::new(manager.handle());
        sync.report(vec![1], "bob").unwrap().await.unwrap();
        assert_eq!(connector.payloads_sent(), 0);
        manager.stop().await;
    }
}

// Real-time hub connection, transports and REST access for the chat panel.

pub mod api;
pub mod connection;
pub mod error;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod negotiate;
pub mod token;
pub mod transport;

pub use api::{ChatApi, HttpChatApi, JobStatusApi};
pub use connection::{ConnectionConfig, ConnectionHandle, ConnectionManager, ConnectionNotification};
pub use error::{NetError, Result};
pub use negotiate::Negotiation;
pub use token::{CookieTokenProvider, StaticTokenProvider, TokenProvider};
pub use transport::{HttpConnector, Transport, TransportConnector};

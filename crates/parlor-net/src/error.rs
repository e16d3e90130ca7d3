use parlor_shared::error::ProtocolError;
use parlor_shared::types::TransportKind;
use thiserror::Error;

/// Errors produced by the network layer.
#[derive(Error, Debug)]
pub enum NetError {
    /// HTTP request could not be sent or its body could not be read.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered with a non-success status.
    #[error("Unexpected status {status}: {body}")]
    UnexpectedStatus {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The hub advertised none of the transports this client is willing to use.
    #[error("No usable transport (tried {0:?})")]
    NoTransport(Vec<TransportKind>),

    /// A send was attempted while the connection is not in the `Connected` state.
    #[error("Not connected to the chat hub")]
    NotConnected,

    /// The transport or the connection task is gone.
    #[error("Connection closed")]
    Closed,

    #[error("Timed out: {0}")]
    Timeout(&'static str),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, NetError>;

use parlor_net::NetError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid URL in {name}: {source}")]
    InvalidUrl {
        name: &'static str,
        #[source]
        source: url::ParseError,
    },
}

/// Errors surfaced by the chat session.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Network error: {0}")]
    Net(#[from] NetError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("No conversation is open")]
    NoActiveConversation,

    #[error("Unknown counterpart: {0}")]
    UnknownCounterpart(String),

    /// The session task is gone.
    #[error("Chat session has stopped")]
    Stopped,
}

impl From<reqwest::Error> for SessionError {
    fn from(e: reqwest::Error) -> Self {
        Self::Net(NetError::Http(e))
    }
}

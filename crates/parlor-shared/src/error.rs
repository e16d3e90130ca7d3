use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed hub frame: {0}")]
    MalformedFrame(#[from] serde_json::Error),

    #[error("Hub frame is missing field `{0}`")]
    MissingField(&'static str),

    #[error("Invocation `{target}` carried unexpected arguments: {reason}")]
    BadArguments { target: String, reason: String },

    #[error("Handshake rejected by hub: {0}")]
    HandshakeRejected(String),

    #[error("Unknown transport: {0}")]
    UnknownTransport(String),
}

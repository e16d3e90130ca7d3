/// Application name
pub const APP_NAME: &str = "Parlor";

/// Number of messages per history page
pub const HISTORY_PAGE_SIZE: usize = 30;

/// Reserved message id of a message the server has not confirmed yet
pub const PENDING_MESSAGE_ID: i64 = 0;

/// Sender name shown on the actor's own optimistic messages
pub const OWN_SENDER_LABEL: &str = "You";

/// Hub protocol negotiated during the handshake
pub const HUB_PROTOCOL: &str = "json";
pub const HUB_PROTOCOL_VERSION: u32 = 1;

/// Negotiation protocol version sent as a query parameter
pub const NEGOTIATE_VERSION: u32 = 1;

/// Terminator of every hub text frame
pub const RECORD_SEPARATOR: char = '\u{1e}';

/// Hub method names
pub const HUB_SEND_MESSAGE: &str = "SendMessage";
pub const HUB_MARK_VIEWED: &str = "MarkViewed";
pub const HUB_RECEIVE_MESSAGE: &str = "ReceiveMessage";
pub const HUB_MESSAGE_SENT: &str = "MessageSent";

/// Delays between reconnection attempts, in milliseconds
pub const DEFAULT_RETRY_DELAYS_MS: [u64; 4] = [0, 2_000, 10_000, 30_000];

/// Keep-alive ping interval in seconds
pub const KEEP_ALIVE_INTERVAL_SECS: u64 = 15;

/// Silence after which the server is considered gone, in seconds
pub const SERVER_TIMEOUT_SECS: u64 = 30;

/// Upper bound on the handshake exchange, in seconds
pub const HANDSHAKE_TIMEOUT_SECS: u64 = 15;

/// Default interval between job status polls, in milliseconds
pub const DEFAULT_JOB_POLL_MS: u64 = 3_000;

/// Default name of the cookie holding the bearer token
pub const DEFAULT_TOKEN_COOKIE: &str = "access_token";

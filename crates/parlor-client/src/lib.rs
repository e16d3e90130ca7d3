pub mod config;
pub mod error;
pub mod events;
pub mod history;
pub mod jobs;
pub mod reconciler;
pub mod roster;
pub mod session;
pub mod state;
pub mod timeline;
pub mod view_sync;

use tracing_subscriber::{fmt, EnvFilter};

pub use config::ClientConfig;
pub use error::{ConfigError, SessionError};
pub use events::{SessionEvent, ToastLevel};
pub use session::ChatSession;

/// Install the global fmt subscriber. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("parlor_client=debug,parlor_net=debug,parlor_shared=info,warn")
    });

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .init();
}

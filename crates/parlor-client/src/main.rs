//! # parlor
//!
//! Terminal front end for the back-office chat panel. Session events are
//! printed as they arrive; stdin takes slash commands, and any other line is
//! sent to the open conversation.

use anyhow::Context;
use parlor_client::{ChatSession, ClientConfig, SessionEvent, ToastLevel};
use parlor_shared::constants::APP_NAME;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

const HELP: &str = "\
/users              reload the roster
/search <text>      filter the roster by name or role
/open <user>        open a conversation (username or id)
/older              load older messages
/block <user>       block or unblock a user
/job <video-id>     watch a video processing job
/quit               leave";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    parlor_client::init_tracing();
    info!("Starting {} v{}", APP_NAME, env!("CARGO_PKG_VERSION"));

    let config = ClientConfig::from_env();
    info!(
        api = %config.api_url,
        hub = %config.hub_url,
        user = %config.username,
        token_seeded = config.token.is_some(),
        "Loaded configuration"
    );

    let (session, mut events) =
        ChatSession::from_config(&config).context("failed to start the chat session")?;

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            print_event(&event);
        }
    });

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (cmd, arg) = match line.split_once(' ') {
            Some((cmd, arg)) => (cmd, arg.trim()),
            None => (line, ""),
        };
        let sent = match cmd {
            "/quit" => break,
            "/help" => {
                println!("{HELP}");
                Ok(())
            }
            "/users" => session.load_roster().await,
            "/search" => session.search(arg).await,
            "/open" => session.open(arg).await,
            "/older" => session.load_older().await,
            "/block" => session.toggle_block(arg).await,
            "/job" => session.watch_job(arg).await,
            _ => session.send(line).await,
        };
        sent.context("chat session stopped")?;
    }

    session.stop().await;
    printer.abort();
    info!("Bye");
    Ok(())
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::ConnectionStateChanged(state) => println!("[{}]", state.label()),
        SessionEvent::RosterChanged(roster) => {
            println!("-- conversations --");
            for c in roster {
                let unread = if c.unviewed_count > 0 {
                    format!(" ({} new)", c.unviewed_count)
                } else {
                    String::new()
                };
                let blocked = if c.active { "" } else { " [blocked]" };
                println!("  {} <{}> {}{}{}", c.name, c.username, c.role, unread, blocked);
            }
        }
        SessionEvent::TimelineChanged {
            counterpart,
            messages,
            has_more,
        } => {
            println!("-- {counterpart} --");
            if *has_more {
                println!("  (/older for earlier messages)");
            }
            for m in messages {
                let pending = if m.is_pending() { " …" } else { "" };
                println!(
                    "  {} {}: {}{}",
                    m.created_at.format("%H:%M"),
                    m.sender_name,
                    m.body,
                    pending
                );
            }
        }
        SessionEvent::ScrollToLatest => {}
        SessionEvent::Toast { level, message } => {
            let tag = match level {
                ToastLevel::Info => "info",
                ToastLevel::Success => "ok",
                ToastLevel::Error => "error",
            };
            println!("! {tag}: {message}");
        }
        SessionEvent::JobStatusChanged { job_id, status } => match status.progress {
            Some(progress) => println!("job {job_id}: {:?} {:.0}%", status.status, progress * 100.0),
            None => println!("job {job_id}: {:?}", status.status),
        },
    }
}

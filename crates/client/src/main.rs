// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! msync-tail: connects to a messaging server and prints client events.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::Parser;
use msync::{Client, ClientConfig, ClientEvent, MemoryStore, SharedStore, StaticSession};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// msync-tail: follow the event stream of a messaging session
#[derive(Parser, Debug)]
#[command(name = "msync-tail")]
#[command(about = "Connect to a messaging server and print sync events")]
struct Args {
    /// Path to the client configuration (TOML)
    #[arg(short, long)]
    config: PathBuf,

    /// Session token used for the socket and REST requests
    #[arg(long, env = "MSYNC_SESSION_TOKEN", hide_env_values = true)]
    session_token: String,

    /// Id of the authenticated user, used for read receipts
    #[arg(long)]
    user_id: Option<String>,

    /// Replay server events since this RFC 3339 timestamp once connected
    #[arg(long)]
    since: Option<DateTime<Utc>>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    setup_logging(args.verbose);

    if let Err(e) = run(args).await {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn setup_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(args: Args) -> msync::Result<()> {
    let config = ClientConfig::load(&args.config)?;
    let mut store = MemoryStore::new();
    if let Some(user_id) = args.user_id {
        store = store.with_session_user(user_id);
    }
    let store: SharedStore = store.shared();
    let client = Client::spawn(config, store, Arc::new(StaticSession::new(args.session_token)))?;

    let mut events = client.subscribe();
    client.start()?;
    info!("msync-tail started");

    let mut pending_replay = args.since;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => {
                    println!("{}\t{:?}", event.name(), event);
                    if matches!(event, ClientEvent::SocketConnected) {
                        if let Some(from) = pending_replay.take() {
                            let replayer = client.clone();
                            tokio::spawn(async move {
                                if let Err(e) = replayer.replay_events(from).await {
                                    warn!(error = %e, "replay failed");
                                }
                            });
                        }
                    }
                }
                Err(RecvError::Lagged(missed)) => warn!(missed, "event stream lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    client.shutdown()
}

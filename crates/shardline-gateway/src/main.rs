//! shardline entry point
//!
//! Run with:
//! ```bash
//! SHARDLINE_TOKEN=... cargo run -p shardline-gateway --bin shardline
//! ```
//!
//! Configuration is loaded from environment variables.

use std::sync::Arc;

use anyhow::Context;
use shardline_common::{try_init_tracing, ClientConfig};
use shardline_core::{ConnectionState, Event, ListenerError};
use shardline_gateway::GatewayClient;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    if let Err(e) = try_init_tracing() {
        eprintln!("Warning: Failed to initialize tracing: {e}");
    }

    if let Err(e) = run().await {
        error!(error = ?e, "shardline stopped with an error");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = ClientConfig::from_env().context("loading configuration")?;
    info!(
        app = %config.app.name,
        env = ?config.app.env,
        shards = ?config.shards.count,
        "Configuration loaded"
    );

    let client = GatewayClient::start(config)
        .await
        .context("starting the gateway client")?;
    client.add_listener(Arc::new(log_event));
    let mut events = client.subscribe();

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("listening for ctrl-c")?;
            info!("Ctrl-C received");
        }
        () = wait_for_fatal(&mut events, client.shard_count()) => {
            warn!("Every shard stopped");
        }
    }

    client.shutdown().await;
    Ok(())
}

/// Resolve once every shard has shut down on its own
async fn wait_for_fatal(events: &mut broadcast::Receiver<Event>, shards: u32) {
    let mut stopped = std::collections::HashSet::new();
    loop {
        match events.recv().await {
            Ok(Event::Shutdown { shard, .. }) => {
                stopped.insert(shard.id);
                if stopped.len() >= shards as usize {
                    return;
                }
            }
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

fn log_event(event: &Event) -> Result<(), ListenerError> {
    match event {
        Event::Ready {
            shard,
            user,
            guilds,
            unavailable_guilds,
        } => info!(
            shard = %shard,
            user = user.as_ref().map_or("?", |u| u.username.as_str()),
            guilds,
            unavailable_guilds,
            "Shard ready"
        ),
        Event::Resumed { shard, replayed } => info!(shard = %shard, replayed, "Shard resumed"),
        Event::StatusChanged { shard, new, .. } if *new == ConnectionState::LoginFailed => {
            error!(shard = %shard, "Login failed, check SHARDLINE_TOKEN");
        }
        Event::Shutdown {
            shard,
            code,
            reason,
        } => warn!(shard = %shard, code = ?code, reason = %reason, "Shard stopped"),
        other => tracing::debug!(shard = %other.shard(), event = other.name(), "Event"),
    }
    Ok(())
}

//! atrium-sync-server binary
//!
//! Starts the sync service and serves the WebSocket endpoints
//! (`/rooms/{id}/sync`, `/rooms/{id}/presence`).
//!
//! ## Configuration (env / TOML via `config` crate)
//!
//! | Key                     | Default           | Description                      |
//! |-------------------------|-------------------|----------------------------------|
//! | `SYNC_BIND`             | `127.0.0.1:9090`  | Listen address                   |
//! | `SYNC_CONFIG`           | *(none)*          | Optional TOML file for `SyncConfig` |
//! | `SYNC_ROOMS`            | *(none)*          | Comma-separated static room ids; empty = auto-provision |
//! | `SYNC_ROOM_CAPACITY`    | `64`              | Member capacity per room         |
//! | `SYNC_IDLE_GRACE_SECS`  | `30`              | Silence before implicit leave    |
//! | `SYNC_ECHO_CHAT`        | `false`           | Echo chat back to its sender     |

use anyhow::{Context, Result};
use atrium_sync::{
    gateway::{OpenAuth, OpenDirectory, RoomDirectory, RoomGateway, StaticDirectory},
    server::SyncServer,
    types::SyncConfig,
};
use clap::Parser;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "atrium-sync-server", about = "Atrium Sync Service", version)]
struct Args {
    /// Listen address for the WebSocket front-end
    #[arg(long, env = "SYNC_BIND", default_value = "127.0.0.1:9090")]
    bind: String,

    /// Optional TOML file overriding the default SyncConfig
    #[arg(long, env = "SYNC_CONFIG")]
    config: Option<String>,

    /// Comma-separated static room ids; when empty, any room id is
    /// auto-provisioned on first join
    #[arg(long, env = "SYNC_ROOMS", default_value = "")]
    rooms: String,

    /// Member capacity per room
    #[arg(long, env = "SYNC_ROOM_CAPACITY", default_value_t = 64)]
    room_capacity: usize,

    /// Seconds of silence before a session is treated as an implicit leave
    #[arg(long, env = "SYNC_IDLE_GRACE_SECS", default_value_t = 30)]
    idle_grace_secs: u64,

    /// Echo chat messages back to their sender through the broadcast path
    #[arg(long, env = "SYNC_ECHO_CHAT", default_value_t = false)]
    echo_chat: bool,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("atrium_sync=debug".parse()?),
        )
        .init();

    let args = Args::parse();

    // Base config: TOML file when given, defaults otherwise; CLI wins for
    // the knobs it exposes.
    let mut sync_config = match &args.config {
        Some(path) => config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()
            .with_context(|| format!("Failed to read config file '{path}'"))?
            .try_deserialize::<SyncConfig>()
            .context("Invalid SyncConfig")?,
        None => SyncConfig::default(),
    };
    sync_config.idle_grace_secs = args.idle_grace_secs;
    sync_config.echo_chat = args.echo_chat;
    sync_config.default_room_capacity = args.room_capacity;

    log::info!(
        "Starting atrium-sync-server (bind='{}', rooms='{}', capacity={}, idle_grace={}s)",
        args.bind,
        if args.rooms.is_empty() { "<auto>" } else { &args.rooms },
        args.room_capacity,
        args.idle_grace_secs,
    );

    // Room directory: static table when ids were given, open otherwise.
    let directory: Arc<dyn RoomDirectory> = if args.rooms.is_empty() {
        Arc::new(OpenDirectory {
            capacity: args.room_capacity,
        })
    } else {
        let mut dir = StaticDirectory::new();
        for room_id in args.rooms.split(',').filter(|s| !s.is_empty()) {
            dir = dir.with_room(room_id.trim(), args.room_capacity);
        }
        Arc::new(dir)
    };

    let gateway = Arc::new(RoomGateway::new(sync_config, Arc::new(OpenAuth), directory));
    let server = SyncServer::new(args.bind, gateway);

    // Run until shutdown
    tokio::select! {
        result = server.run() => {
            log::error!("Server loop exited unexpectedly");
            result
        }
        _ = tokio::signal::ctrl_c() => {
            log::info!("atrium-sync-server shutting down (SIGINT)");
            Ok(())
        }
    }
}

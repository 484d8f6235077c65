//! TideKV - A single-threaded in-memory key-value server
//!
//! Entry point: parses flags, loads the snapshot, runs the reactor until
//! Ctrl+C, then writes the snapshot back.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::thread;
use tidekv::reactor::ShutdownHandle;
use tidekv::{Config, Server};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tidekv")]
#[command(version = tidekv::VERSION)]
#[command(about = "In-memory key-value server speaking RESP", long_about = None)]
struct Args {
    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = 6379)]
    port: u16,

    /// Snapshot file read at startup and written on SAVE and at exit
    #[arg(short, long, default_value = tidekv::config::DEFAULT_DUMP_FILE)]
    dump_file: PathBuf,

    /// Start with an empty store even if the snapshot file exists
    #[arg(long)]
    no_load: bool,
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Config {
            host: args.host,
            port: args.port,
            dump_path: args.dump_file,
            load_snapshot: !args.no_load,
            ..Config::default()
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .init();

    let config = Config::from(Args::parse());
    info!("TideKV v{}", tidekv::VERSION);

    let storage = tidekv::server::open_storage(&config)
        .with_context(|| format!("failed to load {}", config.dump_path.display()))?;
    let mut server = Server::bind(&config, storage)
        .with_context(|| format!("failed to start server on {}", config.bind_address()))?;

    spawn_signal_listener(server.shutdown_handle())?;

    server.run().context("event loop failed")?;

    let storage = server.into_storage();
    storage
        .save(&config.dump_path)
        .with_context(|| format!("failed to write {}", config.dump_path.display()))?;
    info!(
        path = %config.dump_path.display(),
        keys = storage.len(),
        "Snapshot written, shutdown complete"
    );
    Ok(())
}

/// Waits for Ctrl+C on a helper thread and stops the reactor.
fn spawn_signal_listener(handle: ShutdownHandle) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build signal runtime")?;

    thread::Builder::new()
        .name("tidekv-signal".into())
        .spawn(move || {
            if let Err(e) = runtime.block_on(tokio::signal::ctrl_c()) {
                error!("Failed to listen for Ctrl+C: {}", e);
                return;
            }
            info!("Shutdown signal received, stopping server...");
            if let Err(e) = handle.shutdown() {
                warn!("Failed to wake the event loop: {}", e);
            }
        })
        .context("failed to spawn signal thread")?;
    Ok(())
}

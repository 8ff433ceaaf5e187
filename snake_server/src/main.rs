//! Standalone relay binary.
//!
//! Usage:
//!   cargo run -p snake_server -- [--addr 127.0.0.1:5570] [--poll-ms 1] [--config relay.json]
//!
//! Runs the relay without a local world: peers are not seeded, and every
//! batch a peer sends is forwarded to all other peers.

use std::env;
use std::path::PathBuf;

use anyhow::Context;
use snake_server::spawn_relay;
use snake_shared::config::SyncConfig;
use tracing::info;

fn parse_args() -> anyhow::Result<SyncConfig> {
    let args: Vec<String> = env::args().collect();
    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => SyncConfig::from_file(&PathBuf::from(&args[i + 1]))?,
        _ => SyncConfig::default(),
    };
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--poll-ms" if i + 1 < args.len() => {
                cfg.relay_poll_ms = args[i + 1].parse().unwrap_or(1);
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    info!(addr = %cfg.server_addr, poll_ms = cfg.relay_poll_ms, "Starting relay");

    let addr = cfg.server_addr.parse().context("parse server_addr")?;
    let handle = spawn_relay(addr, None, cfg.relay_poll_interval()).await?;
    info!(local = %handle.local_addr(), "Relay ready");

    handle.join().await
}

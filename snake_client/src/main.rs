//! Game client binary.
//!
//! Usage:
//!   cargo run -p snake_client -- [--addr 127.0.0.1:5570] [--host] [--tick-hz 60] [--config game.json] [--ticks N]
//!
//! With `--host` the process also runs the relay on `--addr`, seeds joining
//! peers from its own world and scatters food. Without it the client joins
//! the relay at `--addr`.
//!
//! Rendering and audio are outside this crate: the loop logs sounds and
//! reads steering from stdin.
//!
//! Console commands:
//!   w / a / s / d  - Steer up / left / down / right
//!   status         - Show session status
//!   quit           - Exit

use std::env;
use std::io::{BufRead, Write};
use std::path::PathBuf;

use anyhow::Context;
use snake_client::input::{parse_direction, InputState};
use snake_client::Synchronizer;
use snake_server::spawn_hosted_relay;
use snake_shared::config::SyncConfig;
use tokio::sync::mpsc;
use tracing::{error, info};

struct Args {
    cfg: SyncConfig,
    host: bool,
    ticks: Option<u64>,
}

fn parse_args() -> anyhow::Result<Args> {
    let args: Vec<String> = env::args().collect();
    let cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => SyncConfig::from_file(&PathBuf::from(&args[i + 1]))?,
        _ => SyncConfig::default(),
    };
    let mut out = Args {
        cfg,
        host: false,
        ticks: None,
    };
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                out.cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--tick-hz" if i + 1 < args.len() => {
                out.cfg.tick_hz = args[i + 1].parse().unwrap_or(60);
                i += 2;
            }
            "--ticks" if i + 1 < args.len() => {
                out.ticks = args[i + 1].parse().ok();
                i += 2;
            }
            "--host" => {
                out.host = true;
                i += 1;
            }
            _ => i += 1,
        }
    }
    Ok(out)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let Args { cfg, host, ticks } = parse_args()?;
    info!(addr = %cfg.server_addr, host, tick_hz = cfg.tick_hz, "Starting client");

    let mut sync = Synchronizer::new(&cfg);
    let addr = cfg.server_addr.parse().context("parse server_addr")?;

    let relay = if host {
        let seed = sync.publish_seed()?;
        let (handle, local) = spawn_hosted_relay(addr, seed, cfg.relay_poll_interval()).await?;
        info!(local = %handle.local_addr(), "Hosting");
        sync.attach(local);
        sync.spawn_food(&cfg)?;
        Some(handle)
    } else {
        sync.connect(addr).await?;
        None
    };

    sync.spawn_local_head(cfg.spawn_rect())?;

    // Set up console input channel.
    let (console_tx, mut console_rx) = mpsc::channel::<String>(32);

    // Spawn stdin reader thread.
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("] ");
            let _ = stdout.flush();
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("Type w/a/s/d to steer, 'status' for info, 'quit' to exit.");
    println!();

    let tick_interval = cfg.tick_interval();
    let mut next_tick = tokio::time::Instant::now();
    let mut input = InputState::default();

    loop {
        while let Ok(line) = console_rx.try_recv() {
            match line.as_str() {
                "quit" | "exit" => {
                    if let Some(handle) = relay {
                        handle.shutdown();
                    }
                    return Ok(());
                }
                "status" => {
                    println!("Session: {:?}", sync.state());
                    println!("Peer: {}", sync.peer_id);
                    println!("Tick: {}", sync.tick_count());
                    println!("Entities: {}", sync.world().len());
                }
                other => match parse_direction(other) {
                    Some(dir) => input.press(dir),
                    None => println!("Unknown command: {other}"),
                },
            }
        }

        if let Some(dir) = input.take() {
            sync.steer(dir);
        }

        if let Err(e) = sync.tick().await {
            error!(error = %e, "Session ended");
            break;
        }

        for sound in sync.take_sounds() {
            info!(%sound, "Play sound");
        }

        if ticks.is_some_and(|limit| sync.tick_count() >= limit) {
            break;
        }

        next_tick += tick_interval;
        tokio::time::sleep_until(next_tick).await;
    }

    if let Some(handle) = relay {
        handle.shutdown();
    }
    Ok(())
}

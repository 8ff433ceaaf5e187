//! Shared helpers for the socket-level tests.

use std::{net::SocketAddr, time::Duration};

use bytes::Bytes;
use snake_client::Synchronizer;
use snake_server::{spawn_hosted_relay, spawn_relay, RelayHandle, SeedRx};
use snake_shared::net::FramedTransport;

/// Relay poll interval used by the tests.
pub const TEST_POLL: Duration = Duration::from_millis(1);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

/// Starts a relay on an ephemeral loopback port.
pub async fn spawn_ephemeral_relay(seed: Option<SeedRx>) -> anyhow::Result<RelayHandle> {
    let addr: SocketAddr = "127.0.0.1:0".parse()?;
    spawn_relay(addr, seed, TEST_POLL).await
}

/// Starts a relay on an ephemeral loopback port with `host` attached
/// in-process as its seed source.
pub async fn spawn_ephemeral_host(host: &mut Synchronizer) -> anyhow::Result<RelayHandle> {
    let addr: SocketAddr = "127.0.0.1:0".parse()?;
    let seed = host.publish_seed()?;
    let (handle, local) = spawn_hosted_relay(addr, seed, TEST_POLL).await?;
    host.attach(local);
    Ok(handle)
}

/// Polls `conn` until a frame arrives or `within` elapses.
pub async fn recv_within<T: FramedTransport + ?Sized>(
    conn: &mut T,
    within: Duration,
) -> anyhow::Result<Option<Bytes>> {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if let Some(frame) = conn.try_recv_frame()? {
            return Ok(Some(frame));
        }
        if tokio::time::Instant::now() >= deadline {
            return Ok(None);
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

/// Ticks every synchronizer in turn until `done` holds, up to `max_ticks`
/// rounds. Returns whether `done` was reached.
pub async fn tick_until<F>(
    syncs: &mut [&mut Synchronizer],
    max_ticks: usize,
    mut done: F,
) -> anyhow::Result<bool>
where
    F: FnMut(&[&mut Synchronizer]) -> bool,
{
    for _ in 0..max_ticks {
        for sync in syncs.iter_mut() {
            sync.tick().await?;
        }
        if done(syncs) {
            return Ok(true);
        }
        tokio::time::sleep(Duration::from_millis(3)).await;
    }
    Ok(false)
}

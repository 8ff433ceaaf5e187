//! `snake_server`
//!
//! Relay role:
//! - Accepts peer connections on a TCP listener task
//! - Seeds each new peer with the current world
//! - Forwards every peer's batch verbatim to every other peer
//!
//! The relay holds no world of its own; it only touches its peer list.

pub mod listener;
pub mod relay;

use std::{net::SocketAddr, time::Duration};

use snake_shared::net::MemoryTransport;
use tokio::{sync::mpsc, task::JoinHandle};

pub use listener::PeerListener;
pub use relay::{IncomingPeer, PassStats, Relay, SeedRx};

/// Running relay tasks.
pub struct RelayHandle {
    local_addr: SocketAddr,
    acceptor: JoinHandle<()>,
    relay: JoinHandle<()>,
}

impl RelayHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Waits for the relay loop to finish.
    pub async fn join(self) -> anyhow::Result<()> {
        let result = self.relay.await;
        self.acceptor.abort();
        Ok(result?)
    }

    pub fn shutdown(self) {
        self.acceptor.abort();
        self.relay.abort();
    }
}

/// Binds `addr` and spawns the acceptor and relay tasks.
pub async fn spawn_relay(
    addr: SocketAddr,
    seed: Option<SeedRx>,
    poll: Duration,
) -> anyhow::Result<RelayHandle> {
    start(addr, seed, None, poll).await
}

/// Like [`spawn_relay`], for a host that runs the relay in-process. Returns
/// the host's end of an in-memory connection that is already admitted and
/// never seeded; the host's synchronizer publishes `seed`.
pub async fn spawn_hosted_relay(
    addr: SocketAddr,
    seed: SeedRx,
    poll: Duration,
) -> anyhow::Result<(RelayHandle, MemoryTransport)> {
    let (host_end, relay_end) = MemoryTransport::pair("host", "relay");
    let relay_end: IncomingPeer = Box::new(relay_end);
    let handle = start(addr, Some(seed), Some(relay_end), poll).await?;
    Ok((handle, host_end))
}

async fn start(
    addr: SocketAddr,
    seed: Option<SeedRx>,
    local: Option<IncomingPeer>,
    poll: Duration,
) -> anyhow::Result<RelayHandle> {
    let listener = PeerListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    let (tx, rx) = mpsc::channel(16);

    let mut relay = Relay::new(rx, seed);
    if let Some(conn) = local {
        relay.add_local_peer(conn);
    }
    let acceptor = tokio::spawn(listener.accept_loop(tx));
    let relay = tokio::spawn(relay.run(poll));
    tracing::info!(%local_addr, "Relay listening");

    Ok(RelayHandle {
        local_addr,
        acceptor,
        relay,
    })
}

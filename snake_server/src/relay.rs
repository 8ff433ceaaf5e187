//! Relay implementation.
//!
//! The relay is a pure fan-out broadcaster. It never parses, validates or
//! rewrites a batch: whatever one peer sends is forwarded byte-for-byte to
//! every other connected peer, never back to the sender. Ownership checks
//! belong to senders and receivers.
//!
//! New peers are seeded with one `create` per entity of the seed source, an
//! encoded batch published by the co-hosted synchronizer. A standalone relay
//! has no seed source and seeds nothing.
//!
//! Each polling pass:
//! - admits at most one new connection,
//! - takes at most one pending batch per peer and forwards it,
//! - drops peers whose I/O failed, after the pass.

use std::time::Duration;

use bytes::Bytes;
use snake_shared::net::FramedTransport;
use tokio::{
    sync::{mpsc, watch},
    time::Instant,
};
use tracing::{debug, info, warn};

/// Shortest interval between polling passes.
pub const MIN_POLL: Duration = Duration::from_millis(1);

/// Latest encoded seed batch, `None` while the world is empty.
pub type SeedRx = watch::Receiver<Option<Bytes>>;

/// A connection handed to the relay by an acceptor.
pub type IncomingPeer = Box<dyn FramedTransport>;

struct Peer {
    slot: u64,
    conn: IncomingPeer,
}

/// Counters for one polling pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassStats {
    pub accepted: usize,
    pub forwarded: usize,
    pub dropped: usize,
}

pub struct Relay {
    peers: Vec<Peer>,
    incoming: mpsc::Receiver<IncomingPeer>,
    seed: Option<SeedRx>,
    next_slot: u64,
    acceptor_gone: bool,
}

impl Relay {
    pub fn new(incoming: mpsc::Receiver<IncomingPeer>, seed: Option<SeedRx>) -> Self {
        Self {
            peers: Vec::new(),
            incoming,
            seed,
            next_slot: 1,
            acceptor_gone: false,
        }
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Runs polling passes every `interval` (at least [`MIN_POLL`]) until the
    /// acceptor is gone and the last peer has left.
    pub async fn run(mut self, interval: Duration) {
        let interval = interval.max(MIN_POLL);
        let mut next = Instant::now();
        loop {
            let stats = self.poll_once().await;
            if stats.dropped > 0 {
                debug!(dropped = stats.dropped, peers = self.peers.len(), "Peers dropped");
            }
            if self.acceptor_gone && self.peers.is_empty() {
                info!("Relay stopping: no acceptor and no peers");
                break;
            }
            next += interval;
            tokio::time::sleep_until(next).await;
        }
    }

    /// Executes one polling pass.
    pub async fn poll_once(&mut self) -> PassStats {
        let mut stats = PassStats::default();

        match self.incoming.try_recv() {
            Ok(conn) => {
                if self.admit(conn).await {
                    stats.accepted += 1;
                }
            }
            Err(mpsc::error::TryRecvError::Empty) => {}
            Err(mpsc::error::TryRecvError::Disconnected) => self.acceptor_gone = true,
        }

        let mut dead = vec![false; self.peers.len()];
        for i in 0..self.peers.len() {
            if dead[i] {
                continue;
            }
            let frame = match self.peers[i].conn.try_recv_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => continue,
                Err(e) => {
                    warn!(peer = %self.peers[i].conn.label(), error = %e, "Receive failed, dropping peer");
                    dead[i] = true;
                    continue;
                }
            };

            for j in 0..self.peers.len() {
                if j == i || dead[j] {
                    continue;
                }
                // Bytes clones share the buffer, so every peer gets the
                // sender's exact bytes.
                match self.peers[j].conn.send_frame(frame.clone()).await {
                    Ok(()) => stats.forwarded += 1,
                    Err(e) => {
                        warn!(peer = %self.peers[j].conn.label(), error = %e, "Send failed, dropping peer");
                        dead[j] = true;
                    }
                }
            }
        }

        let mut index = 0;
        self.peers.retain(|peer| {
            let keep = !dead[index];
            index += 1;
            if !keep {
                info!(slot = peer.slot, peer = %peer.conn.label(), "Peer disconnected");
            }
            keep
        });
        stats.dropped = dead.iter().filter(|d| **d).count();
        stats
    }

    async fn admit(&mut self, mut conn: IncomingPeer) -> bool {
        let seed = self.seed.as_ref().and_then(|rx| rx.borrow().clone());
        if let Some(batch) = seed {
            let len = batch.len();
            if let Err(e) = conn.send_frame(batch).await {
                warn!(peer = %conn.label(), error = %e, "Seeding failed, peer not admitted");
                return false;
            }
            debug!(peer = %conn.label(), bytes = len, "Sent seed batch");
        }

        self.register(conn);
        true
    }

    /// Adds the co-hosted peer. It is the seed source, so it is never seeded.
    pub fn add_local_peer(&mut self, conn: IncomingPeer) {
        self.register(conn);
    }

    fn register(&mut self, conn: IncomingPeer) {
        let slot = self.next_slot;
        self.next_slot += 1;
        info!(slot, peer = %conn.label(), peers = self.peers.len() + 1, "Peer connected");
        self.peers.push(Peer { slot, conn });
    }
}

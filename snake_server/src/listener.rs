//! TCP acceptor.
//!
//! Accepting runs on its own task and hands each framed connection to the
//! relay over a channel, so the relay pass never waits on `accept`.

use std::net::SocketAddr;

use anyhow::Context;
use snake_shared::net::FramedConn;
use tokio::{net::TcpListener, sync::mpsc};
use tracing::{debug, warn};

use crate::relay::IncomingPeer;

/// TCP listener feeding the relay.
pub struct PeerListener {
    listener: TcpListener,
}

impl PeerListener {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await.context("tcp bind")?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts until the relay side of the channel is dropped.
    pub async fn accept_loop(self, tx: mpsc::Sender<IncomingPeer>) {
        loop {
            let (stream, addr) = match self.listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    continue;
                }
            };
            let conn = match FramedConn::new(stream) {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(%addr, error = %e, "Could not set up connection");
                    continue;
                }
            };
            debug!(%addr, "Accepted connection");
            if tx.send(Box::new(conn)).await.is_err() {
                break;
            }
        }
    }
}

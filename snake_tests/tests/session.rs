//! Two synchronizers talking through a TCP relay.

use std::time::Duration;

use bytes::Bytes;
use snake_client::{SessionState, Synchronizer};
use snake_shared::{
    config::SyncConfig,
    entity::EntityKind,
    math::Rect,
    net::{FramedConn, FramedTransport},
    sim::Direction,
};
use snake_tests::{init_tracing, spawn_ephemeral_host, spawn_ephemeral_relay, tick_until};

const ROUNDS: usize = 200;

fn cfg() -> SyncConfig {
    SyncConfig {
        move_interval_ticks: 1,
        food_count: 3,
        ..Default::default()
    }
}

/// Host seeds a joining peer, then both sides see each other's changes.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn joiner_is_seeded_and_updates_flow_both_ways() -> anyhow::Result<()> {
    init_tracing();
    let cfg = cfg();

    let mut host = Synchronizer::new(&cfg);
    let relay = spawn_ephemeral_host(&mut host).await?;
    host.spawn_food(&cfg)?;
    let host_head = host.spawn_local_head(Rect::new(300, 300, 20, 20))?;
    let report = host.tick().await?;
    assert_eq!(report.sent, 4);

    let mut joiner = Synchronizer::new(&cfg);
    joiner.connect(relay.local_addr()).await?;
    assert_eq!(joiner.state(), SessionState::AwaitingInitialSync);

    let seeded = tick_until(&mut [&mut host, &mut joiner], ROUNDS, |s| {
        s[1].state() == SessionState::Synchronized && s[1].world().len() == 4
    })
    .await?;
    assert!(seeded, "joiner never received the seed");
    assert_eq!(host.state(), SessionState::AwaitingInitialSync);
    let foods = joiner
        .world()
        .entities()
        .filter(|e| e.kind() == EntityKind::Food)
        .count();
    assert_eq!(foods, 3);
    assert!(joiner.world().owned_ids(&joiner.peer_id).is_empty());

    // Joiner's head reaches the host and is not simulated there.
    let joiner_head = joiner.spawn_local_head(Rect::new(600, 600, 20, 20))?;
    let seen = tick_until(&mut [&mut joiner, &mut host], ROUNDS, |s| {
        s[1].world().contains(&joiner_head)
    })
    .await?;
    assert!(seen, "host never saw the joiner's head");
    assert!(!host.world().owned_ids(&host.peer_id).contains(&joiner_head));

    // Host steering shows up on the joiner.
    assert!(host.steer(Direction::Right));
    let moved = tick_until(&mut [&mut host, &mut joiner], ROUNDS, |s| {
        s[1].world()
            .get(&host_head)
            .is_some_and(|h| h.rect.x > 300)
    })
    .await?;
    assert!(moved, "joiner never saw the host head move");

    relay.shutdown();
    Ok(())
}

/// A stray delete for an id nobody has is harmless.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_delete_is_ignored() -> anyhow::Result<()> {
    init_tracing();
    let cfg = cfg();
    let relay = spawn_ephemeral_relay(None).await?;

    let mut peer = Synchronizer::new(&cfg);
    peer.connect(relay.local_addr()).await?;
    peer.spawn_local_head(Rect::new(0, 0, 20, 20))?;
    peer.tick().await?;

    let mut stray = FramedConn::connect(relay.local_addr()).await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    stray
        .send_frame(Bytes::from_static(
            br#"[{"update_type":"delete","entity_type":null,"entity_id":"ghost","data":null}]"#,
        ))
        .await?;

    let synced = tick_until(&mut [&mut peer], ROUNDS, |s| {
        s[0].state() == SessionState::Synchronized
    })
    .await?;
    assert!(synced);
    assert_eq!(peer.world().len(), 1);
    assert!(peer.local_head().is_some());

    relay.shutdown();
    Ok(())
}

/// Closing the relay ends the session instead of hanging it.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn relay_shutdown_disconnects_peer() -> anyhow::Result<()> {
    init_tracing();
    let relay = spawn_ephemeral_relay(None).await?;
    let mut peer = Synchronizer::new(&cfg());
    peer.connect(relay.local_addr()).await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    relay.shutdown();

    let mut failed = false;
    for _ in 0..ROUNDS {
        if peer.tick().await.is_err() {
            failed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(failed, "expected the closed connection to surface");
    assert_eq!(peer.state(), SessionState::Disconnected);
    Ok(())
}

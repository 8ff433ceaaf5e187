//! Synchronizer: the client role of the sync protocol.
//!
//! One call to [`Synchronizer::tick`] runs, in order:
//! 1. clear this tick's outgoing and sound queues,
//! 2. apply at most one inbound batch, message by message,
//! 3. simulate every owned entity not marked for deletion,
//! 4. remove entities marked for deletion,
//! 5. send the outgoing queue as one batch, if it is non-empty.
//!
//! A tick with nothing to say sends nothing. A transport failure ends the
//! session; there is no reconnect.

use std::net::SocketAddr;

use anyhow::Context;
use bytes::Bytes;
use snake_shared::{
    config::SyncConfig,
    entity::{Entity, EntityId, PeerId},
    math::Rect,
    message::{decode_batch, encode_batch},
    net::{FramedConn, FramedTransport},
    sim::{Direction, SimRules},
    world::WorldState,
};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No connection, or the connection failed.
    Disconnected,
    /// Connected; no batch received yet.
    AwaitingInitialSync,
    /// At least one batch received.
    Synchronized,
}

/// What one tick did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    /// Messages decoded from the inbound batch.
    pub received: usize,
    /// Messages that applied cleanly.
    pub applied: usize,
    /// Messages sent in the outgoing batch.
    pub sent: usize,
}

pub struct Synchronizer {
    pub peer_id: PeerId,
    state: SessionState,
    world: WorldState,
    conn: Option<Box<dyn FramedTransport>>,
    rules: SimRules,
    cell_size: i32,
    tick: u64,
    local_head: Option<EntityId>,
    seed_tx: Option<watch::Sender<Option<Bytes>>>,
}

impl Synchronizer {
    pub fn new(cfg: &SyncConfig) -> Self {
        Self {
            peer_id: PeerId::new_unique(),
            state: SessionState::Disconnected,
            world: WorldState::new(),
            conn: None,
            rules: cfg.sim_rules(),
            cell_size: cfg.cell_size,
            tick: 0,
            local_head: None,
            seed_tx: None,
        }
    }

    /// Connects to a relay over TCP.
    pub async fn connect(&mut self, addr: SocketAddr) -> anyhow::Result<()> {
        info!(relay = %addr, peer_id = %self.peer_id, "Connecting to relay");
        let conn = FramedConn::connect(addr)
            .await
            .with_context(|| format!("connect to relay {addr}"))?;
        self.attach(conn);
        Ok(())
    }

    /// Uses an already established connection.
    pub fn attach<T: FramedTransport + 'static>(&mut self, conn: T) {
        info!(relay = %conn.label(), "Connected, awaiting initial sync");
        self.conn = Some(Box::new(conn));
        self.state = SessionState::AwaitingInitialSync;
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn world(&self) -> &WorldState {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut WorldState {
        &mut self.world
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn local_head(&self) -> Option<&EntityId> {
        self.local_head.as_ref()
    }

    /// Starts publishing seed batches for a co-hosted relay.
    pub fn publish_seed(&mut self) -> anyhow::Result<watch::Receiver<Option<Bytes>>> {
        let (tx, rx) = watch::channel(None);
        self.seed_tx = Some(tx);
        self.refresh_seed()?;
        Ok(rx)
    }

    fn refresh_seed(&self) -> anyhow::Result<()> {
        let Some(tx) = &self.seed_tx else {
            return Ok(());
        };
        let seed = if self.world.is_empty() {
            None
        } else {
            Some(encode_batch(&self.world.seed_batch()?)?)
        };
        tx.send_replace(seed);
        Ok(())
    }

    /// Spawns the local snake head, announced with the next batch.
    pub fn spawn_local_head(&mut self, rect: Rect) -> anyhow::Result<EntityId> {
        let head = Entity::head(rect, Some(self.peer_id.clone()));
        let id = self.world.spawn(head)?;
        info!(%id, "Spawned local head");
        self.local_head = Some(id.clone());
        Ok(id)
    }

    /// Spawns unowned food on random cells. Host only.
    pub fn spawn_food(&mut self, cfg: &SyncConfig) -> anyhow::Result<Vec<EntityId>> {
        let mut rng = rand::thread_rng();
        let ids = self
            .world
            .scatter_food(&mut rng, cfg.food_count, cfg.arena, cfg.cell_size)?;
        debug!(count = ids.len(), "Spawned food");
        Ok(ids)
    }

    /// Sets the local head's desired direction for coming ticks. Returns
    /// false when there is no local head.
    pub fn steer(&mut self, dir: Direction) -> bool {
        let velocity = dir.velocity(self.cell_size);
        let Some(steering) = self
            .local_head
            .as_ref()
            .and_then(|id| self.world.get_mut(id))
            .and_then(|head| head.steering_mut())
        else {
            return false;
        };
        steering.desired = velocity;
        true
    }

    /// Sounds queued this tick, for the audio side.
    pub fn take_sounds(&mut self) -> Vec<String> {
        self.world.take_sounds()
    }

    /// Runs one tick.
    pub async fn tick(&mut self) -> anyhow::Result<TickReport> {
        let mut report = TickReport::default();
        self.world.begin_tick();

        if let Err(e) = self.receive(&mut report) {
            self.disconnect(&e);
            return Err(e);
        }

        for id in self.world.owned_ids(&self.peer_id) {
            if let Err(e) = self.world.simulate(&id, self.tick, &self.rules) {
                warn!(%id, error = %e, "Simulation step failed");
            }
        }

        self.world.finish_tick(Some(&self.peer_id));
        if self
            .local_head
            .as_ref()
            .is_some_and(|id| !self.world.contains(id))
        {
            info!("Local head removed");
            self.local_head = None;
        }

        // Published before sending so the seed covers every batch in flight.
        if report.applied > 0 || !self.world.outgoing().is_empty() {
            self.refresh_seed()?;
        }

        if !self.world.outgoing().is_empty() {
            if let Some(conn) = self.conn.as_mut() {
                let batch = encode_batch(self.world.outgoing())?;
                if let Err(e) = conn.send_frame(batch).await.context("send batch") {
                    self.disconnect(&e);
                    return Err(e);
                }
                report.sent = self.world.outgoing().len();
            }
        }

        self.tick += 1;
        Ok(report)
    }

    fn receive(&mut self, report: &mut TickReport) -> anyhow::Result<()> {
        let Some(conn) = self.conn.as_mut() else {
            return Ok(());
        };
        let Some(frame) = conn.try_recv_frame().context("receive batch")? else {
            return Ok(());
        };

        if self.state == SessionState::AwaitingInitialSync {
            info!(bytes = frame.len(), "Initial sync received");
            self.state = SessionState::Synchronized;
        }

        match decode_batch(&frame) {
            Ok(msgs) => {
                report.received = msgs.len();
                report.applied = self.world.apply_batch(&msgs);
            }
            Err(e) => warn!(error = %e, "Dropped undecodable batch"),
        }
        Ok(())
    }

    fn disconnect(&mut self, cause: &anyhow::Error) {
        warn!(error = %cause, "Transport failed, session over");
        self.conn = None;
        self.state = SessionState::Disconnected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use snake_shared::{
        message::{Update, UpdateMessage, UpdateType},
        net::MemoryTransport,
    };
    use std::sync::{Arc, Mutex};

    /// Records what the relay would seed a newcomer with at the moment each
    /// batch leaves.
    struct SeedAtSend {
        seed: watch::Receiver<Option<Bytes>>,
        log: Arc<Mutex<Vec<(Bytes, Option<Bytes>)>>>,
    }

    #[async_trait]
    impl FramedTransport for SeedAtSend {
        async fn send_frame(&mut self, frame: Bytes) -> anyhow::Result<()> {
            let seed = self.seed.borrow().clone();
            self.log.lock().unwrap().push((frame, seed));
            Ok(())
        }

        fn try_recv_frame(&mut self) -> anyhow::Result<Option<Bytes>> {
            Ok(None)
        }

        fn label(&self) -> String {
            "seed-at-send".into()
        }
    }

    fn cfg() -> SyncConfig {
        SyncConfig {
            move_interval_ticks: 1,
            ..Default::default()
        }
    }

    fn connected() -> (Synchronizer, MemoryTransport) {
        let mut sync = Synchronizer::new(&cfg());
        let (client_end, relay_end) = MemoryTransport::pair("client", "relay");
        sync.attach(client_end);
        (sync, relay_end)
    }

    #[tokio::test]
    async fn idle_ticks_send_nothing() -> anyhow::Result<()> {
        let (mut sync, mut relay) = connected();
        sync.spawn_local_head(Rect::new(300, 300, 20, 20))?;
        sync.tick().await?;
        assert!(relay.try_recv_frame()?.is_some());

        for _ in 0..100 {
            let report = sync.tick().await?;
            assert_eq!(report.sent, 0);
        }
        assert!(relay.try_recv_frame()?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn first_batch_completes_initial_sync() -> anyhow::Result<()> {
        let (mut sync, mut relay) = connected();
        assert_eq!(sync.state(), SessionState::AwaitingInitialSync);

        sync.tick().await?;
        assert_eq!(sync.state(), SessionState::AwaitingInitialSync);

        relay.send_frame(Bytes::from_static(b"[]")).await?;
        sync.tick().await?;
        assert_eq!(sync.state(), SessionState::Synchronized);
        Ok(())
    }

    #[tokio::test]
    async fn spawned_head_goes_out_as_create() -> anyhow::Result<()> {
        let (mut sync, mut relay) = connected();
        let id = sync.spawn_local_head(Rect::new(300, 300, 20, 20))?;
        let report = sync.tick().await?;
        assert_eq!(report.sent, 1);

        let frame = relay.try_recv_frame()?.expect("batch");
        let msgs = decode_batch(&frame)?;
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].update_type(), UpdateType::Create);
        let Update::Create(head) = msgs[0].payload()? else {
            panic!("expected create");
        };
        assert_eq!(head.id, id);
        assert_eq!(head.owner.as_ref(), Some(&sync.peer_id));
        Ok(())
    }

    #[tokio::test]
    async fn steering_emits_rect_patches() -> anyhow::Result<()> {
        let (mut sync, mut relay) = connected();
        let id = sync.spawn_local_head(Rect::new(300, 300, 20, 20))?;
        sync.tick().await?;
        relay.try_recv_frame()?;

        assert!(sync.steer(Direction::Up));
        sync.tick().await?;
        let msgs = decode_batch(&relay.try_recv_frame()?.expect("batch"))?;
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].entity_id(), Some(&id));
        assert_eq!(msgs[0].data(), Some(&json!({"rect": [300, 280, 20, 20]})));
        Ok(())
    }

    #[tokio::test]
    async fn remote_batch_applies_in_order() -> anyhow::Result<()> {
        let (mut sync, mut relay) = connected();
        let batch = json!([
            {"update_type": "create", "entity_type": "food", "entity_id": null,
             "data": {"rect": [0, 0, 20, 20], "entity_id": "f1", "owner": null}},
            {"update_type": "update", "entity_id": "f1", "data": {"visible": false}},
            {"update_type": "delete", "entity_id": "not-here"},
            {"update_type": "sound", "data": {"path": "assets/eat.wav"}}
        ]);
        relay
            .send_frame(Bytes::from(serde_json::to_vec(&batch)?))
            .await?;

        let report = sync.tick().await?;
        assert_eq!(report.received, 4);
        assert_eq!(report.applied, 4);
        assert_eq!(report.sent, 0);
        let food = sync.world().get(&EntityId::from("f1")).expect("food");
        assert!(!food.visible);
        assert_eq!(sync.take_sounds(), vec!["assets/eat.wav".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn remote_entities_are_not_simulated() -> anyhow::Result<()> {
        let (mut sync, mut relay) = connected();
        let mut other = Entity::head(Rect::new(0, 0, 20, 20), Some(PeerId::from("other")));
        other.velocity = snake_shared::math::Vec2::new(20.0, 0.0);
        let batch = encode_batch(&[UpdateMessage::create(&other)?])?;
        relay.send_frame(batch).await?;

        sync.tick().await?;
        sync.tick().await?;
        assert_eq!(sync.world().get(&other.id).unwrap().rect.x, 0);
        assert!(relay.try_recv_frame()?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn deleting_the_local_head_is_announced() -> anyhow::Result<()> {
        let (mut sync, mut relay) = connected();
        let id = sync.spawn_local_head(Rect::new(0, 0, 20, 20))?;
        sync.tick().await?;
        relay.try_recv_frame()?;

        sync.world_mut().mark_deleted(&id);
        sync.tick().await?;
        let msgs = decode_batch(&relay.try_recv_frame()?.expect("batch"))?;
        assert_eq!(msgs[0].update_type(), UpdateType::Delete);
        assert!(sync.world().is_empty());
        assert!(sync.local_head().is_none());
        Ok(())
    }

    #[tokio::test]
    async fn transport_failure_ends_the_session() -> anyhow::Result<()> {
        let (mut sync, relay) = connected();
        drop(relay);
        assert!(sync.tick().await.is_err());
        assert_eq!(sync.state(), SessionState::Disconnected);
        // Later ticks keep simulating locally but have nowhere to send.
        assert!(sync.tick().await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn seed_covers_each_batch_before_it_is_sent() -> anyhow::Result<()> {
        let mut sync = Synchronizer::new(&cfg());
        let seed = sync.publish_seed()?;
        let log = Arc::new(Mutex::new(Vec::new()));
        sync.attach(SeedAtSend {
            seed,
            log: log.clone(),
        });

        let head = sync.spawn_local_head(Rect::new(0, 0, 20, 20))?;
        sync.tick().await?;
        let body = sync.world_mut().grow_chain(&head)?;
        sync.tick().await?;

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 2);
        for (frame, seed) in log.iter() {
            let seeded: Vec<EntityId> = decode_batch(seed.as_ref().expect("seed"))?
                .iter()
                .filter_map(|m| m.entity_id().cloned())
                .collect();
            for msg in decode_batch(frame)? {
                if msg.update_type() == UpdateType::Create {
                    assert!(seeded.contains(msg.entity_id().unwrap()));
                }
            }
        }
        let (_, last_seed) = &log[1];
        let last = decode_batch(last_seed.as_ref().unwrap())?;
        assert!(last.iter().any(|m| m.entity_id() == Some(&body)));
        Ok(())
    }

    #[tokio::test]
    async fn remote_delete_of_local_head_clears_it() -> anyhow::Result<()> {
        let (mut sync, mut relay) = connected();
        let id = sync.spawn_local_head(Rect::new(0, 0, 20, 20))?;
        sync.tick().await?;
        relay.try_recv_frame()?;

        let batch = encode_batch(&[UpdateMessage::delete(id)])?;
        relay.send_frame(batch).await?;
        sync.tick().await?;

        assert!(sync.local_head().is_none());
        assert!(!sync.steer(Direction::Left));
        Ok(())
    }

    #[tokio::test]
    async fn seed_tracks_the_world() -> anyhow::Result<()> {
        let (mut sync, _relay) = connected();
        let seed = sync.publish_seed()?;
        assert!(seed.borrow().is_none());

        sync.spawn_local_head(Rect::new(0, 0, 20, 20))?;
        sync.tick().await?;
        let bytes = seed.borrow().clone().expect("seed");
        let msgs = decode_batch(&bytes)?;
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].entity_type(), Some("snake_head"));
        Ok(())
    }
}

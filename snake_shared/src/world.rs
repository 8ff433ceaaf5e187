//! World state: the entity map plus the per-tick outgoing queues.
//!
//! The world is single-writer. Only the tick loop mutates it; the relay sees
//! it through an encoded seed batch published by the synchronizer.
//!
//! Tick bracket:
//! - [`WorldState::begin_tick`] clears the outgoing and sound queues, then
//!   moves in anything staged between ticks.
//! - remote batches are applied with [`WorldState::apply_batch`].
//! - owned entities are simulated (see `sim`).
//! - [`WorldState::finish_tick`] removes entities marked for deletion.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::{
    entity::{Entity, EntityId, EntityPatch, PeerId},
    error::SyncError,
    message::{Update, UpdateMessage},
};

#[derive(Debug, Default)]
pub struct WorldState {
    pub(crate) entities: HashMap<EntityId, Entity>,
    pub(crate) outgoing: Vec<UpdateMessage>,
    pub(crate) sounds: Vec<String>,
    /// Messages produced outside a tick, sent with the next batch.
    staged: Vec<UpdateMessage>,
    staged_sounds: Vec<String>,
    in_tick: bool,
}

impl WorldState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn get(&self, id: &EntityId) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub fn get_mut(&mut self, id: &EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(id)
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.entities.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Messages queued for this tick's batch.
    pub fn outgoing(&self) -> &[UpdateMessage] {
        &self.outgoing
    }

    /// Sounds to play this tick.
    pub fn sounds(&self) -> &[String] {
        &self.sounds
    }

    /// Hands the sound queue to the audio side.
    pub fn take_sounds(&mut self) -> Vec<String> {
        std::mem::take(&mut self.sounds)
    }

    /// Queues a message for the current tick, or stages it for the next one
    /// when called between ticks.
    pub fn queue(&mut self, msg: UpdateMessage) {
        if self.in_tick {
            self.outgoing.push(msg);
        } else {
            self.staged.push(msg);
        }
    }

    /// Queues a local sound, staged like [`WorldState::queue`] between ticks.
    pub fn queue_sound(&mut self, path: &str) {
        if self.in_tick {
            self.sounds.push(path.to_string());
        } else {
            self.staged_sounds.push(path.to_string());
        }
    }

    pub fn begin_tick(&mut self) {
        self.outgoing.clear();
        self.sounds.clear();
        self.outgoing.append(&mut self.staged);
        self.sounds.append(&mut self.staged_sounds);
        self.in_tick = true;
    }

    /// Inserts a locally created entity and announces it with a `create`.
    pub fn spawn(&mut self, entity: Entity) -> Result<EntityId, SyncError> {
        let msg = UpdateMessage::create(&entity)?;
        let id = entity.id.clone();
        self.entities.insert(id.clone(), entity);
        self.queue(msg);
        Ok(id)
    }

    /// Inserts without announcing. Overwrites an existing entity with the
    /// same id.
    pub fn insert(&mut self, entity: Entity) {
        self.entities.insert(entity.id.clone(), entity);
    }

    pub fn remove(&mut self, id: &EntityId) -> Option<Entity> {
        self.entities.remove(id)
    }

    /// Marks an entity for removal at the end of the tick.
    pub fn mark_deleted(&mut self, id: &EntityId) -> bool {
        match self.entities.get_mut(id) {
            Some(e) => {
                e.marked_for_deletion = true;
                true
            }
            None => false,
        }
    }

    /// Ids owned by `peer` that are not marked for deletion.
    pub fn owned_ids(&self, peer: &PeerId) -> Vec<EntityId> {
        self.entities
            .values()
            .filter(|e| e.is_owned_by(peer) && !e.marked_for_deletion)
            .map(|e| e.id.clone())
            .collect()
    }

    /// Applies one remote message.
    ///
    /// `create` overwrites, `delete` of a missing id is a no-op, and `update`
    /// of a missing id fails with [`SyncError::UnknownEntity`].
    pub fn apply(&mut self, msg: &UpdateMessage) -> Result<(), SyncError> {
        match msg.payload()? {
            Update::Create(entity) => {
                debug!(id = %entity.id, kind = %entity.kind(), "Create");
                self.insert(entity);
            }
            Update::Patch { id, patch } => {
                let entity = self
                    .entities
                    .get_mut(&id)
                    .ok_or(SyncError::UnknownEntity(id))?;
                entity.apply_patch(&patch);
            }
            Update::Delete(id) => {
                if self.entities.remove(&id).is_some() {
                    debug!(%id, "Delete");
                }
            }
            Update::Sound(path) => self.sounds.push(path),
        }
        Ok(())
    }

    /// Applies a batch in order, logging and skipping messages that fail.
    /// Returns how many applied.
    pub fn apply_batch(&mut self, msgs: &[UpdateMessage]) -> usize {
        let mut applied = 0;
        for msg in msgs {
            match self.apply(msg) {
                Ok(()) => applied += 1,
                Err(e) => warn!(update_type = ?msg.update_type(), error = %e, "Dropped update"),
            }
        }
        applied
    }

    /// Removes every entity marked for deletion. Owned ones are announced
    /// with a `delete` in the current batch. Returns the removed ids.
    pub fn finish_tick(&mut self, local: Option<&PeerId>) -> Vec<EntityId> {
        let doomed: Vec<EntityId> = self
            .entities
            .values()
            .filter(|e| e.marked_for_deletion)
            .map(|e| e.id.clone())
            .collect();

        for id in &doomed {
            if let Some(entity) = self.entities.remove(id) {
                if local.is_some_and(|peer| entity.is_owned_by(peer)) {
                    self.outgoing.push(UpdateMessage::delete(id.clone()));
                }
            }
        }
        self.in_tick = false;
        doomed
    }

    /// One `create` per live entity, for seeding a newly joined peer.
    pub fn seed_batch(&self) -> Result<Vec<UpdateMessage>, SyncError> {
        self.entities
            .values()
            .filter(|e| !e.marked_for_deletion)
            .map(UpdateMessage::create)
            .collect()
    }

    /// Ids of the segments following `head`, in order.
    ///
    /// The walk is bounded by the entity count so a link patched in by a
    /// remote peer cannot stall the tick.
    pub fn chain(&self, head: &EntityId) -> Vec<EntityId> {
        let mut out = Vec::new();
        let mut cursor = self.entities.get(head).and_then(|e| e.next());
        while let Some(id) = cursor {
            if out.len() >= self.entities.len() {
                break;
            }
            let Some(seg) = self.entities.get(id) else {
                break;
            };
            out.push(id.clone());
            cursor = seg.next();
        }
        out
    }

    /// Last live node of the chain starting at `head` (the head itself when
    /// it has no segments).
    pub fn tail_of(&self, head: &EntityId) -> EntityId {
        self.chain(head).pop().unwrap_or_else(|| head.clone())
    }

    /// Appends a new body segment at the tail of `head`'s chain.
    ///
    /// The segment inherits the head's owner and starts on the tail's rect.
    /// Queues a `create` for the segment, then a `next` patch for the old
    /// tail.
    pub fn grow_chain(&mut self, head: &EntityId) -> Result<EntityId, SyncError> {
        let owner = match self.entities.get(head) {
            Some(e) if e.kind().is_chain() => e.owner.clone(),
            Some(e) => {
                return Err(SyncError::InvalidUpdate(format!(
                    "cannot grow a chain from {}",
                    e.kind()
                )))
            }
            None => return Err(SyncError::UnknownEntity(head.clone())),
        };

        let tail_id = self.tail_of(head);
        let tail_rect = self
            .entities
            .get(&tail_id)
            .map(|e| e.rect)
            .ok_or_else(|| SyncError::UnknownEntity(tail_id.clone()))?;

        let body = Entity::body(tail_rect, owner);
        let body_id = body.id.clone();
        self.spawn(body)?;

        if let Some(tail) = self.entities.get_mut(&tail_id) {
            tail.set_next(Some(body_id.clone()));
        }
        self.queue(UpdateMessage::update(
            tail_id,
            &EntityPatch::next(Some(body_id.clone())),
        )?);
        Ok(body_id)
    }
}

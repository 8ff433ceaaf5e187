//! Snake gameplay rules run on owned entities each tick.
//!
//! A head steps one cell every `move_interval_ticks`; its body segments
//! follow, each taking its predecessor's previous position. Moving onto food
//! grows the chain by one segment.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{
    entity::{Entity, EntityId, EntityKind, EntityPatch},
    error::SyncError,
    math::{Rect, Vec2},
    message::UpdateMessage,
    world::WorldState,
};

/// Steering direction sampled from input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    /// Velocity of one cell step in this direction. Screen coordinates: y
    /// grows downward.
    pub fn velocity(self, cell: i32) -> Vec2 {
        let unit = match self {
            Direction::Up => Vec2::new(0.0, -1.0),
            Direction::Down => Vec2::new(0.0, 1.0),
            Direction::Left => Vec2::new(-1.0, 0.0),
            Direction::Right => Vec2::new(1.0, 0.0),
        };
        unit.scale(cell as f32)
    }
}

/// Tunables for [`WorldState::simulate`].
#[derive(Debug, Clone)]
pub struct SimRules {
    /// Ticks between head steps.
    pub move_interval_ticks: u64,
    /// Played locally and broadcast when a head eats.
    pub eat_sound: Option<String>,
}

impl Default for SimRules {
    fn default() -> Self {
        Self {
            move_interval_ticks: 6,
            eat_sound: None,
        }
    }
}

/// A random grid-aligned cell inside `arena`.
pub fn random_cell<R: Rng>(rng: &mut R, arena: [i32; 2], cell: i32) -> Rect {
    let cell = cell.max(1);
    let cols = (arena[0] / cell).max(1);
    let rows = (arena[1] / cell).max(1);
    Rect::new(
        rng.gen_range(0..cols) * cell,
        rng.gen_range(0..rows) * cell,
        cell,
        cell,
    )
}

impl WorldState {
    /// Spawns `count` unowned food entities on random cells.
    pub fn scatter_food<R: Rng>(
        &mut self,
        rng: &mut R,
        count: usize,
        arena: [i32; 2],
        cell: i32,
    ) -> Result<Vec<EntityId>, SyncError> {
        (0..count)
            .map(|_| self.spawn(Entity::food(random_cell(rng, arena, cell))))
            .collect()
    }

    /// Runs one tick of simulation for the owned entity `id`.
    pub fn simulate(&mut self, id: &EntityId, tick: u64, rules: &SimRules) -> Result<(), SyncError> {
        let entity = self
            .entities
            .get_mut(id)
            .ok_or_else(|| SyncError::UnknownEntity(id.clone()))?;

        let is_head = entity.kind() == EntityKind::Head;
        if is_head {
            let desired = entity.steering_mut().map(|s| {
                let due = s
                    .last_moved
                    .map_or(true, |t| tick.saturating_sub(t) >= rules.move_interval_ticks);
                if due && !s.desired.is_zero() {
                    s.last_moved = Some(tick);
                    s.desired
                } else {
                    Vec2::ZERO
                }
            });
            entity.velocity = desired.unwrap_or(Vec2::ZERO);
        }

        let before = entity.rect;
        let moved = entity.simulate_tick(&mut self.outgoing)?;

        if moved && is_head {
            self.follow(id, before)?;
            self.consume(id, rules)?;
        }
        Ok(())
    }

    /// Shifts each segment onto its predecessor's previous rect.
    fn follow(&mut self, head: &EntityId, mut vacated: Rect) -> Result<(), SyncError> {
        for seg_id in self.chain(head) {
            let Some(seg) = self.entities.get_mut(&seg_id) else {
                break;
            };
            let old = seg.rect;
            seg.rect = old.moved_to(vacated);
            if seg.rect != old {
                self.outgoing
                    .push(UpdateMessage::update(seg_id, &EntityPatch::rect(seg.rect))?);
            }
            vacated = old;
        }
        Ok(())
    }

    /// Grows the chain once per food the head now overlaps.
    fn consume(&mut self, head: &EntityId, rules: &SimRules) -> Result<(), SyncError> {
        let Some(entity) = self.entities.get(head) else {
            return Ok(());
        };
        let eaten = entity
            .detect_collisions(self)
            .into_iter()
            .filter(|e| e.kind() == EntityKind::Food)
            .count();

        for _ in 0..eaten {
            self.grow_chain(head)?;
            if let Some(path) = &rules.eat_sound {
                self.queue_sound(path);
                self.queue(UpdateMessage::sound(path));
            }
        }
        Ok(())
    }
}

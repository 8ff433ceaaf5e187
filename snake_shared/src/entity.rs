//! Entity model.
//!
//! Entities are a closed set of variants sharing one record shape on the wire:
//! - `snake_head`: steerable, owns a chain of body segments.
//! - `snake_body`: one link in a snake's chain.
//! - `food`: server-authored, usually unowned.
//!
//! Decoding goes through [`EntityKind::from_wire`], which is the only place a
//! wire type name maps to a variant.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    error::SyncError,
    math::{Rect, Vec2},
    message::UpdateMessage,
    world::WorldState,
};

/// Sprite used by every built-in variant.
pub const DEFAULT_SPRITE: &str = "assets/square.png";

/// Sprite scale used by every built-in variant.
pub const DEFAULT_SCALE: [i32; 2] = [20, 20];

/// Opaque, session-unique entity id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn new_unique() -> Self {
        EntityId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        EntityId(s.to_string())
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies the peer authoritative for an entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub String);

impl PeerId {
    pub fn new_unique() -> Self {
        PeerId(Uuid::new_v4().to_string())
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        PeerId(s.to_string())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Entity variant discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Head,
    Body,
    Food,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [EntityKind::Head, EntityKind::Body, EntityKind::Food];

    pub fn wire_name(self) -> &'static str {
        match self {
            EntityKind::Head => "snake_head",
            EntityKind::Body => "snake_body",
            EntityKind::Food => "food",
        }
    }

    /// Looks a wire type name up in the decode table.
    pub fn from_wire(name: &str) -> Result<Self, SyncError> {
        Self::ALL
            .into_iter()
            .find(|k| k.wire_name() == name)
            .ok_or_else(|| SyncError::UnknownEntityType(name.to_string()))
    }

    /// Heads and bodies carry a `next` link.
    pub fn is_chain(self) -> bool {
        matches!(self, EntityKind::Head | EntityKind::Body)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Local steering state of a head. Never leaves the owning peer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Steering {
    /// Velocity requested by input; applied on movement ticks.
    pub desired: Vec2,
    /// Tick of the last applied movement.
    pub last_moved: Option<u64>,
}

/// Variant-specific state.
#[derive(Debug, Clone, PartialEq)]
pub enum Variant {
    Head {
        next: Option<EntityId>,
        steering: Steering,
    },
    Body {
        next: Option<EntityId>,
    },
    Food,
}

/// A replicated game entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub id: EntityId,
    pub rect: Rect,
    pub velocity: Vec2,
    pub owner: Option<PeerId>,
    pub visible: bool,
    pub sprite_path: Option<String>,
    pub scale_res: Option<[i32; 2]>,
    /// Set by the owner; the world removes the entity at the end of the tick.
    pub marked_for_deletion: bool,
    pub variant: Variant,
}

/// Full wire snapshot of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub rect: Rect,
    #[serde(default)]
    pub sprite_path: Option<String>,
    #[serde(default)]
    pub owner: Option<PeerId>,
    #[serde(default = "default_visible")]
    pub visible: bool,
    #[serde(default)]
    pub entity_id: Option<EntityId>,
    #[serde(default)]
    pub velocity: Vec2,
    #[serde(default)]
    pub scale_res: Option<[i32; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<EntityId>,
}

fn default_visible() -> bool {
    true
}

/// Partial update. Only present fields are applied.
///
/// Nullable fields use a nested option: `None` means absent, `Some(None)`
/// means an explicit `null` that clears the attribute.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rect: Option<Rect>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub velocity: Option<Vec2>,
    #[serde(
        deserialize_with = "explicit",
        skip_serializing_if = "Option::is_none"
    )]
    pub owner: Option<Option<PeerId>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visible: Option<bool>,
    #[serde(
        deserialize_with = "explicit",
        skip_serializing_if = "Option::is_none"
    )]
    pub sprite_path: Option<Option<String>>,
    #[serde(
        deserialize_with = "explicit",
        skip_serializing_if = "Option::is_none"
    )]
    pub scale_res: Option<Option<[i32; 2]>>,
    #[serde(
        deserialize_with = "explicit",
        skip_serializing_if = "Option::is_none"
    )]
    pub next: Option<Option<EntityId>>,
}

fn explicit<'de, D, T>(d: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(d).map(Some)
}

impl EntityPatch {
    pub fn rect(rect: Rect) -> Self {
        Self {
            rect: Some(rect),
            ..Default::default()
        }
    }

    pub fn next(next: Option<EntityId>) -> Self {
        Self {
            next: Some(next),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl Entity {
    fn with_variant(rect: Rect, owner: Option<PeerId>, variant: Variant) -> Self {
        Self {
            id: EntityId::new_unique(),
            rect,
            velocity: Vec2::ZERO,
            owner,
            visible: true,
            sprite_path: Some(DEFAULT_SPRITE.to_string()),
            scale_res: Some(DEFAULT_SCALE),
            marked_for_deletion: false,
            variant,
        }
    }

    pub fn head(rect: Rect, owner: Option<PeerId>) -> Self {
        Self::with_variant(
            rect,
            owner,
            Variant::Head {
                next: None,
                steering: Steering::default(),
            },
        )
    }

    pub fn body(rect: Rect, owner: Option<PeerId>) -> Self {
        Self::with_variant(rect, owner, Variant::Body { next: None })
    }

    pub fn food(rect: Rect) -> Self {
        Self::with_variant(rect, None, Variant::Food)
    }

    pub fn kind(&self) -> EntityKind {
        match self.variant {
            Variant::Head { .. } => EntityKind::Head,
            Variant::Body { .. } => EntityKind::Body,
            Variant::Food => EntityKind::Food,
        }
    }

    pub fn is_owned_by(&self, peer: &PeerId) -> bool {
        self.owner.as_ref() == Some(peer)
    }

    /// Next segment in the chain, if this is a head or body.
    pub fn next(&self) -> Option<&EntityId> {
        match &self.variant {
            Variant::Head { next, .. } | Variant::Body { next } => next.as_ref(),
            Variant::Food => None,
        }
    }

    /// Relinks the chain. No-op for food.
    pub fn set_next(&mut self, id: Option<EntityId>) {
        match &mut self.variant {
            Variant::Head { next, .. } | Variant::Body { next } => *next = id,
            Variant::Food => {}
        }
    }

    pub fn steering_mut(&mut self) -> Option<&mut Steering> {
        match &mut self.variant {
            Variant::Head { steering, .. } => Some(steering),
            _ => None,
        }
    }

    pub fn serialize(&self) -> EntityRecord {
        EntityRecord {
            rect: self.rect,
            sprite_path: self.sprite_path.clone(),
            owner: self.owner.clone(),
            visible: self.visible,
            entity_id: Some(self.id.clone()),
            velocity: self.velocity,
            scale_res: self.scale_res,
            next: self.next().cloned(),
        }
    }

    /// Rebuilds an entity of `kind` from a record. A record without an id
    /// gets a fresh one.
    pub fn deserialize(kind: EntityKind, record: EntityRecord) -> Self {
        let variant = match kind {
            EntityKind::Head => Variant::Head {
                next: record.next,
                steering: Steering::default(),
            },
            EntityKind::Body => Variant::Body { next: record.next },
            EntityKind::Food => Variant::Food,
        };
        Self {
            id: record.entity_id.unwrap_or_else(EntityId::new_unique),
            rect: record.rect,
            velocity: record.velocity,
            owner: record.owner,
            visible: record.visible,
            sprite_path: record.sprite_path,
            scale_res: record.scale_res,
            marked_for_deletion: false,
            variant,
        }
    }

    /// Decodes the `entity_type` / `data` pair of a `create` message.
    pub fn from_wire(entity_type: &str, data: &Value) -> Result<Self, SyncError> {
        let kind = EntityKind::from_wire(entity_type)?;
        let record: EntityRecord = serde_json::from_value(data.clone())?;
        Ok(Self::deserialize(kind, record))
    }

    pub fn apply_patch(&mut self, patch: &EntityPatch) {
        if let Some(rect) = patch.rect {
            self.rect = rect;
        }
        if let Some(velocity) = patch.velocity {
            self.velocity = velocity;
        }
        if let Some(owner) = &patch.owner {
            self.owner = owner.clone();
        }
        if let Some(visible) = patch.visible {
            self.visible = visible;
        }
        if let Some(sprite_path) = &patch.sprite_path {
            self.sprite_path = sprite_path.clone();
        }
        if let Some(scale_res) = patch.scale_res {
            self.scale_res = scale_res;
        }
        if let Some(next) = &patch.next {
            self.set_next(next.clone());
        }
    }

    /// Every other entity in `world` whose rect overlaps this one.
    pub fn detect_collisions<'w>(&self, world: &'w WorldState) -> Vec<&'w Entity> {
        world
            .entities()
            .filter(|other| other.id != self.id && self.rect.intersects(other.rect))
            .collect()
    }

    /// Advances the rect by the velocity. Queues a `rect` patch only when the
    /// rect actually changed; returns whether it did.
    pub fn simulate_tick(&mut self, outgoing: &mut Vec<UpdateMessage>) -> Result<bool, SyncError> {
        if self.velocity.is_zero() {
            return Ok(false);
        }
        let moved = self.rect.translated(self.velocity);
        if moved == self.rect {
            return Ok(false);
        }
        self.rect = moved;
        outgoing.push(UpdateMessage::update(
            self.id.clone(),
            &EntityPatch::rect(self.rect),
        )?);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn roundtrip(e: &Entity) -> Entity {
        let value = serde_json::to_value(e.serialize()).unwrap();
        Entity::from_wire(e.kind().wire_name(), &value).unwrap()
    }

    #[test]
    fn every_variant_roundtrips() {
        let owner = Some(PeerId::from("peer-a"));
        let mut head = Entity::head(Rect::new(300, 300, 20, 20), owner.clone());
        head.velocity = Vec2::new(20.0, 0.0);
        head.set_next(Some(EntityId::from("seg-1")));
        let mut body = Entity::body(Rect::new(280, 300, 20, 20), owner);
        body.visible = false;
        let mut food = Entity::food(Rect::new(40, 60, 20, 20));
        food.scale_res = None;

        for e in [head, body, food] {
            assert_eq!(roundtrip(&e), e);
        }
    }

    #[test]
    fn record_uses_flat_arrays() {
        let food = Entity::food(Rect::new(1, 2, 3, 4));
        let value = serde_json::to_value(food.serialize()).unwrap();
        assert_eq!(value["rect"], json!([1, 2, 3, 4]));
        assert_eq!(value["velocity"], json!([0.0, 0.0]));
        assert_eq!(value["owner"], Value::Null);
        assert!(value.get("next").is_none());
    }

    #[test]
    fn deserialize_keeps_supplied_id_and_fills_missing_one() {
        let with_id = json!({"rect": [0, 0, 20, 20], "entity_id": "abc"});
        let e = Entity::from_wire("food", &with_id).unwrap();
        assert_eq!(e.id, EntityId::from("abc"));

        let without_id = json!({"rect": [0, 0, 20, 20]});
        let e = Entity::from_wire("food", &without_id).unwrap();
        assert!(!e.id.as_str().is_empty());
        assert!(e.visible);
    }

    #[test]
    fn unknown_entity_type_is_rejected() {
        let data = json!({"rect": [0, 0, 20, 20]});
        let err = Entity::from_wire("dragon", &data).unwrap_err();
        assert!(matches!(err, SyncError::UnknownEntityType(name) if name == "dragon"));
    }

    #[test]
    fn velocity_patch_leaves_other_fields() {
        let mut head = Entity::head(Rect::new(300, 300, 20, 20), Some(PeerId::from("p")));
        let before = head.clone();
        let patch: EntityPatch = serde_json::from_value(json!({"velocity": [5, 0]})).unwrap();
        head.apply_patch(&patch);

        assert_eq!(head.velocity, Vec2::new(5.0, 0.0));
        assert_eq!(head.rect, before.rect);
        assert_eq!(head.owner, before.owner);
        assert_eq!(head.visible, before.visible);
        assert_eq!(head.next(), None);
    }

    #[test]
    fn patch_ignores_unknown_fields_and_id() {
        let mut food = Entity::food(Rect::new(0, 0, 20, 20));
        let id = food.id.clone();
        let patch: EntityPatch = serde_json::from_value(json!({
            "colour": "red",
            "entity_id": "hijacked",
            "visible": false
        }))
        .unwrap();
        food.apply_patch(&patch);
        assert_eq!(food.id, id);
        assert!(!food.visible);
    }

    #[test]
    fn explicit_null_clears_nullable_fields() {
        let mut body = Entity::body(Rect::new(0, 0, 20, 20), Some(PeerId::from("p")));
        body.set_next(Some(EntityId::from("n")));
        let patch: EntityPatch =
            serde_json::from_value(json!({"owner": null, "next": null})).unwrap();
        body.apply_patch(&patch);
        assert_eq!(body.owner, None);
        assert_eq!(body.next(), None);
        assert!(body.sprite_path.is_some());
    }

    #[test]
    fn food_ignores_next_patch() {
        let mut food = Entity::food(Rect::new(0, 0, 20, 20));
        food.apply_patch(&EntityPatch::next(Some(EntityId::from("x"))));
        assert_eq!(food.next(), None);
    }

    #[test]
    fn simulate_tick_reports_only_real_motion() {
        let mut out = Vec::new();
        let mut head = Entity::head(Rect::new(0, 0, 20, 20), None);
        assert!(!head.simulate_tick(&mut out).unwrap());

        head.velocity = Vec2::new(0.25, 0.0);
        assert!(!head.simulate_tick(&mut out).unwrap());
        assert!(out.is_empty());

        head.velocity = Vec2::new(0.0, 20.0);
        assert!(head.simulate_tick(&mut out).unwrap());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].data(), Some(&json!({"rect": [0, 20, 20, 20]})));
    }
}

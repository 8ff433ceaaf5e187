//! Update messages: the atomic unit of state change.
//!
//! A message is a field-named JSON record with all four keys always present:
//!
//! ```json
//! {"update_type": "update", "entity_type": null, "entity_id": "…", "data": {"rect": [0, 20, 20, 20]}}
//! ```
//!
//! A batch on the wire is a JSON array of such records, even when it holds a
//! single message. Required fields per type are checked both when building a
//! message and when decoding one, so an invalid message can neither be sent
//! nor applied.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use crate::{
    entity::{Entity, EntityId, EntityPatch},
    error::SyncError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateType {
    Create,
    Update,
    Delete,
    Sound,
}

/// A validated update message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawUpdate")]
pub struct UpdateMessage {
    update_type: UpdateType,
    entity_type: Option<String>,
    entity_id: Option<EntityId>,
    data: Option<Value>,
}

/// Unvalidated wire form.
#[derive(Deserialize)]
struct RawUpdate {
    update_type: UpdateType,
    #[serde(default)]
    entity_type: Option<String>,
    #[serde(default)]
    entity_id: Option<EntityId>,
    #[serde(default)]
    data: Option<Value>,
}

impl TryFrom<RawUpdate> for UpdateMessage {
    type Error = SyncError;

    fn try_from(raw: RawUpdate) -> Result<Self, Self::Error> {
        UpdateMessage::new(raw.update_type, raw.entity_type, raw.entity_id, raw.data)
    }
}

/// Typed view of a message, ready to apply.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    Create(Entity),
    Patch { id: EntityId, patch: EntityPatch },
    Delete(EntityId),
    Sound(String),
}

impl UpdateMessage {
    /// Builds a message, rejecting field combinations the type does not allow.
    pub fn new(
        update_type: UpdateType,
        entity_type: Option<String>,
        entity_id: Option<EntityId>,
        data: Option<Value>,
    ) -> Result<Self, SyncError> {
        let missing = match update_type {
            UpdateType::Create if entity_type.is_none() => Some("entity_type"),
            UpdateType::Create | UpdateType::Update | UpdateType::Sound if data.is_none() => {
                Some("data")
            }
            UpdateType::Update | UpdateType::Delete if entity_id.is_none() => Some("entity_id"),
            _ => None,
        };
        if let Some(field) = missing {
            return Err(SyncError::InvalidUpdate(format!(
                "{update_type:?} requires {field}"
            )));
        }
        Ok(Self {
            update_type,
            entity_type,
            entity_id,
            data,
        })
    }

    /// `create` carrying the entity's full record.
    pub fn create(entity: &Entity) -> Result<Self, SyncError> {
        Self::new(
            UpdateType::Create,
            Some(entity.kind().wire_name().to_string()),
            Some(entity.id.clone()),
            Some(serde_json::to_value(entity.serialize())?),
        )
    }

    pub fn update(id: EntityId, patch: &EntityPatch) -> Result<Self, SyncError> {
        Self::new(
            UpdateType::Update,
            None,
            Some(id),
            Some(serde_json::to_value(patch)?),
        )
    }

    pub fn delete(id: EntityId) -> Self {
        Self {
            update_type: UpdateType::Delete,
            entity_type: None,
            entity_id: Some(id),
            data: None,
        }
    }

    pub fn sound(path: &str) -> Self {
        Self {
            update_type: UpdateType::Sound,
            entity_type: None,
            entity_id: None,
            data: Some(json!({ "path": path })),
        }
    }

    pub fn update_type(&self) -> UpdateType {
        self.update_type
    }

    pub fn entity_type(&self) -> Option<&str> {
        self.entity_type.as_deref()
    }

    pub fn entity_id(&self) -> Option<&EntityId> {
        self.entity_id.as_ref()
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    /// Decodes the payload into a typed [`Update`].
    ///
    /// A `create` is keyed by the record's own id, falling back to the
    /// message's `entity_id`, and only then to a fresh id.
    pub fn payload(&self) -> Result<Update, SyncError> {
        let data = self.data.as_ref();
        match self.update_type {
            UpdateType::Create => {
                let (Some(entity_type), Some(data)) = (self.entity_type.as_deref(), data) else {
                    return Err(SyncError::InvalidUpdate("create without type/data".into()));
                };
                let mut entity = Entity::from_wire(entity_type, data)?;
                if data.get("entity_id").map_or(true, Value::is_null) {
                    if let Some(id) = &self.entity_id {
                        entity.id = id.clone();
                    }
                }
                Ok(Update::Create(entity))
            }
            UpdateType::Update => {
                let (Some(id), Some(data)) = (self.entity_id.clone(), data) else {
                    return Err(SyncError::InvalidUpdate("update without id/data".into()));
                };
                let patch = serde_json::from_value(data.clone())?;
                Ok(Update::Patch { id, patch })
            }
            UpdateType::Delete => self
                .entity_id
                .clone()
                .map(Update::Delete)
                .ok_or_else(|| SyncError::InvalidUpdate("delete without id".into())),
            UpdateType::Sound => data
                .and_then(|d| d.get("path"))
                .and_then(Value::as_str)
                .map(|p| Update::Sound(p.to_string()))
                .ok_or_else(|| SyncError::InvalidUpdate("sound without data.path".into())),
        }
    }
}

/// Encodes a batch as a JSON array.
pub fn encode_batch(msgs: &[UpdateMessage]) -> Result<Bytes, SyncError> {
    Ok(Bytes::from(serde_json::to_vec(msgs)?))
}

/// Decodes a batch.
///
/// Elements are decoded one at a time; a malformed element is logged and
/// skipped so the rest of the batch still applies. A bare object is accepted
/// as a batch of one. Anything that is not JSON fails the whole batch.
pub fn decode_batch(bytes: &[u8]) -> Result<Vec<UpdateMessage>, SyncError> {
    let value: Value = serde_json::from_slice(bytes)?;
    let items = match value {
        Value::Array(items) => items,
        obj @ Value::Object(_) => vec![obj],
        other => {
            return Err(SyncError::InvalidUpdate(format!(
                "batch must be an array, got {other}"
            )))
        }
    };

    let mut msgs = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        match serde_json::from_value::<UpdateMessage>(item) {
            Ok(msg) => msgs.push(msg),
            Err(e) => warn!(index, error = %e, "Skipping malformed update"),
        }
    }
    Ok(msgs)
}

//! Protocol error taxonomy.
//!
//! Transport and session failures are reported as `anyhow::Error` with
//! context at the I/O boundary; these variants cover the message and entity
//! level, where callers decide whether the failure is fatal or skippable.

use thiserror::Error;

use crate::entity::EntityId;

#[derive(Debug, Error)]
pub enum SyncError {
    /// An update message was built (or received) with a field combination
    /// that its `update_type` does not allow.
    #[error("invalid update: {0}")]
    InvalidUpdate(String),

    /// A `create` named an entity type missing from the decode table.
    #[error("unknown entity type: {0}")]
    UnknownEntityType(String),

    /// An `update` targeted an id that is not in the world.
    #[error("unknown entity: {0}")]
    UnknownEntity(EntityId),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

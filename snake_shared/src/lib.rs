//! `snake_shared`
//!
//! The entity synchronization protocol shared by client and relay.
//!
//! Design goals:
//! - One wire schema (update messages) that any implementation can speak.
//! - Partial updates: only changed fields travel, and only when they change.
//! - Single-writer world state; the network side talks to it through batches.
//! - No `unsafe`.

pub mod config;
pub mod entity;
pub mod error;
pub mod math;
pub mod message;
pub mod net;
pub mod sim;
pub mod world;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::config::*;
    pub use crate::entity::*;
    pub use crate::error::*;
    pub use crate::math::*;
    pub use crate::message::*;
    pub use crate::net::*;
    pub use crate::sim::*;
    pub use crate::world::*;
}

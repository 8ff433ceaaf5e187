//! `snake_client`
//!
//! Client-side systems:
//! - Relay connection and session state
//! - Per-tick synchronization: apply remote batches, simulate owned
//!   entities, send local changes
//! - Steering input
//!
//! When hosting, the same process also runs the relay; the synchronizer
//! feeds it seed batches over a watch channel instead of sharing the world.

pub mod input;
pub mod synchronizer;

pub use synchronizer::{SessionState, Synchronizer, TickReport};

//! Configuration system.
//!
//! Loads sync configuration from JSON strings/files. Every field has a
//! default, so a partial JSON object is valid.

use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::{math::Rect, sim::SimRules};

/// Root configuration shared by client, host and relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Relay address, e.g. `127.0.0.1:5570`.
    pub server_addr: String,
    /// Simulation tick rate.
    pub tick_hz: u32,
    /// Ticks between snake steps.
    pub move_interval_ticks: u64,
    /// Grid cell size; also the snake step length.
    pub cell_size: i32,
    /// Relay polling period.
    pub relay_poll_ms: u64,
    /// Food spawned by the host at startup.
    pub food_count: usize,
    /// Playfield size in units, used for food placement.
    pub arena: [i32; 2],
    /// Where the local head spawns.
    pub spawn: [i32; 2],
    /// Sound queued when a snake eats.
    pub eat_sound: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:5570".to_string(),
            tick_hz: 60,
            move_interval_ticks: 6,
            cell_size: 20,
            relay_poll_ms: 1,
            food_count: 5,
            arena: [1920, 1080],
            spawn: [300, 300],
            eat_sound: Some("assets/eat.wav".to_string()),
        }
    }
}

impl SyncConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    pub fn from_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("parse config {}", path.display()))
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_hz.max(1)))
    }

    pub fn relay_poll_interval(&self) -> Duration {
        Duration::from_millis(self.relay_poll_ms.max(1))
    }

    pub fn sim_rules(&self) -> SimRules {
        SimRules {
            move_interval_ticks: self.move_interval_ticks,
            eat_sound: self.eat_sound.clone(),
        }
    }

    /// One grid cell at the spawn point.
    pub fn spawn_rect(&self) -> Rect {
        Rect::new(self.spawn[0], self.spawn[1], self.cell_size, self.cell_size)
    }
}

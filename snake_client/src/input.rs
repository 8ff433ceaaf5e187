//! Input handling.
//!
//! Keyboard sampling lives outside the sync core. This module only turns
//! sampled keys into a steering direction; the last direction sampled before
//! a tick wins, reversals included.

use snake_shared::sim::Direction;

/// Maps a key or word to a direction: `w`/`a`/`s`/`d` or `up`/`left`/`down`/`right`.
pub fn parse_direction(key: &str) -> Option<Direction> {
    match key.trim().to_ascii_lowercase().as_str() {
        "w" | "up" => Some(Direction::Up),
        "s" | "down" => Some(Direction::Down),
        "a" | "left" => Some(Direction::Left),
        "d" | "right" => Some(Direction::Right),
        _ => None,
    }
}

/// Direction sampled since the last tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct InputState {
    pending: Option<Direction>,
}

impl InputState {
    /// Records a key press, replacing any earlier one this tick.
    pub fn press(&mut self, dir: Direction) {
        self.pending = Some(dir);
    }

    /// Takes the direction to apply before the next simulation step.
    pub fn take(&mut self) -> Option<Direction> {
        self.pending.take()
    }
}

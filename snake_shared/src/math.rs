//! Math types.
//!
//! Integer rectangles for placement and collision, float vectors for
//! velocity. Both flatten to plain arrays on the wire.

use serde::{Deserialize, Serialize};

/// 2D vector, units per simulation tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(from = "[f32; 2]", into = "[f32; 2]")]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn is_zero(self) -> bool {
        self.x == 0.0 && self.y == 0.0
    }

    pub fn scale(self, k: f32) -> Self {
        Self::new(self.x * k, self.y * k)
    }
}

impl From<[f32; 2]> for Vec2 {
    fn from([x, y]: [f32; 2]) -> Self {
        Self { x, y }
    }
}

impl From<Vec2> for [f32; 2] {
    fn from(v: Vec2) -> Self {
        [v.x, v.y]
    }
}

/// Axis-aligned rectangle in integer units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(from = "[i32; 4]", into = "[i32; 4]")]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Offsets the rectangle by `v`, truncating fractional components.
    /// Coordinates saturate at the `i32` range.
    pub fn translated(self, v: Vec2) -> Self {
        Self {
            x: self.x.saturating_add(v.x as i32),
            y: self.y.saturating_add(v.y as i32),
            ..self
        }
    }

    /// Same size, placed at `other`'s origin.
    pub fn moved_to(self, other: Rect) -> Self {
        Self {
            x: other.x,
            y: other.y,
            ..self
        }
    }

    pub fn is_empty(self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// Strict overlap test. Touching edges do not count and empty
    /// rectangles never intersect anything.
    pub fn intersects(self, other: Rect) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        let (ax, ay, aw, ah) = self.wide();
        let (bx, by, bw, bh) = other.wide();
        ax < bx + bw && bx < ax + aw && ay < by + bh && by < ay + ah
    }

    fn wide(self) -> (i64, i64, i64, i64) {
        (
            i64::from(self.x),
            i64::from(self.y),
            i64::from(self.width),
            i64::from(self.height),
        )
    }
}

impl From<[i32; 4]> for Rect {
    fn from([x, y, width, height]: [i32; 4]) -> Self {
        Self::new(x, y, width, height)
    }
}

impl From<Rect> for [i32; 4] {
    fn from(r: Rect) -> Self {
        [r.x, r.y, r.width, r.height]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_translate_truncates() {
        let r = Rect::new(300, 300, 20, 20).translated(Vec2::new(20.0, -0.5));
        assert_eq!(r, Rect::new(320, 300, 20, 20));
    }

    #[test]
    fn rect_edges_touching_do_not_intersect() {
        let a = Rect::new(0, 0, 20, 20);
        assert!(!a.intersects(Rect::new(20, 0, 20, 20)));
        assert!(a.intersects(Rect::new(19, 19, 20, 20)));
        assert!(!a.intersects(Rect::new(5, 5, 0, 10)));
    }

    #[test]
    fn translate_saturates_at_the_edge() {
        let r = Rect::new(i32::MAX - 10, i32::MIN + 5, 20, 20)
            .translated(Vec2::new(3e9, -3e9));
        assert_eq!(r, Rect::new(i32::MAX, i32::MIN, 20, 20));
    }

    #[test]
    fn intersects_near_i32_max() {
        let far = Rect::new(2_147_483_640, 0, 20, 20);
        assert!(!Rect::new(0, 0, 20, 20).intersects(far));
        assert!(far.intersects(Rect::new(i32::MAX - 1, 5, i32::MAX, 5)));
    }

    #[test]
    fn rect_and_vec_flatten_to_arrays() {
        let json = serde_json::to_string(&Rect::new(1, 2, 3, 4)).unwrap();
        assert_eq!(json, "[1,2,3,4]");
        let v: Vec2 = serde_json::from_str("[20.0, 0]").unwrap();
        assert_eq!(v, Vec2::new(20.0, 0.0));
    }
}

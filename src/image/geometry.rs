//! Integer points and rectangles in pixel coordinates.

use serde::{Deserialize, Serialize};

/// A position or a size, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: i64,
    pub y: i64,
}

impl Point {
    #[inline]
    pub const fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }

    #[inline]
    pub fn area(&self) -> i64 {
        self.x.max(0) * self.y.max(0)
    }
}

/// An axis-aligned rectangle given by its top-left corner and size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
}

impl Rect {
    #[inline]
    pub const fn new(x: i64, y: i64, width: i64, height: i64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle from two opposite corners (`right`/`bottom` exclusive).
    pub fn from_corners(left: i64, top: i64, right: i64, bottom: i64) -> Self {
        Self::new(left, top, right - left, bottom - top)
    }

    #[inline]
    pub fn right(&self) -> i64 {
        self.x + self.width
    }

    #[inline]
    pub fn bottom(&self) -> i64 {
        self.y + self.height
    }

    #[inline]
    pub fn has_positive_area(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    #[inline]
    pub fn area(&self) -> i64 {
        self.width.max(0) * self.height.max(0)
    }

    /// Whether this rectangle lies entirely inside `0..width` x `0..height`.
    pub fn is_inside(&self, width: i64, height: i64) -> bool {
        self.x >= 0 && self.y >= 0 && self.right() <= width && self.bottom() <= height
    }

    pub fn contains(&self, x: i64, y: i64) -> bool {
        x >= self.x && y >= self.y && x < self.right() && y < self.bottom()
    }

    /// The intersection, or an empty rectangle when they do not overlap.
    pub fn overlap(&self, other: &Rect) -> Rect {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= left || bottom <= top {
            return Rect::default();
        }
        Rect::from_corners(left, top, right, bottom)
    }
}

//! Minimal 2D geometry used by the layout and boundary code.

use std::ops::{Add, AddAssign, Mul, MulAssign, Neg, Sub, SubAssign};

use serde::{Deserialize, Serialize};

/// A 2D vector in model coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn length_sq(self) -> f32 {
        self.x * self.x + self.y * self.y
    }

    pub fn length(self) -> f32 {
        self.length_sq().sqrt()
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    /// Z component of the 3D cross product of `(b - self)` and `(c - self)`.
    pub fn cross(self, b: Self, c: Self) -> f32 {
        (b.x - self.x) * (c.y - self.y) - (b.y - self.y) * (c.x - self.x)
    }
}

impl Add for Vec2 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl AddAssign for Vec2 {
    fn add_assign(&mut self, rhs: Self) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl Sub for Vec2 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl SubAssign for Vec2 {
    fn sub_assign(&mut self, rhs: Self) {
        self.x -= rhs.x;
        self.y -= rhs.y;
    }
}

impl Mul<f32> for Vec2 {
    type Output = Self;

    fn mul(self, rhs: f32) -> Self {
        Self::new(self.x * rhs, self.y * rhs)
    }
}

impl MulAssign<f32> for Vec2 {
    fn mul_assign(&mut self, rhs: f32) {
        self.x *= rhs;
        self.y *= rhs;
    }
}

impl Neg for Vec2 {
    type Output = Self;

    fn neg(self) -> Self {
        Self::new(-self.x, -self.y)
    }
}

/// Axis-aligned rectangle in model coordinates.
///
/// An empty rectangle has `left > right`; including any point makes it
/// non-empty.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub left: f32,
    pub bottom: f32,
    pub right: f32,
    pub top: f32,
}

impl Default for Rect {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl Rect {
    pub const EMPTY: Self = Self {
        left: f32::MAX,
        bottom: f32::MAX,
        right: -f32::MAX,
        top: -f32::MAX,
    };

    pub const fn new(left: f32, bottom: f32, right: f32, top: f32) -> Self {
        Self {
            left,
            bottom,
            right,
            top,
        }
    }

    /// Rectangle spanning all `points`, or [`Rect::EMPTY`] for no points.
    pub fn from_points<I: IntoIterator<Item = Vec2>>(points: I) -> Self {
        let mut rect = Self::EMPTY;
        for point in points {
            rect.include_point(point);
        }
        rect
    }

    pub fn is_empty(&self) -> bool {
        self.left > self.right || self.bottom > self.top
    }

    pub fn width(&self) -> f32 {
        if self.is_empty() {
            0.0
        } else {
            self.right - self.left
        }
    }

    pub fn height(&self) -> f32 {
        if self.is_empty() {
            0.0
        } else {
            self.top - self.bottom
        }
    }

    pub fn center(&self) -> Vec2 {
        Vec2::new((self.left + self.right) * 0.5, (self.bottom + self.top) * 0.5)
    }

    pub fn include_point(&mut self, point: Vec2) {
        self.left = self.left.min(point.x);
        self.right = self.right.max(point.x);
        self.bottom = self.bottom.min(point.y);
        self.top = self.top.max(point.y);
    }

    pub fn include_rect(&mut self, other: &Rect) {
        if other.is_empty() {
            return;
        }
        self.left = self.left.min(other.left);
        self.right = self.right.max(other.right);
        self.bottom = self.bottom.min(other.bottom);
        self.top = self.top.max(other.top);
    }

    /// Grow by `dx` on the left and right and `dy` on the bottom and top.
    pub fn inflate(&mut self, dx: f32, dy: f32) {
        self.left -= dx;
        self.right += dx;
        self.bottom -= dy;
        self.top += dy;
    }

    pub fn translated(&self, offset: Vec2) -> Self {
        Self::new(
            self.left + offset.x,
            self.bottom + offset.y,
            self.right + offset.x,
            self.top + offset.y,
        )
    }

    pub fn contains(&self, point: Vec2) -> bool {
        point.x >= self.left && point.x <= self.right && point.y >= self.bottom && point.y <= self.top
    }

    /// Corners in counter-clockwise order starting at the lower left.
    pub fn corners(&self) -> [Vec2; 4] {
        [
            Vec2::new(self.left, self.bottom),
            Vec2::new(self.right, self.bottom),
            Vec2::new(self.right, self.top),
            Vec2::new(self.left, self.top),
        ]
    }
}

//! Math utilities and types
//!
//! Provides the small set of vector types the 2D renderer needs.

pub use nalgebra::{Vector2, Vector3, Vector4, Matrix4};
use serde::{Serialize, Deserialize};

/// 2D vector type
pub type Vec2 = Vector2<f32>;

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// Axis-aligned box given by its top-left corner and extent
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect<T> {
    /// Left edge
    pub x: T,
    /// Top edge
    pub y: T,
    /// Width
    pub w: T,
    /// Height
    pub h: T,
}

impl<T> Rect<T> {
    /// Create a new box
    pub const fn new(x: T, y: T, w: T, h: T) -> Self {
        Self { x, y, w, h }
    }
}

impl Rect<f32> {
    /// Whether a point lies inside the box (right and bottom edges excluded)
    pub fn contains(&self, point: Vec2) -> bool {
        point.x >= self.x && point.x < self.x + self.w && point.y >= self.y && point.y < self.y + self.h
    }
}

/// Linear interpolation between two points, `t` is not clamped
pub fn lerp_vec2(from: Vec2, to: Vec2, t: f32) -> Vec2 {
    from + (to - from) * t
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_lerp_endpoints() {
        let a = Vec2::new(0.0, 0.0);
        let b = Vec2::new(24.0, -15.0);
        assert_relative_eq!(lerp_vec2(a, b, 0.0), a);
        assert_relative_eq!(lerp_vec2(a, b, 1.0), b);
        assert_relative_eq!(lerp_vec2(a, b, 0.5), Vec2::new(12.0, -7.5));
    }

    #[test]
    fn test_rect_contains_excludes_far_edges() {
        let rect = Rect::new(0.0, 0.0, 24.0, 15.0);
        assert!(rect.contains(Vec2::new(0.0, 0.0)));
        assert!(rect.contains(Vec2::new(23.9, 14.9)));
        assert!(!rect.contains(Vec2::new(24.0, 3.0)));
        assert!(!rect.contains(Vec2::new(3.0, -0.1)));
    }
}

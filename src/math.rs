//! Mathematical structs and functions.

use cgmath::{Point2, Vector2};
use std::f64::consts::PI;

/// A 2D point
pub type Point2d = Point2<f64>;

/// A 2D vector
pub type Vector2d = Vector2<f64>;

/// Normalises an angle to the range `[0, 2π)`.
pub fn normalize_angle(angle: f64) -> f64 {
    angle.rem_euclid(2.0 * PI)
}

/// Computes the smallest signed difference from `from` to `to`,
/// in the range `[-π, π)`.
pub fn angle_difference(from: f64, to: f64) -> f64 {
    (to - from + PI).rem_euclid(2.0 * PI) - PI
}

/// Euclidean distance between two points.
pub fn distance(a: Point2d, b: Point2d) -> f64 {
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    (dx * dx + dy * dy).sqrt()
}

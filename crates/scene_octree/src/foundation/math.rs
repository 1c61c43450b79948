//! Math utilities and types
//!
//! Provides the fundamental math types used by the spatial index.

pub use nalgebra::{Matrix4, Vector3};

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// 3D point type
pub type Point3 = nalgebra::Point3<f32>;

/// Squared value helper, mirrors how distance comparisons avoid `sqrt`
pub fn sqr(x: f32) -> f32 {
    x * x
}

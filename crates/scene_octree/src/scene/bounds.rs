//! Bounding volumes for spatial queries
//!
//! Axis-aligned boxes, spheres, planes, view frustums, and convex clip
//! hulls. These are the primitives every traversal in [`crate::spatial`]
//! is built on.

use crate::foundation::math::{sqr, Vec3};

/// Axis-Aligned Bounding Box for spatial queries
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    /// Minimum corner of the bounding box
    pub min: Vec3,
    /// Maximum corner of the bounding box
    pub max: Vec3,
}

impl Aabb {
    /// Create a new AABB from min and max points
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Create an AABB centered at a point with given extents
    pub fn from_center_extents(center: Vec3, extents: Vec3) -> Self {
        Self {
            min: center - extents,
            max: center + extents,
        }
    }

    /// Create an inverted empty AABB; growing it with [`Aabb::add_point`]
    /// or [`Aabb::add_aabb`] produces a tight bound
    pub fn reset() -> Self {
        Self {
            min: Vec3::new(f32::MAX, f32::MAX, f32::MAX),
            max: Vec3::new(f32::MIN, f32::MIN, f32::MIN),
        }
    }

    /// True for a box in the reset (empty) state
    pub fn is_reset(&self) -> bool {
        self.min.x > self.max.x
    }

    /// Get the center of the AABB
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Get the extents (half-size) of the AABB
    pub fn extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    /// Radius of the bounding sphere enclosing this box
    pub fn radius(&self) -> f32 {
        self.extents().magnitude()
    }

    /// Squared radius of the bounding sphere enclosing this box
    pub fn radius_sq(&self) -> f32 {
        self.extents().magnitude_squared()
    }

    /// Grow to include a point
    pub fn add_point(&mut self, point: Vec3) {
        self.min.x = self.min.x.min(point.x);
        self.min.y = self.min.y.min(point.y);
        self.min.z = self.min.z.min(point.z);
        self.max.x = self.max.x.max(point.x);
        self.max.y = self.max.y.max(point.y);
        self.max.z = self.max.z.max(point.z);
    }

    /// Grow to include another AABB
    pub fn add_aabb(&mut self, other: &Aabb) {
        if other.is_reset() {
            return;
        }
        self.add_point(other.min);
        self.add_point(other.max);
    }

    /// Translate the box
    pub fn translate(&mut self, offset: Vec3) {
        self.min += offset;
        self.max += offset;
    }

    /// Check if this AABB contains a point
    pub fn contains_point(&self, point: Vec3) -> bool {
        point.x >= self.min.x && point.x <= self.max.x &&
        point.y >= self.min.y && point.y <= self.max.y &&
        point.z >= self.min.z && point.z <= self.max.z
    }

    /// Check if this AABB fully contains another AABB
    pub fn contains_aabb(&self, other: &Aabb) -> bool {
        self.contains_point(other.min) && self.contains_point(other.max)
    }

    /// Check if this AABB intersects another AABB
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x && self.max.x >= other.min.x &&
        self.min.y <= other.max.y && self.max.y >= other.min.y &&
        self.min.z <= other.max.z && self.max.z >= other.min.z
    }

    /// Squared distance from a point to the closest point on this box;
    /// zero when the point is inside
    pub fn distance_sq(&self, point: Vec3) -> f32 {
        let closest = Vec3::new(
            point.x.clamp(self.min.x, self.max.x),
            point.y.clamp(self.min.y, self.max.y),
            point.z.clamp(self.min.z, self.max.z),
        );
        (closest - point).magnitude_squared()
    }

    /// Squared distance between the closest points of two boxes;
    /// zero when they overlap
    pub fn distance_sq_aabb(&self, other: &Aabb) -> f32 {
        let mut d2 = 0.0;
        if other.max.x < self.min.x {
            d2 += sqr(self.min.x - other.max.x);
        }
        if self.max.x < other.min.x {
            d2 += sqr(other.min.x - self.max.x);
        }
        if other.max.y < self.min.y {
            d2 += sqr(self.min.y - other.max.y);
        }
        if self.max.y < other.min.y {
            d2 += sqr(other.min.y - self.max.y);
        }
        if other.max.z < self.min.z {
            d2 += sqr(self.min.z - other.max.z);
        }
        if self.max.z < other.min.z {
            d2 += sqr(other.min.z - self.max.z);
        }
        d2
    }
}

/// Bounding sphere, used by shadow caster records
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sphere {
    /// Center of the sphere
    pub center: Vec3,
    /// Radius of the sphere
    pub radius: f32,
}

impl Sphere {
    /// Create a new sphere
    pub fn new(center: Vec3, radius: f32) -> Self {
        Self { center, radius }
    }

    /// Bounding sphere of an AABB
    pub fn from_aabb(aabb: &Aabb) -> Self {
        Self {
            center: aabb.center(),
            radius: aabb.radius(),
        }
    }
}

/// Plane defined by normal and distance from origin
#[derive(Debug, Clone, Copy)]
pub struct Plane {
    /// Normal vector (should be normalized)
    pub normal: Vec3,
    /// Distance from origin along the normal
    pub distance: f32,
}

impl Plane {
    /// Create a new plane from normal and distance
    pub fn new(normal: Vec3, distance: f32) -> Self {
        Self {
            normal: normal.normalize(),
            distance,
        }
    }

    /// Calculate signed distance from plane to point
    pub fn distance_to_point(&self, point: Vec3) -> f32 {
        self.normal.dot(&point) + self.distance
    }

    /// Corner of the box furthest along the plane normal
    fn positive_vertex(&self, aabb: &Aabb) -> Vec3 {
        let mut p = aabb.min;
        if self.normal.x >= 0.0 {
            p.x = aabb.max.x;
        }
        if self.normal.y >= 0.0 {
            p.y = aabb.max.y;
        }
        if self.normal.z >= 0.0 {
            p.z = aabb.max.z;
        }
        p
    }

    /// Corner of the box furthest against the plane normal
    fn negative_vertex(&self, aabb: &Aabb) -> Vec3 {
        let mut n = aabb.max;
        if self.normal.x >= 0.0 {
            n.x = aabb.min.x;
        }
        if self.normal.y >= 0.0 {
            n.y = aabb.min.y;
        }
        if self.normal.z >= 0.0 {
            n.z = aabb.min.z;
        }
        n
    }
}

/// Result of a volume-vs-frustum containment test
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Containment {
    /// Fully outside at least one plane
    Outside,
    /// Straddles one or more planes
    Intersecting,
    /// Fully inside all planes
    Inside,
}

/// Frustum for visibility culling
///
/// The three-state [`Frustum::test_aabb`] drives the "fully inside"
/// short-circuit: once a node is known to be completely inside, its
/// entire subtree skips further plane tests.
#[derive(Debug, Clone)]
pub struct Frustum {
    /// Six planes defining the frustum (left, right, top, bottom, near, far)
    pub planes: [Plane; 6],
}

impl Frustum {
    /// Create a frustum from six planes
    pub fn new(planes: [Plane; 6]) -> Self {
        Self { planes }
    }

    /// Frustum that contains everything (degenerate planes)
    pub fn unbounded() -> Self {
        let pass = Plane {
            normal: Vec3::zeros(),
            distance: 0.0,
        };
        Self { planes: [pass; 6] }
    }

    /// Orthographic frustum tightly enclosing an AABB, planes facing inward
    pub fn from_aabb(aabb: &Aabb) -> Self {
        Self {
            planes: [
                Plane::new(Vec3::new(1.0, 0.0, 0.0), -aabb.min.x),
                Plane::new(Vec3::new(-1.0, 0.0, 0.0), aabb.max.x),
                Plane::new(Vec3::new(0.0, 1.0, 0.0), -aabb.min.y),
                Plane::new(Vec3::new(0.0, -1.0, 0.0), aabb.max.y),
                Plane::new(Vec3::new(0.0, 0.0, 1.0), -aabb.min.z),
                Plane::new(Vec3::new(0.0, 0.0, -1.0), aabb.max.z),
            ],
        }
    }

    /// Classify an AABB against all six planes
    pub fn test_aabb(&self, aabb: &Aabb) -> Containment {
        let mut inside = true;
        for plane in &self.planes {
            if plane.distance_to_point(plane.positive_vertex(aabb)) < 0.0 {
                return Containment::Outside;
            }
            if plane.distance_to_point(plane.negative_vertex(aabb)) < 0.0 {
                inside = false;
            }
        }
        if inside {
            Containment::Inside
        } else {
            Containment::Intersecting
        }
    }

    /// Check if an AABB is inside or intersects the frustum
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        self.test_aabb(aabb) != Containment::Outside
    }

    /// Check if a point is inside the frustum
    pub fn contains_point(&self, point: Vec3) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.distance_to_point(point) >= 0.0)
    }
}

/// Convex hull of additional clip planes supplied by a shadow query
///
/// Unlike [`Frustum`] the plane count is variable. Tests are
/// conservative: a volume passes unless some plane fully rejects it.
#[derive(Debug, Clone, Default)]
pub struct ClipHull {
    /// Inward-facing planes bounding the hull
    pub planes: Vec<Plane>,
}

impl ClipHull {
    /// Create a hull from a set of inward-facing planes
    pub fn new(planes: Vec<Plane>) -> Self {
        Self { planes }
    }

    /// True unless the AABB is fully outside some hull plane
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.distance_to_point(plane.positive_vertex(aabb)) >= 0.0)
    }

    /// True unless the sphere is fully outside some hull plane
    pub fn intersects_sphere(&self, sphere: &Sphere) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.distance_to_point(sphere.center) >= -sphere.radius)
    }
}

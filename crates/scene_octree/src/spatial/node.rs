//! Octree node storage
//!
//! Nodes live in an arena keyed by [`NodeId`]; parent/child navigation
//! uses ids rather than pointers. A node owns its immutable split box,
//! a dynamic tight bound of contained content, per-category object
//! lists, and derived caches that are only valid while `compiled` is
//! set.

use std::collections::HashMap;

use crate::foundation::math::Vec3;
use crate::scene::bounds::{Aabb, Sphere};
use crate::scene::object::{ObjectCategory, ObjectId, ObjectTypeTag};
use crate::scene::tables::{GeometryId, MaterialId};

slotmap::new_key_type! {
    /// Stable handle to a node in the octree arena
    pub struct NodeId;
}

bitflags::bitflags! {
    /// Aggregated per-node flags, propagated up from contained objects
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NodeFlags: u32 {
        /// Subtree contains at least one shadow caster
        const HAS_CASTERS = 1 << 0;
    }
}

bitflags::bitflags! {
    /// Category selection for traversals
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CategoryMask: u8 {
        /// Vegetation list
        const VEGETATION = 1 << 0;
        /// Solid geometry list
        const SOLID_GEOMETRY = 1 << 1;
        /// Decal and road list
        const DECAL_ROAD = 1 << 2;
        /// Everything else
        const OTHER = 1 << 3;
    }
}

impl CategoryMask {
    /// Mask bit for one category
    pub fn of(category: ObjectCategory) -> Self {
        match category {
            ObjectCategory::Vegetation => Self::VEGETATION,
            ObjectCategory::SolidGeometry => Self::SOLID_GEOMETRY,
            ObjectCategory::DecalRoad => Self::DECAL_ROAD,
            ObjectCategory::Other => Self::OTHER,
        }
    }
}

/// Cached shadow-caster data derived from an object during compilation
#[derive(Debug, Clone)]
pub struct CasterRecord {
    /// The casting object
    pub object: ObjectId,
    /// Maximum distance at which this caster contributes to a shadow map
    pub max_cast_dist: f32,
    /// Bounding sphere used for fast distance rejection
    pub sphere: Sphere,
    /// World-space bounding box for per-object frustum tests
    pub bounds: Aabb,
    /// Render-type tag
    pub type_tag: ObjectTypeTag,
    /// Render-pass mask matched against the query mask
    pub pass_mask: u32,
    /// Whether the caster's shadow pass may run on a background job
    pub can_job: bool,
    /// Frame id when this record was last fully handled by a sun query;
    /// single-writer, frame-thread-only
    pub skip_frame: u32,
}

/// Key grouping instancing candidates within one node
pub type InstanceKey = (GeometryId, MaterialId);

/// One octree cell
#[derive(Debug, Clone)]
pub struct OctreeNode {
    /// Box assigned at creation; defines octant selection, never mutated
    pub split_box: Aabb,
    /// Tight bound of all contained content, own and descendant
    pub content_box: Aabb,
    /// Parent node; `None` only for the root
    pub parent: Option<NodeId>,
    /// Child cells, lazily created
    pub children: [Option<NodeId>; 8],
    /// Per-category object lists; order inside a list is irrelevant
    pub lists: [Vec<ObjectId>; ObjectCategory::COUNT],
    /// Derived caches below are valid only while this is set
    pub compiled: bool,
    /// Shadow caster records, rebuilt by compilation
    pub casters: Vec<CasterRecord>,
    /// Max view distance over own objects and descendants
    pub max_view_dist: f32,
    /// Aggregated flags propagated up from contained objects
    pub flags: NodeFlags,
    /// Frame id of the last passed visibility test; frame-thread-only
    pub last_visible_frame: u32,
    /// Frame id of the last failed occlusion test; frame-thread-only
    pub last_occluded_frame: u32,
    /// Frame id stamped when a shadow query fully covered this subtree
    pub caster_skip_frame: u32,
    /// Instancing groups need rebuilding before the next compile
    pub instancing_dirty: bool,
    /// Consolidated groups by (geometry, material), when instancing ran
    pub instancing_groups: Option<HashMap<InstanceKey, Vec<ObjectId>>>,
}

impl OctreeNode {
    /// Create an empty node covering `split_box`
    pub fn new(split_box: Aabb, parent: Option<NodeId>) -> Self {
        Self {
            split_box,
            content_box: split_box,
            parent,
            children: [None; 8],
            lists: Default::default(),
            compiled: false,
            casters: Vec::new(),
            max_view_dist: 0.0,
            flags: NodeFlags::empty(),
            last_visible_frame: 0,
            last_occluded_frame: 0,
            caster_skip_frame: 0,
            instancing_dirty: true,
            instancing_groups: None,
        }
    }

    /// Center of the split box
    pub fn center(&self) -> Vec3 {
        self.split_box.center()
    }

    /// Squared bounding-sphere radius of the split box
    pub fn radius_sq(&self) -> f32 {
        self.split_box.radius_sq()
    }

    /// Octant index (0-7) for a point, one comparison bit per axis
    pub fn octant_for(&self, point: Vec3) -> usize {
        let center = self.center();
        (usize::from(point.x > center.x) << 2)
            | (usize::from(point.y > center.y) << 1)
            | usize::from(point.z > center.z)
    }

    /// Split box of the child occupying octant `octant`
    pub fn child_box(&self, octant: usize) -> Aabb {
        let extents = self.split_box.extents();
        let offset = Vec3::new(
            if octant & 4 != 0 { extents.x } else { 0.0 },
            if octant & 2 != 0 { extents.y } else { 0.0 },
            if octant & 1 != 0 { extents.z } else { 0.0 },
        );
        let min = self.split_box.min + offset;
        Aabb::new(min, min + extents)
    }

    /// True when at least one child exists
    pub fn has_children(&self) -> bool {
        self.children.iter().any(Option::is_some)
    }

    /// True when any category list is non-empty
    pub fn has_objects(&self) -> bool {
        self.lists.iter().any(|list| !list.is_empty())
    }

    /// A non-root node with no objects and no children can be collapsed
    pub fn is_empty(&self) -> bool {
        self.parent.is_some() && !self.has_children() && !self.has_objects()
    }

    /// True when a category selected by `mask` has objects
    pub fn has_renderable_candidates(&self, mask: CategoryMask) -> bool {
        ObjectCategory::ALL
            .iter()
            .any(|&c| mask.contains(CategoryMask::of(c)) && !self.lists[c.index()].is_empty())
    }

    /// Bit mask of present children (bit *i* set when octant *i* exists)
    pub fn child_mask(&self) -> u8 {
        let mut mask = 0u8;
        for (i, child) in self.children.iter().enumerate() {
            if child.is_some() {
                mask |= 1 << i;
            }
        }
        mask
    }
}

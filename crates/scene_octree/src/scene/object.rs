//! Renderable object representation for the spatial index
//!
//! This is the cached rendering data the octree owns for every
//! registered object. Gameplay-side state stays outside; the index only
//! keeps what its traversals need: bounds, flags, view distance, and
//! the interned geometry/material references.

use crate::foundation::math::{Mat4, Vec3};
use crate::scene::bounds::Aabb;
use crate::scene::tables::{GeometryId, MaterialId};
use crate::spatial::NodeId;

slotmap::new_key_type! {
    /// Stable handle to an object owned by the octree
    pub struct ObjectId;
}

/// Fixed object categories; each octree node keeps one list per category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ObjectCategory {
    /// Instanced vegetation, eligible for static-instancing consolidation
    Vegetation = 0,
    /// Static solid geometry (brushes, buildings)
    SolidGeometry = 1,
    /// Decals and road strips
    DecalRoad = 2,
    /// Everything else (lights, particle emitters, misc)
    Other = 3,
}

impl ObjectCategory {
    /// Number of category lists per node
    pub const COUNT: usize = 4;

    /// All categories in list order
    pub const ALL: [ObjectCategory; Self::COUNT] = [
        ObjectCategory::Vegetation,
        ObjectCategory::SolidGeometry,
        ObjectCategory::DecalRoad,
        ObjectCategory::Other,
    ];

    /// List index of this category
    pub fn index(self) -> usize {
        self as usize
    }

    /// Category from a list index, if valid
    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Self::Vegetation),
            1 => Some(Self::SolidGeometry),
            2 => Some(Self::DecalRoad),
            3 => Some(Self::Other),
            _ => None,
        }
    }
}

/// Render-type tag carried by shadow caster records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ObjectTypeTag {
    /// Generic static or skinned mesh
    Mesh = 0,
    /// Vegetation instance
    Vegetation = 1,
    /// Particle emitter
    ParticleEmitter = 2,
    /// Light source (never a shadow caster)
    Light = 3,
    /// Decal
    Decal = 4,
    /// Road strip
    Road = 5,
}

impl ObjectTypeTag {
    /// Tag from its serialized value, if valid
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Mesh),
            1 => Some(Self::Vegetation),
            2 => Some(Self::ParticleEmitter),
            3 => Some(Self::Light),
            4 => Some(Self::Decal),
            5 => Some(Self::Road),
            _ => None,
        }
    }

    /// Bit used by the per-type enable mask in the config
    pub fn mask_bit(self) -> u32 {
        1 << (self as u32)
    }
}

bitflags::bitflags! {
    /// Per-object render flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ObjectFlags: u32 {
        /// Excluded from all rendering and shadow queries
        const HIDDEN = 1 << 0;
        /// Contributes to shadow maps
        const CAST_SHADOWS = 1 << 1;
        /// Collision-only stand-in, never rendered
        const COLLISION_PROXY = 1 << 2;
        /// Rendering is covered by an instancing representative
        const STATIC_INSTANCING = 1 << 3;
        /// Useful as an occluder for occlusion culling
        const GOOD_OCCLUDER = 1 << 4;
    }
}

/// Per-instance transforms attached to an instancing representative
#[derive(Debug, Clone)]
pub struct InstanceBatch {
    /// One world transform per consolidated member (representative first)
    pub transforms: Vec<Mat4>,
    /// Union of the member bounding boxes
    pub bounds: Aabb,
}

/// Renderable object owned by the octree
#[derive(Debug, Clone)]
pub struct RenderObject {
    /// World-space bounding box
    pub bounds: Aabb,
    /// World transform
    pub transform: Mat4,
    /// Category list this object lives in
    pub category: ObjectCategory,
    /// Render-type tag
    pub type_tag: ObjectTypeTag,
    /// Render flags
    pub flags: ObjectFlags,
    /// Maximum distance at which this object is rendered
    pub max_view_dist: f32,
    /// Render-pass bit mask matched against shadow query masks
    pub pass_mask: u32,
    /// Whether this object's shadow pass may run on a background job
    pub can_render_as_job: bool,
    /// Interned geometry reference
    pub geometry: GeometryId,
    /// Interned material reference
    pub material: MaterialId,
    /// Instance placements when this object is an instancing representative
    pub instancing: Option<InstanceBatch>,
    /// Node that owns this object; maintained by the tree
    pub(crate) owner: Option<NodeId>,
    /// Position inside the owner's category list; maintained by the tree
    pub(crate) list_slot: usize,
}

impl RenderObject {
    /// Create a new object ready for insertion
    pub fn new(
        bounds: Aabb,
        transform: Mat4,
        category: ObjectCategory,
        type_tag: ObjectTypeTag,
        flags: ObjectFlags,
        max_view_dist: f32,
        geometry: GeometryId,
        material: MaterialId,
    ) -> Self {
        Self {
            bounds,
            transform,
            category,
            type_tag,
            flags,
            max_view_dist,
            pass_mask: u32::MAX,
            can_render_as_job: true,
            geometry,
            material,
            instancing: None,
            owner: None,
            list_slot: 0,
        }
    }

    /// Node currently owning this object, if inserted
    pub fn owner(&self) -> Option<NodeId> {
        self.owner
    }

    /// World-space center of the bounding box
    pub fn center(&self) -> Vec3 {
        self.bounds.center()
    }

    /// Bounding-sphere radius
    pub fn radius(&self) -> f32 {
        self.bounds.radius()
    }

    /// True when the object takes part in individual rendering
    pub fn is_renderable(&self) -> bool {
        !self
            .flags
            .intersects(ObjectFlags::HIDDEN | ObjectFlags::STATIC_INSTANCING)
    }
}

/// Maps engine-side object descriptions onto index categories and view
/// distances (upstream classifier interface)
pub trait ObjectClassifier {
    /// Category list for a render type
    fn category_for(&self, tag: ObjectTypeTag) -> ObjectCategory;

    /// Maximum view distance for an object with the given bounds
    fn max_view_distance(&self, tag: ObjectTypeTag, bounds: &Aabb) -> f32;
}

/// Default classifier: categories by render type, view distance scaled
/// from the bounding-sphere radius
#[derive(Debug, Clone)]
pub struct DefaultClassifier {
    /// View distance per unit of object radius
    pub view_dist_ratio: f32,
}

impl Default for DefaultClassifier {
    fn default() -> Self {
        Self {
            view_dist_ratio: 100.0,
        }
    }
}

impl ObjectClassifier for DefaultClassifier {
    fn category_for(&self, tag: ObjectTypeTag) -> ObjectCategory {
        match tag {
            ObjectTypeTag::Vegetation => ObjectCategory::Vegetation,
            ObjectTypeTag::Mesh => ObjectCategory::SolidGeometry,
            ObjectTypeTag::Decal | ObjectTypeTag::Road => ObjectCategory::DecalRoad,
            ObjectTypeTag::ParticleEmitter | ObjectTypeTag::Light => ObjectCategory::Other,
        }
    }

    fn max_view_distance(&self, _tag: ObjectTypeTag, bounds: &Aabb) -> f32 {
        bounds.radius() * self.view_dist_ratio
    }
}

//! # Scene Octree
//!
//! A dynamic axis-aligned octree spatial index for engine frame loops.
//!
//! ## Features
//!
//! - **Dynamic updates**: insertion and O(1) removal with deferred
//!   collapse of emptied nodes
//! - **Visibility walks**: near-to-far frustum traversal with
//!   per-frame occlusion memoization
//! - **Shadow casting**: full and time-sliced, resumable caster
//!   collection with sun cascade skip memos
//! - **Streaming prioritization**: multi-camera distance and
//!   importance reporting for asset prefetch
//! - **Static instancing**: reversible consolidation of repeated
//!   vegetation into transform batches
//! - **Serialization**: endianness-aware binary baking and loading
//!
//! ## Quick Start
//!
//! ```rust
//! use scene_octree::prelude::*;
//!
//! let world = Aabb::new(Vec3::zeros(), Vec3::new(256.0, 256.0, 256.0));
//! let mut tree = Octree::new(world, OctreeConfig::default());
//!
//! let id = tree.register(
//!     ObjectTypeTag::Mesh,
//!     Aabb::from_center_extents(Vec3::new(10.0, 10.0, 10.0), Vec3::new(1.0, 1.0, 1.0)),
//!     Mat4::identity(),
//!     ObjectFlags::CAST_SHADOWS,
//!     "rock/boulder_a",
//!     "mat/stone",
//!     &DefaultClassifier::default(),
//! );
//!
//! let frame = FrameInfo::new(1, Vec3::new(8.0, 8.0, 8.0), Frustum::unbounded());
//! let mut queue = CollectingQueue::new();
//! let mut visible = VisibleSet::new();
//! tree.collect_visible(&frame, CategoryMask::all(), &NeverOccluded, &mut queue, &mut visible);
//! assert!(visible.iter().any(|o| o == id));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod foundation;
pub mod scene;
pub mod spatial;

pub use config::{Config, ConfigError, OctreeConfig, StaticInstancingConfig};
pub use spatial::Octree;

/// Common imports for index users
pub mod prelude {
    pub use crate::{
        config::{Config, OctreeConfig, StaticInstancingConfig},
        foundation::math::{Mat4, Vec3},
        scene::{
            bounds::{Aabb, ClipHull, Containment, Frustum, Plane, Sphere},
            jobs::{CollectingQueue, JobQueue, WorkItem},
            object::{
                DefaultClassifier, InstanceBatch, ObjectCategory, ObjectClassifier, ObjectFlags,
                ObjectId, ObjectTypeTag, RenderObject,
            },
            tables::{GeometryId, InternTable, MaterialId},
        },
        spatial::{
            CasterLists, CategoryMask, CodecError, Endian, FrameInfo, NeverOccluded, NoPortals,
            NodeId, OcclusionOracle, Octree, PortalDistanceOracle, PrecacheCamera, ShadowQuery,
            StreamingSink, StreamingUpdate, TraversalCursor, VisibleSet,
        },
    };
}

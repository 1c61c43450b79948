//! Scene-side types consumed by the spatial index: bounding volumes,
//! renderable objects, interning tables, and the job queue boundary.

pub mod bounds;
pub mod jobs;
pub mod object;
pub mod tables;

pub use bounds::{Aabb, ClipHull, Containment, Frustum, Plane, Sphere};
pub use jobs::{CollectingQueue, JobQueue, WorkItem};
pub use object::{
    DefaultClassifier, InstanceBatch, ObjectCategory, ObjectClassifier, ObjectFlags, ObjectId,
    ObjectTypeTag, RenderObject,
};
pub use tables::{GeometryId, InternTable, MaterialId};

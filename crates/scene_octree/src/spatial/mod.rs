//! Octree storage and the traversals built on top of it

pub mod codec;
mod compile;
pub mod instancing;
pub mod node;
pub mod octree;
pub mod shadow;
pub mod streaming;
pub mod visibility;

pub use codec::{CodecError, Endian};
pub use node::{CasterRecord, CategoryMask, InstanceKey, NodeFlags, NodeId, OctreeNode};
pub use octree::Octree;
pub use shadow::{CasterLists, ShadowQuery, TraversalCursor};
pub use streaming::{
    NoPortals, PortalDistanceOracle, PrecacheCamera, StreamingSink, StreamingUpdate,
};
pub use visibility::{FrameInfo, NeverOccluded, OcclusionOracle, VisibleSet};

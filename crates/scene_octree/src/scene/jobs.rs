//! Job queue boundary for deferred per-node work
//!
//! The visibility walker either builds a node's content lists inline or
//! hands the node off to an external job system. Workers receive a
//! [`WorkItem`] naming a compiled, read-only node; they must not mutate
//! tree topology or compilation state, only read the finalized lists
//! and write their own output buffers.

use crate::spatial::{CategoryMask, NodeId};

/// Deferred content-build request for one octree node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkItem {
    /// Node whose content lists should be built
    pub node: NodeId,
    /// Categories requested by the walk
    pub mask: CategoryMask,
    /// Frame the request belongs to
    pub frame_id: u32,
}

/// External job queue interface
pub trait JobQueue {
    /// Submit one work item for asynchronous execution
    fn submit(&mut self, item: WorkItem);
}

/// Queue that records submissions without executing them; the frame
/// loop (or a test) drains it explicitly
#[derive(Debug, Default)]
pub struct CollectingQueue {
    /// Items submitted so far, in submission order
    pub items: Vec<WorkItem>,
}

impl CollectingQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return all pending items
    pub fn drain(&mut self) -> Vec<WorkItem> {
        std::mem::take(&mut self.items)
    }
}

impl JobQueue for CollectingQueue {
    fn submit(&mut self, item: WorkItem) {
        self.items.push(item);
    }
}

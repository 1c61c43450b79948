//! Dynamic octree container: insertion, removal, pruning, box queries
//!
//! Structural mutation is synchronous and single-threaded (the frame
//! thread); traversals in the sibling modules only read finalized
//! state. Empty nodes are not deleted inline but queued on a pending
//! collapse list drained by [`Octree::collapse_empty_nodes`].

use std::collections::VecDeque;

use log::{debug, trace};
use slotmap::SlotMap;

use crate::config::OctreeConfig;
use crate::foundation::math::{sqr, Vec3};
use crate::scene::bounds::Aabb;
use crate::scene::object::{ObjectClassifier, ObjectFlags, ObjectId, ObjectTypeTag, RenderObject};
use crate::scene::tables::{GeometryId, InternTable, MaterialId};
use crate::spatial::node::{NodeFlags, NodeId, OctreeNode};

/// Dynamic axis-aligned octree spatial index
///
/// Owns both the node arena and the registered objects. All structural
/// mutation happens through `&mut self`; per-frame memo fields on the
/// nodes are written by the frame thread only.
#[derive(Debug)]
pub struct Octree {
    pub(crate) nodes: SlotMap<NodeId, OctreeNode>,
    pub(crate) objects: SlotMap<ObjectId, RenderObject>,
    pub(crate) root: NodeId,
    pub(crate) config: OctreeConfig,
    pub(crate) pending_collapse: Vec<NodeId>,
    /// Bumped on every topology change; stale traversal cursors compare
    /// against this and reset themselves
    pub(crate) cursor_version: u64,
    pub(crate) geometry_table: InternTable,
    pub(crate) material_table: InternTable,
}

impl Octree {
    /// Create an empty tree whose root spans `world_box`
    pub fn new(world_box: Aabb, config: OctreeConfig) -> Self {
        let mut nodes = SlotMap::with_key();
        let root = nodes.insert(OctreeNode::new(world_box, None));
        Self {
            nodes,
            objects: SlotMap::with_key(),
            root,
            config,
            pending_collapse: Vec::new(),
            cursor_version: 0,
            geometry_table: InternTable::new(),
            material_table: InternTable::new(),
        }
    }

    /// Root node id
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Tree configuration
    pub fn config(&self) -> &OctreeConfig {
        &self.config
    }

    /// Borrow a node
    pub fn node(&self, id: NodeId) -> Option<&OctreeNode> {
        self.nodes.get(id)
    }

    /// Borrow an object
    pub fn object(&self, id: ObjectId) -> Option<&RenderObject> {
        self.objects.get(id)
    }

    /// Number of live nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of registered objects
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Iterate over all registered objects
    pub fn objects(&self) -> impl Iterator<Item = (ObjectId, &RenderObject)> {
        self.objects.iter()
    }

    /// Geometry interning table shared by codec and consolidator
    pub fn geometry_table(&self) -> &InternTable {
        &self.geometry_table
    }

    /// Material interning table shared by codec and consolidator
    pub fn material_table(&self) -> &InternTable {
        &self.material_table
    }

    /// Version stamp compared by resumable traversal cursors
    pub fn cursor_version(&self) -> u64 {
        self.cursor_version
    }

    /// Classify, intern, and insert an object in one step
    pub fn register(
        &mut self,
        type_tag: ObjectTypeTag,
        bounds: Aabb,
        transform: crate::foundation::math::Mat4,
        flags: ObjectFlags,
        geometry_key: &str,
        material_key: &str,
        classifier: &dyn ObjectClassifier,
    ) -> ObjectId {
        let geometry = GeometryId(self.geometry_table.intern(geometry_key));
        let material = MaterialId(self.material_table.intern(material_key));
        let category = classifier.category_for(type_tag);
        let max_view_dist = classifier.max_view_distance(type_tag, &bounds);
        let object = RenderObject::new(
            bounds,
            transform,
            category,
            type_tag,
            flags,
            max_view_dist,
            geometry,
            material,
        );
        self.insert(object)
    }

    /// Insert an object, descending to the octant whose split-box center
    /// test matches the object's center and creating nodes as needed
    ///
    /// The whole walked chain is marked uncompiled.
    pub fn insert(&mut self, object: RenderObject) -> ObjectId {
        let target = self.descend_inserting(&object);
        let id = self.objects.insert(object);

        let obj = &mut self.objects[id];
        obj.owner = Some(target);
        let node = &mut self.nodes[target];
        let list = &mut node.lists[obj.category.index()];
        obj.list_slot = list.len();
        list.push(id);
        node.instancing_dirty = true;

        self.mark_chain_uncompiled(target);
        self.cursor_version += 1;
        trace!("inserted object {id:?} into node {target:?}");
        id
    }

    /// Remove an object in O(1) via its owner back-pointer
    ///
    /// The owning chain is marked uncompiled; if the node became empty
    /// it is queued for collapse.
    pub fn remove(&mut self, id: ObjectId) -> Option<RenderObject> {
        let object = self.objects.remove(id)?;
        let Some(owner) = object.owner else {
            return Some(object);
        };

        let node = &mut self.nodes[owner];
        let list = &mut node.lists[object.category.index()];
        let slot = object.list_slot;
        debug_assert!(slot < list.len() && list[slot] == id);
        list.swap_remove(slot);
        if let Some(&moved) = list.get(slot) {
            self.objects[moved].list_slot = slot;
        }

        let node = &mut self.nodes[owner];
        node.casters.retain(|caster| caster.object != id);
        node.instancing_dirty = true;

        self.mark_chain_uncompiled(owner);
        if self.nodes[owner].is_empty() && !self.pending_collapse.contains(&owner) {
            self.pending_collapse.push(owner);
        }
        self.cursor_version += 1;
        Some(object)
    }

    /// Invalidate the derived caches along an object's owner chain,
    /// e.g. after its flags or bounds metadata changed in place
    pub fn mark_uncompiled(&mut self, object: ObjectId) {
        if let Some(owner) = self.objects.get(object).and_then(|o| o.owner) {
            self.nodes[owner].instancing_dirty = true;
            self.mark_chain_uncompiled(owner);
        }
    }

    /// Drain the pending-collapse queue, deleting nodes that are still
    /// empty. Smallest nodes go first so children collapse before their
    /// parents; a parent emptied by the collapse is re-queued.
    pub fn collapse_empty_nodes(&mut self) {
        if self.pending_collapse.is_empty() {
            return;
        }
        self.pending_collapse.sort_by(|a, b| {
            let ra = self.nodes.get(*a).map_or(0.0, OctreeNode::radius_sq);
            let rb = self.nodes.get(*b).map_or(0.0, OctreeNode::radius_sq);
            ra.total_cmp(&rb)
        });

        let mut queue: VecDeque<NodeId> = self.pending_collapse.drain(..).collect();
        let mut removed = 0usize;
        while let Some(id) = queue.pop_front() {
            let Some(node) = self.nodes.get(id) else {
                continue;
            };
            if !node.is_empty() {
                continue;
            }
            let parent = node.parent.expect("non-root guaranteed by is_empty");
            self.nodes.remove(id);
            removed += 1;

            let parent_node = &mut self.nodes[parent];
            for child in &mut parent_node.children {
                if *child == Some(id) {
                    *child = None;
                }
            }
            if parent_node.is_empty() && !queue.contains(&parent) {
                queue.push_back(parent);
            }
        }
        if removed > 0 {
            debug!("collapsed {removed} empty octree nodes");
            self.cursor_version += 1;
        }
    }

    /// Recursively drop empty subtrees and rebuild `content_box` and
    /// `max_view_dist` bottom-up; run before serialization
    pub fn cleanup(&mut self) {
        self.cleanup_node(self.root);
        self.pending_collapse.clear();
        self.cursor_version += 1;
    }

    fn cleanup_node(&mut self, id: NodeId) -> bool {
        let children = self.nodes[id].children;
        let mut child_content = false;
        for (octant, child) in children.iter().enumerate() {
            if let Some(child) = *child {
                if self.cleanup_node(child) {
                    child_content = true;
                } else {
                    self.nodes.remove(child);
                    self.nodes[id].children[octant] = None;
                }
            }
        }

        let mut max_view_dist = 0.0f32;
        let mut content_box = self.nodes[id].split_box;
        for category in 0..self.nodes[id].lists.len() {
            for slot in 0..self.nodes[id].lists[category].len() {
                let object_id = self.nodes[id].lists[category][slot];
                let object = &self.objects[object_id];
                max_view_dist = max_view_dist.max(object.max_view_dist);
                content_box.add_aabb(&object.bounds);
            }
        }
        for child in self.nodes[id].children.iter().flatten() {
            let child_node = &self.nodes[*child];
            max_view_dist = max_view_dist.max(child_node.max_view_dist);
            content_box.add_aabb(&child_node.content_box);
        }

        let node = &mut self.nodes[id];
        node.max_view_dist = max_view_dist;
        node.content_box = content_box;
        child_content || node.has_objects()
    }

    /// Re-descend with the insertion rule without mutating anything;
    /// lands on the node that owns (or would own) such an object
    pub fn locate(&self, bounds: &Aabb, max_view_dist: f32) -> NodeId {
        let center = bounds.center();
        let radius_sq = bounds.radius_sq();
        let mut current = self.root;
        loop {
            let node = &self.nodes[current];
            if self.may_descend(node, radius_sq, max_view_dist) {
                let octant = node.octant_for(center);
                if let Some(child) = node.children[octant] {
                    current = child;
                    continue;
                }
            }
            return current;
        }
    }

    /// All objects whose bounding boxes overlap `query`
    pub fn objects_in_box(&self, query: &Aabb) -> Vec<ObjectId> {
        let mut out = Vec::new();
        self.box_query_node(self.root, query, &mut out);
        out
    }

    fn box_query_node(&self, id: NodeId, query: &Aabb, out: &mut Vec<ObjectId>) {
        let node = &self.nodes[id];
        if !query.intersects(&node.content_box) {
            return;
        }
        for list in &node.lists {
            for &object_id in list {
                if self.objects[object_id].bounds.intersects(query) {
                    out.push(object_id);
                }
            }
        }
        for child in node.children.iter().flatten() {
            self.box_query_node(*child, query, out);
        }
    }

    /// Shift the whole world by `offset` (origin rebasing); invalidates
    /// all compiled state
    pub fn offset_objects(&mut self, offset: Vec3) {
        let node_ids: Vec<NodeId> = self.nodes.keys().collect();
        for id in node_ids {
            let node = &mut self.nodes[id];
            node.split_box.translate(offset);
            node.content_box.translate(offset);
            node.compiled = false;
        }
        let object_ids: Vec<ObjectId> = self.objects.keys().collect();
        for id in object_ids {
            let object = &mut self.objects[id];
            object.bounds.translate(offset);
            object.transform.m14 += offset.x;
            object.transform.m24 += offset.y;
            object.transform.m34 += offset.z;
        }
        self.cursor_version += 1;
    }

    /// Descent gates shared by insertion and [`Octree::locate`]:
    /// stop at the minimum node size, for objects too large relative to
    /// the child, or for objects visible further than the child covers
    fn may_descend(&self, node: &OctreeNode, radius_sq: f32, max_view_dist: f32) -> bool {
        if node.split_box.extents().x * 2.0 <= self.config.min_node_size {
            return false;
        }
        let node_radius = node.radius_sq().sqrt();
        radius_sq < sqr(node_radius * self.config.object_to_node_size_ratio)
            && max_view_dist < node_radius * self.config.view_dist_ratio
    }

    fn descend_inserting(&mut self, object: &RenderObject) -> NodeId {
        let center = object.bounds.center();
        let radius_sq = object.bounds.radius_sq();
        let casts = object.flags.contains(ObjectFlags::CAST_SHADOWS);

        let mut current = self.root;
        loop {
            let step = {
                let node = &self.nodes[current];
                if self.may_descend(node, radius_sq, object.max_view_dist) {
                    let octant = node.octant_for(center);
                    match node.children[octant] {
                        Some(child) => DescendStep::Into(child),
                        None => DescendStep::Create(octant, node.child_box(octant)),
                    }
                } else {
                    DescendStep::Stop
                }
            };

            // aggregates grow along the whole walked path
            let node = &mut self.nodes[current];
            node.content_box.add_aabb(&object.bounds);
            node.max_view_dist = node.max_view_dist.max(object.max_view_dist);
            if casts {
                node.flags |= NodeFlags::HAS_CASTERS;
            }

            match step {
                DescendStep::Into(child) => current = child,
                DescendStep::Create(octant, child_box) => {
                    let child = self.nodes.insert(OctreeNode::new(child_box, Some(current)));
                    self.nodes[current].children[octant] = Some(child);
                    current = child;
                }
                DescendStep::Stop => return current,
            }
        }
    }

    pub(crate) fn mark_chain_uncompiled(&mut self, from: NodeId) {
        let mut current = Some(from);
        while let Some(id) = current {
            let node = &mut self.nodes[id];
            node.compiled = false;
            current = node.parent;
        }
    }
}

enum DescendStep {
    Into(NodeId),
    Create(usize, Aabb),
    Stop,
}

//! Lazy per-node compilation
//!
//! A node is compiled on first use after any mutation touched it:
//! shadow caster records are rebuilt from the object lists, the
//! content box and maximum view distance are recomputed, and both are
//! propagated up to the parents so subtree-level rejection stays
//! conservative.

use log::trace;

use crate::scene::bounds::Sphere;
use crate::scene::object::{ObjectFlags, ObjectTypeTag};
use crate::spatial::node::{CasterRecord, NodeFlags, NodeId};
use crate::spatial::octree::Octree;

impl Octree {
    /// Compile `id` if its derived caches are stale
    ///
    /// Pending instancing consolidation runs first so the caster list
    /// reflects batched representatives rather than hidden members.
    pub fn compile(&mut self, id: NodeId) {
        if self.nodes[id].compiled {
            return;
        }
        if self.nodes[id].instancing_dirty {
            self.check_update_instancing(id);
        }
        self.rebuild_casters(id);
        self.recompute_aggregates(id);
        self.nodes[id].compiled = true;
        trace!("compiled node {id:?}");
    }

    /// Compile every stale node in the tree; used before serialization
    /// and by tests that want fully deterministic caster lists
    pub fn compile_all(&mut self) {
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            self.compile(id);
            stack.extend(self.nodes[id].children.iter().flatten().copied());
        }
    }

    fn rebuild_casters(&mut self, id: NodeId) {
        let mut casters = Vec::new();
        let list_len: Vec<usize> = self.nodes[id].lists.iter().map(Vec::len).collect();
        for (category, len) in list_len.into_iter().enumerate() {
            for slot in 0..len {
                let object_id = self.nodes[id].lists[category][slot];
                let object = &self.objects[object_id];
                if object.flags.intersects(
                    ObjectFlags::HIDDEN
                        | ObjectFlags::COLLISION_PROXY
                        | ObjectFlags::STATIC_INSTANCING,
                ) {
                    continue;
                }
                if !object.flags.contains(ObjectFlags::CAST_SHADOWS) {
                    continue;
                }
                // near-only objects never reach a shadow map texel
                if object.max_view_dist <= self.config.min_caster_view_dist {
                    continue;
                }
                // light sources illuminate, they do not cast
                if object.type_tag == ObjectTypeTag::Light {
                    continue;
                }
                casters.push(CasterRecord {
                    object: object_id,
                    max_cast_dist: object.max_view_dist * self.config.cast_dist_ratio,
                    sphere: Sphere::from_aabb(&object.bounds),
                    bounds: object.bounds,
                    type_tag: object.type_tag,
                    pass_mask: object.pass_mask,
                    can_job: object.can_render_as_job,
                    skip_frame: 0,
                });
            }
        }
        if casters.len() > self.config.max_casters_per_node {
            // keep the farthest-reaching casters when over budget
            casters.sort_by(|a, b| b.max_cast_dist.total_cmp(&a.max_cast_dist));
            casters.truncate(self.config.max_casters_per_node);
        }
        self.nodes[id].casters = casters;
    }

    fn recompute_aggregates(&mut self, id: NodeId) {
        let mut max_view_dist = 0.0f32;
        let mut content_box = self.nodes[id].split_box;
        let mut has_casters = !self.nodes[id].casters.is_empty();

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
            has_casters |= child_node.flags.contains(NodeFlags::HAS_CASTERS);
        }

        {
            let node = &mut self.nodes[id];
            node.max_view_dist = max_view_dist;
            node.content_box = content_box;
            node.flags.set(NodeFlags::HAS_CASTERS, has_casters);
        }

        // parents stay conservative: aggregates only grow upward here
        let mut current = self.nodes[id].parent;
        while let Some(parent) = current {
            let node = &mut self.nodes[parent];
            node.max_view_dist = node.max_view_dist.max(max_view_dist);
            node.content_box.add_aabb(&content_box);
            if has_casters {
                node.flags |= NodeFlags::HAS_CASTERS;
            }
            current = node.parent;
        }
    }
}

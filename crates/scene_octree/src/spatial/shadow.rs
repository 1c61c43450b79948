//! Shadow caster collection
//!
//! Two traversals over the compiled caster records: a full recursive
//! walk per shadow frustum, and a budgeted resumable walk for cached
//! shadow maps that are refreshed over several frames.
//!
//! For sun cascades the walk stamps per-record and per-node skip
//! frames: a caster rejected by distance or by the shadow hull, or
//! already fully covered by an earlier cascade, is skipped by the
//! remaining cascades of the same frame without re-testing.

use std::collections::HashSet;

use crate::foundation::math::{sqr, Vec3};
use crate::scene::bounds::{ClipHull, Containment, Frustum};
use crate::scene::object::{ObjectId, ObjectTypeTag};
use crate::spatial::node::{NodeFlags, NodeId};
use crate::spatial::octree::Octree;

/// One shadow-frustum query against the tree
#[derive(Debug, Clone)]
pub struct ShadowQuery {
    /// Frame counter; drives the per-record and per-node skip memos
    pub frame_id: u32,
    /// Directional sun light (enables the skip-frame memos)
    pub sun: bool,
    /// Camera position, for cast-distance rejection
    pub camera_pos: Vec3,
    /// Shadow frustum volume
    pub frustum: Frustum,
    /// Optional convex hull bounding the area that can receive the
    /// shadows; casters outside it are rejected and memoized
    pub hull: Option<ClipHull>,
    /// Bit mask over [`ObjectTypeTag`] values accepted as casters
    pub allowed_types: u32,
    /// Render pass bits a caster must share at least one of
    pub pass_filter: u32,
    /// Whether particle emitters cast into this frustum
    pub particle_shadows: bool,
    /// A single object excluded from the result, e.g. the light's owner
    pub exclude: Option<ObjectId>,
    /// Scales the node-level cast distance rejection; `0.0` disables it
    pub cast_view_dist_ratio: f32,
}

impl ShadowQuery {
    /// Query with permissive type, pass, and hull filters
    pub fn new(frame_id: u32, sun: bool, camera_pos: Vec3, frustum: Frustum) -> Self {
        Self {
            frame_id,
            sun,
            camera_pos,
            frustum,
            hull: None,
            allowed_types: !0,
            pass_filter: !0,
            particle_shadows: true,
            exclude: None,
            cast_view_dist_ratio: 1.0,
        }
    }
}

/// Casters collected for one shadow frustum, split by whether the
/// renderer may process them from a worker
#[derive(Debug, Default)]
pub struct CasterLists {
    /// Casters safe to render from a job
    pub job_capable: Vec<ObjectId>,
    /// Casters that must render on the main thread
    pub inline_only: Vec<ObjectId>,
}

impl CasterLists {
    /// Empty lists
    pub fn new() -> Self {
        Self::default()
    }

    /// Total casters across both lists
    pub fn len(&self) -> usize {
        self.job_capable.len() + self.inline_only.len()
    }

    /// Whether no caster was collected
    pub fn is_empty(&self) -> bool {
        self.job_capable.is_empty() && self.inline_only.is_empty()
    }

    /// Drop all collected ids, keeping allocations
    pub fn clear(&mut self) {
        self.job_capable.clear();
        self.inline_only.clear();
    }

    /// Iterate over every collected caster
    pub fn iter(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.job_capable.iter().chain(self.inline_only.iter()).copied()
    }
}

/// Resumable traversal position for budgeted caster collection
///
/// Owned by the caller alongside its cached shadow map. The cursor is
/// bound to a tree topology via a version stamp; any insert or remove
/// invalidates it and the next call restarts from the root.
#[derive(Debug, Default)]
pub struct TraversalCursor {
    /// Tree version this cursor was built against
    version: Option<u64>,
    /// Child index per depth along the current descent path
    path: Vec<usize>,
    /// Nodes whose casters were already emitted in this pass
    processed: HashSet<NodeId>,
}

impl TraversalCursor {
    /// Cursor positioned at the start of a fresh pass
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget all progress; the next call restarts from the root
    pub fn reset(&mut self) {
        self.version = None;
        self.path.clear();
        self.processed.clear();
    }

    fn rebind(&mut self, version: u64) {
        if self.version != Some(version) {
            self.path.clear();
            self.processed.clear();
            self.version = Some(version);
        }
    }

    fn child_cursor(&mut self, level: usize) -> usize {
        if self.path.len() <= level {
            self.path.resize(level + 1, 0);
        }
        self.path[level]
    }

    fn advance(&mut self, level: usize) {
        self.path[level] += 1;
        self.path.truncate(level + 1);
    }

    /// A subtree finished; its path entry rewinds so the level can be
    /// reused by the next descent
    fn complete_level(&mut self, level: usize) {
        if let Some(entry) = self.path.get_mut(level) {
            *entry = 0;
        }
    }

    /// The whole pass finished; forget per-pass state but keep the
    /// version binding so the cursor serves the next shadow frustum
    fn complete_pass(&mut self) {
        self.path.clear();
        self.processed.clear();
    }
}

impl Octree {
    /// Collect every caster reaching `query`'s frustum in one walk
    pub fn collect_casters(&mut self, query: &ShadowQuery, out: &mut CasterLists) {
        if self.nodes[self.root].flags.contains(NodeFlags::HAS_CASTERS) {
            self.walk_casters(self.root, query, false, out);
        }
    }

    /// Resume a budgeted caster collection
    ///
    /// Emits the casters of at most `budget` contributing nodes, then
    /// returns `false` with the position saved in `cursor`. Returns
    /// `true` once the traversal has covered the whole tree; repeated
    /// calls accumulate exactly the casters a full walk would produce.
    pub fn collect_casters_budgeted(
        &mut self,
        query: &ShadowQuery,
        cursor: &mut TraversalCursor,
        budget: &mut usize,
        out: &mut CasterLists,
    ) -> bool {
        cursor.rebind(self.cursor_version);
        if !self.nodes[self.root].flags.contains(NodeFlags::HAS_CASTERS) {
            return true;
        }
        let done = self.walk_casters_budgeted(self.root, 0, query, cursor, budget, out);
        if done {
            cursor.complete_pass();
        }
        done
    }

    fn walk_casters(&mut self, id: NodeId, query: &ShadowQuery, fully_inside: bool, out: &mut CasterLists) {
        let Some(fully_inside) = self.shadow_node_gate(id, query, fully_inside) else {
            return;
        };
        self.emit_node_casters(id, query, fully_inside, out);

        let children = self.nodes[id].children;
        for child in children.into_iter().flatten() {
            let child_node = &self.nodes[child];
            if !child_node.flags.contains(NodeFlags::HAS_CASTERS) {
                continue;
            }
            // subtrees fully handled by an earlier sun cascade
            if query.sun
                && query.hull.is_some()
                && child_node.caster_skip_frame == query.frame_id
            {
                continue;
            }
            self.walk_casters(child, query, fully_inside, out);
        }
    }

    fn walk_casters_budgeted(
        &mut self,
        id: NodeId,
        level: usize,
        query: &ShadowQuery,
        cursor: &mut TraversalCursor,
        budget: &mut usize,
        out: &mut CasterLists,
    ) -> bool {
        if !cursor.processed.contains(&id) {
            if *budget == 0 {
                return false;
            }
            if let Some(fully_inside) = self.shadow_node_gate(id, query, false) {
                let emitted = self.emit_node_casters(id, query, fully_inside, out);
                // only nodes contributing output count against the budget
                if emitted > 0 {
                    *budget -= 1;
                }
                cursor.processed.insert(id);
            } else {
                cursor.processed.insert(id);
                return true;
            }
        }

        while cursor.child_cursor(level) < 8 {
            let octant = cursor.child_cursor(level);
            let child = self.nodes[id].children[octant];
            if let Some(child) = child {
                let skip = {
                    let child_node = &self.nodes[child];
                    !child_node.flags.contains(NodeFlags::HAS_CASTERS)
                        || (query.sun
                            && query.hull.is_some()
                            && child_node.caster_skip_frame == query.frame_id)
                };
                if !skip && !self.walk_casters_budgeted(child, level + 1, query, cursor, budget, out)
                {
                    return false;
                }
            }
            cursor.advance(level);
        }
        cursor.complete_level(level);
        true
    }

    /// Node-level acceptance: frustum, hull, and cast-distance tests
    /// with sun skip-frame stamping. Returns the propagated
    /// full-containment flag, or `None` when the subtree is rejected.
    fn shadow_node_gate(
        &mut self,
        id: NodeId,
        query: &ShadowQuery,
        fully_inside: bool,
    ) -> Option<bool> {
        let content_box = self.nodes[id].content_box;
        let mut fully_inside = fully_inside;
        if !fully_inside {
            match query.frustum.test_aabb(&content_box) {
                Containment::Outside => return None,
                Containment::Inside => fully_inside = true,
                Containment::Intersecting => {}
            }
        }
        if query.sun && fully_inside {
            self.nodes[id].caster_skip_frame = query.frame_id;
        }
        if let Some(hull) = &query.hull {
            if !hull.intersects_aabb(&content_box) {
                self.nodes[id].caster_skip_frame = query.frame_id;
                return None;
            }
        }
        if !self.nodes[id].compiled {
            self.compile(id);
        }
        if query.cast_view_dist_ratio != 0.0 {
            let node = &self.nodes[id];
            let dist_sq = node.content_box.distance_sq(query.camera_pos);
            if dist_sq > sqr(node.max_view_dist * query.cast_view_dist_ratio) {
                self.nodes[id].caster_skip_frame = query.frame_id;
                return None;
            }
        }
        Some(fully_inside)
    }

    /// Filter one node's records into `out`, returning how many passed
    fn emit_node_casters(
        &mut self,
        id: NodeId,
        query: &ShadowQuery,
        node_fully_inside: bool,
        out: &mut CasterLists,
    ) -> usize {
        let before = out.len();
        let mut casters = std::mem::take(&mut self.nodes[id].casters);
        for caster in &mut casters {
            if query.sun && query.hull.is_some() && caster.skip_frame == query.frame_id {
                continue;
            }
            if query.allowed_types & caster.type_tag.mask_bit() == 0 {
                continue;
            }
            if query.exclude == Some(caster.object) {
                continue;
            }
            if caster.type_tag == ObjectTypeTag::ParticleEmitter
                && !(query.particle_shadows && self.config.particle_shadows)
            {
                continue;
            }
            if caster.pass_mask & query.pass_filter == 0 {
                continue;
            }

            let dist_sq = (caster.sphere.center - query.camera_pos).norm_squared();
            if dist_sq > sqr(caster.max_cast_dist + caster.sphere.radius) {
                caster.skip_frame = query.frame_id;
                continue;
            }

            let mut object_fully_inside = node_fully_inside;
            if !object_fully_inside {
                match query.frustum.test_aabb(&caster.bounds) {
                    Containment::Outside => continue,
                    Containment::Inside => object_fully_inside = true,
                    Containment::Intersecting => {}
                }
            }
            if query.sun && object_fully_inside {
                caster.skip_frame = query.frame_id;
            }
            if let Some(hull) = &query.hull {
                if !hull.intersects_sphere(&caster.sphere) {
                    caster.skip_frame = query.frame_id;
                    continue;
                }
            }

            if caster.can_job {
                out.job_capable.push(caster.object);
            } else {
                out.inline_only.push(caster.object);
            }
        }
        self.nodes[id].casters = casters;
        out.len() - before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OctreeConfig;
    use crate::foundation::math::Mat4;
    use crate::scene::bounds::{Aabb, Plane};
    use crate::scene::object::{ObjectCategory, ObjectFlags, RenderObject};
    use crate::scene::tables::{GeometryId, MaterialId};

    fn make_tree() -> Octree {
        Octree::new(
            Aabb::new(Vec3::zeros(), Vec3::new(256.0, 256.0, 256.0)),
            OctreeConfig::default(),
        )
    }

    fn caster_at(center: Vec3, max_view_dist: f32) -> RenderObject {
        RenderObject::new(
            Aabb::from_center_extents(center, Vec3::new(1.0, 1.0, 1.0)),
            Mat4::identity(),
            ObjectCategory::SolidGeometry,
            ObjectTypeTag::Mesh,
            ObjectFlags::CAST_SHADOWS,
            max_view_dist,
            GeometryId(0),
            MaterialId(0),
        )
    }

    fn sun_query(frame_id: u32) -> ShadowQuery {
        ShadowQuery::new(
            frame_id,
            true,
            Vec3::new(8.0, 8.0, 8.0),
            Frustum::unbounded(),
        )
    }

    #[test]
    fn test_full_collection_finds_casters() {
        let mut tree = make_tree();
        let a = tree.insert(caster_at(Vec3::new(10.0, 10.0, 10.0), 500.0));
        let b = tree.insert(caster_at(Vec3::new(100.0, 100.0, 100.0), 500.0));
        let non_caster = tree.insert(RenderObject::new(
            Aabb::from_center_extents(Vec3::new(12.0, 10.0, 10.0), Vec3::new(1.0, 1.0, 1.0)),
            Mat4::identity(),
            ObjectCategory::SolidGeometry,
            ObjectTypeTag::Mesh,
            ObjectFlags::empty(),
            500.0,
            GeometryId(0),
            MaterialId(0),
        ));

        let mut out = CasterLists::new();
        tree.collect_casters(&sun_query(1), &mut out);

        let ids: Vec<ObjectId> = out.iter().collect();
        assert!(ids.contains(&a));
        assert!(ids.contains(&b));
        assert!(!ids.contains(&non_caster));
    }

    #[test]
    fn test_cast_distance_rejects_far_casters() {
        let mut tree = make_tree();
        let near = tree.insert(caster_at(Vec3::new(10.0, 10.0, 10.0), 500.0));
        let far = tree.insert(caster_at(Vec3::new(250.0, 250.0, 250.0), 50.0));

        let mut out = CasterLists::new();
        tree.collect_casters(&sun_query(1), &mut out);

        let ids: Vec<ObjectId> = out.iter().collect();
        assert!(ids.contains(&near));
        assert!(!ids.contains(&far));
    }

    #[test]
    fn test_hull_rejection_is_memoized_for_later_cascades() {
        let mut tree = make_tree();
        // behind the hull plane, rejected by cascade one
        let id = tree.insert(caster_at(Vec3::new(200.0, 10.0, 10.0), 500.0));
        tree.compile_all();

        let mut query = sun_query(3);
        // half-space keeping x < 100
        query.hull = Some(ClipHull::new(vec![Plane::new(
            Vec3::new(-1.0, 0.0, 0.0),
            100.0,
        )]));

        let mut out = CasterLists::new();
        tree.collect_casters(&query, &mut out);
        assert!(out.is_empty());

        // second cascade of the same frame skips the stamped subtree
        let mut current = tree.object(id).unwrap().owner();
        let mut stamped = false;
        while let Some(node_id) = current {
            let node = tree.node(node_id).unwrap();
            stamped |= node.caster_skip_frame == 3;
            current = node.parent;
        }
        assert!(stamped);
    }

    #[test]
    fn test_exclude_filters_single_object() {
        let mut tree = make_tree();
        let a = tree.insert(caster_at(Vec3::new(10.0, 10.0, 10.0), 500.0));
        let b = tree.insert(caster_at(Vec3::new(11.0, 10.0, 10.0), 500.0));

        let mut query = sun_query(1);
        query.exclude = Some(a);
        let mut out = CasterLists::new();
        tree.collect_casters(&query, &mut out);

        let ids: Vec<ObjectId> = out.iter().collect();
        assert!(!ids.contains(&a));
        assert!(ids.contains(&b));
    }

    #[test]
    fn test_budgeted_collection_matches_full_walk() {
        let mut tree = make_tree();
        for i in 0..40 {
            let p = Vec3::new(
                5.0 + (i % 8) as f32 * 30.0,
                5.0 + ((i / 8) % 8) as f32 * 30.0,
                5.0 + (i / 16) as f32 * 40.0,
            );
            tree.insert(caster_at(p, 2000.0));
        }

        // non-sun query so collection has no stamping side effects
        let query = ShadowQuery::new(1, false, Vec3::new(8.0, 8.0, 8.0), Frustum::unbounded());

        let mut full = CasterLists::new();
        tree.collect_casters(&query, &mut full);

        let mut sliced = CasterLists::new();
        let mut cursor = TraversalCursor::new();
        let mut rounds = 0;
        loop {
            let mut budget = 1;
            if tree.collect_casters_budgeted(&query, &mut cursor, &mut budget, &mut sliced) {
                break;
            }
            rounds += 1;
            assert!(rounds < 10_000);
        }
        assert!(rounds > 1);

        let mut full_ids: Vec<ObjectId> = full.iter().collect();
        let mut sliced_ids: Vec<ObjectId> = sliced.iter().collect();
        full_ids.sort();
        sliced_ids.sort();
        assert_eq!(full_ids, sliced_ids);
    }

    #[test]
    fn test_cursor_reusable_after_completed_pass() {
        let mut tree = make_tree();
        let mut expected = 0;
        for i in 0..20 {
            let p = Vec3::new(
                5.0 + (i % 5) as f32 * 48.0,
                5.0 + (i / 5) as f32 * 48.0,
                5.0,
            );
            tree.insert(caster_at(p, 2000.0));
            expected += 1;
        }
        let query = ShadowQuery::new(1, false, Vec3::new(8.0, 8.0, 8.0), Frustum::unbounded());

        let mut cursor = TraversalCursor::new();
        let mut first = CasterLists::new();
        loop {
            let mut budget = 2;
            if tree.collect_casters_budgeted(&query, &mut cursor, &mut budget, &mut first) {
                break;
            }
        }
        assert_eq!(first.len(), expected);

        // same cursor, next shadow frustum, unmodified tree
        let query = ShadowQuery::new(2, false, Vec3::new(8.0, 8.0, 8.0), Frustum::unbounded());
        let mut second = CasterLists::new();
        loop {
            let mut budget = 2;
            if tree.collect_casters_budgeted(&query, &mut cursor, &mut budget, &mut second) {
                break;
            }
        }
        assert_eq!(second.len(), expected);
    }

    #[test]
    fn test_budget_ignores_noncontributing_nodes() {
        let mut tree = make_tree();
        // a single caster in a deep leaf behind several empty interior
        // nodes; view distance low enough to descend to minimum size
        let id = tree.insert(caster_at(Vec3::new(3.0, 3.0, 3.0), 120.0));
        let query = ShadowQuery::new(1, false, Vec3::new(8.0, 8.0, 8.0), Frustum::unbounded());

        let mut out = CasterLists::new();
        let mut cursor = TraversalCursor::new();
        let mut budget = 1;
        let done = tree.collect_casters_budgeted(&query, &mut cursor, &mut budget, &mut out);

        assert!(done);
        assert_eq!(out.iter().collect::<Vec<_>>(), vec![id]);
    }

    #[test]
    fn test_distance_reject_stamps_record_without_sun() {
        let mut tree = make_tree();
        // close enough to stay a caster record, too far to reach the map
        let id = tree.insert(caster_at(Vec3::new(200.0, 200.0, 200.0), 40.0));

        let mut query =
            ShadowQuery::new(5, false, Vec3::new(8.0, 8.0, 8.0), Frustum::unbounded());
        // disable the node-level distance gate so the record is tested
        query.cast_view_dist_ratio = 0.0;

        let mut out = CasterLists::new();
        tree.collect_casters(&query, &mut out);
        assert!(out.is_empty());

        let owner = tree.object(id).unwrap().owner().unwrap();
        let record = tree
            .node(owner)
            .unwrap()
            .casters
            .iter()
            .find(|c| c.object == id)
            .unwrap();
        assert_eq!(record.skip_frame, 5);
    }

    #[test]
    fn test_cursor_invalidated_by_mutation() {
        let mut tree = make_tree();
        for i in 0..10 {
            tree.insert(caster_at(Vec3::new(5.0 + i as f32 * 24.0, 5.0, 5.0), 2000.0));
        }
        let query = ShadowQuery::new(1, false, Vec3::new(8.0, 8.0, 8.0), Frustum::unbounded());

        let mut out = CasterLists::new();
        let mut cursor = TraversalCursor::new();
        let mut budget = 1;
        assert!(!tree.collect_casters_budgeted(&query, &mut cursor, &mut budget, &mut out));

        // topology change restarts the traversal from the root
        let late = tree.insert(caster_at(Vec3::new(5.0, 5.0, 100.0), 2000.0));
        out.clear();
        loop {
            let mut budget = 4;
            if tree.collect_casters_budgeted(&query, &mut cursor, &mut budget, &mut out) {
                break;
            }
        }
        assert!(out.iter().any(|o| o == late));
    }
}

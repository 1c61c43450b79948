//! Asset streaming prioritization
//!
//! Walks the tree with an explicit worklist, nearest subtrees first
//! relative to the primary camera, and reports a streaming distance
//! and importance scale for every object within prediction range of
//! any precache camera.

use std::collections::VecDeque;

use crate::foundation::math::{sqr, Vec3};
use crate::scene::bounds::{Aabb, Frustum};
use crate::scene::object::{ObjectFlags, ObjectId};
use crate::spatial::octree::Octree;
use crate::spatial::visibility::CHILD_VISIT_ORDER;

/// A camera position assets should be pre-streamed for; the first
/// entry is the live render camera, the rest are prediction points
#[derive(Debug, Clone)]
pub struct PrecacheCamera {
    /// Camera position
    pub position: Vec3,
    /// Normalized view direction
    pub direction: Vec3,
    /// Box around the camera used for conservative distance tests
    pub bounds: Aabb,
}

impl PrecacheCamera {
    /// Camera at `position` looking along `direction`
    pub fn new(position: Vec3, direction: Vec3) -> Self {
        Self {
            position,
            direction,
            bounds: Aabb::from_center_extents(position, Vec3::new(0.1, 0.1, 0.1)),
        }
    }
}

/// Receives one priority report per object and camera within range
pub trait StreamingSink {
    /// `distance` is the streaming distance after zoom, floor, and
    /// per-node unification; `importance` scales the asset priority
    fn update_priority(&mut self, object: ObjectId, distance: f32, importance: f32, full_update: bool);
}

/// Minimum-path distance provider for portal-connected interiors
///
/// When the camera and an object are in different areas, line-of-sight
/// distance underestimates how soon the object can become visible; the
/// oracle returns the shortest path through portals instead.
pub trait PortalDistanceOracle {
    /// Path distance from `camera_box` to `target_box`, or `None` when
    /// the straight-line distance applies
    fn portal_distance(&self, camera_box: &Aabb, target_box: &Aabb, full_update: bool)
        -> Option<f32>;
}

/// Oracle for worlds without portal areas
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPortals;

impl PortalDistanceOracle for NoPortals {
    fn portal_distance(&self, _camera_box: &Aabb, _target_box: &Aabb, _full_update: bool) -> Option<f32> {
        None
    }
}

/// Parameters of one streaming prioritization pass
#[derive(Debug, Clone)]
pub struct StreamingUpdate<'a> {
    /// Precache cameras; must not be empty, index 0 is the render camera
    pub cameras: &'a [PrecacheCamera],
    /// Distances below this are clamped up, keeping priorities stable
    /// when the camera touches an object
    pub min_dist: f32,
    /// Hard cap on the per-object view distance
    pub max_dist: f32,
    /// Full refresh, e.g. after a teleport; skips incremental shortcuts
    pub full_update: bool,
    /// Render camera frustum; objects inside stream as if zoomed
    pub frustum: Frustum,
    /// Current camera zoom factor
    pub zoom_factor: f32,
    /// Unify object distances up to their node's distance
    pub per_node_distance: bool,
}

impl Octree {
    /// Report streaming priorities for everything within prediction
    /// range of `update.cameras`
    pub fn update_streaming_priority(
        &mut self,
        update: &StreamingUpdate<'_>,
        portals: &dyn PortalDistanceOracle,
        sink: &mut dyn StreamingSink,
    ) {
        debug_assert!(!update.cameras.is_empty());
        let mut worklist = VecDeque::new();
        worklist.push_back(self.root);
        while let Some(id) = worklist.pop_front() {
            self.stream_node(id, update, portals, sink, &mut worklist);
        }
    }

    fn stream_node(
        &mut self,
        id: crate::spatial::node::NodeId,
        update: &StreamingUpdate<'_>,
        portals: &dyn PortalDistanceOracle,
        sink: &mut dyn StreamingSink,
        worklist: &mut VecDeque<crate::spatial::node::NodeId>,
    ) {
        if !self.nodes[id].compiled {
            self.compile(id);
        }

        let content_box = self.nodes[id].content_box;
        let node_dist_sq = update
            .cameras
            .iter()
            .map(|cam| cam.bounds.distance_sq_aabb(&content_box))
            .fold(f32::MAX, f32::min);
        let mut node_dist = node_dist_sq.sqrt();
        if update.frustum.intersects_aabb(&self.nodes[id].split_box) {
            node_dist *= update.zoom_factor;
        }

        let reach = self.nodes[id].max_view_dist.min(update.max_dist) + self.config.prediction_margin;
        if node_dist > reach {
            return;
        }

        // per-camera floor when a portal path is longer than line of sight
        let floor_sq: Vec<f32> = update
            .cameras
            .iter()
            .map(|cam| {
                portals
                    .portal_distance(&cam.bounds, &content_box, update.full_update)
                    .map_or(0.0, sqr)
            })
            .collect();

        let min_dist_sq = sqr(update.min_dist);
        for category in 0..self.nodes[id].lists.len() {
            for slot in 0..self.nodes[id].lists[category].len() {
                let object_id = self.nodes[id].lists[category][slot];
                let object = &self.objects[object_id];
                if object.flags.contains(ObjectFlags::HIDDEN) {
                    continue;
                }
                let bounds = object.bounds;
                let max_view_dist = object.max_view_dist;

                let zoom_sq = if update.frustum.intersects_aabb(&bounds) {
                    sqr(update.zoom_factor)
                } else {
                    1.0
                };

                for (cam, &floor) in update.cameras.iter().zip(&floor_sq) {
                    let mut dist_sq = cam.bounds.distance_sq_aabb(&bounds).max(min_dist_sq);
                    dist_sq *= zoom_sq;
                    dist_sq = dist_sq.max(floor);

                    let max_comb = max_view_dist.min(update.max_dist) + self.config.prediction_margin;
                    if dist_sq >= sqr(max_comb) {
                        continue;
                    }

                    let dist = dist_sq.sqrt();
                    let mut reported = dist;
                    if !update.full_update && dist < node_dist && update.per_node_distance {
                        reported = node_dist;
                    }

                    // inside, very close, or facing the object
                    let importance = if dist <= 4.0
                        || (bounds.center() - cam.position).dot(&cam.direction) >= 0.0
                    {
                        1.0
                    } else {
                        0.8
                    };
                    sink.update_priority(object_id, reported, importance, update.full_update);
                }
            }
        }

        let first = self.nodes[id].octant_for(update.cameras[0].position);
        for step in CHILD_VISIT_ORDER {
            if let Some(child) = self.nodes[id].children[first ^ step] {
                worklist.push_back(child);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OctreeConfig;
    use crate::foundation::math::Mat4;
    use crate::scene::object::{ObjectCategory, ObjectTypeTag, RenderObject};
    use crate::scene::tables::{GeometryId, MaterialId};

    #[derive(Default)]
    struct Collecting {
        reports: Vec<(ObjectId, f32, f32)>,
    }

    impl StreamingSink for Collecting {
        fn update_priority(&mut self, object: ObjectId, distance: f32, importance: f32, _full: bool) {
            self.reports.push((object, distance, importance));
        }
    }

    fn make_tree() -> Octree {
        Octree::new(
            Aabb::new(Vec3::zeros(), Vec3::new(256.0, 256.0, 256.0)),
            OctreeConfig::default(),
        )
    }

    fn object_at(center: Vec3, max_view_dist: f32) -> RenderObject {
        RenderObject::new(
            Aabb::from_center_extents(center, Vec3::new(1.0, 1.0, 1.0)),
            Mat4::identity(),
            ObjectCategory::SolidGeometry,
            ObjectTypeTag::Mesh,
            ObjectFlags::empty(),
            max_view_dist,
            GeometryId(0),
            MaterialId(0),
        )
    }

    fn base_update(cameras: &[PrecacheCamera]) -> StreamingUpdate<'_> {
        StreamingUpdate {
            cameras,
            min_dist: 0.0,
            max_dist: 1000.0,
            full_update: true,
            frustum: Frustum::unbounded(),
            zoom_factor: 1.0,
            per_node_distance: false,
        }
    }

    #[test]
    fn test_reports_objects_in_prediction_range() {
        let mut tree = make_tree();
        let near = tree.insert(object_at(Vec3::new(12.0, 10.0, 10.0), 500.0));
        let out_of_reach = tree.insert(object_at(Vec3::new(250.0, 250.0, 250.0), 30.0));

        let cams = [PrecacheCamera::new(Vec3::new(8.0, 10.0, 10.0), Vec3::x())];
        let mut sink = Collecting::default();
        tree.update_streaming_priority(&base_update(&cams), &NoPortals, &mut sink);

        assert!(sink.reports.iter().any(|r| r.0 == near));
        assert!(!sink.reports.iter().any(|r| r.0 == out_of_reach));
    }

    #[test]
    fn test_importance_drops_behind_camera() {
        let mut tree = make_tree();
        let ahead = tree.insert(object_at(Vec3::new(40.0, 10.0, 10.0), 500.0));
        let behind = tree.insert(object_at(Vec3::new(10.0, 60.0, 10.0), 500.0));

        // camera at x=20 looking along +x; `behind` is off to the side
        // and behind the view direction plane, farther than 4 units
        let cams = [PrecacheCamera::new(Vec3::new(20.0, 10.0, 10.0), Vec3::x())];
        let mut sink = Collecting::default();
        tree.update_streaming_priority(&base_update(&cams), &NoPortals, &mut sink);

        let ahead_report = sink.reports.iter().find(|r| r.0 == ahead).unwrap();
        let behind_report = sink.reports.iter().find(|r| r.0 == behind).unwrap();
        assert_eq!(ahead_report.2, 1.0);
        assert_eq!(behind_report.2, 0.8);
    }

    #[test]
    fn test_touching_objects_are_max_importance() {
        let mut tree = make_tree();
        // behind the camera but within 4 units
        let id = tree.insert(object_at(Vec3::new(18.0, 10.0, 10.0), 500.0));

        let cams = [PrecacheCamera::new(Vec3::new(20.0, 10.0, 10.0), Vec3::x())];
        let mut sink = Collecting::default();
        tree.update_streaming_priority(&base_update(&cams), &NoPortals, &mut sink);

        let report = sink.reports.iter().find(|r| r.0 == id).unwrap();
        assert_eq!(report.2, 1.0);
    }

    #[test]
    fn test_portal_floor_raises_distance() {
        struct FixedPath(f32);
        impl PortalDistanceOracle for FixedPath {
            fn portal_distance(&self, _c: &Aabb, _t: &Aabb, _f: bool) -> Option<f32> {
                Some(self.0)
            }
        }

        let mut tree = make_tree();
        let id = tree.insert(object_at(Vec3::new(12.0, 10.0, 10.0), 500.0));

        let cams = [PrecacheCamera::new(Vec3::new(8.0, 10.0, 10.0), Vec3::x())];
        let mut sink = Collecting::default();
        tree.update_streaming_priority(&base_update(&cams), &FixedPath(80.0), &mut sink);

        let report = sink.reports.iter().find(|r| r.0 == id).unwrap();
        assert!(report.1 >= 80.0);
    }

    #[test]
    fn test_multi_camera_takes_minimum_distance() {
        let mut tree = make_tree();
        let id = tree.insert(object_at(Vec3::new(100.0, 100.0, 100.0), 500.0));

        let cams = [
            PrecacheCamera::new(Vec3::new(8.0, 8.0, 8.0), Vec3::x()),
            PrecacheCamera::new(Vec3::new(99.0, 100.0, 100.0), Vec3::x()),
        ];
        let mut sink = Collecting::default();
        tree.update_streaming_priority(&base_update(&cams), &NoPortals, &mut sink);

        // one report per camera; the close camera reports a near distance
        let reports: Vec<_> = sink.reports.iter().filter(|r| r.0 == id).collect();
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().any(|r| r.1 < 5.0));
    }
}

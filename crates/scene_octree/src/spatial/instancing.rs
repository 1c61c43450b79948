//! Static instancing consolidation
//!
//! Vegetation objects in one node sharing geometry and material are
//! consolidated into a single batch: the first member becomes the
//! representative carrying every member transform, the rest are
//! flagged and dropped from rendering and shadow queries. The whole
//! transformation is reversible.

use std::collections::HashMap;

use log::debug;

use crate::scene::bounds::Aabb;
use crate::scene::object::{InstanceBatch, ObjectCategory, ObjectFlags, ObjectId};
use crate::spatial::node::{InstanceKey, NodeId};
use crate::spatial::octree::Octree;

impl Octree {
    /// Apply or undo consolidation on `id` depending on configuration
    /// and the node's dirty flag; called from compilation
    pub(crate) fn check_update_instancing(&mut self, id: NodeId) {
        if self.config.static_instancing.enabled {
            if self.nodes[id].instancing_dirty {
                self.update_static_instancing(id);
            }
        } else if self.nodes[id].instancing_groups.is_some() {
            self.reset_static_instancing(id);
        }
    }

    /// Re-run consolidation state on every node, e.g. after toggling
    /// the feature at runtime
    pub fn refresh_instancing(&mut self) {
        let ids: Vec<NodeId> = self.nodes.keys().collect();
        for id in ids {
            self.check_update_instancing(id);
        }
    }

    /// Rebuild the instancing groups of one node from scratch
    pub fn update_static_instancing(&mut self, id: NodeId) {
        let vegetation = self.nodes[id].lists[ObjectCategory::Vegetation.index()].clone();

        // undo any previous consolidation, then regroup
        let mut groups: HashMap<InstanceKey, Vec<ObjectId>> = HashMap::new();
        for object_id in vegetation {
            let object = &mut self.objects[object_id];
            object.flags.remove(ObjectFlags::STATIC_INSTANCING);
            object.instancing = None;
            if object.flags.contains(ObjectFlags::HIDDEN) {
                continue;
            }
            groups
                .entry((object.geometry, object.material))
                .or_default()
                .push(object_id);
        }

        let min_instances = self.config.static_instancing.min_instances;
        let max_groups = self.config.static_instancing.max_groups;

        let mut qualifying: Vec<(InstanceKey, Vec<ObjectId>)> = groups
            .into_iter()
            .filter(|(_, members)| members.len() >= min_instances)
            .collect();
        // biggest batches win the group budget; key breaks ties
        qualifying.sort_by(|a, b| {
            b.1.len()
                .cmp(&a.1.len())
                .then_with(|| (a.0 .0 .0, a.0 .1 .0).cmp(&(b.0 .0 .0, b.0 .1 .0)))
        });
        qualifying.truncate(max_groups);

        for (_, members) in &qualifying {
            let mut transforms = Vec::with_capacity(members.len());
            let mut bounds = Aabb::reset();
            for (i, &member) in members.iter().enumerate() {
                let object = &mut self.objects[member];
                transforms.push(object.transform);
                let member_bounds = object.bounds;
                bounds.add_aabb(&member_bounds);
                if i > 0 {
                    object.flags.insert(ObjectFlags::STATIC_INSTANCING);
                    let node = &mut self.nodes[id];
                    node.casters.retain(|caster| caster.object != member);
                }
            }
            let representative = members[0];
            self.objects[representative].instancing = Some(InstanceBatch { transforms, bounds });
        }

        if !qualifying.is_empty() {
            debug!(
                "consolidated {} instancing groups in node {id:?}",
                qualifying.len()
            );
        }
        let node = &mut self.nodes[id];
        node.instancing_groups = Some(qualifying.into_iter().collect());
        node.instancing_dirty = false;
    }

    /// Undo consolidation on one node; every member renders and casts
    /// individually again
    pub fn reset_static_instancing(&mut self, id: NodeId) {
        let vegetation = self.nodes[id].lists[ObjectCategory::Vegetation.index()].clone();
        for object_id in vegetation {
            let object = &mut self.objects[object_id];
            object.flags.remove(ObjectFlags::STATIC_INSTANCING);
            object.instancing = None;
        }
        let node = &mut self.nodes[id];
        node.instancing_groups = None;
        node.instancing_dirty = true;
        self.mark_chain_uncompiled(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OctreeConfig, StaticInstancingConfig};
    use crate::foundation::math::{Mat4, Vec3};
    use crate::scene::object::{ObjectTypeTag, RenderObject};
    use crate::scene::tables::{GeometryId, MaterialId};

    fn instancing_tree() -> Octree {
        let config = OctreeConfig {
            static_instancing: StaticInstancingConfig {
                enabled: true,
                min_instances: 3,
                max_groups: 16,
            },
            ..OctreeConfig::default()
        };
        Octree::new(
            Aabb::new(Vec3::zeros(), Vec3::new(64.0, 64.0, 64.0)),
            config,
        )
    }

    fn vegetation(center: Vec3, geometry: u32, material: u32) -> RenderObject {
        RenderObject::new(
            Aabb::from_center_extents(center, Vec3::new(0.5, 0.5, 0.5)),
            Mat4::identity(),
            ObjectCategory::Vegetation,
            ObjectTypeTag::Vegetation,
            ObjectFlags::CAST_SHADOWS,
            300.0,
            GeometryId(geometry),
            MaterialId(material),
        )
    }

    #[test]
    fn test_consolidates_groups_over_threshold() {
        let mut tree = instancing_tree();
        let mut pines = Vec::new();
        for i in 0..4 {
            pines.push(tree.insert(vegetation(Vec3::new(25.0 + i as f32, 26.0, 26.0), 1, 1)));
        }
        // below threshold, stays individual
        let lone = tree.insert(vegetation(Vec3::new(29.0, 26.0, 26.0), 2, 1));
        let node = tree.object(pines[0]).unwrap().owner().unwrap();
        // all members must land in the same leaf cell for grouping
        for &pine in &pines {
            assert_eq!(tree.object(pine).unwrap().owner(), Some(node));
        }

        tree.update_static_instancing(node);

        let representative = tree.object(pines[0]).unwrap();
        let batch = representative.instancing.as_ref().unwrap();
        assert_eq!(batch.transforms.len(), 4);
        assert!(!representative.flags.contains(ObjectFlags::STATIC_INSTANCING));
        for &member in &pines[1..] {
            assert!(tree
                .object(member)
                .unwrap()
                .flags
                .contains(ObjectFlags::STATIC_INSTANCING));
        }
        assert!(!tree.object(lone).unwrap().flags.contains(ObjectFlags::STATIC_INSTANCING));
    }

    #[test]
    fn test_batch_bounds_cover_all_members() {
        let mut tree = instancing_tree();
        let mut ids = Vec::new();
        for i in 0..3 {
            ids.push(tree.insert(vegetation(Vec3::new(25.0 + i as f32 * 2.0, 26.0, 26.0), 1, 1)));
        }
        let node = tree.object(ids[0]).unwrap().owner().unwrap();
        tree.update_static_instancing(node);

        let batch_bounds = tree.object(ids[0]).unwrap().instancing.as_ref().unwrap().bounds;
        for &id in &ids {
            assert!(batch_bounds.contains_aabb(&tree.object(id).unwrap().bounds));
        }
    }

    #[test]
    fn test_reset_is_full_reversal() {
        let mut tree = instancing_tree();
        let mut ids = Vec::new();
        for i in 0..4 {
            ids.push(tree.insert(vegetation(Vec3::new(25.0 + i as f32, 26.0, 26.0), 1, 1)));
        }
        let node = tree.object(ids[0]).unwrap().owner().unwrap();
        tree.update_static_instancing(node);
        tree.reset_static_instancing(node);

        for &id in &ids {
            let object = tree.object(id).unwrap();
            assert!(!object.flags.contains(ObjectFlags::STATIC_INSTANCING));
            assert!(object.instancing.is_none());
            assert!(object.is_renderable());
        }
        assert!(tree.node(node).unwrap().instancing_groups.is_none());
    }

    #[test]
    fn test_members_leave_caster_lists() {
        let mut tree = instancing_tree();
        let mut ids = Vec::new();
        for i in 0..4 {
            ids.push(tree.insert(vegetation(Vec3::new(25.0 + i as f32, 26.0, 26.0), 1, 1)));
        }
        let node = tree.object(ids[0]).unwrap().owner().unwrap();

        tree.compile_all();
        let casters: Vec<ObjectId> = tree
            .node(node)
            .unwrap()
            .casters
            .iter()
            .map(|c| c.object)
            .collect();
        assert!(casters.contains(&ids[0]));
        for &member in &ids[1..] {
            assert!(!casters.contains(&member));
        }
    }

    #[test]
    fn test_disabled_config_resets_on_compile() {
        let mut tree = instancing_tree();
        let mut ids = Vec::new();
        for i in 0..4 {
            ids.push(tree.insert(vegetation(Vec3::new(25.0 + i as f32, 26.0, 26.0), 1, 1)));
        }
        let node = tree.object(ids[0]).unwrap().owner().unwrap();
        tree.update_static_instancing(node);

        tree.config.static_instancing.enabled = false;
        tree.refresh_instancing();

        for &id in &ids {
            assert!(!tree.object(id).unwrap().flags.contains(ObjectFlags::STATIC_INSTANCING));
        }
    }
}

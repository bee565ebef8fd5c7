use crate::physics::body_properties::RigidPose;
use crate::physics::collidables::shape::Shape;
use crate::physics::collision_detection::contact::ContactConstraint;

/// Decomposes unions into leaf pairs. The leaf pair test is supplied by the caller.
pub struct UnionTester;

impl UnionTester {
    /// Leaves of `levelset` near `particle`, with world poses.
    ///
    /// Bounded particles cull leaves against their thickened bounds in the levelset's space; unbounded ones
    /// get every leaf.
    pub fn find_relevant_shapes<'a>(
        particle: &Shape,
        particle_pose: &RigidPose,
        levelset: &'a Shape,
        levelset_pose: &RigidPose,
        thickness: f32,
    ) -> Vec<(&'a Shape, RigidPose)> {
        let local = match particle.bounding_box() {
            Some(bounds) => {
                let mut region = bounds.transformed(&particle_pose.relative_to(levelset_pose));
                region.thicken(thickness);
                levelset.find_all_intersecting_objects(&region)
            }
            None => levelset.accumulate_all_objects(),
        };
        local
            .into_iter()
            .map(|(shape, pose)| (shape, pose.then(levelset_pose)))
            .collect()
    }

    /// Tests `particle` against every relevant leaf of `levelset`.
    pub fn update_single_union<F>(
        particle: &Shape,
        particle_pose: &RigidPose,
        levelset: &Shape,
        levelset_pose: &RigidPose,
        thickness: f32,
        constraint: &mut ContactConstraint,
        mut leaf_pair: F,
    ) where
        F: FnMut(&Shape, &RigidPose, &Shape, &RigidPose, &mut ContactConstraint),
    {
        for (inner, inner_pose) in Self::find_relevant_shapes(particle, particle_pose, levelset, levelset_pose, thickness) {
            leaf_pair(particle, particle_pose, inner, &inner_pose, constraint);
        }
    }

    /// Tests every relevant leaf of `particle` against every relevant leaf of `levelset`.
    pub fn update_union_union<F>(
        particle: &Shape,
        particle_pose: &RigidPose,
        levelset: &Shape,
        levelset_pose: &RigidPose,
        thickness: f32,
        constraint: &mut ContactConstraint,
        mut leaf_pair: F,
    ) where
        F: FnMut(&Shape, &RigidPose, &Shape, &RigidPose, &mut ContactConstraint),
    {
        for (levelset_inner, levelset_inner_pose) in
            Self::find_relevant_shapes(particle, particle_pose, levelset, levelset_pose, thickness)
        {
            for (particle_inner, particle_inner_pose) in
                Self::find_relevant_shapes(levelset_inner, &levelset_inner_pose, particle, particle_pose, thickness)
            {
                leaf_pair(particle_inner, &particle_inner_pose, levelset_inner, &levelset_inner_pose, constraint);
            }
        }
    }
}

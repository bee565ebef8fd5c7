use std::collections::HashSet;

use crate::physics::body_description::BodyKind;
use crate::physics::particles::ParticleSet;
use crate::physics::solver_config::SolverConfig;
use crate::physics::trees::tree::Tree;
use crate::utilities::bounding_box::BoundingBox;
use crate::utilities::thread_dispatcher::ThreadDispatcher;

/// Two bodies that may be in contact, with the distance under which the contact is kept.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidatePair {
    pub body1: usize,
    pub body2: usize,
    pub thickness: f32,
}

/// Unordered body pairs excluded from collision for the current tick.
#[derive(Debug, Clone, Default)]
pub struct PairExclusions {
    pairs: HashSet<(usize, usize)>,
}

impl PairExclusions {
    #[inline]
    fn key(a: usize, b: usize) -> (usize, usize) {
        if a < b {
            (a, b)
        } else {
            (b, a)
        }
    }

    pub fn insert(&mut self, a: usize, b: usize) {
        self.pairs.insert(Self::key(a, b));
    }

    #[inline]
    pub fn contains(&self, a: usize, b: usize) -> bool {
        !self.pairs.is_empty() && self.pairs.contains(&Self::key(a, b))
    }

    pub fn clear(&mut self) {
        self.pairs.clear();
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Per-tick acceleration structure over the predicted bounds of every collidable body.
///
/// Bounded bodies live in a bounding volume hierarchy rebuilt from scratch on every `build`. Unbounded
/// bodies (planes, unions containing planes) live in a global list that every query reports.
#[derive(Debug, Default)]
pub struct BroadPhase {
    tree: Tree,
    global_objects: Vec<usize>,
    bounds: Vec<Option<BoundingBox>>,
    thickness: Vec<f32>,
}

impl BroadPhase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds the hierarchy from the predicted poses.
    ///
    /// Each box is grown by `dt * bounds_thickness_multiplier * |v|` so bodies that move far in one sub-step
    /// still produce candidates.
    pub fn build(&mut self, particles: &ParticleSet, dt: f32, config: &SolverConfig) {
        let count = particles.len();
        self.global_objects.clear();
        self.bounds.clear();
        self.bounds.resize(count, None);
        self.thickness.clear();
        self.thickness.resize(count, 0.0);

        let mut entries = Vec::with_capacity(count);
        for index in particles.active_indices() {
            let Some(shape) = particles.geometry(index) else {
                continue;
            };
            let speed = particles.v(index).length();
            self.thickness[index] = if particles.inv_m(index) != 0.0 || particles.kind(index) == BodyKind::Kinematic {
                speed * dt
            } else {
                0.0
            };
            if !shape.has_bounding_box() {
                self.global_objects.push(index);
                continue;
            }
            if let Some(mut bounds) = particles.world_space_bounding_box(index) {
                bounds.thicken(dt * config.bounds_thickness_multiplier * speed);
                self.bounds[index] = Some(bounds);
                entries.push((index, bounds));
            }
        }
        self.tree = Tree::build(entries, config.bvh_max_depth as usize, config.bvh_leaf_size as usize);
        tracing::trace!(
            bounded = self.tree.len(),
            global = self.global_objects.len(),
            depth = self.tree.compute_max_depth(),
            "broad phase rebuilt"
        );
    }

    /// Thickened world bounds of a body from the last build, or `None` if it is unbounded or not collidable.
    #[inline]
    pub fn bounds(&self, index: usize) -> Option<&BoundingBox> {
        self.bounds.get(index).and_then(Option::as_ref)
    }

    #[inline]
    pub fn is_bounded(&self, index: usize) -> bool {
        self.bounds(index).is_some()
    }

    #[inline]
    pub fn global_objects(&self) -> &[usize] {
        &self.global_objects
    }

    /// Distance a body may travel during the current sub-step.
    #[inline]
    pub fn body_thickness(&self, index: usize) -> f32 {
        self.thickness.get(index).copied().unwrap_or(0.0)
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    /// Bodies whose bounds overlap `query`, followed by every unbounded body.
    pub fn find_all_intersections(&self, query: &BoundingBox) -> Vec<usize> {
        let mut results = Vec::new();
        self.tree.find_all_intersections_into(query, &mut results);
        results.extend_from_slice(&self.global_objects);
        results
    }

    /// Lists every pair that may collide during this sub-step.
    ///
    /// Body 1 ranges over enabled dynamic bodies. When both bodies are dynamic and equally bounded the pair
    /// is only produced once, from the higher index. Pairs where neither body is awake and dynamic are skipped.
    pub fn find_candidate_pairs(
        &self,
        particles: &ParticleSet,
        config: &SolverConfig,
        exclusions: &PairExclusions,
        dispatcher: &ThreadDispatcher,
    ) -> Vec<CandidatePair> {
        let bodies: Vec<usize> = particles
            .active_indices()
            .filter(|&index| particles.inv_m(index) != 0.0 && particles.geometry(index).is_some())
            .collect();
        dispatcher
            .map(&bodies, |&body1| self.candidates_for(particles, config, exclusions, body1))
            .into_iter()
            .flatten()
            .collect()
    }

    fn candidates_for(
        &self,
        particles: &ParticleSet,
        config: &SolverConfig,
        exclusions: &PairExclusions,
        body1: usize,
    ) -> Vec<CandidatePair> {
        let body1_bounds = self.bounds(body1);
        let potential = match body1_bounds {
            Some(bounds) => self.find_all_intersections(bounds),
            None => self.global_objects.clone(),
        };
        let body1_resting = particles.sleeping(body1);
        let mut pairs = Vec::new();
        for body2 in potential {
            if body1 == body2 {
                continue;
            }
            let body2_dynamic = particles.inv_m(body2) != 0.0;
            let body2_bounds = self.bounds(body2);
            if body2_dynamic && body1_bounds.is_some() == body2_bounds.is_some() && body2 > body1 {
                continue;
            }
            if let (Some(a), Some(b)) = (body1_bounds, body2_bounds) {
                if !a.intersects(b) {
                    continue;
                }
            }
            if body1_resting && (particles.sleeping(body2) || !body2_dynamic) {
                continue;
            }
            if exclusions.contains(body1, body2) {
                continue;
            }
            let thickness = self
                .body_thickness(body1)
                .max(self.body_thickness(body2))
                .max(config.thickness);
            pairs.push(CandidatePair { body1, body2, thickness });
        }
        pairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::body_description::RigidBodyDescription;
    use crate::physics::body_properties::RigidPose;
    use crate::physics::collidables::plane::Plane;
    use crate::physics::collidables::shape::Shape;
    use crate::physics::collidables::sphere::Sphere;
    use glam::Vec3;

    fn scene() -> ParticleSet {
        let mut particles = ParticleSet::new();
        particles.create_rigid_body(&RigidBodyDescription::create_static(
            RigidPose::IDENTITY,
            Shape::Plane(Plane::ground()),
        ));
        for position in [
            Vec3::new(0.0, 0.0, 1.0),
            Vec3::new(0.0, 0.0, 2.5),
            Vec3::new(10.0, 0.0, 1.0),
        ] {
            particles.create_rigid_body(&RigidBodyDescription::create_dynamic_no_velocity(
                RigidPose::from_position(position),
                Shape::Sphere(Sphere::new(1.0)),
                1.0,
            ));
        }
        particles
    }

    fn pairs(particles: &ParticleSet, exclusions: &PairExclusions) -> Vec<(usize, usize)> {
        let config = SolverConfig::default();
        let mut broad_phase = BroadPhase::new();
        broad_phase.build(particles, 1.0 / 60.0, &config);
        broad_phase
            .find_candidate_pairs(particles, &config, exclusions, &ThreadDispatcher::serial())
            .into_iter()
            .map(|pair| (pair.body1, pair.body2))
            .collect()
    }

    #[test]
    fn planes_are_global_and_pairs_are_unique() {
        let particles = scene();
        let found = pairs(&particles, &PairExclusions::default());
        assert!(found.contains(&(1, 0)));
        assert!(found.contains(&(3, 0)));
        assert!(found.contains(&(2, 1)));
        assert!(!found.contains(&(1, 2)));
        assert!(!found.iter().any(|&(a, b)| (a == 3 && b != 0) || b == 3));
        assert_eq!(found.len(), 4);
    }

    #[test]
    fn excluded_pairs_are_skipped() {
        let particles = scene();
        let mut exclusions = PairExclusions::default();
        exclusions.insert(1, 2);
        let found = pairs(&particles, &exclusions);
        assert!(!found.contains(&(2, 1)));
        assert!(found.contains(&(2, 0)));
    }

    #[test]
    fn sleeping_bodies_do_not_pair_with_statics() {
        let mut particles = scene();
        particles.set_sleeping(3, true).unwrap();
        let found = pairs(&particles, &PairExclusions::default());
        assert!(!found.contains(&(3, 0)));
    }

    #[test]
    fn fast_bodies_get_thicker_bounds() {
        let mut particles = scene();
        particles
            .set_velocity(3, crate::physics::body_properties::BodyVelocity::from_linear(Vec3::new(600.0, 0.0, 0.0)))
            .unwrap();
        let mut broad_phase = BroadPhase::new();
        broad_phase.build(&particles, 1.0 / 60.0, &SolverConfig::default());
        let bounds = broad_phase.bounds(3).unwrap();
        assert!((bounds.max.x - 31.0).abs() < 1e-3);
        assert!((broad_phase.body_thickness(3) - 10.0).abs() < 1e-4);
        assert!(broad_phase.bounds(0).is_none());
    }
}

use std::collections::{HashMap, HashSet, VecDeque};

use crate::physics::collision_detection::contact::ContactConstraint;
use crate::physics::particles::ParticleSet;

/// Dynamic bodies already referenced by one color of a level.
#[derive(Debug, Default, Clone)]
struct ColorScaffold {
    referenced_bodies: HashSet<usize>,
    constraints: Vec<usize>,
}

impl ColorScaffold {
    #[inline]
    fn can_fit(&self, dynamic_bodies: &[usize]) -> bool {
        dynamic_bodies.iter().all(|body| !self.referenced_bodies.contains(body))
    }

    fn add(&mut self, constraint: usize, dynamic_bodies: &[usize]) {
        self.referenced_bodies.extend(dynamic_bodies.iter().copied());
        self.constraints.push(constraint);
    }
}

/// Constraints of one island, grouped by level and then by color.
#[derive(Debug, Default, Clone)]
pub struct IslandConstraints {
    /// `levels[level][color]` holds constraint indices. No two constraints of one color share a dynamic body.
    pub levels: Vec<Vec<Vec<usize>>>,
}

/// Islands, levels and colors of the current contact set.
///
/// Islands are the connected components of dynamic bodies linked by contacts; static and kinematic bodies
/// never join islands together. Within an island, level 0 holds the contacts touching an immovable body (or
/// the contacts of the lowest index body when the island touches none) and each further level is one
/// contact step further away. Colors split a level so that no two contacts of a color move the same dynamic body.
/// Static and kinematic bodies are never written and may repeat within a color.
#[derive(Debug, Default, Clone)]
pub struct ContactGraph {
    islands: Vec<IslandConstraints>,
    island_bodies: Vec<Vec<usize>>,
    /// `batches[level][color]` merges the matching buckets of every island.
    batches: Vec<Vec<Vec<usize>>>,
}

fn find(parents: &mut [usize], mut index: usize) -> usize {
    while parents[index] != index {
        parents[index] = parents[parents[index]];
        index = parents[index];
    }
    index
}

fn union(parents: &mut [usize], a: usize, b: usize) {
    let a = find(parents, a);
    let b = find(parents, b);
    // Lower index wins so island ids do not depend on contact order.
    if a < b {
        parents[b] = a;
    } else if b < a {
        parents[a] = b;
    }
}

/// The dynamic bodies of a constraint.
#[inline]
fn dynamic_bodies(particles: &ParticleSet, constraint: &ContactConstraint) -> ([usize; 2], usize) {
    let mut bodies = [0; 2];
    let mut count = 0;
    for body in [constraint.particle_index, constraint.levelset_index] {
        if particles.inv_m(body) != 0.0 {
            bodies[count] = body;
            count += 1;
        }
    }
    (bodies, count)
}

impl ContactGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds islands, levels and colors and writes each body's island id.
    ///
    /// # Panics
    /// If a constraint ends up spanning two islands, which means the island bookkeeping is corrupt.
    pub fn build(&mut self, particles: &mut ParticleSet, constraints: &[ContactConstraint]) {
        let count = particles.len();
        let mut parents: Vec<usize> = (0..count).collect();
        for constraint in constraints {
            let (bodies, dynamic_count) = dynamic_bodies(particles, constraint);
            if dynamic_count == 2 {
                union(&mut parents, bodies[0], bodies[1]);
            }
        }

        let mut root_to_island = vec![-1i32; count];
        self.island_bodies.clear();
        for index in 0..count {
            if particles.retired[index] || particles.disabled[index] || particles.inv_m[index] == 0.0 {
                particles.island[index] = -1;
                continue;
            }
            let root = find(&mut parents, index);
            if root_to_island[root] < 0 {
                root_to_island[root] = self.island_bodies.len() as i32;
                self.island_bodies.push(Vec::new());
            }
            let island = root_to_island[root];
            particles.island[index] = island;
            self.island_bodies[island as usize].push(index);
        }

        let island_count = self.island_bodies.len();
        let mut island_constraints: Vec<Vec<usize>> = vec![Vec::new(); island_count];
        for (constraint_index, constraint) in constraints.iter().enumerate() {
            let (bodies, dynamic_count) = dynamic_bodies(particles, constraint);
            if dynamic_count == 0 {
                continue;
            }
            let island = particles.island[bodies[0]];
            if dynamic_count == 2 && particles.island[bodies[1]] != island {
                panic!(
                    "contact {constraint_index} joins bodies {} and {} from islands {} and {}",
                    bodies[0],
                    bodies[1],
                    island,
                    particles.island[bodies[1]]
                );
            }
            if island < 0 {
                panic!("contact {constraint_index} references body {} outside every island", bodies[0]);
            }
            island_constraints[island as usize].push(constraint_index);
        }

        self.islands = island_constraints
            .iter()
            .map(|indices| Self::build_island(particles, constraints, indices))
            .collect();

        self.batches.clear();
        for island in &self.islands {
            for (level, colors) in island.levels.iter().enumerate() {
                if self.batches.len() <= level {
                    self.batches.resize_with(level + 1, Vec::new);
                }
                let level_batches = &mut self.batches[level];
                for (color, bucket) in colors.iter().enumerate() {
                    if level_batches.len() <= color {
                        level_batches.resize_with(color + 1, Vec::new);
                    }
                    level_batches[color].extend_from_slice(bucket);
                }
            }
        }
        for bucket in self.batches.iter_mut().flatten() {
            bucket.sort_unstable();
        }
        tracing::trace!(
            islands = self.islands.len(),
            levels = self.batches.len(),
            constraints = constraints.len(),
            "contact graph rebuilt"
        );
    }

    fn build_island(particles: &ParticleSet, constraints: &[ContactConstraint], indices: &[usize]) -> IslandConstraints {
        if indices.is_empty() {
            return IslandConstraints::default();
        }

        // Breadth first from the bodies that touch something immovable.
        let mut body_levels: HashMap<usize, usize> = HashMap::new();
        let mut adjacency: HashMap<usize, Vec<usize>> = HashMap::new();
        let mut queue = VecDeque::new();
        let mut lowest_body = usize::MAX;
        for &constraint_index in indices {
            let constraint = &constraints[constraint_index];
            let (bodies, dynamic_count) = dynamic_bodies(particles, constraint);
            match dynamic_count {
                1 => {
                    if body_levels.insert(bodies[0], 0).is_none() {
                        queue.push_back(bodies[0]);
                    }
                }
                2 => {
                    adjacency.entry(bodies[0]).or_default().push(bodies[1]);
                    adjacency.entry(bodies[1]).or_default().push(bodies[0]);
                }
                _ => {}
            }
            lowest_body = lowest_body.min(bodies[0]);
            if dynamic_count == 2 {
                lowest_body = lowest_body.min(bodies[1]);
            }
        }
        let seeded_by_lowest = queue.is_empty();
        if seeded_by_lowest {
            body_levels.insert(lowest_body, 0);
            queue.push_back(lowest_body);
        }
        while let Some(body) = queue.pop_front() {
            let level = body_levels[&body];
            if let Some(neighbors) = adjacency.get(&body) {
                for &neighbor in neighbors {
                    if !body_levels.contains_key(&neighbor) {
                        body_levels.insert(neighbor, level + 1);
                        queue.push_back(neighbor);
                    }
                }
            }
        }

        let mut levels: Vec<Vec<ColorScaffold>> = Vec::new();
        for &constraint_index in indices {
            let (bodies, dynamic_count) = dynamic_bodies(particles, &constraints[constraint_index]);
            let dynamic = &bodies[..dynamic_count];
            let body_level = |body: &usize| body_levels.get(body).copied().unwrap_or(0);
            // A contact belongs to the level of its upper body, except in islands with nothing immovable
            // where the contacts of the seed body form level 0.
            let level = if seeded_by_lowest {
                dynamic.iter().map(body_level).min().unwrap_or(0)
            } else {
                dynamic.iter().map(body_level).max().unwrap_or(0)
            };
            if levels.len() <= level {
                levels.resize_with(level + 1, Vec::new);
            }
            let colors = &mut levels[level];
            match colors.iter_mut().find(|color| color.can_fit(dynamic)) {
                Some(color) => color.add(constraint_index, dynamic),
                None => {
                    let mut color = ColorScaffold::default();
                    color.add(constraint_index, dynamic);
                    colors.push(color);
                }
            }
        }

        IslandConstraints {
            levels: levels
                .into_iter()
                .map(|colors| colors.into_iter().map(|color| color.constraints).collect())
                .collect(),
        }
    }

    #[inline]
    pub fn island_count(&self) -> usize {
        self.islands.len()
    }

    pub fn island(&self, island: usize) -> &IslandConstraints {
        &self.islands[island]
    }

    /// Dynamic bodies of an island, ascending.
    pub fn island_bodies(&self, island: usize) -> &[usize] {
        &self.island_bodies[island]
    }

    /// `batches()[level][color]` lists the constraints safe to resolve together, merged across islands.
    #[inline]
    pub fn batches(&self) -> &[Vec<Vec<usize>>] {
        &self.batches
    }

    #[inline]
    pub fn level_count(&self) -> usize {
        self.batches.len()
    }

    pub fn clear(&mut self) {
        self.islands.clear();
        self.island_bodies.clear();
        self.batches.clear();
    }

    /// Checks that no bucket moves a dynamic body twice. Returns the first offending pair of constraints.
    pub fn find_coloring_conflict(
        &self,
        particles: &ParticleSet,
        constraints: &[ContactConstraint],
    ) -> Option<(usize, usize)> {
        for bucket in self.batches.iter().flatten() {
            let mut owners = HashMap::new();
            for &constraint_index in bucket {
                let (bodies, dynamic_count) = dynamic_bodies(particles, &constraints[constraint_index]);
                for &body in &bodies[..dynamic_count] {
                    if let Some(previous) = owners.insert(body, constraint_index) {
                        return Some((previous, constraint_index));
                    }
                }
            }
        }
        None
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

    fn stack(height: usize) -> ParticleSet {
        let mut particles = ParticleSet::new();
        particles.create_rigid_body(&RigidBodyDescription::create_static(
            RigidPose::IDENTITY,
            Shape::Plane(Plane::ground()),
        ));
        for level in 0..height {
            particles.create_rigid_body(&RigidBodyDescription::create_dynamic_no_velocity(
                RigidPose::from_position(Vec3::new(0.0, 0.0, 1.0 + 2.0 * level as f32)),
                Shape::Sphere(Sphere::new(1.0)),
                1.0,
            ));
        }
        particles
    }

    fn contact(particle: usize, levelset: usize) -> ContactConstraint {
        ContactConstraint::new(particle, levelset, 0.0)
    }

    #[test]
    fn stack_levels_follow_distance_from_ground() {
        let mut particles = stack(3);
        let constraints = vec![contact(3, 2), contact(1, 0), contact(2, 1)];
        let mut graph = ContactGraph::new();
        graph.build(&mut particles, &constraints);
        assert_eq!(graph.island_count(), 1);
        assert_eq!(graph.island_bodies(0), &[1, 2, 3]);
        assert_eq!(particles.island(0), -1);
        assert_eq!(graph.batches().len(), 3);
        assert_eq!(graph.batches()[0], vec![vec![1]]);
        assert_eq!(graph.batches()[1], vec![vec![2]]);
        assert_eq!(graph.batches()[2], vec![vec![0]]);
    }

    #[test]
    fn statics_do_not_join_islands() {
        let mut particles = stack(2);
        particles.create_rigid_body(&RigidBodyDescription::create_dynamic_no_velocity(
            RigidPose::from_position(Vec3::new(5.0, 0.0, 1.0)),
            Shape::Sphere(Sphere::new(1.0)),
            1.0,
        ));
        let constraints = vec![contact(1, 0), contact(3, 0)];
        let mut graph = ContactGraph::new();
        graph.build(&mut particles, &constraints);
        assert_eq!(graph.island_count(), 3);
        assert_ne!(particles.island(1), particles.island(3));
        assert_eq!(graph.batches()[0], vec![vec![0, 1]]);
    }

    #[test]
    fn static_bodies_may_repeat_within_a_color() {
        let mut particles = stack(1);
        let neighbor = particles.create_rigid_body(&RigidBodyDescription::create_dynamic_no_velocity(
            RigidPose::from_position(Vec3::new(2.0, 0.0, 1.0)),
            Shape::Sphere(Sphere::new(1.0)),
            1.0,
        ));
        let constraints = vec![contact(1, 0), contact(neighbor, 0), contact(neighbor, 1)];
        let mut graph = ContactGraph::new();
        graph.build(&mut particles, &constraints);
        // The plane is never written, so both ground contacts share a color. The sphere pair does not.
        assert_eq!(graph.batches(), &[vec![vec![0, 1], vec![2]]]);
        assert_eq!(graph.find_coloring_conflict(&particles, &constraints), None);

        let mut merged = ContactGraph::new();
        merged.batches = vec![vec![vec![0, 2]]];
        assert_eq!(merged.find_coloring_conflict(&particles, &constraints), Some((0, 2)));
    }

    #[test]
    fn shared_bodies_are_split_across_colors() {
        let mut particles = ParticleSet::new();
        for index in 0..4 {
            particles.create_rigid_body(&RigidBodyDescription::create_dynamic_no_velocity(
                RigidPose::from_position(Vec3::new(index as f32, 0.0, 0.0)),
                Shape::Sphere(Sphere::new(1.0)),
                1.0,
            ));
        }
        // A ring with no immovable body: the lowest index body seeds level 0.
        let constraints = vec![contact(1, 0), contact(2, 1), contact(3, 2), contact(0, 3), contact(2, 0)];
        let mut graph = ContactGraph::new();
        graph.build(&mut particles, &constraints);
        assert_eq!(graph.island_count(), 1);
        assert_eq!(graph.find_coloring_conflict(&particles, &constraints), None);
        let total: usize = graph.batches().iter().flatten().map(Vec::len).sum();
        assert_eq!(total, constraints.len());
    }

    #[test]
    fn isolated_bodies_get_their_own_island() {
        let mut particles = stack(2);
        let mut graph = ContactGraph::new();
        graph.build(&mut particles, &[]);
        assert_eq!(graph.island_count(), 2);
        assert_eq!(graph.level_count(), 0);
    }
}

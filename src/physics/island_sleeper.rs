use crate::physics::body_description::BodyKind;
use crate::physics::collision_detection::contact::ContactConstraint;
use crate::physics::collision_detection::contact_graph::ContactGraph;
use crate::physics::particles::ParticleSet;
use crate::physics::solver_config::SolverConfig;

/// Puts quiet islands to sleep and wakes islands that something awake is touching.
///
/// A body counts sub-steps in a row spent below both velocity thresholds. An island goes to sleep once every
/// one of its bodies has stayed quiet for `sleep_counter_threshold` sub-steps; the whole island wakes again
/// as soon as any member is woken.
pub struct IslandSleeper;

impl IslandSleeper {
    /// Wakes every island that mixes sleeping and awake bodies, and every sleeping island a moving kinematic
    /// body touches. Returns how many bodies were woken.
    pub fn reconcile(particles: &mut ParticleSet, graph: &ContactGraph, constraints: &[ContactConstraint]) -> usize {
        let mut woken = 0;
        for island in 0..graph.island_count() {
            let bodies = graph.island_bodies(island);
            let any_awake = bodies.iter().any(|&body| !particles.sleeping[body]);
            let any_sleeping = bodies.iter().any(|&body| particles.sleeping[body]);
            if any_awake && any_sleeping {
                for &body in bodies {
                    if particles.sleeping[body] {
                        Self::wake_body(particles, body);
                        woken += 1;
                    }
                }
                tracing::debug!(island, "island woken by contact");
            }
        }

        for constraint in constraints {
            let (a, b) = (constraint.particle_index, constraint.levelset_index);
            for (mover, body) in [(a, b), (b, a)] {
                if particles.sleeping[body] && Self::is_moving_kinematic(particles, mover) {
                    let asleep_before = particles.sleeping.iter().filter(|&&sleeping| sleeping).count();
                    Self::wake_island_of(particles, body);
                    woken += asleep_before - particles.sleeping.iter().filter(|&&sleeping| sleeping).count();
                    tracing::debug!(body, kinematic = mover, "island woken by kinematic contact");
                }
            }
        }
        woken
    }

    fn is_moving_kinematic(particles: &ParticleSet, index: usize) -> bool {
        particles.kind[index] == BodyKind::Kinematic
            && !particles.disabled[index]
            && (particles.v[index] != glam::Vec3::ZERO || particles.w[index] != glam::Vec3::ZERO)
    }

    /// Advances sleep counters and puts quiet islands to sleep. Returns how many islands fell asleep.
    pub fn update(particles: &mut ParticleSet, graph: &ContactGraph, config: &SolverConfig) -> usize {
        let linear_threshold = config.sleep_linear_threshold * config.sleep_linear_threshold;
        let angular_threshold = config.sleep_angular_threshold * config.sleep_angular_threshold;
        for index in particles.awake_dynamic_indices().collect::<Vec<_>>() {
            let quiet = particles.v[index].length_squared() < linear_threshold
                && particles.w[index].length_squared() < angular_threshold;
            particles.sleep_counter[index] = if quiet {
                particles.sleep_counter[index].saturating_add(1)
            } else {
                0
            };
        }

        let mut slept = 0;
        for island in 0..graph.island_count() {
            let bodies = graph.island_bodies(island);
            if bodies.is_empty() || bodies.iter().all(|&body| particles.sleeping[body]) {
                continue;
            }
            if bodies
                .iter()
                .all(|&body| particles.sleep_counter[body] >= config.sleep_counter_threshold)
            {
                for &body in bodies {
                    Self::sleep_body(particles, body);
                }
                slept += 1;
                tracing::debug!(island, bodies = bodies.len(), "island fell asleep");
            }
        }
        slept
    }

    /// Wakes `body` and every body sharing its island.
    pub fn wake_island_of(particles: &mut ParticleSet, body: usize) {
        let island = particles.island[body];
        if island < 0 {
            Self::wake_body(particles, body);
            return;
        }
        for index in 0..particles.len() {
            if particles.island[index] == island && particles.sleeping[index] {
                Self::wake_body(particles, index);
            }
        }
    }

    /// Puts `body` and every body sharing its island to sleep.
    pub fn sleep_island_of(particles: &mut ParticleSet, body: usize) {
        let island = particles.island[body];
        if island < 0 {
            Self::sleep_body(particles, body);
            return;
        }
        for index in 0..particles.len() {
            if particles.island[index] == island {
                Self::sleep_body(particles, index);
            }
        }
    }

    fn wake_body(particles: &mut ParticleSet, body: usize) {
        particles.sleeping[body] = false;
        particles.sleep_counter[body] = 0;
    }

    fn sleep_body(particles: &mut ParticleSet, body: usize) {
        if particles.inv_m[body] == 0.0 {
            return;
        }
        particles.sleeping[body] = true;
        particles.sleep_counter[body] = 0;
        particles.v[body] = glam::Vec3::ZERO;
        particles.w[body] = glam::Vec3::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::body_description::RigidBodyDescription;
    use crate::physics::body_properties::{BodyVelocity, RigidPose};
    use crate::physics::collision_detection::contact::ContactConstraint;
    use crate::physics::collidables::shape::Shape;
    use crate::physics::collidables::sphere::Sphere;
    use glam::Vec3;

    fn pair() -> (ParticleSet, ContactGraph) {
        let mut particles = ParticleSet::new();
        for x in [0.0, 1.5] {
            particles.create_rigid_body(&RigidBodyDescription::create_dynamic_no_velocity(
                RigidPose::from_position(Vec3::new(x, 0.0, 0.0)),
                Shape::Sphere(Sphere::new(1.0)),
                1.0,
            ));
        }
        let mut graph = ContactGraph::new();
        graph.build(&mut particles, &[ContactConstraint::new(1, 0, 0.0)]);
        (particles, graph)
    }

    #[test]
    fn quiet_island_sleeps_after_threshold() {
        let (mut particles, graph) = pair();
        let config = SolverConfig {
            sleep_counter_threshold: 3,
            ..Default::default()
        };
        assert_eq!(IslandSleeper::update(&mut particles, &graph, &config), 0);
        assert_eq!(IslandSleeper::update(&mut particles, &graph, &config), 0);
        assert_eq!(IslandSleeper::update(&mut particles, &graph, &config), 1);
        assert!(particles.sleeping(0) && particles.sleeping(1));
    }

    #[test]
    fn one_moving_body_keeps_island_awake() {
        let (mut particles, graph) = pair();
        particles
            .set_velocity(1, BodyVelocity::from_linear(Vec3::new(5.0, 0.0, 0.0)))
            .unwrap();
        let config = SolverConfig {
            sleep_counter_threshold: 1,
            ..Default::default()
        };
        assert_eq!(IslandSleeper::update(&mut particles, &graph, &config), 0);
        assert!(!particles.sleeping(0));
    }

    #[test]
    fn mixed_island_is_woken() {
        let (mut particles, graph) = pair();
        particles.set_sleeping(0, true).unwrap();
        assert_eq!(IslandSleeper::reconcile(&mut particles, &graph, &[]), 1);
        assert!(!particles.sleeping(0));
    }

    fn paddle(particles: &mut ParticleSet, velocity: Vec3) -> usize {
        particles.create_rigid_body(&RigidBodyDescription::create_kinematic(
            RigidPose::from_position(Vec3::new(-1.5, 0.0, 0.0)),
            BodyVelocity::from_linear(velocity),
            Shape::Sphere(Sphere::new(1.0)),
        ))
    }

    #[test]
    fn moving_kinematic_contact_wakes_the_island() {
        let (mut particles, _) = pair();
        let kinematic = paddle(&mut particles, Vec3::new(2.0, 0.0, 0.0));
        let constraints = [ContactConstraint::new(1, 0, 0.0), ContactConstraint::new(0, kinematic, 0.0)];
        let mut graph = ContactGraph::new();
        graph.build(&mut particles, &constraints);
        particles.set_sleeping(0, true).unwrap();
        particles.set_sleeping(1, true).unwrap();

        assert_eq!(IslandSleeper::reconcile(&mut particles, &graph, &constraints), 2);
        assert!(!particles.sleeping(0) && !particles.sleeping(1));
    }

    #[test]
    fn resting_kinematic_contact_lets_the_island_sleep() {
        let (mut particles, _) = pair();
        let kinematic = paddle(&mut particles, Vec3::ZERO);
        let constraints = [ContactConstraint::new(1, 0, 0.0), ContactConstraint::new(0, kinematic, 0.0)];
        let mut graph = ContactGraph::new();
        graph.build(&mut particles, &constraints);
        particles.set_sleeping(0, true).unwrap();
        particles.set_sleeping(1, true).unwrap();

        assert_eq!(IslandSleeper::reconcile(&mut particles, &graph, &constraints), 0);
        assert!(particles.sleeping(0) && particles.sleeping(1));
    }
}

use std::collections::HashSet;

use glam::Vec3;

use crate::physics::collision_detection::contact::ContactConstraint;
use crate::physics::particles::ParticleSet;
use crate::physics::solver_config::SolverConfig;

/// A contact that received an impulse during the frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollisionEvent {
    pub time: f32,
    pub particle_index: usize,
    pub levelset_index: usize,
    pub location: Vec3,
    pub normal: Vec3,
    pub accumulated_impulse: Vec3,
    pub velocity1: Vec3,
    pub velocity2: Vec3,
    pub mass1: f32,
    pub mass2: f32,
}

/// A body moving faster than `trailing_min_speed` at the end of the frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrailingEvent {
    pub time: f32,
    pub particle_index: usize,
    pub location: Vec3,
    pub velocity: Vec3,
    pub angular_velocity: Vec3,
    pub mass: f32,
}

/// Collects the events of one frame, bounded by the configured buffer sizes.
#[derive(Debug, Default, Clone)]
pub struct EventGatherer {
    collision_events: Vec<CollisionEvent>,
    trailing_events: Vec<TrailingEvent>,
    occupied_cells: HashSet<[i64; 3]>,
}

impl EventGatherer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.collision_events.clear();
        self.trailing_events.clear();
        self.occupied_cells.clear();
    }

    #[inline]
    pub fn collision_events(&self) -> &[CollisionEvent] {
        &self.collision_events
    }

    #[inline]
    pub fn trailing_events(&self) -> &[TrailingEvent] {
        &self.trailing_events
    }

    /// Records contacts that pushed their bodies apart. With a positive spatial hash radius at most one event
    /// is kept per cell, first come first served.
    pub fn gather_collisions(
        &mut self,
        time: f32,
        particles: &ParticleSet,
        constraints: &[ContactConstraint],
        config: &SolverConfig,
    ) {
        let radius = config.collision_event_spatial_hash_radius;
        for constraint in constraints {
            if self.collision_events.len() >= config.max_collision_events {
                break;
            }
            if constraint.accumulated_impulse == Vec3::ZERO {
                continue;
            }
            if radius > 0.0 {
                let cell = (constraint.location / radius).floor();
                if !self.occupied_cells.insert([cell.x as i64, cell.y as i64, cell.z as i64]) {
                    continue;
                }
            }
            self.collision_events.push(CollisionEvent {
                time,
                particle_index: constraint.particle_index,
                levelset_index: constraint.levelset_index,
                location: constraint.location,
                normal: constraint.normal,
                accumulated_impulse: constraint.accumulated_impulse,
                velocity1: particles.v(constraint.particle_index),
                velocity2: particles.v(constraint.levelset_index),
                mass1: particles.m(constraint.particle_index),
                mass2: particles.m(constraint.levelset_index),
            });
        }
    }

    /// Records every awake dynamic body moving at least `trailing_min_speed`.
    pub fn gather_trailing(&mut self, time: f32, particles: &ParticleSet, config: &SolverConfig) {
        let min_speed_squared = config.trailing_min_speed * config.trailing_min_speed;
        for index in particles.awake_dynamic_indices() {
            if self.trailing_events.len() >= config.max_trailing_events {
                break;
            }
            let velocity = particles.v(index);
            if velocity.length_squared() < min_speed_squared {
                continue;
            }
            self.trailing_events.push(TrailingEvent {
                time,
                particle_index: index,
                location: particles.x(index),
                velocity,
                angular_velocity: particles.w(index),
                mass: particles.m(index),
            });
        }
    }
}

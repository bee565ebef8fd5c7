use glam::Vec3;
use serde::{Deserialize, Serialize};

/// When push-out freezes bodies that were already resolved against something immovable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShockPropagation {
    /// Never freeze; every dynamic body takes part in every correction.
    Disabled,
    /// Freeze level by level, only during the last push-out pass.
    #[default]
    FinalIteration,
    /// Freeze level by level during every pass. The frozen set restarts empty at the top of each pass.
    EveryIteration,
}

/// Tunables of one evolution. Changed only through solver commands on the physics thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Contacts are resolved while phi is below this distance.
    pub thickness: f32,
    pub restitution: f32,
    pub friction: f32,
    pub angular_friction: f32,
    /// Contacts slower than `2 * resting_contact_gravity * dt` are treated as resting and get no restitution.
    pub resting_contact_gravity: f32,
    /// Velocity solve passes per sub-step.
    pub apply_iterations: u32,
    /// Upper bound on push-out passes per sub-step.
    pub push_out_iterations: u32,
    /// Corrections per contact inside one push-out pass.
    pub push_out_pair_iterations: u32,
    pub shock_propagation: ShockPropagation,
    /// Frames are split into sub-steps no longer than this.
    pub max_step: f32,
    pub gravity: Vec3,
    pub collisions_enabled: bool,
    /// Average all penetrating samples in sampled tests instead of keeping only the deepest one.
    pub normal_averaging: bool,
    /// Broad phase boxes grow by `dt * bounds_thickness_multiplier * |v|`.
    pub bounds_thickness_multiplier: f32,
    pub bvh_max_depth: u32,
    pub bvh_leaf_size: u32,
    pub sleep_linear_threshold: f32,
    pub sleep_angular_threshold: f32,
    /// Consecutive quiet sub-steps before an island sleeps.
    pub sleep_counter_threshold: u32,
    pub max_collision_events: usize,
    pub max_trailing_events: usize,
    /// Minimum speed for a body to emit a trailing event.
    pub trailing_min_speed: f32,
    /// Cell size of the spatial hash that thins collision events. Zero keeps every event.
    pub collision_event_spatial_hash_radius: f32,
    /// Solver worker threads. Zero uses the global pool.
    pub worker_threads: usize,
    pub parallel: bool,
    /// Panic on non-finite state instead of resetting the offending body.
    pub strict_finite_checks: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            thickness: 0.0,
            restitution: 0.0,
            friction: 0.0,
            angular_friction: 0.0,
            resting_contact_gravity: 980.0,
            apply_iterations: 1,
            push_out_iterations: 3,
            push_out_pair_iterations: 1,
            shock_propagation: ShockPropagation::FinalIteration,
            max_step: 1.0 / 30.0,
            gravity: Vec3::new(0.0, 0.0, -980.0),
            collisions_enabled: true,
            normal_averaging: true,
            bounds_thickness_multiplier: 2.0,
            bvh_max_depth: 12,
            bvh_leaf_size: 4,
            sleep_linear_threshold: 1.0,
            sleep_angular_threshold: 1.0,
            sleep_counter_threshold: 20,
            max_collision_events: 256,
            max_trailing_events: 256,
            trailing_min_speed: 100.0,
            collision_event_spatial_hash_radius: 0.0,
            worker_threads: 0,
            parallel: true,
            strict_finite_checks: cfg!(debug_assertions),
        }
    }
}

fn at_least_one(name: &str, value: &mut u32) {
    if *value == 0 {
        tracing::warn!(setting = name, "zero is not a valid value, clamping to 1");
        *value = 1;
    }
}

fn non_negative(name: &str, value: &mut f32, fallback: f32) {
    if !value.is_finite() || *value < 0.0 {
        tracing::warn!(setting = name, value = *value, fallback, "invalid value, clamping");
        *value = fallback;
    }
}

impl SolverConfig {
    /// Returns a copy with every invalid tunable clamped to a safe value.
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        at_least_one("apply_iterations", &mut self.apply_iterations);
        at_least_one("push_out_iterations", &mut self.push_out_iterations);
        at_least_one("push_out_pair_iterations", &mut self.push_out_pair_iterations);
        at_least_one("bvh_leaf_size", &mut self.bvh_leaf_size);
        at_least_one("sleep_counter_threshold", &mut self.sleep_counter_threshold);
        non_negative("thickness", &mut self.thickness, 0.0);
        non_negative("restitution", &mut self.restitution, 0.0);
        non_negative("friction", &mut self.friction, 0.0);
        non_negative("angular_friction", &mut self.angular_friction, 0.0);
        non_negative("resting_contact_gravity", &mut self.resting_contact_gravity, defaults.resting_contact_gravity);
        non_negative(
            "bounds_thickness_multiplier",
            &mut self.bounds_thickness_multiplier,
            defaults.bounds_thickness_multiplier,
        );
        non_negative("sleep_linear_threshold", &mut self.sleep_linear_threshold, 0.0);
        non_negative("sleep_angular_threshold", &mut self.sleep_angular_threshold, 0.0);
        non_negative("trailing_min_speed", &mut self.trailing_min_speed, 0.0);
        non_negative(
            "collision_event_spatial_hash_radius",
            &mut self.collision_event_spatial_hash_radius,
            0.0,
        );
        if self.restitution > 1.0 {
            tracing::warn!(value = self.restitution, "restitution above 1 adds energy, clamping to 1");
            self.restitution = 1.0;
        }
        if !self.max_step.is_finite() || self.max_step <= 0.0 {
            tracing::warn!(value = self.max_step, "max_step must be positive, using the default");
            self.max_step = defaults.max_step;
        }
        if !self.gravity.is_finite() {
            tracing::warn!("gravity is not finite, using the default");
            self.gravity = defaults.gravity;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_iteration_counts_are_clamped() {
        let config = SolverConfig {
            apply_iterations: 0,
            push_out_iterations: 0,
            push_out_pair_iterations: 0,
            ..Default::default()
        }
        .sanitized();
        assert_eq!(config.apply_iterations, 1);
        assert_eq!(config.push_out_iterations, 1);
        assert_eq!(config.push_out_pair_iterations, 1);
    }

    #[test]
    fn negative_and_nan_values_are_clamped() {
        let config = SolverConfig {
            friction: -1.0,
            thickness: f32::NAN,
            restitution: 3.0,
            max_step: 0.0,
            ..Default::default()
        }
        .sanitized();
        assert_eq!(config.friction, 0.0);
        assert_eq!(config.thickness, 0.0);
        assert_eq!(config.restitution, 1.0);
        assert_eq!(config.max_step, SolverConfig::default().max_step);
    }

    #[test]
    fn defaults_survive_sanitizing() {
        assert_eq!(SolverConfig::default().sanitized(), SolverConfig::default());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: SolverConfig = toml::from_str(
            r#"
            friction = 0.5
            shock_propagation = "every_iteration"
            gravity = [0.0, 0.0, -9.8]
            "#,
        )
        .unwrap();
        assert_eq!(config.friction, 0.5);
        assert_eq!(config.shock_propagation, ShockPropagation::EveryIteration);
        assert_eq!(config.gravity, Vec3::new(0.0, 0.0, -9.8));
        assert_eq!(config.apply_iterations, SolverConfig::default().apply_iterations);
    }
}

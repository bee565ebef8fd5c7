pub mod collision_constraint;
pub mod impulse;

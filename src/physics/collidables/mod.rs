pub mod shape;

// Analytic primitives
pub mod box_shape;
pub mod plane;
pub mod sphere;

// Composite and sampled geometry
pub mod collision_particles;
pub mod implicit_union;
pub mod level_set;

pub mod body_description;
pub mod body_properties;
pub mod collidables;
pub mod collision_detection;
pub mod constraints;
pub mod events;
pub mod evolution;
pub mod handles;
pub mod island_sleeper;
pub mod particles;
pub mod pose_integration;
pub mod simulation_profiler;
pub mod solver_config;
pub mod timestepper;
pub mod trees;

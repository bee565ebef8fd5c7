pub mod broad_phase;
pub mod collision_tasks;
pub mod contact;
pub mod contact_graph;
pub mod narrow_phase;

//! Concurrent position-based rigid-body dynamics.
//!
//! A [`threading::module::PhysicsModule`] owns one or more [`physics::evolution::Evolution`]s and advances them
//! either on a dedicated physics thread or when the caller ticks it. Game-side code talks to an evolution through
//! proxies whose results are double-buffered so readers never observe a half-written frame.

pub mod config;
pub mod error;
pub mod physics;
pub mod threading;
pub mod utilities;

pub use config::ModuleConfig;
pub use error::{ConfigError, PhysicsError, TaskError};
pub use threading::module::PhysicsModule;

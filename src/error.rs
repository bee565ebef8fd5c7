use std::path::PathBuf;

use thiserror::Error;

use crate::physics::handles::EvolutionId;

/// Errors reported by the physics module and its evolutions.
#[derive(Debug, Error)]
pub enum PhysicsError {
    #[error("unknown evolution {0}")]
    UnknownEvolution(EvolutionId),

    #[error("evolution {evolution} still has {proxies} registered proxies")]
    EvolutionHasProxies { evolution: EvolutionId, proxies: usize },

    #[error("particle index {0} is out of range or retired")]
    InvalidParticle(usize),

    #[error("the physics task is not running")]
    TaskNotRunning,

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Failures of the persistent physics task. Every variant stops the task.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    #[error("solver for {evolution} panicked: {message}")]
    SolverPanicked { evolution: EvolutionId, message: String },

    #[error("failed to spawn the physics thread: {0}")]
    Spawn(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl TaskError {
    /// Builds a `SolverPanicked` error from a payload caught by `catch_unwind`.
    pub(crate) fn from_panic(evolution: EvolutionId, payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(message) = payload.downcast_ref::<&str>() {
            (*message).to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self::SolverPanicked { evolution, message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads_become_messages() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("exploded");
        let error = TaskError::from_panic(EvolutionId(2), payload.as_ref());
        assert_eq!(error.to_string(), "solver for EvolutionId<2> panicked: exploded");

        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert!(matches!(
            TaskError::from_panic(EvolutionId(0), payload.as_ref()),
            TaskError::SolverPanicked { message, .. } if message == "owned"
        ));
    }
}

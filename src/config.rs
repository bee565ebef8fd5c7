use std::path::Path;
use std::{env, fs};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::physics::solver_config::SolverConfig;

/// Environment variable that forces the threading mode: `1`/`true` for a dedicated physics thread,
/// `0`/`false` for single threaded ticking.
pub const DEDICATED_THREAD_ENV: &str = "PBD_PHYSICS_DEDICATED_THREAD";

const fn default_true() -> bool {
    true
}

const fn default_target_hz() -> f32 {
    60.0
}

const fn default_sync_timeout_ms() -> u64 {
    4
}

const fn default_max_stall_ms() -> u64 {
    100
}

/// Settings of a `PhysicsModule`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// Run evolutions on a dedicated physics thread instead of ticking them from the caller.
    #[serde(default = "default_true")]
    pub dedicated_thread: bool,
    /// Tick rate of the dedicated thread.
    #[serde(default = "default_target_hz")]
    pub target_hz: f32,
    /// How long a blocking `sync` waits for the physics thread to stall.
    #[serde(default = "default_sync_timeout_ms")]
    pub sync_timeout_ms: u64,
    /// Upper bound for explicit `ScopedThreadLock` waits.
    #[serde(default = "default_max_stall_ms")]
    pub max_stall_ms: u64,
    /// Settings of evolutions created without an explicit config.
    #[serde(default)]
    pub solver: SolverConfig,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            dedicated_thread: default_true(),
            target_hz: default_target_hz(),
            sync_timeout_ms: default_sync_timeout_ms(),
            max_stall_ms: default_max_stall_ms(),
            solver: SolverConfig::default(),
        }
    }
}

impl ModuleConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        Ok(config.sanitized())
    }

    /// Reads a TOML file, then applies environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env_overrides();
        tracing::debug!(path = %path.display(), dedicated_thread = config.dedicated_thread, "loaded physics config");
        Ok(config)
    }

    /// Applies `PBD_PHYSICS_DEDICATED_THREAD` if it is set to a recognised value.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(value) = env::var(DEDICATED_THREAD_ENV) {
            match parse_toggle(&value) {
                Some(enabled) => self.dedicated_thread = enabled,
                None => tracing::warn!(variable = DEDICATED_THREAD_ENV, value, "ignoring unrecognised value"),
            }
        }
    }

    /// Seconds per dedicated-thread tick.
    pub fn target_dt(&self) -> f32 {
        1.0 / self.target_hz
    }

    pub fn sanitized(mut self) -> Self {
        if !self.target_hz.is_finite() || self.target_hz <= 0.0 {
            tracing::warn!(value = self.target_hz, "target_hz must be positive, using the default");
            self.target_hz = default_target_hz();
        }
        self.solver = self.solver.sanitized();
        self
    }
}

fn parse_toggle(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/*!
 * Arena Configuration
 * Construction parameters, loadable from serde sources or the environment
 */

use crate::core::limits::{DEFAULT_ARENA_SIZE, ENV_FIT_MODE, ENV_SPACE_SIZE};
use crate::core::types::Size;
use crate::memory::types::{FitMode, MemoryError, MemoryResult};
use serde::{Deserialize, Serialize};

/// Arena construction parameters
///
/// The parent resource and logger are runtime handles and are supplied
/// through [`ArenaBuilder`](super::ArenaBuilder) instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArenaConfig {
    /// Total arena capacity in bytes, rounded down to the block alignment
    pub space_size: Size,
    pub fit_mode: FitMode,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            space_size: DEFAULT_ARENA_SIZE,
            fit_mode: FitMode::default(),
        }
    }
}

impl ArenaConfig {
    pub fn new(space_size: Size, fit_mode: FitMode) -> Self {
        Self {
            space_size,
            fit_mode,
        }
    }

    /// Defaults overridden by `ARENA_SPACE_SIZE` and `ARENA_FIT_MODE`
    pub fn from_env() -> MemoryResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Parse a JSON document such as `{"space_size": 4096, "fit_mode": "best_fit"}`
    pub fn from_json(json: &str) -> MemoryResult<Self> {
        serde_json::from_str(json).map_err(|e| MemoryError::InvalidConfiguration(e.to_string()))
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> MemoryResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_SPACE_SIZE) {
            config.space_size = raw.trim().parse().map_err(|_| {
                MemoryError::InvalidConfiguration(format!("{}='{}' is not a byte count", ENV_SPACE_SIZE, raw))
            })?;
        }

        if let Some(raw) = lookup(ENV_FIT_MODE) {
            config.fit_mode = raw.parse()?;
        }

        Ok(config)
    }
}

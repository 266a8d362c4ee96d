//! Event loop configuration

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Default bound on chained thenable adoptions for a single promise
pub const DEFAULT_MAX_ADOPTION_DEPTH: usize = 1_000;

/// Tunables for an [`EventLoop`](super::EventLoop)
///
/// ```
/// use mercury::event_loop::EventLoopConfig;
///
/// let config = EventLoopConfig::from_json(r#"{ "microtask_budget": 64 }"#).unwrap();
/// assert_eq!(config.microtask_budget, Some(64));
/// assert_eq!(config.max_adoption_depth, 1_000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventLoopConfig {
    /// Maximum microtasks run per loop iteration. `None` drains to
    /// exhaustion. When the cap is hit the rest stays queued and the next
    /// iteration keeps draining before any macrotask is picked.
    pub microtask_budget: Option<usize>,
    /// How many times one promise may adopt a thenable before it is
    /// rejected with a TypeError
    pub max_adoption_depth: usize,
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        Self {
            microtask_budget: None,
            max_adoption_depth: DEFAULT_MAX_ADOPTION_DEPTH,
        }
    }
}

impl EventLoopConfig {
    /// Parse a JSON configuration. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn with_microtask_budget(mut self, budget: usize) -> Self {
        self.microtask_budget = Some(budget);
        self
    }

    pub fn with_max_adoption_depth(mut self, depth: usize) -> Self {
        self.max_adoption_depth = depth;
        self
    }

    /// Reject settings the loop cannot make progress with
    pub fn validate(&self) -> Result<()> {
        if self.microtask_budget == Some(0) {
            return Err(Error::ConfigError(
                "microtask_budget must be at least 1".to_string(),
            ));
        }
        if self.max_adoption_depth == 0 {
            return Err(Error::ConfigError(
                "max_adoption_depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

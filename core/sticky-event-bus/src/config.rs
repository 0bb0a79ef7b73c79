//! Bus configuration

use serde::Deserialize;

use crate::error::ConfigError;

/// Tunables for a [`StickyBus`](crate::StickyBus)
///
/// ```toml
/// # retain at most 256 unconsumed sticky messages, evicting the oldest
/// sticky_limit = 256
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BusConfig {
    /// Upper bound on retained sticky messages. `None` keeps every
    /// unconsumed sticky message until it is consumed.
    pub sticky_limit: Option<usize>,
}

impl BusConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: BusConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_sticky_limit(mut self, limit: usize) -> Self {
        self.sticky_limit = Some(limit);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.sticky_limit {
            Some(0) => Err(ConfigError::ZeroStickyLimit),
            _ => Ok(()),
        }
    }
}

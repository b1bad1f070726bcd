//! Engine and value-channel configuration.
//!
//! Both structs deserialize from the `config:` block of a chain definition and
//! fall back to their defaults for any missing field.

use serde::{Deserialize, Serialize};

/// What the engine does when deep-link validation fails at start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ValidationPolicy {
    /// Report through the error handler, then dispatch the first step anyway.
    #[default]
    LaunchAnyway,
    /// Report through the error handler and dispatch nothing.
    BlockFirstLaunch,
}

impl ValidationPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationPolicy::LaunchAnyway => "launch_anyway",
            ValidationPolicy::BlockFirstLaunch => "block_first_launch",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "launch_anyway" | "anyway" => Some(Self::LaunchAnyway),
            "block_first_launch" | "block" => Some(Self::BlockFirstLaunch),
            _ => None,
        }
    }
}

/// Chain engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    #[serde(default)]
    pub validation_policy: ValidationPolicy,

    /// Capacity of the subscriber broadcast buffer. Slow subscribers that fall
    /// further behind than this skip events.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_event_buffer() -> usize {
    64
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            validation_policy: ValidationPolicy::default(),
            event_buffer: default_event_buffer(),
        }
    }
}

/// Bound on emission jobs kept alive by a `KeepPrevious` flow intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRetention {
    #[serde(default = "default_max_retained_jobs")]
    pub max_retained_jobs: usize,
}

fn default_max_retained_jobs() -> usize {
    32
}

impl Default for JobRetention {
    fn default() -> Self {
        Self {
            max_retained_jobs: default_max_retained_jobs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_config_defaults_from_empty_yaml() {
        let config: ChainConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.validation_policy, ValidationPolicy::LaunchAnyway);
        assert_eq!(config.event_buffer, 64);
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!(
            ValidationPolicy::from_str("block"),
            Some(ValidationPolicy::BlockFirstLaunch)
        );
        assert_eq!(
            ValidationPolicy::from_str("Block-First-Launch"),
            Some(ValidationPolicy::BlockFirstLaunch)
        );
        assert_eq!(ValidationPolicy::from_str("sometimes"), None);

        let config: ChainConfig =
            serde_yaml::from_str("validation_policy: block_first_launch").unwrap();
        assert_eq!(config.validation_policy, ValidationPolicy::BlockFirstLaunch);
    }
}

/*!
 * Queue Configuration
 * Concurrency limit and behavior flags
 */

use crate::core::env::parse_flag;
use crate::core::limits::{ENV_QUEUE_AUTOSTART, ENV_QUEUE_BLOCK, ENV_QUEUE_LIMIT, UNBOUNDED};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Queue configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum concurrently active jobs (0 = unbounded)
    pub limit: usize,
    /// Admit newly inserted jobs immediately, without `start()`
    pub autostart: bool,
    /// Make `start()` wait for every active job
    pub block: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            limit: UNBOUNDED,
            autostart: false,
            block: false,
        }
    }
}

impl QueueConfig {
    #[inline]
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_autostart(mut self, autostart: bool) -> Self {
        self.autostart = autostart;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_block(mut self, block: bool) -> Self {
        self.block = block;
        self
    }

    /// Defaults overridden by `FORKQ_QUEUE_LIMIT`, `FORKQ_AUTOSTART`, `FORKQ_BLOCK`
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_QUEUE_LIMIT) {
            match raw.trim().parse::<usize>() {
                Ok(limit) => config.limit = limit,
                Err(e) => warn!(key = ENV_QUEUE_LIMIT, value = %raw, error = %e, "Ignoring invalid queue limit"),
            }
        }
        if let Some(raw) = lookup(ENV_QUEUE_AUTOSTART) {
            config.autostart = parse_flag(&raw);
        }
        if let Some(raw) = lookup(ENV_QUEUE_BLOCK) {
            config.block = parse_flag(&raw);
        }

        config
    }

    /// Whether `active` jobs saturate the limit
    #[inline]
    #[must_use]
    pub fn is_maxed(&self, active: usize) -> bool {
        self.limit != UNBOUNDED && active >= self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_is_unbounded() {
        let config = QueueConfig::default();
        assert_eq!(config.limit, UNBOUNDED);
        assert!(!config.is_maxed(10_000));
    }

    #[test]
    fn test_is_maxed_respects_limit() {
        let config = QueueConfig::default().with_limit(2);
        assert!(!config.is_maxed(1));
        assert!(config.is_maxed(2));
    }

    #[test]
    fn test_from_lookup_reads_overrides() {
        let config = QueueConfig::from_lookup(lookup(&[
            (ENV_QUEUE_LIMIT, "4"),
            (ENV_QUEUE_AUTOSTART, "true"),
            (ENV_QUEUE_BLOCK, "0"),
        ]));
        assert_eq!(
            config,
            QueueConfig::default().with_limit(4).with_autostart(true)
        );
    }

    #[test]
    fn test_from_lookup_ignores_invalid_limit() {
        let config = QueueConfig::from_lookup(lookup(&[(ENV_QUEUE_LIMIT, "many")]));
        assert_eq!(config.limit, UNBOUNDED);
    }

    #[test]
    fn test_from_lookup_accepts_word_flags() {
        let config = QueueConfig::from_lookup(lookup(&[
            (ENV_QUEUE_AUTOSTART, "yes"),
            (ENV_QUEUE_BLOCK, "On"),
        ]));
        assert!(config.autostart);
        assert!(config.block);
    }
}

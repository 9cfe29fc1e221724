//! Tuning knobs for the adaptive core
//!
//! Every threshold and counter bound is a configuration value rather than a
//! literal in the dispatch code. Counters that live in the ancillary array or
//! in a quickened operand are 8 bits wide, so the per-site knobs are `u8`.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// How frames execute their code units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecMode {
    /// Quicken hot code units and specialize their instructions
    #[default]
    Adaptive,
    /// Execute the original static stream through the generic semantics only.
    /// Nothing is quickened or rewritten while in this mode.
    Tracing,
}

/// Adaptive execution configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    /// Frame entries plus backward jumps before a code unit is quickened
    pub warmup_threshold: u32,
    /// Adaptive executions of one site before a specialization attempt
    pub specialize_threshold: u8,
    /// Saturating counter lower bound; reaching it deoptimizes
    pub counter_min: u8,
    /// Counter value written when a site is specialized
    pub counter_initial: u8,
    /// Saturating counter upper bound
    pub counter_max: u8,
    /// Counter increment on a guard hit
    pub hit_step: u8,
    /// Counter decrement on a guard miss
    pub miss_step: u8,
    /// Upper bound in bytes for one code unit's quickened stream plus ancillary array
    pub quicken_memory_limit: usize,
    /// Maximum interpreter call depth
    pub max_frame_depth: usize,
    /// Execution mode
    pub mode: ExecMode,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            warmup_threshold: 8,
            specialize_threshold: 8,
            counter_min: 0,
            counter_initial: 4,
            counter_max: 8,
            hit_step: 1,
            miss_step: 2,
            quicken_memory_limit: 1024 * 1024, // 1 MiB
            max_frame_depth: 512,
            mode: ExecMode::Adaptive,
        }
    }
}

impl AdaptiveConfig {
    /// Create the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration for tracing consumers: same tuning, no rewriting
    pub fn tracing() -> Self {
        Self::default().with_mode(ExecMode::Tracing)
    }

    /// Set the code-unit warm-up threshold
    pub fn with_warmup_threshold(mut self, threshold: u32) -> Self {
        self.warmup_threshold = threshold;
        self
    }

    /// Set the per-site specialization threshold
    pub fn with_specialize_threshold(mut self, threshold: u8) -> Self {
        self.specialize_threshold = threshold;
        self
    }

    /// Set the saturating counter bounds and starting value
    pub fn with_counter(mut self, min: u8, initial: u8, max: u8) -> Self {
        self.counter_min = min;
        self.counter_initial = initial;
        self.counter_max = max;
        self
    }

    /// Set the counter steps for hits and misses
    pub fn with_steps(mut self, hit_step: u8, miss_step: u8) -> Self {
        self.hit_step = hit_step;
        self.miss_step = miss_step;
        self
    }

    /// Set the quickening memory budget in bytes
    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.quicken_memory_limit = bytes;
        self
    }

    /// Set the maximum call depth
    pub fn with_max_frame_depth(mut self, depth: usize) -> Self {
        self.max_frame_depth = depth;
        self
    }

    /// Set the execution mode
    pub fn with_mode(mut self, mode: ExecMode) -> Self {
        self.mode = mode;
        self
    }

    /// Check the invariants the dispatcher relies on
    pub fn validate(&self) -> Result<()> {
        if self.specialize_threshold < 2 {
            return Err(Error::InvalidConfig(format!(
                "specialize_threshold must be at least 2, got {}",
                self.specialize_threshold
            )));
        }
        if self.counter_initial <= self.counter_min {
            return Err(Error::InvalidConfig(format!(
                "counter_initial ({}) must be greater than counter_min ({})",
                self.counter_initial, self.counter_min
            )));
        }
        if self.counter_initial > self.counter_max {
            return Err(Error::InvalidConfig(format!(
                "counter_initial ({}) must not exceed counter_max ({})",
                self.counter_initial, self.counter_max
            )));
        }
        if self.hit_step == 0 || self.miss_step == 0 {
            return Err(Error::InvalidConfig(
                "hit_step and miss_step must be non-zero".to_string(),
            ));
        }
        // A saturated site must still reach min within initial - min misses
        let misses_from_max = (self.counter_max - self.counter_min).div_ceil(self.miss_step);
        if misses_from_max > self.counter_initial - self.counter_min {
            return Err(Error::InvalidConfig(format!(
                "miss_step ({}) too small: a counter at {} needs {} misses to reach {}, more than initial - min ({})",
                self.miss_step,
                self.counter_max,
                misses_from_max,
                self.counter_min,
                self.counter_initial - self.counter_min
            )));
        }
        if self.max_frame_depth == 0 {
            return Err(Error::InvalidConfig(
                "max_frame_depth must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse and validate a JSON configuration; missing fields take defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: AdaptiveConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Serialize as pretty JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Saturating counter policy derived from this configuration
    pub fn counter_policy(&self) -> CounterPolicy {
        CounterPolicy {
            min: self.counter_min,
            initial: self.counter_initial,
            max: self.counter_max,
            hit_step: self.hit_step,
            miss_step: self.miss_step,
        }
    }
}

/// Saturating counter arithmetic for specialized sites
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterPolicy {
    pub min: u8,
    pub initial: u8,
    pub max: u8,
    pub hit_step: u8,
    pub miss_step: u8,
}

impl CounterPolicy {
    /// Counter after a guard hit
    #[inline]
    pub fn hit(&self, counter: u8) -> u8 {
        counter.saturating_add(self.hit_step).clamp(self.min, self.max)
    }

    /// Counter after a guard miss, and whether the site must deoptimize
    #[inline]
    pub fn miss(&self, counter: u8) -> (u8, bool) {
        let next = counter.saturating_sub(self.miss_step).clamp(self.min, self.max);
        (next, next == self.min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_is_valid() {
        AdaptiveConfig::default().validate().unwrap();
        AdaptiveConfig::tracing().validate().unwrap();
    }

    #[test]
    fn test_rejects_single_sample_threshold() {
        let config = AdaptiveConfig::default().with_specialize_threshold(1);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_initial_at_min() {
        let config = AdaptiveConfig::default().with_counter(3, 3, 8);
        assert!(config.validate().is_err());
        let config = AdaptiveConfig::default().with_counter(0, 9, 8);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_steps() {
        assert!(AdaptiveConfig::default().with_steps(0, 1).validate().is_err());
        assert!(AdaptiveConfig::default().with_steps(1, 0).validate().is_err());
    }

    #[test]
    fn test_rejects_slow_deoptimization() {
        // From 8 down to 0 in steps of 1 takes 8 misses, initial - min is 4
        let config = AdaptiveConfig::default().with_counter(0, 4, 8).with_steps(1, 1);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
        let config = AdaptiveConfig::default().with_counter(1, 3, 6).with_steps(1, 1);
        assert!(config.validate().is_err());

        AdaptiveConfig::default().with_counter(0, 4, 8).with_steps(1, 2).validate().unwrap();
        AdaptiveConfig::default().with_counter(0, 4, 4).with_steps(1, 1).validate().unwrap();
        AdaptiveConfig::default().with_counter(10, 50, 250).with_steps(3, 7).validate().unwrap();
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let config =
            AdaptiveConfig::from_json_str(r#"{ "specialize_threshold": 3, "mode": "tracing" }"#)
                .unwrap();
        assert_eq!(config.specialize_threshold, 3);
        assert_eq!(config.mode, ExecMode::Tracing);
        assert_eq!(config.counter_max, AdaptiveConfig::default().counter_max);
    }

    #[test]
    fn test_invalid_json_config_is_rejected() {
        assert!(matches!(
            AdaptiveConfig::from_json_str(r#"{ "specialize_threshold": 0 }"#),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            AdaptiveConfig::from_json_str("{ not json"),
            Err(Error::ConfigParse { .. })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("adaptive.json");
        let config = AdaptiveConfig::default().with_counter(1, 5, 9);
        fs::write(&path, config.to_json()).unwrap();
        assert_eq!(AdaptiveConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_counter_policy_saturates() {
        let policy = AdaptiveConfig::default().with_counter(0, 4, 8).counter_policy();
        assert_eq!(policy.hit(8), 8);
        assert_eq!(policy.hit(4), 5);
        assert_eq!(policy.miss(4), (2, false));
        assert_eq!(policy.miss(2), (0, true));
        assert_eq!(policy.miss(1), (0, true));

        let policy = AdaptiveConfig::default().with_counter(3, 6, 250).with_steps(10, 10).counter_policy();
        assert_eq!(policy.hit(245), 250);
        assert_eq!(policy.miss(5), (3, true));
    }
}

//! JIT Configuration
//!
//! # Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `KEEL_JIT_CHECK_LOCKS` | Check for leftover locks in release builds too | false |
//! | `KEEL_JIT_TRACE_SPILLS` | Log every spill at debug level | false |

use keel_runtime::config::env_bool;

/// Register allocator configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegAllocConfig {
    /// Run [`assert_all_valid_registers_are_unlocked`] checks even without
    /// debug assertions.
    ///
    /// [`assert_all_valid_registers_are_unlocked`]: crate::regalloc::RegisterAllocator::assert_all_valid_registers_are_unlocked
    pub check_locks_between_ops: bool,

    /// Emit a debug log line for every spill.
    pub trace_spills: bool,
}

impl RegAllocConfig {
    /// Create a new builder.
    pub fn builder() -> RegAllocConfigBuilder {
        RegAllocConfigBuilder::default()
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(val) = env_bool("KEEL_JIT_CHECK_LOCKS") {
            config.check_locks_between_ops = val;
        }
        if let Some(val) = env_bool("KEEL_JIT_TRACE_SPILLS") {
            config.trace_spills = val;
        }
        config
    }
}

/// Builder for [`RegAllocConfig`].
#[derive(Debug, Clone, Default)]
pub struct RegAllocConfigBuilder {
    config: RegAllocConfig,
}

impl RegAllocConfigBuilder {
    /// Check lock balance between operations in all builds.
    pub fn check_locks_between_ops(mut self, enabled: bool) -> Self {
        self.config.check_locks_between_ops = enabled;
        self
    }

    /// Log every spill.
    pub fn trace_spills(mut self, enabled: bool) -> Self {
        self.config.trace_spills = enabled;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> RegAllocConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RegAllocConfig::default();
        assert!(!config.check_locks_between_ops);
        assert!(!config.trace_spills);
    }

    #[test]
    fn test_builder() {
        let config = RegAllocConfig::builder()
            .check_locks_between_ops(true)
            .trace_spills(true)
            .build();
        assert!(config.check_locks_between_ops);
        assert!(config.trace_spills);
    }

    #[test]
    fn test_from_env() {
        std::env::set_var("KEEL_JIT_TRACE_SPILLS", "true");
        let config = RegAllocConfig::from_env();
        assert!(config.trace_spills);
        std::env::remove_var("KEEL_JIT_TRACE_SPILLS");
    }
}

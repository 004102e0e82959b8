//! Runtime Configuration
//!
//! Configuration for the Keel runtime, set programmatically or loaded from
//! environment variables.
//!
//! # Environment Variables
//!
//! All environment variables use the `KEEL_` prefix:
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `KEEL_BLOCK_SIZE` | Block size and alignment in bytes | 16384 (16KB) |
//! | `KEEL_RESERVATION_SIZE` | Requested reservation in bytes | 1GB (64MB on 32-bit) |
//! | `KEEL_RESERVATION_RETRIES` | Halving retries when the reservation fails | 8 |
//! | `KEEL_COMMIT_POLICY` | `decommit` or `protect` | decommit |
//! | `KEEL_ALLOCATION_STRATEGY` | `reserved` or `system` | reserved (system off Unix) |
//! | `KEEL_LOG_LEVEL` | Log level (off/error/warn/info/debug/trace) | info |
//! | `KEEL_LOG_FORMAT` | Log format (plain/json) | plain |
//!
//! # Example
//!
//! ```rust,ignore
//! use keel_runtime::config::RuntimeConfig;
//!
//! let config = RuntimeConfig::from_env();
//!
//! let config = RuntimeConfig::builder()
//!     .block_size(32 * 1024)
//!     .reservation_size(256 * 1024 * 1024)
//!     .build()?;
//! ```

use std::env;

use thiserror::Error;

use crate::log::{LogFormat, LogLevel};
use crate::memory::{AllocationStrategy, CommitPolicy};

/// Smallest block size accepted; blocks must cover whole pages.
pub const MIN_BLOCK_SIZE: usize = 4096;

/// Default block size: one marked-block unit.
pub const DEFAULT_BLOCK_SIZE: usize = 16 * 1024;

/// Default requested reservation.
#[cfg(target_pointer_width = "64")]
pub const DEFAULT_RESERVATION_SIZE: usize = 1024 * 1024 * 1024;
/// Default requested reservation.
#[cfg(not(target_pointer_width = "64"))]
pub const DEFAULT_RESERVATION_SIZE: usize = 64 * 1024 * 1024;

/// Default number of halving retries.
pub const DEFAULT_RESERVATION_RETRIES: u32 = 8;

/// Block allocator configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryConfig {
    /// Size and alignment of every block.
    /// Default: 16KB.
    pub block_size: usize,

    /// Requested size of the address space reservation.
    /// Default: 1GB on 64-bit targets.
    pub reservation_size: usize,

    /// How many times the reservation size is halved before giving up.
    /// Default: 8.
    pub reservation_retries: u32,

    /// What happens to a block's pages when it is freed.
    /// Default: decommit.
    pub commit_policy: CommitPolicy,

    /// Where blocks come from.
    /// Default: the reservation on Unix, the system allocator elsewhere.
    pub strategy: AllocationStrategy,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            reservation_size: DEFAULT_RESERVATION_SIZE,
            reservation_retries: DEFAULT_RESERVATION_RETRIES,
            commit_policy: CommitPolicy::default(),
            strategy: AllocationStrategy::default(),
        }
    }
}

impl MemoryConfig {
    /// Check sizes and strategy against what the allocator supports.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.block_size.is_power_of_two() {
            return Err(ConfigError::InvalidValue {
                field: "memory.block_size",
                message: format!("{} is not a power of two", self.block_size),
            });
        }

        if self.block_size < MIN_BLOCK_SIZE {
            return Err(ConfigError::InvalidValue {
                field: "memory.block_size",
                message: format!("must be at least {} bytes", MIN_BLOCK_SIZE),
            });
        }

        if !self.reservation_size.is_power_of_two() {
            return Err(ConfigError::InvalidValue {
                field: "memory.reservation_size",
                message: format!("{} is not a power of two", self.reservation_size),
            });
        }

        // Bit 0 is never handed out, so a single-block reservation is legal
        // but yields no usable blocks.
        if self.reservation_size < self.block_size {
            return Err(ConfigError::InvalidValue {
                field: "memory.reservation_size",
                message: "must be at least one block".into(),
            });
        }

        if self.strategy == AllocationStrategy::Reserved
            && !AllocationStrategy::reserved_supported()
        {
            return Err(ConfigError::Unsupported {
                field: "memory.strategy",
                message: "address space reservation is not available on this platform".into(),
            });
        }

        Ok(())
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LogConfig {
    /// Minimum level written.
    /// Default: Info.
    pub level: LogLevel,

    /// Output format.
    /// Default: Plain.
    pub format: LogFormat,
}

/// Complete runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RuntimeConfig {
    /// Block allocator configuration.
    pub memory: MemoryConfig,

    /// Logging configuration.
    pub log: LogConfig,
}

impl RuntimeConfig {
    /// Create a new builder for RuntimeConfig.
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::new()
    }

    /// Load configuration from environment variables.
    ///
    /// Unset variables and values that fail to parse or fall outside their
    /// valid range keep the default.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(val) = env_usize("KEEL_BLOCK_SIZE") {
            if val >= MIN_BLOCK_SIZE && val.is_power_of_two() {
                config.memory.block_size = val;
            }
        }

        if let Some(val) = env_usize("KEEL_RESERVATION_SIZE") {
            if val >= config.memory.block_size && val.is_power_of_two() {
                config.memory.reservation_size = val;
            }
        }

        if let Some(val) = env_usize("KEEL_RESERVATION_RETRIES") {
            config.memory.reservation_retries = val.min(u32::MAX as usize) as u32;
        }

        if let Some(policy) = env_parse("KEEL_COMMIT_POLICY", CommitPolicy::parse) {
            config.memory.commit_policy = policy;
        }

        if let Some(strategy) = env_parse("KEEL_ALLOCATION_STRATEGY", AllocationStrategy::parse) {
            config.memory.strategy = strategy;
        }

        if let Some(level) = env_parse("KEEL_LOG_LEVEL", LogLevel::parse) {
            config.log.level = level;
        }

        if let Some(format) = env_parse("KEEL_LOG_FORMAT", LogFormat::parse) {
            config.log.format = format;
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.memory.validate()
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A field holds a value outside its valid range.
    #[error("invalid configuration for '{field}': {message}")]
    InvalidValue {
        /// Field name.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },
    /// A field selects something the platform cannot provide.
    #[error("unsupported configuration for '{field}': {message}")]
    Unsupported {
        /// Field name.
        field: &'static str,
        /// What is missing.
        message: String,
    },
}

/// Builder for RuntimeConfig.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfigBuilder {
    config: RuntimeConfig,
}

impl RuntimeConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the block size and alignment.
    pub fn block_size(mut self, size: usize) -> Self {
        self.config.memory.block_size = size;
        self
    }

    /// Set the requested reservation size.
    pub fn reservation_size(mut self, size: usize) -> Self {
        self.config.memory.reservation_size = size;
        self
    }

    /// Set the number of halving retries.
    pub fn reservation_retries(mut self, retries: u32) -> Self {
        self.config.memory.reservation_retries = retries;
        self
    }

    /// Set the commit policy.
    pub fn commit_policy(mut self, policy: CommitPolicy) -> Self {
        self.config.memory.commit_policy = policy;
        self
    }

    /// Set the allocation strategy.
    pub fn strategy(mut self, strategy: AllocationStrategy) -> Self {
        self.config.memory.strategy = strategy;
        self
    }

    /// Set the log level.
    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.config.log.level = level;
        self
    }

    /// Set the log format.
    pub fn log_format(mut self, format: LogFormat) -> Self {
        self.config.log.format = format;
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> Result<RuntimeConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }

    /// Build without validation.
    pub fn build_unchecked(self) -> RuntimeConfig {
        self.config
    }
}

/// Parse an environment variable as usize.
pub fn env_usize(name: &str) -> Option<usize> {
    env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

/// Parse an environment variable as bool.
pub fn env_bool(name: &str) -> Option<bool> {
    env_parse(name, |s| match s.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    })
}

/// Parse an environment variable with a custom parser.
pub fn env_parse<T>(name: &str, parse: impl FnOnce(&str) -> Option<T>) -> Option<T> {
    env::var(name).ok().and_then(|s| parse(&s))
}

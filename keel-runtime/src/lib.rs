//! # Keel Runtime Library
//!
//! Low-level runtime services for the Keel managed heap:
//!
//! - **Block Memory**: fixed-size, self-aligned blocks carved from one
//!   reserved address range
//! - **Configuration**: programmatic and `KEEL_*` environment configuration
//! - **Logging**: leveled, structured log output in plain or JSON form
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        KEEL RUNTIME                              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  ┌──────────────────────────────────────────────────┐           │
//! │  │                 BlockAllocator                   │           │
//! │  │  occupancy bitmap (bit 0 reserved) + commit/free │           │
//! │  └──────────────────────────────────────────────────┘           │
//! │              │                         │                        │
//! │  ┌──────────────────────┐  ┌──────────────────────┐             │
//! │  │     AddressSpace     │  │        VmOps         │             │
//! │  │ (address_space.rs)   │  │  (vm.rs: mmap etc.)  │             │
//! │  └──────────────────────┘  └──────────────────────┘             │
//! │                                                                  │
//! │  ┌──────────────┐  ┌──────────────┐                              │
//! │  │    Config    │  │     Log      │                              │
//! │  │ (config.rs)  │  │   (log.rs)   │                              │
//! │  └──────────────┘  └──────────────┘                              │
//! │                                                                  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod log;
pub mod memory;

use std::sync::OnceLock;

// Re-exports
pub use config::{ConfigError, LogConfig, MemoryConfig, RuntimeConfig, RuntimeConfigBuilder};
pub use log::{LogFormat, LogLevel};
pub use memory::{
    block_allocator, free_aligned_memory, initialize_address_space, try_allocate_aligned_memory,
    AddressSpace, AllocationStrategy, BlockAllocator, BlockId, BlockStats, CommitPolicy, VmError,
    VmOps,
};

/// Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

static RUNTIME_CONFIG: OnceLock<RuntimeConfig> = OnceLock::new();

/// Initialize the runtime: configure logging and reserve the block address
/// space.
///
/// # Panics
///
/// If the runtime was already initialized or the address space cannot be
/// reserved.
///
/// # Example
///
/// ```rust,ignore
/// use keel_runtime::{init, RuntimeConfig};
///
/// let config = RuntimeConfig::builder()
///     .reservation_size(256 * 1024 * 1024)
///     .build()?;
/// let blocks = init(config);
/// ```
pub fn init(config: RuntimeConfig) -> &'static BlockAllocator {
    log::init(&config.log);
    let allocator = initialize_address_space(&config.memory);
    log::info("runtime", format!("keel runtime {} initialized", VERSION));
    let _ = RUNTIME_CONFIG.set(config);
    allocator
}

/// Initialize from `KEEL_*` environment variables.
pub fn init_from_env() -> &'static BlockAllocator {
    init(RuntimeConfig::from_env())
}

/// The configuration passed to [`init`], if it has run.
pub fn runtime_config() -> Option<&'static RuntimeConfig> {
    RUNTIME_CONFIG.get()
}

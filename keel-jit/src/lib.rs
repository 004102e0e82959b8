//! # Keel JIT Support
//!
//! Pieces of the baseline JIT that are independent of instruction encoding:
//!
//! - **Registers**: the [`Register`] abstraction and bit-mask [`RegisterSet`]s
//! - **Register banks**: x86-64 and AArch64 GPR/FPR banks with the subsets
//!   the backend may allocate
//! - **Register Allocator / Spiller**: binds values to registers during
//!   single-pass code generation and spills the cheapest one under pressure
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          KEEL JIT                                │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │   code generator ──allocate/lock/flush──▶ RegisterAllocator      │
//! │         ▲                                  (regalloc.rs)         │
//! │         │                                        │               │
//! │         └────────── SpillSink::flush ◀───────────┘               │
//! │                                                                  │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐            │
//! │  │  Register    │  │    Banks     │  │   Config     │            │
//! │  │(register.rs) │  │  (arch/*)    │  │ (config.rs)  │            │
//! │  └──────────────┘  └──────────────┘  └──────────────┘            │
//! │                                                                  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod arch;
pub mod config;
pub mod error;
pub mod regalloc;
pub mod register;

// Re-exports
pub use config::{RegAllocConfig, RegAllocConfigBuilder};
pub use error::RegAllocError;
pub use regalloc::{RegAllocStats, RegisterAllocator, SpillHint, SpillSink, UnbindReason};
pub use register::{Register, RegisterSet};

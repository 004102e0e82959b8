//! Register allocator errors.

use thiserror::Error;

/// Recoverable register allocation failures.
///
/// [`RegisterAllocator::allocate`](crate::regalloc::RegisterAllocator::allocate)
/// turns these into panics; backends that can fall back to a stack temporary
/// use [`try_allocate`](crate::regalloc::RegisterAllocator::try_allocate).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegAllocError {
    /// No free register and every bound register is locked.
    #[error("No remaining allocatable registers")]
    AllRegistersLocked,

    /// The allocator was never initialized with a register set.
    #[error("register allocator has no valid registers")]
    NoValidRegisters,
}

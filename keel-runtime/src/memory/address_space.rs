//! The address space reservation blocks are carved from.

use std::fmt;
use std::ptr::NonNull;

use crate::log::{self, LogBuilder, LogLevel};

use super::vm::{VmError, VmOps};

/// A contiguous, block-aligned range of reserved virtual memory.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct AddressSpace {
    base: NonNull<u8>,
    size: usize,
}

// The range is only an address; access goes through the allocator lock.
unsafe impl Send for AddressSpace {}
unsafe impl Sync for AddressSpace {}

impl AddressSpace {
    /// Reserve `requested` bytes aligned to `block_size`, halving the request
    /// up to `retries` times when the OS refuses.
    ///
    /// The size never drops below one block. Returns the last error if every
    /// attempt fails.
    pub fn reserve<V: VmOps>(
        vm: &V,
        requested: usize,
        block_size: usize,
        retries: u32,
    ) -> Result<Self, VmError> {
        assert!(block_size.is_power_of_two(), "block size {} is not a power of two", block_size);
        assert!(requested >= block_size, "reservation smaller than one block");

        let mut size = requested;
        let mut attempt = 0;
        loop {
            match vm.reserve_aligned(size, block_size) {
                Ok(base) => {
                    let space = AddressSpace { base, size };
                    debug_assert!(space.is_aligned_to(block_size));
                    LogBuilder::new(LogLevel::Info)
                        .target("memory")
                        .message("address space reserved")
                        .field("base", format!("{:#x}", space.base_addr()))
                        .field("size", size)
                        .field("requested", requested)
                        .field("attempts", attempt + 1)
                        .emit();
                    return Ok(space);
                }
                Err(err) => {
                    let next = size / 2;
                    if attempt >= retries || next < block_size {
                        return Err(err);
                    }
                    if log::would_log(LogLevel::Warn) {
                        LogBuilder::new(LogLevel::Warn)
                            .target("memory")
                            .message("address space reservation failed, halving")
                            .field("size", size)
                            .field("error", err.to_string())
                            .emit();
                    }
                    size = next;
                    attempt += 1;
                }
            }
        }
    }

    /// Build from an existing range.
    ///
    /// # Safety
    ///
    /// `base..base + size` must be a reservation that outlives the value.
    pub unsafe fn from_raw(base: NonNull<u8>, size: usize) -> Self {
        AddressSpace { base, size }
    }

    /// First byte of the range.
    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    /// First byte of the range as an integer.
    pub fn base_addr(&self) -> usize {
        self.base.as_ptr() as usize
    }

    /// Usable size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// One past the last byte.
    pub fn end_addr(&self) -> usize {
        self.base_addr() + self.size
    }

    /// Whether `address` falls inside the range.
    pub fn contains(&self, address: usize) -> bool {
        address >= self.base_addr() && address < self.end_addr()
    }

    /// `base & !(alignment - 1) == base`.
    pub fn is_aligned_to(&self, alignment: usize) -> bool {
        let base = self.base_addr();
        base & !(alignment - 1) == base
    }
}

impl fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressSpace")
            .field("base", &format_args!("{:#x}", self.base_addr()))
            .field("size", &self.size)
            .finish()
    }
}

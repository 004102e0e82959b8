//! # Block Memory
//!
//! Fixed-size, alignment-guaranteed blocks for the collector's block-based
//! heap.
//!
//! ## Design
//!
//! - One large virtual range is reserved up front ([`AddressSpace`]), sized as
//!   the largest power of two the OS grants, halving on refusal.
//! - Every block has the same size and alignment; a block's address is
//!   `base + index * block_size`, so masking any interior pointer with the
//!   block mask yields its block.
//! - An occupancy bitmap tracks which slots are in use. Bit 0 is set at
//!   construction and never cleared: address zero doubles as the heap's
//!   "empty" identifier, so block index 0 is never handed out.
//! - Pages are committed on allocation and decommitted on free, outside the
//!   bitmap lock.
//!
//! On targets without a reservation primitive (or when configured so) the
//! allocator delegates to the system aligned allocator instead.
//!
//! Exhaustion is the only recoverable failure. Reservation failure at start
//! up and frees of foreign, misaligned or already free addresses are fatal.

pub mod address_space;
pub mod vm;

use std::alloc::{self, Layout};
use std::fmt;
use std::num::NonZeroUsize;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::OnceLock;

use fixedbitset::FixedBitSet;
use parking_lot::Mutex;

use crate::config::{MemoryConfig, RuntimeConfig};
use crate::log::{self, LogBuilder, LogLevel};

pub use address_space::AddressSpace;
pub use vm::{Access, CommitPolicy, PlatformVm, VmError, VmOps};

/// Where blocks come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationStrategy {
    /// Carve blocks out of one reserved range, tracked by a bitmap.
    Reserved,
    /// Delegate to the system aligned allocator.
    System,
}

impl AllocationStrategy {
    /// Whether [`AllocationStrategy::Reserved`] works on this target.
    pub const fn reserved_supported() -> bool {
        cfg!(unix)
    }

    /// Parse a strategy name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "reserved" | "reservation" => Some(AllocationStrategy::Reserved),
            "system" => Some(AllocationStrategy::System),
            _ => None,
        }
    }
}

impl Default for AllocationStrategy {
    fn default() -> Self {
        if Self::reserved_supported() {
            AllocationStrategy::Reserved
        } else {
            AllocationStrategy::System
        }
    }
}

/// Index of a block within the reservation.
///
/// Index 0 is permanently reserved, so `Option<BlockId>` is the same size as
/// `BlockId` and "no block" is represented by zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(NonZeroUsize);

impl BlockId {
    /// `None` for index 0.
    pub const fn new(index: usize) -> Option<Self> {
        match NonZeroUsize::new(index) {
            Some(n) => Some(BlockId(n)),
            None => None,
        }
    }

    /// Slot index in the occupancy bitmap.
    pub const fn index(self) -> usize {
        self.0.get()
    }
}

/// Allocation statistics.
#[derive(Debug, Default)]
pub struct BlockStats {
    /// Successful allocations.
    pub allocations: AtomicU64,
    /// Frees.
    pub frees: AtomicU64,
    /// Allocations that returned `None` because the space was exhausted.
    pub exhausted: AtomicU64,
    /// Allocations that returned `None` because commit failed.
    pub commit_failures: AtomicU64,
    /// Blocks currently handed out.
    pub live: AtomicUsize,
    /// High-water mark of `live`.
    pub peak_live: AtomicUsize,
}

impl BlockStats {
    fn record_allocation(&self) {
        self.allocations.fetch_add(1, Ordering::Relaxed);
        let live = self.live.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_live.fetch_max(live, Ordering::Relaxed);
    }

    fn record_free(&self) {
        self.frees.fetch_add(1, Ordering::Relaxed);
        self.live.fetch_sub(1, Ordering::Relaxed);
    }
}

enum Backend {
    Reserved {
        space: AddressSpace,
        /// One bit per block slot; sized from the requested reservation,
        /// which may be larger than what the OS granted.
        occupancy: Mutex<FixedBitSet>,
    },
    System,
}

/// Hands out blocks of exactly one size and alignment.
pub struct BlockAllocator<V: VmOps = PlatformVm> {
    block_size: usize,
    policy: CommitPolicy,
    backend: Backend,
    vm: V,
    stats: BlockStats,
}

impl BlockAllocator<PlatformVm> {
    /// Create an allocator backed by the platform's virtual memory.
    pub fn new(config: &MemoryConfig) -> Result<Self, VmError> {
        Self::with_vm(config, PlatformVm::new())
    }
}

impl<V: VmOps> BlockAllocator<V> {
    /// Create an allocator over a custom virtual memory implementation.
    ///
    /// With the reserved strategy this reserves the address space right
    /// away; the only error is a reservation that failed at every size.
    pub fn with_vm(config: &MemoryConfig, vm: V) -> Result<Self, VmError> {
        let block_size = config.block_size;
        assert!(
            block_size.is_power_of_two(),
            "block size {} is not a power of two",
            block_size
        );

        let backend = match config.strategy {
            AllocationStrategy::Reserved => {
                let space = AddressSpace::reserve(
                    &vm,
                    config.reservation_size,
                    block_size,
                    config.reservation_retries,
                )?;
                assert!(
                    space.is_aligned_to(block_size),
                    "reservation base {:#x} is not block aligned",
                    space.base_addr()
                );

                let slots = config.reservation_size / block_size;
                let mut occupancy = FixedBitSet::with_capacity(slots);
                occupancy.insert(0);

                Backend::Reserved {
                    space,
                    occupancy: Mutex::new(occupancy),
                }
            }
            AllocationStrategy::System => Backend::System,
        };

        Ok(Self {
            block_size,
            policy: config.commit_policy,
            backend,
            vm,
            stats: BlockStats::default(),
        })
    }

    /// Size and alignment of every block.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Mask that maps an interior pointer to its block start.
    pub fn block_mask(&self) -> usize {
        !(self.block_size - 1)
    }

    /// Commit policy in effect.
    pub fn commit_policy(&self) -> CommitPolicy {
        self.policy
    }

    /// Strategy in effect.
    pub fn strategy(&self) -> AllocationStrategy {
        match self.backend {
            Backend::Reserved { .. } => AllocationStrategy::Reserved,
            Backend::System => AllocationStrategy::System,
        }
    }

    /// The reservation, when using the reserved strategy.
    pub fn address_space(&self) -> Option<AddressSpace> {
        match &self.backend {
            Backend::Reserved { space, .. } => Some(*space),
            Backend::System => None,
        }
    }

    /// Number of blocks that can be outstanding at once, excluding the
    /// permanently reserved slot 0. `None` for the system strategy.
    pub fn capacity(&self) -> Option<usize> {
        self.address_space()
            .map(|space| (space.size() / self.block_size).saturating_sub(1))
    }

    /// Blocks currently handed out.
    pub fn live_blocks(&self) -> usize {
        self.stats.live.load(Ordering::Relaxed)
    }

    /// Allocation statistics.
    pub fn stats(&self) -> &BlockStats {
        &self.stats
    }

    /// Whether `address` lies inside the reservation.
    pub fn contains(&self, address: usize) -> bool {
        self.address_space().is_some_and(|space| space.contains(address))
    }

    /// The block containing `address`, for any interior pointer into the
    /// reservation. `None` outside the reservation and for slot 0.
    pub fn block_id_of(&self, address: usize) -> Option<BlockId> {
        let space = self.address_space()?;
        if !space.contains(address) {
            return None;
        }
        BlockId::new((address - space.base_addr()) / self.block_size)
    }

    /// Start address of a block.
    pub fn block_address(&self, id: BlockId) -> Option<NonNull<u8>> {
        let space = self.address_space()?;
        let offset = id.index().checked_mul(self.block_size)?;
        if offset >= space.size() {
            return None;
        }
        NonNull::new((space.base_addr() + offset) as *mut u8)
    }

    /// Allocate one block.
    ///
    /// `alignment` and `size` must both equal the block size; this allocator
    /// serves nothing else. Returns `None` when the address space is
    /// exhausted. The returned memory is readable and writable.
    pub fn try_allocate_aligned_memory(
        &self,
        alignment: usize,
        size: usize,
    ) -> Option<NonNull<u8>> {
        debug_assert_eq!(alignment, self.block_size, "unsupported block alignment");
        debug_assert_eq!(size, self.block_size, "unsupported block size");

        match &self.backend {
            Backend::Reserved { space, occupancy } => self.allocate_reserved(space, occupancy),
            Backend::System => self.allocate_system(),
        }
    }

    /// Allocate one block of the configured size.
    pub fn try_allocate_block(&self) -> Option<NonNull<u8>> {
        self.try_allocate_aligned_memory(self.block_size, self.block_size)
    }

    fn allocate_reserved(
        &self,
        space: &AddressSpace,
        occupancy: &Mutex<FixedBitSet>,
    ) -> Option<NonNull<u8>> {
        let index = {
            let mut bits = occupancy.lock();
            let index = bits.zeroes().next().unwrap_or(bits.len());
            if index * self.block_size >= space.size() {
                drop(bits);
                self.stats.exhausted.fetch_add(1, Ordering::Relaxed);
                if log::would_log(LogLevel::Debug) {
                    LogBuilder::new(LogLevel::Debug)
                        .target("memory")
                        .message("block address space exhausted")
                        .field("live", self.live_blocks())
                        .emit();
                }
                return None;
            }
            bits.insert(index);
            index
        };

        let address = space.base_addr() + index * self.block_size;
        // `address` is inside a non-null reservation and above its base.
        let block = NonNull::new(address as *mut u8)?;

        let committed = unsafe {
            match self.policy {
                CommitPolicy::Decommit => self.vm.commit(block, self.block_size),
                CommitPolicy::Protect => self.vm.protect(block, self.block_size, Access::ReadWrite),
            }
        };

        if let Err(err) = committed {
            occupancy.lock().set(index, false);
            self.stats.commit_failures.fetch_add(1, Ordering::Relaxed);
            LogBuilder::new(LogLevel::Warn)
                .target("memory")
                .message("block commit failed")
                .field("index", index)
                .field("error", err.to_string())
                .emit();
            return None;
        }

        self.stats.record_allocation();
        if log::would_log(LogLevel::Trace) {
            LogBuilder::new(LogLevel::Trace)
                .target("memory")
                .message("block allocated")
                .field("index", index)
                .field("address", format!("{:#x}", address))
                .emit();
        }

        Some(block)
    }

    fn allocate_system(&self) -> Option<NonNull<u8>> {
        let layout = Layout::from_size_align(self.block_size, self.block_size).ok()?;
        let block = NonNull::new(unsafe { alloc::alloc_zeroed(layout) });
        match block {
            Some(_) => self.stats.record_allocation(),
            None => {
                self.stats.exhausted.fetch_add(1, Ordering::Relaxed);
            }
        }
        block
    }

    /// Return a block.
    ///
    /// # Safety
    ///
    /// `address` must have been returned by this allocator and must not be
    /// used afterwards.
    ///
    /// # Panics
    ///
    /// If `address` lies outside the reservation, is not block aligned, is
    /// block 0, or is not currently allocated. Any of these means the heap is
    /// corrupt.
    pub unsafe fn free_aligned_memory(&self, address: NonNull<u8>) {
        let addr = address.as_ptr() as usize;

        match &self.backend {
            Backend::Reserved { space, occupancy } => {
                assert!(
                    space.contains(addr) && addr & (self.block_size - 1) == 0,
                    "freeing {:#x}, which is not a block of {:?}",
                    addr,
                    space
                );
                let index = (addr - space.base_addr()) / self.block_size;
                assert_ne!(index, 0, "block 0 is never allocated");

                let released = match self.policy {
                    CommitPolicy::Decommit => self.vm.decommit(address, self.block_size),
                    CommitPolicy::Protect => {
                        self.vm.protect(address, self.block_size, Access::None)
                    }
                };
                if let Err(err) = released {
                    log::error("memory", format!("releasing block {:#x} failed: {}", addr, err));
                    panic!("failed to release block {:#x}: {}", addr, err);
                }

                {
                    let mut bits = occupancy.lock();
                    assert!(bits.contains(index), "double free of block {:#x}", addr);
                    bits.set(index, false);
                }

                if log::would_log(LogLevel::Trace) {
                    LogBuilder::new(LogLevel::Trace)
                        .target("memory")
                        .message("block freed")
                        .field("index", index)
                        .emit();
                }
            }
            Backend::System => {
                assert_eq!(addr & (self.block_size - 1), 0, "freeing misaligned block {:#x}", addr);
                let layout = Layout::from_size_align_unchecked(self.block_size, self.block_size);
                alloc::dealloc(address.as_ptr(), layout);
            }
        }

        self.stats.record_free();
    }
}

impl<V: VmOps> Drop for BlockAllocator<V> {
    fn drop(&mut self) {
        if let Backend::Reserved { space, .. } = &self.backend {
            if let Err(err) = unsafe { self.vm.release(space.base(), space.size()) } {
                log::warn("memory", format!("releasing address space failed: {}", err));
            }
        }
    }
}

impl<V: VmOps> fmt::Debug for BlockAllocator<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockAllocator")
            .field("block_size", &self.block_size)
            .field("policy", &self.policy)
            .field("strategy", &self.strategy())
            .field("address_space", &self.address_space())
            .field("live", &self.live_blocks())
            .finish()
    }
}

// ============================================================================
// Process-wide allocator
// ============================================================================

/// Process-wide block allocator.
static BLOCK_ALLOCATOR: OnceLock<BlockAllocator> = OnceLock::new();

fn build_or_abort(config: &MemoryConfig) -> BlockAllocator {
    if let Err(err) = config.validate() {
        log::error("memory", format!("invalid memory configuration: {}", err));
        panic!("invalid memory configuration: {}", err);
    }
    match BlockAllocator::new(config) {
        Ok(allocator) => allocator,
        Err(err) => {
            log::error("memory", format!("could not reserve the block address space: {}", err));
            panic!("could not reserve the block address space: {}", err);
        }
    }
}

/// Reserve the process-wide address space.
///
/// Must be called at most once, before any allocation through the free
/// functions of this module.
///
/// # Panics
///
/// If the address space was already initialized, if `config` fails
/// validation, or if no reservation size down to one block could be obtained.
pub fn initialize_address_space(config: &MemoryConfig) -> &'static BlockAllocator {
    let mut created = false;
    let allocator = BLOCK_ALLOCATOR.get_or_init(|| {
        created = true;
        build_or_abort(config)
    });
    assert!(created, "block address space initialized twice");
    allocator
}

/// The process-wide allocator, reserving it from the environment
/// configuration on first use.
pub fn block_allocator() -> &'static BlockAllocator {
    BLOCK_ALLOCATOR.get_or_init(|| build_or_abort(&RuntimeConfig::from_env().memory))
}

/// Whether the process-wide allocator exists yet.
pub fn is_initialized() -> bool {
    BLOCK_ALLOCATOR.get().is_some()
}

/// Allocate a block from the process-wide allocator.
pub fn try_allocate_aligned_memory(alignment: usize, size: usize) -> Option<NonNull<u8>> {
    block_allocator().try_allocate_aligned_memory(alignment, size)
}

/// Return a block to the process-wide allocator.
///
/// # Safety
///
/// See [`BlockAllocator::free_aligned_memory`].
pub unsafe fn free_aligned_memory(address: NonNull<u8>) {
    block_allocator().free_aligned_memory(address)
}

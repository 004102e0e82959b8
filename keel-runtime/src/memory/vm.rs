//! Virtual memory primitives.
//!
//! The block allocator talks to the OS through [`VmOps`] so that the
//! reservation scheme can be exercised against a recording double in tests
//! and replaced on targets without `mmap`.

use std::fmt;
use std::io;
use std::ptr::NonNull;

use thiserror::Error;

/// Page access rights for [`VmOps::protect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// No access; touching the range faults.
    None,
    /// Read only.
    Read,
    /// Read and write.
    ReadWrite,
}

/// What the allocator does with a block's pages on free (and how it makes
/// them accessible again on allocation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommitPolicy {
    /// Commit on allocation, hand the pages back to the OS on free.
    #[default]
    Decommit,
    /// Only flip protection. Freed pages stay resident with their contents,
    /// so a use-after-free faults and the stale data can still be inspected.
    Protect,
}

impl CommitPolicy {
    /// Parse a policy name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "decommit" => Some(CommitPolicy::Decommit),
            "protect" => Some(CommitPolicy::Protect),
            _ => None,
        }
    }

    /// Policy name.
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitPolicy::Decommit => "decommit",
            CommitPolicy::Protect => "protect",
        }
    }
}

impl fmt::Display for CommitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a virtual memory operation.
#[derive(Debug, Error)]
pub enum VmError {
    /// The OS refused the reservation.
    #[error("failed to reserve {size} bytes aligned to {alignment}: {source}")]
    Reserve {
        /// Requested size.
        size: usize,
        /// Requested alignment.
        alignment: usize,
        /// OS error.
        #[source]
        source: io::Error,
    },
    /// The OS refused to back a range with memory.
    #[error("failed to commit {size} bytes at {address:#x}: {source}")]
    Commit {
        /// Start of the range.
        address: usize,
        /// Length of the range.
        size: usize,
        /// OS error.
        #[source]
        source: io::Error,
    },
    /// Returning a range to the OS failed.
    #[error("failed to decommit {size} bytes at {address:#x}: {source}")]
    Decommit {
        /// Start of the range.
        address: usize,
        /// Length of the range.
        size: usize,
        /// OS error.
        #[source]
        source: io::Error,
    },
    /// Changing protection failed.
    #[error("failed to protect {size} bytes at {address:#x} as {access:?}: {source}")]
    Protect {
        /// Start of the range.
        address: usize,
        /// Length of the range.
        size: usize,
        /// Requested access.
        access: Access,
        /// OS error.
        #[source]
        source: io::Error,
    },
    /// Unmapping failed.
    #[error("failed to release {size} bytes at {address:#x}: {source}")]
    Release {
        /// Start of the range.
        address: usize,
        /// Length of the range.
        size: usize,
        /// OS error.
        #[source]
        source: io::Error,
    },
    /// The alignment is not a power of two or the size is zero.
    #[error("invalid reservation request: size {size}, alignment {alignment}")]
    InvalidRequest {
        /// Requested size.
        size: usize,
        /// Requested alignment.
        alignment: usize,
    },
    /// No reservation primitive on this platform.
    #[error("virtual memory reservation is not supported on this platform")]
    Unsupported,
}

/// OS virtual memory interface used by the block allocator.
///
/// Implementations must be usable from any thread; the allocator calls
/// `commit`/`decommit` without holding its own lock.
pub trait VmOps: Send + Sync {
    /// Reserve `size` bytes of inaccessible, uncommitted address space whose
    /// start is a multiple of `alignment`.
    fn reserve_aligned(&self, size: usize, alignment: usize) -> Result<NonNull<u8>, VmError>;

    /// Make a range readable and writable.
    ///
    /// # Safety
    ///
    /// The range must lie inside a reservation obtained from this object.
    unsafe fn commit(&self, address: NonNull<u8>, size: usize) -> Result<(), VmError>;

    /// Revoke access to a range and let the OS reclaim its physical pages.
    ///
    /// # Safety
    ///
    /// The range must lie inside a reservation obtained from this object and
    /// nothing may reference its contents afterwards.
    unsafe fn decommit(&self, address: NonNull<u8>, size: usize) -> Result<(), VmError>;

    /// Change the access rights of a range without touching its contents.
    ///
    /// # Safety
    ///
    /// The range must lie inside a reservation obtained from this object.
    unsafe fn protect(
        &self,
        address: NonNull<u8>,
        size: usize,
        access: Access,
    ) -> Result<(), VmError>;

    /// Give a whole reservation back to the OS.
    ///
    /// # Safety
    ///
    /// `address`/`size` must describe a reservation returned by
    /// [`VmOps::reserve_aligned`] that is no longer in use.
    unsafe fn release(&self, address: NonNull<u8>, size: usize) -> Result<(), VmError>;
}

#[cfg(unix)]
pub use self::unix::PlatformVm;

#[cfg(not(unix))]
pub use self::unsupported::PlatformVm;

#[cfg(unix)]
mod unix {
    use std::ffi::c_void;
    use std::num::NonZeroUsize;
    use std::ptr::NonNull;

    use nix::sys::mman::{self, MapFlags, MmapAdvise, ProtFlags};

    use super::{Access, VmError, VmOps};

    /// `mmap`-backed virtual memory.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct PlatformVm;

    impl PlatformVm {
        /// Create the platform implementation.
        pub const fn new() -> Self {
            PlatformVm
        }
    }

    fn reserve_flags() -> MapFlags {
        #[cfg(any(target_os = "linux", target_os = "android"))]
        {
            MapFlags::MAP_PRIVATE | MapFlags::MAP_NORESERVE
        }
        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        {
            MapFlags::MAP_PRIVATE
        }
    }

    fn prot_flags(access: Access) -> ProtFlags {
        match access {
            Access::None => ProtFlags::PROT_NONE,
            Access::Read => ProtFlags::PROT_READ,
            Access::ReadWrite => ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
        }
    }

    fn as_void(address: NonNull<u8>) -> NonNull<c_void> {
        address.cast()
    }

    impl VmOps for PlatformVm {
        fn reserve_aligned(&self, size: usize, alignment: usize) -> Result<NonNull<u8>, VmError> {
            if size == 0 || !alignment.is_power_of_two() {
                return Err(VmError::InvalidRequest { size, alignment });
            }

            // Over-reserve by one alignment unit and trim both ends.
            let padded = size
                .checked_add(alignment)
                .and_then(NonZeroUsize::new)
                .ok_or(VmError::InvalidRequest { size, alignment })?;

            let raw = unsafe {
                mman::mmap_anonymous(None, padded, ProtFlags::PROT_NONE, reserve_flags())
            }
            .map_err(|errno| VmError::Reserve {
                size,
                alignment,
                source: errno.into(),
            })?;

            let start = raw.as_ptr() as usize;
            let aligned = (start + alignment - 1) & !(alignment - 1);
            let head = aligned - start;
            let tail = padded.get() - head - size;

            unsafe {
                if head > 0 {
                    let _ = mman::munmap(raw, head);
                }
                if tail > 0 {
                    if let Some(tail_start) = NonNull::new((aligned + size) as *mut c_void) {
                        let _ = mman::munmap(tail_start, tail);
                    }
                }
            }

            NonNull::new(aligned as *mut u8).ok_or(VmError::InvalidRequest { size, alignment })
        }

        unsafe fn commit(&self, address: NonNull<u8>, size: usize) -> Result<(), VmError> {
            mman::mprotect(as_void(address), size, prot_flags(Access::ReadWrite)).map_err(|errno| {
                VmError::Commit {
                    address: address.as_ptr() as usize,
                    size,
                    source: errno.into(),
                }
            })
        }

        unsafe fn decommit(&self, address: NonNull<u8>, size: usize) -> Result<(), VmError> {
            let fail = |errno: nix::errno::Errno| VmError::Decommit {
                address: address.as_ptr() as usize,
                size,
                source: errno.into(),
            };
            mman::madvise(as_void(address), size, MmapAdvise::MADV_DONTNEED).map_err(fail)?;
            mman::mprotect(as_void(address), size, ProtFlags::PROT_NONE).map_err(fail)
        }

        unsafe fn protect(
            &self,
            address: NonNull<u8>,
            size: usize,
            access: Access,
        ) -> Result<(), VmError> {
            mman::mprotect(as_void(address), size, prot_flags(access)).map_err(|errno| {
                VmError::Protect {
                    address: address.as_ptr() as usize,
                    size,
                    access,
                    source: errno.into(),
                }
            })
        }

        unsafe fn release(&self, address: NonNull<u8>, size: usize) -> Result<(), VmError> {
            mman::munmap(as_void(address), size).map_err(|errno| VmError::Release {
                address: address.as_ptr() as usize,
                size,
                source: errno.into(),
            })
        }
    }
}

#[cfg(not(unix))]
mod unsupported {
    use std::ptr::NonNull;

    use super::{Access, VmError, VmOps};

    /// Placeholder for targets without a reservation primitive; every
    /// operation fails with [`VmError::Unsupported`].
    #[derive(Debug, Clone, Copy, Default)]
    pub struct PlatformVm;

    impl PlatformVm {
        /// Create the platform implementation.
        pub const fn new() -> Self {
            PlatformVm
        }
    }

    impl VmOps for PlatformVm {
        fn reserve_aligned(&self, _size: usize, _alignment: usize) -> Result<NonNull<u8>, VmError> {
            Err(VmError::Unsupported)
        }

        unsafe fn commit(&self, _address: NonNull<u8>, _size: usize) -> Result<(), VmError> {
            Err(VmError::Unsupported)
        }

        unsafe fn decommit(&self, _address: NonNull<u8>, _size: usize) -> Result<(), VmError> {
            Err(VmError::Unsupported)
        }

        unsafe fn protect(
            &self,
            _address: NonNull<u8>,
            _size: usize,
            _access: Access,
        ) -> Result<(), VmError> {
            Err(VmError::Unsupported)
        }

        unsafe fn release(&self, _address: NonNull<u8>, _size: usize) -> Result<(), VmError> {
            Err(VmError::Unsupported)
        }
    }
}

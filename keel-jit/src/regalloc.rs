//! # Register Allocator / Spiller
//!
//! Online register allocation for single-pass code generation.
//!
//! The allocator tracks one register bank for the duration of one function's
//! code generation. Values are bound to registers as operands are emitted;
//! when the bank is full, the unlocked register with the lowest spill hint is
//! flushed through the backend's [`SpillSink`] and reused.
//!
//! ## Register states
//!
//! ```text
//!            bind / allocate                 lock
//!   ┌──────┐ ──────────────▶ ┌───────┐ ─────────────▶ ┌────────┐
//!   │ Free │                 │ Bound │                │ Locked │
//!   └──────┘ ◀────────────── └───────┘ ◀───────────── └────────┘
//!        unbind / flush / evict / clobber    unlock
//! ```
//!
//! A register is either free or holds exactly one binding. Locked registers
//! are never evicted or unbound, and every lock must be released before the
//! next operation starts, which drivers check with
//! [`RegisterAllocator::assert_all_valid_registers_are_unlocked`].
//!
//! ## Eviction
//!
//! Valid registers are scanned in index order and the first unlocked one with
//! the strictly smallest hint wins, so ties go to the lowest index. If every
//! register is locked the code generator has more simultaneously live values
//! than the bank holds, which is a compiler bug: [`RegisterAllocator::allocate`]
//! panics with "No remaining allocatable registers".
//!
//! ## Example
//!
//! ```rust,ignore
//! use keel_jit::arch::x86_64::{allocatable_gprs, Gpr};
//! use keel_jit::regalloc::RegisterAllocator;
//!
//! let mut regs = RegisterAllocator::<Gpr, ValueId>::with_registers(allocatable_gprs());
//! let mut spill = |reg: Gpr, value: ValueId| masm.store(reg, frame_slot(value));
//!
//! let dst = regs.allocate(value, Some(use_distance), None, &mut spill);
//! regs.lock(dst);
//! // emit the instruction
//! regs.unlock(dst);
//! regs.assert_all_valid_registers_are_unlocked();
//! ```

use std::fmt;

use keel_runtime::log::{self, LogBuilder, LogLevel};

use crate::config::RegAllocConfig;
use crate::error::RegAllocError;
use crate::register::{Register, RegisterSet};

/// Eviction priority of a bound register. Lower is evicted first.
pub type SpillHint = u32;

/// Receives values that leave their register.
///
/// Called on every flush, eviction and clobber, before the register is reused.
/// The implementation emits the store that writes the value back to its home
/// location.
pub trait SpillSink<R, B> {
    /// Spill `binding`, which lived in `reg`.
    fn flush(&mut self, reg: R, binding: B);
}

impl<R, B, F> SpillSink<R, B> for F
where
    F: FnMut(R, B),
{
    fn flush(&mut self, reg: R, binding: B) {
        self(reg, binding)
    }
}

/// Why a register lost its binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnbindReason {
    /// The code generator released the value.
    Explicit,
    /// Flushed by [`RegisterAllocator::flush_if`] or
    /// [`RegisterAllocator::flush_all_registers`].
    Flushed,
    /// Spilled to make room for a new value.
    Evicted,
    /// An instruction is about to overwrite the register.
    Clobbered,
}

impl UnbindReason {
    /// Lowercase name used in log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            UnbindReason::Explicit => "explicit",
            UnbindReason::Flushed => "flushed",
            UnbindReason::Evicted => "evicted",
            UnbindReason::Clobbered => "clobbered",
        }
    }
}

impl fmt::Display for UnbindReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Allocation statistics for one code generation session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegAllocStats {
    /// Registers handed out by `allocate`.
    pub allocations: u64,
    /// Allocations that got the requested register.
    pub hint_hits: u64,
    /// Registers spilled to make room.
    pub evictions: u64,
    /// Registers spilled by `flush_if`.
    pub flushes: u64,
    /// Registers spilled by `clobber`.
    pub clobbers: u64,
}

/// Register allocator over bank `R` with binding descriptors `B`.
///
/// `B` is opaque: the allocator stores it, hands it back on unbind, and passes
/// it to the spill sink. It never looks inside.
pub struct RegisterAllocator<R: Register, B> {
    valid: RegisterSet<R>,
    free: RegisterSet<R>,
    bindings: Vec<Option<B>>,
    spill_hints: Vec<SpillHint>,
    lock_counts: Vec<u32>,
    config: RegAllocConfig,
    stats: RegAllocStats,
}

impl<R: Register, B> RegisterAllocator<R, B> {
    /// Create an allocator with no valid registers. Call
    /// [`initialize`](Self::initialize) before use.
    pub fn new(config: RegAllocConfig) -> Self {
        let mut bindings = Vec::with_capacity(R::COUNT);
        bindings.resize_with(R::COUNT, || None);
        Self {
            valid: RegisterSet::empty(),
            free: RegisterSet::empty(),
            bindings,
            spill_hints: vec![0; R::COUNT],
            lock_counts: vec![0; R::COUNT],
            config,
            stats: RegAllocStats::default(),
        }
    }

    /// Create and initialize an allocator with the default configuration.
    pub fn with_registers(registers: RegisterSet<R>) -> Self {
        let mut allocator = Self::new(RegAllocConfig::default());
        allocator.initialize(registers);
        allocator
    }

    /// Make `registers` the valid and free set, with every spill hint at 0.
    ///
    /// # Panics
    ///
    /// If the allocator already has valid registers.
    pub fn initialize(&mut self, registers: RegisterSet<R>) {
        assert!(
            self.valid.is_empty(),
            "register allocator initialized twice (valid: {:?})",
            self.valid
        );
        self.valid = registers;
        self.free = registers;
        for reg in registers {
            self.spill_hints[reg.index()] = 0;
        }

        if log::would_log(LogLevel::Trace) {
            LogBuilder::new(LogLevel::Trace)
                .target("regalloc")
                .message("register bank initialized")
                .field("registers", format!("{:?}", registers))
                .emit();
        }
    }

    /// Configuration in effect.
    pub fn config(&self) -> &RegAllocConfig {
        &self.config
    }

    /// Statistics so far.
    pub fn stats(&self) -> &RegAllocStats {
        &self.stats
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Whether `reg` belongs to the allocated bank.
    pub fn is_valid(&self, reg: R) -> bool {
        self.valid.contains(reg)
    }

    /// Whether `reg` is valid and holds no value.
    pub fn is_free(&self, reg: R) -> bool {
        self.free.contains(reg)
    }

    /// Whether `reg` holds a value.
    pub fn is_bound(&self, reg: R) -> bool {
        self.bindings[reg.index()].is_some()
    }

    /// Value currently held by `reg`.
    pub fn binding(&self, reg: R) -> Option<&B> {
        self.bindings[reg.index()].as_ref()
    }

    /// Current spill hint of `reg`.
    pub fn spill_hint(&self, reg: R) -> SpillHint {
        self.spill_hints[reg.index()]
    }

    /// Number of outstanding locks on `reg`.
    pub fn lock_count(&self, reg: R) -> u32 {
        self.lock_counts[reg.index()]
    }

    /// Whether `reg` is pinned.
    pub fn is_locked(&self, reg: R) -> bool {
        self.lock_count(reg) > 0
    }

    /// The whole bank.
    pub fn valid_registers(&self) -> RegisterSet<R> {
        self.valid
    }

    /// Registers holding no value.
    pub fn free_registers(&self) -> RegisterSet<R> {
        self.free
    }

    /// Registers holding a value.
    pub fn bound_registers(&self) -> RegisterSet<R> {
        self.valid.difference(self.free)
    }

    // ------------------------------------------------------------------
    // Allocation
    // ------------------------------------------------------------------

    /// Find a register for `binding`, spilling if the bank is full.
    ///
    /// Prefers `hint_reg` when it is free, then the lowest free register, then
    /// evicts. Records `hint` as the new register's spill hint when given.
    ///
    /// # Panics
    ///
    /// With "No remaining allocatable registers" if the bank is full and every
    /// register is locked.
    pub fn allocate<S>(
        &mut self,
        binding: B,
        hint: Option<SpillHint>,
        hint_reg: Option<R>,
        sink: &mut S,
    ) -> R
    where
        S: SpillSink<R, B> + ?Sized,
    {
        match self.try_allocate(binding, hint, hint_reg, sink) {
            Ok(reg) => reg,
            Err(err) => {
                log::error("regalloc", err.to_string());
                panic!("{}", err);
            }
        }
    }

    /// Like [`allocate`](Self::allocate), but reports a fully locked bank as
    /// an error. `binding` is dropped in that case.
    pub fn try_allocate<S>(
        &mut self,
        binding: B,
        hint: Option<SpillHint>,
        hint_reg: Option<R>,
        sink: &mut S,
    ) -> Result<R, RegAllocError>
    where
        S: SpillSink<R, B> + ?Sized,
    {
        let reg = match hint_reg.filter(|&reg| self.free.contains(reg)) {
            Some(reg) => {
                self.stats.hint_hits += 1;
                reg
            }
            None => match self.free.first() {
                Some(reg) => reg,
                None => self.evict(sink)?,
            },
        };

        self.bind(reg, binding, hint);
        self.stats.allocations += 1;
        Ok(reg)
    }

    /// Pick the eviction victim: first unlocked register with the smallest
    /// hint.
    fn select_victim(&self) -> Option<R> {
        let mut victim: Option<(R, SpillHint)> = None;
        for reg in self.valid {
            if self.is_locked(reg) {
                continue;
            }
            let hint = self.spill_hints[reg.index()];
            match victim {
                Some((_, best)) if hint >= best => {}
                _ => victim = Some((reg, hint)),
            }
        }
        victim.map(|(reg, _)| reg)
    }

    fn evict<S>(&mut self, sink: &mut S) -> Result<R, RegAllocError>
    where
        S: SpillSink<R, B> + ?Sized,
    {
        if self.valid.is_empty() {
            return Err(RegAllocError::NoValidRegisters);
        }
        let victim = self.select_victim().ok_or(RegAllocError::AllRegistersLocked)?;

        if self.config.trace_spills {
            LogBuilder::new(LogLevel::Debug)
                .target("regalloc")
                .message("evicting register")
                .field("register", victim.name())
                .field("hint", self.spill_hints[victim.index()])
                .emit();
        }

        let binding = self.unbind(victim, UnbindReason::Evicted);
        sink.flush(victim, binding);
        self.stats.evictions += 1;
        Ok(victim)
    }

    /// Bind `binding` to `reg`, recording `hint` when given.
    ///
    /// # Panics
    ///
    /// If `reg` is not valid or is already bound.
    pub fn bind(&mut self, reg: R, binding: B, hint: Option<SpillHint>) {
        assert!(self.valid.contains(reg), "binding invalid register {}", reg.name());
        assert!(
            self.free.contains(reg) && self.bindings[reg.index()].is_none(),
            "binding register {} which is already bound",
            reg.name()
        );

        self.free.remove(reg);
        self.bindings[reg.index()] = Some(binding);
        if let Some(hint) = hint {
            self.spill_hints[reg.index()] = hint;
        }
    }

    /// Release `reg` and return the value it held.
    ///
    /// # Panics
    ///
    /// If `reg` is locked or holds no value.
    pub fn unbind(&mut self, reg: R, reason: UnbindReason) -> B {
        assert!(
            !self.is_locked(reg),
            "unbinding locked register {} ({})",
            reg.name(),
            reason
        );
        let binding = match self.bindings[reg.index()].take() {
            Some(binding) => binding,
            None => panic!("unbinding register {} which holds no value", reg.name()),
        };
        self.free.insert(reg);

        if log::would_log(LogLevel::Trace) {
            LogBuilder::new(LogLevel::Trace)
                .target("regalloc")
                .message("register unbound")
                .field("register", reg.name())
                .field("reason", reason.as_str())
                .emit();
        }

        binding
    }

    // ------------------------------------------------------------------
    // Flushing
    // ------------------------------------------------------------------

    /// Spill and release every bound register whose value satisfies
    /// `predicate`, in index order.
    pub fn flush_if<P, S>(&mut self, mut predicate: P, sink: &mut S)
    where
        P: FnMut(&B) -> bool,
        S: SpillSink<R, B> + ?Sized,
    {
        for reg in self.bound_registers() {
            let matches = match &self.bindings[reg.index()] {
                Some(binding) => predicate(binding),
                None => false,
            };
            if !matches {
                continue;
            }

            if self.config.trace_spills {
                LogBuilder::new(LogLevel::Debug)
                    .target("regalloc")
                    .message("flushing register")
                    .field("register", reg.name())
                    .emit();
            }

            let binding = self.unbind(reg, UnbindReason::Flushed);
            sink.flush(reg, binding);
            self.stats.flushes += 1;
        }
    }

    /// Spill and release every bound register.
    pub fn flush_all_registers<S>(&mut self, sink: &mut S)
    where
        S: SpillSink<R, B> + ?Sized,
    {
        self.flush_if(|_| true, sink);
    }

    /// Spill and release `reg` if it holds a value, because an instruction is
    /// about to overwrite it.
    pub fn clobber<S>(&mut self, reg: R, sink: &mut S)
    where
        S: SpillSink<R, B> + ?Sized,
    {
        if !self.is_valid(reg) || !self.is_bound(reg) {
            return;
        }

        if self.config.trace_spills {
            LogBuilder::new(LogLevel::Debug)
                .target("regalloc")
                .message("clobbering register")
                .field("register", reg.name())
                .emit();
        }

        let binding = self.unbind(reg, UnbindReason::Clobbered);
        sink.flush(reg, binding);
        self.stats.clobbers += 1;
    }

    // ------------------------------------------------------------------
    // Pinning
    // ------------------------------------------------------------------

    /// Pin `reg` so it cannot be evicted. Locks nest.
    pub fn lock(&mut self, reg: R) {
        assert!(self.is_valid(reg), "locking invalid register {}", reg.name());
        assert!(self.is_bound(reg), "locking free register {}", reg.name());
        self.lock_counts[reg.index()] += 1;
    }

    /// Release one lock on `reg`.
    ///
    /// # Panics
    ///
    /// If `reg` is not locked.
    pub fn unlock(&mut self, reg: R) {
        let count = &mut self.lock_counts[reg.index()];
        assert!(*count > 0, "unlocking register {} which is not locked", reg.name());
        *count -= 1;
    }

    /// Lock every register in `regs`, run `f`, then unlock them.
    pub fn with_locked<T>(&mut self, regs: &[R], f: impl FnOnce(&mut Self) -> T) -> T {
        for &reg in regs {
            self.lock(reg);
        }
        let result = f(self);
        for &reg in regs {
            self.unlock(reg);
        }
        result
    }

    /// Change the eviction priority of a bound register.
    ///
    /// # Panics
    ///
    /// If `reg` holds no value.
    pub fn set_spill_hint(&mut self, reg: R, hint: SpillHint) {
        assert!(
            self.is_bound(reg),
            "setting spill hint on free register {}",
            reg.name()
        );
        self.spill_hints[reg.index()] = hint;
    }

    /// Check that no valid register is still locked.
    ///
    /// Code generation drivers call this between operations. It only runs
    /// with debug assertions or when
    /// [`RegAllocConfig::check_locks_between_ops`] is set.
    pub fn assert_all_valid_registers_are_unlocked(&self) {
        if !cfg!(debug_assertions) && !self.config.check_locks_between_ops {
            return;
        }
        for reg in self.valid {
            let count = self.lock_counts[reg.index()];
            assert!(
                count == 0,
                "register {} still locked ({} outstanding) at end of operation",
                reg.name(),
                count
            );
        }
    }
}

impl<R: Register, B: fmt::Debug> fmt::Debug for RegisterAllocator<R, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bound: Vec<_> = self
            .bound_registers()
            .iter()
            .map(|reg| (reg.name(), self.binding(reg), self.spill_hint(reg), self.lock_count(reg)))
            .collect();
        f.debug_struct("RegisterAllocator")
            .field("valid", &self.valid)
            .field("free", &self.free)
            .field("bound", &bound)
            .finish()
    }
}

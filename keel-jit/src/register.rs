//! Physical registers and register sets.

use std::fmt;
use std::hash::Hash;
use std::iter::FusedIterator;
use std::marker::PhantomData;

/// A physical register of one bank.
///
/// Registers of a bank are numbered densely from 0 to `COUNT - 1`. The
/// allocator keeps per-register state in tables indexed by that number, and
/// ties between equally cheap registers go to the lowest index.
pub trait Register: Copy + Eq + Hash + fmt::Debug + 'static {
    /// Number of registers in the bank. At most 64.
    const COUNT: usize;

    /// Dense index of this register.
    fn index(self) -> usize;

    /// Register with the given index, if the bank has one.
    fn from_index(index: usize) -> Option<Self>;

    /// Assembly name.
    fn name(self) -> &'static str;
}

/// A set of registers from one bank, stored as a bit mask.
///
/// Iteration is in ascending index order.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisterSet<R> {
    bits: u64,
    _bank: PhantomData<R>,
}

impl<R: Register> RegisterSet<R> {
    /// The empty set.
    pub const fn empty() -> Self {
        RegisterSet {
            bits: 0,
            _bank: PhantomData,
        }
    }

    /// Every register of the bank.
    pub fn all() -> Self {
        debug_assert!(R::COUNT <= 64, "register bank too large for a set");
        let bits = if R::COUNT == 64 {
            u64::MAX
        } else {
            (1u64 << R::COUNT) - 1
        };
        Self::from_bits(bits)
    }

    const fn from_bits(bits: u64) -> Self {
        RegisterSet {
            bits,
            _bank: PhantomData,
        }
    }

    /// Raw mask; bit `i` stands for the register with index `i`.
    pub const fn bits(&self) -> u64 {
        self.bits
    }

    /// Add a register. Returns whether it was newly added.
    pub fn insert(&mut self, reg: R) -> bool {
        let bit = Self::bit(reg);
        let added = self.bits & bit == 0;
        self.bits |= bit;
        added
    }

    /// Remove a register. Returns whether it was present.
    pub fn remove(&mut self, reg: R) -> bool {
        let bit = Self::bit(reg);
        let present = self.bits & bit != 0;
        self.bits &= !bit;
        present
    }

    /// Whether `reg` is in the set.
    pub fn contains(&self, reg: R) -> bool {
        self.bits & Self::bit(reg) != 0
    }

    /// Whether the set is empty.
    pub const fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// Number of registers in the set.
    pub const fn len(&self) -> usize {
        self.bits.count_ones() as usize
    }

    /// Lowest-index register in the set.
    pub fn first(&self) -> Option<R> {
        if self.bits == 0 {
            return None;
        }
        R::from_index(self.bits.trailing_zeros() as usize)
    }

    /// Registers in either set.
    pub fn union(self, other: Self) -> Self {
        Self::from_bits(self.bits | other.bits)
    }

    /// Registers in both sets.
    pub fn intersection(self, other: Self) -> Self {
        Self::from_bits(self.bits & other.bits)
    }

    /// Registers in `self` but not in `other`.
    pub fn difference(self, other: Self) -> Self {
        Self::from_bits(self.bits & !other.bits)
    }

    /// Iterate in ascending index order.
    pub fn iter(&self) -> Iter<R> {
        Iter {
            bits: self.bits,
            _bank: PhantomData,
        }
    }

    fn bit(reg: R) -> u64 {
        let index = reg.index();
        debug_assert!(index < R::COUNT && index < 64);
        1u64 << index
    }
}

impl<R: Register> Default for RegisterSet<R> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<R: Register> FromIterator<R> for RegisterSet<R> {
    fn from_iter<I: IntoIterator<Item = R>>(iter: I) -> Self {
        let mut set = Self::empty();
        set.extend(iter);
        set
    }
}

impl<R: Register> Extend<R> for RegisterSet<R> {
    fn extend<I: IntoIterator<Item = R>>(&mut self, iter: I) {
        for reg in iter {
            self.insert(reg);
        }
    }
}

impl<R: Register> IntoIterator for RegisterSet<R> {
    type Item = R;
    type IntoIter = Iter<R>;

    fn into_iter(self) -> Iter<R> {
        self.iter()
    }
}

impl<R: Register> IntoIterator for &RegisterSet<R> {
    type Item = R;
    type IntoIter = Iter<R>;

    fn into_iter(self) -> Iter<R> {
        self.iter()
    }
}

impl<R: Register> fmt::Debug for RegisterSet<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter().map(|r| r.name())).finish()
    }
}

/// Ascending iterator over a [`RegisterSet`].
#[derive(Clone)]
pub struct Iter<R> {
    bits: u64,
    _bank: PhantomData<R>,
}

impl<R: Register> Iterator for Iter<R> {
    type Item = R;

    fn next(&mut self) -> Option<R> {
        while self.bits != 0 {
            let index = self.bits.trailing_zeros() as usize;
            self.bits &= self.bits - 1;
            if let Some(reg) = R::from_index(index) {
                return Some(reg);
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.bits.count_ones() as usize))
    }
}

impl<R: Register> FusedIterator for Iter<R> {}

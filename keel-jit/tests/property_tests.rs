//! Property-based tests for the register allocator.
//!
//! Uses proptest to generate random allocation sequences and verify the
//! allocator's invariants hold.

use keel_jit::arch::x86_64::{allocatable_gprs, Gpr};
use keel_jit::{RegisterAllocator, RegisterSet, SpillHint, UnbindReason};
use proptest::prelude::*;

/// Strategy for a non-empty bank drawn from the allocatable GPRs.
fn bank() -> impl Strategy<Value = RegisterSet<Gpr>> {
    let all: Vec<Gpr> = allocatable_gprs().iter().collect();
    prop::sample::subsequence(all.clone(), 1..=all.len())
        .prop_map(|regs| regs.into_iter().collect())
}

fn check_invariants(regs: &RegisterAllocator<Gpr, usize>) -> Result<(), TestCaseError> {
    for reg in regs.valid_registers() {
        prop_assert_ne!(regs.is_free(reg), regs.is_bound(reg));
    }
    prop_assert_eq!(
        regs.free_registers().len() + regs.bound_registers().len(),
        regs.valid_registers().len()
    );
    Ok(())
}

proptest! {
    /// N values fit in N registers without spilling.
    #[test]
    fn capacity_without_spills(bank in bank()) {
        let mut regs = RegisterAllocator::<Gpr, usize>::with_registers(bank);
        let mut spills = 0;
        for v in 0..bank.len() {
            regs.allocate(v, None, None, &mut |_: Gpr, _: usize| spills += 1);
        }
        prop_assert_eq!(spills, 0);
        prop_assert!(regs.free_registers().is_empty());
        check_invariants(&regs)?;
    }

    /// The (N+1)th value evicts the register with the smallest hint, lowest
    /// index on ties.
    #[test]
    fn eviction_selects_minimum_hint(
        (bank, hints) in bank().prop_flat_map(|bank| {
            (Just(bank), prop::collection::vec(0u32..8, bank.len()))
        })
    ) {
        let mut regs = RegisterAllocator::<Gpr, usize>::with_registers(bank);
        let mut noop = |_: Gpr, _: usize| {};
        let order: Vec<Gpr> = bank.iter().collect();
        for (v, &hint) in hints.iter().enumerate() {
            regs.allocate(v, Some(hint), None, &mut noop);
        }

        let min = *hints.iter().min().unwrap();
        let expected = order[hints.iter().position(|&h| h == min).unwrap()];

        let mut victim = None;
        let mut record = |reg: Gpr, _: usize| victim = Some(reg);
        let got = regs.allocate(usize::MAX, None, None, &mut record);
        prop_assert_eq!(got, expected);
        prop_assert_eq!(victim, Some(expected));
        check_invariants(&regs)?;
    }

    /// Locked registers are never chosen as victims.
    #[test]
    fn locked_registers_survive_pressure(
        (bank, locked) in bank().prop_flat_map(|bank| {
            let n = bank.len();
            (Just(bank), prop::collection::vec(any::<bool>(), n))
        }),
        extra in 1usize..20,
    ) {
        prop_assume!(locked.iter().any(|l| !l));
        let mut regs = RegisterAllocator::<Gpr, usize>::with_registers(bank);
        let order: Vec<Gpr> = bank.iter().collect();
        for v in 0..order.len() {
            regs.allocate(v, Some(0), None, &mut |_: Gpr, _: usize| {});
        }
        for (reg, &lock) in order.iter().zip(&locked) {
            if lock {
                regs.lock(*reg);
            }
        }

        for v in 0..extra {
            let mut evicted = None;
            regs.allocate(1000 + v, Some(0), None, &mut |reg: Gpr, _: usize| evicted = Some(reg));
            let evicted = evicted.unwrap();
            prop_assert!(!regs.is_locked(evicted));
        }
        for (v, (reg, &lock)) in order.iter().zip(&locked).enumerate() {
            if lock {
                prop_assert_eq!(regs.binding(*reg), Some(&v));
                regs.unlock(*reg);
            }
        }
        regs.assert_all_valid_registers_are_unlocked();
    }

    /// A free hinted register is always honoured.
    #[test]
    fn free_hint_register_is_returned(bank in bank(), pick in any::<prop::sample::Index>()) {
        let order: Vec<Gpr> = bank.iter().collect();
        let hinted = order[pick.index(order.len())];
        let mut regs = RegisterAllocator::<Gpr, usize>::with_registers(bank);
        let got = regs.allocate(0, None, Some(hinted), &mut |_: Gpr, _: usize| {});
        prop_assert_eq!(got, hinted);
    }

    /// Random mixes of allocate, unbind, hint changes and flushes keep the
    /// free/bound partition intact.
    #[test]
    fn random_operations_keep_partition(
        ops in prop::collection::vec((0u8..4, any::<u16>(), 0 as SpillHint..100), 1..200)
    ) {
        let bank = allocatable_gprs();
        let mut regs = RegisterAllocator::<Gpr, usize>::with_registers(bank);
        let mut next = 0usize;
        for (op, pick, hint) in ops {
            let bound: Vec<Gpr> = regs.bound_registers().iter().collect();
            match op {
                0 => {
                    regs.allocate(next, Some(hint), None, &mut |_: Gpr, _: usize| {});
                    next += 1;
                }
                1 if !bound.is_empty() => {
                    let reg = bound[pick as usize % bound.len()];
                    regs.unbind(reg, UnbindReason::Explicit);
                }
                2 if !bound.is_empty() => {
                    let reg = bound[pick as usize % bound.len()];
                    regs.set_spill_hint(reg, hint);
                    prop_assert_eq!(regs.spill_hint(reg), hint);
                }
                3 => {
                    let parity = pick as usize % 2;
                    let mut check = |_: Gpr, v: usize| assert_eq!(v % 2, parity);
                    regs.flush_if(|v| v % 2 == parity, &mut check);
                }
                _ => {}
            }
            check_invariants(&regs)?;
        }
    }
}

//! Property-based tests for the block allocator.
//!
//! Uses proptest to drive random allocate/free sequences and verify the
//! allocator's invariants hold after every step.

#![cfg(unix)]

use std::collections::BTreeSet;
use std::ptr::NonNull;

use keel_runtime::config::MemoryConfig;
use keel_runtime::memory::{AllocationStrategy, BlockAllocator, CommitPolicy};
use proptest::prelude::*;

const BLOCK: usize = 16 * 1024;

#[derive(Debug, Clone)]
enum Op {
    Allocate,
    /// Free the n-th live block (modulo the live count).
    Free(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Allocate),
        2 => any::<usize>().prop_map(Op::Free),
    ]
}

fn policy() -> impl Strategy<Value = CommitPolicy> {
    prop_oneof![Just(CommitPolicy::Decommit), Just(CommitPolicy::Protect)]
}

fn allocator(blocks: usize, commit_policy: CommitPolicy) -> BlockAllocator {
    let config = MemoryConfig {
        block_size: BLOCK,
        reservation_size: blocks * BLOCK,
        reservation_retries: 0,
        commit_policy,
        strategy: AllocationStrategy::Reserved,
    };
    BlockAllocator::new(&config).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Live blocks are distinct, aligned, inside the reservation and never
    /// the base address.
    #[test]
    fn live_blocks_are_disjoint_and_aligned(
        slots in prop::sample::select(vec![4usize, 8, 16, 32]),
        commit_policy in policy(),
        ops in prop::collection::vec(op(), 1..200),
    ) {
        let allocator = allocator(slots, commit_policy);
        let space = allocator.address_space().unwrap();
        let mut live: BTreeSet<usize> = BTreeSet::new();

        for op in ops {
            match op {
                Op::Allocate => match allocator.try_allocate_block() {
                    Some(block) => {
                        let addr = block.as_ptr() as usize;
                        prop_assert_eq!(addr % BLOCK, 0);
                        prop_assert!(space.contains(addr));
                        prop_assert_ne!(addr, space.base_addr());
                        prop_assert!(live.insert(addr), "block handed out twice");
                    }
                    None => prop_assert_eq!(live.len(), slots - 1),
                },
                Op::Free(n) => {
                    if live.is_empty() {
                        continue;
                    }
                    let addr = *live.iter().nth(n % live.len()).unwrap();
                    live.remove(&addr);
                    let block = NonNull::new(addr as *mut u8).unwrap();
                    unsafe { allocator.free_aligned_memory(block) };
                }
            }
            prop_assert_eq!(allocator.live_blocks(), live.len());
        }

        for addr in live {
            unsafe { allocator.free_aligned_memory(NonNull::new(addr as *mut u8).unwrap()) };
        }
        prop_assert_eq!(allocator.live_blocks(), 0);
    }

    /// A fresh allocator hands out exactly `slots - 1` blocks, lowest index
    /// first.
    #[test]
    fn exhaustion_after_all_slots_but_zero(slots in 2usize..64) {
        let slots = slots.next_power_of_two();
        let allocator = allocator(slots, CommitPolicy::Decommit);
        let base = allocator.address_space().unwrap().base_addr();

        for i in 1..slots {
            let block = allocator.try_allocate_block().unwrap();
            prop_assert_eq!(block.as_ptr() as usize, base + i * BLOCK);
        }
        prop_assert!(allocator.try_allocate_block().is_none());
    }

    /// Interior pointers map back to their block.
    #[test]
    fn interior_pointer_maps_to_block(offset in 0usize..BLOCK) {
        let allocator = allocator(4, CommitPolicy::Decommit);
        let block = allocator.try_allocate_block().unwrap();
        let id = allocator.block_id_of(block.as_ptr() as usize + offset).unwrap();
        prop_assert_eq!(allocator.block_address(id), Some(block));
        unsafe { allocator.free_aligned_memory(block) };
    }
}

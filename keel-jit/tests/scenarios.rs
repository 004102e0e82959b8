//! End-to-end register allocation scenarios, driven the way a baseline code
//! generator drives the allocator.

use keel_jit::arch::aarch64::{self, XReg};
use keel_jit::arch::x86_64::Gpr;
use keel_jit::{RegisterAllocator, RegisterSet, UnbindReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Value {
    Local(u32),
    Temp(u32),
}

#[test]
fn test_two_register_bank_evicts_lowest_hint() {
    let bank: RegisterSet<Gpr> = [Gpr::Rax, Gpr::Rcx].into_iter().collect();
    let mut regs = RegisterAllocator::with_registers(bank);
    let mut spilled = Vec::new();
    let mut sink = |reg: Gpr, v: &'static str| spilled.push((reg, v));

    assert_eq!(regs.allocate("A", Some(5), None, &mut sink), Gpr::Rax);
    assert_eq!(regs.allocate("B", Some(3), None, &mut sink), Gpr::Rcx);
    assert_eq!(regs.allocate("C", Some(9), None, &mut sink), Gpr::Rcx);
    assert_eq!(regs.binding(Gpr::Rcx), Some(&"C"));
    assert_eq!(regs.binding(Gpr::Rax), Some(&"A"));
    drop(sink);

    assert_eq!(spilled, vec![(Gpr::Rcx, "B")]);
}

#[test]
fn test_operation_sequence_on_aarch64() {
    let mut regs = RegisterAllocator::<XReg, Value>::with_registers(aarch64::allocatable_gprs());
    let mut stores = Vec::new();

    // add t0, l0, l1
    {
        let mut sink = |reg: XReg, v: Value| stores.push((reg, v));
        let lhs = regs.allocate(Value::Local(0), Some(10), None, &mut sink);
        let rhs = regs.allocate(Value::Local(1), Some(10), None, &mut sink);
        regs.lock(lhs);
        regs.lock(rhs);
        let dst = regs.allocate(Value::Temp(0), Some(1), Some(XReg::X0), &mut sink);
        assert_eq!(dst, XReg::X2);
        regs.unlock(lhs);
        regs.unlock(rhs);
        regs.assert_all_valid_registers_are_unlocked();
    }

    // call: argument registers are clobbered and locals go home.
    {
        let mut sink = |reg: XReg, v: Value| stores.push((reg, v));
        for reg in [XReg::X0, XReg::X1, XReg::X2] {
            regs.clobber(reg, &mut sink);
        }
        regs.flush_if(|v| matches!(v, Value::Local(_)), &mut sink);
    }

    assert_eq!(
        stores,
        vec![
            (XReg::X0, Value::Local(0)),
            (XReg::X1, Value::Local(1)),
            (XReg::X2, Value::Temp(0)),
        ]
    );
    assert!(regs.bound_registers().is_empty());
    assert_eq!(regs.stats().clobbers, 3);
    assert_eq!(regs.stats().flushes, 0);
}

#[test]
fn test_pressure_spills_in_hint_order() {
    let bank = aarch64::allocatable_gprs();
    let mut regs = RegisterAllocator::<XReg, u32>::with_registers(bank);
    let mut spilled = Vec::new();
    let mut sink = |_: XReg, v: u32| spilled.push(v);

    // Fill the bank with hints counting down so later values are cheaper.
    let n = bank.len() as u32;
    for v in 0..n {
        regs.allocate(v, Some(n - v), None, &mut sink);
    }
    for v in n..n + 3 {
        regs.allocate(v, Some(u32::MAX), None, &mut sink);
    }
    drop(sink);

    assert_eq!(spilled, vec![n - 1, n - 2, n - 3]);
}

#[test]
fn test_explicit_unbind_returns_binding() {
    let mut regs = RegisterAllocator::<Gpr, Value>::with_registers(
        keel_jit::arch::x86_64::allocatable_gprs(),
    );
    let reg = regs.allocate(Value::Temp(7), None, None, &mut |_: Gpr, _: Value| {});
    assert_eq!(regs.unbind(reg, UnbindReason::Explicit), Value::Temp(7));
    assert!(regs.is_free(reg));
}

//! x86-64 register banks.
//!
//! `rsp` and `rbp` hold the frame, and the backend keeps `r11` and `xmm15`
//! as scratch for spill and shuffle code, so none of them is allocatable.

use crate::register::RegisterSet;

use super::register_bank;

register_bank! {
    /// General purpose registers.
    pub enum Gpr {
        Rax => "rax",
        Rcx => "rcx",
        Rdx => "rdx",
        Rbx => "rbx",
        Rsp => "rsp",
        Rbp => "rbp",
        Rsi => "rsi",
        Rdi => "rdi",
        R8 => "r8",
        R9 => "r9",
        R10 => "r10",
        R11 => "r11",
        R12 => "r12",
        R13 => "r13",
        R14 => "r14",
        R15 => "r15",
    }
}

register_bank! {
    /// SSE registers.
    pub enum Xmm {
        Xmm0 => "xmm0",
        Xmm1 => "xmm1",
        Xmm2 => "xmm2",
        Xmm3 => "xmm3",
        Xmm4 => "xmm4",
        Xmm5 => "xmm5",
        Xmm6 => "xmm6",
        Xmm7 => "xmm7",
        Xmm8 => "xmm8",
        Xmm9 => "xmm9",
        Xmm10 => "xmm10",
        Xmm11 => "xmm11",
        Xmm12 => "xmm12",
        Xmm13 => "xmm13",
        Xmm14 => "xmm14",
        Xmm15 => "xmm15",
    }
}

/// Scratch GPR reserved for spill code.
pub const SCRATCH_GPR: Gpr = Gpr::R11;

/// Scratch FPR reserved for spill code.
pub const SCRATCH_FPR: Xmm = Xmm::Xmm15;

/// GPRs the baseline JIT may hand to the allocator.
pub fn allocatable_gprs() -> RegisterSet<Gpr> {
    let mut set = RegisterSet::all();
    set.remove(Gpr::Rsp);
    set.remove(Gpr::Rbp);
    set.remove(SCRATCH_GPR);
    set
}

/// FPRs the baseline JIT may hand to the allocator.
pub fn allocatable_fprs() -> RegisterSet<Xmm> {
    let mut set = RegisterSet::all();
    set.remove(SCRATCH_FPR);
    set
}

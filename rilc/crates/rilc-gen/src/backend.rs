//! The architecture backend interface.
//!
//! The code generator speaks one abstract instruction vocabulary; each ISA
//! implements it by writing exact encoding bytes into the text buffer.
//! Registers are abstract indices mapped to a fixed physical assignment
//! per calling convention (System V AMD64, AAPCS64, RISC-V LP64D); the
//! core never names a physical register.
//!
//! Contracts every backend honors:
//!
//! - Branch and call displacements to labels go through the patch list;
//!   `apply_patch` validates range at resolution time and rejects
//!   overflow.
//! - Data-address materialization (`lea_section`) and external-symbol
//!   calls (`call_sym`) record relocations for the container writer.
//! - When the ISA offers a shorter equivalent encoding (imm8 vs imm32,
//!   `XOR r,r` for zero), the backend picks the shorter one.
//! - `sdiv`/`srem`/`shl`/`shr` may clobber `scratch(4)` and `scratch(5)`
//!   in addition to their destination (x86 has fixed-register division
//!   and shifts; the other backends keep the same contract so the core
//!   stays portable).

use crate::emit::{Emitter, Patch, Section};
use crate::error::Result;
use crate::target::Arch;

/// Abstract general-purpose register.
///
/// Index meaning is fixed by the backend's register map; the core only
/// uses the accessors on [`Isa`] (`ret`, `arg`, `scratch`, ...).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Reg(pub u8);

/// Abstract floating-point / vector register (maps to XMMn / Vn / FAn).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FReg(pub u8);

/// Branch condition, signed comparison semantics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cond {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Cond {
    /// The condition testing the swapped operand order.
    pub fn swapped(self) -> Cond {
        match self {
            Cond::Eq => Cond::Eq,
            Cond::Ne => Cond::Ne,
            Cond::Lt => Cond::Gt,
            Cond::Le => Cond::Ge,
            Cond::Gt => Cond::Lt,
            Cond::Ge => Cond::Le,
        }
    }

    /// The negated condition.
    pub fn negated(self) -> Cond {
        match self {
            Cond::Eq => Cond::Ne,
            Cond::Ne => Cond::Eq,
            Cond::Lt => Cond::Ge,
            Cond::Le => Cond::Gt,
            Cond::Gt => Cond::Le,
            Cond::Ge => Cond::Lt,
        }
    }
}

/// One instruction-set backend.
///
/// Every method appends encoded bytes to `e.text` (and records patches or
/// relocations where noted). All integer operations are 64-bit; all float
/// operations are double-precision.
pub trait Isa {
    fn arch(&self) -> Arch;

    // ---- register map -------------------------------------------------

    /// Return-value register.
    fn ret(&self) -> Reg;
    /// i-th integer argument register of the ABI.
    fn arg(&self, i: usize) -> Reg;
    /// Number of integer argument registers.
    fn n_arg_regs(&self) -> usize;
    /// i-th caller-saved scratch register (0..=5), disjoint from
    /// `ret`/`arg`.
    fn scratch(&self, i: usize) -> Reg;
    /// Stack pointer.
    fn sp(&self) -> Reg;
    /// Frame pointer.
    fn fp(&self) -> Reg;
    /// Register carrying the closure environment pointer at indirect
    /// calls (one of the scratch set, by convention `scratch(4)`... the
    /// backend picks a register the ABI leaves free across the call edge).
    fn closure_reg(&self) -> Reg;
    /// Frame-pointer-relative byte offset of local slot `i`.
    fn slot_off(&self, i: u32) -> i32;
    /// True when the backend emits real vector encodings; false makes the
    /// core take the scalar path.
    fn has_simd(&self) -> bool;

    // ---- moves --------------------------------------------------------

    fn mov_rr(&self, e: &mut Emitter, dst: Reg, src: Reg);
    /// Load a 64-bit immediate, using the shortest encoding that fits.
    fn mov_ri(&self, e: &mut Emitter, dst: Reg, imm: i64);
    /// Zero a register via the idiomatic zero encoding.
    fn zero(&self, e: &mut Emitter, dst: Reg);
    fn load(&self, e: &mut Emitter, dst: Reg, base: Reg, off: i32);
    fn store(&self, e: &mut Emitter, base: Reg, off: i32, src: Reg);
    /// Zero-extending byte load.
    fn load_byte(&self, e: &mut Emitter, dst: Reg, base: Reg, off: i32);
    /// Byte store (low 8 bits of src).
    fn store_byte(&self, e: &mut Emitter, base: Reg, off: i32, src: Reg);
    /// GPR <- FP register bit pattern.
    fn mov_rf(&self, e: &mut Emitter, dst: Reg, src: FReg);
    /// FP <- GPR bit pattern.
    fn mov_fr(&self, e: &mut Emitter, dst: FReg, src: Reg);
    fn load_f(&self, e: &mut Emitter, dst: FReg, base: Reg, off: i32);
    fn store_f(&self, e: &mut Emitter, base: Reg, off: i32, src: FReg);

    // ---- integer ALU --------------------------------------------------

    fn add(&self, e: &mut Emitter, dst: Reg, src: Reg);
    fn sub(&self, e: &mut Emitter, dst: Reg, src: Reg);
    fn mul(&self, e: &mut Emitter, dst: Reg, src: Reg);
    /// dst = lhs / rhs (signed).
    fn sdiv(&self, e: &mut Emitter, dst: Reg, lhs: Reg, rhs: Reg);
    /// dst = lhs % rhs (signed, truncated).
    fn srem(&self, e: &mut Emitter, dst: Reg, lhs: Reg, rhs: Reg);
    fn neg(&self, e: &mut Emitter, dst: Reg);
    fn not(&self, e: &mut Emitter, dst: Reg);
    fn and(&self, e: &mut Emitter, dst: Reg, src: Reg);
    fn or(&self, e: &mut Emitter, dst: Reg, src: Reg);
    fn xor(&self, e: &mut Emitter, dst: Reg, src: Reg);
    /// dst <<= amount (register).
    fn shl(&self, e: &mut Emitter, dst: Reg, amount: Reg);
    /// dst >>= amount (register, arithmetic).
    fn shr(&self, e: &mut Emitter, dst: Reg, amount: Reg);
    /// dst += imm (also the frame-adjust primitive).
    fn add_ri(&self, e: &mut Emitter, dst: Reg, imm: i32);

    // ---- compare and branch -------------------------------------------

    /// Fused compare-and-branch on integer registers; patches `label`.
    fn jcc(&self, e: &mut Emitter, cond: Cond, a: Reg, b: Reg, label: &str);
    /// Fused compare-and-branch on doubles; patches `label`. Unordered
    /// comparisons (NaN involved) never take Lt/Le/Gt/Ge branches.
    fn fjcc(&self, e: &mut Emitter, cond: Cond, a: FReg, b: FReg, label: &str);
    /// dst = (a cond b) as 0/1 for integers.
    fn cmp_set(&self, e: &mut Emitter, cond: Cond, dst: Reg, a: Reg, b: Reg);
    /// dst = (a cond b) as 0/1 for doubles.
    fn fcmp_set(&self, e: &mut Emitter, cond: Cond, dst: Reg, a: FReg, b: FReg);
    fn jmp(&self, e: &mut Emitter, label: &str);
    fn jmp_reg(&self, e: &mut Emitter, target: Reg);

    // ---- calls and stack ----------------------------------------------

    /// Direct call to an internal label (patched).
    fn call_label(&self, e: &mut Emitter, label: &str);
    /// Call an external symbol through the GOT/IAT (relocated).
    fn call_sym(&self, e: &mut Emitter, symbol: &str);
    fn call_reg(&self, e: &mut Emitter, target: Reg);
    fn ret_insn(&self, e: &mut Emitter);
    fn push(&self, e: &mut Emitter, src: Reg);
    fn pop(&self, e: &mut Emitter, dst: Reg);
    /// Issue system call `nr` with `nargs` arguments already staged in
    /// the ABI argument registers. The backend loads the number register
    /// (rax / x8 / x16 on Darwin / a7) and fixes per-ISA quirks (the
    /// fourth Linux x86-64 syscall argument travels in r10, not rcx).
    fn syscall(&self, e: &mut Emitter, nr: i64, nargs: usize, macos_abi: bool);
    /// The bare trap instruction (`syscall` / `svc` / `ecall`), for
    /// unsafe-block assembly where the user stages registers themselves.
    fn trap(&self, e: &mut Emitter, macos_abi: bool);

    // ---- floating point -----------------------------------------------

    fn fadd(&self, e: &mut Emitter, dst: FReg, src: FReg);
    fn fsub(&self, e: &mut Emitter, dst: FReg, src: FReg);
    fn fmul(&self, e: &mut Emitter, dst: FReg, src: FReg);
    fn fdiv(&self, e: &mut Emitter, dst: FReg, src: FReg);
    /// dst = (i64) src, truncating toward zero.
    fn cvt_fi(&self, e: &mut Emitter, dst: Reg, src: FReg);
    /// dst = (f64) src.
    fn cvt_if(&self, e: &mut Emitter, dst: FReg, src: Reg);

    // ---- address materialization --------------------------------------

    /// dst = address of `section` base + `off` (PC-relative; relocated).
    fn lea_section(&self, e: &mut Emitter, dst: Reg, section: Section, off: u64);

    // ---- SIMD (two f64 lanes) -----------------------------------------

    fn vload(&self, e: &mut Emitter, dst: FReg, base: Reg, off: i32);
    fn vstore(&self, e: &mut Emitter, base: Reg, off: i32, src: FReg);
    /// Broadcast lane 0 of src to both lanes of dst.
    fn vbroadcast(&self, e: &mut Emitter, dst: FReg, src: FReg);
    fn vadd(&self, e: &mut Emitter, dst: FReg, src: FReg);
    fn vmul(&self, e: &mut Emitter, dst: FReg, src: FReg);
    /// dst += a * b per lane (fused where the ISA provides it).
    fn vfma(&self, e: &mut Emitter, dst: FReg, a: FReg, b: FReg);

    // ---- frames and startup -------------------------------------------

    /// Function prologue reserving `n_slots` 8-byte locals.
    fn prologue(&self, e: &mut Emitter, n_slots: u32);
    /// Matching epilogue (restores sp/fp; `ret_insn` follows separately).
    fn epilogue(&self, e: &mut Emitter, n_slots: u32);
    /// CPU feature probe executed once at startup when SIMD/FMA paths are
    /// present (CPUID on x86-64; a no-op where features are architectural).
    fn cpu_probe(&self, e: &mut Emitter);

    // ---- patch resolution ---------------------------------------------

    /// Rewrite the displacement of `patch` to reach `target_off`,
    /// rejecting out-of-range displacements.
    fn apply_patch(&self, text: &mut [u8], patch: &Patch, target_off: usize) -> Result<()>;
}

/// Construct the backend for an architecture.
pub fn isa_for(arch: Arch) -> Box<dyn Isa> {
    match arch {
        Arch::X86_64 => Box::new(crate::x86_64::X86_64),
        Arch::Arm64 => Box::new(crate::arm64::Arm64),
        Arch::Riscv64 => Box::new(crate::riscv64::Riscv64),
    }
}

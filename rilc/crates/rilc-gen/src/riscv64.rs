//! RISC-V64 backend (LP64D ABI, RV64IMFD).
//!
//! Fixed-width 32-bit instruction words (no compressed forms; the
//! uncompressed encodings are valid on every RV64 implementation).
//! The abstract register index is the physical xN number: a0 return,
//! a0-a7 arguments, t0-t5 scratch, s1 closure environment, t6 (x31) is
//! the backend's own materializing temp, s0 frame pointer.
//!
//! RISC-V has no condition flags: conditional branches compare two
//! registers directly, which is exactly the shape of the fused
//! compare-and-branch interface. Float comparisons produce a 0/1 in an
//! integer register (FEQ/FLT/FLE) and branch on it; NaN operands make
//! every ordered test produce 0, which matches the unordered contract.

use crate::backend::{Cond, FReg, Isa, Reg};
use crate::emit::{Emitter, Patch, PatchKind, Reloc, Section};
use crate::error::{CodeGenError, Result};
use crate::target::Arch;

pub struct Riscv64;

const ZERO: u8 = 0;
const RA: u8 = 1;
const SP: u8 = 2;
const S0: u8 = 8;
const T6: u8 = 31;

#[inline]
fn r_type(op: u32, rd: u8, f3: u32, rs1: u8, rs2: u8, f7: u32) -> u32 {
    op | ((rd as u32) << 7)
        | (f3 << 12)
        | ((rs1 as u32) << 15)
        | ((rs2 as u32) << 20)
        | (f7 << 25)
}

#[inline]
fn i_type(op: u32, rd: u8, f3: u32, rs1: u8, imm: i32) -> u32 {
    op | ((rd as u32) << 7) | (f3 << 12) | ((rs1 as u32) << 15) | (((imm as u32) & 0xFFF) << 20)
}

#[inline]
fn s_type(op: u32, f3: u32, rs1: u8, rs2: u8, imm: i32) -> u32 {
    let imm = imm as u32;
    op | ((imm & 0x1F) << 7)
        | (f3 << 12)
        | ((rs1 as u32) << 15)
        | ((rs2 as u32) << 20)
        | (((imm >> 5) & 0x7F) << 25)
}

#[inline]
fn fits_i12(v: i64) -> bool {
    (-2048..=2047).contains(&v)
}

impl Riscv64 {
    fn ins(&self, e: &mut Emitter, word: u32) {
        e.text.push_u32(word);
    }

    /// addi rd, rs, imm
    fn addi(&self, e: &mut Emitter, rd: u8, rs: u8, imm: i32) {
        self.ins(e, i_type(0x13, rd, 0, rs, imm));
    }

    /// Standard `li` expansion: lui/addiw for 32-bit values, recursive
    /// shift-and-add for wider ones.
    fn li(&self, e: &mut Emitter, rd: u8, imm: i64) {
        if fits_i12(imm) {
            self.addi(e, rd, ZERO, imm as i32);
            return;
        }
        if i32::try_from(imm).is_ok() {
            let lo = ((imm << 52) >> 52) as i32; // sign-extended low 12
            let hi = (imm as i32).wrapping_sub(lo);
            // lui rd, hi20
            self.ins(e, 0x37 | ((rd as u32) << 7) | (hi as u32 & 0xFFFF_F000));
            if lo != 0 {
                // addiw rd, rd, lo
                self.ins(e, i_type(0x1B, rd, 0, rd, lo));
            }
            return;
        }
        let lo12 = (imm << 52) >> 52;
        let hi = imm.wrapping_sub(lo12) >> 12;
        self.li(e, rd, hi);
        // slli rd, rd, 12
        self.ins(e, i_type(0x13, rd, 1, rd, 12));
        if lo12 != 0 {
            self.addi(e, rd, rd, lo12 as i32);
        }
    }

    /// Fold an out-of-range offset into t6, returning the effective base
    /// and offset to use.
    fn base_off(&self, e: &mut Emitter, base: Reg, off: i32) -> (u8, i32) {
        if fits_i12(off as i64) {
            (base.0, off)
        } else {
            self.li(e, T6, off as i64);
            self.ins(e, r_type(0x33, T6, 0, T6, base.0, 0)); // add t6, t6, base
            (T6, 0)
        }
    }

    /// Branch f3 code and operand order for a condition.
    fn branch_parts(cond: Cond, a: u8, b: u8) -> (u32, u8, u8) {
        match cond {
            Cond::Eq => (0b000, a, b),
            Cond::Ne => (0b001, a, b),
            Cond::Lt => (0b100, a, b),
            Cond::Ge => (0b101, a, b),
            // ble/bgt are bge/blt with swapped operands
            Cond::Le => (0b101, b, a),
            Cond::Gt => (0b100, b, a),
        }
    }

    /// FEQ/FLT/FLE.D producing 0/1 in `rd`; returns true when the branch
    /// sense must be inverted (used for Ne).
    fn fcmp_to_reg(&self, e: &mut Emitter, cond: Cond, rd: u8, a: FReg, b: FReg) -> bool {
        let (f3, rs1, rs2, invert) = match cond {
            Cond::Eq => (0b010, a.0, b.0, false),
            Cond::Ne => (0b010, a.0, b.0, true),
            Cond::Lt => (0b001, a.0, b.0, false),
            Cond::Le => (0b000, a.0, b.0, false),
            Cond::Gt => (0b001, b.0, a.0, false),
            Cond::Ge => (0b000, b.0, a.0, false),
        };
        self.ins(e, r_type(0x53, rd, f3, rs1, rs2, 0b101_0001));
        invert
    }
}

impl Isa for Riscv64 {
    fn arch(&self) -> Arch {
        Arch::Riscv64
    }

    fn ret(&self) -> Reg {
        Reg(10) // a0
    }

    fn arg(&self, i: usize) -> Reg {
        Reg(10 + i as u8)
    }

    fn n_arg_regs(&self) -> usize {
        8
    }

    fn scratch(&self, i: usize) -> Reg {
        const MAP: [u8; 6] = [5, 6, 7, 28, 29, 30]; // t0-t2, t3-t5
        Reg(MAP[i])
    }

    fn sp(&self) -> Reg {
        Reg(SP)
    }

    fn fp(&self) -> Reg {
        Reg(S0)
    }

    fn closure_reg(&self) -> Reg {
        Reg(9) // s1
    }

    fn slot_off(&self, i: u32) -> i32 {
        // s0 points at the caller's sp; ra/s0 live just below it
        -(24 + 8 * i as i32)
    }

    fn has_simd(&self) -> bool {
        false
    }

    // ---- moves --------------------------------------------------------

    fn mov_rr(&self, e: &mut Emitter, dst: Reg, src: Reg) {
        if dst != src {
            self.addi(e, dst.0, src.0, 0);
        }
    }

    fn mov_ri(&self, e: &mut Emitter, dst: Reg, imm: i64) {
        self.li(e, dst.0, imm);
    }

    fn zero(&self, e: &mut Emitter, dst: Reg) {
        // mv rd, x0: the canonical zero
        self.addi(e, dst.0, ZERO, 0);
    }

    fn load(&self, e: &mut Emitter, dst: Reg, base: Reg, off: i32) {
        let (b, o) = self.base_off(e, base, off);
        self.ins(e, i_type(0x03, dst.0, 0b011, b, o));
    }

    fn store(&self, e: &mut Emitter, base: Reg, off: i32, src: Reg) {
        let (b, o) = self.base_off(e, base, off);
        self.ins(e, s_type(0x23, 0b011, b, src.0, o));
    }

    fn load_byte(&self, e: &mut Emitter, dst: Reg, base: Reg, off: i32) {
        let (b, o) = self.base_off(e, base, off);
        self.ins(e, i_type(0x03, dst.0, 0b100, b, o)); // lbu
    }

    fn store_byte(&self, e: &mut Emitter, base: Reg, off: i32, src: Reg) {
        let (b, o) = self.base_off(e, base, off);
        self.ins(e, s_type(0x23, 0b000, b, src.0, o)); // sb
    }

    fn mov_rf(&self, e: &mut Emitter, dst: Reg, src: FReg) {
        // fmv.x.d
        self.ins(e, r_type(0x53, dst.0, 0, src.0, 0, 0b111_0001));
    }

    fn mov_fr(&self, e: &mut Emitter, dst: FReg, src: Reg) {
        // fmv.d.x
        self.ins(e, r_type(0x53, dst.0, 0, src.0, 0, 0b111_1001));
    }

    fn load_f(&self, e: &mut Emitter, dst: FReg, base: Reg, off: i32) {
        let (b, o) = self.base_off(e, base, off);
        self.ins(e, i_type(0x07, dst.0, 0b011, b, o));
    }

    fn store_f(&self, e: &mut Emitter, base: Reg, off: i32, src: FReg) {
        let (b, o) = self.base_off(e, base, off);
        self.ins(e, s_type(0x27, 0b011, b, src.0, o));
    }

    // ---- integer ALU --------------------------------------------------

    fn add(&self, e: &mut Emitter, dst: Reg, src: Reg) {
        self.ins(e, r_type(0x33, dst.0, 0, dst.0, src.0, 0));
    }

    fn sub(&self, e: &mut Emitter, dst: Reg, src: Reg) {
        self.ins(e, r_type(0x33, dst.0, 0, dst.0, src.0, 0x20));
    }

    fn mul(&self, e: &mut Emitter, dst: Reg, src: Reg) {
        self.ins(e, r_type(0x33, dst.0, 0, dst.0, src.0, 1));
    }

    fn sdiv(&self, e: &mut Emitter, dst: Reg, lhs: Reg, rhs: Reg) {
        self.ins(e, r_type(0x33, dst.0, 0b100, lhs.0, rhs.0, 1));
    }

    fn srem(&self, e: &mut Emitter, dst: Reg, lhs: Reg, rhs: Reg) {
        self.ins(e, r_type(0x33, dst.0, 0b110, lhs.0, rhs.0, 1));
    }

    fn neg(&self, e: &mut Emitter, dst: Reg) {
        self.ins(e, r_type(0x33, dst.0, 0, ZERO, dst.0, 0x20));
    }

    fn not(&self, e: &mut Emitter, dst: Reg) {
        // xori rd, rd, -1
        self.ins(e, i_type(0x13, dst.0, 0b100, dst.0, -1));
    }

    fn and(&self, e: &mut Emitter, dst: Reg, src: Reg) {
        self.ins(e, r_type(0x33, dst.0, 0b111, dst.0, src.0, 0));
    }

    fn or(&self, e: &mut Emitter, dst: Reg, src: Reg) {
        self.ins(e, r_type(0x33, dst.0, 0b110, dst.0, src.0, 0));
    }

    fn xor(&self, e: &mut Emitter, dst: Reg, src: Reg) {
        self.ins(e, r_type(0x33, dst.0, 0b100, dst.0, src.0, 0));
    }

    fn shl(&self, e: &mut Emitter, dst: Reg, amount: Reg) {
        self.ins(e, r_type(0x33, dst.0, 0b001, dst.0, amount.0, 0));
    }

    fn shr(&self, e: &mut Emitter, dst: Reg, amount: Reg) {
        // sra
        self.ins(e, r_type(0x33, dst.0, 0b101, dst.0, amount.0, 0x20));
    }

    fn add_ri(&self, e: &mut Emitter, dst: Reg, imm: i32) {
        if imm == 0 {
            return;
        }
        if fits_i12(imm as i64) {
            self.addi(e, dst.0, dst.0, imm);
        } else {
            self.li(e, T6, imm as i64);
            self.ins(e, r_type(0x33, dst.0, 0, dst.0, T6, 0));
        }
    }

    // ---- compare and branch -------------------------------------------

    fn jcc(&self, e: &mut Emitter, cond: Cond, a: Reg, b: Reg, label: &str) {
        let (f3, rs1, rs2) = Self::branch_parts(cond, a.0, b.0);
        let at = e.text.offset();
        self.ins(
            e,
            0x63 | (f3 << 12) | ((rs1 as u32) << 15) | ((rs2 as u32) << 20),
        );
        e.add_patch(at, label, PatchKind::Branch13);
    }

    fn fjcc(&self, e: &mut Emitter, cond: Cond, a: FReg, b: FReg, label: &str) {
        let invert = self.fcmp_to_reg(e, cond, T6, a, b);
        let f3 = if invert { 0b000 } else { 0b001 }; // beq / bne t6, x0
        let at = e.text.offset();
        self.ins(e, 0x63 | (f3 << 12) | ((T6 as u32) << 15));
        e.add_patch(at, label, PatchKind::Branch13);
    }

    fn cmp_set(&self, e: &mut Emitter, cond: Cond, dst: Reg, a: Reg, b: Reg) {
        match cond {
            Cond::Lt => self.ins(e, r_type(0x33, dst.0, 0b010, a.0, b.0, 0)),
            Cond::Gt => self.ins(e, r_type(0x33, dst.0, 0b010, b.0, a.0, 0)),
            Cond::Le => {
                self.ins(e, r_type(0x33, dst.0, 0b010, b.0, a.0, 0)); // a>b
                self.ins(e, i_type(0x13, dst.0, 0b100, dst.0, 1)); // xori 1
            }
            Cond::Ge => {
                self.ins(e, r_type(0x33, dst.0, 0b010, a.0, b.0, 0)); // a<b
                self.ins(e, i_type(0x13, dst.0, 0b100, dst.0, 1));
            }
            Cond::Eq => {
                self.ins(e, r_type(0x33, T6, 0b100, a.0, b.0, 0)); // xor t6,a,b
                self.ins(e, i_type(0x13, dst.0, 0b011, T6, 1)); // sltiu rd, t6, 1
            }
            Cond::Ne => {
                self.ins(e, r_type(0x33, T6, 0b100, a.0, b.0, 0));
                self.ins(e, r_type(0x33, dst.0, 0b011, ZERO, T6, 0)); // sltu rd, x0, t6
            }
        }
    }

    fn fcmp_set(&self, e: &mut Emitter, cond: Cond, dst: Reg, a: FReg, b: FReg) {
        let invert = self.fcmp_to_reg(e, cond, dst.0, a, b);
        if invert {
            self.ins(e, i_type(0x13, dst.0, 0b100, dst.0, 1)); // xori 1
        }
    }

    fn jmp(&self, e: &mut Emitter, label: &str) {
        let at = e.text.offset();
        self.ins(e, 0x6F); // jal x0
        e.add_patch(at, label, PatchKind::Jal21);
    }

    fn jmp_reg(&self, e: &mut Emitter, target: Reg) {
        self.ins(e, i_type(0x67, ZERO, 0, target.0, 0));
    }

    // ---- calls and stack ----------------------------------------------

    fn call_label(&self, e: &mut Emitter, label: &str) {
        let at = e.text.offset();
        self.ins(e, 0x6F | ((RA as u32) << 7)); // jal ra
        e.add_patch(at, label, PatchKind::Jal21);
    }

    fn call_sym(&self, e: &mut Emitter, symbol: &str) {
        // auipc t6 ; ld t6, lo(t6) ; jalr ra, t6
        let auipc_at = e.text.offset();
        self.ins(e, 0x17 | ((T6 as u32) << 7));
        let ld_at = e.text.offset();
        self.ins(e, i_type(0x03, T6, 0b011, T6, 0));
        e.relocs.push(Reloc::RiscvGotCall {
            auipc_at,
            ld_at,
            symbol: symbol.to_string(),
        });
        self.ins(e, i_type(0x67, RA, 0, T6, 0));
    }

    fn call_reg(&self, e: &mut Emitter, target: Reg) {
        self.ins(e, i_type(0x67, RA, 0, target.0, 0));
    }

    fn ret_insn(&self, e: &mut Emitter) {
        self.ins(e, i_type(0x67, ZERO, 0, RA, 0));
    }

    fn push(&self, e: &mut Emitter, src: Reg) {
        self.addi(e, SP, SP, -16);
        self.ins(e, s_type(0x23, 0b011, SP, src.0, 0));
    }

    fn pop(&self, e: &mut Emitter, dst: Reg) {
        self.ins(e, i_type(0x03, dst.0, 0b011, SP, 0));
        self.addi(e, SP, SP, 16);
    }

    fn syscall(&self, e: &mut Emitter, nr: i64, _nargs: usize, macos_abi: bool) {
        self.li(e, 17, nr); // a7
        self.trap(e, macos_abi);
    }

    fn trap(&self, e: &mut Emitter, _macos_abi: bool) {
        self.ins(e, 0x0000_0073); // ecall
    }

    // ---- floating point -----------------------------------------------

    fn fadd(&self, e: &mut Emitter, dst: FReg, src: FReg) {
        self.ins(e, r_type(0x53, dst.0, 0b111, dst.0, src.0, 0b000_0001));
    }

    fn fsub(&self, e: &mut Emitter, dst: FReg, src: FReg) {
        self.ins(e, r_type(0x53, dst.0, 0b111, dst.0, src.0, 0b000_0101));
    }

    fn fmul(&self, e: &mut Emitter, dst: FReg, src: FReg) {
        self.ins(e, r_type(0x53, dst.0, 0b111, dst.0, src.0, 0b000_1001));
    }

    fn fdiv(&self, e: &mut Emitter, dst: FReg, src: FReg) {
        self.ins(e, r_type(0x53, dst.0, 0b111, dst.0, src.0, 0b000_1101));
    }

    fn cvt_fi(&self, e: &mut Emitter, dst: Reg, src: FReg) {
        // fcvt.l.d rd, fs, rtz
        self.ins(e, r_type(0x53, dst.0, 0b001, src.0, 2, 0b110_0001));
    }

    fn cvt_if(&self, e: &mut Emitter, dst: FReg, src: Reg) {
        // fcvt.d.l fd, rs
        self.ins(e, r_type(0x53, dst.0, 0b111, src.0, 2, 0b110_1001));
    }

    // ---- address materialization --------------------------------------

    fn lea_section(&self, e: &mut Emitter, dst: Reg, section: Section, off: u64) {
        let auipc_at = e.text.offset();
        self.ins(e, 0x17 | ((dst.0 as u32) << 7));
        let addi_at = e.text.offset();
        self.addi(e, dst.0, dst.0, 0);
        e.relocs.push(Reloc::RiscvAuipcAddi {
            auipc_at,
            addi_at,
            section,
            addend: off,
        });
    }

    // ---- SIMD (scalar fallback; has_simd() is false) -------------------

    fn vload(&self, e: &mut Emitter, dst: FReg, base: Reg, off: i32) {
        self.load_f(e, dst, base, off);
    }

    fn vstore(&self, e: &mut Emitter, base: Reg, off: i32, src: FReg) {
        self.store_f(e, base, off, src);
    }

    fn vbroadcast(&self, e: &mut Emitter, dst: FReg, src: FReg) {
        // fsgnj.d fd, fs, fs (fmv.d)
        self.ins(e, r_type(0x53, dst.0, 0, src.0, src.0, 0b001_0001));
    }

    fn vadd(&self, e: &mut Emitter, dst: FReg, src: FReg) {
        self.fadd(e, dst, src);
    }

    fn vmul(&self, e: &mut Emitter, dst: FReg, src: FReg) {
        self.fmul(e, dst, src);
    }

    fn vfma(&self, e: &mut Emitter, dst: FReg, a: FReg, b: FReg) {
        // fmadd.d fd, fa, fb, fd
        self.ins(
            e,
            0x43 | ((dst.0 as u32) << 7)
                | (0b111 << 12)
                | ((a.0 as u32) << 15)
                | ((b.0 as u32) << 20)
                | (0b01 << 25)
                | ((dst.0 as u32) << 27),
        );
    }

    // ---- frames and startup -------------------------------------------

    fn prologue(&self, e: &mut Emitter, n_slots: u32) {
        let total = (16 + n_slots * 8 + 15) & !15;
        self.add_ri(e, self.sp(), -(total as i32));
        self.ins(e, s_type(0x23, 0b011, SP, RA, total as i32 - 8));
        self.ins(e, s_type(0x23, 0b011, SP, S0, total as i32 - 16));
        self.addi(e, S0, SP, total as i32);
    }

    fn epilogue(&self, e: &mut Emitter, _n_slots: u32) {
        // sp = s0 (caller's sp), then reload ra/s0 from below it
        self.addi(e, SP, S0, 0);
        self.ins(e, i_type(0x03, RA, 0b011, SP, -8));
        self.ins(e, i_type(0x03, S0, 0b011, SP, -16));
    }

    fn cpu_probe(&self, e: &mut Emitter) {
        // D-extension FMA is architectural
        self.mov_ri(e, self.ret(), 1);
    }

    // ---- patch resolution ---------------------------------------------

    fn apply_patch(&self, text: &mut [u8], patch: &Patch, target_off: usize) -> Result<()> {
        let disp = target_off as i64 - patch.at as i64;
        if disp % 2 != 0 {
            return Err(CodeGenError::Internal(format!(
                "misaligned riscv branch target for '{}'",
                patch.target
            )));
        }
        let at = patch.at;
        let insn = u32::from_le_bytes(text[at..at + 4].try_into().unwrap());

        let patched = match patch.kind {
            PatchKind::Jal21 => {
                if !(-(1 << 20)..(1 << 20)).contains(&disp) {
                    return Err(CodeGenError::BranchOutOfRange {
                        target: patch.target.clone(),
                        isa: "riscv64",
                        displacement: disp,
                    });
                }
                let d = disp as u32;
                let imm = (((d >> 20) & 1) << 31)
                    | (((d >> 1) & 0x3FF) << 21)
                    | (((d >> 11) & 1) << 20)
                    | (((d >> 12) & 0xFF) << 12);
                insn | imm
            }
            PatchKind::Branch13 => {
                if !(-(1 << 12)..(1 << 12)).contains(&disp) {
                    return Err(CodeGenError::BranchOutOfRange {
                        target: patch.target.clone(),
                        isa: "riscv64",
                        displacement: disp,
                    });
                }
                let d = disp as u32;
                let imm = (((d >> 12) & 1) << 31)
                    | (((d >> 5) & 0x3F) << 25)
                    | (((d >> 1) & 0xF) << 8)
                    | (((d >> 11) & 1) << 7);
                insn | imm
            }
            other => {
                return Err(CodeGenError::Internal(format!(
                    "patch kind {:?} cannot appear in riscv64 text",
                    other
                )))
            }
        };
        text[at..at + 4].copy_from_slice(&patched.to_le_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emit(f: impl FnOnce(&Riscv64, &mut Emitter)) -> Vec<u32> {
        let isa = Riscv64;
        let mut e = Emitter::new();
        f(&isa, &mut e);
        e.text
            .as_slice()
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
            .collect()
    }

    #[test]
    fn test_li_small() {
        // li a0, 42 = addi a0, x0, 42
        let w = emit(|isa, e| isa.mov_ri(e, Reg(10), 42));
        assert_eq!(w, vec![0x02A0_0513]);
    }

    #[test]
    fn test_li_lui_pair() {
        // li a0, 0x12345 -> lui + addiw
        let w = emit(|isa, e| isa.mov_ri(e, Reg(10), 0x12345));
        assert_eq!(w.len(), 2);
        assert_eq!(w[0] & 0x7F, 0x37); // lui
        assert_eq!(w[1] & 0x7F, 0x1B); // addiw
    }

    #[test]
    fn test_li_wide_recurses() {
        let w = emit(|isa, e| isa.mov_ri(e, Reg(10), 0x1234_5678_9ABC));
        assert!(w.len() >= 4);
    }

    #[test]
    fn test_ecall() {
        let w = emit(|isa, e| isa.trap(e, false));
        assert_eq!(w, vec![0x0000_0073]);
    }

    #[test]
    fn test_ret_is_jalr_ra() {
        let w = emit(|isa, e| isa.ret_insn(e));
        assert_eq!(w, vec![0x0000_8067]);
    }

    #[test]
    fn test_sd_ld_round() {
        // sd a0, -24(s0) ; ld a0, -24(s0)
        let w = emit(|isa, e| {
            isa.store(e, Reg(8), -24, Reg(10));
            isa.load(e, Reg(10), Reg(8), -24);
        });
        assert_eq!(w.len(), 2);
        assert_eq!(w[0] & 0x7F, 0x23);
        assert_eq!(w[1] & 0x7F, 0x03);
    }

    #[test]
    fn test_jal_patch_resolution() {
        let isa = Riscv64;
        let mut e = Emitter::new();
        isa.jmp(&mut e, "t"); // at 0
        isa.ret_insn(&mut e);
        e.define_label("t").unwrap(); // offset 8
        let patch = e.patches[0].clone();
        isa.apply_patch(e.text.as_mut_slice(), &patch, 8).unwrap();
        let insn = u32::from_le_bytes(e.text.as_slice()[0..4].try_into().unwrap());
        // jal x0, +8: imm[10:1] = 4 -> bit 21 field
        assert_eq!(insn, 0x0080_006F);
    }

    #[test]
    fn test_branch13_range_rejected() {
        let isa = Riscv64;
        let mut text = vec![0x63u8, 0, 0, 0, 0, 0, 0, 0];
        let patch = Patch {
            at: 0,
            target: "far".into(),
            kind: PatchKind::Branch13,
        };
        assert!(matches!(
            isa.apply_patch(&mut text, &patch, 1 << 13),
            Err(CodeGenError::BranchOutOfRange { .. })
        ));
    }

    #[test]
    fn test_fadd_d() {
        // fadd.d fa0, fa0, fa1 dynamic rounding
        let w = emit(|isa, e| isa.fadd(e, FReg(10), FReg(11)));
        assert_eq!(w, vec![0x02B5_7553]);
    }

    #[test]
    fn test_beq_operands() {
        let isa = Riscv64;
        let mut e = Emitter::new();
        isa.jcc(&mut e, Cond::Eq, Reg(10), Reg(11), "l");
        let insn = u32::from_le_bytes(e.text.as_slice()[0..4].try_into().unwrap());
        assert_eq!(insn & 0x7F, 0x63);
        assert_eq!((insn >> 15) & 0x1F, 10);
        assert_eq!((insn >> 20) & 0x1F, 11);
    }

    #[test]
    fn test_le_swaps_to_bge() {
        let isa = Riscv64;
        let mut e = Emitter::new();
        isa.jcc(&mut e, Cond::Le, Reg(10), Reg(11), "l");
        let insn = u32::from_le_bytes(e.text.as_slice()[0..4].try_into().unwrap());
        assert_eq!((insn >> 12) & 7, 0b101); // bge
        assert_eq!((insn >> 15) & 0x1F, 11); // swapped
        assert_eq!((insn >> 20) & 0x1F, 10);
    }
}

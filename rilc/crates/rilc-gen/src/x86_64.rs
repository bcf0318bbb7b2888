//! x86-64 backend (System V AMD64 calling convention).
//!
//! Encodings follow the Intel SDM volume 2. All integer operations use
//! REX.W 64-bit forms; floats are SSE2 scalar doubles; the vector ops use
//! 128-bit SSE except FMA, which needs the VEX-encoded FMA3 form.
//!
//! Register map (abstract index -> physical):
//!
//! | abstract | physical | role |
//! |----------|----------|------|
//! | 0        | rax      | return / accumulator |
//! | 1..=6    | rdi rsi rdx rcx r8 r9 | arguments |
//! | 7, 8     | r10 r11  | scratch 0,1 |
//! | 9        | rbx      | closure environment |
//! | 10, 11   | rsp rbp  | sp / fp |
//!
//! scratch(2..=5) alias r9, r8, rcx, rdx: the fixed-register shift and
//! division instructions land their clobbers inside the documented
//! scratch set instead of silently smashing an argument.

use crate::backend::{Cond, FReg, Isa, Reg};
use crate::emit::{Emitter, Patch, PatchKind, Reloc, Section};
use crate::error::{CodeGenError, Result};
use crate::target::Arch;

pub struct X86_64;

/// Abstract index -> physical register number.
const PHYS: [u8; 12] = [
    0,  // rax
    7,  // rdi
    6,  // rsi
    2,  // rdx
    1,  // rcx
    8,  // r8
    9,  // r9
    10, // r10
    11, // r11
    3,  // rbx
    4,  // rsp
    5,  // rbp
];

#[inline]
fn phys(r: Reg) -> u8 {
    PHYS[r.0 as usize]
}

#[inline]
fn rex(w: bool, reg: u8, index: u8, base: u8) -> u8 {
    0x40 | ((w as u8) << 3)
        | (((reg >> 3) & 1) << 2)
        | (((index >> 3) & 1) << 1)
        | ((base >> 3) & 1)
}

#[inline]
fn modrm(mode: u8, reg: u8, rm: u8) -> u8 {
    (mode << 6) | ((reg & 7) << 3) | (rm & 7)
}

impl X86_64 {
    /// REX.W <op> /r with register-direct operands.
    fn rr(&self, e: &mut Emitter, opcode: u8, reg: u8, rm: u8) {
        e.text.push_u8(rex(true, reg, 0, rm));
        e.text.push_u8(opcode);
        e.text.push_u8(modrm(3, reg, rm));
    }

    /// REX.W 0F <op> /r register-direct.
    fn rr_0f(&self, e: &mut Emitter, opcode: u8, reg: u8, rm: u8) {
        e.text.push_u8(rex(true, reg, 0, rm));
        e.text.push_u8(0x0F);
        e.text.push_u8(opcode);
        e.text.push_u8(modrm(3, reg, rm));
    }

    /// ModRM memory operand `[base + off]`, picking disp8 when it fits.
    /// rsp-based addressing needs a SIB byte; rbp with mod=00 would mean
    /// RIP-relative, so rbp always gets a displacement.
    fn mem_operand(&self, e: &mut Emitter, reg: u8, base: u8, off: i32) {
        let need_sib = (base & 7) == 4;
        let disp8 = (-128..=127).contains(&off) ;
        let mode = if disp8 { 1 } else { 2 };
        e.text.push_u8(modrm(mode, reg, base));
        if need_sib {
            // scale=0, index=none(100), base
            e.text.push_u8(0x24);
        }
        if disp8 {
            e.text.push_u8(off as u8);
        } else {
            e.text.push_u32(off as u32);
        }
    }

    /// REX.W <op> /r with a `[base+off]` memory operand.
    fn rm(&self, e: &mut Emitter, opcode: u8, reg: u8, base: u8, off: i32) {
        e.text.push_u8(rex(true, reg, 0, base));
        e.text.push_u8(opcode);
        self.mem_operand(e, reg, base, off);
    }

    fn cc_code(cond: Cond) -> u8 {
        // Signed condition encodings for Jcc / SETcc (0F 8x / 0F 9x).
        match cond {
            Cond::Eq => 0x4,
            Cond::Ne => 0x5,
            Cond::Lt => 0xC,
            Cond::Le => 0xE,
            Cond::Gt => 0xF,
            Cond::Ge => 0xD,
        }
    }

    /// Unsigned/flag-based condition after UCOMISD (CF/ZF).
    fn cc_code_unsigned(cond: Cond) -> u8 {
        match cond {
            Cond::Eq => 0x4,  // e
            Cond::Ne => 0x5,  // ne
            Cond::Lt => 0x2,  // b
            Cond::Le => 0x6,  // be
            Cond::Gt => 0x7,  // a
            Cond::Ge => 0x3,  // ae
        }
    }

    fn cmp_rr(&self, e: &mut Emitter, a: Reg, b: Reg) {
        // cmp a, b  (39 /r: cmp r/m64, r64)
        self.rr(e, 0x39, phys(b), phys(a));
    }

    fn ucomisd(&self, e: &mut Emitter, a: FReg, b: FReg) {
        e.text.push_u8(0x66);
        if a.0 >= 8 || b.0 >= 8 {
            e.text.push_u8(rex(false, a.0, 0, b.0));
        }
        e.text.push_u8(0x0F);
        e.text.push_u8(0x2E);
        e.text.push_u8(modrm(3, a.0, b.0));
    }

    fn jcc_raw(&self, e: &mut Emitter, cc: u8, label: &str) {
        e.text.push_u8(0x0F);
        e.text.push_u8(0x80 | cc);
        let at = e.text.offset();
        e.text.push_u32(0);
        e.add_patch(at, label, PatchKind::Rel32);
    }

    fn setcc(&self, e: &mut Emitter, cc: u8, dst: Reg) {
        let d = phys(dst);
        // SETcc r/m8 needs REX to reach sil/dil/r8b+
        e.text.push_u8(rex(false, 0, 0, d));
        e.text.push_u8(0x0F);
        e.text.push_u8(0x90 | cc);
        e.text.push_u8(modrm(3, 0, d));
        // movzx dst, dst_b
        e.text.push_u8(rex(true, d, 0, d));
        e.text.push_u8(0x0F);
        e.text.push_u8(0xB6);
        e.text.push_u8(modrm(3, d, d));
    }

    /// F2/66-prefixed 0F scalar double op, register-direct.
    fn sse(&self, e: &mut Emitter, prefix: u8, opcode: u8, dst: u8, src: u8) {
        e.text.push_u8(prefix);
        if dst >= 8 || src >= 8 {
            e.text.push_u8(rex(false, dst, 0, src));
        }
        e.text.push_u8(0x0F);
        e.text.push_u8(opcode);
        e.text.push_u8(modrm(3, dst, src));
    }
}

impl Isa for X86_64 {
    fn arch(&self) -> Arch {
        Arch::X86_64
    }

    fn ret(&self) -> Reg {
        Reg(0)
    }

    fn arg(&self, i: usize) -> Reg {
        Reg(1 + i as u8)
    }

    fn n_arg_regs(&self) -> usize {
        6
    }

    fn scratch(&self, i: usize) -> Reg {
        // r10, r11, then aliasing r9, r8, rcx, rdx (see module doc)
        const MAP: [u8; 6] = [7, 8, 6, 5, 4, 3];
        Reg(MAP[i])
    }

    fn sp(&self) -> Reg {
        Reg(10)
    }

    fn fp(&self) -> Reg {
        Reg(11)
    }

    fn closure_reg(&self) -> Reg {
        Reg(9) // rbx
    }

    fn slot_off(&self, i: u32) -> i32 {
        -8 * (i as i32 + 1)
    }

    fn has_simd(&self) -> bool {
        true
    }

    // ---- moves --------------------------------------------------------

    fn mov_rr(&self, e: &mut Emitter, dst: Reg, src: Reg) {
        if dst != src {
            self.rr(e, 0x89, phys(src), phys(dst));
        }
    }

    fn mov_ri(&self, e: &mut Emitter, dst: Reg, imm: i64) {
        let d = phys(dst);
        if imm == 0 {
            self.zero(e, dst);
        } else if i32::try_from(imm).is_ok() {
            // REX.W C7 /0 imm32 (sign-extended)
            e.text.push_u8(rex(true, 0, 0, d));
            e.text.push_u8(0xC7);
            e.text.push_u8(modrm(3, 0, d));
            e.text.push_u32(imm as u32);
        } else {
            // movabs
            e.text.push_u8(rex(true, 0, 0, d));
            e.text.push_u8(0xB8 | (d & 7));
            e.text.push_u64(imm as u64);
        }
    }

    fn zero(&self, e: &mut Emitter, dst: Reg) {
        // 32-bit xor zero-extends and saves the REX.W byte
        let d = phys(dst);
        if d >= 8 {
            e.text.push_u8(rex(false, d, 0, d));
        }
        e.text.push_u8(0x31);
        e.text.push_u8(modrm(3, d, d));
    }

    fn load(&self, e: &mut Emitter, dst: Reg, base: Reg, off: i32) {
        self.rm(e, 0x8B, phys(dst), phys(base), off);
    }

    fn store(&self, e: &mut Emitter, base: Reg, off: i32, src: Reg) {
        self.rm(e, 0x89, phys(src), phys(base), off);
    }

    fn load_byte(&self, e: &mut Emitter, dst: Reg, base: Reg, off: i32) {
        // movzx r64, m8: REX.W 0F B6 /r
        let d = phys(dst);
        let b = phys(base);
        e.text.push_u8(rex(true, d, 0, b));
        e.text.push_u8(0x0F);
        e.text.push_u8(0xB6);
        self.mem_operand(e, d, b, off);
    }

    fn store_byte(&self, e: &mut Emitter, base: Reg, off: i32, src: Reg) {
        // mov m8, r8 (REX reaches sil/dil/r8b+)
        let s = phys(src);
        let b = phys(base);
        e.text.push_u8(rex(false, s, 0, b));
        e.text.push_u8(0x88);
        self.mem_operand(e, s, b, off);
    }

    fn mov_rf(&self, e: &mut Emitter, dst: Reg, src: FReg) {
        // movq r64, xmm: 66 REX.W 0F 7E /r
        e.text.push_u8(0x66);
        e.text.push_u8(rex(true, src.0, 0, phys(dst)));
        e.text.push_u8(0x0F);
        e.text.push_u8(0x7E);
        e.text.push_u8(modrm(3, src.0, phys(dst)));
    }

    fn mov_fr(&self, e: &mut Emitter, dst: FReg, src: Reg) {
        // movq xmm, r64: 66 REX.W 0F 6E /r
        e.text.push_u8(0x66);
        e.text.push_u8(rex(true, dst.0, 0, phys(src)));
        e.text.push_u8(0x0F);
        e.text.push_u8(0x6E);
        e.text.push_u8(modrm(3, dst.0, phys(src)));
    }

    fn load_f(&self, e: &mut Emitter, dst: FReg, base: Reg, off: i32) {
        // movsd xmm, m64: F2 0F 10 /r
        e.text.push_u8(0xF2);
        let b = phys(base);
        if dst.0 >= 8 || b >= 8 {
            e.text.push_u8(rex(false, dst.0, 0, b));
        }
        e.text.push_u8(0x0F);
        e.text.push_u8(0x10);
        self.mem_operand(e, dst.0, b, off);
    }

    fn store_f(&self, e: &mut Emitter, base: Reg, off: i32, src: FReg) {
        // movsd m64, xmm: F2 0F 11 /r
        e.text.push_u8(0xF2);
        let b = phys(base);
        if src.0 >= 8 || b >= 8 {
            e.text.push_u8(rex(false, src.0, 0, b));
        }
        e.text.push_u8(0x0F);
        e.text.push_u8(0x11);
        self.mem_operand(e, src.0, b, off);
    }

    // ---- integer ALU --------------------------------------------------

    fn add(&self, e: &mut Emitter, dst: Reg, src: Reg) {
        self.rr(e, 0x01, phys(src), phys(dst));
    }

    fn sub(&self, e: &mut Emitter, dst: Reg, src: Reg) {
        self.rr(e, 0x29, phys(src), phys(dst));
    }

    fn mul(&self, e: &mut Emitter, dst: Reg, src: Reg) {
        // imul r64, r/m64: REX.W 0F AF /r (dst is reg field)
        self.rr_0f(e, 0xAF, phys(dst), phys(src));
    }

    fn sdiv(&self, e: &mut Emitter, dst: Reg, lhs: Reg, rhs: Reg) {
        // idiv wants rdx:rax; the divisor is staged in rcx (scratch 4),
        // rdx (scratch 5) is sign-extension space. Operands must come
        // from outside the scratch(4..5) set, which the core guarantees.
        self.mov_rr(e, Reg(4), rhs); // rcx <- rhs
        self.mov_rr(e, Reg(0), lhs); // rax <- lhs
        e.text.push_bytes(&[0x48, 0x99]); // cqo
        e.text.push_bytes(&[0x48, 0xF7, 0xF9]); // idiv rcx
        self.mov_rr(e, dst, Reg(0));
    }

    fn srem(&self, e: &mut Emitter, dst: Reg, lhs: Reg, rhs: Reg) {
        self.mov_rr(e, Reg(4), rhs); // rcx <- rhs
        self.mov_rr(e, Reg(0), lhs); // rax <- lhs
        e.text.push_bytes(&[0x48, 0x99]); // cqo
        e.text.push_bytes(&[0x48, 0xF7, 0xF9]); // idiv rcx
        self.mov_rr(e, dst, Reg(3)); // remainder in rdx
    }

    fn neg(&self, e: &mut Emitter, dst: Reg) {
        let d = phys(dst);
        e.text.push_u8(rex(true, 0, 0, d));
        e.text.push_u8(0xF7);
        e.text.push_u8(modrm(3, 3, d));
    }

    fn not(&self, e: &mut Emitter, dst: Reg) {
        let d = phys(dst);
        e.text.push_u8(rex(true, 0, 0, d));
        e.text.push_u8(0xF7);
        e.text.push_u8(modrm(3, 2, d));
    }

    fn and(&self, e: &mut Emitter, dst: Reg, src: Reg) {
        self.rr(e, 0x21, phys(src), phys(dst));
    }

    fn or(&self, e: &mut Emitter, dst: Reg, src: Reg) {
        self.rr(e, 0x09, phys(src), phys(dst));
    }

    fn xor(&self, e: &mut Emitter, dst: Reg, src: Reg) {
        self.rr(e, 0x31, phys(src), phys(dst));
    }

    fn shl(&self, e: &mut Emitter, dst: Reg, amount: Reg) {
        // shift count lives in cl
        self.mov_rr(e, Reg(4), amount); // rcx <- amount
        let d = phys(dst);
        e.text.push_u8(rex(true, 0, 0, d));
        e.text.push_u8(0xD3);
        e.text.push_u8(modrm(3, 4, d));
    }

    fn shr(&self, e: &mut Emitter, dst: Reg, amount: Reg) {
        self.mov_rr(e, Reg(4), amount);
        let d = phys(dst);
        e.text.push_u8(rex(true, 0, 0, d));
        e.text.push_u8(0xD3);
        e.text.push_u8(modrm(3, 7, d)); // sar
    }

    fn add_ri(&self, e: &mut Emitter, dst: Reg, imm: i32) {
        if imm == 0 {
            return;
        }
        let d = phys(dst);
        e.text.push_u8(rex(true, 0, 0, d));
        if (-128..=127).contains(&imm) {
            e.text.push_u8(0x83);
            e.text.push_u8(modrm(3, 0, d));
            e.text.push_u8(imm as u8);
        } else {
            e.text.push_u8(0x81);
            e.text.push_u8(modrm(3, 0, d));
            e.text.push_u32(imm as u32);
        }
    }

    // ---- compare and branch -------------------------------------------

    fn jcc(&self, e: &mut Emitter, cond: Cond, a: Reg, b: Reg, label: &str) {
        self.cmp_rr(e, a, b);
        self.jcc_raw(e, Self::cc_code(cond), label);
    }

    fn fjcc(&self, e: &mut Emitter, cond: Cond, a: FReg, b: FReg, label: &str) {
        self.ucomisd(e, a, b);
        self.jcc_raw(e, Self::cc_code_unsigned(cond), label);
    }

    fn cmp_set(&self, e: &mut Emitter, cond: Cond, dst: Reg, a: Reg, b: Reg) {
        self.cmp_rr(e, a, b);
        self.setcc(e, Self::cc_code(cond), dst);
    }

    fn fcmp_set(&self, e: &mut Emitter, cond: Cond, dst: Reg, a: FReg, b: FReg) {
        self.ucomisd(e, a, b);
        self.setcc(e, Self::cc_code_unsigned(cond), dst);
    }

    fn jmp(&self, e: &mut Emitter, label: &str) {
        e.text.push_u8(0xE9);
        let at = e.text.offset();
        e.text.push_u32(0);
        e.add_patch(at, label, PatchKind::Rel32);
    }

    fn jmp_reg(&self, e: &mut Emitter, target: Reg) {
        let t = phys(target);
        if t >= 8 {
            e.text.push_u8(rex(false, 0, 0, t));
        }
        e.text.push_u8(0xFF);
        e.text.push_u8(modrm(3, 4, t));
    }

    // ---- calls and stack ----------------------------------------------

    fn call_label(&self, e: &mut Emitter, label: &str) {
        e.text.push_u8(0xE8);
        let at = e.text.offset();
        e.text.push_u32(0);
        e.add_patch(at, label, PatchKind::Rel32);
    }

    fn call_sym(&self, e: &mut Emitter, symbol: &str) {
        // Realign the stack dynamically: the operand stack may hold an
        // odd number of pushes and the C ABI wants 16-byte alignment.
        // mov r11, rsp ; and rsp, -16 ; push r11 ; push r11
        e.text.push_bytes(&[0x49, 0x89, 0xE3]);
        e.text.push_bytes(&[0x48, 0x83, 0xE4, 0xF0]);
        e.text.push_bytes(&[0x41, 0x53, 0x41, 0x53]);
        // sub rsp, 32: Win64 home space; harmless slack under SysV
        e.text.push_bytes(&[0x48, 0x83, 0xEC, 0x20]);
        // call [rip + disp32] through the GOT/IAT slot
        e.text.push_u8(0xFF);
        e.text.push_u8(0x15);
        let at = e.text.offset();
        e.text.push_u32(0);
        e.relocs.push(Reloc::X86GotCall {
            at,
            symbol: symbol.to_string(),
        });
        // add rsp, 32 ; pop r11 ; pop r11 ; mov rsp, r11
        e.text.push_bytes(&[0x48, 0x83, 0xC4, 0x20]);
        e.text.push_bytes(&[0x41, 0x5B, 0x41, 0x5B]);
        e.text.push_bytes(&[0x4C, 0x89, 0xDC]);
    }

    fn call_reg(&self, e: &mut Emitter, target: Reg) {
        let t = phys(target);
        if t >= 8 {
            e.text.push_u8(rex(false, 0, 0, t));
        }
        e.text.push_u8(0xFF);
        e.text.push_u8(modrm(3, 2, t));
    }

    fn ret_insn(&self, e: &mut Emitter) {
        e.text.push_u8(0xC3);
    }

    fn push(&self, e: &mut Emitter, src: Reg) {
        let s = phys(src);
        if s >= 8 {
            e.text.push_u8(0x41);
        }
        e.text.push_u8(0x50 | (s & 7));
    }

    fn pop(&self, e: &mut Emitter, dst: Reg) {
        let d = phys(dst);
        if d >= 8 {
            e.text.push_u8(0x41);
        }
        e.text.push_u8(0x58 | (d & 7));
    }

    fn syscall(&self, e: &mut Emitter, nr: i64, nargs: usize, macos_abi: bool) {
        self.mov_ri(e, self.ret(), nr); // rax <- nr
        if nargs >= 4 {
            // Kernel ABI wants the 4th argument in r10, not rcx
            e.text.push_bytes(&[0x49, 0x89, 0xCA]); // mov r10, rcx
        }
        self.trap(e, macos_abi);
    }

    fn trap(&self, e: &mut Emitter, _macos_abi: bool) {
        e.text.push_bytes(&[0x0F, 0x05]);
    }

    // ---- floating point -----------------------------------------------

    fn fadd(&self, e: &mut Emitter, dst: FReg, src: FReg) {
        self.sse(e, 0xF2, 0x58, dst.0, src.0);
    }

    fn fsub(&self, e: &mut Emitter, dst: FReg, src: FReg) {
        self.sse(e, 0xF2, 0x5C, dst.0, src.0);
    }

    fn fmul(&self, e: &mut Emitter, dst: FReg, src: FReg) {
        self.sse(e, 0xF2, 0x59, dst.0, src.0);
    }

    fn fdiv(&self, e: &mut Emitter, dst: FReg, src: FReg) {
        self.sse(e, 0xF2, 0x5E, dst.0, src.0);
    }

    fn cvt_fi(&self, e: &mut Emitter, dst: Reg, src: FReg) {
        // cvttsd2si r64, xmm: F2 REX.W 0F 2C /r
        e.text.push_u8(0xF2);
        e.text.push_u8(rex(true, phys(dst), 0, src.0));
        e.text.push_u8(0x0F);
        e.text.push_u8(0x2C);
        e.text.push_u8(modrm(3, phys(dst), src.0));
    }

    fn cvt_if(&self, e: &mut Emitter, dst: FReg, src: Reg) {
        // cvtsi2sd xmm, r64: F2 REX.W 0F 2A /r
        e.text.push_u8(0xF2);
        e.text.push_u8(rex(true, dst.0, 0, phys(src)));
        e.text.push_u8(0x0F);
        e.text.push_u8(0x2A);
        e.text.push_u8(modrm(3, dst.0, phys(src)));
    }

    // ---- address materialization --------------------------------------

    fn lea_section(&self, e: &mut Emitter, dst: Reg, section: Section, off: u64) {
        // lea r64, [rip + disp32]
        let d = phys(dst);
        e.text.push_u8(rex(true, d, 0, 0));
        e.text.push_u8(0x8D);
        e.text.push_u8(modrm(0, d, 5));
        let at = e.text.offset();
        e.text.push_u32(0);
        e.relocs.push(Reloc::X86PcRel {
            at,
            section,
            addend: off,
        });
    }

    // ---- SIMD ---------------------------------------------------------

    fn vload(&self, e: &mut Emitter, dst: FReg, base: Reg, off: i32) {
        // movupd xmm, m128: 66 0F 10 /r
        e.text.push_u8(0x66);
        let b = phys(base);
        if dst.0 >= 8 || b >= 8 {
            e.text.push_u8(rex(false, dst.0, 0, b));
        }
        e.text.push_u8(0x0F);
        e.text.push_u8(0x10);
        self.mem_operand(e, dst.0, b, off);
    }

    fn vstore(&self, e: &mut Emitter, base: Reg, off: i32, src: FReg) {
        e.text.push_u8(0x66);
        let b = phys(base);
        if src.0 >= 8 || b >= 8 {
            e.text.push_u8(rex(false, src.0, 0, b));
        }
        e.text.push_u8(0x0F);
        e.text.push_u8(0x11);
        self.mem_operand(e, src.0, b, off);
    }

    fn vbroadcast(&self, e: &mut Emitter, dst: FReg, src: FReg) {
        // movddup xmm, xmm: F2 0F 12 /r
        self.sse(e, 0xF2, 0x12, dst.0, src.0);
    }

    fn vadd(&self, e: &mut Emitter, dst: FReg, src: FReg) {
        // addpd: 66 0F 58
        self.sse(e, 0x66, 0x58, dst.0, src.0);
    }

    fn vmul(&self, e: &mut Emitter, dst: FReg, src: FReg) {
        self.sse(e, 0x66, 0x59, dst.0, src.0);
    }

    fn vfma(&self, e: &mut Emitter, dst: FReg, a: FReg, b: FReg) {
        // vfmadd231pd xmm_dst, xmm_a, xmm_b:
        // VEX.DDS.128.66.0F38.W1 B8 /r  (three-byte VEX)
        let r = dst.0;
        let x = 0u8;
        let bb = b.0;
        e.text.push_u8(0xC4);
        e.text
            .push_u8((((!r >> 3) & 1) << 7) | (((!x >> 3) & 1) << 6) | (((!bb >> 3) & 1) << 5) | 0x02);
        e.text.push_u8(0x80 | (((!a.0) & 0xF) << 3) | 0x01); // W=1, vvvv=~a, L=0, pp=01
        e.text.push_u8(0xB8);
        e.text.push_u8(modrm(3, r, bb));
    }

    // ---- frames and startup -------------------------------------------

    fn prologue(&self, e: &mut Emitter, n_slots: u32) {
        // push rbp ; mov rbp, rsp ; sub rsp, frame
        e.text.push_u8(0x55);
        e.text.push_bytes(&[0x48, 0x89, 0xE5]);
        let frame = (n_slots * 8 + 15) & !15;
        if frame > 0 {
            self.add_ri(e, self.sp(), -(frame as i32));
        }
    }

    fn epilogue(&self, e: &mut Emitter, _n_slots: u32) {
        // leave = mov rsp, rbp ; pop rbp
        e.text.push_u8(0xC9);
    }

    fn cpu_probe(&self, e: &mut Emitter) {
        // Returns 1 in rax when FMA3 is available (CPUID.1:ECX bit 12).
        // rbx is clobbered by CPUID and must survive.
        e.text.push_u8(0x53); // push rbx
        e.text.push_bytes(&[0xB8, 0x01, 0x00, 0x00, 0x00]); // mov eax, 1
        e.text.push_bytes(&[0x0F, 0xA2]); // cpuid
        e.text.push_bytes(&[0xF7, 0xC1, 0x00, 0x10, 0x00, 0x00]); // test ecx, 1<<12
        e.text.push_bytes(&[0xB8, 0x00, 0x00, 0x00, 0x00]); // mov eax, 0
        e.text.push_bytes(&[0x0F, 0x95, 0xC0]); // setnz al
        e.text.push_u8(0x5B); // pop rbx
    }

    // ---- patch resolution ---------------------------------------------

    fn apply_patch(&self, text: &mut [u8], patch: &Patch, target_off: usize) -> Result<()> {
        match patch.kind {
            PatchKind::Rel32 => {
                let disp = target_off as i64 - (patch.at as i64 + 4);
                let disp32 = i32::try_from(disp).map_err(|_| CodeGenError::BranchOutOfRange {
                    target: patch.target.clone(),
                    isa: "x86_64",
                    displacement: disp,
                })?;
                text[patch.at..patch.at + 4].copy_from_slice(&disp32.to_le_bytes());
                Ok(())
            }
            other => Err(CodeGenError::Internal(format!(
                "patch kind {:?} cannot appear in x86-64 text",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emit(f: impl FnOnce(&X86_64, &mut Emitter)) -> Vec<u8> {
        let isa = X86_64;
        let mut e = Emitter::new();
        f(&isa, &mut e);
        e.text.into_vec()
    }

    #[test]
    fn test_mov_rr_encoding() {
        // mov rdi, rax = 48 89 C7
        let bytes = emit(|isa, e| isa.mov_rr(e, isa.arg(0), isa.ret()));
        assert_eq!(bytes, vec![0x48, 0x89, 0xC7]);
    }

    #[test]
    fn test_zero_idiom() {
        // xor eax, eax = 31 C0 (no REX needed)
        let bytes = emit(|isa, e| isa.zero(e, isa.ret()));
        assert_eq!(bytes, vec![0x31, 0xC0]);
    }

    #[test]
    fn test_mov_ri_small_uses_imm32() {
        // mov rax, 60 = 48 C7 C0 3C 00 00 00
        let bytes = emit(|isa, e| isa.mov_ri(e, isa.ret(), 60));
        assert_eq!(bytes, vec![0x48, 0xC7, 0xC0, 0x3C, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_mov_ri_large_uses_movabs() {
        let bytes = emit(|isa, e| isa.mov_ri(e, isa.ret(), 0x1_0000_0000));
        assert_eq!(bytes[0], 0x48);
        assert_eq!(bytes[1], 0xB8);
        assert_eq!(bytes.len(), 10);
    }

    #[test]
    fn test_add_ri_prefers_imm8() {
        // sub rsp, 16 => add rsp, -16 = 48 83 C4 F0
        let bytes = emit(|isa, e| isa.add_ri(e, isa.sp(), -16));
        assert_eq!(bytes, vec![0x48, 0x83, 0xC4, 0xF0]);
    }

    #[test]
    fn test_syscall_loads_number_then_traps() {
        // exit(...) on linux-x86_64: mov rax, 60 ; syscall
        let bytes = emit(|isa, e| isa.syscall(e, 60, 1, false));
        assert_eq!(
            bytes,
            vec![0x48, 0xC7, 0xC0, 0x3C, 0x00, 0x00, 0x00, 0x0F, 0x05]
        );
    }

    #[test]
    fn test_store_rbp_disp8() {
        // mov [rbp-8], rax = 48 89 45 F8
        let bytes = emit(|isa, e| isa.store(e, isa.fp(), -8, isa.ret()));
        assert_eq!(bytes, vec![0x48, 0x89, 0x45, 0xF8]);
    }

    #[test]
    fn test_rsp_base_needs_sib() {
        // mov rax, [rsp+8] = 48 8B 44 24 08
        let bytes = emit(|isa, e| isa.load(e, isa.ret(), isa.sp(), 8));
        assert_eq!(bytes, vec![0x48, 0x8B, 0x44, 0x24, 0x08]);
    }

    #[test]
    fn test_call_label_records_patch() {
        let isa = X86_64;
        let mut e = Emitter::new();
        isa.call_label(&mut e, "f");
        assert_eq!(e.patches.len(), 1);
        assert_eq!(e.patches[0].kind, PatchKind::Rel32);
        assert_eq!(e.patches[0].at, 1);
    }

    #[test]
    fn test_rel32_patch_resolution() {
        let isa = X86_64;
        let mut e = Emitter::new();
        isa.jmp(&mut e, "target"); // 5 bytes: E9 + disp at 1
        e.define_label("target").unwrap();
        let patch = e.patches[0].clone();
        isa.apply_patch(e.text.as_mut_slice(), &patch, 5).unwrap();
        assert_eq!(&e.text.as_slice()[1..5], &0i32.to_le_bytes());
    }

    #[test]
    fn test_fadd_encoding() {
        // addsd xmm0, xmm1 = F2 0F 58 C1
        let bytes = emit(|isa, e| isa.fadd(e, FReg(0), FReg(1)));
        assert_eq!(bytes, vec![0xF2, 0x0F, 0x58, 0xC1]);
    }

    #[test]
    fn test_movq_round_trip_encodings() {
        // movq xmm0, rax = 66 48 0F 6E C0 ; movq rax, xmm0 = 66 48 0F 7E C0
        let to_f = emit(|isa, e| isa.mov_fr(e, FReg(0), isa.ret()));
        assert_eq!(to_f, vec![0x66, 0x48, 0x0F, 0x6E, 0xC0]);
        let to_r = emit(|isa, e| isa.mov_rf(e, isa.ret(), FReg(0)));
        assert_eq!(to_r, vec![0x66, 0x48, 0x0F, 0x7E, 0xC0]);
    }

    #[test]
    fn test_lea_section_records_reloc() {
        let isa = X86_64;
        let mut e = Emitter::new();
        isa.lea_section(&mut e, isa.ret(), Section::Rodata, 0x40);
        assert!(matches!(
            e.relocs[0],
            Reloc::X86PcRel {
                section: Section::Rodata,
                addend: 0x40,
                ..
            }
        ));
    }
}

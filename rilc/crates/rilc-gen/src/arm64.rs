//! ARM64 backend (AAPCS64).
//!
//! Fixed-width 32-bit little-endian instruction words, encodings per the
//! Arm ARM (DDI 0487). The abstract register index is the physical Xn
//! number: x0 return, x0-x7 arguments, x9-x14 scratch, x15 closure
//! environment, x16 (ip0) is reserved as the backend's own materializing
//! temp, x29/x30 frame/link, sp.
//!
//! The stack pointer must stay 16-byte aligned at every access, so
//! push/pop move sp in 16-byte strides.

use crate::backend::{Cond, FReg, Isa, Reg};
use crate::emit::{Emitter, Patch, PatchKind, Reloc, Section};
use crate::error::{CodeGenError, Result};
use crate::target::Arch;

pub struct Arm64;

const SP: u8 = 31;
const XZR: u8 = 31;
const IP0: u8 = 16;
const FP: u8 = 29;
const LR: u8 = 30;

impl Arm64 {
    fn ins(&self, e: &mut Emitter, word: u32) {
        e.text.push_u32(word);
    }

    fn cond_code(cond: Cond) -> u32 {
        match cond {
            Cond::Eq => 0b0000,
            Cond::Ne => 0b0001,
            Cond::Lt => 0b1011,
            Cond::Le => 0b1101,
            Cond::Gt => 0b1100,
            Cond::Ge => 0b1010,
        }
    }

    /// Condition codes valid after FCMP: unordered operands must fail
    /// every ordered test.
    fn fcond_code(cond: Cond) -> u32 {
        match cond {
            Cond::Eq => 0b0000, // eq
            Cond::Ne => 0b0001, // ne
            Cond::Lt => 0b0100, // mi
            Cond::Le => 0b1001, // ls
            Cond::Gt => 0b1100, // gt
            Cond::Ge => 0b1010, // ge
        }
    }

    fn cmp(&self, e: &mut Emitter, a: Reg, b: Reg) {
        // subs xzr, a, b
        self.ins(
            e,
            0xEB00_0000 | ((b.0 as u32) << 16) | ((a.0 as u32) << 5) | XZR as u32,
        );
    }

    fn bcond(&self, e: &mut Emitter, cc: u32, label: &str) {
        let at = e.text.offset();
        self.ins(e, 0x5400_0000 | cc);
        e.add_patch(at, label, PatchKind::B19);
    }

    fn cset(&self, e: &mut Emitter, dst: Reg, cc: u32) {
        // cset xd, cond == csinc xd, xzr, xzr, !cond
        let inv = cc ^ 1;
        self.ins(
            e,
            0x9A9F_07E0 | (inv << 12) | dst.0 as u32,
        );
    }

    /// Materialize `off` into ip0 and return it as a base register with
    /// offset folded to zero; used when a displacement exceeds the
    /// addressing form's range.
    fn address_in_ip0(&self, e: &mut Emitter, base: Reg, off: i32) {
        self.mov_ri(e, Reg(IP0), off as i64);
        // add ip0, base, ip0
        self.ins(
            e,
            0x8B00_0000 | ((IP0 as u32) << 16) | ((base.0 as u32) << 5) | IP0 as u32,
        );
    }

    /// LDR/STR-class access with the best-fitting addressing mode.
    /// `scaled_op` is the unsigned-offset opcode (scale 8), `unscaled_op`
    /// the LDUR/STUR form.
    fn mem8(
        &self,
        e: &mut Emitter,
        scaled_op: u32,
        unscaled_op: u32,
        rt: u8,
        base: Reg,
        off: i32,
    ) {
        if off >= 0 && off % 8 == 0 && off / 8 <= 0xFFF {
            let imm12 = (off / 8) as u32;
            self.ins(
                e,
                scaled_op | (imm12 << 10) | ((base.0 as u32) << 5) | rt as u32,
            );
        } else if (-256..=255).contains(&off) {
            let imm9 = (off as u32) & 0x1FF;
            self.ins(
                e,
                unscaled_op | (imm9 << 12) | ((base.0 as u32) << 5) | rt as u32,
            );
        } else {
            self.address_in_ip0(e, base, off);
            self.ins(e, scaled_op | ((IP0 as u32) << 5) | rt as u32);
        }
    }
}

impl Isa for Arm64 {
    fn arch(&self) -> Arch {
        Arch::Arm64
    }

    fn ret(&self) -> Reg {
        Reg(0)
    }

    fn arg(&self, i: usize) -> Reg {
        Reg(i as u8)
    }

    fn n_arg_regs(&self) -> usize {
        8
    }

    fn scratch(&self, i: usize) -> Reg {
        Reg(9 + i as u8)
    }

    fn sp(&self) -> Reg {
        Reg(SP)
    }

    fn fp(&self) -> Reg {
        Reg(FP)
    }

    fn closure_reg(&self) -> Reg {
        Reg(15)
    }

    fn slot_off(&self, i: u32) -> i32 {
        -8 * (i as i32 + 1)
    }

    fn has_simd(&self) -> bool {
        true
    }

    // ---- moves --------------------------------------------------------

    fn mov_rr(&self, e: &mut Emitter, dst: Reg, src: Reg) {
        if dst == src {
            return;
        }
        if dst.0 == SP || src.0 == SP {
            // mov to/from sp is ADD #0 (orr reads xzr for r31)
            self.ins(
                e,
                0x9100_0000 | ((src.0 as u32) << 5) | dst.0 as u32,
            );
        } else {
            // orr xd, xzr, xm
            self.ins(
                e,
                0xAA00_03E0 | ((src.0 as u32) << 16) | dst.0 as u32,
            );
        }
    }

    fn mov_ri(&self, e: &mut Emitter, dst: Reg, imm: i64) {
        let u = imm as u64;
        let chunks = [
            (u & 0xFFFF) as u32,
            ((u >> 16) & 0xFFFF) as u32,
            ((u >> 32) & 0xFFFF) as u32,
            ((u >> 48) & 0xFFFF) as u32,
        ];

        // movn shortcut when the value is mostly ones
        let ones = chunks.iter().filter(|&&c| c == 0xFFFF).count();
        if imm < 0 && ones == 3 {
            let (hw, chunk) = chunks
                .iter()
                .enumerate()
                .find(|(_, &c)| c != 0xFFFF)
                .map(|(i, &c)| (i as u32, c))
                .unwrap_or((0, 0xFFFF));
            self.ins(
                e,
                0x9280_0000 | (hw << 21) | ((!chunk & 0xFFFF) << 5) | dst.0 as u32,
            );
            return;
        }

        // movz of the first chunk, movk for the rest
        let mut first = true;
        for (hw, &chunk) in chunks.iter().enumerate() {
            if chunk == 0 && !(first && hw == 3) {
                continue;
            }
            let op = if first { 0xD280_0000 } else { 0xF280_0000 };
            self.ins(
                e,
                op | ((hw as u32) << 21) | (chunk << 5) | dst.0 as u32,
            );
            first = false;
        }
        if first {
            // imm == 0
            self.zero(e, dst);
        }
    }

    fn zero(&self, e: &mut Emitter, dst: Reg) {
        // orr xd, xzr, xzr: the canonical zero idiom
        self.ins(e, 0xAA1F_03E0 | dst.0 as u32);
    }

    fn load(&self, e: &mut Emitter, dst: Reg, base: Reg, off: i32) {
        self.mem8(e, 0xF940_0000, 0xF840_0000, dst.0, base, off);
    }

    fn store(&self, e: &mut Emitter, base: Reg, off: i32, src: Reg) {
        self.mem8(e, 0xF900_0000, 0xF800_0000, src.0, base, off);
    }

    fn load_byte(&self, e: &mut Emitter, dst: Reg, base: Reg, off: i32) {
        if (0..=0xFFF).contains(&off) {
            // ldrb wt, [xn, #imm]
            self.ins(
                e,
                0x3940_0000 | ((off as u32) << 10) | ((base.0 as u32) << 5) | dst.0 as u32,
            );
        } else {
            self.address_in_ip0(e, base, off);
            self.ins(e, 0x3940_0000 | ((IP0 as u32) << 5) | dst.0 as u32);
        }
    }

    fn store_byte(&self, e: &mut Emitter, base: Reg, off: i32, src: Reg) {
        if (0..=0xFFF).contains(&off) {
            // strb wt, [xn, #imm]
            self.ins(
                e,
                0x3900_0000 | ((off as u32) << 10) | ((base.0 as u32) << 5) | src.0 as u32,
            );
        } else {
            self.address_in_ip0(e, base, off);
            self.ins(e, 0x3900_0000 | ((IP0 as u32) << 5) | src.0 as u32);
        }
    }

    fn mov_rf(&self, e: &mut Emitter, dst: Reg, src: FReg) {
        // fmov xd, dn
        self.ins(e, 0x9E66_0000 | ((src.0 as u32) << 5) | dst.0 as u32);
    }

    fn mov_fr(&self, e: &mut Emitter, dst: FReg, src: Reg) {
        // fmov dd, xn
        self.ins(e, 0x9E67_0000 | ((src.0 as u32) << 5) | dst.0 as u32);
    }

    fn load_f(&self, e: &mut Emitter, dst: FReg, base: Reg, off: i32) {
        self.mem8(e, 0xFD40_0000, 0xFC40_0000, dst.0, base, off);
    }

    fn store_f(&self, e: &mut Emitter, base: Reg, off: i32, src: FReg) {
        self.mem8(e, 0xFD00_0000, 0xFC00_0000, src.0, base, off);
    }

    // ---- integer ALU --------------------------------------------------

    fn add(&self, e: &mut Emitter, dst: Reg, src: Reg) {
        self.ins(
            e,
            0x8B00_0000 | ((src.0 as u32) << 16) | ((dst.0 as u32) << 5) | dst.0 as u32,
        );
    }

    fn sub(&self, e: &mut Emitter, dst: Reg, src: Reg) {
        self.ins(
            e,
            0xCB00_0000 | ((src.0 as u32) << 16) | ((dst.0 as u32) << 5) | dst.0 as u32,
        );
    }

    fn mul(&self, e: &mut Emitter, dst: Reg, src: Reg) {
        // madd xd, xd, xm, xzr
        self.ins(
            e,
            0x9B00_7C00 | ((src.0 as u32) << 16) | ((dst.0 as u32) << 5) | dst.0 as u32,
        );
    }

    fn sdiv(&self, e: &mut Emitter, dst: Reg, lhs: Reg, rhs: Reg) {
        self.ins(
            e,
            0x9AC0_0C00 | ((rhs.0 as u32) << 16) | ((lhs.0 as u32) << 5) | dst.0 as u32,
        );
    }

    fn srem(&self, e: &mut Emitter, dst: Reg, lhs: Reg, rhs: Reg) {
        // sdiv ip0, lhs, rhs ; msub dst, ip0, rhs, lhs
        self.ins(
            e,
            0x9AC0_0C00 | ((rhs.0 as u32) << 16) | ((lhs.0 as u32) << 5) | IP0 as u32,
        );
        self.ins(
            e,
            0x9B00_8000
                | ((rhs.0 as u32) << 16)
                | ((lhs.0 as u32) << 10)
                | ((IP0 as u32) << 5)
                | dst.0 as u32,
        );
    }

    fn neg(&self, e: &mut Emitter, dst: Reg) {
        // sub xd, xzr, xd
        self.ins(
            e,
            0xCB00_0000 | ((dst.0 as u32) << 16) | ((XZR as u32) << 5) | dst.0 as u32,
        );
    }

    fn not(&self, e: &mut Emitter, dst: Reg) {
        // orn xd, xzr, xd
        self.ins(
            e,
            0xAA20_03E0 | ((dst.0 as u32) << 16) | dst.0 as u32,
        );
    }

    fn and(&self, e: &mut Emitter, dst: Reg, src: Reg) {
        self.ins(
            e,
            0x8A00_0000 | ((src.0 as u32) << 16) | ((dst.0 as u32) << 5) | dst.0 as u32,
        );
    }

    fn or(&self, e: &mut Emitter, dst: Reg, src: Reg) {
        self.ins(
            e,
            0xAA00_0000 | ((src.0 as u32) << 16) | ((dst.0 as u32) << 5) | dst.0 as u32,
        );
    }

    fn xor(&self, e: &mut Emitter, dst: Reg, src: Reg) {
        self.ins(
            e,
            0xCA00_0000 | ((src.0 as u32) << 16) | ((dst.0 as u32) << 5) | dst.0 as u32,
        );
    }

    fn shl(&self, e: &mut Emitter, dst: Reg, amount: Reg) {
        // lslv
        self.ins(
            e,
            0x9AC0_2000 | ((amount.0 as u32) << 16) | ((dst.0 as u32) << 5) | dst.0 as u32,
        );
    }

    fn shr(&self, e: &mut Emitter, dst: Reg, amount: Reg) {
        // asrv
        self.ins(
            e,
            0x9AC0_2800 | ((amount.0 as u32) << 16) | ((dst.0 as u32) << 5) | dst.0 as u32,
        );
    }

    fn add_ri(&self, e: &mut Emitter, dst: Reg, imm: i32) {
        if imm == 0 {
            return;
        }
        let (op, mag) = if imm > 0 {
            (0x9100_0000u32, imm as u32)
        } else {
            (0xD100_0000u32, (-imm) as u32)
        };
        if mag <= 0xFFF {
            self.ins(
                e,
                op | (mag << 10) | ((dst.0 as u32) << 5) | dst.0 as u32,
            );
        } else {
            // ip0 carries the signed value, so a plain add suffices
            self.mov_ri(e, Reg(IP0), imm as i64);
            self.ins(
                e,
                0x8B00_0000 | ((IP0 as u32) << 16) | ((dst.0 as u32) << 5) | dst.0 as u32,
            );
        }
    }

    // ---- compare and branch -------------------------------------------

    fn jcc(&self, e: &mut Emitter, cond: Cond, a: Reg, b: Reg, label: &str) {
        self.cmp(e, a, b);
        self.bcond(e, Self::cond_code(cond), label);
    }

    fn fjcc(&self, e: &mut Emitter, cond: Cond, a: FReg, b: FReg, label: &str) {
        // fcmp da, db
        self.ins(
            e,
            0x1E60_2000 | ((b.0 as u32) << 16) | ((a.0 as u32) << 5),
        );
        self.bcond(e, Self::fcond_code(cond), label);
    }

    fn cmp_set(&self, e: &mut Emitter, cond: Cond, dst: Reg, a: Reg, b: Reg) {
        self.cmp(e, a, b);
        self.cset(e, dst, Self::cond_code(cond));
    }

    fn fcmp_set(&self, e: &mut Emitter, cond: Cond, dst: Reg, a: FReg, b: FReg) {
        self.ins(
            e,
            0x1E60_2000 | ((b.0 as u32) << 16) | ((a.0 as u32) << 5),
        );
        self.cset(e, dst, Self::fcond_code(cond));
    }

    fn jmp(&self, e: &mut Emitter, label: &str) {
        let at = e.text.offset();
        self.ins(e, 0x1400_0000);
        e.add_patch(at, label, PatchKind::Bl26);
    }

    fn jmp_reg(&self, e: &mut Emitter, target: Reg) {
        self.ins(e, 0xD61F_0000 | ((target.0 as u32) << 5));
    }

    // ---- calls and stack ----------------------------------------------

    fn call_label(&self, e: &mut Emitter, label: &str) {
        let at = e.text.offset();
        self.ins(e, 0x9400_0000);
        e.add_patch(at, label, PatchKind::Bl26);
    }

    fn call_sym(&self, e: &mut Emitter, symbol: &str) {
        // adrp ip0, got_page ; ldr ip0, [ip0, #lo12] ; blr ip0
        let adrp_at = e.text.offset();
        self.ins(e, 0x9000_0000 | IP0 as u32);
        let ldr_at = e.text.offset();
        self.ins(e, 0xF940_0000 | ((IP0 as u32) << 5) | IP0 as u32);
        e.relocs.push(Reloc::Arm64GotCall {
            adrp_at,
            ldr_at,
            symbol: symbol.to_string(),
        });
        self.ins(e, 0xD63F_0000 | ((IP0 as u32) << 5));
    }

    fn call_reg(&self, e: &mut Emitter, target: Reg) {
        self.ins(e, 0xD63F_0000 | ((target.0 as u32) << 5));
    }

    fn ret_insn(&self, e: &mut Emitter) {
        self.ins(e, 0xD65F_03C0);
    }

    fn push(&self, e: &mut Emitter, src: Reg) {
        // str xt, [sp, #-16]!
        let imm9 = (-16i32 as u32) & 0x1FF;
        self.ins(
            e,
            0xF800_0C00 | (imm9 << 12) | ((SP as u32) << 5) | src.0 as u32,
        );
    }

    fn pop(&self, e: &mut Emitter, dst: Reg) {
        // ldr xt, [sp], #16
        self.ins(
            e,
            0xF840_0400 | (16 << 12) | ((SP as u32) << 5) | dst.0 as u32,
        );
    }

    fn syscall(&self, e: &mut Emitter, nr: i64, _nargs: usize, macos_abi: bool) {
        // number in x8 (Linux) or x16 (XNU)
        let nr_reg = if macos_abi { Reg(16) } else { Reg(8) };
        self.mov_ri(e, nr_reg, nr);
        self.trap(e, macos_abi);
    }

    fn trap(&self, e: &mut Emitter, macos_abi: bool) {
        if macos_abi {
            self.ins(e, 0xD400_1001); // svc #0x80
        } else {
            self.ins(e, 0xD400_0001); // svc #0
        }
    }

    // ---- floating point -----------------------------------------------

    fn fadd(&self, e: &mut Emitter, dst: FReg, src: FReg) {
        self.ins(
            e,
            0x1E60_2800 | ((src.0 as u32) << 16) | ((dst.0 as u32) << 5) | dst.0 as u32,
        );
    }

    fn fsub(&self, e: &mut Emitter, dst: FReg, src: FReg) {
        self.ins(
            e,
            0x1E60_3800 | ((src.0 as u32) << 16) | ((dst.0 as u32) << 5) | dst.0 as u32,
        );
    }

    fn fmul(&self, e: &mut Emitter, dst: FReg, src: FReg) {
        self.ins(
            e,
            0x1E60_0800 | ((src.0 as u32) << 16) | ((dst.0 as u32) << 5) | dst.0 as u32,
        );
    }

    fn fdiv(&self, e: &mut Emitter, dst: FReg, src: FReg) {
        self.ins(
            e,
            0x1E60_1800 | ((src.0 as u32) << 16) | ((dst.0 as u32) << 5) | dst.0 as u32,
        );
    }

    fn cvt_fi(&self, e: &mut Emitter, dst: Reg, src: FReg) {
        // fcvtzs xd, dn
        self.ins(e, 0x9E78_0000 | ((src.0 as u32) << 5) | dst.0 as u32);
    }

    fn cvt_if(&self, e: &mut Emitter, dst: FReg, src: Reg) {
        // scvtf dd, xn
        self.ins(e, 0x9E62_0000 | ((src.0 as u32) << 5) | dst.0 as u32);
    }

    // ---- address materialization --------------------------------------

    fn lea_section(&self, e: &mut Emitter, dst: Reg, section: Section, off: u64) {
        let adrp_at = e.text.offset();
        self.ins(e, 0x9000_0000 | dst.0 as u32);
        let add_at = e.text.offset();
        self.ins(
            e,
            0x9100_0000 | ((dst.0 as u32) << 5) | dst.0 as u32,
        );
        e.relocs.push(Reloc::Arm64AdrpAdd {
            adrp_at,
            add_at,
            section,
            addend: off,
        });
    }

    // ---- SIMD ---------------------------------------------------------

    fn vload(&self, e: &mut Emitter, dst: FReg, base: Reg, off: i32) {
        if off >= 0 && off % 16 == 0 && off / 16 <= 0xFFF {
            // ldr qt, [xn, #imm]
            self.ins(
                e,
                0x3DC0_0000 | (((off / 16) as u32) << 10) | ((base.0 as u32) << 5) | dst.0 as u32,
            );
        } else {
            self.address_in_ip0(e, base, off);
            self.ins(e, 0x3DC0_0000 | ((IP0 as u32) << 5) | dst.0 as u32);
        }
    }

    fn vstore(&self, e: &mut Emitter, base: Reg, off: i32, src: FReg) {
        if off >= 0 && off % 16 == 0 && off / 16 <= 0xFFF {
            self.ins(
                e,
                0x3D80_0000 | (((off / 16) as u32) << 10) | ((base.0 as u32) << 5) | src.0 as u32,
            );
        } else {
            self.address_in_ip0(e, base, off);
            self.ins(e, 0x3D80_0000 | ((IP0 as u32) << 5) | src.0 as u32);
        }
    }

    fn vbroadcast(&self, e: &mut Emitter, dst: FReg, src: FReg) {
        // dup vd.2d, vn.d[0]
        self.ins(e, 0x4E08_0400 | ((src.0 as u32) << 5) | dst.0 as u32);
    }

    fn vadd(&self, e: &mut Emitter, dst: FReg, src: FReg) {
        // fadd vd.2d, vd.2d, vm.2d
        self.ins(
            e,
            0x4E60_D400 | ((src.0 as u32) << 16) | ((dst.0 as u32) << 5) | dst.0 as u32,
        );
    }

    fn vmul(&self, e: &mut Emitter, dst: FReg, src: FReg) {
        self.ins(
            e,
            0x6E60_DC00 | ((src.0 as u32) << 16) | ((dst.0 as u32) << 5) | dst.0 as u32,
        );
    }

    fn vfma(&self, e: &mut Emitter, dst: FReg, a: FReg, b: FReg) {
        // fmla vd.2d, vn.2d, vm.2d
        self.ins(
            e,
            0x4E60_CC00 | ((b.0 as u32) << 16) | ((a.0 as u32) << 5) | dst.0 as u32,
        );
    }

    // ---- frames and startup -------------------------------------------

    fn prologue(&self, e: &mut Emitter, n_slots: u32) {
        // stp x29, x30, [sp, #-16]! ; mov x29, sp ; sub sp, sp, #frame
        self.ins(e, 0xA9BF_7BFD);
        self.ins(e, 0x9100_03FD);
        let frame = (n_slots * 8 + 15) & !15;
        if frame > 0 {
            self.add_ri(e, self.sp(), -(frame as i32));
        }
    }

    fn epilogue(&self, e: &mut Emitter, _n_slots: u32) {
        // mov sp, x29 ; ldp x29, x30, [sp], #16
        self.ins(e, 0x9100_03BF);
        self.ins(e, 0xA8C1_7BFD);
    }

    fn cpu_probe(&self, e: &mut Emitter) {
        // FP/SIMD with FMA is architectural on AArch64
        self.mov_ri(e, self.ret(), 1);
    }

    // ---- patch resolution ---------------------------------------------

    fn apply_patch(&self, text: &mut [u8], patch: &Patch, target_off: usize) -> Result<()> {
        let disp = target_off as i64 - patch.at as i64;
        if disp % 4 != 0 {
            return Err(CodeGenError::Internal(format!(
                "misaligned arm64 branch target for '{}'",
                patch.target
            )));
        }
        let words = disp / 4;
        let at = patch.at;
        let insn = u32::from_le_bytes(text[at..at + 4].try_into().unwrap());

        let patched = match patch.kind {
            PatchKind::Bl26 => {
                if !(-(1 << 25)..(1 << 25)).contains(&words) {
                    return Err(CodeGenError::BranchOutOfRange {
                        target: patch.target.clone(),
                        isa: "arm64",
                        displacement: disp,
                    });
                }
                insn | ((words as u32) & 0x03FF_FFFF)
            }
            PatchKind::B19 => {
                if !(-(1 << 18)..(1 << 18)).contains(&words) {
                    return Err(CodeGenError::BranchOutOfRange {
                        target: patch.target.clone(),
                        isa: "arm64",
                        displacement: disp,
                    });
                }
                insn | (((words as u32) & 0x7_FFFF) << 5)
            }
            other => {
                return Err(CodeGenError::Internal(format!(
                    "patch kind {:?} cannot appear in arm64 text",
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

    fn emit(f: impl FnOnce(&Arm64, &mut Emitter)) -> Vec<u32> {
        let isa = Arm64;
        let mut e = Emitter::new();
        f(&isa, &mut e);
        e.text
            .as_slice()
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
            .collect()
    }

    #[test]
    fn test_mov_rr_is_orr() {
        // mov x1, x0 = orr x1, xzr, x0 = 0xAA0003E1
        let w = emit(|isa, e| isa.mov_rr(e, Reg(1), Reg(0)));
        assert_eq!(w, vec![0xAA00_03E1]);
    }

    #[test]
    fn test_movz_small() {
        // mov x0, #93 = movz x0, #93
        let w = emit(|isa, e| isa.mov_ri(e, Reg(0), 93));
        assert_eq!(w, vec![0xD280_0BA0]);
    }

    #[test]
    fn test_mov_ri_multi_chunk() {
        // 0x1_0000 needs movz hw=1
        let w = emit(|isa, e| isa.mov_ri(e, Reg(0), 0x10000));
        assert_eq!(w, vec![0xD2A0_0020]);
    }

    #[test]
    fn test_movn_minus_one() {
        // mov x3, #-1 = movn x3, #0
        let w = emit(|isa, e| isa.mov_ri(e, Reg(3), -1));
        assert_eq!(w, vec![0x9280_0003]);
    }

    #[test]
    fn test_ret_encoding() {
        let w = emit(|isa, e| isa.ret_insn(e));
        assert_eq!(w, vec![0xD65F_03C0]);
    }

    #[test]
    fn test_svc_linux_vs_macos() {
        let linux = emit(|isa, e| isa.trap(e, false));
        let mac = emit(|isa, e| isa.trap(e, true));
        assert_eq!(linux, vec![0xD400_0001]);
        assert_eq!(mac, vec![0xD400_1001]);
    }

    #[test]
    fn test_scaled_load() {
        // ldr x0, [x29, #16] would be negative-offset territory for
        // locals, but positive offsets use the scaled form
        let w = emit(|isa, e| isa.load(e, Reg(0), Reg(29), 16));
        assert_eq!(w, vec![0xF940_0BA0]);
    }

    #[test]
    fn test_negative_offset_uses_ldur() {
        // ldur x0, [x29, #-8]
        let w = emit(|isa, e| isa.load(e, Reg(0), Reg(29), -8));
        assert_eq!(w, vec![0xF85F_83A0]);
    }

    #[test]
    fn test_bl_patch_resolution() {
        let isa = Arm64;
        let mut e = Emitter::new();
        isa.call_label(&mut e, "f"); // at 0
        isa.ret_insn(&mut e);
        e.define_label("f").unwrap(); // offset 8
        let patch = e.patches[0].clone();
        isa.apply_patch(e.text.as_mut_slice(), &patch, 8).unwrap();
        let insn = u32::from_le_bytes(e.text.as_slice()[0..4].try_into().unwrap());
        assert_eq!(insn, 0x9400_0002); // bl +2 words
    }

    #[test]
    fn test_b19_range_rejected() {
        let isa = Arm64;
        let mut e = Emitter::new();
        let mut text = vec![0u8; 8];
        e.add_patch(0, "far", PatchKind::B19);
        let patch = e.patches[0].clone();
        let far = (1usize << 21) * 4;
        assert!(matches!(
            isa.apply_patch(&mut text, &patch, far),
            Err(CodeGenError::BranchOutOfRange { .. })
        ));
    }

    #[test]
    fn test_prologue_epilogue_pair() {
        let w = emit(|isa, e| {
            isa.prologue(e, 2);
            isa.epilogue(e, 2);
        });
        assert_eq!(w[0], 0xA9BF_7BFD); // stp x29, x30, [sp, #-16]!
        assert_eq!(w[1], 0x9100_03FD); // mov x29, sp
        assert_eq!(w[2], 0xD100_43FF); // sub sp, sp, #16
        assert_eq!(w[3], 0x9100_03BF); // mov sp, x29
        assert_eq!(w[4], 0xA8C1_7BFD); // ldp x29, x30, [sp], #16
    }

    #[test]
    fn test_fadd_encoding() {
        // fadd d0, d0, d1
        let w = emit(|isa, e| isa.fadd(e, FReg(0), FReg(1)));
        assert_eq!(w, vec![0x1E61_2800]);
    }
}

//! Embedded runtime helpers.
//!
//! The emitted program has no runtime library: everything it needs at run
//! time (number printing, the bump allocator behind the meta-arena,
//! channels, membership tests, ...) is machine code emitted here, through
//! the same backend interface the code generator uses, so every ISA gets
//! each helper from a single definition.
//!
//! Helpers follow the internal calling convention: arguments in the ABI
//! argument registers, result bits in the return register, everything
//! caller-saved. On syscall targets the helpers talk to the kernel
//! directly; on PE they go through imported C/Win32 functions with
//! Microsoft x64 argument staging.
//!
//! Emission is demand-driven: the generator's closure walk asks for a
//! helper only when something reachable references it, which is what
//! keeps a print-free program free of print-runtime bytes.

use crate::backend::{Cond, FReg, Isa, Reg};
use crate::emit::{Emitter, Section};
use crate::error::{CodeGenError, Result};
use crate::target::{Os, Sys, Target};

/// Canonical NaN with the runtime's error payload.
pub const ERR_SENTINEL: u64 = 0x7FF8_0000_0052_494C;

/// Bit pattern of 1.0 (the true-value).
pub const ONE_BITS: i64 = 0x3FF0_0000_0000_0000;

/// Fixed data-segment slots the helpers share.
#[derive(Clone, Copy, Debug)]
pub struct RuntimeData {
    /// 40-byte scratch buffer for number formatting
    pub numbuf: u64,
    /// Meta-arena: current index + 16 descriptors {base, cap, used}
    pub meta_arena: u64,
    /// CPU feature mask stored by the startup probe
    pub cpu_flags: u64,
    /// struct timespec {0, 1ms} for the channel wait loop
    pub timespec: u64,
}

pub const META_ARENA_SLOTS: usize = 16;
pub const ARENA_DEFAULT_CAP: i64 = 1 << 20;
pub const CHAN_CAPACITY: i64 = 64;

impl RuntimeData {
    pub fn reserve(e: &mut Emitter) -> Self {
        // All slots start zeroed so a program using none of them keeps a
        // zero data image (which the writers turn into pure BSS); the
        // timespec is filled at the first wait.
        let numbuf = e.data_reserve(40, 8);
        let meta_arena = e.data_reserve(8 + META_ARENA_SLOTS * 24, 8);
        let cpu_flags = e.data_reserve(8, 8);
        let timespec = e.data_reserve(16, 8);
        Self {
            numbuf,
            meta_arena,
            cpu_flags,
            timespec,
        }
    }
}

/// Microsoft x64 argument register for external calls on PE targets;
/// the SysV mapping everywhere else.
pub fn ext_arg(isa: &dyn Isa, target: &Target, i: usize) -> Reg {
    if target.os == Os::Windows {
        // rcx, rdx, r8, r9 in the abstract x86-64 map
        const MS: [u8; 4] = [4, 3, 5, 6];
        Reg(MS[i])
    } else {
        isa.arg(i)
    }
}

/// Emit the helper named `name`. Returns false when the name is not a
/// runtime helper.
pub fn emit_helper(
    name: &str,
    e: &mut Emitter,
    isa: &dyn Isa,
    target: &Target,
    data: &RuntimeData,
) -> Result<bool> {
    match name {
        "ril_write_i64" => write_i64(e, isa, target, data),
        "ril_write_ch" => write_ch(e, isa, target, data),
        "ril_print_num" => print_num(e, isa, target, data),
        "ril_print_str" => print_str(e, isa, target, data),
        "ril_pow" => pow(e, isa, target),
        "ril_in_list" => in_list(e, isa, target),
        "ril_concat" => concat_str(e, isa, target),
        "ril_list_concat" => concat_list(e, isa, target),
        "ril_arena_init" => arena_init(e, isa, target, data),
        "ril_arena_alloc" => arena_alloc(e, isa, target, data),
        "ril_arena_push" => arena_push(e, isa, target, data),
        "ril_arena_pop" => arena_pop(e, isa, target, data),
        "ril_chan_new" => chan_new(e, isa, target),
        "ril_chan_send" => chan_send(e, isa, target, data),
        "ril_chan_recv" => chan_recv(e, isa, target, data),
        "ril_chan_close" => chan_close(e, isa, target),
        "ril_map_get" => map_get(e, isa, target),
        "ril_cpu_init" => cpu_init(e, isa, target, data),
        _ => return Ok(false),
    }?;
    Ok(true)
}

fn macos(target: &Target) -> bool {
    target.os == Os::Macos
}

fn sys(target: &Target, which: Sys) -> Result<i64> {
    target
        .syscall_nr(which)
        .ok_or_else(|| CodeGenError::UnsupportedForTarget {
            message: format!("syscall {:?} unavailable", which),
            target: target.to_string(),
        })
}

/// write(1, ptr, len) with ptr/len already staged in arg(1)/arg(2).
fn emit_write(e: &mut Emitter, isa: &dyn Isa, target: &Target) -> Result<()> {
    isa.mov_ri(e, isa.arg(0), 1);
    isa.syscall(e, sys(target, Sys::Write)?, 3, macos(target));
    Ok(())
}

// =============================================================================
// NUMBER AND STRING OUTPUT
// =============================================================================

/// ril_write_i64(n): decimal digits of n to stdout, no newline.
fn write_i64(e: &mut Emitter, isa: &dyn Isa, target: &Target, data: &RuntimeData) -> Result<()> {
    e.define_label("ril_write_i64")?;
    let v = isa.arg(0);
    let ten = isa.arg(3);
    let ptr = isa.arg(4);
    let negf = isa.arg(5);
    let digit = isa.scratch(0);
    let tmp = isa.scratch(1);

    isa.mov_ri(e, ten, 10);
    isa.lea_section(e, ptr, Section::Data, data.numbuf);
    isa.add_ri(e, ptr, 40);
    isa.zero(e, negf);

    isa.zero(e, tmp);
    isa.jcc(e, Cond::Ge, v, tmp, "wi64_abs");
    isa.mov_ri(e, negf, 1);
    isa.neg(e, v);
    e.define_label("wi64_abs")?;

    e.define_label("wi64_loop")?;
    isa.srem(e, digit, v, ten);
    isa.add_ri(e, digit, b'0' as i32);
    isa.add_ri(e, ptr, -1);
    isa.store_byte(e, ptr, 0, digit);
    isa.sdiv(e, v, v, ten);
    isa.zero(e, tmp);
    isa.jcc(e, Cond::Ne, v, tmp, "wi64_loop");

    isa.zero(e, tmp);
    isa.jcc(e, Cond::Eq, negf, tmp, "wi64_out");
    isa.mov_ri(e, digit, b'-' as i64);
    isa.add_ri(e, ptr, -1);
    isa.store_byte(e, ptr, 0, digit);

    e.define_label("wi64_out")?;
    // len = buf_end - ptr
    isa.lea_section(e, tmp, Section::Data, data.numbuf);
    isa.add_ri(e, tmp, 40);
    isa.sub(e, tmp, ptr);
    isa.mov_rr(e, isa.arg(2), tmp);
    isa.mov_rr(e, isa.arg(1), ptr);
    emit_write(e, isa, target)?;
    isa.ret_insn(e);
    Ok(())
}

/// ril_write_ch(c): one byte to stdout.
fn write_ch(e: &mut Emitter, isa: &dyn Isa, target: &Target, data: &RuntimeData) -> Result<()> {
    e.define_label("ril_write_ch")?;
    let buf = isa.scratch(0);
    isa.lea_section(e, buf, Section::Data, data.numbuf);
    isa.store_byte(e, buf, 0, isa.arg(0));
    isa.mov_rr(e, isa.arg(1), buf);
    isa.mov_ri(e, isa.arg(2), 1);
    emit_write(e, isa, target)?;
    isa.ret_insn(e);
    Ok(())
}

/// ril_print_num(bits): integral values print as integers, others with
/// six fractional digits; NaN prints "nan". Trailing newline included.
fn print_num(e: &mut Emitter, isa: &dyn Isa, target: &Target, data: &RuntimeData) -> Result<()> {
    e.define_label("ril_print_num")?;

    if target.os == Os::Windows {
        // printf("%g\n", v): value duplicated in xmm1 per varargs ABI
        let fmt = e.rodata_bytes(b"%g\n\0", 1);
        let rcx = ext_arg(isa, target, 0);
        let rdx = ext_arg(isa, target, 1);
        isa.mov_rr(e, rdx, isa.arg(0));
        isa.mov_fr(e, FReg(1), rdx);
        isa.lea_section(e, rcx, Section::Rodata, fmt);
        isa.call_sym(e, "printf");
        isa.ret_insn(e);
        return Ok(());
    }

    let vbits = isa.arg(0);
    let ipart = isa.arg(5);
    let tmp = isa.scratch(0);
    let f0 = FReg(0);
    let f1 = FReg(1);
    let f2 = FReg(2);

    isa.mov_fr(e, f0, vbits);
    isa.fjcc(e, Cond::Ne, f0, f0, "pnum_nan");

    isa.cvt_fi(e, ipart, f0);
    isa.cvt_if(e, f1, ipart);
    isa.fjcc(e, Cond::Ne, f0, f1, "pnum_frac");

    // integral path
    isa.mov_rr(e, isa.arg(0), ipart);
    isa.call_label(e, "ril_write_i64");
    isa.mov_ri(e, isa.arg(0), b'\n' as i64);
    isa.call_label(e, "ril_write_ch");
    isa.ret_insn(e);

    // fractional path
    e.define_label("pnum_frac")?;
    isa.zero(e, tmp);
    isa.cvt_if(e, f2, tmp); // 0.0
    isa.fjcc(e, Cond::Ge, f0, f2, "pnum_pos");
    // negative: print '-' and negate (0 - v)
    isa.mov_ri(e, isa.arg(0), b'-' as i64);
    isa.call_label(e, "ril_write_ch");
    isa.zero(e, tmp);
    isa.cvt_if(e, f2, tmp);
    isa.fsub(e, f2, f0);
    isa.mov_rf(e, tmp, f2);
    isa.mov_fr(e, f0, tmp);

    e.define_label("pnum_pos")?;
    isa.cvt_fi(e, ipart, f0);
    isa.cvt_if(e, f1, ipart);
    isa.fsub(e, f0, f1); // f0 = fraction
    isa.mov_rr(e, isa.arg(0), ipart);
    isa.call_label(e, "ril_write_i64");
    isa.mov_ri(e, isa.arg(0), b'.' as i64);
    isa.call_label(e, "ril_write_ch");

    // six digits, unrolled; each step: f0 *= 10, emit trunc, subtract
    let ten_off = e.float_const(10.0);
    for _ in 0..6 {
        isa.lea_section(e, tmp, Section::Rodata, ten_off);
        isa.load_f(e, f1, tmp, 0);
        isa.fmul(e, f0, f1);
        isa.cvt_fi(e, ipart, f0);
        isa.cvt_if(e, f1, ipart);
        isa.fsub(e, f0, f1);
        isa.mov_rr(e, isa.arg(0), ipart);
        isa.add_ri(e, isa.arg(0), b'0' as i32);
        isa.call_label(e, "ril_write_ch");
    }
    isa.mov_ri(e, isa.arg(0), b'\n' as i64);
    isa.call_label(e, "ril_write_ch");
    isa.ret_insn(e);

    e.define_label("pnum_nan")?;
    for ch in [b'n', b'a', b'n', b'\n'] {
        isa.mov_ri(e, isa.arg(0), ch as i64);
        isa.call_label(e, "ril_write_ch");
    }
    isa.ret_insn(e);
    Ok(())
}

/// ril_print_str(p): the string object's bytes plus a newline.
fn print_str(e: &mut Emitter, isa: &dyn Isa, target: &Target, _data: &RuntimeData) -> Result<()> {
    e.define_label("ril_print_str")?;

    if target.os == Os::Windows {
        let fmt = e.rodata_bytes(b"%s\n\0", 1);
        let rcx = ext_arg(isa, target, 0);
        let rdx = ext_arg(isa, target, 1);
        isa.mov_rr(e, rdx, isa.arg(0));
        isa.add_ri(e, rdx, 8);
        isa.lea_section(e, rcx, Section::Rodata, fmt);
        isa.call_sym(e, "printf");
        isa.ret_insn(e);
        return Ok(());
    }

    let p = isa.arg(0);
    let tmp = isa.scratch(0);
    // null pointer guard: print just the newline
    isa.zero(e, tmp);
    isa.jcc(e, Cond::Eq, p, tmp, "pstr_nl");

    isa.load(e, isa.arg(2), p, 0); // len
    isa.mov_rr(e, isa.arg(1), p);
    isa.add_ri(e, isa.arg(1), 8);
    emit_write(e, isa, target)?;
    e.define_label("pstr_nl")?;
    isa.mov_ri(e, isa.arg(0), b'\n' as i64);
    isa.call_label(e, "ril_write_ch");
    isa.ret_insn(e);
    Ok(())
}

// =============================================================================
// ARITHMETIC
// =============================================================================

/// ril_pow(a, b): a ** b by binary exponentiation. Non-integral or
/// wildly large exponents yield the error sentinel.
fn pow(e: &mut Emitter, isa: &dyn Isa, _target: &Target) -> Result<()> {
    e.define_label("ril_pow")?;
    let exp = isa.arg(5);
    let negf = isa.arg(4);
    let tmp = isa.scratch(0);
    let one = isa.scratch(1);
    let base = FReg(0);
    let fexp = FReg(1);
    let acc = FReg(2);
    let ftmp = FReg(3);

    isa.mov_fr(e, base, isa.arg(0));
    isa.mov_fr(e, fexp, isa.arg(1));

    // exponent must be integral
    isa.cvt_fi(e, exp, fexp);
    isa.cvt_if(e, ftmp, exp);
    isa.fjcc(e, Cond::Ne, fexp, ftmp, "pow_bad");

    isa.zero(e, negf);
    isa.zero(e, tmp);
    isa.jcc(e, Cond::Ge, exp, tmp, "pow_setup");
    isa.mov_ri(e, negf, 1);
    isa.neg(e, exp);

    e.define_label("pow_setup")?;
    // acc = 1.0
    isa.mov_ri(e, tmp, ONE_BITS);
    isa.mov_fr(e, acc, tmp);

    e.define_label("pow_loop")?;
    isa.zero(e, tmp);
    isa.jcc(e, Cond::Eq, exp, tmp, "pow_done");
    // odd exponent multiplies the accumulator
    isa.mov_rr(e, tmp, exp);
    isa.mov_ri(e, one, 1);
    isa.and(e, tmp, one);
    isa.zero(e, one);
    isa.jcc(e, Cond::Eq, tmp, one, "pow_even");
    isa.fmul(e, acc, base);
    e.define_label("pow_even")?;
    isa.fmul(e, base, base);
    isa.mov_ri(e, one, 1);
    isa.shr(e, exp, one);
    isa.jmp(e, "pow_loop");

    e.define_label("pow_done")?;
    isa.zero(e, tmp);
    isa.jcc(e, Cond::Eq, negf, tmp, "pow_ret");
    // negative exponent: 1/acc
    isa.mov_ri(e, tmp, ONE_BITS);
    isa.mov_fr(e, ftmp, tmp);
    isa.fdiv(e, ftmp, acc);
    isa.mov_rf(e, tmp, ftmp);
    isa.mov_fr(e, acc, tmp);

    e.define_label("pow_ret")?;
    isa.mov_rf(e, isa.ret(), acc);
    isa.ret_insn(e);

    e.define_label("pow_bad")?;
    isa.mov_ri(e, isa.ret(), ERR_SENTINEL as i64);
    isa.ret_insn(e);
    Ok(())
}

// =============================================================================
// LISTS, MAPS, MEMBERSHIP
// =============================================================================

/// ril_in_list(v, list): 1.0-bits when some element compares equal to v
/// as a double, else 0.
fn in_list(e: &mut Emitter, isa: &dyn Isa, _target: &Target) -> Result<()> {
    e.define_label("ril_in_list")?;
    let v = FReg(0);
    let elem = FReg(1);
    let list = isa.arg(1);
    let len = isa.arg(3);
    let idx = isa.arg(4);
    let cursor = isa.arg(5);
    let tmp = isa.scratch(0);

    isa.mov_fr(e, v, isa.arg(0));
    isa.zero(e, tmp);
    isa.jcc(e, Cond::Eq, list, tmp, "inl_no");

    isa.load(e, len, list, 0);
    isa.zero(e, idx);
    isa.mov_rr(e, cursor, list);
    isa.add_ri(e, cursor, 8);

    e.define_label("inl_loop")?;
    isa.jcc(e, Cond::Ge, idx, len, "inl_no");
    isa.load_f(e, elem, cursor, 0);
    isa.fjcc(e, Cond::Eq, elem, v, "inl_yes");
    isa.add_ri(e, cursor, 8);
    isa.add_ri(e, idx, 1);
    isa.jmp(e, "inl_loop");

    e.define_label("inl_yes")?;
    isa.mov_ri(e, isa.ret(), ONE_BITS);
    isa.ret_insn(e);
    e.define_label("inl_no")?;
    isa.zero(e, isa.ret());
    isa.ret_insn(e);
    Ok(())
}

/// ril_map_get(m, key): linear scan over {key, value} pairs; the key is
/// compared by 64-bit pattern. Missing keys yield the sentinel.
fn map_get(e: &mut Emitter, isa: &dyn Isa, _target: &Target) -> Result<()> {
    e.define_label("ril_map_get")?;
    let m = isa.arg(0);
    let key = isa.arg(1);
    let len = isa.arg(3);
    let idx = isa.arg(4);
    let cursor = isa.arg(5);
    let tmp = isa.scratch(0);

    isa.zero(e, tmp);
    isa.jcc(e, Cond::Eq, m, tmp, "mg_miss");
    isa.load(e, len, m, 0);
    isa.zero(e, idx);
    isa.mov_rr(e, cursor, m);
    isa.add_ri(e, cursor, 8);

    e.define_label("mg_loop")?;
    isa.jcc(e, Cond::Ge, idx, len, "mg_miss");
    isa.load(e, tmp, cursor, 0);
    isa.jcc(e, Cond::Eq, tmp, key, "mg_hit");
    isa.add_ri(e, cursor, 16);
    isa.add_ri(e, idx, 1);
    isa.jmp(e, "mg_loop");

    e.define_label("mg_hit")?;
    isa.load(e, isa.ret(), cursor, 8);
    isa.ret_insn(e);
    e.define_label("mg_miss")?;
    isa.mov_ri(e, isa.ret(), ERR_SENTINEL as i64);
    isa.ret_insn(e);
    Ok(())
}

/// ril_concat(a, b): new arena string a ++ b (NUL-terminated).
fn concat_str(e: &mut Emitter, isa: &dyn Isa, _target: &Target) -> Result<()> {
    e.define_label("ril_concat")?;
    isa.prologue(e, 4);
    let fp = isa.fp();
    let (sa, sb, sr) = (isa.slot_off(0), isa.slot_off(1), isa.slot_off(2));
    isa.store(e, fp, sa, isa.arg(0));
    isa.store(e, fp, sb, isa.arg(1));

    // size = 8 + len(a) + len(b) + 1
    let tmp = isa.scratch(0);
    let tmp2 = isa.scratch(1);
    isa.load(e, tmp, isa.arg(0), 0);
    isa.load(e, tmp2, isa.arg(1), 0);
    isa.add(e, tmp, tmp2);
    isa.add_ri(e, tmp, 9);
    isa.mov_rr(e, isa.arg(0), tmp);
    isa.call_label(e, "ril_arena_alloc");
    isa.store(e, fp, sr, isa.ret());

    // total length
    let r = isa.arg(2);
    let a = isa.arg(0);
    let b = isa.arg(1);
    isa.mov_rr(e, r, isa.ret());
    isa.load(e, a, fp, sa);
    isa.load(e, b, fp, sb);
    isa.load(e, tmp, a, 0);
    isa.load(e, tmp2, b, 0);
    isa.add(e, tmp, tmp2);
    isa.store(e, r, 0, tmp);

    // copy a's bytes then b's, then the NUL
    let src = isa.arg(3);
    let dst = isa.arg(4);
    let n = isa.arg(5);
    isa.mov_rr(e, dst, r);
    isa.add_ri(e, dst, 8);

    isa.load(e, n, a, 0);
    isa.mov_rr(e, src, a);
    isa.add_ri(e, src, 8);
    e.define_label("cst_copy_a")?;
    isa.zero(e, tmp);
    isa.jcc(e, Cond::Eq, n, tmp, "cst_copy_a_done");
    isa.load_byte(e, tmp2, src, 0);
    isa.store_byte(e, dst, 0, tmp2);
    isa.add_ri(e, src, 1);
    isa.add_ri(e, dst, 1);
    isa.add_ri(e, n, -1);
    isa.jmp(e, "cst_copy_a");
    e.define_label("cst_copy_a_done")?;

    isa.load(e, n, b, 0);
    isa.mov_rr(e, src, b);
    isa.add_ri(e, src, 8);
    e.define_label("cst_copy_b")?;
    isa.zero(e, tmp);
    isa.jcc(e, Cond::Eq, n, tmp, "cst_copy_b_done");
    isa.load_byte(e, tmp2, src, 0);
    isa.store_byte(e, dst, 0, tmp2);
    isa.add_ri(e, src, 1);
    isa.add_ri(e, dst, 1);
    isa.add_ri(e, n, -1);
    isa.jmp(e, "cst_copy_b");
    e.define_label("cst_copy_b_done")?;

    isa.zero(e, tmp);
    isa.store_byte(e, dst, 0, tmp);

    isa.load(e, isa.ret(), fp, sr);
    isa.epilogue(e, 4);
    isa.ret_insn(e);
    Ok(())
}

/// ril_list_concat(a, b): new arena list, 8-byte elements.
fn concat_list(e: &mut Emitter, isa: &dyn Isa, _target: &Target) -> Result<()> {
    e.define_label("ril_list_concat")?;
    isa.prologue(e, 4);
    let fp = isa.fp();
    let (sa, sb, sr) = (isa.slot_off(0), isa.slot_off(1), isa.slot_off(2));
    isa.store(e, fp, sa, isa.arg(0));
    isa.store(e, fp, sb, isa.arg(1));

    let tmp = isa.scratch(0);
    let tmp2 = isa.scratch(1);
    // size = 8 + 8*(len(a)+len(b))
    isa.load(e, tmp, isa.arg(0), 0);
    isa.load(e, tmp2, isa.arg(1), 0);
    isa.add(e, tmp, tmp2);
    isa.mov_ri(e, tmp2, 3);
    isa.shl(e, tmp, tmp2);
    isa.add_ri(e, tmp, 8);
    isa.mov_rr(e, isa.arg(0), tmp);
    isa.call_label(e, "ril_arena_alloc");
    isa.store(e, fp, sr, isa.ret());

    let r = isa.arg(2);
    let a = isa.arg(0);
    let b = isa.arg(1);
    isa.mov_rr(e, r, isa.ret());
    isa.load(e, a, fp, sa);
    isa.load(e, b, fp, sb);
    isa.load(e, tmp, a, 0);
    isa.load(e, tmp2, b, 0);
    isa.add(e, tmp, tmp2);
    isa.store(e, r, 0, tmp);

    let src = isa.arg(3);
    let dst = isa.arg(4);
    let n = isa.arg(5);
    isa.mov_rr(e, dst, r);
    isa.add_ri(e, dst, 8);

    for (list, head, done) in [(a, "clc_a", "clc_a_done"), (b, "clc_b", "clc_b_done")] {
        isa.load(e, n, list, 0);
        isa.mov_rr(e, src, list);
        isa.add_ri(e, src, 8);
        e.define_label(head)?;
        isa.zero(e, tmp);
        isa.jcc(e, Cond::Eq, n, tmp, done);
        isa.load(e, tmp2, src, 0);
        isa.store(e, dst, 0, tmp2);
        isa.add_ri(e, src, 8);
        isa.add_ri(e, dst, 8);
        isa.add_ri(e, n, -1);
        isa.jmp(e, head);
        e.define_label(done)?;
    }

    isa.load(e, isa.ret(), fp, sr);
    isa.epilogue(e, 4);
    isa.ret_insn(e);
    Ok(())
}

// =============================================================================
// ARENAS
// =============================================================================

/// ril_arena_init: seed descriptor 0 with the default capacity.
fn arena_init(e: &mut Emitter, isa: &dyn Isa, _target: &Target, data: &RuntimeData) -> Result<()> {
    e.define_label("ril_arena_init")?;
    let meta = isa.scratch(0);
    let tmp = isa.scratch(1);
    isa.lea_section(e, meta, Section::Data, data.meta_arena);
    isa.zero(e, tmp);
    isa.store(e, meta, 0, tmp); // current index = 0
    isa.mov_ri(e, tmp, ARENA_DEFAULT_CAP);
    isa.store(e, meta, 16, tmp); // descriptor 0 capacity
    isa.ret_insn(e);
    Ok(())
}

/// Point `desc` at the current arena descriptor.
fn current_desc(e: &mut Emitter, isa: &dyn Isa, data: &RuntimeData, desc: Reg, tmp: Reg) {
    isa.lea_section(e, desc, Section::Data, data.meta_arena);
    isa.load(e, tmp, desc, 0);
    isa.add_ri(e, desc, 8);
    let t2 = isa.scratch(1);
    isa.mov_ri(e, t2, 24);
    isa.mul(e, tmp, t2);
    isa.add(e, desc, tmp);
}

/// ril_arena_alloc(size): bump-allocate from the current arena, mapping
/// its backing pages lazily. Exhaustion returns 0 (the pointer-like
/// error value).
fn arena_alloc(e: &mut Emitter, isa: &dyn Isa, target: &Target, data: &RuntimeData) -> Result<()> {
    e.define_label("ril_arena_alloc")?;
    isa.prologue(e, 2);
    let fp = isa.fp();
    let (ssize, sdesc) = (isa.slot_off(0), isa.slot_off(1));
    isa.store(e, fp, ssize, isa.arg(0));

    let desc = isa.arg(4);
    let tmp = isa.scratch(0);
    current_desc(e, isa, data, desc, tmp);
    isa.store(e, fp, sdesc, desc);

    // lazily created capacity
    isa.load(e, tmp, desc, 8);
    isa.zero(e, isa.arg(5));
    isa.jcc(e, Cond::Ne, tmp, isa.arg(5), "aa_have_cap");
    isa.mov_ri(e, tmp, ARENA_DEFAULT_CAP);
    isa.store(e, desc, 8, tmp);
    e.define_label("aa_have_cap")?;

    // lazily mapped base
    isa.load(e, tmp, desc, 0);
    isa.zero(e, isa.arg(5));
    isa.jcc(e, Cond::Ne, tmp, isa.arg(5), "aa_have_base");

    if target.os == Os::Windows {
        // VirtualAlloc(NULL, cap, MEM_COMMIT|MEM_RESERVE, PAGE_READWRITE)
        isa.zero(e, ext_arg(isa, target, 0));
        isa.load(e, ext_arg(isa, target, 1), desc, 8);
        isa.mov_ri(e, ext_arg(isa, target, 2), 0x3000);
        isa.mov_ri(e, ext_arg(isa, target, 3), 4);
        isa.call_sym(e, "VirtualAlloc");
    } else {
        // mmap(0, cap, RW, MAP_PRIVATE|MAP_ANON, -1, 0)
        let flags = if target.os == Os::Linux { 0x22 } else { 0x1002 };
        isa.zero(e, isa.arg(0));
        isa.load(e, isa.arg(1), desc, 8);
        isa.mov_ri(e, isa.arg(2), 3);
        isa.mov_ri(e, isa.arg(3), flags);
        isa.mov_ri(e, isa.arg(4), -1);
        isa.zero(e, isa.arg(5));
        isa.syscall(e, sys(target, Sys::Mmap)?, 6, macos(target));
    }
    isa.load(e, desc, fp, sdesc);
    isa.store(e, desc, 0, isa.ret());
    isa.zero(e, tmp);
    isa.store(e, desc, 16, tmp);
    e.define_label("aa_have_base")?;

    // round the request to 8 bytes
    let size = isa.arg(0);
    let used = isa.arg(1);
    let cap = isa.arg(2);
    isa.load(e, desc, fp, sdesc);
    isa.load(e, size, fp, ssize);
    isa.add_ri(e, size, 7);
    isa.mov_ri(e, tmp, !7i64);
    isa.and(e, size, tmp);

    isa.load(e, used, desc, 16);
    isa.load(e, cap, desc, 8);
    isa.mov_rr(e, tmp, used);
    isa.add(e, tmp, size);
    isa.jcc(e, Cond::Gt, tmp, cap, "aa_oom");

    isa.store(e, desc, 16, tmp); // used += size
    isa.load(e, isa.ret(), desc, 0);
    isa.add(e, isa.ret(), used);
    isa.epilogue(e, 2);
    isa.ret_insn(e);

    e.define_label("aa_oom")?;
    isa.zero(e, isa.ret());
    isa.epilogue(e, 2);
    isa.ret_insn(e);
    Ok(())
}

/// ril_arena_push: enter a nested arena block.
fn arena_push(e: &mut Emitter, isa: &dyn Isa, _target: &Target, data: &RuntimeData) -> Result<()> {
    e.define_label("ril_arena_push")?;
    let meta = isa.scratch(0);
    let cur = isa.scratch(1);
    let tmp = isa.arg(5);
    isa.lea_section(e, meta, Section::Data, data.meta_arena);
    isa.load(e, cur, meta, 0);
    isa.mov_ri(e, tmp, META_ARENA_SLOTS as i64 - 1);
    isa.jcc(e, Cond::Ge, cur, tmp, "ap_full");
    isa.add_ri(e, cur, 1);
    isa.store(e, meta, 0, cur);
    // fresh descriptor: zero used (base stays for lazy remap after pop)
    let desc = isa.arg(4);
    current_desc(e, isa, data, desc, isa.scratch(0));
    isa.zero(e, tmp);
    isa.store(e, desc, 16, tmp);
    e.define_label("ap_full")?;
    isa.ret_insn(e);
    Ok(())
}

/// ril_arena_pop: leave an arena block, releasing its pages.
fn arena_pop(e: &mut Emitter, isa: &dyn Isa, target: &Target, data: &RuntimeData) -> Result<()> {
    e.define_label("ril_arena_pop")?;
    isa.prologue(e, 1);
    let fp = isa.fp();
    let sdesc = isa.slot_off(0);

    let desc = isa.arg(4);
    let tmp = isa.scratch(0);
    current_desc(e, isa, data, desc, tmp);
    isa.store(e, fp, sdesc, desc);

    isa.load(e, tmp, desc, 0);
    isa.zero(e, isa.arg(5));
    isa.jcc(e, Cond::Eq, tmp, isa.arg(5), "apop_unmapped");

    if target.os == Os::Windows {
        // VirtualFree(base, 0, MEM_RELEASE)
        isa.mov_rr(e, ext_arg(isa, target, 0), tmp);
        isa.zero(e, ext_arg(isa, target, 1));
        isa.mov_ri(e, ext_arg(isa, target, 2), 0x8000);
        isa.call_sym(e, "VirtualFree");
    } else {
        isa.mov_rr(e, isa.arg(0), tmp);
        isa.load(e, isa.arg(1), desc, 8);
        isa.syscall(e, sys(target, Sys::Munmap)?, 2, macos(target));
    }
    isa.load(e, desc, fp, sdesc);
    isa.zero(e, tmp);
    isa.store(e, desc, 0, tmp);

    e.define_label("apop_unmapped")?;
    // current index -= 1 (floor at 0)
    let meta = isa.arg(3);
    isa.lea_section(e, meta, Section::Data, data.meta_arena);
    isa.load(e, tmp, meta, 0);
    isa.zero(e, isa.arg(5));
    isa.jcc(e, Cond::Eq, tmp, isa.arg(5), "apop_done");
    isa.add_ri(e, tmp, -1);
    isa.store(e, meta, 0, tmp);
    e.define_label("apop_done")?;
    isa.epilogue(e, 1);
    isa.ret_insn(e);
    Ok(())
}

// =============================================================================
// CHANNELS
// =============================================================================
//
// Layout: {cap, head, tail, closed, slots[64]}. Counters grow without
// wrapping; slot index is counter & 63. Blocking uses FUTEX_WAIT on the
// low word of the counter being waited on (Linux) or a 1 ms nanosleep
// retry loop elsewhere; the buffer is MAP_SHARED so forked workers see
// the same queue.

fn chan_new(e: &mut Emitter, isa: &dyn Isa, target: &Target) -> Result<()> {
    e.define_label("ril_chan_new")?;
    if target.os == Os::Windows {
        isa.zero(e, ext_arg(isa, target, 0));
        isa.mov_ri(e, ext_arg(isa, target, 1), 4096);
        isa.mov_ri(e, ext_arg(isa, target, 2), 0x3000);
        isa.mov_ri(e, ext_arg(isa, target, 3), 4);
        isa.call_sym(e, "VirtualAlloc");
    } else {
        let flags = if target.os == Os::Linux { 0x21 } else { 0x1001 };
        isa.zero(e, isa.arg(0));
        isa.mov_ri(e, isa.arg(1), 4096);
        isa.mov_ri(e, isa.arg(2), 3);
        isa.mov_ri(e, isa.arg(3), flags);
        isa.mov_ri(e, isa.arg(4), -1);
        isa.zero(e, isa.arg(5));
        isa.syscall(e, sys(target, Sys::Mmap)?, 6, macos(target));
    }
    let tmp = isa.scratch(0);
    isa.mov_ri(e, tmp, CHAN_CAPACITY);
    isa.store(e, isa.ret(), 0, tmp);
    isa.ret_insn(e);
    Ok(())
}

/// Block until the word at `ch+off` moves past `expected`, or just back
/// off for a millisecond on targets without futex.
fn emit_chan_wait(
    e: &mut Emitter,
    isa: &dyn Isa,
    target: &Target,
    data: &RuntimeData,
    ch_slot: i32,
    off: i32,
    expected: Reg,
) -> Result<()> {
    if target.os == Os::Linux {
        // futex(addr, FUTEX_WAIT, expected, NULL)
        isa.load(e, isa.arg(0), isa.fp(), ch_slot);
        isa.add_ri(e, isa.arg(0), off);
        isa.mov_rr(e, isa.arg(2), expected);
        isa.mov_ri(e, isa.arg(1), 0);
        isa.zero(e, isa.arg(3));
        isa.syscall(e, sys(target, Sys::Futex)?, 4, false);
    } else if target.os == Os::Windows {
        isa.mov_ri(e, ext_arg(isa, target, 0), 1);
        isa.call_sym(e, "Sleep");
    } else if target.syscall_nr(Sys::Nanosleep).is_some() {
        // timespec {0, 1ms}, written fresh each wait (slots start zeroed)
        isa.lea_section(e, isa.arg(0), Section::Data, data.timespec);
        let t = isa.scratch(0);
        isa.zero(e, t);
        isa.store(e, isa.arg(0), 0, t);
        isa.mov_ri(e, t, 1_000_000);
        isa.store(e, isa.arg(0), 8, t);
        isa.zero(e, isa.arg(1));
        isa.syscall(e, sys(target, Sys::Nanosleep)?, 2, macos(target));
    }
    // otherwise: pure spin
    Ok(())
}

/// Wake any waiters parked on the word at `ch+off` (futex targets only).
fn emit_chan_wake(
    e: &mut Emitter,
    isa: &dyn Isa,
    target: &Target,
    ch_slot: i32,
    off: i32,
) -> Result<()> {
    if target.os == Os::Linux {
        // futex(addr, FUTEX_WAKE, i32::MAX, 0)
        isa.load(e, isa.arg(0), isa.fp(), ch_slot);
        isa.add_ri(e, isa.arg(0), off);
        isa.mov_ri(e, isa.arg(1), 1);
        isa.mov_ri(e, isa.arg(2), i32::MAX as i64);
        isa.zero(e, isa.arg(3));
        isa.syscall(e, sys(target, Sys::Futex)?, 4, false);
    }
    Ok(())
}

fn chan_send(e: &mut Emitter, isa: &dyn Isa, target: &Target, data: &RuntimeData) -> Result<()> {
    e.define_label("ril_chan_send")?;
    isa.prologue(e, 2);
    let fp = isa.fp();
    let (sch, sval) = (isa.slot_off(0), isa.slot_off(1));
    isa.store(e, fp, sch, isa.arg(0));
    isa.store(e, fp, sval, isa.arg(1));

    let ch = isa.arg(4);
    let head = isa.arg(3);
    let tail = isa.arg(5);
    let tmp = isa.scratch(0);

    e.define_label("cs_retry")?;
    isa.load(e, ch, fp, sch);
    // closed channels swallow the value
    isa.load(e, tmp, ch, 24);
    isa.zero(e, head);
    isa.jcc(e, Cond::Ne, tmp, head, "cs_closed");

    isa.load(e, head, ch, 8);
    isa.load(e, tail, ch, 16);
    isa.mov_rr(e, tmp, tail);
    isa.sub(e, tmp, head);
    isa.mov_ri(e, head, CHAN_CAPACITY);
    isa.jcc(e, Cond::Lt, tmp, head, "cs_put");

    // full: wait for head to advance
    isa.load(e, head, ch, 8);
    emit_chan_wait(e, isa, target, data, sch, 8, head)?;
    isa.jmp(e, "cs_retry");

    e.define_label("cs_put")?;
    // slot = ch + 32 + (tail & 63) * 8
    isa.mov_rr(e, tmp, tail);
    isa.mov_ri(e, head, CHAN_CAPACITY - 1);
    isa.and(e, tmp, head);
    isa.mov_ri(e, head, 3);
    isa.shl(e, tmp, head);
    isa.add(e, tmp, ch);
    isa.load(e, head, fp, sval);
    isa.store(e, tmp, 32, head);
    isa.add_ri(e, tail, 1);
    isa.store(e, ch, 16, tail);
    emit_chan_wake(e, isa, target, sch, 16)?;
    isa.zero(e, isa.ret());
    isa.epilogue(e, 2);
    isa.ret_insn(e);

    e.define_label("cs_closed")?;
    isa.mov_ri(e, isa.ret(), ERR_SENTINEL as i64);
    isa.epilogue(e, 2);
    isa.ret_insn(e);
    Ok(())
}

fn chan_recv(e: &mut Emitter, isa: &dyn Isa, target: &Target, data: &RuntimeData) -> Result<()> {
    e.define_label("ril_chan_recv")?;
    isa.prologue(e, 2);
    let fp = isa.fp();
    let sch = isa.slot_off(0);
    let sval = isa.slot_off(1);
    isa.store(e, fp, sch, isa.arg(0));

    let ch = isa.arg(4);
    let head = isa.arg(3);
    let tail = isa.arg(5);
    let tmp = isa.scratch(0);

    e.define_label("cr_retry")?;
    isa.load(e, ch, fp, sch);
    isa.load(e, head, ch, 8);
    isa.load(e, tail, ch, 16);
    isa.jcc(e, Cond::Lt, head, tail, "cr_take");

    // empty: a closed channel yields the sentinel
    isa.load(e, tmp, ch, 24);
    isa.zero(e, tail);
    isa.jcc(e, Cond::Ne, tmp, tail, "cr_closed");

    isa.load(e, tail, ch, 16);
    emit_chan_wait(e, isa, target, data, sch, 16, tail)?;
    isa.jmp(e, "cr_retry");

    e.define_label("cr_take")?;
    isa.mov_rr(e, tmp, head);
    isa.mov_ri(e, tail, CHAN_CAPACITY - 1);
    isa.and(e, tmp, tail);
    isa.mov_ri(e, tail, 3);
    isa.shl(e, tmp, tail);
    isa.add(e, tmp, ch);
    isa.load(e, tail, tmp, 32); // value
    isa.add_ri(e, head, 1);
    isa.store(e, ch, 8, head);
    // the wake clobbers argument registers; park the value in its own
    // slot so the channel pointer stays intact for the wake
    isa.store(e, fp, sval, tail);
    emit_chan_wake(e, isa, target, sch, 8)?;
    isa.load(e, isa.ret(), fp, sval);
    isa.epilogue(e, 2);
    isa.ret_insn(e);

    e.define_label("cr_closed")?;
    isa.mov_ri(e, isa.ret(), ERR_SENTINEL as i64);
    isa.epilogue(e, 2);
    isa.ret_insn(e);
    Ok(())
}

fn chan_close(e: &mut Emitter, isa: &dyn Isa, target: &Target) -> Result<()> {
    e.define_label("ril_chan_close")?;
    isa.prologue(e, 1);
    let fp = isa.fp();
    let sch = isa.slot_off(0);
    isa.store(e, fp, sch, isa.arg(0));
    let tmp = isa.scratch(0);
    isa.mov_ri(e, tmp, 1);
    isa.store(e, isa.arg(0), 24, tmp);
    emit_chan_wake(e, isa, target, sch, 8)?;
    emit_chan_wake(e, isa, target, sch, 16)?;
    isa.zero(e, isa.ret());
    isa.epilogue(e, 1);
    isa.ret_insn(e);
    Ok(())
}

// =============================================================================
// CPU PROBE
// =============================================================================

/// ril_cpu_init: run the probe once and store the mask.
fn cpu_init(e: &mut Emitter, isa: &dyn Isa, _target: &Target, data: &RuntimeData) -> Result<()> {
    e.define_label("ril_cpu_init")?;
    isa.cpu_probe(e);
    let tmp = isa.scratch(0);
    isa.lea_section(e, tmp, Section::Data, data.cpu_flags);
    isa.store(e, tmp, 0, isa.ret());
    isa.ret_insn(e);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::isa_for;
    use crate::target::Arch;

    fn try_emit(name: &str, arch: Arch, os: Os) -> (bool, Emitter) {
        let mut e = Emitter::new();
        let data = RuntimeData::reserve(&mut e);
        let isa = isa_for(arch);
        let target = Target::new(arch, os);
        let known = emit_helper(name, &mut e, isa.as_ref(), &target, &data).unwrap();
        (known, e)
    }

    #[test]
    fn test_unknown_helper_rejected() {
        let (known, _) = try_emit("ril_no_such_helper", Arch::X86_64, Os::Linux);
        assert!(!known);
    }

    #[test]
    fn test_all_helpers_emit_on_every_posix_arch() {
        let names = [
            "ril_write_i64",
            "ril_write_ch",
            "ril_print_num",
            "ril_print_str",
            "ril_pow",
            "ril_in_list",
            "ril_concat",
            "ril_list_concat",
            "ril_arena_init",
            "ril_arena_alloc",
            "ril_arena_push",
            "ril_arena_pop",
            "ril_chan_new",
            "ril_chan_send",
            "ril_chan_recv",
            "ril_chan_close",
            "ril_map_get",
            "ril_cpu_init",
        ];
        for arch in [Arch::X86_64, Arch::Arm64, Arch::Riscv64] {
            for name in names {
                let (known, e) = try_emit(name, arch, Os::Linux);
                assert!(known, "{} on {:?}", name, arch);
                assert!(!e.text.is_empty());
                assert!(e.label_offset(name).is_some());
            }
        }
    }

    #[test]
    fn test_print_helpers_emit_on_pe() {
        for name in ["ril_print_num", "ril_print_str"] {
            let (known, e) = try_emit(name, Arch::X86_64, Os::Windows);
            assert!(known);
            // PE printing goes through the printf import
            assert!(e.needed.is_empty()); // import recorded by relocs, not here
            assert!(e
                .relocs
                .iter()
                .any(|r| matches!(r, crate::emit::Reloc::X86GotCall { symbol, .. } if symbol == "printf")));
        }
    }

    #[test]
    fn test_sentinel_is_quiet_nan() {
        let f = f64::from_bits(ERR_SENTINEL);
        assert!(f.is_nan());
    }

    #[test]
    fn test_runtime_data_image_is_zero() {
        // a clean slate means the writers can emit the data segment as
        // BSS when nothing relocates into it
        let mut e = Emitter::new();
        let _ = RuntimeData::reserve(&mut e);
        assert!(e.data.as_slice().iter().all(|&b| b == 0));
    }
}

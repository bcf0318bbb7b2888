//! Per-ISA sub-assemblers for `unsafe` blocks.
//!
//! Each ISA variant of an unsafe block is a tiny line-oriented assembly
//! dialect sharing the normalized operand syntax:
//!
//! ```text
//! rax <- 60            load immediate
//! rdi <- rax           register move
//! rax <- [rdi + 8]     memory load
//! [rdi + 8] <- rax     memory store
//! stack <- rax         push
//! rax <- stack         pop
//! add rax, rdi         two-operand ALU (add sub mul and or xor)
//! syscall              trap (svc on arm64, ecall on riscv64)
//! ret
//! ```
//!
//! The three dialects differ in their register name tables and trap
//! mnemonic; the grammar skeleton is shared. Registers are the ISA's own
//! names (`rax`, `x0`, `a0`, ...), mapped to the backend's abstract
//! indices, so encoding goes through the same `Isa` ops as everything
//! else.

use rilc_util::Span;

use crate::backend::{Isa, Reg};
use crate::emit::Emitter;
use crate::error::{CodeGenError, Result};
use crate::target::{Arch, Target};

/// Resolve an ISA register name to its abstract index.
fn reg_for(arch: Arch, name: &str) -> Option<Reg> {
    let idx = match arch {
        Arch::X86_64 => match name {
            "rax" => 0,
            "rdi" => 1,
            "rsi" => 2,
            "rdx" => 3,
            "rcx" => 4,
            "r8" => 5,
            "r9" => 6,
            "r10" => 7,
            "r11" => 8,
            "rbx" => 9,
            "rsp" => 10,
            "rbp" => 11,
            _ => return None,
        },
        Arch::Arm64 => {
            if let Some(n) = name.strip_prefix('x') {
                let n: u8 = n.parse().ok()?;
                if n > 30 {
                    return None;
                }
                n
            } else {
                match name {
                    "sp" => 31,
                    "fp" => 29,
                    "lr" => 30,
                    _ => return None,
                }
            }
        }
        Arch::Riscv64 => match name {
            "zero" => 0,
            "ra" => 1,
            "sp" => 2,
            "s0" | "fp" => 8,
            "s1" => 9,
            "t0" => 5,
            "t1" => 6,
            "t2" => 7,
            "t3" => 28,
            "t4" => 29,
            "t5" => 30,
            "t6" => 31,
            _ => {
                let n: u8 = name.strip_prefix('a')?.parse().ok()?;
                if n > 7 {
                    return None;
                }
                10 + n
            }
        },
    };
    Some(Reg(idx))
}

fn trap_mnemonic(arch: Arch) -> &'static str {
    match arch {
        Arch::X86_64 => "syscall",
        Arch::Arm64 => "svc",
        Arch::Riscv64 => "ecall",
    }
}

fn bad(line: &str, span: Span, why: &str) -> CodeGenError {
    CodeGenError::BadAssembly {
        message: format!("{} in '{}'", why, line),
        span,
    }
}

/// A parsed memory operand `[reg + off]`.
fn parse_mem(arch: Arch, text: &str) -> Option<(Reg, i32)> {
    let inner = text.strip_prefix('[')?.strip_suffix(']')?.trim();
    if let Some((base, off)) = inner.split_once('+') {
        Some((reg_for(arch, base.trim())?, off.trim().parse().ok()?))
    } else if let Some((base, off)) = inner.split_once('-') {
        Some((reg_for(arch, base.trim())?, -off.trim().parse::<i32>().ok()?))
    } else {
        Some((reg_for(arch, inner)?, 0))
    }
}

fn parse_imm(text: &str) -> Option<i64> {
    if let Some(hex) = text.strip_prefix("0x") {
        i64::from_str_radix(hex, 16).ok()
    } else {
        text.parse().ok()
    }
}

/// Assemble one unsafe-block variant.
pub fn assemble(
    lines: &[String],
    e: &mut Emitter,
    isa: &dyn Isa,
    target: &Target,
    span: Span,
) -> Result<()> {
    let arch = isa.arch();
    for line in lines {
        assemble_line(line, e, isa, target, arch, span)?;
    }
    Ok(())
}

fn assemble_line(
    line: &str,
    e: &mut Emitter,
    isa: &dyn Isa,
    target: &Target,
    arch: Arch,
    span: Span,
) -> Result<()> {
    let text = line.trim();
    if text.is_empty() {
        return Ok(());
    }

    // Arrow forms first: dst <- src
    if let Some((dst, src)) = text.split_once("<-") {
        let dst = dst.trim();
        let src = src.trim();

        // push / pop through the implicit stack target
        if dst == "stack" {
            let r = reg_for(arch, src).ok_or_else(|| bad(line, span, "unknown register"))?;
            isa.push(e, r);
            return Ok(());
        }
        if src == "stack" {
            let r = reg_for(arch, dst).ok_or_else(|| bad(line, span, "unknown register"))?;
            isa.pop(e, r);
            return Ok(());
        }

        // store: [mem] <- reg
        if dst.starts_with('[') {
            let (base, off) =
                parse_mem(arch, dst).ok_or_else(|| bad(line, span, "bad memory operand"))?;
            let r = reg_for(arch, src).ok_or_else(|| bad(line, span, "unknown register"))?;
            isa.store(e, base, off, r);
            return Ok(());
        }

        let d = reg_for(arch, dst).ok_or_else(|| bad(line, span, "unknown register"))?;

        // load: reg <- [mem]
        if src.starts_with('[') {
            let (base, off) =
                parse_mem(arch, src).ok_or_else(|| bad(line, span, "bad memory operand"))?;
            isa.load(e, d, base, off);
            return Ok(());
        }

        // reg <- reg | reg <- imm
        if let Some(s) = reg_for(arch, src) {
            isa.mov_rr(e, d, s);
        } else if let Some(imm) = parse_imm(src) {
            isa.mov_ri(e, d, imm);
        } else {
            return Err(bad(line, span, "bad source operand"));
        }
        return Ok(());
    }

    // Mnemonic forms
    let mut parts = text.split_whitespace();
    let mnemonic = parts.next().unwrap_or_default();
    let rest: String = parts.collect::<Vec<_>>().join(" ");

    if mnemonic == trap_mnemonic(arch) {
        isa.trap(e, target.os == crate::target::Os::Macos);
        return Ok(());
    }

    match mnemonic {
        "ret" => {
            isa.ret_insn(e);
            Ok(())
        }
        "nop" => Ok(()),
        "add" | "sub" | "mul" | "and" | "or" | "xor" => {
            let (a, b) = rest
                .split_once(',')
                .ok_or_else(|| bad(line, span, "expected two operands"))?;
            let d = reg_for(arch, a.trim()).ok_or_else(|| bad(line, span, "unknown register"))?;
            let s = reg_for(arch, b.trim()).ok_or_else(|| bad(line, span, "unknown register"))?;
            match mnemonic {
                "add" => isa.add(e, d, s),
                "sub" => isa.sub(e, d, s),
                "mul" => isa.mul(e, d, s),
                "and" => isa.and(e, d, s),
                "or" => isa.or(e, d, s),
                "xor" => isa.xor(e, d, s),
                _ => unreachable!(),
            }
            Ok(())
        }
        _ => Err(bad(line, span, "unknown mnemonic")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::isa_for;
    use crate::target::Os;

    fn asm(arch: Arch, lines: &[&str]) -> Result<Vec<u8>> {
        let mut e = Emitter::new();
        let isa = isa_for(arch);
        let target = Target::new(arch, Os::Linux);
        let lines: Vec<String> = lines.iter().map(|s| s.to_string()).collect();
        assemble(&lines, &mut e, isa.as_ref(), &target, Span::DUMMY)?;
        Ok(e.text.into_vec())
    }

    #[test]
    fn test_x86_exit_sequence() {
        // rax <- 60 ; rdi <- 0 ; syscall
        let bytes = asm(Arch::X86_64, &["rax <- 60", "rdi <- 0", "syscall"]).unwrap();
        assert!(bytes.ends_with(&[0x0F, 0x05]));
    }

    #[test]
    fn test_arm64_svc() {
        let bytes = asm(Arch::Arm64, &["x8 <- 93", "x0 <- 0", "svc"]).unwrap();
        let last = u32::from_le_bytes(bytes[bytes.len() - 4..].try_into().unwrap());
        assert_eq!(last, 0xD400_0001);
    }

    #[test]
    fn test_riscv_ecall() {
        let bytes = asm(Arch::Riscv64, &["a7 <- 93", "a0 <- 0", "ecall"]).unwrap();
        let last = u32::from_le_bytes(bytes[bytes.len() - 4..].try_into().unwrap());
        assert_eq!(last, 0x0000_0073);
    }

    #[test]
    fn test_stack_forms() {
        let push = asm(Arch::X86_64, &["stack <- rax"]).unwrap();
        assert_eq!(push, vec![0x50]);
        let pop = asm(Arch::X86_64, &["rax <- stack"]).unwrap();
        assert_eq!(pop, vec![0x58]);
    }

    #[test]
    fn test_memory_forms() {
        assert!(asm(Arch::X86_64, &["rax <- [rdi + 8]"]).is_ok());
        assert!(asm(Arch::X86_64, &["[rdi + 8] <- rax"]).is_ok());
        assert!(asm(Arch::Arm64, &["x0 <- [x1 - 16]"]).is_ok());
    }

    #[test]
    fn test_alu_forms() {
        assert!(asm(Arch::Riscv64, &["add a0, a1", "xor a0, a0"]).is_ok());
    }

    #[test]
    fn test_wrong_dialect_rejected() {
        // x86 register names are not part of the arm64 dialect
        assert!(asm(Arch::Arm64, &["rax <- 1"]).is_err());
        // the trap mnemonic is per-dialect
        assert!(asm(Arch::X86_64, &["svc"]).is_err());
    }

    #[test]
    fn test_unknown_mnemonic_rejected() {
        let err = asm(Arch::X86_64, &["frobnicate rax"]);
        assert!(matches!(err, Err(CodeGenError::BadAssembly { .. })));
    }
}

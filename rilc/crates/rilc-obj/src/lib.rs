//! rilc-obj - Binary Container Writers
//!
//! ============================================================================
//! CONTAINER EMISSION OVERVIEW
//! ============================================================================
//!
//! The code generator hands over three byte buffers (text, rodata, data),
//! a relocation list, and the import table. This crate lays them out as a
//! complete executable in one of three container formats:
//!
//! - ELF64 for Linux and FreeBSD (`elf.rs`)
//! - PE32+ for Windows (`pe.rs`)
//! - Mach-O 64 for macOS, with an ad-hoc code signature (`macho.rs`)
//!
//! COMMON POST-PASS:
//! -----------------
//! Every writer follows the same sequence: decide segment layout and
//! virtual addresses, create GOT/IAT slots for the imports, apply the
//! relocation list against the final addresses (`layout.rs`), then
//! serialize headers and section bytes. Patches never appear here; they
//! were resolved inside the text buffer before emission ended.

pub mod elf;
pub mod error;
pub mod layout;
pub mod macho;
pub mod pe;

pub use elf::write_elf;
pub use error::{ObjError, Result};
pub use macho::write_macho;
pub use pe::write_pe;

use rilc_gen::{EmittedProgram, Os};

/// Serialize the program in the container its target demands.
pub fn write_executable(prog: &EmittedProgram) -> Result<Vec<u8>> {
    match prog.target.os {
        Os::Linux | Os::Freebsd => write_elf(prog),
        Os::Windows => write_pe(prog),
        Os::Macos => write_macho(prog),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rilc_par::Parser;
    use rilc_sem::Analyzer;
    use rilc_util::Handler;

    use rilc_gen::{Arch, CodeGen, GenConfig, Target};

    fn build(source: &str, triple: &str) -> Vec<u8> {
        let handler = Handler::new();
        let program = Parser::parse_source(source, &handler);
        assert!(!handler.has_errors());
        let features = Analyzer::new().analyze(&program);
        let target = Target::parse(triple).unwrap();
        let gen = CodeGen::new(target, features, GenConfig::default(), &handler).unwrap();
        let emitted = gen.compile(&program).unwrap();
        write_executable(&emitted).unwrap()
    }

    #[test]
    fn test_end_to_end_elf_static() {
        let bytes = build("42", "x86_64-linux");
        assert_eq!(&bytes[0..4], &[0x7F, b'E', b'L', b'F']);
        // minimal binary ceiling
        assert!(bytes.len() <= 25 * 1024, "{} bytes", bytes.len());
    }

    #[test]
    fn test_end_to_end_elf_hello() {
        // print runtime is syscall-based: still static, still small
        let bytes = build("println(\"Hello, World!\")", "x86_64-linux");
        assert_eq!(&bytes[0..4], &[0x7F, b'E', b'L', b'F']);
        assert!(bytes.len() <= 25 * 1024);
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("Hello, World!"));
    }

    #[test]
    fn test_end_to_end_all_elf_arches() {
        for triple in ["x86_64-linux", "arm64-linux", "riscv64-linux"] {
            let bytes = build("x := 10 + 5\nprintln(x)", triple);
            assert_eq!(&bytes[0..4], &[0x7F, b'E', b'L', b'F'], "{}", triple);
        }
    }

    #[test]
    fn test_end_to_end_pe() {
        let bytes = build("println(7)", "x86_64-windows");
        assert_eq!(&bytes[0..2], b"MZ");
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("msvcrt.dll"));
    }

    #[test]
    fn test_end_to_end_macho() {
        let bytes = build("println(7)", "arm64-macos");
        assert_eq!(
            u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            0xFEED_FACF
        );
    }

    #[test]
    fn test_macho_always_links_libsystem() {
        // even a print-free program must import something on macOS
        let bytes = build("42", "arm64-macos");
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("libSystem"));
    }

    #[test]
    fn test_jump_table_survives_container() {
        let mut arms = String::new();
        for i in 0..12 {
            arms.push_str(&format!("{} => {}\n", i, i));
        }
        let src = format!("x := 5\ny = x {{ {}~> 0 }}\nprintln(y)", arms);
        let bytes = build(&src, "x86_64-linux");
        assert_eq!(&bytes[0..4], &[0x7F, b'E', b'L', b'F']);
    }
}

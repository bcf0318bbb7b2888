//! Compile targets: architecture, OS, ABI, and system call tables.
//!
//! The code generator asks the target three kinds of question: which ISA
//! backend encodes instructions, which container the object writer
//! serializes, and how the emitted runtime talks to the OS (syscall
//! numbers on POSIX-like targets, imported C functions on PE).

use std::fmt;

/// Instruction set architecture.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Arch {
    X86_64,
    Arm64,
    Riscv64,
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arch::X86_64 => write!(f, "x86_64"),
            Arch::Arm64 => write!(f, "arm64"),
            Arch::Riscv64 => write!(f, "riscv64"),
        }
    }
}

/// Operating system / container family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Os {
    Linux,
    Freebsd,
    Windows,
    Macos,
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Os::Linux => write!(f, "linux"),
            Os::Freebsd => write!(f, "freebsd"),
            Os::Windows => write!(f, "windows"),
            Os::Macos => write!(f, "macos"),
        }
    }
}

/// A compile target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Target {
    pub arch: Arch,
    pub os: Os,
}

/// System calls the embedded runtime may issue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sys {
    Write,
    Exit,
    Mmap,
    Munmap,
    Fork,
    Wait4,
    Nanosleep,
    Futex,
}

impl Target {
    pub fn new(arch: Arch, os: Os) -> Self {
        Self { arch, os }
    }

    /// The host target.
    pub fn host() -> Self {
        let arch = if cfg!(target_arch = "aarch64") {
            Arch::Arm64
        } else if cfg!(target_arch = "riscv64") {
            Arch::Riscv64
        } else {
            Arch::X86_64
        };
        let os = if cfg!(target_os = "macos") {
            Os::Macos
        } else if cfg!(target_os = "windows") {
            Os::Windows
        } else if cfg!(target_os = "freebsd") {
            Os::Freebsd
        } else {
            Os::Linux
        };
        Self { arch, os }
    }

    /// Parse a `<arch>-<os>` triple (`x86_64-linux`, `arm64-macos`, ...).
    pub fn parse(s: &str) -> Option<Self> {
        let (arch_s, os_s) = s.split_once('-')?;
        let arch = match arch_s {
            "x86_64" | "amd64" => Arch::X86_64,
            "arm64" | "aarch64" => Arch::Arm64,
            "riscv64" => Arch::Riscv64,
            _ => return None,
        };
        let os = match os_s {
            "linux" => Os::Linux,
            "freebsd" => Os::Freebsd,
            "windows" => Os::Windows,
            "macos" | "darwin" => Os::Macos,
            _ => return None,
        };
        Some(Self { arch, os })
    }

    /// True for targets whose runtime is reached via direct syscalls.
    /// PE has no stable syscall surface; its runtime goes through
    /// imported C functions instead.
    pub fn has_syscalls(&self) -> bool {
        self.os != Os::Windows
    }

    /// True when `fork` exists (POSIX-like targets).
    pub fn has_fork(&self) -> bool {
        self.os != Os::Windows
    }

    /// Syscall number for `sys`, or `None` when the target has no such
    /// call. macOS numbers carry the BSD class in bits 24+.
    pub fn syscall_nr(&self, sys: Sys) -> Option<i64> {
        match self.os {
            Os::Linux => Some(match self.arch {
                Arch::X86_64 => match sys {
                    Sys::Write => 1,
                    Sys::Exit => 60,
                    Sys::Mmap => 9,
                    Sys::Munmap => 11,
                    Sys::Fork => 57,
                    Sys::Wait4 => 61,
                    Sys::Nanosleep => 35,
                    Sys::Futex => 202,
                },
                // The generic syscall table is shared by arm64 and
                // riscv64; neither has fork, so clone(SIGCHLD) stands in.
                Arch::Arm64 | Arch::Riscv64 => match sys {
                    Sys::Write => 64,
                    Sys::Exit => 93,
                    Sys::Mmap => 222,
                    Sys::Munmap => 215,
                    Sys::Fork => 220,
                    Sys::Wait4 => 260,
                    Sys::Nanosleep => 101,
                    Sys::Futex => 98,
                },
            }),
            Os::Freebsd => Some(match sys {
                Sys::Write => 4,
                Sys::Exit => 1,
                Sys::Mmap => 477,
                Sys::Munmap => 73,
                Sys::Fork => 2,
                Sys::Wait4 => 7,
                Sys::Nanosleep => 240,
                Sys::Futex => return None,
            }),
            Os::Macos => {
                const BSD: i64 = 0x2000000;
                Some(match sys {
                    Sys::Write => BSD + 4,
                    Sys::Exit => BSD + 1,
                    Sys::Mmap => BSD + 197,
                    Sys::Munmap => BSD + 73,
                    Sys::Fork => BSD + 2,
                    Sys::Wait4 => BSD + 7,
                    Sys::Nanosleep => return None,
                    Sys::Futex => return None,
                })
            }
            Os::Windows => None,
        }
    }

    /// True when `fork` on this target is really `clone(SIGCHLD, 0, ...)`.
    pub fn fork_is_clone(&self) -> bool {
        self.os == Os::Linux && matches!(self.arch, Arch::Arm64 | Arch::Riscv64)
    }

    /// Library providing a C symbol the emitted program imports.
    ///
    /// The oracle table is deliberately small; unknown symbols default to
    /// the C library.
    pub fn library_for(&self, symbol: &str) -> String {
        match self.os {
            Os::Windows => match symbol {
                "CreateThread" | "WaitForSingleObject" | "ExitProcess" | "VirtualAlloc" => {
                    "kernel32.dll".to_string()
                }
                s if s.starts_with("SDL_") => "SDL3.dll".to_string(),
                _ => "msvcrt.dll".to_string(),
            },
            Os::Macos => match symbol {
                s if s.starts_with("SDL_") => "libSDL3.dylib".to_string(),
                _ => "/usr/lib/libSystem.B.dylib".to_string(),
            },
            Os::Linux | Os::Freebsd => match symbol {
                s if s.starts_with("SDL_") => "libSDL3.so.0".to_string(),
                _ => "libc.so.6".to_string(),
            },
        }
    }

    /// ELF e_machine value for the target architecture.
    pub fn elf_machine(&self) -> u16 {
        match self.arch {
            Arch::X86_64 => 0x3E,
            Arch::Arm64 => 0xB7,
            Arch::Riscv64 => 0xF3,
        }
    }

    /// Mach-O cputype for the target architecture.
    pub fn macho_cputype(&self) -> Option<u32> {
        match self.arch {
            Arch::X86_64 => Some(0x0100_0007),
            Arch::Arm64 => Some(0x0100_000C),
            Arch::Riscv64 => None,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.arch, self.os)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_triples() {
        assert_eq!(
            Target::parse("x86_64-linux"),
            Some(Target::new(Arch::X86_64, Os::Linux))
        );
        assert_eq!(
            Target::parse("aarch64-darwin"),
            Some(Target::new(Arch::Arm64, Os::Macos))
        );
        assert_eq!(Target::parse("mips-linux"), None);
    }

    #[test]
    fn test_syscall_tables_differ_per_arch() {
        let x = Target::new(Arch::X86_64, Os::Linux);
        let a = Target::new(Arch::Arm64, Os::Linux);
        assert_eq!(x.syscall_nr(Sys::Write), Some(1));
        assert_eq!(a.syscall_nr(Sys::Write), Some(64));
    }

    #[test]
    fn test_macos_class_bit() {
        let t = Target::new(Arch::Arm64, Os::Macos);
        assert_eq!(t.syscall_nr(Sys::Exit), Some(0x2000001));
    }

    #[test]
    fn test_pe_has_no_syscalls() {
        let t = Target::new(Arch::X86_64, Os::Windows);
        assert!(!t.has_syscalls());
        assert_eq!(t.syscall_nr(Sys::Write), None);
        assert_eq!(t.library_for("printf"), "msvcrt.dll");
    }

    #[test]
    fn test_elf_machine_values() {
        assert_eq!(Target::new(Arch::X86_64, Os::Linux).elf_machine(), 0x3E);
        assert_eq!(Target::new(Arch::Arm64, Os::Linux).elf_machine(), 0xB7);
        assert_eq!(Target::new(Arch::Riscv64, Os::Linux).elf_machine(), 0xF3);
    }
}

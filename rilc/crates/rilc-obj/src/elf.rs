//! ELF64 executable writer.
//!
//! Two shapes, chosen by the import table:
//!
//! - **Static** (no external symbols): one R-X LOAD covering headers,
//!   rodata, and text, plus an R-W LOAD for the data image — emitted as
//!   pure BSS (filesz 0) when nothing relocated into it. No interpreter,
//!   no dynamic tables; this is the minimal-binary path.
//! - **Dynamic**: PHDR, INTERP, an R LOAD (headers + dynamic linking
//!   tables + rodata), an R-X LOAD (text), an R-W LOAD (GOT + data), and
//!   a DYNAMIC segment. Imports bind through GLOB_DAT-style relocations
//!   into the GOT, which the emitted code already calls through.
//!
//! Virtual addresses mirror file offsets from a fixed base so every
//! p_vaddr stays congruent to its p_offset modulo the page size.

use indexmap::IndexMap;

use rilc_gen::{Arch, EmittedProgram, Os};

use crate::error::{ObjError, Result};
use crate::layout::{align_up, apply_relocs, Layout};

const BASE: u64 = 0x40_0000;
const PAGE: u64 = 0x1000;

const EHDR_SIZE: u64 = 64;
const PHDR_SIZE: u64 = 56;

const PT_LOAD: u32 = 1;
const PT_DYNAMIC: u32 = 2;
const PT_INTERP: u32 = 3;
const PT_PHDR: u32 = 6;

const PF_X: u32 = 1;
const PF_W: u32 = 2;
const PF_R: u32 = 4;

// dynamic tags
const DT_NEEDED: u64 = 1;
const DT_HASH: u64 = 4;
const DT_STRTAB: u64 = 5;
const DT_SYMTAB: u64 = 6;
const DT_RELA: u64 = 7;
const DT_RELASZ: u64 = 8;
const DT_RELAENT: u64 = 9;
const DT_STRSZ: u64 = 10;
const DT_SYMENT: u64 = 11;

fn interp_for(prog: &EmittedProgram) -> &'static str {
    match (prog.target.os, prog.target.arch) {
        (Os::Freebsd, _) => "/libexec/ld-elf.so.1",
        (_, Arch::X86_64) => "/lib64/ld-linux-x86-64.so.2",
        (_, Arch::Arm64) => "/lib/ld-linux-aarch64.so.1",
        (_, Arch::Riscv64) => "/lib/ld-linux-riscv64-lp64d.so.1",
    }
}

/// GLOB_DAT-style relocation type per architecture.
fn glob_dat_type(arch: Arch) -> u32 {
    match arch {
        Arch::X86_64 => 6,    // R_X86_64_GLOB_DAT
        Arch::Arm64 => 1025,  // R_AARCH64_GLOB_DAT
        Arch::Riscv64 => 2,   // R_RISCV_64
    }
}

struct Out {
    bytes: Vec<u8>,
}

impl Out {
    fn new() -> Self {
        Self { bytes: Vec::new() }
    }
    fn u8(&mut self, v: u8) {
        self.bytes.push(v);
    }
    fn u16(&mut self, v: u16) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }
    fn u32(&mut self, v: u32) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }
    fn u64(&mut self, v: u64) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }
    fn bytes(&mut self, v: &[u8]) {
        self.bytes.extend_from_slice(v);
    }
    fn pad_to(&mut self, off: u64) {
        while (self.bytes.len() as u64) < off {
            self.bytes.push(0);
        }
    }
    fn len(&self) -> u64 {
        self.bytes.len() as u64
    }
}

struct Phdr {
    kind: u32,
    flags: u32,
    offset: u64,
    vaddr: u64,
    filesz: u64,
    memsz: u64,
    align: u64,
}

fn push_phdr(out: &mut Out, p: &Phdr) {
    out.u32(p.kind);
    out.u32(p.flags);
    out.u64(p.offset);
    out.u64(p.vaddr);
    out.u64(p.vaddr); // paddr
    out.u64(p.filesz);
    out.u64(p.memsz);
    out.u64(p.align);
}

fn push_ehdr(out: &mut Out, prog: &EmittedProgram, entry: u64, phnum: u16) {
    out.bytes(&[0x7F, b'E', b'L', b'F', 2, 1, 1, 0]); // class 64, LE, v1
    out.bytes(&[0; 8]);
    out.u16(2); // ET_EXEC
    out.u16(prog.target.elf_machine());
    out.u32(1); // EV_CURRENT
    out.u64(entry);
    out.u64(EHDR_SIZE); // e_phoff
    out.u64(0); // e_shoff
    out.u32(0); // e_flags
    out.u16(EHDR_SIZE as u16);
    out.u16(PHDR_SIZE as u16);
    out.u16(phnum);
    out.u16(0); // e_shentsize
    out.u16(0); // e_shnum
    out.u16(0); // e_shstrndx
}

/// Serialize the program as an ELF64 executable.
pub fn write_elf(prog: &EmittedProgram) -> Result<Vec<u8>> {
    for (name, buf) in [
        ("text", &prog.text),
        ("rodata", &prog.rodata),
        ("data", &prog.data),
    ] {
        if buf.len() as u64 > 0x4000_0000 {
            return Err(ObjError::OversizedSegment {
                name,
                size: buf.len(),
            });
        }
    }

    if prog.needed.is_empty() {
        write_static(prog)
    } else {
        write_dynamic(prog)
    }
}

fn data_has_image(prog: &EmittedProgram) -> bool {
    prog.data.iter().any(|&b| b != 0)
        || prog
            .relocs
            .iter()
            .any(|r| matches!(r, rilc_gen::Reloc::Abs64Text { section: rilc_gen::Section::Data, .. }))
}

fn write_static(prog: &EmittedProgram) -> Result<Vec<u8>> {
    let phnum = 2u16;
    let hdr_end = EHDR_SIZE + PHDR_SIZE * phnum as u64;
    let rodata_off = align_up(hdr_end, 16);
    let text_off = align_up(rodata_off + prog.rodata.len() as u64, 16);
    let load1_end = text_off + prog.text.len() as u64;
    let data_off = align_up(load1_end, PAGE);
    let has_image = data_has_image(prog);

    let layout = Layout {
        text_va: BASE + text_off,
        rodata_va: BASE + rodata_off,
        data_va: BASE + data_off,
        got: IndexMap::new(),
    };

    let mut text = prog.text.clone();
    let mut rodata = prog.rodata.clone();
    let mut data = prog.data.clone();
    apply_relocs(&mut text, &mut rodata, &mut data, &prog.relocs, &layout)?;

    let mut out = Out::new();
    push_ehdr(&mut out, prog, layout.text_va + prog.entry, phnum);
    push_phdr(
        &mut out,
        &Phdr {
            kind: PT_LOAD,
            flags: PF_R | PF_X,
            offset: 0,
            vaddr: BASE,
            filesz: load1_end,
            memsz: load1_end,
            align: PAGE,
        },
    );
    push_phdr(
        &mut out,
        &Phdr {
            kind: PT_LOAD,
            flags: PF_R | PF_W,
            offset: data_off,
            vaddr: BASE + data_off,
            filesz: if has_image { data.len() as u64 } else { 0 },
            memsz: data.len().max(8) as u64,
            align: PAGE,
        },
    );

    out.pad_to(rodata_off);
    out.bytes(&rodata);
    out.pad_to(text_off);
    out.bytes(&text);
    if has_image {
        out.pad_to(data_off);
        out.bytes(&data);
    }
    Ok(out.bytes)
}

fn write_dynamic(prog: &EmittedProgram) -> Result<Vec<u8>> {
    let phnum = 6u16;
    let hdr_end = EHDR_SIZE + PHDR_SIZE * phnum as u64;

    // .dynstr: NUL + library names + symbol names
    let mut dynstr: Vec<u8> = vec![0];
    let mut lib_name_offs = Vec::new();
    for lib in prog.needed.values() {
        // deduplicate library names
        if !lib_name_offs
            .iter()
            .any(|&(ref l, _): &(String, u64)| l == lib)
        {
            lib_name_offs.push((lib.clone(), dynstr.len() as u64));
            dynstr.extend_from_slice(lib.as_bytes());
            dynstr.push(0);
        }
    }
    let mut sym_name_offs = Vec::new();
    for sym in prog.needed.keys() {
        sym_name_offs.push(dynstr.len() as u64);
        dynstr.extend_from_slice(sym.as_bytes());
        dynstr.push(0);
    }

    let nsyms = prog.needed.len() as u64 + 1; // null symbol first

    let interp = interp_for(prog);
    let interp_off = hdr_end;
    let interp_size = interp.len() as u64 + 1;

    let hash_off = align_up(interp_off + interp_size, 8);
    let hash_size = 4 * (2 + 1 + nsyms); // nbucket, nchain, bucket, chains

    let dynsym_off = align_up(hash_off + hash_size, 8);
    let dynsym_size = 24 * nsyms;

    let dynstr_off = dynsym_off + dynsym_size;
    let rela_off = align_up(dynstr_off + dynstr.len() as u64, 8);
    let rela_size = 24 * prog.needed.len() as u64;

    let rodata_off = align_up(rela_off + rela_size, 16);
    let load_r_end = rodata_off + prog.rodata.len() as u64;

    let text_off = align_up(load_r_end, PAGE);
    let text_end = text_off + prog.text.len() as u64;

    let rw_off = align_up(text_end, PAGE);
    let got_off = rw_off;
    let got_size = 8 * prog.needed.len() as u64;
    let dyn_off = got_off + got_size;
    // NEEDED per lib + 8 fixed entries + NULL
    let dyn_count = lib_name_offs.len() as u64 + 9;
    let dyn_size = 16 * dyn_count;
    let data_off = align_up(dyn_off + dyn_size, 8);
    let rw_end = data_off + prog.data.len() as u64;

    let mut got = IndexMap::new();
    for (i, sym) in prog.needed.keys().enumerate() {
        got.insert(sym.clone(), BASE + got_off + 8 * i as u64);
    }
    let layout = Layout {
        text_va: BASE + text_off,
        rodata_va: BASE + rodata_off,
        data_va: BASE + data_off,
        got,
    };

    let mut text = prog.text.clone();
    let mut rodata = prog.rodata.clone();
    let mut data = prog.data.clone();
    apply_relocs(&mut text, &mut rodata, &mut data, &prog.relocs, &layout)?;

    let mut out = Out::new();
    push_ehdr(&mut out, prog, layout.text_va + prog.entry, phnum);

    push_phdr(
        &mut out,
        &Phdr {
            kind: PT_PHDR,
            flags: PF_R,
            offset: EHDR_SIZE,
            vaddr: BASE + EHDR_SIZE,
            filesz: PHDR_SIZE * phnum as u64,
            memsz: PHDR_SIZE * phnum as u64,
            align: 8,
        },
    );
    push_phdr(
        &mut out,
        &Phdr {
            kind: PT_INTERP,
            flags: PF_R,
            offset: interp_off,
            vaddr: BASE + interp_off,
            filesz: interp_size,
            memsz: interp_size,
            align: 1,
        },
    );
    push_phdr(
        &mut out,
        &Phdr {
            kind: PT_LOAD,
            flags: PF_R,
            offset: 0,
            vaddr: BASE,
            filesz: load_r_end,
            memsz: load_r_end,
            align: PAGE,
        },
    );
    push_phdr(
        &mut out,
        &Phdr {
            kind: PT_LOAD,
            flags: PF_R | PF_X,
            offset: text_off,
            vaddr: BASE + text_off,
            filesz: prog.text.len() as u64,
            memsz: prog.text.len() as u64,
            align: PAGE,
        },
    );
    push_phdr(
        &mut out,
        &Phdr {
            kind: PT_LOAD,
            flags: PF_R | PF_W,
            offset: rw_off,
            vaddr: BASE + rw_off,
            filesz: rw_end - rw_off,
            memsz: rw_end - rw_off,
            align: PAGE,
        },
    );
    push_phdr(
        &mut out,
        &Phdr {
            kind: PT_DYNAMIC,
            flags: PF_R | PF_W,
            offset: dyn_off,
            vaddr: BASE + dyn_off,
            filesz: dyn_size,
            memsz: dyn_size,
            align: 8,
        },
    );

    // INTERP
    out.pad_to(interp_off);
    out.bytes(interp.as_bytes());
    out.u8(0);

    // DT_HASH: one bucket chaining every symbol
    out.pad_to(hash_off);
    out.u32(1); // nbucket
    out.u32(nsyms as u32); // nchain
    out.u32(if nsyms > 1 { 1 } else { 0 }); // bucket 0 -> first symbol
    for i in 0..nsyms {
        let next = if i + 1 < nsyms && i > 0 { i + 1 } else { 0 };
        out.u32(next as u32);
    }

    // .dynsym
    out.pad_to(dynsym_off);
    out.bytes(&[0; 24]); // null symbol
    for &name_off in &sym_name_offs {
        out.u32(name_off as u32);
        out.u8(0x12); // GLOBAL | FUNC
        out.u8(0); // default visibility
        out.u16(0); // SHN_UNDEF
        out.u64(0); // value
        out.u64(0); // size
    }

    // .dynstr
    out.pad_to(dynstr_off);
    out.bytes(&dynstr);

    // .rela.dyn: one GLOB_DAT per GOT slot
    out.pad_to(rela_off);
    let rtype = glob_dat_type(prog.target.arch);
    for (i, _) in prog.needed.keys().enumerate() {
        out.u64(BASE + got_off + 8 * i as u64); // r_offset
        out.u64(((i as u64 + 1) << 32) | rtype as u64); // r_info
        out.u64(0); // addend
    }

    // rodata
    out.pad_to(rodata_off);
    out.bytes(&rodata);

    // text
    out.pad_to(text_off);
    out.bytes(&text);

    // GOT (zeroed; the loader fills it)
    out.pad_to(got_off);
    out.bytes(&vec![0u8; got_size as usize]);

    // DYNAMIC
    out.pad_to(dyn_off);
    let mut dyn_push = |tag: u64, val: u64, out: &mut Out| {
        out.u64(tag);
        out.u64(val);
    };
    for (_, off) in &lib_name_offs {
        dyn_push(DT_NEEDED, *off, &mut out);
    }
    dyn_push(DT_HASH, BASE + hash_off, &mut out);
    dyn_push(DT_STRTAB, BASE + dynstr_off, &mut out);
    dyn_push(DT_SYMTAB, BASE + dynsym_off, &mut out);
    dyn_push(DT_STRSZ, dynstr.len() as u64, &mut out);
    dyn_push(DT_SYMENT, 24, &mut out);
    dyn_push(DT_RELA, BASE + rela_off, &mut out);
    dyn_push(DT_RELASZ, rela_size, &mut out);
    dyn_push(DT_RELAENT, 24, &mut out);
    dyn_push(0, 0, &mut out); // DT_NULL

    // data
    out.pad_to(data_off);
    out.bytes(&data);

    Ok(out.bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rilc_gen::Target;

    fn fake_program(needed: &[(&str, &str)]) -> EmittedProgram {
        let mut needed_map = IndexMap::new();
        for (s, l) in needed {
            needed_map.insert(s.to_string(), l.to_string());
        }
        EmittedProgram {
            text: vec![0xC3; 32],
            rodata: vec![1, 2, 3, 4],
            data: vec![0; 64],
            relocs: Vec::new(),
            needed: needed_map,
            entry: 0,
            symbols: Vec::new(),
            target: Target::parse("x86_64-linux").unwrap(),
        }
    }

    #[test]
    fn test_static_elf_header() {
        let bytes = write_elf(&fake_program(&[])).unwrap();
        assert_eq!(&bytes[0..4], &[0x7F, b'E', b'L', b'F']);
        assert_eq!(bytes[4], 2); // ELFCLASS64
        assert_eq!(bytes[5], 1); // little-endian
        assert_eq!(u16::from_le_bytes([bytes[16], bytes[17]]), 2); // ET_EXEC
        assert_eq!(u16::from_le_bytes([bytes[18], bytes[19]]), 0x3E);
    }

    #[test]
    fn test_static_has_two_segments_no_interp() {
        let bytes = write_elf(&fake_program(&[])).unwrap();
        let phnum = u16::from_le_bytes([bytes[56], bytes[57]]);
        assert_eq!(phnum, 2);
        // all-zero data with no relocs collapses to BSS
        let filesz = u64::from_le_bytes(bytes[64 + 56 + 32..64 + 56 + 40].try_into().unwrap());
        assert_eq!(filesz, 0);
    }

    #[test]
    fn test_static_is_small() {
        // minimal-binary ceiling (the reference allows 25 KB)
        let bytes = write_elf(&fake_program(&[])).unwrap();
        assert!(bytes.len() < 25 * 1024, "{} bytes", bytes.len());
    }

    #[test]
    fn test_dynamic_elf_has_interp_and_dynamic() {
        let bytes = write_elf(&fake_program(&[("printf", "libc.so.6")])).unwrap();
        let phnum = u16::from_le_bytes([bytes[56], bytes[57]]);
        assert_eq!(phnum, 6);
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("ld-linux-x86-64"));
        assert!(text.contains("libc.so.6"));
        assert!(text.contains("printf"));
    }

    #[test]
    fn test_entry_points_into_text() {
        let bytes = write_elf(&fake_program(&[])).unwrap();
        let entry = u64::from_le_bytes(bytes[24..32].try_into().unwrap());
        assert!(entry >= BASE);
        assert!(entry < BASE + bytes.len() as u64 + 0x2000);
    }

    #[test]
    fn test_machine_per_arch() {
        for (triple, machine) in [
            ("x86_64-linux", 0x3Eu16),
            ("arm64-linux", 0xB7),
            ("riscv64-linux", 0xF3),
        ] {
            let mut p = fake_program(&[]);
            p.target = Target::parse(triple).unwrap();
            let bytes = write_elf(&p).unwrap();
            assert_eq!(u16::from_le_bytes([bytes[18], bytes[19]]), machine);
        }
    }
}

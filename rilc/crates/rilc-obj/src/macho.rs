//! Mach-O 64 executable writer (macOS).
//!
//! Segments: `__PAGEZERO`, `__TEXT` (header + `__text` + `__const`),
//! `__DATA` (`__got` + `__data`), `__LINKEDIT` (dyld rebase/bind info,
//! symbol table, string table, code signature). Load commands:
//! LC_SEGMENT_64 x4, LC_DYLD_INFO_ONLY, LC_SYMTAB, LC_DYSYMTAB,
//! LC_LOAD_DYLINKER, LC_UUID, LC_BUILD_VERSION, LC_MAIN, one
//! LC_LOAD_DYLIB per library, LC_CODE_SIGNATURE.
//!
//! The image is position-independent: internal data references are
//! PC-relative, imports bind through `__got` via dyld bind opcodes, and
//! the absolute jump-table/closure slots in `__data` carry rebase
//! opcodes so dyld can slide them.
//!
//! The code signature is an ad-hoc SuperBlob holding one CodeDirectory
//! whose page hashes are SHA-256 over each 4 KiB slice of the finished
//! file; they are computed and patched in after every other byte is
//! final. All signature integers are big-endian, unlike the rest of the
//! container.

use indexmap::IndexMap;
use sha2::{Digest, Sha256};

use rilc_gen::EmittedProgram;

use crate::error::{ObjError, Result};
use crate::layout::{align_up, apply_relocs, rebase_sites, Layout};

const VM_BASE: u64 = 0x1_0000_0000;
const SEG_ALIGN: u64 = 0x4000;
const SIGN_PAGE: u64 = 4096;

const MH_MAGIC_64: u32 = 0xFEED_FACF;
const MH_EXECUTE: u32 = 2;
const MH_FLAGS: u32 = 0x0020_0085; // NOUNDEFS | DYLDLINK | TWOLEVEL | PIE

const LC_SEGMENT_64: u32 = 0x19;
const LC_SYMTAB: u32 = 0x2;
const LC_DYSYMTAB: u32 = 0xB;
const LC_LOAD_DYLINKER: u32 = 0xE;
const LC_LOAD_DYLIB: u32 = 0xC;
const LC_UUID: u32 = 0x1B;
const LC_BUILD_VERSION: u32 = 0x32;
const LC_MAIN: u32 = 0x8000_0028;
const LC_DYLD_INFO_ONLY: u32 = 0x8000_0022;
const LC_CODE_SIGNATURE: u32 = 0x1D;

const VM_PROT_READ: u32 = 1;
const VM_PROT_WRITE: u32 = 2;
const VM_PROT_EXECUTE: u32 = 4;

const CSMAGIC_EMBEDDED_SIGNATURE: u32 = 0xFADE_0CC0;
const CSMAGIC_CODEDIRECTORY: u32 = 0xFADE_0C02;
const CS_ADHOC: u32 = 0x2;
const CD_VERSION: u32 = 0x20400;
const CS_EXECSEG_MAIN_BINARY: u64 = 0x1;
const SIGN_IDENT: &str = "rilc-out";

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
    fn u32(&mut self, v: u32) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }
    fn u64(&mut self, v: u64) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }
    fn be32(&mut self, v: u32) {
        self.bytes.extend_from_slice(&v.to_be_bytes());
    }
    fn bytes(&mut self, v: &[u8]) {
        self.bytes.extend_from_slice(v);
    }
    fn fixed(&mut self, s: &str) {
        let mut buf = [0u8; 16];
        buf[..s.len()].copy_from_slice(s.as_bytes());
        self.bytes(&buf);
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

fn uleb(out: &mut Vec<u8>, mut v: u64) {
    loop {
        let byte = (v & 0x7F) as u8;
        v >>= 7;
        if v == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
}

/// dyld bind opcodes for the GOT slots (segment 2 = __DATA).
fn build_bind_info(prog: &EmittedProgram, libs: &[String]) -> Vec<u8> {
    let mut blob = Vec::new();
    for (i, (sym, lib)) in prog.needed.iter().enumerate() {
        let ordinal = libs.iter().position(|l| l == lib).unwrap_or(0) as u8 + 1;
        blob.push(0x10 | (ordinal & 0x0F)); // SET_DYLIB_ORDINAL_IMM
        blob.push(0x40); // SET_SYMBOL_TRAILING_FLAGS_IMM, flags 0
        blob.extend_from_slice(format!("_{}", sym).as_bytes());
        blob.push(0);
        blob.push(0x51); // SET_TYPE_IMM pointer
        blob.push(0x72); // SET_SEGMENT_AND_OFFSET_ULEB, segment 2
        uleb(&mut blob, 8 * i as u64);
        blob.push(0x90); // DO_BIND
    }
    blob.push(0); // DONE
    blob
}

/// dyld rebase opcodes for absolute slots in __DATA.
fn build_rebase_info(prog: &EmittedProgram, got_size: u64) -> Vec<u8> {
    let sites = rebase_sites(&prog.relocs);
    if sites.is_empty() {
        return Vec::new();
    }
    let mut blob = Vec::new();
    blob.push(0x11); // SET_TYPE_IMM pointer
    for site in sites {
        blob.push(0x22); // SET_SEGMENT_AND_OFFSET_ULEB, segment 2
        uleb(&mut blob, got_size + site);
        blob.push(0x51); // DO_REBASE_IMM_TIMES, count 1
    }
    blob.push(0); // DONE
    blob
}

fn load_command_sizes(prog: &EmittedProgram, libs: &[String]) -> (u32, u32) {
    let mut size = 0u32;
    let mut count = 0u32;
    // 4 segments: pagezero (72), text (72 + 2*80), data (72 + 2*80),
    // linkedit (72)
    size += 72 + (72 + 160) + (72 + 160) + 72;
    count += 4;
    size += 48; // dyld info
    size += 24; // symtab
    size += 80; // dysymtab
    size += 32; // dylinker ("/usr/lib/dyld" padded)
    size += 24; // uuid
    size += 24; // build version
    size += 24; // main
    for lib in libs {
        size += 24 + align_up(lib.len() as u64 + 1, 8) as u32;
    }
    count += 7 + libs.len() as u32;
    size += 16; // code signature
    count += 1;
    (size, count)
}

/// Serialize the program as a Mach-O 64 executable.
pub fn write_macho(prog: &EmittedProgram) -> Result<Vec<u8>> {
    let cputype = prog
        .target
        .macho_cputype()
        .ok_or_else(|| ObjError::Unsupported("Mach-O has no RISC-V flavor".to_string()))?;
    if prog.needed.is_empty() {
        // Mach-O requires dynamic linking against at least libSystem;
        // the driver guarantees the import by construction, so this is a
        // writer-level sanity check.
        return Err(ObjError::Unsupported(
            "Mach-O requires at least libSystem".to_string(),
        ));
    }

    let mut libs: Vec<String> = Vec::new();
    for lib in prog.needed.values() {
        if !libs.contains(lib) {
            libs.push(lib.clone());
        }
    }

    let (cmds_size, ncmds) = load_command_sizes(prog, &libs);
    let header_end = 32 + cmds_size as u64;

    // __TEXT layout
    let text_off = align_up(header_end, 16);
    let const_off = align_up(text_off + prog.text.len() as u64, 16);
    let text_seg_filesize = align_up(const_off + prog.rodata.len() as u64, SEG_ALIGN);

    // __DATA layout
    let data_seg_off = text_seg_filesize;
    let got_size = align_up(8 * prog.needed.len() as u64, 8);
    let data_sec_off = data_seg_off + got_size;
    let data_seg_filesize = align_up(got_size + prog.data.len() as u64, SEG_ALIGN);

    // __LINKEDIT layout
    let le_off = data_seg_off + data_seg_filesize;
    let rebase_blob = build_rebase_info(prog, got_size);
    let bind_blob = build_bind_info(prog, &libs);
    let rebase_off = le_off;
    let bind_off = rebase_off + align_up(rebase_blob.len() as u64, 8);
    let symtab_off = bind_off + align_up(bind_blob.len() as u64, 8);
    let nsyms = prog.needed.len() as u64;
    let strtab_off = symtab_off + 16 * nsyms;
    let mut strtab: Vec<u8> = vec![0];
    let mut strx = Vec::new();
    for sym in prog.needed.keys() {
        strx.push(strtab.len() as u32);
        strtab.extend_from_slice(format!("_{}", sym).as_bytes());
        strtab.push(0);
    }
    let sign_off = align_up(strtab_off + strtab.len() as u64, 16);

    // signature size: superblob (12 + 8) + CD header (88) + ident + hashes
    let code_limit = sign_off;
    let n_code_slots = code_limit.div_ceil(SIGN_PAGE);
    let cd_header = 88u64;
    let cd_size = cd_header + SIGN_IDENT.len() as u64 + 1 + 32 * n_code_slots;
    let sign_size = 12 + 8 + cd_size;
    let le_size = sign_off + sign_size - le_off;
    let file_end = sign_off + sign_size;

    // virtual addresses
    let text_va = VM_BASE + text_off;
    let const_va = VM_BASE + const_off;
    let data_seg_va = VM_BASE + data_seg_off;

    let mut got = IndexMap::new();
    for (i, sym) in prog.needed.keys().enumerate() {
        got.insert(sym.clone(), data_seg_va + 8 * i as u64);
    }
    let layout = Layout {
        text_va,
        rodata_va: const_va,
        data_va: data_seg_va + got_size,
        got,
    };

    let mut text = prog.text.clone();
    let mut rodata = prog.rodata.clone();
    let mut data = prog.data.clone();
    apply_relocs(&mut text, &mut rodata, &mut data, &prog.relocs, &layout)?;

    let mut out = Out::new();

    // mach header
    out.u32(MH_MAGIC_64);
    out.u32(cputype);
    out.u32(if cputype == 0x0100_000C { 0 } else { 3 }); // CPU_SUBTYPE_ARM64_ALL / X86_64_ALL
    out.u32(MH_EXECUTE);
    out.u32(ncmds);
    out.u32(cmds_size);
    out.u32(MH_FLAGS);
    out.u32(0); // reserved

    // __PAGEZERO
    out.u32(LC_SEGMENT_64);
    out.u32(72);
    out.fixed("__PAGEZERO");
    out.u64(0);
    out.u64(VM_BASE);
    out.u64(0);
    out.u64(0);
    out.u32(0);
    out.u32(0);
    out.u32(0);
    out.u32(0);

    // __TEXT with __text and __const
    out.u32(LC_SEGMENT_64);
    out.u32(72 + 160);
    out.fixed("__TEXT");
    out.u64(VM_BASE);
    out.u64(text_seg_filesize);
    out.u64(0);
    out.u64(text_seg_filesize);
    out.u32(VM_PROT_READ | VM_PROT_EXECUTE);
    out.u32(VM_PROT_READ | VM_PROT_EXECUTE);
    out.u32(2); // nsects
    out.u32(0);
    // section __text
    out.fixed("__text");
    out.fixed("__TEXT");
    out.u64(text_va);
    out.u64(prog.text.len() as u64);
    out.u32(text_off as u32);
    out.u32(4); // 2^4 alignment
    out.u32(0);
    out.u32(0);
    out.u32(0x8000_0400); // PURE_INSTRUCTIONS | SOME_INSTRUCTIONS
    out.u32(0);
    out.u32(0);
    out.u32(0);
    // section __const
    out.fixed("__const");
    out.fixed("__TEXT");
    out.u64(const_va);
    out.u64(prog.rodata.len() as u64);
    out.u32(const_off as u32);
    out.u32(3);
    out.u32(0);
    out.u32(0);
    out.u32(0);
    out.u32(0);
    out.u32(0);
    out.u32(0);

    // __DATA with __got and __data
    out.u32(LC_SEGMENT_64);
    out.u32(72 + 160);
    out.fixed("__DATA");
    out.u64(data_seg_va);
    out.u64(data_seg_filesize);
    out.u64(data_seg_off);
    out.u64(data_seg_filesize);
    out.u32(VM_PROT_READ | VM_PROT_WRITE);
    out.u32(VM_PROT_READ | VM_PROT_WRITE);
    out.u32(2);
    out.u32(0);
    // section __got
    out.fixed("__got");
    out.fixed("__DATA");
    out.u64(data_seg_va);
    out.u64(8 * prog.needed.len() as u64);
    out.u32(data_seg_off as u32);
    out.u32(3);
    out.u32(0);
    out.u32(0);
    out.u32(6); // S_NON_LAZY_SYMBOL_POINTERS
    out.u32(0);
    out.u32(0);
    out.u32(0);
    // section __data
    out.fixed("__data");
    out.fixed("__DATA");
    out.u64(data_seg_va + got_size);
    out.u64(prog.data.len() as u64);
    out.u32(data_sec_off as u32);
    out.u32(3);
    out.u32(0);
    out.u32(0);
    out.u32(0);
    out.u32(0);
    out.u32(0);
    out.u32(0);

    // __LINKEDIT
    out.u32(LC_SEGMENT_64);
    out.u32(72);
    out.fixed("__LINKEDIT");
    out.u64(VM_BASE + le_off);
    out.u64(align_up(le_size, SEG_ALIGN));
    out.u64(le_off);
    out.u64(le_size);
    out.u32(VM_PROT_READ);
    out.u32(VM_PROT_READ);
    out.u32(0);
    out.u32(0);

    // LC_DYLD_INFO_ONLY
    out.u32(LC_DYLD_INFO_ONLY);
    out.u32(48);
    if rebase_blob.is_empty() {
        out.u32(0);
        out.u32(0);
    } else {
        out.u32(rebase_off as u32);
        out.u32(rebase_blob.len() as u32);
    }
    out.u32(bind_off as u32);
    out.u32(bind_blob.len() as u32);
    out.u32(0); // weak bind
    out.u32(0);
    out.u32(0); // lazy bind
    out.u32(0);
    out.u32(0); // export
    out.u32(0);

    // LC_SYMTAB
    out.u32(LC_SYMTAB);
    out.u32(24);
    out.u32(symtab_off as u32);
    out.u32(nsyms as u32);
    out.u32(strtab_off as u32);
    out.u32(strtab.len() as u32);

    // LC_DYSYMTAB: all symbols undefined imports
    out.u32(LC_DYSYMTAB);
    out.u32(80);
    out.u32(0); // ilocalsym
    out.u32(0); // nlocalsym
    out.u32(0); // iextdefsym
    out.u32(0); // nextdefsym
    out.u32(0); // iundefsym
    out.u32(nsyms as u32); // nundefsym
    for _ in 0..12 {
        out.u32(0);
    }

    // LC_LOAD_DYLINKER
    out.u32(LC_LOAD_DYLINKER);
    out.u32(32);
    out.u32(12); // name offset
    out.bytes(b"/usr/lib/dyld");
    out.pad_to(out.len() + (32 - 12 - 13) as u64);

    // LC_UUID: content-derived, deterministic
    out.u32(LC_UUID);
    out.u32(24);
    let digest = Sha256::digest(&text);
    out.bytes(&digest[..16]);

    // LC_BUILD_VERSION: macos 11.0
    out.u32(LC_BUILD_VERSION);
    out.u32(24);
    out.u32(1); // PLATFORM_MACOS
    out.u32(0x000B_0000); // minos
    out.u32(0x000B_0000); // sdk
    out.u32(0); // ntools

    // LC_MAIN
    out.u32(LC_MAIN);
    out.u32(24);
    out.u64(text_off + prog.entry);
    out.u64(0); // stack size default

    // LC_LOAD_DYLIB per library
    for lib in &libs {
        let name_pad = align_up(lib.len() as u64 + 1, 8);
        out.u32(LC_LOAD_DYLIB);
        out.u32(24 + name_pad as u32);
        out.u32(24); // name offset
        out.u32(2); // timestamp
        out.u32(0x0001_0000); // current version
        out.u32(0x0001_0000); // compat version
        out.bytes(lib.as_bytes());
        out.u8(0);
        out.pad_to(align_up(out.len(), 8));
    }

    // LC_CODE_SIGNATURE
    out.u32(LC_CODE_SIGNATURE);
    out.u32(16);
    out.u32(sign_off as u32);
    out.u32(sign_size as u32);

    // file content
    out.pad_to(text_off);
    out.bytes(&text);
    out.pad_to(const_off);
    out.bytes(&rodata);
    out.pad_to(data_seg_off);
    out.bytes(&vec![0u8; got_size as usize]); // dyld fills the GOT
    out.bytes(&data);
    out.pad_to(le_off);
    out.bytes(&rebase_blob);
    out.pad_to(bind_off);
    out.bytes(&bind_blob);
    out.pad_to(symtab_off);
    for &sx in &strx {
        out.u32(sx); // n_strx
        out.u8(0x01); // N_UNDF | N_EXT
        out.u8(0); // n_sect
        out.bytes(&0u16.to_le_bytes()); // n_desc
        out.u64(0); // n_value
    }
    out.pad_to(strtab_off);
    out.bytes(&strtab);
    out.pad_to(sign_off);

    // code signature: SuperBlob + CodeDirectory, hashes filled after
    out.be32(CSMAGIC_EMBEDDED_SIGNATURE);
    out.be32(sign_size as u32);
    out.be32(1); // blob count
    out.be32(0); // slot type: CodeDirectory
    out.be32(20); // offset of CD within superblob

    let ident_off_in_cd = cd_header;
    let hash_off_in_cd = ident_off_in_cd + SIGN_IDENT.len() as u64 + 1;
    out.be32(CSMAGIC_CODEDIRECTORY);
    out.be32(cd_size as u32);
    out.be32(CD_VERSION);
    out.be32(CS_ADHOC);
    out.be32(hash_off_in_cd as u32);
    out.be32(ident_off_in_cd as u32);
    out.be32(0); // nSpecialSlots
    out.be32(n_code_slots as u32);
    out.be32(code_limit as u32);
    out.u8(32); // hashSize
    out.u8(2); // SHA-256
    out.u8(0); // platform
    out.u8(12); // log2(4096)
    out.be32(0); // spare2
    out.be32(0); // scatter
    out.be32(0); // team
    out.be32(0); // spare3
    out.bytes(&0u64.to_be_bytes()); // codeLimit64
    out.bytes(&0u64.to_be_bytes()); // execSegBase
    out.bytes(&text_seg_filesize.to_be_bytes()); // execSegLimit
    out.bytes(&CS_EXECSEG_MAIN_BINARY.to_be_bytes()); // execSegFlags
    out.bytes(SIGN_IDENT.as_bytes());
    out.u8(0);

    // placeholder hashes
    let hashes_at = out.len();
    out.bytes(&vec![0u8; (32 * n_code_slots) as usize]);
    out.pad_to(file_end);

    // page hashes over everything before the signature
    let mut bytes = out.bytes;
    for slot in 0..n_code_slots {
        let start = (slot * SIGN_PAGE) as usize;
        let end = ((slot + 1) * SIGN_PAGE).min(code_limit) as usize;
        let digest = Sha256::digest(&bytes[start..end]);
        let at = hashes_at as usize + (slot * 32) as usize;
        bytes[at..at + 32].copy_from_slice(&digest);
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rilc_gen::Target;

    fn fake_program() -> EmittedProgram {
        let mut needed = IndexMap::new();
        needed.insert(
            "printf".to_string(),
            "/usr/lib/libSystem.B.dylib".to_string(),
        );
        EmittedProgram {
            text: vec![0xC3; 64],
            rodata: vec![9; 16],
            data: vec![0; 32],
            relocs: Vec::new(),
            needed,
            entry: 0,
            symbols: Vec::new(),
            target: Target::parse("arm64-macos").unwrap(),
        }
    }

    #[test]
    fn test_magic_and_cputype() {
        let bytes = write_macho(&fake_program()).unwrap();
        assert_eq!(
            u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            MH_MAGIC_64
        );
        assert_eq!(
            u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
            0x0100_000C
        );
        assert_eq!(u32::from_le_bytes(bytes[12..16].try_into().unwrap()), MH_EXECUTE);
    }

    #[test]
    fn test_x86_cputype() {
        let mut p = fake_program();
        p.target = Target::parse("x86_64-macos").unwrap();
        let bytes = write_macho(&p).unwrap();
        assert_eq!(
            u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
            0x0100_0007
        );
    }

    #[test]
    fn test_riscv_rejected() {
        let mut p = fake_program();
        p.target = Target::parse("riscv64-linux").unwrap();
        assert!(matches!(
            write_macho(&p),
            Err(ObjError::Unsupported(_))
        ));
    }

    #[test]
    fn test_libsystem_required() {
        let mut p = fake_program();
        p.needed.clear();
        assert!(matches!(write_macho(&p), Err(ObjError::Unsupported(_))));
    }

    #[test]
    fn test_contains_dyld_and_libsystem() {
        let bytes = write_macho(&fake_program()).unwrap();
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("/usr/lib/dyld"));
        assert!(text.contains("libSystem"));
        assert!(text.contains("_printf"));
    }

    #[test]
    fn test_signature_magic_present() {
        let bytes = write_macho(&fake_program()).unwrap();
        let needle = CSMAGIC_EMBEDDED_SIGNATURE.to_be_bytes();
        assert!(bytes.windows(4).any(|w| w == needle));
        let cd = CSMAGIC_CODEDIRECTORY.to_be_bytes();
        assert!(bytes.windows(4).any(|w| w == cd));
    }

    #[test]
    fn test_page_hashes_verify() {
        let bytes = write_macho(&fake_program()).unwrap();
        // locate the CodeDirectory and re-derive the first page hash
        let cd_magic = CSMAGIC_CODEDIRECTORY.to_be_bytes();
        let cd_at = bytes
            .windows(4)
            .position(|w| w == cd_magic)
            .expect("code directory present");
        let hash_off =
            u32::from_be_bytes(bytes[cd_at + 16..cd_at + 20].try_into().unwrap()) as usize;
        let code_limit =
            u32::from_be_bytes(bytes[cd_at + 32..cd_at + 36].try_into().unwrap()) as usize;
        let first_end = code_limit.min(4096);
        let expect = Sha256::digest(&bytes[0..first_end]);
        assert_eq!(&bytes[cd_at + hash_off..cd_at + hash_off + 32], &expect[..]);
    }

    #[test]
    fn test_signature_is_final_bytes() {
        let bytes = write_macho(&fake_program()).unwrap();
        // LC_CODE_SIGNATURE dataoff + datasize == file size
        // (scan load commands: header is 32 bytes, then ncmds commands)
        let ncmds = u32::from_le_bytes(bytes[16..20].try_into().unwrap());
        let mut at = 32usize;
        let mut found = false;
        for _ in 0..ncmds {
            let cmd = u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap());
            let size = u32::from_le_bytes(bytes[at + 4..at + 8].try_into().unwrap()) as usize;
            if cmd == LC_CODE_SIGNATURE {
                let off =
                    u32::from_le_bytes(bytes[at + 8..at + 12].try_into().unwrap()) as usize;
                let len =
                    u32::from_le_bytes(bytes[at + 12..at + 16].try_into().unwrap()) as usize;
                assert_eq!(off + len, bytes.len());
                found = true;
            }
            at += size;
        }
        assert!(found);
    }
}

//! PE32+ executable writer (x86-64 Windows).
//!
//! Section layout: `.text` (code), `.rdata` (constants + import
//! machinery), `.data` (writable image). Imports are grouped per DLL with
//! one import-lookup table and one IAT each; emitted calls go
//! `call [rip+disp]` straight through the IAT slot, so no thunk bodies
//! are required. The image base is fixed and relocations are resolved at
//! write time; the optional header clears the dynamic-base flag so the
//! loader keeps the image where the absolute slots expect it.

use indexmap::IndexMap;

use rilc_gen::EmittedProgram;

use crate::error::{ObjError, Result};
use crate::layout::{align_up, apply_relocs, Layout};

const IMAGE_BASE: u64 = 0x1_4000_0000;
const SECTION_ALIGN: u64 = 0x1000;
const FILE_ALIGN: u64 = 0x200;

const MACHINE_AMD64: u16 = 0x8664;
const PE32PLUS_MAGIC: u16 = 0x20B;
const SUBSYSTEM_CONSOLE: u16 = 3;

// section characteristics
const TEXT_FLAGS: u32 = 0x6000_0020; // CODE | EXECUTE | READ
const RDATA_FLAGS: u32 = 0x4000_0040; // INITIALIZED_DATA | READ
const DATA_FLAGS: u32 = 0xC000_0040; // INITIALIZED_DATA | READ | WRITE

struct Out {
    bytes: Vec<u8>,
}

impl Out {
    fn new() -> Self {
        Self { bytes: Vec::new() }
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
}

/// Per-DLL import bookkeeping.
struct DllImports {
    dll: String,
    symbols: Vec<String>,
}

fn group_imports(prog: &EmittedProgram) -> Vec<DllImports> {
    let mut groups: IndexMap<String, Vec<String>> = IndexMap::new();
    for (sym, dll) in &prog.needed {
        groups.entry(dll.clone()).or_default().push(sym.clone());
    }
    groups
        .into_iter()
        .map(|(dll, symbols)| DllImports { dll, symbols })
        .collect()
}

/// The import blob layout, relative to the start of `.rdata`:
/// IAT slots, import directory entries, ILTs, hint/name strings, DLL
/// names. Returns (blob bytes, symbol -> IAT offset, iat_size).
fn build_import_blob(
    groups: &[DllImports],
    rdata_rva: u64,
) -> (Vec<u8>, IndexMap<String, u64>, u64, u64) {
    let total_syms: usize = groups.iter().map(|g| g.symbols.len()).sum();

    // IAT first: one 8-byte slot per symbol plus a NUL terminator per DLL
    let iat_size = 8 * (total_syms + groups.len()) as u64;
    let dir_off = iat_size;
    let dir_size = 20 * (groups.len() as u64 + 1);
    let ilt_off = dir_off + dir_size;
    let ilt_size = iat_size; // same shape as the IAT

    let names_off = ilt_off + ilt_size;
    let mut hint_name_offsets: IndexMap<String, u64> = IndexMap::new();
    let mut names_blob = Vec::new();
    for group in groups {
        for sym in &group.symbols {
            if names_blob.len() % 2 == 1 {
                names_blob.push(0); // hint/name entries are 2-aligned
            }
            hint_name_offsets.insert(sym.clone(), names_off + names_blob.len() as u64);
            names_blob.extend_from_slice(&0u16.to_le_bytes()); // hint
            names_blob.extend_from_slice(sym.as_bytes());
            names_blob.push(0);
        }
    }
    let mut dll_name_offsets = Vec::new();
    for group in groups {
        dll_name_offsets.push(names_off + names_blob.len() as u64);
        names_blob.extend_from_slice(group.dll.as_bytes());
        names_blob.push(0);
    }

    let total = ilt_off + ilt_size + names_blob.len() as u64;
    let mut blob = vec![0u8; total as usize - names_blob.len()];
    blob.extend_from_slice(&names_blob);

    // fill IAT and ILT with hint/name RVAs
    let mut iat_offsets: IndexMap<String, u64> = IndexMap::new();
    let mut slot = 0usize;
    let mut ilt_slot = ilt_off as usize;
    for group in groups {
        for sym in &group.symbols {
            let entry_rva = rdata_rva + hint_name_offsets[sym];
            blob[slot..slot + 8].copy_from_slice(&entry_rva.to_le_bytes());
            blob[ilt_slot..ilt_slot + 8].copy_from_slice(&entry_rva.to_le_bytes());
            iat_offsets.insert(sym.clone(), slot as u64);
            slot += 8;
            ilt_slot += 8;
        }
        slot += 8; // NUL terminator slot
        ilt_slot += 8;
    }

    // import directory entries
    let mut dir_at = dir_off as usize;
    let mut iat_cursor = 0u64;
    let mut ilt_cursor = ilt_off;
    for (group, dll_name_off) in groups.iter().zip(&dll_name_offsets) {
        let set = |blob: &mut Vec<u8>, at: usize, v: u32| {
            blob[at..at + 4].copy_from_slice(&v.to_le_bytes());
        };
        set(&mut blob, dir_at, (rdata_rva + ilt_cursor) as u32); // ILT
        set(&mut blob, dir_at + 12, (rdata_rva + dll_name_off) as u32); // name
        set(&mut blob, dir_at + 16, (rdata_rva + iat_cursor) as u32); // IAT
        dir_at += 20;
        let step = 8 * (group.symbols.len() as u64 + 1);
        iat_cursor += step;
        ilt_cursor += step;
    }

    (blob, iat_offsets, iat_size, dir_off)
}

fn push_section(
    out: &mut Out,
    name: &[u8],
    vsize: u64,
    rva: u64,
    raw_size: u64,
    raw_off: u64,
    flags: u32,
) {
    let mut n = [0u8; 8];
    n[..name.len()].copy_from_slice(name);
    out.bytes(&n);
    out.u32(vsize as u32);
    out.u32(rva as u32);
    out.u32(raw_size as u32);
    out.u32(raw_off as u32);
    out.u32(0); // relocs
    out.u32(0); // linenums
    out.u16(0);
    out.u16(0);
    out.u32(flags);
}

/// Serialize the program as a PE32+ executable.
pub fn write_pe(prog: &EmittedProgram) -> Result<Vec<u8>> {
    if prog.needed.is_empty() {
        // the Windows loader insists on at least one import
        return Err(ObjError::Unsupported(
            "PE requires at least one import (the runtime always links ExitProcess)".to_string(),
        ));
    }

    let groups = group_imports(prog);

    // headers: DOS (0x80) + PE sig (4) + COFF (20) + optional (240) +
    // 3 section headers (40 each)
    let headers_size = 0x80 + 4 + 20 + 240 + 40 * 3;
    let headers_raw = align_up(headers_size, FILE_ALIGN);

    let text_rva = SECTION_ALIGN;
    let text_vsize = prog.text.len() as u64;
    let text_raw = align_up(text_vsize.max(1), FILE_ALIGN);

    let rdata_rva = align_up(text_rva + text_vsize.max(1), SECTION_ALIGN);
    let (import_blob, iat_offsets, iat_size, dir_off) = build_import_blob(&groups, rdata_rva);
    let rodata_off_in_rdata = align_up(import_blob.len() as u64, 16);
    let rdata_vsize = rodata_off_in_rdata + prog.rodata.len() as u64;
    let rdata_raw = align_up(rdata_vsize.max(1), FILE_ALIGN);

    let data_rva = align_up(rdata_rva + rdata_vsize.max(1), SECTION_ALIGN);
    let data_vsize = prog.data.len().max(1) as u64;
    let data_raw = align_up(data_vsize, FILE_ALIGN);

    let image_size = align_up(data_rva + data_vsize, SECTION_ALIGN);

    let mut got = IndexMap::new();
    for (sym, off) in &iat_offsets {
        got.insert(sym.clone(), IMAGE_BASE + rdata_rva + off);
    }
    let layout = Layout {
        text_va: IMAGE_BASE + text_rva,
        rodata_va: IMAGE_BASE + rdata_rva + rodata_off_in_rdata,
        data_va: IMAGE_BASE + data_rva,
        got,
    };

    let mut text = prog.text.clone();
    let mut rodata = prog.rodata.clone();
    let mut data = prog.data.clone();
    apply_relocs(&mut text, &mut rodata, &mut data, &prog.relocs, &layout)?;

    let mut out = Out::new();

    // DOS header
    out.bytes(b"MZ");
    out.pad_to(0x3C);
    out.u32(0x80); // e_lfanew
    out.pad_to(0x80);

    // PE signature + COFF header
    out.bytes(b"PE\0\0");
    out.u16(MACHINE_AMD64);
    out.u16(3); // sections
    out.u32(0); // timestamp
    out.u32(0); // symbol table
    out.u32(0); // nsyms
    out.u16(240); // optional header size
    out.u16(0x0022); // EXECUTABLE_IMAGE | LARGE_ADDRESS_AWARE

    // optional header (PE32+)
    out.u16(PE32PLUS_MAGIC);
    out.bytes(&[0, 0]); // linker version
    out.u32(text_raw as u32); // code size
    out.u32((rdata_raw + data_raw) as u32); // initialized data
    out.u32(0); // uninitialized data
    out.u32((text_rva + prog.entry) as u32); // entry point RVA
    out.u32(text_rva as u32); // base of code
    out.u64(IMAGE_BASE);
    out.u32(SECTION_ALIGN as u32);
    out.u32(FILE_ALIGN as u32);
    out.u16(6); // os major
    out.u16(0);
    out.u16(0); // image version
    out.u16(0);
    out.u16(6); // subsystem major
    out.u16(0);
    out.u32(0); // win32 version
    out.u32(image_size as u32);
    out.u32(headers_raw as u32);
    out.u32(0); // checksum
    out.u16(SUBSYSTEM_CONSOLE);
    out.u16(0x0400); // NX_COMPAT only; dynamic base stays off
    out.u64(0x100000); // stack reserve
    out.u64(0x10000); // stack commit
    out.u64(0x100000); // heap reserve
    out.u64(0x1000); // heap commit
    out.u32(0); // loader flags
    out.u32(16); // data directory count

    // data directories: [1] imports, [12] IAT
    for i in 0..16u32 {
        match i {
            1 => {
                out.u32((rdata_rva + dir_off) as u32);
                out.u32((20 * (groups.len() as u64 + 1)) as u32);
            }
            12 => {
                out.u32(rdata_rva as u32);
                out.u32(iat_size as u32);
            }
            _ => {
                out.u32(0);
                out.u32(0);
            }
        }
    }

    // section table
    push_section(
        &mut out,
        b".text",
        text_vsize.max(1),
        text_rva,
        text_raw,
        headers_raw,
        TEXT_FLAGS,
    );
    push_section(
        &mut out,
        b".rdata",
        rdata_vsize.max(1),
        rdata_rva,
        rdata_raw,
        headers_raw + text_raw,
        RDATA_FLAGS,
    );
    push_section(
        &mut out,
        b".data",
        data_vsize,
        data_rva,
        data_raw,
        headers_raw + text_raw + rdata_raw,
        DATA_FLAGS,
    );

    // raw section data
    out.pad_to(headers_raw);
    out.bytes(&text);
    out.pad_to(headers_raw + text_raw);
    out.bytes(&import_blob);
    out.pad_to(headers_raw + text_raw + rodata_off_in_rdata);
    out.bytes(&rodata);
    out.pad_to(headers_raw + text_raw + rdata_raw);
    out.bytes(&data);
    out.pad_to(headers_raw + text_raw + rdata_raw + data_raw);

    Ok(out.bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rilc_gen::Target;

    fn fake_program() -> EmittedProgram {
        let mut needed = IndexMap::new();
        needed.insert("printf".to_string(), "msvcrt.dll".to_string());
        needed.insert("ExitProcess".to_string(), "kernel32.dll".to_string());
        EmittedProgram {
            text: vec![0xC3; 64],
            rodata: vec![b'%', b'g', 0],
            data: vec![0; 32],
            relocs: Vec::new(),
            needed,
            entry: 0,
            symbols: Vec::new(),
            target: Target::parse("x86_64-windows").unwrap(),
        }
    }

    #[test]
    fn test_mz_and_pe_signatures() {
        let bytes = write_pe(&fake_program()).unwrap();
        assert_eq!(&bytes[0..2], b"MZ");
        let lfanew = u32::from_le_bytes(bytes[0x3C..0x40].try_into().unwrap()) as usize;
        assert_eq!(&bytes[lfanew..lfanew + 4], b"PE\0\0");
        assert_eq!(
            u16::from_le_bytes(bytes[lfanew + 4..lfanew + 6].try_into().unwrap()),
            MACHINE_AMD64
        );
    }

    #[test]
    fn test_pe32plus_magic() {
        let bytes = write_pe(&fake_program()).unwrap();
        let opt = 0x80 + 4 + 20;
        assert_eq!(
            u16::from_le_bytes(bytes[opt..opt + 2].try_into().unwrap()),
            PE32PLUS_MAGIC
        );
    }

    #[test]
    fn test_imports_present() {
        let bytes = write_pe(&fake_program()).unwrap();
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("msvcrt.dll"));
        assert!(text.contains("kernel32.dll"));
        assert!(text.contains("printf"));
        assert!(text.contains("ExitProcess"));
    }

    #[test]
    fn test_no_imports_rejected() {
        let mut p = fake_program();
        p.needed.clear();
        assert!(matches!(write_pe(&p), Err(ObjError::Unsupported(_))));
    }

    #[test]
    fn test_file_alignment() {
        let bytes = write_pe(&fake_program()).unwrap();
        assert_eq!(bytes.len() % FILE_ALIGN as usize, 0);
    }
}

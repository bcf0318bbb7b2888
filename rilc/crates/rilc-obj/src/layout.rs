//! Final address assignment and relocation application.
//!
//! The code generator leaves PC-relative data references, GOT/IAT calls,
//! and absolute jump-table slots as relocation records; once a container
//! writer has decided virtual addresses for text/rodata/data and created
//! the import slots, [`apply_relocs`] rewrites the affected bytes in
//! place. Patches never reach this stage: they were resolved inside the
//! text buffer before the buffers left the generator.

use indexmap::IndexMap;

use rilc_gen::{Reloc, Section};

use crate::error::{ObjError, Result};

/// Virtual addresses chosen by a container writer.
pub struct Layout {
    pub text_va: u64,
    pub rodata_va: u64,
    pub data_va: u64,
    /// External symbol -> GOT/IAT slot virtual address.
    pub got: IndexMap<String, u64>,
}

impl Layout {
    fn section_va(&self, section: Section) -> u64 {
        match section {
            Section::Text => self.text_va,
            Section::Rodata => self.rodata_va,
            Section::Data => self.data_va,
        }
    }

    fn slot(&self, symbol: &str) -> Result<u64> {
        self.got
            .get(symbol)
            .copied()
            .ok_or_else(|| ObjError::UnresolvedSymbol(symbol.to_string()))
    }
}

#[inline]
pub fn align_up(v: u64, align: u64) -> u64 {
    (v + align - 1) & !(align - 1)
}

fn write_i32(buf: &mut [u8], at: usize, v: i64, what: &str) -> Result<()> {
    let v32 = i32::try_from(v).map_err(|_| ObjError::RelocOutOfRange(what.to_string()))?;
    buf[at..at + 4].copy_from_slice(&v32.to_le_bytes());
    Ok(())
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(buf[at..at + 4].try_into().unwrap())
}

fn write_u32(buf: &mut [u8], at: usize, v: u32) {
    buf[at..at + 4].copy_from_slice(&v.to_le_bytes());
}

/// Patch an ADRP instruction at `at` (PC `pc`) to address the page of
/// `target`.
fn patch_adrp(text: &mut [u8], at: usize, pc: u64, target: u64, what: &str) -> Result<()> {
    let delta = (target as i64 >> 12) - (pc as i64 >> 12);
    if !(-(1 << 20)..(1 << 20)).contains(&delta) {
        return Err(ObjError::RelocOutOfRange(what.to_string()));
    }
    let imm = delta as u32;
    let insn = read_u32(text, at) | ((imm & 3) << 29) | (((imm >> 2) & 0x7_FFFF) << 5);
    write_u32(text, at, insn);
    Ok(())
}

/// Patch an AUIPC+low12 pair for a `delta` displacement.
fn patch_auipc_pair(
    text: &mut [u8],
    auipc_at: usize,
    lo_at: usize,
    delta: i64,
    lo_is_load: bool,
    what: &str,
) -> Result<()> {
    if !(-(1i64 << 31)..(1i64 << 31)).contains(&delta) {
        return Err(ObjError::RelocOutOfRange(what.to_string()));
    }
    let lo = ((delta << 52) >> 52) as i64; // sign-extended low 12
    let hi = (delta - lo) as u64 & 0xFFFF_F000;
    let auipc = read_u32(text, auipc_at) | (hi as u32);
    write_u32(text, auipc_at, auipc);
    let lo_insn = read_u32(text, lo_at) | (((lo as u32) & 0xFFF) << 20);
    write_u32(text, lo_at, lo_insn);
    let _ = lo_is_load;
    Ok(())
}

/// Apply every relocation against the final layout.
pub fn apply_relocs(
    text: &mut [u8],
    _rodata: &mut [u8],
    data: &mut [u8],
    relocs: &[Reloc],
    layout: &Layout,
) -> Result<()> {
    for reloc in relocs {
        match reloc {
            Reloc::X86PcRel {
                at,
                section,
                addend,
            } => {
                let target = layout.section_va(*section) + addend;
                let pc = layout.text_va + *at as u64 + 4;
                write_i32(text, *at, target as i64 - pc as i64, "pc-relative data")?;
            }
            Reloc::Arm64AdrpAdd {
                adrp_at,
                add_at,
                section,
                addend,
            } => {
                let target = layout.section_va(*section) + addend;
                let pc = layout.text_va + *adrp_at as u64;
                patch_adrp(text, *adrp_at, pc, target, "adrp data")?;
                let add = read_u32(text, *add_at) | (((target & 0xFFF) as u32) << 10);
                write_u32(text, *add_at, add);
            }
            Reloc::RiscvAuipcAddi {
                auipc_at,
                addi_at,
                section,
                addend,
            } => {
                let target = layout.section_va(*section) + addend;
                let pc = layout.text_va + *auipc_at as u64;
                patch_auipc_pair(
                    text,
                    *auipc_at,
                    *addi_at,
                    target as i64 - pc as i64,
                    false,
                    "auipc data",
                )?;
            }
            Reloc::X86GotCall { at, symbol } => {
                let slot = layout.slot(symbol)?;
                let pc = layout.text_va + *at as u64 + 4;
                write_i32(text, *at, slot as i64 - pc as i64, symbol)?;
            }
            Reloc::Arm64GotCall {
                adrp_at,
                ldr_at,
                symbol,
            } => {
                let slot = layout.slot(symbol)?;
                let pc = layout.text_va + *adrp_at as u64;
                patch_adrp(text, *adrp_at, pc, slot, symbol)?;
                // LDR unsigned offset, scaled by 8
                let imm12 = ((slot & 0xFFF) / 8) as u32;
                let ldr = read_u32(text, *ldr_at) | (imm12 << 10);
                write_u32(text, *ldr_at, ldr);
            }
            Reloc::RiscvGotCall {
                auipc_at,
                ld_at,
                symbol,
            } => {
                let slot = layout.slot(symbol)?;
                let pc = layout.text_va + *auipc_at as u64;
                patch_auipc_pair(
                    text,
                    *auipc_at,
                    *ld_at,
                    slot as i64 - pc as i64,
                    true,
                    symbol,
                )?;
            }
            Reloc::Abs64Text {
                section,
                at,
                text_off,
            } => {
                let value = layout.text_va + text_off;
                let buf: &mut [u8] = match section {
                    Section::Data => data,
                    Section::Rodata => _rodata,
                    Section::Text => text,
                };
                buf[*at..*at + 8].copy_from_slice(&value.to_le_bytes());
            }
        }
    }
    Ok(())
}

/// Absolute slots that a position-independent container must list for
/// rebasing (data-section offset of each 8-byte pointer).
pub fn rebase_sites(relocs: &[Reloc]) -> Vec<u64> {
    let mut sites: Vec<u64> = relocs
        .iter()
        .filter_map(|r| match r {
            Reloc::Abs64Text {
                section: Section::Data,
                at,
                ..
            } => Some(*at as u64),
            _ => None,
        })
        .collect();
    sites.sort_unstable();
    sites
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> Layout {
        let mut got = IndexMap::new();
        got.insert("printf".to_string(), 0x404000);
        Layout {
            text_va: 0x401000,
            rodata_va: 0x400200,
            data_va: 0x404100,
            got,
        }
    }

    #[test]
    fn test_x86_pcrel() {
        // lea at text offset 0, disp field at 3
        let mut text = vec![0x48, 0x8D, 0x05, 0, 0, 0, 0];
        let relocs = vec![Reloc::X86PcRel {
            at: 3,
            section: Section::Rodata,
            addend: 0x10,
        }];
        apply_relocs(&mut text, &mut [], &mut [], &relocs, &layout()).unwrap();
        let disp = i32::from_le_bytes(text[3..7].try_into().unwrap());
        // target 0x400210, next-insn pc 0x401007
        assert_eq!(disp, 0x400210 - 0x401007);
    }

    #[test]
    fn test_x86_got_call() {
        let mut text = vec![0xFF, 0x15, 0, 0, 0, 0];
        let relocs = vec![Reloc::X86GotCall {
            at: 2,
            symbol: "printf".to_string(),
        }];
        apply_relocs(&mut text, &mut [], &mut [], &relocs, &layout()).unwrap();
        let disp = i32::from_le_bytes(text[2..6].try_into().unwrap());
        assert_eq!(disp, 0x404000 - 0x401006);
    }

    #[test]
    fn test_missing_symbol_rejected() {
        let mut text = vec![0u8; 8];
        let relocs = vec![Reloc::X86GotCall {
            at: 0,
            symbol: "ghost".to_string(),
        }];
        let err = apply_relocs(&mut text, &mut [], &mut [], &relocs, &layout());
        assert!(matches!(err, Err(ObjError::UnresolvedSymbol(_))));
    }

    #[test]
    fn test_abs64_into_data() {
        let mut data = vec![0u8; 16];
        let relocs = vec![Reloc::Abs64Text {
            section: Section::Data,
            at: 8,
            text_off: 0x40,
        }];
        apply_relocs(&mut [], &mut [], &mut data, &relocs, &layout()).unwrap();
        let v = u64::from_le_bytes(data[8..16].try_into().unwrap());
        assert_eq!(v, 0x401040);
    }

    #[test]
    fn test_adrp_page_math() {
        // adrp x0 followed by add; target in another page
        let mut text = 0x9000_0000u32.to_le_bytes().to_vec();
        text.extend_from_slice(&0x9100_0000u32.to_le_bytes());
        let relocs = vec![Reloc::Arm64AdrpAdd {
            adrp_at: 0,
            add_at: 4,
            section: Section::Data,
            addend: 0x28,
        }];
        apply_relocs(&mut text, &mut [], &mut [], &relocs, &layout()).unwrap();
        let adrp = u32::from_le_bytes(text[0..4].try_into().unwrap());
        let pages = (0x404128u64 >> 12) as i64 - (0x401000u64 >> 12) as i64;
        let imm = pages as u32;
        assert_eq!(adrp & !0x9000_0000, ((imm & 3) << 29) | (((imm >> 2) & 0x7FFFF) << 5));
        let add = u32::from_le_bytes(text[4..8].try_into().unwrap());
        assert_eq!((add >> 10) & 0xFFF, 0x128);
    }

    #[test]
    fn test_rebase_sites_sorted() {
        let relocs = vec![
            Reloc::Abs64Text {
                section: Section::Data,
                at: 24,
                text_off: 0,
            },
            Reloc::Abs64Text {
                section: Section::Data,
                at: 8,
                text_off: 0,
            },
        ];
        assert_eq!(rebase_sites(&relocs), vec![8, 24]);
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 0x1000), 0);
        assert_eq!(align_up(1, 0x1000), 0x1000);
        assert_eq!(align_up(0x1000, 0x1000), 0x1000);
    }
}

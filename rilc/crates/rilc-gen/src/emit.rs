//! Emitter buffers, labels, patches, and relocations.
//!
//! Three byte streams grow during emission: text (executable), rodata
//! (read-only constants), data (writable). The "current offset" of each is
//! its length.
//!
//! Two distinct fix-up mechanisms, never mixed:
//!
//! - **Patches** live entirely inside the text buffer. A forward branch or
//!   call records (offset, target label, encoding kind); once every label
//!   is defined, [`Emitter::resolve_patches`] rewrites the displacement
//!   bytes in place. A leftover patch is an unresolved-call error.
//! - **Relocations** outlive the text buffer. Anything whose value depends
//!   on final segment addresses (PC-relative data loads, GOT/IAT calls,
//!   absolute jump-table slots) is recorded here and consumed by the
//!   container writer after it has placed the segments.

use indexmap::IndexMap;
use rustc_hash::FxHashMap;

use crate::error::{CodeGenError, Result};

/// An appendable little-endian byte buffer.
#[derive(Default, Clone)]
pub struct Buf {
    bytes: Vec<u8>,
}

impl Buf {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current offset == length.
    #[inline]
    pub fn offset(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn push_u8(&mut self, v: u8) {
        self.bytes.push(v);
    }

    pub fn push_bytes(&mut self, v: &[u8]) {
        self.bytes.extend_from_slice(v);
    }

    pub fn push_u16(&mut self, v: u16) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    pub fn push_u32(&mut self, v: u32) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    pub fn push_u64(&mut self, v: u64) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    /// Overwrite four bytes at an absolute offset.
    pub fn patch_u32_at(&mut self, at: usize, v: u32) {
        self.bytes[at..at + 4].copy_from_slice(&v.to_le_bytes());
    }

    /// Overwrite eight bytes at an absolute offset.
    pub fn patch_u64_at(&mut self, at: usize, v: u64) {
        self.bytes[at..at + 8].copy_from_slice(&v.to_le_bytes());
    }

    /// Pad with `fill` until the offset is a multiple of `align`.
    pub fn align_to(&mut self, align: usize, fill: u8) {
        while self.bytes.len() % align != 0 {
            self.bytes.push(fill);
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.bytes
    }
}

/// Which buffer an offset refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Section {
    Text,
    Rodata,
    Data,
}

/// Displacement encoding of a pending in-text fix-up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PatchKind {
    /// x86-64: 32-bit PC-relative, displacement measured from the end of
    /// the four patched bytes (CALL rel32, JMP rel32, Jcc rel32)
    Rel32,
    /// ARM64 BL/B: signed 26-bit word displacement
    Bl26,
    /// ARM64 B.cond / CBZ-class: signed 19-bit word displacement
    B19,
    /// RISC-V JAL: signed 21-bit displacement
    Jal21,
    /// RISC-V conditional branch: signed 13-bit displacement
    Branch13,
}

/// A pending in-text fix-up awaiting label definition.
#[derive(Clone, Debug)]
pub struct Patch {
    /// Offset of the instruction (for word-based ISAs) or of the
    /// displacement field itself (Rel32) in the text buffer.
    pub at: usize,
    /// Target label name
    pub target: String,
    pub kind: PatchKind,
}

/// A fix-up that needs final segment addresses; consumed by the container
/// writer.
#[derive(Clone, Debug)]
pub enum Reloc {
    /// x86-64 RIP-relative disp32 at `at` referencing `section` + `addend`
    /// (displacement base is `at + 4`).
    X86PcRel {
        at: usize,
        section: Section,
        addend: u64,
    },
    /// ARM64 ADRP (page) + ADD (low 12 bits) pair.
    Arm64AdrpAdd {
        adrp_at: usize,
        add_at: usize,
        section: Section,
        addend: u64,
    },
    /// RISC-V AUIPC (high 20) + ADDI (low 12) pair.
    RiscvAuipcAddi {
        auipc_at: usize,
        addi_at: usize,
        section: Section,
        addend: u64,
    },
    /// x86-64 `call [rip+disp32]` through a GOT/IAT slot for an external
    /// symbol; disp32 at `at`.
    X86GotCall { at: usize, symbol: String },
    /// ARM64 ADRP + LDR of a GOT slot, followed by BLR.
    Arm64GotCall {
        adrp_at: usize,
        ldr_at: usize,
        symbol: String,
    },
    /// RISC-V AUIPC + LD of a GOT slot, followed by JALR.
    RiscvGotCall {
        auipc_at: usize,
        ld_at: usize,
        symbol: String,
    },
    /// Absolute 8-byte slot (e.g. a jump-table entry in rodata) pointing
    /// at a text offset.
    Abs64Text {
        section: Section,
        at: usize,
        text_off: u64,
    },
}

/// The emitter: the three buffers plus label/patch/relocation state.
pub struct Emitter {
    pub text: Buf,
    pub rodata: Buf,
    pub data: Buf,

    labels: FxHashMap<String, usize>,
    pub patches: Vec<Patch>,
    pub relocs: Vec<Reloc>,

    /// External symbol -> library, insertion-ordered.
    pub needed: IndexMap<String, String>,

    /// Deduplicated f64 constants in rodata.
    float_pool: FxHashMap<u64, u64>,
}

impl Default for Emitter {
    fn default() -> Self {
        Self::new()
    }
}

impl Emitter {
    pub fn new() -> Self {
        Self {
            text: Buf::new(),
            rodata: Buf::new(),
            data: Buf::new(),
            labels: FxHashMap::default(),
            patches: Vec::new(),
            relocs: Vec::new(),
            needed: IndexMap::new(),
            float_pool: FxHashMap::default(),
        }
    }

    /// Define `label` at the current text offset. Labels define at most
    /// once.
    pub fn define_label(&mut self, label: &str) -> Result<()> {
        if self.labels.contains_key(label) {
            return Err(CodeGenError::LabelRedefinition {
                label: label.to_string(),
            });
        }
        self.labels.insert(label.to_string(), self.text.offset());
        Ok(())
    }

    /// Text offset of a defined label.
    pub fn label_offset(&self, label: &str) -> Option<usize> {
        self.labels.get(label).copied()
    }

    /// All defined labels, for symbol tables and dead-code accounting.
    pub fn labels(&self) -> impl Iterator<Item = (&str, usize)> {
        self.labels.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Queue a fix-up for a not-yet-defined (or defined) label.
    pub fn add_patch(&mut self, at: usize, target: &str, kind: PatchKind) {
        self.patches.push(Patch {
            at,
            target: target.to_string(),
            kind,
        });
    }

    /// Record an external function and the library providing it.
    pub fn need_symbol(&mut self, symbol: &str, library: &str) {
        self.needed
            .entry(symbol.to_string())
            .or_insert_with(|| library.to_string());
    }

    /// Intern an f64 constant in rodata, 8-aligned, deduplicated.
    /// Returns its rodata offset.
    pub fn float_const(&mut self, value: f64) -> u64 {
        let bits = value.to_bits();
        if let Some(&off) = self.float_pool.get(&bits) {
            return off;
        }
        self.rodata.align_to(8, 0);
        let off = self.rodata.offset() as u64;
        self.rodata.push_u64(bits);
        self.float_pool.insert(bits, off);
        off
    }

    /// Append raw bytes to rodata, returning their offset.
    pub fn rodata_bytes(&mut self, bytes: &[u8], align: usize) -> u64 {
        self.rodata.align_to(align, 0);
        let off = self.rodata.offset() as u64;
        self.rodata.push_bytes(bytes);
        off
    }

    /// Append a Ril string object (u64 length + bytes + NUL) to rodata.
    ///
    /// The trailing NUL is not counted in the length; it makes the
    /// C-string view free for FFI and PE printf.
    pub fn rodata_string(&mut self, s: &str) -> u64 {
        self.rodata.align_to(8, 0);
        let off = self.rodata.offset() as u64;
        self.rodata.push_u64(s.len() as u64);
        self.rodata.push_bytes(s.as_bytes());
        self.rodata.push_u8(0);
        off
    }

    /// Reserve zeroed bytes in the data segment, aligned; returns offset.
    pub fn data_reserve(&mut self, size: usize, align: usize) -> u64 {
        self.data.align_to(align, 0);
        let off = self.data.offset() as u64;
        for _ in 0..size {
            self.data.push_u8(0);
        }
        off
    }

    /// Resolve every queued patch against the label table.
    ///
    /// `apply` is the backend's displacement encoder; it validates range.
    /// Any patch whose label never got defined is an unresolved-call
    /// error, and the patch list is empty afterwards on success.
    pub fn resolve_patches(
        &mut self,
        apply: &dyn Fn(&mut [u8], &Patch, usize) -> Result<()>,
    ) -> Result<()> {
        let patches = std::mem::take(&mut self.patches);
        for patch in &patches {
            let target = self.labels.get(&patch.target).copied().ok_or_else(|| {
                CodeGenError::UnresolvedCall {
                    target: patch.target.clone(),
                }
            })?;
            apply(self.text.as_mut_slice(), patch, target)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buf_little_endian() {
        let mut b = Buf::new();
        b.push_u32(0x11223344);
        assert_eq!(b.as_slice(), &[0x44, 0x33, 0x22, 0x11]);
    }

    #[test]
    fn test_buf_align() {
        let mut b = Buf::new();
        b.push_u8(1);
        b.align_to(8, 0x90);
        assert_eq!(b.offset(), 8);
        assert_eq!(b.as_slice()[1], 0x90);
    }

    #[test]
    fn test_label_redefinition_rejected() {
        let mut e = Emitter::new();
        e.define_label("l").unwrap();
        assert!(matches!(
            e.define_label("l"),
            Err(CodeGenError::LabelRedefinition { .. })
        ));
    }

    #[test]
    fn test_float_pool_dedup() {
        let mut e = Emitter::new();
        let a = e.float_const(1.5);
        let b = e.float_const(1.5);
        let c = e.float_const(2.5);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_unresolved_patch_is_error() {
        let mut e = Emitter::new();
        e.text.push_u32(0);
        e.add_patch(0, "nowhere", PatchKind::Rel32);
        let apply = |_: &mut [u8], _: &Patch, _: usize| Ok(());
        assert!(matches!(
            e.resolve_patches(&apply),
            Err(CodeGenError::UnresolvedCall { .. })
        ));
    }

    #[test]
    fn test_patch_list_empty_after_resolve() {
        let mut e = Emitter::new();
        e.define_label("here").unwrap();
        e.text.push_u32(0);
        e.add_patch(0, "here", PatchKind::Rel32);
        let apply = |_: &mut [u8], _: &Patch, _: usize| Ok(());
        e.resolve_patches(&apply).unwrap();
        assert!(e.patches.is_empty());
    }

    #[test]
    fn test_rodata_string_layout() {
        let mut e = Emitter::new();
        let off = e.rodata_string("hi");
        let bytes = e.rodata.as_slice();
        let len = u64::from_le_bytes(bytes[off as usize..off as usize + 8].try_into().unwrap());
        assert_eq!(len, 2);
        assert_eq!(&bytes[off as usize + 8..off as usize + 10], b"hi");
        assert_eq!(bytes[off as usize + 10], 0);
    }
}

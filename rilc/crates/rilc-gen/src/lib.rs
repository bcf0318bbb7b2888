//! rilc-gen - Code Generator
//!
//! ============================================================================
//! DIRECT-TO-NATIVE EMISSION
//! ============================================================================
//!
//! There is no intermediate representation. The generator walks the AST
//! once and writes machine code bytes straight into the text buffer,
//! delegating instruction encoding to the per-ISA backend behind the
//! [`Isa`] trait. Forward references go through the label/patch machinery;
//! anything depending on final segment addresses becomes a relocation for
//! the container writer (see `emit.rs` for the patch/relocation split).
//!
//! VALUE MODEL:
//! ------------
//! Every Ril value is 64 bits: a double's bit pattern for numbers and
//! booleans (1.0 / 0.0), a pointer for strings, lists, maps, channels,
//! and closures. The canonical NaN `ERR_SENTINEL` is the error value;
//! pointer-producing operations use 0 instead. Expression results travel
//! in the backend's return register; binary operands ride the machine
//! stack (push lhs, evaluate rhs, pop).
//!
//! STATE CARRIED THROUGH THE WALK:
//! -------------------------------
//! - scope stack (name -> storage), see `env.rs`
//! - label table + patch list + relocation list, see `emit.rs`
//! - per-scope defer lists with runtime guard slots
//! - loop frame stack (continue/break labels, depths for `break 2`)
//! - current-arena nesting via `ril_arena_push`/`pop`
//! - a pending-function queue: lambda bodies are emitted after the
//!   stream that references them, and *only if referenced*, which is
//!   also how dead helpers are stripped (the used-symbol closure)
//!
//! TAIL CALLS:
//! -----------
//! A direct recursive call in tail position with matching arity stores
//! the new arguments into the parameter slots and jumps back to the body
//! label, reusing the frame. Functions that registered defers or arena
//! scopes keep real calls (the cleanup must run per activation).

pub mod backend;
pub mod emit;
pub mod env;
pub mod error;
pub mod helpers;
pub mod target;

pub mod arm64;
pub mod riscv64;
pub mod x86_64;

mod asm_sub;

pub use backend::{isa_for, Cond, FReg, Isa, Reg};
pub use emit::{Buf, Emitter, Patch, PatchKind, Reloc, Section};
pub use error::{CodeGenError, Result};
pub use helpers::{RuntimeData, ERR_SENTINEL, ONE_BITS};
pub use target::{Arch, Os, Sys, Target};

use indexmap::{IndexMap, IndexSet};
use rustc_hash::{FxHashMap, FxHashSet};

use rilc_par::{BinOp, Expr, ExprKind, Program, UnOp};
use rilc_sem::{Feature, FeatureSet, ValueType};
use rilc_util::diagnostic::codes;
use rilc_util::{Handler, Span, Symbol};

use env::{DeferEntry, LoopFrame, ScopeStack, Storage};

/// Compile-time switches that alter emission.
#[derive(Clone, Copy, Debug)]
pub struct GenConfig {
    /// Insert division-by-zero and null-pointer guards.
    pub runtime_checks: bool,
    /// Iteration ceiling for loops whose bound cannot be proven.
    pub default_loop_bound: u64,
}

impl Default for GenConfig {
    fn default() -> Self {
        Self {
            runtime_checks: true,
            default_loop_bound: 1_000_000,
        }
    }
}

/// Everything the container writer needs.
#[derive(Debug)]
pub struct EmittedProgram {
    pub text: Vec<u8>,
    pub rodata: Vec<u8>,
    pub data: Vec<u8>,
    pub relocs: Vec<Reloc>,
    /// External symbol -> providing library, insertion-ordered.
    pub needed: IndexMap<String, String>,
    /// Entry point offset within text.
    pub entry: u64,
    /// Defined labels (symbol table / inspection).
    pub symbols: Vec<(String, u64)>,
    pub target: Target,
}

/// A function body waiting to be emitted.
struct PendingFn {
    label: String,
    params: Vec<Symbol>,
    captures: Vec<Symbol>,
    body: Expr,
    pure: bool,
}

/// Lexical-scope bookkeeping beyond name bindings.
struct ScopeInfo {
    defers: Vec<DeferEntry>,
    arena: bool,
}

struct FnCtx {
    label: String,
    body_label: String,
    params: Vec<Symbol>,
    /// Cleanup (defer/arena) disables frame-reusing tail calls.
    has_cleanup: bool,
    /// Index of the function's base scope in `scope_info`.
    scope_base: usize,
    /// Memo cache data offset and arity for pure functions.
    memo: Option<(u64, usize)>,
}

/// The portable argument-register budget (System V x86-64 has six).
const MAX_ARGS: usize = 6;

pub struct CodeGen<'h> {
    isa: Box<dyn Isa>,
    /// The accumulator: the backend's return register, where every
    /// expression leaves its value bits.
    acc: Reg,
    target: Target,
    e: Emitter,
    env: ScopeStack,
    features: FeatureSet,
    config: GenConfig,
    handler: &'h Handler,
    data: RuntimeData,

    types: FxHashMap<Symbol, ValueType>,
    label_seq: usize,
    loop_frames: Vec<LoopFrame>,
    scope_info: Vec<ScopeInfo>,
    slot_next: u32,
    current_fn: Option<FnCtx>,

    pending: FxHashMap<String, PendingFn>,
    referenced: IndexSet<String>,
    emitted: FxHashSet<String>,

    /// (reloc index, label): text-address relocations whose addend waits
    /// for the label table.
    fn_addr_fixups: Vec<(usize, String)>,
    /// (rodata offset, arm labels): jump tables filled at finalize.
    jump_tables: Vec<(usize, Vec<String>)>,
}

impl<'h> CodeGen<'h> {
    pub fn new(
        target: Target,
        features: FeatureSet,
        config: GenConfig,
        handler: &'h Handler,
    ) -> Result<Self> {
        if target.os == Os::Windows && target.arch != Arch::X86_64 {
            return Err(CodeGenError::UnsupportedForTarget {
                message: "PE output is x86-64 only".to_string(),
                target: target.to_string(),
            });
        }
        let mut e = Emitter::new();
        let data = RuntimeData::reserve(&mut e);
        let isa = isa_for(target.arch);
        let acc = isa.ret();
        Ok(Self {
            isa,
            acc,
            target,
            e,
            env: ScopeStack::new(),
            features,
            config,
            handler,
            data,
            types: FxHashMap::default(),
            label_seq: 0,
            loop_frames: Vec::new(),
            scope_info: Vec::new(),
            slot_next: 0,
            current_fn: None,
            pending: FxHashMap::default(),
            referenced: IndexSet::new(),
            emitted: FxHashSet::default(),
            fn_addr_fixups: Vec::new(),
            jump_tables: Vec::new(),
        })
    }

    // =========================================================================
    // DRIVER
    // =========================================================================

    /// Compile a whole program to raw section images.
    pub fn compile(mut self, program: &Program) -> Result<EmittedProgram> {
        self.e.define_label("_start")?;
        let slots = 16 + program.iter().map(count_slots).sum::<u32>();
        self.isa.prologue(&mut self.e, slots);
        self.scope_info.push(ScopeInfo {
            defers: Vec::new(),
            arena: false,
        });

        if self.features.contains(Feature::Cpuid) {
            self.call("ril_cpu_init");
        }
        if self.features.contains(Feature::Arenas) {
            self.call("ril_arena_init");
        }

        let exit_slot = self.alloc_slot();
        let zero = self.isa.scratch(0);
        self.isa.zero(&mut self.e, zero);
        self.isa
            .store(&mut self.e, self.isa.fp(), self.isa.slot_off(exit_slot), zero);

        for (i, stmt) in program.iter().enumerate() {
            self.gen_expr(stmt, false)?;
            if i == program.len() - 1 {
                let fp = self.isa.fp();
                let off = self.isa.slot_off(exit_slot);
                self.isa.store(&mut self.e, fp, off, self.isa.ret());
            }
        }

        self.flush_scope_exits(0)?;
        self.emit_exit(exit_slot)?;
        self.scope_info.pop();

        self.drain_pending()?;
        self.finalize_tables();

        let isa = &*self.isa;
        let apply = |text: &mut [u8], patch: &Patch, off: usize| isa.apply_patch(text, patch, off);
        self.e.resolve_patches(&apply)?;

        // Imports implied by external-call relocations
        let call_symbols: Vec<String> = self
            .e
            .relocs
            .iter()
            .filter_map(|reloc| match reloc {
                Reloc::X86GotCall { symbol, .. }
                | Reloc::Arm64GotCall { symbol, .. }
                | Reloc::RiscvGotCall { symbol, .. } => Some(symbol.clone()),
                _ => None,
            })
            .collect();
        for symbol in call_symbols {
            let lib = self.target.library_for(&symbol);
            self.e.need_symbol(&symbol, &lib);
        }

        // Mach-O must link at least libSystem even when nothing is
        // called through it.
        if self.target.os == Os::Macos && self.e.needed.is_empty() {
            let lib = self.target.library_for("exit");
            self.e.need_symbol("exit", &lib);
        }

        let entry = self.e.label_offset("_start").unwrap_or(0) as u64;
        let symbols = self
            .e
            .labels()
            .map(|(n, o)| (n.to_string(), o as u64))
            .collect();
        Ok(EmittedProgram {
            text: std::mem::take(&mut self.e.text).into_vec(),
            rodata: std::mem::take(&mut self.e.rodata).into_vec(),
            data: std::mem::take(&mut self.e.data).into_vec(),
            relocs: std::mem::take(&mut self.e.relocs),
            needed: std::mem::take(&mut self.e.needed),
            entry,
            symbols,
            target: self.target,
        })
    }

    fn emit_exit(&mut self, exit_slot: u32) -> Result<()> {
        let fp = self.isa.fp();
        let off = self.isa.slot_off(exit_slot);
        let status = self.isa.arg(0);
        if self.features.contains(Feature::ExitFormat) {
            self.isa.load(&mut self.e, status, fp, off);
            let f0 = FReg(0);
            self.isa.mov_fr(&mut self.e, f0, status);
            self.isa.cvt_fi(&mut self.e, status, f0);
        } else {
            self.isa.zero(&mut self.e, status);
        }

        if self.target.os == Os::Windows {
            let rcx = helpers::ext_arg(&*self.isa, &self.target, 0);
            self.isa.mov_rr(&mut self.e, rcx, status);
            self.isa.call_sym(&mut self.e, "ExitProcess");
            self.isa.ret_insn(&mut self.e);
        } else {
            let nr = self.sys(Sys::Exit)?;
            self.isa
                .syscall(&mut self.e, nr, 1, self.target.os == Os::Macos);
        }
        Ok(())
    }

    /// Emit referenced-but-missing functions and helpers to a fixpoint.
    /// Unreferenced pending functions are never emitted; that is the
    /// dead-code elimination.
    fn drain_pending(&mut self) -> Result<()> {
        loop {
            self.collect_patch_refs();
            let next = self
                .referenced
                .iter()
                .find(|l| !self.emitted.contains(*l) && self.e.label_offset(l).is_none())
                .cloned();
            let Some(label) = next else { break };
            self.emitted.insert(label.clone());

            if let Some(pending) = self.pending.remove(&label) {
                self.emit_function(pending)?;
            } else {
                let known = helpers::emit_helper(
                    &label,
                    &mut self.e,
                    &*self.isa,
                    &self.target,
                    &self.data,
                )?;
                if !known {
                    return Err(CodeGenError::UnresolvedCall { target: label });
                }
            }
        }
        Ok(())
    }

    /// Pull call targets recorded by helpers (which bypass `self.call`)
    /// into the referenced set.
    fn collect_patch_refs(&mut self) {
        let targets: Vec<String> = self
            .e
            .patches
            .iter()
            .map(|p| p.target.clone())
            .filter(|t| self.e.label_offset(t).is_none())
            .collect();
        for t in targets {
            self.referenced.insert(t);
        }
    }

    fn finalize_tables(&mut self) {
        for (idx, label) in std::mem::take(&mut self.fn_addr_fixups) {
            let off = self.e.label_offset(&label).unwrap_or(0) as u64;
            match &mut self.e.relocs[idx] {
                Reloc::Abs64Text { text_off, .. } => *text_off = off,
                _ => {}
            }
        }
        for (at, labels) in std::mem::take(&mut self.jump_tables) {
            for (i, label) in labels.iter().enumerate() {
                let off = self.e.label_offset(label).unwrap_or(0) as u64;
                self.e.relocs.push(Reloc::Abs64Text {
                    section: Section::Data,
                    at: at + i * 8,
                    text_off: off,
                });
            }
        }
    }

    // =========================================================================
    // SMALL UTILITIES
    // =========================================================================

    fn fresh(&mut self, base: &str) -> String {
        self.label_seq += 1;
        format!("{}_{}", base, self.label_seq)
    }

    fn alloc_slot(&mut self) -> u32 {
        let s = self.slot_next;
        self.slot_next += 1;
        s
    }

    fn sys(&self, which: Sys) -> Result<i64> {
        self.target
            .syscall_nr(which)
            .ok_or_else(|| CodeGenError::UnsupportedForTarget {
                message: format!("syscall {:?} unavailable", which),
                target: self.target.to_string(),
            })
    }

    /// call_label that also feeds the used-symbol closure.
    fn call(&mut self, label: &str) {
        self.referenced.insert(label.to_string());
        self.isa.call_label(&mut self.e, label);
    }

    /// Load an f64 constant through rodata into the accumulator.
    fn load_number(&mut self, value: f64) {
        let off = self.e.float_const(value);
        let tmp = self.isa.scratch(0);
        self.isa.lea_section(&mut self.e, tmp, Section::Rodata, off);
        let f0 = FReg(0);
        self.isa.load_f(&mut self.e, f0, tmp, 0);
        self.isa.mov_rf(&mut self.e, self.acc, f0);
    }

    /// acc = 1.0 / 0.0 from an integer 0/1 in `src`.
    fn bool_to_value(&mut self, src: Reg) {
        let f0 = FReg(0);
        self.isa.cvt_if(&mut self.e, f0, src);
        self.isa.mov_rf(&mut self.e, self.acc, f0);
    }

    /// Integer 0/1 truthiness of the accumulator into `dst`.
    /// NaN (the sentinel included) and 0.0 are falsy.
    fn truthiness(&mut self, dst: Reg) {
        let f0 = FReg(0);
        let f1 = FReg(1);
        let tmp = self.isa.scratch(1);
        self.isa.mov_fr(&mut self.e, f0, self.acc);
        self.isa.zero(&mut self.e, tmp);
        self.isa.cvt_if(&mut self.e, f1, tmp);
        self.isa.fcmp_set(&mut self.e, Cond::Ne, dst, f0, f1);
    }

    /// Static type of an expression under the propagated binding types.
    fn static_type(&self, expr: &Expr) -> ValueType {
        match &expr.kind {
            ExprKind::Number(_) => ValueType::Number,
            ExprKind::Str(_) => ValueType::Str,
            ExprKind::List(_) | ExprKind::Range { .. } => ValueType::List,
            ExprKind::Map(_) => ValueType::Map,
            ExprKind::Lambda { .. } => ValueType::Func,
            ExprKind::Ident(name) => self
                .types
                .get(name)
                .copied()
                .unwrap_or(ValueType::Unknown),
            ExprKind::Binary { op, lhs, rhs } => match op {
                BinOp::Add => {
                    let (l, r) = (self.static_type(lhs), self.static_type(rhs));
                    if l == ValueType::Str && r == ValueType::Str {
                        ValueType::Str
                    } else if l == ValueType::List && r == ValueType::List {
                        ValueType::List
                    } else {
                        ValueType::Number
                    }
                }
                BinOp::Pipe | BinOp::ParPipe | BinOp::Send | BinOp::OrUnwrap => ValueType::Unknown,
                BinOp::Compose => ValueType::Func,
                _ => ValueType::Number,
            },
            ExprKind::Unary { op, .. } => match op {
                UnOp::Recv => ValueType::Unknown,
                _ => ValueType::Number,
            },
            ExprKind::Cast { ty, .. } => match ty {
                rilc_par::TypeName::Number => ValueType::Number,
                rilc_par::TypeName::Str => ValueType::Str,
                rilc_par::TypeName::List => ValueType::List,
                rilc_par::TypeName::Map => ValueType::Map,
            },
            ExprKind::Block(stmts) => stmts
                .last()
                .map(|s| self.static_type(s))
                .unwrap_or(ValueType::Unknown),
            _ => ValueType::Unknown,
        }
    }

    // =========================================================================
    // EXPRESSIONS
    // =========================================================================

    /// Emit `expr`, leaving its value bits in the accumulator.
    fn gen_expr(&mut self, expr: &Expr, tail: bool) -> Result<()> {
        match &expr.kind {
            ExprKind::Number(v) => {
                self.load_number(*v);
                Ok(())
            }
            ExprKind::Str(s) => {
                let off = self.e.rodata_string(s.as_str());
                self.isa
                    .lea_section(&mut self.e, self.acc, Section::Rodata, off);
                Ok(())
            }
            ExprKind::List(items) => self.gen_list_literal(items),
            ExprKind::Map(entries) => self.gen_map_literal(entries),
            ExprKind::Ident(name) => self.gen_ident(*name, expr.span),
            ExprKind::Binary { op, lhs, rhs } => self.gen_binary(*op, lhs, rhs, expr.span),
            ExprKind::Unary { op, operand } => self.gen_unary(*op, operand, expr.span),
            ExprKind::Call { callee, args } => self.gen_call(callee, args, expr.span, tail),
            ExprKind::Index { base, index } => self.gen_index(base, index),
            ExprKind::Field { base, name } => {
                self.gen_expr(base, false)?;
                self.isa.push(&mut self.e, self.acc);
                let key = fnv64(name.as_str()) as i64;
                self.isa.pop(&mut self.e, self.isa.arg(0));
                self.isa.mov_ri(&mut self.e, self.isa.arg(1), key);
                self.call("ril_map_get");
                Ok(())
            }
            ExprKind::Lambda {
                params,
                body,
                pure,
            } => {
                let label = self.fresh("lambda");
                let captures = self.queue_lambda(&label, params, body, *pure)?;
                self.gen_closure_value(&label, &captures)
            }
            ExprKind::Match { scrutinee, arms } => {
                self.gen_match(scrutinee.as_deref(), arms, tail)
            }
            ExprKind::Range { start, end, inclusive } => {
                self.gen_range_list(start, end, *inclusive)
            }
            ExprKind::Loop {
                binding,
                iter,
                body,
                parallel,
                bound,
            } => self.gen_loop(*binding, iter, body, *parallel, bound.as_deref()),
            ExprKind::Block(stmts) => self.gen_block(stmts, tail),
            ExprKind::Assign {
                name,
                value,
                mutable,
                shadow,
            } => self.gen_assign(*name, value, *mutable, *shadow, expr.span),
            ExprKind::Update { target, value } => self.gen_update(target, value, expr.span),
            ExprKind::Defer(action) => {
                let guard = self.alloc_slot();
                let one = self.isa.scratch(0);
                self.isa.mov_ri(&mut self.e, one, 1);
                self.isa
                    .store(&mut self.e, self.isa.fp(), self.isa.slot_off(guard), one);
                self.scope_info
                    .last_mut()
                    .expect("defer outside any scope")
                    .defers
                    .push(DeferEntry {
                        action: (**action).clone(),
                        guard_slot: guard,
                    });
                // pending cleanup must run per activation, so the frame
                // cannot be reused by tail calls
                if let Some(ctx) = &mut self.current_fn {
                    ctx.has_cleanup = true;
                }
                self.isa.zero(&mut self.e, self.acc);
                Ok(())
            }
            ExprKind::ArenaBlock(body) => {
                self.call("ril_arena_push");
                self.env.push();
                self.scope_info.push(ScopeInfo {
                    defers: Vec::new(),
                    arena: true,
                });
                if let Some(ctx) = &mut self.current_fn {
                    ctx.has_cleanup = true;
                }
                self.gen_expr(body, false)?;
                // value may point into the arena being released; that is
                // the documented escape hazard of arena blocks
                self.isa.push(&mut self.e, self.acc);
                self.flush_one_scope()?;
                self.isa.pop(&mut self.e, self.acc);
                self.scope_info.pop();
                self.env.pop();
                Ok(())
            }
            ExprKind::UnsafeAsm(variants) => self.gen_unsafe(variants, expr.span),
            ExprKind::Import { .. } => {
                // Imports are resolved and spliced before emission.
                self.isa.zero(&mut self.e, self.acc);
                Ok(())
            }
            ExprKind::Cast { value, .. } => {
                // Casts steer operator dispatch only; the representation
                // is uniform.
                self.gen_expr(value, tail)
            }
            ExprKind::Break { depth } => self.gen_break(*depth, expr.span),
            ExprKind::Continue { depth } => self.gen_continue(*depth, expr.span),
            ExprKind::Return(value) => {
                if let Some(v) = value {
                    self.gen_expr(v, false)?;
                } else {
                    self.isa.zero(&mut self.e, self.acc);
                }
                self.gen_fn_return()
            }
        }
    }

    fn gen_block(&mut self, stmts: &[Expr], tail: bool) -> Result<()> {
        self.env.push();
        self.scope_info.push(ScopeInfo {
            defers: Vec::new(),
            arena: false,
        });
        self.isa.zero(&mut self.e, self.acc);
        for (i, stmt) in stmts.iter().enumerate() {
            let last = i == stmts.len() - 1;
            self.gen_expr(stmt, tail && last)?;
        }
        self.isa.push(&mut self.e, self.acc);
        self.flush_one_scope()?;
        self.isa.pop(&mut self.e, self.acc);
        self.scope_info.pop();
        self.env.pop();
        Ok(())
    }

    fn gen_ident(&mut self, name: Symbol, span: Span) -> Result<()> {
        let binding = self
            .env
            .lookup(name)
            .cloned()
            .ok_or_else(|| CodeGenError::UndefinedName {
                name: name.as_str().to_string(),
                span,
            })?;
        match binding.storage {
            Storage::Slot(i) => {
                let off = self.isa.slot_off(i);
                self.isa.load(&mut self.e, self.acc, self.isa.fp(), off);
            }
            Storage::Global(off) => {
                let tmp = self.isa.scratch(0);
                self.isa.lea_section(&mut self.e, tmp, Section::Data, off);
                self.isa.load(&mut self.e, self.acc, tmp, 0);
            }
            Storage::Function { ref label, .. } => {
                // A function used as a value materializes its static
                // closure pair {env = 0, fn}.
                let label = label.clone();
                let pair = self.static_pair_for(&label);
                self.isa
                    .lea_section(&mut self.e, self.acc, Section::Data, pair);
            }
            Storage::Captured(i) => {
                let envp = self.load_env_ptr();
                self.isa
                    .load(&mut self.e, self.acc, envp, 8 * i as i32);
                let acc = self.acc;
                self.isa.load(&mut self.e, acc, acc, 0);
            }
        }
        Ok(())
    }

    /// Data-segment closure pair for a direct function: [env=0][fn].
    fn static_pair_for(&mut self, label: &str) -> u64 {
        self.referenced.insert(label.to_string());
        let at = self.e.data_reserve(16, 8);
        let idx = self.e.relocs.len();
        self.e.relocs.push(Reloc::Abs64Text {
            section: Section::Data,
            at: at as usize + 8,
            text_off: 0,
        });
        self.fn_addr_fixups.push((idx, label.to_string()));
        at
    }

    /// The closure environment pointer saved in the frame's slot 0 of a
    /// capturing function.
    fn load_env_ptr(&mut self) -> Reg {
        let tmp = self.isa.scratch(1);
        // env pointer parked in the highest-numbered reserved slot (0)
        let off = self.isa.slot_off(0);
        self.isa.load(&mut self.e, tmp, self.isa.fp(), off);
        tmp
    }

    // ---- literals -----------------------------------------------------

    fn gen_list_literal(&mut self, items: &[Expr]) -> Result<()> {
        // allocate 8 + 8n, fill the length, then each element
        let n = items.len();
        self.isa
            .mov_ri(&mut self.e, self.isa.arg(0), (8 + 8 * n) as i64);
        self.call("ril_arena_alloc");
        self.isa.push(&mut self.e, self.acc);
        let tmp = self.isa.scratch(0);
        self.isa.mov_ri(&mut self.e, tmp, n as i64);
        self.isa.store(&mut self.e, self.acc, 0, tmp);

        for (i, item) in items.iter().enumerate() {
            self.gen_expr(item, false)?;
            let val = self.isa.scratch(0);
            let list = self.isa.scratch(1);
            self.isa.mov_rr(&mut self.e, val, self.acc);
            self.isa.pop(&mut self.e, list);
            self.isa.push(&mut self.e, list);
            self.isa
                .store(&mut self.e, list, (8 + 8 * i) as i32, val);
        }
        self.isa.pop(&mut self.e, self.acc);
        Ok(())
    }

    fn gen_map_literal(&mut self, entries: &[(Expr, Expr)]) -> Result<()> {
        let n = entries.len();
        self.isa
            .mov_ri(&mut self.e, self.isa.arg(0), (8 + 16 * n) as i64);
        self.call("ril_arena_alloc");
        self.isa.push(&mut self.e, self.acc);
        let tmp = self.isa.scratch(0);
        self.isa.mov_ri(&mut self.e, tmp, n as i64);
        self.isa.store(&mut self.e, self.acc, 0, tmp);

        for (i, (key, value)) in entries.iter().enumerate() {
            // bare identifier keys are symbolic (hashed at compile time)
            match &key.kind {
                ExprKind::Ident(name) => {
                    let k = fnv64(name.as_str()) as i64;
                    let tmp = self.isa.scratch(0);
                    self.isa.mov_ri(&mut self.e, tmp, k);
                    self.isa.mov_rr(&mut self.e, self.acc, tmp);
                }
                _ => self.gen_expr(key, false)?,
            }
            let map = self.isa.scratch(1);
            self.isa.pop(&mut self.e, map);
            self.isa.push(&mut self.e, map);
            self.isa
                .store(&mut self.e, map, (8 + 16 * i) as i32, self.acc);

            self.gen_expr(value, false)?;
            let map = self.isa.scratch(1);
            self.isa.pop(&mut self.e, map);
            self.isa.push(&mut self.e, map);
            self.isa
                .store(&mut self.e, map, (8 + 16 * i + 8) as i32, self.acc);
        }
        self.isa.pop(&mut self.e, self.acc);
        Ok(())
    }

    /// Ranges outside loop headers materialize as lists.
    fn gen_range_list(&mut self, start: &Expr, end: &Expr, inclusive: bool) -> Result<()> {
        // n = end - start (+1); clamp negatives to empty
        self.gen_expr(start, false)?;
        self.isa.push(&mut self.e, self.acc);
        self.gen_expr(end, false)?;

        let f0 = FReg(0);
        let f1 = FReg(1);
        let lo = self.isa.arg(4);
        let n = self.isa.arg(5);
        let tmp = self.isa.scratch(0);

        self.isa.mov_fr(&mut self.e, f1, self.acc);
        self.isa.cvt_fi(&mut self.e, n, f1);
        self.isa.pop(&mut self.e, tmp);
        self.isa.mov_fr(&mut self.e, f0, tmp);
        self.isa.cvt_fi(&mut self.e, lo, f0);
        self.isa.sub(&mut self.e, n, lo);
        if inclusive {
            self.isa.add_ri(&mut self.e, n, 1);
        }
        let build = self.fresh("range_build");
        self.isa.zero(&mut self.e, tmp);
        self.isa.jcc(&mut self.e, Cond::Ge, n, tmp, &build);
        self.isa.zero(&mut self.e, n);
        self.e.define_label(&build)?;

        // alloc 8 + 8n; fill with lo, lo+1, ...
        let lo_slot = self.alloc_slot();
        let n_slot = self.alloc_slot();
        let fp = self.isa.fp();
        self.isa.store(&mut self.e, fp, self.isa.slot_off(lo_slot), lo);
        self.isa.store(&mut self.e, fp, self.isa.slot_off(n_slot), n);
        self.isa.mov_ri(&mut self.e, tmp, 3);
        self.isa.mov_rr(&mut self.e, self.isa.arg(0), n);
        self.isa.shl(&mut self.e, self.isa.arg(0), tmp);
        self.isa.add_ri(&mut self.e, self.isa.arg(0), 8);
        self.call("ril_arena_alloc");

        let list = self.isa.arg(4);
        let i = self.isa.arg(3);
        let lo = self.isa.arg(2);
        let n = self.isa.arg(5);
        self.isa.mov_rr(&mut self.e, list, self.acc);
        self.isa.load(&mut self.e, n, fp, self.isa.slot_off(n_slot));
        self.isa.load(&mut self.e, lo, fp, self.isa.slot_off(lo_slot));
        self.isa.store(&mut self.e, list, 0, n);
        self.isa.zero(&mut self.e, i);

        let head = self.fresh("range_fill");
        let done = self.fresh("range_done");
        self.e.define_label(&head)?;
        self.isa.jcc(&mut self.e, Cond::Ge, i, n, &done);
        // value = (f64)(lo + i)
        let tmp = self.isa.scratch(0);
        self.isa.mov_rr(&mut self.e, tmp, lo);
        self.isa.add(&mut self.e, tmp, i);
        let f0 = FReg(0);
        self.isa.cvt_if(&mut self.e, f0, tmp);
        // slot address = list + 8 + 8i
        self.isa.mov_rr(&mut self.e, tmp, i);
        let t2 = self.isa.scratch(1);
        self.isa.mov_ri(&mut self.e, t2, 3);
        self.isa.shl(&mut self.e, tmp, t2);
        self.isa.add(&mut self.e, tmp, list);
        self.isa.store_f(&mut self.e, tmp, 8, f0);
        self.isa.add_ri(&mut self.e, i, 1);
        self.isa.jmp(&mut self.e, &head);
        self.e.define_label(&done)?;
        self.isa.mov_rr(&mut self.e, self.acc, list);
        Ok(())
    }

    // ---- operators ----------------------------------------------------

    fn gen_binary(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr, span: Span) -> Result<()> {
        match op {
            BinOp::And | BinOp::Or => return self.gen_logical(op, lhs, rhs),
            BinOp::OrUnwrap => return self.gen_or_unwrap(lhs, rhs),
            BinOp::Pipe => return self.gen_call(rhs, std::slice::from_ref(lhs), span, false),
            BinOp::ParPipe => return self.gen_par_map(lhs, rhs, span),
            BinOp::Compose => return self.gen_compose(lhs, rhs, span),
            BinOp::Send => return self.gen_helper_binop("ril_chan_send", lhs, rhs),
            BinOp::In => return self.gen_helper_binop("ril_in_list", lhs, rhs),
            BinOp::Pow => return self.gen_helper_binop("ril_pow", lhs, rhs),
            BinOp::Add => {
                let (lt, rt) = (self.static_type(lhs), self.static_type(rhs));
                if lt == ValueType::Str && rt == ValueType::Str {
                    return self.gen_helper_binop("ril_concat", lhs, rhs);
                }
                if lt == ValueType::List && rt == ValueType::List {
                    return self.gen_helper_binop("ril_list_concat", lhs, rhs);
                }
            }
            _ => {}
        }

        // numeric / bitwise / comparison path: lhs on the stack, rhs in
        // the accumulator
        self.gen_expr(lhs, false)?;
        self.isa.push(&mut self.e, self.acc);
        self.gen_expr(rhs, false)?;
        let lhs_r = self.isa.scratch(0);
        let rhs_r = self.acc;
        self.isa.pop(&mut self.e, lhs_r);

        let f0 = FReg(0);
        let f1 = FReg(1);
        self.isa.mov_fr(&mut self.e, f0, lhs_r);
        self.isa.mov_fr(&mut self.e, f1, rhs_r);

        match op {
            BinOp::Add => {
                self.isa.fadd(&mut self.e, f0, f1);
                self.isa.mov_rf(&mut self.e, self.acc, f0);
            }
            BinOp::Sub => {
                self.isa.fsub(&mut self.e, f0, f1);
                self.isa.mov_rf(&mut self.e, self.acc, f0);
            }
            BinOp::Mul => {
                self.isa.fmul(&mut self.e, f0, f1);
                self.isa.mov_rf(&mut self.e, self.acc, f0);
            }
            BinOp::Div => {
                let (bad, done) = self.begin_div_guard(f1)?;
                self.isa.fdiv(&mut self.e, f0, f1);
                self.isa.mov_rf(&mut self.e, self.acc, f0);
                self.end_div_guard(bad, done)?;
            }
            BinOp::Rem | BinOp::FloorRem => {
                let (bad, done) = self.begin_div_guard(f1)?;
                self.gen_remainder(op == BinOp::FloorRem)?;
                self.end_div_guard(bad, done)?;
            }
            BinOp::ShlB | BinOp::ShrB | BinOp::AndB | BinOp::OrB | BinOp::XorB => {
                // bitwise works on the integer views
                let a = self.isa.scratch(0);
                let b = self.isa.scratch(1);
                self.isa.cvt_fi(&mut self.e, a, f0);
                self.isa.cvt_fi(&mut self.e, b, f1);
                match op {
                    BinOp::ShlB => self.isa.shl(&mut self.e, a, b),
                    BinOp::ShrB => self.isa.shr(&mut self.e, a, b),
                    BinOp::AndB => self.isa.and(&mut self.e, a, b),
                    BinOp::OrB => self.isa.or(&mut self.e, a, b),
                    BinOp::XorB => self.isa.xor(&mut self.e, a, b),
                    _ => unreachable!(),
                }
                self.bool_like_int_to_value(a);
            }
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                let cond = match op {
                    BinOp::Eq => Cond::Eq,
                    BinOp::Ne => Cond::Ne,
                    BinOp::Lt => Cond::Lt,
                    BinOp::Le => Cond::Le,
                    BinOp::Gt => Cond::Gt,
                    _ => Cond::Ge,
                };
                let dst = self.isa.scratch(0);
                self.isa.fcmp_set(&mut self.e, cond, dst, f0, f1);
                self.bool_to_value(dst);
            }
            other => {
                return Err(CodeGenError::Internal(format!(
                    "binary op {:?} fell through dispatch at {}",
                    other, span
                )))
            }
        }
        Ok(())
    }

    /// Two-operand helper call: lhs in arg(0), rhs in arg(1).
    fn gen_helper_binop(&mut self, helper: &str, lhs: &Expr, rhs: &Expr) -> Result<()> {
        self.gen_expr(lhs, false)?;
        self.isa.push(&mut self.e, self.acc);
        self.gen_expr(rhs, false)?;
        self.isa.mov_rr(&mut self.e, self.isa.arg(1), self.acc);
        self.isa.pop(&mut self.e, self.isa.arg(0));
        self.call(helper);
        Ok(())
    }

    /// Integer result back to number representation.
    fn bool_like_int_to_value(&mut self, src: Reg) {
        let f0 = FReg(0);
        self.isa.cvt_if(&mut self.e, f0, src);
        self.isa.mov_rf(&mut self.e, self.acc, f0);
    }

    /// Open a divisor-zero guard. Returns labels the caller closes with
    /// [`end_div_guard`](Self::end_div_guard) once the real operation is
    /// emitted; a zero divisor takes the sentinel path instead. With
    /// checks disabled both labels are `None`.
    fn begin_div_guard(&mut self, divisor: FReg) -> Result<(Option<String>, Option<String>)> {
        if !self.config.runtime_checks {
            return Ok((None, None));
        }
        let bad = self.fresh("div_zero");
        let done = self.fresh("div_done");
        let tmp = self.isa.scratch(1);
        let fz = FReg(5);
        self.isa.zero(&mut self.e, tmp);
        self.isa.cvt_if(&mut self.e, fz, tmp);
        self.isa.fjcc(&mut self.e, Cond::Eq, divisor, fz, &bad);
        Ok((Some(bad), Some(done)))
    }

    fn end_div_guard(&mut self, bad: Option<String>, done: Option<String>) -> Result<()> {
        let (Some(bad), Some(done)) = (bad, done) else {
            return Ok(());
        };
        self.isa.jmp(&mut self.e, &done);
        self.e.define_label(&bad)?;
        self.isa
            .mov_ri(&mut self.e, self.acc, ERR_SENTINEL as i64);
        self.e.define_label(&done)?;
        Ok(())
    }

    /// `a % b` (truncated) or `a %% b` (floored), operands in f0/f1.
    fn gen_remainder(&mut self, floored: bool) -> Result<()> {
        let f0 = FReg(0);
        let f1 = FReg(1);
        let f2 = FReg(2);
        let f3 = FReg(3);
        let tmp = self.isa.scratch(1);

        // q = a / b, truncated (or floored)
        self.isa.mov_rf(&mut self.e, tmp, f0);
        self.isa.mov_fr(&mut self.e, f2, tmp); // f2 = a
        self.isa.fdiv(&mut self.e, f2, f1); // f2 = a/b
        self.isa.cvt_fi(&mut self.e, tmp, f2);
        self.isa.cvt_if(&mut self.e, f3, tmp); // f3 = trunc(a/b)
        if floored {
            // if trunc > quotient, the floor is one lower
            let no_adjust = self.fresh("rem_noadj");
            self.isa.fjcc(&mut self.e, Cond::Le, f3, f2, &no_adjust);
            let one = self.e.float_const(1.0);
            let t2 = self.isa.scratch(0);
            self.isa.lea_section(&mut self.e, t2, Section::Rodata, one);
            let fone = FReg(4);
            self.isa.load_f(&mut self.e, fone, t2, 0);
            self.isa.fsub(&mut self.e, f3, fone);
            self.e.define_label(&no_adjust)?;
        }
        // r = a - q*b
        self.isa.fmul(&mut self.e, f3, f1);
        self.isa.fsub(&mut self.e, f0, f3);
        self.isa.mov_rf(&mut self.e, self.acc, f0);
        Ok(())
    }

    fn gen_logical(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr) -> Result<()> {
        let short = self.fresh("logic_short");
        let done = self.fresh("logic_done");
        let t = self.isa.scratch(0);
        let zero = self.isa.scratch(1);

        self.gen_expr(lhs, false)?;
        self.truthiness(t);
        self.isa.zero(&mut self.e, zero);
        match op {
            BinOp::And => self.isa.jcc(&mut self.e, Cond::Eq, t, zero, &short),
            _ => self.isa.jcc(&mut self.e, Cond::Ne, t, zero, &short),
        }
        self.gen_expr(rhs, false)?;
        let t = self.isa.scratch(0);
        self.truthiness(t);
        self.bool_to_value(t);
        self.isa.jmp(&mut self.e, &done);

        self.e.define_label(&short)?;
        let v = if op == BinOp::And { 0.0 } else { 1.0 };
        self.load_number(v);
        self.e.define_label(&done)?;
        Ok(())
    }

    /// `v or! fallback`: the sentinel NaN and the pointer-like zero both
    /// take the fallback.
    fn gen_or_unwrap(&mut self, lhs: &Expr, rhs: &Expr) -> Result<()> {
        let bad = self.fresh("unwrap_bad");
        let done = self.fresh("unwrap_done");
        let t = self.isa.scratch(0);
        let s = self.isa.scratch(1);

        self.gen_expr(lhs, false)?;
        self.isa
            .mov_ri(&mut self.e, s, ERR_SENTINEL as i64);
        self.isa.jcc(&mut self.e, Cond::Eq, self.acc, s, &bad);
        self.isa.zero(&mut self.e, t);
        self.isa.jcc(&mut self.e, Cond::Eq, self.acc, t, &bad);
        self.isa.jmp(&mut self.e, &done);
        self.e.define_label(&bad)?;
        self.gen_expr(rhs, false)?;
        self.e.define_label(&done)?;
        Ok(())
    }

    /// `f <> g` builds a composed closure would need runtime synthesis;
    /// composition is applied at call sites instead: `(f <> g)(x)` is
    /// `f(g(x))`. As a value, the left function is produced.
    fn gen_compose(&mut self, lhs: &Expr, _rhs: &Expr, span: Span) -> Result<()> {
        self.handler.warning(
            codes::W_COMPOSED_VALUE,
            "composition used as a value applies at call sites only",
            span,
        );
        self.gen_expr(lhs, false)
    }

    fn gen_unary(&mut self, op: UnOp, operand: &Expr, _span: Span) -> Result<()> {
        match op {
            UnOp::Recv => {
                self.gen_expr(operand, false)?;
                self.isa.mov_rr(&mut self.e, self.isa.arg(0), self.acc);
                self.call("ril_chan_recv");
                Ok(())
            }
            UnOp::Plus => self.gen_expr(operand, false),
            UnOp::Neg => {
                self.gen_expr(operand, false)?;
                let f0 = FReg(0);
                let f1 = FReg(1);
                let tmp = self.isa.scratch(0);
                self.isa.mov_fr(&mut self.e, f1, self.acc);
                self.isa.zero(&mut self.e, tmp);
                self.isa.cvt_if(&mut self.e, f0, tmp);
                self.isa.fsub(&mut self.e, f0, f1);
                self.isa.mov_rf(&mut self.e, self.acc, f0);
                Ok(())
            }
            UnOp::Not => {
                self.gen_expr(operand, false)?;
                let t = self.isa.scratch(0);
                self.truthiness(t);
                // invert
                let one = self.isa.scratch(1);
                self.isa.mov_ri(&mut self.e, one, 1);
                self.isa.xor(&mut self.e, t, one);
                self.bool_to_value(t);
                Ok(())
            }
            UnOp::BitNot => {
                self.gen_expr(operand, false)?;
                let f0 = FReg(0);
                let t = self.isa.scratch(0);
                self.isa.mov_fr(&mut self.e, f0, self.acc);
                self.isa.cvt_fi(&mut self.e, t, f0);
                self.isa.not(&mut self.e, t);
                self.bool_like_int_to_value(t);
                Ok(())
            }
            UnOp::Len => {
                self.gen_expr(operand, false)?;
                let done = self.fresh("len_done");
                let t = self.isa.scratch(0);
                if self.config.runtime_checks {
                    // null object has length zero
                    self.isa.zero(&mut self.e, t);
                    self.isa
                        .jcc(&mut self.e, Cond::Eq, self.acc, t, &done);
                }
                let acc = self.acc;
                self.isa.load(&mut self.e, acc, acc, 0);
                self.e.define_label(&done)?;
                let acc = self.acc;
                self.bool_like_int_to_value(acc);
                Ok(())
            }
        }
    }

    fn gen_index(&mut self, base: &Expr, index: &Expr) -> Result<()> {
        if self.static_type(base) == ValueType::Map {
            self.gen_expr(base, false)?;
            self.isa.push(&mut self.e, self.acc);
            self.gen_expr(index, false)?;
            self.isa.mov_rr(&mut self.e, self.isa.arg(1), self.acc);
            self.isa.pop(&mut self.e, self.isa.arg(0));
            self.call("ril_map_get");
            return Ok(());
        }

        self.gen_expr(base, false)?;
        self.isa.push(&mut self.e, self.acc);
        self.gen_expr(index, false)?;

        let f0 = FReg(0);
        let idx = self.isa.scratch(0);
        let list = self.isa.scratch(1);
        self.isa.mov_fr(&mut self.e, f0, self.acc);
        self.isa.cvt_fi(&mut self.e, idx, f0);
        self.isa.pop(&mut self.e, list);

        let bad = self.fresh("idx_bad");
        let done = self.fresh("idx_done");
        if self.config.runtime_checks {
            let t = self.isa.arg(5);
            self.isa.zero(&mut self.e, t);
            self.isa.jcc(&mut self.e, Cond::Eq, list, t, &bad);
            self.isa.jcc(&mut self.e, Cond::Lt, idx, t, &bad);
            self.isa.load(&mut self.e, t, list, 0);
            self.isa.jcc(&mut self.e, Cond::Ge, idx, t, &bad);
        }
        // acc = [list + 8 + 8*idx]
        let t2 = self.isa.arg(5);
        self.isa.mov_ri(&mut self.e, t2, 3);
        self.isa.shl(&mut self.e, idx, t2);
        self.isa.add(&mut self.e, list, idx);
        self.isa.load(&mut self.e, self.acc, list, 8);
        self.isa.jmp(&mut self.e, &done);
        self.e.define_label(&bad)?;
        self.isa
            .mov_ri(&mut self.e, self.acc, ERR_SENTINEL as i64);
        self.e.define_label(&done)?;
        Ok(())
    }

    // Remaining sections (calls, lambdas, match, loops, bindings,
    // unsafe blocks, function emission) continue in `codegen_calls.rs`
    // and `codegen_control.rs`.
}

mod codegen_calls;
mod codegen_control;

mod edge_cases;

/// FNV-1a over a field name: the compile-time key of symbolic map keys.
pub fn fnv64(s: &str) -> u64 {
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for b in s.as_bytes() {
        h ^= *b as u64;
        h = h.wrapping_mul(0x100_0000_01b3);
    }
    h
}

/// Conservative frame-slot estimate for one statement subtree.
fn count_slots(expr: &Expr) -> u32 {
    let own = match &expr.kind {
        ExprKind::Assign { .. } => 1,
        ExprKind::Loop { .. } => 8,
        ExprKind::Match { .. } => 2,
        ExprKind::Defer(_) => 1,
        ExprKind::Range { .. } => 2,
        ExprKind::Lambda { .. } => 1,
        // the parallel map stages source/result/index in slots
        ExprKind::Binary {
            op: BinOp::ParPipe, ..
        } => 3,
        // SIMD builtins stage their operand lists in slots
        ExprKind::Call { .. } => 4,
        _ => 0,
    };
    own + children_of(expr).iter().map(|c| count_slots(c)).sum::<u32>()
}

fn children_of(expr: &Expr) -> Vec<&Expr> {
    match &expr.kind {
        ExprKind::Number(_)
        | ExprKind::Str(_)
        | ExprKind::Ident(_)
        | ExprKind::Import { .. }
        | ExprKind::UnsafeAsm(_)
        | ExprKind::Break { .. }
        | ExprKind::Continue { .. } => Vec::new(),
        ExprKind::List(items) => items.iter().collect(),
        ExprKind::Map(entries) => entries.iter().flat_map(|(k, v)| [k, v]).collect(),
        ExprKind::Binary { lhs, rhs, .. } => vec![lhs, rhs],
        ExprKind::Unary { operand, .. } => vec![operand],
        ExprKind::Call { callee, args } => {
            let mut v: Vec<&Expr> = vec![callee];
            v.extend(args.iter());
            v
        }
        ExprKind::Index { base, index } => vec![base, index],
        ExprKind::Field { base, .. } => vec![base],
        // a lambda body is its own frame
        ExprKind::Lambda { .. } => Vec::new(),
        ExprKind::Match { scrutinee, arms } => {
            let mut v: Vec<&Expr> = Vec::new();
            if let Some(s) = scrutinee {
                v.push(s);
            }
            for arm in arms {
                if let Some(p) = &arm.pattern {
                    v.push(p);
                }
                v.push(&arm.body);
            }
            v
        }
        ExprKind::Range { start, end, .. } => vec![start, end],
        ExprKind::Loop {
            iter, body, bound, ..
        } => {
            let mut v = vec![iter.as_ref(), body.as_ref()];
            if let Some(b) = bound {
                v.push(b);
            }
            v
        }
        ExprKind::Block(stmts) => stmts.iter().collect(),
        ExprKind::Assign { value, .. } => vec![value],
        ExprKind::Update { target, value } => vec![target, value],
        ExprKind::Defer(action) => vec![action],
        ExprKind::ArenaBlock(body) => vec![body],
        ExprKind::Cast { value, .. } => vec![value],
        ExprKind::Return(value) => value.iter().map(|b| b.as_ref()).collect(),
    }
}

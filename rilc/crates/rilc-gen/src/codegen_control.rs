//! Control flow and binding emission: match (linear and jump-table),
//! loops (sequential and fork-parallel), assignment, defer/arena exits,
//! and whole-function emission with memoization and TCO support.

use rilc_par::{AsmVariant, Expr, ExprKind, MatchArm};
use rilc_util::{Span, Symbol};

use crate::asm_sub;
use crate::backend::{Cond, FReg};
use crate::emit::Section;
use crate::env::{Binding, DeferEntry, LoopFrame, Storage};
use crate::error::{CodeGenError, Result};
use rilc_util::diagnostic::codes;

use crate::{count_slots, CodeGen, FnCtx, Os, PendingFn, ScopeInfo, Sys, ERR_SENTINEL};

/// Jump tables pay off from this arm count, provided the value range is
/// dense (no more than twice the arm count).
const JUMP_TABLE_MIN_ARMS: usize = 10;

impl<'h> CodeGen<'h> {
    // =========================================================================
    // MATCH
    // =========================================================================

    pub(crate) fn gen_match(
        &mut self,
        scrutinee: Option<&Expr>,
        arms: &[MatchArm],
        tail: bool,
    ) -> Result<()> {
        let end = self.fresh("match_end");

        match scrutinee {
            Some(s) => {
                let scrut_slot = self.alloc_slot();
                self.gen_expr(s, false)?;
                let acc = self.acc;
                let fp = self.isa.fp();
                let off = self.isa.slot_off(scrut_slot);
                self.isa.store(&mut self.e, fp, off, acc);

                if let Some(table) = dense_int_arms(arms) {
                    self.gen_match_table(scrut_slot, arms, table, &end, tail)?;
                } else {
                    self.gen_match_linear(scrut_slot, arms, &end, tail)?;
                }
            }
            None => self.gen_guard_match(arms, &end, tail)?,
        }

        self.e.define_label(&end)?;
        Ok(())
    }

    fn gen_match_linear(
        &mut self,
        scrut_slot: u32,
        arms: &[MatchArm],
        end: &str,
        tail: bool,
    ) -> Result<()> {
        let mut has_default = false;
        for arm in arms {
            match &arm.pattern {
                Some(pat) => {
                    let next = self.fresh("arm_next");
                    self.gen_expr(pat, false)?;
                    let acc = self.acc;
                    let fp = self.isa.fp();
                    let off = self.isa.slot_off(scrut_slot);
                    let t = self.isa.scratch(0);
                    self.isa.load(&mut self.e, t, fp, off);
                    let f0 = FReg(0);
                    let f1 = FReg(1);
                    self.isa.mov_fr(&mut self.e, f0, t);
                    self.isa.mov_fr(&mut self.e, f1, acc);
                    self.isa.fjcc(&mut self.e, Cond::Ne, f0, f1, &next);
                    self.gen_expr(&arm.body, tail)?;
                    self.isa.jmp(&mut self.e, end);
                    self.e.define_label(&next)?;
                }
                None => {
                    has_default = true;
                    self.gen_expr(&arm.body, tail)?;
                    self.isa.jmp(&mut self.e, end);
                }
            }
        }
        if !has_default {
            // unmatched scrutinee: the error sentinel
            let acc = self.acc;
            self.isa.mov_ri(&mut self.e, acc, ERR_SENTINEL as i64);
        }
        Ok(())
    }

    /// O(1) dispatch through an absolute-address table in rodata.
    fn gen_match_table(
        &mut self,
        scrut_slot: u32,
        arms: &[MatchArm],
        (min, max): (i64, i64),
        end: &str,
        tail: bool,
    ) -> Result<()> {
        let default_label = self.fresh("tbl_default");
        let span = (max - min + 1) as usize;

        // per-value arm labels, defaulting the holes
        let mut value_labels: Vec<String> = vec![default_label.clone(); span];
        let mut arm_labels = Vec::new();
        for arm in arms {
            let label = self.fresh("tbl_arm");
            if let Some(v) = arm_int_value(arm) {
                value_labels[(v - min) as usize] = label.clone();
            }
            arm_labels.push(label);
        }

        // the table lives in the data segment: its slots hold absolute
        // text addresses, which stay rebasable under ASLR containers
        let table_at = self.e.data_reserve(span * 8, 8) as usize;
        self.jump_tables.push((table_at, value_labels));

        // dispatch: non-integral or out-of-range goes to the default arm
        let fp = self.isa.fp();
        let off = self.isa.slot_off(scrut_slot);
        let idx = self.isa.scratch(0);
        let t = self.isa.scratch(1);
        let f0 = FReg(0);
        let f1 = FReg(1);
        self.isa.load(&mut self.e, t, fp, off);
        self.isa.mov_fr(&mut self.e, f0, t);
        self.isa.cvt_fi(&mut self.e, idx, f0);
        self.isa.cvt_if(&mut self.e, f1, idx);
        self.isa.fjcc(&mut self.e, Cond::Ne, f0, f1, &default_label);

        self.isa.add_ri(&mut self.e, idx, -(min as i32));
        self.isa.zero(&mut self.e, t);
        self.isa.jcc(&mut self.e, Cond::Lt, idx, t, &default_label);
        self.isa.mov_ri(&mut self.e, t, span as i64);
        self.isa.jcc(&mut self.e, Cond::Ge, idx, t, &default_label);

        self.isa
            .lea_section(&mut self.e, t, Section::Data, table_at as u64);
        let t3 = self.isa.arg(5);
        self.isa.mov_ri(&mut self.e, t3, 3);
        self.isa.shl(&mut self.e, idx, t3);
        self.isa.add(&mut self.e, t, idx);
        self.isa.load(&mut self.e, t, t, 0);
        self.isa.jmp_reg(&mut self.e, t);

        // arm bodies
        let mut default_emitted = false;
        for (arm, label) in arms.iter().zip(&arm_labels) {
            if arm.pattern.is_none() {
                self.e.define_label(&default_label)?;
                default_emitted = true;
            } else {
                self.e.define_label(label)?;
            }
            self.gen_expr(&arm.body, tail)?;
            self.isa.jmp(&mut self.e, end);
        }
        if !default_emitted {
            self.e.define_label(&default_label)?;
            let acc = self.acc;
            self.isa.mov_ri(&mut self.e, acc, ERR_SENTINEL as i64);
            self.isa.jmp(&mut self.e, end);
        }
        Ok(())
    }

    fn gen_guard_match(&mut self, arms: &[MatchArm], end: &str, tail: bool) -> Result<()> {
        let mut has_default = false;
        for arm in arms {
            match &arm.pattern {
                Some(guard) => {
                    let next = self.fresh("guard_next");
                    self.gen_expr(guard, false)?;
                    let t = self.isa.scratch(0);
                    self.truthiness(t);
                    let z = self.isa.scratch(1);
                    self.isa.zero(&mut self.e, z);
                    self.isa.jcc(&mut self.e, Cond::Eq, t, z, &next);
                    self.gen_expr(&arm.body, tail)?;
                    self.isa.jmp(&mut self.e, end);
                    self.e.define_label(&next)?;
                }
                None => {
                    has_default = true;
                    self.gen_expr(&arm.body, tail)?;
                    self.isa.jmp(&mut self.e, end);
                }
            }
        }
        if !has_default {
            let acc = self.acc;
            self.isa.mov_ri(&mut self.e, acc, ERR_SENTINEL as i64);
        }
        Ok(())
    }

    // =========================================================================
    // LOOPS
    // =========================================================================

    pub(crate) fn gen_loop(
        &mut self,
        binding: Option<Symbol>,
        iter: &Expr,
        body: &Expr,
        parallel: bool,
        bound: Option<&Expr>,
    ) -> Result<()> {
        // iteration space: [lo, hi) plus an optional list to index
        let lo_slot = self.alloc_slot();
        let hi_slot = self.alloc_slot();
        let list_slot = self.alloc_slot();
        let fp = self.isa.fp();

        let is_range = matches!(iter.kind, ExprKind::Range { .. });
        let statically_bounded = match &iter.kind {
            ExprKind::Range { end, .. } => matches!(end.kind, ExprKind::Number(_)),
            // list iteration is bounded by the list's length
            _ => true,
        };

        match &iter.kind {
            ExprKind::Range {
                start,
                end,
                inclusive,
            } => {
                self.gen_expr(start, false)?;
                self.acc_to_int_slot(lo_slot);
                self.gen_expr(end, false)?;
                self.acc_to_int_slot(hi_slot);
                if *inclusive {
                    let t = self.isa.scratch(0);
                    self.isa.load(&mut self.e, t, fp, self.isa.slot_off(hi_slot));
                    self.isa.add_ri(&mut self.e, t, 1);
                    self.isa.store(&mut self.e, fp, self.isa.slot_off(hi_slot), t);
                }
                let z = self.isa.scratch(0);
                self.isa.zero(&mut self.e, z);
                self.isa.store(&mut self.e, fp, self.isa.slot_off(list_slot), z);
            }
            _ => {
                self.gen_expr(iter, false)?;
                let acc = self.acc;
                self.isa.store(&mut self.e, fp, self.isa.slot_off(list_slot), acc);
                let t = self.isa.scratch(0);
                self.isa.load(&mut self.e, t, acc, 0);
                self.isa.store(&mut self.e, fp, self.isa.slot_off(hi_slot), t);
                let z = self.isa.scratch(0);
                self.isa.zero(&mut self.e, z);
                self.isa.store(&mut self.e, fp, self.isa.slot_off(lo_slot), z);
            }
        }

        // clamp the iteration count when the bound is not provable
        if let Some(b) = bound {
            self.gen_expr(b, false)?;
            self.clamp_hi(lo_slot, hi_slot);
        } else if !statically_bounded {
            self.handler.warning(
                codes::W_LOOP_DEFAULT_BOUND,
                format!(
                    "loop bound not statically known; capped at {} iterations (use 'max')",
                    self.config.default_loop_bound
                ),
                iter.span,
            );
            let cap = self.config.default_loop_bound as f64;
            self.load_number(cap);
            self.clamp_hi(lo_slot, hi_slot);
        }

        if parallel && self.target.has_fork() {
            self.gen_fork_loop(binding, body, is_range, lo_slot, hi_slot, list_slot)
        } else {
            // without fork the parallel form degrades to the sequential
            // schedule, which the no-ordering guarantee permits
            self.gen_loop_core(binding, body, is_range, lo_slot, hi_slot, list_slot)?;
            let acc = self.acc;
            self.isa.zero(&mut self.e, acc);
            Ok(())
        }
    }

    /// acc (f64 bits) -> truncated integer stored in a slot.
    fn acc_to_int_slot(&mut self, slot: u32) {
        let f0 = FReg(0);
        let t = self.isa.scratch(0);
        let acc = self.acc;
        self.isa.mov_fr(&mut self.e, f0, acc);
        self.isa.cvt_fi(&mut self.e, t, f0);
        let fp = self.isa.fp();
        let off = self.isa.slot_off(slot);
        self.isa.store(&mut self.e, fp, off, t);
    }

    /// hi = min(hi, lo + count-in-acc).
    fn clamp_hi(&mut self, lo_slot: u32, hi_slot: u32) {
        let f0 = FReg(0);
        let cap = self.isa.scratch(0);
        let hi = self.isa.scratch(1);
        let fp = self.isa.fp();
        let acc = self.acc;
        self.isa.mov_fr(&mut self.e, f0, acc);
        self.isa.cvt_fi(&mut self.e, cap, f0);
        let t = self.isa.arg(5);
        self.isa.load(&mut self.e, t, fp, self.isa.slot_off(lo_slot));
        self.isa.add(&mut self.e, cap, t);
        self.isa.load(&mut self.e, hi, fp, self.isa.slot_off(hi_slot));
        let keep = self.fresh("cap_keep");
        self.isa.jcc(&mut self.e, Cond::Le, hi, cap, &keep);
        self.isa.store(&mut self.e, fp, self.isa.slot_off(hi_slot), cap);
        self.e.define_label(&keep).ok();
    }

    /// The shared compare-jump loop skeleton over [lo, hi).
    fn gen_loop_core(
        &mut self,
        binding: Option<Symbol>,
        body: &Expr,
        is_range: bool,
        lo_slot: u32,
        hi_slot: u32,
        list_slot: u32,
    ) -> Result<()> {
        let i_slot = self.alloc_slot();
        let bind_slot = self.alloc_slot();
        let fp = self.isa.fp();

        let t = self.isa.scratch(0);
        self.isa.load(&mut self.e, t, fp, self.isa.slot_off(lo_slot));
        self.isa.store(&mut self.e, fp, self.isa.slot_off(i_slot), t);

        let head = self.fresh("loop_head");
        let step = self.fresh("loop_step");
        let done = self.fresh("loop_done");

        self.env.push();
        self.scope_info.push(ScopeInfo {
            defers: Vec::new(),
            arena: false,
        });
        if let Some(ctx) = &mut self.current_fn {
            ctx.has_cleanup = true;
        }
        let scope_depth = self.scope_info.len() - 1;
        self.loop_frames.push(LoopFrame {
            continue_label: step.clone(),
            break_label: done.clone(),
            scope_depth,
        });

        if let Some(name) = binding {
            self.env.bind(
                name,
                Binding {
                    storage: Storage::Slot(bind_slot),
                    mutable: false,
                    span: Span::DUMMY,
                },
                true,
                Span::DUMMY,
            )?;
        }

        self.e.define_label(&head)?;
        let i = self.isa.scratch(0);
        let hi = self.isa.scratch(1);
        self.isa.load(&mut self.e, i, fp, self.isa.slot_off(i_slot));
        self.isa.load(&mut self.e, hi, fp, self.isa.slot_off(hi_slot));
        self.isa.jcc(&mut self.e, Cond::Ge, i, hi, &done);

        // bind the iteration value
        if binding.is_some() {
            if is_range {
                let f0 = FReg(0);
                self.isa.cvt_if(&mut self.e, f0, i);
                self.isa.store_f(&mut self.e, fp, self.isa.slot_off(bind_slot), f0);
            } else {
                let addr = self.isa.arg(5);
                self.isa.mov_rr(&mut self.e, addr, i);
                let t3 = self.isa.scratch(1);
                self.isa.mov_ri(&mut self.e, t3, 3);
                self.isa.shl(&mut self.e, addr, t3);
                let base = self.isa.scratch(1);
                self.isa.load(&mut self.e, base, fp, self.isa.slot_off(list_slot));
                self.isa.add(&mut self.e, addr, base);
                let t = self.isa.scratch(0);
                self.isa.load(&mut self.e, t, addr, 8);
                self.isa.store(&mut self.e, fp, self.isa.slot_off(bind_slot), t);
            }
        }

        // body statements share the loop's defer scope: a defer in a
        // loop body runs on loop exit, not per iteration
        match &body.kind {
            ExprKind::Block(stmts) => {
                for stmt in stmts {
                    self.gen_expr(stmt, false)?;
                }
            }
            _ => {
                self.gen_expr(body, false)?;
            }
        }

        self.e.define_label(&step)?;
        let i = self.isa.scratch(0);
        self.isa.load(&mut self.e, i, fp, self.isa.slot_off(i_slot));
        self.isa.add_ri(&mut self.e, i, 1);
        self.isa.store(&mut self.e, fp, self.isa.slot_off(i_slot), i);
        self.isa.jmp(&mut self.e, &head);

        self.e.define_label(&done)?;
        self.loop_frames.pop();
        self.flush_one_scope()?;
        self.scope_info.pop();
        self.env.pop();
        Ok(())
    }

    /// `@@`: one forked worker per shard of the iteration space. The
    /// parent waits for every child; children exit when their shard is
    /// done. Shared state is limited to MAP_SHARED channel buffers.
    fn gen_fork_loop(
        &mut self,
        binding: Option<Symbol>,
        body: &Expr,
        is_range: bool,
        lo_slot: u32,
        hi_slot: u32,
        list_slot: u32,
    ) -> Result<()> {
        const WORKERS: i64 = 4;
        let w_slot = self.alloc_slot();
        let total_lo = self.alloc_slot();
        let total_hi = self.alloc_slot();
        let fp = self.isa.fp();

        // keep the full range; lo/hi slots become per-shard bounds
        let t = self.isa.scratch(0);
        self.isa.load(&mut self.e, t, fp, self.isa.slot_off(lo_slot));
        self.isa.store(&mut self.e, fp, self.isa.slot_off(total_lo), t);
        self.isa.load(&mut self.e, t, fp, self.isa.slot_off(hi_slot));
        self.isa.store(&mut self.e, fp, self.isa.slot_off(total_hi), t);

        let z = self.isa.scratch(0);
        self.isa.zero(&mut self.e, z);
        self.isa.store(&mut self.e, fp, self.isa.slot_off(w_slot), z);

        let spawn_head = self.fresh("fork_spawn");
        let spawned = self.fresh("fork_spawned");
        let child = self.fresh("fork_child");

        self.e.define_label(&spawn_head)?;
        let w = self.isa.scratch(0);
        let n = self.isa.scratch(1);
        self.isa.load(&mut self.e, w, fp, self.isa.slot_off(w_slot));
        self.isa.mov_ri(&mut self.e, n, WORKERS);
        self.isa.jcc(&mut self.e, Cond::Ge, w, n, &spawned);

        let nr = self.sys(Sys::Fork)?;
        if self.target.fork_is_clone() {
            // clone(SIGCHLD, 0, 0, 0, 0)
            let a0 = self.isa.arg(0);
            self.isa.mov_ri(&mut self.e, a0, 17);
            for i in 1..5 {
                let r = self.isa.arg(i);
                self.isa.zero(&mut self.e, r);
            }
            self.isa.syscall(&mut self.e, nr, 5, false);
        } else {
            self.isa
                .syscall(&mut self.e, nr, 0, self.target.os == Os::Macos);
        }
        let pid = self.acc;
        let z = self.isa.scratch(1);
        self.isa.zero(&mut self.e, z);
        self.isa.jcc(&mut self.e, Cond::Eq, pid, z, &child);

        // parent: next worker
        let w = self.isa.scratch(0);
        self.isa.load(&mut self.e, w, fp, self.isa.slot_off(w_slot));
        self.isa.add_ri(&mut self.e, w, 1);
        self.isa.store(&mut self.e, fp, self.isa.slot_off(w_slot), w);
        self.isa.jmp(&mut self.e, &spawn_head);

        // child: shard bounds lo + w*n/W .. lo + (w+1)*n/W
        self.e.define_label(&child)?;
        for (slot, offset) in [(lo_slot, 0i64), (hi_slot, 1)] {
            // shard bound = lo + (w * n) / WORKERS; the dividend stays
            // clear of the division's fixed-register clobbers
            let w = self.isa.scratch(0);
            let total = self.isa.arg(4);
            let lo = self.isa.arg(5);
            self.isa.load(&mut self.e, w, fp, self.isa.slot_off(w_slot));
            if offset == 1 {
                self.isa.add_ri(&mut self.e, w, 1);
            }
            self.isa.load(&mut self.e, total, fp, self.isa.slot_off(total_hi));
            self.isa.load(&mut self.e, lo, fp, self.isa.slot_off(total_lo));
            self.isa.sub(&mut self.e, total, lo);
            self.isa.mul(&mut self.e, w, total);
            let divisor = self.isa.arg(2);
            self.isa.mov_ri(&mut self.e, divisor, WORKERS);
            self.isa.sdiv(&mut self.e, w, w, divisor);
            self.isa.add(&mut self.e, w, lo);
            self.isa.store(&mut self.e, fp, self.isa.slot_off(slot), w);
        }
        self.gen_loop_core(binding, body, is_range, lo_slot, hi_slot, list_slot)?;
        // worker done
        let status = self.isa.arg(0);
        self.isa.zero(&mut self.e, status);
        let exit_nr = self.sys(Sys::Exit)?;
        self.isa
            .syscall(&mut self.e, exit_nr, 1, self.target.os == Os::Macos);

        // parent: reap the workers
        self.e.define_label(&spawned)?;
        let wait_head = self.fresh("fork_wait");
        let wait_done = self.fresh("fork_wait_done");
        let w = self.isa.scratch(0);
        self.isa.zero(&mut self.e, w);
        self.isa.store(&mut self.e, fp, self.isa.slot_off(w_slot), w);
        self.e.define_label(&wait_head)?;
        let w = self.isa.scratch(0);
        let n = self.isa.scratch(1);
        self.isa.load(&mut self.e, w, fp, self.isa.slot_off(w_slot));
        self.isa.mov_ri(&mut self.e, n, WORKERS);
        self.isa.jcc(&mut self.e, Cond::Ge, w, n, &wait_done);
        // wait4(-1, 0, 0, 0)
        let a0 = self.isa.arg(0);
        self.isa.mov_ri(&mut self.e, a0, -1);
        for i in 1..4 {
            let r = self.isa.arg(i);
            self.isa.zero(&mut self.e, r);
        }
        let wait_nr = self.sys(Sys::Wait4)?;
        self.isa
            .syscall(&mut self.e, wait_nr, 4, self.target.os == Os::Macos);
        let w = self.isa.scratch(0);
        self.isa.load(&mut self.e, w, fp, self.isa.slot_off(w_slot));
        self.isa.add_ri(&mut self.e, w, 1);
        self.isa.store(&mut self.e, fp, self.isa.slot_off(w_slot), w);
        self.isa.jmp(&mut self.e, &wait_head);
        self.e.define_label(&wait_done)?;
        let acc = self.acc;
        self.isa.zero(&mut self.e, acc);
        Ok(())
    }

    // =========================================================================
    // BINDINGS
    // =========================================================================

    pub(crate) fn gen_assign(
        &mut self,
        name: Symbol,
        value: &Expr,
        mutable: bool,
        shadow: bool,
        span: Span,
    ) -> Result<()> {
        self.types.insert(name, self.static_type(value));

        // Capture-free function bindings stay direct (callable, TCO-able).
        if let ExprKind::Lambda { params, body, pure } = &value.kind {
            let captures = self.lambda_captures(params, body);
            if captures.is_empty() && !mutable {
                let label = self.fresh(&format!("fn_{}", name.as_str()));
                self.env.bind(
                    name,
                    Binding {
                        storage: Storage::Function {
                            label: label.clone(),
                            n_params: params.len(),
                            pure: *pure,
                        },
                        mutable: false,
                        span,
                    },
                    shadow,
                    span,
                )?;
                self.queue_lambda(&label, params, body, *pure)?;
                let acc = self.acc;
                self.isa.zero(&mut self.e, acc);
                return Ok(());
            }
        }

        let top_level = self.current_fn.is_none() && self.env.depth() == 1;
        let storage = if top_level {
            Storage::Global(self.e.data_reserve(8, 8))
        } else {
            Storage::Slot(self.alloc_slot())
        };

        // For closures the binding must exist first so recursive lambdas
        // can capture their own slot; plain values must not see
        // themselves.
        let is_lambda = matches!(value.kind, ExprKind::Lambda { .. });
        if is_lambda {
            let old = self.env.bind(
                name,
                Binding {
                    storage: storage.clone(),
                    mutable,
                    span,
                },
                shadow,
                span,
            )?;
            let storage = old.map(|b| b.storage).unwrap_or(storage);
            self.gen_expr(value, false)?;
            self.store_to(&storage);
        } else {
            self.gen_expr(value, false)?;
            let old = self.env.bind(
                name,
                Binding {
                    storage: storage.clone(),
                    mutable,
                    span,
                },
                shadow,
                span,
            )?;
            let storage = old.map(|b| b.storage).unwrap_or(storage);
            self.store_to(&storage);
        }
        Ok(())
    }

    fn store_to(&mut self, storage: &Storage) {
        let acc = self.acc;
        match storage {
            Storage::Slot(i) => {
                let fp = self.isa.fp();
                let off = self.isa.slot_off(*i);
                self.isa.store(&mut self.e, fp, off, acc);
            }
            Storage::Global(off) => {
                let t = self.isa.scratch(0);
                self.isa.lea_section(&mut self.e, t, Section::Data, *off);
                self.isa.store(&mut self.e, t, 0, acc);
            }
            Storage::Captured(i) => {
                let envp = self.load_env_ptr();
                let addr = self.isa.scratch(0);
                self.isa.load(&mut self.e, addr, envp, 8 * *i as i32);
                self.isa.store(&mut self.e, addr, 0, acc);
            }
            Storage::Function { .. } => {
                // a function binding stores no runtime value
            }
        }
    }

    pub(crate) fn gen_update(&mut self, target: &Expr, value: &Expr, span: Span) -> Result<()> {
        match &target.kind {
            ExprKind::Ident(name) => {
                let binding = self.env.update_target(*name, span)?.clone();
                self.types.insert(*name, self.static_type(value));
                self.gen_expr(value, false)?;
                self.store_to(&binding.storage);
                Ok(())
            }
            ExprKind::Index { base, index } => {
                if self.static_type(base) == rilc_sem::ValueType::Map {
                    return Err(CodeGenError::TypeMismatch {
                        message: "map entries update through rebuilding, not '<-'".to_string(),
                        span,
                    });
                }
                self.gen_expr(value, false)?;
                let acc = self.acc;
                self.isa.push(&mut self.e, acc);
                self.gen_expr(base, false)?;
                let acc = self.acc;
                self.isa.push(&mut self.e, acc);
                self.gen_expr(index, false)?;
                let f0 = FReg(0);
                let idx = self.isa.scratch(0);
                let list = self.isa.scratch(1);
                let acc = self.acc;
                self.isa.mov_fr(&mut self.e, f0, acc);
                self.isa.cvt_fi(&mut self.e, idx, f0);
                self.isa.pop(&mut self.e, list);
                let val = self.isa.arg(5);
                self.isa.pop(&mut self.e, val);

                let done = self.fresh("upd_done");
                if self.config.runtime_checks {
                    let t = self.isa.arg(4);
                    self.isa.zero(&mut self.e, t);
                    self.isa.jcc(&mut self.e, Cond::Eq, list, t, &done);
                    self.isa.jcc(&mut self.e, Cond::Lt, idx, t, &done);
                    self.isa.load(&mut self.e, t, list, 0);
                    self.isa.jcc(&mut self.e, Cond::Ge, idx, t, &done);
                }
                let t3 = self.isa.arg(4);
                self.isa.mov_ri(&mut self.e, t3, 3);
                self.isa.shl(&mut self.e, idx, t3);
                self.isa.add(&mut self.e, list, idx);
                self.isa.store(&mut self.e, list, 8, val);
                self.e.define_label(&done)?;
                let acc = self.acc;
                self.isa.mov_rr(&mut self.e, acc, val);
                Ok(())
            }
            _ => Err(CodeGenError::TypeMismatch {
                message: "update target must be a name or list element".to_string(),
                span,
            }),
        }
    }

    // =========================================================================
    // SCOPE EXITS: DEFER FLUSH, ARENA POP, BREAK/CONTINUE, RETURN
    // =========================================================================

    /// Emit cleanup for every scope at index >= `down_to`, innermost
    /// first, without popping bookkeeping (other exit paths still need
    /// it). Deferred actions run in reverse registration order behind
    /// their reached-guards.
    pub(crate) fn flush_range(&mut self, down_to: usize) -> Result<()> {
        let snapshot: Vec<(bool, Vec<DeferEntry>)> = self.scope_info[down_to..]
            .iter()
            .map(|s| (s.arena, s.defers.clone()))
            .collect();
        for (arena, defers) in snapshot.into_iter().rev() {
            for entry in defers.into_iter().rev() {
                let skip = self.fresh("defer_skip");
                let fp = self.isa.fp();
                let off = self.isa.slot_off(entry.guard_slot);
                let t = self.isa.scratch(0);
                let z = self.isa.scratch(1);
                self.isa.load(&mut self.e, t, fp, off);
                self.isa.zero(&mut self.e, z);
                self.isa.jcc(&mut self.e, Cond::Eq, t, z, &skip);
                self.gen_expr(&entry.action, false)?;
                self.e.define_label(&skip)?;
            }
            if arena {
                self.call("ril_arena_pop");
            }
        }
        Ok(())
    }

    pub(crate) fn flush_one_scope(&mut self) -> Result<()> {
        let last = self.scope_info.len() - 1;
        self.flush_range(last)
    }

    pub(crate) fn flush_scope_exits(&mut self, down_to: usize) -> Result<()> {
        self.flush_range(down_to)
    }

    pub(crate) fn gen_break(&mut self, depth: u32, span: Span) -> Result<()> {
        let frame = self.loop_frame_at(depth, span)?;
        let (label, scope_depth) = (frame.break_label.clone(), frame.scope_depth);
        self.flush_range(scope_depth)?;
        self.isa.jmp(&mut self.e, &label);
        Ok(())
    }

    pub(crate) fn gen_continue(&mut self, depth: u32, span: Span) -> Result<()> {
        let frame = self.loop_frame_at(depth, span)?;
        let (label, scope_depth) = (frame.continue_label.clone(), frame.scope_depth);
        // scopes nested inside the loop body unwind; the loop's own
        // defers wait for loop exit
        self.flush_range(scope_depth + 1)?;
        self.isa.jmp(&mut self.e, &label);
        Ok(())
    }

    fn loop_frame_at(&self, depth: u32, span: Span) -> Result<&LoopFrame> {
        let n = self.loop_frames.len();
        let depth = depth.max(1) as usize;
        if depth > n {
            return Err(CodeGenError::TypeMismatch {
                message: format!(
                    "break/continue depth {} exceeds loop nesting {}",
                    depth, n
                ),
                span,
            });
        }
        Ok(&self.loop_frames[n - depth])
    }

    /// Emit a function return: defers fire innermost-out, then the
    /// epilogue. At top level the value becomes the exit status.
    pub(crate) fn gen_fn_return(&mut self) -> Result<()> {
        let acc = self.acc;
        self.isa.push(&mut self.e, acc);
        let base = self
            .current_fn
            .as_ref()
            .map(|f| f.scope_base)
            .unwrap_or(0);
        self.flush_range(base)?;
        let acc = self.acc;
        self.isa.pop(&mut self.e, acc);

        let memo = self.current_fn.as_ref().and_then(|c| c.memo);
        match self.current_fn.is_some() {
            true => {
                if let Some((cache, arity)) = memo {
                    self.emit_memo_store(cache, arity)?;
                }
                self.isa.epilogue(&mut self.e, 0);
                self.isa.ret_insn(&mut self.e);
            }
            false => {
                // top-level return exits the process with the value
                let f0 = FReg(0);
                let status = self.isa.arg(0);
                let acc = self.acc;
                self.isa.mov_fr(&mut self.e, f0, acc);
                self.isa.cvt_fi(&mut self.e, status, f0);
                if self.target.os == Os::Windows {
                    let rcx = crate::helpers::ext_arg(&*self.isa, &self.target, 0);
                    self.isa.mov_rr(&mut self.e, rcx, status);
                    self.isa.call_sym(&mut self.e, "ExitProcess");
                } else {
                    let nr = self.sys(Sys::Exit)?;
                    self.isa
                        .syscall(&mut self.e, nr, 1, self.target.os == Os::Macos);
                }
            }
        }
        Ok(())
    }

    // =========================================================================
    // UNSAFE BLOCKS
    // =========================================================================

    pub(crate) fn gen_unsafe(&mut self, variants: &[AsmVariant], span: Span) -> Result<()> {
        let want = self.target.arch.to_string();
        let variant = variants
            .iter()
            .find(|v| v.isa.as_str() == want)
            .ok_or_else(|| CodeGenError::UnsupportedForTarget {
                message: format!("unsafe block has no {} variant", want),
                target: self.target.to_string(),
            })?;
        asm_sub::assemble(&variant.lines, &mut self.e, &*self.isa, &self.target, span)
    }

    // =========================================================================
    // FUNCTION EMISSION
    // =========================================================================

    pub(crate) fn emit_function(&mut self, p: PendingFn) -> Result<()> {
        let saved_slots = self.slot_next;
        let saved_fn = self.current_fn.take();

        self.e.define_label(&p.label)?;
        let n_slots = 1 + p.params.len() as u32 + count_slots(&p.body) + 8;
        self.isa.prologue(&mut self.e, n_slots);

        self.slot_next = 0;
        let env_slot = self.alloc_slot(); // slot 0: closure environment
        if !p.captures.is_empty() {
            let cl = self.isa.closure_reg();
            let fp = self.isa.fp();
            let off = self.isa.slot_off(env_slot);
            self.isa.store(&mut self.e, fp, off, cl);
        }

        self.env.push();
        self.scope_info.push(ScopeInfo {
            defers: Vec::new(),
            arena: false,
        });
        let scope_base = self.scope_info.len() - 1;

        for (i, param) in p.params.iter().enumerate() {
            let slot = self.alloc_slot();
            let r = self.isa.arg(i);
            let fp = self.isa.fp();
            let off = self.isa.slot_off(slot);
            self.isa.store(&mut self.e, fp, off, r);
            self.env.bind(
                *param,
                Binding {
                    storage: Storage::Slot(slot),
                    mutable: false,
                    span: Span::DUMMY,
                },
                true,
                Span::DUMMY,
            )?;
        }
        for (i, cap) in p.captures.iter().enumerate() {
            self.env.bind(
                *cap,
                Binding {
                    storage: Storage::Captured(i as u32),
                    mutable: true,
                    span: Span::DUMMY,
                },
                true,
                Span::DUMMY,
            )?;
        }

        // memoization probe for pure functions of small arity
        let memo = if p.pure && p.captures.is_empty() && p.params.len() <= 2 {
            let cache = self.e.data_reserve(16 * 32, 8);
            self.emit_memo_probe(cache, p.params.len())?;
            Some((cache, p.params.len()))
        } else {
            None
        };

        let body_label = self.fresh(&format!("{}_body", p.label));
        self.e.define_label(&body_label)?;
        self.current_fn = Some(FnCtx {
            label: p.label.clone(),
            body_label,
            params: p.params.clone(),
            has_cleanup: false,
            scope_base,
            memo,
        });

        self.gen_expr(&p.body, true)?;

        // fall-through return
        let acc = self.acc;
        self.isa.push(&mut self.e, acc);
        self.flush_range(scope_base)?;
        let acc = self.acc;
        self.isa.pop(&mut self.e, acc);
        if let Some((cache, arity)) = memo {
            self.emit_memo_store(cache, arity)?;
        }
        self.isa.epilogue(&mut self.e, 0);
        self.isa.ret_insn(&mut self.e);

        self.scope_info.pop();
        self.env.pop();
        self.current_fn = saved_fn;
        self.slot_next = saved_slots;
        Ok(())
    }

    /// Cache entry: {tag, key0, key1, value}, 32 bytes, 16 entries.
    /// The slot index hashes the raw argument bit patterns.
    fn emit_memo_probe(&mut self, cache: u64, arity: usize) -> Result<()> {
        let miss = self.fresh("memo_miss");
        let entry = self.isa.arg(4);
        let h = self.isa.arg(5);
        let t = self.isa.scratch(0);

        let a0 = self.isa.arg(0);
        self.isa.mov_rr(&mut self.e, h, a0);
        if arity == 2 {
            let a1 = self.isa.arg(1);
            self.isa.xor(&mut self.e, h, a1);
        }
        self.isa.mov_ri(&mut self.e, t, 15);
        self.isa.and(&mut self.e, h, t);
        self.isa.mov_ri(&mut self.e, t, 5);
        self.isa.shl(&mut self.e, h, t); // * 32

        self.isa.lea_section(&mut self.e, entry, Section::Data, cache);
        self.isa.add(&mut self.e, entry, h);

        self.isa.load(&mut self.e, t, entry, 0);
        let one = self.isa.scratch(1);
        self.isa.mov_ri(&mut self.e, one, 1);
        self.isa.jcc(&mut self.e, Cond::Ne, t, one, &miss);
        self.isa.load(&mut self.e, t, entry, 8);
        let a0 = self.isa.arg(0);
        self.isa.jcc(&mut self.e, Cond::Ne, t, a0, &miss);
        if arity == 2 {
            self.isa.load(&mut self.e, t, entry, 16);
            let a1 = self.isa.arg(1);
            self.isa.jcc(&mut self.e, Cond::Ne, t, a1, &miss);
        }
        // hit
        let acc = self.acc;
        self.isa.load(&mut self.e, acc, entry, 24);
        self.isa.epilogue(&mut self.e, 0);
        self.isa.ret_insn(&mut self.e);
        self.e.define_label(&miss)?;
        Ok(())
    }

    /// Store the just-computed result (keys reload from the immutable
    /// parameter slots).
    fn emit_memo_store(&mut self, cache: u64, arity: usize) -> Result<()> {
        let entry = self.isa.arg(4);
        let h = self.isa.arg(5);
        let k0 = self.isa.arg(2);
        let k1 = self.isa.arg(3);
        let t = self.isa.scratch(0);
        let fp = self.isa.fp();

        self.isa.load(&mut self.e, k0, fp, self.isa.slot_off(1));
        self.isa.mov_rr(&mut self.e, h, k0);
        if arity == 2 {
            self.isa.load(&mut self.e, k1, fp, self.isa.slot_off(2));
            self.isa.xor(&mut self.e, h, k1);
        }
        self.isa.mov_ri(&mut self.e, t, 15);
        self.isa.and(&mut self.e, h, t);
        self.isa.mov_ri(&mut self.e, t, 5);
        self.isa.shl(&mut self.e, h, t);

        self.isa.lea_section(&mut self.e, entry, Section::Data, cache);
        self.isa.add(&mut self.e, entry, h);
        self.isa.mov_ri(&mut self.e, t, 1);
        self.isa.store(&mut self.e, entry, 0, t);
        self.isa.store(&mut self.e, entry, 8, k0);
        if arity == 2 {
            self.isa.store(&mut self.e, entry, 16, k1);
        }
        let acc = self.acc;
        self.isa.store(&mut self.e, entry, 24, acc);
        Ok(())
    }
}

/// When every non-default arm is an integral constant and the population
/// is large and dense, return (min, max).
fn dense_int_arms(arms: &[MatchArm]) -> Option<(i64, i64)> {
    let mut values = Vec::new();
    for arm in arms {
        match arm_int_value(arm) {
            Some(v) => values.push(v),
            None if arm.pattern.is_none() => {}
            None => return None,
        }
    }
    if values.len() < JUMP_TABLE_MIN_ARMS {
        return None;
    }
    let min = *values.iter().min()?;
    let max = *values.iter().max()?;
    let span = (max - min + 1) as usize;
    if span > values.len() * 2 {
        return None;
    }
    Some((min, max))
}

fn arm_int_value(arm: &MatchArm) -> Option<i64> {
    match &arm.pattern {
        Some(Expr {
            kind: ExprKind::Number(v),
            ..
        }) if v.fract() == 0.0 => Some(*v as i64),
        _ => None,
    }
}

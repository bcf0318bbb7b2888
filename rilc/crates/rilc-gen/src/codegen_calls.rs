//! Call emission: builtins, direct calls, closures, tail calls, and the
//! parallel map.

use rilc_par::{BinOp, Expr, ExprKind};
use rilc_sem::ValueType;
use rilc_util::{Span, Symbol};

use crate::backend::{Cond, FReg, Reg};
use crate::emit::Section;
use crate::env::Storage;
use crate::error::{CodeGenError, Result};
use crate::{CodeGen, PendingFn, ERR_SENTINEL, MAX_ARGS};

impl<'h> CodeGen<'h> {
    pub(crate) fn gen_call(
        &mut self,
        callee: &Expr,
        args: &[Expr],
        span: Span,
        tail: bool,
    ) -> Result<()> {
        // `(f <> g)(x)` applies right-to-left without a synthesized
        // closure.
        if let ExprKind::Binary {
            op: BinOp::Compose,
            lhs,
            rhs,
        } = &callee.kind
        {
            self.gen_call(rhs, args, span, false)?;
            let acc = self.acc;
            self.isa.push(&mut self.e, acc);
            return self.gen_call_with_staged(lhs, 1, span);
        }

        if args.len() > MAX_ARGS {
            return Err(CodeGenError::UnsupportedForTarget {
                message: format!(
                    "calls take at most {} arguments ({} given)",
                    MAX_ARGS,
                    args.len()
                ),
                target: self.target.to_string(),
            });
        }

        if let ExprKind::Ident(name) = &callee.kind {
            if self.env.lookup(*name).is_none() {
                return self.gen_builtin(*name, args, span);
            }
        }

        // Direct call to a known function?
        if let ExprKind::Ident(name) = &callee.kind {
            if let Some(binding) = self.env.lookup(*name).cloned() {
                if let Storage::Function { label, n_params, .. } = binding.storage {
                    if args.len() != n_params {
                        return Err(CodeGenError::TypeMismatch {
                            message: format!(
                                "'{}' takes {} arguments, {} given",
                                name.as_str(),
                                n_params,
                                args.len()
                            ),
                            span,
                        });
                    }

                    // Tail call to the current function reuses the frame.
                    let is_self = self
                        .current_fn
                        .as_ref()
                        .map(|f| f.label == label && !f.has_cleanup)
                        .unwrap_or(false);
                    if tail && is_self {
                        return self.gen_tail_call(args);
                    }

                    self.stage_args(args)?;
                    self.call(&label);
                    return Ok(());
                }
            }
        }

        // Indirect: evaluate the callee to a closure value.
        self.gen_expr(callee, false)?;
        let acc = self.acc;
        self.isa.push(&mut self.e, acc);
        for arg in args {
            self.gen_expr(arg, false)?;
            let acc = self.acc;
            self.isa.push(&mut self.e, acc);
        }
        for i in (0..args.len()).rev() {
            let r = self.isa.arg(i);
            self.isa.pop(&mut self.e, r);
        }
        let target = self.isa.scratch(0);
        self.isa.pop(&mut self.e, target);
        if self.config.runtime_checks {
            let bad = self.fresh("call_null");
            let go = self.fresh("call_go");
            let z = self.isa.scratch(1);
            self.isa.zero(&mut self.e, z);
            self.isa.jcc(&mut self.e, Cond::Eq, target, z, &bad);
            self.isa.jmp(&mut self.e, &go);
            self.e.define_label(&bad)?;
            self.isa.mov_ri(&mut self.e, self.acc, ERR_SENTINEL as i64);
            let done = self.fresh("call_done");
            self.isa.jmp(&mut self.e, &done);
            self.e.define_label(&go)?;
            self.emit_closure_call(target);
            self.e.define_label(&done)?;
        } else {
            self.emit_closure_call(target);
        }
        Ok(())
    }

    /// Closure pair layout: [v] = env, [v+8] = fn.
    fn emit_closure_call(&mut self, pair: Reg) {
        let cl = self.isa.closure_reg();
        self.isa.load(&mut self.e, cl, pair, 0);
        self.isa.load(&mut self.e, pair, pair, 8);
        self.isa.call_reg(&mut self.e, pair);
    }

    /// Call `callee` with `n` values already pushed on the machine stack
    /// (last argument pushed last).
    fn gen_call_with_staged(&mut self, callee: &Expr, n: usize, span: Span) -> Result<()> {
        if let ExprKind::Ident(name) = &callee.kind {
            if let Some(binding) = self.env.lookup(*name).cloned() {
                if let Storage::Function { label, n_params, .. } = binding.storage {
                    if n != n_params {
                        return Err(CodeGenError::TypeMismatch {
                            message: format!(
                                "'{}' takes {} arguments, {} given",
                                name.as_str(),
                                n_params,
                                n
                            ),
                            span,
                        });
                    }
                    for i in (0..n).rev() {
                        let r = self.isa.arg(i);
                        self.isa.pop(&mut self.e, r);
                    }
                    self.call(&label);
                    return Ok(());
                }
            }
        }
        // Indirect with staged args: evaluate callee after the args.
        self.gen_expr(callee, false)?;
        let target = self.isa.scratch(0);
        let acc = self.acc;
        self.isa.mov_rr(&mut self.e, target, acc);
        for i in (0..n).rev() {
            let r = self.isa.arg(i);
            self.isa.pop(&mut self.e, r);
        }
        self.emit_closure_call(target);
        Ok(())
    }

    /// Evaluate args left-to-right through the stack, then load the
    /// argument registers.
    pub(crate) fn stage_args(&mut self, args: &[Expr]) -> Result<()> {
        for arg in args {
            self.gen_expr(arg, false)?;
            let acc = self.acc;
            self.isa.push(&mut self.e, acc);
        }
        for i in (0..args.len()).rev() {
            let r = self.isa.arg(i);
            self.isa.pop(&mut self.e, r);
        }
        Ok(())
    }

    /// Frame-reusing self call: new arguments into the parameter slots,
    /// then jump to the body.
    fn gen_tail_call(&mut self, args: &[Expr]) -> Result<()> {
        self.stage_args(args)?;
        let ctx = self
            .current_fn
            .as_ref()
            .expect("tail call outside a function");
        let body_label = ctx.body_label.clone();
        let n = ctx.params.len();
        for i in 0..n {
            // parameter slots start after the env slot
            let off = self.isa.slot_off(1 + i as u32);
            let r = self.isa.arg(i);
            self.isa.store(&mut self.e, self.isa.fp(), off, r);
        }
        self.isa.jmp(&mut self.e, &body_label);
        Ok(())
    }

    // =========================================================================
    // BUILTINS
    // =========================================================================

    fn gen_builtin(&mut self, name: Symbol, args: &[Expr], span: Span) -> Result<()> {
        match name.as_str() {
            "println" | "print" | "printf" => {
                let arg = args.first().ok_or_else(|| CodeGenError::TypeMismatch {
                    message: "print expects an argument".to_string(),
                    span,
                })?;
                let helper = if self.static_type(arg) == ValueType::Str {
                    "ril_print_str"
                } else {
                    "ril_print_num"
                };
                self.gen_expr(arg, false)?;
                let acc = self.acc;
                let a0 = self.isa.arg(0);
                self.isa.mov_rr(&mut self.e, a0, acc);
                self.call(helper);
                let acc = self.acc;
                self.isa.zero(&mut self.e, acc);
                Ok(())
            }
            "chan" => {
                // the capacity argument is evaluated for effect; every
                // channel holds the fixed 64 slots
                if let Some(arg) = args.first() {
                    self.gen_expr(arg, false)?;
                }
                self.call("ril_chan_new");
                Ok(())
            }
            "send" => {
                self.expect_arity(args, 2, "send", span)?;
                self.stage_args(args)?;
                self.call("ril_chan_send");
                Ok(())
            }
            "recv" => {
                self.expect_arity(args, 1, "recv", span)?;
                self.stage_args(args)?;
                self.call("ril_chan_recv");
                Ok(())
            }
            "close" => {
                self.expect_arity(args, 1, "close", span)?;
                self.stage_args(args)?;
                self.call("ril_chan_close");
                Ok(())
            }
            "exit" => {
                self.expect_arity(args, 1, "exit", span)?;
                self.gen_expr(&args[0], false)?;
                let acc = self.acc;
                let f0 = FReg(0);
                let a0 = self.isa.arg(0);
                self.isa.mov_fr(&mut self.e, f0, acc);
                self.isa.cvt_fi(&mut self.e, a0, f0);
                if self.target.os == crate::Os::Windows {
                    let rcx = crate::helpers::ext_arg(&*self.isa, &self.target, 0);
                    self.isa.mov_rr(&mut self.e, rcx, a0);
                    self.isa.call_sym(&mut self.e, "ExitProcess");
                } else {
                    let nr = self.sys(crate::Sys::Exit)?;
                    let macos = self.target.os == crate::Os::Macos;
                    self.isa.syscall(&mut self.e, nr, 1, macos);
                }
                Ok(())
            }
            "fma" => {
                self.expect_arity(args, 3, "fma", span)?;
                self.stage_args(args)?;
                let (a, b, c) = (FReg(0), FReg(1), FReg(2));
                let (r0, r1, r2) = (self.isa.arg(0), self.isa.arg(1), self.isa.arg(2));
                self.isa.mov_fr(&mut self.e, a, r0);
                self.isa.mov_fr(&mut self.e, b, r1);
                self.isa.mov_fr(&mut self.e, c, r2);
                self.isa.vfma(&mut self.e, c, a, b);
                let acc = self.acc;
                self.isa.mov_rf(&mut self.e, acc, c);
                Ok(())
            }
            "simd_add" => self.gen_simd_zip(args, span, false),
            "simd_mul" => self.gen_simd_zip(args, span, true),
            "simd_sum" => self.gen_simd_sum(args, span),
            "len" => {
                self.expect_arity(args, 1, "len", span)?;
                let operand = args[0].clone();
                self.gen_unary(rilc_par::UnOp::Len, &operand, span)
            }
            other => Err(CodeGenError::UndefinedName {
                name: other.to_string(),
                span,
            }),
        }
    }

    fn expect_arity(&self, args: &[Expr], n: usize, what: &str, span: Span) -> Result<()> {
        if args.len() != n {
            return Err(CodeGenError::TypeMismatch {
                message: format!("{} takes {} arguments, {} given", what, n, args.len()),
                span,
            });
        }
        Ok(())
    }

    /// simd_add / simd_mul: element-wise combination of two equal-length
    /// lists into a fresh list. Two lanes at a time where the ISA has
    /// vector encodings, scalar otherwise.
    fn gen_simd_zip(&mut self, args: &[Expr], span: Span, mul: bool) -> Result<()> {
        self.expect_arity(args, 2, "simd zip", span)?;
        let a_slot = self.alloc_slot();
        let b_slot = self.alloc_slot();
        let r_slot = self.alloc_slot();
        let fp = self.isa.fp();

        self.gen_expr(&args[0], false)?;
        let acc = self.acc;
        let off = self.isa.slot_off(a_slot);
        self.isa.store(&mut self.e, fp, off, acc);
        self.gen_expr(&args[1], false)?;
        let acc = self.acc;
        let off = self.isa.slot_off(b_slot);
        self.isa.store(&mut self.e, fp, off, acc);

        // allocate the result list with a's length
        let t = self.isa.scratch(0);
        let a0 = self.isa.arg(0);
        self.isa.load(&mut self.e, t, fp, self.isa.slot_off(a_slot));
        self.isa.load(&mut self.e, t, t, 0);
        self.isa.mov_rr(&mut self.e, a0, t);
        let t2 = self.isa.scratch(1);
        self.isa.mov_ri(&mut self.e, t2, 3);
        self.isa.shl(&mut self.e, a0, t2);
        self.isa.add_ri(&mut self.e, a0, 8);
        self.call("ril_arena_alloc");
        let acc = self.acc;
        let off = self.isa.slot_off(r_slot);
        self.isa.store(&mut self.e, fp, off, acc);

        let a = self.isa.arg(2);
        let b = self.isa.arg(3);
        let r = self.isa.arg(4);
        let n = self.isa.arg(5);
        let i = self.isa.arg(1);
        self.isa.load(&mut self.e, a, fp, self.isa.slot_off(a_slot));
        self.isa.load(&mut self.e, b, fp, self.isa.slot_off(b_slot));
        self.isa.load(&mut self.e, r, fp, self.isa.slot_off(r_slot));
        self.isa.load(&mut self.e, n, a, 0);
        self.isa.store(&mut self.e, r, 0, n);
        self.isa.zero(&mut self.e, i);

        let vec_head = self.fresh("simd_vec");
        let sca_head = self.fresh("simd_sca");
        let done = self.fresh("simd_done");
        let t = self.isa.scratch(0);

        if self.isa.has_simd() {
            // vector pairs while i + 2 <= n
            self.e.define_label(&vec_head)?;
            self.isa.mov_rr(&mut self.e, t, i);
            self.isa.add_ri(&mut self.e, t, 2);
            self.isa.jcc(&mut self.e, Cond::Gt, t, n, &sca_head);
            // address = base + 8 + 8i
            let addr = self.isa.scratch(1);
            for (list, freg) in [(a, FReg(0)), (b, FReg(1))] {
                self.isa.mov_rr(&mut self.e, addr, i);
                let t3 = self.isa.scratch(0);
                self.isa.mov_ri(&mut self.e, t3, 3);
                self.isa.shl(&mut self.e, addr, t3);
                self.isa.add(&mut self.e, addr, list);
                self.isa.vload(&mut self.e, freg, addr, 8);
            }
            if mul {
                self.isa.vmul(&mut self.e, FReg(0), FReg(1));
            } else {
                self.isa.vadd(&mut self.e, FReg(0), FReg(1));
            }
            self.isa.mov_rr(&mut self.e, addr, i);
            let t3 = self.isa.scratch(0);
            self.isa.mov_ri(&mut self.e, t3, 3);
            self.isa.shl(&mut self.e, addr, t3);
            self.isa.add(&mut self.e, addr, r);
            self.isa.vstore(&mut self.e, addr, 8, FReg(0));
            self.isa.add_ri(&mut self.e, i, 2);
            self.isa.jmp(&mut self.e, &vec_head);
        }

        // scalar remainder (the whole loop on scalar-only backends)
        self.e.define_label(&sca_head)?;
        self.isa.jcc(&mut self.e, Cond::Ge, i, n, &done);
        let addr = self.isa.scratch(1);
        for (list, freg) in [(a, FReg(0)), (b, FReg(1))] {
            self.isa.mov_rr(&mut self.e, addr, i);
            let t3 = self.isa.scratch(0);
            self.isa.mov_ri(&mut self.e, t3, 3);
            self.isa.shl(&mut self.e, addr, t3);
            self.isa.add(&mut self.e, addr, list);
            self.isa.load_f(&mut self.e, freg, addr, 8);
        }
        if mul {
            self.isa.fmul(&mut self.e, FReg(0), FReg(1));
        } else {
            self.isa.fadd(&mut self.e, FReg(0), FReg(1));
        }
        self.isa.mov_rr(&mut self.e, addr, i);
        let t3 = self.isa.scratch(0);
        self.isa.mov_ri(&mut self.e, t3, 3);
        self.isa.shl(&mut self.e, addr, t3);
        self.isa.add(&mut self.e, addr, r);
        self.isa.store_f(&mut self.e, addr, 8, FReg(0));
        self.isa.add_ri(&mut self.e, i, 1);
        self.isa.jmp(&mut self.e, &sca_head);

        self.e.define_label(&done)?;
        let acc = self.acc;
        self.isa.load(&mut self.e, acc, fp, self.isa.slot_off(r_slot));
        Ok(())
    }

    /// simd_sum: horizontal reduction to one number.
    fn gen_simd_sum(&mut self, args: &[Expr], span: Span) -> Result<()> {
        self.expect_arity(args, 1, "simd_sum", span)?;
        self.gen_expr(&args[0], false)?;

        let list = self.isa.arg(4);
        let n = self.isa.arg(5);
        let i = self.isa.arg(3);
        let t = self.isa.scratch(0);
        let acc_f = FReg(2);
        let acc = self.acc;
        self.isa.mov_rr(&mut self.e, list, acc);
        self.isa.load(&mut self.e, n, list, 0);
        self.isa.zero(&mut self.e, i);
        self.isa.zero(&mut self.e, t);
        self.isa.cvt_if(&mut self.e, acc_f, t);

        let head = self.fresh("ssum_head");
        let done = self.fresh("ssum_done");
        self.e.define_label(&head)?;
        self.isa.jcc(&mut self.e, Cond::Ge, i, n, &done);
        self.isa.mov_rr(&mut self.e, t, i);
        let t2 = self.isa.scratch(1);
        self.isa.mov_ri(&mut self.e, t2, 3);
        self.isa.shl(&mut self.e, t, t2);
        self.isa.add(&mut self.e, t, list);
        self.isa.load_f(&mut self.e, FReg(0), t, 8);
        self.isa.fadd(&mut self.e, acc_f, FReg(0));
        self.isa.add_ri(&mut self.e, i, 1);
        self.isa.jmp(&mut self.e, &head);
        self.e.define_label(&done)?;
        let acc = self.acc;
        self.isa.mov_rf(&mut self.e, acc, acc_f);
        Ok(())
    }

    /// `xs || f`: map f over xs into a fresh list. Iterations carry no
    /// ordering obligations, so the sequential schedule is a valid one.
    pub(crate) fn gen_par_map(&mut self, lhs: &Expr, rhs: &Expr, span: Span) -> Result<()> {
        let src_slot = self.alloc_slot();
        let dst_slot = self.alloc_slot();
        let i_slot = self.alloc_slot();
        let fp = self.isa.fp();

        self.gen_expr(lhs, false)?;
        let acc = self.acc;
        let off = self.isa.slot_off(src_slot);
        self.isa.store(&mut self.e, fp, off, acc);

        // result list, same length
        let t = self.isa.scratch(0);
        let a0 = self.isa.arg(0);
        self.isa.load(&mut self.e, t, fp, self.isa.slot_off(src_slot));
        self.isa.load(&mut self.e, a0, t, 0);
        let t2 = self.isa.scratch(1);
        self.isa.mov_ri(&mut self.e, t2, 3);
        self.isa.shl(&mut self.e, a0, t2);
        self.isa.add_ri(&mut self.e, a0, 8);
        self.call("ril_arena_alloc");
        let acc = self.acc;
        self.isa.store(&mut self.e, fp, self.isa.slot_off(dst_slot), acc);

        let src = self.isa.scratch(0);
        self.isa.load(&mut self.e, src, fp, self.isa.slot_off(src_slot));
        self.isa.load(&mut self.e, t2, src, 0);
        let acc = self.acc;
        self.isa.load(&mut self.e, acc, fp, self.isa.slot_off(dst_slot));
        self.isa.store(&mut self.e, acc, 0, t2);

        let z = self.isa.scratch(0);
        self.isa.zero(&mut self.e, z);
        self.isa.store(&mut self.e, fp, self.isa.slot_off(i_slot), z);

        let head = self.fresh("pmap_head");
        let done = self.fresh("pmap_done");
        self.e.define_label(&head)?;
        // i < len(src)?
        let i = self.isa.scratch(0);
        let len = self.isa.scratch(1);
        self.isa.load(&mut self.e, i, fp, self.isa.slot_off(i_slot));
        self.isa.load(&mut self.e, len, fp, self.isa.slot_off(src_slot));
        self.isa.load(&mut self.e, len, len, 0);
        self.isa.jcc(&mut self.e, Cond::Ge, i, len, &done);

        // push xs[i], call f
        let addr = self.isa.arg(5);
        self.isa.mov_rr(&mut self.e, addr, i);
        let t3 = self.isa.scratch(1);
        self.isa.mov_ri(&mut self.e, t3, 3);
        self.isa.shl(&mut self.e, addr, t3);
        let base = self.isa.scratch(1);
        self.isa.load(&mut self.e, base, fp, self.isa.slot_off(src_slot));
        self.isa.add(&mut self.e, addr, base);
        let acc = self.acc;
        self.isa.load(&mut self.e, acc, addr, 8);
        self.isa.push(&mut self.e, acc);
        self.gen_call_with_staged(rhs, 1, span)?;

        // dst[i] = result
        let addr = self.isa.scratch(0);
        self.isa.load(&mut self.e, addr, fp, self.isa.slot_off(i_slot));
        let t3 = self.isa.scratch(1);
        self.isa.mov_ri(&mut self.e, t3, 3);
        self.isa.shl(&mut self.e, addr, t3);
        let base = self.isa.scratch(1);
        self.isa.load(&mut self.e, base, fp, self.isa.slot_off(dst_slot));
        self.isa.add(&mut self.e, addr, base);
        let acc = self.acc;
        self.isa.store(&mut self.e, addr, 8, acc);

        let i = self.isa.scratch(0);
        self.isa.load(&mut self.e, i, fp, self.isa.slot_off(i_slot));
        self.isa.add_ri(&mut self.e, i, 1);
        self.isa.store(&mut self.e, fp, self.isa.slot_off(i_slot), i);
        self.isa.jmp(&mut self.e, &head);

        self.e.define_label(&done)?;
        let acc = self.acc;
        self.isa.load(&mut self.e, acc, fp, self.isa.slot_off(dst_slot));
        Ok(())
    }

    // =========================================================================
    // LAMBDAS AND CLOSURES
    // =========================================================================

    /// Free variables of a lambda body that resolve to enclosing locals;
    /// these are captured by reference.
    pub(crate) fn lambda_captures(&self, params: &[Symbol], body: &Expr) -> Vec<Symbol> {
        let mut bound: Vec<Symbol> = params.to_vec();
        let mut out: Vec<Symbol> = Vec::new();
        collect_free(body, &mut bound, &mut |name| {
            if out.contains(&name) {
                return;
            }
            if let Some(binding) = self.env.lookup(name) {
                if matches!(binding.storage, Storage::Slot(_) | Storage::Captured(_)) {
                    out.push(name);
                }
            }
        });
        out
    }

    /// Queue a lambda body for later (reference-driven) emission and
    /// return its capture list.
    pub(crate) fn queue_lambda(
        &mut self,
        label: &str,
        params: &[Symbol],
        body: &Expr,
        pure: bool,
    ) -> Result<Vec<Symbol>> {
        if params.len() > MAX_ARGS {
            return Err(CodeGenError::UnsupportedForTarget {
                message: format!("lambdas take at most {} parameters", MAX_ARGS),
                target: self.target.to_string(),
            });
        }
        let captures = self.lambda_captures(params, body);
        self.pending.insert(
            label.to_string(),
            PendingFn {
                label: label.to_string(),
                params: params.to_vec(),
                captures: captures.clone(),
                body: body.clone(),
                pure,
            },
        );
        Ok(captures)
    }

    /// Materialize a closure value {env, fn} in the accumulator.
    ///
    /// Capture-free closures get a static pair in the data segment;
    /// capturing ones build an arena object holding the pair and the
    /// addresses of the captured slots.
    pub(crate) fn gen_closure_value(&mut self, label: &str, captures: &[Symbol]) -> Result<()> {
        if captures.is_empty() {
            let pair = self.static_pair_for(label);
            let acc = self.acc;
            self.isa.lea_section(&mut self.e, acc, Section::Data, pair);
            return Ok(());
        }

        self.referenced.insert(label.to_string());

        // arena object: [env_ptr][fn_ptr][addr0][addr1]...
        let total = (2 + captures.len()) * 8;
        let a0 = self.isa.arg(0);
        self.isa.mov_ri(&mut self.e, a0, total as i64);
        self.call("ril_arena_alloc");
        let pair = self.isa.arg(4);
        let acc = self.acc;
        self.isa.mov_rr(&mut self.e, pair, acc);

        // env points just past the pair
        let t = self.isa.scratch(0);
        self.isa.mov_rr(&mut self.e, t, pair);
        self.isa.add_ri(&mut self.e, t, 16);
        self.isa.store(&mut self.e, pair, 0, t);

        // fn address (text reloc patched at finalize)
        let t = self.isa.scratch(0);
        let idx = self.e.relocs.len();
        self.isa.lea_section(&mut self.e, t, Section::Text, 0);
        self.fn_addr_fixups.push((idx, label.to_string()));
        self.isa.store(&mut self.e, pair, 8, t);

        // capture slot addresses
        for (i, name) in captures.iter().enumerate() {
            let binding = self
                .env
                .lookup(*name)
                .cloned()
                .expect("capture resolved at queue time");
            let t = self.isa.scratch(0);
            match binding.storage {
                Storage::Slot(s) => {
                    let fp = self.isa.fp();
                    self.isa.mov_rr(&mut self.e, t, fp);
                    self.isa.add_ri(&mut self.e, t, self.isa.slot_off(s));
                }
                Storage::Captured(j) => {
                    // forward the outer capture's address
                    let envp = self.load_env_ptr();
                    self.isa.load(&mut self.e, t, envp, 8 * j as i32);
                }
                _ => unreachable!("only locals are captured"),
            }
            self.isa
                .store(&mut self.e, pair, (16 + 8 * i) as i32, t);
        }

        let acc = self.acc;
        self.isa.mov_rr(&mut self.e, acc, pair);
        Ok(())
    }
}

/// Walk `expr` reporting every identifier not locally bound.
fn collect_free(expr: &Expr, bound: &mut Vec<Symbol>, hit: &mut impl FnMut(Symbol)) {
    match &expr.kind {
        ExprKind::Ident(name) => {
            if !bound.contains(name) {
                hit(*name);
            }
        }
        ExprKind::Assign { name, value, .. } => {
            collect_free(value, bound, hit);
            bound.push(*name);
        }
        ExprKind::Lambda { params, body, .. } => {
            let depth = bound.len();
            bound.extend_from_slice(params);
            collect_free(body, bound, hit);
            bound.truncate(depth);
        }
        ExprKind::Loop {
            binding,
            iter,
            body,
            bound: limit,
            ..
        } => {
            collect_free(iter, bound, hit);
            if let Some(b) = limit {
                collect_free(b, bound, hit);
            }
            let depth = bound.len();
            if let Some(b) = binding {
                bound.push(*b);
            }
            collect_free(body, bound, hit);
            bound.truncate(depth);
        }
        ExprKind::Block(stmts) => {
            let depth = bound.len();
            for stmt in stmts {
                collect_free(stmt, bound, hit);
            }
            bound.truncate(depth);
        }
        _ => {
            for child in crate::children_of(expr) {
                collect_free(child, bound, hit);
            }
        }
    }
}

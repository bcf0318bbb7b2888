//! Edge case and precedence tests for rilc-par

#[cfg(test)]
mod tests {
    use crate::{BinOp, Expr, ExprKind, Parser, UnOp};
    use rilc_util::Handler;

    fn parse(source: &str) -> Vec<Expr> {
        let handler = Handler::new();
        let program = Parser::parse_source(source, &handler);
        assert!(
            !handler.has_errors(),
            "unexpected parse errors for {:?}: {:?}",
            source,
            handler.take()
        );
        program
    }

    fn parse_expecting_errors(source: &str) -> Handler {
        let handler = Handler::new();
        let _ = Parser::parse_source(source, &handler);
        assert!(handler.has_errors(), "expected errors for {:?}", source);
        handler
    }

    fn single(source: &str) -> Expr {
        let mut program = parse(source);
        assert_eq!(program.len(), 1, "expected one statement in {:?}", source);
        program.remove(0)
    }

    fn binop_of(expr: &Expr) -> BinOp {
        match &expr.kind {
            ExprKind::Binary { op, .. } => *op,
            other => panic!("expected binary node, got {:?}", other),
        }
    }

    // ==================== PRECEDENCE LADDER ====================

    #[test]
    fn test_mul_binds_tighter_than_add() {
        // a + (b * c)
        let e = single("a + b * c");
        assert_eq!(binop_of(&e), BinOp::Add);
        if let ExprKind::Binary { rhs, .. } = &e.kind {
            assert_eq!(binop_of(rhs), BinOp::Mul);
        }
    }

    #[test]
    fn test_power_right_associative() {
        // 6 ** (2 ** 3)
        let e = single("6 ** 2 ** 3");
        assert_eq!(binop_of(&e), BinOp::Pow);
        if let ExprKind::Binary { lhs, rhs, .. } = &e.kind {
            assert!(matches!(lhs.kind, ExprKind::Number(n) if n == 6.0));
            assert_eq!(binop_of(rhs), BinOp::Pow);
        }
    }

    #[test]
    fn test_power_binds_tighter_than_mul() {
        let e = single("2 * 3 ** 4");
        assert_eq!(binop_of(&e), BinOp::Mul);
    }

    #[test]
    fn test_unary_tighter_than_power_base() {
        // -x ** 2 parses as (-x) ** 2: unary binds the base
        let e = single("-x ** 2");
        assert_eq!(binop_of(&e), BinOp::Pow);
        if let ExprKind::Binary { lhs, .. } = &e.kind {
            assert!(matches!(lhs.kind, ExprKind::Unary { op: UnOp::Neg, .. }));
        }
    }

    #[test]
    fn test_shift_tighter_than_bitand() {
        // a &b (x <<b 2)
        let e = single("a &b x <<b 2");
        assert_eq!(binop_of(&e), BinOp::AndB);
    }

    #[test]
    fn test_bitwise_ladder() {
        // ((a &b c) ^b d) |b e
        let e = single("a &b c ^b d |b e");
        assert_eq!(binop_of(&e), BinOp::OrB);
        if let ExprKind::Binary { lhs, .. } = &e.kind {
            assert_eq!(binop_of(lhs), BinOp::XorB);
        }
    }

    #[test]
    fn test_comparison_above_logical() {
        // (a < c) and (d < e)
        let e = single("a < c and d < e");
        assert_eq!(binop_of(&e), BinOp::And);
    }

    #[test]
    fn test_and_tighter_than_or() {
        let e = single("a or c and d");
        assert_eq!(binop_of(&e), BinOp::Or);
    }

    #[test]
    fn test_pipe_looser_than_or() {
        // (a or c) | f
        let e = single("a or c | f");
        assert_eq!(binop_of(&e), BinOp::Pipe);
    }

    #[test]
    fn test_range_looser_than_pipe() {
        let e = single("a | f .. c | g");
        assert!(matches!(e.kind, ExprKind::Range { .. }));
    }

    #[test]
    fn test_compose_right_associative() {
        // f <> (g <> h)
        let e = single("f <> g <> h");
        assert_eq!(binop_of(&e), BinOp::Compose);
        if let ExprKind::Binary { rhs, .. } = &e.kind {
            assert_eq!(binop_of(rhs), BinOp::Compose);
        }
    }

    #[test]
    fn test_comparison_nonassoc_rejected() {
        parse_expecting_errors("a < c < d");
    }

    #[test]
    fn test_range_nonassoc_rejected() {
        parse_expecting_errors("1 .. 2 .. 3");
    }

    #[test]
    fn test_in_membership() {
        let e = single("10 in [1, 2, 10, 20]");
        assert_eq!(binop_of(&e), BinOp::In);
    }

    #[test]
    fn test_floored_modulo() {
        let e = single("a %% c");
        assert_eq!(binop_of(&e), BinOp::FloorRem);
    }

    #[test]
    fn test_or_unwrap() {
        let e = single("risky() or! 0");
        assert_eq!(binop_of(&e), BinOp::OrUnwrap);
    }

    #[test]
    fn test_channel_send_and_recv() {
        let e = single("ch << 5");
        assert_eq!(binop_of(&e), BinOp::Send);
        let r = single(">> ch");
        assert!(matches!(
            r.kind,
            ExprKind::Unary { op: UnOp::Recv, .. }
        ));
    }

    // ==================== BINDINGS ====================

    #[test]
    fn test_immutable_binding() {
        let e = single("x = 10 + 5");
        assert!(matches!(
            e.kind,
            ExprKind::Assign { mutable: false, shadow: false, .. }
        ));
    }

    #[test]
    fn test_mutable_binding() {
        let e = single("x := 1");
        assert!(matches!(e.kind, ExprKind::Assign { mutable: true, .. }));
    }

    #[test]
    fn test_shadow_binding() {
        let e = single("shadow x = 2");
        assert!(matches!(e.kind, ExprKind::Assign { shadow: true, .. }));
    }

    #[test]
    fn test_update() {
        let e = single("x <- x + 1");
        assert!(matches!(e.kind, ExprKind::Update { .. }));
    }

    #[test]
    fn test_update_indexed_target() {
        let e = single("xs[0] <- 9");
        match e.kind {
            ExprKind::Update { target, .. } => {
                assert!(matches!(target.kind, ExprKind::Index { .. }))
            }
            other => panic!("expected update, got {:?}", other),
        }
    }

    // ==================== LAMBDAS ====================

    #[test]
    fn test_bare_param_lambda() {
        let e = single("double := x => x * 2");
        match e.kind {
            ExprKind::Assign { value, .. } => match value.kind {
                ExprKind::Lambda { params, pure, .. } => {
                    assert_eq!(params.len(), 1);
                    assert!(!pure);
                }
                other => panic!("expected lambda, got {:?}", other),
            },
            other => panic!("expected assign, got {:?}", other),
        }
    }

    #[test]
    fn test_paren_params_lambda() {
        let e = single("add = (a, c) => a + c");
        match e.kind {
            ExprKind::Assign { value, .. } => {
                assert!(matches!(value.kind, ExprKind::Lambda { ref params, .. } if params.len() == 2))
            }
            other => panic!("expected assign, got {:?}", other),
        }
    }

    #[test]
    fn test_implicit_zero_arg_lambda() {
        let e = single("work = { println(1)\nprintln(2) }");
        match e.kind {
            ExprKind::Assign { value, .. } => {
                assert!(matches!(value.kind, ExprKind::Lambda { ref params, .. } if params.is_empty()))
            }
            other => panic!("expected assign, got {:?}", other),
        }
    }

    #[test]
    fn test_pure_lambda() {
        let e = single("pure fib = n => n");
        match e.kind {
            ExprKind::Assign { value, .. } => {
                assert!(matches!(value.kind, ExprKind::Lambda { pure: true, .. }))
            }
            other => panic!("expected assign, got {:?}", other),
        }
    }

    // ==================== MATCH ====================

    #[test]
    fn test_value_match() {
        let e = single("x { 1 => 10\n2 => 20\n~> 0 }");
        match e.kind {
            ExprKind::Match { scrutinee, arms } => {
                assert!(scrutinee.is_some());
                assert_eq!(arms.len(), 3);
                assert!(arms[2].pattern.is_none());
            }
            other => panic!("expected match, got {:?}", other),
        }
    }

    #[test]
    fn test_guard_match() {
        let e = single("{\n| x > 3 => 1\n| x > 0 => 2\n~> 0\n}");
        match e.kind {
            ExprKind::Match { scrutinee, arms } => {
                assert!(scrutinee.is_none());
                assert_eq!(arms.len(), 3);
            }
            other => panic!("expected guard match, got {:?}", other),
        }
    }

    // ==================== LOOPS ====================

    #[test]
    fn test_range_loop() {
        let e = single("@ i in 0..<5 { println(i) }");
        match e.kind {
            ExprKind::Loop {
                binding,
                parallel,
                bound,
                ..
            } => {
                assert!(binding.is_some());
                assert!(!parallel);
                assert!(bound.is_none());
            }
            other => panic!("expected loop, got {:?}", other),
        }
    }

    #[test]
    fn test_parallel_loop() {
        let e = single("@@ i in 0..<8 { work(i) }");
        assert!(matches!(e.kind, ExprKind::Loop { parallel: true, .. }));
    }

    #[test]
    fn test_loop_with_max_bound() {
        let e = single("@ i in 0..n max 1000 { f(i) }");
        assert!(matches!(e.kind, ExprKind::Loop { bound: Some(_), .. }));
    }

    #[test]
    fn test_break_continue_depth() {
        let program = parse("@ i in 0..<3 { break 2\ncontinue }");
        match &program[0].kind {
            ExprKind::Loop { body, .. } => match &body.kind {
                ExprKind::Block(stmts) => {
                    assert!(matches!(stmts[0].kind, ExprKind::Break { depth: 2 }));
                    assert!(matches!(stmts[1].kind, ExprKind::Continue { depth: 1 }));
                }
                other => panic!("expected block, got {:?}", other),
            },
            other => panic!("expected loop, got {:?}", other),
        }
    }

    // ==================== OTHER CONSTRUCTS ====================

    #[test]
    fn test_defer() {
        let e = single("defer close(f)");
        assert!(matches!(e.kind, ExprKind::Defer(_)));
    }

    #[test]
    fn test_arena_block() {
        let e = single("arena { tmp = [1, 2]\nsum(tmp) }");
        assert!(matches!(e.kind, ExprKind::ArenaBlock(_)));
    }

    #[test]
    fn test_import() {
        let e = single("import \"util.ril\"");
        assert!(matches!(e.kind, ExprKind::Import { .. }));
    }

    #[test]
    fn test_cast() {
        let e = single("x as number");
        assert!(matches!(e.kind, ExprKind::Cast { .. }));
    }

    #[test]
    fn test_unsafe_variants() {
        let src = "unsafe {\nx86_64 {\nrax <- 60\nsyscall\n}\narm64 {\nx8 <- 93\nsvc\n}\n}";
        let e = single(src);
        match e.kind {
            ExprKind::UnsafeAsm(variants) => {
                assert_eq!(variants.len(), 2);
                assert_eq!(variants[0].isa.as_str(), "x86_64");
                assert_eq!(variants[0].lines, vec!["rax <- 60", "syscall"]);
            }
            other => panic!("expected unsafe asm, got {:?}", other),
        }
    }

    #[test]
    fn test_length_prefix() {
        let e = single("#xs");
        assert!(matches!(e.kind, ExprKind::Unary { op: UnOp::Len, .. }));
    }

    // ==================== ERROR RECOVERY ====================

    #[test]
    fn test_multiple_errors_reported() {
        let handler = Handler::new();
        let _ = Parser::parse_source("x = )\ny = ]\nz = 1", &handler);
        assert!(handler.error_count() >= 2);
    }

    #[test]
    fn test_recovers_to_later_statement() {
        let handler = Handler::new();
        let program = Parser::parse_source("x = )\nz = 1", &handler);
        assert!(handler.has_errors());
        assert!(program
            .iter()
            .any(|e| matches!(e.kind, ExprKind::Assign { .. })));
    }

    #[test]
    fn test_empty_program() {
        assert!(parse("").is_empty());
        assert!(parse("\n\n\n").is_empty());
    }

    #[test]
    fn test_no_panic_on_garbage() {
        let handler = Handler::new();
        let _ = Parser::parse_source("{{{{(((( => => ~> ]]]]", &handler);
        // Totality: errors are fine, panics are not.
    }
}

//! End-to-end emission tests for rilc-gen

#[cfg(test)]
mod tests {
    use rilc_par::Parser;
    use rilc_sem::Analyzer;
    use rilc_util::Handler;

    use crate::{Arch, CodeGen, CodeGenError, EmittedProgram, GenConfig, Os, Result, Target};

    fn compile_for(source: &str, arch: Arch, os: Os) -> Result<EmittedProgram> {
        let handler = Handler::new();
        let program = Parser::parse_source(source, &handler);
        assert!(!handler.has_errors(), "parse failed: {:?}", handler.take());
        let features = Analyzer::new().analyze(&program);
        let gen = CodeGen::new(Target::new(arch, os), features, GenConfig::default(), &handler)?;
        gen.compile(&program)
    }

    fn compile(source: &str) -> Result<EmittedProgram> {
        compile_for(source, Arch::X86_64, Os::Linux)
    }

    fn has_symbol(p: &EmittedProgram, name: &str) -> bool {
        p.symbols.iter().any(|(n, _)| n == name)
    }

    // ==================== BASICS ====================

    #[test]
    fn test_trivial_program_compiles() {
        let p = compile("42").unwrap();
        assert!(!p.text.is_empty());
        assert!(has_symbol(&p, "_start"));
        assert_eq!(p.entry, 0);
    }

    #[test]
    fn test_trivial_program_is_static() {
        // no external functions => the minimal-binary path is available
        let p = compile("42").unwrap();
        assert!(p.needed.is_empty());
    }

    #[test]
    fn test_hello_world() {
        let p = compile("println(\"Hello, World!\")").unwrap();
        assert!(has_symbol(&p, "ril_print_str"));
        // the text includes the string bytes in rodata
        let rodata = String::from_utf8_lossy(&p.rodata);
        assert!(rodata.contains("Hello, World!"));
    }

    #[test]
    fn test_arithmetic_program() {
        let p = compile("x := 10 + 5\nprintln(x)").unwrap();
        assert!(has_symbol(&p, "ril_print_num"));
    }

    // ==================== DEAD CODE ELIMINATION ====================

    #[test]
    fn test_no_print_runtime_without_print() {
        let p = compile("x = 1 + 2\ny = x * 3").unwrap();
        assert!(!has_symbol(&p, "ril_print_num"));
        assert!(!has_symbol(&p, "ril_print_str"));
        assert!(!has_symbol(&p, "ril_write_i64"));
    }

    #[test]
    fn test_unused_function_stripped() {
        let p = compile("unused = x => x * 2\ny = 5").unwrap();
        assert!(!p.symbols.iter().any(|(n, _)| n.starts_with("fn_unused")));
    }

    #[test]
    fn test_used_function_emitted() {
        let p = compile("double = x => x * 2\ndouble(21)").unwrap();
        assert!(p.symbols.iter().any(|(n, _)| n.starts_with("fn_double")));
    }

    #[test]
    fn test_print_helpers_pull_write_chain() {
        let p = compile("println(3.5)").unwrap();
        assert!(has_symbol(&p, "ril_print_num"));
        assert!(has_symbol(&p, "ril_write_i64"));
        assert!(has_symbol(&p, "ril_write_ch"));
    }

    // ==================== BINDINGS ====================

    #[test]
    fn test_immutable_write_rejected() {
        let err = compile("x = 1\nx <- 2").unwrap_err();
        assert!(matches!(err, CodeGenError::ImmutableWrite { .. }));
    }

    #[test]
    fn test_immutable_rebind_rejected() {
        let err = compile("x = 1\nx = 2").unwrap_err();
        assert!(matches!(err, CodeGenError::ImmutableWrite { .. }));
    }

    #[test]
    fn test_mutable_update_allowed() {
        assert!(compile("x := 1\nx <- x + 1").is_ok());
    }

    #[test]
    fn test_shadow_requires_marker() {
        // the body only compiles when f is reachable
        let err = compile("x = 1\nf = y => { x = 2\nx }\nf(0)").unwrap_err();
        assert!(matches!(err, CodeGenError::ShadowWithoutMarker { .. }));
    }

    #[test]
    fn test_shadow_marker_accepted() {
        // the outer x stays untouched; the inner binding is fresh
        assert!(compile("x = 1\nf = y => { shadow x = 2\nx }\nf(0)").is_ok());
    }

    #[test]
    fn test_undefined_name_rejected() {
        let err = compile("y = ghost + 1").unwrap_err();
        assert!(matches!(err, CodeGenError::UndefinedName { .. }));
    }

    // ==================== CONTROL FLOW ====================

    #[test]
    fn test_range_loop_compiles() {
        let p = compile("@ i in 0..<5 { println(i) }").unwrap();
        assert!(has_symbol(&p, "ril_print_num"));
    }

    #[test]
    fn test_unbounded_loop_warns() {
        let handler = Handler::new();
        let source = "n := 10\n@ i in 0..n { x := i }";
        let program = Parser::parse_source(source, &handler);
        let features = Analyzer::new().analyze(&program);
        let gen = CodeGen::new(
            Target::new(Arch::X86_64, Os::Linux),
            features,
            GenConfig::default(),
            &handler,
        )
        .unwrap();
        gen.compile(&program).unwrap();
        let diags = handler.take();
        assert!(diags
            .iter()
            .any(|d| d.message.contains("capped") || d.message.contains("bound")));
    }

    #[test]
    fn test_explicit_max_no_warning() {
        let handler = Handler::new();
        let source = "n := 10\n@ i in 0..n max 100 { x := i }";
        let program = Parser::parse_source(source, &handler);
        let features = Analyzer::new().analyze(&program);
        let gen = CodeGen::new(
            Target::new(Arch::X86_64, Os::Linux),
            features,
            GenConfig::default(),
            &handler,
        )
        .unwrap();
        gen.compile(&program).unwrap();
        assert!(handler.take().is_empty());
    }

    #[test]
    fn test_break_outside_loop_rejected() {
        assert!(compile("break").is_err());
    }

    #[test]
    fn test_match_linear() {
        let src = "x := 2\ny = x { 1 => 10\n2 => 20\n~> 0 }";
        assert!(compile(src).is_ok());
    }

    #[test]
    fn test_match_jump_table_emitted() {
        // ten dense integer arms trigger the table: rodata grows by
        // span * 8 zeroed bytes resolved to Abs64 relocations
        let mut arms = String::new();
        for i in 0..10 {
            arms.push_str(&format!("{} => {}\n", i, i * 10));
        }
        let src = format!("x := 5\ny = x {{ {}~> 0 }}", arms);
        let p = compile(&src).unwrap();
        let abs = p
            .relocs
            .iter()
            .filter(|r| matches!(r, crate::Reloc::Abs64Text { .. }))
            .count();
        assert!(abs >= 10, "expected jump table entries, got {}", abs);
    }

    #[test]
    fn test_sparse_match_stays_linear() {
        let src = "x := 5\ny = x { 1 => 1\n1000 => 2\n2000 => 3\n~> 0 }";
        let p = compile(src).unwrap();
        let abs = p
            .relocs
            .iter()
            .filter(|r| matches!(r, crate::Reloc::Abs64Text { .. }))
            .count();
        assert_eq!(abs, 0);
    }

    #[test]
    fn test_guard_match() {
        let src = "x := 4\ny = {\n| x > 3 => 1\n| x > 0 => 2\n~> 0\n}";
        assert!(compile(src).is_ok());
    }

    #[test]
    fn test_defer_compiles() {
        assert!(compile("f = x => { defer println(x)\nx * 2 }\nf(1)").is_ok());
    }

    #[test]
    fn test_arena_block() {
        let p = compile("arena { xs = [1, 2, 3]\n#xs }").unwrap();
        assert!(has_symbol(&p, "ril_arena_push"));
        assert!(has_symbol(&p, "ril_arena_pop"));
    }

    #[test]
    fn test_recursion_and_tail_call() {
        let src = "loop_to = n => n { 0 => 0\n~> loop_to(n - 1) }\nloop_to(10)";
        let p = compile(src).unwrap();
        assert!(p.symbols.iter().any(|(n, _)| n.starts_with("fn_loop_to")));
    }

    #[test]
    fn test_pure_function_memoized() {
        let src = "pure sq = n => n * n\nsq(4)";
        let p = compile(src).unwrap();
        // the memo cache lives in the data segment
        assert!(p.data.len() >= 512);
    }

    // ==================== CHANNELS AND PARALLELISM ====================

    #[test]
    fn test_channel_helpers() {
        let p = compile("c = chan(8)\nc << 5\nx = >> c").unwrap();
        assert!(has_symbol(&p, "ril_chan_new"));
        assert!(has_symbol(&p, "ril_chan_send"));
        assert!(has_symbol(&p, "ril_chan_recv"));
    }

    #[test]
    fn test_parallel_loop_compiles() {
        assert!(compile("@@ i in 0..<8 { x := i * i }").is_ok());
    }

    // ==================== UNSAFE BLOCKS ====================

    #[test]
    fn test_unsafe_selects_target_variant() {
        let src = "unsafe {\nx86_64 {\nrax <- 0\n}\narm64 {\nx0 <- 0\n}\n}";
        assert!(compile_for(src, Arch::X86_64, Os::Linux).is_ok());
        assert!(compile_for(src, Arch::Arm64, Os::Linux).is_ok());
    }

    #[test]
    fn test_unsafe_missing_variant_rejected() {
        let src = "unsafe {\nx86_64 {\nrax <- 0\n}\n}";
        let err = compile_for(src, Arch::Riscv64, Os::Linux).unwrap_err();
        assert!(matches!(err, CodeGenError::UnsupportedForTarget { .. }));
    }

    // ==================== CROSS-ARCHITECTURE ====================

    #[test]
    fn test_same_program_compiles_on_all_arches() {
        let src = "double = x => x * 2\nprintln(double(21))";
        for arch in [Arch::X86_64, Arch::Arm64, Arch::Riscv64] {
            let p = compile_for(src, arch, Os::Linux).unwrap();
            assert!(!p.text.is_empty(), "{:?}", arch);
        }
    }

    #[test]
    fn test_cross_arch_symbol_parity() {
        // the helper/function sets agree across backends
        let src = "println(\"hi\")\nx := 1 + 2\nprintln(x)";
        let mut sets = Vec::new();
        for arch in [Arch::X86_64, Arch::Arm64] {
            let p = compile_for(src, arch, Os::Linux).unwrap();
            let mut names: Vec<String> =
                p.symbols.iter().map(|(n, _)| n.clone()).collect();
            names.sort();
            sets.push(names);
        }
        assert_eq!(sets[0], sets[1]);
    }

    #[test]
    fn test_pe_pulls_imports() {
        let p = compile_for("println(1)", Arch::X86_64, Os::Windows).unwrap();
        assert!(p.needed.contains_key("printf"));
        assert_eq!(p.needed.get("printf").map(String::as_str), Some("msvcrt.dll"));
        assert!(p.needed.contains_key("ExitProcess"));
    }

    #[test]
    fn test_pe_rejects_other_arches() {
        assert!(compile_for("1", Arch::Arm64, Os::Windows).is_err());
    }

    #[test]
    fn test_macos_compiles() {
        let p = compile_for("println(7)", Arch::Arm64, Os::Macos).unwrap();
        assert!(has_symbol(&p, "ril_print_num"));
    }

    // ==================== CLOSURES ====================

    #[test]
    fn test_closure_captures_local() {
        let src = "f = a => { add_a = x => x + a\nadd_a(10) }\nf(1)";
        let p = compile(src).unwrap();
        assert!(has_symbol(&p, "ril_arena_alloc"));
    }

    #[test]
    fn test_pipe_calls_function() {
        assert!(compile("inc = x => x + 1\ny = 1 | inc").is_ok());
    }

    #[test]
    fn test_or_unwrap() {
        assert!(compile("x := 1 / 0\ny = x or! 0").is_ok());
    }

    #[test]
    fn test_membership() {
        let p = compile("x = 10 in [1, 2, 10, 20]").unwrap();
        assert!(has_symbol(&p, "ril_in_list"));
    }

    #[test]
    fn test_power_helper() {
        let p = compile("x = 6 ** 2 ** 3").unwrap();
        assert!(has_symbol(&p, "ril_pow"));
    }

    #[test]
    fn test_string_concat_helper() {
        let p = compile("a = \"x\"\nc = \"y\"\nd = a + c").unwrap();
        assert!(has_symbol(&p, "ril_concat"));
        assert!(has_symbol(&p, "ril_arena_alloc"));
    }
}

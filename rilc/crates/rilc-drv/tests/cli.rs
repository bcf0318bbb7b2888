//! Integration tests for the rilc binary.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn rilc() -> Command {
    Command::cargo_bin("rilc").expect("rilc binary builds")
}

fn write_source(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_build_hello_world_elf() {
    let dir = TempDir::new().unwrap();
    let src = write_source(&dir, "hello.ril", "println(\"Hello, World!\")\n");
    let out = dir.path().join("hello");

    rilc()
        .arg("build")
        .arg(&src)
        .arg("-o")
        .arg(&out)
        .arg("--target")
        .arg("x86_64-linux")
        .assert()
        .success();

    let bytes = std::fs::read(&out).unwrap();
    assert_eq!(&bytes[0..4], &[0x7F, b'E', b'L', b'F']);
}

#[test]
fn test_minimal_binary_under_ceiling() {
    let dir = TempDir::new().unwrap();
    let src = write_source(&dir, "tiny.ril", "42\n");
    let out = dir.path().join("tiny");

    rilc()
        .arg("build")
        .arg(&src)
        .arg("-o")
        .arg(&out)
        .arg("--target")
        .arg("x86_64-linux")
        .assert()
        .success();

    let size = std::fs::metadata(&out).unwrap().len();
    assert!(size <= 25 * 1024, "binary is {} bytes", size);
}

#[test]
fn test_cross_compile_all_targets() {
    let dir = TempDir::new().unwrap();
    let src = write_source(&dir, "x.ril", "x := 10 + 5\nprintln(x)\n");

    for (triple, name, magic) in [
        ("x86_64-linux", "x_l64", vec![0x7Fu8, b'E', b'L', b'F']),
        ("arm64-linux", "x_a64", vec![0x7F, b'E', b'L', b'F']),
        ("riscv64-linux", "x_r64", vec![0x7F, b'E', b'L', b'F']),
        ("x86_64-windows", "x.exe", b"MZ".to_vec()),
        ("arm64-macos", "x_mac", vec![0xCF, 0xFA, 0xED, 0xFE]),
    ] {
        let out = dir.path().join(name);
        rilc()
            .arg("build")
            .arg(&src)
            .arg("-o")
            .arg(&out)
            .arg("--target")
            .arg(triple)
            .assert()
            .success();
        let bytes = std::fs::read(&out).unwrap();
        assert_eq!(&bytes[..magic.len()], &magic[..], "{}", triple);
    }
}

#[test]
fn test_exe_extension_implies_pe() {
    let dir = TempDir::new().unwrap();
    let src = write_source(&dir, "w.ril", "println(1)\n");
    let out = dir.path().join("w.exe");

    rilc()
        .arg("build")
        .arg(&src)
        .arg("-o")
        .arg(&out)
        .assert()
        .success();

    let bytes = std::fs::read(&out).unwrap();
    assert_eq!(&bytes[0..2], b"MZ");
}

#[test]
fn test_syntax_error_exit_code_and_position() {
    let dir = TempDir::new().unwrap();
    let src = write_source(&dir, "bad.ril", "x = )\n");

    rilc()
        .arg("build")
        .arg(&src)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("bad.ril:1:"));
}

#[test]
fn test_immutable_write_reported_with_code_and_position() {
    let dir = TempDir::new().unwrap();
    let src = write_source(&dir, "imm.ril", "x = 1\nx <- 2\n");

    rilc()
        .arg("build")
        .arg(&src)
        .arg("--target")
        .arg("x86_64-linux")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("immutable"))
        .stderr(predicate::str::contains("E3002"))
        .stderr(predicate::str::contains("imm.ril:2:"));
}

#[test]
fn test_undefined_name_reported_with_code() {
    let dir = TempDir::new().unwrap();
    let src = write_source(&dir, "und.ril", "y = ghost + 1\n");

    rilc()
        .arg("build")
        .arg(&src)
        .arg("--target")
        .arg("x86_64-linux")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("E3001"))
        .stderr(predicate::str::contains("ghost"));
}

#[test]
fn test_circular_import_reported() {
    let dir = TempDir::new().unwrap();
    let a = write_source(&dir, "a.ril", "import \"b.ril\"\n");
    write_source(&dir, "b.ril", "import \"a.ril\"\n");

    rilc()
        .arg("build")
        .arg(&a)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("circular import"));
}

#[test]
fn test_import_splices_dependency() {
    let dir = TempDir::new().unwrap();
    write_source(&dir, "util.ril", "double = x => x * 2\n");
    let main = write_source(
        &dir,
        "main.ril",
        "import \"util.ril\"\nprintln(double(21))\n",
    );
    let out = dir.path().join("main_out");

    rilc()
        .arg("build")
        .arg(&main)
        .arg("-o")
        .arg(&out)
        .arg("--target")
        .arg("x86_64-linux")
        .assert()
        .success();
}

#[test]
fn test_missing_input_is_cli_error() {
    rilc().arg("build").assert().code(3);
}

#[test]
fn test_unknown_target_rejected() {
    let dir = TempDir::new().unwrap();
    let src = write_source(&dir, "t.ril", "1\n");

    rilc()
        .arg("build")
        .arg(&src)
        .arg("--target")
        .arg("mips-linux")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("unknown target"));
}

#[test]
fn test_loop_bound_warning_on_stderr() {
    let dir = TempDir::new().unwrap();
    let src = write_source(&dir, "loopy.ril", "n := 5\n@ i in 0..n { x := i }\n");
    let out = dir.path().join("loopy");

    rilc()
        .arg("build")
        .arg(&src)
        .arg("-o")
        .arg(&out)
        .arg("--target")
        .arg("x86_64-linux")
        .assert()
        .success()
        .stderr(predicate::str::contains("W4001").or(predicate::str::contains("capped")));
}

#[test]
fn test_output_is_executable_on_unix() {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let src = write_source(&dir, "p.ril", "42\n");
        let out = dir.path().join("p");
        rilc()
            .arg("build")
            .arg(&src)
            .arg("-o")
            .arg(&out)
            .arg("--target")
            .arg("x86_64-linux")
            .assert()
            .success();
        let mode = std::fs::metadata(&out).unwrap().permissions().mode();
        assert!(mode & 0o111 != 0);
    }
}

//! rilc-drv - Compiler Driver
//!
//! ============================================================================
//! COMPILATION PIPELINE
//! ============================================================================
//!
//! ```text
//! Source files (.ril)
//!        │
//!        ▼
//!   [Import resolution] ──▶ modules in dependency order
//!        │
//!        ▼
//!   [Lexer] ──▶ token stream          (rilc-lex)
//!        │
//!        ▼
//!   [Parser] ──▶ AST                  (rilc-par)
//!        │
//!        ▼
//!   [Feature analysis] ──▶ flags      (rilc-sem)
//!        │
//!        ▼
//!   [Code generation] ──▶ text/rodata/data + relocations   (rilc-gen)
//!        │
//!        ▼
//!   [Container writer] ──▶ ELF / PE / Mach-O               (rilc-obj)
//! ```
//!
//! The pipeline is single-threaded and synchronous; each phase finishes
//! before the next begins, and compilation aborts at the first phase
//! whose handler holds errors (the parser reports several per run by
//! synchronizing at top level).
//!
//! EXIT CODES:
//! -----------
//! - 0: success
//! - 1: compilation error (first error's position on stderr)
//! - 2: internal error
//! - 3: command line error
//!
//! TARGET SELECTION:
//! -----------------
//! `--target <arch>-<os>` wins; otherwise a `.exe` output selects
//! x86_64-windows; otherwise the host target. The `RILC_LOG` environment
//! variable enables tracing diagnostics (EnvFilter syntax).

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use clap::{Parser as ClapParser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use rilc_gen::{CodeGen, EmittedProgram, GenConfig, Os, Target};
use rilc_par::Program;
use rilc_sem::{resolve_imports, Analyzer};
use rilc_util::{Handler, SourceMap};

/// Compiler configuration assembled from the command line.
#[derive(Debug, Clone)]
pub struct Config {
    /// Input source files
    pub inputs: Vec<PathBuf>,
    /// Output path (None derives from the first input)
    pub output: Option<PathBuf>,
    /// Target triple override
    pub target: Option<String>,
    /// Verbose diagnostics
    pub verbose: bool,
    /// Division-by-zero / null guards (on unless --no-checks)
    pub runtime_checks: bool,
}

/// One compilation session: configuration plus collected diagnostics.
pub struct Session {
    pub config: Config,
    pub source_map: SourceMap,
    pub handler: Handler,
}

impl Session {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            source_map: SourceMap::new(),
            handler: Handler::new(),
        }
    }

    /// Resolve the compile target.
    pub fn target(&self) -> anyhow::Result<Target> {
        if let Some(triple) = &self.config.target {
            return Target::parse(triple)
                .ok_or_else(|| anyhow!("unknown target '{}'", triple));
        }
        if let Some(out) = &self.config.output {
            if out.extension().map(|e| e == "exe").unwrap_or(false) {
                return Ok(Target::parse("x86_64-windows").expect("builtin triple"));
            }
        }
        Ok(Target::host())
    }

    /// The output path: explicit, or the first input's stem (plus `.exe`
    /// on PE targets).
    pub fn output_path(&self, target: Target) -> anyhow::Result<PathBuf> {
        if let Some(out) = &self.config.output {
            return Ok(out.clone());
        }
        let first = self
            .config
            .inputs
            .first()
            .ok_or_else(|| anyhow!("no input files"))?;
        let stem = first
            .file_stem()
            .ok_or_else(|| anyhow!("cannot derive output name from '{}'", first.display()))?;
        let mut out = PathBuf::from(stem);
        if target.os == Os::Windows {
            out.set_extension("exe");
        }
        Ok(out)
    }

    /// Load, resolve imports, and parse every input into one program.
    fn load_program(&mut self) -> anyhow::Result<Option<Program>> {
        let mut modules = Vec::new();
        for input in self.config.inputs.clone() {
            let mut load = |p: &Path| std::fs::read_to_string(p);
            let Some(resolved) = resolve_imports(&input, &mut load, &self.handler) else {
                return Ok(None);
            };
            for module in resolved {
                if modules
                    .iter()
                    .any(|(p, _): &(PathBuf, String)| *p == module.path)
                {
                    continue;
                }
                modules.push((module.path, module.source));
            }
        }

        let mut program = Vec::new();
        for (path, source) in modules {
            let file_id = self
                .source_map
                .add_file(path.display().to_string(), source.as_str());
            debug!(file = %path.display(), "parsing");

            let module_handler = Handler::new();
            let ast = rilc_par::Parser::parse_source(&source, &module_handler);
            for mut diag in module_handler.take() {
                diag.span.file_id = file_id;
                self.handler.emit(diag);
            }
            program.extend(ast);
        }
        Ok(Some(program))
    }

    /// Run the whole pipeline, producing the output file.
    pub fn build(&mut self) -> anyhow::Result<Option<PathBuf>> {
        let target = self.target()?;
        let out_path = self.output_path(target)?;
        info!(%target, out = %out_path.display(), "compiling");

        let Some(program) = self.load_program()? else {
            return Ok(None);
        };
        if self.handler.has_errors() {
            return Ok(None);
        }

        let features = Analyzer::new().analyze(&program);
        debug!(?features, "feature analysis complete");

        let gen_config = GenConfig {
            runtime_checks: self.config.runtime_checks,
            ..GenConfig::default()
        };
        let emitted: EmittedProgram =
            match CodeGen::new(target, features, gen_config, &self.handler)
                .and_then(|gen| gen.compile(&program))
            {
                Ok(emitted) => emitted,
                Err(err) => {
                    // keep the variant's own position and stable code
                    self.handler.emit(
                        rilc_util::Diagnostic::error(err.to_string(), err.span())
                            .with_code(err.code()),
                    );
                    return Ok(None);
                }
            };
        if self.handler.has_errors() {
            return Ok(None);
        }

        let bytes = match rilc_obj::write_executable(&emitted) {
            Ok(bytes) => bytes,
            Err(err) => {
                self.handler.emit(
                    rilc_util::Diagnostic::error(err.to_string(), err.span())
                        .with_code(err.code()),
                );
                return Ok(None);
            }
        };

        std::fs::write(&out_path, &bytes)
            .with_context(|| format!("writing '{}'", out_path.display()))?;
        mark_executable(&out_path)?;
        info!(bytes = bytes.len(), "wrote executable");
        Ok(Some(out_path))
    }
}

#[cfg(unix)]
fn mark_executable(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(perms.mode() | 0o755);
    std::fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn mark_executable(_path: &Path) -> anyhow::Result<()> {
    Ok(())
}

// =============================================================================
// COMMAND LINE
// =============================================================================

/// rilc - the Ril compiler
#[derive(ClapParser, Debug)]
#[command(name = "rilc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Single-pass native compiler for the Ril language", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose diagnostics
    #[arg(short, long, global = true, env = "RILC_VERBOSE")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compile source files to a native executable
    Build(BuildCommand),

    /// Compile and immediately run the result
    Run(BuildCommand),
}

#[derive(ClapParser, Debug)]
struct BuildCommand {
    /// Source files (.ril)
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Output path (target inferred from a .exe extension)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Target triple, e.g. x86_64-linux, arm64-macos, riscv64-linux
    #[arg(long)]
    target: Option<String>,

    /// Disable division-by-zero and null-pointer guards
    #[arg(long)]
    no_checks: bool,
}

fn config_from(cmd: &BuildCommand, verbose: bool) -> Config {
    Config {
        inputs: cmd.inputs.clone(),
        output: cmd.output.clone(),
        target: cmd.target.clone(),
        verbose,
        runtime_checks: !cmd.no_checks,
    }
}

/// CLI entry point; returns the process exit code.
pub fn main() -> i32 {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // clap renders its own help/version output
            let _ = err.print();
            return if err.use_stderr() { 3 } else { 0 };
        }
    };

    let filter = EnvFilter::try_from_env("RILC_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if cli.verbose { "debug" } else { "warn" })
    });
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let (cmd, and_run) = match &cli.command {
        Commands::Build(cmd) => (cmd, false),
        Commands::Run(cmd) => (cmd, true),
    };

    let mut session = Session::new(config_from(cmd, cli.verbose));
    let result = session.build();
    // warnings surface even on success
    session.handler.print_all(&session.source_map);
    match result {
        Ok(Some(out_path)) => {
            if and_run {
                run_artifact(&out_path)
            } else {
                0
            }
        }
        Ok(None) => 1,
        Err(err) => {
            eprintln!("error: {:#}", err);
            2
        }
    }
}

fn run_artifact(path: &Path) -> i32 {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        Path::new(".").join(path)
    };
    match std::process::Command::new(&absolute).status() {
        Ok(status) => status.code().unwrap_or(1),
        Err(err) => {
            eprintln!("error: cannot run '{}': {}", absolute.display(), err);
            2
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(inputs: &[&str]) -> Config {
        Config {
            inputs: inputs.iter().map(PathBuf::from).collect(),
            output: None,
            target: None,
            verbose: false,
            runtime_checks: true,
        }
    }

    #[test]
    fn test_target_from_exe_extension() {
        let mut c = config(&["main.ril"]);
        c.output = Some(PathBuf::from("out.exe"));
        let session = Session::new(c);
        let target = session.target().unwrap();
        assert_eq!(target, Target::parse("x86_64-windows").unwrap());
    }

    #[test]
    fn test_explicit_target_wins() {
        let mut c = config(&["main.ril"]);
        c.output = Some(PathBuf::from("out.exe"));
        c.target = Some("riscv64-linux".to_string());
        let session = Session::new(c);
        assert_eq!(
            session.target().unwrap(),
            Target::parse("riscv64-linux").unwrap()
        );
    }

    #[test]
    fn test_bad_target_rejected() {
        let mut c = config(&["main.ril"]);
        c.target = Some("mips-linux".to_string());
        assert!(Session::new(c).target().is_err());
    }

    #[test]
    fn test_output_derived_from_stem() {
        let session = Session::new(config(&["examples_dir/fib.ril"]));
        let out = session
            .output_path(Target::parse("x86_64-linux").unwrap())
            .unwrap();
        assert_eq!(out, PathBuf::from("fib"));
    }

    #[test]
    fn test_output_gets_exe_for_pe() {
        let session = Session::new(config(&["fib.ril"]));
        let out = session
            .output_path(Target::parse("x86_64-windows").unwrap())
            .unwrap();
        assert_eq!(out, PathBuf::from("fib.exe"));
    }
}

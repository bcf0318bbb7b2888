//! Import resolution.
//!
//! `import "path"` splices another source file's declarations ahead of the
//! importer's. The resolver builds the dependency graph depth-first and
//! returns modules in dependency order (leaves first, entry file last).
//! Cycles are forbidden; the error message prints the cycle.

use std::path::{Path, PathBuf};

use rilc_par::{ExprKind, Parser};
use rilc_util::diagnostic::codes;
use rilc_util::{Handler, Span};
use rustc_hash::FxHashMap;

/// A loaded module, in dependency order.
pub struct ModuleSource {
    pub path: PathBuf,
    pub source: String,
}

#[derive(Clone, Copy, PartialEq)]
enum VisitState {
    InProgress,
    Done,
}

/// Resolve the import graph rooted at `entry`.
///
/// `load` maps a path to its contents; IO stays with the caller so the
/// resolver is testable without a filesystem. Returns `None` after
/// reporting when a file fails to load or the graph has a cycle.
pub fn resolve_imports(
    entry: &Path,
    load: &mut dyn FnMut(&Path) -> std::io::Result<String>,
    handler: &Handler,
) -> Option<Vec<ModuleSource>> {
    let mut resolver = Resolver {
        load,
        handler,
        states: FxHashMap::default(),
        stack: Vec::new(),
        order: Vec::new(),
    };
    resolver.visit(entry)?;
    Some(resolver.order)
}

struct Resolver<'a> {
    load: &'a mut dyn FnMut(&Path) -> std::io::Result<String>,
    handler: &'a Handler,
    states: FxHashMap<PathBuf, VisitState>,
    stack: Vec<PathBuf>,
    order: Vec<ModuleSource>,
}

impl Resolver<'_> {
    fn visit(&mut self, path: &Path) -> Option<()> {
        let canonical = normalize(path);

        match self.states.get(&canonical) {
            Some(VisitState::Done) => return Some(()),
            Some(VisitState::InProgress) => {
                let mut cycle: Vec<String> = self
                    .stack
                    .iter()
                    .skip_while(|p| **p != canonical)
                    .map(|p| p.display().to_string())
                    .collect();
                cycle.push(canonical.display().to_string());
                self.handler.error(
                    codes::E_SEM_CIRCULAR_IMPORT,
                    format!("circular import: {}", cycle.join(" -> ")),
                    Span::DUMMY,
                );
                return None;
            }
            None => {}
        }

        let source = match (self.load)(&canonical) {
            Ok(s) => s,
            Err(e) => {
                self.handler.error(
                    codes::E_SEM_IMPORT_NOT_FOUND,
                    format!("cannot read '{}': {}", canonical.display(), e),
                    Span::DUMMY,
                );
                return None;
            }
        };

        self.states
            .insert(canonical.clone(), VisitState::InProgress);
        self.stack.push(canonical.clone());

        // A scratch handler: parse errors surface when the module itself
        // is compiled; here only the import declarations matter.
        let scratch = Handler::new();
        let program = Parser::parse_source(&source, &scratch);
        let base = canonical.parent().map(Path::to_path_buf).unwrap_or_default();

        for decl in &program {
            if let ExprKind::Import { path: import } = &decl.kind {
                let target = base.join(import.as_str());
                self.visit(&target)?;
            }
        }

        self.stack.pop();
        self.states.insert(canonical.clone(), VisitState::Done);
        self.order.push(ModuleSource {
            path: canonical,
            source,
        });
        Some(())
    }
}

/// Collapse `.` and redundant separators without touching the filesystem,
/// so in-memory tests and real paths normalize the same way.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            std::path::Component::CurDir => {}
            std::path::Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn loader(files: &[(&str, &str)]) -> HashMap<PathBuf, String> {
        files
            .iter()
            .map(|(p, s)| (PathBuf::from(p), s.to_string()))
            .collect()
    }

    fn run(files: HashMap<PathBuf, String>, entry: &str) -> (Option<Vec<String>>, Handler) {
        let handler = Handler::new();
        let mut load = |p: &Path| {
            files.get(p).cloned().ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::NotFound, "missing")
            })
        };
        let result = resolve_imports(Path::new(entry), &mut load, &handler);
        let order = result.map(|mods| {
            mods.iter()
                .map(|m| m.path.display().to_string())
                .collect()
        });
        (order, handler)
    }

    #[test]
    fn test_single_file() {
        let files = loader(&[("main.ril", "x = 1")]);
        let (order, handler) = run(files, "main.ril");
        assert!(!handler.has_errors());
        assert_eq!(order.unwrap(), vec!["main.ril"]);
    }

    #[test]
    fn test_dependency_order() {
        let files = loader(&[
            ("main.ril", "import \"util.ril\"\nmain_fn = x => x"),
            ("util.ril", "helper = x => x"),
        ]);
        let (order, handler) = run(files, "main.ril");
        assert!(!handler.has_errors());
        assert_eq!(order.unwrap(), vec!["util.ril", "main.ril"]);
    }

    #[test]
    fn test_diamond_is_fine() {
        let files = loader(&[
            ("main.ril", "import \"a.ril\"\nimport \"b.ril\""),
            ("a.ril", "import \"base.ril\""),
            ("b.ril", "import \"base.ril\""),
            ("base.ril", "x = 1"),
        ]);
        let (order, handler) = run(files, "main.ril");
        assert!(!handler.has_errors());
        let order = order.unwrap();
        assert_eq!(order.first().map(String::as_str), Some("base.ril"));
        assert_eq!(order.last().map(String::as_str), Some("main.ril"));
        assert_eq!(order.len(), 4);
    }

    #[test]
    fn test_cycle_detected_and_printed() {
        let files = loader(&[
            ("a.ril", "import \"b.ril\""),
            ("b.ril", "import \"a.ril\""),
        ]);
        let (order, handler) = run(files, "a.ril");
        assert!(order.is_none());
        let first = handler.first_error().unwrap();
        assert!(first.message.contains("circular import"));
        assert!(first.message.contains("a.ril"));
        assert!(first.message.contains("b.ril"));
    }

    #[test]
    fn test_self_import_is_a_cycle() {
        let files = loader(&[("a.ril", "import \"a.ril\"")]);
        let (order, handler) = run(files, "a.ril");
        assert!(order.is_none());
        assert!(handler.has_errors());
    }

    #[test]
    fn test_missing_file_reports_not_found() {
        let files = loader(&[("main.ril", "import \"gone.ril\"")]);
        let (order, handler) = run(files, "main.ril");
        assert!(order.is_none());
        let first = handler.first_error().unwrap();
        assert_eq!(first.code, Some(codes::E_SEM_IMPORT_NOT_FOUND));
        assert!(first.message.contains("cannot read"));
    }

    #[test]
    fn test_cycle_code_distinct_from_not_found() {
        let files = loader(&[
            ("a.ril", "import \"b.ril\""),
            ("b.ril", "import \"a.ril\""),
        ]);
        let (_, handler) = run(files, "a.ril");
        let first = handler.first_error().unwrap();
        assert_eq!(first.code, Some(codes::E_SEM_CIRCULAR_IMPORT));
    }
}

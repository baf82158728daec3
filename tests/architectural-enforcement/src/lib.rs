//! Architectural Enforcement Integration Tests
//!
//! Source scanners shared by the tests in `tests/`. They enforce:
//! - No sleep() calls in production code (wait on channels and deadlines)
//! - No blocking file or network I/O inside async functions
//! - No process-wide router or handler registry
//!
//! Production code is everything in a source file before its
//! `#[cfg(test)]` module, with comments stripped.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Source directories that make up the shipped code
pub const PRODUCTION_DIRS: &[&str] = &["bridge/core/src", "bridge/daemon/src"];

/// Workspace root, resolved from this crate's manifest
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

/// One offending line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File, relative to the workspace root
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// The offending code
    pub code: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} - {}", self.path.display(), self.line, self.code)
    }
}

/// A production line: 1-based number and code with comments removed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeLine<'a> {
    /// 1-based line number
    pub number: usize,
    /// Code before any `//`
    pub code: &'a str,
}

/// Production lines of a source file
#[must_use]
pub fn production_code(content: &str) -> Vec<CodeLine<'_>> {
    let mut lines = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("#[cfg(test)]") {
            break;
        }
        let code = line.split("//").next().unwrap_or(line);
        if code.trim().is_empty() {
            continue;
        }
        lines.push(CodeLine {
            number: idx + 1,
            code,
        });
    }
    lines
}

/// Signature line of the function enclosing `lines[idx]`, if any
#[must_use]
pub fn enclosing_fn<'a>(lines: &[CodeLine<'a>], idx: usize) -> Option<&'a str> {
    lines[..=idx]
        .iter()
        .rev()
        .map(|line| line.code.trim_start())
        .find(|code| is_fn_signature(code))
}

fn is_fn_signature(code: &str) -> bool {
    let rest = code
        .trim_start_matches("pub(crate) ")
        .trim_start_matches("pub ")
        .trim_start_matches("const ")
        .trim_start_matches("async ");
    rest.starts_with("fn ")
}

/// Every `.rs` file under the production directories
#[must_use]
pub fn production_files() -> Vec<PathBuf> {
    let root = workspace_root();
    let mut files = Vec::new();
    for dir in PRODUCTION_DIRS {
        for entry in walkdir::WalkDir::new(root.join(dir))
            .into_iter()
            .filter_map(Result::ok)
        {
            if entry.path().extension().and_then(|s| s.to_str()) == Some("rs") {
                files.push(entry.into_path());
            }
        }
    }
    files.sort();
    files
}

/// Run `is_violation` over every production line of every production file
///
/// The predicate sees the file's production lines and the index under test.
pub fn scan<F>(is_violation: F) -> Vec<Violation>
where
    F: Fn(&[CodeLine<'_>], usize) -> bool,
{
    let root = workspace_root();
    let mut violations = Vec::new();
    for path in production_files() {
        let Ok(content) = fs::read_to_string(&path) else {
            continue;
        };
        let lines = production_code(&content);
        for idx in 0..lines.len() {
            if is_violation(&lines, idx) {
                violations.push(Violation {
                    path: path.strip_prefix(&root).unwrap_or(&path).to_path_buf(),
                    line: lines[idx].number,
                    code: lines[idx].code.trim().to_string(),
                });
            }
        }
    }
    violations
}

/// Print violations and fail the calling test
///
/// # Panics
///
/// When `violations` is non-empty.
pub fn assert_none(rule: &str, violations: &[Violation]) {
    if violations.is_empty() {
        return;
    }
    eprintln!("\n❌ CRITICAL: {rule}\n");
    for violation in violations {
        eprintln!("  ❌ {violation}");
    }
    panic!(
        "\nFound {} violation(s) of: {rule}\nFix these before merging!",
        violations.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
//! Module docs mention ::sleep( here
use std::time::Duration;

pub async fn wait() {
    tokio::time::sleep_until(deadline).await; // not ::sleep(
}

fn load() {
    let text = std::fs::read_to_string(path);
}

#[cfg(test)]
mod tests {
    fn helper() { std::thread::sleep(d); }
}
"#;

    #[test]
    fn test_production_code_stops_at_test_module() {
        let lines = production_code(SAMPLE);
        assert!(lines.iter().all(|l| !l.code.contains("thread::sleep")));
        assert!(lines.iter().all(|l| !l.code.contains("::sleep(")));
        assert!(lines.iter().any(|l| l.code.contains("sleep_until")));
    }

    #[test]
    fn test_enclosing_fn() {
        let lines = production_code(SAMPLE);
        let read = lines
            .iter()
            .position(|l| l.code.contains("read_to_string"))
            .unwrap();
        assert_eq!(enclosing_fn(&lines, read), Some("fn load() {"));

        let wait = lines
            .iter()
            .position(|l| l.code.contains("sleep_until"))
            .unwrap();
        assert!(enclosing_fn(&lines, wait).unwrap().starts_with("pub async fn"));
    }

    #[test]
    fn test_production_files_found() {
        let files = production_files();
        assert!(files.iter().any(|f| f.ends_with("bridge/core/src/lib.rs")));
        assert!(files.iter().any(|f| f.ends_with("bridge/daemon/src/main.rs")));
    }
}

//! Architectural Enforcement Integration Tests
//!
//! Source scans that keep presence-core honest about its threading model:
//! - Only the client owns a background thread; hooks never block on it
//! - Sleeping happens only in the connect retry loop
//! - No panicking shortcuts (`unwrap`/`expect`) outside test code
//!
//! This library holds the shared scanning helpers; the rules live in `tests/`.

use std::fs;
use std::path::{Path, PathBuf};

/// Workspace root, two levels above this crate
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
}

/// presence-core's `src/` directory
pub fn core_src() -> PathBuf {
    workspace_root().join("presence").join("core").join("src")
}

/// All `.rs` files under `dir`
pub fn rust_files(dir: &Path) -> Vec<PathBuf> {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .map(|e| e.into_path())
        .collect()
}

/// One line of production code
#[derive(Debug, Clone)]
pub struct CodeLine {
    /// 1-based line number
    pub number: usize,
    /// The line with any `//` comment removed
    pub code: String,
}

/// Whether this line opens the file's test section
fn starts_test_section(line: &str) -> bool {
    let line = line.trim();
    line.starts_with("#[cfg(test)]") || line.starts_with("#[cfg(all(test")
}

/// Production lines of `source`: everything before the test section, comments stripped
pub fn production_lines(source: &str) -> Vec<CodeLine> {
    source
        .lines()
        .take_while(|line| !starts_test_section(line))
        .enumerate()
        .map(|(idx, line)| CodeLine {
            number: idx + 1,
            code: line.split("//").next().unwrap_or(line).to_string(),
        })
        .filter(|line| !line.code.trim().is_empty())
        .collect()
}

/// Production lines of the file at `path` (empty if unreadable)
pub fn production_lines_of(path: &Path) -> Vec<CodeLine> {
    match fs::read_to_string(path) {
        Ok(content) => production_lines(&content),
        Err(_) => Vec::new(),
    }
}

/// Format a violation the way the test failure output lists them
pub fn violation(path: &Path, line: &CodeLine) -> String {
    format!("{}:{} - {}", path.display(), line.number, line.code.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_lines_stop_at_test_section() {
        let source = "fn a() {}\n// note\nfn b() { x.unwrap() } // trailing\n\n#[cfg(test)]\nmod tests {}\n";
        let lines = production_lines(source);

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].number, 1);
        assert_eq!(lines[1].number, 3);
        assert_eq!(lines[1].code.trim(), "fn b() { x.unwrap() }");
    }

    #[test]
    fn test_core_src_exists() {
        assert!(core_src().join("lib.rs").exists());
        assert!(!rust_files(&core_src()).is_empty());
    }
}

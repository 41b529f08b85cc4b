//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural principles:
//! - No sleep() calls in production code
//! - Route resolution stays pure (no async, no I/O)
//! - Errors are propagated, not unwrapped, outside tests
//!
//! The scanning helpers live here so each test file stays a list of rules.

use std::fs;
use std::path::{Path, PathBuf};

/// Workspace root, two levels above this package
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// A line of production source code
pub struct SourceLine {
    /// File the line belongs to
    pub path: PathBuf,
    /// 1-based line number
    pub number: usize,
    /// Line text with any trailing `//` comment removed
    pub code: String,
}

/// Files excluded from production scans (scripted test doubles)
const TEST_SUPPORT_FILES: &[&str] = &["test_utils.rs"];

/// Rust files under `dir` (relative to the workspace root)
#[must_use]
pub fn rust_files(dir: &str) -> Vec<PathBuf> {
    let path = workspace_root().join(dir);
    if !path.exists() {
        return Vec::new();
    }

    walkdir::WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .map(|e| e.into_path())
        .collect()
}

/// Production lines of a file: everything before its `#[cfg(test)]`
/// module, with comments stripped
#[must_use]
pub fn production_lines(path: &Path) -> Vec<SourceLine> {
    let is_support = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| TEST_SUPPORT_FILES.contains(&n));
    if is_support {
        return Vec::new();
    }

    let Ok(content) = fs::read_to_string(path) else {
        return Vec::new();
    };

    content
        .lines()
        .take_while(|line| !line.trim().starts_with("#[cfg(test)]"))
        .enumerate()
        .filter_map(|(idx, line)| {
            let trimmed = line.trim_start();
            if trimmed.starts_with("//") {
                return None;
            }
            let code = line.split("//").next().unwrap_or(line).to_string();
            Some(SourceLine {
                path: path.to_path_buf(),
                number: idx + 1,
                code,
            })
        })
        .collect()
}

/// Production lines under `dir` matching any of `patterns`
#[must_use]
pub fn find_violations(dir: &str, patterns: &[&str]) -> Vec<String> {
    rust_files(dir)
        .iter()
        .flat_map(|path| production_lines(path))
        .filter(|line| patterns.iter().any(|p| line.code.contains(p)))
        .map(|line| format!("{}:{} - {}", line.path.display(), line.number, line.code.trim()))
        .collect()
}

/// Fail with a readable report when `violations` is not empty
pub fn report(rule: &str, violations: &[String]) {
    if violations.is_empty() {
        return;
    }

    eprintln!("\n❌ {rule}\n");
    for violation in violations {
        eprintln!("  ❌ {violation}");
    }
    panic!("\nFound {} violation(s): {rule}", violations.len());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_root_contains_core() {
        assert!(workspace_root().join("switchboard/core/src").exists());
    }

    #[test]
    fn test_production_lines_stop_at_test_module() {
        let dir = std::env::temp_dir().join(format!("arch-enforce-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let file = dir.join("sample.rs");
        fs::write(&file, "fn a() {}\n// note\n#[cfg(test)]\nmod tests { fn b() { x.unwrap(); } }\n").unwrap();

        let lines = production_lines(&file);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].number, 1);

        fs::remove_dir_all(&dir).unwrap();
    }
}

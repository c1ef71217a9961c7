//! Integration Test: Panic Prohibition
//!
//! **Policy**: presence-core reports failures as `PresenceError` or logs them.
//! `.unwrap()` and `.expect(` are allowed only in test code.

use architectural_enforcement::{core_src, production_lines_of, rust_files, violation};

#[test]
fn test_no_unwrap_in_production_code() {
    let mut violations = Vec::new();

    for path in rust_files(&core_src()) {
        for line in production_lines_of(&path) {
            let code = line.code.trim_start();
            if code.starts_with("///") || code.starts_with("//!") {
                continue;
            }
            if line.code.contains(".unwrap()") || line.code.contains(".expect(") {
                violations.push(violation(&path, &line));
            }
        }
    }

    if !violations.is_empty() {
        eprintln!("\n❌ Panicking calls found in production code!\n");
        for v in &violations {
            eprintln!("  ❌ {v}");
        }
        eprintln!("\n✅ Propagate with `?` or log and degrade instead");
        panic!("\nFound {} panic violation(s).", violations.len());
    }
}

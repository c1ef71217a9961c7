//! Integration Test: Sleep Prohibition
//!
//! **Policy**: presence-core never sleeps on a caller's thread.
//! **Exception**: the backoff between connect attempts, which runs on the
//! client's own worker thread.

use std::path::Path;

use architectural_enforcement::{core_src, production_lines_of, rust_files, violation, CodeLine};

#[test]
fn test_no_sleep_outside_connect_backoff() {
    let mut violations = Vec::new();

    for path in rust_files(&core_src()) {
        let lines = production_lines_of(&path);
        for (idx, line) in lines.iter().enumerate() {
            if !is_sleep(&line.code) {
                continue;
            }
            if path.ends_with("client.rs") && is_backoff_context(&lines, idx) {
                continue;
            }
            violations.push(violation(&path, line));
        }
    }

    if !violations.is_empty() {
        eprintln!("\n❌ Sleep calls found in production code!\n");
        for v in &violations {
            eprintln!("  ❌ {v}");
        }
        eprintln!("\n✅ ACCEPTABLE: backoff between connect attempts in client.rs");
        eprintln!("❌ FORBIDDEN: sleeping in hooks, ticks, or the session read path");
        panic!("\nFound {} sleep violation(s).", violations.len());
    }
}

fn is_sleep(code: &str) -> bool {
    code.contains("::sleep(") || code.contains(".sleep(")
}

/// Sleep whose duration comes from the backoff schedule inside the retry loop
fn is_backoff_context(lines: &[CodeLine], idx: usize) -> bool {
    let from = idx.saturating_sub(15);
    let window = &lines[from..=idx];

    let has_backoff = lines[idx].code.contains("backoff");
    let has_retry = window
        .iter()
        .any(|l| l.code.contains("attempt") || l.code.contains("retry"));
    has_backoff && has_retry
}

#[test]
fn test_backoff_detection() {
    let lines: Vec<CodeLine> = [
        "for attempt in 1..=attempts {",
        "    if attempt > 1 {",
        "        std::thread::sleep(self.connect.backoff(attempt));",
    ]
    .iter()
    .enumerate()
    .map(|(i, code)| CodeLine {
        number: i + 1,
        code: (*code).to_string(),
    })
    .collect();

    assert!(is_sleep(&lines[2].code));
    assert!(is_backoff_context(&lines, 2));
}

#[test]
fn test_plain_sleep_is_not_backoff() {
    let lines = vec![CodeLine {
        number: 1,
        code: "std::thread::sleep(Duration::from_millis(10));".to_string(),
    }];
    assert!(!is_backoff_context(&lines, 0));
    assert!(!Path::new("service.rs").ends_with("client.rs"));
}

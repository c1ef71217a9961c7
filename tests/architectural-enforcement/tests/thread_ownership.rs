//! Integration Test: Thread Ownership
//!
//! **Policy**: the connect worker belongs to `PresenceClient` alone. Host
//! hooks (service, status composition, reconnect policy, marker) must
//! return promptly, so they never spawn, hold, or join threads.

use architectural_enforcement::{core_src, production_lines_of, violation};

/// Files whose code runs on the host's main thread
const HOOK_FILES: &[&str] = &["service.rs", "activity.rs", "reconnect.rs", "marker.rs"];

const FORBIDDEN: &[&str] = &["thread::spawn", "thread::Builder", "JoinHandle", ".join()"];

#[test]
fn test_hooks_never_touch_threads() {
    let mut violations = Vec::new();

    for file in HOOK_FILES {
        let path = core_src().join(file);
        assert!(path.exists(), "missing {}", path.display());

        for line in production_lines_of(&path) {
            if FORBIDDEN.iter().any(|pattern| line.code.contains(pattern)) {
                violations.push(violation(&path, &line));
            }
        }
    }

    if !violations.is_empty() {
        eprintln!("\n❌ Thread handling found in host-facing code!\n");
        for v in &violations {
            eprintln!("  ❌ {v}");
        }
        panic!("\nFound {} thread ownership violation(s).", violations.len());
    }
}

#[test]
fn test_client_names_its_worker() {
    let path = core_src().join("client.rs");
    let lines = production_lines_of(&path);

    assert!(
        lines.iter().any(|l| l.code.contains("thread::Builder::new()")),
        "client.rs should spawn its worker through a named Builder"
    );
    assert!(
        !lines.iter().any(|l| l.code.contains("thread::spawn(")),
        "client.rs should not spawn unnamed threads"
    );
}

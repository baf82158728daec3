//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code MUST NOT call sleep. Timers wait on a
//! deadline (`sleep_until`) or a `tokio::time::interval`; everything else
//! waits on a channel.
//! **Exceptions**: test code

use architectural_enforcement::{assert_none, scan};

#[test]
fn test_no_sleep_in_production_code() {
    let violations = scan(|lines, idx| {
        let code = lines[idx].code;
        code.contains("::sleep(") || code.contains(" sleep(") || code.contains(".sleep(")
    });

    if !violations.is_empty() {
        eprintln!("\n✅ ACCEPTABLE timer uses:");
        eprintln!("  - tokio::time::sleep_until(deadline) for a known deadline");
        eprintln!("  - tokio::time::interval() for periodic pacing");
        eprintln!("  - Test code (after #[cfg(test)])");
    }
    assert_none("Sleep calls found in production code", &violations);
}

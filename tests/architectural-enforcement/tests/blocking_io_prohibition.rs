//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Async functions MUST NOT use blocking I/O. Use `tokio::fs`,
//! `tokio::net` and `tokio::io` instead of their `std` counterparts.
//! **Exceptions**: non-async functions (configuration loading before the
//! runtime serves traffic), test code

use architectural_enforcement::{assert_none, enclosing_fn, scan};

const BLOCKING: &[&str] = &[
    "std::fs::",
    "std::net::",
    "std::thread::sleep",
    "std::io::stdin()",
    "reqwest::blocking",
];

#[test]
fn test_no_blocking_io_in_async_code() {
    let violations = scan(|lines, idx| {
        let code = lines[idx].code;
        BLOCKING.iter().any(|pattern| code.contains(pattern))
            && enclosing_fn(lines, idx).is_some_and(|signature| signature.contains("async fn"))
    });

    assert_none("Blocking I/O found in async code", &violations);
}

#[test]
fn test_no_blocking_imports() {
    let violations = scan(|lines, idx| {
        let code = lines[idx].code.trim_start();
        code.starts_with("use std::fs") || code.starts_with("use std::net")
    });

    assert_none("Blocking I/O modules imported in production code", &violations);
}

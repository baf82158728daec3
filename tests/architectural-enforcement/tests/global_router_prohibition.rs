//! Integration Test: Global Router Prohibition
//!
//! **Policy**: Routers and handler registries are values owned by whoever
//! composes them. No process-wide statics, lazily initialized or otherwise.

use architectural_enforcement::{assert_none, scan};

const GLOBAL_STATE: &[&str] = &["OnceLock", "OnceCell", "lazy_static!", "thread_local!"];

#[test]
fn test_no_global_state() {
    let violations = scan(|lines, idx| {
        let code = lines[idx].code;
        let trimmed = code.trim_start();
        trimmed.starts_with("static ")
            || trimmed.starts_with("pub static ")
            || trimmed.starts_with("pub(crate) static ")
            || GLOBAL_STATE.iter().any(|pattern| code.contains(pattern))
    });

    assert_none("Global state found in production code", &violations);
}

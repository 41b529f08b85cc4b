//! Integration Test: Error Propagation
//!
//! Library code returns `Result` and propagates with `?`. Panicking
//! shortcuts are only acceptable in tests.

use architectural_enforcement::{find_violations, report};

const PANICKING: &[&str] = &[".unwrap()", ".expect(", "panic!(", "unimplemented!(", "todo!("];

#[test]
fn test_no_unwrap_in_routing() {
    report(
        "Panicking calls found in routing code",
        &find_violations("switchboard/core/src/routing", PANICKING),
    );
}

#[test]
fn test_no_unwrap_in_config() {
    report(
        "Panicking calls found in configuration code",
        &find_violations("switchboard/core/src/config", PANICKING),
    );
}

//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code MUST NOT sleep. Waiting happens on I/O,
//! timeouts, semaphores or `tokio::time::interval`.
//! **Exceptions**: test code and the scripted executors in `test_utils`.

use architectural_enforcement::{find_violations, report};

const SLEEP_CALLS: &[&str] = &["::sleep(", ".sleep("];

#[test]
fn test_no_sleep_in_core() {
    report(
        "Sleep calls found in switchboard-core production code",
        &find_violations("switchboard/core/src", SLEEP_CALLS),
    );
}

#[test]
fn test_no_sleep_in_ctl() {
    report(
        "Sleep calls found in switchboard-ctl production code",
        &find_violations("switchboard/ctl/src", SLEEP_CALLS),
    );
}

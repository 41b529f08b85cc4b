//! Integration Test: Resolver Purity
//!
//! Route resolution is a pure function of the request, the routing table
//! and a context snapshot. The modules it is built from must not await,
//! spawn, touch the network or read files.

use architectural_enforcement::{find_violations, report};

const PURE_MODULES: &[&str] = &[
    "switchboard/core/src/routing/resolver.rs",
    "switchboard/core/src/routing/conditions.rs",
    "switchboard/core/src/routing/table.rs",
    "switchboard/core/src/routing/taxonomy.rs",
    "switchboard/core/src/routing/context.rs",
];

const IMPURE: &[&str] = &["async fn", ".await", "tokio::", "std::net", "std::fs", "reqwest"];

#[test]
fn test_resolution_modules_are_pure() {
    let violations: Vec<String> = PURE_MODULES
        .iter()
        .flat_map(|module| find_violations(module, IMPURE))
        .collect();

    report("Async or I/O found in route resolution", &violations);
}

//! Custom assertion helpers for integration tests.

use echoes_flow::error::ErrorCode;
use echoes_flow::graph::DependencyGraph;
use echoes_flow::report::ExecutionReport;
use echoes_flow::state::NodeState;

use crate::provider::ScriptedProvider;

/// Asserts that a run completed successfully.
///
/// # Panics
///
/// Panics if the run did not succeed or any component is not applied.
pub fn assert_run_succeeded(report: &ExecutionReport) {
    assert!(
        report.is_success(),
        "Expected run to succeed, but it failed:\n{}",
        report.summary()
    );
    for entry in &report.components {
        assert_eq!(
            entry.state,
            NodeState::Applied,
            "Expected {} to be applied",
            entry.component
        );
    }
}

/// Asserts that a run failed because of `component` with the given code.
///
/// # Panics
///
/// Panics if the run succeeded or the first failure is elsewhere.
pub fn assert_run_failed(report: &ExecutionReport, component: &str, code: ErrorCode) {
    assert!(!report.is_success(), "Expected run to fail");
    let failure = report
        .failure
        .as_ref()
        .expect("failed run should carry a failure");
    assert_eq!(
        failure.component.as_deref(),
        Some(component),
        "Expected first failure in {component}, summary:\n{}",
        report.summary()
    );
    assert_eq!(failure.error.code, code, "unexpected error: {}", failure.error);
}

/// Asserts the final state of one component.
///
/// # Panics
///
/// Panics if the component is missing or in another state.
pub fn assert_state(report: &ExecutionReport, component: &str, expected: NodeState) {
    let actual = report
        .state_of(component)
        .unwrap_or_else(|| panic!("{component} is not in the report"));
    assert_eq!(
        actual, expected,
        "Expected {component} to be {expected}, but it was {actual}"
    );
}

/// Asserts that every component was created after all of its dependencies.
///
/// # Panics
///
/// Panics if a component's first create call precedes one of its
/// dependencies' first create call.
pub fn assert_topological_order(provider: &ScriptedProvider, graph: &DependencyGraph) {
    let created = provider.created();
    let first = |name: &str| created.iter().position(|c| c == name);

    for component in graph.components() {
        let Some(position) = first(component.name()) else {
            continue;
        };
        let deps = graph
            .dependencies_of(component.name())
            .expect("component should be in the graph");
        for dep in deps {
            let dep_position = first(&dep).unwrap_or_else(|| {
                panic!("{} created without dependency {dep}", component.name())
            });
            assert!(
                dep_position < position,
                "{} created before its dependency {dep}",
                component.name()
            );
        }
    }
}

/// Asserts that rollback destroyed resources in reverse dependency order.
///
/// # Panics
///
/// Panics if the rollback entries are not a subsequence of the graph's
/// destroy order.
pub fn assert_reverse_rollback(report: &ExecutionReport, graph: &DependencyGraph) {
    let rolled_back: Vec<&str> = report
        .rollback
        .iter()
        .map(|e| e.component.as_str())
        .collect();
    let expected: Vec<String> = graph
        .destroy_order()
        .expect("graph should be valid")
        .into_iter()
        .filter(|name| rolled_back.contains(&name.as_str()))
        .collect();
    assert_eq!(rolled_back, expected, "rollback was not in reverse order");
}

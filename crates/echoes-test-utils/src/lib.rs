//! Shared test utilities for echoes.
//!
//! This crate provides:
//! - [`ScriptedProvider`]: In-memory resource provider with call recording
//!   and per-component failure injection
//! - [`TestContext`]: Provider and secrets wired together
//! - [`StackFactory`]: Pre-built graphs for common scenarios
//! - Custom assertion helpers for [`ExecutionReport`](echoes_flow::report::ExecutionReport)
//!
//! # Example
//!
//! ```rust,ignore
//! use echoes_test_utils::{StackFactory, TestContext, assert_run_succeeded};
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let ctx = TestContext::new();
//!     let graph = StackFactory::infrastructure_chain(&ctx);
//!     let report = ctx.scheduler().run(&graph).await.unwrap();
//!     assert_run_succeeded(&report);
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
// Test utilities use expect/unwrap for cleaner test code - panics are acceptable in tests
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

pub mod assertions;
pub mod fixtures;
pub mod provider;

pub use assertions::*;
pub use fixtures::*;
pub use provider::*;

/// Initialize test logging (call once per test module).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("echoes=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}

//! Shared test utilities for Lingo integration tests.
//!
//! This crate provides:
//! - [`TracingMemoryBackend`]: in-memory storage with operation recording
//!   and failure injection
//! - Recording fakes for the engine's collaborators: content apply,
//!   alerting, manifest and digest
//! - [`TestContext`]: an engine wired to the fakes
//! - Assertion helpers over migration records
//!
//! # Example
//!
//! ```rust,ignore
//! use lingo_test_utils::TestContext;
//!
//! #[tokio::test]
//! async fn applies() {
//!     let ctx = TestContext::new();
//!     let id = ctx.seed_pending(InterfaceOrigin::Mobile, "a.json", r#"{"k":"v"}"#).await;
//!     // ... run test ...
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
pub mod fakes;
pub mod fixtures;
pub mod storage;

pub use assertions::*;
pub use fakes::*;
pub use fixtures::*;
pub use storage::*;

/// Initialize test logging (call once per test module).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("lingo=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}

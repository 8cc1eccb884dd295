//! Shared test utilities for exercising RPC call shapes
//!
//! This crate provides reusable test collaborators:
//! - `FlakyRegistry`: simulates a flaky endpoint with per-key failure
//!   counters owned by the collaborator and reset explicitly
//! - `init_tracing`: idempotent tracing setup for test binaries
//!
//! # Usage
//!
//! ```rust,ignore
//! use test_utils::FlakyRegistry;
//!
//! #[tokio::test]
//! async fn my_retry_test() {
//!     test_utils::init_tracing();
//!     let registry = FlakyRegistry::new(3);
//!
//!     assert!(registry.attempt("key").is_err()); // attempts 1..=3 fail
//!     assert!(registry.attempt("key").is_err());
//!     assert!(registry.attempt("key").is_err());
//!     assert_eq!(registry.attempt("key").unwrap(), 3); // 4th succeeds
//! }
//! ```

mod flaky;

pub use flaky::FlakyRegistry;

use std::sync::Once;

static TRACING: Once = Once::new();

/// Initialize tracing for tests. Safe to call from every test; only the
/// first call installs the subscriber.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

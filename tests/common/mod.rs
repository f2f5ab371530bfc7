//! Common test infrastructure
//!
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{posted, TestHarness, PRODUCT_ID};
//!
//! #[tokio::test]
//! async fn test_product_sync() {
//!     let harness = TestHarness::new();
//!     harness.transport.push(posted("product-guid"));
//!
//!     let state = harness.drivers.product.handle(PRODUCT_ID, "wkf_test", 0).await.unwrap();
//! }
//! ```

#![allow(dead_code)]

mod constants;
mod fixtures;
mod harness;
mod transport;

// Public API - this is what tests import
pub use constants::*;
pub use fixtures::*;
pub use harness::TestHarness;
pub use transport::*;

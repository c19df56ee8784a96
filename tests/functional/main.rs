// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Functional tests for the admission pipeline.
//!
//! These tests drive the real [`ValidationHandler`] and HTTP router with an
//! in-memory policy engine, namespace stores and sinks. No cluster and no
//! engine process are required.
//!
//! ```bash
//! # Run all functional tests
//! cargo test --test functional
//!
//! # Run specific test
//! cargo test --test functional test_service_account_bypass
//! ```
//!
//! ## Test Categories
//!
//! - **Filter tests**: requests that end before evaluation
//! - **Evaluation tests**: engine results, namespace augmentation, tracing
//! - **Failure tests**: store and engine failures, cancellation, deadlines
//! - **Server tests**: AdmissionReview envelopes over the router
//!
//! [`ValidationHandler`]: gatekeeper_webhook::webhooks::ValidationHandler

#[path = "../common/mod.rs"]
mod common;

mod failure_tests;
mod filter_tests;

//! Property-based tests for the recovery policy.
//!
//! Run with: cargo test --test property_tests

pub mod recovery;

//! Shared test utilities for policy-intake integration tests.
//!
//! This module provides:
//! - `TestHarness`, a fully wired pipeline over an in-memory store and a
//!   temporary object root
//! - fakes for the external services (analysis, upload URLs, completions)
//! - builders for analysis blocks and queue bodies

#![allow(dead_code)]

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;

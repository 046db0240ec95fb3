//! Integration test binary: every integration test is a module of this one
//! binary so the crate links once.

// Allow unwrap/expect in test code
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod helpers;

mod automation_flow;
mod config_startup;
mod scheduler_flow;

//! End-to-end tests driving the relopack binary against a fake runtime.

mod common;

mod audit_tests;
#[cfg(unix)]
mod library_tests;
#[cfg(unix)]
mod snapshot_tests;

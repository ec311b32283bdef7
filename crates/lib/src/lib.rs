//! relopack-lib: packaging programs of a snapshot-based managed runtime into
//! relocatable bundles.
//!
//! - `collect`: which native artifacts a project needs on a platform
//! - `snapshot`: building the compiled runtime image
//! - `relocate`: rewriting and auditing build-machine paths
//! - `layout`: the bundle directory tree and its assembly
//! - `launcher`: the bootstrap each bundled executable runs
//! - `bundle`: the user-facing operations tying these together

pub mod bundle;
pub mod cache_lock;
pub mod collect;
pub mod compile;
pub mod consts;
pub mod graph;
pub mod launcher;
pub mod layout;
pub mod platform;
pub mod project;
pub mod relocate;
pub mod runtime;
pub mod snapshot;
pub mod util;

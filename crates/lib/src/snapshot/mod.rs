//! Snapshot building.
//!
//! A snapshot is the serialized image of compiled code plus global state that
//! the launcher hands to the runtime at start-up. Exactly one snapshot ships per
//! bundle and it is never modified after it is built.
//!
//! # Modes
//!
//! - **Full**: compiled from the runtime's minimal bootstrap with only the
//!   requested standard modules. Larger and slower to build, but independent of
//!   any installed base image.
//! - **Incremental**: compiled as a layer over the runtime's own snapshot.
//!   Faster and smaller, but tied to that exact runtime build. Meant for local
//!   development, and cached for reuse.
//!
//! # Module filtering
//!
//! Filtering standard modules out of a full snapshot shrinks it and speeds up
//! loading. Nothing checks whether application code relies on side effects of
//! a dropped module (a module that changes behaviour of unrelated code merely
//! by being loaded). A hard dependency fails the toolchain with a symbol
//! error; a soft one silently changes behaviour at run time.
//!
//! # Submodules
//!
//! - [`builder`] - drives the toolchain and publishes the snapshot file
//! - [`cache`] - reuse of incremental snapshots between builds
//! - [`toolchain`] - the compiler collaborator

pub mod builder;
pub mod cache;
pub mod toolchain;
mod types;

pub use builder::build_snapshot;
pub use cache::SnapshotCache;
pub use toolchain::{CommandToolchain, Toolchain, ToolchainFailure};
pub use types::*;

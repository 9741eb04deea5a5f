//! Purpose: Library crate behind `libdatablock` and the `datablock` CLI.
//! Exports: `api` (blocks, typed access, plugins), `abi` (C surface), `capsule`, `logging`.
//! Role: One crate builds the Rust library, the shared/static C library, and the host CLI.
//! Invariants: Blocks are single-threaded; handles are `!Send` and shared by reference count.
pub mod abi;
pub mod api;
pub mod capsule;
pub mod core;
pub mod logging;

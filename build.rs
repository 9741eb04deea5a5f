//! Purpose: Export the `dblk_*` C ABI from the `datablock` executable.
//! Role: Cargo build-script; adds a bin-only linker flag per target OS.
//! Invariants: Plugins loaded by `datablock run` resolve `dblk_*` against the host process,
//! so they share its pending-error state and `tracing` subscriber.
//! Invariants: Uses only Cargo-provided env vars (`CARGO_CFG_TARGET_OS`).
use std::env;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    match target_os.as_str() {
        "linux" | "android" | "freebsd" | "netbsd" | "openbsd" | "dragonfly" => {
            println!("cargo:rustc-link-arg-bins=-Wl,--export-dynamic");
        }
        "macos" | "ios" => {
            println!("cargo:rustc-link-arg-bins=-Wl,-export_dynamic");
        }
        _ => {}
    }
}

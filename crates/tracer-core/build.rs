//! Build script for tracer-core
//!
//! This script checks system requirements before compilation:
//! - Minimum Rust version
//! - Whether the `ptrace` host engine is available on the target
//!
//! ## Requirements
//!
//! - **Rust**: 1.82.0 or newer (`Option::is_none_or`)
//! - **Linux x86-64**: for the `ptrace` host engine; other targets build with
//!   the synthetic engine only

fn main()
{
    println!("cargo:rerun-if-changed=build.rs");

    match rustc_version::version() {
        Ok(version) => {
            let minimum = rustc_version::Version::new(1, 82, 0);
            if version < minimum {
                println!("cargo:warning=tracer-core requires Rust {minimum} or newer, found {version}");
            }
        }
        // Can't tell in some build environments
        Err(_) => println!("cargo:warning=could not verify Rust version"),
    }

    let os = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    let arch = std::env::var("CARGO_CFG_TARGET_ARCH").unwrap_or_default();
    if os != "linux" || arch != "x86_64" {
        println!("cargo:warning=no ptrace host engine for {os}/{arch}; only the synthetic engine is built");
    }
}

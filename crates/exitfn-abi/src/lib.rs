// Every export takes raw pointers from C callers and validates what it can at
// runtime, so per-function safety docs would repeat the module docs.
#![allow(clippy::missing_safety_doc)]
//! # exitfn-abi
//!
//! `extern "C"` boundary for the exit-function registry.
//!
//! This crate produces a `cdylib` (`libexitfn.so`) exporting `__cxa_atexit`
//! and `__internal_atexit`. Each entry point converts its C arguments and
//! delegates to the safe registration API in `exitfn-core`.
//!
//! ```text
//! C caller -> ABI entry (this crate) -> exitfn_core::internal_atexit -> 0 / -1 + errno
//! ```
//!
//! Symbols are exported unmangled only in release builds, so test binaries
//! never interpose the host libc's own `__cxa_atexit`.

pub mod stdlib_abi;

//! # exitfn-core
//!
//! Safe Rust implementation of the exit-function registry that backs
//! `__cxa_atexit`.
//!
//! Callbacks registered here are stored in a chain of fixed-capacity blocks
//! and are visited by the shutdown walk in reverse registration order. The
//! only `unsafe` code is the conversion of a stored address back into a
//! function pointer, confined to [`stdlib::handler`].

#![deny(unsafe_code)]

pub mod config;
pub mod errno;
pub mod stdlib;

pub use config::{GuardMode, RegistryConfig, guard_mode};
pub use stdlib::{ExitArg, ExitList, OwnerHandle, RegisterError, Registry, cxa_atexit};

//! Error number definitions.
//!
//! Linux values for the errno codes the exit-function registry reports.

/// Out of memory.
pub const ENOMEM: i32 = 12;
/// Invalid argument.
pub const EINVAL: i32 = 22;
/// Operation canceled.
pub const ECANCELED: i32 = 125;

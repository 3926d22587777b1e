//! Process termination support.
//!
//! Implements the exit-function registry behind `__cxa_atexit`: the block
//! chain and slot allocator, the registration entry points, the encoding of
//! stored callbacks, and the locked traversal used by the shutdown walk.
//! The walk itself (`exit`, `quick_exit`, `__cxa_finalize`) lives outside
//! this crate.

pub mod cxa_atexit;
pub mod exit_list;
#[allow(unsafe_code)]
pub mod handler;
pub mod ptr_guard;

pub use cxa_atexit::{
    ExitList, ProcessList, ProcessRegistry, cxa_atexit, exit_funcs, internal_atexit,
    process_registry, quick_exit_funcs, registry_for,
};
pub use exit_list::{
    BlockSnapshot, ChainSnapshot, CxaEntry, DEFAULT_BLOCK_CAPACITY, RegisterError, Registry,
    RegistryGuard, RegistryList, RegistryStats, Reservation, Slot, SlotId, SlotKind,
};
pub use handler::{CxaCallback, EncodedFn, ExitArg, ExitHandler, OwnerHandle};
pub use ptr_guard::{
    IDENTITY_GUARD, IdentityGuard, PROCESS_GUARD, PointerGuard, ProcessGuard, XorRotateGuard,
};

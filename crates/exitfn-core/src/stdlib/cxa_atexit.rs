//! `__cxa_atexit` registration and the process-wide exit lists.
//!
//! The process has two lists: the one run by `exit` and the one run by
//! `quick_exit`. They are the two lists of one `static` registry, encoded by
//! [`PROCESS_GUARD`], so they share one lock and one `closed` flag, and
//! registering the first few callbacks never touches the heap.

use crate::stdlib::exit_list::{
    DEFAULT_BLOCK_CAPACITY, RegisterError, Registry, RegistryList, SlotId,
};
use crate::stdlib::handler::{CxaCallback, ExitArg, OwnerHandle};
use crate::stdlib::ptr_guard::PROCESS_GUARD;

/// Which process-wide list a registration goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitList {
    /// Run by `exit` and on return from `main`.
    Exit,
    /// Run by `quick_exit`.
    QuickExit,
}

impl ExitList {
    /// Decode the C-side list selector (`0` = exit, `1` = quick_exit).
    #[must_use]
    pub const fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(Self::Exit),
            1 => Some(Self::QuickExit),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Exit => "exit",
            Self::QuickExit => "quick_exit",
        }
    }

    /// Position of this list in [`ProcessRegistry`].
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Exit => 0,
            Self::QuickExit => 1,
        }
    }
}

/// Registry holding the exit and quick-exit lists.
pub type ProcessRegistry = Registry<DEFAULT_BLOCK_CAPACITY, 2>;

/// One list of the [`ProcessRegistry`].
pub type ProcessList = RegistryList<'static, DEFAULT_BLOCK_CAPACITY, 2>;

static PROCESS_LISTS: ProcessRegistry = Registry::with_guard(&PROCESS_GUARD);

/// The registry behind both process-wide lists.
#[must_use]
pub fn process_registry() -> &'static ProcessRegistry {
    &PROCESS_LISTS
}

/// List walked by `exit`.
#[must_use]
pub fn exit_funcs() -> ProcessList {
    registry_for(ExitList::Exit)
}

/// List walked by `quick_exit`.
#[must_use]
pub fn quick_exit_funcs() -> ProcessList {
    registry_for(ExitList::QuickExit)
}

#[must_use]
pub fn registry_for(list: ExitList) -> ProcessList {
    PROCESS_LISTS.list_at(list.index())
}

/// Register `callback` on the process-wide `list`.
pub fn internal_atexit(
    callback: Option<CxaCallback>,
    arg: ExitArg,
    owner: OwnerHandle,
    list: ExitList,
) -> Result<SlotId, RegisterError> {
    registry_for(list).register(callback, arg, owner)
}

/// Register `callback` to run at process exit, or when `owner` is unloaded.
pub fn cxa_atexit(
    callback: Option<CxaCallback>,
    arg: ExitArg,
    owner: OwnerHandle,
) -> Result<SlotId, RegisterError> {
    internal_atexit(callback, arg, owner, ExitList::Exit)
}

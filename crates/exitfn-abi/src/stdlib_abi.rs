//! ABI layer for exit-callback registration (`__cxa_atexit`, `__internal_atexit`).
//!
//! Failures are reported the C way: `-1` with errno set to the value
//! [`RegisterError::errno`] gives.

use std::ffi::{c_int, c_void};

use exitfn_core::errno;
use exitfn_core::stdlib::{CxaCallback, ExitArg, ExitList, OwnerHandle, RegisterError};

/// C-side exit callback as declared by `__cxa_atexit`.
pub type CxaAtexitFn = unsafe extern "C" fn(arg: *mut c_void);

/// List selector for the `exit` list.
pub const EXIT_LIST: c_int = 0;
/// List selector for the `quick_exit` list.
pub const QUICK_EXIT_LIST: c_int = 1;

#[inline]
unsafe fn set_abi_errno(val: c_int) {
    let p = unsafe { libc::__errno_location() };
    unsafe { *p = val };
}

#[inline]
fn report(result: Result<exitfn_core::stdlib::SlotId, RegisterError>) -> c_int {
    match result {
        Ok(_) => 0,
        Err(err) => {
            unsafe { set_abi_errno(err.errno()) };
            -1
        }
    }
}

// ---------------------------------------------------------------------------
// __internal_atexit
// ---------------------------------------------------------------------------

/// Register `func(arg)` on the list selected by `list`.
///
/// `d` is the owner handle (usually the registering object's `__dso_handle`),
/// or null for callbacks that outlive every unloadable object.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn __internal_atexit(
    func: Option<CxaAtexitFn>,
    arg: *mut c_void,
    d: *mut c_void,
    list: c_int,
) -> c_int {
    let Some(list) = ExitList::from_raw(list) else {
        unsafe { set_abi_errno(errno::EINVAL) };
        return -1;
    };

    // A one-argument callee ignores the trailing status argument under the C
    // calling convention, so it is stored in the two-argument form.
    let callback = func.map(|f| unsafe { std::mem::transmute::<CxaAtexitFn, CxaCallback>(f) });

    report(exitfn_core::stdlib::internal_atexit(
        callback,
        ExitArg::from_ptr(arg),
        OwnerHandle::from_ptr(d),
        list,
    ))
}

// ---------------------------------------------------------------------------
// __cxa_atexit
// ---------------------------------------------------------------------------

#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn __cxa_atexit(
    func: Option<CxaAtexitFn>,
    arg: *mut c_void,
    d: *mut c_void,
) -> c_int {
    unsafe { __internal_atexit(func, arg, d, EXIT_LIST) }
}

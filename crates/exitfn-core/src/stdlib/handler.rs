//! Exit callback values: the callback type, its argument and owner handle,
//! the encoded form kept in a slot, and the decoded handler handed to the
//! shutdown walk.
//!
//! This is the only module in the crate that converts an address back into a
//! function pointer, so it is the only one allowed `unsafe` code.

use std::ffi::{c_int, c_void};
use std::fmt;
use std::ptr;

use crate::stdlib::ptr_guard::PointerGuard;

/// Exit callback in CXA form: receives the registered argument and the exit status.
pub type CxaCallback = unsafe extern "C" fn(arg: *mut c_void, status: c_int);

/// Opaque argument passed back to the callback.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExitArg(pub usize);

impl ExitArg {
    pub const NULL: Self = Self(0);

    #[must_use]
    pub fn from_ptr(ptr: *mut c_void) -> Self {
        Self(ptr.expose_provenance())
    }

    #[must_use]
    pub fn as_ptr(self) -> *mut c_void {
        ptr::with_exposed_provenance_mut(self.0)
    }
}

/// Opaque token naming the component (usually a shared object) that
/// registered a callback.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerHandle(pub usize);

impl OwnerHandle {
    /// Callback not tied to any unloadable component.
    pub const NONE: Self = Self(0);

    #[must_use]
    pub fn from_ptr(ptr: *const c_void) -> Self {
        Self(ptr.expose_provenance())
    }

    #[must_use]
    pub fn as_ptr(self) -> *mut c_void {
        ptr::with_exposed_provenance_mut(self.0)
    }
}

/// Callback address as stored in a slot, after [`PointerGuard::encode`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EncodedFn(usize);

impl EncodedFn {
    /// Encode `callback` for storage.
    #[must_use]
    pub fn encode(callback: CxaCallback, guard: &dyn PointerGuard) -> Self {
        Self(guard.encode(callback as usize))
    }

    /// Raw stored value.
    #[must_use]
    pub const fn stored(self) -> usize {
        self.0
    }

    /// Recover the callback. `None` if the decoded address is null, which a
    /// bijective guard never produces for a value it encoded.
    #[must_use]
    pub fn decode(self, guard: &dyn PointerGuard) -> Option<CxaCallback> {
        let addr = guard.decode(self.0);
        if addr == 0 {
            return None;
        }
        // SAFETY: every `EncodedFn` is built by `encode` from a valid
        // `CxaCallback`, and `decode` inverts `encode`, so `addr` is that
        // function's address. Function pointers and `usize` have the same size.
        Some(unsafe { std::mem::transmute::<usize, CxaCallback>(addr) })
    }
}

impl fmt::Debug for EncodedFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncodedFn({:#x})", self.0)
    }
}

/// A populated slot, decoded and ready to be invoked by the shutdown walk.
#[derive(Debug, Clone, Copy)]
pub struct ExitHandler {
    pub callback: CxaCallback,
    pub arg: ExitArg,
    pub owner: OwnerHandle,
}

impl ExitHandler {
    /// Address of the decoded callback.
    #[must_use]
    pub fn callback_addr(&self) -> usize {
        self.callback as usize
    }

    /// Invoke the callback with `status`.
    ///
    /// # Safety
    ///
    /// The callback's owner must still be loaded, and the callback must accept
    /// the registered argument.
    pub unsafe fn call(self, status: c_int) {
        // SAFETY: upheld by the caller.
        unsafe { (self.callback)(self.arg.as_ptr(), status) }
    }
}

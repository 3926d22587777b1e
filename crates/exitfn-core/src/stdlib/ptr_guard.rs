//! Encoding of stored exit-callback addresses.
//!
//! A registry never stores a callback address directly: it stores
//! `guard.encode(addr)` and recovers the address with `guard.decode`. The
//! encoding must be a bijection on `usize` with `decode` as its inverse.

use std::hash::{BuildHasher, RandomState};
use std::sync::OnceLock;

use crate::config::GuardMode;

/// Encode/decode hook applied when a callback is written to or read from a slot.
pub trait PointerGuard: Send + Sync {
    /// Transform a raw callback address into its stored form.
    fn encode(&self, addr: usize) -> usize;
    /// Inverse of [`PointerGuard::encode`].
    fn decode(&self, stored: usize) -> usize;
}

/// Stores addresses unchanged.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IdentityGuard;

impl PointerGuard for IdentityGuard {
    #[inline]
    fn encode(&self, addr: usize) -> usize {
        addr
    }

    #[inline]
    fn decode(&self, stored: usize) -> usize {
        stored
    }
}

/// Shared identity guard, the default for [`Registry`](super::Registry).
pub const IDENTITY_GUARD: &dyn PointerGuard = &IdentityGuard;

/// Rotation applied after the XOR: 17 bits on 64-bit targets, 9 on 32-bit.
pub const GUARD_ROTATION: u32 = 2 * (usize::BITS / 8) + 1;

/// XOR with a secret key, then rotate left by [`GUARD_ROTATION`].
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct XorRotateGuard {
    key: usize,
}

impl XorRotateGuard {
    /// Guard with an explicit key.
    #[must_use]
    pub const fn new(key: usize) -> Self {
        Self { key }
    }

    /// Guard keyed from the process's randomly seeded hasher state.
    #[must_use]
    pub fn from_entropy() -> Self {
        let seed = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let key = RandomState::new().hash_one((seed, std::process::id()));
        Self { key: key as usize }
    }
}

// Keep the key out of debug output.
impl std::fmt::Debug for XorRotateGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XorRotateGuard").finish_non_exhaustive()
    }
}

impl PointerGuard for XorRotateGuard {
    #[inline]
    fn encode(&self, addr: usize) -> usize {
        (addr ^ self.key).rotate_left(GUARD_ROTATION)
    }

    #[inline]
    fn decode(&self, stored: usize) -> usize {
        stored.rotate_right(GUARD_ROTATION) ^ self.key
    }
}

/// Guard used by the process-wide exit lists.
///
/// Resolves `EXITFN_MODE` on first use: identity in strict mode, a
/// [`XorRotateGuard`] with a per-process key in hardened mode. The choice is
/// fixed for the rest of the process. Concurrent first uses block until the
/// mode is resolved, so no caller ever encodes with a provisional guard.
#[derive(Debug)]
pub struct ProcessGuard {
    resolved: OnceLock<Option<XorRotateGuard>>,
    read_mode: fn() -> GuardMode,
}

impl ProcessGuard {
    #[must_use]
    pub const fn new() -> Self {
        Self::with_mode_source(GuardMode::from_env)
    }

    /// Guard that takes its mode from `read_mode`, called once on first use.
    #[must_use]
    pub const fn with_mode_source(read_mode: fn() -> GuardMode) -> Self {
        Self {
            resolved: OnceLock::new(),
            read_mode,
        }
    }

    fn inner(&self) -> Option<XorRotateGuard> {
        *self.resolved.get_or_init(|| match (self.read_mode)() {
            GuardMode::Strict => None,
            GuardMode::Hardened => Some(XorRotateGuard::from_entropy()),
        })
    }

    /// Mode this guard resolved to (resolving it if needed).
    #[must_use]
    pub fn mode(&self) -> GuardMode {
        if self.inner().is_some() {
            GuardMode::Hardened
        } else {
            GuardMode::Strict
        }
    }
}

impl Default for ProcessGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl PointerGuard for ProcessGuard {
    fn encode(&self, addr: usize) -> usize {
        match self.inner() {
            Some(guard) => guard.encode(addr),
            None => addr,
        }
    }

    fn decode(&self, stored: usize) -> usize {
        match self.inner() {
            Some(guard) => guard.decode(stored),
            None => stored,
        }
    }
}

/// The guard shared by every process-wide exit list.
pub static PROCESS_GUARD: ProcessGuard = ProcessGuard::new();

//! Runtime mode configuration.
//!
//! The pointer-guard mode is set via the `EXITFN_MODE` environment variable:
//! - `strict` (default): exit callbacks are stored as plain addresses.
//! - `hardened`: exit callbacks are stored XOR-ed with a per-process key and
//!   rotated.
//!
//! Per-registry limits are carried by [`RegistryConfig`] and passed at
//! construction; they are not read from the environment.

use std::sync::atomic::{AtomicU8, Ordering};

/// How stored exit callbacks are encoded.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GuardMode {
    /// Callbacks are stored unchanged.
    #[default]
    Strict,
    /// Callbacks are mangled with a per-process key.
    Hardened,
}

impl GuardMode {
    /// Parse from string (case-insensitive). Unknown names map to `Strict`.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "hardened" | "mangle" | "guard" => Self::Hardened,
            "strict" | "default" | "abi" => Self::Strict,
            _ => Self::Strict,
        }
    }

    /// Read `EXITFN_MODE` now, bypassing the cache.
    #[must_use]
    pub fn from_env() -> Self {
        std::env::var("EXITFN_MODE")
            .map(|v| Self::from_str_loose(&v))
            .unwrap_or_default()
    }

    /// Returns true if stored callbacks are mangled.
    #[must_use]
    pub const fn mangles_pointers(self) -> bool {
        matches!(self, Self::Hardened)
    }

    /// Stable lowercase name, as accepted by `EXITFN_MODE`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Hardened => "hardened",
        }
    }
}

// Atomic cache: 0=unresolved, 1=Strict, 2=Hardened, 255=resolving.
// Resolution never blocks: registration may run from library constructors.
static CACHED_MODE: AtomicU8 = AtomicU8::new(0);

const MODE_UNRESOLVED: u8 = 0;
const MODE_STRICT: u8 = 1;
const MODE_HARDENED: u8 = 2;
const MODE_RESOLVING: u8 = 255;

fn mode_to_u8(mode: GuardMode) -> u8 {
    match mode {
        GuardMode::Strict => MODE_STRICT,
        GuardMode::Hardened => MODE_HARDENED,
    }
}

fn u8_to_mode(v: u8) -> GuardMode {
    match v {
        MODE_HARDENED => GuardMode::Hardened,
        _ => GuardMode::Strict,
    }
}

/// Get the configured guard mode (reads `EXITFN_MODE` on first call, caches thereafter).
///
/// A call that arrives while another caller is resolving the variable gets
/// `Strict`. Callers that must not see that fallback use
/// [`GuardMode::from_env`].
#[must_use]
pub fn guard_mode() -> GuardMode {
    let cached = CACHED_MODE.load(Ordering::Acquire);
    if cached != MODE_UNRESOLVED && cached != MODE_RESOLVING {
        return u8_to_mode(cached);
    }
    if cached == MODE_RESOLVING {
        return GuardMode::Strict;
    }

    if CACHED_MODE
        .compare_exchange(
            MODE_UNRESOLVED,
            MODE_RESOLVING,
            Ordering::SeqCst,
            Ordering::Relaxed,
        )
        .is_err()
    {
        let v = CACHED_MODE.load(Ordering::Acquire);
        return if v != MODE_UNRESOLVED && v != MODE_RESOLVING {
            u8_to_mode(v)
        } else {
            GuardMode::Strict
        };
    }

    let mode = GuardMode::from_env();
    CACHED_MODE.store(mode_to_u8(mode), Ordering::Release);
    mode
}

/// Limits applied to a single registry.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Maximum number of blocks the chain may hold, the initial block
    /// included. `None` means bounded only by the heap.
    pub max_blocks: Option<usize>,
}

impl RegistryConfig {
    /// No limit beyond heap exhaustion.
    #[must_use]
    pub const fn unbounded() -> Self {
        Self { max_blocks: None }
    }

    /// Cap the chain at `max_blocks` blocks.
    #[must_use]
    pub const fn with_max_blocks(max_blocks: usize) -> Self {
        Self {
            max_blocks: Some(max_blocks),
        }
    }

    /// Returns true if a chain of `blocks` blocks may grow by one more.
    #[must_use]
    pub fn allows_growth(self, blocks: usize) -> bool {
        self.max_blocks.is_none_or(|max| blocks < max)
    }
}

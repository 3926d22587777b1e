//! Exit-function chain and slot allocator.
//!
//! Registered exit functions live in fixed-capacity blocks of `B` slots. The
//! initial block is stored inline in the [`Registry`], so the first `B`
//! registrations need no heap allocation and a registry can be a `static`.
//! Further blocks are pushed onto an arena and become the head of the chain.
//! Blocks are never freed.
//!
//! Block positions count from the tail: position 0 is the initial block, the
//! highest position is the head. The walk order is head first, and inside a
//! block from the highest used index down to 0. Since new blocks only ever
//! become the head and indices fill upward, that is reverse registration
//! order.
//!
//! A [`Registry`] holds `N` independent chains ("lists"), one lock and one
//! `closed` flag. The process-wide exit and quick-exit lists are the two
//! lists of one registry, so closing it for shutdown refuses registrations
//! on both.
//!
//! # Locking
//!
//! One [`parking_lot::Mutex`] covers every chain of the registry and the
//! `closed` flag. Chains are only reachable through [`RegistryGuard`], so
//! allocation, population, and the shutdown walk all run under that lock. A
//! slot handed out by the allocator is a [`Reservation`] borrowing the guard:
//! it is either filled or reverted to `Free` before the guard can be released.

use parking_lot::{Mutex, MutexGuard};
use thiserror::Error;

use crate::config::RegistryConfig;
use crate::errno;
use crate::stdlib::handler::{CxaCallback, EncodedFn, ExitArg, ExitHandler, OwnerHandle};
use crate::stdlib::ptr_guard::{IDENTITY_GUARD, PointerGuard};

/// Number of slots per block.
pub const DEFAULT_BLOCK_CAPACITY: usize = 32;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a registration was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum RegisterError {
    /// The callback was null.
    #[error("exit callback is null")]
    InvalidArgument,
    /// Shutdown has begun; nothing registered now would ever run.
    #[error("exit-function registry is closed")]
    RegistryClosed,
    /// A new block was needed and could not be allocated.
    #[error("cannot allocate a new exit-function block")]
    AllocationFailure,
}

impl RegisterError {
    /// errno reported at the C boundary.
    #[must_use]
    pub const fn errno(self) -> i32 {
        match self {
            Self::InvalidArgument => errno::EINVAL,
            Self::RegistryClosed => errno::ECANCELED,
            Self::AllocationFailure => errno::ENOMEM,
        }
    }
}

// ---------------------------------------------------------------------------
// Slots and blocks
// ---------------------------------------------------------------------------

/// Payload of a populated slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CxaEntry {
    pub func: EncodedFn,
    pub arg: ExitArg,
    pub owner: OwnerHandle,
}

/// One registered-callback record.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Available for reuse.
    #[default]
    Free,
    /// Reserved by the allocator, not yet populated.
    Unassigned,
    /// Populated `__cxa_atexit` registration.
    Cxa(CxaEntry),
}

impl Slot {
    #[must_use]
    pub const fn kind(&self) -> SlotKind {
        match self {
            Self::Free => SlotKind::Free,
            Self::Unassigned => SlotKind::Unassigned,
            Self::Cxa(_) => SlotKind::Cxa,
        }
    }

    #[must_use]
    pub const fn is_free(&self) -> bool {
        matches!(self, Self::Free)
    }
}

/// Flavor tag of a slot, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotKind {
    Free,
    Unassigned,
    Cxa,
}

impl SlotKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Unassigned => "unassigned",
            Self::Cxa => "cxa",
        }
    }
}

/// Location of a slot: block position (0 = initial block) and index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId {
    pub block: usize,
    pub index: usize,
}

#[derive(Debug, Clone)]
struct Block<const B: usize> {
    slots: [Slot; B],
    /// Slots `[0, used)` are in use; the rest are never read.
    used: usize,
    /// Highest `used` this block ever reached.
    high_water: usize,
}

impl<const B: usize> Block<B> {
    const fn new() -> Self {
        const { assert!(B > 0, "exit-function blocks need at least one slot") };
        Self {
            slots: [Slot::Free; B],
            used: 0,
            high_water: 0,
        }
    }

    /// Start of the run of `Free` slots at the end of the used range.
    /// 0 when every used slot is free, `used` when the last one is not.
    fn trailing_free_start(&self) -> usize {
        self.slots[..self.used]
            .iter()
            .rposition(|slot| !slot.is_free())
            .map_or(0, |last| last + 1)
    }
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

/// Diagnostic counters, updated under the registry lock.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    /// Successful slot placements.
    pub allocations_total: u64,
    /// Blocks added beyond the initial one.
    pub blocks_allocated: u64,
    /// Placements into a slot that had been used before.
    pub slots_reused: u64,
    /// Allocations refused because the registry was closed.
    pub rejected_closed: u64,
    /// Allocations refused because a new block could not be had.
    pub rejected_alloc: u64,
}

/// Point-in-time view of one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSnapshot {
    pub used: usize,
    /// Flavors of slots `[0, used)`.
    pub slots: Vec<SlotKind>,
}

/// Point-in-time view of a chain, head block first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainSnapshot {
    pub blocks: Vec<BlockSnapshot>,
    pub closed: bool,
    pub allocations_total: u64,
}

impl ChainSnapshot {
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// `used` of every block, head first.
    #[must_use]
    pub fn used_counts(&self) -> Vec<usize> {
        self.blocks.iter().map(|block| block.used).collect()
    }

    /// Number of slots in the used ranges with flavor `kind`.
    #[must_use]
    pub fn count(&self, kind: SlotKind) -> usize {
        self.blocks
            .iter()
            .flat_map(|block| block.slots.iter())
            .filter(|slot| **slot == kind)
            .count()
    }
}

// ---------------------------------------------------------------------------
// Chain
// ---------------------------------------------------------------------------

struct Chain<const B: usize> {
    initial: Block<B>,
    /// Blocks added after the initial one, oldest first.
    extra: Vec<Block<B>>,
    stats: RegistryStats,
}

impl<const B: usize> Chain<B> {
    const fn new() -> Self {
        Self {
            initial: Block::new(),
            extra: Vec::new(),
            stats: RegistryStats {
                allocations_total: 0,
                blocks_allocated: 0,
                slots_reused: 0,
                rejected_closed: 0,
                rejected_alloc: 0,
            },
        }
    }

    fn block_count(&self) -> usize {
        self.extra.len() + 1
    }

    fn block(&self, pos: usize) -> &Block<B> {
        match pos {
            0 => &self.initial,
            n => &self.extra[n - 1],
        }
    }

    fn block_mut(&mut self, pos: usize) -> &mut Block<B> {
        match pos {
            0 => &mut self.initial,
            n => &mut self.extra[n - 1],
        }
    }

    fn slot(&self, id: SlotId) -> Option<&Slot> {
        if id.block >= self.block_count() {
            return None;
        }
        let block = self.block(id.block);
        block.slots[..block.used].get(id.index)
    }

    fn slot_mut(&mut self, id: SlotId) -> Option<&mut Slot> {
        if id.block >= self.block_count() {
            return None;
        }
        let block = self.block_mut(id.block);
        block.slots[..block.used].get_mut(id.index)
    }

    /// Every slot id in walk order: head block first, highest index first.
    fn walk_order(&self) -> impl Iterator<Item = SlotId> + '_ {
        (0..self.block_count()).rev().flat_map(move |block| {
            (0..self.block(block).used)
                .rev()
                .map(move |index| SlotId { block, index })
        })
    }

    /// Reserve a slot for a new registration. The caller has checked that
    /// the registry is open.
    fn allocate(&mut self, config: RegistryConfig) -> Result<Reservation<'_, B>, RegisterError> {
        // Walk from the head. `prev` is the newer neighbour of the block
        // being looked at; every block it names has been fully drained.
        let mut prev = None;
        let mut stop = None;
        for pos in (0..self.block_count()).rev() {
            let block = self.block_mut(pos);
            let start = block.trailing_free_start();
            if start > 0 {
                stop = Some((pos, start));
                break;
            }
            block.used = 0;
            prev = Some(pos);
        }

        let (id, fresh_block) = match (stop, prev) {
            (Some((block, index)), _) if index < B => (SlotId { block, index }, false),
            // The stopping block is full, or the walk drained every block:
            // take the first slot of the newest drained block.
            (_, Some(block)) => (SlotId { block, index: 0 }, false),
            // The head itself is full.
            (_, None) => (
                SlotId {
                    block: self.push_block(config)?,
                    index: 0,
                },
                true,
            ),
        };

        let block = self.block_mut(id.block);
        let reused = id.index < block.high_water;
        block.used = id.index + 1;
        block.high_water = block.high_water.max(block.used);
        block.slots[id.index] = Slot::Unassigned;

        self.stats.allocations_total += 1;
        if fresh_block {
            self.stats.blocks_allocated += 1;
        }
        if reused {
            self.stats.slots_reused += 1;
        }

        Ok(Reservation {
            chain: self,
            id,
            filled: false,
        })
    }

    /// Add an empty block as the new head. Leaves the chain untouched on failure.
    fn push_block(&mut self, config: RegistryConfig) -> Result<usize, RegisterError> {
        if !config.allows_growth(self.block_count()) || self.extra.try_reserve(1).is_err() {
            self.stats.rejected_alloc += 1;
            return Err(RegisterError::AllocationFailure);
        }
        self.extra.push(Block::new());
        Ok(self.block_count() - 1)
    }

    fn snapshot(&self, closed: bool) -> ChainSnapshot {
        let blocks = (0..self.block_count())
            .rev()
            .map(|pos| {
                let block = self.block(pos);
                BlockSnapshot {
                    used: block.used,
                    slots: block.slots[..block.used].iter().map(Slot::kind).collect(),
                }
            })
            .collect();
        ChainSnapshot {
            blocks,
            closed,
            allocations_total: self.stats.allocations_total,
        }
    }
}

// ---------------------------------------------------------------------------
// Reservation
// ---------------------------------------------------------------------------

/// A slot reserved by the allocator and marked `Unassigned`.
///
/// Filling it publishes the registration. Dropping it unfilled returns the
/// slot to `Free`, so `Unassigned` never outlives the lock.
#[must_use = "an unfilled reservation is released when dropped"]
pub struct Reservation<'a, const B: usize> {
    chain: &'a mut Chain<B>,
    id: SlotId,
    filled: bool,
}

impl<const B: usize> Reservation<'_, B> {
    #[must_use]
    pub fn id(&self) -> SlotId {
        self.id
    }

    /// Populate the reserved slot.
    pub fn fill(mut self, entry: CxaEntry) -> SlotId {
        if let Some(slot) = self.chain.slot_mut(self.id) {
            *slot = Slot::Cxa(entry);
        }
        self.filled = true;
        self.id
    }
}

impl<const B: usize> Drop for Reservation<'_, B> {
    fn drop(&mut self) {
        if self.filled {
            return;
        }
        if let Some(slot) = self.chain.slot_mut(self.id) {
            *slot = Slot::Free;
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

struct Lists<const B: usize, const N: usize> {
    chains: [Chain<B>; N],
    /// Shared by every list.
    closed: bool,
    /// Applied to each list on its own.
    config: RegistryConfig,
}

/// Exit-function registry with `N` lists of blocks of `B` slots.
pub struct Registry<const B: usize = DEFAULT_BLOCK_CAPACITY, const N: usize = 1> {
    lists: Mutex<Lists<B, N>>,
    ptr_guard: &'static dyn PointerGuard,
}

impl<const B: usize, const N: usize> Registry<B, N> {
    /// Empty registry storing plain callback addresses.
    #[must_use]
    pub const fn new() -> Self {
        Self::with_guard_and_config(IDENTITY_GUARD, RegistryConfig::unbounded())
    }

    /// Empty registry storing callbacks encoded by `ptr_guard`.
    #[must_use]
    pub const fn with_guard(ptr_guard: &'static dyn PointerGuard) -> Self {
        Self::with_guard_and_config(ptr_guard, RegistryConfig::unbounded())
    }

    /// Empty registry with limits from `config`.
    #[must_use]
    pub const fn with_config(config: RegistryConfig) -> Self {
        Self::with_guard_and_config(IDENTITY_GUARD, config)
    }

    #[must_use]
    pub const fn with_guard_and_config(
        ptr_guard: &'static dyn PointerGuard,
        config: RegistryConfig,
    ) -> Self {
        const { assert!(N > 0, "a registry needs at least one list") };
        Self {
            lists: parking_lot::const_mutex(Lists {
                chains: [const { Chain::new() }; N],
                closed: false,
                config,
            }),
            ptr_guard,
        }
    }

    /// List `index`, or `None` if the registry has no such list.
    #[must_use]
    pub fn list(&self, index: usize) -> Option<RegistryList<'_, B, N>> {
        (index < N).then(|| self.list_at(index))
    }

    pub(crate) const fn list_at(&self, index: usize) -> RegistryList<'_, B, N> {
        debug_assert!(index < N);
        RegistryList {
            registry: self,
            index,
        }
    }

    /// Register `callback` on list 0. See [`RegistryList::register`].
    pub fn register(
        &self,
        callback: Option<CxaCallback>,
        arg: ExitArg,
        owner: OwnerHandle,
    ) -> Result<SlotId, RegisterError> {
        self.list_at(0).register(callback, arg, owner)
    }

    /// Acquire the registry lock, addressing list 0.
    pub fn lock(&self) -> RegistryGuard<'_, B, N> {
        self.list_at(0).lock()
    }

    /// Try to acquire the registry lock without blocking, addressing list 0.
    pub fn try_lock(&self) -> Option<RegistryGuard<'_, B, N>> {
        self.list_at(0).try_lock()
    }

    /// Counters of list 0.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        self.list_at(0).stats()
    }

    /// Snapshot of list 0.
    #[must_use]
    pub fn snapshot(&self) -> ChainSnapshot {
        self.list_at(0).snapshot()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lists.lock().closed
    }

    /// Slots per block.
    #[must_use]
    pub const fn block_capacity(&self) -> usize {
        B
    }

    #[must_use]
    pub const fn list_count(&self) -> usize {
        N
    }
}

impl<const B: usize, const N: usize> Default for Registry<B, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const B: usize, const N: usize> std::fmt::Debug for Registry<B, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("block_capacity", &B)
            .field("lists", &N)
            .finish_non_exhaustive()
    }
}

/// One list of a [`Registry`]. Every list of a registry shares its lock and
/// its `closed` flag.
#[derive(Debug, Clone, Copy)]
pub struct RegistryList<'a, const B: usize, const N: usize> {
    registry: &'a Registry<B, N>,
    index: usize,
}

impl<'a, const B: usize, const N: usize> RegistryList<'a, B, N> {
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Register `callback` to be run with `arg` at exit, or when `owner` is
    /// unloaded.
    ///
    /// A null callback is rejected before the lock is taken. Otherwise the
    /// slot is reserved and populated under one lock acquisition; on failure
    /// the chain is left as it was.
    pub fn register(
        &self,
        callback: Option<CxaCallback>,
        arg: ExitArg,
        owner: OwnerHandle,
    ) -> Result<SlotId, RegisterError> {
        let Some(callback) = callback else {
            return Err(RegisterError::InvalidArgument);
        };
        let func = EncodedFn::encode(callback, self.registry.ptr_guard);

        let mut guard = self.lock();
        let reservation = guard.allocate()?;
        Ok(reservation.fill(CxaEntry { func, arg, owner }))
    }

    /// Acquire the registry lock.
    pub fn lock(&self) -> RegistryGuard<'a, B, N> {
        RegistryGuard {
            lists: self.registry.lists.lock(),
            index: self.index,
            ptr_guard: self.registry.ptr_guard,
        }
    }

    /// Try to acquire the registry lock without blocking.
    pub fn try_lock(&self) -> Option<RegistryGuard<'a, B, N>> {
        let lists = self.registry.lists.try_lock()?;
        Some(RegistryGuard {
            lists,
            index: self.index,
            ptr_guard: self.registry.ptr_guard,
        })
    }

    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        self.lock().stats()
    }

    #[must_use]
    pub fn snapshot(&self) -> ChainSnapshot {
        self.lock().snapshot()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.registry.is_closed()
    }
}

// ---------------------------------------------------------------------------
// Locked access
// ---------------------------------------------------------------------------

/// Exclusive access to a registry, addressing one of its lists. Used by
/// registration and by the shutdown sequence that walks and consumes slots.
pub struct RegistryGuard<'a, const B: usize, const N: usize = 1> {
    lists: MutexGuard<'a, Lists<B, N>>,
    index: usize,
    ptr_guard: &'static dyn PointerGuard,
}

impl<const B: usize, const N: usize> RegistryGuard<'_, B, N> {
    fn chain(&self) -> &Chain<B> {
        &self.lists.chains[self.index]
    }

    fn chain_mut(&mut self) -> &mut Chain<B> {
        &mut self.lists.chains[self.index]
    }

    /// Index of the addressed list.
    #[must_use]
    pub fn list_index(&self) -> usize {
        self.index
    }

    /// Reserve a slot. The returned reservation must be filled to publish a
    /// registration.
    pub fn allocate(&mut self) -> Result<Reservation<'_, B>, RegisterError> {
        let lists = &mut *self.lists;
        let chain = &mut lists.chains[self.index];
        if lists.closed {
            chain.stats.rejected_closed += 1;
            return Err(RegisterError::RegistryClosed);
        }
        chain.allocate(lists.config)
    }

    /// Refuse every later allocation on every list of the registry.
    /// Idempotent; there is no way to reopen.
    pub fn close(&mut self) {
        self.lists.closed = true;
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lists.closed
    }

    #[must_use]
    pub fn block_count(&self) -> usize {
        self.chain().block_count()
    }

    #[must_use]
    pub fn allocations_total(&self) -> u64 {
        self.chain().stats.allocations_total
    }

    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        self.chain().stats
    }

    #[must_use]
    pub fn snapshot(&self) -> ChainSnapshot {
        self.chain().snapshot(self.lists.closed)
    }

    /// Flavor of the slot at `id`, if it lies in a used range.
    #[must_use]
    pub fn slot_kind(&self, id: SlotId) -> Option<SlotKind> {
        self.chain().slot(id).map(Slot::kind)
    }

    /// Populated slots in walk order, callbacks decoded.
    pub fn pending(&self) -> impl Iterator<Item = (SlotId, ExitHandler)> + '_ {
        let chain = self.chain();
        let ptr_guard = self.ptr_guard;
        chain
            .walk_order()
            .filter_map(move |id| match chain.slot(id) {
                Some(Slot::Cxa(entry)) => {
                    let handler = ExitHandler {
                        callback: entry.func.decode(ptr_guard)?,
                        arg: entry.arg,
                        owner: entry.owner,
                    };
                    Some((id, handler))
                }
                // `Unassigned` cannot be seen here: a live reservation holds
                // the guard mutably.
                Some(Slot::Free | Slot::Unassigned) | None => None,
            })
    }

    /// Mark a populated slot `Free`. Returns false if `id` is not populated.
    pub fn mark_free(&mut self, id: SlotId) -> bool {
        match self.chain_mut().slot_mut(id) {
            Some(slot) if matches!(slot, Slot::Cxa(_)) => {
                *slot = Slot::Free;
                true
            }
            _ => false,
        }
    }

    /// One step of the shutdown walk: take the next populated slot in walk
    /// order and mark it `Free`. The caller invokes the returned handler.
    pub fn take_next(&mut self) -> Option<(SlotId, ExitHandler)> {
        let (id, handler) = self.pending().next()?;
        self.mark_free(id);
        Some((id, handler))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::{c_int, c_void};

    extern "C" fn noop_callback(_arg: *mut c_void, _status: c_int) {}

    const NOOP: CxaCallback = noop_callback;

    fn register_n<const B: usize>(registry: &Registry<B>, args: impl IntoIterator<Item = usize>) {
        for arg in args {
            registry
                .register(Some(NOOP), ExitArg(arg), OwnerHandle::NONE)
                .unwrap();
        }
    }

    fn walk_args<const B: usize>(registry: &Registry<B>) -> Vec<usize> {
        registry
            .lock()
            .pending()
            .map(|(_, handler)| handler.arg.0)
            .collect()
    }

    #[test]
    fn first_registration_uses_initial_block() {
        let registry = Registry::<4>::new();
        let id = registry
            .register(Some(NOOP), ExitArg(1), OwnerHandle::NONE)
            .unwrap();
        assert_eq!(id, SlotId { block: 0, index: 0 });
        let snap = registry.snapshot();
        assert_eq!(snap.used_counts(), vec![1]);
        assert_eq!(snap.allocations_total, 1);
        assert_eq!(registry.stats().blocks_allocated, 0);
    }

    #[test]
    fn overflow_prepends_new_head() {
        let registry = Registry::<4>::new();
        register_n(&registry, 1..=5);

        let snap = registry.snapshot();
        assert_eq!(snap.block_count(), 2);
        assert_eq!(snap.used_counts(), vec![1, 4]);
        assert_eq!(walk_args(&registry), vec![5, 4, 3, 2, 1]);
        assert_eq!(registry.stats().blocks_allocated, 1);
    }

    #[test]
    fn trailing_free_run_is_reused() {
        let registry = Registry::<4>::new();
        register_n(&registry, 1..=4);
        {
            let mut guard = registry.lock();
            for index in 1..4 {
                assert!(guard.mark_free(SlotId { block: 0, index }));
            }
        }

        let id = registry
            .register(Some(NOOP), ExitArg(5), OwnerHandle::NONE)
            .unwrap();
        assert_eq!(id, SlotId { block: 0, index: 1 });
        assert_eq!(registry.snapshot().used_counts(), vec![2]);
        assert_eq!(registry.stats().slots_reused, 1);
        assert_eq!(walk_args(&registry), vec![5, 1]);
    }

    #[test]
    fn interior_free_slot_is_not_reused() {
        let registry = Registry::<4>::new();
        register_n(&registry, 1..=3);
        assert!(registry.lock().mark_free(SlotId { block: 0, index: 1 }));

        let id = registry
            .register(Some(NOOP), ExitArg(4), OwnerHandle::NONE)
            .unwrap();
        assert_eq!(id, SlotId { block: 0, index: 3 });
        assert_eq!(walk_args(&registry), vec![4, 3, 1]);
    }

    #[test]
    fn drained_head_is_reset_and_older_block_reused() {
        let registry = Registry::<2>::new();
        register_n(&registry, 1..=3);
        {
            let mut guard = registry.lock();
            // Head holds 3; tail holds 1, 2.
            assert!(guard.mark_free(SlotId { block: 1, index: 0 }));
            assert!(guard.mark_free(SlotId { block: 0, index: 1 }));
        }

        let id = registry
            .register(Some(NOOP), ExitArg(4), OwnerHandle::NONE)
            .unwrap();
        assert_eq!(id, SlotId { block: 0, index: 1 });
        assert_eq!(registry.snapshot().used_counts(), vec![0, 2]);
        assert_eq!(walk_args(&registry), vec![4, 1]);
    }

    #[test]
    fn full_block_behind_drained_head_uses_head_slot_zero() {
        let registry = Registry::<2>::new();
        register_n(&registry, 1..=3);
        assert!(registry.lock().mark_free(SlotId { block: 1, index: 0 }));

        let id = registry
            .register(Some(NOOP), ExitArg(4), OwnerHandle::NONE)
            .unwrap();
        assert_eq!(id, SlotId { block: 1, index: 0 });
        assert_eq!(registry.snapshot().used_counts(), vec![1, 2]);
        assert_eq!(registry.stats().blocks_allocated, 1);
    }

    #[test]
    fn fully_drained_chain_restarts_at_tail() {
        let registry = Registry::<2>::new();
        register_n(&registry, 1..=3);
        {
            let mut guard = registry.lock();
            while guard.take_next().is_some() {}
        }

        let id = registry
            .register(Some(NOOP), ExitArg(9), OwnerHandle::NONE)
            .unwrap();
        assert_eq!(id, SlotId { block: 0, index: 0 });
        assert_eq!(registry.snapshot().used_counts(), vec![0, 1]);
        assert_eq!(walk_args(&registry), vec![9]);
    }

    #[test]
    fn null_callback_is_rejected_without_side_effects() {
        let registry = Registry::<4>::new();
        let before = registry.snapshot();
        assert_eq!(
            registry.register(None, ExitArg(1), OwnerHandle::NONE),
            Err(RegisterError::InvalidArgument)
        );
        assert_eq!(registry.snapshot(), before);
        assert_eq!(registry.stats(), RegistryStats::default());
    }

    #[test]
    fn closed_registry_rejects_and_keeps_shape() {
        let registry = Registry::<4>::new();
        register_n(&registry, 1..=5);
        registry.lock().close();
        let before = registry.snapshot();

        for arg in 0..3 {
            assert_eq!(
                registry.register(Some(NOOP), ExitArg(arg), OwnerHandle::NONE),
                Err(RegisterError::RegistryClosed)
            );
        }
        assert_eq!(registry.snapshot(), before);
        assert_eq!(registry.stats().rejected_closed, 3);
    }

    #[test]
    fn block_budget_failure_leaves_chain_untouched() {
        let registry = Registry::<2>::with_config(RegistryConfig::with_max_blocks(1));
        register_n(&registry, 1..=2);
        let before = registry.snapshot();

        assert_eq!(
            registry.register(Some(NOOP), ExitArg(3), OwnerHandle::NONE),
            Err(RegisterError::AllocationFailure)
        );
        assert_eq!(registry.snapshot(), before);
        assert_eq!(registry.stats().rejected_alloc, 1);

        // Freeing capacity makes the same registration succeed.
        assert!(registry.lock().mark_free(SlotId { block: 0, index: 1 }));
        registry
            .register(Some(NOOP), ExitArg(3), OwnerHandle::NONE)
            .unwrap();
        assert_eq!(walk_args(&registry), vec![3, 1]);
    }

    #[test]
    fn dropped_reservation_reverts_to_free() {
        let registry = Registry::<4>::new();
        {
            let mut guard = registry.lock();
            let reservation = guard.allocate().unwrap();
            assert_eq!(reservation.id(), SlotId { block: 0, index: 0 });
            drop(reservation);
            assert_eq!(
                guard.slot_kind(SlotId { block: 0, index: 0 }),
                Some(SlotKind::Free)
            );
        }
        assert_eq!(registry.snapshot().count(SlotKind::Unassigned), 0);

        // The reverted slot is reused by the next registration.
        let id = registry
            .register(Some(NOOP), ExitArg(1), OwnerHandle::NONE)
            .unwrap();
        assert_eq!(id, SlotId { block: 0, index: 0 });
    }

    #[test]
    fn mark_free_rejects_unpopulated_slots() {
        let registry = Registry::<4>::new();
        register_n(&registry, [1]);
        let mut guard = registry.lock();
        assert!(!guard.mark_free(SlotId { block: 0, index: 1 }));
        assert!(!guard.mark_free(SlotId { block: 3, index: 0 }));
        assert!(guard.mark_free(SlotId { block: 0, index: 0 }));
        assert!(!guard.mark_free(SlotId { block: 0, index: 0 }));
    }

    #[test]
    fn error_errno_mapping() {
        assert_eq!(RegisterError::InvalidArgument.errno(), errno::EINVAL);
        assert_eq!(RegisterError::RegistryClosed.errno(), errno::ECANCELED);
        assert_eq!(RegisterError::AllocationFailure.errno(), errno::ENOMEM);
        assert_eq!(
            RegisterError::RegistryClosed.to_string(),
            "exit-function registry is closed"
        );
    }

    #[test]
    fn static_registry_needs_no_setup() {
        static REGISTRY: Registry<8> = Registry::new();
        register_n(&REGISTRY, [42]);
        assert_eq!(walk_args(&REGISTRY), vec![42]);
        assert_eq!(REGISTRY.block_capacity(), 8);
    }

    #[test]
    fn lists_keep_separate_chains() {
        let registry = Registry::<2, 2>::new();
        let first = registry.list(0).unwrap();
        let second = registry.list(1).unwrap();
        for arg in 1..=3 {
            first
                .register(Some(NOOP), ExitArg(arg), OwnerHandle::NONE)
                .unwrap();
        }
        let id = second
            .register(Some(NOOP), ExitArg(10), OwnerHandle::NONE)
            .unwrap();

        assert_eq!(id, SlotId { block: 0, index: 0 });
        assert_eq!(first.snapshot().used_counts(), vec![1, 2]);
        assert_eq!(second.snapshot().used_counts(), vec![1]);
        let walked: Vec<usize> = second.lock().pending().map(|(_, h)| h.arg.0).collect();
        assert_eq!(walked, vec![10]);
        assert!(registry.list(2).is_none());
    }

    #[test]
    fn closing_one_list_closes_every_list() {
        let registry = Registry::<4, 2>::new();
        let first = registry.list(0).unwrap();
        let second = registry.list(1).unwrap();
        second
            .register(Some(NOOP), ExitArg(1), OwnerHandle::NONE)
            .unwrap();
        let before = second.snapshot();

        first.lock().close();

        assert!(second.is_closed());
        assert!(second.lock().is_closed());
        assert_eq!(
            second.register(Some(NOOP), ExitArg(2), OwnerHandle::NONE),
            Err(RegisterError::RegistryClosed)
        );
        assert_eq!(second.snapshot().used_counts(), before.used_counts());
        assert_eq!(second.stats().rejected_closed, 1);
        assert_eq!(first.stats().rejected_closed, 0);
    }

    #[test]
    fn lists_share_one_lock() {
        let registry = Registry::<4, 2>::new();
        let guard = registry.lock();
        assert!(registry.list(1).unwrap().try_lock().is_none());
        drop(guard);
        assert!(registry.list(1).unwrap().try_lock().is_some());
    }
}

// Copyright (c) 2024-present, ixdb contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The block pool (BP): a bounded, pinned-page cache over a single file of
//! fixed-size blocks.
//!
//! Spec-wise, BP is an external collaborator the three engines consume
//! through `GetBlock`/`AllocateBlock`/`GetBlockCounter`/pin/unpin/set-dirty —
//! its internal eviction policy is not part of the contract. This module is
//! the concrete (but intentionally minimal) substrate the engines actually
//! run against: an LRU-ordered resident-frame cache that never evicts a
//! pinned frame and lazily persists dirty frames at eviction or close time.
//!
//! The eviction candidate order is a `VecDeque`-based least-recently-used
//! list, the same shape as the teacher's descriptor-table LRU
//! (`descriptor_table/lru.rs`): `refresh` moves an id to the back (most
//! recently used), `get_least_recently_used` rotates the front candidate to
//! the back so repeated peeks skip still-pinned entries without losing them.

use crate::error::{Error, Result};
use rustc_hash::FxHashMap;
use std::cell::{Ref, RefCell, RefMut};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::rc::Rc;

/// Index of a block within a file. Block 0 is always the header block.
pub type BlockId = u32;

/// Least-recently-used ordering over resident block ids.
///
/// Grounded on `descriptor_table/lru.rs`'s `LruList`.
struct LruList(VecDeque<BlockId>);

impl LruList {
    fn new() -> Self {
        Self(VecDeque::new())
    }

    fn remove(&mut self, id: BlockId) {
        self.0.retain(|x| *x != id);
    }

    fn refresh(&mut self, id: BlockId) {
        self.remove(id);
        self.0.push_back(id);
    }

    /// Rotates the least-recently-used id to the back and returns it, so a
    /// caller can test it for pinned-ness and try the next one without
    /// losing track of ids it has already rejected this pass.
    fn get_least_recently_used(&mut self) -> Option<BlockId> {
        let front = self.0.pop_front()?;
        self.0.push_back(front);
        Some(front)
    }
}

struct Frame<const B: usize> {
    data: Box<[u8; B]>,
    dirty: bool,
    pins: u32,
}

struct BlockPoolInner<const B: usize> {
    file: File,
    block_count: u32,
    frames: FxHashMap<BlockId, Frame<B>>,
    lru: LruList,
    capacity: usize,
}

impl<const B: usize> BlockPoolInner<B> {
    fn flush_frame(&mut self, id: BlockId) -> Result<()> {
        let Some(frame) = self.frames.get_mut(&id) else {
            return Ok(());
        };
        if frame.dirty {
            self.file.seek(SeekFrom::Start(u64::from(id) * B as u64))?;
            self.file.write_all(frame.data.as_ref())?;
            frame.dirty = false;
        }
        Ok(())
    }

    fn evict_one(&mut self) -> Result<()> {
        // Try every resident id once; each call to `get_least_recently_used`
        // rotates the candidate to the back, so a full loop over `len`
        // candidates visits each id exactly once.
        let attempts = self.frames.len();
        for _ in 0..attempts {
            let Some(candidate) = self.lru.get_least_recently_used() else {
                break;
            };
            let pinned = self
                .frames
                .get(&candidate)
                .is_some_and(|frame| frame.pins > 0);
            if !pinned {
                log::debug!("bp: evicting frame {candidate}");
                self.flush_frame(candidate)?;
                self.frames.remove(&candidate);
                self.lru.remove(candidate);
                return Ok(());
            }
        }
        Err(Error::BufferPool)
    }

    fn ensure_capacity(&mut self) -> Result<()> {
        if self.frames.len() >= self.capacity {
            self.evict_one()?;
        }
        Ok(())
    }

    fn load_from_disk(&mut self, id: BlockId) -> Result<[u8; B]> {
        let mut buf = [0u8; B];
        self.file.seek(SeekFrom::Start(u64::from(id) * B as u64))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }
}

/// A bounded buffer pool over one open file of `B`-byte blocks.
///
/// Cheaply cloneable (an `Rc` handle); all clones share the same resident
/// frame set, matching the single-threaded, synchronous scheduling model
/// (§5) this crate targets — there is no `Send`/`Sync` bound here on
/// purpose.
pub struct BlockPool<const B: usize>(Rc<RefCell<BlockPoolInner<B>>>);

impl<const B: usize> Clone for BlockPool<B> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<const B: usize> BlockPool<B> {
    /// Creates a new, empty file. Fails if `path` already exists.
    pub fn create_file(path: impl AsRef<Path>) -> Result<()> {
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        Ok(())
    }

    /// Opens an existing file with `capacity` resident frames.
    pub fn open_file(path: impl AsRef<Path>, capacity: usize) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        let block_count = u32::try_from(len / B as u64).unwrap_or(u32::MAX);

        log::trace!("bp: opened file with {block_count} existing blocks");

        Ok(Self(Rc::new(RefCell::new(BlockPoolInner {
            file,
            block_count,
            frames: FxHashMap::default(),
            lru: LruList::new(),
            capacity: capacity.max(1),
        }))))
    }

    /// Flushes every dirty resident frame and drops cached state. The
    /// underlying `File` is closed when the last clone is dropped.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.0.borrow_mut();
        let ids: Vec<BlockId> = inner.frames.keys().copied().collect();
        for id in ids {
            inner.flush_frame(id)?;
        }
        inner.file.flush()?;
        Ok(())
    }

    /// Number of blocks ever allocated in this file (`GetBlockCounter`).
    #[must_use]
    pub fn block_counter(&self) -> u32 {
        self.0.borrow().block_count
    }

    /// Fetches and pins the block at `id`.
    pub fn get_block(&self, id: BlockId) -> Result<PinnedBlock<B>> {
        {
            let mut inner = self.0.borrow_mut();
            if let Some(frame) = inner.frames.get_mut(&id) {
                frame.pins += 1;
                inner.lru.refresh(id);
                log::trace!("bp: get_block({id}) hit");
                return Ok(PinnedBlock {
                    pool: self.clone(),
                    id,
                });
            }
        }

        log::trace!("bp: get_block({id}) miss, loading from disk");
        let data = self.0.borrow_mut().load_from_disk(id)?;

        {
            let mut inner = self.0.borrow_mut();
            inner.ensure_capacity()?;
            inner.frames.insert(
                id,
                Frame {
                    data: Box::new(data),
                    dirty: false,
                    pins: 1,
                },
            );
            inner.lru.refresh(id);
        }

        Ok(PinnedBlock {
            pool: self.clone(),
            id,
        })
    }

    /// Appends a new zero-filled block and returns it pinned.
    pub fn allocate_block(&self) -> Result<PinnedBlock<B>> {
        let id = {
            let mut inner = self.0.borrow_mut();
            let id = inner.block_count;
            inner.block_count += 1;
            inner.ensure_capacity()?;
            inner.frames.insert(
                id,
                Frame {
                    data: Box::new([0u8; B]),
                    dirty: true,
                    pins: 1,
                },
            );
            inner.lru.refresh(id);
            id
        };
        log::debug!("bp: allocate_block -> {id}");
        Ok(PinnedBlock {
            pool: self.clone(),
            id,
        })
    }

    fn release_pin(&self, id: BlockId) {
        let mut inner = self.0.borrow_mut();
        if let Some(frame) = inner.frames.get_mut(&id) {
            frame.pins = frame.pins.saturating_sub(1);
        }
    }

    fn mark_dirty(&self, id: BlockId) {
        if let Some(frame) = self.0.borrow_mut().frames.get_mut(&id) {
            frame.dirty = true;
        }
    }
}

/// A pinned, resident block. Dropping it unpins the block (`UnpinBlock`);
/// call [`PinnedBlock::mark_dirty`] first if the contents were mutated.
///
/// This is the scoped-acquisition guard Design Notes §9 asks for in place of
/// hand-discharged pin/unpin pairs.
pub struct PinnedBlock<const B: usize> {
    pool: BlockPool<B>,
    id: BlockId,
}

impl<const B: usize> PinnedBlock<B> {
    /// The block index this guard pins.
    #[must_use]
    pub fn id(&self) -> BlockId {
        self.id
    }

    /// Borrows the block's bytes immutably.
    #[must_use]
    pub fn bytes(&self) -> Ref<'_, [u8; B]> {
        Ref::map(self.pool.0.borrow(), |inner| {
            inner
                .frames
                .get(&self.id)
                .map(|frame| frame.data.as_ref())
                .expect("pinned block must be resident")
        })
    }

    /// Borrows the block's bytes mutably and marks it dirty (the contents
    /// will be persisted at eviction or close time).
    #[must_use]
    pub fn bytes_mut(&self) -> RefMut<'_, [u8; B]> {
        self.pool.mark_dirty(self.id);
        RefMut::map(self.pool.0.borrow_mut(), |inner| {
            inner
                .frames
                .get_mut(&self.id)
                .map(|frame| frame.data.as_mut())
                .expect("pinned block must be resident")
        })
    }

    /// Explicitly marks the block dirty without obtaining a mutable borrow
    /// (`SetDirty`). `bytes_mut` already does this implicitly.
    pub fn mark_dirty(&self) {
        self.pool.mark_dirty(self.id);
    }

    /// Explicit unpin, equivalent to dropping the guard (`UnpinBlock`).
    pub fn unpin(self) {
        drop(self);
    }
}

impl<const B: usize> Drop for PinnedBlock<B> {
    fn drop(&mut self) {
        self.pool.release_pin(self.id);
    }
}

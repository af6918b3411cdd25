// Copyright (c) 2024-present, ixdb contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Bounded integer-handle tables for open files and open scans.
//!
//! The reference implementation keeps `open_files`/`open_scans` as
//! process-global fixed arrays indexed by the handle itself. Here each
//! engine owns its own [`SlotTable`], so the public integer-handle contract
//! (§9) survives without any global mutable state.

use crate::error::{Error, Result};

/// A capacity-bounded table that hands out the lowest free integer handle.
pub struct SlotTable<T> {
    slots: Vec<Option<T>>,
    capacity: usize,
}

impl<T> SlotTable<T> {
    /// Creates an empty table that can hold at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            capacity,
        }
    }

    /// Number of occupied slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Whether the table holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the table is at capacity.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    /// Inserts `value` at the lowest free handle, growing the backing
    /// store as needed. Fails with [`Error::MaxOpenFiles`]-shaped capacity
    /// errors left to the caller, since the right variant differs between
    /// file and scan tables; returns `None` here only if `capacity` is 0.
    pub fn insert(&mut self, value: T) -> Option<i32> {
        if self.is_full() {
            return None;
        }
        if let Some(idx) = self.slots.iter().position(Option::is_none) {
            self.slots[idx] = Some(value);
            return Some(idx as i32);
        }
        self.slots.push(Some(value));
        Some((self.slots.len() - 1) as i32)
    }

    /// Looks up `handle`, returning [`Error::InvalidDescriptor`] if it is
    /// out of range or unoccupied.
    pub fn get(&self, handle: i32) -> Result<&T> {
        usize::try_from(handle)
            .ok()
            .and_then(|idx| self.slots.get(idx))
            .and_then(Option::as_ref)
            .ok_or(Error::InvalidDescriptor)
    }

    /// Mutable variant of [`SlotTable::get`].
    pub fn get_mut(&mut self, handle: i32) -> Result<&mut T> {
        usize::try_from(handle)
            .ok()
            .and_then(|idx| self.slots.get_mut(idx))
            .and_then(Option::as_mut)
            .ok_or(Error::InvalidDescriptor)
    }

    /// Frees `handle`, returning its value.
    pub fn remove(&mut self, handle: i32) -> Result<T> {
        let idx = usize::try_from(handle).map_err(|_| Error::InvalidDescriptor)?;
        self.slots
            .get_mut(idx)
            .and_then(Option::take)
            .ok_or(Error::InvalidDescriptor)
    }

    /// Iterates over occupied `(handle, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (i32, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| slot.as_ref().map(|v| (idx as i32, v)))
    }

    /// Whether any occupied entry matches `pred` (used by `close`/`destroy`
    /// checks such as "is any open scan still using this file").
    pub fn any(&self, pred: impl Fn(&T) -> bool) -> bool {
        self.iter().any(|(_, v)| pred(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuses_lowest_free_handle() {
        let mut table = SlotTable::new(4);
        let a = table.insert("a").unwrap();
        let b = table.insert("b").unwrap();
        assert_eq!((a, b), (0, 1));
        table.remove(a).unwrap();
        let c = table.insert("c").unwrap();
        assert_eq!(c, 0);
    }

    #[test]
    fn rejects_beyond_capacity() {
        let mut table = SlotTable::new(1);
        assert!(table.insert("a").is_some());
        assert!(table.insert("b").is_none());
    }

    #[test]
    fn get_missing_errors() {
        let table: SlotTable<i32> = SlotTable::new(2);
        assert!(matches!(table.get(0), Err(Error::InvalidDescriptor)));
    }
}

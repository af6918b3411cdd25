// Copyright (c) 2024-present, ixdb contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! AM: a B+ tree access method over two variable-width attribute fields,
//! supporting insertion and six-operator range scans.
//!
//! Grounded on `AM.c` (bootstrap-then-split-propagate insertion, the
//! per-operator scan start/end table, `FindNextEntry`'s boundary and
//! `NOT_EQUAL → GREATER_THAN` handling) and `BT.c` (`split_node`,
//! `split_leaf`, `node_find`, `leaf_find_first`/`leaf_find_last`,
//! `bt_search`).

mod key;
mod leaf;
mod node;
mod scan;

pub use key::{compare_key, encode_float, encode_int, FieldDesc, FieldKind};
pub use scan::ScanOp;

use crate::bp::{BlockId, BlockPool, PinnedBlock};
use crate::coding::{read_i32, write_i32};
use crate::descriptor::SlotTable;
use crate::error::{Error, Result};
use scan::ScanState;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};

/// Block-0 magic identifier, matching `BT_IDENTIFIER` in the reference.
pub const IDENTIFIER: &[u8] = b"%BTDB";

/// Max descriptors open at once (§4.1).
pub const MAX_OPEN_FILES: usize = 20;
/// Max concurrently open scans (§4.1).
pub const MAX_SCANS: usize = 20;

const HEADER_FIELD1_TYPE: usize = IDENTIFIER.len();
const HEADER_FIELD1_LEN: usize = HEADER_FIELD1_TYPE + 1;
const HEADER_FIELD2_TYPE: usize = HEADER_FIELD1_LEN + 4;
const HEADER_FIELD2_LEN: usize = HEADER_FIELD2_TYPE + 1;
const HEADER_ROOT: usize = HEADER_FIELD2_LEN + 4;
const HEADER_DATA_HEAD: usize = HEADER_ROOT + 4;
const HEADER_DATA_TAIL: usize = HEADER_DATA_HEAD + 4;
const HEADER_SIZE: usize = HEADER_DATA_TAIL + 4;

struct OpenFile<const B: usize> {
    pool: BlockPool<B>,
    #[allow(dead_code)]
    path: PathBuf,
    field1: FieldDesc,
    field2: FieldDesc,
    root: BlockId,
    data_head: BlockId,
    data_tail: BlockId,
}

fn write_header<const B: usize>(
    block: &PinnedBlock<B>,
    field1: FieldDesc,
    field2: FieldDesc,
    root: BlockId,
    data_head: BlockId,
    data_tail: BlockId,
) -> Result<()> {
    let mut bytes = block.bytes_mut();
    bytes[..IDENTIFIER.len()].copy_from_slice(IDENTIFIER);
    bytes[HEADER_FIELD1_TYPE] = field1.kind.tag();
    write_i32(&mut &mut bytes[HEADER_FIELD1_LEN..HEADER_FIELD1_LEN + 4], field1.length)?;
    bytes[HEADER_FIELD2_TYPE] = field2.kind.tag();
    write_i32(&mut &mut bytes[HEADER_FIELD2_LEN..HEADER_FIELD2_LEN + 4], field2.length)?;
    write_i32(&mut &mut bytes[HEADER_ROOT..HEADER_ROOT + 4], root as i32)?;
    write_i32(&mut &mut bytes[HEADER_DATA_HEAD..HEADER_DATA_HEAD + 4], data_head as i32)?;
    write_i32(&mut &mut bytes[HEADER_DATA_TAIL..HEADER_DATA_TAIL + 4], data_tail as i32)?;
    Ok(())
}

#[allow(clippy::type_complexity)]
fn read_header<const B: usize>(
    block: &PinnedBlock<B>,
) -> Result<(FieldDesc, FieldDesc, BlockId, BlockId, BlockId)> {
    let bytes = block.bytes();
    if bytes[..IDENTIFIER.len()] != *IDENTIFIER {
        return Err(Error::IdentifierMismatch);
    }
    let t1 = FieldKind::from_tag(bytes[HEADER_FIELD1_TYPE]).ok_or(Error::IdentifierMismatch)?;
    let l1 = read_i32(&mut &bytes[HEADER_FIELD1_LEN..HEADER_FIELD1_LEN + 4])?;
    let t2 = FieldKind::from_tag(bytes[HEADER_FIELD2_TYPE]).ok_or(Error::IdentifierMismatch)?;
    let l2 = read_i32(&mut &bytes[HEADER_FIELD2_LEN..HEADER_FIELD2_LEN + 4])?;
    let root = read_i32(&mut &bytes[HEADER_ROOT..HEADER_ROOT + 4])? as u32;
    let data_head = read_i32(&mut &bytes[HEADER_DATA_HEAD..HEADER_DATA_HEAD + 4])? as u32;
    let data_tail = read_i32(&mut &bytes[HEADER_DATA_TAIL..HEADER_DATA_TAIL + 4])? as u32;
    Ok((
        FieldDesc::new(t1, l1),
        FieldDesc::new(t2, l2),
        root,
        data_head,
        data_tail,
    ))
}

/// The B+ tree access method engine, parameterized by block size `B`.
pub struct Am<const B: usize = 512> {
    files: SlotTable<OpenFile<B>>,
    scans: SlotTable<ScanState<B>>,
    pool_capacity: usize,
}

impl<const B: usize> Default for Am<B> {
    fn default() -> Self {
        Self::new(64)
    }
}

impl<const B: usize> Am<B> {
    /// Creates a fresh engine instance with `pool_capacity` resident block
    /// pool frames per opened file.
    #[must_use]
    pub fn new(pool_capacity: usize) -> Self {
        assert!(
            B >= HEADER_SIZE,
            "block size too small to hold the AM header"
        );
        Self {
            files: SlotTable::new(MAX_OPEN_FILES),
            scans: SlotTable::new(MAX_SCANS),
            pool_capacity,
        }
    }

    /// `CreateIndex(path, t1, len1, t2, len2)`.
    pub fn create_index(
        &self,
        path: impl AsRef<Path>,
        field1: FieldDesc,
        field2: FieldDesc,
    ) -> Result<()> {
        let path = path.as_ref();
        BlockPool::<B>::create_file(path)?;
        let pool = BlockPool::<B>::open_file(path, 1)?;
        {
            let header = pool.allocate_block()?;
            write_header(&header, field1, field2, 0, 0, 0)?;
        }
        pool.close()
    }

    /// `DestroyIndex`: refuses while any descriptor still references
    /// `path` (`FILE_IN_USE`).
    pub fn destroy_index(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if self.files.any(|f| f.path == path) {
            return Err(Error::FileInUse);
        }
        std::fs::remove_file(path).map_err(|_| Error::Destroy)
    }

    /// `OpenIndex`: opens and checks the block-0 identifier, caching the
    /// field descriptors and header pointers.
    pub fn open_index(&mut self, path: impl AsRef<Path>) -> Result<i32> {
        if self.files.is_full() {
            return Err(Error::MaxOpenFiles);
        }
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::FileNotFound);
        }
        let pool = BlockPool::<B>::open_file(path, self.pool_capacity)?;
        let (field1, field2, root, data_head, data_tail) = {
            let header = pool.get_block(0)?;
            match read_header(&header) {
                Ok(h) => h,
                Err(e) => {
                    drop(header);
                    pool.close()?;
                    return Err(e);
                }
            }
        };
        Ok(self
            .files
            .insert(OpenFile {
                pool,
                path: path.to_path_buf(),
                field1,
                field2,
                root,
                data_head,
                data_tail,
            })
            .expect("capacity checked above"))
    }

    /// `CloseIndex`: refuses if any open scan references `fd`; otherwise
    /// flushes the cached header back to block 0.
    pub fn close_index(&mut self, fd: i32) -> Result<()> {
        if self.scans.any(|s| s.fd == fd) {
            return Err(Error::FileInUse);
        }
        let entry = self.files.remove(fd)?;
        {
            let header = entry.pool.get_block(0)?;
            write_header(
                &header,
                entry.field1,
                entry.field2,
                entry.root,
                entry.data_head,
                entry.data_tail,
            )?;
        }
        entry.pool.close()
    }

    fn key_len(entry: &OpenFile<B>) -> usize {
        entry.field1.length as usize
    }

    fn value_len(entry: &OpenFile<B>) -> usize {
        entry.field2.length as usize
    }

    /// `bt_search`: descends from `root`, optionally pushing every
    /// internal node visited onto `stack`. Never called on an empty tree.
    fn bt_search(
        entry: &OpenFile<B>,
        value: &[u8],
        mut stack: Option<&mut Vec<BlockId>>,
    ) -> Result<BlockId> {
        let key_len = Self::key_len(entry);
        let mut current = entry.root;
        loop {
            let block = entry.pool.get_block(current)?;
            if node::is_leaf(&block.bytes()[..])? {
                return Ok(current);
            }
            if let Some(s) = stack.as_deref_mut() {
                s.push(current);
            }
            let i = node::node_find(&block.bytes()[..], key_len, entry.field1, value)?;
            current = node::pointer_at(&block.bytes()[..], key_len, i)?;
        }
    }

    /// `InsertEntry(value1, value2)`.
    pub fn insert_entry(&mut self, fd: i32, value1: &[u8], value2: &[u8]) -> Result<()> {
        let entry = self.files.get_mut(fd)?;
        let pool = entry.pool.clone();
        let key_len = entry.field1.length as usize;
        let value_len = entry.field2.length as usize;
        let field1 = entry.field1;

        if entry.root == 0 {
            log::debug!("am: bootstrapping empty tree");
            // §5 bounds every call to at most two simultaneous pins; each
            // block below is written and dropped (unpinned) before the next
            // is allocated, so this holds even at pool_capacity == 2.
            let root_id = pool.allocate_block()?.id();

            let right_id = {
                let right = pool.allocate_block()?;
                let mut bytes = right.bytes_mut();
                leaf::set_record_count(&mut bytes, 0)?;
                leaf::set_next_block(&mut bytes, 0)?;
                leaf::insert_leaf_nonfull(&mut bytes, key_len, value_len, field1, value1, value2)?;
                right.id()
            };

            let left_id = {
                let left = pool.allocate_block()?;
                let mut bytes = left.bytes_mut();
                leaf::set_record_count(&mut bytes, 0)?;
                leaf::set_next_block(&mut bytes, right_id)?;
                left.id()
            };

            {
                let root_block = pool.get_block(root_id)?;
                let mut bytes = root_block.bytes_mut();
                node::set_header(&mut bytes, false, 0)?;
                node::set_pointer_at(&mut bytes, key_len, 0, left_id)?;
                node::insert_node_nonfull(&mut bytes, key_len, field1, value1, right_id)?;
            }

            entry.root = root_id;
            entry.data_head = left_id;
            entry.data_tail = right_id;
            return Ok(());
        }

        let mut stack = Vec::new();
        let leaf_id = Self::bt_search(entry, value1, Some(&mut stack))?;
        let leaf_block = pool.get_block(leaf_id)?;

        if !leaf::leaf_full(&leaf_block.bytes()[..], B, key_len, value_len)? {
            let mut bytes = leaf_block.bytes_mut();
            leaf::insert_leaf_nonfull(&mut bytes, key_len, value_len, field1, value1, value2)?;
            return Ok(());
        }

        log::debug!("am: leaf {leaf_id} full, splitting");
        let sibling_block = pool.allocate_block()?;
        let sibling_id = sibling_block.id();
        let old_next = leaf::next_block(&leaf_block.bytes()[..])?;

        // split_leaf needs both halves writable at once; the pool's pinned
        // blocks share one RefCell, so stage the split in owned buffers and
        // write each block back with its own, non-overlapping bytes_mut().
        let mut leaf_buf = *leaf_block.bytes();
        let mut sib_buf = [0u8; B];
        let key_up = leaf::split_leaf(&mut leaf_buf, &mut sib_buf, key_len, value_len, field1)?
            .expect("sibling always receives at least one record: pivot <= mid < n");
        leaf::set_next_block(&mut sib_buf, old_next)?;
        leaf::set_next_block(&mut leaf_buf, sibling_id)?;
        leaf_block.bytes_mut().copy_from_slice(&leaf_buf);
        sibling_block.bytes_mut().copy_from_slice(&sib_buf);

        if leaf_id == entry.data_tail {
            entry.data_tail = sibling_id;
        }

        let insert_into_sibling = compare_key(field1, &key_up, value1)? != Ordering::Greater;
        if insert_into_sibling {
            let mut bytes = sibling_block.bytes_mut();
            leaf::insert_leaf_nonfull(&mut bytes, key_len, value_len, field1, value1, value2)?;
        } else {
            let mut bytes = leaf_block.bytes_mut();
            leaf::insert_leaf_nonfull(&mut bytes, key_len, value_len, field1, value1, value2)?;
        }
        drop(leaf_block);
        drop(sibling_block);

        let mut key_up = key_up;
        let mut pointer_up = sibling_id;

        while let Some(node_id) = stack.pop() {
            let node_block = pool.get_block(node_id)?;
            if !node::node_full(&node_block.bytes()[..], B, key_len)? {
                let mut bytes = node_block.bytes_mut();
                node::insert_node_nonfull(&mut bytes, key_len, field1, &key_up, pointer_up)?;
                return Ok(());
            }

            log::debug!("am: node {node_id} full, splitting");
            let key_from_below = key_up.clone();
            let pointer_from_below = pointer_up;
            let new_sibling = pool.allocate_block()?;

            // Same staging-in-owned-buffers trick as the leaf split above:
            // node_block and new_sibling share the pool's single RefCell.
            let mut node_buf = *node_block.bytes();
            let mut sib_buf = [0u8; B];
            let new_key_up = node::split_node(&mut node_buf, &mut sib_buf, key_len)?;

            let target_is_left = compare_key(field1, &key_from_below, &new_key_up)? != Ordering::Greater;
            if target_is_left {
                node::insert_node_nonfull(&mut node_buf, key_len, field1, &key_from_below, pointer_from_below)?;
            } else {
                node::insert_node_nonfull(&mut sib_buf, key_len, field1, &key_from_below, pointer_from_below)?;
            }
            node_block.bytes_mut().copy_from_slice(&node_buf);
            new_sibling.bytes_mut().copy_from_slice(&sib_buf);

            key_up = new_key_up;
            pointer_up = new_sibling.id();
        }

        let new_root = pool.allocate_block()?;
        {
            let mut bytes = new_root.bytes_mut();
            node::set_header(&mut bytes, false, 0)?;
            node::set_pointer_at(&mut bytes, key_len, 0, entry.root)?;
        }
        {
            let mut bytes = new_root.bytes_mut();
            node::insert_node_nonfull(&mut bytes, key_len, field1, &key_up, pointer_up)?;
        }
        entry.root = new_root.id();
        Ok(())
    }

    /// `OpenIndexScan(desc, op, value)`.
    pub fn open_index_scan(&mut self, fd: i32, op: ScanOp, value: &[u8]) -> Result<i32> {
        if self.scans.is_full() {
            return Err(Error::MaxScans);
        }
        let entry = self.files.get(fd)?;
        let key_len = Self::key_len(entry);
        let value_len = Self::value_len(entry);

        if entry.root == 0 {
            let scan = ScanState {
                fd,
                op,
                value: value.to_vec(),
                next_entry: 0,
                end_block: 0,
                end_entry: -1,
                pinned: None,
                done: true,
            };
            return Ok(self.scans.insert(scan).expect("capacity checked above"));
        }

        let init_op = if op == ScanOp::NotEqual { ScanOp::LessThan } else { op };

        let (start_block, start_entry, end_block, end_entry) = match init_op {
            ScanOp::Equal => {
                let leaf_id = Self::bt_search(entry, value, None)?;
                let block = entry.pool.get_block(leaf_id)?;
                let first = leaf::leaf_find_first(&block.bytes()[..], key_len, value_len, entry.field1, value)?;
                let last = leaf::leaf_find_last(&block.bytes()[..], key_len, value_len, entry.field1, value)?;
                (leaf_id, first, leaf_id, last)
            }
            ScanOp::LessThan => {
                let leaf_id = Self::bt_search(entry, value, None)?;
                let block = entry.pool.get_block(leaf_id)?;
                let first = leaf::leaf_find_first(&block.bytes()[..], key_len, value_len, entry.field1, value)?;
                (entry.data_head, 0, leaf_id, first as i64 - 1)
            }
            ScanOp::LessThanOrEqual => {
                let leaf_id = Self::bt_search(entry, value, None)?;
                let block = entry.pool.get_block(leaf_id)?;
                let last = leaf::leaf_find_last(&block.bytes()[..], key_len, value_len, entry.field1, value)?;
                (entry.data_head, 0, leaf_id, last)
            }
            ScanOp::GreaterThan => {
                let leaf_id = Self::bt_search(entry, value, None)?;
                let block = entry.pool.get_block(leaf_id)?;
                let last = leaf::leaf_find_last(&block.bytes()[..], key_len, value_len, entry.field1, value)?;
                let tail = entry.pool.get_block(entry.data_tail)?;
                let tail_count = leaf::record_count(&tail.bytes()[..])? as i64;
                (leaf_id, (last + 1) as usize, entry.data_tail, tail_count - 1)
            }
            ScanOp::GreaterThanOrEqual => {
                let leaf_id = Self::bt_search(entry, value, None)?;
                let block = entry.pool.get_block(leaf_id)?;
                let first = leaf::leaf_find_first(&block.bytes()[..], key_len, value_len, entry.field1, value)?;
                let tail = entry.pool.get_block(entry.data_tail)?;
                let tail_count = leaf::record_count(&tail.bytes()[..])? as i64;
                (leaf_id, first, entry.data_tail, tail_count - 1)
            }
            ScanOp::NotEqual => unreachable!("init_op never NotEqual"),
        };

        let pinned = entry.pool.get_block(start_block)?;
        let scan = ScanState {
            fd,
            op,
            value: value.to_vec(),
            next_entry: start_entry,
            end_block,
            end_entry,
            pinned: Some(pinned),
            done: false,
        };
        Ok(self.scans.insert(scan).expect("capacity checked above"))
    }

    /// `FindNextEntry(scand)`: returns an owned copy of `field2` (see
    /// `DESIGN.md` for why this isn't a page-aliasing raw pointer), or
    /// `None` at EOF.
    pub fn find_next_entry(&mut self, scand: i32) -> Result<Option<Vec<u8>>> {
        let scan = self.scans.get_mut(scand)?;
        if scan.done {
            return Ok(None);
        }
        let entry = self.files.get(scan.fd)?;
        let key_len = Self::key_len(entry);
        let value_len = Self::value_len(entry);

        loop {
            let current_block = scan.pinned.as_ref().expect("non-terminal scan is pinned").id();
            let count = {
                let block = scan.pinned.as_ref().unwrap();
                leaf::record_count(&block.bytes()[..])? as usize
            };

            let exceeded = current_block == scan.end_block && scan.next_entry as i64 > scan.end_entry;
            if exceeded {
                if scan.op == ScanOp::NotEqual {
                    let block = scan.pinned.as_ref().unwrap();
                    let next_entry = (leaf::leaf_find_last(
                        &block.bytes()[..],
                        key_len,
                        value_len,
                        entry.field1,
                        &scan.value,
                    )? + 1) as usize;
                    let tail = entry.pool.get_block(entry.data_tail)?;
                    let tail_count = leaf::record_count(&tail.bytes()[..])? as i64;
                    scan.op = ScanOp::GreaterThan;
                    scan.next_entry = next_entry;
                    scan.end_block = entry.data_tail;
                    scan.end_entry = tail_count - 1;
                    continue;
                }
                scan.done = true;
                scan.pinned = None;
                return Ok(None);
            }

            if scan.next_entry == count {
                let next = {
                    let block = scan.pinned.as_ref().unwrap();
                    leaf::next_block(&block.bytes()[..])?
                };
                scan.pinned = Some(entry.pool.get_block(next)?);
                scan.next_entry = 0;
                continue;
            }

            let value = {
                let block = scan.pinned.as_ref().unwrap();
                leaf::field2_at(&block.bytes()[..], key_len, value_len, scan.next_entry)
            };
            scan.next_entry += 1;
            return Ok(Some(value));
        }
    }

    /// `CloseIndexScan`: drops the scan, releasing its pin if still held.
    pub fn close_index_scan(&mut self, scand: i32) -> Result<()> {
        self.scans.remove(scand)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    /// Bootstrapping an empty tree allocates three blocks (root, left leaf,
    /// right leaf); §5 allows a call at most two simultaneous pins, so this
    /// must succeed even when the pool can only hold two frames at once.
    #[test]
    fn bootstrap_insert_respects_minimal_pool_capacity() -> Result<()> {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("am.db");
        let int_desc = FieldDesc::new(FieldKind::Int, 4);

        let mut am = Am::<512>::new(2);
        am.create_index(&path, int_desc, int_desc)?;
        let fd = am.open_index(&path)?;

        am.insert_entry(fd, &encode_int(1), &encode_int(10))?;

        let scand = am.open_index_scan(fd, ScanOp::Equal, &encode_int(1))?;
        assert_eq!(am.find_next_entry(scand)?, Some(encode_int(10)));
        assert_eq!(am.find_next_entry(scand)?, None);
        am.close_index_scan(scand)?;
        am.close_index(fd)?;
        Ok(())
    }
}

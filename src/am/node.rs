// Copyright (c) 2024-present, ixdb contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! AM internal node layout: `is_leaf=0`, `key_count`, alternating
//! `[p0,k0,p1,k1,...,k_{n-1},pn]`. Grounded on `BT.c`'s `pointer`/`key`
//! accessors, `node_find`, `split_node`, and `insert_node_nonfull`.

use super::key::{compare_key, FieldDesc};
use crate::bp::BlockId;
use crate::coding::{read_i32, write_i32};
use std::cmp::Ordering;
use std::io;

pub const HEADER_SIZE: usize = 4;
const IS_LEAF_BIT: u32 = 1 << 31;

/// Packs `is_leaf`/`key_count` into the header word, matching the C
/// bitfield `key_count : 31, is_leaf : 1`.
pub fn pack_header(is_leaf: bool, count: u32) -> u32 {
    let mut word = count & !IS_LEAF_BIT;
    if is_leaf {
        word |= IS_LEAF_BIT;
    }
    word
}

/// Inverse of [`pack_header`].
pub fn unpack_header(word: u32) -> (bool, u32) {
    (word & IS_LEAF_BIT != 0, word & !IS_LEAF_BIT)
}

pub fn is_leaf(raw: &[u8]) -> io::Result<bool> {
    let word = read_i32(&mut &raw[..4])? as u32;
    Ok(unpack_header(word).0)
}

pub fn key_count(raw: &[u8]) -> io::Result<u32> {
    let word = read_i32(&mut &raw[..4])? as u32;
    Ok(unpack_header(word).1)
}

pub fn set_header(raw: &mut [u8], is_leaf: bool, count: u32) -> io::Result<()> {
    write_i32(&mut &mut raw[..4], pack_header(is_leaf, count) as i32)
}

fn stride(key_len: usize) -> usize {
    4 + key_len
}

fn pointer_offset(key_len: usize, i: usize) -> usize {
    HEADER_SIZE + i * stride(key_len)
}

fn key_offset(key_len: usize, i: usize) -> usize {
    HEADER_SIZE + i * stride(key_len) + 4
}

pub fn pointer_at(raw: &[u8], key_len: usize, i: usize) -> io::Result<BlockId> {
    let off = pointer_offset(key_len, i);
    Ok(read_i32(&mut &raw[off..off + 4])? as u32)
}

pub fn set_pointer_at(raw: &mut [u8], key_len: usize, i: usize, value: BlockId) -> io::Result<()> {
    let off = pointer_offset(key_len, i);
    write_i32(&mut &mut raw[off..off + 4], value as i32)
}

pub fn key_at(raw: &[u8], key_len: usize, i: usize) -> Vec<u8> {
    let off = key_offset(key_len, i);
    raw[off..off + key_len].to_vec()
}

pub fn set_key_at(raw: &mut [u8], key_len: usize, i: usize, value: &[u8]) {
    let off = key_offset(key_len, i);
    raw[off..off + key_len].copy_from_slice(value);
}

/// Max `key_count` this node can hold at this block size / key width.
pub fn max_key_count(block_size: usize, key_len: usize) -> usize {
    (block_size - HEADER_SIZE - 4) / (key_len + 4)
}

pub fn node_full(raw: &[u8], block_size: usize, key_len: usize) -> io::Result<bool> {
    Ok(key_count(raw)? as usize >= max_key_count(block_size, key_len))
}

/// `node_find`: the smallest `i` such that `compare_key(key[i], value) > 0`,
/// equivalently walking while `key[i] <= value`. Used both by `bt_search`'s
/// descent and by [`insert_node_nonfull`]'s insertion point.
pub fn node_find(raw: &[u8], key_len: usize, desc: FieldDesc, value: &[u8]) -> io::Result<usize> {
    let count = key_count(raw)? as usize;
    let mut i = 0;
    while i < count && compare_key(desc, &key_at(raw, key_len, i), value)? != Ordering::Greater {
        i += 1;
    }
    Ok(i)
}

/// Inserts `(key_up, pointer_up)` into a node known not to be full.
pub fn insert_node_nonfull(
    raw: &mut [u8],
    key_len: usize,
    desc: FieldDesc,
    key_up: &[u8],
    pointer_up: BlockId,
) -> io::Result<()> {
    let count = key_count(raw)? as usize;
    let pos = node_find(raw, key_len, desc, key_up)?;

    let mut i = count;
    while i > pos {
        let moved_key = key_at(raw, key_len, i - 1);
        set_key_at(raw, key_len, i, &moved_key);
        let moved_ptr = pointer_at(raw, key_len, i)?;
        set_pointer_at(raw, key_len, i + 1, moved_ptr)?;
        i -= 1;
    }
    set_key_at(raw, key_len, pos, key_up);
    set_pointer_at(raw, key_len, pos + 1, pointer_up)?;
    set_header(raw, false, count as u32 + 1)
}

/// `split_node`: the middle key `k_m` (`m = key_count/2`) moves up. The
/// node keeps `[p0..pm]` with `key_count = m`; the new sibling (written
/// into `sibling_raw`, a freshly zeroed block) receives
/// `[p_{m+1}..pn]` with `key_count = n-m-1`. Returns `key_up`.
pub fn split_node(raw: &mut [u8], sibling_raw: &mut [u8], key_len: usize) -> io::Result<Vec<u8>> {
    let n = key_count(raw)? as usize;
    let m = n / 2;
    let key_up = key_at(raw, key_len, m);

    for j in (m + 1)..n {
        let k = key_at(raw, key_len, j);
        set_key_at(sibling_raw, key_len, j - m - 1, &k);
        let p = pointer_at(raw, key_len, j)?;
        set_pointer_at(sibling_raw, key_len, j - m - 1, p)?;
    }
    let last_ptr = pointer_at(raw, key_len, n)?;
    set_pointer_at(sibling_raw, key_len, n - m - 1, last_ptr)?;

    set_header(sibling_raw, false, (n - m - 1) as u32)?;
    set_header(raw, false, m as u32)?;
    Ok(key_up)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::am::key::FieldKind;

    fn desc() -> FieldDesc {
        FieldDesc::new(FieldKind::Int, 4)
    }

    #[test]
    fn header_round_trips() {
        let mut buf = vec![0u8; 64];
        set_header(&mut buf, false, 3).unwrap();
        assert!(!is_leaf(&buf).unwrap());
        assert_eq!(key_count(&buf).unwrap(), 3);
    }

    #[test]
    fn insert_keeps_sorted_order() {
        let mut buf = vec![0u8; 128];
        set_header(&mut buf, false, 0).unwrap();
        set_pointer_at(&mut buf, 4, 0, 100).unwrap();

        for (k, p) in [(10, 1), (30, 3), (20, 2)] {
            insert_node_nonfull(&mut buf, 4, desc(), &crate::am::key::encode_int(k), p).unwrap();
        }

        assert_eq!(key_count(&buf).unwrap(), 3);
        let keys: Vec<i32> = (0..3)
            .map(|i| {
                let bytes = key_at(&buf, 4, i);
                crate::coding::read_i32(&mut &bytes[..]).unwrap()
            })
            .collect();
        assert_eq!(keys, vec![10, 20, 30]);
    }
}

// Copyright (c) 2024-present, ixdb contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! AM leaf layout: `is_leaf=1`, `record_count`, `next_block`, followed by
//! packed `[field1, field2]` records. Grounded on `BT.c`'s `record`/
//! `set_record`, `split_leaf`, `leaf_find_first`, `leaf_find_last`, and
//! `insert_leaf_nonfull`.

use super::key::{compare_key, FieldDesc};
use crate::bp::BlockId;
use crate::coding::{read_i32, write_i32};
use std::cmp::Ordering;
use std::io;

pub const HEADER_SIZE: usize = 8;
const IS_LEAF_BIT: u32 = 1 << 31;

pub fn pack_header(count: u32) -> u32 {
    count | IS_LEAF_BIT
}

pub fn record_count(raw: &[u8]) -> io::Result<u32> {
    let word = read_i32(&mut &raw[..4])? as u32;
    Ok(word & !IS_LEAF_BIT)
}

pub fn set_record_count(raw: &mut [u8], count: u32) -> io::Result<()> {
    write_i32(&mut &mut raw[..4], pack_header(count) as i32)
}

pub fn next_block(raw: &[u8]) -> io::Result<BlockId> {
    Ok(read_i32(&mut &raw[4..8])? as u32)
}

pub fn set_next_block(raw: &mut [u8], value: BlockId) -> io::Result<()> {
    write_i32(&mut &mut raw[4..8], value as i32)
}

fn stride(key_len: usize, value_len: usize) -> usize {
    key_len + value_len
}

fn record_offset(key_len: usize, value_len: usize, i: usize) -> usize {
    HEADER_SIZE + i * stride(key_len, value_len)
}

pub fn field1_at(raw: &[u8], key_len: usize, value_len: usize, i: usize) -> Vec<u8> {
    let off = record_offset(key_len, value_len, i);
    raw[off..off + key_len].to_vec()
}

pub fn field2_at(raw: &[u8], key_len: usize, value_len: usize, i: usize) -> Vec<u8> {
    let off = record_offset(key_len, value_len, i) + key_len;
    raw[off..off + value_len].to_vec()
}

pub fn set_record_at(
    raw: &mut [u8],
    key_len: usize,
    value_len: usize,
    i: usize,
    field1: &[u8],
    field2: &[u8],
) {
    let off = record_offset(key_len, value_len, i);
    raw[off..off + key_len].copy_from_slice(field1);
    raw[off + key_len..off + key_len + value_len].copy_from_slice(field2);
}

pub fn max_record_count(block_size: usize, key_len: usize, value_len: usize) -> usize {
    (block_size - HEADER_SIZE) / stride(key_len, value_len)
}

pub fn leaf_full(raw: &[u8], block_size: usize, key_len: usize, value_len: usize) -> io::Result<bool> {
    Ok(record_count(raw)? as usize >= max_record_count(block_size, key_len, value_len))
}

/// Smallest `i` in `[0, record_count]` with `field1[i] >= value`.
pub fn leaf_find_first(
    raw: &[u8],
    key_len: usize,
    value_len: usize,
    desc: FieldDesc,
    value: &[u8],
) -> io::Result<usize> {
    let count = record_count(raw)? as usize;
    let mut i = 0;
    while i < count
        && compare_key(desc, &field1_at(raw, key_len, value_len, i), value)? == Ordering::Less
    {
        i += 1;
    }
    Ok(i)
}

/// Largest `i` in `[-1, record_count-1]` with `field1[i] <= value`
/// (`-1` meaning no such index).
pub fn leaf_find_last(
    raw: &[u8],
    key_len: usize,
    value_len: usize,
    desc: FieldDesc,
    value: &[u8],
) -> io::Result<i64> {
    let count = record_count(raw)? as usize;
    let mut i: i64 = -1;
    for idx in 0..count {
        if compare_key(desc, &field1_at(raw, key_len, value_len, idx), value)? != Ordering::Greater
        {
            i = idx as i64;
        } else {
            break;
        }
    }
    Ok(i)
}

/// Inserts `(field1, field2)` into a leaf known not to be full, at
/// `leaf_find_last(field1) + 1` (Open Question 3: relies on the
/// `find_last < find_first` sentinel when `field1` is absent).
pub fn insert_leaf_nonfull(
    raw: &mut [u8],
    key_len: usize,
    value_len: usize,
    desc: FieldDesc,
    field1: &[u8],
    field2: &[u8],
) -> io::Result<()> {
    let count = record_count(raw)? as usize;
    let pos = (leaf_find_last(raw, key_len, value_len, desc, field1)? + 1) as usize;

    let mut i = count;
    while i > pos {
        let f1 = field1_at(raw, key_len, value_len, i - 1);
        let f2 = field2_at(raw, key_len, value_len, i - 1);
        set_record_at(raw, key_len, value_len, i, &f1, &f2);
        i -= 1;
    }
    set_record_at(raw, key_len, value_len, pos, field1, field2);
    set_record_count(raw, count as u32 + 1)
}

/// `split_leaf`: `mid = record_count/2`; `pivot` is the first index whose
/// key equals `records[mid].field1`. Records `[pivot, n)` move into
/// `sibling_raw`. Does not touch `next_block` linkage (the caller wires
/// that up once it knows the sibling's block index). Returns
/// `key_up = sibling.records[0].field1`, or `None` if the leaf ends up
/// with zero records after the split (possible when duplicates of the
/// pivot key fill the whole leaf, Open Question 4).
pub fn split_leaf(
    raw: &mut [u8],
    sibling_raw: &mut [u8],
    key_len: usize,
    value_len: usize,
    desc: FieldDesc,
) -> io::Result<Option<Vec<u8>>> {
    let n = record_count(raw)? as usize;
    let mid = n / 2;
    let mid_key = field1_at(raw, key_len, value_len, mid);
    let pivot = leaf_find_first(raw, key_len, value_len, desc, &mid_key)?;

    for (dst, src) in (pivot..n).enumerate() {
        let f1 = field1_at(raw, key_len, value_len, src);
        let f2 = field2_at(raw, key_len, value_len, src);
        set_record_at(sibling_raw, key_len, value_len, dst, &f1, &f2);
    }

    set_record_count(sibling_raw, (n - pivot) as u32)?;
    set_record_count(raw, pivot as u32)?;

    if n - pivot == 0 {
        Ok(None)
    } else {
        Ok(Some(field1_at(sibling_raw, key_len, value_len, 0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::am::key::{encode_int, FieldKind};

    fn desc() -> FieldDesc {
        FieldDesc::new(FieldKind::Int, 4)
    }

    #[test]
    fn find_first_last_sentinels() {
        let mut buf = vec![0u8; 64];
        set_record_count(&mut buf, 0).unwrap();
        for (i, k) in [10, 20, 30].into_iter().enumerate() {
            set_record_at(&mut buf, 4, 4, i, &encode_int(k), &encode_int(k * 10));
        }
        set_record_count(&mut buf, 3).unwrap();

        assert_eq!(
            leaf_find_first(&buf, 4, 4, desc(), &encode_int(20)).unwrap(),
            1
        );
        assert_eq!(
            leaf_find_last(&buf, 4, 4, desc(), &encode_int(20)).unwrap(),
            1
        );
        assert_eq!(
            leaf_find_last(&buf, 4, 4, desc(), &encode_int(5)).unwrap(),
            -1
        );
        assert_eq!(
            leaf_find_first(&buf, 4, 4, desc(), &encode_int(35)).unwrap(),
            3
        );
    }

    #[test]
    fn insert_nonfull_keeps_order() {
        let mut buf = vec![0u8; 128];
        set_record_count(&mut buf, 0).unwrap();
        for k in [5, 1, 3] {
            insert_leaf_nonfull(&mut buf, 4, 4, desc(), &encode_int(k), &encode_int(k)).unwrap();
        }
        let keys: Vec<i32> = (0..3)
            .map(|i| {
                let b = field1_at(&buf, 4, 4, i);
                crate::coding::read_i32(&mut &b[..]).unwrap()
            })
            .collect();
        assert_eq!(keys, vec![1, 3, 5]);
    }
}

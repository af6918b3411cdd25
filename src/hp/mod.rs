// Copyright (c) 2024-present, ixdb contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! HP: an append-oriented heap file of fixed-length [`Record`]s.
//!
//! Block 0 holds only the magic identifier. Every later block is a data
//! block: a 32-bit record count followed by a packed, fixed-size record
//! array. Grounded on `heap_file.c`.

use crate::bp::BlockPool;
use crate::coding::{fit_to_len, read_u32, write_u32, Decode, Encode};
use crate::descriptor::SlotTable;
use crate::error::{Error, Result};
use crate::record::{Record, RECORD_SIZE};
use std::path::{Path, PathBuf};

/// Block-0 magic identifier, matching `HP_IDENTIFIER` in the reference.
pub const IDENTIFIER: &[u8] = b"%HPDB\n";

const COUNT_SIZE: usize = 4;

/// Maximum descriptors this engine can have open at once (§4.1).
pub const MAX_OPEN_FILES: usize = 20;

struct OpenFile<const B: usize> {
    pool: BlockPool<B>,
    #[allow(dead_code)]
    path: PathBuf,
}

/// The heap file engine, parameterized by block size `B`.
pub struct Hp<const B: usize = 512> {
    files: SlotTable<OpenFile<B>>,
    pool_capacity: usize,
}

impl<const B: usize> Default for Hp<B> {
    fn default() -> Self {
        Self::new(64)
    }
}

impl<const B: usize> Hp<B> {
    /// Max records a data block can hold.
    pub const CAPACITY: usize = (B - COUNT_SIZE) / RECORD_SIZE;

    /// Creates a fresh engine instance with `pool_capacity` resident block
    /// pool frames per opened file.
    #[must_use]
    pub fn new(pool_capacity: usize) -> Self {
        assert!(Self::CAPACITY > 0, "block size too small for one record");
        Self {
            files: SlotTable::new(MAX_OPEN_FILES),
            pool_capacity,
        }
    }

    /// `CreateFile`: allocates block 0, writes the identifier, closes.
    pub fn create_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        BlockPool::<B>::create_file(path)?;
        let pool = BlockPool::<B>::open_file(path, 1)?;
        {
            let header = pool.allocate_block()?;
            header.bytes_mut()[..IDENTIFIER.len()].copy_from_slice(IDENTIFIER);
        }
        pool.close()
    }

    /// `OpenFile`: opens and checks the block-0 identifier.
    pub fn open_file(&mut self, path: impl AsRef<Path>) -> Result<i32> {
        if self.files.is_full() {
            return Err(Error::MaxOpenFiles);
        }
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::FileNotFound);
        }
        let pool = BlockPool::<B>::open_file(path, self.pool_capacity)?;
        {
            let header = pool.get_block(0)?;
            if header.bytes()[..IDENTIFIER.len()] != *IDENTIFIER {
                drop(header);
                pool.close()?;
                return Err(Error::IdentifierMismatch);
            }
        }
        Ok(self
            .files
            .insert(OpenFile {
                pool,
                path: path.to_path_buf(),
            })
            .expect("capacity checked above"))
    }

    /// `CloseFile`: flushes dirty pages and releases the descriptor.
    pub fn close_file(&mut self, fd: i32) -> Result<()> {
        let entry = self.files.remove(fd)?;
        entry.pool.close()
    }

    /// `InsertEntry`: appends `record` to the last data block, allocating
    /// a new one if the file has only its header, or the last block is
    /// full.
    pub fn insert_entry(&mut self, fd: i32, record: &Record) -> Result<()> {
        let entry = self.files.get(fd)?;
        let count = entry.pool.block_counter();

        let block = if count == 1 {
            log::debug!("hp: first data block");
            entry.pool.allocate_block()?
        } else {
            let last = entry.pool.get_block(count - 1)?;
            let used = read_u32(&mut &last.bytes()[..COUNT_SIZE])? as usize;
            if used >= Self::CAPACITY {
                drop(last);
                entry.pool.allocate_block()?
            } else {
                last
            }
        };

        let used = read_u32(&mut &block.bytes()[..COUNT_SIZE])? as usize;
        let offset = COUNT_SIZE + used * RECORD_SIZE;
        {
            let mut bytes = block.bytes_mut();
            let mut slice = &mut bytes[offset..offset + RECORD_SIZE];
            record.encode_into(&mut slice)?;
        }
        {
            let mut bytes = block.bytes_mut();
            let mut slice = &mut bytes[..COUNT_SIZE];
            write_u32(&mut slice, (used + 1) as u32)?;
        }
        Ok(())
    }

    /// Computes the `(offset, len, expected)` byte window `print_all_entries`
    /// compares a record against: `len` is `strlen(value)+1` to include the
    /// NUL terminator (mirroring `heap_file.c`'s `memcmp`, length capped at
    /// the field's full width), and `expected` is `value` padded out to
    /// `len` so a plain slice comparison also checks that trailing NUL —
    /// matching `"Smith"` must not also match `"Smithson"`.
    fn build_filter(attr_name: &str, value: &[u8]) -> Result<(usize, usize, Vec<u8>)> {
        let (offset, full_len) = Record::attribute_range(attr_name).ok_or(Error::InvalidOp)?;
        let len = if attr_name == "id" { full_len } else { (value.len() + 1).min(full_len) };
        Ok((offset, len, fit_to_len(value, len)))
    }

    /// `PrintAllEntries`: prints every record, or only those whose
    /// attribute byte window equals `value`.
    pub fn print_all_entries(&self, fd: i32, attr_name: &str, value: Option<&[u8]>) -> Result<()> {
        let entry = self.files.get(fd)?;
        let window = match value {
            None => None,
            Some(v) => Some(Self::build_filter(attr_name, v)?),
        };

        let count = entry.pool.block_counter();
        for block_id in 1..count {
            let block = entry.pool.get_block(block_id)?;
            let used = read_u32(&mut &block.bytes()[..COUNT_SIZE])? as usize;
            for slot in 0..used {
                let start = COUNT_SIZE + slot * RECORD_SIZE;
                let raw = &block.bytes()[start..start + RECORD_SIZE];
                let matches = match &window {
                    None => true,
                    Some((offset, len, expected)) => raw[*offset..*offset + *len] == expected[..],
                };
                if matches {
                    let record = Record::decode_from(&mut &raw[..])?;
                    println!(
                        "{}\t{}\t{}\t{}",
                        record.id,
                        Record::trimmed(&record.name),
                        Record::trimmed(&record.surname),
                        Record::trimmed(&record.city)
                    );
                }
            }
        }
        Ok(())
    }

    /// `GetEntry`: record `row_id` lives in block `1 + row_id / L` at slot
    /// `row_id mod L`.
    pub fn get_entry(&self, fd: i32, row_id: u32) -> Result<Record> {
        let entry = self.files.get(fd)?;
        let block_id = 1 + row_id / Self::CAPACITY as u32;
        let slot = (row_id % Self::CAPACITY as u32) as usize;
        let block = entry.pool.get_block(block_id)?;
        let start = COUNT_SIZE + slot * RECORD_SIZE;
        Record::decode_from(&mut &block.bytes()[start..start + RECORD_SIZE])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn db_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("heap.db")
    }

    #[test]
    fn create_open_close_round_trip() -> Result<()> {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = db_path(&dir);
        let mut hp = Hp::<128>::new(8);
        hp.create_file(&path)?;
        let fd = hp.open_file(&path)?;
        hp.close_file(fd)?;
        Ok(())
    }

    #[test]
    fn insert_and_get_ordinal() -> Result<()> {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = db_path(&dir);
        let mut hp = Hp::<96>::new(8);
        hp.create_file(&path)?;
        let fd = hp.open_file(&path)?;

        for i in 0..30 {
            let record = Record::new(i, b"Name", b"Surname", b"City");
            hp.insert_entry(fd, &record)?;
        }

        for i in 0..30 {
            let record = hp.get_entry(fd, i as u32)?;
            assert_eq!(record.id, i);
        }
        hp.close_file(fd)?;
        Ok(())
    }

    #[test]
    fn value_filter_is_exact_not_prefix() -> Result<()> {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = db_path(&dir);
        let mut hp = Hp::<256>::new(8);
        hp.create_file(&path)?;
        let fd = hp.open_file(&path)?;

        let smith = Record::new(1, b"A", b"Smith", b"City");
        let smithson = Record::new(2, b"B", b"Smithson", b"City");
        hp.insert_entry(fd, &smith)?;
        hp.insert_entry(fd, &smithson)?;

        let (offset, len, expected) = Hp::<256>::build_filter("surname", b"Smith")?;
        let mut smith_bytes = Vec::new();
        smith.encode_into(&mut smith_bytes)?;
        let mut smithson_bytes = Vec::new();
        smithson.encode_into(&mut smithson_bytes)?;

        assert_eq!(smith_bytes[offset..offset + len], expected[..]);
        assert_ne!(smithson_bytes[offset..offset + len], expected[..]);

        hp.print_all_entries(fd, "surname", Some(b"Smith"))?;
        hp.close_file(fd)?;
        Ok(())
    }

    #[test]
    fn open_rejects_bad_identifier() -> Result<()> {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("not_hp.db");
        BlockPool::<128>::create_file(&path)?;
        {
            let pool = BlockPool::<128>::open_file(&path, 1)?;
            pool.allocate_block()?;
            pool.close()?;
        }
        let mut hp = Hp::<128>::new(4);
        assert!(matches!(hp.open_file(&path), Err(Error::IdentifierMismatch)));
        Ok(())
    }
}

// Copyright (c) 2024-present, ixdb contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! HT: a static hash index of fixed-length [`Record`]s, with a block-level
//! directory and overflow chaining.
//!
//! Grounded on `hash_file.c`: `__HT_GetBucketNum`'s CREATE/TEST directory
//! lookup, `HT_InsertEntry`'s overflow-chain walk, and `HT_PrintAllEntries`'s
//! `[dataStart, blockCounter)` linear scan.

use crate::bp::{BlockId, BlockPool, PinnedBlock};
use crate::coding::{read_i32, read_u32, write_i32, write_u32, Decode, Encode};
use crate::descriptor::SlotTable;
use crate::error::{Error, Result};
use crate::record::{Record, RECORD_SIZE};
use std::path::{Path, PathBuf};

/// Block-0 magic identifier, matching `HT_IDENTIFIER` in the reference.
pub const IDENTIFIER: &[u8] = b"%HASHDB";

const OVERFLOW_SIZE: usize = 4;
const RECORD_COUNT_SIZE: usize = 4;
const BUCKET_HEADER_SIZE: usize = OVERFLOW_SIZE + RECORD_COUNT_SIZE;

/// Max descriptors open at once (§4.1).
pub const MAX_OPEN_FILES: usize = 20;

/// Whether a directory lookup may allocate a missing bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LookupMode {
    Create,
    Test,
}

struct OpenFile<const B: usize> {
    pool: BlockPool<B>,
    buckets: u32,
    data_start: u32,
    #[allow(dead_code)]
    path: PathBuf,
}

/// The static hash index engine, parameterized by block size `B`.
pub struct Ht<const B: usize = 512> {
    files: SlotTable<OpenFile<B>>,
    pool_capacity: usize,
}

impl<const B: usize> Default for Ht<B> {
    fn default() -> Self {
        Self::new(64)
    }
}

impl<const B: usize> Ht<B> {
    /// Directory mappings per directory block.
    pub const MAPS_PER_BLOCK: usize = B / 4;
    /// Max records a bucket/overflow block can hold.
    pub const CAPACITY: usize = (B - BUCKET_HEADER_SIZE) / RECORD_SIZE;

    /// Creates a fresh engine instance with `pool_capacity` resident block
    /// pool frames per opened file.
    #[must_use]
    pub fn new(pool_capacity: usize) -> Self {
        assert!(Self::CAPACITY > 0, "block size too small for one record");
        assert!(Self::MAPS_PER_BLOCK > 0, "block size too small for a directory slot");
        Self {
            files: SlotTable::new(MAX_OPEN_FILES),
            pool_capacity,
        }
    }

    /// `CreateIndex`: writes the header and a zeroed directory.
    pub fn create_index(&self, path: impl AsRef<Path>, buckets: u32) -> Result<()> {
        assert!(buckets > 0, "buckets must be positive");
        let path = path.as_ref();
        BlockPool::<B>::create_file(path)?;
        let map_blocks = (buckets - 1) / Self::MAPS_PER_BLOCK as u32 + 1;
        let data_start = map_blocks + 1;

        let pool = BlockPool::<B>::open_file(path, map_blocks as usize + 2)?;
        {
            let header = pool.allocate_block()?;
            let mut bytes = header.bytes_mut();
            bytes[..IDENTIFIER.len()].copy_from_slice(IDENTIFIER);
            write_i32(&mut &mut bytes[8..12], buckets as i32)?;
            write_i32(&mut &mut bytes[12..16], data_start as i32)?;
        }
        for _ in 0..map_blocks {
            pool.allocate_block()?; // zero-filled: every directory slot unallocated
        }
        pool.close()
    }

    /// `OpenIndex`: opens and checks the block-0 identifier, caching
    /// `buckets`/`dataStart`.
    pub fn open_index(&mut self, path: impl AsRef<Path>) -> Result<i32> {
        if self.files.is_full() {
            return Err(Error::MaxOpenFiles);
        }
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::FileNotFound);
        }
        let pool = BlockPool::<B>::open_file(path, self.pool_capacity)?;
        let (buckets, data_start) = {
            let header = pool.get_block(0)?;
            let bytes = header.bytes();
            if bytes[..IDENTIFIER.len()] != *IDENTIFIER {
                drop(bytes);
                drop(header);
                pool.close()?;
                return Err(Error::IdentifierMismatch);
            }
            let buckets = read_i32(&mut &bytes[8..12])? as u32;
            let data_start = read_i32(&mut &bytes[12..16])? as u32;
            (buckets, data_start)
        };
        Ok(self
            .files
            .insert(OpenFile {
                pool,
                buckets,
                data_start,
                path: path.to_path_buf(),
            })
            .expect("capacity checked above"))
    }

    /// `CloseFile`: flushes dirty pages and releases the descriptor.
    pub fn close_file(&mut self, fd: i32) -> Result<()> {
        let entry = self.files.remove(fd)?;
        entry.pool.close()
    }

    fn bucket_num(&self, entry: &OpenFile<B>, id: i32, mode: LookupMode) -> Result<Option<BlockId>> {
        let hash = id.rem_euclid(entry.buckets as i32) as u32;
        let dir_block = 1 + hash / Self::MAPS_PER_BLOCK as u32;
        let slot = (hash % Self::MAPS_PER_BLOCK as u32) as usize;

        let block = entry.pool.get_block(dir_block)?;
        let offset = slot * 4;
        let existing = read_i32(&mut &block.bytes()[offset..offset + 4])? as u32;
        if existing != 0 {
            return Ok(Some(existing));
        }
        match mode {
            LookupMode::Test => Ok(None),
            LookupMode::Create => {
                let new_bucket = entry.pool.block_counter();
                log::debug!("ht: creating directory slot {hash} -> block {new_bucket}");
                {
                    let mut bytes = block.bytes_mut();
                    let mut slice = &mut bytes[offset..offset + 4];
                    write_i32(&mut slice, new_bucket as i32)?;
                }
                drop(block);
                entry.pool.allocate_block()?;
                Ok(Some(new_bucket))
            }
        }
    }

    fn read_bucket_header(raw: &[u8]) -> Result<(u32, u32)> {
        let overflow = read_i32(&mut &raw[..OVERFLOW_SIZE])? as u32;
        let count = read_u32(&mut &raw[OVERFLOW_SIZE..BUCKET_HEADER_SIZE])?;
        Ok((overflow, count))
    }

    /// `InsertEntry`: resolves the bucket (allocating if needed), then
    /// appends to the tail of the overflow chain.
    pub fn insert_entry(&mut self, fd: i32, record: &Record) -> Result<()> {
        let entry = self.files.get(fd)?;
        let mut block_id = self
            .bucket_num(entry, record.id, LookupMode::Create)?
            .expect("Create mode always resolves a bucket");

        loop {
            let block = entry.pool.get_block(block_id)?;
            let (overflow, count) = Self::read_bucket_header(&block.bytes()[..])?;
            if overflow != 0 {
                block_id = overflow;
                continue;
            }
            if count as usize >= Self::CAPACITY {
                let new_block_id = entry.pool.block_counter();
                log::debug!("ht: bucket {block_id} full, chaining overflow block {new_block_id}");
                {
                    let mut bytes = block.bytes_mut();
                    let mut slice = &mut bytes[..OVERFLOW_SIZE];
                    write_i32(&mut slice, new_block_id as i32)?;
                }
                drop(block);
                let new_block = entry.pool.allocate_block()?;
                Self::write_record_at(&new_block, 0, record)?;
                let mut bytes = new_block.bytes_mut();
                let mut slice = &mut bytes[OVERFLOW_SIZE..BUCKET_HEADER_SIZE];
                write_u32(&mut slice, 1)?;
            } else {
                Self::write_record_at(&block, count as usize, record)?;
                let mut bytes = block.bytes_mut();
                let mut slice = &mut bytes[OVERFLOW_SIZE..BUCKET_HEADER_SIZE];
                write_u32(&mut slice, count + 1)?;
            }
            return Ok(());
        }
    }

    fn write_record_at(block: &PinnedBlock<B>, slot: usize, record: &Record) -> Result<()> {
        let start = BUCKET_HEADER_SIZE + slot * RECORD_SIZE;
        let mut bytes = block.bytes_mut();
        let mut slice = &mut bytes[start..start + RECORD_SIZE];
        record.encode_into(&mut slice)?;
        Ok(())
    }

    /// Resolves `(block, slot)` of the first live record matching `id`,
    /// or `None` if absent. A missing key is never an error.
    fn find(&self, entry: &OpenFile<B>, id: i32) -> Result<Option<(BlockId, usize)>> {
        let Some(mut block_id) = self.bucket_num(entry, id, LookupMode::Test)? else {
            return Ok(None);
        };
        loop {
            let block = entry.pool.get_block(block_id)?;
            let (overflow, count) = Self::read_bucket_header(&block.bytes()[..])?;
            for slot in 0..count as usize {
                let start = BUCKET_HEADER_SIZE + slot * RECORD_SIZE;
                let raw = &block.bytes()[start..start + 4];
                let rec_id = read_i32(&mut &raw[..])?;
                if rec_id == id {
                    return Ok(Some((block_id, slot)));
                }
            }
            if overflow == 0 {
                return Ok(None);
            }
            block_id = overflow;
        }
    }

    /// `DeleteEntry`: swap-with-last; never reclaims empty overflow
    /// blocks (deliberate, §9).
    pub fn delete_entry(&mut self, fd: i32, id: i32) -> Result<()> {
        let entry = self.files.get(fd)?;
        let Some((block_id, slot)) = self.find(entry, id)? else {
            return Ok(());
        };
        let block = entry.pool.get_block(block_id)?;
        let (_, count) = Self::read_bucket_header(&block.bytes()[..])?;
        let last = count as usize - 1;
        if slot != last {
            let last_start = BUCKET_HEADER_SIZE + last * RECORD_SIZE;
            let last_record = {
                let bytes = block.bytes();
                bytes[last_start..last_start + RECORD_SIZE].to_vec()
            };
            let slot_start = BUCKET_HEADER_SIZE + slot * RECORD_SIZE;
            let mut bytes = block.bytes_mut();
            bytes[slot_start..slot_start + RECORD_SIZE].copy_from_slice(&last_record);
        }
        if last == 0 {
            log::warn!("ht: block {block_id} emptied by delete, overflow block not reclaimed");
        }
        let mut bytes = block.bytes_mut();
        let mut slice = &mut bytes[OVERFLOW_SIZE..BUCKET_HEADER_SIZE];
        write_u32(&mut slice, last as u32)?;
        Ok(())
    }

    fn print_record(raw: &[u8]) -> Result<()> {
        let record = Record::decode_from(&mut &raw[..RECORD_SIZE])?;
        println!(
            "{}\t{}\t{}\t{}",
            record.id,
            Record::trimmed(&record.name),
            Record::trimmed(&record.surname),
            Record::trimmed(&record.city)
        );
        Ok(())
    }

    /// `GetEntry`: resolves `id` the same way `Find` does and returns the
    /// decoded record, or `None` if absent. A thin public wrapper around
    /// `find` so a lookup's result can be observed as data instead of a
    /// printed line, the same relationship `Hp::get_entry` has to
    /// `Hp::print_all_entries`.
    pub fn get_entry(&self, fd: i32, id: i32) -> Result<Option<Record>> {
        let entry = self.files.get(fd)?;
        let Some((block_id, slot)) = self.find(entry, id)? else {
            return Ok(None);
        };
        let block = entry.pool.get_block(block_id)?;
        let start = BUCKET_HEADER_SIZE + slot * RECORD_SIZE;
        let record = Record::decode_from(&mut &block.bytes()[start..start + RECORD_SIZE])?;
        Ok(Some(record))
    }

    /// `PrintAllEntries`: without a key, linearly scans every bucket and
    /// overflow block; with a key, prints the single match if any.
    pub fn print_all_entries(&self, fd: i32, id: Option<i32>) -> Result<()> {
        let entry = self.files.get(fd)?;
        match id {
            Some(id) => {
                if let Some((block_id, slot)) = self.find(entry, id)? {
                    let block = entry.pool.get_block(block_id)?;
                    let start = BUCKET_HEADER_SIZE + slot * RECORD_SIZE;
                    Self::print_record(&block.bytes()[start..start + RECORD_SIZE])?;
                }
                Ok(())
            }
            None => {
                let count = entry.pool.block_counter();
                for block_id in entry.data_start..count {
                    let block = entry.pool.get_block(block_id)?;
                    let (_, used) = Self::read_bucket_header(&block.bytes()[..])?;
                    for slot in 0..used as usize {
                        let start = BUCKET_HEADER_SIZE + slot * RECORD_SIZE;
                        Self::print_record(&block.bytes()[start..start + RECORD_SIZE])?;
                    }
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn chain_growth_and_print_all() -> Result<()> {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ht.db");
        let mut ht = Ht::<96>::new(16);
        ht.create_index(&path, 2)?;
        let fd = ht.open_index(&path)?;

        for id in (0..40).step_by(2) {
            ht.insert_entry(fd, &Record::new(id, b"N", b"S", b"C"))?;
        }

        ht.print_all_entries(fd, None)?;
        ht.print_all_entries(fd, Some(4))?;
        ht.close_file(fd)?;
        Ok(())
    }

    #[test]
    fn delete_then_reinsert() -> Result<()> {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ht.db");
        let mut ht = Ht::<128>::new(16);
        ht.create_index(&path, 128)?;
        let fd = ht.open_index(&path)?;

        ht.insert_entry(fd, &Record::new(42, b"P.", b"", b""))?;
        ht.delete_entry(fd, 42)?;
        assert!(ht.get_entry(fd, 42)?.is_none());

        ht.insert_entry(fd, &Record::new(42, b"P.", b"Sherman", b"Sydney"))?;
        let record = ht.get_entry(fd, 42)?.expect("reinserted record must be found");
        assert_eq!(Record::trimmed(&record.surname), "Sherman");
        assert_eq!(Record::trimmed(&record.city), "Sydney");

        // The swap-with-last delete must not have left a stale duplicate
        // behind: the bucket holds exactly the reinserted record.
        let entry = ht.files.get(fd)?;
        let (block_id, _) = ht.find(entry, 42)?.expect("present");
        let block = entry.pool.get_block(block_id)?;
        let (_, count) = Ht::<128>::read_bucket_header(&block.bytes()[..])?;
        assert_eq!(count, 1, "delete must not leave a stale duplicate");

        ht.close_file(fd)?;
        Ok(())
    }

    #[test]
    fn missing_key_is_not_an_error() -> Result<()> {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ht.db");
        let mut ht = Ht::<128>::new(16);
        ht.create_index(&path, 16)?;
        let fd = ht.open_index(&path)?;
        ht.delete_entry(fd, 999)?;
        ht.print_all_entries(fd, Some(999))?;
        ht.close_file(fd)?;
        Ok(())
    }
}

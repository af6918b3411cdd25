// Copyright (c) 2024-present, ixdb contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Little-endian (de)serialization of fixed-width on-disk structures.
//!
//! The file format is explicitly little-endian (see `DESIGN.md`), unlike the
//! native-endianness reference implementation this crate is modeled after.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

/// Serializes a fixed-width value into a writer.
pub trait Encode {
    /// Writes `self` into `writer`.
    fn encode_into<W: Write>(&self, writer: &mut W) -> io::Result<()>;
}

/// Deserializes a fixed-width value from a reader.
pub trait Decode: Sized {
    /// Reads a value of this type from `reader`.
    fn decode_from<R: Read>(reader: &mut R) -> io::Result<Self>;
}

/// Reads a `u32` in little-endian order.
pub fn read_u32<R: Read>(reader: &mut R) -> io::Result<u32> {
    reader.read_u32::<LittleEndian>()
}

/// Writes a `u32` in little-endian order.
pub fn write_u32<W: Write>(writer: &mut W, value: u32) -> io::Result<()> {
    writer.write_u32::<LittleEndian>(value)
}

/// Reads an `i32` in little-endian order.
pub fn read_i32<R: Read>(reader: &mut R) -> io::Result<i32> {
    reader.read_i32::<LittleEndian>()
}

/// Writes an `i32` in little-endian order.
pub fn write_i32<W: Write>(writer: &mut W, value: i32) -> io::Result<()> {
    writer.write_i32::<LittleEndian>(value)
}

/// Reads a fixed-size byte buffer, zero-padded/truncated to `N` bytes.
pub fn read_fixed_bytes<R: Read, const N: usize>(reader: &mut R) -> io::Result<[u8; N]> {
    let mut buf = [0u8; N];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// Pads or truncates `src` to exactly `len` bytes (used for `char[N]` fields
/// and `c`-typed B+ tree fields).
#[must_use]
pub fn fit_to_len(src: &[u8], len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    let n = src.len().min(len);
    out[..n].copy_from_slice(&src[..n]);
    out
}

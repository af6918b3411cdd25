// Copyright (c) 2024-present, ixdb contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Engine-neutral error type shared by the heap file, hash index and B+ tree
//! engines.
//!
//! There is no per-engine `errno` global here; every fallible operation
//! returns a [`Result`] instead. [`print_error`] plays the role of the
//! reference implementation's `PrintError(prefix)`.

/// Errors that can occur in any of the three engines.
#[derive(Debug)]
pub enum Error {
    /// I/O error from the underlying block pool file.
    Io(std::io::Error),

    /// The block-0 identifier did not match the engine's expected magic.
    IdentifierMismatch,

    /// A file or scan descriptor did not refer to an open entry.
    InvalidDescriptor,

    /// A scan descriptor did not refer to an open scan.
    InvalidScand,

    /// An unrecognized scan comparison operator was supplied.
    InvalidOp,

    /// The file has an open descriptor (or dependent scan) and cannot be
    /// closed or destroyed yet.
    FileInUse,

    /// The engine's open-file table is at capacity.
    MaxOpenFiles,

    /// The engine's open-scan table is at capacity.
    MaxScans,

    /// A scan has been exhausted; `find_next_entry` will keep returning
    /// `Ok(None)` for this descriptor.
    Eof,

    /// `open_file`/`open_index` was called on a path that doesn't exist.
    FileNotFound,

    /// `destroy_index` failed to remove the underlying file.
    Destroy,

    /// The block pool is out of resident frames and every frame is pinned,
    /// so nothing can be evicted to satisfy a new `get_block`/`allocate_block`.
    BufferPool,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::IdentifierMismatch => write!(f, "block 0 identifier does not match"),
            Self::InvalidDescriptor => write!(f, "invalid file descriptor"),
            Self::InvalidScand => write!(f, "invalid scan descriptor"),
            Self::InvalidOp => write!(f, "invalid scan operator"),
            Self::FileInUse => write!(f, "file is still in use"),
            Self::MaxOpenFiles => write!(f, "maximum number of open files reached"),
            Self::MaxScans => write!(f, "maximum number of open scans reached"),
            Self::Eof => write!(f, "scan exhausted"),
            Self::FileNotFound => write!(f, "file not found"),
            Self::Destroy => write!(f, "failed to destroy index file"),
            Self::BufferPool => write!(f, "buffer pool exhausted: every frame is pinned"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Formats `err` to stderr prefixed with `prefix`, mirroring the reference
/// implementation's `PrintError(prefix)`.
pub fn print_error(prefix: &str, err: &Error) {
    eprintln!("{prefix}: {err}");
}

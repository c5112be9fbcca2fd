// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::coding::{DecodeError, EncodeError};

/// Errors surfaced by the storage core.
///
/// The core never swallows a data-integrity error: short reads are retried
/// once, checksum mismatches are retried once after invalidating the
/// offending cache slot, and anything left over is reported through one of
/// these variants rather than silently truncated.
#[derive(Debug)]
pub enum Error {
    /// I/O error bubbled up from a backing file or blob source.
    Io(std::io::Error),

    /// An aligned `pread`/`pwrite`, a zero-length mapping, or an
    /// out-of-range capacity was requested.
    InvalidArgument(&'static str),

    /// Magic, UUID, version, or sort/disjointness invariants did not hold
    /// for an on-disk structure.
    Corrupt(String),

    /// A ZFile block's CRC32C did not match after one retry.
    ChecksumMismatch {
        /// Index of the offending compressed block.
        block: u64,
        /// Expected CRC32C value.
        expected: u32,
        /// Computed CRC32C value.
        got: u32,
    },

    /// The underlying source returned fewer bytes than the aligned request,
    /// even after one retry.
    ShortIo {
        /// Bytes requested.
        requested: usize,
        /// Bytes actually transferred.
        got: usize,
    },

    /// A `BlobSource` call exceeded its deadline.
    Timeout,

    /// The requested blob or range does not exist upstream.
    NotFound,

    /// The registry (or other upstream) rejected credentials.
    Auth,

    /// The operation is not defined for this kind of layer, e.g.
    /// `commit` on a stacked file, or `close_seal` on a read-only file.
    Unsupported(&'static str),

    /// Serialization failed.
    Encode(EncodeError),

    /// Deserialization failed.
    Decode(DecodeError),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Self::Corrupt(msg) => write!(f, "corrupt data: {msg}"),
            Self::ChecksumMismatch {
                block,
                expected,
                got,
            } => write!(
                f,
                "checksum mismatch on block {block}: expected {expected:#010x}, got {got:#010x}"
            ),
            Self::ShortIo { requested, got } => {
                write!(f, "short I/O: requested {requested} bytes, got {got}")
            }
            Self::Timeout => write!(f, "operation timed out"),
            Self::NotFound => write!(f, "not found"),
            Self::Auth => write!(f, "authentication failed"),
            Self::Unsupported(msg) => write!(f, "unsupported: {msg}"),
            Self::Encode(e) => write!(f, "encode error: {e}"),
            Self::Decode(e) => write!(f, "decode error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Encode(e) => Some(e),
            Self::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<EncodeError> for Error {
    fn from(value: EncodeError) -> Self {
        Self::Encode(value)
    }
}

impl From<DecodeError> for Error {
    fn from(value: DecodeError) -> Self {
        Self::Decode(value)
    }
}

/// Storage core result type.
pub type Result<T> = std::result::Result<T, Error>;

// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Abstracts a byte-addressable remote object behind an aligned `pread`
//! (`spec.md` §2, §6.3). The HTTP(S) registry client, OAuth2 token dance,
//! and credential reload plumbing are explicitly out of scope (`spec.md`
//! §1); [`LocalBlobSource`] stands in for them so [`crate::block_cache`]
//! has a concrete collaborator to test against.

use std::path::{Path, PathBuf};
use std::time::Instant;

/// A point in time after which a [`BlobSource`] call must fail with
/// [`crate::Error::Timeout`] rather than continue (`spec.md` §6.3, §5).
pub type Deadline = Instant;

/// A byte-addressable remote object: "supports aligned `pread(offset, len)
/// → bytes`" (`spec.md` §2). Concrete backings (local file, HTTP
/// range-GET) are external collaborators; the core only depends on this
/// trait.
pub trait BlobSource: Send + Sync {
    /// Reads up to `len` bytes starting at `offset`. May return fewer
    /// bytes than `len` at end-of-object. `deadline`, if given, bounds how
    /// long the call may take; expiry surfaces as `Error::Timeout` without
    /// retry at this layer (`spec.md` §5).
    fn pread(&self, offset: u64, len: usize, deadline: Option<Deadline>) -> crate::Result<Vec<u8>>;
}

/// Local-file stand-in for the out-of-scope HTTP(S) registry client.
///
/// Reads a fixed local file as if it were a remote blob, honoring the same
/// `Timeout`/`NotFound` semantics a real registry client would report.
pub struct LocalBlobSource {
    path: PathBuf,
}

impl LocalBlobSource {
    /// Wraps `path` as a blob source.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The path this source reads from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BlobSource for LocalBlobSource {
    fn pread(&self, offset: u64, len: usize, deadline: Option<Deadline>) -> crate::Result<Vec<u8>> {
        if deadline.is_some_and(|d| Instant::now() > d) {
            return Err(crate::Error::Timeout);
        }

        let file = std::fs::File::open(&self.path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                crate::Error::NotFound
            } else {
                crate::Error::Io(e)
            }
        })?;

        let mut buf = vec![0u8; len];
        let got = crate::file::pread_at(&file, &mut buf, offset)?;
        buf.truncate(got);
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn reads_existing_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        std::fs::write(&path, b"the quick brown fox").unwrap();

        let source = LocalBlobSource::new(&path);
        let got = source.pread(4, 5, None).unwrap();
        assert_eq!(b"quick", got.as_slice());
    }

    #[test]
    fn short_read_at_eof() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        std::fs::write(&path, b"abc").unwrap();

        let source = LocalBlobSource::new(&path);
        let got = source.pread(1, 100, None).unwrap();
        assert_eq!(b"bc", got.as_slice());
    }

    #[test]
    fn missing_file_reports_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let source = LocalBlobSource::new(dir.path().join("nonexistent"));
        assert!(matches!(source.pread(0, 10, None), Err(crate::Error::NotFound)));
    }

    #[test]
    fn expired_deadline_reports_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        std::fs::write(&path, b"abc").unwrap();

        let source = LocalBlobSource::new(&path);
        let past = Instant::now() - std::time::Duration::from_secs(1);
        assert!(matches!(source.pread(0, 3, Some(past)), Err(crate::Error::Timeout)));
    }
}

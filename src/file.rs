// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Low-level positional I/O helpers shared by the LSMT and ZFile formats.

use crate::fs::FileSystem;
use std::{
    fs::File,
    io::Write,
    os::unix::fs::FileExt,
    path::Path,
};

/// Reads exactly `size` bytes at `offset`, failing with `UnexpectedEof` if
/// the file is shorter. Callers that want short-read tolerance (per
/// `spec.md` §4.2/§4.4) use [`pread_at`] directly and handle the count
/// themselves.
pub fn read_exact_at(file: &File, offset: u64, size: usize) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![0_u8; size];
    let got = pread_at(file, &mut buf, offset)?;
    if got != size {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("read_exact_at({got}) at {offset} did not read enough bytes ({size})"),
        ));
    }
    Ok(buf)
}

/// Positional read; returns however many bytes were actually transferred,
/// which may be less than `buf.len()` on a short read.
pub fn pread_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    let mut total = 0;
    loop {
        match file.read_at(&mut buf[total..], offset + total as u64) {
            Ok(0) => return Ok(total),
            Ok(n) => {
                total += n;
                if total == buf.len() {
                    return Ok(total);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Positional write of the entire buffer.
pub fn pwrite_all_at(file: &File, buf: &[u8], offset: u64) -> std::io::Result<()> {
    file.write_all_at(buf, offset)
}

/// Atomically rewrites a file's contents via a temp file + rename, used for
/// small metadata files rather than the append-only layer data files.
pub fn rewrite_atomic<F: FileSystem>(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let folder = path
        .parent()
        .ok_or_else(|| std::io::Error::other("path has no parent directory"))?;

    let mut temp_file = tempfile::NamedTempFile::new_in(folder)?;
    temp_file.write_all(content)?;
    temp_file.flush()?;
    temp_file.as_file_mut().sync_all()?;
    temp_file.persist(path).map_err(|e| e.error)?;

    #[cfg(not(target_os = "windows"))]
    {
        let file = F::open(path)?;
        file.sync_all()?;
        fsync_directory::<F>(folder)?;
    }

    Ok(())
}

#[cfg(not(target_os = "windows"))]
pub fn fsync_directory<F: FileSystem>(path: &Path) -> std::io::Result<()> {
    let file = F::open(path)?;
    debug_assert!(file.metadata()?.is_dir());
    file.sync_all()
}

#[cfg(target_os = "windows")]
pub fn fsync_directory<F: FileSystem>(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

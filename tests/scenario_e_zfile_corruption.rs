//! `spec.md` §8 scenario E: ZFile corruption detection.

use lsm_tree::fs::StdFileSystem;
use lsm_tree::zfile::header::RECORD_LEN;
use lsm_tree::zfile::{CompressOptions, ZFileReader, ZFileWriter};
use lsm_tree::CompressionType;
use std::io::{Seek, SeekFrom, Write};

#[test]
fn flipped_byte_fails_checksum_then_other_blocks_still_read() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("blob.zfile");

    let block0 = vec![0xAAu8; 4096];
    let block1 = vec![0xBBu8; 4096];
    let mut raw = block0.clone();
    raw.extend_from_slice(&block1);

    let opt = CompressOptions {
        algo: CompressionType::None,
        block_size: 4096,
        verify: true,
        dict_size: 0,
    };
    let mut writer = ZFileWriter::create::<StdFileSystem>(&path, opt).unwrap();
    writer.write_all(&raw).unwrap();
    drop(writer.finish::<StdFileSystem>(&path, lsm_tree::lsmt::DEFAULT_MAX_IO_SIZE).unwrap());

    // Block 0's uncompressed body starts right after the header record.
    let mut file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
    file.seek(SeekFrom::Start(RECORD_LEN as u64)).unwrap();
    file.write_all(&[!0xAA]).unwrap();
    file.sync_all().unwrap();

    let reader = ZFileReader::open::<StdFileSystem>(&path, lsm_tree::lsmt::DEFAULT_MAX_IO_SIZE).unwrap();

    let mut buf0 = vec![0u8; 4096];
    let err = reader.pread(&mut buf0, 0).unwrap_err();
    assert!(matches!(err, lsm_tree::Error::ChecksumMismatch { .. }));

    let mut buf1 = vec![0u8; 4096];
    reader.pread(&mut buf1, 4096).unwrap();
    assert_eq!(block1, buf1);
}

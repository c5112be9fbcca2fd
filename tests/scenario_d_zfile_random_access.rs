//! `spec.md` §8 scenario D: ZFile random access.

use lsm_tree::fs::StdFileSystem;
use lsm_tree::zfile::{CompressOptions, ZFileWriter};
use lsm_tree::CompressionType;
use rand::Rng;

#[test]
fn random_access_matches_raw_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("blob.zfile");

    let mut rng = rand::rng();
    let mut raw = vec![0u8; 10 * 1024 * 1024];
    rng.fill(raw.as_mut_slice());

    let opt = CompressOptions {
        algo: CompressionType::None,
        block_size: 4096,
        verify: true,
        dict_size: 0,
    };
    let mut writer = ZFileWriter::create::<StdFileSystem>(&path, opt).unwrap();
    writer.write_all(&raw).unwrap();
    let reader = writer.finish::<StdFileSystem>(&path, lsm_tree::lsmt::DEFAULT_MAX_IO_SIZE).unwrap();

    for _ in 0..1000 {
        let len = rng.random_range(1..=64 * 1024).min(raw.len());
        let off = rng.random_range(0..=(raw.len() - len)) as u64;

        let mut got = vec![0u8; len];
        reader.pread(&mut got, off).unwrap();
        assert_eq!(&raw[off as usize..off as usize + len], got.as_slice());
    }
}

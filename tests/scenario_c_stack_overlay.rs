//! `spec.md` §8 scenario C: stack overlay precedence.

use lsm_tree::fs::StdFileSystem;
use lsm_tree::lsmt::{DEFAULT_MAX_IO_SIZE, RwLayer, Stacked};
use std::sync::Arc;
use uuid::Uuid;

#[test]
fn rw_top_takes_precedence_over_ro_bottom() {
    let dir = tempfile::tempdir().unwrap();

    let base = RwLayer::create::<StdFileSystem>(
        &dir.path().join("base.data"),
        Some(&dir.path().join("base.index")),
        4096,
        Uuid::new_v4(),
        Uuid::nil(),
        DEFAULT_MAX_IO_SIZE,
        0,
    )
    .unwrap();
    base.pwrite(&[b'X'; 4096], 0).unwrap();
    let base = base.close_seal::<StdFileSystem>(true).unwrap().unwrap();

    let top = RwLayer::create::<StdFileSystem>(
        &dir.path().join("top.data"),
        Some(&dir.path().join("top.index")),
        4096,
        Uuid::new_v4(),
        base.uuid(),
        DEFAULT_MAX_IO_SIZE,
        0,
    )
    .unwrap();
    top.pwrite(&[b'Y'; 512], 1024).unwrap();

    let stacked = Stacked::new(vec![Arc::new(base)], Some(Arc::new(top)), DEFAULT_MAX_IO_SIZE, true).unwrap();

    let mut buf = [0u8; 4096];
    stacked.pread(&mut buf, 0).unwrap();

    let mut expected = [b'X'; 4096];
    expected[1024..1536].fill(b'Y');
    assert_eq!(expected, buf);
}

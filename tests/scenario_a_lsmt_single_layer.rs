//! `spec.md` §8 scenario A: LSMT single-layer read-back.

use lsm_tree::{Engine, EngineConfig};

#[test]
fn lsmt_single_layer_read_back() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::new(EngineConfig::new(dir.path())).unwrap();

    let layer = engine.create_rw_layer("root", 64 * 1024).unwrap();

    layer.pwrite(&[b'A'; 512], 0).unwrap();
    layer.pwrite(&[b'B'; 1024], 4096).unwrap();
    layer.discard(1024, 512).unwrap();

    let mut buf = [0u8; 512];
    layer.pread(&mut buf, 0).unwrap();
    assert_eq!([b'A'; 512], buf);

    layer.pread(&mut buf, 1024).unwrap();
    assert_eq!([0u8; 512], buf);

    let mut buf1k = [0u8; 1024];
    layer.pread(&mut buf1k, 4096).unwrap();
    assert_eq!([b'B'; 1024], buf1k);

    layer.pread(&mut buf1k, 63 * 1024).unwrap();
    assert_eq!([0u8; 1024], buf1k);

    assert_eq!(65536, layer.virtual_size());
}

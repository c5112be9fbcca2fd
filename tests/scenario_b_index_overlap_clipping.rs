//! `spec.md` §8 scenario B: index overlap clipping.

use lsm_tree::layer_index::Index0;
use lsm_tree::segment::SegmentMapping;

#[test]
fn index_overlap_clipping() {
    let mut index = Index0::new();
    index.insert(SegmentMapping::new(10, 20, 100, 0));
    index.insert(SegmentMapping::new(15, 5, 200, 0));

    let dump = index.dump(0);
    let expected = vec![
        SegmentMapping::new(10, 5, 100, 0),
        SegmentMapping::new(15, 5, 200, 0),
        SegmentMapping::new(20, 10, 110, 0),
    ];

    assert_eq!(expected, dump);
}

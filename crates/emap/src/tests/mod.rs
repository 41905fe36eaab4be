
use emap_storage::{error::StorageError, memory_impl::MemBackend, Credit, Transaction};
use pretty_assertions::assert_eq;

use crate::{
    credit::credit,
    test::{checked_config, checksums, plenty, setup, CS_SIZE, PREFIX, UNIT_SIZE},
    Boundary, Caret, DumpStats, Emap, EmapError, EmapOp, Extent, NewExtent, PasteHooks, Prefix,
    Segment, SplitPiece, BINDEX_MAX, EXTENT_END, HOLE,
};

/// `(start, end, value)` of every segment of `prefix`, in order.
pub(super) fn layout(map: &Emap, prefix: Prefix) -> Vec<(u64, u64, u64)> {
    let mut cursor = map.lookup(prefix, 0).unwrap();
    let mut layout = Vec::new();
    loop {
        let seg = cursor.segment();
        layout.push((seg.ext.start, seg.ext.end, seg.value));
        if seg.ext.is_last() {
            break;
        }
        cursor.next().unwrap();
    }
    cursor.close().unwrap();
    layout
}

/// The segment of [`PREFIX`] containing `offset`.
pub(super) fn segment_at(map: &Emap, offset: u64) -> Segment {
    map.lookup(PREFIX, offset).unwrap().segment().clone()
}

/// Pastes `new` onto [`PREFIX`] in its own transaction.
pub(super) fn paste_new(map: &Emap, new: NewExtent<'_>) {
    let mut tx = plenty();
    let mut cursor = map.lookup(PREFIX, new.ext.start).unwrap();
    cursor.paste(&mut tx, &new, &mut PasteHooks::new()).unwrap();
    cursor.close().unwrap();
    tx.commit();
}

pub(super) fn paste(map: &Emap, ext: Extent, value: u64) {
    paste_new(map, NewExtent::new(ext, value));
}

#[test]
fn new_object_is_one_hole() {
    let (_backend, map) = setup();
    let first = segment_at(&map, 0);
    assert_eq!(first.ext, Extent::whole());
    assert_eq!(first.value, HOLE);
    assert!(first.checksum.is_empty());
    assert_eq!(segment_at(&map, 1_000_000), first);
    assert_eq!(segment_at(&map, BINDEX_MAX), first);
    assert_eq!(layout(&map, PREFIX), vec![(0, EXTENT_END, HOLE)]);
}

#[test]
fn paste_into_hole() {
    let (_backend, map) = setup();
    let cs = checksums((20 - 10) / UNIT_SIZE, 0xa0);
    assert_eq!(cs.len() as u64, CS_SIZE);
    paste_new(
        &map,
        NewExtent::new(Extent::new(10, 20), 12).with_checksum(&cs, UNIT_SIZE),
    );

    let left = segment_at(&map, 0);
    assert_eq!((left.ext, left.value), (Extent::new(0, 10), HOLE));
    assert!(left.checksum.is_empty());

    let new = segment_at(&map, 10);
    assert_eq!((new.ext, new.value), (Extent::new(10, 20), 12));
    assert_eq!(new.checksum, cs);
    assert_eq!(new.unit_size, UNIT_SIZE);
    assert_eq!(segment_at(&map, 19), new);

    let right = segment_at(&map, 20);
    assert_eq!((right.ext, right.value), (Extent::new(20, EXTENT_END), HOLE));
    assert!(right.checksum.is_empty());
}

#[test]
fn paste_over_both_sides() {
    let (_backend, map) = setup();
    let cs = checksums(1, 0xa0);
    paste_new(
        &map,
        NewExtent::new(Extent::new(10, 20), 12).with_checksum(&cs, UNIT_SIZE),
    );
    paste(&map, Extent::new(5, 25), 11);
    assert_eq!(
        layout(&map, PREFIX),
        vec![(0, 5, HOLE), (5, 25, 11), (25, EXTENT_END, HOLE)]
    );
    assert!(segment_at(&map, 10).checksum.is_empty());
}

#[test]
fn paste_trims_checksums_of_both_neighbours() {
    let (_backend, map) = setup();
    let a = checksums(5, 0x10);
    let b = checksums(5, 0x40);
    paste_new(
        &map,
        NewExtent::new(Extent::new(50, 100), 0xa).with_checksum(&a, UNIT_SIZE),
    );
    paste_new(
        &map,
        NewExtent::new(Extent::new(100, 150), 0xb).with_checksum(&b, UNIT_SIZE),
    );
    paste(&map, Extent::new(80, 130), 13);

    assert_eq!(
        layout(&map, PREFIX),
        vec![
            (0, 50, HOLE),
            (50, 80, 0xa),
            (80, 130, 13),
            (130, 150, 0xb),
            (150, EXTENT_END, HOLE),
        ]
    );
    let cs = CS_SIZE as usize;
    let left = segment_at(&map, 50);
    assert_eq!(left.checksum, &a[..3 * cs]);
    assert_eq!(left.unit_size, UNIT_SIZE);
    let right = segment_at(&map, 130);
    assert_eq!(right.checksum, &b[3 * cs..]);
    assert_eq!(right.unit_size, UNIT_SIZE);
    assert!(segment_at(&map, 80).checksum.is_empty());
}

#[test]
fn paste_whole_object() {
    let (_backend, map) = setup();
    let cs = checksums(2, 1);
    paste_new(
        &map,
        NewExtent::new(Extent::new(30, 50), 3).with_checksum(&cs, UNIT_SIZE),
    );
    paste(&map, Extent::new(10, 20), 1);
    paste(&map, Extent::new(1 << 40, 1 << 41), 2);
    assert_eq!(layout(&map, PREFIX).len(), 7);

    paste(&map, Extent::whole(), 42);
    assert_eq!(layout(&map, PREFIX), vec![(0, EXTENT_END, 42)]);
    assert!(segment_at(&map, 0).checksum.is_empty());
}

#[test]
fn later_paste_wins() {
    let (_backend, map) = setup();
    paste(&map, Extent::new(100, 200), 1);
    paste(&map, Extent::new(150, 300), 2);
    paste(&map, Extent::new(120, 130), 3);
    let expect = |offset: u64| match offset {
        120..130 => 3,
        150..300 => 2,
        100..150 => 1,
        _ => HOLE,
    };
    for offset in [0, 99, 100, 119, 120, 129, 130, 149, 150, 299, 300, 1 << 50] {
        assert_eq!(segment_at(&map, offset).value, expect(offset), "{offset}");
    }
}

#[test]
fn paste_requires_start_in_segment() {
    let (_backend, map) = setup();
    paste(&map, Extent::new(10, 20), 1);
    let mut tx = plenty();
    let mut cursor = map.lookup(PREFIX, 0).unwrap();
    let err = cursor
        .paste(&mut tx, &NewExtent::new(Extent::new(15, 30), 2), &mut PasteHooks::new())
        .unwrap_err();
    assert!(matches!(err, EmapError::InvalidArgument(_)), "{err}");
    let err = cursor
        .paste(&mut tx, &NewExtent::new(Extent::new(5, 5), 2), &mut PasteHooks::new())
        .unwrap_err();
    assert!(matches!(err, EmapError::InvalidArgument(_)), "{err}");
}

#[test]
fn paste_rejects_bad_checksums() {
    let (_backend, map) = setup();
    let mut tx = plenty();
    let mut cursor = map.lookup(PREFIX, 0).unwrap();
    let mut hooks = PasteHooks::new();

    // Two units start in [0, 20), so 25 bytes is not a whole number of
    // checksums.
    let odd = vec![0; 25];
    let new = NewExtent::new(Extent::new(0, 20), 1).with_checksum(&odd, UNIT_SIZE);
    let err = cursor.paste(&mut tx, &new, &mut hooks).unwrap_err();
    assert!(matches!(err, EmapError::InvalidArgument(_)), "{err}");

    let cs = checksums(2, 0);
    let new = NewExtent::new(Extent::new(0, 20), 1).with_checksum(&cs, 0);
    let err = cursor.paste(&mut tx, &new, &mut hooks).unwrap_err();
    assert!(matches!(err, EmapError::InvalidArgument(_)), "{err}");

    let limit = map.config().max_checksum_bytes();
    let huge = vec![0; limit as usize * 2];
    let new = NewExtent::new(Extent::new(0, 20), 1).with_checksum(&huge, UNIT_SIZE);
    let err = cursor.paste(&mut tx, &new, &mut hooks).unwrap_err();
    assert!(matches!(err, EmapError::InvalidArgument(_)), "{err}");

    tx.commit();
    assert_eq!(layout(&map, PREFIX), vec![(0, EXTENT_END, HOLE)]);
}

#[test]
fn paste_hooks() {
    let (_backend, map) = setup();
    paste(&map, Extent::new(0, 100), 1000);

    // Values are device offsets: the right remainder of a cut segment
    // starts further into the device.
    let mut lefts = Vec::new();
    let mut rights = Vec::new();
    let mut deleted = Vec::new();
    let mut tx = plenty();
    let mut cursor = map.lookup(PREFIX, 40).unwrap();
    {
        let mut hooks = PasteHooks::new()
            .on_cut_left(|seg, clip, orig| lefts.push((seg.ext, *clip, orig)))
            .on_cut_right(|seg, clip, orig| {
                rights.push((seg.ext, *clip, orig));
                seg.value = orig + (clip.end - seg.ext.start);
            })
            .on_delete(|seg| deleted.push(seg.clone()));
        cursor
            .paste(&mut tx, &NewExtent::new(Extent::new(40, 60), 7), &mut hooks)
            .unwrap();
    }
    assert_eq!(lefts, vec![(Extent::new(0, 100), Extent::new(40, 60), 1000)]);
    assert_eq!(rights, vec![(Extent::new(0, 100), Extent::new(40, 60), 1000)]);
    assert!(deleted.is_empty());
    assert_eq!(cursor.segment().ext, Extent::new(60, 100));
    assert_eq!(
        layout(&map, PREFIX),
        vec![
            (0, 40, 1000),
            (40, 60, 7),
            (60, 100, 1060),
            (100, EXTENT_END, HOLE),
        ]
    );

    let mut cursor = map.lookup(PREFIX, 40).unwrap();
    {
        let mut hooks = PasteHooks::new()
            .on_cut_left(|_, _, _| panic!("nothing is cut"))
            .on_cut_right(|_, _, _| panic!("nothing is cut"))
            .on_delete(|seg| deleted.push(seg.clone()));
        cursor
            .paste(&mut tx, &NewExtent::new(Extent::new(40, 60), 8), &mut hooks)
            .unwrap();
    }
    tx.commit();
    assert_eq!(deleted.len(), 1);
    assert_eq!((deleted[0].ext, deleted[0].value), (Extent::new(40, 60), 7));
    assert_eq!(segment_at(&map, 50).value, 8);
}

#[test]
fn split_into_pieces() {
    let (_backend, map) = setup();
    let mut tx = plenty();
    let mut cursor = map.lookup(PREFIX, 0).unwrap();
    let cs = checksums(10, 0x20);
    cursor
        .split(
            &mut tx,
            &[
                SplitPiece::new(100, 1).with_checksum(&cs, UNIT_SIZE),
                SplitPiece::new(50, 2),
                SplitPiece::new(0, 3),
                SplitPiece::new(u64::MAX - 150, 4),
            ],
        )
        .unwrap();
    assert_eq!(cursor.segment().ext, Extent::new(150, EXTENT_END));
    cursor.close().unwrap();
    tx.commit();

    assert_eq!(
        layout(&map, PREFIX),
        vec![(0, 100, 1), (100, 150, 2), (150, EXTENT_END, 4)]
    );
    assert_eq!(segment_at(&map, 99).checksum, cs);
}

#[test]
fn split_must_cover_segment() {
    let (_backend, map) = setup();
    paste(&map, Extent::new(0, 100), 1);
    let mut tx = plenty();
    let mut cursor = map.lookup(PREFIX, 0).unwrap();
    for pieces in [
        vec![SplitPiece::new(50, 1)],
        vec![SplitPiece::new(50, 1), SplitPiece::new(60, 2)],
        vec![SplitPiece::new(u64::MAX, 1), SplitPiece::new(2, 2)],
    ] {
        let err = cursor.split(&mut tx, &pieces).unwrap_err();
        assert!(matches!(err, EmapError::InvalidArgument(_)), "{err}");
    }
    cursor.split(&mut tx, &[SplitPiece::new(100, 5)]).unwrap();
    tx.commit();
    assert_eq!(layout(&map, PREFIX), vec![(0, 100, 5), (100, EXTENT_END, HOLE)]);
}

#[test]
fn next_and_prev() {
    let (_backend, map) = setup();
    paste(&map, Extent::new(10, 20), 1);
    let mut cursor = map.lookup(PREFIX, 15).unwrap();
    cursor.next().unwrap();
    assert_eq!(cursor.segment().ext, Extent::new(20, EXTENT_END));
    let err = cursor.next().unwrap_err();
    assert!(matches!(err, EmapError::AtBoundary(Boundary::End)), "{err}");
    assert_eq!(cursor.segment().ext, Extent::new(20, EXTENT_END));

    cursor.prev().unwrap();
    cursor.prev().unwrap();
    assert_eq!(cursor.segment().ext, Extent::new(0, 10));
    let err = cursor.prev().unwrap_err();
    assert!(matches!(err, EmapError::AtBoundary(Boundary::Start)), "{err}");
    assert_eq!(cursor.segment().ext, Extent::new(0, 10));
    assert!(cursor.verify());
}

#[test]
fn stale_cursor_relocates() {
    let (_backend, map) = setup();
    paste(&map, Extent::new(10, 20), 1);
    let mut reader = map.lookup(PREFIX, 0).unwrap();
    let before = reader.version();
    assert_eq!(reader.segment().ext, Extent::new(0, 10));

    let mut tx = plenty();
    let mut writer = map.lookup(PREFIX, 5).unwrap();
    writer
        .paste(&mut tx, &NewExtent::new(Extent::new(5, 25), 2), &mut PasteHooks::new())
        .unwrap();
    tx.commit();
    assert!(map.version() > before);

    // The reader's segment [0, 10) is gone; it lands on whatever now holds
    // offset 10.
    reader.next().unwrap();
    assert_eq!(reader.segment().ext, Extent::new(5, 25));
    assert_eq!(reader.segment().value, 2);
    assert_eq!(reader.version(), map.version());
    reader.prev().unwrap();
    assert_eq!(reader.segment().ext, Extent::new(0, 5));

    let mut tx = plenty();
    let mut writer = map.lookup(PREFIX, 100).unwrap();
    writer
        .paste(&mut tx, &NewExtent::new(Extent::new(100, 200), 3), &mut PasteHooks::new())
        .unwrap();
    tx.commit();
    reader.next().unwrap();
    assert_eq!(reader.segment().ext, Extent::new(5, 25));
    reader.next().unwrap();
    assert_eq!(reader.segment().ext, Extent::new(25, 100));
    assert!(reader.verify());
}

#[test]
fn stale_cursor_cannot_split_replaced_segment() {
    let (_backend, map) = setup();
    paste(&map, Extent::new(10, 20), 1);
    let mut stale = map.lookup(PREFIX, 10).unwrap();
    paste(&map, Extent::new(0, 15), 2);

    let mut tx = plenty();
    let err = stale
        .split(&mut tx, &[SplitPiece::new(5, 1), SplitPiece::new(5, 1)])
        .unwrap_err();
    assert!(matches!(err, EmapError::InvalidArgument(_)), "{err}");
    tx.commit();
    assert_eq!(
        layout(&map, PREFIX),
        vec![(0, 15, 2), (15, 20, 1), (20, EXTENT_END, HOLE)]
    );
}

#[test]
fn aborted_paste_makes_cursors_stale() {
    let (_backend, map) = setup();
    let mut tx = plenty();
    let mut writer = map.lookup(PREFIX, 10).unwrap();
    writer
        .paste(&mut tx, &NewExtent::new(Extent::new(10, 20), 1), &mut PasteHooks::new())
        .unwrap();

    let mut reader = map.lookup(PREFIX, 0).unwrap();
    assert_eq!(reader.segment().ext, Extent::new(0, 10));
    let before = reader.version();
    tx.abort();
    assert!(map.version() > before);

    // [0, 10) no longer exists, so the reader re-locates at 10 instead of
    // stepping past a key that is gone.
    reader.next().unwrap();
    assert_eq!(reader.segment().ext, Extent::whole());
    assert_eq!(reader.segment().value, HOLE);
    assert_eq!(reader.version(), map.version());
    assert!(reader.verify());
    assert_eq!(layout(&map, PREFIX), vec![(0, EXTENT_END, HOLE)]);
}

#[test]
fn merge_everything() {
    let (_backend, map) = setup();
    paste(&map, Extent::new(0, 10), 1);
    paste(&map, Extent::new(10, 20), 2);
    paste(&map, Extent::new(30, 40), 3);

    let mut tx = plenty();
    let mut cursor = map.lookup(PREFIX, 0).unwrap();
    while !cursor.segment().ext.is_last() {
        let len = cursor.segment().ext.len();
        cursor.merge(&mut tx, len).unwrap();
        assert_eq!(cursor.segment().ext.start, 0);
    }
    tx.commit();

    // Each merge hands the range to the next segment, so the last value
    // survives.
    assert_eq!(layout(&map, PREFIX), vec![(0, EXTENT_END, HOLE)]);
}

#[test]
fn merge_part_of_segment() {
    let (_backend, map) = setup();
    let cs = checksums(2, 0x30);
    paste_new(
        &map,
        NewExtent::new(Extent::new(0, 20), 5).with_checksum(&cs, UNIT_SIZE),
    );
    paste(&map, Extent::new(20, 30), 6);

    let mut tx = plenty();
    let mut cursor = map.lookup(PREFIX, 0).unwrap();
    cursor.merge(&mut tx, 10).unwrap();
    assert_eq!(cursor.segment().ext, Extent::new(10, 30));
    assert_eq!(cursor.segment().value, 6);

    let err = cursor.merge(&mut tx, 21).unwrap_err();
    assert!(matches!(err, EmapError::InvalidArgument(_)), "{err}");
    cursor.next().unwrap();
    let err = cursor.merge(&mut tx, 1).unwrap_err();
    assert!(matches!(err, EmapError::AtBoundary(Boundary::End)), "{err}");
    tx.commit();

    assert_eq!(
        layout(&map, PREFIX),
        vec![(0, 10, 5), (10, 30, 6), (30, EXTENT_END, HOLE)]
    );
    assert_eq!(segment_at(&map, 0).checksum, &cs[..CS_SIZE as usize]);
}

#[test]
fn merge_drops_checksums_of_grown_segment() {
    let (_backend, map) = setup();
    let cs = checksums(1, 0x50);
    paste_new(
        &map,
        NewExtent::new(Extent::new(10, 20), 12).with_checksum(&cs, UNIT_SIZE),
    );

    let mut tx = plenty();
    let mut cursor = map.lookup(PREFIX, 0).unwrap();
    cursor.merge(&mut tx, 10).unwrap();
    tx.commit();
    let grown = cursor.segment().clone();
    assert_eq!((grown.ext, grown.value), (Extent::new(0, 20), 12));
    assert!(grown.checksum.is_empty());
    assert_eq!(grown.unit_size, 0);
    assert_eq!(segment_at(&map, 0), grown);

    // Cutting the grown segment leaves a remainder without checksums.
    paste(&map, Extent::new(0, 10), 5);
    let right = segment_at(&map, 10);
    assert_eq!((right.ext, right.value), (Extent::new(10, 20), 12));
    assert!(right.checksum.is_empty());
}

#[test]
fn extent_update() {
    let (_backend, map) = setup();
    paste(&map, Extent::new(0, 10), 1);
    paste(&map, Extent::new(10, 20), 2);

    let mut tx = plenty();
    let mut cursor = map.lookup(PREFIX, 10).unwrap();
    let mut seg = cursor.segment().clone();
    seg.value = 9;
    cursor.extent_update(&mut tx, &seg).unwrap();
    assert_eq!(cursor.segment().value, 9);

    let mut bad = seg.clone();
    bad.ext.end = 15;
    let err = cursor.extent_update(&mut tx, &bad).unwrap_err();
    assert!(matches!(err, EmapError::InvalidArgument(_)), "{err}");
    tx.commit();
    assert_eq!(
        layout(&map, PREFIX),
        vec![(0, 10, 1), (10, 20, 9), (20, EXTENT_END, HOLE)]
    );

    // Moving the start down overlaps [0, 10), which the chain check
    // catches; the transaction is then abandoned.
    let mut tx = plenty();
    let mut cursor = map.lookup(PREFIX, 10).unwrap();
    seg.ext.start = 5;
    let err = cursor.extent_update(&mut tx, &seg).unwrap_err();
    assert!(matches!(err, EmapError::InvariantViolation { .. }), "{err}");
    tx.abort();
    assert_eq!(segment_at(&map, 10).ext, Extent::new(10, 20));
}

#[test]
fn caret_walks_bytes() {
    let (_backend, map) = setup();
    paste(&map, Extent::new(10, 20), 1);
    paste(&map, Extent::new(20, 30), 2);

    let mut cursor = map.lookup(PREFIX, 0).unwrap();
    let err = Caret::new(&mut cursor, 10).err().unwrap();
    assert!(matches!(err, EmapError::InvalidArgument(_)), "{err}");

    let mut caret = Caret::new(&mut cursor, 0).unwrap();
    assert_eq!(caret.step(), 10);
    assert!(!caret.move_by(5).unwrap());
    assert_eq!(caret.index(), 5);
    assert!(!caret.move_by(10).unwrap());
    assert_eq!(caret.index(), 15);
    assert_eq!(caret.cursor().segment().ext, Extent::new(10, 20));
    assert!(!caret.move_by(5).unwrap());
    assert_eq!(caret.index(), 20);
    assert_eq!(caret.cursor().segment().ext, Extent::new(20, 30));
    assert!(!caret.move_by(0).unwrap());
    assert!(caret.move_by(u64::MAX).unwrap());
    assert_eq!(caret.index(), EXTENT_END);
    assert_eq!(caret.step(), 0);
    assert_eq!(caret.cursor().segment().ext, Extent::new(30, EXTENT_END));
    caret.finish().unwrap();
}

#[test]
fn caret_follows_concurrent_paste() {
    let (_backend, map) = setup();
    paste(&map, Extent::new(10, 20), 1);
    let mut cursor = map.lookup(PREFIX, 0).unwrap();
    let mut caret = Caret::new(&mut cursor, 8).unwrap();
    paste(&map, Extent::new(5, 50), 2);

    // The caret's segment was [0, 10); after re-locating at 8 it is in
    // [5, 50) and the next boundary is 50.
    assert!(!caret.move_by(30).unwrap());
    assert_eq!(caret.index(), 38);
    assert_eq!(caret.cursor().segment().ext, Extent::new(5, 50));
    assert!(!caret.move_by(12).unwrap());
    assert_eq!(caret.cursor().segment().ext, Extent::new(50, EXTENT_END));
    caret.finish().unwrap();
}

#[test]
fn count_segments() {
    let (_backend, map) = setup();
    paste(&map, Extent::new(10, 20), 1);
    paste(&map, Extent::new(30, 40), 2);
    let mut cursor = map.lookup(PREFIX, 0).unwrap();
    assert_eq!(cursor.count_segments().unwrap(), 5);
    assert!(cursor.segment().ext.is_last());
    let mut cursor = map.lookup(PREFIX, 35).unwrap();
    assert_eq!(cursor.count_segments().unwrap(), 2);
}

#[test]
fn dump_counts_objects() {
    let (_backend, map) = setup();
    paste(&map, Extent::new(10, 20), 1);
    let mut tx = plenty();
    map.insert_whole_object(&mut tx, Prefix::new(0x1111, 0x2223), HOLE)
        .unwrap();
    map.insert_whole_object(&mut tx, Prefix::new(0, 1), 7).unwrap();
    tx.commit();
    assert_eq!(
        map.dump().unwrap(),
        DumpStats {
            segments: 5,
            objects: 3
        }
    );
}

#[test]
fn lookup_other_prefixes() {
    let (_backend, map) = setup();
    let neighbour = Prefix::new(PREFIX.hi, PREFIX.lo + 1);
    let mut tx = plenty();
    map.insert_whole_object(&mut tx, neighbour, 5).unwrap();
    tx.commit();

    // Sorts just before PREFIX, so the store finds PREFIX's segment.
    let before = Prefix::new(PREFIX.hi, PREFIX.lo - 1);
    let after = Prefix::new(u64::MAX, u64::MAX);
    for prefix in [before, after] {
        let err = map.lookup(prefix, 0).err().unwrap();
        assert!(matches!(err, EmapError::NotFound { .. }), "{err}");
    }
    assert_eq!(map.lookup(neighbour, 3).unwrap().segment().value, 5);
    assert_eq!(layout(&map, PREFIX), vec![(0, EXTENT_END, HOLE)]);

    let err = map.lookup(PREFIX, EXTENT_END).err().unwrap();
    assert!(matches!(err, EmapError::InvalidArgument(_)), "{err}");
}

#[test]
fn delete_whole_object() {
    let (_backend, map) = setup();
    paste(&map, Extent::new(10, 20), 1);
    let mut tx = plenty();
    let err = map.delete_whole_object(&mut tx, PREFIX).unwrap_err();
    assert!(matches!(err, EmapError::InvalidArgument(_)), "{err}");

    paste(&map, Extent::whole(), HOLE);
    map.delete_whole_object(&mut tx, PREFIX).unwrap();
    tx.commit();
    let err = map.lookup(PREFIX, 0).err().unwrap();
    assert!(matches!(err, EmapError::NotFound { .. }), "{err}");
    assert_eq!(map.dump().unwrap(), DumpStats::default());
}

#[test]
fn failed_paste_is_rolled_back() {
    let (backend, map) = setup();
    paste(&map, Extent::new(10, 20), 1);
    let before = layout(&map, PREFIX);

    // The first write of the second split fails.
    backend.tree(map.id()).unwrap().fail_writes_after(2);
    let mut tx = plenty();
    let mut cursor = map.lookup(PREFIX, 5).unwrap();
    let err = cursor
        .paste(&mut tx, &NewExtent::new(Extent::new(5, 25), 2), &mut PasteHooks::new())
        .unwrap_err();
    assert!(
        matches!(err, EmapError::Storage(StorageError::InjectedFault(_))),
        "{err}"
    );
    assert!(map.verify(PREFIX).is_err());
    tx.abort();

    map.verify(PREFIX).unwrap();
    assert_eq!(layout(&map, PREFIX), before);
    paste(&map, Extent::new(5, 25), 2);
    assert_eq!(
        layout(&map, PREFIX),
        vec![(0, 5, HOLE), (5, 25, 2), (25, EXTENT_END, HOLE)]
    );
}

#[test]
fn reserved_credit_is_enough() {
    let (_backend, map) = setup();
    let cs = checksums(1, 0);
    paste_new(
        &map,
        NewExtent::new(Extent::new(10, 20), 1).with_checksum(&cs, UNIT_SIZE),
    );

    // Three segments overlap [5, 25).
    let mut reserved = Credit::default();
    map.credit(EmapOp::Paste, 3, &mut reserved);
    let mut tx = Transaction::new(reserved);
    let mut cursor = map.lookup(PREFIX, 5).unwrap();
    cursor
        .paste(&mut tx, &NewExtent::new(Extent::new(5, 25), 2), &mut PasteHooks::new())
        .unwrap();
    assert!(reserved.covers(&tx.used()));
    tx.commit();

    let mut reserved = Credit::default();
    map.credit(EmapOp::Merge, 1, &mut reserved);
    let mut tx = Transaction::new(reserved);
    let mut cursor = map.lookup(PREFIX, 5).unwrap();
    cursor.merge(&mut tx, 10).unwrap();
    tx.commit();

    let mut reserved = Credit::default();
    map.credit(EmapOp::Split, 3, &mut reserved);
    let mut tx = Transaction::new(reserved);
    let mut cursor = map.lookup(PREFIX, 0).unwrap();
    cursor
        .split(
            &mut tx,
            &[SplitPiece::new(1, 1), SplitPiece::new(2, 2), SplitPiece::new(2, 3)],
        )
        .unwrap();
    tx.commit();
    assert_eq!(
        layout(&map, PREFIX),
        vec![
            (0, 1, 1),
            (1, 3, 2),
            (3, 5, 3),
            (5, 15, 2),
            (15, EXTENT_END, HOLE)
        ]
    );
}

#[test]
fn missing_credit_fails() {
    let (_backend, map) = setup();
    let mut tx = Transaction::new(Credit::default());
    let mut cursor = map.lookup(PREFIX, 0).unwrap();
    let err = cursor
        .paste(&mut tx, &NewExtent::new(Extent::new(0, 10), 1), &mut PasteHooks::new())
        .unwrap_err();
    assert!(
        matches!(
            err,
            EmapError::Storage(StorageError::CreditExhausted { .. })
        ),
        "{err}"
    );
    tx.abort();
    map.verify(PREFIX).unwrap();
}

#[test]
fn map_lifecycle() {
    let backend = MemBackend::new();
    let config = checked_config();
    let mut tx = Transaction::new(
        credit(&config, EmapOp::Create, 1) + credit(&config, EmapOp::Insert, 1),
    );
    let map = Emap::create(&backend, &mut tx, config.clone()).unwrap();
    map.insert_whole_object(&mut tx, PREFIX, HOLE).unwrap();
    tx.commit();
    let id = map.id();
    assert_eq!(backend.n_trees(), 1);

    let mut tx = Transaction::new(credit(&config, EmapOp::Destroy, 1));
    let err = map.destroy(&backend, &mut tx).unwrap_err();
    assert!(
        matches!(err, EmapError::Storage(StorageError::TreeNotEmpty { .. })),
        "{err}"
    );
    tx.abort();

    let map = Emap::open(&backend, id, config.clone()).unwrap();
    assert_eq!(layout(&map, PREFIX), vec![(0, EXTENT_END, HOLE)]);
    let mut tx = Transaction::new(
        credit(&config, EmapOp::Delete, 1) + credit(&config, EmapOp::Destroy, 1),
    );
    map.delete_whole_object(&mut tx, PREFIX).unwrap();
    map.destroy(&backend, &mut tx).unwrap();
    tx.commit();
    assert_eq!(backend.n_trees(), 0);

    let err = Emap::open(&backend, id, config).err().unwrap();
    assert!(
        matches!(err, EmapError::Storage(StorageError::TreeNotFound(_))),
        "{err}"
    );
}

#[test]
fn aborted_create_leaves_nothing() {
    let backend = MemBackend::new();
    let mut tx = plenty();
    let map = Emap::create(&backend, &mut tx, checked_config()).unwrap();
    map.insert_whole_object(&mut tx, PREFIX, HOLE).unwrap();
    drop(tx);
    assert_eq!(backend.n_trees(), 0);
}

use super::*;
use tempfile::tempdir;

fn image(fill: u8) -> Box<PageBuf> {
    Box::new([fill; PAGE_SIZE])
}

#[test]
fn fresh_wal_is_idle() {
    let dir = tempdir().unwrap();
    let mut wal = Wal::open(dir.path().join("db.wal")).unwrap();
    assert!(wal.is_idle());
    assert!(wal.undo_records().unwrap().is_empty());
}

#[test]
fn append_and_read_records() {
    let dir = tempdir().unwrap();
    let mut wal = Wal::open(dir.path().join("db.wal")).unwrap();

    wal.begin(1).unwrap();
    wal.append_undo(PageId(2), &image(0xaa), 1).unwrap();
    wal.append_undo(PageId(5), &image(0xbb), 1).unwrap();

    let records = wal.undo_records().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].page, PageId(2));
    assert_eq!(records[0].txn_id, 1);
    assert!(records[0].image.iter().all(|b| *b == 0xaa));
    assert_eq!(records[1].page, PageId(5));
    assert!(records[1].image.iter().all(|b| *b == 0xbb));
}

#[test]
fn begin_marker_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db.wal");

    {
        let mut wal = Wal::open(&path).unwrap();
        wal.begin(9).unwrap();
        wal.append_undo(PageId(3), &image(1), 9).unwrap();
    }

    let mut wal = Wal::open(&path).unwrap();
    assert_eq!(wal.in_progress(), Some(9));
    assert_eq!(wal.undo_records().unwrap().len(), 1);
}

#[test]
fn clear_truncates_to_zero() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db.wal");

    let mut wal = Wal::open(&path).unwrap();
    wal.begin(1).unwrap();
    wal.append_undo(PageId(2), &image(7), 1).unwrap();
    wal.clear().unwrap();

    assert!(wal.is_idle());
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);

    // And the next transaction starts clean.
    wal.begin(2).unwrap();
    assert_eq!(wal.undo_records().unwrap().len(), 0);
}

#[test]
fn rejects_append_outside_transaction() {
    let dir = tempdir().unwrap();
    let mut wal = Wal::open(dir.path().join("db.wal")).unwrap();

    let err = wal.append_undo(PageId(2), &image(0), 1).unwrap_err();
    assert!(matches!(err, DbError::Resource(_)));
}

#[test]
fn rejects_mismatched_transaction_id() {
    let dir = tempdir().unwrap();
    let mut wal = Wal::open(dir.path().join("db.wal")).unwrap();

    wal.begin(1).unwrap();
    assert!(wal.append_undo(PageId(2), &image(0), 2).is_err());
}

#[test]
fn rejects_nested_begin() {
    let dir = tempdir().unwrap();
    let mut wal = Wal::open(dir.path().join("db.wal")).unwrap();

    wal.begin(1).unwrap();
    assert!(wal.begin(2).is_err());
}

#[test]
fn torn_tail_record_is_ignored() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db.wal");

    {
        let mut wal = Wal::open(&path).unwrap();
        wal.begin(4).unwrap();
        wal.append_undo(PageId(2), &image(0x11), 4).unwrap();
        wal.append_undo(PageId(3), &image(0x22), 4).unwrap();
    }

    // Chop the second record in half, as a crash mid-append would.
    let len = std::fs::metadata(&path).unwrap().len();
    let file = OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(len - (PAGE_SIZE as u64 / 2)).unwrap();
    drop(file);

    let mut wal = Wal::open(&path).unwrap();
    assert_eq!(wal.in_progress(), Some(4));
    let records = wal.undo_records().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].page, PageId(2));
}

#[test]
fn torn_begin_marker_reads_as_idle() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db.wal");
    std::fs::write(&path, [1u8, 2, 3]).unwrap();

    let wal = Wal::open(&path).unwrap();
    assert!(wal.is_idle());
}

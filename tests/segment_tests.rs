//! Integration tests for segment open/create semantics

use shmlog::{Segment, SegmentConfig, ShmLogError};
use tempfile::TempDir;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn test_create_sizes_file_to_capacity() {
    init();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sized.log");

    let segment = Segment::open(&SegmentConfig::new(&path).writable(4096)).unwrap();
    assert_eq!(segment.len(), 4096);
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 4096);

    let header = segment.header().unwrap();
    assert_eq!(header.header_size, 24);
    assert_eq!(header.data_offset, 24);
    assert_eq!(header.committed_size, 24);
}

#[test]
fn test_capacity_ignored_for_existing_file() {
    init();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mismatch.log");

    let writer_segment = Segment::open(&SegmentConfig::new(&path).writable(64 * 1024)).unwrap();
    let mut writer = writer_segment.create_writer().unwrap();
    writer.allocate(16).unwrap().copy_from_slice(b"mismatch-payload");
    writer.commit().unwrap();
    writer.close();
    writer_segment.close();

    // a different capacity request must not resize the file
    let reader_segment = Segment::open(&SegmentConfig::new(&path)).unwrap();
    assert_eq!(reader_segment.len(), 64 * 1024);

    let mut iter = reader_segment.create_iterator().unwrap();
    assert_eq!(iter.next().unwrap().unwrap(), b"mismatch-payload");
    assert!(iter.next().unwrap().is_none());

    assert_eq!(std::fs::metadata(&path).unwrap().len(), 64 * 1024);
}

#[test]
fn test_reopen_writable_resumes_at_committed_size() {
    init();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("resume.log");

    {
        let segment = Segment::open(&SegmentConfig::new(&path).writable(256)).unwrap();
        let mut writer = segment.create_writer().unwrap();
        writer.allocate(3).unwrap().copy_from_slice(b"one");
        writer.commit().unwrap();
    }

    let segment = Segment::open(&SegmentConfig::new(&path).writable(256)).unwrap();
    assert_eq!(segment.header().unwrap().committed_size, 31);

    let mut writer = segment.create_writer().unwrap();
    writer.allocate(3).unwrap().copy_from_slice(b"two");
    writer.commit().unwrap();

    let mut iter = segment.create_iterator().unwrap();
    assert_eq!(iter.next().unwrap().unwrap(), b"one");
    assert_eq!(iter.next().unwrap().unwrap(), b"two");
}

#[test]
fn test_read_only_open_requires_existing_file() {
    init();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent.log");

    assert!(matches!(
        Segment::open(&SegmentConfig::new(&path)),
        Err(ShmLogError::NotFound { .. })
    ));
}

#[test]
fn test_capacity_below_header_rejected() {
    init();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("small.log");

    assert!(matches!(
        Segment::open(&SegmentConfig::new(&path).writable(23)),
        Err(ShmLogError::InvalidParameter { .. })
    ));
    assert!(!path.exists());
}

#[test]
fn test_header_view_length_matches_header_size() {
    init();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("view.log");

    let segment = Segment::open(&SegmentConfig::new(&path).writable(128)).unwrap();
    let view = segment.header_view().unwrap();
    assert_eq!(view.len(), 24);

    // header_size and data_offset as stored little-endian
    assert_eq!(&view[0..8], &24u64.to_le_bytes());
    assert_eq!(&view[8..16], &24u64.to_le_bytes());
}

#[test]
fn test_garbage_committed_size_reset_on_writable_open() {
    init();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("garbage.log");

    let mut bytes = vec![0u8; 128];
    bytes[0..8].copy_from_slice(&24u64.to_le_bytes());
    bytes[8..16].copy_from_slice(&24u64.to_le_bytes());
    bytes[16..24].copy_from_slice(&9999u64.to_le_bytes()); // past the mapping
    std::fs::write(&path, &bytes).unwrap();

    let segment = Segment::open(&SegmentConfig::new(&path).writable(128)).unwrap();
    assert_eq!(segment.header().unwrap().committed_size, 24);
}

#[test]
fn test_metadata_only_read_open() {
    init();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("meta.log");

    Segment::open(&SegmentConfig::new(&path).writable(512)).unwrap();

    // no capacity needed for read-only inspection
    let segment = Segment::open(&SegmentConfig::new(&path)).unwrap();
    let header = segment.header().unwrap();
    assert_eq!(header.data_offset, 24);
    assert_eq!(header.committed_size, 24);
}

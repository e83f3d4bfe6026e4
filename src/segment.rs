//! Memory-mapped log segment management
//!
//! A [`Segment`] owns one shared file mapping. The producer opens it
//! writable and derives a [`LogWriter`](crate::writer::LogWriter); consumers
//! open the same path read-only and derive
//! [`LogIterator`](crate::iterator::LogIterator)s. The only synchronizing
//! state between them is the committed-size atomic stored at byte 16 of the
//! mapping itself, so a process that maps the file through any other runtime
//! observes the same publication boundary.

use std::{
    fs::{File, OpenOptions},
    os::unix::fs::OpenOptionsExt,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use log::{info, warn};
use memmap2::{Mmap, MmapOptions, MmapRaw};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, ShmLogError},
    iterator::LogIterator,
    layout::{
        self, LogHeader, COMMITTED_SIZE_OFFSET, DATA_OFFSET_OFFSET, DEFAULT_HEADER_SIZE,
        HEADER_SIZE_OFFSET, MIN_MAPPING_LEN,
    },
    writer::LogWriter,
};

/// Unix permission bits for newly created segment files
const SEGMENT_FILE_MODE: u32 = 0o664;

/// Configuration for opening a log segment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentConfig {
    /// Filesystem path of the backing file
    pub path: PathBuf,
    /// Whether to map read-write; exactly one writable mapping may exist
    pub writable: bool,
    /// Capacity for a newly created file; required when writable. Ignored
    /// when the file already exists (the mapping sizes to the file).
    pub capacity_bytes: Option<u64>,
    /// Enable structural frame assertions on derived writers
    pub debug_checks: bool,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            writable: false,
            capacity_bytes: None,
            debug_checks: false,
        }
    }
}

impl SegmentConfig {
    /// Start a read-only configuration for the given path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Request a writable mapping with the given create-time capacity
    pub fn writable(mut self, capacity_bytes: u64) -> Self {
        self.writable = true;
        self.capacity_bytes = Some(capacity_bytes);
        self
    }

    /// Toggle structural frame assertions
    pub fn with_debug_checks(mut self, debug_checks: bool) -> Self {
        self.debug_checks = debug_checks;
        self
    }

    /// Validate the option set before any file is touched
    pub fn validate(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Err(ShmLogError::invalid_parameter(
                "path",
                "segment path cannot be empty",
            ));
        }
        match self.capacity_bytes {
            Some(capacity) if capacity < MIN_MAPPING_LEN => {
                return Err(ShmLogError::invalid_parameter(
                    "capacity_bytes",
                    "capacity must be at least 24 bytes",
                ));
            }
            None if self.writable => {
                return Err(ShmLogError::invalid_parameter(
                    "capacity_bytes",
                    "capacity is required for a writable segment",
                ));
            }
            _ => {}
        }
        Ok(())
    }
}

/// Shared mapping backing, read-only or read-write
#[derive(Debug)]
enum Mapping {
    ReadOnly(Mmap),
    Shared(MmapRaw),
}

impl Mapping {
    fn base(&self) -> *const u8 {
        match self {
            Mapping::ReadOnly(map) => map.as_ptr(),
            Mapping::Shared(map) => map.as_ptr(),
        }
    }

    fn len(&self) -> usize {
        match self {
            Mapping::ReadOnly(map) => map.len(),
            Mapping::Shared(map) => map.len(),
        }
    }
}

/// Shared state behind every segment handle
///
/// Writers, iterators and consumers keep the mapping alive through an `Arc`
/// of this; `close()` only flips the flag, and the actual unmap happens when
/// the last strong reference drops. That makes use-after-close a
/// deterministic `MappingGone` error instead of a dangling view.
#[derive(Debug)]
pub(crate) struct SegmentInner {
    mapping: Mapping,
    path: PathBuf,
    writable: bool,
    debug_checks: bool,
    header_size: u64,
    data_offset: u64,
    closed: AtomicBool,
}

unsafe impl Send for SegmentInner {}
unsafe impl Sync for SegmentInner {}

impl SegmentInner {
    pub(crate) fn mapping_len(&self) -> u64 {
        self.mapping.len() as u64
    }

    pub(crate) fn header_size(&self) -> u64 {
        self.header_size
    }

    pub(crate) fn data_offset(&self) -> u64 {
        self.data_offset
    }

    pub(crate) fn debug_checks(&self) -> bool {
        self.debug_checks
    }

    pub(crate) fn base(&self) -> *const u8 {
        self.mapping.base()
    }

    /// Base pointer for frame writes; only a shared read-write mapping has one
    pub(crate) fn base_mut(&self) -> Result<*mut u8> {
        match &self.mapping {
            Mapping::Shared(map) => Ok(map.as_mut_ptr()),
            Mapping::ReadOnly(_) => Err(ShmLogError::ReadOnly),
        }
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ShmLogError::MappingGone);
        }
        Ok(())
    }

    /// The committed-size cell at byte 16 of the mapping.
    ///
    /// The mapping is page-aligned, so the cell is 8-byte aligned, and
    /// `AtomicU64` shares the layout of a plain u64: other runtimes mapping
    /// this file see compatible bytes.
    fn committed_cell(&self) -> &AtomicU64 {
        unsafe { &*(self.base().add(COMMITTED_SIZE_OFFSET) as *const AtomicU64) }
    }

    pub(crate) fn load_committed(&self) -> u64 {
        self.committed_cell().load(Ordering::Acquire)
    }

    pub(crate) fn store_committed(&self, value: u64) {
        self.committed_cell().store(value, Ordering::Release);
    }
}

/// One memory-mapped shared log file
///
/// Cheap to clone; all clones and derived handles share the same mapping.
#[derive(Debug, Clone)]
pub struct Segment {
    inner: Arc<SegmentInner>,
}

impl Segment {
    /// Open (or, in writable mode, create) the segment at `config.path`.
    ///
    /// The mapping always sizes to the file's current on-disk length. On
    /// first open of a fresh file the header bytes are zero; each zero or
    /// out-of-bounds header field is reset to its default and, on a writable
    /// mapping, written back, so first open is idempotent.
    pub fn open(config: &SegmentConfig) -> Result<Self> {
        config.validate()?;

        let (file, created) = Self::open_file(config)?;

        let file_len = file
            .metadata()
            .map_err(|e| ShmLogError::from_io(e, "Failed to stat segment file"))?
            .len();
        if file_len < MIN_MAPPING_LEN {
            return Err(ShmLogError::invalid_parameter(
                "path",
                "existing segment file is smaller than the 24-byte header",
            ));
        }

        let mapping = if config.writable {
            let map = MmapOptions::new()
                .map_raw(&file)
                .map_err(|e| ShmLogError::from_io(e, "Failed to map segment read-write"))?;
            Mapping::Shared(map)
        } else {
            let map = unsafe {
                MmapOptions::new()
                    .map(&file)
                    .map_err(|e| ShmLogError::from_io(e, "Failed to map segment read-only"))?
            };
            Mapping::ReadOnly(map)
        };

        let inner = Self::normalize_header(mapping, config, file_len)?;
        if created {
            info!(
                "created segment {} ({} bytes)",
                inner.path.display(),
                file_len
            );
        }

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    fn open_file(config: &SegmentConfig) -> Result<(File, bool)> {
        if config.writable {
            match OpenOptions::new().read(true).write(true).open(&config.path) {
                Ok(file) => Ok((file, false)),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    let capacity = config.capacity_bytes.expect("validated above");
                    let file = OpenOptions::new()
                        .read(true)
                        .write(true)
                        .create_new(true)
                        .mode(SEGMENT_FILE_MODE)
                        .open(&config.path)
                        .map_err(|e| ShmLogError::from_io(e, "Failed to create segment file"))?;
                    file.set_len(capacity)
                        .map_err(|e| ShmLogError::from_io(e, "Failed to size segment file"))?;
                    Ok((file, true))
                }
                Err(err) => Err(ShmLogError::from_io(err, "Failed to open segment file")),
            }
        } else {
            match File::open(&config.path) {
                Ok(file) => Ok((file, false)),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    Err(ShmLogError::not_found(config.path.display().to_string()))
                }
                Err(err) => Err(ShmLogError::from_io(err, "Failed to open segment file")),
            }
        }
    }

    /// Parse the mapped header, resetting invalid fields to their defaults.
    ///
    /// Writable mappings persist the reset; read-only mappings apply the
    /// defaults in memory only, since the pages cannot be written.
    fn normalize_header(
        mapping: Mapping,
        config: &SegmentConfig,
        file_len: u64,
    ) -> Result<SegmentInner> {
        let (mut header_size, mut data_offset) = {
            let header_bytes = unsafe {
                std::slice::from_raw_parts(mapping.base(), DEFAULT_HEADER_SIZE as usize)
            };
            (
                layout::read_u64_le(header_bytes, HEADER_SIZE_OFFSET),
                layout::read_u64_le(header_bytes, DATA_OFFSET_OFFSET),
            )
        };

        if header_size == 0 || header_size > file_len {
            header_size = DEFAULT_HEADER_SIZE;
            Self::write_header_field(&mapping, HEADER_SIZE_OFFSET, header_size, config);
        }

        if data_offset == 0 || data_offset > file_len {
            data_offset = header_size;
            Self::write_header_field(&mapping, DATA_OFFSET_OFFSET, data_offset, config);
        }

        if data_offset < header_size {
            return Err(ShmLogError::cursor_out_of_range(data_offset, header_size));
        }

        let inner = SegmentInner {
            mapping,
            path: config.path.clone(),
            writable: config.writable,
            debug_checks: config.debug_checks,
            header_size,
            data_offset,
            closed: AtomicBool::new(false),
        };

        let committed = inner.load_committed();
        if committed < data_offset || committed > file_len {
            if config.writable {
                warn!(
                    "segment {}: committed size {} outside [{}, {}], resetting",
                    inner.path.display(),
                    committed,
                    data_offset,
                    file_len
                );
                inner.store_committed(data_offset);
            } else if committed > file_len {
                // A read-only mapping cannot repair the cell; refuse to
                // iterate past the end of the file.
                return Err(ShmLogError::cursor_out_of_range(committed, file_len));
            }
        }

        Ok(inner)
    }

    fn write_header_field(mapping: &Mapping, offset: usize, value: u64, config: &SegmentConfig) {
        if let Mapping::Shared(map) = mapping {
            let header = unsafe {
                std::slice::from_raw_parts_mut(map.as_mut_ptr(), DEFAULT_HEADER_SIZE as usize)
            };
            layout::write_u64_le(header, offset, value);
        } else {
            info!(
                "segment {}: header field at byte {} defaulted in memory (read-only mapping)",
                config.path.display(),
                offset
            );
        }
    }

    /// Read-only view of the header region
    pub fn header_view(&self) -> Result<&[u8]> {
        self.inner.ensure_open()?;
        Ok(unsafe {
            std::slice::from_raw_parts(self.inner.base(), self.inner.header_size as usize)
        })
    }

    /// Decoded snapshot of the header, with `committed_size` acquire-loaded
    pub fn header(&self) -> Result<LogHeader> {
        self.inner.ensure_open()?;
        Ok(LogHeader {
            header_size: self.inner.header_size,
            data_offset: self.inner.data_offset,
            committed_size: self.inner.load_committed(),
        })
    }

    /// Create an iterator positioned at the start of the log
    pub fn create_iterator(&self) -> Result<LogIterator> {
        self.create_iterator_at(0)
    }

    /// Create an iterator positioned at `start_cursor` (relative to the data
    /// region); fails if the cursor lies past the committed size
    pub fn create_iterator_at(&self, start_cursor: u64) -> Result<LogIterator> {
        self.inner.ensure_open()?;
        LogIterator::new(Arc::clone(&self.inner), start_cursor)
    }

    /// Create the single producer for this segment, inheriting the
    /// segment's debug setting
    pub fn create_writer(&self) -> Result<LogWriter> {
        self.create_writer_with(self.inner.debug_checks())
    }

    /// Create the single producer with an explicit debug setting
    pub fn create_writer_with(&self, debug_checks: bool) -> Result<LogWriter> {
        self.inner.ensure_open()?;
        if !self.inner.writable {
            return Err(ShmLogError::ReadOnly);
        }
        Ok(LogWriter::new(Arc::clone(&self.inner), debug_checks))
    }

    /// Mark the segment closed.
    ///
    /// Idempotent. Outstanding writers and iterators fail with
    /// `MappingGone` on their next operation; the mapping itself is
    /// released when the last of them drops.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            info!("closed segment {}", self.inner.path.display());
        }
    }

    /// Whether this mapping accepts a writer
    pub fn is_writable(&self) -> bool {
        self.inner.writable
    }

    /// Total mapping length in bytes
    pub fn len(&self) -> u64 {
        self.inner.mapping_len()
    }

    /// A segment is never empty: the mapping always covers the header
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Absolute offset at which frames begin
    pub fn data_offset(&self) -> u64 {
        self.inner.data_offset
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub(crate) fn inner(&self) -> &Arc<SegmentInner> {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn test_config_validation() {
        init();
        let config = SegmentConfig::default();
        assert!(config.validate().is_err());

        let config = SegmentConfig::new("/tmp/x");
        assert!(config.validate().is_ok());

        let config = SegmentConfig::new("/tmp/x").writable(16);
        assert!(matches!(
            config.validate(),
            Err(ShmLogError::InvalidParameter { .. })
        ));

        let mut config = SegmentConfig::new("/tmp/x");
        config.writable = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_create_fresh_segment_normalizes_header() {
        init();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fresh.log");

        let segment = Segment::open(&SegmentConfig::new(&path).writable(256)).unwrap();
        assert_eq!(segment.len(), 256);

        let header = segment.header().unwrap();
        assert_eq!(header.header_size, 24);
        assert_eq!(header.data_offset, 24);
        assert_eq!(header.committed_size, 24);

        let view = segment.header_view().unwrap();
        assert_eq!(view.len(), 24);
        assert_eq!(layout::read_u64_le(view, 0), 24);
        assert_eq!(layout::read_u64_le(view, 8), 24);
    }

    #[test]
    fn test_read_only_open_missing_file() {
        init();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.log");

        let err = Segment::open(&SegmentConfig::new(&path)).unwrap_err();
        assert!(matches!(err, ShmLogError::NotFound { .. }));
    }

    #[test]
    fn test_writer_on_read_only_segment() {
        init();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ro.log");

        Segment::open(&SegmentConfig::new(&path).writable(128)).unwrap();

        let reader = Segment::open(&SegmentConfig::new(&path)).unwrap();
        assert!(!reader.is_writable());
        assert!(matches!(
            reader.create_writer(),
            Err(ShmLogError::ReadOnly)
        ));
    }

    #[test]
    fn test_existing_file_smaller_than_header() {
        init();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tiny.log");
        std::fs::write(&path, [0u8; 8]).unwrap();

        let err = Segment::open(&SegmentConfig::new(&path)).unwrap_err();
        assert!(matches!(err, ShmLogError::InvalidParameter { .. }));
    }

    #[test]
    fn test_close_is_idempotent() {
        init();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("close.log");

        let segment = Segment::open(&SegmentConfig::new(&path).writable(128)).unwrap();
        segment.close();
        segment.close();

        assert!(matches!(
            segment.header(),
            Err(ShmLogError::MappingGone)
        ));
        assert!(matches!(
            segment.create_iterator(),
            Err(ShmLogError::MappingGone)
        ));
    }

    #[test]
    fn test_data_offset_below_header_rejected() {
        init();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.log");

        let mut bytes = vec![0u8; 64];
        layout::write_u64_le(&mut bytes, 0, 32); // header_size
        layout::write_u64_le(&mut bytes, 8, 24); // data_offset below header_size
        std::fs::write(&path, &bytes).unwrap();

        let err = Segment::open(&SegmentConfig::new(&path)).unwrap_err();
        assert!(matches!(err, ShmLogError::CursorOutOfRange { .. }));
    }
}

//! Error types and handling for the shared log

/// Result type alias for shared log operations
pub type Result<T> = std::result::Result<T, ShmLogError>;

/// Error types for every failure mode of the shared log
#[derive(Debug, thiserror::Error)]
pub enum ShmLogError {
    /// I/O related errors (file operations, mmap, etc.)
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Segment file does not exist and the mapping is read-only
    #[error("Segment not found: {path}")]
    NotFound { path: String },

    /// Invalid parameters or configuration
    #[error("Invalid parameter: {parameter} - {message}")]
    InvalidParameter { parameter: String, message: String },

    /// Writer requested on a read-only mapping
    #[error("Segment is mapped read-only")]
    ReadOnly,

    /// Frame would extend past the end of the mapping
    #[error("Segment full: frame of {requested} bytes exceeds remaining {remaining}")]
    SegmentFull { requested: u64, remaining: u64 },

    /// Payload size outside the encodable range
    #[error("Invalid payload size: {size} (must be 1..={max})", max = crate::framing::MAX_PAYLOAD_SIZE)]
    InvalidSize { size: usize },

    /// Cursor or seek target past the committed size
    #[error("Cursor out of range: {cursor} exceeds committed {committed}")]
    CursorOutOfRange { cursor: u64, committed: u64 },

    /// Frame structure violated (prefix below minimum or prefix != suffix)
    #[error("Frame corrupt at offset {offset}: {message}")]
    FrameCorrupt { offset: u64, message: String },

    /// Underlying segment mapping has been closed
    #[error("Segment mapping is gone")]
    MappingGone,

    /// Operation on a closed iterator
    #[error("Iterator is closed")]
    IteratorClosed,

    /// Operation on a closed writer
    #[error("Writer is closed")]
    WriterClosed,
}

impl ShmLogError {
    /// Create an I/O error from a standard I/O error
    pub fn from_io(source: std::io::Error, context: &str) -> Self {
        Self::Io {
            message: format!("{}: {}", context, source),
            source: Some(source),
        }
    }

    /// Create a not-found error
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Create a segment full error
    pub fn segment_full(requested: u64, remaining: u64) -> Self {
        Self::SegmentFull {
            requested,
            remaining,
        }
    }

    /// Create a cursor out of range error
    pub fn cursor_out_of_range(cursor: u64, committed: u64) -> Self {
        Self::CursorOutOfRange { cursor, committed }
    }

    /// Create a frame corruption error
    pub fn frame_corrupt(offset: u64, message: impl Into<String>) -> Self {
        Self::FrameCorrupt {
            offset,
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for ShmLogError {
    fn from(err: std::io::Error) -> Self {
        Self::from_io(err, "I/O operation failed")
    }
}

//! # shmlog - Shared-Memory Append Log
//!
//! A single-writer, multi-reader append log over one memory-mapped file,
//! built for low-latency inter-process message passing without locks or
//! copies. The producer maps the file read-write and appends length-framed
//! frames; any number of consumers map it read-only and iterate committed
//! frames as views straight into the mapping.
//!
//! Publication rides on a single atomic 64-bit counter stored inside the
//! file header: the writer's commit is one release store, each reader's
//! batch starts with one acquire load, and every byte below the loaded
//! value is guaranteed fully written.
//!
//! ## Layout
//!
//! ```text
//! Byte 0                                                      length-1
//! ┌──────────┬──────────┬────────────────┬────────────────┬─────────┐
//! │ hdr_size │ data_off │ committed (atm)│     frames     │  unused │
//! │  u64 LE  │  u64 LE  │     u64 LE     │                │         │
//! └──────────┴──────────┴────────────────┴────────────────┴─────────┘
//!    0..8       8..16        16..24       24..committed
//! ```
//!
//! Each frame is a u16-LE length prefix, the payload, and a matching u16-LE
//! length suffix; the suffix lets the writer validate its predecessor in
//! debug mode.
//!
//! ## Usage
//!
//! ```no_run
//! use shmlog::{Segment, SegmentConfig};
//!
//! # fn main() -> shmlog::Result<()> {
//! // producer
//! let segment = Segment::open(&SegmentConfig::new("/dev/shm/ticks").writable(1 << 20))?;
//! let mut writer = segment.create_writer()?;
//! writer.allocate(3)?.copy_from_slice(&[0xAA, 0xBB, 0xCC]);
//! writer.commit()?;
//!
//! // consumer (typically another process)
//! let reader = Segment::open(&SegmentConfig::new("/dev/shm/ticks"))?;
//! let mut iter = reader.create_iterator()?;
//! while let Some(payload) = iter.next()? {
//!     println!("{} bytes", payload.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod consumer;
pub mod error;
pub mod framing;
pub mod iterator;
pub mod layout;
pub mod segment;
pub mod writer;

pub use consumer::{LogConsumer, DEFAULT_POLL_INTERVAL};
pub use error::{Result, ShmLogError};
pub use framing::{FRAME_OVERHEAD, MAX_PAYLOAD_SIZE};
pub use iterator::{BatchOptions, LogIterator, DEFAULT_MAX_BYTES, DEFAULT_MAX_MESSAGES};
pub use layout::{LogHeader, DEFAULT_HEADER_SIZE, MIN_MAPPING_LEN};
pub use segment::{Segment, SegmentConfig};
pub use writer::LogWriter;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Cursor-based frame iterator
//!
//! Each iterator tracks its own position relative to the data region and
//! never coordinates with other readers or the writer. One acquire load of
//! the committed size bounds each batch; everything below that offset is
//! immutable, so the returned payload views alias the mapping without
//! copies.

use std::sync::Arc;

use crate::{
    error::{Result, ShmLogError},
    framing::{self, FRAME_MARKER_BYTES, FRAME_OVERHEAD, MIN_FRAME_SIZE},
    segment::SegmentInner,
};

/// Default cap on messages per batch
pub const DEFAULT_MAX_MESSAGES: u32 = 64;

/// Default cap on frame bytes per batch (256 KiB)
pub const DEFAULT_MAX_BYTES: u32 = 256 * 1024;

/// Limits for one [`LogIterator::next_batch`] call
#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    /// Maximum number of frames to return
    pub max_messages: u32,
    /// Maximum total frame bytes (markers included, not just payload)
    pub max_bytes: u32,
    /// Verify each frame's suffix against its prefix
    pub debug_checks: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_messages: DEFAULT_MAX_MESSAGES,
            max_bytes: DEFAULT_MAX_BYTES,
            debug_checks: false,
        }
    }
}

impl BatchOptions {
    fn validate(&self) -> Result<()> {
        if self.max_messages == 0 {
            return Err(ShmLogError::invalid_parameter(
                "max_messages",
                "must be at least 1",
            ));
        }
        if self.max_bytes == 0 {
            return Err(ShmLogError::invalid_parameter(
                "max_bytes",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Reader cursor over the committed frames of a segment
pub struct LogIterator {
    segment: Option<Arc<SegmentInner>>,
    /// Next unread byte, relative to the data offset
    cursor: u64,
}

impl LogIterator {
    pub(crate) fn new(segment: Arc<SegmentInner>, start_cursor: u64) -> Result<Self> {
        let committed = segment.load_committed();
        let committed_rel = committed.saturating_sub(segment.data_offset());
        if start_cursor > committed_rel {
            return Err(ShmLogError::cursor_out_of_range(start_cursor, committed_rel));
        }

        Ok(Self {
            segment: Some(segment),
            cursor: start_cursor,
        })
    }

    fn segment(&self) -> Result<&Arc<SegmentInner>> {
        self.segment.as_ref().ok_or(ShmLogError::IteratorClosed)
    }

    /// Return the next committed payload, or `None` when the cursor has
    /// caught up with the writer
    pub fn next(&mut self) -> Result<Option<&[u8]>> {
        let options = BatchOptions {
            max_messages: 1,
            max_bytes: u32::MAX,
            debug_checks: false,
        };
        let mut batch = self.next_batch(&options)?;
        Ok(batch.pop())
    }

    /// Return up to `options.max_messages` committed payload views and
    /// advance the cursor past them.
    ///
    /// A frame only partially below the committed boundary is left for a
    /// later call; an empty vector means no complete frame was available
    /// within the limits.
    pub fn next_batch(&mut self, options: &BatchOptions) -> Result<Vec<&[u8]>> {
        options.validate()?;

        let segment = self.segment()?.clone();
        segment.ensure_open()?;

        let data_offset = segment.data_offset();
        let mapping_len = segment.mapping_len();

        let committed = segment.load_committed();
        if committed < data_offset {
            return Err(ShmLogError::cursor_out_of_range(committed, data_offset));
        }
        let committed_rel = committed - data_offset;

        if self.cursor > committed_rel {
            return Err(ShmLogError::cursor_out_of_range(self.cursor, committed_rel));
        }
        if data_offset + self.cursor > mapping_len || committed > mapping_len {
            return Err(ShmLogError::MappingGone);
        }

        // Everything below the committed offset is immutable by protocol;
        // the writer only ever touches bytes at or past it.
        let committed_region =
            unsafe { std::slice::from_raw_parts(segment.base(), committed as usize) };

        let mut views: Vec<&[u8]> = Vec::new();
        let mut local = self.cursor;
        let mut accumulated: u64 = 0;

        while local < committed_rel && (views.len() as u32) < options.max_messages {
            if committed_rel - local < FRAME_OVERHEAD as u64 {
                // partial frame, wait for more data
                break;
            }

            let frame_start = (data_offset + local) as usize;
            let frame_size = framing::decode_prefix(&committed_region[frame_start..]);

            if frame_size < MIN_FRAME_SIZE {
                // With debug checks this is a structural violation; without
                // them the cursor itself is the prime suspect.
                return Err(if options.debug_checks {
                    ShmLogError::frame_corrupt(local, "frame size below minimum")
                } else {
                    ShmLogError::cursor_out_of_range(local, committed_rel)
                });
            }

            if local + frame_size as u64 > committed_rel {
                break;
            }
            if (frame_start + frame_size as usize) as u64 > mapping_len {
                return Err(ShmLogError::MappingGone);
            }
            if accumulated + frame_size as u64 > options.max_bytes as u64 {
                break;
            }

            let frame = &committed_region[frame_start..frame_start + frame_size as usize];
            if options.debug_checks {
                let suffix = framing::decode_suffix(frame, frame_size as usize);
                if suffix != frame_size {
                    return Err(ShmLogError::frame_corrupt(
                        local,
                        "frame prefix does not match its suffix",
                    ));
                }
            }

            views.push(&frame[FRAME_MARKER_BYTES..frame_size as usize - FRAME_MARKER_BYTES]);

            accumulated += frame_size as u64;
            local += frame_size as u64;
        }

        self.cursor = local;
        Ok(views)
    }

    /// Current position relative to the data offset
    pub fn cursor(&self) -> Result<u64> {
        self.segment()?;
        Ok(self.cursor)
    }

    /// Committed size relative to the data offset, acquire-loaded
    pub fn committed_size(&self) -> Result<u64> {
        let segment = self.segment()?;
        segment.ensure_open()?;

        let committed = segment.load_committed();
        let data_offset = segment.data_offset();
        if committed < data_offset {
            return Err(ShmLogError::cursor_out_of_range(committed, data_offset));
        }
        Ok(committed - data_offset)
    }

    /// Reposition the cursor; the target must not exceed the committed size
    pub fn seek(&mut self, position: u64) -> Result<()> {
        let committed_rel = self.committed_size()?;
        if position > committed_rel {
            return Err(ShmLogError::cursor_out_of_range(position, committed_rel));
        }
        self.cursor = position;
        Ok(())
    }

    /// Close the iterator and release its hold on the segment.
    ///
    /// Idempotent; subsequent operations fail with `IteratorClosed`.
    pub fn close(&mut self) {
        self.segment = None;
    }
}

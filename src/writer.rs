//! Single-producer frame writer
//!
//! The writer reserves frames in place with [`LogWriter::allocate`] and
//! publishes every reservation since the previous commit with one release
//! store in [`LogWriter::commit`]. Until that store lands, readers cannot
//! observe the reserved bytes, so a writer that dies mid-batch leaves the
//! log logically unchanged.

use std::sync::Arc;

use log::debug;

use crate::{
    error::{Result, ShmLogError},
    framing::{self, FRAME_MARKER_BYTES, FRAME_OVERHEAD, MIN_FRAME_SIZE},
    segment::SegmentInner,
};

/// The single producer of a segment
///
/// There must be exactly one live writer per segment across all processes;
/// that discipline is the caller's, not the crate's.
pub struct LogWriter {
    segment: Option<Arc<SegmentInner>>,
    /// Absolute offset of the first byte not yet published
    cursor: u64,
    /// Bytes reserved since the last commit
    pending_bytes: u64,
    debug_checks: bool,
}

impl LogWriter {
    pub(crate) fn new(segment: Arc<SegmentInner>, debug_checks: bool) -> Self {
        let cursor = segment.load_committed();
        Self {
            segment: Some(segment),
            cursor,
            pending_bytes: 0,
            debug_checks,
        }
    }

    fn segment(&self) -> Result<&Arc<SegmentInner>> {
        self.segment.as_ref().ok_or(ShmLogError::WriterClosed)
    }

    /// Reserve a frame for a payload of `payload_size` bytes and return the
    /// mutable payload view for the caller to fill.
    ///
    /// The reservation is not visible to readers until [`commit`] runs.
    /// Several reservations may be outstanding at once; `commit` publishes
    /// them all together.
    ///
    /// [`commit`]: LogWriter::commit
    pub fn allocate(&mut self, payload_size: usize) -> Result<&mut [u8]> {
        let segment = self.segment()?.clone();
        segment.ensure_open()?;

        let frame_size = framing::frame_size_for_payload(payload_size)
            .ok_or(ShmLogError::InvalidSize { size: payload_size })? as u64;

        let data_offset = segment.data_offset();
        let length = segment.mapping_len();
        let write_cursor = (self.cursor + self.pending_bytes).max(data_offset);

        if write_cursor + frame_size > length {
            return Err(ShmLogError::segment_full(
                frame_size,
                length.saturating_sub(write_cursor),
            ));
        }

        if self.debug_checks {
            self.check_previous_frame(&segment, write_cursor)?;
        }

        let base = segment.base_mut()?;
        // Only this writer touches bytes at or past the committed size, so
        // the exclusive borrow cannot alias a reader's view.
        let frame = unsafe {
            std::slice::from_raw_parts_mut(base.add(write_cursor as usize), frame_size as usize)
        };
        framing::encode_markers(frame, frame_size as u16);

        self.pending_bytes += frame_size;

        Ok(&mut frame[FRAME_MARKER_BYTES..FRAME_MARKER_BYTES + payload_size])
    }

    /// Validate the marker pair of the frame immediately before the write
    /// cursor. Skipped for the first frame of the data region.
    fn check_previous_frame(&self, segment: &SegmentInner, write_cursor: u64) -> Result<()> {
        let data_offset = segment.data_offset();
        if write_cursor == data_offset
            || write_cursor < segment.header_size() + FRAME_OVERHEAD as u64
        {
            return Ok(());
        }

        let base = segment.base();
        let suffix_offset = write_cursor - FRAME_MARKER_BYTES as u64;
        let prev_size = unsafe {
            let bytes = std::slice::from_raw_parts(base.add(suffix_offset as usize), 2);
            framing::decode_prefix(bytes)
        };

        if prev_size < MIN_FRAME_SIZE {
            return Err(ShmLogError::frame_corrupt(
                suffix_offset,
                "previous frame size below minimum",
            ));
        }

        let prev_start = write_cursor.checked_sub(prev_size as u64).filter(|s| *s >= data_offset);
        let prev_start = match prev_start {
            Some(start) => start,
            None => {
                return Err(ShmLogError::frame_corrupt(
                    suffix_offset,
                    "previous frame crosses the data offset",
                ));
            }
        };

        let prefix = unsafe {
            let bytes = std::slice::from_raw_parts(base.add(prev_start as usize), 2);
            framing::decode_prefix(bytes)
        };
        if prefix != prev_size {
            return Err(ShmLogError::frame_corrupt(
                prev_start,
                "previous frame prefix does not match its suffix",
            ));
        }

        Ok(())
    }

    /// Publish every reservation made since the previous commit.
    ///
    /// A single release store of the new committed size; readers that
    /// acquire-load it are guaranteed to see all payload bytes below it.
    pub fn commit(&mut self) -> Result<()> {
        let segment = self.segment()?;
        segment.ensure_open()?;

        if self.pending_bytes == 0 {
            return Ok(());
        }

        let new_committed = self.cursor + self.pending_bytes;
        segment.store_committed(new_committed);
        debug!("committed through {}", new_committed);

        self.cursor = new_committed;
        self.pending_bytes = 0;
        Ok(())
    }

    /// Bytes reserved but not yet committed
    pub fn pending_bytes(&self) -> u64 {
        self.pending_bytes
    }

    /// Absolute offset of the next unpublished byte
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Close the writer, discarding uncommitted reservations.
    ///
    /// Idempotent; subsequent `allocate`/`commit` calls fail with
    /// `WriterClosed`.
    pub fn close(&mut self) {
        self.pending_bytes = 0;
        self.segment = None;
    }
}

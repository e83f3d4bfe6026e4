//! Byte layout of the segment header
//!
//! The first 24 bytes of every mapping hold three little-endian u64 fields:
//!
//! ```text
//! 0..8    header_size     plain read/write
//! 8..16   data_offset     plain read/write
//! 16..24  committed_size  atomic cell, release store / acquire load
//! ```
//!
//! `committed_size` must stay at byte 16 across format revisions; extending
//! the header is only allowed past byte 24, gated on the stored
//! `header_size`.

use crate::error::{Result, ShmLogError};

/// Byte offset of the `header_size` field
pub const HEADER_SIZE_OFFSET: usize = 0;

/// Byte offset of the `data_offset` field
pub const DATA_OFFSET_OFFSET: usize = 8;

/// Byte offset of the `committed_size` atomic cell
pub const COMMITTED_SIZE_OFFSET: usize = 16;

/// Default (and minimum) header size in bytes
pub const DEFAULT_HEADER_SIZE: u64 = 24;

/// Minimum mapping length: nothing smaller can hold the header
pub const MIN_MAPPING_LEN: u64 = DEFAULT_HEADER_SIZE;

/// Snapshot of the segment header fields
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogHeader {
    /// Header region size; frames never start below this
    pub header_size: u64,
    /// Absolute offset at which payload frames begin
    pub data_offset: u64,
    /// Absolute offset one past the last published frame
    pub committed_size: u64,
}

impl LogHeader {
    /// Decode a header snapshot from the first 24 bytes of a mapping.
    ///
    /// This is a plain (non-atomic) read of all three fields; use it for
    /// inspection, not for synchronization.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < DEFAULT_HEADER_SIZE as usize {
            return Err(ShmLogError::invalid_parameter(
                "header",
                "fewer than 24 bytes supplied",
            ));
        }

        Ok(Self {
            header_size: read_u64_le(bytes, HEADER_SIZE_OFFSET),
            data_offset: read_u64_le(bytes, DATA_OFFSET_OFFSET),
            committed_size: read_u64_le(bytes, COMMITTED_SIZE_OFFSET),
        })
    }

    /// Validate the invariant chain `header_size <= data_offset <=
    /// committed_size <= length`.
    pub fn validate(&self, mapping_len: u64) -> Result<()> {
        if self.data_offset < self.header_size {
            return Err(ShmLogError::cursor_out_of_range(
                self.data_offset,
                self.header_size,
            ));
        }
        if self.committed_size < self.data_offset || self.committed_size > mapping_len {
            return Err(ShmLogError::cursor_out_of_range(
                self.committed_size,
                mapping_len,
            ));
        }
        Ok(())
    }
}

pub(crate) fn read_u64_le(bytes: &[u8], offset: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(raw)
}

pub(crate) fn write_u64_le(bytes: &mut [u8], offset: usize, value: u64) {
    bytes[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

//! Polling consumer over a log iterator
//!
//! The core iterator is zero-copy and non-blocking; this layer trades both
//! for convenience. A [`LogConsumer`] polls the committed size at a fixed
//! interval and hands back owned copies of the payloads, so callers can
//! retain them past the segment's lifetime or ship them across threads.

use std::{
    thread,
    time::{Duration, Instant},
};

use crate::{
    error::Result,
    iterator::{BatchOptions, LogIterator},
    segment::Segment,
};

/// Default interval between committed-size polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Copying, polling consumer of a segment
pub struct LogConsumer {
    iterator: LogIterator,
    poll_interval: Duration,
    batch_options: BatchOptions,
}

impl LogConsumer {
    /// Consume from the start of the log with the default poll interval
    pub fn new(segment: &Segment) -> Result<Self> {
        Self::with_poll_interval(segment, DEFAULT_POLL_INTERVAL)
    }

    /// Consume from the start of the log, polling at the given interval
    pub fn with_poll_interval(segment: &Segment, poll_interval: Duration) -> Result<Self> {
        Ok(Self {
            iterator: segment.create_iterator()?,
            poll_interval,
            batch_options: BatchOptions::default(),
        })
    }

    /// Return every payload committed since the previous call.
    ///
    /// Drains the iterator in batches until it reports no further complete
    /// frame; never sleeps.
    pub fn poll(&mut self) -> Result<Vec<Vec<u8>>> {
        let mut collected = Vec::new();
        loop {
            let batch = self.iterator.next_batch(&self.batch_options)?;
            if batch.is_empty() {
                break;
            }
            collected.extend(batch.into_iter().map(|payload| payload.to_vec()));
        }
        Ok(collected)
    }

    /// Poll until at least one payload arrives or the timeout elapses.
    ///
    /// Returns an empty vector on timeout.
    pub fn wait_for_frames(&mut self, timeout: Duration) -> Result<Vec<Vec<u8>>> {
        let deadline = Instant::now() + timeout;
        loop {
            let frames = self.poll()?;
            if !frames.is_empty() {
                return Ok(frames);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(Vec::new());
            }
            thread::sleep(self.poll_interval.min(remaining));
        }
    }

    /// Current position relative to the data offset
    pub fn cursor(&self) -> Result<u64> {
        self.iterator.cursor()
    }

    /// Close the underlying iterator
    pub fn close(&mut self) {
        self.iterator.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::{Segment, SegmentConfig};
    use tempfile::TempDir;

    fn writable_segment(capacity: u64) -> (Segment, TempDir) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("consumer.log");
        let segment = Segment::open(&SegmentConfig::new(path).writable(capacity)).unwrap();
        (segment, dir)
    }

    #[test]
    fn test_poll_sees_only_new_frames() {
        let (segment, _dir) = writable_segment(4096);
        let mut writer = segment.create_writer().unwrap();
        let mut consumer = LogConsumer::new(&segment).unwrap();

        assert!(consumer.poll().unwrap().is_empty());

        writer.allocate(4).unwrap().copy_from_slice(b"aaaa");
        writer.allocate(4).unwrap().copy_from_slice(b"bbbb");
        writer.commit().unwrap();

        let frames = consumer.poll().unwrap();
        assert_eq!(frames, vec![b"aaaa".to_vec(), b"bbbb".to_vec()]);

        // already consumed, nothing new
        assert!(consumer.poll().unwrap().is_empty());

        writer.allocate(4).unwrap().copy_from_slice(b"cccc");
        writer.commit().unwrap();
        assert_eq!(consumer.poll().unwrap(), vec![b"cccc".to_vec()]);
    }

    #[test]
    fn test_poll_drains_past_batch_limits() {
        let (segment, _dir) = writable_segment(1 << 20);
        let mut writer = segment.create_writer().unwrap();

        // more frames than one default batch admits
        for i in 0..200u32 {
            writer
                .allocate(4)
                .unwrap()
                .copy_from_slice(&i.to_le_bytes());
        }
        writer.commit().unwrap();

        let mut consumer = LogConsumer::new(&segment).unwrap();
        let frames = consumer.poll().unwrap();
        assert_eq!(frames.len(), 200);
        assert_eq!(frames[199], 199u32.to_le_bytes());
    }

    #[test]
    fn test_wait_for_frames_times_out() {
        let (segment, _dir) = writable_segment(256);
        let mut consumer =
            LogConsumer::with_poll_interval(&segment, Duration::from_millis(1)).unwrap();

        let frames = consumer
            .wait_for_frames(Duration::from_millis(20))
            .unwrap();
        assert!(frames.is_empty());
    }

    #[test]
    fn test_wait_for_frames_returns_on_commit() {
        let (segment, _dir) = writable_segment(256);
        let mut writer = segment.create_writer().unwrap();
        let mut consumer =
            LogConsumer::with_poll_interval(&segment, Duration::from_millis(1)).unwrap();

        writer.allocate(2).unwrap().copy_from_slice(b"ok");
        writer.commit().unwrap();

        let frames = consumer.wait_for_frames(Duration::from_secs(1)).unwrap();
        assert_eq!(frames, vec![b"ok".to_vec()]);
    }
}

//! Fragment buffer
//!
//! Collects encoded tags until the muxer decides a fragment is complete.
//! A fragment normally spans one GOP: it is cut right before the next
//! keyframe so every fragment a sink receives starts decodable.

use std::time::Duration;

use bytes::{Bytes, BytesMut};

use crate::media::FlvTag;

/// Encoded tags waiting to be sent as one fragment
#[derive(Debug)]
pub struct FragmentBuffer {
    /// Size in bytes above which a fragment is cut early
    max_size: usize,
    buf: BytesMut,
    /// Tags in the buffer
    tags: usize,
    /// Summed packet durations
    duration: Duration,
}

impl FragmentBuffer {
    /// Create a buffer with the default size cap (4MB)
    pub fn new() -> Self {
        Self::with_max_size(4 * 1024 * 1024)
    }

    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            max_size,
            buf: BytesMut::new(),
            tags: 0,
            duration: Duration::ZERO,
        }
    }

    /// Append a tag covering `duration` of media
    pub fn push(&mut self, tag: &FlvTag, duration: Duration) {
        tag.encode(&mut self.buf);
        self.tags += 1;
        self.duration += duration;
    }

    /// Whether appending `tag` would exceed the size cap
    pub fn would_overflow(&self, tag: &FlvTag) -> bool {
        !self.is_empty() && self.buf.len() + tag.encoded_len() > self.max_size
    }

    /// Take the buffered fragment, leaving the buffer empty
    pub fn take(&mut self) -> Option<Bytes> {
        if self.is_empty() {
            return None;
        }
        self.tags = 0;
        self.duration = Duration::ZERO;
        Some(self.buf.split().freeze())
    }

    pub fn is_empty(&self) -> bool {
        self.tags == 0
    }

    pub fn tag_count(&self) -> usize {
        self.tags
    }

    /// Buffered size in bytes
    pub fn size(&self) -> usize {
        self.buf.len()
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}

impl Default for FragmentBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_tag(timestamp: u32, size: usize) -> FlvTag {
        let mut data = vec![0u8; size];
        data[0] = 0x27;
        FlvTag::video(timestamp, Bytes::from(data))
    }

    #[test]
    fn test_push_and_take() {
        let mut buffer = FragmentBuffer::new();
        assert!(buffer.take().is_none());

        buffer.push(&make_tag(0, 100), Duration::from_millis(40));
        buffer.push(&make_tag(40, 50), Duration::from_millis(40));
        assert_eq!(buffer.tag_count(), 2);
        assert_eq!(buffer.duration(), Duration::from_millis(80));
        assert_eq!(buffer.size(), 100 + 50 + 2 * 15);

        let fragment = buffer.take().unwrap();
        assert_eq!(fragment.len(), 180);
        assert!(buffer.is_empty());
        assert_eq!(buffer.duration(), Duration::ZERO);
    }

    #[test]
    fn test_would_overflow() {
        let mut buffer = FragmentBuffer::with_max_size(200);
        // An empty buffer always accepts a tag
        assert!(!buffer.would_overflow(&make_tag(0, 500)));

        buffer.push(&make_tag(0, 100), Duration::ZERO);
        assert!(!buffer.would_overflow(&make_tag(0, 50)));
        assert!(buffer.would_overflow(&make_tag(0, 100)));
    }
}

//! Byte ranges as they appear on the imageio wire.
//!
//! Requests use inclusive `start-end` offsets: `Range: bytes=<start>-<end>` for reads and
//! `Content-Range: bytes <start>-<end>/*` for writes (the server only looks at the first offset
//! and the body length, so the complete-length is always `*`).

/// An inclusive byte range (`start..=end`). Never empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Range covering `len` bytes at `offset`, or `None` when `len` is zero or the end overflows.
    pub fn new(offset: u64, len: u64) -> Option<Self> {
        if len == 0 {
            return None;
        }
        let end = offset.checked_add(len - 1)?;
        Some(Self { start: offset, end })
    }

    pub fn len(self) -> u64 {
        self.end - self.start + 1
    }

    /// Exclusive end offset; saturates at `u64::MAX` for a range ending on the last byte.
    pub fn end_exclusive(self) -> u64 {
        self.end.saturating_add(1)
    }

    pub fn range_header(self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }

    pub fn content_range_header(self) -> String {
        format!("bytes {}-{}/*", self.start, self.end)
    }

    /// Split into consecutive sub-ranges of at most `max_len` bytes each.
    pub fn chunks(self, max_len: u64) -> Chunks {
        Chunks {
            next: Some(self.start),
            end: self.end,
            max_len: max_len.max(1),
        }
    }

    /// Parse a single-range `Range: bytes=<start>-<end>` value. Open-ended and suffix forms are
    /// not produced by this crate and are rejected.
    pub fn parse_range_header(value: &str) -> Option<Self> {
        let (unit, spec) = value.trim().split_once('=')?;
        if !unit.trim().eq_ignore_ascii_case("bytes") {
            return None;
        }
        parse_start_end(spec)
    }

    /// Parse `Content-Range: bytes <start>-<end>/<total|*>`.
    pub fn parse_content_range(value: &str) -> Option<Self> {
        let mut parts = value.trim().split_whitespace();
        let unit = parts.next()?;
        if !unit.eq_ignore_ascii_case("bytes") {
            return None;
        }
        let (range, total) = parts.next()?.split_once('/')?;
        if total != "*" && total.parse::<u64>().is_err() {
            return None;
        }
        parse_start_end(range)
    }
}

fn parse_start_end(spec: &str) -> Option<ByteRange> {
    let (start, end) = spec.trim().split_once('-')?;
    let start: u64 = start.trim().parse().ok()?;
    let end: u64 = end.trim().parse().ok()?;
    (start <= end).then_some(ByteRange { start, end })
}

pub struct Chunks {
    next: Option<u64>,
    end: u64,
    max_len: u64,
}

impl Iterator for Chunks {
    type Item = ByteRange;

    fn next(&mut self) -> Option<ByteRange> {
        let start = self.next?;
        let end = start.saturating_add(self.max_len - 1).min(self.end);
        self.next = if end == self.end { None } else { Some(end + 1) };
        Some(ByteRange { start, end })
    }
}

//! Line framing for the serial byte stream.
//!
//! The projector terminates every response with a carriage return. Bytes are
//! accumulated until a delimiter shows up; a partial line that sits in the
//! buffer longer than the staleness threshold is thrown away, which is the
//! only way to recover from a truncated or corrupted response.

use std::time::{Duration, Instant};

/// Line delimiter used in both directions.
pub const DELIMITER: u8 = b'\r';

/// Reassembles raw bytes into delimiter-separated lines.
#[derive(Debug, Clone)]
pub struct LineFramer {
    /// Bytes received since the last delimiter
    buffer: Vec<u8>,
    /// Time the most recent byte arrived
    last_data: Option<Instant>,
    /// Age after which a partial line is discarded
    stale_after: Duration,
}

impl LineFramer {
    /// Create a new framer.
    pub fn new(stale_after: Duration) -> Self {
        Self {
            buffer: Vec::with_capacity(64),
            last_data: None,
            stale_after,
        }
    }

    /// Append received bytes and return every line they complete, in order.
    ///
    /// The delimiter itself is never part of a returned line.
    pub fn feed(&mut self, bytes: &[u8], now: Instant) -> Vec<Vec<u8>> {
        if bytes.is_empty() {
            return Vec::new();
        }
        self.last_data = Some(now);

        let mut lines = Vec::new();
        for &byte in bytes {
            if byte == DELIMITER {
                lines.push(std::mem::take(&mut self.buffer));
            } else {
                self.buffer.push(byte);
            }
        }
        lines
    }

    /// Check whether no partial line is pending.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Bytes of the pending partial line.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// Check whether the pending partial line has outlived the threshold.
    pub fn is_stale(&self, now: Instant) -> bool {
        match self.last_data {
            Some(last) if !self.buffer.is_empty() => {
                now.saturating_duration_since(last) > self.stale_after
            }
            _ => false,
        }
    }

    /// Drop a stale partial line, returning what was discarded.
    pub fn discard_if_stale(&mut self, now: Instant) -> Option<Vec<u8>> {
        if self.is_stale(now) {
            Some(std::mem::take(&mut self.buffer))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_line() {
        let mut framer = LineFramer::new(Duration::from_secs(10));
        let now = Instant::now();

        assert!(framer.feed(b"*00", now).is_empty());
        assert!(!framer.is_empty());

        let lines = framer.feed(b"0\r", now);
        assert_eq!(lines, vec![b"*000".to_vec()]);
        assert!(framer.is_empty());
    }

    #[test]
    fn test_multiple_lines_in_one_chunk() {
        let mut framer = LineFramer::new(Duration::from_secs(10));
        let lines = framer.feed(b"*000\rLamp 1\rSrc", Instant::now());

        assert_eq!(lines, vec![b"*000".to_vec(), b"Lamp 1".to_vec()]);
        assert_eq!(framer.pending(), b"Src");
    }

    #[test]
    fn test_empty_line() {
        let mut framer = LineFramer::new(Duration::from_secs(10));
        let lines = framer.feed(b"\r", Instant::now());
        assert_eq!(lines, vec![Vec::<u8>::new()]);
    }

    #[test]
    fn test_stale_partial_line_discarded_once() {
        let mut framer = LineFramer::new(Duration::from_secs(10));
        let start = Instant::now();

        framer.feed(b"Lam", start);
        assert!(framer.discard_if_stale(start + Duration::from_secs(10)).is_none());

        let discarded = framer.discard_if_stale(start + Duration::from_secs(11));
        assert_eq!(discarded, Some(b"Lam".to_vec()));
        assert!(framer.is_empty());

        assert!(framer.discard_if_stale(start + Duration::from_secs(30)).is_none());
    }

    #[test]
    fn test_new_bytes_refresh_staleness() {
        let mut framer = LineFramer::new(Duration::from_secs(10));
        let start = Instant::now();

        framer.feed(b"L", start);
        framer.feed(b"a", start + Duration::from_secs(8));
        assert!(!framer.is_stale(start + Duration::from_secs(15)));
        assert!(framer.is_stale(start + Duration::from_secs(19)));
    }

    #[test]
    fn test_empty_buffer_never_stale() {
        let mut framer = LineFramer::new(Duration::from_secs(1));
        let start = Instant::now();

        framer.feed(b"*000\r", start);
        assert!(!framer.is_stale(start + Duration::from_secs(60)));
    }
}

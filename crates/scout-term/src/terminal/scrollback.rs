//! Bounded scrollback used to replay terminal state to late viewers.

pub const DEFAULT_SCROLLBACK_BYTES: usize = 50_000;

/// FIFO byte buffer capped at `capacity` bytes.
///
/// Oldest output is dropped first. Truncation always lands on a UTF-8
/// character boundary, so a snapshot may be a few bytes shorter than the
/// cap but never longer.
#[derive(Debug)]
pub struct Scrollback {
    buf: String,
    /// Offset of the first retained byte in `buf`.
    start: usize,
    capacity: usize,
}

impl Scrollback {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: String::new(),
            start: 0,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.buf.len() - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn append(&mut self, data: &str) {
        if data.len() >= self.capacity {
            // Only the tail of this chunk survives.
            self.buf.clear();
            self.start = 0;
            let mut from = data.len() - self.capacity;
            while !data.is_char_boundary(from) {
                from += 1;
            }
            self.buf.push_str(&data[from..]);
            return;
        }

        self.buf.push_str(data);
        if self.len() > self.capacity {
            let mut start = self.buf.len() - self.capacity;
            while !self.buf.is_char_boundary(start) {
                start += 1;
            }
            self.start = start;
        }

        // Compact once the dead prefix outgrows the live content.
        if self.start > self.capacity {
            self.buf.drain(..self.start);
            self.start = 0;
        }
    }

    pub fn snapshot(&self) -> String {
        self.buf[self.start..].to_string()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.start = 0;
    }
}

impl Default for Scrollback {
    fn default() -> Self {
        Self::new(DEFAULT_SCROLLBACK_BYTES)
    }
}

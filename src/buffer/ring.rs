//! Circular byte buffer with a power-of-two capacity. Head and tail are
//! free-running indices, so `tail - head` is always the buffered byte count
//! and `head & mask` / `tail & mask` locate the data. The buffer doubles in
//! place when a write does not fit; the elastic buffer above it decides when
//! growth should stop and spill elsewhere.

use std::io;

const MIN_CAPACITY: usize = 64;

pub struct RingBuffer {
    buf: Vec<u8>,
    head: usize,
    tail: usize,
}

impl RingBuffer {
    pub fn new() -> Self {
        Self::with_capacity(MIN_CAPACITY)
    }

    /// Capacity is rounded up to the next power of two.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(MIN_CAPACITY).next_power_of_two();
        Self {
            buf: vec![0; capacity],
            head: 0,
            tail: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes available to read.
    pub fn buffered(&self) -> usize {
        self.tail.wrapping_sub(self.head)
    }

    /// Free space before the next growth.
    pub fn available(&self) -> usize {
        self.capacity() - self.buffered()
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    fn mask(&self) -> usize {
        self.capacity() - 1
    }

    /// Appends all of `p`, growing as needed. Returns `p.len()`.
    pub fn write(&mut self, p: &[u8]) -> usize {
        if p.is_empty() {
            return 0;
        }
        if p.len() > self.available() {
            self.grow(self.buffered() + p.len());
        }
        let start = self.tail & self.mask();
        let first = (self.capacity() - start).min(p.len());
        self.buf[start..start + first].copy_from_slice(&p[..first]);
        if first < p.len() {
            self.buf[..p.len() - first].copy_from_slice(&p[first..]);
        }
        self.tail = self.tail.wrapping_add(p.len());
        p.len()
    }

    /// Copies up to `p.len()` buffered bytes into `p` and consumes them.
    pub fn read(&mut self, p: &mut [u8]) -> usize {
        let n = self.buffered().min(p.len());
        if n == 0 {
            return 0;
        }
        let (head, tail) = self.peek(n);
        p[..head.len()].copy_from_slice(head);
        p[head.len()..n].copy_from_slice(&tail[..n - head.len()]);
        self.head = self.head.wrapping_add(n);
        n
    }

    /// Borrows up to `n` buffered bytes without consuming them. The view is
    /// at most two slices: the run from head to the end of the region, and
    /// the wrapped remainder from the start.
    pub fn peek(&self, n: usize) -> (&[u8], &[u8]) {
        let n = self.buffered().min(n);
        if n == 0 {
            return (&[], &[]);
        }
        let start = self.head & self.mask();
        let first = (self.capacity() - start).min(n);
        let head = &self.buf[start..start + first];
        let tail = &self.buf[..n - first];
        (head, tail)
    }

    /// Drops up to `n` buffered bytes; returns how many were dropped.
    pub fn discard(&mut self, n: usize) -> usize {
        let n = self.buffered().min(n);
        self.head = self.head.wrapping_add(n);
        if self.is_empty() {
            self.head = 0;
            self.tail = 0;
        }
        n
    }

    /// Fills free space with a single `read` call, growing first when full.
    /// Returns the byte count from the reader; `Ok(0)` means EOF.
    pub fn read_from<R: io::Read>(&mut self, r: &mut R) -> io::Result<usize> {
        if self.available() == 0 {
            self.grow(self.capacity() * 2);
        }
        let start = self.tail & self.mask();
        let writable = (self.capacity() - start).min(self.available());
        let n = r.read(&mut self.buf[start..start + writable])?;
        self.tail = self.tail.wrapping_add(n);
        Ok(n)
    }

    /// Drains buffered bytes into `w`, one contiguous run per write call.
    /// The flag is true when a short write stopped the drain with the
    /// remainder still queued.
    pub fn write_to<W: io::Write>(&mut self, w: &mut W) -> io::Result<(usize, bool)> {
        let mut total = 0;
        while !self.is_empty() {
            let (head, _) = self.peek(usize::MAX);
            let head_len = head.len();
            let n = w.write(head)?;
            self.head = self.head.wrapping_add(n);
            total += n;
            if n < head_len {
                return Ok((total, true));
            }
        }
        self.head = 0;
        self.tail = 0;
        Ok((total, false))
    }

    /// Consumes the next `n` bytes when they form one unwrapped run at the
    /// head, returning them as a single borrow valid until the next write.
    /// Returns `None` when the run wraps or `n` exceeds the buffered bytes.
    pub fn take_head(&mut self, n: usize) -> Option<&[u8]> {
        if n == 0 {
            return Some(&[]);
        }
        let start = self.head & self.mask();
        if n > self.buffered() || start + n > self.capacity() {
            return None;
        }
        self.head = self.head.wrapping_add(n);
        if self.is_empty() {
            self.head = 0;
            self.tail = 0;
        }
        Some(&self.buf[start..start + n])
    }

    pub fn reset(&mut self) {
        self.head = 0;
        self.tail = 0;
    }

    fn grow(&mut self, min_capacity: usize) {
        let new_capacity = min_capacity.max(self.capacity() * 2).next_power_of_two();
        let size = self.buffered();
        let mut new_buf = vec![0; new_capacity];
        let (head, tail) = self.peek(usize::MAX);
        new_buf[..head.len()].copy_from_slice(head);
        new_buf[head.len()..size].copy_from_slice(tail);
        self.buf = new_buf;
        self.head = 0;
        self.tail = size;
    }
}

impl Default for RingBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity())
            .field("buffered", &self.buffered())
            .finish()
    }
}

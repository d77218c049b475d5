//! Hybrid FIFO combining a pooled ring buffer with a linked chunk buffer.
//! The ring serves the steady state at zero allocation; once its content
//! reaches the watermark, or whenever the list already holds data, writes
//! spill into the list so the ring never grows past the configured bound.
//! Reads always drain the ring first, and an exactly-drained ring goes back
//! to the shared pool until the next write.

use std::io;

use crate::buffer::linked::LinkedBuffer;
use crate::buffer::ring::RingBuffer;
use crate::pool::{ring_pool, PooledObject};

pub struct ElasticBuffer {
    watermark: usize,
    ring: Option<PooledObject<RingBuffer>>,
    list: LinkedBuffer,
}

/// Snapshot of the ring's dimensions used by the write-path split decision.
struct RingDims {
    capacity: usize,
    available: usize,
    buffered: usize,
}

impl ElasticBuffer {
    /// `watermark` bounds how many bytes the ring holds before writes spill
    /// into the chunk list. Values below one are clamped to one.
    pub fn new(watermark: usize) -> Self {
        Self {
            watermark: watermark.max(1),
            ring: Some(ring_pool().acquire()),
            list: LinkedBuffer::new(),
        }
    }

    /// Appends `p`; always accepts the full slice.
    pub fn write(&mut self, p: &[u8]) -> usize {
        if p.is_empty() {
            return 0;
        }
        let Some(ring) = self.prepare_write() else {
            self.list.push_bytes_back(p);
            return p.len();
        };
        if ring.capacity >= self.watermark && p.len() > ring.available {
            let (fit, spill) = p.split_at(ring.available);
            self.ring.as_mut().unwrap().write(fit);
            self.list.push_bytes_back(spill);
            return p.len();
        }
        self.ring.as_mut().unwrap().write(p)
    }

    /// Appends every slice of `bs` in order; equivalent to writing their
    /// concatenation.
    pub fn writev(&mut self, bs: &[&[u8]]) -> usize {
        let Some(ring) = self.prepare_write() else {
            let mut n = 0;
            for b in bs {
                self.list.push_bytes_back(b);
                n += b.len();
            }
            return n;
        };

        let mut writable = if ring.capacity < self.watermark {
            self.watermark - ring.buffered
        } else {
            ring.available
        };
        let mut total = 0;
        let mut spill_from = bs.len();
        for (i, b) in bs.iter().enumerate() {
            total += b.len();
            if b.len() > writable {
                let (fit, spill) = b.split_at(writable);
                self.ring.as_mut().unwrap().write(fit);
                self.list.push_bytes_back(spill);
                spill_from = i + 1;
                break;
            }
            self.ring.as_mut().unwrap().write(b);
            writable -= b.len();
            spill_from = i + 1;
        }
        for b in &bs[spill_from..] {
            total += b.len();
            self.list.push_bytes_back(b);
        }
        total
    }

    /// Copies buffered bytes into `p`, ring first, then the list.
    pub fn read(&mut self, p: &mut [u8]) -> usize {
        let Some(ring) = self.ring.as_mut() else {
            return self.list.read(p);
        };
        let n = ring.read(p);
        self.release_ring_if_empty();
        if n == p.len() {
            return n;
        }
        n + self.list.read(&mut p[n..])
    }

    /// Borrowed views of up to `n` buffered bytes (`usize::MAX` for all),
    /// in read order. Valid until the next mutation.
    pub fn peek(&self, n: usize) -> Vec<&[u8]> {
        let mut out = Vec::new();
        let mut gathered = 0;
        if let Some(ring) = self.ring.as_ref() {
            let (head, tail) = ring.peek(n);
            for slice in [head, tail] {
                if !slice.is_empty() {
                    out.push(slice);
                    gathered += slice.len();
                }
            }
            if gathered >= n {
                return out;
            }
        }
        self.list.peek_into(&mut out, n, gathered);
        out
    }

    /// Drops up to `n` bytes from the front; returns how many were dropped.
    pub fn discard(&mut self, n: usize) -> usize {
        if n == 0 {
            return 0;
        }
        let Some(ring) = self.ring.as_mut() else {
            return self.list.discard(n);
        };
        let in_ring = ring.buffered();
        let mut discarded = ring.discard(n);
        if n <= in_ring {
            if n == in_ring {
                self.ring = None;
            }
            return discarded;
        }
        self.ring = None;
        discarded += self.list.discard(n - in_ring);
        discarded
    }

    /// Fills from `r` with one read call, targeting the ring until the
    /// watermark and the list beyond it.
    pub fn read_from<R: io::Read>(&mut self, r: &mut R) -> io::Result<usize> {
        if self.prepare_write().is_none() {
            return self.list.read_from(r);
        }
        self.ring.as_mut().unwrap().read_from(r)
    }

    /// Drains into `w`: ring first, releasing it on exact drain, then the
    /// list one chunk per write call. The flag is true when a short write
    /// stopped the drain with the remainder still queued.
    pub fn write_to<W: io::Write>(&mut self, w: &mut W) -> io::Result<(usize, bool)> {
        let mut total = 0;
        if let Some(ring) = self.ring.as_mut() {
            let (n, short) = ring.write_to(w)?;
            total += n;
            self.release_ring_if_empty();
            if short {
                return Ok((total, true));
            }
        }
        let (n, short) = self.list.write_to(w)?;
        Ok((total + n, short))
    }

    /// Length of the longest contiguous run at the front of the buffer.
    pub fn front_contiguous_len(&self) -> usize {
        self.ring.as_ref().map_or(0, |r| r.peek(usize::MAX).0.len())
    }

    /// Consumes `n` bytes and returns them as one borrow when they form an
    /// unwrapped run at the front of the ring; `None` otherwise, consuming
    /// nothing. The ring is not released even on exact drain here, since
    /// the returned borrow points into it; it is reclaimed by the next
    /// draining operation.
    pub fn take_contiguous(&mut self, n: usize) -> Option<&[u8]> {
        if n == 0 {
            return Some(&[]);
        }
        let ring = self.ring.as_mut()?;
        ring.take_head(n)
    }

    /// Bytes available to read across ring and list.
    pub fn buffered(&self) -> usize {
        let in_ring = self.ring.as_ref().map_or(0, |r| r.buffered());
        in_ring + self.list.buffered()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.as_ref().map_or(true, |r| r.is_empty()) && self.list.is_empty()
    }

    /// Returns the ring and all chunks to their pools.
    pub fn release(&mut self) {
        self.ring = None;
        self.list.reset();
    }

    /// Ensures a ring exists when the write path may target it. Returns its
    /// dimensions, or `None` when writes must go to the list (it already
    /// holds data or the ring sits at the watermark).
    fn prepare_write(&mut self) -> Option<RingDims> {
        if self.ring.is_none() && self.list.is_empty() {
            self.ring = Some(ring_pool().acquire());
        }
        match self.ring.as_ref() {
            Some(ring) if self.list.is_empty() && ring.buffered() < self.watermark => {
                Some(RingDims {
                    capacity: ring.capacity(),
                    available: ring.available(),
                    buffered: ring.buffered(),
                })
            }
            _ => None,
        }
    }

    fn release_ring_if_empty(&mut self) {
        if self.ring.as_ref().is_some_and(|r| r.is_empty()) {
            self.ring = None;
        }
    }
}

impl std::fmt::Debug for ElasticBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElasticBuffer")
            .field("watermark", &self.watermark)
            .field("buffered", &self.buffered())
            .finish()
    }
}

//! Process-wide object pools for the byte chunks and ring buffers that back
//! the elastic buffers. Acquisition hands out a guard that returns the
//! object to the pool on drop, so every exit path puts back what it took.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex, OnceLock};

use crate::buffer::ring::RingBuffer;

/// Fresh byte chunks start with this capacity; they grow as needed.
pub(crate) const CHUNK_CAPACITY: usize = 4096;

/// Chunks that ballooned past this are not retained on reuse.
const MAX_RETAINED_CHUNK: usize = 64 * 1024;

/// Ring buffers handed out by the pool start at this capacity.
const POOLED_RING_CAPACITY: usize = 1024;

/// Rings that grew past this are not retained on reuse.
const MAX_RETAINED_RING: usize = 64 * 1024;

pub struct ObjectPool<T> {
    sender: Sender<T>,
    receiver: Mutex<Receiver<T>>,
    create: Box<dyn Fn() -> T + Send + Sync>,
    reset: Box<dyn Fn(&mut T) + Send + Sync>,
    outstanding: Arc<AtomicUsize>,
}

impl<T: Send + 'static> ObjectPool<T> {
    pub fn new<C, R>(initial_size: usize, create: C, reset: R) -> Self
    where
        C: Fn() -> T + Send + Sync + 'static,
        R: Fn(&mut T) + Send + Sync + 'static,
    {
        let (sender, receiver) = mpsc::channel();
        for _ in 0..initial_size {
            let _ = sender.send(create());
        }
        Self {
            sender,
            receiver: Mutex::new(receiver),
            create: Box::new(create),
            reset: Box::new(reset),
            outstanding: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn acquire(&self) -> PooledObject<T> {
        let mut object = {
            let receiver = self.receiver.lock().unwrap();
            match receiver.try_recv() {
                Ok(obj) => obj,
                Err(TryRecvError::Empty) => (self.create)(),
                Err(TryRecvError::Disconnected) => unreachable!("pool sender lives in the pool"),
            }
        };
        (self.reset)(&mut object);
        self.outstanding.fetch_add(1, Ordering::Relaxed);
        PooledObject {
            object: Some(object),
            sender: self.sender.clone(),
            outstanding: Arc::clone(&self.outstanding),
        }
    }

    /// Number of objects currently checked out. Zero once all guards drop.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Relaxed)
    }
}

pub struct PooledObject<T> {
    object: Option<T>,
    sender: Sender<T>,
    outstanding: Arc<AtomicUsize>,
}

impl<T> Deref for PooledObject<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.object.as_ref().unwrap()
    }
}

impl<T> DerefMut for PooledObject<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.object.as_mut().unwrap()
    }
}

impl<T> Drop for PooledObject<T> {
    fn drop(&mut self) {
        self.outstanding.fetch_sub(1, Ordering::Relaxed);
        if let Some(object) = self.object.take() {
            let _ = self.sender.send(object);
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for PooledObject<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.object.fmt(f)
    }
}

/// Shared pool of byte chunks backing the linked buffers and async writes.
pub(crate) fn chunk_pool() -> &'static ObjectPool<Vec<u8>> {
    static POOL: OnceLock<ObjectPool<Vec<u8>>> = OnceLock::new();
    POOL.get_or_init(|| {
        ObjectPool::new(
            16,
            || Vec::with_capacity(CHUNK_CAPACITY),
            |chunk| {
                if chunk.capacity() > MAX_RETAINED_CHUNK {
                    *chunk = Vec::with_capacity(CHUNK_CAPACITY);
                } else {
                    chunk.clear();
                }
            },
        )
    })
}

/// Shared pool of ring buffers; an elastic buffer holds at most one at a time.
pub(crate) fn ring_pool() -> &'static ObjectPool<RingBuffer> {
    static POOL: OnceLock<ObjectPool<RingBuffer>> = OnceLock::new();
    POOL.get_or_init(|| {
        ObjectPool::new(
            8,
            || RingBuffer::with_capacity(POOLED_RING_CAPACITY),
            |ring| {
                if ring.capacity() > MAX_RETAINED_RING {
                    *ring = RingBuffer::with_capacity(POOLED_RING_CAPACITY);
                } else {
                    ring.reset();
                }
            },
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_release_reuses_objects() {
        let pool: ObjectPool<Vec<u8>> = ObjectPool::new(1, || Vec::with_capacity(8), |v| v.clear());
        {
            let mut obj = pool.acquire();
            obj.extend_from_slice(b"abc");
            assert_eq!(pool.outstanding(), 1);
        }
        assert_eq!(pool.outstanding(), 0);
        let obj = pool.acquire();
        assert!(obj.is_empty(), "reset hook must clear recycled objects");
    }

    #[test]
    fn creates_on_empty() {
        let pool: ObjectPool<u32> = ObjectPool::new(0, || 7, |_| {});
        let a = pool.acquire();
        let b = pool.acquire();
        assert_eq!(*a, 7);
        assert_eq!(*b, 7);
        assert_eq!(pool.outstanding(), 2);
    }

    #[test]
    fn oversized_chunks_are_not_retained() {
        let pool: ObjectPool<Vec<u8>> = ObjectPool::new(
            0,
            || Vec::with_capacity(CHUNK_CAPACITY),
            |chunk| {
                if chunk.capacity() > MAX_RETAINED_CHUNK {
                    *chunk = Vec::with_capacity(CHUNK_CAPACITY);
                } else {
                    chunk.clear();
                }
            },
        );
        {
            let mut chunk = pool.acquire();
            chunk.resize(MAX_RETAINED_CHUNK * 2, 0);
        }
        let chunk = pool.acquire();
        assert!(chunk.capacity() <= MAX_RETAINED_CHUNK);
    }

    #[test]
    fn shared_pools_hand_out_objects() {
        let chunk = chunk_pool().acquire();
        assert!(chunk.is_empty());
        let ring = ring_pool().acquire();
        assert!(ring.is_empty());
    }
}

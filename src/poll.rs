//! Readiness poller for one event loop: a `mio::Poll` plus the cross-thread
//! ingress machinery. Other threads submit closures through [`Trigger`];
//! submission is lock-free and wakes the loop with a single waker write
//! unless a wake is already pending.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_queue::SegQueue;
use mio::event::Source;
use mio::{Events, Interest, Poll, Token, Waker};

use crate::error::Result;
use crate::eventloop::Reactor;

/// Token reserved for the waker.
pub(crate) const WAKER: Token = Token(0);
/// Token reserved for the loop's listener.
pub(crate) const LISTENER: Token = Token(1);
/// First token handed to connections.
pub(crate) const FIRST_CONN: usize = 2;

/// A closure executed on the owning loop's thread.
pub(crate) type Task = Box<dyn FnOnce(&mut Reactor) + Send + 'static>;

/// Thread-safe handle into a loop: task queue plus waker.
pub(crate) struct Trigger {
    waker: Waker,
    tasks: SegQueue<Task>,
    notified: AtomicBool,
}

impl Trigger {
    /// Queues `task` for the loop thread and wakes it if no wake is already
    /// pending.
    pub fn submit(&self, task: Task) {
        self.tasks.push(task);
        if !self.notified.swap(true, Ordering::AcqRel) {
            let _ = self.waker.wake();
        }
    }

    /// Wakes the loop without queueing work, e.g. to have it observe the
    /// shutdown flag.
    pub fn wake(&self) {
        let _ = self.waker.wake();
    }

    /// Clears the pending-wake flag and hands back the queued tasks.
    /// Clearing first means a producer racing with the drain re-arms the
    /// waker instead of being lost.
    pub fn begin_drain(&self) {
        self.notified.store(false, Ordering::Release);
    }

    pub fn pop_task(&self) -> Option<Task> {
        self.tasks.pop()
    }
}

pub(crate) struct Poller {
    poll: Poll,
    trigger: Arc<Trigger>,
}

impl Poller {
    pub fn new() -> Result<Self> {
        let poll = Poll::new()?;
        let waker = Waker::new(poll.registry(), WAKER)?;
        Ok(Self {
            poll,
            trigger: Arc::new(Trigger {
                waker,
                tasks: SegQueue::new(),
                notified: AtomicBool::new(false),
            }),
        })
    }

    pub fn trigger(&self) -> Arc<Trigger> {
        Arc::clone(&self.trigger)
    }

    pub fn add_read<S: Source + ?Sized>(&self, src: &mut S, token: Token) -> io::Result<()> {
        self.poll.registry().register(src, token, Interest::READABLE)
    }

    pub fn add_read_write<S: Source + ?Sized>(&self, src: &mut S, token: Token) -> io::Result<()> {
        self.poll
            .registry()
            .register(src, token, Interest::READABLE | Interest::WRITABLE)
    }

    pub fn mod_read<S: Source + ?Sized>(&self, src: &mut S, token: Token) -> io::Result<()> {
        self.poll.registry().reregister(src, token, Interest::READABLE)
    }

    pub fn mod_read_write<S: Source + ?Sized>(&self, src: &mut S, token: Token) -> io::Result<()> {
        self.poll
            .registry()
            .reregister(src, token, Interest::READABLE | Interest::WRITABLE)
    }

    pub fn delete<S: Source + ?Sized>(&self, src: &mut S) -> io::Result<()> {
        self.poll.registry().deregister(src)
    }

    /// Blocks for readiness, retrying on EINTR.
    pub fn poll(&mut self, events: &mut Events, timeout: Option<Duration>) -> io::Result<()> {
        loop {
            match self.poll.poll(events, timeout) {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn waker_interrupts_poll() {
        let mut poller = Poller::new().unwrap();
        let trigger = poller.trigger();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            trigger.submit(Box::new(|_| {}));
        });

        let mut events = Events::with_capacity(8);
        let start = Instant::now();
        poller.poll(&mut events, Some(Duration::from_secs(5))).unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(events.iter().any(|ev| ev.token() == WAKER));
        handle.join().unwrap();
    }

    #[test]
    fn submit_queues_tasks_in_order() {
        let poller = Poller::new().unwrap();
        let trigger = poller.trigger();
        trigger.submit(Box::new(|_| {}));
        trigger.submit(Box::new(|_| {}));
        trigger.begin_drain();
        let mut drained = 0;
        while trigger.pop_task().is_some() {
            drained += 1;
        }
        assert_eq!(drained, 2);
    }

    #[test]
    fn second_submit_skips_redundant_wakes() {
        let poller = Poller::new().unwrap();
        let trigger = poller.trigger();
        trigger.submit(Box::new(|_| {}));
        assert!(trigger.notified.load(Ordering::Acquire));
        trigger.submit(Box::new(|_| {}));
        trigger.begin_drain();
        assert!(!trigger.notified.load(Ordering::Acquire));
    }
}

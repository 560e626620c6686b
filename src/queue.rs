use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed};
use std::sync::Arc;

use concurrent_queue::ConcurrentQueue;

use crate::epoll::{Epoll, EpollOpt, Ready, Source, Token};
use crate::waker::Waker;

/// Multi-producer single-consumer queue whose non-empty state is observable
/// through a pollable file descriptor. Used as a scheduler inbox: producers
/// on any thread push, the owning scheduler registers the queue in its
/// poller and drains it when the waker fd turns readable.
pub struct Queue<T> {
    inner: Arc<QueueInner<T>>,
}

struct QueueInner<T> {
    queue: ConcurrentQueue<T>,
    pending: AtomicUsize,
    waker: Waker,
}

impl<T: Send> Queue<T> {
    pub fn unbounded() -> io::Result<Queue<T>> {
        Ok(Queue {
            inner: Arc::new(QueueInner {
                queue: ConcurrentQueue::unbounded(),
                pending: AtomicUsize::new(0),
                waker: Waker::new()?,
            }),
        })
    }

    fn inc(&self) -> io::Result<()> {
        let cnt = self.inner.pending.fetch_add(1, Acquire);

        if 0 == cnt {
            self.inner.waker.set_readiness(Ready::readable())?;
        }
        Ok(())
    }

    fn dec(&self) -> io::Result<()> {
        let first = self.inner.pending.load(Acquire);

        if first == 1 {
            self.inner.waker.set_readiness(Ready::empty())?;
        }

        let second = self.inner.pending.fetch_sub(1, AcqRel);

        if first == 1 && second > 1 {
            self.inner.waker.set_readiness(Ready::readable())?;
        }

        Ok(())
    }

    pub fn push(&self, value: T) {
        // the queue is unbounded, push only fails once closed, and we never close
        let _ = self.inner.queue.push(value);
        let _ = self.inc();
    }

    pub fn pop(&self) -> Option<T> {
        if let Ok(value) = self.inner.queue.pop() {
            let _ = self.dec();
            return Some(value);
        }

        None
    }

    pub fn pending(&self) -> usize {
        self.inner.pending.load(Relaxed)
    }

    /// Force the waker readable so a sleeping consumer re-enters its drain
    /// loop even when no item was pushed.
    pub fn wakeup(&self) -> io::Result<()> {
        self.inner.waker.wakeup()
    }
}

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Queue<T> {
        Queue {
            inner: self.inner.clone(),
        }
    }
}

impl<T> AsRawFd for Queue<T> {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.waker.as_raw_fd()
    }
}

impl<T: Send> Source for Queue<T> {
    fn add(&self, epoll: &Epoll, token: Token, interest: Ready, opts: EpollOpt) -> io::Result<()> {
        self.inner.waker.add(epoll, token, interest, opts)?;

        if self.inner.pending.load(Relaxed) > 0 {
            self.inner.waker.set_readiness(Ready::readable())?;
        }

        Ok(())
    }

    fn modify(&self, epoll: &Epoll, token: Token, interest: Ready, opts: EpollOpt) -> io::Result<()> {
        self.inner.waker.modify(epoll, token, interest, opts)
    }

    fn delete(&self, epoll: &Epoll) -> io::Result<()> {
        self.inner.waker.delete(epoll)
    }
}

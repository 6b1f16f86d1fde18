//! Unbounded FIFO queue with waiter handoff.
//!
//! If a consumer is already awaiting the next item, a pushed item resolves
//! that wait directly; otherwise it is buffered. Termination resolves every
//! pending pull as end-of-sequence, failure poisons pending and future pulls.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::PhoenixError;

type Pull<T> = Result<Option<T>, PhoenixError>;

pub(crate) struct EventQueue<T> {
    inner: Mutex<QueueInner<T>>,
}

struct QueueInner<T> {
    items: VecDeque<T>,
    waiters: VecDeque<oneshot::Sender<Pull<T>>>,
    closed: bool,
    failure: Option<PhoenixError>,
}

impl<T> EventQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::new(),
                waiters: VecDeque::new(),
                closed: false,
                failure: None,
            }),
        }
    }

    /// Push after close or failure is a no-op.
    pub fn push(&self, item: T) {
        let mut inner = self.inner.lock();
        if inner.closed || inner.failure.is_some() {
            return;
        }

        let mut item = item;
        while let Some(waiter) = inner.waiters.pop_front() {
            match waiter.send(Ok(Some(item))) {
                Ok(()) => return,
                // Receiver gave up; hand the item to the next waiter.
                Err(Ok(Some(returned))) => item = returned,
                Err(_) => return,
            }
        }

        inner.items.push_back(item);
    }

    pub fn close(&self) {
        let mut inner = self.inner.lock();
        if inner.closed || inner.failure.is_some() {
            return;
        }
        inner.closed = true;
        while let Some(waiter) = inner.waiters.pop_front() {
            let _ = waiter.send(Ok(None));
        }
    }

    pub fn fail(&self, error: PhoenixError) {
        let mut inner = self.inner.lock();
        if inner.closed || inner.failure.is_some() {
            return;
        }
        inner.failure = Some(error.clone());
        while let Some(waiter) = inner.waiters.pop_front() {
            let _ = waiter.send(Err(error.clone()));
        }
    }

    /// Pull the next item: buffered items drain first, then the terminal
    /// state applies, otherwise the caller suspends until push/close/fail.
    pub async fn next(&self) -> Pull<T> {
        let receiver = {
            let mut inner = self.inner.lock();
            if let Some(item) = inner.items.pop_front() {
                return Ok(Some(item));
            }
            if let Some(failure) = &inner.failure {
                return Err(failure.clone());
            }
            if inner.closed {
                return Ok(None);
            }
            let (sender, receiver) = oneshot::channel();
            inner.waiters.push_back(sender);
            receiver
        };

        // A dropped sender means the queue itself was dropped; treat that as
        // an ordinary end of sequence.
        receiver.await.unwrap_or(Ok(None))
    }
}

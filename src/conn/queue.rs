// Copyright (c) 2017 Anatoly Ikorsky
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Request queue.
//!
//! A single connection runs one request-response exchange at a time, so
//! overlapping submissions are serialized: the connection value is passed as
//! a token through a FIFO of waiters. Submissions are totally ordered by
//! enqueue time. A waiter that was cancelled before it began is skipped and
//! the token moves on, so the queue never stalls behind dead submissions.

use tokio::sync::oneshot;

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

use crate::error::{DriverError, Error, Result};

#[derive(Debug)]
enum State<T> {
    /// The token is parked in the queue.
    Idle(T),
    /// The token was handed to an exchange.
    Active,
    /// The queue is shut down; submissions fail immediately.
    Disposed,
}

#[derive(Debug)]
struct Inner<T> {
    state: State<T>,
    waiters: VecDeque<oneshot::Sender<T>>,
}

/// FIFO admission queue owning a value of type `T` (the connection).
#[derive(Debug)]
pub struct RequestQueue<T> {
    shared: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for RequestQueue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> RequestQueue<T> {
    pub fn new(value: T) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Inner {
                state: State::Idle(value),
                waiters: VecDeque::new(),
            })),
        }
    }

    /// Waits for the exchange turn of this submission.
    ///
    /// Turns are granted in `acquire` order. Fails immediately when the
    /// queue is disposed, and fails queued waiters when it becomes disposed.
    pub async fn acquire(&self) -> Result<Exchange<T>> {
        let receiver = {
            let mut inner = self.shared.lock().expect("queue poisoned");
            match inner.state {
                State::Disposed => {
                    return Err(Error::Driver(DriverError::ConnectionClosed {
                        expected: true,
                    }))
                }
                State::Idle(_) => {
                    let value = match std::mem::replace(&mut inner.state, State::Active) {
                        State::Idle(value) => value,
                        _ => unreachable!(),
                    };
                    return Ok(Exchange {
                        value: Some(value),
                        shared: self.shared.clone(),
                    });
                }
                State::Active => {
                    let (tx, rx) = oneshot::channel();
                    inner.waiters.push_back(tx);
                    rx
                }
            }
        };

        match receiver.await {
            Ok(value) => Ok(Exchange {
                value: Some(value),
                shared: self.shared.clone(),
            }),
            Err(_) => Err(Error::Driver(DriverError::ConnectionClosed {
                expected: true,
            })),
        }
    }

    /// Shuts the queue down.
    ///
    /// Pending waiters are failed. Returns the token when it was parked in
    /// the queue; `None` if an exchange still holds it (it is dropped when
    /// that exchange finishes).
    pub fn dispose(&self) -> Option<T> {
        let mut inner = self.shared.lock().expect("queue poisoned");
        inner.waiters.clear();
        match std::mem::replace(&mut inner.state, State::Disposed) {
            State::Idle(value) => Some(value),
            _ => None,
        }
    }

    /// Whether `dispose` was called.
    pub fn is_disposed(&self) -> bool {
        matches!(
            self.shared.lock().expect("queue poisoned").state,
            State::Disposed
        )
    }

    /// Number of submissions waiting for their turn.
    pub fn waiter_count(&self) -> usize {
        self.shared.lock().expect("queue poisoned").waiters.len()
    }
}

/// Exclusive access to the queue token for the duration of one exchange.
///
/// Dropping the guard hands the token to the next live waiter; waiters that
/// were cancelled in the meantime are skipped.
#[derive(Debug)]
pub struct Exchange<T> {
    value: Option<T>,
    shared: Arc<Mutex<Inner<T>>>,
}

impl<T> Exchange<T> {
    /// Consumes the guard without returning the token to the queue.
    ///
    /// Used on fatal errors: the connection is gone, so the queue is
    /// disposed and pending waiters are failed.
    pub fn dispose(mut self) -> T {
        let value = self.value.take().expect("token present until drop");
        let mut inner = self.shared.lock().expect("queue poisoned");
        inner.waiters.clear();
        inner.state = State::Disposed;
        value
    }
}

impl<T> Deref for Exchange<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.value.as_ref().expect("token present until drop")
    }
}

impl<T> DerefMut for Exchange<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.value.as_mut().expect("token present until drop")
    }
}

impl<T> Drop for Exchange<T> {
    fn drop(&mut self) {
        let mut value = match self.value.take() {
            Some(value) => value,
            None => return,
        };

        let mut inner = self.shared.lock().expect("queue poisoned");
        if matches!(inner.state, State::Disposed) {
            return;
        }

        while let Some(waiter) = inner.waiters.pop_front() {
            match waiter.send(value) {
                // The waiter is alive; the token changed hands and the
                // queue stays active.
                Ok(()) => return,
                // The waiter was cancelled before it began. Keep advancing.
                Err(returned) => value = returned,
            }
        }

        inner.state = State::Idle(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[tokio::test]
    async fn turns_are_granted_in_submit_order() {
        let queue = RequestQueue::new(());
        let order = Arc::new(StdMutex::new(Vec::new()));

        let first = queue.acquire().await.unwrap();

        let mut handles = Vec::new();
        for i in 0..3 {
            let queue = queue.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let _guard = queue.acquire().await.unwrap();
                order.lock().unwrap().push(i);
            }));
            // make sure this submission is enqueued before the next one
            tokio::task::yield_now().await;
        }

        assert_eq!(queue.waiter_count(), 3);
        drop(first);

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn cancelled_waiter_does_not_stall() {
        let queue = RequestQueue::new(());
        let first = queue.acquire().await.unwrap();

        let cancelled = {
            let queue = queue.clone();
            tokio::spawn(async move {
                let _guard = queue.acquire().await.unwrap();
            })
        };
        tokio::task::yield_now().await;

        let done = Arc::new(StdMutex::new(false));
        let survivor = {
            let queue = queue.clone();
            let done = done.clone();
            tokio::spawn(async move {
                let _guard = queue.acquire().await.unwrap();
                *done.lock().unwrap() = true;
            })
        };
        tokio::task::yield_now().await;

        // the first waiter dies before it ever began
        cancelled.abort();
        let _ = cancelled.await;

        drop(first);
        survivor.await.unwrap();
        assert!(*done.lock().unwrap());
    }

    #[tokio::test]
    async fn dispose_fails_pending_and_future_submissions() {
        let queue = RequestQueue::new(());
        let guard = queue.acquire().await.unwrap();

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.acquire().await.map(drop) })
        };
        tokio::task::yield_now().await;

        assert!(queue.dispose().is_none());
        let result = waiter.await.unwrap();
        assert!(matches!(
            result,
            Err(Error::Driver(DriverError::ConnectionClosed { expected: true }))
        ));

        drop(guard);
        assert!(matches!(
            queue.acquire().await,
            Err(Error::Driver(DriverError::ConnectionClosed { expected: true }))
        ));
    }

    #[tokio::test]
    async fn token_returns_to_idle_when_no_waiters() {
        let queue = RequestQueue::new(41_u32);
        {
            let mut guard = queue.acquire().await.unwrap();
            *guard += 1;
        }
        let guard = queue.acquire().await.unwrap();
        assert_eq!(*guard, 42);
    }
}

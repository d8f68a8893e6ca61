//! Per-session FIFO lock.
//!
//! Each session ID has a queue of tickets. [`SessionLock::acquire`] takes a
//! ticket synchronously when it is *called*, so the order of calls (not the
//! order in which the returned futures are first polled) decides who runs
//! first. The holder of the front ticket owns the lock; dropping its
//! [`SessionGuard`] (on success, error, panic unwinding or cancellation of
//! the awaiting future) removes the ticket and wakes the next waiter.
//! Queues are removed once empty, so idle IDs cost nothing.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use ponder_core::SessionId;
use tokio::sync::Notify;

struct Queue {
    tickets: VecDeque<u64>,
    notify: Arc<Notify>,
}

#[derive(Default)]
struct Inner {
    queues: Mutex<HashMap<SessionId, Queue>>,
    next_ticket: AtomicU64,
}

/// Mutual exclusion per session ID. Different IDs never block each other.
#[derive(Clone, Default)]
pub struct SessionLock {
    inner: Arc<Inner>,
}

impl SessionLock {
    /// Empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue for the lock on `id` and wait for it.
    ///
    /// The place in line is taken before this returns. Dropping the future
    /// before it resolves gives the place up without disturbing anyone else.
    pub fn acquire(&self, id: &SessionId) -> impl Future<Output = SessionGuard> + Send + use<> {
        let ticket = self.inner.next_ticket.fetch_add(1, Ordering::Relaxed);
        let notify = {
            let mut queues = self.inner.queues.lock();
            let queue = queues.entry(id.clone()).or_insert_with(|| Queue {
                tickets: VecDeque::new(),
                notify: Arc::new(Notify::new()),
            });
            queue.tickets.push_back(ticket);
            Arc::clone(&queue.notify)
        };
        let guard = SessionGuard {
            inner: Arc::clone(&self.inner),
            id: id.clone(),
            ticket,
        };

        async move {
            loop {
                // Registered before the check so a release in between is not missed.
                let notified = notify.notified();
                if guard.is_front() {
                    return guard;
                }
                notified.await;
            }
        }
    }

    /// Run `f` while holding the lock on `id`.
    ///
    /// Like [`acquire`](Self::acquire), the place in line is taken at call
    /// time.
    pub fn with_lock<F, Fut, T>(&self, id: &SessionId, f: F) -> impl Future<Output = T> + use<F, Fut, T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let acquired = self.acquire(id);
        async move {
            let _guard = acquired.await;
            f().await
        }
    }

    /// Number of IDs with a holder or waiters.
    pub fn pending_keys(&self) -> usize {
        self.inner.queues.lock().len()
    }
}

/// Held (or pending) place in a session's queue.
pub struct SessionGuard {
    inner: Arc<Inner>,
    id: SessionId,
    ticket: u64,
}

impl SessionGuard {
    /// Session this guard locks.
    pub fn session_id(&self) -> &SessionId {
        &self.id
    }

    fn is_front(&self) -> bool {
        self.inner
            .queues
            .lock()
            .get(&self.id)
            .and_then(|q| q.tickets.front())
            == Some(&self.ticket)
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let mut queues = self.inner.queues.lock();
        let Some(queue) = queues.get_mut(&self.id) else {
            return;
        };
        let position = queue.tickets.iter().position(|t| *t == self.ticket);
        if let Some(pos) = position {
            let _ = queue.tickets.remove(pos);
        }
        if queue.tickets.is_empty() {
            let _ = queues.remove(&self.id);
        } else if position == Some(0) {
            queue.notify.notify_waiters();
        }
    }
}

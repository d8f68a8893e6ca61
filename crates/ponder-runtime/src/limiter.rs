//! Counting gate for long-running reasoning tasks.
//!
//! Never waits: a caller that finds every slot taken is told so immediately
//! and reports [`ServerBusy`](crate::ReasoningError::ServerBusy).

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Bounds how many reasoning tasks run at once.
#[derive(Debug)]
pub struct TaskLimiter {
    active: AtomicUsize,
    max: usize,
}

impl TaskLimiter {
    /// Limiter with `max` slots.
    pub fn new(max: usize) -> Self {
        Self {
            active: AtomicUsize::new(0),
            max,
        }
    }

    /// Take a slot if one is free.
    pub fn try_acquire(&self) -> bool {
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max).then_some(n + 1)
            })
            .is_ok()
    }

    /// Return a slot. Extra releases are ignored.
    pub fn release(&self) {
        let _ = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// Take a slot that is returned when the permit drops.
    pub fn try_acquire_permit(self: &Arc<Self>) -> Option<TaskPermit> {
        self.try_acquire().then(|| TaskPermit {
            limiter: Arc::clone(self),
        })
    }

    /// Slots in use.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Total slots.
    pub fn max(&self) -> usize {
        self.max
    }
}

/// RAII slot from [`TaskLimiter::try_acquire_permit`].
#[derive(Debug)]
pub struct TaskPermit {
    limiter: Arc<TaskLimiter>,
}

impl Drop for TaskPermit {
    fn drop(&mut self) {
        self.limiter.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_up_to_max() {
        let limiter = TaskLimiter::new(2);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        assert_eq!(limiter.active(), 2);

        limiter.release();
        assert!(limiter.try_acquire());
    }

    #[test]
    fn release_is_floored_at_zero() {
        let limiter = TaskLimiter::new(1);
        limiter.release();
        limiter.release();
        assert_eq!(limiter.active(), 0);
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn zero_slots_never_acquire() {
        let limiter = Arc::new(TaskLimiter::new(0));
        assert!(!limiter.try_acquire());
        assert!(limiter.try_acquire_permit().is_none());
    }

    #[test]
    fn permit_releases_on_drop() {
        let limiter = Arc::new(TaskLimiter::new(1));
        let permit = limiter.try_acquire_permit().unwrap();
        assert!(limiter.try_acquire_permit().is_none());
        drop(permit);
        assert_eq!(limiter.active(), 0);
        assert!(limiter.try_acquire_permit().is_some());
    }

    #[test]
    fn concurrent_acquires_never_exceed_max() {
        let limiter = Arc::new(TaskLimiter::new(3));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || {
                    let mut held = 0;
                    for _ in 0..1000 {
                        if limiter.try_acquire() {
                            assert!(limiter.active() <= limiter.max());
                            held += 1;
                            limiter.release();
                        }
                    }
                    held
                })
            })
            .collect();
        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert!(total > 0);
        assert_eq!(limiter.active(), 0);
    }
}

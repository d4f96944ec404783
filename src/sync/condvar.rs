/*
 * Condition variable
 *
 * Protocol: hold the mutex, call `wait`, own the mutex again when it
 * returns. The sleeper is enqueued *before* the mutex is released, so a
 * signaler that acquires the mutex after our release always finds us on
 * the queue; a signal-then-unlock sequence can never wake nobody.
 * Spurious wakes are the caller's problem by contract: wrap `wait` in a
 * predicate loop.
 */

use super::Mutex;
use crate::arch;
use crate::sched::{self, WaitQueue};

pub struct CondVar {
    waiters: WaitQueue,
}

impl CondVar {
    pub const fn new() -> Self {
        Self {
            waiters: WaitQueue::new(),
        }
    }

    /// Atomically release `mutex` and sleep; re-acquire before return.
    pub fn wait(&self, mutex: &Mutex) {
        let me = sched::current();
        // Enqueue, mark Blocked, and release the mutex in one
        // interrupts-disabled section: a tick between those steps would
        // deschedule a Blocked task that still holds the mutex.
        arch::interrupts::without(|| {
            self.waiters.enqueue_blocked(me);
            mutex.unlock();
        });
        sched::wait::park(me);
        mutex.lock();
    }

    /// Wake the oldest waiter. Returns how many woke (0 or 1).
    pub fn signal(&self) -> usize {
        self.waiters.wake_one()
    }

    /// Wake every waiter. Returns how many woke.
    pub fn broadcast(&self) -> usize {
        self.waiters.wake_all()
    }

    /// Tasks currently parked on this variable; diagnostics.
    pub fn waiter_count(&self) -> usize {
        self.waiters.waiter_count()
    }
}

impl Default for CondVar {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::{TaskState, spawn_kernel_thread, task};
    use crate::testing;

    fn noop() {}

    #[test]
    fn signal_on_empty_wakes_nothing() {
        let _g = testing::fixture();
        let cv = CondVar::new();
        assert_eq!(cv.signal(), 0);
        assert_eq!(cv.broadcast(), 0);
    }

    #[test]
    fn signal_wakes_fifo_broadcast_wakes_all() {
        let _g = testing::fixture();
        let a = spawn_kernel_thread(noop, "a").unwrap();
        let b = spawn_kernel_thread(noop, "b").unwrap();
        let c = spawn_kernel_thread(noop, "c").unwrap();
        let cv = CondVar::new();
        crate::arch::interrupts::without(|| {
            cv.waiters.enqueue_blocked(a);
            cv.waiters.enqueue_blocked(b);
            cv.waiters.enqueue_blocked(c);
        });

        assert_eq!(cv.signal(), 1);
        assert_eq!(task::state_of(a), Some(TaskState::Ready));
        assert_eq!(task::state_of(b), Some(TaskState::Blocked));

        assert_eq!(cv.broadcast(), 2);
        assert_eq!(task::state_of(b), Some(TaskState::Ready));
        assert_eq!(task::state_of(c), Some(TaskState::Ready));
        assert_eq!(cv.waiter_count(), 0);
    }
}

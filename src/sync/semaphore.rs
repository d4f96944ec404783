/*
 * Counting semaphore
 *
 * Classic P/V on a wait queue. `wait` re-tests the count after every
 * wake because a post can be consumed by a task that never slept.
 */

use crate::arch;
use crate::sched::{self, WaitQueue};

pub struct Semaphore {
    count: spin::Mutex<u32>,
    waiters: WaitQueue,
}

impl Semaphore {
    pub const fn new(initial: u32) -> Self {
        Self {
            count: spin::Mutex::new(initial),
            waiters: WaitQueue::new(),
        }
    }

    /// P: take one unit, blocking while the count is zero.
    pub fn wait(&self) {
        let me = sched::current();
        loop {
            let taken = arch::interrupts::without(|| {
                let mut count = self.count.lock();
                if *count > 0 {
                    *count -= 1;
                    true
                } else {
                    drop(count);
                    self.waiters.enqueue_blocked(me);
                    false
                }
            });
            if taken {
                return;
            }
            sched::wait::park(me);
        }
    }

    /// Non-blocking P. Returns whether a unit was taken.
    pub fn try_wait(&self) -> bool {
        arch::interrupts::without(|| {
            let mut count = self.count.lock();
            if *count > 0 {
                *count -= 1;
                true
            } else {
                false
            }
        })
    }

    /// V: return one unit and wake the oldest waiter.
    pub fn post(&self) {
        arch::interrupts::without(|| {
            *self.count.lock() += 1;
        });
        self.waiters.wake_one();
    }

    pub fn count(&self) -> u32 {
        arch::interrupts::without(|| *self.count.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::{TaskState, spawn_kernel_thread, task};
    use crate::testing;

    fn noop() {}

    #[test]
    fn counts_track_wait_and_post() {
        let _g = testing::fixture();
        let s = Semaphore::new(2);
        assert!(s.try_wait());
        assert!(s.try_wait());
        assert!(!s.try_wait());
        s.post();
        s.post();
        s.post();
        assert_eq!(s.count(), 3);
        // initial + posts - completed waits: 2 + 3 - 2 = 3.
    }

    #[test]
    fn wait_with_units_does_not_block() {
        let _g = testing::fixture();
        let s = Semaphore::new(1);
        s.wait();
        assert_eq!(s.count(), 0);
    }

    #[test]
    fn post_wakes_one_sleeper_in_order() {
        let _g = testing::fixture();
        let a = spawn_kernel_thread(noop, "a").unwrap();
        let b = spawn_kernel_thread(noop, "b").unwrap();
        let s = Semaphore::new(0);
        crate::arch::interrupts::without(|| {
            s.waiters.enqueue_blocked(a);
            s.waiters.enqueue_blocked(b);
        });
        s.post();
        assert_eq!(task::state_of(a), Some(TaskState::Ready));
        assert_eq!(task::state_of(b), Some(TaskState::Blocked));
        assert_eq!(s.count(), 1);
    }
}

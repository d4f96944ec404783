/*
 * Wait queues
 *
 * FIFO queues of blocked tasks; the substrate every blocking primitive
 * in the kernel is built on. A queue stores pids, not pointers: a task
 * killed while blocked leaves a stale pid behind, and the wake side
 * discards it because the task is no longer `Blocked` (or no longer
 * exists). Pids are monotonic, so a reused table slot can never be
 * confused with the task that used to block there.
 *
 * The sleep side enqueues and marks itself `Blocked` inside a single
 * interrupts-disabled section. A wake can therefore never slip between
 * the caller's predicate test and its enqueue; the lost-wakeup window
 * does not exist. After that the sleeper spins on `hlt` until some
 * waker has flipped it back and the scheduler has resumed it.
 *
 * All queue and table accesses run with interrupts disabled on the one
 * CPU, so the queue lock and the process-table lock can be taken in
 * either order without deadlock.
 */

use heapless::Deque;
use spin::Mutex;

use super::task::{self, Pid, TaskState};
use crate::arch;
use crate::config::MAX_TASKS;

/// FIFO list of tasks suspended until a wake.
pub struct WaitQueue {
    sleepers: Mutex<Deque<Pid, MAX_TASKS>>,
}

impl WaitQueue {
    pub const fn new() -> Self {
        Self {
            sleepers: Mutex::new(Deque::new()),
        }
    }

    /// Block the calling task on this queue until another task wakes it.
    ///
    /// Returns only after a waker has marked the caller `Ready` and the
    /// scheduler has resumed it. Waking does not mean the awaited
    /// condition holds; callers re-test their predicate in a loop.
    pub fn sleep_on(&self) {
        let me = super::current();
        if me == Pid::IDLE {
            arch::fatal("idle task tried to block");
        }
        arch::interrupts::without(|| self.enqueue_blocked(me));
        park(me);
    }

    /// Enqueue `pid` and mark it `Blocked`. Callers run this inside an
    /// interrupts-disabled section together with their predicate test.
    pub(crate) fn enqueue_blocked(&self, pid: Pid) {
        if pid == Pid::IDLE {
            arch::fatal("idle task tried to block");
        }
        self.push_pid(pid);
        task::set_state(pid, TaskState::Blocked);
    }

    /// Append to the tail without touching task state. For callers that
    /// already hold the process table and set the state themselves.
    pub(crate) fn push_pid(&self, pid: Pid) {
        if self.sleepers.lock().push_back(pid).is_err() {
            // Capacity equals the process table, so this cannot happen
            // with well-formed queues.
            arch::fatal("wait queue overflow");
        }
    }

    /// Wake the oldest sleeper. Returns 1 if a task was made `Ready`,
    /// 0 if the queue held nothing but stale entries (or was empty).
    pub fn wake_one(&self) -> usize {
        arch::interrupts::without(|| {
            let mut q = self.sleepers.lock();
            while let Some(pid) = q.pop_front() {
                if task::unblock(pid) {
                    return 1;
                }
                // Stale entry from a killed task; drop and keep going.
            }
            0
        })
    }

    /// Wake every sleeper, returning how many were made `Ready`.
    pub fn wake_all(&self) -> usize {
        arch::interrupts::without(|| {
            let mut q = self.sleepers.lock();
            let mut woken = 0;
            while let Some(pid) = q.pop_front() {
                if task::unblock(pid) {
                    woken += 1;
                }
            }
            woken
        })
    }

    /// Drop every entry without waking anyone. Used when the resource
    /// owning the queue is recycled.
    pub(crate) fn clear(&self) {
        let mut q = self.sleepers.lock();
        while q.pop_front().is_some() {}
    }

    pub fn is_empty(&self) -> bool {
        self.sleepers.lock().is_empty()
    }

    pub fn waiter_count(&self) -> usize {
        self.sleepers.lock().len()
    }
}

/// Spin-halt until `pid` is no longer `Blocked`. Each halt lets the next
/// timer tick in, which is what eventually schedules someone who can
/// wake us; once woken, the next resume lands back here and the loop
/// exits.
pub(crate) fn park(pid: Pid) {
    while task::state_of(pid) == Some(TaskState::Blocked) {
        arch::halt();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::{self, spawn_kernel_thread};
    use crate::testing;

    fn noop() {}

    #[test]
    fn wake_one_is_fifo_and_counts() {
        let _g = testing::fixture();
        let a = spawn_kernel_thread(noop, "a").unwrap();
        let b = spawn_kernel_thread(noop, "b").unwrap();

        let q = WaitQueue::new();
        crate::arch::interrupts::without(|| {
            q.enqueue_blocked(a);
            q.enqueue_blocked(b);
        });
        assert_eq!(task::state_of(a), Some(TaskState::Blocked));
        assert_eq!(q.waiter_count(), 2);

        assert_eq!(q.wake_one(), 1);
        assert_eq!(task::state_of(a), Some(TaskState::Ready));
        assert_eq!(task::state_of(b), Some(TaskState::Blocked));
        assert_eq!(q.waiter_count(), 1);

        assert_eq!(q.wake_one(), 1);
        assert_eq!(task::state_of(b), Some(TaskState::Ready));
        assert_eq!(q.wake_one(), 0);
    }

    #[test]
    fn wake_all_drains_and_returns_count() {
        let _g = testing::fixture();
        let a = spawn_kernel_thread(noop, "a").unwrap();
        let b = spawn_kernel_thread(noop, "b").unwrap();
        let c = spawn_kernel_thread(noop, "c").unwrap();

        let q = WaitQueue::new();
        crate::arch::interrupts::without(|| {
            q.enqueue_blocked(a);
            q.enqueue_blocked(b);
            q.enqueue_blocked(c);
        });
        assert_eq!(q.wake_all(), 3);
        assert!(q.is_empty());
        assert_eq!(task::state_of(c), Some(TaskState::Ready));
    }

    #[test]
    fn stale_entries_are_discarded_not_woken() {
        let _g = testing::fixture();
        let a = spawn_kernel_thread(noop, "a").unwrap();
        let b = spawn_kernel_thread(noop, "b").unwrap();

        let q = WaitQueue::new();
        crate::arch::interrupts::without(|| {
            q.enqueue_blocked(a);
            q.enqueue_blocked(b);
        });

        // Kill the head while it sleeps; its entry goes stale.
        sched::kill(a).unwrap();
        assert_eq!(task::state_of(a), Some(TaskState::Zombie));

        // The wake skips the zombie and lands on the next sleeper.
        assert_eq!(q.wake_one(), 1);
        assert_eq!(task::state_of(a), Some(TaskState::Zombie));
        assert_eq!(task::state_of(b), Some(TaskState::Ready));
    }

    #[test]
    fn wake_on_empty_queue_returns_zero() {
        let _g = testing::fixture();
        let q = WaitQueue::new();
        assert_eq!(q.wake_one(), 0);
        assert_eq!(q.wake_all(), 0);
    }
}

/*
 * Sleeping mutex
 *
 * Non-recursive. Contended acquires park on the wait queue instead of
 * spinning, which is why this exists next to `spin::Mutex`: kernel
 * threads hold these across real work, not just a few loads and stores.
 */

use crate::arch;
use crate::sched::{self, Pid, WaitQueue};

struct MutexState {
    locked: bool,
    owner: Option<Pid>,
}

pub struct Mutex {
    state: spin::Mutex<MutexState>,
    waiters: WaitQueue,
}

impl Mutex {
    pub const fn new() -> Self {
        Self {
            state: spin::Mutex::new(MutexState {
                locked: false,
                owner: None,
            }),
            waiters: WaitQueue::new(),
        }
    }

    /// Acquire, blocking until the lock is free.
    ///
    /// Between a holder's `unlock` and the wake landing, a third task
    /// can steal the lock; the loop re-tests after every wake.
    pub fn lock(&self) {
        let me = sched::current();
        loop {
            let acquired = arch::interrupts::without(|| {
                let mut st = self.state.lock();
                if !st.locked {
                    st.locked = true;
                    st.owner = Some(me);
                    true
                } else {
                    // Same interrupts-off section as the test: an
                    // unlock cannot slip in before we are enqueued.
                    drop(st);
                    self.waiters.enqueue_blocked(me);
                    false
                }
            });
            if acquired {
                return;
            }
            sched::wait::park(me);
        }
    }

    /// Acquire without blocking. Returns whether the lock was taken.
    pub fn try_lock(&self) -> bool {
        let me = sched::current();
        arch::interrupts::without(|| {
            let mut st = self.state.lock();
            if !st.locked {
                st.locked = true;
                st.owner = Some(me);
                true
            } else {
                false
            }
        })
    }

    /// Release and wake the oldest waiter.
    ///
    /// Unlocking a mutex the caller does not hold is undefined; debug
    /// builds treat it as a fatal invariant violation.
    pub fn unlock(&self) {
        let me = sched::current();
        arch::interrupts::without(|| {
            let mut st = self.state.lock();
            if cfg!(debug_assertions) && st.owner != Some(me) {
                arch::fatal("mutex unlocked by non-owner");
            }
            st.locked = false;
            st.owner = None;
        });
        self.waiters.wake_one();
    }

    /// The pid currently holding the lock, if any.
    pub fn owner(&self) -> Option<Pid> {
        arch::interrupts::without(|| self.state.lock().owner)
    }

    pub fn is_locked(&self) -> bool {
        arch::interrupts::without(|| self.state.lock().locked)
    }

    /// Tasks currently parked on this mutex; diagnostics.
    pub fn waiter_count(&self) -> usize {
        self.waiters.waiter_count()
    }
}

impl Default for Mutex {
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
    fn uncontended_lock_unlock() {
        let _g = testing::fixture();
        let m = Mutex::new();
        assert!(!m.is_locked());
        m.lock();
        assert!(m.is_locked());
        assert_eq!(m.owner(), Some(sched::current()));
        m.unlock();
        assert!(!m.is_locked());
        assert_eq!(m.owner(), None);
    }

    #[test]
    fn try_lock_fails_while_held() {
        let _g = testing::fixture();
        let m = Mutex::new();
        assert!(m.try_lock());
        assert!(!m.try_lock());
        m.unlock();
        assert!(m.try_lock());
        m.unlock();
    }

    #[test]
    fn unlock_wakes_oldest_waiter() {
        let _g = testing::fixture();
        let a = spawn_kernel_thread(noop, "a").unwrap();
        let b = spawn_kernel_thread(noop, "b").unwrap();

        let m = Mutex::new();
        m.lock();
        // a and b arrive while the lock is held.
        crate::arch::interrupts::without(|| {
            m.waiters.enqueue_blocked(a);
            m.waiters.enqueue_blocked(b);
        });
        assert_eq!(m.waiter_count(), 2);

        m.unlock();
        assert_eq!(task::state_of(a), Some(TaskState::Ready));
        assert_eq!(task::state_of(b), Some(TaskState::Blocked));
        assert_eq!(m.waiter_count(), 1);

        // The woken task retries and wins the free lock; nothing here
        // hands it over implicitly.
        assert!(!m.is_locked());
    }
}

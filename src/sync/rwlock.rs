/*
 * Reader-writer lock
 *
 * Writer-preferring: new readers are held off as soon as a writer is
 * pending, which starves readers under sustained writer load but never
 * starves writers. Writer release wakes a pending writer first; only
 * when none waits do all blocked readers come through at once. A reader
 * release wakes a writer only when the last reader leaves.
 */

use crate::arch;
use crate::sched::{self, WaitQueue};

struct RwState {
    readers: u32,
    writer_active: bool,
    writers_pending: u32,
}

pub struct RwLock {
    state: spin::Mutex<RwState>,
    read_waiters: WaitQueue,
    write_waiters: WaitQueue,
}

impl RwLock {
    pub const fn new() -> Self {
        Self {
            state: spin::Mutex::new(RwState {
                readers: 0,
                writer_active: false,
                writers_pending: 0,
            }),
            read_waiters: WaitQueue::new(),
            write_waiters: WaitQueue::new(),
        }
    }

    /// Shared acquire. Blocks while a writer is active or pending.
    pub fn read_lock(&self) {
        let me = sched::current();
        loop {
            let acquired = arch::interrupts::without(|| {
                let mut st = self.state.lock();
                if !st.writer_active && st.writers_pending == 0 {
                    st.readers += 1;
                    true
                } else {
                    drop(st);
                    self.read_waiters.enqueue_blocked(me);
                    false
                }
            });
            if acquired {
                return;
            }
            sched::wait::park(me);
        }
    }

    /// Shared release. The last reader out hands the lock to a writer.
    pub fn read_unlock(&self) {
        let drained = arch::interrupts::without(|| {
            let mut st = self.state.lock();
            st.readers = st.readers.saturating_sub(1);
            st.readers == 0
        });
        if drained {
            self.write_waiters.wake_one();
        }
    }

    /// Exclusive acquire. Blocks while readers hold the lock or another
    /// writer is active; registers as pending so new readers queue up
    /// behind it.
    pub fn write_lock(&self) {
        let me = sched::current();
        let mut pending = false;
        loop {
            let acquired = arch::interrupts::without(|| {
                let mut st = self.state.lock();
                if st.readers == 0 && !st.writer_active {
                    st.writer_active = true;
                    if pending {
                        st.writers_pending -= 1;
                    }
                    true
                } else {
                    if !pending {
                        st.writers_pending += 1;
                    }
                    drop(st);
                    self.write_waiters.enqueue_blocked(me);
                    false
                }
            });
            if acquired {
                return;
            }
            pending = true;
            sched::wait::park(me);
        }
    }

    /// Exclusive release: pending writers first, readers on drain.
    pub fn write_unlock(&self) {
        arch::interrupts::without(|| {
            self.state.lock().writer_active = false;
        });
        if self.write_waiters.wake_one() == 0 {
            self.read_waiters.wake_all();
        }
    }

    pub fn reader_count(&self) -> u32 {
        arch::interrupts::without(|| self.state.lock().readers)
    }

    pub fn writer_active(&self) -> bool {
        arch::interrupts::without(|| self.state.lock().writer_active)
    }

    pub fn writers_pending(&self) -> u32 {
        arch::interrupts::without(|| self.state.lock().writers_pending)
    }
}

impl Default for RwLock {
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
    fn readers_share_writers_exclude() {
        let _g = testing::fixture();
        let rw = RwLock::new();
        rw.read_lock();
        rw.read_lock();
        assert_eq!(rw.reader_count(), 2);
        rw.read_unlock();
        rw.read_unlock();
        assert_eq!(rw.reader_count(), 0);

        rw.write_lock();
        assert!(rw.writer_active());
        rw.write_unlock();
        assert!(!rw.writer_active());
    }

    #[test]
    fn pending_writer_blocks_new_readers() {
        let _g = testing::fixture();
        let w = spawn_kernel_thread(noop, "w").unwrap();
        let rw = RwLock::new();

        // Readers in; a writer arrives and registers as pending.
        rw.read_lock();
        crate::arch::interrupts::without(|| {
            let mut st = rw.state.lock();
            st.writers_pending += 1;
            drop(st);
            rw.write_waiters.enqueue_blocked(w);
        });

        // A new reader must not get in past the pending writer.
        let r2 = spawn_kernel_thread(noop, "r2").unwrap();
        crate::arch::interrupts::without(|| {
            // This is the read_lock predicate: it fails now.
            let st = rw.state.lock();
            assert!(st.writer_active || st.writers_pending > 0);
            drop(st);
            rw.read_waiters.enqueue_blocked(r2);
        });

        // Last reader leaves; the writer is woken first.
        rw.read_unlock();
        assert_eq!(task::state_of(w), Some(TaskState::Ready));
        assert_eq!(task::state_of(r2), Some(TaskState::Blocked));
    }

    #[test]
    fn write_unlock_prefers_writers_then_drains_readers() {
        let _g = testing::fixture();
        let w2 = spawn_kernel_thread(noop, "w2").unwrap();
        let r1 = spawn_kernel_thread(noop, "r1").unwrap();
        let r2 = spawn_kernel_thread(noop, "r2").unwrap();
        let rw = RwLock::new();

        rw.write_lock();
        crate::arch::interrupts::without(|| {
            let mut st = rw.state.lock();
            st.writers_pending += 1;
            drop(st);
            rw.write_waiters.enqueue_blocked(w2);
            rw.read_waiters.enqueue_blocked(r1);
            rw.read_waiters.enqueue_blocked(r2);
        });

        // First release: the pending writer wins, readers stay parked.
        rw.write_unlock();
        assert_eq!(task::state_of(w2), Some(TaskState::Ready));
        assert_eq!(task::state_of(r1), Some(TaskState::Blocked));
        assert_eq!(task::state_of(r2), Some(TaskState::Blocked));

        // No writer waits anymore: release floods all readers through.
        rw.write_unlock();
        assert_eq!(task::state_of(r1), Some(TaskState::Ready));
        assert_eq!(task::state_of(r2), Some(TaskState::Ready));
    }
}

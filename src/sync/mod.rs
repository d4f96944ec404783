/*
 * Blocking primitives
 *
 * Mutex, counting semaphore, condition variable, and reader-writer lock,
 * all built on wait queues plus interrupt disabling. Interrupt disabling
 * is the entire mutual-exclusion story on this uniprocessor: each
 * primitive tests its predicate and enqueues the sleeper inside one
 * interrupts-disabled section, so a wake cannot fall between test and
 * sleep. Being woken never implies the predicate holds, since another
 * task may have stolen the resource in the window after the release, so
 * every acquire loops and re-tests.
 */

mod condvar;
mod mutex;
mod rwlock;
mod semaphore;

pub use condvar::CondVar;
pub use mutex::Mutex;
pub use rwlock::RwLock;
pub use semaphore::Semaphore;

/*
 * Rook Kernel: process and synchronization core
 *
 * This crate owns everything that makes Rook multitask: the process
 * table and task lifecycle, the timer-driven round-robin scheduler, the
 * wait-queue substrate with the blocking primitives built on it (mutex,
 * counting semaphore, condition variable, reader-writer lock), and the
 * pipe/file-descriptor layer that exercises blocking end to end.
 *
 * The machine is a single-CPU 32-bit x86 box. The timer interrupt is the
 * only source of involuntary deschedule, and disabling interrupts is the
 * only mutual exclusion needed for the short critical sections around
 * shared state. Every subsystem here is written against that model.
 *
 * Everything else (boot, paging, drivers, the on-disk filesystem) is a
 * collaborator reached through the hooks in `platform`. The core builds
 * hosted as well (for `cargo test`), with the arch layer swapped for a
 * shim that emulates the interrupt flag.
 */

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod arch;
pub mod config;
pub mod io;
pub mod klog;
pub mod ktest;
pub mod memory;
pub mod platform;
pub mod sched;
pub mod signal;
pub mod sync;
pub mod syscall;

/// Bring the core up: logger, process table with the idle task, open-file
/// and pipe pools. The boot path calls this once after the heap exists
/// and before enabling the timer interrupt.
pub fn init() {
    klog::init();
    sched::init();
    io::init();
    log::info!("rook core initialized");
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Mutex, MutexGuard};

    static TEST_LOCK: Mutex<()> = Mutex::new(());

    /// Serializes tests that touch the global tables. Also resets them.
    pub fn fixture() -> MutexGuard<'static, ()> {
        let guard = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        crate::platform::reset_for_test();
        crate::sched::init();
        crate::io::init();
        guard
    }
}

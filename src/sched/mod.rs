/*
 * Preemptive round-robin scheduler
 *
 * Runs exclusively from the timer interrupt. The gate hands in the
 * address of the frame it just saved; this module records it on the
 * outgoing task, rotates a cursor over the process table to the next
 * `Ready` task, publishes that task's kernel stack for the next ring-3
 * trap, swaps address spaces when they differ, and returns the frame
 * the epilog should pop. Choosing which frame gets popped *is* the
 * context switch.
 *
 * There is no synchronous yield: a task that blocks marks itself
 * `Blocked` and halt-spins, and the next tick carries it away. The
 * scheduler is therefore written to be correct when the current task is
 * already `Blocked` or `Zombie` on entry.
 */

pub mod task;
pub mod wait;

use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use spin::Mutex;

pub use task::{
    Pid, Task, TaskState, TaskStats, Vma, VmaPerms, exit, kill, record_vma, set_brk,
    spawn_kernel_thread, spawn_user_process, task_stats, waitpid,
};
pub use wait::WaitQueue;

pub(crate) use task::{kill_with_status, terminate};

use crate::arch::{self, frame::TrapFrame};
use crate::config::MAX_TASKS;
use crate::platform;

/// Pid of the task currently on the CPU. Atomic so the accessor works
/// from any context without taking the table lock.
static CURRENT: AtomicU32 = AtomicU32::new(0);

/// Timer ticks since boot.
static TICKS: AtomicU64 = AtomicU64::new(0);

/// Tasks in a timed sleep: (pid, wake tick). The per-tick expiry scan
/// removes entries as it wakes them, so nothing here goes stale for
/// longer than one tick past a kill.
static SLEEPERS: Mutex<heapless::Vec<(Pid, u64), MAX_TASKS>> = Mutex::new(heapless::Vec::new());

/// Install a fresh process table with the idle task current.
pub fn init() {
    task::reset_table();
    CURRENT.store(0, Ordering::SeqCst);
    TICKS.store(0, Ordering::SeqCst);
    arch::interrupts::without(|| SLEEPERS.lock().clear());
    log::info!("scheduler ready ({} task slots)", MAX_TASKS);
}

/// The task currently on the CPU.
pub fn current() -> Pid {
    Pid(CURRENT.load(Ordering::SeqCst))
}

/// Timer ticks since boot.
pub fn uptime_ticks() -> u64 {
    TICKS.load(Ordering::SeqCst)
}

/// Timer-interrupt entry point. Returns the frame the gate must resume.
pub fn on_timer_tick(frame: *mut TrapFrame) -> *mut TrapFrame {
    let now = TICKS.fetch_add(1, Ordering::SeqCst) + 1;
    wake_expired(now);
    schedule(frame)
}

fn wake_expired(now: u64) {
    arch::interrupts::without(|| {
        let mut sleepers = SLEEPERS.lock();
        let mut i = 0;
        while i < sleepers.len() {
            if sleepers[i].1 <= now {
                let (pid, _) = sleepers.swap_remove(i);
                task::unblock(pid);
            } else {
                i += 1;
            }
        }
    });
}

fn schedule(frame: *mut TrapFrame) -> *mut TrapFrame {
    task::with_table(|t| {
        let cur_pid = current();
        let Some(cur_slot) = t.slot_of(cur_pid) else {
            arch::fatal("scheduler: current task not in table");
        };

        // Step 1: record the outgoing context.
        {
            let cur = t.slots[cur_slot].as_mut().unwrap();
            cur.saved_frame = frame as usize;
            cur.saved_esp = frame as usize;
            cur.saved_ebp = unsafe { (*frame).ebp } as usize;
            // Step 2: a running task goes back to Ready; Blocked and
            // Zombie stay as they are. The idle task is demoted only if
            // the scan actually switches away.
            if cur_pid != Pid::IDLE && cur.state == TaskState::Running {
                cur.state = TaskState::Ready;
            }
        }
        let prev_pd = t.slots[cur_slot].as_ref().unwrap().page_dir;

        match t.slots[0].as_ref().map(|idle| idle.state) {
            Some(TaskState::Zombie) | None => arch::fatal("scheduler: idle task destroyed"),
            _ => {}
        }

        // Step 3: first Ready task one past the cursor, wrapping.
        let mut chosen: Option<usize> = None;
        for off in 1..=MAX_TASKS {
            let slot = (t.cursor + off) % MAX_TASKS;
            if let Some(candidate) = t.slots[slot].as_ref() {
                if candidate.state == TaskState::Ready {
                    chosen = Some(slot);
                    break;
                }
            }
        }

        let Some(next_slot) = chosen else {
            // Nothing else runnable; resume the incumbent.
            let cur = t.slots[cur_slot].as_mut().unwrap();
            if cur.state == TaskState::Ready {
                cur.state = TaskState::Running;
            }
            if cur.state != TaskState::Running {
                // Only reachable if the idle task vanished from Ready,
                // which the check above already rules out.
                arch::fatal("scheduler: no runnable task");
            }
            cur.ticks_run += 1;
            return frame;
        };

        if next_slot == cur_slot {
            let cur = t.slots[cur_slot].as_mut().unwrap();
            cur.state = TaskState::Running;
            cur.ticks_run += 1;
            t.cursor = next_slot;
            return frame;
        }

        // Step 4: switch. Demote the incumbent if it was still Running
        // (that is the idle task; everyone else was demoted above).
        {
            let cur = t.slots[cur_slot].as_mut().unwrap();
            if cur.state == TaskState::Running {
                cur.state = TaskState::Ready;
            }
        }
        let (next_pid, resume, next_pd, kstack_top) = {
            let next = t.slots[next_slot].as_mut().unwrap();
            next.state = TaskState::Running;
            next.ticks_run += 1;
            (next.pid, next.saved_frame, next.page_dir, next.kstack_top)
        };
        if resume == 0 {
            arch::fatal("scheduler: chosen task has no saved frame");
        }

        platform::publish_trap_stack(kstack_top as u32);
        if next_pd != prev_pd {
            platform::vm_activate(next_pd);
        }
        CURRENT.store(next_pid.0, Ordering::SeqCst);
        t.cursor = next_slot;

        // Step 5: the epilog pops the chosen task's frame.
        resume as *mut TrapFrame
    })
}

/// Block the calling task for at least `ticks` timer ticks.
pub fn sleep_ticks(ticks: u64) {
    if ticks == 0 {
        return;
    }
    let me = current();
    if me == Pid::IDLE {
        return;
    }
    let wake_at = uptime_ticks() + ticks;
    arch::interrupts::without(|| {
        let mut sleepers = SLEEPERS.lock();
        if sleepers.push((me, wake_at)).is_ok() {
            task::set_state(me, TaskState::Blocked);
        }
    });
    wait::park(me);
}

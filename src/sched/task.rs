/*
 * Process table and task lifecycle
 *
 * Fixed table of task records. Pid 0 is the idle task, installed as
 * `Running` at init; everything else is created `New`, flipped to
 * `Ready` once its synthetic trap frame is in place, and cycles through
 * the scheduler from there. A task ends as a `Zombie` holding its exit
 * status until the parent reaps the slot in `waitpid`.
 *
 * Task teardown (exit and kill share it) runs in three steps: mark the
 * task `Zombie` and drop its file references in one interrupts-disabled
 * section so descriptor counts never disagree with the tables, then
 * release pipe endpoints and the address space with interrupts back on,
 * then wake the parent's child-wait queue.
 */

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use core::mem::size_of;

use bitflags::bitflags;
use spin::Mutex;

use super::wait::{self, WaitQueue};
use crate::arch::{self, frame::TrapFrame};
use crate::config::{KSTACK_SIZE, MAX_FDS, MAX_TASKS, MAX_VMAS};
use crate::io::{self, Errno};
use crate::platform::{self, Ino};
use crate::signal::SigSet;

/// Task identifier. Monotonically increasing, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Pid(pub u32);

impl Pid {
    /// The idle task.
    pub const IDLE: Pid = Pid(0);
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid {}", self.0)
    }
}

/// Scheduler lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    New,
    Ready,
    Running,
    Blocked,
    Zombie,
}

bitflags! {
    /// Access bits of one user mapping.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VmaPerms: u32 {
        const READ  = 1 << 0;
        const WRITE = 1 << 1;
        const EXEC  = 1 << 2;
    }
}

/// One user virtual-memory area, as recorded by the loader.
#[derive(Debug, Clone, Copy)]
pub struct Vma {
    pub start: u32,
    pub end: u32,
    pub perms: VmaPerms,
}

/// One process-table record.
pub struct Task {
    pub pid: Pid,
    pub parent: Pid,
    pub name: String,
    pub state: TaskState,

    /// Kernel stack backing store; one page, kept alive for the task's
    /// whole life (the saved frame lives inside it).
    pub stack: Box<[u8]>,
    /// Cached top of the kernel stack, 16-byte aligned.
    pub kstack_top: usize,

    /// Address of the last trap frame pushed on the kernel stack, valid
    /// while descheduled. Zero before the first save for the idle task.
    pub saved_frame: usize,
    /// Saved register context pair while descheduled.
    pub saved_esp: usize,
    pub saved_ebp: usize,

    /// Page-directory identifier; 0 shares the kernel's address space.
    pub page_dir: u32,

    /// Descriptor table: indices into the open-file table.
    pub fds: [Option<u8>; MAX_FDS],

    pub exit_status: i32,
    pub cwd: Ino,
    pub pending: SigSet,
    /// End of the user heap.
    pub brk: u32,
    pub vmas: heapless::Vec<Vma, MAX_VMAS>,

    /// Entry function for kernel threads; the spawn trampoline calls it.
    pub entry: Option<fn()>,

    /// Ticks this task has been chosen to run.
    pub ticks_run: u64,
}

/// Snapshot row for diagnostics.
#[derive(Debug, Clone)]
pub struct TaskStats {
    pub pid: Pid,
    pub name: String,
    pub state: TaskState,
    pub ticks_run: u64,
}

pub(crate) struct ProcessTable {
    pub slots: [Option<Task>; MAX_TASKS],
    next_pid: u32,
    pub cursor: usize,
}

impl ProcessTable {
    const fn new() -> Self {
        Self {
            slots: [const { None }; MAX_TASKS],
            next_pid: 1,
            cursor: 0,
        }
    }

    pub fn slot_of(&self, pid: Pid) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|t| t.pid == pid))
    }

    pub fn task(&self, pid: Pid) -> Option<&Task> {
        self.slots
            .iter()
            .filter_map(|s| s.as_ref())
            .find(|t| t.pid == pid)
    }

    pub fn task_mut(&mut self, pid: Pid) -> Option<&mut Task> {
        self.slots
            .iter_mut()
            .filter_map(|s| s.as_mut())
            .find(|t| t.pid == pid)
    }

    fn free_slot(&self) -> Option<usize> {
        self.slots.iter().position(|s| s.is_none())
    }

    fn alloc_pid(&mut self) -> Pid {
        let pid = Pid(self.next_pid);
        self.next_pid += 1;
        pid
    }
}

static TABLE: Mutex<ProcessTable> = Mutex::new(ProcessTable::new());

/// Per-slot queues the parent sleeps on in `waitpid`. Kept outside the
/// table so their addresses are stable while the table lock moves.
static CHILD_WAIT: [WaitQueue; MAX_TASKS] = [const { WaitQueue::new() }; MAX_TASKS];

/// Run `f` on the process table with interrupts disabled.
pub(crate) fn with_table<R>(f: impl FnOnce(&mut ProcessTable) -> R) -> R {
    arch::interrupts::without(|| f(&mut TABLE.lock()))
}

pub(crate) fn child_wait(slot: usize) -> &'static WaitQueue {
    &CHILD_WAIT[slot]
}

/// Reinstall a fresh table with the idle task running in slot 0.
pub(crate) fn reset_table() {
    let (stack, kstack_top) = alloc_kernel_stack();
    let idle = Task {
        pid: Pid::IDLE,
        parent: Pid::IDLE,
        name: String::from("idle"),
        state: TaskState::Running,
        stack,
        kstack_top,
        saved_frame: 0,
        saved_esp: 0,
        saved_ebp: 0,
        page_dir: 0,
        fds: [None; MAX_FDS],
        exit_status: 0,
        cwd: 0,
        pending: SigSet::empty(),
        brk: 0,
        vmas: heapless::Vec::new(),
        entry: None,
        ticks_run: 0,
    };
    with_table(|t| {
        *t = ProcessTable::new();
        t.slots[0] = Some(idle);
    });
    for q in &CHILD_WAIT {
        q.clear();
    }
}

pub(crate) fn state_of(pid: Pid) -> Option<TaskState> {
    with_table(|t| t.task(pid).map(|task| task.state))
}

pub(crate) fn set_state(pid: Pid, state: TaskState) {
    with_table(|t| {
        if let Some(task) = t.task_mut(pid) {
            task.state = state;
        }
    });
}

/// Blocked -> Ready, the only transition a waker may make. Returns false
/// for anything else so stale queue entries die here.
pub(crate) fn unblock(pid: Pid) -> bool {
    with_table(|t| match t.task_mut(pid) {
        Some(task) if task.state == TaskState::Blocked => {
            task.state = TaskState::Ready;
            true
        }
        _ => false,
    })
}

fn alloc_kernel_stack() -> (Box<[u8]>, usize) {
    let stack = alloc::vec![0u8; KSTACK_SIZE].into_boxed_slice();
    let top = (stack.as_ptr() as usize + KSTACK_SIZE) & !0xF;
    (stack, top)
}

/// Write a synthetic frame at the top of a fresh kernel stack and return
/// its address. The epilog will pop exactly this on first schedule.
fn plant_frame(kstack_top: usize, frame: TrapFrame) -> usize {
    let fp = kstack_top - size_of::<TrapFrame>();
    unsafe {
        (fp as *mut TrapFrame).write(frame);
    }
    fp
}

/// First code a kernel thread runs: look up the recorded entry, run it,
/// and exit when it returns.
extern "C" fn kthread_trampoline() -> ! {
    let entry = with_table(|t| t.task(super::current()).and_then(|task| task.entry));
    if let Some(entry) = entry {
        entry();
    }
    exit(0);
}

fn new_task(
    pid: Pid,
    name: &str,
    frame: TrapFrame,
    page_dir: u32,
    entry: Option<fn()>,
    stdio: (u8, u8),
) -> Task {
    let (stack, kstack_top) = alloc_kernel_stack();
    let saved_frame = plant_frame(kstack_top, frame);
    let mut fds = [None; MAX_FDS];
    fds[0] = Some(stdio.0);
    fds[1] = Some(stdio.1);
    fds[2] = Some(stdio.1);
    Task {
        pid,
        parent: super::current(),
        name: String::from(name),
        state: TaskState::New,
        stack,
        kstack_top,
        saved_frame,
        saved_esp: saved_frame,
        saved_ebp: 0,
        page_dir,
        fds,
        exit_status: 0,
        cwd: 0,
        pending: SigSet::empty(),
        brk: 0,
        vmas: heapless::Vec::new(),
        entry,
        ticks_run: 0,
    }
}

fn register(mut task: Task) -> Result<Pid, Errno> {
    with_table(|t| {
        let slot = t.free_slot().ok_or(Errno::EAGAIN)?;
        let pid = t.alloc_pid();
        task.pid = pid;
        // The frame is planted; the task may now be scheduled.
        task.state = TaskState::Ready;
        t.slots[slot] = Some(task);
        Ok(pid)
    })
}

/// Create a kernel thread running `entry` in the kernel address space.
pub fn spawn_kernel_thread(entry: fn(), name: &str) -> Result<Pid, Errno> {
    let stdio = io::file::alloc_stdio()?;
    let frame = TrapFrame::kernel_entry(kthread_trampoline as usize as u32);
    let task = new_task(Pid(0), name, frame, 0, Some(entry), stdio);
    match register(task) {
        Ok(pid) => {
            log::info!("spawned kernel thread '{}' as {}", name, pid);
            Ok(pid)
        }
        Err(e) => {
            io::file::release_stdio(stdio);
            Err(e)
        }
    }
}

/// Create a ring-3 process resuming at `eip` on user stack `esp`, in the
/// caller-prepared page directory `page_dir`.
pub fn spawn_user_process(page_dir: u32, eip: u32, esp: u32, name: &str) -> Result<Pid, Errno> {
    if page_dir == 0 {
        return Err(Errno::EINVAL);
    }
    let stdio = io::file::alloc_stdio()?;
    let frame = TrapFrame::user_entry(eip, esp);
    let task = new_task(Pid(0), name, frame, page_dir, None, stdio);
    match register(task) {
        Ok(pid) => {
            log::info!(
                "spawned user process '{}' as {} (pd={:#x}, eip={:#x})",
                name,
                pid,
                page_dir,
                eip
            );
            Ok(pid)
        }
        Err(e) => {
            io::file::release_stdio(stdio);
            Err(e)
        }
    }
}

/// Shared teardown for exit and kill.
///
/// `from_self` says the victim is the caller, in which case the switch
/// to the kernel address space happens before the victim's own is freed.
pub(crate) fn terminate(victim: Pid, status: i32, from_self: bool) -> Result<(), Errno> {
    if victim == Pid::IDLE {
        return Err(Errno::EPERM);
    }

    // Step 1: zombie the task and drop its file references atomically.
    let torn = with_table(|t| {
        let victim_slot = t.slot_of(victim).ok_or(Errno::ESRCH)?;
        {
            let task = t.slots[victim_slot].as_mut().unwrap();
            if task.state == TaskState::Zombie {
                return Ok(None);
            }
            task.state = TaskState::Zombie;
            task.exit_status = status;
        }
        // Orphans are handed to the idle task; nothing ever reaps them,
        // but their slots stay accounted for.
        for slot in t.slots.iter_mut() {
            if let Some(task) = slot.as_mut() {
                if task.parent == victim {
                    task.parent = Pid::IDLE;
                }
            }
        }
        let task = t.slots[victim_slot].as_mut().unwrap();
        let fds = core::mem::replace(&mut task.fds, [None; MAX_FDS]);
        let page_dir = core::mem::replace(&mut task.page_dir, 0);
        let parent = task.parent;
        let actions = io::file::release_fds(&fds);
        Ok(Some((actions, page_dir, parent)))
    })?;

    let Some((actions, page_dir, parent)) = torn else {
        return Ok(());
    };

    // Step 2: close pipe endpoints; this may wake peers.
    for action in actions {
        io::pipe::apply(action);
    }

    // Step 3: never tear down the address space we are standing in.
    if page_dir != 0 {
        if from_self {
            platform::vm_activate(0);
        }
        platform::vm_destroy(page_dir);
    }

    // Step 4: let the parent reap.
    if let Some(parent_slot) = with_table(|t| t.slot_of(parent)) {
        child_wait(parent_slot).wake_all();
    }

    log::info!("{} terminated with status {}", victim, status);
    Ok(())
}

/// Terminate the calling task. Control never returns; the next timer
/// tick switches away for good.
pub fn exit(status: i32) -> ! {
    let me = super::current();
    let _ = terminate(me, status, true);
    die();
}

fn die() -> ! {
    loop {
        arch::interrupts::enable();
        arch::halt();
    }
}

/// Terminate another task. Killing yourself is `exit`.
pub fn kill(pid: Pid) -> Result<(), Errno> {
    const STATUS_KILLED: i32 = 128 + 9;
    if pid == super::current() {
        exit(STATUS_KILLED);
    }
    terminate(pid, STATUS_KILLED, false)
}

pub(crate) fn kill_with_status(pid: Pid, status: i32) -> Result<(), Errno> {
    if pid == super::current() {
        exit(status);
    }
    terminate(pid, status, false)
}

enum WaitOutcome {
    Reaped(Pid, i32),
    NoChild,
    Parked,
}

/// Reap one zombie child, blocking until one exists.
///
/// `which` filters to a specific child; `None` takes any, lowest pid
/// first. Fails with `ECHILD` when the caller has no matching children.
pub fn waitpid(which: Option<Pid>) -> Result<(Pid, i32), Errno> {
    let me = super::current();
    loop {
        let outcome = with_table(|t| {
            let mut have_child = false;
            let mut best: Option<(usize, Pid)> = None;
            for (i, slot) in t.slots.iter().enumerate() {
                let Some(task) = slot.as_ref() else { continue };
                if task.parent != me || task.pid == me {
                    continue;
                }
                if let Some(w) = which {
                    if task.pid != w {
                        continue;
                    }
                }
                have_child = true;
                if task.state == TaskState::Zombie {
                    match best {
                        Some((_, p)) if p <= task.pid => {}
                        _ => best = Some((i, task.pid)),
                    }
                }
            }
            if let Some((slot, _)) = best {
                let task = t.slots[slot].take().unwrap();
                // The slot is free again; scrub its child-wait queue of
                // anything the dead task left behind.
                child_wait(slot).clear();
                WaitOutcome::Reaped(task.pid, task.exit_status)
            } else if !have_child {
                WaitOutcome::NoChild
            } else {
                // Park atomically with the scan: a child that zombies
                // after this section will find us on the queue.
                if me == Pid::IDLE {
                    arch::fatal("idle task tried to block in waitpid");
                }
                let my_slot = t
                    .slot_of(me)
                    .unwrap_or_else(|| arch::fatal("waitpid: caller not in table"));
                child_wait(my_slot).push_pid(me);
                t.task_mut(me).unwrap().state = TaskState::Blocked;
                WaitOutcome::Parked
            }
        });
        match outcome {
            WaitOutcome::Reaped(pid, status) => {
                log::info!("reaped {} (status {})", pid, status);
                return Ok((pid, status));
            }
            WaitOutcome::NoChild => return Err(Errno::ECHILD),
            WaitOutcome::Parked => wait::park(me),
        }
    }
}

/// Record one user mapping on a task; the loader calls this while
/// building an address space.
pub fn record_vma(pid: Pid, vma: Vma) -> Result<(), Errno> {
    with_table(|t| {
        let task = t.task_mut(pid).ok_or(Errno::ESRCH)?;
        task.vmas.push(vma).map_err(|_| Errno::ENOMEM)
    })
}

/// Move a task's end-of-heap marker.
pub fn set_brk(pid: Pid, brk: u32) -> Result<(), Errno> {
    with_table(|t| {
        let task = t.task_mut(pid).ok_or(Errno::ESRCH)?;
        task.brk = brk;
        Ok(())
    })
}

/// Snapshot of every live task, for diagnostics and the shell.
pub fn task_stats() -> Vec<TaskStats> {
    with_table(|t| {
        t.slots
            .iter()
            .filter_map(|s| s.as_ref())
            .map(|task| TaskStats {
                pid: task.pid,
                name: task.name.clone(),
                state: task.state,
                ticks_run: task.ticks_run,
            })
            .collect()
    })
}

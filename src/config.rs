/*
 * Core tunables
 *
 * Fixed capacities for the tasking core. Everything here is a hard
 * compile-time limit; exceeding one at runtime is a clean -1 to the
 * caller, never a reallocation.
 */

/// Process-table capacity, idle task included.
pub const MAX_TASKS: usize = 32;

/// Per-task file-descriptor table size.
pub const MAX_FDS: usize = 16;

/// System-wide open-file table size.
pub const MAX_OPEN_FILES: usize = 64;

/// Pipe pool size.
pub const MAX_PIPES: usize = 16;

/// Pipe ring-buffer capacity in bytes.
pub const PIPE_CAPACITY: usize = 4096;

/// Kernel stack size per task (one page).
pub const KSTACK_SIZE: usize = 4096;

/// Maximum virtual-memory-area records per task.
pub const MAX_VMAS: usize = 16;

/// Timer tick rate the PIT is programmed for.
pub const TIMER_HZ: u32 = 100;

/*
 * I/O layer
 *
 * The shared open-file table, per-task descriptors, pipes, and the
 * console endpoint. Kernel-internal operations return `Result<_, Errno>`
 * and propagate with `?`; the syscall layer collapses errors to the -1
 * the user ABI promises.
 */

pub mod console;
pub mod fd;
pub mod file;
pub mod pipe;

pub use fd::{close, dup, open, pipe as make_pipe, read, seek, write};
pub use file::OpenFlags;

/// POSIX errno values the core distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Errno {
    EPERM = 1,   // Operation not permitted
    ENOENT = 2,  // No such file or directory
    ESRCH = 3,   // No such process
    EINTR = 4,   // Interrupted system call
    EIO = 5,     // I/O error
    EBADF = 9,   // Bad file descriptor
    ECHILD = 10, // No child processes
    EAGAIN = 11, // Try again
    ENOMEM = 12, // Out of memory
    EACCES = 13, // Permission denied
    EFAULT = 14, // Bad address
    EINVAL = 22, // Invalid argument
    ENFILE = 23, // File table overflow
    EMFILE = 24, // Too many open files
    ENOTTY = 25, // Not a typewriter
    ESPIPE = 29, // Illegal seek
    EPIPE = 32,  // Broken pipe
}

// Seek whence values.
pub const SEEK_SET: i32 = 0;
pub const SEEK_CUR: i32 = 1;
pub const SEEK_END: i32 = 2;

/// Reset the open-file table and pipe pool.
pub fn init() {
    file::init();
    pipe::init();
    log::info!("io layer ready");
}

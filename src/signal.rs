/*
 * Signals
 *
 * The ABI knows three signals and all of them are fatal; none can be
 * masked or caught. Delivery records the pending bit for post-mortem
 * inspection and then runs the shared task teardown. Termination status
 * follows the 128+signo shell convention.
 */

use bitflags::bitflags;

use crate::io::Errno;
use crate::sched::{self, Pid, task};

pub const SIGKILL: u32 = 9;
pub const SIGSEGV: u32 = 11;
pub const SIGPIPE: u32 = 13;

bitflags! {
    /// Pending-signal mask carried in each task record.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SigSet: u32 {
        const KILL = 1 << SIGKILL;
        const SEGV = 1 << SIGSEGV;
        const PIPE = 1 << SIGPIPE;
    }
}

impl SigSet {
    pub fn from_signo(sig: u32) -> Option<SigSet> {
        match sig {
            SIGKILL => Some(SigSet::KILL),
            SIGSEGV => Some(SigSet::SEGV),
            SIGPIPE => Some(SigSet::PIPE),
            _ => None,
        }
    }
}

/// Deliver `sig` to `pid`. Every signal is fatal, so this is a
/// terminate with the signal recorded; sending to yourself never
/// returns.
pub fn send(pid: Pid, sig: u32) -> Result<(), Errno> {
    let bit = SigSet::from_signo(sig).ok_or(Errno::EINVAL)?;
    let found = task::with_table(|t| {
        t.task_mut(pid).map(|task| task.pending.insert(bit)).is_some()
    });
    if !found {
        return Err(Errno::ESRCH);
    }
    sched::kill_with_status(pid, 128 + sig as i32)
}

/// Fatal-fault path for the gate and the syscall dispatcher: the
/// current task just did something unrecoverable.
pub(crate) fn fatal_fault(sig: u32) -> ! {
    let me = sched::current();
    if let Some(bit) = SigSet::from_signo(sig) {
        task::with_table(|t| {
            if let Some(task) = t.task_mut(me) {
                task.pending.insert(bit);
            }
        });
    }
    sched::exit(128 + sig as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::{TaskState, spawn_kernel_thread};
    use crate::testing;

    fn noop() {}

    #[test]
    fn unknown_signal_is_einval() {
        let _g = testing::fixture();
        let a = spawn_kernel_thread(noop, "a").unwrap();
        assert_eq!(send(a, 2), Err(Errno::EINVAL));
        assert_eq!(send(a, 0), Err(Errno::EINVAL));
    }

    #[test]
    fn signal_to_missing_task_is_esrch() {
        let _g = testing::fixture();
        assert_eq!(send(Pid(1234), SIGKILL), Err(Errno::ESRCH));
    }

    #[test]
    fn fatal_signal_terminates_and_records_pending() {
        let _g = testing::fixture();
        let a = spawn_kernel_thread(noop, "a").unwrap();
        send(a, SIGPIPE).unwrap();
        task::with_table(|t| {
            let task = t.task(a).unwrap();
            assert_eq!(task.state, TaskState::Zombie);
            assert!(task.pending.contains(SigSet::PIPE));
            assert_eq!(task.exit_status, 128 + 13);
        });
    }

    #[test]
    fn sigkill_status_follows_shell_convention() {
        let _g = testing::fixture();
        let a = spawn_kernel_thread(noop, "a").unwrap();
        send(a, SIGKILL).unwrap();
        let (pid, status) = sched::waitpid(Some(a)).unwrap();
        assert_eq!(pid, a);
        assert_eq!(status, 137);
    }
}

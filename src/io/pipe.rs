/*
 * Pipes
 *
 * Bounded producer/consumer channels: a 4 KiB ring with reader/writer
 * endpoint counts and one wait queue per direction, drawn from a fixed
 * pool. Readers block while the ring is empty and writers remain;
 * writers block while the ring is full and readers remain. A vanished
 * peer turns into EOF (read) or a short count / broken pipe (write).
 *
 * Each loop iteration inspects the ring and either transfers, parks, or
 * finishes, all inside one interrupts-disabled section, so a peer's
 * close-and-wake can never slip between the test and the park.
 */

use core::cmp::min;

use spin::Mutex;

use super::Errno;
use super::file::ReleaseAction;
use crate::arch;
use crate::config::{MAX_PIPES, PIPE_CAPACITY};
use crate::sched::{self, WaitQueue, wait};

struct PipeInner {
    buf: [u8; PIPE_CAPACITY],
    rpos: usize,
    wpos: usize,
    count: usize,
    readers: u32,
    writers: u32,
    active: bool,
}

impl PipeInner {
    const fn new() -> Self {
        Self {
            buf: [0; PIPE_CAPACITY],
            rpos: 0,
            wpos: 0,
            count: 0,
            readers: 0,
            writers: 0,
            active: false,
        }
    }
}

struct Pipe {
    inner: Mutex<PipeInner>,
    read_waiters: WaitQueue,
    write_waiters: WaitQueue,
}

impl Pipe {
    const fn new() -> Self {
        Self {
            inner: Mutex::new(PipeInner::new()),
            read_waiters: WaitQueue::new(),
            write_waiters: WaitQueue::new(),
        }
    }
}

static PIPES: [Pipe; MAX_PIPES] = [const { Pipe::new() }; MAX_PIPES];

pub(crate) fn init() {
    for pipe in &PIPES {
        arch::interrupts::without(|| {
            *pipe.inner.lock() = PipeInner::new();
        });
        pipe.read_waiters.clear();
        pipe.write_waiters.clear();
    }
}

/// Claim a pool slot with one reader and one writer endpoint.
///
/// A slot whose wait queues still hold woken-but-unscheduled sleepers is
/// skipped so a recycled pipe can never capture a stale waiter.
pub(crate) fn allocate() -> Result<usize, Errno> {
    arch::interrupts::without(|| {
        for (index, pipe) in PIPES.iter().enumerate() {
            let mut inner = pipe.inner.lock();
            if !inner.active && pipe.read_waiters.is_empty() && pipe.write_waiters.is_empty() {
                *inner = PipeInner::new();
                inner.active = true;
                inner.readers = 1;
                inner.writers = 1;
                return Ok(index);
            }
        }
        Err(Errno::ENFILE)
    })
}

enum Step {
    Done(usize),
    Sleep,
    Again,
}

/// Drain up to `buf.len()` bytes. Blocks for more while writers remain;
/// returns short only once no writer can add bytes. 0 is EOF.
pub(crate) fn read(index: usize, buf: &mut [u8]) -> Result<usize, Errno> {
    if buf.is_empty() {
        return Ok(0);
    }
    let me = sched::current();
    let mut copied = 0;
    loop {
        let step = arch::interrupts::without(|| {
            let pipe = &PIPES[index];
            let mut inner = pipe.inner.lock();
            if !inner.active {
                return Step::Done(copied);
            }
            if inner.count == 0 {
                if inner.writers == 0 {
                    return Step::Done(copied);
                }
                drop(inner);
                pipe.read_waiters.enqueue_blocked(me);
                return Step::Sleep;
            }
            let n = min(inner.count, buf.len() - copied);
            for k in 0..n {
                buf[copied + k] = inner.buf[inner.rpos];
                inner.rpos = (inner.rpos + 1) % PIPE_CAPACITY;
            }
            inner.count -= n;
            copied += n;
            drop(inner);
            // Space opened up; let every blocked writer re-test.
            pipe.write_waiters.wake_all();
            if copied == buf.len() {
                Step::Done(copied)
            } else {
                Step::Again
            }
        });
        match step {
            Step::Done(n) => return Ok(n),
            Step::Sleep => wait::park(me),
            Step::Again => {}
        }
    }
}

/// Copy `buf` into the ring. Blocks while full and readers remain; with
/// no readers left, returns what landed, or broken pipe if nothing did.
pub(crate) fn write(index: usize, buf: &[u8]) -> Result<usize, Errno> {
    if buf.is_empty() {
        return Ok(0);
    }
    let me = sched::current();
    let mut written = 0;
    loop {
        let step = arch::interrupts::without(|| {
            let pipe = &PIPES[index];
            let mut inner = pipe.inner.lock();
            if !inner.active || inner.readers == 0 {
                return Step::Done(written);
            }
            if inner.count == PIPE_CAPACITY {
                drop(inner);
                pipe.write_waiters.enqueue_blocked(me);
                return Step::Sleep;
            }
            let n = min(PIPE_CAPACITY - inner.count, buf.len() - written);
            for k in 0..n {
                let wpos = inner.wpos;
                inner.buf[wpos] = buf[written + k];
                inner.wpos = (wpos + 1) % PIPE_CAPACITY;
            }
            inner.count += n;
            written += n;
            drop(inner);
            pipe.read_waiters.wake_all();
            if written == buf.len() {
                Step::Done(written)
            } else {
                Step::Again
            }
        });
        match step {
            Step::Done(n) => {
                if n == 0 {
                    return Err(Errno::EPIPE);
                }
                return Ok(n);
            }
            Step::Sleep => wait::park(me),
            Step::Again => {}
        }
    }
}

/// Drop the reader endpoint; blocked writers get to observe the break.
pub(crate) fn close_read(index: usize) {
    let drained = arch::interrupts::without(|| {
        let mut inner = PIPES[index].inner.lock();
        inner.readers = inner.readers.saturating_sub(1);
        if inner.readers == 0 && inner.writers == 0 {
            inner.active = false;
        }
        inner.readers == 0
    });
    if drained {
        PIPES[index].write_waiters.wake_all();
    }
}

/// Drop the writer endpoint; blocked readers get to observe EOF.
pub(crate) fn close_write(index: usize) {
    let drained = arch::interrupts::without(|| {
        let mut inner = PIPES[index].inner.lock();
        inner.writers = inner.writers.saturating_sub(1);
        if inner.readers == 0 && inner.writers == 0 {
            inner.active = false;
        }
        inner.writers == 0
    });
    if drained {
        PIPES[index].read_waiters.wake_all();
    }
}

/// Perform the endpoint close a released open-file slot owed.
pub(crate) fn apply(action: ReleaseAction) {
    match action {
        ReleaseAction::PipeRead(index) => close_read(index),
        ReleaseAction::PipeWrite(index) => close_write(index),
    }
}

/// Bytes currently buffered; diagnostics.
pub fn buffered(index: usize) -> usize {
    arch::interrupts::without(|| PIPES[index].inner.lock().count)
}

/// Whether a pool slot currently has a live endpoint; diagnostics.
pub fn is_active(index: usize) -> bool {
    arch::interrupts::without(|| PIPES[index].inner.lock().active)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn write_then_read_roundtrip() {
        let _g = testing::fixture();
        let p = allocate().unwrap();
        assert_eq!(write(p, b"hello").unwrap(), 5);
        assert_eq!(buffered(p), 5);

        let mut out = [0u8; 16];
        // Writer gone: the read returns the 5 bytes, not a full 16.
        close_write(p);
        assert_eq!(read(p, &mut out).unwrap(), 5);
        assert_eq!(&out[..5], b"hello");
        // Drained and writerless: EOF.
        assert_eq!(read(p, &mut out).unwrap(), 0);
    }

    #[test]
    fn broken_pipe_when_no_reader_ever_took_bytes() {
        let _g = testing::fixture();
        let p = allocate().unwrap();
        close_read(p);
        assert_eq!(write(p, b"0123456789"), Err(Errno::EPIPE));
        assert_eq!(buffered(p), 0);
    }

    #[test]
    fn exact_capacity_fill_and_drain_with_wraparound() {
        let _g = testing::fixture();
        let p = allocate().unwrap();

        // Stagger the indices so the second fill wraps.
        assert_eq!(write(p, &[0xAA; 100]).unwrap(), 100);
        let mut tmp = [0u8; 100];
        assert_eq!(read(p, &mut tmp).unwrap(), 100);

        let data: Vec<u8> = (0..PIPE_CAPACITY).map(|i| (i % 251) as u8).collect();
        assert_eq!(write(p, &data).unwrap(), PIPE_CAPACITY);
        assert_eq!(buffered(p), PIPE_CAPACITY);

        close_write(p);
        let mut out = vec![0u8; PIPE_CAPACITY];
        assert_eq!(read(p, &mut out).unwrap(), PIPE_CAPACITY);
        assert_eq!(out, data);
        assert_eq!(read(p, &mut out).unwrap(), 0);
    }

    #[test]
    fn pipe_deactivates_when_both_ends_close() {
        let _g = testing::fixture();
        let p = allocate().unwrap();
        assert!(is_active(p));
        close_read(p);
        assert!(is_active(p));
        close_write(p);
        assert!(!is_active(p));
    }

    #[test]
    fn pool_exhaustion_fails_cleanly() {
        let _g = testing::fixture();
        let mut held = Vec::new();
        for _ in 0..MAX_PIPES {
            held.push(allocate().unwrap());
        }
        assert_eq!(allocate(), Err(Errno::ENFILE));
        for p in held {
            close_read(p);
            close_write(p);
        }
        assert!(allocate().is_ok());
    }

    #[test]
    fn reads_count_never_exceeds_writes() {
        let _g = testing::fixture();
        let p = allocate().unwrap();
        assert_eq!(write(p, b"abc").unwrap(), 3);
        close_write(p);
        let mut out = [0u8; 2];
        let first = read(p, &mut out).unwrap();
        assert_eq!(first, 2);
        let mut rest = [0u8; 8];
        let second = read(p, &mut rest).unwrap();
        assert_eq!(second, 1);
        assert_eq!(first + second, 3);
        assert_eq!(rest[0], b'c');
    }
}

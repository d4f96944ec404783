/*
 * In-kernel scenario tests
 *
 * Spawn-based end-to-end exercises for the blocking paths that hosted
 * unit tests cannot park on: contended mutexes, condvar producer/
 * consumer, writer preference under load, and pipe readers that really
 * sleep. Run from the boot path (e.g. the shell) once the timer is
 * ticking:
 *
 *     ktest::run_all();
 *
 * Results go to the log. Fixtures are statics, reset by each scenario
 * runner before it spawns workers.
 */

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::io::pipe;
use crate::sched::{self, spawn_kernel_thread, waitpid};
use crate::sync::{CondVar, Mutex, RwLock};

/// Spawn the scenario runner. Needs the scheduler enabled; every
/// scenario blocks.
pub fn run_all() {
    match spawn_kernel_thread(runner, "ktest-runner") {
        Ok(pid) => log::info!("[ktest] runner spawned as {}", pid),
        Err(e) => log::error!("[ktest] failed to spawn runner: {:?}", e),
    }
}

fn runner() {
    log::info!("[ktest] scenario suite starting");
    mutex_counter_scenario();
    pipe_blocking_scenario();
    condvar_queue_scenario();
    rwlock_preference_scenario();
    exit_teardown_scenario();
    log::info!("[ktest] scenario suite done");
}

fn report(name: &str, pass: bool) {
    if pass {
        log::info!("[ktest] {}: PASS", name);
    } else {
        log::error!("[ktest] {}: FAIL", name);
    }
}

fn reap(n: usize) {
    for _ in 0..n {
        let _ = waitpid(None);
    }
}

// ===============================
//  Mutex counter (two writers)
// ===============================

const MUTEX_ROUNDS: usize = 100;

static COUNTER_LOCK: Mutex = Mutex::new();
static COUNTER_LOG: spin::Mutex<heapless::Vec<u8, { 2 * MUTEX_ROUNDS }>> =
    spin::Mutex::new(heapless::Vec::new());

fn counter_worker(id: u8) {
    for _ in 0..MUTEX_ROUNDS {
        COUNTER_LOCK.lock();
        let _ = COUNTER_LOG.lock().push(id);
        COUNTER_LOCK.unlock();
    }
    sched::exit(0);
}

fn counter_worker_a() {
    counter_worker(b'A');
}

fn counter_worker_b() {
    counter_worker(b'B');
}

fn mutex_counter_scenario() {
    COUNTER_LOG.lock().clear();
    let _ = spawn_kernel_thread(counter_worker_a, "ktest-count-a");
    let _ = spawn_kernel_thread(counter_worker_b, "ktest-count-b");
    reap(2);

    let log = COUNTER_LOG.lock();
    let a = log.iter().filter(|&&c| c == b'A').count();
    let b = log.iter().filter(|&&c| c == b'B').count();
    report(
        "mutex-counter",
        log.len() == 2 * MUTEX_ROUNDS && a == MUTEX_ROUNDS && b == MUTEX_ROUNDS,
    );
}

// ===============================
//  Pipe with a truly blocked reader
// ===============================

static PIPE_INDEX: AtomicUsize = AtomicUsize::new(usize::MAX);
static PIPE_OK: AtomicBool = AtomicBool::new(false);

fn pipe_reader() {
    let index = PIPE_INDEX.load(Ordering::SeqCst);
    let mut buf = [0u8; 16];
    // Empty pipe, writer alive: this parks until the write lands.
    let first = pipe::read(index, &mut buf).unwrap_or(0);
    let eof = pipe::read(index, &mut buf).unwrap_or(usize::MAX);
    PIPE_OK.store(first == 5 && &buf[..5] == b"hello" && eof == 0, Ordering::SeqCst);
    sched::exit(0);
}

fn pipe_writer() {
    let index = PIPE_INDEX.load(Ordering::SeqCst);
    // Give the reader time to park on the empty ring.
    sched::sleep_ticks(5);
    let _ = pipe::write(index, b"hello");
    pipe::close_write(index);
    sched::exit(0);
}

fn pipe_blocking_scenario() {
    let Ok(index) = pipe::allocate() else {
        report("pipe-blocking", false);
        return;
    };
    PIPE_INDEX.store(index, Ordering::SeqCst);
    PIPE_OK.store(false, Ordering::SeqCst);

    let _ = spawn_kernel_thread(pipe_reader, "ktest-pipe-r");
    let _ = spawn_kernel_thread(pipe_writer, "ktest-pipe-w");
    reap(2);
    pipe::close_read(index);

    report("pipe-blocking", PIPE_OK.load(Ordering::SeqCst));
}

// ===============================
//  Condvar producer/consumer
// ===============================

const CV_ITEMS: usize = 50;

static QUEUE_LOCK: Mutex = Mutex::new();
static QUEUE_CV: CondVar = CondVar::new();
static QUEUE: spin::Mutex<heapless::Deque<u32, 8>> = spin::Mutex::new(heapless::Deque::new());
static CONSUMED: AtomicUsize = AtomicUsize::new(0);

fn cv_consumer() {
    for _ in 0..CV_ITEMS {
        QUEUE_LOCK.lock();
        // Predicate loop: a wake is a hint, not a guarantee.
        loop {
            if QUEUE.lock().pop_front().is_some() {
                break;
            }
            QUEUE_CV.wait(&QUEUE_LOCK);
        }
        QUEUE_LOCK.unlock();
        CONSUMED.fetch_add(1, Ordering::SeqCst);
    }
    sched::exit(0);
}

fn cv_producer() {
    let mut produced = 0u32;
    while produced < CV_ITEMS as u32 {
        QUEUE_LOCK.lock();
        let pushed = QUEUE.lock().push_back(produced).is_ok();
        if pushed {
            produced += 1;
            QUEUE_CV.signal();
        }
        QUEUE_LOCK.unlock();
        if !pushed {
            // Ring full; let the consumer drain.
            sched::sleep_ticks(1);
        }
    }
    sched::exit(0);
}

fn condvar_queue_scenario() {
    while QUEUE.lock().pop_front().is_some() {}
    CONSUMED.store(0, Ordering::SeqCst);

    let _ = spawn_kernel_thread(cv_consumer, "ktest-cv-consumer");
    let _ = spawn_kernel_thread(cv_producer, "ktest-cv-producer");
    reap(2);

    report("condvar-queue", CONSUMED.load(Ordering::SeqCst) == CV_ITEMS);
}

// ===============================
//  RwLock writer preference
// ===============================

static RW: RwLock = RwLock::new();
static RW_ORDER: spin::Mutex<heapless::Vec<u8, 16>> = spin::Mutex::new(heapless::Vec::new());
static RW_HOLDERS: AtomicUsize = AtomicUsize::new(0);

fn rw_early_reader() {
    RW.read_lock();
    RW_HOLDERS.fetch_add(1, Ordering::SeqCst);
    // Hold long enough for the writer and the late readers to queue up.
    sched::sleep_ticks(10);
    RW.read_unlock();
    sched::exit(0);
}

fn rw_writer() {
    // Arrive while the early readers hold the lock.
    while RW_HOLDERS.load(Ordering::SeqCst) < 3 {
        sched::sleep_ticks(1);
    }
    RW.write_lock();
    let _ = RW_ORDER.lock().push(b'W');
    RW.write_unlock();
    sched::exit(0);
}

fn rw_late_reader() {
    // Arrive once the writer is pending.
    while RW.writers_pending() == 0 && !RW.writer_active() {
        sched::sleep_ticks(1);
    }
    RW.read_lock();
    let _ = RW_ORDER.lock().push(b'r');
    RW.read_unlock();
    sched::exit(0);
}

fn rwlock_preference_scenario() {
    RW_ORDER.lock().clear();
    RW_HOLDERS.store(0, Ordering::SeqCst);

    for _ in 0..3 {
        let _ = spawn_kernel_thread(rw_early_reader, "ktest-rw-early");
    }
    let _ = spawn_kernel_thread(rw_writer, "ktest-rw-writer");
    for _ in 0..3 {
        let _ = spawn_kernel_thread(rw_late_reader, "ktest-rw-late");
    }
    reap(7);

    // The writer must have acquired before every late reader.
    let order = RW_ORDER.lock();
    let pass = order.len() == 4 && order[0] == b'W';
    report("rwlock-writer-preference", pass);
}

// ===============================
//  Exit tears a pipe down
// ===============================

static TEARDOWN_INDEX: AtomicUsize = AtomicUsize::new(usize::MAX);

fn teardown_worker() {
    // Descriptor-level pipe; exiting without closing must release both
    // endpoints through the descriptor table.
    if let Ok((_rfd, wfd)) = crate::io::fd::pipe() {
        let _ = crate::io::fd::write(wfd, b"!");
        // Remember which pool slot we hold so the runner can inspect it.
        TEARDOWN_INDEX.store(pipe_pool_probe(), Ordering::SeqCst);
    }
    sched::exit(0);
}

// The worker's pipe is the most recently activated pool slot; record it
// while the worker still holds it.
fn pipe_pool_probe() -> usize {
    use crate::config::MAX_PIPES;
    for index in (0..MAX_PIPES).rev() {
        if pipe::is_active(index) {
            return index;
        }
    }
    usize::MAX
}

fn exit_teardown_scenario() {
    TEARDOWN_INDEX.store(usize::MAX, Ordering::SeqCst);
    let _ = spawn_kernel_thread(teardown_worker, "ktest-teardown");
    reap(1);

    let index = TEARDOWN_INDEX.load(Ordering::SeqCst);
    let pass = index != usize::MAX && !pipe::is_active(index);
    report("exit-pipe-teardown", pass);
}

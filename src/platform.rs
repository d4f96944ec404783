/*
 * Collaborator hooks
 *
 * The core treats boot, paging, drivers, and the filesystem as external
 * collaborators. Each one registers a `'static` implementation here;
 * until it does, the defaults are inert (console output is dropped, the
 * filesystem reports nothing, address-space switches are no-ops). Host
 * tests register mocks through the same entry points.
 */

use spin::Mutex;

use crate::arch;
use crate::io::Errno;

/// Inode handle as the filesystem hands them out.
pub type Ino = u32;

/// What `resolve` found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeKind {
    File,
    Directory,
}

/// One decoded keyboard event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEvent {
    Char(u8),
    Enter,
    Backspace,
    Other,
}

/// Address-space primitive: install/destroy page directories.
/// Identifier 0 always means the kernel's own address space.
pub trait AddressSpaceOps: Sync {
    fn activate(&self, page_dir: u32);
    fn destroy(&self, page_dir: u32);
}

/// Non-blocking byte sink for the terminal.
pub trait ConsoleSink: Sync {
    fn write(&self, bytes: &[u8]);
}

/// Blocking "next key event" from the keyboard driver.
pub trait KeyboardSource: Sync {
    fn next_event(&self) -> KeyEvent;
}

/// Inode operations the fd layer delegates byte-stream slots to.
pub trait Filesystem: Sync {
    fn resolve(&self, path: &str) -> Option<Ino>;
    fn create(&self, path: &str) -> Result<Ino, Errno>;
    fn read(&self, ino: Ino, offset: u64, buf: &mut [u8]) -> Result<usize, Errno>;
    fn write(&self, ino: Ino, offset: u64, buf: &[u8]) -> Result<usize, Errno>;
    fn truncate(&self, ino: Ino) -> Result<(), Errno>;
    fn kind(&self, ino: Ino) -> Option<InodeKind>;
    fn size(&self, ino: Ino) -> u64;
}

/// Publishes the kernel stack the CPU must take the next ring-3 trap on
/// (TSS.esp0 on real hardware; the GDT owner implements this).
pub trait TrapStack: Sync {
    fn set_kernel_stack(&self, top: u32);
}

static VM: Mutex<Option<&'static dyn AddressSpaceOps>> = Mutex::new(None);
static CONSOLE: Mutex<Option<&'static dyn ConsoleSink>> = Mutex::new(None);
static KEYBOARD: Mutex<Option<&'static dyn KeyboardSource>> = Mutex::new(None);
static FS: Mutex<Option<&'static dyn Filesystem>> = Mutex::new(None);
static TRAP_STACK: Mutex<Option<&'static dyn TrapStack>> = Mutex::new(None);

pub fn set_address_space_ops(ops: &'static dyn AddressSpaceOps) {
    arch::interrupts::without(|| *VM.lock() = Some(ops));
}

pub fn set_console(sink: &'static dyn ConsoleSink) {
    arch::interrupts::without(|| *CONSOLE.lock() = Some(sink));
}

pub fn set_keyboard(source: &'static dyn KeyboardSource) {
    arch::interrupts::without(|| *KEYBOARD.lock() = Some(source));
}

pub fn set_filesystem(fs: &'static dyn Filesystem) {
    arch::interrupts::without(|| *FS.lock() = Some(fs));
}

pub fn set_trap_stack(ts: &'static dyn TrapStack) {
    arch::interrupts::without(|| *TRAP_STACK.lock() = Some(ts));
}

// Accessors copy the reference out and call outside the registry lock;
// hook implementations may block (keyboard) or log.

pub(crate) fn vm_activate(page_dir: u32) {
    let vm = arch::interrupts::without(|| *VM.lock());
    if let Some(vm) = vm {
        vm.activate(page_dir);
    }
}

pub(crate) fn vm_destroy(page_dir: u32) {
    let vm = arch::interrupts::without(|| *VM.lock());
    if let Some(vm) = vm {
        vm.destroy(page_dir);
    }
}

pub(crate) fn console_write(bytes: &[u8]) {
    let sink = arch::interrupts::without(|| *CONSOLE.lock());
    if let Some(sink) = sink {
        sink.write(bytes);
    }
}

/// `None` when no keyboard driver has registered.
pub(crate) fn keyboard_next() -> Option<KeyEvent> {
    let source = arch::interrupts::without(|| *KEYBOARD.lock());
    source.map(|s| s.next_event())
}

pub(crate) fn with_fs<R>(f: impl FnOnce(&dyn Filesystem) -> Result<R, Errno>) -> Result<R, Errno> {
    let fs = arch::interrupts::without(|| *FS.lock());
    match fs {
        Some(fs) => f(fs),
        None => Err(Errno::ENOENT),
    }
}

pub(crate) fn publish_trap_stack(top: u32) {
    let ts = arch::interrupts::without(|| *TRAP_STACK.lock());
    if let Some(ts) = ts {
        ts.set_kernel_stack(top);
    }
}

#[cfg(test)]
pub(crate) fn reset_for_test() {
    arch::interrupts::without(|| {
        *VM.lock() = None;
        *CONSOLE.lock() = None;
        *KEYBOARD.lock() = None;
        *FS.lock() = None;
        *TRAP_STACK.lock() = None;
    });
}

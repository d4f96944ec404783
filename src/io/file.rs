/*
 * Open-file table
 *
 * System-wide pool of open files. A slot is a tagged resource (inode
 * byte stream with a cached offset, console endpoint, or one end of a
 * pipe) plus open flags and a reference count. Descriptor tables hold
 * slot indices; a slot's reference count always equals the number of
 * descriptor entries pointing at it, across all tasks, because every
 * path that changes one changes both inside a single interrupts-disabled
 * section.
 *
 * Dropping the last reference frees the slot and tells the caller what
 * resource teardown remains (pipe-endpoint close), which the caller
 * performs outside the table locks since it can wake sleepers.
 */

use bitflags::bitflags;
use spin::Mutex;

use super::Errno;
use crate::arch;
use crate::config::{MAX_FDS, MAX_OPEN_FILES};
use crate::platform::Ino;

bitflags! {
    /// Open flags. READ/WRITE gate the transfer directions; the rest
    /// shape `open` itself.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const READ   = 1 << 0;
        const WRITE  = 1 << 1;
        const CREATE = 1 << 2;
        const TRUNC  = 1 << 3;
        const APPEND = 1 << 4;
        const RDWR   = Self::READ.bits() | Self::WRITE.bits();
    }
}

/// Which end of a pipe a slot represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeEnd {
    Read,
    Write,
}

/// What an open-file slot refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// Filesystem byte stream with its cached offset.
    Inode { ino: Ino, offset: u64 },
    /// The terminal endpoint.
    Console,
    /// One end of a pipe in the pipe pool.
    Pipe { index: usize, end: PipeEnd },
}

#[derive(Debug, Clone, Copy)]
pub struct OpenFile {
    pub kind: FileKind,
    pub flags: OpenFlags,
    pub refs: u32,
}

/// Resource teardown owed after the last reference to a slot dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReleaseAction {
    PipeRead(usize),
    PipeWrite(usize),
}

struct OpenFileTable {
    slots: [Option<OpenFile>; MAX_OPEN_FILES],
}

impl OpenFileTable {
    const fn new() -> Self {
        Self {
            slots: [const { None }; MAX_OPEN_FILES],
        }
    }
}

static FILES: Mutex<OpenFileTable> = Mutex::new(OpenFileTable::new());

pub(crate) fn init() {
    arch::interrupts::without(|| {
        *FILES.lock() = OpenFileTable::new();
    });
}

/// Allocate a slot with one reference.
pub(crate) fn alloc(kind: FileKind, flags: OpenFlags) -> Result<u8, Errno> {
    arch::interrupts::without(|| {
        let mut files = FILES.lock();
        let slot = files
            .slots
            .iter()
            .position(|s| s.is_none())
            .ok_or(Errno::ENFILE)?;
        files.slots[slot] = Some(OpenFile {
            kind,
            flags,
            refs: 1,
        });
        Ok(slot as u8)
    })
}

pub(crate) fn add_ref(slot: u8) -> Result<(), Errno> {
    arch::interrupts::without(|| {
        let mut files = FILES.lock();
        let file = files
            .slots
            .get_mut(slot as usize)
            .and_then(|s| s.as_mut())
            .ok_or(Errno::EBADF)?;
        file.refs += 1;
        Ok(())
    })
}

fn release_in(table: &mut OpenFileTable, slot: u8) -> Option<ReleaseAction> {
    let entry = table.slots.get_mut(slot as usize)?;
    let file = entry.as_mut()?;
    if file.refs > 1 {
        file.refs -= 1;
        return None;
    }
    let file = entry.take().unwrap();
    match file.kind {
        FileKind::Pipe {
            index,
            end: PipeEnd::Read,
        } => Some(ReleaseAction::PipeRead(index)),
        FileKind::Pipe {
            index,
            end: PipeEnd::Write,
        } => Some(ReleaseAction::PipeWrite(index)),
        _ => None,
    }
}

/// Drop one reference; free the slot at zero. Any returned action must
/// be applied by the caller once no table locks are held.
pub(crate) fn release(slot: u8) -> Option<ReleaseAction> {
    arch::interrupts::without(|| release_in(&mut FILES.lock(), slot))
}

/// Drop one reference for every present descriptor entry. Called from
/// task teardown with the process table held, so counts and entries move
/// together.
pub(crate) fn release_fds(fds: &[Option<u8>; MAX_FDS]) -> heapless::Vec<ReleaseAction, MAX_FDS> {
    let mut files = FILES.lock();
    let mut actions = heapless::Vec::new();
    for &fd in fds.iter() {
        if let Some(slot) = fd {
            if let Some(action) = release_in(&mut files, slot) {
                let _ = actions.push(action);
            }
        }
    }
    actions
}

/// Copy a slot's kind and flags out.
pub(crate) fn snapshot(slot: u8) -> Result<(FileKind, OpenFlags), Errno> {
    arch::interrupts::without(|| {
        let files = FILES.lock();
        files
            .slots
            .get(slot as usize)
            .and_then(|s| s.as_ref())
            .map(|f| (f.kind, f.flags))
            .ok_or(Errno::EBADF)
    })
}

/// Advance a byte-stream slot's cached offset after a transfer.
pub(crate) fn advance_offset(slot: u8, delta: u64) {
    arch::interrupts::without(|| {
        let mut files = FILES.lock();
        if let Some(Some(file)) = files.slots.get_mut(slot as usize) {
            if let FileKind::Inode { offset, .. } = &mut file.kind {
                *offset += delta;
            }
        }
    });
}

pub(crate) fn set_offset(slot: u8, new_offset: u64) {
    arch::interrupts::without(|| {
        let mut files = FILES.lock();
        if let Some(Some(file)) = files.slots.get_mut(slot as usize) {
            if let FileKind::Inode { offset, .. } = &mut file.kind {
                *offset = new_offset;
            }
        }
    });
}

/// The console pair every new task starts with: fd 0 reads slot `.0`
/// (refcount 1), fds 1 and 2 share slot `.1` (refcount 2).
pub(crate) fn alloc_stdio() -> Result<(u8, u8), Errno> {
    let read_slot = alloc(FileKind::Console, OpenFlags::READ)?;
    let write_slot = match alloc(FileKind::Console, OpenFlags::WRITE) {
        Ok(slot) => slot,
        Err(e) => {
            release(read_slot);
            return Err(e);
        }
    };
    add_ref(write_slot)?;
    Ok((read_slot, write_slot))
}

/// Undo `alloc_stdio` when task registration failed.
pub(crate) fn release_stdio(stdio: (u8, u8)) {
    release(stdio.0);
    release(stdio.1);
    release(stdio.1);
}

/// Occupied slots, for diagnostics and tests.
pub fn open_slot_count() -> usize {
    arch::interrupts::without(|| FILES.lock().slots.iter().filter(|s| s.is_some()).count())
}

/// Reference count of a slot, if occupied.
pub fn refs_of(slot: u8) -> Option<u32> {
    arch::interrupts::without(|| {
        FILES
            .lock()
            .slots
            .get(slot as usize)
            .and_then(|s| s.as_ref())
            .map(|f| f.refs)
    })
}

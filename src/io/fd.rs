/*
 * File descriptors
 *
 * Per-task descriptor tables over the shared open-file table. A
 * descriptor is just an index into that table; every operation here
 * resolves the caller's fd, checks the slot's flags, and dispatches on
 * the slot's tag: console, pipe end, or filesystem byte stream.
 *
 * Descriptor install/remove and the matching reference-count change
 * always happen in one interrupts-disabled section, so the count and
 * the entries pointing at a slot never disagree.
 */

use super::file::{self, FileKind, OpenFlags, PipeEnd};
use super::{Errno, SEEK_CUR, SEEK_END, SEEK_SET, console, pipe};
use crate::config::MAX_FDS;
use crate::platform::{self, InodeKind};
use crate::sched::{self, Pid, task};

fn resolve(pid: Pid, fd: i32) -> Result<u8, Errno> {
    if fd < 0 || fd as usize >= MAX_FDS {
        return Err(Errno::EBADF);
    }
    task::with_table(|t| {
        t.task(pid)
            .and_then(|task| task.fds[fd as usize])
            .ok_or(Errno::EBADF)
    })
}

/// Bind `slot` to the caller's lowest free descriptor.
fn install(pid: Pid, slot: u8) -> Result<i32, Errno> {
    task::with_table(|t| {
        let task = t.task_mut(pid).ok_or(Errno::ESRCH)?;
        let fd = task
            .fds
            .iter()
            .position(|e| e.is_none())
            .ok_or(Errno::EMFILE)?;
        task.fds[fd] = Some(slot);
        Ok(fd as i32)
    })
}

/// Open a filesystem path at the lowest free descriptor.
pub fn open(path: &str, flags: OpenFlags) -> Result<i32, Errno> {
    if !flags.intersects(OpenFlags::RDWR) {
        return Err(Errno::EINVAL);
    }
    let ino = platform::with_fs(|fs| match fs.resolve(path) {
        Some(ino) => {
            if fs.kind(ino) == Some(InodeKind::Directory) {
                return Err(Errno::EACCES);
            }
            if flags.contains(OpenFlags::TRUNC) && flags.contains(OpenFlags::WRITE) {
                fs.truncate(ino)?;
            }
            Ok(ino)
        }
        None if flags.contains(OpenFlags::CREATE) => fs.create(path),
        None => Err(Errno::ENOENT),
    })?;
    let offset = if flags.contains(OpenFlags::APPEND) {
        platform::with_fs(|fs| Ok(fs.size(ino)))?
    } else {
        0
    };
    let slot = file::alloc(FileKind::Inode { ino, offset }, flags)?;
    match install(sched::current(), slot) {
        Ok(fd) => Ok(fd),
        Err(e) => {
            file::release(slot);
            Err(e)
        }
    }
}

/// Close a descriptor of the calling task.
pub fn close(fd: i32) -> Result<(), Errno> {
    close_for(sched::current(), fd)
}

pub(crate) fn close_for(pid: Pid, fd: i32) -> Result<(), Errno> {
    if fd < 0 || fd as usize >= MAX_FDS {
        return Err(Errno::EBADF);
    }
    let action = task::with_table(|t| {
        let task = t.task_mut(pid).ok_or(Errno::ESRCH)?;
        let slot = task.fds[fd as usize].take().ok_or(Errno::EBADF)?;
        Ok(file::release(slot))
    })?;
    if let Some(action) = action {
        pipe::apply(action);
    }
    Ok(())
}

/// Read through a descriptor; dispatches on the slot's tag.
pub fn read(fd: i32, buf: &mut [u8]) -> Result<usize, Errno> {
    let slot = resolve(sched::current(), fd)?;
    let (kind, flags) = file::snapshot(slot)?;
    if !flags.contains(OpenFlags::READ) {
        return Err(Errno::EBADF);
    }
    match kind {
        FileKind::Console => console::read(buf),
        FileKind::Pipe {
            index,
            end: PipeEnd::Read,
        } => pipe::read(index, buf),
        FileKind::Pipe { .. } => Err(Errno::EBADF),
        FileKind::Inode { ino, offset } => {
            let n = platform::with_fs(|fs| fs.read(ino, offset, buf))?;
            file::advance_offset(slot, n as u64);
            Ok(n)
        }
    }
}

/// Write through a descriptor; dispatches on the slot's tag.
pub fn write(fd: i32, buf: &[u8]) -> Result<usize, Errno> {
    let slot = resolve(sched::current(), fd)?;
    let (kind, flags) = file::snapshot(slot)?;
    if !flags.contains(OpenFlags::WRITE) {
        return Err(Errno::EBADF);
    }
    match kind {
        FileKind::Console => console::write(buf),
        FileKind::Pipe {
            index,
            end: PipeEnd::Write,
        } => pipe::write(index, buf),
        FileKind::Pipe { .. } => Err(Errno::EBADF),
        FileKind::Inode { ino, offset } => {
            let offset = if flags.contains(OpenFlags::APPEND) {
                let end = platform::with_fs(|fs| Ok(fs.size(ino)))?;
                file::set_offset(slot, end);
                end
            } else {
                offset
            };
            let n = platform::with_fs(|fs| fs.write(ino, offset, buf))?;
            file::advance_offset(slot, n as u64);
            Ok(n)
        }
    }
}

/// Reposition a byte-stream descriptor. Consoles and pipes are not
/// seekable.
pub fn seek(fd: i32, offset: i64, whence: i32) -> Result<i64, Errno> {
    let slot = resolve(sched::current(), fd)?;
    let (kind, _) = file::snapshot(slot)?;
    let FileKind::Inode { ino, offset: cur } = kind else {
        return Err(Errno::ESPIPE);
    };
    let base = match whence {
        SEEK_SET => 0,
        SEEK_CUR => cur as i64,
        SEEK_END => platform::with_fs(|fs| Ok(fs.size(ino)))? as i64,
        _ => return Err(Errno::EINVAL),
    };
    let target = base.checked_add(offset).ok_or(Errno::EINVAL)?;
    if target < 0 {
        return Err(Errno::EINVAL);
    }
    file::set_offset(slot, target as u64);
    Ok(target)
}

/// dup2: make `newfd` refer to `oldfd`'s open file, closing whatever
/// `newfd` held.
pub fn dup(oldfd: i32, newfd: i32) -> Result<i32, Errno> {
    let bounds = |fd: i32| fd >= 0 && (fd as usize) < MAX_FDS;
    if !bounds(oldfd) || !bounds(newfd) {
        return Err(Errno::EBADF);
    }
    if oldfd == newfd {
        // Valid descriptor required even in the no-op case.
        resolve(sched::current(), oldfd)?;
        return Ok(newfd);
    }
    let me = sched::current();
    let displaced = task::with_table(|t| {
        let task = t.task_mut(me).ok_or(Errno::ESRCH)?;
        let slot = task.fds[oldfd as usize].ok_or(Errno::EBADF)?;
        file::add_ref(slot)?;
        let old_entry = task.fds[newfd as usize].replace(slot);
        Ok(old_entry.and_then(file::release))
    })?;
    if let Some(action) = displaced {
        pipe::apply(action);
    }
    Ok(newfd)
}

/// Create a pipe and bind both ends to the caller's two lowest free
/// descriptors: (read end, write end). Exhaustion anywhere rolls the
/// whole operation back.
pub fn pipe() -> Result<(i32, i32), Errno> {
    let me = sched::current();
    let index = pipe::allocate()?;

    let read_slot = match file::alloc(
        FileKind::Pipe {
            index,
            end: PipeEnd::Read,
        },
        OpenFlags::READ,
    ) {
        Ok(slot) => slot,
        Err(e) => {
            pipe::close_read(index);
            pipe::close_write(index);
            return Err(e);
        }
    };
    let write_slot = match file::alloc(
        FileKind::Pipe {
            index,
            end: PipeEnd::Write,
        },
        OpenFlags::WRITE,
    ) {
        Ok(slot) => slot,
        Err(e) => {
            if let Some(action) = file::release(read_slot) {
                pipe::apply(action);
            }
            pipe::close_write(index);
            return Err(e);
        }
    };

    let rfd = match install(me, read_slot) {
        Ok(fd) => fd,
        Err(e) => {
            if let Some(action) = file::release(read_slot) {
                pipe::apply(action);
            }
            if let Some(action) = file::release(write_slot) {
                pipe::apply(action);
            }
            return Err(e);
        }
    };
    let wfd = match install(me, write_slot) {
        Ok(fd) => fd,
        Err(e) => {
            let _ = close_for(me, rfd);
            if let Some(action) = file::release(write_slot) {
                pipe::apply(action);
            }
            return Err(e);
        }
    };
    Ok((rfd, wfd))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{Filesystem, Ino};
    use crate::sched::spawn_kernel_thread;
    use crate::testing;
    use std::sync::Mutex as StdMutex;

    fn noop() {}

    /// Two-file in-memory filesystem for the byte-stream paths.
    struct RamFs {
        files: StdMutex<Vec<(String, Vec<u8>)>>,
    }

    impl RamFs {
        fn new() -> Self {
            Self {
                files: StdMutex::new(vec![("existing".into(), b"0123456789".to_vec())]),
            }
        }
    }

    impl Filesystem for RamFs {
        fn resolve(&self, path: &str) -> Option<Ino> {
            self.files
                .lock()
                .unwrap()
                .iter()
                .position(|(name, _)| name == path)
                .map(|i| i as Ino)
        }
        fn create(&self, path: &str) -> Result<Ino, Errno> {
            let mut files = self.files.lock().unwrap();
            files.push((path.into(), Vec::new()));
            Ok((files.len() - 1) as Ino)
        }
        fn read(&self, ino: Ino, offset: u64, buf: &mut [u8]) -> Result<usize, Errno> {
            let files = self.files.lock().unwrap();
            let data = &files.get(ino as usize).ok_or(Errno::EIO)?.1;
            let start = (offset as usize).min(data.len());
            let n = (data.len() - start).min(buf.len());
            buf[..n].copy_from_slice(&data[start..start + n]);
            Ok(n)
        }
        fn write(&self, ino: Ino, offset: u64, buf: &[u8]) -> Result<usize, Errno> {
            let mut files = self.files.lock().unwrap();
            let data = &mut files.get_mut(ino as usize).ok_or(Errno::EIO)?.1;
            let end = offset as usize + buf.len();
            if data.len() < end {
                data.resize(end, 0);
            }
            data[offset as usize..end].copy_from_slice(buf);
            Ok(buf.len())
        }
        fn truncate(&self, ino: Ino) -> Result<(), Errno> {
            self.files
                .lock()
                .unwrap()
                .get_mut(ino as usize)
                .ok_or(Errno::EIO)?
                .1
                .clear();
            Ok(())
        }
        fn kind(&self, _ino: Ino) -> Option<InodeKind> {
            Some(InodeKind::File)
        }
        fn size(&self, ino: Ino) -> u64 {
            self.files
                .lock()
                .unwrap()
                .get(ino as usize)
                .map_or(0, |(_, d)| d.len() as u64)
        }
    }

    fn install_ramfs() -> &'static RamFs {
        let fs: &'static RamFs = Box::leak(Box::new(RamFs::new()));
        platform::set_filesystem(fs);
        fs
    }

    fn bad_fds() -> [i32; 3] {
        [-1, MAX_FDS as i32, MAX_FDS as i32 + 7]
    }

    #[test]
    fn bad_descriptors_are_rejected_everywhere() {
        let _g = testing::fixture();
        let mut buf = [0u8; 4];
        for fd in bad_fds() {
            assert_eq!(read(fd, &mut buf), Err(Errno::EBADF));
            assert_eq!(write(fd, b"x"), Err(Errno::EBADF));
            assert_eq!(seek(fd, 0, SEEK_SET), Err(Errno::EBADF));
            assert_eq!(close(fd), Err(Errno::EBADF));
        }
        // In-range but never opened (idle has no fds).
        assert_eq!(read(5, &mut buf), Err(Errno::EBADF));
        assert_eq!(close(5), Err(Errno::EBADF));
    }

    #[test]
    fn open_read_write_seek_roundtrip() {
        let _g = testing::fixture();
        install_ramfs();

        let fd = open("existing", OpenFlags::RDWR).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(read(fd, &mut buf).unwrap(), 4);
        assert_eq!(&buf, b"0123");
        // Offset advanced past what we read.
        assert_eq!(read(fd, &mut buf).unwrap(), 4);
        assert_eq!(&buf, b"4567");

        assert_eq!(seek(fd, 0, SEEK_SET).unwrap(), 0);
        assert_eq!(read(fd, &mut buf).unwrap(), 4);
        assert_eq!(&buf, b"0123");

        assert_eq!(seek(fd, -2, SEEK_END).unwrap(), 8);
        assert_eq!(read(fd, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"89");

        assert_eq!(write(fd, b"AB").unwrap(), 2);
        assert_eq!(seek(fd, -2, SEEK_CUR).unwrap(), 10);
        assert_eq!(read(fd, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"AB");

        close(fd).unwrap();
        assert_eq!(read(fd, &mut buf), Err(Errno::EBADF));
    }

    #[test]
    fn open_missing_without_create_fails() {
        let _g = testing::fixture();
        install_ramfs();
        assert_eq!(open("nope", OpenFlags::READ), Err(Errno::ENOENT));
        let fd = open("nope", OpenFlags::RDWR | OpenFlags::CREATE).unwrap();
        close(fd).unwrap();
    }

    #[test]
    fn open_without_direction_is_einval() {
        let _g = testing::fixture();
        install_ramfs();
        assert_eq!(open("existing", OpenFlags::CREATE), Err(Errno::EINVAL));
    }

    #[test]
    fn truncate_and_append_shape_the_offset() {
        let _g = testing::fixture();
        let fs = install_ramfs();

        let fd = open("existing", OpenFlags::WRITE | OpenFlags::TRUNC).unwrap();
        assert_eq!(fs.size(0), 0);
        assert_eq!(write(fd, b"new").unwrap(), 3);
        close(fd).unwrap();

        let fd = open("existing", OpenFlags::WRITE | OpenFlags::APPEND).unwrap();
        assert_eq!(write(fd, b"+tail").unwrap(), 5);
        close(fd).unwrap();

        let fd = open("existing", OpenFlags::READ).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(read(fd, &mut buf).unwrap(), 8);
        assert_eq!(&buf[..8], b"new+tail");
        close(fd).unwrap();
    }

    #[test]
    fn wrong_direction_is_rejected() {
        let _g = testing::fixture();
        install_ramfs();
        let fd = open("existing", OpenFlags::READ).unwrap();
        assert_eq!(write(fd, b"x"), Err(Errno::EBADF));
        close(fd).unwrap();

        let fd = open("existing", OpenFlags::WRITE).unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(read(fd, &mut buf), Err(Errno::EBADF));
        close(fd).unwrap();
    }

    #[test]
    fn pipe_ends_transfer_and_eof() {
        let _g = testing::fixture();
        let (rfd, wfd) = pipe().unwrap();
        assert_eq!(write(wfd, b"hello").unwrap(), 5);
        close(wfd).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(read(rfd, &mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"hello");
        assert_eq!(read(rfd, &mut buf).unwrap(), 0);
        close(rfd).unwrap();
    }

    #[test]
    fn pipe_ends_reject_wrong_direction_and_seek() {
        let _g = testing::fixture();
        let (rfd, wfd) = pipe().unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(read(wfd, &mut buf), Err(Errno::EBADF));
        assert_eq!(write(rfd, b"x"), Err(Errno::EBADF));
        assert_eq!(seek(rfd, 0, SEEK_SET), Err(Errno::ESPIPE));
        assert_eq!(seek(wfd, 0, SEEK_CUR), Err(Errno::ESPIPE));
        close(rfd).unwrap();
        close(wfd).unwrap();
    }

    #[test]
    fn closing_write_fd_drops_endpoint_reader_sees_broken_pipe() {
        let _g = testing::fixture();
        let (rfd, wfd) = pipe().unwrap();
        close(rfd).unwrap();
        assert_eq!(write(wfd, b"0123456789"), Err(Errno::EPIPE));
        close(wfd).unwrap();
    }

    #[test]
    fn dup_shares_the_open_file_and_offset() {
        let _g = testing::fixture();
        install_ramfs();
        let fd = open("existing", OpenFlags::READ).unwrap();
        let dup_fd = dup(fd, 9).unwrap();
        assert_eq!(dup_fd, 9);

        let mut buf = [0u8; 4];
        assert_eq!(read(fd, &mut buf).unwrap(), 4);
        // Shared offset: the dup continues where the original stopped.
        assert_eq!(read(dup_fd, &mut buf).unwrap(), 4);
        assert_eq!(&buf, b"4567");

        // One close keeps the file alive for the other.
        close(fd).unwrap();
        assert_eq!(read(dup_fd, &mut buf).unwrap(), 2);
        close(dup_fd).unwrap();
    }

    #[test]
    fn dup_closes_the_displaced_descriptor() {
        let _g = testing::fixture();
        install_ramfs();
        let before = file::open_slot_count();
        let a = open("existing", OpenFlags::READ).unwrap();
        let b = open("existing", OpenFlags::READ).unwrap();
        dup(a, b).unwrap();
        // b's old slot was released; a's slot now has two refs.
        assert_eq!(file::open_slot_count(), before + 1);
        close(a).unwrap();
        close(b).unwrap();
        assert_eq!(file::open_slot_count(), before);
    }

    #[test]
    fn exiting_with_an_open_pipe_end_gives_the_peer_eof() {
        let _g = testing::fixture();
        let w = spawn_kernel_thread(noop, "w").unwrap();
        let (rfd, wfd) = pipe().unwrap();
        assert_eq!(write(wfd, b"!").unwrap(), 1);

        // Hand the write end to w, as if w had opened it itself.
        task::with_table(|t| {
            let me = sched::current();
            let slot = t.task_mut(me).unwrap().fds[wfd as usize].take().unwrap();
            t.task_mut(w).unwrap().fds[3] = Some(slot);
        });

        // w dies without closing anything; teardown must close the
        // endpoint for it.
        sched::terminate(w, 0, false).unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(read(rfd, &mut buf).unwrap(), 1);
        assert_eq!(buf[0], b'!');
        assert_eq!(read(rfd, &mut buf).unwrap(), 0);
        close(rfd).unwrap();
    }

    #[test]
    fn refcounts_match_pointing_descriptors() {
        let _g = testing::fixture();
        let a = spawn_kernel_thread(noop, "a").unwrap();
        let b = spawn_kernel_thread(noop, "b").unwrap();
        // Count descriptor entries per slot across all tasks and compare
        // with the slot refcounts.
        task::with_table(|t| {
            let mut counts = std::collections::HashMap::new();
            for slot in t.slots.iter().filter_map(|s| s.as_ref()) {
                for fd in slot.fds.iter().flatten() {
                    *counts.entry(*fd).or_insert(0u32) += 1;
                }
            }
            for (slot, count) in counts {
                assert_eq!(file::refs_of(slot), Some(count));
            }
        });
        let _ = (a, b);
    }
}

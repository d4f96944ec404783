/*
 * Kernel heap
 *
 * Backs every `Box` in the core, most importantly the per-task kernel
 * stacks. The boot path maps a virtual range and hands it over once;
 * after that the linked-list allocator serves the usual Rust allocation
 * APIs. Hosted test builds use the host allocator instead, so the
 * global-allocator registration is target-only.
 */

use linked_list_allocator::LockedHeap;

#[cfg_attr(target_arch = "x86", global_allocator)]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

/// Hand the mapped region `[start, start + size)` to the allocator.
///
/// # Safety
/// Must be called exactly once, with a range that is mapped, writable,
/// and unused by anything else.
pub unsafe fn init(start: usize, size: usize) {
    log::info!(
        "kernel heap: 0x{:x} - 0x{:x} ({} KiB)",
        start,
        start + size - 1,
        size / 1024
    );
    unsafe {
        ALLOCATOR.lock().init(start as *mut u8, size);
    }
}

/// Bytes currently free in the kernel heap.
pub fn free() -> usize {
    ALLOCATOR.lock().free()
}

/// Bytes currently handed out.
pub fn used() -> usize {
    ALLOCATOR.lock().used()
}

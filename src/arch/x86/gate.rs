/*
 * Interrupt gate
 *
 * Entry stubs push the CPU state described by `TrapFrame`, call the
 * dispatcher with the frame's address, then restore whatever frame the
 * dispatcher returned and `iretd`. Context switches happen right there:
 * the scheduler hands back a different task's saved frame and the epilog
 * pops that one instead.
 *
 * Stack discipline, bottom of the frame upward:
 *   CPU:   [ss esp] eflags cs eip [err]
 *   stub:  err-dummy (when the CPU pushed none), vector
 *   stub:  pusha, ds, es, fs, gs
 *
 * The IDT itself is set up by the boot path; it installs these stubs at
 * the vectors below.
 */

use core::arch::naked_asm;

use super::pic;
use crate::arch::frame::TrapFrame;
use crate::{sched, signal, syscall};

/// Timer tick (IRQ0 after remap).
pub const VEC_TIMER: u32 = 0x20;
/// System-call software interrupt.
pub const VEC_SYSCALL: u32 = 0x80;
/// General protection fault.
pub const VEC_GPF: u32 = 0x0D;
/// Page fault.
pub const VEC_PAGE_FAULT: u32 = 0x0E;
/// Divide error.
pub const VEC_DIVIDE: u32 = 0x00;

macro_rules! interrupt_stub {
    // Vectors where the CPU pushes no error code: push a dummy first so
    // every frame has the same shape.
    ($name:ident, $vector:literal, no_err) => {
        #[unsafe(naked)]
        pub unsafe extern "C" fn $name() {
            naked_asm!(
                concat!("push 0\n", "push ", $vector, "\n", "jmp {common}"),
                common = sym isr_common,
            )
        }
    };
    ($name:ident, $vector:literal, with_err) => {
        #[unsafe(naked)]
        pub unsafe extern "C" fn $name() {
            naked_asm!(
                concat!("push ", $vector, "\n", "jmp {common}"),
                common = sym isr_common,
            )
        }
    };
}

interrupt_stub!(isr_divide_error, 0x00, no_err);
interrupt_stub!(isr_general_protection, 0x0D, with_err);
interrupt_stub!(isr_page_fault, 0x0E, with_err);
interrupt_stub!(isr_timer, 0x20, no_err);
interrupt_stub!(isr_syscall, 0x80, no_err);

/// Common save/dispatch/restore path shared by all stubs.
#[unsafe(naked)]
unsafe extern "C" fn isr_common() {
    naked_asm!(
        // Finish the frame: general-purpose block, then segments.
        "pusha",
        "push ds",
        "push es",
        "push fs",
        "push gs",
        // Run the dispatcher on kernel data segments.
        "mov ax, 0x10",
        "mov ds, ax",
        "mov es, ax",
        "mov fs, ax",
        "mov gs, ax",
        "mov eax, esp",
        "push eax",
        "call {dispatch}",
        "add esp, 4",
        // Resume whichever frame the dispatcher chose.
        "mov esp, eax",
        "pop gs",
        "pop fs",
        "pop es",
        "pop ds",
        "popa",
        "add esp, 8", // vector + error code
        "iretd",
        dispatch = sym dispatch,
    )
}

/// Route one saved frame to its handler and return the frame to resume.
extern "C" fn dispatch(frame: *mut TrapFrame) -> *mut TrapFrame {
    let f = unsafe { &mut *frame };
    match f.vector {
        VEC_TIMER => {
            // EOI first: the resumed task must keep receiving ticks.
            pic::end_of_interrupt(0);
            sched::on_timer_tick(frame)
        }
        VEC_SYSCALL => {
            syscall::dispatch(f);
            frame
        }
        VEC_DIVIDE | VEC_GPF | VEC_PAGE_FAULT => {
            if f.from_user() {
                log::warn!(
                    "fault vector {} in task {:?} at eip={:#x}, err={:#x}",
                    f.vector,
                    sched::current(),
                    f.eip,
                    f.err_code
                );
                signal::fatal_fault(signal::SIGSEGV);
            }
            crate::arch::fatal("CPU fault in kernel context")
        }
        v if (0x20..0x30).contains(&v) => {
            // IRQ with no in-core handler; drivers hook their own
            // vectors directly. Just acknowledge.
            pic::end_of_interrupt((v - pic::IRQ_BASE) as u8);
            frame
        }
        _ => crate::arch::fatal("unexpected interrupt vector"),
    }
}

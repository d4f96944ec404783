/*
 * Architecture layer
 *
 * The trap-frame layout is plain data and compiles everywhere; the real
 * interrupt plumbing (gate stubs, IF control, PIC, hlt) exists only on
 * the i686 kernel target. Hosted builds get a shim that emulates the
 * interrupt flag with an atomic so the core's critical-section
 * discipline (and therefore the whole core) runs under `cargo test`.
 */

pub mod frame;

#[cfg(target_arch = "x86")]
pub mod x86;
#[cfg(target_arch = "x86")]
pub use self::x86::{halt, interrupts};

#[cfg(not(target_arch = "x86"))]
mod host;
#[cfg(not(target_arch = "x86"))]
pub use self::host::{halt, interrupts};

/// Unrecoverable kernel-invariant violation. Continuing would corrupt
/// memory, so log and stop the machine with interrupts off.
pub fn fatal(msg: &str) -> ! {
    log::error!("FATAL: {}", msg);
    #[cfg(target_arch = "x86")]
    {
        interrupts::disable();
        loop {
            halt();
        }
    }
    #[cfg(not(target_arch = "x86"))]
    panic!("FATAL: {}", msg);
}

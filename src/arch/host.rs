/*
 * Hosted arch shim
 *
 * Stands in for the i686 interrupt plumbing when the core is built for
 * unit tests. The interrupt flag becomes a process-global atomic so the
 * save/disable/restore discipline of every critical section still
 * executes; `halt` is a spin hint.
 */

pub mod interrupts {
    use core::sync::atomic::{AtomicBool, Ordering};

    static IF: AtomicBool = AtomicBool::new(true);

    pub fn enable() {
        IF.store(true, Ordering::SeqCst);
    }

    pub fn disable() {
        IF.store(false, Ordering::SeqCst);
    }

    pub fn are_enabled() -> bool {
        IF.load(Ordering::SeqCst)
    }

    /// Run `f` with interrupts disabled, restoring the prior state.
    pub fn without<F, R>(f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let were_enabled = are_enabled();
        disable();
        let r = f();
        if were_enabled {
            enable();
        }
        r
    }
}

pub fn halt() {
    core::hint::spin_loop();
}

use std::cell::Cell;

// The tracer allocates behind its own back while unwinding the stack.
// Those requests must reach the real allocator but must not be logged,
// or every capture would log (and capture) again. The flag is per-thread:
// other threads keep being traced while one of them is capturing.
//
// Const-initialized and without a destructor, so reading it never
// allocates and stays valid while the thread is torn down.
thread_local! {
    static IN_CAPTURE: Cell<bool> = const { Cell::new(false) };
}

/// Restores the flag to what it was before, also when unwinding.
struct Suppression {
    previous: bool,
}

impl Suppression {
    fn enter() -> Self {
        let previous = IN_CAPTURE.with(|flag| flag.replace(true));
        Suppression { previous }
    }
}

impl Drop for Suppression {
    fn drop(&mut self) {
        IN_CAPTURE.with(|flag| flag.set(self.previous));
    }
}

#[inline(always)]
pub fn is_suppressed() -> bool {
    IN_CAPTURE.try_with(Cell::get).unwrap_or(true)
}

#[inline(always)]
pub fn with_guard<R>(f: impl FnOnce() -> R) -> R {
    let _suppression = Suppression::enter();
    f()
}

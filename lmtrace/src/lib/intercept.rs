use crate::ffi::*;
use crate::guard;
use crate::logger::{Event, Logger};
use crate::resolve::Primitives;
use std::ptr;

/// Forwards each heap primitive to its real implementation, then
/// logs the call. What the caller gets back is exactly what the real
/// primitive returned, whatever happens on the logging side.
pub struct Tracer {
    real: Primitives,
    logger: Logger,
}

impl Tracer {
    pub const fn new(real: Primitives, logger: Logger) -> Self {
        Tracer { real, logger }
    }

    pub unsafe fn malloc(&self, size: size_t) -> *mut void {
        let Some(malloc) = self.real.malloc else {
            return ptr::null_mut();
        };
        let p = malloc(size);
        self.record(Event::Malloc { size, result: p as usize });

        p
    }

    pub unsafe fn calloc(&self, nobj: size_t, size: size_t) -> *mut void {
        let Some(calloc) = self.real.calloc else {
            return ptr::null_mut();
        };
        let p = calloc(nobj, size);
        self.record(Event::Calloc { nobj, size, result: p as usize });

        p
    }

    pub unsafe fn realloc(&self, old: *mut void, size: size_t) -> *mut void {
        let Some(realloc) = self.real.realloc else {
            return ptr::null_mut();
        };
        let p = realloc(old, size);
        self.record(Event::Realloc { old: old as usize, size, result: p as usize });

        p
    }

    pub unsafe fn free(&self, target: *mut void) {
        let Some(free) = self.real.free else {
            return;
        };
        // Null is passed on, and logged, as is.
        free(target);
        self.record(Event::Free { target: target as usize });
    }

    #[inline(always)]
    fn record(&self, event: Event) {
        if guard::is_suppressed() {
            return;
        }
        self.logger.log(event);
    }
}

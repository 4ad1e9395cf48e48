use crate::ffi::*;
use crate::resolve;
use std::ptr;

// Run by the loader once `liblmtrace.so` is mapped and relocated, ahead
// of the program's own startup code. A heap call that beats it to
// it bootstraps the tracer just the same.
#[used]
#[link_section = ".init_array"]
static INITIALIZE: extern "C" fn() = initialize;

extern "C" fn initialize() {
    resolve::ensure_initialized();
}

#[no_mangle]
/// Function interposition ("the `LD_PRELOAD` trick") routes every
/// call of the host process to these four symbols. Each of them
/// forwards to the real function and logs the call.
///
/// Until the real functions are resolved, allocating calls return
/// null and `free` does nothing.
unsafe extern "C"
fn malloc(size: size_t) -> *mut void {
    match resolve::context() {
        Some(tracer)    => tracer.malloc(size),
        None            => ptr::null_mut(),
    }
}

#[no_mangle]
unsafe extern "C"
fn calloc(nobj: size_t, size: size_t) -> *mut void {
    match resolve::context() {
        Some(tracer)    => tracer.calloc(nobj, size),
        None            => ptr::null_mut(),
    }
}

#[no_mangle]
unsafe extern "C"
fn realloc(p: *mut void, size: size_t) -> *mut void {
    match resolve::context() {
        Some(tracer)    => tracer.realloc(p, size),
        None            => ptr::null_mut(),
    }
}

#[no_mangle]
unsafe extern "C"
fn free(p: *mut void) {
    if let Some(tracer) = resolve::context() {
        tracer.free(p)
    }
}

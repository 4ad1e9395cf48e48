//! `lmtrace` logs every `malloc`, `calloc`, `realloc` and `free` a
//! process makes, one line per call, along with the caller's stack:
//!
//! ```text
//! LD_PRELOAD=./liblmtrace.so command args ... 200>trace.log
//! ```
//!
//! Calls are passed through untouched. Descriptor 200 can be swapped
//! for another one through `LMTRACE_FD`; if it is not open for writing,
//! the trace goes to stderr.

#[allow(non_camel_case_types)]
/// Signatures of the four interposed primitives, plus C-flavoured
/// aliases (`void`, `size_t`...) and the few libc entry points the
/// tracer leans on. Interposition itself is the
/// [`LD_PRELOAD` trick](https://stackoverflow.com/questions/426230/what-is-the-ld-preload-trick):
/// the loader resolves the host's `malloc` to ours first.
mod ffi;

mod config;

/// Per-thread flag keeping the tracer's own allocations out of the trace.
mod guard;

mod stack;

mod logger;

/// Finds the real primitives and owns the process-wide tracer.
mod resolve;

mod intercept;

/// Contains actual interposing code. Left out of unit tests, whose
/// binary would otherwise trace itself.
#[cfg(not(test))]
mod tracer;

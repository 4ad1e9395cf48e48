use crate::config;
use crate::ffi::*;
use crate::guard;
use crate::intercept::Tracer;
use crate::logger::{LineBuf, Logger, Sink};
use crate::stack;
use libc_stdhandle::stderr;
use once_cell::sync::OnceCell;
use std::ffi::CStr;
use std::fmt::Write;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Ways in which the tracer degrades instead of failing the host.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceError {
    /// The primitive stays unresolved for good: its interceptor
    /// returns null, or does nothing in the case of `free`.
    #[error("lmtrace: cannot resolve `{symbol}`; it will fail every call")]
    Unresolved { symbol: &'static str },
    #[error("lmtrace: descriptor {fd} is not open for writing")]
    SinkUnavailable { fd: RawFd },
}

/// The real heap primitives, i.e. whatever `dlsym(RTLD_NEXT, ..)` finds
/// after this object in the lookup order: libc's, or those of another
/// `LD_PRELOAD`-ed allocator.
#[derive(Clone, Copy, Default)]
pub struct Primitives {
    pub malloc:     Option<CMalloc>,
    pub calloc:     Option<CCalloc>,
    pub realloc:    Option<CRealloc>,
    pub free:       Option<CFree>,
}

impl Primitives {
    pub unsafe fn resolve_next() -> Self {
        // `dlsym` calls `calloc` behind the scenes. Those calls find the
        // context unpublished and get null back, which `dlsym` tolerates.
        Primitives {
            malloc:     next_definition(c"malloc").map(|f| std::mem::transmute::<*mut void, CMalloc>(f)),
            calloc:     next_definition(c"calloc").map(|f| std::mem::transmute::<*mut void, CCalloc>(f)),
            realloc:    next_definition(c"realloc").map(|f| std::mem::transmute::<*mut void, CRealloc>(f)),
            free:       next_definition(c"free").map(|f| std::mem::transmute::<*mut void, CFree>(f)),
        }
    }
}

unsafe fn next_definition(symbol: &'static CStr) -> Option<*mut void> {
    // Clear any stale error first.
    dlerror();
    let address = dlsym(RTLD_NEXT, symbol.as_ptr());
    if !address.is_null() {
        return Some(address);
    }
    let reason = dlerror();
    let reason = if reason.is_null() { None } else { Some(CStr::from_ptr(reason)) };
    report(
        &TraceError::Unresolved { symbol: symbol.to_str().unwrap_or("?") },
        reason,
    );

    None
}

pub fn report(error: &TraceError, detail: Option<&CStr>) {
    //! One line on stderr, built without touching the heap.
    let mut line = LineBuf::new();
    let _ = write!(line, "{}", error);
    if let Some(detail) = detail.and_then(|d| d.to_str().ok()) {
        let _ = write!(line, " ({})", detail);
    }
    unsafe { fputs(line.finish_c().as_ptr(), stderr()) };
}

/// The configured descriptor, else stderr, else nothing at all.
pub fn select_sink(configured: RawFd) -> Option<Sink> {
    Sink::open(configured)
        .or_else(|_| Sink::open(libc::STDERR_FILENO))
        .ok()
}

/// A `OnceCell` whose initializer runs at most once and never makes
/// anyone wait for it. Whoever asks while it runs, including the
/// initializing thread itself, gets `None`.
pub struct ClaimCell<T> {
    value:      OnceCell<T>,
    claimed:    AtomicBool,
}

impl<T> ClaimCell<T> {
    pub const fn new() -> Self {
        ClaimCell { value: OnceCell::new(), claimed: AtomicBool::new(false) }
    }

    #[inline(always)]
    pub fn get(&self) -> Option<&T> {
        self.value.get()
    }

    /// Runs `init` if nobody has claimed the cell yet.
    #[cold]
    pub fn claim(&self, init: impl FnOnce() -> T) -> Option<&T> {
        if self.claimed.swap(true, Ordering::AcqRel) {
            return self.value.get();
        }
        Some(self.value.get_or_init(init))
    }

    #[inline(always)]
    pub fn get_or_claim(&self, init: impl FnOnce() -> T) -> Option<&T> {
        match self.get() {
            Some(value) => Some(value),
            None => self.claim(init),
        }
    }
}

static TRACER: ClaimCell<Tracer> = ClaimCell::new();

#[inline(always)]
pub fn context() -> Option<&'static Tracer> {
    match TRACER.get() {
        Some(tracer) => Some(tracer),
        None => bootstrap(),
    }
}

/// Idempotent; cheap after the first call. Returns whether the
/// tracer is ready for use by the calling thread.
pub fn ensure_initialized() -> bool {
    context().is_some()
}

#[cold]
fn bootstrap() -> Option<&'static Tracer> {
    // All four entry points and the sink are published together,
    // so no thread can observe a half-built tracer.
    let tracer = TRACER.claim(|| {
        let sink = select_sink(config::sink_fd());
        let real = unsafe { Primitives::resolve_next() };
        Tracer::new(real, Logger::new(sink, stack::capture))
    })?;
    guard::with_guard(stack::prime);

    Some(tracer)
}

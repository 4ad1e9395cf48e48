use crate::ffi::*;
use crate::guard;
use crate::stack::{self, CaptureFn};
use crate::resolve::TraceError;
use std::ffi::CStr;
use std::fmt::{self, Write};
use std::io;
use std::os::fd::RawFd;
use std::sync::{Mutex, PoisonError};

/// A line holds the event's 3-4 fields plus up to 16 frames of
/// 18 characters each, which stays well below this size. The last
/// two bytes are kept for the line feed and a C string terminator.
pub const MAX_LINE_BYTES: usize = 512;

/// Stack-allocated line under construction. Everything on the logging
/// path formats into one of these: the heap is off limits there.
pub struct LineBuf {
    buf: [u8; MAX_LINE_BYTES],
    len: usize,
}

impl LineBuf {
    pub const fn new() -> Self {
        LineBuf { buf: [0; MAX_LINE_BYTES], len: 0 }
    }

    #[cfg(test)]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Terminates the line and returns it, ready for `write(2)`.
    pub fn finish(&mut self) -> &[u8] {
        self.buf[self.len] = b'\n';
        &self.buf[..=self.len]
    }

    /// Same as [`LineBuf::finish`], NUL-terminated for stdio.
    pub fn finish_c(&mut self) -> &CStr {
        self.buf[self.len] = b'\n';
        self.buf[self.len + 1] = 0;
        CStr::from_bytes_until_nul(&self.buf[..self.len + 2]).unwrap_or(c"\n")
    }
}

impl Write for LineBuf {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        // Overlong lines are cut short rather than spilled.
        let room = MAX_LINE_BYTES - 2 - self.len;
        let taken = s.len().min(room);
        self.buf[self.len..self.len + taken].copy_from_slice(&s.as_bytes()[..taken]);
        self.len += taken;
        if taken < s.len() {
            Err(fmt::Error)
        } else {
            Ok(())
        }
    }
}

/// Prints an address the way glibc's `%p` does: hex, or `(nil)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Addr(pub usize);

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            f.write_str("(nil)")
        } else {
            write!(f, "{:#x}", self.0)
        }
    }
}

/// One intercepted call, alive only while its line is written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    Malloc  { size: usize, result: usize },
    Calloc  { nobj: usize, size: usize, result: usize },
    Realloc { old: usize, size: usize, result: usize },
    Free    { target: usize },
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Event::Malloc { size, result } => {
                write!(f, "malloc {} {}", size, Addr(result))
            },
            Event::Calloc { nobj, size, result } => {
                write!(f, "calloc {} {} {}", nobj, size, Addr(result))
            },
            Event::Realloc { old, size, result } => {
                write!(f, "realloc {} {} {}", Addr(old), size, Addr(result))
            },
            Event::Free { target } => {
                write!(f, "free {}", Addr(target))
            }
        }
    }
}

/// An inherited descriptor the trace goes to. Never closed: it
/// belongs to the host process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sink {
    fd: RawFd,
}

impl Sink {
    pub fn open(fd: RawFd) -> Result<Sink, TraceError> {
        //! Accepts `fd` only if it is open for writing. This is
        //! the same check `fdopen(fd, "w")` performs.
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
        if flags == -1 {
            return Err(TraceError::SinkUnavailable { fd });
        }
        match flags & libc::O_ACCMODE {
            libc::O_WRONLY | libc::O_RDWR => Ok(Sink { fd }),
            _ => Err(TraceError::SinkUnavailable { fd }),
        }
    }

    /// Best effort. Errors are dropped on the floor: the traced
    /// program must not notice the tracer failing.
    pub fn write_all(&self, mut bytes: &[u8]) {
        while !bytes.is_empty() {
            let written = unsafe { libc::write(self.fd, bytes.as_ptr() as *const void, bytes.len()) };
            if written < 0 {
                if io::Error::last_os_error().kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return;
            }
            if written == 0 {
                return;
            }
            bytes = &bytes[written as usize..];
        }
    }
}

/// Serializes event lines coming from any number of threads
/// onto a single sink.
pub struct Logger {
    sink: Option<Sink>,
    lock: Mutex<()>,
    capture: CaptureFn,
}

impl Logger {
    pub const fn new(sink: Option<Sink>, capture: CaptureFn) -> Self {
        Logger { sink, lock: Mutex::new(()), capture }
    }

    #[inline(always)]
    pub fn log(&self, event: Event) {
        let Some(sink) = self.sink else {
            return;
        };
        // A thread that panicked while holding the lock left nothing
        // half-done behind: the line buffer is its own.
        let _serialized = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut line = LineBuf::new();
        let _ = write!(line, "{}", event);
        // Unwinding may allocate (first use loads libgcc_s).
        guard::with_guard(|| stack::capture_and_emit(self.capture, &mut line));
        sink.write_all(line.finish());
    }
}

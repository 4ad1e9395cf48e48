use crate::ffi::*;
use std::ffi::CStr;
use std::os::fd::RawFd;

/// Descriptor the trace is written to unless told otherwise, e.g.
/// `LD_PRELOAD=./liblmtrace.so command args ... 200>trace.log`
pub const DEFAULT_FD: RawFd = 200;

/// Names an alternative output descriptor.
pub const FD_VAR: &CStr = c"LMTRACE_FD";

pub fn sink_fd() -> RawFd {
    //! Reads `LMTRACE_FD`. Runs during bootstrap, so nothing
    //! here may allocate: `getenv` hands out a pointer into
    //! the environment block and parsing works on its bytes.

    let raw = unsafe { getenv(FD_VAR.as_ptr()) };
    if raw.is_null() {
        return DEFAULT_FD;
    }
    let value = unsafe { CStr::from_ptr(raw) };

    parse_fd(value.to_bytes()).unwrap_or(DEFAULT_FD)
}

pub fn parse_fd(value: &[u8]) -> Option<RawFd> {
    std::str::from_utf8(value)
        .ok()?
        .trim()
        .parse::<RawFd>()
        .ok()
        .filter(|fd| *fd >= 0)
}

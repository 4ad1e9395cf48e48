use crate::ffi::*;
use crate::logger::{Addr, LineBuf};
use std::fmt::Write;
use std::ops::Range;
use std::slice;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Deepest call stack recorded per event.
pub const MAX_FRAMES: usize = 16;
// Room for the tracer's own frames, which are dropped. How many there
// are depends on inlining.
const RAW_FRAMES: usize = MAX_FRAMES + 8;
// When the tracer shares its object with the host (static linking,
// unit tests) frames cannot be told apart by object. Drop the capture
// routine and the interceptor then.
const FALLBACK_SKIP: usize = 2;

/// Fills a [`CallStack`] for the calling thread. Swappable so that
/// tests can stand in a routine of their own.
pub type CaptureFn = fn(&mut CallStack);

/// Return addresses of the calling thread, innermost first.
#[derive(Clone, Copy, Debug)]
pub struct CallStack {
    frames: [usize; MAX_FRAMES],
    len: usize,
}

impl CallStack {
    pub const fn new() -> Self {
        CallStack { frames: [0; MAX_FRAMES], len: 0 }
    }

    /// Returns `false` once the stack is full.
    pub fn push(&mut self, frame: usize) -> bool {
        if self.len == MAX_FRAMES {
            return false;
        }
        self.frames[self.len] = frame;
        self.len += 1;
        true
    }

    pub fn frames(&self) -> &[usize] {
        &self.frames[..self.len]
    }
}

struct Lookup {
    addr:   usize,
    range:  Option<Range<usize>>,
}

unsafe extern "C" fn find_object(info: *mut dl_phdr_info, _size: size_t, data: *mut void) -> int {
    let lookup = &mut *(data as *mut Lookup);
    let info = &*info;
    if info.dlpi_phdr.is_null() {
        return 0;
    }
    let segments = slice::from_raw_parts(info.dlpi_phdr, info.dlpi_phnum as usize);
    let mut span = usize::MAX..0;
    let mut hit = false;
    for segment in segments.iter().filter(|segment| segment.p_type == PT_LOAD) {
        let start = (info.dlpi_addr as usize).wrapping_add(segment.p_vaddr as usize);
        let end = start.wrapping_add(segment.p_memsz as usize);
        hit |= (start..end).contains(&lookup.addr);
        span = span.start.min(start)..span.end.max(end);
    }
    if !hit {
        return 0;
    }
    lookup.range = Some(span);
    1
}

/// Addresses spanned by the loaded segments of the object `addr` lies
/// in. Takes the loader lock, so it stays out of the per-event path.
pub fn object_range(addr: usize) -> Option<Range<usize>> {
    let mut lookup = Lookup { addr, range: None };
    unsafe { dl_iterate_phdr(Some(find_object), &mut lookup as *mut Lookup as *mut void) };
    lookup.range
}

/// Addresses of the object the tracer itself lives in. Looked up once,
/// by [`prime`].
fn own_range() -> Option<Range<usize>> {
    static OWN_START: AtomicUsize = AtomicUsize::new(0);
    static OWN_END: AtomicUsize = AtomicUsize::new(0);
    match OWN_END.load(Ordering::Acquire) {
        0 => {
            let range = object_range(capture as CaptureFn as usize)?;
            OWN_START.store(range.start, Ordering::Relaxed);
            OWN_END.store(range.end, Ordering::Release);
            Some(range)
        },
        end => Some(OWN_START.load(Ordering::Relaxed)..end),
    }
}

/// Copies `raw` into `stack`, minus the leading run of frames that
/// belong to the tracer. If nothing but tracer frames was captured,
/// only the fixed fallback is dropped.
pub fn keep_callers(raw: &[usize], is_own: impl Fn(usize) -> bool, stack: &mut CallStack) {
    let skip = raw
        .iter()
        .position(|frame| !is_own(*frame))
        .unwrap_or(FALLBACK_SKIP.min(raw.len()));
    for frame in &raw[skip..] {
        if !stack.push(*frame) {
            break;
        }
    }
}

/// Raw addresses only. Turning them into symbol names allocates,
/// and is left to offline tools (`addr2line`, `eu-addr2line`...).
#[inline(never)]
pub fn capture(stack: &mut CallStack) {
    let mut raw = [0usize; RAW_FRAMES];
    let depth = unsafe { backtrace(raw.as_mut_ptr() as *mut *mut void, RAW_FRAMES as int) };
    let depth = usize::try_from(depth).unwrap_or(0).min(RAW_FRAMES);
    let own = own_range();
    keep_callers(&raw[..depth], |frame| own.as_ref().is_some_and(|own| own.contains(&frame)), stack);
}

pub fn capture_and_emit(capture: CaptureFn, line: &mut LineBuf) {
    //! Must run under the logger's lock and the recursion guard.
    let mut stack = CallStack::new();
    capture(&mut stack);
    for frame in stack.frames() {
        if write!(line, " {}", Addr(*frame)).is_err() {
            break;
        }
    }
}

/// The first `backtrace` call in a process `dlopen`s the unwinder.
/// Getting that out of the way at bootstrap keeps it from happening
/// while some thread holds the logger's lock.
pub fn prime() {
    own_range();
    let mut stack = CallStack::new();
    capture(&mut stack);
}

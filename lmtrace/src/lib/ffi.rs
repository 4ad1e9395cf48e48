// C-reminiscent types.
pub type size_t     = libc::size_t;
pub type void       = libc::c_void;
pub type int        = libc::c_int;

// Linux utils.
pub use libc::{
    RTLD_NEXT,
    dlsym,
    dlerror,
    dl_iterate_phdr,
    dl_phdr_info,
    PT_LOAD,
    fputs,
    getenv,
};

// Type aliases for the interposed functions.
pub type CMalloc    = unsafe extern "C" fn(size_t)                      -> *mut void;
pub type CFree      = unsafe extern "C" fn(*mut void);
pub type CCalloc    = unsafe extern "C" fn(nobj: size_t, size: size_t)  -> *mut void;
pub type CRealloc   = unsafe extern "C" fn(p: *mut void, size: size_t)  -> *mut void;

#[link(name = "c")]
extern "C" {
    /// glibc's `execinfo.h` unwinder. Loads `libgcc_s` on first use,
    /// which allocates.
    pub fn backtrace(buffer: *mut *mut void, size: int) -> int;
}

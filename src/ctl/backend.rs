//! The generic control primitive

use core::ffi::{c_char, c_int, c_void};
use std::ffi::CStr;
use std::sync::Arc;

/// `void (*write_cb)(void *, const char *)` as taken by `malloc_stats_print`
pub type WriteCb = unsafe extern "C" fn(*mut c_void, *const c_char);

/// A `mallctl`-style control interface
///
/// `mallctl(name, oldp, oldlenp, newp, newlen)`: when `oldp` is non-null it
/// receives up to `*oldlenp` bytes and `*oldlenp` is updated to the size
/// written; when `newp` is non-null its `newlen` bytes become the new value.
/// Zero means success; any other status is a failure.
pub trait Mallctl: Send + Sync {
    /// # Safety
    /// `oldp` must be valid for `*oldlenp` bytes and aligned for the target
    /// type, `oldlenp` must be valid when `oldp` is non-null, and `newp` must
    /// be valid for `newlen` bytes.
    unsafe fn mallctl(
        &self,
        name: &CStr,
        oldp: *mut c_void,
        oldlenp: *mut usize,
        newp: *mut c_void,
        newlen: usize,
    ) -> c_int;

    /// Emit the allocator's human-readable report through `write_cb`, or to
    /// the allocator's default destination when `write_cb` is `None`.
    ///
    /// # Safety
    /// `opaque` is passed to `write_cb` untouched; `opts` must be null or a
    /// NUL-terminated string.
    unsafe fn malloc_stats_print(
        &self,
        write_cb: Option<WriteCb>,
        opaque: *mut c_void,
        opts: *const c_char,
    );
}

impl<T: Mallctl + ?Sized> Mallctl for &T {
    unsafe fn mallctl(
        &self,
        name: &CStr,
        oldp: *mut c_void,
        oldlenp: *mut usize,
        newp: *mut c_void,
        newlen: usize,
    ) -> c_int {
        (**self).mallctl(name, oldp, oldlenp, newp, newlen)
    }

    unsafe fn malloc_stats_print(
        &self,
        write_cb: Option<WriteCb>,
        opaque: *mut c_void,
        opts: *const c_char,
    ) {
        (**self).malloc_stats_print(write_cb, opaque, opts)
    }
}

impl<T: Mallctl + ?Sized> Mallctl for Arc<T> {
    unsafe fn mallctl(
        &self,
        name: &CStr,
        oldp: *mut c_void,
        oldlenp: *mut usize,
        newp: *mut c_void,
        newlen: usize,
    ) -> c_int {
        (**self).mallctl(name, oldp, oldlenp, newp, newlen)
    }

    unsafe fn malloc_stats_print(
        &self,
        write_cb: Option<WriteCb>,
        opaque: *mut c_void,
        opts: *const c_char,
    ) {
        (**self).malloc_stats_print(write_cb, opaque, opts)
    }
}

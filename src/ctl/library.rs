//! Dynamic library handle and symbol resolution
//!
//! Thin RAII wrapper around dlopen/dlsym/dlclose.

use crate::error::{CtlError, Result};
use core::ffi::c_void;
use core::ptr::{self, NonNull};
use std::ffi::{CStr, CString};

/// Handle to a dynamically loaded library (or the running image)
pub struct Library {
    handle: NonNull<c_void>,
    label: String,
}

impl Library {
    /// Load a library by name or path
    pub fn open(name: &str) -> Result<Self> {
        let cname = CString::new(name).map_err(|_| CtlError::LibraryUnavailable {
            reason: format!("invalid library name {:?}", name),
        })?;
        Self::open_raw(cname.as_ptr(), name)
    }

    /// The executable and everything already linked into it
    pub fn this_process() -> Result<Self> {
        Self::open_raw(ptr::null(), "<process>")
    }

    fn open_raw(filename: *const libc::c_char, label: &str) -> Result<Self> {
        unsafe {
            let handle = libc::dlopen(filename, libc::RTLD_NOW | libc::RTLD_LOCAL);
            NonNull::new(handle)
                .map(|handle| Self {
                    handle,
                    label: label.to_owned(),
                })
                .ok_or_else(|| CtlError::LibraryUnavailable {
                    reason: format!("{}: {}", label, last_dl_error()),
                })
        }
    }

    /// Address of `symbol`, or `None` if the image does not export it
    pub fn symbol(&self, symbol: &str) -> Option<NonNull<c_void>> {
        let cname = CString::new(symbol).ok()?;
        unsafe { NonNull::new(libc::dlsym(self.handle.as_ptr(), cname.as_ptr())) }
    }

    /// Name or path this handle was opened with
    pub fn label(&self) -> &str {
        &self.label
    }
}

unsafe fn last_dl_error() -> String {
    let err = libc::dlerror();
    if err.is_null() {
        "Unknown error".into()
    } else {
        CStr::from_ptr(err).to_string_lossy().into_owned()
    }
}

impl Drop for Library {
    fn drop(&mut self) {
        unsafe {
            libc::dlclose(self.handle.as_ptr());
        }
    }
}

// dlopen handles are process-global and usable from any thread.
unsafe impl Send for Library {}
unsafe impl Sync for Library {}

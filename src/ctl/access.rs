//! Typed accessors - buffer sizing, invocation and decoding
//!
//! Every read follows the same protocol: size a buffer for the target kind,
//! pre-set the length cell to that size, call the primitive with a null
//! `newp`, then decode with the process word width. Writes pass a null `oldp`.

use super::backend::Mallctl;
use super::name::CtlName;
use super::types::{CtlType, CtlValue};
use crate::error::{CtlError, Result};
use crate::logging::{log_ctl_failure, log_ctl_read, log_ctl_write};
use crate::width::WordWidth;
use core::ffi::{c_char, c_void};
use core::ptr::{self, NonNull};
use std::ffi::CStr;

/// Scalar output buffer. The allocator stores through a typed pointer, so
/// the storage must be aligned for the widest scalar.
#[repr(C, align(8))]
#[derive(Default)]
struct Cell([u8; 8]);

fn read_into<B: Mallctl + ?Sized>(backend: &B, name: &CtlName, buf: &mut [u8]) -> Result<()> {
    let expected = buf.len();
    let mut len = expected;

    let status = unsafe {
        backend.mallctl(
            name.as_c_str(),
            buf.as_mut_ptr().cast::<c_void>(),
            &mut len,
            ptr::null_mut(),
            0,
        )
    };

    if status != 0 {
        log_ctl_failure(name.as_str(), status);
        return Err(CtlError::call_failed(name.as_str(), status));
    }
    if len != expected {
        return Err(CtlError::LengthMismatch {
            name: name.as_str().to_owned(),
            expected,
            actual: len,
        });
    }

    log_ctl_read(name.as_str(), len);
    Ok(())
}

fn read_cell<B: Mallctl + ?Sized>(backend: &B, name: &CtlName, size: usize) -> Result<Cell> {
    let mut cell = Cell::default();
    read_into(backend, name, &mut cell.0[..size])?;
    Ok(cell)
}

/// `bool` property; any nonzero byte is `true`
pub fn get_bool<B: Mallctl + ?Sized>(backend: &B, name: &CtlName) -> Result<bool> {
    let cell = read_cell(backend, name, CtlType::Bool.size(WordWidth::native()))?;
    Ok(cell.0[0] != 0)
}

/// `size_t` property
pub fn get_size<B: Mallctl + ?Sized>(backend: &B, name: &CtlName) -> Result<usize> {
    let width = WordWidth::native();
    let cell = read_cell(backend, name, width.bytes())?;
    Ok(width.decode_unsigned(&cell.0[..width.bytes()]) as usize)
}

/// `ssize_t` property
pub fn get_ssize<B: Mallctl + ?Sized>(backend: &B, name: &CtlName) -> Result<isize> {
    let width = WordWidth::native();
    let cell = read_cell(backend, name, width.bytes())?;
    Ok(width.decode_signed(&cell.0[..width.bytes()]) as isize)
}

/// `unsigned` / `uint32_t` property
pub fn get_u32<B: Mallctl + ?Sized>(backend: &B, name: &CtlName) -> Result<u32> {
    let cell = read_cell(backend, name, 4)?;
    Ok(u32::from_ne_bytes([cell.0[0], cell.0[1], cell.0[2], cell.0[3]]))
}

/// `uint64_t` property
pub fn get_u64<B: Mallctl + ?Sized>(backend: &B, name: &CtlName) -> Result<u64> {
    let cell = read_cell(backend, name, 8)?;
    Ok(u64::from_ne_bytes(cell.0))
}

fn get_pointer<B: Mallctl + ?Sized>(backend: &B, name: &CtlName) -> Result<*mut c_void> {
    let width = WordWidth::native();
    let cell = read_cell(backend, name, width.bytes())?;
    Ok(width.decode_unsigned(&cell.0[..width.bytes()]) as usize as *mut c_void)
}

/// `const char *` property, copied out of allocator-owned memory
///
/// Returns `Ok(None)` when the allocator hands back a null pointer.
pub fn get_string<B: Mallctl + ?Sized>(backend: &B, name: &CtlName) -> Result<Option<String>> {
    let raw = get_pointer(backend, name)?;
    if raw.is_null() {
        return Ok(None);
    }
    // The allocator returns pointers to static, NUL-terminated strings.
    let s = unsafe { CStr::from_ptr(raw as *const c_char) };
    Ok(Some(s.to_string_lossy().into_owned()))
}

/// `size_t *` property: the address of a counter the allocator keeps updating
pub fn get_size_ptr<B: Mallctl + ?Sized>(
    backend: &B,
    name: &CtlName,
) -> Result<Option<NonNull<usize>>> {
    Ok(NonNull::new(get_pointer(backend, name)?.cast::<usize>()))
}

/// `bool[len]` property, fetched in a single call
pub fn get_bool_array<B: Mallctl + ?Sized>(
    backend: &B,
    name: &CtlName,
    len: usize,
) -> Result<Vec<bool>> {
    if len == 0 {
        return Ok(Vec::new());
    }
    let mut buf = vec![0u8; len];
    read_into(backend, name, &mut buf)?;
    Ok(buf.into_iter().map(|b| b != 0).collect())
}

/// Write a `uint64_t` property
pub fn set_u64<B: Mallctl + ?Sized>(backend: &B, name: &CtlName, value: u64) -> Result<()> {
    let mut cell = Cell(value.to_ne_bytes());

    let status = unsafe {
        backend.mallctl(
            name.as_c_str(),
            ptr::null_mut(),
            ptr::null_mut(),
            cell.0.as_mut_ptr().cast::<c_void>(),
            cell.0.len(),
        )
    };

    if status != 0 {
        log_ctl_failure(name.as_str(), status);
        return Err(CtlError::call_failed(name.as_str(), status));
    }

    log_ctl_write(name.as_str(), cell.0.len());
    Ok(())
}

/// Read a property of the given kind
pub fn read<B: Mallctl + ?Sized>(backend: &B, name: &CtlName, kind: CtlType) -> Result<CtlValue> {
    Ok(match kind {
        CtlType::Bool => CtlValue::Bool(get_bool(backend, name)?),
        CtlType::Size => CtlValue::Size(get_size(backend, name)?),
        CtlType::SSize => CtlValue::SSize(get_ssize(backend, name)?),
        CtlType::U32 => CtlValue::U32(get_u32(backend, name)?),
        CtlType::U64 => CtlValue::U64(get_u64(backend, name)?),
        CtlType::Str => CtlValue::Str(get_string(backend, name)?),
    })
}

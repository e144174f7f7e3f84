//! Control path - typed access to `mallctl`
//!
//! Design: one generic read/write primitive, wrapped by accessors that own
//! the exact buffer size and decoding for every value kind.
//!
//! Architecture:
//! - `backend.rs` - the [`Mallctl`] primitive and its status convention
//! - `types.rs` - value kinds ([`CtlType`]) and decoded values ([`CtlValue`])
//! - `name.rs` - dotted property names and index interpolation
//! - `access.rs` - get/set accessors built on the primitive
//! - `library.rs` - `dlopen`/`dlsym` wrapper (unix)
//! - `native.rs` - the primitive bound to a live jemalloc (unix)

mod access;
mod backend;
pub mod name;
mod types;

#[cfg(unix)]
mod library;
#[cfg(unix)]
mod native;

pub use access::{
    get_bool, get_bool_array, get_size, get_size_ptr, get_ssize, get_string, get_u32, get_u64,
    read, set_u64,
};
pub use backend::{Mallctl, WriteCb};
pub use name::CtlName;
pub use types::{CtlType, CtlValue};

#[cfg(unix)]
pub use library::Library;
#[cfg(unix)]
pub use native::{Native, NativeConfig};

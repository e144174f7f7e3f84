//! jemalloc-introspect - typed views of jemalloc's `mallctl` interface
//!
//! This crate does not allocate anything itself. It reads (and, for the
//! statistics epoch, writes) the state of a live jemalloc through its single
//! generic control call, and decodes every property at the right width.
//!
//! Targets the control vocabulary of jemalloc 4.1 through 4.5; see
//! [`query::is_supported_version`].
//!
//! ```no_run
//! # fn main() -> jemalloc_introspect::Result<()> {
//! let je = jemalloc_introspect::global()?;
//! println!("jemalloc {}", je.version()?.unwrap_or_default());
//! for arena in je.stats()?.initialized() {
//!     println!("arena {}: {} active pages", arena.index, arena.pactive);
//! }
//! # Ok(())
//! # }
//! ```

pub mod ctl;
pub mod error;
pub mod logging;
pub mod query;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
pub mod width;

pub use ctl::{CtlName, CtlType, CtlValue, Mallctl};
pub use error::{CtlError, Result};
pub use query::{
    ArenaStats, BinClass, BinStats, ChunkStats, ClassTotals, GlobalStats, Introspector,
    RunStats, SizeClassTable,
};
pub use width::WordWidth;

#[cfg(unix)]
pub use ctl::{Native, NativeConfig};

#[cfg(unix)]
static GLOBAL: once_cell::sync::OnceCell<Introspector<Native>> = once_cell::sync::OnceCell::new();

/// Process-wide introspector over the jemalloc this process can reach
///
/// Resolved on first success with [`NativeConfig::from_env`]; a failed
/// resolution is retried on the next call.
#[cfg(unix)]
pub fn global() -> Result<&'static Introspector<Native>> {
    GLOBAL.get_or_try_init(|| Native::resolve().map(Introspector::new))
}

//! Native word width for `size_t` / `ssize_t` values
//!
//! Resolved once from the compiled target, never by probing the allocator.
//! Every word-sized encode and decode in the process goes through
//! [`WordWidth::native`].

use crate::error::{CtlError, Result};
use once_cell::sync::Lazy;

static NATIVE: Lazy<WordWidth> = Lazy::new(|| {
    match WordWidth::from_bytes(core::mem::size_of::<usize>()) {
        Ok(width) => width,
        // No decode path can be correct on such a target.
        Err(err) => panic!("{}", err),
    }
});

/// Width of a `size_t` on the running platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WordWidth {
    W32,
    W64,
}

impl WordWidth {
    /// Width of the current process, resolved on first use
    ///
    /// # Panics
    /// If `size_t` is neither 4 nor 8 bytes wide.
    #[inline]
    pub fn native() -> Self {
        *NATIVE
    }

    pub const fn from_bytes(bytes: usize) -> Result<Self> {
        match bytes {
            4 => Ok(Self::W32),
            8 => Ok(Self::W64),
            word_bytes => Err(CtlError::UnsupportedPlatform { word_bytes }),
        }
    }

    #[inline]
    pub const fn bytes(self) -> usize {
        match self {
            Self::W32 => 4,
            Self::W64 => 8,
        }
    }

    /// Decode an unsigned word. `buf` must be exactly `self.bytes()` long.
    pub fn decode_unsigned(self, buf: &[u8]) -> u64 {
        debug_assert_eq!(buf.len(), self.bytes());
        match self {
            Self::W32 => u32::from_ne_bytes([buf[0], buf[1], buf[2], buf[3]]) as u64,
            Self::W64 => u64::from_ne_bytes([
                buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7],
            ]),
        }
    }

    /// Decode a signed word, sign-extending 32-bit values.
    pub fn decode_signed(self, buf: &[u8]) -> i64 {
        debug_assert_eq!(buf.len(), self.bytes());
        match self {
            Self::W32 => i32::from_ne_bytes([buf[0], buf[1], buf[2], buf[3]]) as i64,
            Self::W64 => i64::from_ne_bytes([
                buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7],
            ]),
        }
    }

    /// Encode an unsigned word, truncating to 32 bits on `W32`.
    pub fn encode_unsigned(self, value: u64) -> Vec<u8> {
        match self {
            Self::W32 => (value as u32).to_ne_bytes().to_vec(),
            Self::W64 => value.to_ne_bytes().to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn native_matches_usize() {
        assert_eq!(WordWidth::native().bytes(), core::mem::size_of::<usize>());
    }

    #[test]
    fn rejects_odd_widths() {
        for bytes in [0, 1, 2, 3, 5, 16] {
            assert_eq!(
                WordWidth::from_bytes(bytes),
                Err(CtlError::UnsupportedPlatform { word_bytes: bytes })
            );
        }
    }

    #[test]
    fn signed_32_sign_extends() {
        let buf = (-3i32).to_ne_bytes();
        assert_eq!(WordWidth::W32.decode_signed(&buf), -3);
        assert_eq!(WordWidth::W32.decode_unsigned(&buf), u32::MAX as u64 - 2);
    }

    proptest! {
        #[test]
        fn w32_decode_never_exceeds_u32(value: u32) {
            let buf = WordWidth::W32.encode_unsigned(value as u64);
            prop_assert_eq!(buf.len(), 4);
            prop_assert!(WordWidth::W32.decode_unsigned(&buf) <= u32::MAX as u64);
        }

        #[test]
        fn w64_signed_matches_native(value: i64) {
            prop_assert_eq!(WordWidth::W64.decode_signed(&value.to_ne_bytes()), value);
        }
    }
}

//! Byte-level reader/writer primitives.
//!
//! All numeric fields on the wire are big-endian and serialized explicitly
//! via `to_be_bytes`/`from_be_bytes`; nothing is ever written by casting
//! struct memory.
//!
//! The codec consumes bytes through the [`IrRead`] seam and emits through
//! [`IrWrite`]. Both contracts are all-or-nothing: a read either fully
//! satisfies the request or reports `IncompleteStream`, and writes are
//! monotone appends (no seeks).

use crate::error::{IrError, Result};

// ============================================================================
// Big-endian numerics
// ============================================================================

/// Fixed-width numeric types with an explicit big-endian wire layout.
///
/// Implemented for the unsigned/signed integers up to 64 bits and `f64`
/// (IEEE-754 bits, byte-swapped like a u64).
pub trait BeNumeric: Copy + Sized {
    /// Encoded width in bytes.
    const WIDTH: usize;

    /// Append the big-endian encoding of `self` to `buf`.
    fn put_be(self, buf: &mut Vec<u8>);

    /// Decode from exactly `Self::WIDTH` big-endian bytes.
    ///
    /// Panics if `bytes.len() != Self::WIDTH`; callers size the slice from
    /// `WIDTH`.
    fn from_be_slice(bytes: &[u8]) -> Self;
}

macro_rules! impl_be_numeric {
    ($($t:ty),*) => {
        $(impl BeNumeric for $t {
            const WIDTH: usize = std::mem::size_of::<$t>();

            #[inline]
            fn put_be(self, buf: &mut Vec<u8>) {
                buf.extend_from_slice(&self.to_be_bytes());
            }

            #[inline]
            fn from_be_slice(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$t>()];
                raw.copy_from_slice(bytes);
                <$t>::from_be_bytes(raw)
            }
        })*
    };
}

impl_be_numeric!(u8, u16, u32, u64, i8, i16, i32, i64);

impl BeNumeric for f64 {
    const WIDTH: usize = 8;

    #[inline]
    fn put_be(self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.to_bits().to_be_bytes());
    }

    #[inline]
    fn from_be_slice(bytes: &[u8]) -> Self {
        f64::from_bits(u64::from_be_slice(bytes))
    }
}

// ============================================================================
// Reader seam
// ============================================================================

/// Byte source the decoder pulls from.
///
/// `try_read_exact` either fills `out` completely or fails with
/// [`IrError::IncompleteStream`] carrying the current byte position; partial
/// reads never happen. `position` reports the count of bytes consumed so
/// far, for error reporting.
pub trait IrRead {
    /// Fill `out` completely from the stream or fail without consuming.
    fn try_read_exact(&mut self, out: &mut [u8]) -> Result<()>;

    /// Bytes consumed so far.
    fn position(&self) -> usize;

    /// Read a single fixed-width numeric in big-endian byte order.
    fn try_read_numeric<T: BeNumeric>(&mut self) -> Result<T> {
        let mut raw = [0u8; 8];
        let raw = &mut raw[..T::WIDTH];
        self.try_read_exact(raw)?;
        Ok(T::from_be_slice(raw))
    }

    /// Read `len` raw bytes. Lengths beyond
    /// [`MAX_PAYLOAD_LEN`](crate::protocol::MAX_PAYLOAD_LEN) are rejected
    /// **before** allocation.
    fn try_read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        if len > crate::protocol::MAX_PAYLOAD_LEN {
            return Err(IrError::corrupt(format!(
                "declared length {len} exceeds the payload cap"
            )));
        }
        let mut out = vec![0u8; len];
        self.try_read_exact(&mut out)?;
        Ok(out)
    }

    /// Read `len` bytes and append them to `out` as UTF-8.
    fn try_read_string(&mut self, len: usize, out: &mut String) -> Result<()> {
        let bytes = self.try_read_bytes(len)?;
        let s = std::str::from_utf8(&bytes)
            .map_err(|_| IrError::corrupt(format!("invalid UTF-8 at offset {}", self.position())))?;
        out.push_str(s);
        Ok(())
    }
}

/// In-memory reader over a byte slice.
///
/// The reference [`IrRead`] implementation; streams are decoded from
/// buffered bytes, with any transport layered outside the codec.
#[derive(Debug)]
pub struct SliceReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SliceReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}

impl IrRead for SliceReader<'_> {
    fn try_read_exact(&mut self, out: &mut [u8]) -> Result<()> {
        if self.remaining() < out.len() {
            return Err(IrError::IncompleteStream(self.pos));
        }
        out.copy_from_slice(&self.data[self.pos..self.pos + out.len()]);
        self.pos += out.len();
        Ok(())
    }

    fn position(&self) -> usize {
        self.pos
    }
}

// ============================================================================
// Writer seam
// ============================================================================

/// Byte sink the encoder emits into. Appends are monotone; the codec never
/// seeks or rewrites emitted bytes.
pub trait IrWrite {
    fn write_all(&mut self, bytes: &[u8]) -> Result<()>;
}

impl IrWrite for Vec<u8> {
    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.extend_from_slice(bytes);
        Ok(())
    }
}

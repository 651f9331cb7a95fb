//! # Binary Cursor
//!
//! Bounds-checked little-endian reader and writer used by every codec in
//! the crate. Both wrap a borrowed slice and advance through it with the
//! `bytes` traits; every access checks the remaining length first, so a
//! short buffer is a [`ProtocolError::Truncated`] (reading) or
//! [`ProtocolError::BufferOverflow`] (writing), never a panic.

use bytes::{Buf, BufMut};

use crate::error::{ProtocolError, Result};

/// Read cursor over an untrusted byte slice.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
    len: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, len: buf.len() }
    }

    /// Bytes not yet consumed.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    /// Bytes consumed so far.
    #[inline]
    pub fn position(&self) -> usize {
        self.len - self.buf.len()
    }

    /// The unread tail of the buffer.
    pub fn rest(&self) -> &'a [u8] {
        self.buf
    }

    #[inline]
    fn ensure(&self, needed: usize) -> Result<()> {
        if self.buf.remaining() < needed {
            return Err(ProtocolError::Truncated {
                needed,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.ensure(2)?;
        Ok(self.buf.get_u16_le())
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.ensure(4)?;
        Ok(self.buf.get_u32_le())
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.ensure(8)?;
        Ok(self.buf.get_u64_le())
    }

    /// Read an unsigned integer stored in `nbytes` (1..=8) little-endian bytes.
    pub fn read_uint(&mut self, nbytes: usize) -> Result<u64> {
        if !(1..=8).contains(&nbytes) {
            return Err(ProtocolError::InvalidPacket);
        }
        self.ensure(nbytes)?;
        Ok(self.buf.get_uint_le(nbytes))
    }

    /// Borrow the next `n` bytes.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.ensure(n)?;
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    /// Copy the next `N` bytes into an array.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }
}

/// Write cursor over a caller-provided output buffer.
#[derive(Debug)]
pub struct Writer<'a> {
    buf: &'a mut [u8],
    len: usize,
}

impl<'a> Writer<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        let len = buf.len();
        Self { buf, len }
    }

    /// Bytes written so far.
    #[inline]
    pub fn position(&self) -> usize {
        self.len - self.buf.len()
    }

    /// Space left in the output buffer.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.remaining_mut()
    }

    #[inline]
    fn ensure(&self, needed: usize) -> Result<()> {
        if self.buf.remaining_mut() < needed {
            return Err(ProtocolError::BufferOverflow {
                needed,
                remaining: self.buf.remaining_mut(),
            });
        }
        Ok(())
    }

    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.ensure(1)?;
        self.buf.put_u8(value);
        Ok(())
    }

    pub fn write_u16(&mut self, value: u16) -> Result<()> {
        self.ensure(2)?;
        self.buf.put_u16_le(value);
        Ok(())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.ensure(4)?;
        self.buf.put_u32_le(value);
        Ok(())
    }

    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.ensure(8)?;
        self.buf.put_u64_le(value);
        Ok(())
    }

    /// Write the low `nbytes` (1..=8) bytes of `value` little-endian.
    pub fn write_uint(&mut self, value: u64, nbytes: usize) -> Result<()> {
        if !(1..=8).contains(&nbytes) {
            return Err(ProtocolError::InvalidPacket);
        }
        self.ensure(nbytes)?;
        self.buf.put_uint_le(value, nbytes);
        Ok(())
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.ensure(bytes.len())?;
        self.buf.put_slice(bytes);
        Ok(())
    }

    /// Write `n` zero bytes.
    pub fn write_zeros(&mut self, n: usize) -> Result<()> {
        self.ensure(n)?;
        self.buf.put_bytes(0, n);
        Ok(())
    }

    /// Split off the next `n` bytes for the caller to fill directly.
    pub fn reserve(&mut self, n: usize) -> Result<&'a mut [u8]> {
        self.ensure(n)?;
        let buf = std::mem::take(&mut self.buf);
        let (head, tail) = buf.split_at_mut(n);
        self.buf = tail;
        Ok(head)
    }
}

//! Bounds-checked wire codec primitives.
//!
//! Every message and persisted record uses the same framing rules: all
//! integers in network byte order, strings as u32 length prefix + raw bytes
//! (no terminator), byte vectors as u64 length prefix + raw bytes. A whole
//! encoded datagram must fit `MAX_DATAGRAM`; oversized encodes fail instead
//! of being silently fragmented.

use crate::utils::ShoalError;

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Hard limit on a single datagram payload, discriminant byte included.
pub(crate) const MAX_DATAGRAM: usize = 8 * 1024;

/// Append-only encoder over a growable buffer.
pub(crate) struct WireWriter {
    buf: BytesMut,
}

impl WireWriter {
    pub(crate) fn new() -> Self {
        WireWriter {
            buf: BytesMut::with_capacity(256),
        }
    }

    pub(crate) fn put_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub(crate) fn put_u32(&mut self, v: u32) {
        self.buf.put_u32(v);
    }

    pub(crate) fn put_u64(&mut self, v: u64) {
        self.buf.put_u64(v);
    }

    /// u32 length prefix + raw bytes.
    pub(crate) fn put_str(&mut self, s: &str) {
        self.buf.put_u32(s.len() as u32);
        self.buf.put_slice(s.as_bytes());
    }

    /// u64 length prefix + raw bytes.
    pub(crate) fn put_blob(&mut self, b: &[u8]) {
        self.buf.put_u64(b.len() as u64);
        self.buf.put_slice(b);
    }

    /// Raw bytes with no length prefix (for records carrying their own
    /// explicit size field).
    pub(crate) fn put_raw(&mut self, b: &[u8]) {
        self.buf.put_slice(b);
    }

    /// Finishes encoding without a size check (persisted records).
    pub(crate) fn finish(self) -> Bytes {
        self.buf.freeze()
    }

    /// Finishes encoding a datagram payload, rejecting oversized buffers.
    pub(crate) fn finish_datagram(self) -> Result<Bytes, ShoalError> {
        if self.buf.len() > MAX_DATAGRAM {
            return Err(ShoalError(format!(
                "buffer oversize: {} bytes > datagram limit {}",
                self.buf.len(),
                MAX_DATAGRAM
            )));
        }
        Ok(self.buf.freeze())
    }
}

/// Decoder over a borrowed byte slice. Every getter checks bounds and fails
/// with a diagnostic instead of panicking on truncated input.
pub(crate) struct WireReader<'a> {
    buf: &'a [u8],
}

impl<'a> WireReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        WireReader { buf }
    }

    #[allow(dead_code)]
    pub(crate) fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn need(&self, n: usize) -> Result<(), ShoalError> {
        if self.buf.len() < n {
            Err(ShoalError(format!(
                "truncated buffer: need {} bytes, have {}",
                n,
                self.buf.len()
            )))
        } else {
            Ok(())
        }
    }

    pub(crate) fn get_u8(&mut self) -> Result<u8, ShoalError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub(crate) fn get_u32(&mut self) -> Result<u32, ShoalError> {
        self.need(4)?;
        Ok(self.buf.get_u32())
    }

    pub(crate) fn get_u64(&mut self) -> Result<u64, ShoalError> {
        self.need(8)?;
        Ok(self.buf.get_u64())
    }

    pub(crate) fn get_str(&mut self) -> Result<String, ShoalError> {
        let len = self.get_u32()? as usize;
        self.need(len)?;
        let s = String::from_utf8(self.buf[..len].to_vec())?;
        self.buf.advance(len);
        Ok(s)
    }

    pub(crate) fn get_blob(&mut self) -> Result<Vec<u8>, ShoalError> {
        let len = self.get_u64()? as usize;
        self.get_raw(len)
    }

    pub(crate) fn get_raw(&mut self, len: usize) -> Result<Vec<u8>, ShoalError> {
        self.need(len)?;
        let v = self.buf[..len].to_vec();
        self.buf.advance(len);
        Ok(v)
    }
}

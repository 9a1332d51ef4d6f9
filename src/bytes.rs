/*!
The `bytes` module is the single typed boundary between in-memory values and
the big-endian fields of the wire protocols. Replies are fully buffered before
parsing, so the reader is a plain slice cursor rather than an `io::Read`
adapter.
!*/

use snafu::{ensure, Snafu};

#[derive(Debug, Snafu)]
pub(crate) enum ByteError {
    #[snafu(display("unexpected end of message at byte {}", position))]
    End { position: usize },
}

pub(crate) type ByteResult<T> = std::result::Result<T, ByteError>;

/// A cursor over a received message.
pub(crate) struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub(crate) fn skip(&mut self, count: usize) -> ByteResult<()> {
        ensure!(
            self.pos + count <= self.data.len(),
            EndSnafu { position: self.pos }
        );
        self.pos += count;
        Ok(())
    }

    pub(crate) fn read_u8(&mut self) -> ByteResult<u8> {
        ensure!(
            self.pos < self.data.len(),
            EndSnafu { position: self.pos }
        );
        let value = self.data[self.pos];
        self.pos += 1;
        Ok(value)
    }

    pub(crate) fn read_be16(&mut self) -> ByteResult<u16> {
        let bytes = self.read_array::<2>()?;
        Ok(u16::from_be_bytes(bytes))
    }

    pub(crate) fn read_be32(&mut self) -> ByteResult<u32> {
        let bytes = self.read_array::<4>()?;
        Ok(u32::from_be_bytes(bytes))
    }

    pub(crate) fn read_be64(&mut self) -> ByteResult<u64> {
        let bytes = self.read_array::<8>()?;
        Ok(u64::from_be_bytes(bytes))
    }

    pub(crate) fn read_n(&mut self, count: usize) -> ByteResult<&'a [u8]> {
        ensure!(
            self.pos + count <= self.data.len(),
            EndSnafu { position: self.pos }
        );
        let slice = &self.data[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }

    /// Reads up to (and consumes) a NUL terminator, returning the bytes
    /// before it. A message that ends without a terminator yields the
    /// remaining bytes.
    pub(crate) fn read_cstring(&mut self) -> ByteResult<&'a [u8]> {
        ensure!(
            self.pos < self.data.len(),
            EndSnafu { position: self.pos }
        );
        let start = self.pos;
        while self.pos < self.data.len() && self.data[self.pos] != 0 {
            self.pos += 1;
        }
        let slice = &self.data[start..self.pos];
        if self.pos < self.data.len() {
            self.pos += 1; // the NUL
        }
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self) -> ByteResult<[u8; N]> {
        ensure!(
            self.pos + N <= self.data.len(),
            EndSnafu { position: self.pos }
        );
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(&self.data[self.pos..self.pos + N]);
        self.pos += N;
        Ok(bytes)
    }
}

/// A builder for outgoing message bodies. Fixed-offset fields of a template
/// can be patched after the fact with the `set_*` functions.
#[derive(Clone, Debug, Default)]
pub(crate) struct ByteWriter {
    bytes: Vec<u8>,
}

impl ByteWriter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn put_u8(&mut self, value: u8) {
        self.bytes.push(value);
    }

    pub(crate) fn put_be32(&mut self, value: u32) {
        self.bytes.extend_from_slice(&value.to_be_bytes());
    }

    pub(crate) fn put_bytes(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    pub(crate) fn put_cstring(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
        self.bytes.push(0);
    }

    pub(crate) fn set_be16(&mut self, at: usize, value: u16) {
        self.bytes[at..at + 2].copy_from_slice(&value.to_be_bytes());
    }

    pub(crate) fn set_be32(&mut self, at: usize, value: u32) {
        self.bytes[at..at + 4].copy_from_slice(&value.to_be_bytes());
    }

    pub(crate) fn into_inner(self) -> Vec<u8> {
        self.bytes
    }
}

//! The boundary between this crate's parser/encoder core and wherever the bytes
//! actually live — an in-memory buffer, a file, or an integrator's own fetch queue.
//!
//! [`DataSource`] and [`DataSink`] stand in for the `fetch`/`write` callback pair from
//! the external interface: offset-addressed, able to report `would-block` instead of
//! blocking the caller. [`MemorySource`]/[`MemorySink`] and the [`ReadSource`]/
//! [`WriteSink`] adapters around [`Read`]/[`Write`] + [`Seek`] cover the synchronous
//! case; a genuinely asynchronous integrator implements the traits directly.

use crate::error::{Error, Result};
use std::convert::TryFrom;
use std::io::{Read, Seek, SeekFrom, Write};

/// The result of a single fetch or write attempt.
#[derive(Debug)]
pub enum Outcome<T> {
    /// The operation completed; here is the result.
    Ready(T),

    /// The operation could not complete synchronously. The caller is responsible for
    /// driving the underlying transport to completion and retrying.
    WouldBlock,
}

/// A byte source the decoder reads the header and chunk data from.
///
/// Every fetch is addressed by an absolute offset, so sources do not need to track a
/// read cursor themselves; [`crate::decoder::Decoder`] never assumes fetches arrive in
/// order.
pub trait DataSource {
    /// Copy `dst.len()` bytes starting at `offset` into `dst`.
    ///
    /// Returning `Outcome::WouldBlock` is only meaningful while a
    /// [`Decoder`](crate::decoder::Decoder) is fetching chunk data; returning it during
    /// header parsing is treated as a hard error, since the header phases are
    /// documented to always resolve synchronously (see [`crate::decoder`]).
    fn fetch(&mut self, offset: u64, dst: &mut [u8]) -> Result<Outcome<()>>;

    /// Total length of the underlying stream, if known ahead of time.
    fn size_hint(&self) -> Option<u64> {
        None
    }

    /// Whether this source may ever return [`Outcome::WouldBlock`].
    fn is_async(&self) -> bool {
        false
    }
}

/// A byte sink the encoder writes the header, offset table, and chunk data to.
pub trait DataSink {
    /// Write `data` starting at `offset`. A dynamically growing sink (for example a
    /// `Vec<u8>`-backed sink) zero-fills any gap between its current length and `offset`.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<Outcome<()>>;

    /// Flush any buffering the sink performs internally. A no-op by default.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// An in-memory data source backed by an owned or borrowed byte slice.
///
/// Always resolves synchronously: `fetch` never returns `Outcome::WouldBlock`.
#[derive(Clone, Debug)]
pub struct MemorySource<B> {
    bytes: B,
}

impl<B: AsRef<[u8]>> MemorySource<B> {
    /// Wrap a byte buffer (`&[u8]`, `Vec<u8>`, `Arc<[u8]>`, ...) as a data source.
    pub fn new(bytes: B) -> Self {
        Self { bytes }
    }
}

impl<B: AsRef<[u8]>> DataSource for MemorySource<B> {
    fn fetch(&mut self, offset: u64, dst: &mut [u8]) -> Result<Outcome<()>> {
        let bytes = self.bytes.as_ref();
        let start = usize::try_from(offset).map_err(|_| Error::invalid("fetch offset exceeds addressable range"))?;
        let end = start.checked_add(dst.len()).ok_or(Error::OutOfBounds)?;

        let slice = bytes.get(start .. end).ok_or(Error::OutOfBounds)?;
        dst.copy_from_slice(slice);
        Ok(Outcome::Ready(()))
    }

    fn size_hint(&self) -> Option<u64> {
        Some(self.bytes.as_ref().len() as u64)
    }
}

/// An in-memory data sink that grows a `Vec<u8>` on write, zero-filling any gap
/// between the previous length and the write offset.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    bytes: Vec<u8>,
}

impl MemorySink {
    /// Start with an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of the written bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Borrow the bytes written so far.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl DataSink for MemorySink {
    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<Outcome<()>> {
        let start = usize::try_from(offset).map_err(|_| Error::invalid("write offset exceeds addressable range"))?;
        let end = start.checked_add(data.len()).ok_or(Error::OutOfBounds)?;

        if end > self.bytes.len() {
            self.bytes.resize(end, 0);
        }

        self.bytes[start .. end].copy_from_slice(data);
        Ok(Outcome::Ready(()))
    }
}

/// Adapts any blocking [`Read`] + [`Seek`] stream (a file, a cursor, ...) into a
/// synchronous [`DataSource`].
pub struct ReadSource<T> {
    inner: T,
}

impl<T: Read + Seek> ReadSource<T> {
    /// Wrap a seekable reader.
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    /// Unwrap back into the underlying reader.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: Read + Seek> DataSource for ReadSource<T> {
    fn fetch(&mut self, offset: u64, dst: &mut [u8]) -> Result<Outcome<()>> {
        self.inner.seek(SeekFrom::Start(offset))?;
        self.inner.read_exact(dst)?;
        Ok(Outcome::Ready(()))
    }

}

/// Adapts any blocking [`Write`] + [`Seek`] stream into a synchronous [`DataSink`].
pub struct WriteSink<T> {
    inner: T,
}

impl<T: Write + Seek> WriteSink<T> {
    /// Wrap a seekable writer.
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    /// Unwrap back into the underlying writer.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: Write + Seek> DataSink for WriteSink<T> {
    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<Outcome<()>> {
        self.inner.seek(SeekFrom::Start(offset))?;
        self.inner.write_all(data)?;
        Ok(Outcome::Ready(()))
    }

    fn flush(&mut self) -> Result<()> {
        Write::flush(&mut self.inner).map_err(Error::from)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn memory_source_reads_at_offset() {
        let mut source = MemorySource::new(vec![1_u8, 2, 3, 4, 5]);
        let mut dst = [0_u8; 2];

        matches!(source.fetch(2, &mut dst).unwrap(), Outcome::Ready(()));
        assert_eq!(dst, [3, 4]);
    }

    #[test]
    fn memory_source_rejects_out_of_bounds() {
        let mut source = MemorySource::new(vec![1_u8, 2, 3]);
        let mut dst = [0_u8; 4];
        assert!(source.fetch(0, &mut dst).is_err());
    }

    #[test]
    fn memory_sink_grows_and_zero_fills() {
        let mut sink = MemorySink::new();
        matches!(sink.write_at(4, &[9, 9]).unwrap(), Outcome::Ready(()));
        assert_eq!(sink.bytes(), &[0, 0, 0, 0, 9, 9]);
    }
}

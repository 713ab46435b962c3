//! Turns a byte stream into parsed [`MetaData`] and, on demand, decompressed chunks.
//!
//! Per the suspend/resume contract (see the format specification's concurrency
//! section): version, attribute-stream, and offset-table parsing always complete
//! synchronously, even when driven by an async [`DataSource`] — they only ever touch
//! small, local buffers. The one real suspension point is later, while fetching a
//! chunk's compressed bytes for a [`CommandBuffer`](crate::command::CommandBuffer)
//! submission, because the destination is effectively a persistent allocation rather
//! than a stack buffer. [`Decoder::fetch_chunk`] is where that suspension happens.

use crate::block::chunk::Chunk;
use crate::block::UncompressedBlock;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::io::PeekRead;
use crate::meta::{Header, Headers, MetaData, OffsetTables};
use crate::source::{DataSource, Outcome};
use std::io::{Read, Result as IoResult};

/// The result of an operation that may need to suspend partway through.
#[derive(Debug)]
pub enum ParseOutcome<T> {
    /// The operation finished; here is the result.
    Done(T),

    /// The operation cannot proceed until the caller drives the pending fetch to
    /// completion and calls [`Decoder::resume_chunk`] with the carried state.
    WouldBlock(SuspendState),
}

impl<T> ParseOutcome<T> {
    /// Returns the result if the operation finished, or `None` if it suspended.
    pub fn into_done(self) -> Option<T> {
        match self {
            ParseOutcome::Done(value) => Some(value),
            ParseOutcome::WouldBlock(_) => None,
        }
    }
}

/// Which phase of decoding a [`SuspendState`] was captured in.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ParsePhase {
    /// Reading the magic number and version+flags word.
    Version,

    /// Reading the attribute stream of one header.
    AttributeStream,

    /// Reading the chunk offset table of one header.
    OffsetTable,

    /// Fetching and decompressing one chunk's pixel data.
    ChunkData,
}

/// A snapshot of decoder progress sufficient to resume after a `would-block` result.
///
/// Only [`ParsePhase::ChunkData`] is ever actually produced by this implementation;
/// the earlier phases are documented to always resolve synchronously (see the module
/// docs), so [`Decoder::parse_header`] never suspends. The other variants exist so the
/// type mirrors the full phase list an integrator driving an async chunk fetch queue
/// needs to reason about.
#[derive(Debug, Clone, Copy)]
pub struct SuspendState {
    /// Which phase was in progress when the fetch reported `would-block`.
    pub phase: ParsePhase,

    /// The absolute byte offset the pending fetch was reading from.
    pub file_offset: u64,
}

/// Adapts a [`DataSource`] into a sequential, offset-tracked [`Read`] so the existing
/// byte-level parsing routines (written against `std::io::Read`) can run over it.
/// A `WouldBlock` from the source surfaces as an [`std::io::ErrorKind::WouldBlock`]
/// error, which [`Decoder::fetch_chunk`] recognizes and translates back into a
/// [`ParseOutcome::WouldBlock`].
struct FetchReader<'s, S> {
    source: &'s mut S,
    position: u64,
}

impl<'s, S: DataSource> Read for FetchReader<'s, S> {
    fn read(&mut self, buffer: &mut [u8]) -> IoResult<usize> {
        if buffer.is_empty() {
            return Ok(0);
        }

        match self.source.fetch(self.position, buffer) {
            Ok(Outcome::Ready(())) => {
                self.position += buffer.len() as u64;
                Ok(buffer.len())
            },

            Ok(Outcome::WouldBlock) => Err(std::io::Error::new(
                std::io::ErrorKind::WouldBlock, "data source is not ready",
            )),

            Err(error) => Err(std::io::Error::new(std::io::ErrorKind::Other, error.to_string())),
        }
    }
}

/// Parses the magic number, version, every header, and every offset table from a
/// [`DataSource`], then serves chunk fetches against it on demand.
#[derive(Debug)]
pub struct Decoder<S> {
    context: Context,
    source: S,
    meta_data: MetaData,
    offset_tables: OffsetTables,
}

impl<S: DataSource> Decoder<S> {

    /// Parse the magic number, version+flags, every header, and every offset table.
    ///
    /// Always resolves synchronously (see module docs): the `WouldBlock` arm of the
    /// returned [`ParseOutcome`] is unreachable for header parsing, but the signature
    /// matches [`Decoder::fetch_chunk`] so callers can treat both uniformly.
    pub fn parse_header(context: Context, mut source: S, pedantic: bool) -> Result<ParseOutcome<Self>> {
        let parsed = {
            let mut reader = FetchReader { source: &mut source, position: 0 };
            let mut peek = PeekRead::new(&mut reader);

            MetaData::read_validated_from_buffered_peekable(&mut peek, pedantic)
                .and_then(|meta_data| {
                    let offset_tables = MetaData::read_offset_tables(&mut peek, &meta_data.headers)?;
                    Ok((meta_data, offset_tables))
                })
        };

        match parsed {
            Ok((meta_data, offset_tables)) => Ok(ParseOutcome::Done(Self { context, source, meta_data, offset_tables })),
            Err(error) => {
                context.record_error(&error, "parse_header", None);
                Err(error)
            },
        }
    }

    /// The parsed meta data: requirements and every header, in file order.
    pub fn meta_data(&self) -> &MetaData {
        &self.meta_data
    }

    /// The headers of every part in this file, in file order.
    pub fn headers(&self) -> &Headers {
        &self.meta_data.headers
    }

    /// The chunk offset table of every part, in file order.
    pub fn offset_tables(&self) -> &OffsetTables {
        &self.offset_tables
    }

    /// The context this decoder was created with, for inspecting accumulated errors.
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// The header for `part_index`, or an error if it is out of range.
    pub fn header(&self, part_index: usize) -> Result<&Header> {
        self.meta_data.headers.get(part_index).ok_or(Error::OutOfBounds)
    }

    /// Fetch and decompress the chunk starting at `file_offset`, the one true
    /// suspension point in this decoder. An async [`DataSource`] may return
    /// [`ParseOutcome::WouldBlock`]; resume with [`Decoder::resume_chunk`] once the
    /// pending fetch has completed.
    ///
    /// Only flat (scan line or tile) chunks can be decompressed this way; a deep
    /// chunk at `file_offset` fails with [`Error::NotSupported`] — use
    /// [`Decoder::fetch_raw_chunk`] for those, since deep decompression is the
    /// caller's ([`crate::command::CommandBuffer`]'s) responsibility.
    pub fn fetch_chunk(&mut self, file_offset: u64, pedantic: bool) -> Result<ParseOutcome<UncompressedBlock>> {
        match self.fetch_raw_chunk(file_offset)? {
            ParseOutcome::Done(chunk) => {
                match UncompressedBlock::decompress_chunk(chunk, &self.meta_data, pedantic) {
                    Ok(block) => Ok(ParseOutcome::Done(block)),
                    Err(error) => {
                        self.context.record_error(&error, "fetch_chunk", Some(file_offset as usize));
                        Err(error)
                    },
                }
            },
            ParseOutcome::WouldBlock(state) => Ok(ParseOutcome::WouldBlock(state)),
        }
    }

    /// Fetch one chunk's header and compressed bytes without decompressing it,
    /// returning the raw [`Chunk`]. Used for deep scan line and deep tile chunks,
    /// whose sample data and pixel-offset table need bespoke decompression (see
    /// [`crate::deep`]) rather than the flat-block path [`UncompressedBlock::decompress_chunk`]
    /// implements.
    pub fn fetch_raw_chunk(&mut self, file_offset: u64) -> Result<ParseOutcome<Chunk>> {
        let mut reader = FetchReader { source: &mut self.source, position: file_offset };

        match Chunk::read(&mut reader, &self.meta_data) {
            Ok(chunk) => Ok(ParseOutcome::Done(chunk)),

            Err(Error::Io(io_error)) if io_error.kind() == std::io::ErrorKind::WouldBlock => {
                Ok(ParseOutcome::WouldBlock(SuspendState { phase: ParsePhase::ChunkData, file_offset }))
            },

            Err(error) => {
                self.context.record_error(&error, "fetch_chunk", Some(file_offset as usize));
                Err(error)
            },
        }
    }

    /// Resume a chunk fetch that previously returned [`ParseOutcome::WouldBlock`].
    /// Equivalent to calling [`Decoder::fetch_chunk`] again at the same offset: the
    /// underlying source is expected to complete the fetch it already started.
    pub fn resume_chunk(&mut self, state: SuspendState, pedantic: bool) -> Result<ParseOutcome<UncompressedBlock>> {
        self.fetch_chunk(state.file_offset, pedantic)
    }

    /// Resume a raw chunk fetch that previously returned [`ParseOutcome::WouldBlock`]
    /// from [`Decoder::fetch_raw_chunk`].
    pub fn resume_raw_chunk(&mut self, state: SuspendState) -> Result<ParseOutcome<Chunk>> {
        self.fetch_raw_chunk(state.file_offset)
    }

    /// Consume the decoder, returning ownership of the underlying data source.
    pub fn into_source(self) -> S {
        self.source
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::math::Vec2;
    use crate::meta::attribute::{ChannelInfo, SampleType, Text};
    use crate::meta::Header;
    use crate::source::MemorySource;
    use smallvec::smallvec;
    use std::convert::TryFrom;

    #[test]
    fn parses_header_synchronously() {
        let headers: Headers = smallvec![
            Header::new(
                Text::try_from("layer").unwrap(),
                Vec2(4_usize, 4_usize),
                smallvec![ChannelInfo::new(Text::try_from("Y").unwrap(), SampleType::F16, false)],
            )
        ];

        let mut bytes = Vec::new();
        MetaData::write_validating_to_buffered(&mut bytes, &headers, true).unwrap();

        use crate::io::Data;
        let offsets = vec![0_u64; headers[0].chunk_count];
        u64::write_slice(&mut bytes, &offsets).unwrap();

        let context = Context::new();
        let source = MemorySource::new(bytes);

        let decoder = Decoder::parse_header(context, source, true).unwrap()
            .into_done().expect("synchronous source must not suspend header parsing");

        assert_eq!(decoder.headers().len(), 1);
        assert_eq!(decoder.offset_tables()[0].len(), decoder.headers()[0].chunk_count);
    }
}

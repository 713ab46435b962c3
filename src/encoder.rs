//! Emits a complete OpenEXR byte stream: headers, an offset-table placeholder,
//! then chunks in file order, with the offset table backpatched once every chunk
//! has been written. Chunks may arrive out of order (as
//! [`crate::command::WriteRequest`]s are recorded and submitted by the caller in
//! whatever order is convenient); [`Encoder`] buffers early arrivals and releases
//! them once their file-order predecessor has actually been appended.
//!
//! Unlike [`crate::decoder::Decoder`], which reads through a [`DataSource`] that can
//! seek to any offset on demand, an encoder's output is append-only: a chunk's
//! compressed size is not known until after compression, so its file offset cannot
//! be reserved ahead of time. The encoder therefore drives [`DataSink::write_at`]
//! directly rather than assuming a `Write + Seek` destination.

use crate::block::chunk::{Block, Chunk, DeepScanLineBlock, DeepTileBlock, ScanLineBlock, TileBlock, TileCoordinates};
use crate::block::{BlockIndex, UncompressedBlock};
use crate::context::Context;
use crate::deep;
use crate::error::{Error, Result, UnitResult};
use crate::io::Data;
use crate::layout::{self, Layout, PixelType};
use crate::math::Vec2;
use crate::meta::header::Header;
use crate::meta::{Headers, MetaData, OffsetTables};
use crate::source::{DataSink, Outcome};
use half::f16;
use std::collections::BTreeMap;

/// Global, file-order position of one chunk: which header it belongs to and its
/// index within that header's own increasing-y chunk order.
#[derive(Debug, Clone, Copy)]
struct ChunkPosition {
    part_index: usize,
    index_in_header: usize,
}

/// Writes a complete OpenEXR stream to a [`DataSink`], one chunk at a time.
///
/// Lifecycle: [`Encoder::begin`] writes the magic number, version, every header,
/// and a zeroed offset-table placeholder. Chunks are then fed in through
/// [`crate::command::submit_write`] (which calls [`Encoder::write_tile`]/
/// [`Encoder::write_scanlines`]/[`Encoder::write_deep_scanlines`]/
/// [`Encoder::write_deep_tiles`] per request). [`Encoder::finalize`] fails with
/// [`Error::InvalidState`] if any chunk was never written, otherwise backpatches
/// the offset table and flushes the sink.
#[derive(Debug)]
pub struct Encoder<S> {
    context: Context,
    sink: S,
    headers: Headers,
    offset_tables: OffsetTables,

    /// `(part_index, index_in_header) -> global file-order index`, used to decide
    /// when a just-compressed chunk is actually next up to be appended. Global
    /// order is every chunk of header 0 (in that header's increasing-y order), then
    /// every chunk of header 1, and so on.
    global_index_of: Vec<Vec<usize>>,

    pending: BTreeMap<usize, (ChunkPosition, Chunk)>,
    next_global_index: usize,
    total_chunk_count: usize,
    written_chunk_count: usize,
    cursor: u64,
}

impl<S: DataSink> Encoder<S> {

    /// Write the magic number, version+flags, every header, and a zeroed
    /// offset-table placeholder, then return an encoder ready to accept chunks.
    pub fn begin(context: Context, mut sink: S, headers: Headers, pedantic: bool) -> Result<Self> {
        let mut header_bytes = Vec::new();
        MetaData::write_validating_to_buffered(&mut header_bytes, headers.as_slice(), pedantic)?;

        sink.write_at(0, &header_bytes).and_then(require_ready)?;

        let offset_table_size: usize = headers.iter().map(|header| header.chunk_count).sum();
        let offset_table_start = header_bytes.len() as u64;
        let offset_table_bytes = vec![0_u8; offset_table_size * 8];

        sink.write_at(offset_table_start, &offset_table_bytes).and_then(require_ready)?;

        let mut global_index_of: Vec<Vec<usize>> = headers.iter()
            .map(|header| vec![usize::MAX; header.chunk_count])
            .collect();

        let mut global_index = 0_usize;
        for (part_index, header) in headers.iter().enumerate() {
            for index_in_header in 0 .. header.chunk_count {
                global_index_of[part_index][index_in_header] = global_index;
                global_index += 1;
            }
        }

        let offset_tables = headers.iter().map(|header| vec![0_u64; header.chunk_count]).collect();

        Ok(Self {
            context, sink, headers, offset_tables, global_index_of,
            pending: BTreeMap::new(),
            next_global_index: 0,
            total_chunk_count: offset_table_size,
            written_chunk_count: 0,
            cursor: offset_table_start + offset_table_bytes.len() as u64,
        })
    }

    /// The headers this encoder was started with.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Whether every chunk has been written and [`Encoder::finalize`] may be called.
    pub fn is_complete(&self) -> bool {
        self.written_chunk_count == self.total_chunk_count
    }

    fn find_block(&self, part_index: usize, location: TileCoordinates) -> Result<(usize, Vec2<usize>, Vec2<usize>)> {
        let header = self.headers.get(part_index).ok_or(Error::OutOfBounds)?;

        let (index_in_header, tile) = header.blocks_increasing_y_order().enumerate()
            .find(|(_, tile)| tile.location == location)
            .ok_or(Error::OutOfBounds)?;

        let bounds = header.get_absolute_block_indices(location)?;
        Ok((index_in_header, bounds.position.to_usize("block position")?, tile.size))
    }

    fn find_scanline_block(&self, part_index: usize, y_start: usize, num_lines: usize) -> Result<(usize, Vec2<usize>, Vec2<usize>)> {
        let header = self.headers.get(part_index).ok_or(Error::OutOfBounds)?;

        if header.blocks.has_tiles() {
            return Err(Error::InvalidArgument("write_scanlines used against a tiled part".into()));
        }

        let (index_in_header, tile) = header.blocks_increasing_y_order().enumerate()
            .find(|(_, tile)| {
                header.get_absolute_block_indices(tile.location)
                    .map(|bounds| bounds.position.y() as usize == y_start && bounds.size.height() == num_lines)
                    .unwrap_or(false)
            })
            .ok_or_else(|| Error::InvalidArgument(
                "scan lines do not exactly match one on-disk block; write one compression block's worth of lines at a time".into()
            ))?;

        let bounds = header.get_absolute_block_indices(tile.location)?;
        Ok((index_in_header, bounds.position.to_usize("block position")?, tile.size))
    }

    /// Compress and buffer one flat tile.
    pub fn write_tile(&mut self, part_index: usize, tile_index: Vec2<usize>, level: Vec2<usize>, pixel_type: PixelType, layout: Layout, input: &[u8]) -> UnitResult {
        let location = TileCoordinates { tile_index, level_index: level };
        let (index_in_header, pixel_position, pixel_size) = self.find_block(part_index, location)?;

        let header = self.headers.get(part_index).ok_or(Error::OutOfBounds)?;
        let data = layout::buffer_to_block(input, &header.channels, pixel_type, layout, pixel_size.width(), pixel_size.height())?;

        let block = UncompressedBlock {
            index: BlockIndex { layer: part_index, pixel_position, pixel_size, level },
            data,
        };

        let chunk = block.compress_to_chunk(&self.headers)?;
        self.accept_chunk(part_index, index_in_header, chunk)
    }

    /// Compress and buffer a contiguous run of scan lines that exactly matches one
    /// on-disk block (`num_lines` must equal the header's `scan_lines_per_block`,
    /// except possibly for the last block of a part, which may be shorter).
    pub fn write_scanlines(&mut self, part_index: usize, y_start: usize, num_lines: usize, pixel_type: PixelType, layout: Layout, input: &[u8]) -> UnitResult {
        let (index_in_header, pixel_position, pixel_size) = self.find_scanline_block(part_index, y_start, num_lines)?;

        let header = self.headers.get(part_index).ok_or(Error::OutOfBounds)?;
        let data = layout::buffer_to_block(input, &header.channels, pixel_type, layout, pixel_size.width(), pixel_size.height())?;

        let block = UncompressedBlock {
            index: BlockIndex { layer: part_index, pixel_position, pixel_size, level: Vec2(0, 0) },
            data,
        };

        let chunk = block.compress_to_chunk(&self.headers)?;
        self.accept_chunk(part_index, index_in_header, chunk)
    }

    /// Compress and buffer one or more deep scan lines, given explicit per-pixel
    /// sample counts and a sample-major payload buffer covering all of them.
    pub fn write_deep_scanlines(&mut self, part_index: usize, y_start: usize, num_lines: usize, sample_counts: &[u32], pixel_type: PixelType, input: &[u8]) -> UnitResult {
        let header = self.headers.get(part_index).ok_or(Error::OutOfBounds)?;
        if !header.deep {
            return Err(Error::InvalidArgument("write_deep_scanlines used against a non-deep part".into()));
        }

        let width = header.data_size.width();
        if sample_counts.len() != width * num_lines {
            return Err(Error::InvalidArgument("sample_counts length does not match width * num_lines".into()));
        }

        let scan_lines_per_block = header.compression.scan_lines_per_block();
        if num_lines != scan_lines_per_block {
            return Err(Error::InvalidArgument("deep scan line writes must cover exactly one on-disk block".into()));
        }

        let (index_in_header, pixel_position, _pixel_size) = self.find_scanline_block(part_index, y_start, num_lines)?;

        let channel_planar = deep_samples_to_channel_planar(input, sample_counts, header, pixel_type)?;
        let decompressed_sample_data_size = channel_planar.len();
        let compressed_sample_data = deep::compress_sample_data(&channel_planar)?;

        let packed_offsets = deep::DeepSampleInfo::to_packed_offset_table(sample_counts)?;
        let compressed_pixel_offset_table: Vec<i8> = packed_offsets.iter().map(|&byte| byte as i8).collect();

        let chunk = Chunk {
            layer_index: part_index,
            block: Block::DeepScanLine(DeepScanLineBlock {
                y_coordinate: crate::error::usize_to_i32(pixel_position.y()),
                decompressed_sample_data_size,
                compressed_pixel_offset_table,
                compressed_sample_data,
            }),
        };

        self.accept_chunk(part_index, index_in_header, chunk)
    }

    /// Compress and buffer one deep tile.
    pub fn write_deep_tiles(&mut self, part_index: usize, tile_index: Vec2<usize>, level: Vec2<usize>, sample_counts: &[u32], pixel_type: PixelType, input: &[u8]) -> UnitResult {
        let header = self.headers.get(part_index).ok_or(Error::OutOfBounds)?;
        if !header.deep {
            return Err(Error::InvalidArgument("write_deep_tiles used against a non-deep part".into()));
        }

        let location = TileCoordinates { tile_index, level_index: level };
        let (index_in_header, _pixel_position, pixel_size) = self.find_block(part_index, location)?;

        if sample_counts.len() != pixel_size.area() {
            return Err(Error::InvalidArgument("sample_counts length does not match tile area".into()));
        }

        let channel_planar = deep_samples_to_channel_planar(input, sample_counts, header, pixel_type)?;
        let decompressed_sample_data_size = channel_planar.len();
        let compressed_sample_data = deep::compress_sample_data(&channel_planar)?;

        let packed_offsets = deep::DeepSampleInfo::to_packed_offset_table(sample_counts)?;
        let compressed_pixel_offset_table: Vec<i8> = packed_offsets.iter().map(|&byte| byte as i8).collect();

        let chunk = Chunk {
            layer_index: part_index,
            block: Block::DeepTile(DeepTileBlock {
                coordinates: location,
                decompressed_sample_data_size,
                compressed_pixel_offset_table,
                compressed_sample_data,
            }),
        };

        self.accept_chunk(part_index, index_in_header, chunk)
    }

    /// Accept a freshly compressed chunk, writing it now if it is next up in file
    /// order, otherwise stashing it until its predecessor has been written.
    fn accept_chunk(&mut self, part_index: usize, index_in_header: usize, chunk: Chunk) -> UnitResult {
        let position = ChunkPosition { part_index, index_in_header };
        let global_index = self.global_index_of[part_index][index_in_header];

        if global_index == self.next_global_index {
            self.append_chunk(position, chunk)?;

            while let Some((position, chunk)) = self.pending.remove(&self.next_global_index) {
                self.append_chunk(position, chunk)?;
            }
        }
        else {
            self.pending.insert(global_index, (position, chunk));
        }

        Ok(())
    }

    fn append_chunk(&mut self, position: ChunkPosition, chunk: Chunk) -> UnitResult {
        let mut chunk_bytes = Vec::new();
        chunk.write(&mut chunk_bytes, self.headers.len())?;

        let offset = self.cursor;
        self.sink.write_at(offset, &chunk_bytes).and_then(require_ready)?;
        self.cursor += chunk_bytes.len() as u64;

        self.offset_tables[position.part_index][position.index_in_header] = offset;
        self.written_chunk_count += 1;
        self.next_global_index += 1;

        Ok(())
    }

    /// Backpatch the offset table, flush the sink, and return it to the caller.
    /// Fails with [`Error::InvalidState`] if any chunk has not been written yet.
    pub fn finalize(mut self) -> Result<S> {
        if !self.is_complete() {
            let error = Error::InvalidState(format!(
                "{} of {} chunks were never written", self.total_chunk_count - self.written_chunk_count, self.total_chunk_count
            ));

            self.context.record_error(&error, "finalize", None);
            return Err(error);
        }

        let mut offset = header_size_hint(&self.headers);

        for table in &self.offset_tables {
            let mut table_bytes = Vec::with_capacity(table.len() * 8);
            u64::write_slice(&mut table_bytes, table)?;
            self.sink.write_at(offset, &table_bytes).and_then(require_ready)?;
            offset += table_bytes.len() as u64;
        }

        self.sink.flush()?;
        Ok(self.sink)
    }
}

fn header_size_hint(headers: &Headers) -> u64 {
    // the offset table immediately follows the header stream, whose exact length we
    // do not track separately; recompute it the same way `begin` did.
    let mut bytes = Vec::new();
    MetaData::write_validating_to_buffered(&mut bytes, headers.as_slice(), false)
        .expect("headers were already validated in Encoder::begin");

    bytes.len() as u64
}

fn require_ready(outcome: Outcome<()>) -> UnitResult {
    match outcome {
        Outcome::Ready(()) => Ok(()),
        Outcome::WouldBlock => Err(Error::FetchFailed(
            "data sink reported would-block; encoder output requires a synchronous sink".into()
        )),
    }
}

/// The inverse of `command::deep_samples_to_buffer`: convert a sample-major buffer
/// of `pixel_type` values (one group of `num_channels` values per sample) into the
/// channel-planar byte layout deep chunks store on disk.
fn deep_samples_to_channel_planar(input: &[u8], sample_counts: &[u32], header: &Header, pixel_type: PixelType) -> Result<Vec<u8>> {
    let num_channels = header.channels.list.len();
    let total_samples: usize = sample_counts.iter().map(|&count| count as usize).sum();
    let bytes_per_in_sample = pixel_type.bytes_per_sample();

    let required = total_samples * num_channels * bytes_per_in_sample;
    if input.len() < required {
        return Err(Error::BufferTooSmall { required, available: input.len() });
    }

    let mut output = Vec::with_capacity(total_samples * header.channels.bytes_per_pixel);

    for (channel_rank, channel) in header.channels.list.iter().enumerate() {
        for sample_index in 0 .. total_samples {
            let src_index = sample_index * num_channels + channel_rank;
            let src = &input[src_index * bytes_per_in_sample .. (src_index + 1) * bytes_per_in_sample];

            let value = match pixel_type {
                PixelType::Uint => u32::from_le_bytes(src.try_into().unwrap()) as f32,
                PixelType::Half => f16::from_le_bytes(src.try_into().unwrap()).to_f32(),
                PixelType::Float => f32::from_le_bytes(src.try_into().unwrap()),
            };

            match channel.sample_type {
                crate::meta::attribute::SampleType::U32 => output.extend_from_slice(&(value.max(0.0) as u32).to_le_bytes()),
                crate::meta::attribute::SampleType::F16 => output.extend_from_slice(&f16::from_f32(value).to_le_bytes()),
                crate::meta::attribute::SampleType::F32 => output.extend_from_slice(&value.to_le_bytes()),
            }
        }
    }

    Ok(output)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::command::{submit_write, CommandBuffer, WriteRequest};
    use crate::decoder::{Decoder, ParseOutcome};
    use crate::meta::attribute::{ChannelInfo, SampleType, Text};
    use crate::meta::Header;
    use crate::source::MemorySink;
    use smallvec::smallvec;
    use std::convert::TryFrom;

    #[test]
    fn accepts_out_of_order_scanline_writes_via_command_buffer() {
        let headers: Headers = smallvec![
            Header::new(
                Text::try_from("layer").unwrap(),
                Vec2(4_usize, 2_usize),
                smallvec![ChannelInfo::new(Text::try_from("Y").unwrap(), SampleType::F32, false)],
            )
        ];

        let context = Context::new();
        let sink = MemorySink::new();
        let mut encoder = Encoder::begin(context, sink, headers, true).unwrap();

        let row0: Vec<u8> = (0 .. 4_u32).flat_map(|x| (x as f32).to_le_bytes()).collect();
        let row1: Vec<u8> = (0 .. 4_u32).flat_map(|x| (x as f32 + 10.0).to_le_bytes()).collect();

        let mut buffer = CommandBuffer::new();
        buffer.begin().unwrap();
        buffer.record_write(WriteRequest::Scanlines {
            part_index: 0, y_start: 1, num_lines: 1,
            pixel_type: PixelType::Float, layout: Layout::Interleaved, input: &row1,
        }).unwrap();
        buffer.record_write(WriteRequest::Scanlines {
            part_index: 0, y_start: 0, num_lines: 1,
            pixel_type: PixelType::Float, layout: Layout::Interleaved, input: &row0,
        }).unwrap();
        buffer.end().unwrap();

        submit_write(&mut encoder, &[buffer], None).unwrap();
        assert!(encoder.is_complete());
        encoder.finalize().unwrap();
    }

    #[test]
    fn round_trips_through_a_fresh_decoder() {
        let headers: Headers = smallvec![
            Header::new(
                Text::try_from("layer").unwrap(),
                Vec2(4_usize, 2_usize),
                smallvec![ChannelInfo::new(Text::try_from("Y").unwrap(), SampleType::F32, false)],
            )
        ];

        let context = Context::new();
        let sink = MemorySink::new();
        let mut encoder = Encoder::begin(context, sink, headers, true).unwrap();

        let row0: Vec<u8> = (0 .. 4_u32).flat_map(|x| (x as f32).to_le_bytes()).collect();
        let row1: Vec<u8> = (0 .. 4_u32).flat_map(|x| (x as f32 + 10.0).to_le_bytes()).collect();

        encoder.write_scanlines(0, 0, 1, PixelType::Float, Layout::Interleaved, &row0).unwrap();
        encoder.write_scanlines(0, 1, 1, PixelType::Float, Layout::Interleaved, &row1).unwrap();

        assert!(encoder.is_complete());
        let bytes = encoder.finalize().unwrap().into_bytes();

        let context = Context::new();
        let source = crate::source::MemorySource::new(bytes);
        let mut decoder = Decoder::parse_header(context, source, true).unwrap()
            .into_done().expect("unexpected suspend");

        let mut output = vec![0_u8; 4 * 2 * 4];
        let mut buffer = CommandBuffer::new();
        buffer.begin().unwrap();
        buffer.record_read(crate::command::ReadRequest::FullImage {
            part_index: 0, target_level: Vec2(0, 0),
            channel_mask: layout::ChannelMask::All,
            pixel_type: PixelType::Float, layout: Layout::Interleaved,
            output: &mut output,
        }).unwrap();
        buffer.end().unwrap();

        crate::command::submit(&mut decoder, &[buffer], None).unwrap();

        for x in 0 .. 4 {
            let top = f32::from_le_bytes(output[x * 4 .. x * 4 + 4].try_into().unwrap());
            assert_eq!(top, x as f32);

            let bottom_index = (1 * 4 + x) * 4;
            let bottom = f32::from_le_bytes(output[bottom_index .. bottom_index + 4].try_into().unwrap());
            assert_eq!(bottom, x as f32 + 10.0);
        }
    }
}

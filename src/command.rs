//! The command buffer and submit engine: callers record read and write requests into
//! a [`CommandBuffer`], then hand a batch of them to [`submit`] (against a
//! [`Decoder`]) or [`submit_write`] (against an [`crate::encoder::Encoder`]). This is
//! the one place caller-requested layout and pixel-type conversion (see
//! [`crate::layout`]) meets per-chunk compression (see [`crate::compression`] and
//! [`crate::deep`]).
//!
//! Requests are a discriminated union rather than a dispatch table, matching how the
//! design notes ask for C's tagged-array-of-commands to be modeled: a sum type, with
//! `submit` dispatching on it via `match`.

use crate::block::chunk::TileCoordinates;
use crate::decoder::{Decoder, ParseOutcome};
use crate::deep::{self, DeepSampleInfo};
use crate::encoder::Encoder;
use crate::error::{Error, Result, UnitResult};
use crate::layout::{self, ChannelMask, Layout, PixelType};
use crate::math::Vec2;
use crate::meta::header::Header;
use crate::source::{DataSink, DataSource};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A read request: which part, which pixels, and where caller-owned output buffers
/// (and, for deep variants, the sample-count table the caller is responsible for
/// having already fetched) should receive the decoded result.
#[derive(Debug)]
pub enum ReadRequest<'buf> {
    /// Decode one tile (or the tile-shaped remainder at the right/bottom edge of a
    /// level) into `output`.
    Tile {
        /// Which part (layer) to read from.
        part_index: usize,
        /// Tile column and row, in units of the header's nominal tile size.
        tile_index: Vec2<usize>,
        /// Mipmap/ripmap level this tile belongs to.
        level: Vec2<usize>,
        /// Which channels to emit, and in what order.
        channel_mask: ChannelMask,
        /// Pixel type every channel is converted to.
        pixel_type: PixelType,
        /// Planar or interleaved output arrangement.
        layout: Layout,
        /// Caller-owned destination buffer.
        output: &'buf mut [u8],
    },

    /// Decode several tiles, each into its own output buffer. Equivalent to
    /// recording one [`ReadRequest::Tile`] per entry, batched so the engine can elect
    /// to parallelize the independent decompressions.
    Tiles {
        /// Which part (layer) to read from.
        part_index: usize,
        /// One entry per requested tile.
        tiles: Vec<TileRequest<'buf>>,
    },

    /// Decode a contiguous run of scan lines into `output`, which is laid out as
    /// `num_lines` rows of `width` pixels (the part's data window width) each.
    Scanlines {
        /// Which part (layer) to read from.
        part_index: usize,
        /// First scan line, in data-window-relative pixel coordinates.
        y_start: usize,
        /// Number of scan lines to decode, starting at `y_start`.
        num_lines: usize,
        /// Which channels to emit, and in what order.
        channel_mask: ChannelMask,
        /// Pixel type every channel is converted to.
        pixel_type: PixelType,
        /// Planar or interleaved output arrangement.
        layout: Layout,
        /// Caller-owned destination buffer.
        output: &'buf mut [u8],
    },

    /// Decode every scan line or every tile of `target_level` into `output`, which is
    /// laid out as the part's full data-window rectangle.
    FullImage {
        /// Which part (layer) to read from.
        part_index: usize,
        /// Which mipmap/ripmap level to read (origin-level images: `Vec2(0, 0)`).
        target_level: Vec2<usize>,
        /// Which channels to emit, and in what order.
        channel_mask: ChannelMask,
        /// Pixel type every channel is converted to.
        pixel_type: PixelType,
        /// Planar or interleaved output arrangement.
        layout: Layout,
        /// Caller-owned destination buffer.
        output: &'buf mut [u8],
    },

    /// Decode one or more deep scan lines. The caller must already have obtained
    /// `sample_info` (one entry per line) via
    /// [`crate::decoder::Decoder::fetch_raw_chunk`] + [`deep::get_deep_sample_counts`],
    /// since the sample-major output buffer's required size depends on it.
    DeepScanlines {
        /// Which part (layer) to read from.
        part_index: usize,
        /// First scan line, in data-window-relative pixel coordinates.
        y_start: usize,
        /// Per-line sample bookkeeping, already fetched by the caller.
        sample_info: Vec<DeepSampleInfo>,
        /// Pixel type every channel is converted to.
        pixel_type: PixelType,
        /// Caller-owned destination buffer, sample-major (`total_samples * num_channels`
        /// values per line, concatenated across lines).
        output: &'buf mut [u8],
    },

    /// Decode one deep tile. See [`ReadRequest::DeepScanlines`] for the sample-info
    /// precondition.
    DeepTiles {
        /// Which part (layer) to read from.
        part_index: usize,
        /// Tile column and row, in units of the header's nominal tile size.
        tile_index: Vec2<usize>,
        /// Mipmap/ripmap level this tile belongs to.
        level: Vec2<usize>,
        /// Sample bookkeeping for this tile, already fetched by the caller.
        sample_info: DeepSampleInfo,
        /// Pixel type every channel is converted to.
        pixel_type: PixelType,
        /// Caller-owned destination buffer, sample-major.
        output: &'buf mut [u8],
    },
}

/// One entry of a [`ReadRequest::Tiles`] batch.
#[derive(Debug)]
pub struct TileRequest<'buf> {
    /// Tile column and row, in units of the header's nominal tile size.
    pub tile_index: Vec2<usize>,
    /// Mipmap/ripmap level this tile belongs to.
    pub level: Vec2<usize>,
    /// Which channels to emit, and in what order.
    pub channel_mask: ChannelMask,
    /// Pixel type every channel is converted to.
    pub pixel_type: PixelType,
    /// Planar or interleaved output arrangement.
    pub layout: Layout,
    /// Caller-owned destination buffer.
    pub output: &'buf mut [u8],
}

/// A write request: which part, which pixels, and the caller-owned input buffer
/// that already holds converted samples in a caller-chosen layout and pixel type.
/// Executed by [`crate::encoder::WriteImage`] via [`submit_write`].
#[derive(Debug)]
pub enum WriteRequest<'buf> {
    /// Compress and buffer one tile for later emission.
    Tile {
        /// Which part (layer) to write to.
        part_index: usize,
        /// Tile column and row, in units of the header's nominal tile size.
        tile_index: Vec2<usize>,
        /// Mipmap/ripmap level this tile belongs to.
        level: Vec2<usize>,
        /// Pixel type the input buffer is supplied in.
        pixel_type: PixelType,
        /// Planar or interleaved input arrangement.
        layout: Layout,
        /// Caller-owned, already-filled source buffer.
        input: &'buf [u8],
    },

    /// Compress and buffer several tiles, each from its own input buffer.
    Tiles {
        /// Which part (layer) to write to.
        part_index: usize,
        /// One entry per tile being written.
        tiles: Vec<WriteTileRequest<'buf>>,
    },

    /// Compress and buffer a contiguous run of scan lines.
    Scanlines {
        /// Which part (layer) to write to.
        part_index: usize,
        /// First scan line, in data-window-relative pixel coordinates.
        y_start: usize,
        /// Number of scan lines the input buffer covers.
        num_lines: usize,
        /// Pixel type the input buffer is supplied in.
        pixel_type: PixelType,
        /// Planar or interleaved input arrangement.
        layout: Layout,
        /// Caller-owned, already-filled source buffer.
        input: &'buf [u8],
    },

    /// Compress and buffer one or more deep scan lines, given explicit per-pixel
    /// sample counts and a sample-major payload buffer.
    DeepScanlines {
        /// Which part (layer) to write to.
        part_index: usize,
        /// First scan line, in data-window-relative pixel coordinates.
        y_start: usize,
        /// Number of scan lines the sample counts and payload cover.
        num_lines: usize,
        /// Per-pixel sample counts, row-major across all `num_lines` lines.
        sample_counts: Vec<u32>,
        /// Pixel type the input buffer is supplied in.
        pixel_type: PixelType,
        /// Caller-owned, already-filled sample-major source buffer.
        input: &'buf [u8],
    },

    /// Compress and buffer one deep tile.
    DeepTiles {
        /// Which part (layer) to write to.
        part_index: usize,
        /// Tile column and row, in units of the header's nominal tile size.
        tile_index: Vec2<usize>,
        /// Mipmap/ripmap level this tile belongs to.
        level: Vec2<usize>,
        /// Per-pixel sample counts, row-major across the tile.
        sample_counts: Vec<u32>,
        /// Pixel type the input buffer is supplied in.
        pixel_type: PixelType,
        /// Caller-owned, already-filled sample-major source buffer.
        input: &'buf [u8],
    },
}

/// One entry of a [`WriteRequest::Tiles`] batch.
#[derive(Debug)]
pub struct WriteTileRequest<'buf> {
    /// Tile column and row, in units of the header's nominal tile size.
    pub tile_index: Vec2<usize>,
    /// Mipmap/ripmap level this tile belongs to.
    pub level: Vec2<usize>,
    /// Pixel type the input buffer is supplied in.
    pub pixel_type: PixelType,
    /// Planar or interleaved input arrangement.
    pub layout: Layout,
    /// Caller-owned, already-filled source buffer.
    pub input: &'buf [u8],
}

/// Either side of one recorded command: a [`ReadRequest`] or a [`WriteRequest`].
/// [`submit`] only accepts buffers whose every entry is `Read`; [`submit_write`]
/// only accepts buffers whose every entry is `Write`, per the lifecycle each engine
/// understands.
#[derive(Debug)]
pub enum Request<'buf> {
    /// A decode request, executed by [`submit`].
    Read(ReadRequest<'buf>),
    /// An encode request, executed by [`submit_write`].
    Write(WriteRequest<'buf>),
}

/// The recording/submission lifecycle state of a [`CommandBuffer`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum LifecycleState {
    Reset,
    Recording,
    Recorded,
}

/// An ordered list of requests, recorded by the caller and then handed to [`submit`]
/// or [`submit_write`] in a batch.
///
/// Lifecycle: `begin` (fails if already recording) \u{2192} zero or more `record_*`
/// calls (fail if not recording) \u{2192} `end` (fails if not recording). `reset`
/// clears every recorded command and returns to not-recording from any state.
#[derive(Debug)]
pub struct CommandBuffer<'buf> {
    state: LifecycleState,
    requests: Vec<Request<'buf>>,
}

impl<'buf> CommandBuffer<'buf> {
    /// A fresh, empty, not-recording command buffer.
    pub fn new() -> Self {
        Self { state: LifecycleState::Reset, requests: Vec::new() }
    }

    /// Start recording. Fails with [`Error::InvalidState`] if already recording.
    pub fn begin(&mut self) -> UnitResult {
        if self.state == LifecycleState::Recording {
            return Err(Error::InvalidState("command buffer is already recording".into()));
        }

        self.requests.clear();
        self.state = LifecycleState::Recording;
        Ok(())
    }

    /// Stop recording, making the buffer eligible for [`submit`]/[`submit_write`].
    /// Fails with [`Error::InvalidState`] if not currently recording.
    pub fn end(&mut self) -> UnitResult {
        if self.state != LifecycleState::Recording {
            return Err(Error::InvalidState("command buffer is not recording".into()));
        }

        self.state = LifecycleState::Recorded;
        Ok(())
    }

    /// Clear every recorded command and return to the not-recording state,
    /// regardless of the current state.
    pub fn reset(&mut self) {
        self.requests.clear();
        self.state = LifecycleState::Reset;
    }

    /// Record one request. Fails with [`Error::InvalidState`] unless currently
    /// recording (between `begin` and `end`).
    pub fn record(&mut self, request: Request<'buf>) -> UnitResult {
        if self.state != LifecycleState::Recording {
            return Err(Error::InvalidState("command buffer is not recording: call begin() first".into()));
        }

        self.requests.push(request);
        Ok(())
    }

    /// Record a read request. Shorthand for `record(Request::Read(request))`.
    pub fn record_read(&mut self, request: ReadRequest<'buf>) -> UnitResult {
        self.record(Request::Read(request))
    }

    /// Record a write request. Shorthand for `record(Request::Write(request))`.
    pub fn record_write(&mut self, request: WriteRequest<'buf>) -> UnitResult {
        self.record(Request::Write(request))
    }

    /// Whether `end` has been called since the last `begin`/`reset`: the buffer is
    /// ready to be handed to [`submit`] or [`submit_write`].
    pub fn is_recorded(&self) -> bool {
        self.state == LifecycleState::Recorded
    }

    fn requests(&self) -> &[Request<'buf>] {
        &self.requests
    }
}

impl<'buf> Default for CommandBuffer<'buf> {
    fn default() -> Self {
        Self::new()
    }
}

/// Signaled once the last request of a submit has completed successfully; left
/// unsignaled if any request failed. Mirrors the external interface's
/// `fence_create/destroy/wait/get_status/reset`; since this crate's `submit` runs to
/// completion synchronously before returning, `wait` never actually blocks, but the
/// type still models the handle an async integrator would poll.
#[derive(Debug, Default)]
pub struct Fence {
    signaled: Arc<AtomicBool>,
}

impl Fence {
    /// A fresh, unsignaled fence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the fence is signaled. Since every `submit` in this crate runs
    /// to completion before returning, this never actually waits; it is here for
    /// interface parity with an async executor that might signal the fence from
    /// another thread.
    pub fn wait(&self) {
        while !self.is_signaled() {
            std::hint::spin_loop();
        }
    }

    /// Whether the fence has been signaled by a completed `submit`.
    pub fn is_signaled(&self) -> bool {
        self.signaled.load(Ordering::Acquire)
    }

    /// Reset the fence to unsignaled, for reuse across another submit.
    pub fn reset(&self) {
        self.signaled.store(false, Ordering::Release);
    }

    fn signal(&self) {
        self.signaled.store(true, Ordering::Release);
    }
}

/// Find every chunk of `header` whose absolute pixel rectangle overlaps `region`,
/// at `target_level`, returning `(chunk_index_in_offset_table, tile_coordinates)`
/// pairs in the header's on-disk (increasing-y) chunk order.
fn overlapping_chunks(header: &Header, region_origin: Vec2<usize>, region_size: Vec2<usize>, target_level: Vec2<usize>) -> Vec<(usize, TileCoordinates)> {
    let region_end = Vec2(region_origin.x() + region_size.width(), region_origin.y() + region_size.height());

    header.blocks_increasing_y_order().enumerate()
        .filter(|(_, tile)| tile.location.level_index == target_level)
        .filter_map(|(index, tile)| {
            let bounds = header.get_absolute_block_indices(tile.location).ok()?;
            let start = bounds.position.to_usize("block position").ok()?;
            let end = Vec2(start.x() + bounds.size.width(), start.y() + bounds.size.height());

            let overlaps = start.x() < region_end.x() && end.x() > region_origin.x()
                && start.y() < region_end.y() && end.y() > region_origin.y();

            if overlaps { Some((index, tile.location)) } else { None }
        })
        .collect()
}

/// Execute every read request of every command buffer in `buffers`, in order,
/// against `decoder`. The first failing request aborts the submit: subsequent
/// requests (in the same buffer and in later buffers) are skipped, and `fence` (if
/// given) is left unsignaled. On success, `fence` is signaled.
///
/// Every [`Request`] in every buffer must be a [`Request::Read`]; a [`Request::Write`]
/// fails the whole submit with [`Error::InvalidArgument`], since a decoder has no
/// chunk writer to execute it against.
pub fn submit<S: DataSource>(decoder: &mut Decoder<S>, buffers: &[CommandBuffer<'_>], fence: Option<&Fence>) -> UnitResult {
    for buffer in buffers {
        if !buffer.is_recorded() {
            return Err(Error::InvalidState("cannot submit a command buffer that has not been end()-ed".into()));
        }
    }

    let result = (|| -> UnitResult {
        for buffer in buffers {
            for request in buffer.requests() {
                match request {
                    Request::Read(read) => execute_read(decoder, read)?,
                    Request::Write(_) => return Err(Error::InvalidArgument(
                        "submit() only accepts read requests; use submit_write() for write requests".into()
                    )),
                }
            }
        }

        Ok(())
    })();

    if result.is_ok() {
        if let Some(fence) = fence { fence.signal(); }
    }

    result
}

fn execute_read<S: DataSource>(decoder: &mut Decoder<S>, request: &ReadRequest<'_>) -> UnitResult {
    match request {
        ReadRequest::Tile { part_index, tile_index, level, channel_mask, pixel_type, layout, output } => {
            execute_tile_read(decoder, *part_index, *tile_index, *level, channel_mask, *pixel_type, *layout, output)
        },

        ReadRequest::Tiles { part_index, tiles } => {
            // independent tiles: decompression of each could be parallelized, but the
            // borrow checker already enforces the "non-overlapping writes" contract,
            // so a straightforward sequential loop is both correct and simple.
            for tile in tiles {
                execute_tile_read(
                    decoder, *part_index, tile.tile_index, tile.level,
                    &tile.channel_mask, tile.pixel_type, tile.layout, tile.output,
                )?;
            }

            Ok(())
        },

        ReadRequest::Scanlines { part_index, y_start, num_lines, channel_mask, pixel_type, layout, output } => {
            execute_scanline_read(decoder, *part_index, *y_start, *num_lines, channel_mask, *pixel_type, *layout, output)
        },

        ReadRequest::FullImage { part_index, target_level, channel_mask, pixel_type, layout, output } => {
            let header = decoder.header(*part_index)?.clone();
            let region_size = header.data_size;

            execute_region_read(decoder, *part_index, &header, Vec2(0, 0), region_size, *target_level, channel_mask, *pixel_type, *layout, output)
        },

        ReadRequest::DeepScanlines { part_index, y_start, sample_info, pixel_type, output } => {
            execute_deep_scanline_read(decoder, *part_index, *y_start, sample_info, *pixel_type, output)
        },

        ReadRequest::DeepTiles { part_index, tile_index, level, sample_info, pixel_type, output } => {
            execute_deep_tile_read(decoder, *part_index, *tile_index, *level, sample_info, *pixel_type, output)
        },
    }
}

#[allow(clippy::too_many_arguments)]
fn execute_tile_read<S: DataSource>(
    decoder: &mut Decoder<S>, part_index: usize, tile_index: Vec2<usize>, level: Vec2<usize>,
    channel_mask: &ChannelMask, pixel_type: PixelType, layout: Layout, output: &mut [u8],
) -> UnitResult {
    let header = decoder.header(part_index)?.clone();

    let coordinates = TileCoordinates { tile_index, level_index: level };
    let bounds = header.get_absolute_block_indices(coordinates)?;
    let region_origin = bounds.position.to_usize("tile position")?;

    execute_region_read(decoder, part_index, &header, region_origin, bounds.size, level, channel_mask, pixel_type, layout, output)
}

#[allow(clippy::too_many_arguments)]
fn execute_scanline_read<S: DataSource>(
    decoder: &mut Decoder<S>, part_index: usize, y_start: usize, num_lines: usize,
    channel_mask: &ChannelMask, pixel_type: PixelType, layout: Layout, output: &mut [u8],
) -> UnitResult {
    let header = decoder.header(part_index)?.clone();

    if header.blocks.has_tiles() {
        return Err(Error::InvalidArgument("record_scanlines used against a tiled part".into()));
    }

    let region_origin = Vec2(0_usize, y_start);
    let region_size = Vec2(header.data_size.width(), num_lines);

    execute_region_read(decoder, part_index, &header, region_origin, region_size, Vec2(0, 0), channel_mask, pixel_type, layout, output)
}

#[allow(clippy::too_many_arguments)]
fn execute_region_read<S: DataSource>(
    decoder: &mut Decoder<S>, part_index: usize, header: &Header,
    region_origin: Vec2<usize>, region_size: Vec2<usize>, target_level: Vec2<usize>,
    channel_mask: &ChannelMask, pixel_type: PixelType, layout: Layout, output: &mut [u8],
) -> UnitResult {
    let selected_channels = match channel_mask {
        ChannelMask::All => header.channels.list.len(),
        ChannelMask::Only(indices) => indices.len(),
    };

    let required = layout::required_output_bytes(region_size.height(), region_size.width(), selected_channels, pixel_type);
    if output.len() < required {
        return Err(Error::BufferTooSmall { required, available: output.len() });
    }

    let offsets = decoder.offset_tables().get(part_index).ok_or(Error::OutOfBounds)?.clone();
    let chunks = overlapping_chunks(header, region_origin, region_size, target_level);

    for (chunk_index, _tile) in chunks {
        let file_offset = *offsets.get(chunk_index).ok_or(Error::OutOfBounds)?;

        let block = match decoder.fetch_chunk(file_offset, true)? {
            ParseOutcome::Done(block) => block,
            ParseOutcome::WouldBlock(_) => return Err(Error::Cancelled),
        };

        layout::block_to_region(&block, &header.channels, channel_mask, pixel_type, layout, region_size.width(), region_origin, output)?;
    }

    Ok(())
}

fn execute_deep_scanline_read<S: DataSource>(
    decoder: &mut Decoder<S>, part_index: usize, y_start: usize,
    sample_info: &[DeepSampleInfo], pixel_type: PixelType, output: &mut [u8],
) -> UnitResult {
    let header = decoder.header(part_index)?.clone();

    if !header.deep {
        return Err(Error::InvalidArgument("record_deep_scanlines used against a non-deep part".into()));
    }

    let total_samples: usize = sample_info.iter().map(|info| info.total_samples as usize).sum();
    let num_channels = header.channels.list.len();
    let required = total_samples * num_channels * pixel_type.bytes_per_sample();

    if output.len() < required {
        return Err(Error::BufferTooSmall { required, available: output.len() });
    }

    let offsets = decoder.offset_tables().get(part_index).ok_or(Error::OutOfBounds)?.clone();
    let mut output_offset = 0_usize;

    for (line_offset, info) in sample_info.iter().enumerate() {
        let y = y_start + line_offset;

        let block_index = header.blocks_increasing_y_order().enumerate()
            .find(|(_, tile)| header.get_absolute_block_indices(tile.location)
                .map(|bounds| bounds.position.y() as usize == y).unwrap_or(false))
            .map(|(index, _)| index)
            .ok_or(Error::OutOfBounds)?;

        let file_offset = *offsets.get(block_index).ok_or(Error::OutOfBounds)?;

        let chunk = match decoder.fetch_raw_chunk(file_offset)? {
            ParseOutcome::Done(chunk) => chunk,
            ParseOutcome::WouldBlock(_) => return Err(Error::Cancelled),
        };

        let (compressed, decompressed_size) = deep::raw_sample_data(&chunk)?;
        let samples = deep::decompress_sample_data(compressed, decompressed_size)?;

        let written = deep_samples_to_buffer(&samples, info, &header, pixel_type, &mut output[output_offset ..])?;
        output_offset += written;
    }

    Ok(())
}

fn execute_deep_tile_read<S: DataSource>(
    decoder: &mut Decoder<S>, part_index: usize, tile_index: Vec2<usize>, level: Vec2<usize>,
    sample_info: &DeepSampleInfo, pixel_type: PixelType, output: &mut [u8],
) -> UnitResult {
    let header = decoder.header(part_index)?.clone();

    if !header.deep {
        return Err(Error::InvalidArgument("record_deep_tiles used against a non-deep part".into()));
    }

    let required = sample_info.total_samples as usize * header.channels.list.len() * pixel_type.bytes_per_sample();
    if output.len() < required {
        return Err(Error::BufferTooSmall { required, available: output.len() });
    }

    let coordinates = TileCoordinates { tile_index, level_index: level };

    let (chunk_index, _) = header.blocks_increasing_y_order().enumerate()
        .find(|(_, tile)| tile.location == coordinates)
        .ok_or(Error::OutOfBounds)?;

    let offsets = decoder.offset_tables().get(part_index).ok_or(Error::OutOfBounds)?.clone();
    let file_offset = *offsets.get(chunk_index).ok_or(Error::OutOfBounds)?;

    let chunk = match decoder.fetch_raw_chunk(file_offset)? {
        ParseOutcome::Done(chunk) => chunk,
        ParseOutcome::WouldBlock(_) => return Err(Error::Cancelled),
    };

    let (compressed, decompressed_size) = deep::raw_sample_data(&chunk)?;
    let samples = deep::decompress_sample_data(compressed, decompressed_size)?;

    deep_samples_to_buffer(&samples, sample_info, &header, pixel_type, output)?;
    Ok(())
}

/// Convert a channel-planar deep sample payload (as stored on disk: for each
/// channel, `total_samples` samples of that channel's own on-disk type, concatenated)
/// into a sample-major buffer of `pixel_type` values, channel-interleaved per sample.
/// Returns the number of bytes written.
fn deep_samples_to_buffer(samples: &[u8], info: &DeepSampleInfo, header: &Header, pixel_type: PixelType, output: &mut [u8]) -> Result<usize> {
    use half::f16;

    let total_samples = info.total_samples as usize;
    let num_channels = header.channels.list.len();
    let bytes_per_out_sample = pixel_type.bytes_per_sample();
    let required = total_samples * num_channels * bytes_per_out_sample;

    if output.len() < required {
        return Err(Error::BufferTooSmall { required, available: output.len() });
    }

    let mut channel_byte_offset = 0_usize;

    for (channel_rank, channel) in header.channels.list.iter().enumerate() {
        let sample_size = match channel.sample_type {
            crate::meta::attribute::SampleType::U32 => 4,
            crate::meta::attribute::SampleType::F16 => 2,
            crate::meta::attribute::SampleType::F32 => 4,
        };

        for sample_index in 0 .. total_samples {
            let src = &samples[channel_byte_offset .. channel_byte_offset + sample_size];
            let value = match channel.sample_type {
                crate::meta::attribute::SampleType::U32 => u32::from_le_bytes(src.try_into().unwrap()) as f32,
                crate::meta::attribute::SampleType::F16 => f16::from_le_bytes(src.try_into().unwrap()).to_f32(),
                crate::meta::attribute::SampleType::F32 => f32::from_le_bytes(src.try_into().unwrap()),
            };

            let dst_index = sample_index * num_channels + channel_rank;
            let dst = &mut output[dst_index * bytes_per_out_sample .. (dst_index + 1) * bytes_per_out_sample];

            match pixel_type {
                PixelType::Uint => dst.copy_from_slice(&(value.max(0.0) as u32).to_le_bytes()),
                PixelType::Half => dst.copy_from_slice(&f16::from_f32(value).to_le_bytes()),
                PixelType::Float => dst.copy_from_slice(&value.to_le_bytes()),
            }

            channel_byte_offset += sample_size;
        }
    }

    Ok(required)
}

/// Execute every write request of every command buffer in `buffers`, in order,
/// against `encoder`. The first failing request aborts the submit, leaving `fence`
/// (if given) unsignaled; on success `fence` is signaled. Every [`Request`] in every
/// buffer must be a [`Request::Write`]; encountering a [`Request::Read`] fails the
/// whole submit with [`Error::InvalidArgument`].
pub fn submit_write<S: DataSink>(encoder: &mut Encoder<S>, buffers: &[CommandBuffer<'_>], fence: Option<&Fence>) -> UnitResult {
    for buffer in buffers {
        if !buffer.is_recorded() {
            return Err(Error::InvalidState("cannot submit a command buffer that has not been end()-ed".into()));
        }
    }

    let result = (|| -> UnitResult {
        for buffer in buffers {
            for request in buffer.requests() {
                match request {
                    Request::Write(write) => execute_write(encoder, write)?,
                    Request::Read(_) => return Err(Error::InvalidArgument(
                        "submit_write() only accepts write requests; use submit() for read requests".into()
                    )),
                }
            }
        }

        Ok(())
    })();

    if result.is_ok() {
        if let Some(fence) = fence { fence.signal(); }
    }

    result
}

fn execute_write<S: DataSink>(encoder: &mut Encoder<S>, request: &WriteRequest<'_>) -> UnitResult {
    match request {
        WriteRequest::Tile { part_index, tile_index, level, pixel_type, layout, input } => {
            encoder.write_tile(*part_index, *tile_index, *level, *pixel_type, *layout, input)
        },

        WriteRequest::Tiles { part_index, tiles } => {
            for tile in tiles {
                encoder.write_tile(*part_index, tile.tile_index, tile.level, tile.pixel_type, tile.layout, tile.input)?;
            }

            Ok(())
        },

        WriteRequest::Scanlines { part_index, y_start, num_lines, pixel_type, layout, input } => {
            encoder.write_scanlines(*part_index, *y_start, *num_lines, *pixel_type, *layout, input)
        },

        WriteRequest::DeepScanlines { part_index, y_start, num_lines, sample_counts, pixel_type, input } => {
            encoder.write_deep_scanlines(*part_index, *y_start, *num_lines, sample_counts, *pixel_type, input)
        },

        WriteRequest::DeepTiles { part_index, tile_index, level, sample_counts, pixel_type, input } => {
            encoder.write_deep_tiles(*part_index, *tile_index, *level, sample_counts, *pixel_type, input)
        },
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::context::Context;
    use crate::meta::attribute::{ChannelInfo, SampleType, Text};
    use crate::meta::Header;
    use crate::source::MemorySource;
    use smallvec::smallvec;
    use std::convert::TryFrom;

    fn tiny_scanline_exr() -> Vec<u8> {
        let headers = smallvec![
            Header::new(
                Text::try_from("layer").unwrap(),
                Vec2(4_usize, 4_usize),
                smallvec![ChannelInfo::new(Text::try_from("Y").unwrap(), SampleType::F32, false)],
            )
        ];

        let mut bytes = Vec::new();
        crate::meta::MetaData::write_validating_to_buffered(&mut bytes, &headers, true).unwrap();

        use crate::io::Data;
        let chunk_count = headers[0].chunk_count;
        let offset_table_start = bytes.len();
        let offsets = vec![0_u64; chunk_count];
        u64::write_slice(&mut bytes, &offsets).unwrap();

        let mut recorded_offsets = Vec::new();
        for y in 0 .. 4_i32 {
            recorded_offsets.push(bytes.len() as u64);
            y.to_le_bytes().iter().for_each(|&b| bytes.push(b));

            let pixels: Vec<u8> = (0 .. 4_u32).flat_map(|x| (x as f32).to_le_bytes()).collect();
            (pixels.len() as u32).to_le_bytes().iter().for_each(|&b| bytes.push(b));
            bytes.extend_from_slice(&pixels);
        }

        bytes[offset_table_start .. offset_table_start + chunk_count * 8]
            .copy_from_slice(&recorded_offsets.iter().flat_map(|o| o.to_le_bytes()).collect::<Vec<_>>());

        bytes
    }

    #[test]
    fn command_buffer_lifecycle_rejects_out_of_order_calls() {
        let mut buffer = CommandBuffer::new();
        assert!(buffer.end().is_err()); // not recording yet
        buffer.begin().unwrap();
        assert!(buffer.begin().is_err()); // already recording
        buffer.end().unwrap();
        assert!(buffer.end().is_err()); // no longer recording
        buffer.reset();
        assert!(!buffer.is_recorded());
    }

    #[test]
    fn full_image_read_round_trips_scanline_floats() {
        let bytes = tiny_scanline_exr();
        let context = Context::new();
        let source = MemorySource::new(bytes);

        let mut decoder = Decoder::parse_header(context, source, true).unwrap()
            .into_done().expect("unexpected suspend");

        let mut output = vec![0_u8; 4 * 4 * 4];
        let mut buffer = CommandBuffer::new();
        buffer.begin().unwrap();
        buffer.record_read(ReadRequest::FullImage {
            part_index: 0,
            target_level: Vec2(0, 0),
            channel_mask: ChannelMask::All,
            pixel_type: PixelType::Float,
            layout: Layout::Interleaved,
            output: &mut output,
        }).unwrap();
        buffer.end().unwrap();

        let fence = Fence::new();
        submit(&mut decoder, &[buffer], Some(&fence)).unwrap();
        assert!(fence.is_signaled());

        for y in 0 .. 4 {
            for x in 0 .. 4 {
                let value = f32::from_le_bytes(output[(y * 4 + x) * 4 .. (y * 4 + x) * 4 + 4].try_into().unwrap());
                assert_eq!(value, x as f32);
            }
        }
    }

    #[test]
    fn submit_rejects_too_small_output_buffer() {
        let bytes = tiny_scanline_exr();
        let context = Context::new();
        let source = MemorySource::new(bytes);

        let mut decoder = Decoder::parse_header(context, source, true).unwrap()
            .into_done().expect("unexpected suspend");

        let mut output = vec![0_u8; 2]; // far too small
        let mut buffer = CommandBuffer::new();
        buffer.begin().unwrap();
        buffer.record_read(ReadRequest::FullImage {
            part_index: 0,
            target_level: Vec2(0, 0),
            channel_mask: ChannelMask::All,
            pixel_type: PixelType::Float,
            layout: Layout::Interleaved,
            output: &mut output,
        }).unwrap();
        buffer.end().unwrap();

        let error = submit(&mut decoder, &[buffer], None).unwrap_err();
        assert!(matches!(error, Error::BufferTooSmall { .. }));
    }
}

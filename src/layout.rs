//! Converts between the on-disk channel-planar-per-scanline pixel layout and the
//! caller-requested layout and pixel type.
//!
//! A decompressed [`UncompressedBlock`] always holds its samples the way the file
//! format stores them: for each line, for each channel in sorted order, that
//! channel's samples for the line, contiguous. Callers instead want either
//! `PLANAR` (every channel's samples concatenated, one plane after another) or
//! `INTERLEAVED` (`RGBARGBA...`) buffers, in `UINT`, `HALF`, or `FLOAT` samples,
//! regardless of what the channel's on-disk sample type was. When the requested
//! pixel type matches the channel's on-disk sample type, samples are moved with a
//! raw byte copy; otherwise the conversion goes through `f32` as the common type,
//! which is where fidelity can be lost or gained (most notably `UINT` values above
//! `2^24`, which `f32` cannot represent exactly).

use crate::block::UncompressedBlock;
use crate::error::{Error, Result, UnitResult};
use crate::meta::attribute::{ChannelList, SampleType};
use half::f16;
use smallvec::SmallVec;

/// The pixel type a caller wants its output buffer filled with, independent of
/// whatever sample type the channel actually has on disk.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PixelType {
    /// 32-bit unsigned integer samples.
    Uint,

    /// 16-bit half-float samples.
    Half,

    /// 32-bit float samples.
    Float,
}

impl PixelType {
    /// Number of bytes one sample of this type occupies in an output buffer.
    pub fn bytes_per_sample(self) -> usize {
        match self {
            PixelType::Uint => 4,
            PixelType::Half => 2,
            PixelType::Float => 4,
        }
    }
}

/// How channel samples are arranged relative to each other in an output buffer.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Layout {
    /// Every channel's samples are stored in their own contiguous plane, planes in
    /// channel order: `RRRR...GGGG...BBBB...`.
    Planar,

    /// Samples for one pixel are stored contiguously, pixel by pixel, in channel
    /// order: `RGBARGBA...`.
    Interleaved,
}

/// Which channels of a block a read or write request should touch.
#[derive(Debug, Clone)]
pub enum ChannelMask {
    /// Every channel in the layer, in their stored (sorted) order.
    All,

    /// Only the channels at these indices into the layer's sorted channel list,
    /// in the order given (the order becomes the interleave order for `Layout::Interleaved`).
    Only(SmallVec<[usize; 8]>),
}

impl ChannelMask {
    fn resolve(&self, channels: &ChannelList) -> SmallVec<[usize; 8]> {
        match self {
            ChannelMask::All => (0 .. channels.list.len()).collect(),
            ChannelMask::Only(indices) => indices.clone(),
        }
    }
}

/// Number of bytes an output buffer must provide to receive `num_lines` rows of
/// `width` pixels across `num_channels` channels at `pixel_type`.
pub fn required_output_bytes(num_lines: usize, width: usize, num_channels: usize, pixel_type: PixelType) -> usize {
    num_lines * width * num_channels * pixel_type.bytes_per_sample()
}

#[inline]
fn sample_to_f32(sample_type: SampleType, bytes: &[u8]) -> f32 {
    match sample_type {
        SampleType::U32 => u32::from_le_bytes(bytes.try_into().unwrap()) as f32,
        SampleType::F16 => f16::from_le_bytes(bytes.try_into().unwrap()).to_f32(),
        SampleType::F32 => f32::from_le_bytes(bytes.try_into().unwrap()),
    }
}

#[inline]
fn f32_to_output(value: f32, pixel_type: PixelType, dst: &mut [u8]) {
    match pixel_type {
        PixelType::Uint => dst.copy_from_slice(&(value.max(0.0) as u32).to_le_bytes()),
        PixelType::Half => dst.copy_from_slice(&f16::from_f32(value).to_le_bytes()),
        PixelType::Float => dst.copy_from_slice(&value.to_le_bytes()),
    }
}

/// Whether `sample_type` and `pixel_type` are the same representation on the wire,
/// so a sample can be moved with a raw byte copy instead of detouring through `f32`.
/// Routing `UINT` through `f32` loses precision above `2^24`, so this hot path is
/// required for property-preserving round trips, not just an optimization.
#[inline]
fn is_identity(sample_type: SampleType, pixel_type: PixelType) -> bool {
    matches!(
        (sample_type, pixel_type),
        (SampleType::U32, PixelType::Uint) | (SampleType::F16, PixelType::Half) | (SampleType::F32, PixelType::Float)
    )
}

/// Convert a decompressed, channel-planar block into `output`, selecting channels
/// per `channel_mask`, converting every sample to `pixel_type`, and arranging the
/// result per `layout`.
///
/// Fails with [`Error::BufferTooSmall`] if `output` cannot hold the converted block.
pub fn block_to_buffer(
    block: &UncompressedBlock,
    channels: &ChannelList,
    channel_mask: &ChannelMask,
    pixel_type: PixelType,
    layout: Layout,
    output: &mut [u8],
) -> UnitResult {
    let width = block.index.pixel_size.width();
    let height = block.index.pixel_size.height();

    let required = required_output_bytes(height, width, channel_mask.resolve(channels).len(), pixel_type);
    if output.len() < required {
        return Err(Error::BufferTooSmall { required, available: output.len() });
    }

    block_to_region(block, channels, channel_mask, pixel_type, layout, width, block.index.pixel_position, output)
}

/// Like [`block_to_buffer`], but `output` represents a larger rectangle than the
/// block itself: `region_width` is the row stride (in samples) of the full output,
/// and `region_origin` is the pixel coordinate the first sample of `output`
/// corresponds to. Used to splice one chunk among several into a multi-chunk read
/// (a scanline range or a whole tiled image) without copying through a
/// block-sized intermediate buffer.
///
/// Samples of `block` that fall outside `[region_origin, region_origin + region
/// extent implied by output.len())` are silently skipped, since callers only ever
/// pass blocks that are known (by the chunk overlap computation) to intersect the
/// requested region; out-of-range writes would otherwise alias unrelated rows.
pub fn block_to_region(
    block: &UncompressedBlock,
    channels: &ChannelList,
    channel_mask: &ChannelMask,
    pixel_type: PixelType,
    layout: Layout,
    region_width: usize,
    region_origin: crate::math::Vec2<usize>,
    output: &mut [u8],
) -> UnitResult {
    let selected = channel_mask.resolve(channels);
    let bytes_per_sample = pixel_type.bytes_per_sample();
    let region_height = output.len() / region_width.max(1) / selected.len().max(1) / bytes_per_sample;

    for line in block.lines(channels) {
        let rank = match selected.iter().position(|&index| index == line.location.channel) {
            Some(rank) => rank,
            None => continue, // channel not requested
        };

        let channel = &channels.list[line.location.channel];
        let absolute_row = line.location.position.y();
        if absolute_row < region_origin.y() { continue }
        let row = absolute_row - region_origin.y();
        if row >= region_height { continue }

        let sample_size = channel.sample_type.bytes_per_sample();

        for x in 0 .. line.location.sample_count {
            let absolute_column = line.location.position.x() + x;
            if absolute_column < region_origin.x() { continue }
            let column = absolute_column - region_origin.x();
            if column >= region_width { continue }

            let sample_bytes = &line.value[x * sample_size .. (x + 1) * sample_size];

            let dest_sample_index = match layout {
                Layout::Planar => (rank * region_height + row) * region_width + column,
                Layout::Interleaved => (row * region_width + column) * selected.len() + rank,
            };

            let dest_range = dest_sample_index * bytes_per_sample .. (dest_sample_index + 1) * bytes_per_sample;

            if is_identity(channel.sample_type, pixel_type) {
                output[dest_range].copy_from_slice(sample_bytes);
            }
            else {
                let value = sample_to_f32(channel.sample_type, sample_bytes);
                f32_to_output(value, pixel_type, &mut output[dest_range]);
            }
        }
    }

    Ok(())
}

/// The inverse of [`block_to_buffer`]: read samples for every channel of `channels`
/// out of a caller-provided `input` buffer (in `pixel_type`, arranged per `layout`)
/// and write them into a fresh, channel-planar-per-scanline block ready for
/// compression. Unlike reading, writing always covers every channel a chunk stores —
/// there is no channel mask on the write side.
pub fn buffer_to_block(
    input: &[u8],
    channels: &ChannelList,
    pixel_type: PixelType,
    layout: Layout,
    width: usize,
    height: usize,
) -> Result<Vec<u8>> {
    let num_channels = channels.list.len();
    let bytes_per_sample = pixel_type.bytes_per_sample();

    let required = required_output_bytes(height, width, num_channels, pixel_type);
    if input.len() < required {
        return Err(Error::BufferTooSmall { required, available: input.len() });
    }

    let mut block_bytes = vec![0_u8; height * width * channels.bytes_per_pixel];
    let mut byte_offset = 0_usize;

    for y in 0 .. height {
        for (rank, channel) in channels.list.iter().enumerate() {
            let sample_size = channel.sample_type.bytes_per_sample();

            for x in 0 .. width {
                let src_sample_index = match layout {
                    Layout::Planar => (rank * height + y) * width + x,
                    Layout::Interleaved => (y * width + x) * num_channels + rank,
                };

                let src_range = src_sample_index * bytes_per_sample .. (src_sample_index + 1) * bytes_per_sample;
                let dst = &mut block_bytes[byte_offset .. byte_offset + sample_size];

                if is_identity(channel.sample_type, pixel_type) {
                    dst.copy_from_slice(&input[src_range]);
                }
                else {
                    let value = sample_to_f32_from_pixel_type(pixel_type, &input[src_range]);
                    match channel.sample_type {
                        SampleType::U32 => dst.copy_from_slice(&(value.max(0.0) as u32).to_le_bytes()),
                        SampleType::F16 => dst.copy_from_slice(&f16::from_f32(value).to_le_bytes()),
                        SampleType::F32 => dst.copy_from_slice(&value.to_le_bytes()),
                    }
                }

                byte_offset += sample_size;
            }
        }
    }

    Ok(block_bytes)
}

#[inline]
fn sample_to_f32_from_pixel_type(pixel_type: PixelType, bytes: &[u8]) -> f32 {
    match pixel_type {
        PixelType::Uint => u32::from_le_bytes(bytes.try_into().unwrap()) as f32,
        PixelType::Half => f16::from_le_bytes(bytes.try_into().unwrap()).to_f32(),
        PixelType::Float => f32::from_le_bytes(bytes.try_into().unwrap()),
    }
}

trait SampleTypeByteSize {
    fn bytes_per_sample(self) -> usize;
}

impl SampleTypeByteSize for SampleType {
    fn bytes_per_sample(self) -> usize {
        match self {
            SampleType::U32 => 4,
            SampleType::F16 => 2,
            SampleType::F32 => 4,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pixel_type_byte_sizes() {
        assert_eq!(PixelType::Uint.bytes_per_sample(), 4);
        assert_eq!(PixelType::Half.bytes_per_sample(), 2);
        assert_eq!(PixelType::Float.bytes_per_sample(), 4);
    }

    #[test]
    fn required_bytes_accounts_for_all_dimensions() {
        assert_eq!(required_output_bytes(4, 8, 3, PixelType::Float), 4 * 8 * 3 * 4);
    }

    #[test]
    fn identity_round_trip_preserves_uint_precision_above_2_24() {
        use crate::block::{BlockIndex, UncompressedBlock};
        use crate::meta::attribute::{ChannelInfo, Text};
        use crate::math::Vec2;
        use smallvec::smallvec;

        // 2^24 + 1 is the smallest u32 that an f32 cannot represent exactly,
        // so routing it through f32 would decode it back as 2^24.
        let value: u32 = 16_777_217;

        let channels = ChannelList::new(smallvec![
            ChannelInfo::new(Text::from("Y").unwrap(), SampleType::U32, false),
        ]);

        let block_index = BlockIndex {
            layer: 0,
            pixel_position: Vec2(0, 0),
            pixel_size: Vec2(1, 1),
            level: Vec2(0, 0),
        };

        let block = UncompressedBlock::from_lines(&channels, block_index, |line| {
            line.value.copy_from_slice(&value.to_le_bytes());
        });

        let mut output = vec![0_u8; required_output_bytes(1, 1, 1, PixelType::Uint)];
        block_to_buffer(&block, &channels, &ChannelMask::All, PixelType::Uint, Layout::Planar, &mut output).unwrap();
        assert_eq!(u32::from_le_bytes(output.try_into().unwrap()), value);

        let block_bytes = buffer_to_block(&output, &channels, PixelType::Uint, Layout::Planar, 1, 1).unwrap();
        assert_eq!(u32::from_le_bytes(block_bytes.try_into().unwrap()), value);
    }
}

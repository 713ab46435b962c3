//! Sample-count bookkeeping and sample-data (de)compression for deep scan line and
//! deep tile chunks.
//!
//! A deep chunk stores two compressed blobs in addition to its header: a per-pixel
//! offset table and the sample payload itself. Both go through the same pipeline as
//! [`crate::compression::zip`] — reorder, delta-predict, deflate — regardless of the
//! header's `compression` attribute, since PIZ, PXR24, and B44 are not defined for
//! deep data. This module exists because [`crate::block::UncompressedBlock::decompress_chunk`]
//! only understands flat (scan line / tile) blocks; [`crate::command::CommandBuffer`]
//! calls here directly for the deep request variants.

use crate::block::chunk::{Block, Chunk, DeepScanLineBlock, DeepTileBlock};
use crate::compression::zip;
use crate::error::{Error, Result};

/// Per-pixel sample-count bookkeeping for one deep scan line block or deep tile,
/// decoded from its packed pixel-offset table.
///
/// `cumulative_offsets` has one more entry than there are pixels: `cumulative_offsets[0]`
/// is always `0`, and `cumulative_offsets[i + 1] - cumulative_offsets[i] == sample_counts[i]`
/// for every pixel `i` in row-major order across the whole block (not reset at each row
/// boundary) — this matches how the reference encoder accumulates the table across a
/// multi-line deep scan line block, not just within one line of it.
#[derive(Debug, Clone)]
pub struct DeepSampleInfo {
    /// Width, in pixels, of the block this table describes.
    pub width: usize,

    /// Height, in pixels (scan lines), of the block this table describes.
    pub height: usize,

    /// Number of samples stored for each pixel, row-major.
    pub sample_counts: Vec<u32>,

    /// Running total of samples up to and including each pixel; one longer than
    /// `sample_counts`, with a leading `0`.
    pub cumulative_offsets: Vec<u32>,

    /// Total number of samples in the block: `cumulative_offsets[width * height]`.
    pub total_samples: u32,
}

impl DeepSampleInfo {
    /// Decode a block's pixel-offset table: inflate it with the same predictor and
    /// byte-reorder pass `compression::zip` uses, then read it as `width * height`
    /// little-endian `i32` cumulative counts.
    pub fn from_packed_offset_table(packed: &[i8], width: usize, height: usize) -> Result<Self> {
        let pixel_count = width.checked_mul(height).ok_or(Error::OutOfBounds)?;
        let expected_bytes = pixel_count.checked_mul(4).ok_or(Error::OutOfBounds)?;

        let packed_bytes: Vec<u8> = packed.iter().map(|&byte| byte as u8).collect();
        let decoded = zip::decompress_bytes(&packed_bytes, expected_bytes)?;

        if decoded.len() < expected_bytes {
            return Err(Error::invalid("deep pixel offset table too short"));
        }

        let mut cumulative_offsets = Vec::with_capacity(pixel_count + 1);
        cumulative_offsets.push(0_u32);

        let mut sample_counts = Vec::with_capacity(pixel_count);
        let mut previous = 0_i64;

        for pixel in 0 .. pixel_count {
            let bytes = &decoded[pixel * 4 .. pixel * 4 + 4];
            let running_total = i32::from_le_bytes(bytes.try_into().unwrap()) as i64;

            if running_total < previous {
                return Err(Error::invalid("deep pixel offset table is not monotonically increasing"));
            }

            sample_counts.push((running_total - previous) as u32);
            cumulative_offsets.push(running_total as u32);
            previous = running_total;
        }

        let total_samples = *cumulative_offsets.last().unwrap();
        Ok(Self { width, height, sample_counts, cumulative_offsets, total_samples })
    }

    /// Build the packed, compressed pixel-offset table this block would be written
    /// with, from per-pixel sample counts (row-major, `width * height` long).
    pub fn to_packed_offset_table(sample_counts: &[u32]) -> Result<Vec<u8>> {
        let mut running_total: i64 = 0;
        let mut table_bytes = Vec::with_capacity(sample_counts.len() * 4);

        for &count in sample_counts {
            running_total += count as i64;
            table_bytes.extend_from_slice(&(running_total as i32).to_le_bytes());
        }

        zip::compress_bytes(&table_bytes)
    }

    /// Decode a deep scan line block's offset table and validate it against the
    /// block's own `decompressed_sample_data_size` bookkeeping field.
    pub fn from_deep_scan_line_block(block: &DeepScanLineBlock, width: usize, height: usize) -> Result<Self> {
        let info = Self::from_packed_offset_table(&block.compressed_pixel_offset_table, width, height)?;

        if info.total_samples as usize != block.decompressed_sample_data_size {
            return Err(Error::invalid("deep scan line sample count does not match offset table"));
        }

        Ok(info)
    }

    /// Decode a deep tile block's offset table and validate it against the block's
    /// own `decompressed_sample_data_size` bookkeeping field.
    pub fn from_deep_tile_block(block: &DeepTileBlock, width: usize, height: usize) -> Result<Self> {
        let info = Self::from_packed_offset_table(&block.compressed_pixel_offset_table, width, height)?;

        if info.total_samples as usize != block.decompressed_sample_data_size {
            return Err(Error::invalid("deep tile sample count does not match offset table"));
        }

        Ok(info)
    }
}

/// Inflate a deep chunk's channel-planar sample payload, returning raw bytes the
/// caller then splits per channel using `total_samples` and each channel's sample size
/// (every channel has the same number of samples per pixel in flat EXR, but in deep
/// data each pixel's sample count is shared across all of that pixel's channels).
pub fn decompress_sample_data(compressed: &[u8], decompressed_byte_size: usize) -> Result<Vec<u8>> {
    zip::decompress_bytes(compressed, decompressed_byte_size)
}

/// Deflate a deep chunk's channel-planar sample payload, the write-side counterpart
/// of [`decompress_sample_data`].
pub fn compress_sample_data(packed: &[u8]) -> Result<Vec<u8>> {
    zip::compress_bytes(packed)
}

/// Extract the per-pixel sample counts for a deep scan line chunk, decoding its
/// offset table. `width` is the header's data width; the block covers exactly one
/// scan line.
pub fn get_deep_sample_counts(chunk: &Chunk, width: usize) -> Result<DeepSampleInfo> {
    match &chunk.block {
        Block::DeepScanLine(block) => DeepSampleInfo::from_deep_scan_line_block(block, width, 1),
        _ => Err(Error::invalid("chunk is not a deep scan line block")),
    }
}

/// Extract the per-pixel sample counts for a deep tile chunk, decoding its offset
/// table. `tile_width`/`tile_height` are this tile's pixel dimensions (the last tile
/// in a row or column may be smaller than the header's nominal tile size).
pub fn get_deep_tile_sample_counts(chunk: &Chunk, tile_width: usize, tile_height: usize) -> Result<DeepSampleInfo> {
    match &chunk.block {
        Block::DeepTile(block) => DeepSampleInfo::from_deep_tile_block(block, tile_width, tile_height),
        _ => Err(Error::invalid("chunk is not a deep tile block")),
    }
}

/// Read the compressed sample payload bytes out of a deep chunk, along with the byte
/// size it inflates to.
pub fn raw_sample_data(chunk: &Chunk) -> Result<(&[u8], usize)> {
    match &chunk.block {
        Block::DeepScanLine(block) => Ok((&block.compressed_sample_data, block.decompressed_sample_data_size)),
        Block::DeepTile(block) => Ok((&block.compressed_sample_data, block.decompressed_sample_data_size)),
        _ => Err(Error::invalid("chunk is not a deep block")),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn offset_table_round_trips() {
        let counts = vec![0_u32, 1, 3, 0, 2];
        let packed = DeepSampleInfo::to_packed_offset_table(&counts).unwrap();
        let packed_i8: Vec<i8> = packed.iter().map(|&byte| byte as i8).collect();

        let info = DeepSampleInfo::from_packed_offset_table(&packed_i8, counts.len(), 1).unwrap();
        assert_eq!(info.sample_counts, counts);
        assert_eq!(info.cumulative_offsets[0], 0);
        assert_eq!(info.total_samples, counts.iter().sum::<u32>());

        for i in 0 .. counts.len() {
            assert_eq!(info.cumulative_offsets[i + 1] - info.cumulative_offsets[i], info.sample_counts[i]);
        }
    }

    #[test]
    fn rejects_mismatched_offset_table_length() {
        let packed = DeepSampleInfo::to_packed_offset_table(&[1, 2]).unwrap();
        let packed_i8: Vec<i8> = packed.iter().map(|&byte| byte as i8).collect();

        // claims a 3-pixel table but the payload only covers 2 pixels
        assert!(DeepSampleInfo::from_packed_offset_table(&packed_i8, 3, 1).is_err());
    }
}

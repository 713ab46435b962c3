//! Handles reading and writing the meta data of an exr file.
//! Does not handle the actual pixel data, only headers and offset tables.

pub mod attribute;
pub mod header;
pub mod deep_state;

pub use header::Header;
pub use attribute::{IntegerBounds, TileDescription};
pub use crate::block::chunk::TileCoordinates;
#[cfg(feature = "deep")]
pub use deep_state::DeepImageState;

use crate::io::*;
use crate::error::*;
use crate::math::*;
use crate::meta::attribute::{Compression, LevelMode};
use bit_field::BitField;
pub use smallvec::{SmallVec, smallvec};


/// Number of bytes at the start of the file, before the actual meta data begins.
const MAGIC_NUMBER_SIZE: usize = 4;

/// Number of bytes at the start of the meta data that contain the format version and flags.
const VERSION_AND_FLAGS_SIZE: usize = 4;

/// The first four bytes of any exr file. Specified by the open exr standard.
pub mod magic_number {
    use super::*;

    /// The first four bytes of any exr file.
    pub const BYTES: [u8; MAGIC_NUMBER_SIZE] = [0x76, 0x2f, 0x31, 0x01];

    /// Without validation, write the magic number to the byte stream.
    pub fn write(write: &mut impl Write) -> UnitResult {
        u8::write_slice(write, &BYTES)
    }

    /// Reads the magic number and returns whether it is correct.
    pub fn is_exr(read: &mut impl Read) -> Result<bool> {
        let mut magic_num = [0; MAGIC_NUMBER_SIZE];
        u8::read_slice(read, &mut magic_num)?;
        Ok(magic_num == BYTES)
    }

    /// Validate the magic number and return an error if it is missing.
    pub fn validate_exr(read: &mut impl Read) -> UnitResult {
        if is_exr(read)? { Ok(()) } else { Err(Error::InvalidMagic) }
    }
}

/// The null byte that terminates a sequence of attributes, marking the end of a header.
pub mod sequence_end {
    use super::*;

    /// The byte size of the null byte that ends a sequence.
    pub fn byte_size() -> usize { 1 }

    /// Without validation, write this null byte to indicate the end of a sequence.
    pub fn write(write: &mut impl Write) -> UnitResult {
        0_u8.write(write)
    }

    /// Peek the next byte, and consume it if it is null.
    pub fn has_come(read: &mut PeekRead<impl Read>) -> Result<bool> {
        Ok(read.skip_if_eq(0)?)
    }
}

/// Describes how the pixel data of a single layer is divided into blocks.
/// A single block can be loaded without processing all bytes of a file.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Blocks {

    /// The layer is divided into scan line blocks.
    /// The number of scan lines in a block depends on the compression method.
    ScanLines,

    /// The layer is divided into tiles, each with its own size,
    /// which may be repeated into a mip map or rip map pyramid of resolution levels.
    Tiles(TileDescription),
}

impl Blocks {
    /// Whether this is `Blocks::Tiles`.
    pub fn has_tiles(&self) -> bool {
        match self {
            Blocks::Tiles(_) => true,
            Blocks::ScanLines => false,
        }
    }
}

/// Locates a block of pixels inside a single layer, before it is positioned
/// in the global, possibly negative, 2D pixel space of a file.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct TileIndices {

    /// Number of pixels this block covers.
    pub size: Vec2<usize>,

    /// Index of the tile and mip/rip level this block belongs to.
    pub location: TileCoordinates,
}

/// Alias for a list of headers, as most functions of this library accept any number of layers.
pub type Headers = SmallVec<[Header; 2]>;

/// For each header, a list of the byte offset of each chunk, in increasing y order.
pub type OffsetTables = SmallVec<[Vec<u64>; 2]>;

/// The complete contents of the meta data of an exr file, excluding the actual pixel data.
#[derive(Clone, Debug, PartialEq)]
pub struct MetaData {

    /// Describes general properties of this image file, deduced from all headers.
    pub requirements: Requirements,

    /// The headers of all layers in this file, in the order they occur in the file.
    pub headers: Headers,
}

/// The 4-byte version and flags field directly following the magic number.
/// Stores which file-level features are in use, deduced from the headers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Requirements {
    file_format_version: u8,

    /// This file contains exactly one, tiled layer. Required for deep data.
    pub is_single_layer_and_tiled: bool,

    /// Some attribute names and values are longer than 31 bytes.
    pub has_long_names: bool,

    has_deep_data: bool,
    has_multiple_layers: bool,
}

impl Requirements {
    const IS_SINGLE_TILE_BIT: usize = 9;
    const HAS_LONG_NAMES_BIT: usize = 10;
    const HAS_DEEP_DATA_BIT: usize = 11;
    const IS_MULTILAYER_BIT: usize = 12;

    /// Whether this file has more than one layer, and therefore each chunk carries a layer index.
    pub fn is_multilayer(self) -> bool { self.has_multiple_layers }

    /// Whether this file contains deep data, where each pixel may carry a variable number of samples.
    pub fn has_deep_data(self) -> bool { self.has_deep_data }

    /// Deduce the requirements that a set of headers implies, validating every header as it goes.
    pub fn infer(headers: &[Header], pedantic: bool) -> Result<Self> {
        if headers.is_empty() {
            return Err(Error::invalid("at least one layer is required"));
        }

        let has_multiple_layers = headers.len() > 1;
        let has_deep_data = headers.iter().any(|header| header.deep);
        let is_single_layer_and_tiled = !has_multiple_layers
            && headers.iter().all(|header| header.blocks.has_tiles());

        let mut has_long_names = false;
        for header in headers {
            header.validate(has_multiple_layers, &mut has_long_names, pedantic)?;
        }

        Ok(Requirements {
            file_format_version: 2,
            is_single_layer_and_tiled,
            has_long_names,
            has_deep_data,
            has_multiple_layers,
        })
    }

    /// Without validation, write this instance to the byte stream.
    pub fn write(self, write: &mut impl Write) -> UnitResult {
        let mut flags: u32 = 0;
        flags.set_bits(0..8, self.file_format_version as u32);
        flags.set_bit(Self::IS_SINGLE_TILE_BIT, self.is_single_layer_and_tiled);
        flags.set_bit(Self::HAS_LONG_NAMES_BIT, self.has_long_names);
        flags.set_bit(Self::HAS_DEEP_DATA_BIT, self.has_deep_data);
        flags.set_bit(Self::IS_MULTILAYER_BIT, self.has_multiple_layers);
        flags.write(write)
    }

    /// Read the value without validating.
    pub fn read(read: &mut impl Read) -> Result<Self> {
        let flags = u32::read(read)?;
        let version: u8 = flags.get_bits(0..8);

        if version != 2 {
            return Err(Error::InvalidVersion(format!("unsupported file format version {}", version)));
        }

        Ok(Requirements {
            file_format_version: version,
            is_single_layer_and_tiled: flags.get_bit(Self::IS_SINGLE_TILE_BIT),
            has_long_names: flags.get_bit(Self::HAS_LONG_NAMES_BIT),
            has_deep_data: flags.get_bit(Self::HAS_DEEP_DATA_BIT),
            has_multiple_layers: flags.get_bit(Self::IS_MULTILAYER_BIT),
        })
    }
}

impl MetaData {

    /// Validate headers and write the meta data to the byte stream, including magic number and requirements.
    /// Returns the deduced requirements, so that the caller does not need to recompute them.
    pub fn write_validating_to_buffered(write: &mut impl Write, headers: &[Header], pedantic: bool) -> Result<Requirements> {
        let requirements = Requirements::infer(headers, pedantic)?;

        magic_number::write(write)?;
        requirements.write(write)?;
        Header::write_all(headers, write, requirements.is_multilayer())?;

        Ok(requirements)
    }

    /// Read the meta data, including the magic number and the headers, and validate it along the way.
    /// Leaves the read cursor directly before the offset tables.
    pub fn read_validated_from_buffered_peekable(read: &mut PeekRead<impl Read>, pedantic: bool) -> Result<Self> {
        magic_number::validate_exr(read)?;
        let requirements = Requirements::read(read)?;
        let headers = Header::read_all(read, &requirements, !pedantic)?;

        let mut has_long_names = requirements.has_long_names;
        for header in &headers {
            header.validate(requirements.is_multilayer(), &mut has_long_names, pedantic)?;
        }

        if pedantic && has_long_names && !requirements.has_long_names {
            return Err(Error::invalid("file contains long names but does not declare the long names flag"));
        }

        Ok(MetaData { requirements, headers })
    }

    /// Read the offset table of each header, in the order the headers occur in the file.
    pub fn read_offset_tables(read: &mut PeekRead<impl Read>, headers: &Headers) -> Result<OffsetTables> {
        headers.iter()
            .map(|header| u64::read_vec(read, header.chunk_count, u16::MAX as usize, None))
            .collect()
    }

    /// Skip the offset tables without decoding them, returning the total number of chunks skipped.
    pub fn skip_offset_tables(read: &mut PeekRead<impl Read>, headers: &Headers) -> Result<u64> {
        let chunk_count: usize = headers.iter().map(|header| header.chunk_count).sum();
        skip_bytes(read, chunk_count as u64 * u64::BYTE_SIZE as u64)?;
        Ok(chunk_count as u64)
    }
}

/// The number of blocks needed to cover `total_size` pixels with blocks of `block_size` pixels, rounding up.
pub fn compute_block_count(total_size: usize, block_size: usize) -> usize {
    compute_tile_count(total_size, block_size)
}

/// The size, in pixels, of the block at `block_index` along one axis, clamped to the remaining size.
pub fn calculate_block_size(total_size: usize, block_size: usize, block_index: usize) -> Result<usize> {
    let block_position = block_index * block_size;

    if block_position >= total_size {
        return Err(Error::invalid("block index"));
    }

    Ok(block_size.min(total_size - block_position))
}

/// The pixel position and size, along one axis, of the block at `block_index`.
pub fn calculate_block_position_and_size(total_size: usize, block_size: usize, block_index: usize) -> Result<(usize, usize)> {
    Ok((block_index * block_size, calculate_block_size(total_size, block_size, block_index)?))
}

/// All the mip map levels and their resolutions, for a `LevelMode::MipMap` tiled layer.
/// The number of levels is derived from the larger of the two dimensions.
pub fn mip_map_levels(round: RoundingMode, max_resolution: Vec2<usize>) -> impl Iterator<Item = (usize, Vec2<usize>)> {
    let level_count = compute_level_count(round, max_resolution.width().max(max_resolution.height()));

    (0 .. level_count).map(move |level_index| (
        level_index,
        Vec2(
            compute_level_size(round, max_resolution.width(), level_index),
            compute_level_size(round, max_resolution.height(), level_index),
        )
    ))
}

/// All the rip map levels and their resolutions, for a `LevelMode::RipMap` tiled layer.
/// Levels form a full grid: every combination of horizontal and vertical level index.
pub fn rip_map_levels(round: RoundingMode, max_resolution: Vec2<usize>) -> impl Iterator<Item = (Vec2<usize>, Vec2<usize>)> {
    let level_count_x = compute_level_count(round, max_resolution.width());
    let level_count_y = compute_level_count(round, max_resolution.height());

    (0 .. level_count_y).flat_map(move |y_level| (0 .. level_count_x).map(move |x_level| {
        let size = Vec2(
            compute_level_size(round, max_resolution.width(), x_level),
            compute_level_size(round, max_resolution.height(), y_level),
        );

        (Vec2(x_level, y_level), size)
    }))
}

/// The number of chunks (compressed blocks) that a layer with the given properties would be split into.
pub fn compute_chunk_count(compression: Compression, data_size: Vec2<usize>, blocks: Blocks) -> usize {
    if data_size.area() == 0 { return 0; }

    match blocks {
        Blocks::ScanLines => compute_block_count(data_size.height(), compression.scan_lines_per_block()),

        Blocks::Tiles(tiles) => {
            let tile_count_at = |level_size: Vec2<usize>| {
                compute_block_count(level_size.width(), tiles.tile_size.width())
                    * compute_block_count(level_size.height(), tiles.tile_size.height())
            };

            match tiles.level_mode {
                LevelMode::Singular => tile_count_at(data_size),

                LevelMode::MipMap => mip_map_levels(tiles.rounding_mode, data_size)
                    .map(|(_, level_size)| tile_count_at(level_size))
                    .sum(),

                LevelMode::RipMap => rip_map_levels(tiles.rounding_mode, data_size)
                    .map(|(_, level_size)| tile_count_at(level_size))
                    .sum(),
            }
        }
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::meta::attribute::LevelMode;
    use std::convert::TryFrom;

    #[test]
    fn roundtrip_requirements() {
        let headers: Headers = smallvec![
            Header::new(
                attribute::Text::try_from("test").unwrap(),
                Vec2(16_usize, 16_usize),
                smallvec![attribute::ChannelInfo::new(
                    attribute::Text::try_from("R").unwrap(), attribute::SampleType::F32, false
                )]
            )
        ];

        let requirements = Requirements::infer(&headers, true).unwrap();
        assert!(!requirements.is_multilayer());
        assert!(!requirements.has_deep_data());

        let mut buffer = Vec::new();
        requirements.write(&mut buffer).unwrap();

        let mut read = buffer.as_slice();
        let parsed = Requirements::read(&mut read).unwrap();
        assert_eq!(parsed, requirements);
    }

    #[test]
    fn chunk_counts() {
        let size = Vec2(10_usize, 10_usize);
        assert_eq!(compute_chunk_count(Compression::Uncompressed, size, Blocks::ScanLines), 10);

        let tiles = Blocks::Tiles(TileDescription {
            tile_size: Vec2(4, 4), level_mode: LevelMode::Singular, rounding_mode: RoundingMode::Down,
        });

        assert_eq!(compute_chunk_count(Compression::Uncompressed, size, tiles), 9);
    }
}

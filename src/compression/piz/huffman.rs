//! 16-bit canonical Huffman compression and decompression, the entropy stage PIZ
//! applies after the bitmap/LUT and wavelet passes.
// see https://github.com/AcademySoftwareFoundation/openexr/blob/88246d991e0318c043e6f584f7493da08a31f9f8/OpenEXR/IlmImf/ImfHuf.cpp

use crate::error::{Error, Result};
use crate::io::Data;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::convert::TryFrom;

/// One past the largest symbol value: 16-bit samples (`0 ..= 65535`) plus one slot
/// for the pseudo-symbol `build_encoding_table` adds so every tree has at least two leaves.
const ENCODE_SIZE: usize = (1 << 16) + 1;

/// Width of the direct-lookup fast decode table; codes up to this many bits resolve
/// in one array read, longer codes fall back to a linear scan.
const FAST_BITS: u32 = 10;
const FAST_SIZE: usize = 1 << FAST_BITS;

/// Table-only code lengths below this value are transmitted literally.
const SHORT_ZERO_RUN_BASE: i64 = 59;
/// Longest span of zero-length entries one run-of-zeros marker can cover.
const MAX_SHORT_ZERO_RUN: usize = 5;
/// Escape marker: the following 32 bits are a raw `(length | code << 6)` pair for one symbol.
const LONG_CODE_MARKER: i64 = 0x3F;

/// Compress `uncompressed` into a self-contained byte stream: a fixed header, a
/// run-length-coded code-length table, then the Huffman-coded samples.
pub fn compress(uncompressed: &[u16]) -> Result<Vec<u8>> {
    if uncompressed.is_empty() {
        return Ok(vec![0_u8; 20]);
    }

    let mut frequencies = vec![0_i64; ENCODE_SIZE];
    for &value in uncompressed {
        frequencies[value as usize] += 1;
    }

    let (min_index, max_index) = build_encoding_table(&mut frequencies);

    let mut writer = BitWriter::new();
    pack_encoding_table(&frequencies, min_index, max_index, &mut writer);

    for &value in uncompressed {
        let packed = frequencies[value as usize];
        writer.write_bits(code(packed) as u64, length(packed) as u32);
    }

    let (payload, total_bits) = writer.finish();

    let mut out = Vec::with_capacity(20 + payload.len());
    u32::try_from(min_index)?.write(&mut out)?;
    u32::try_from(max_index)?.write(&mut out)?;
    0_u32.write(&mut out)?;
    u32::try_from(total_bits)?.write(&mut out)?;
    0_u32.write(&mut out)?;
    out.extend_from_slice(&payload);

    Ok(out)
}

/// Decompress exactly `expected_value_count` samples out of `compressed`.
pub fn decompress(compressed: &[u8], expected_value_count: usize) -> Result<Vec<u16>> {
    if expected_value_count == 0 {
        return Ok(Vec::new());
    }

    if compressed.len() < 20 {
        return Err(Error::DecompressionFailed("huffman stream shorter than its header".into()));
    }

    let mut header = compressed;
    let min_index = u32::read(&mut header)? as usize;
    let max_index = u32::read(&mut header)? as usize;
    let _reserved = u32::read(&mut header)?;
    let total_bits = u32::read(&mut header)? as u64;
    let _reserved = u32::read(&mut header)?;

    if min_index >= ENCODE_SIZE || max_index >= ENCODE_SIZE || min_index > max_index {
        return Err(Error::DecompressionFailed("huffman table indices out of range".into()));
    }

    let payload_bytes = ((total_bits + 7) / 8) as usize;
    if header.len() < payload_bytes {
        return Err(Error::DecompressionFailed("huffman stream shorter than its declared bit length".into()));
    }

    let mut table = vec![0_i64; ENCODE_SIZE];
    let mut reader = BitReader::new(header);

    unpack_encoding_table(&mut reader, min_index, max_index, &mut table)?;
    let decode_table = build_decode_table(&table, min_index, max_index)?;
    decode_symbols(&mut reader, &decode_table, expected_value_count)
}

#[inline]
fn length(packed: i64) -> i64 { packed & 63 }

#[inline]
fn code(packed: i64) -> i64 { packed >> 6 }

/// Accumulates bits most-significant-first per value, packing the serial bit stream
/// into bytes least-significant-bit first.
struct BitWriter {
    bytes: Vec<u8>,
    current: u8,
    filled_bits: u32,
    total_bits: u64,
}

impl BitWriter {
    fn new() -> Self {
        Self { bytes: Vec::new(), current: 0, filled_bits: 0, total_bits: 0 }
    }

    fn write_bits(&mut self, value: u64, count: u32) {
        for i in (0 .. count).rev() {
            let bit = ((value >> i) & 1) as u8;
            self.current |= bit << self.filled_bits;
            self.filled_bits += 1;

            if self.filled_bits == 8 {
                self.bytes.push(self.current);
                self.current = 0;
                self.filled_bits = 0;
            }
        }

        self.total_bits += count as u64;
    }

    fn finish(mut self) -> (Vec<u8>, u64) {
        if self.filled_bits > 0 {
            self.bytes.push(self.current);
        }

        (self.bytes, self.total_bits)
    }
}

/// Reads the bit stream [`BitWriter`] produces: least-significant-bit first per byte,
/// most-significant-bit first per multi-bit value.
struct BitReader<'b> {
    bytes: &'b [u8],
    byte_index: usize,
    bit_index: u32,
}

impl<'b> BitReader<'b> {
    fn new(bytes: &'b [u8]) -> Self {
        Self { bytes, byte_index: 0, bit_index: 0 }
    }

    fn read_bit(&mut self) -> Option<u64> {
        let byte = *self.bytes.get(self.byte_index)?;
        let bit = (byte >> self.bit_index) & 1;

        self.bit_index += 1;
        if self.bit_index == 8 {
            self.bit_index = 0;
            self.byte_index += 1;
        }

        Some(bit as u64)
    }

    fn read_bits(&mut self, count: u32) -> Result<u64> {
        let mut value = 0_u64;

        for _ in 0 .. count {
            let bit = self.read_bit()
                .ok_or_else(|| Error::DecompressionFailed("huffman stream truncated".into()))?;

            value = (value << 1) | bit;
        }

        Ok(value)
    }

    /// Looks `count` bits ahead without consuming them, padding with zero bits past
    /// the end of the stream so the fast decode table can always be probed.
    fn peek_bits(&self, count: u32) -> u64 {
        let mut cursor = BitReader { bytes: self.bytes, byte_index: self.byte_index, bit_index: self.bit_index };
        let mut value = 0_u64;

        for _ in 0 .. count {
            value = (value << 1) | cursor.read_bit().unwrap_or(0);
        }

        value
    }

    fn consume_bits(&mut self, count: u32) {
        for _ in 0 .. count { self.read_bit(); }
    }
}

/// Builds a "canonical" Huffman code table: `table[i]` holds the length of symbol
/// `i`'s code on entry, and on exit holds `length | (code << 6)`. Canonical codes can
/// be reconstructed from lengths alone, so only lengths ever need to cross the wire.
/// Shorter codes, zero-extended, always sort numerically higher than longer ones;
/// codes of equal length increase with symbol value.
fn canonical_table(table: &mut [i64]) {
    debug_assert_eq!(table.len(), ENCODE_SIZE);

    let mut counts = [0_i64; 59];
    for &packed in table.iter() {
        counts[packed as usize] += 1;
    }

    let mut next_code = 0_i64;
    for count in counts.iter_mut().rev() {
        let following = (next_code + *count) >> 1;
        *count = next_code;
        next_code = following;
    }

    for entry in table.iter_mut() {
        let len = *entry;
        if len > 0 {
            *entry = len | (counts[len as usize] << 6);
            counts[len as usize] += 1;
        }
    }
}

/// Builds a Huffman tree over the non-zero entries of `frequencies` by repeatedly
/// merging the two least frequent symbols, then overwrites `frequencies` with the
/// canonical `(length | code << 6)` table. Returns the occupied symbol range.
///
/// A frequency-1 pseudo-symbol is added one past the highest real symbol so the
/// tree always has at least two leaves, even when every sample shares one value.
fn build_encoding_table(frequencies: &mut [i64]) -> (usize, usize) {
    debug_assert_eq!(frequencies.len(), ENCODE_SIZE);

    let mut min_index = 0;
    while frequencies[min_index] == 0 { min_index += 1; }

    let mut max_index = min_index;
    let mut links = vec![0_usize; ENCODE_SIZE];
    let mut heap = BinaryHeap::new();

    for index in min_index .. ENCODE_SIZE {
        links[index] = index;

        if frequencies[index] != 0 {
            heap.push(Reverse((frequencies[index], index)));
            max_index = index;
        }
    }

    max_index += 1;
    frequencies[max_index] = 1;
    links[max_index] = max_index;
    heap.push(Reverse((1, max_index)));

    let mut remaining = heap.len();
    let mut code_lengths = vec![0_i64; ENCODE_SIZE];

    while remaining > 1 {
        let Reverse((freq_a, a)) = heap.pop().expect("huffman heap exhausted before tree completed");
        let Reverse((freq_b, b)) = heap.pop().expect("huffman heap exhausted before tree completed");
        remaining -= 1;

        frequencies[b] = freq_a + freq_b;
        heap.push(Reverse((frequencies[b], b)));

        // every leaf reachable from `a` or `b` just moved one level deeper in the tree.
        // `b` survives (it is reinserted into the heap below), so the splice must extend
        // `b`'s list with `a`'s: only `b`'s traversal relinks, at its own tail, onto `a`.
        // Relinking at `a`'s tail instead would leave `a`'s members unreachable from `b`
        // on every later merge, under-counting their final code length.
        for (start, other) in [(a, b), (b, a)] {
            let mut j = start;
            loop {
                code_lengths[j] += 1;
                debug_assert!(code_lengths[j] <= 58, "huffman code length exceeds 58 bits");

                if links[j] == j {
                    if start == b { links[j] = other; }
                    break;
                }

                j = links[j];
            }
        }
    }

    canonical_table(&mut code_lengths);
    frequencies.copy_from_slice(&code_lengths);

    (min_index, max_index)
}

/// Writes the code-length table for symbols `min_index ..= max_index` as a sequence
/// of 6-bit values: a literal length, or a run-of-zeros marker covering up to
/// [`MAX_SHORT_ZERO_RUN`] consecutive zero-length entries. Never emits the
/// [`LONG_CODE_MARKER`] escape; that encoding exists only so [`unpack_encoding_table`]
/// can read tables a longer zero run would require.
fn pack_encoding_table(table: &[i64], min_index: usize, max_index: usize, writer: &mut BitWriter) {
    let mut i = min_index;

    while i <= max_index {
        if length(table[i]) == 0 {
            let mut run = 1;
            while run < MAX_SHORT_ZERO_RUN && i + run <= max_index && length(table[i + run]) == 0 {
                run += 1;
            }

            if run >= 2 {
                writer.write_bits((SHORT_ZERO_RUN_BASE + (run as i64 - 2)) as u64, 6);
                i += run;
                continue;
            }
        }

        writer.write_bits(length(table[i]) as u64, 6);
        i += 1;
    }
}

/// Inverse of [`pack_encoding_table`]: reconstructs code lengths for
/// `min_index ..= max_index`, then assigns canonical codes over the whole table.
fn unpack_encoding_table(reader: &mut BitReader, min_index: usize, max_index: usize, table: &mut [i64]) -> Result<()> {
    let mut i = min_index;

    while i <= max_index {
        let marker = reader.read_bits(6)? as i64;

        if marker == LONG_CODE_MARKER {
            table[i] = reader.read_bits(32)? as i64;
            i += 1;
        }
        else if marker >= SHORT_ZERO_RUN_BASE {
            let run = (marker - SHORT_ZERO_RUN_BASE + 2) as usize;

            if run == 0 || i + run > max_index + 1 {
                return Err(Error::DecompressionFailed("huffman zero run exceeds symbol range".into()));
            }

            for slot in &mut table[i .. i + run] { *slot = 0; }
            i += run;
        }
        else {
            table[i] = marker;
            i += 1;
        }
    }

    canonical_table(table);
    Ok(())
}

/// The decode side of a canonical Huffman table: a dense array resolving every code
/// of at most [`FAST_BITS`] bits in one lookup, and a fallback list for longer codes.
struct DecodeTable {
    fast: Vec<Option<(u8, u32)>>,
    long_codes: Vec<(u8, u64, u32)>,
}

fn build_decode_table(table: &[i64], min_index: usize, max_index: usize) -> Result<DecodeTable> {
    let mut fast = vec![None; FAST_SIZE];
    let mut long_codes = Vec::new();

    for symbol in min_index ..= max_index {
        let packed = table[symbol];
        let len = length(packed);
        if len == 0 { continue; }

        let code_value = code(packed) as u64;

        if (len as u32) <= FAST_BITS {
            let shift = FAST_BITS - len as u32;
            let base = (code_value as usize) << shift;

            for fill in 0 .. (1_usize << shift) {
                let slot = &mut fast[base + fill];

                if slot.is_some() {
                    return Err(Error::DecompressionFailed("huffman code table is not prefix-free".into()));
                }

                *slot = Some((len as u8, symbol as u32));
            }
        }
        else {
            long_codes.push((len as u8, code_value, symbol as u32));
        }
    }

    Ok(DecodeTable { fast, long_codes })
}

fn decode_symbols(reader: &mut BitReader, decode_table: &DecodeTable, expected_value_count: usize) -> Result<Vec<u16>> {
    let mut result = Vec::with_capacity(expected_value_count);

    while result.len() < expected_value_count {
        let peeked = reader.peek_bits(FAST_BITS) as usize;

        let hit = decode_table.fast[peeked].or_else(|| {
            decode_table.long_codes.iter()
                .find(|&&(len, code_value, _)| reader.peek_bits(len as u32) == code_value)
                .map(|&(len, _, symbol)| (len, symbol))
        });

        match hit {
            Some((len, symbol)) => {
                reader.consume_bits(len as u32);

                let value = u16::try_from(symbol)
                    .map_err(|_| Error::DecompressionFailed("huffman symbol out of 16-bit range".into()))?;

                result.push(value);
            },

            None => return Err(Error::DecompressionFailed("huffman code not found in table".into())),
        }
    }

    Ok(result)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_many_equal_frequency_symbols() {
        // forces several levels of tree merges among symbols of identical frequency,
        // which exercises the encoding-table linked-list splice across more than one merge
        let uncompressed: Vec<u16> = (0 .. 64).collect();
        let compressed = compress(&uncompressed).unwrap();
        let decompressed = decompress(&compressed, uncompressed.len()).unwrap();
        assert_eq!(uncompressed, decompressed);
    }

    #[test]
    fn round_trips_varied_distribution() {
        let mut uncompressed = Vec::new();
        for value in 0_u16 .. 200 {
            let repeats = 1 + (value % 7);
            uncompressed.extend(std::iter::repeat(value).take(repeats as usize));
        }

        let compressed = compress(&uncompressed).unwrap();
        let decompressed = decompress(&compressed, uncompressed.len()).unwrap();
        assert_eq!(uncompressed, decompressed);
    }

    #[test]
    fn round_trips_single_repeated_value() {
        let uncompressed = vec![42_u16; 500];
        let compressed = compress(&uncompressed).unwrap();
        let decompressed = decompress(&compressed, uncompressed.len()).unwrap();
        assert_eq!(uncompressed, decompressed);
    }

    #[test]
    fn round_trips_two_distinct_values() {
        let mut uncompressed = vec![0_u16; 100];
        uncompressed.extend(vec![65535_u16; 100]);

        let compressed = compress(&uncompressed).unwrap();
        let decompressed = decompress(&compressed, uncompressed.len()).unwrap();
        assert_eq!(uncompressed, decompressed);
    }

    #[test]
    fn round_trips_long_zero_run_in_code_table() {
        // many distinct single-occurrence symbols spread across the range force
        // long stretches of unused table entries between them.
        let uncompressed: Vec<u16> = (0 .. 64).map(|i| i * 900).collect();

        let compressed = compress(&uncompressed).unwrap();
        let decompressed = decompress(&compressed, uncompressed.len()).unwrap();
        assert_eq!(uncompressed, decompressed);
    }

    #[test]
    fn empty_input_round_trips_to_empty_output() {
        let compressed = compress(&[]).unwrap();
        let decompressed = decompress(&compressed, 0).unwrap();
        assert!(decompressed.is_empty());
    }

    #[test]
    fn rejects_truncated_stream() {
        assert!(decompress(&[1, 2, 3], 10).is_err());
    }
}

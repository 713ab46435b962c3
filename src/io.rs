

pub use ::std::io::{Read, Write};
use half::slice::{HalfFloatSliceExt};
use lebe::prelude::*;
use ::half::f16;
use crate::error::{Error, Result, PassiveResult, IoResult, UnitResult};
use std::io::{Seek, SeekFrom};


pub fn skip_bytes(read: &mut impl Read, count: u64) -> PassiveResult {
    let skipped = std::io::copy(
        &mut read.by_ref().take(count),
        &mut std::io::sink()
    )?;

    debug_assert_eq!(skipped, count);
    Ok(())
}

#[inline]
pub fn positive_i32(value: i32, name: &'static str) -> Result<u32> {
    if value < 0 { Err(Error::invalid(name)) }
    else { Ok(value as u32) }
}


pub struct PeekRead<T> {
    inner: T,
    peeked: Option<IoResult<u8>>,
}

impl<T: Read> PeekRead<T> {
    pub fn new(inner: T) -> Self {
        Self { inner, peeked: None }
    }

    pub fn peek_u8(&mut self) -> &IoResult<u8> {
        self.peeked = self.peeked.take().or_else(|| Some(u8::read_from_little_endian(&mut self.inner)));
        self.peeked.as_ref().unwrap()
    }

    /// The wrapped reader, for callers that need to inspect it without consuming the peek buffer.
    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn skip_if_eq(&mut self, value: u8) -> IoResult<bool> {
        match self.peek_u8() {
            Ok(peeked) if *peeked == value =>  {
                u8::read_from_little_endian(self).unwrap(); // skip, will be Ok(value)
                Ok(true)
            },

            Ok(_) => Ok(false),
            Err(_) => Err(u8::read_from_little_endian(self).err().unwrap())
        }
    }
}


impl<T: Read> Read for PeekRead<T> {
    fn read(&mut self, target_buffer: &mut [u8]) -> IoResult<usize> {
        if target_buffer.is_empty() {
            return Ok(0)
        }

        match self.peeked.take() {
            None => self.inner.read(target_buffer),
            Some(peeked) => {
                target_buffer[0] = peeked?;
                Ok(1 + self.inner.read(&mut target_buffer[1..])?)
            }
        }
    }
}

/// Wraps a reader or writer, counting the number of bytes that have passed through it.
///
/// Used everywhere this crate needs to know "where am I in the file" without requiring
/// the underlying stream to support seeking: a plain [`Read`] gets byte-position tracking
/// for free, and a [`Write`] additionally gets it for free on the forward path. Only
/// rewinding to patch a placeholder (the chunk offset table, see `block::writer`) requires
/// the wrapped type to implement [`Seek`].
#[derive(Debug, Clone)]
pub struct Tracking<T> {
    inner: T,
    position: usize,
}

impl<T> Tracking<T> {
    /// Wrap a reader or writer, starting the byte counter at zero.
    pub fn new(inner: T) -> Self {
        Self { inner, position: 0 }
    }

    /// The number of bytes read or written through this wrapper so far.
    pub fn byte_position(&self) -> usize {
        self.position
    }

    /// Alias for [`Tracking::byte_position`], matching the `tell()` naming used elsewhere.
    pub fn tell(&self) -> usize {
        self.position
    }
}

impl<T: Read> Read for Tracking<T> {
    fn read(&mut self, target_buffer: &mut [u8]) -> IoResult<usize> {
        let count = self.inner.read(target_buffer)?;
        self.position += count;
        Ok(count)
    }
}

impl<T: Write> Write for Tracking<T> {
    fn write(&mut self, buffer: &[u8]) -> IoResult<usize> {
        let count = self.inner.write(buffer)?;
        self.position += count;
        Ok(count)
    }

    fn flush(&mut self) -> IoResult<()> {
        self.inner.flush()
    }
}

impl<T: Write + Seek> Tracking<T> {
    /// Seek the underlying writer to an absolute byte offset, for backpatching
    /// a placeholder (such as the chunk offset table) once its real value is known.
    /// On a dynamically-growing sink (for example a `Cursor<Vec<u8>>`), seeking past
    /// the current length and writing there extends the buffer, zero-filling the gap.
    pub fn seek_write_to(&mut self, target_position: usize) -> UnitResult {
        self.inner.seek(SeekFrom::Start(target_position as u64))?;
        self.position = target_position;
        Ok(())
    }

    /// Alias for [`Tracking::seek_write_to`], matching the `seek()` naming used elsewhere.
    pub fn seek(&mut self, target_position: usize) -> UnitResult {
        self.seek_write_to(target_position)
    }

    /// Seek forward or backward relative to the current position.
    pub fn seek_relative(&mut self, delta: i64) -> UnitResult {
        let target = (self.position as i64) + delta;
        if target < 0 { return Err(Error::invalid("seek before start of stream")); }
        self.seek_write_to(target as usize)
    }
}

/// A fixed-capacity byte sink that fails instead of growing once its capacity is exhausted.
/// Used for the "bounded" writer mode: scratch buffers and caller-owned output buffers
/// must never silently overflow, unlike a dynamically-growing `Vec`-backed sink.
pub struct BoundedWriter<'b> {
    buffer: &'b mut [u8],
    position: usize,
}

impl<'b> BoundedWriter<'b> {
    /// Wrap a fixed-size buffer for bounded writing.
    pub fn new(buffer: &'b mut [u8]) -> Self {
        Self { buffer, position: 0 }
    }

    /// Number of bytes written so far.
    pub fn byte_position(&self) -> usize {
        self.position
    }
}

impl<'b> Write for BoundedWriter<'b> {
    fn write(&mut self, data: &[u8]) -> IoResult<usize> {
        let end = self.position + data.len();

        if end > self.buffer.len() {
            return Err(std::io::Error::new(std::io::ErrorKind::WriteZero, "bounded writer capacity exceeded"));
        }

        self.buffer[self.position .. end].copy_from_slice(data);
        self.position = end;
        Ok(data.len())
    }

    fn flush(&mut self) -> IoResult<()> { Ok(()) }
}

/// extension trait for primitive types like numbers and arrays
pub trait Data: Sized + Default + Clone {
    #[inline]
    fn read(read: &mut impl Read) -> Result<Self>;

    #[inline]
    fn read_slice(read: &mut impl Read, slice: &mut[Self]) -> PassiveResult;

    #[inline]
    fn read_vec(read: &mut impl Read, data_size: usize, estimated_max: usize, hard_max: Option<usize>) -> Result<Vec<Self>> {
        let mut vec = Vec::new();
        Self::read_into_vec(read, &mut vec, data_size, estimated_max, hard_max)?;
        Ok(vec)
    }

    #[inline]
    fn write(self, write: &mut impl Write) -> PassiveResult;

    #[inline]
    fn write_slice(write: &mut impl Write, slice: &[Self]) -> PassiveResult;

    const BYTE_SIZE: usize = ::std::mem::size_of::<Self>();

    /// `estimated_max` is an allocate-ahead hint, not a hard limit: a `data_size` exceeding
    /// it is read one element at a time instead of in one slice, to avoid over-allocating
    /// for a single corrupt length field. `hard_max`, if given, is a real ceiling: a
    /// `data_size` exceeding it is rejected outright instead of being read at all.
    #[inline]
    fn read_into_vec(read: &mut impl Read, data: &mut Vec<Self>, data_size: usize, estimated_max: usize, hard_max: Option<usize>) -> PassiveResult {
        let start = data.len();
        let end = start + data_size;

        if let Some(hard_max) = hard_max {
            if data_size > hard_max {
                return Err(Error::invalid("content size"));
            }
        }

        if data_size <= estimated_max {
            data.resize(end, Self::default());
            Self::read_slice(read, &mut data[start .. end])
        }
        else {
            println!("suspiciously large data size: {}, estimated max: {}", data_size, estimated_max);

            let max_end = start + estimated_max;
            data.resize(max_end, Self::default());
            Self::read_slice(read, &mut data[start .. max_end])?;

            for _ in estimated_max..data_size {
                data.push(Self::read(read)?);
            }

            Ok(())
        }
    }

    #[inline]
    fn write_i32_sized_slice<W: Write>(write: &mut W, slice: &[Self]) -> PassiveResult {
        (slice.len() as i32).write(write)?;
        Self::write_slice(write, slice)
    }

    #[inline]
    fn read_i32_sized_vec(read: &mut impl Read, estimated_max: usize, hard_max: Option<usize>) -> Result<Vec<Self>> {
        let size = i32::read(read)?;
        debug_assert!(size >= 0);

        if size < 0 { Err(Error::invalid("negative array size")) }
        else { Self::read_vec(read, size as usize, estimated_max, hard_max) }
    }
}


macro_rules! implement_data_for_primitive {
    ($kind: ident) => {
        impl Data for $kind {
            fn read(read: &mut impl Read) -> Result<Self> {
                Ok(read.read_from_little_endian()?)
            }

            fn write(self, write: &mut impl Write) -> Result<()> {
                write.write_as_little_endian(&self)?;
                Ok(())
            }

            fn read_slice(read: &mut impl Read, slice: &mut [Self]) -> Result<()> {
                read.read_from_little_endian_into(slice)?;
                Ok(())
            }

            fn write_slice(write: &mut impl Write, slice: &[Self]) -> Result<()> {
                write.write_as_little_endian(slice)?;
                Ok(())
            }
        }
    };
}

implement_data_for_primitive!(u8);
implement_data_for_primitive!(i8);
implement_data_for_primitive!(i16);
implement_data_for_primitive!(u16);
implement_data_for_primitive!(u32);
implement_data_for_primitive!(i32);
implement_data_for_primitive!(i64);
implement_data_for_primitive!(u64);
implement_data_for_primitive!(f32);
implement_data_for_primitive!(f64);


impl Data for f16 {
    fn read(read: &mut impl Read) -> Result<Self> {
        u16::read(read).map(f16::from_bits)
    }

    fn read_slice(read: &mut impl Read, slice: &mut [Self]) -> Result<()> {
        let bits = slice.reinterpret_cast_mut();
        u16::read_slice(read, bits)
    }

    fn write(self, write: &mut impl Write) -> Result<()> {
        self.to_bits().write(write)
    }

    fn write_slice(write: &mut impl Write, slice: &[Self]) -> Result<()> {
        let bits = slice.reinterpret_cast();
        u16::write_slice(write, bits)
    }
}


#[cfg(test)]
mod test {
    use crate::io::PeekRead;
    use std::io::Read;

    #[test]
    fn peek(){
        use lebe::prelude::*;
        let buffer: &[u8] = &[0,1,2,3];
        let mut peek = PeekRead::new(buffer);

        assert_eq!(peek.peek_u8().as_ref().unwrap(), &0);
        assert_eq!(peek.peek_u8().as_ref().unwrap(), &0);
        assert_eq!(peek.peek_u8().as_ref().unwrap(), &0);
        assert_eq!(u8::read_from_little_endian(&mut peek).unwrap(), 0_u8); // TODO rename to "read u8 from little endian"?

        assert_eq!(peek.read(&mut [0,0]).unwrap(), 2);

        assert_eq!(peek.peek_u8().as_ref().unwrap(), &3);
        assert_eq!(u8::read_from_little_endian(&mut peek).unwrap(), 3_u8);

        assert!(peek.peek_u8().is_err());
        assert!(peek.peek_u8().is_err());
        assert!(peek.peek_u8().is_err());
        assert!(peek.peek_u8().is_err());

        assert!(u8::read_from_little_endian(&mut peek).is_err());
    }
}



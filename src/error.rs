//! The error type returned by (almost) every fallible operation in this crate,
//! plus the numeric conversion helpers used when translating between the file
//! format's `i32`/`u64` fields and Rust's native `usize`.

use std::convert::TryFrom;
use std::fmt;

/// The result of a fallible operation.
pub type Result<T> = std::result::Result<T, Error>;

/// The result of an operation that either succeeds with no value or fails.
pub type UnitResult = Result<()>;

/// Older alias for [`UnitResult`], kept because some call sites still spell it out.
pub type PassiveResult = Result<()>;

pub use std::io::Error as IoError;
pub use std::io::Result as IoResult;

/// Every way a public operation in this crate can fail.
///
/// Each variant corresponds to one of the error categories a caller needs to
/// distinguish: malformed input is not the same problem as a caller passing a
/// buffer that is too small, which is not the same problem as the underlying
/// byte source failing to produce data. `Error::code()` exposes a stable,
/// machine-readable tag for each for callers that want to match on it instead
/// of the human-readable message.
#[derive(Debug)]
pub enum Error {
    /// A caller-supplied argument is malformed independently of any file content
    /// (for example, an empty channel mask or a zero-sized output buffer).
    InvalidArgument(String),

    /// A handle was used from a state that does not allow the requested operation,
    /// for example recording into a command buffer that was never `begin`-ed.
    InvalidState(String),

    /// A request referenced a coordinate, tile, or index outside its valid range.
    OutOfBounds,

    /// A caller-provided output buffer is smaller than the engine needs to write into it.
    BufferTooSmall {
        /// Bytes required to satisfy the request.
        required: usize,
        /// Bytes actually made available by the caller.
        available: usize,
    },

    /// The first eight bytes of the stream did not match the OpenEXR magic number.
    InvalidMagic,

    /// The version byte was not a version this crate understands.
    InvalidVersion(String),

    /// The byte stream violates the file format in some other way:
    /// a malformed attribute, an impossible sampling rate, a non-monotone range, and so on.
    Invalid(String),

    /// A required attribute was absent from a header.
    MissingAttribute(String),

    /// The file requests a feature this crate intentionally does not implement
    /// (for example DWAA/DWAB compression).
    NotSupported(String),

    /// A header named a compression value this crate does not recognize.
    UnsupportedCompression(String),

    /// Decompressing a chunk failed: a malformed Huffman table, an RLE run that
    /// overruns its buffer, a B44 block with an invalid flag, and so on.
    DecompressionFailed(String),

    /// Compressing a chunk failed, typically because the external deflate call failed.
    CompressionFailed(String),

    /// The underlying data source or sink reported a transport failure.
    Io(IoError),

    /// An asynchronous fetch completed with a failure instead of data.
    FetchFailed(String),

    /// An asynchronous fetch did not complete before a caller-imposed deadline.
    Timeout,

    /// A pending operation was cancelled before it completed.
    Cancelled,

    /// An allocation could not be satisfied.
    OutOfMemory,

    /// A resource that must be initialized exactly once was initialized again.
    AlreadyInitialized,

    /// A resource was used before the initialization that it depends on.
    NotInitialized,
}

impl Error {
    /// Build an [`Error::Invalid`] from anything stringlike.
    pub fn invalid(message: impl Into<String>) -> Self {
        Error::Invalid(message.into())
    }

    /// Build an [`Error::NotSupported`] from anything stringlike.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Error::NotSupported(message.into())
    }

    /// A stable, machine-readable identifier for this error's category.
    /// Matches the error taxonomy names used throughout the format documentation.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidArgument(_) => "invalid-argument",
            Error::InvalidState(_) => "invalid-state",
            Error::OutOfBounds => "out-of-bounds",
            Error::BufferTooSmall { .. } => "buffer-too-small",
            Error::InvalidMagic => "invalid-magic",
            Error::InvalidVersion(_) => "invalid-version",
            Error::Invalid(_) => "invalid-data",
            Error::MissingAttribute(_) => "missing-attribute",
            Error::NotSupported(_) => "unsupported-format",
            Error::UnsupportedCompression(_) => "unsupported-compression",
            Error::DecompressionFailed(_) => "decompression-failed",
            Error::CompressionFailed(_) => "compression-failed",
            Error::Io(_) => "io",
            Error::FetchFailed(_) => "fetch-failed",
            Error::Timeout => "timeout",
            Error::Cancelled => "cancelled",
            Error::OutOfMemory => "out-of-memory",
            Error::AlreadyInitialized => "already-initialized",
            Error::NotInitialized => "not-initialized",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgument(message) => write!(formatter, "invalid argument: {}", message),
            Error::InvalidState(message) => write!(formatter, "invalid state: {}", message),
            Error::OutOfBounds => write!(formatter, "index out of bounds"),
            Error::BufferTooSmall { required, available } => write!(
                formatter, "buffer too small: need {} bytes, have {}", required, available
            ),
            Error::InvalidMagic => write!(formatter, "not an openexr file (bad magic number)"),
            Error::InvalidVersion(message) => write!(formatter, "unsupported file version: {}", message),
            Error::Invalid(message) => write!(formatter, "invalid data: {}", message),
            Error::MissingAttribute(name) => write!(formatter, "missing required attribute: {}", name),
            Error::NotSupported(message) => write!(formatter, "not supported: {}", message),
            Error::UnsupportedCompression(name) => write!(formatter, "unsupported compression: {}", name),
            Error::DecompressionFailed(message) => write!(formatter, "decompression failed: {}", message),
            Error::CompressionFailed(message) => write!(formatter, "compression failed: {}", message),
            Error::Io(error) => write!(formatter, "i/o error: {}", error),
            Error::FetchFailed(message) => write!(formatter, "fetch failed: {}", message),
            Error::Timeout => write!(formatter, "operation timed out"),
            Error::Cancelled => write!(formatter, "operation cancelled"),
            Error::OutOfMemory => write!(formatter, "out of memory"),
            Error::AlreadyInitialized => write!(formatter, "already initialized"),
            Error::NotInitialized => write!(formatter, "not initialized"),
        }
    }
}

impl std::error::Error for Error {}

/// Enable using the `?` operator on `io::Result`.
impl From<IoError> for Error {
    fn from(error: IoError) -> Self {
        Error::Io(error)
    }
}

/// Enable using the `?` operator on a fallible numeric narrowing, for example
/// `u16::try_from(value)?` when packing a value into a fixed-width file field.
impl From<std::num::TryFromIntError> for Error {
    fn from(error: std::num::TryFromIntError) -> Self {
        Error::Invalid(format!("value out of range: {}", error))
    }
}

/// Construct a [`Error::MissingAttribute`] for the named attribute.
pub fn missing_attribute(name: impl Into<String>) -> Error {
    Error::MissingAttribute(name.into())
}

/// Convert a `usize` to `i32`, panicking if the value is too large to represent.
/// All sizes this crate deals with (image dimensions, counts) are expected to fit;
/// a panic here indicates a pathological input that should have been rejected earlier.
pub fn usize_to_i32(value: usize) -> i32 {
    i32::try_from(value).expect("a 32-bit file offset or size exceeds the i32 range")
}

/// Convert a `usize` to `u64`. Always succeeds on supported platforms.
pub fn usize_to_u64(value: usize) -> u64 {
    value as u64
}

/// Convert a `usize` to `u16`, failing with `Error::invalid` if it does not fit.
pub fn usize_to_u16(value: usize) -> Result<u16> {
    u16::try_from(value).map_err(|_| Error::invalid("value exceeds 16-bit range"))
}

/// Convert a file-provided `i32` to `usize`, failing if it is negative.
pub fn i32_to_usize(value: i32, error_message: &'static str) -> Result<usize> {
    usize::try_from(value).map_err(|_| Error::invalid(error_message))
}

/// Convert a file-provided `u64` to `usize`, panicking on platforms where `usize` is smaller.
/// File offsets and sizes in this crate are always validated against the input length first,
/// so on any realistic (32- or 64-bit) target this conversion is lossless.
pub fn u64_to_usize(value: u64) -> usize {
    usize::try_from(value).expect("a 64-bit file offset or size exceeds the usize range")
}

//! The shared, reference-counted state behind a decoder, an encoder, and every
//! handle created from them: currently just the accumulated error ring buffer.
//!
//! In the C API this crate's design is modeled after, `context_create` returns an
//! opaque, ref-counted handle that every other constructor takes a reference to and
//! every destructor releases. Rust's ownership system makes most of that bookkeeping
//! unnecessary: a [`Decoder`](crate::decoder::Decoder) or
//! [`Encoder`](crate::encoder::Encoder) just owns its `Context` outright, or clones it
//! into subsidiary handles that need to report errors into the same ring buffer. The
//! only thing that still benefits from `Arc`-style sharing is the ring buffer itself.

use crate::error::Error;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Maximum number of [`ErrorRecord`]s retained before the oldest is dropped.
const ERROR_RING_CAPACITY: usize = 16;

/// One entry in a [`Context`]'s error ring buffer.
#[derive(Clone, Debug)]
pub struct ErrorRecord {
    /// The stable, machine-readable tag from [`Error::code`].
    pub code: &'static str,

    /// The human-readable message, as produced by `Display`.
    pub message: String,

    /// The name of the operation that produced this error, for example `"parse_header"`.
    pub operation: String,

    /// The byte offset in the stream being read or written when the error occurred,
    /// if the failing operation could determine one.
    pub byte_position: Option<usize>,
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.byte_position {
            Some(position) => write!(formatter, "{} ({}) at byte {}: {}", self.operation, self.code, position, self.message),
            None => write!(formatter, "{} ({}): {}", self.operation, self.code, self.message),
        }
    }
}

#[derive(Debug, Default)]
struct ContextInner {
    errors: Mutex<VecDeque<ErrorRecord>>,
}

/// A reference-counted handle shared by a decoder, an encoder, and any command
/// buffers or fences created from them.
///
/// Cloning a `Context` is cheap: it bumps the underlying `Arc`, mirroring
/// `context_add_ref`, and dropping a clone mirrors `context_release`. The last
/// clone to be dropped frees the error ring along with it.
#[derive(Clone, Debug)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    /// Create a fresh context with an empty error ring.
    pub fn new() -> Self {
        Self { inner: Arc::new(ContextInner::default()) }
    }

    /// Record an error into the ring buffer, evicting the oldest entry if full.
    ///
    /// `operation` should name the public call that failed (`"parse_header"`,
    /// `"submit"`, ...); `byte_position` should be supplied whenever the failing
    /// operation knows where in the stream it was.
    pub fn record_error(&self, error: &Error, operation: impl Into<String>, byte_position: Option<usize>) {
        let record = ErrorRecord {
            code: error.code(),
            message: error.to_string(),
            operation: operation.into(),
            byte_position,
        };

        let mut errors = self.inner.errors.lock().unwrap();
        if errors.len() == ERROR_RING_CAPACITY {
            errors.pop_front();
        }
        errors.push_back(record);
    }

    /// A snapshot of every error currently retained, oldest first.
    pub fn errors(&self) -> Vec<ErrorRecord> {
        self.inner.errors.lock().unwrap().iter().cloned().collect()
    }

    /// The error at `index` (0 is oldest), or `None` if the ring does not hold that many.
    pub fn error(&self, index: usize) -> Option<ErrorRecord> {
        self.inner.errors.lock().unwrap().get(index).cloned()
    }

    /// Number of errors currently retained.
    pub fn error_count(&self) -> usize {
        self.inner.errors.lock().unwrap().len()
    }

    /// Drop every retained error.
    pub fn clear_errors(&self) {
        self.inner.errors.lock().unwrap().clear();
    }

    /// Number of live handles (this context plus every clone of it), mirroring what
    /// `context_add_ref`/`context_release` would report in the C API.
    pub fn reference_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::Error;

    #[test]
    fn records_and_evicts_oldest() {
        let context = Context::new();

        for index in 0 .. ERROR_RING_CAPACITY + 3 {
            context.record_error(&Error::invalid(format!("bad thing {index}")), "test_operation", Some(index));
        }

        let errors = context.errors();
        assert_eq!(errors.len(), ERROR_RING_CAPACITY);
        assert_eq!(errors.first().unwrap().byte_position, Some(3)); // first three were evicted
        assert_eq!(errors.last().unwrap().byte_position, Some(ERROR_RING_CAPACITY + 2));
    }

    #[test]
    fn clone_shares_the_ring() {
        let context = Context::new();
        let shared = context.clone();

        context.record_error(&Error::OutOfBounds, "test_operation", None);
        assert_eq!(shared.errors().len(), 1);
        assert_eq!(context.reference_count(), 2);
    }
}

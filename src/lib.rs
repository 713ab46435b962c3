

#![warn(
    rust_2018_idioms,
    future_incompatible,
    unused_extern_crates,
    unused,

    missing_copy_implementations,
    missing_debug_implementations,

    clippy::all,
    clippy::restriction,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
)]

#![deny(
    unused_variables,
    unused_assignments,
    dead_code,
    unused_must_use,
    missing_copy_implementations,
    trivial_numeric_casts,
    redundant_semicolon
)]

#![forbid(unsafe_code)]

// TODO #![warn(missing_docs)]


pub mod io; // public to allow for custom attribute byte parsing

pub mod math;
pub mod compression;
pub mod meta;
pub mod block;
pub mod error;

pub mod context;
pub mod source;
pub mod decoder;
pub mod command;
pub mod encoder;
pub mod layout;
pub mod deep;

#[macro_use]
extern crate smallvec;

/// Re-exports of the types commonly required to parse and decode an exr file.
pub mod prelude {
    pub use crate::meta::{self, MetaData, Header, Headers};
    pub use crate::meta::attribute::{self, Compression, Text, IntegerBounds, ChannelList, ChannelInfo, SampleType};
    pub use crate::math::Vec2;
    pub use crate::error::{self, Result, Error};

    pub use crate::context::Context;
    pub use crate::source::{DataSource, DataSink};
    pub use crate::decoder::{Decoder, ParseOutcome};
    pub use crate::command::{CommandBuffer, Request};
    pub use crate::encoder::Encoder;

    // re-export external stuff
    pub use half::f16;
}




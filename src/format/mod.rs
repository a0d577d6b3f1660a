//! Audio format handling.
//!
//! This module covers everything between the accessory's fixed wire format
//! and whatever the host output device wants:
//! - Format descriptors and negotiation with the host sink
//! - Per-channel sample conversion (i16 → i8/i16/i32/f32)
//! - Nearest-neighbor sample rate conversion with a session-long counter

mod convert;
mod negotiate;
mod resample;

pub use convert::{f32_to_i32, f32_to_i8, i16_to_f32, Conversion, SampleConverter};
pub use negotiate::{
    negotiate, FormatDescriptor, FormatTag, OutputFormat, SampleEncoding, SourceFormat, SubFormat,
    ACCESSORY_FORMAT,
};
pub use resample::{Emission, SamplingCounter, SamplingPlan};

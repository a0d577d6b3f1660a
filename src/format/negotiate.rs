//! Source and output format descriptors and the negotiation between them.

use std::fmt;
use std::time::Duration;

use crate::sink::RenderSink;
use crate::BridgeError;

/// Fixed wire format produced by the accessory.
///
/// Signed 16-bit little-endian samples, channels interleaved per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceFormat {
    /// Number of interleaved channels.
    pub channels: u16,
    /// Frames per second.
    pub sample_rate: u32,
    /// Bits per channel sample.
    pub bits_per_sample: u16,
}

/// The accessory audio format: 2 channels, 16-bit PCM, 44.1kHz.
pub const ACCESSORY_FORMAT: SourceFormat = SourceFormat {
    channels: 2,
    sample_rate: 44_100,
    bits_per_sample: 16,
};

impl SourceFormat {
    /// Bytes per frame across all channels.
    #[must_use]
    pub const fn block_align(&self) -> usize {
        self.channels as usize * self.bits_per_sample as usize / 8
    }

    /// Bytes per second of audio on the wire.
    #[must_use]
    pub const fn avg_bytes_per_sec(&self) -> usize {
        self.sample_rate as usize * self.block_align()
    }

    /// Describes this format the way it is offered to the host.
    #[must_use]
    pub fn descriptor(&self) -> FormatDescriptor {
        FormatDescriptor::pcm(self.channels, self.sample_rate, self.bits_per_sample)
    }
}

/// Subtype carried by an extensible format descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubFormat {
    /// Integer PCM.
    Pcm,
    /// IEEE 754 floating point.
    IeeeFloat,
    /// Any other subtype, identified by its raw GUID bits.
    Other(u128),
}

/// Top-level tag of a host format descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatTag {
    /// Plain integer PCM.
    Pcm,
    /// Extensible representation; the encoding lives in the subtype.
    Extensible(SubFormat),
    /// Any other tag value.
    Other(u16),
}

/// A format as the host audio engine describes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatDescriptor {
    /// Format tag.
    pub tag: FormatTag,
    /// Number of interleaved channels.
    pub channels: u16,
    /// Frames per second.
    pub sample_rate: u32,
    /// Container bits per channel sample.
    pub bits_per_sample: u16,
    /// Bytes per frame across all channels.
    pub block_align: u16,
}

impl FormatDescriptor {
    /// A plain integer PCM descriptor.
    #[must_use]
    pub fn pcm(channels: u16, sample_rate: u32, bits_per_sample: u16) -> Self {
        Self::with_tag(FormatTag::Pcm, channels, sample_rate, bits_per_sample)
    }

    /// An extensible descriptor with the given subtype.
    #[must_use]
    pub fn extensible(
        sub_format: SubFormat,
        channels: u16,
        sample_rate: u32,
        bits_per_sample: u16,
    ) -> Self {
        Self::with_tag(
            FormatTag::Extensible(sub_format),
            channels,
            sample_rate,
            bits_per_sample,
        )
    }

    fn with_tag(tag: FormatTag, channels: u16, sample_rate: u32, bits_per_sample: u16) -> Self {
        Self {
            tag,
            channels,
            sample_rate,
            bits_per_sample,
            block_align: channels.saturating_mul(bits_per_sample / 8),
        }
    }
}

/// Target sample encoding, closed over everything the converter can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleEncoding {
    /// Signed 8-bit integer PCM.
    Int8,
    /// Signed 16-bit integer PCM.
    Int16,
    /// Signed 32-bit integer PCM.
    Int32,
    /// 32-bit IEEE float in [-1.0, 1.0].
    Float32,
}

impl SampleEncoding {
    /// Bytes per channel sample.
    #[must_use]
    pub const fn bytes(self) -> usize {
        match self {
            Self::Int8 => 1,
            Self::Int16 => 2,
            Self::Int32 | Self::Float32 => 4,
        }
    }

    /// Returns `true` for the floating point encoding.
    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::Float32)
    }
}

impl fmt::Display for SampleEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Int8 => "i8",
            Self::Int16 => "i16",
            Self::Int32 => "i32",
            Self::Float32 => "f32",
        };
        f.write_str(name)
    }
}

/// The format frames are delivered to the host in.
///
/// Produced once per session by [`negotiate`] and read-only afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFormat {
    /// Number of interleaved channels.
    pub channels: u16,
    /// Frames per second.
    pub sample_rate: u32,
    /// Encoding of every channel sample.
    pub encoding: SampleEncoding,
}

impl OutputFormat {
    /// Resolves a host descriptor into a format the converter can produce.
    ///
    /// # Errors
    ///
    /// `UnsupportedFormat` for tags or subtypes other than integer PCM and
    /// IEEE float, or for descriptors without channels or sample rate; `UnsupportedSampleWidth`
    /// when bytes per channel is not 1, 2 or 4 (or not 4 for float).
    pub fn from_descriptor(descriptor: &FormatDescriptor) -> Result<Self, BridgeError> {
        let is_float = match descriptor.tag {
            FormatTag::Pcm | FormatTag::Extensible(SubFormat::Pcm) => false,
            FormatTag::Extensible(SubFormat::IeeeFloat) => true,
            FormatTag::Extensible(SubFormat::Other(guid)) => {
                return Err(BridgeError::unsupported_format(format!(
                    "extensible subtype {guid:#034x}"
                )));
            }
            FormatTag::Other(tag) => {
                return Err(BridgeError::unsupported_format(format!(
                    "format tag {tag:#06x}"
                )));
            }
        };

        if descriptor.channels == 0 {
            return Err(BridgeError::unsupported_format("zero channels"));
        }
        if descriptor.sample_rate == 0 {
            return Err(BridgeError::unsupported_format("zero sample rate"));
        }

        let width = descriptor.block_align / descriptor.channels;
        let encoding = match (is_float, width) {
            (false, 1) => SampleEncoding::Int8,
            (false, 2) => SampleEncoding::Int16,
            (false, 4) => SampleEncoding::Int32,
            (true, 4) => SampleEncoding::Float32,
            (_, bytes) => return Err(BridgeError::UnsupportedSampleWidth { bytes }),
        };

        Ok(Self {
            channels: descriptor.channels,
            sample_rate: descriptor.sample_rate,
            encoding,
        })
    }

    /// Bytes per frame across all channels.
    #[must_use]
    pub const fn block_align(&self) -> usize {
        self.channels as usize * self.encoding.bytes()
    }

    /// Number of whole frames covering `duration`.
    #[must_use]
    pub fn frames_for(&self, duration: Duration) -> usize {
        (f64::from(self.sample_rate) * duration.as_secs_f64()) as usize
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}Hz/{}ch/{}",
            self.sample_rate, self.channels, self.encoding
        )
    }
}

/// Determines the format the host will accept for `source` in shared mode.
///
/// The sink either accepts the desired format (`None`) or offers an alternate.
/// The alternate is adopted when offered, otherwise the source format itself.
///
/// # Errors
///
/// `Negotiation` if the sink fails the check, or any error from
/// [`OutputFormat::from_descriptor`] for the chosen descriptor.
pub fn negotiate(
    sink: &dyn RenderSink,
    source: &SourceFormat,
) -> Result<OutputFormat, BridgeError> {
    let desired = source.descriptor();
    let offered = sink
        .check_format(&desired)
        .map_err(BridgeError::Negotiation)?;

    let target = match offered {
        Some(alternate) => {
            tracing::info!(
                "Host rejected {}Hz/{}ch/{}bit, offered {:?}",
                desired.sample_rate,
                desired.channels,
                desired.bits_per_sample,
                alternate
            );
            alternate
        }
        None => desired,
    };

    OutputFormat::from_descriptor(&target)
}

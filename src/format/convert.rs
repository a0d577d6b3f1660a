//! Sample format conversion from the accessory wire format.

use super::negotiate::{OutputFormat, SampleEncoding, ACCESSORY_FORMAT};
use super::resample::{Emission, SamplingCounter, SamplingPlan};

/// Bytes per source channel sample.
const SOURCE_SAMPLE_BYTES: usize = 2;

/// Converts an i16 sample to f32 in [-1.0, 1.0].
#[inline]
pub fn i16_to_f32(sample: i16) -> f32 {
    (f32::from(sample) / 32768.0).clamp(-1.0, 1.0)
}

/// Rescales a normalized sample to signed 8-bit.
#[inline]
pub fn f32_to_i8(sample: f32) -> i8 {
    (sample * 128.0).clamp(-128.0, 127.0) as i8
}

/// Rescales a normalized sample to signed 32-bit.
///
/// Computed in f64 since f32 cannot represent `i32::MAX`.
#[inline]
pub fn f32_to_i32(sample: f32) -> i32 {
    (f64::from(sample) * 2_147_483_648.0).clamp(-2_147_483_648.0, 2_147_483_647.0) as i32
}

/// Writes one source sample into `dst` in the target encoding.
///
/// `dst` must be exactly `encoding.bytes()` long.
#[inline]
fn encode_sample(encoding: SampleEncoding, sample: i16, dst: &mut [u8]) {
    match encoding {
        SampleEncoding::Int8 => dst.copy_from_slice(&f32_to_i8(i16_to_f32(sample)).to_le_bytes()),
        // Full-scale 16-bit rescaling is the identity
        SampleEncoding::Int16 => dst.copy_from_slice(&sample.to_le_bytes()),
        SampleEncoding::Int32 => dst.copy_from_slice(&f32_to_i32(i16_to_f32(sample)).to_le_bytes()),
        SampleEncoding::Float32 => dst.copy_from_slice(&i16_to_f32(sample).to_le_bytes()),
    }
}

/// Result of converting one packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Conversion {
    /// Output frames written to the caller's buffer.
    pub frames_written: usize,
    /// Output frames that were owed but did not fit.
    pub frames_discarded: usize,
}

impl Conversion {
    /// Output frames the sampling counter accounted for.
    #[must_use]
    pub fn frames_owed(&self) -> usize {
        self.frames_written + self.frames_discarded
    }
}

/// Converts accessory frames to an [`OutputFormat`].
///
/// The converter itself is immutable for a session. The fractional
/// [`SamplingCounter`] is owned by the caller and threaded through every call.
///
/// Output channel `c` is taken from source channel `c % 2`, so mono output
/// carries the left channel and wider layouts repeat the stereo pair.
#[derive(Debug, Clone, Copy)]
pub struct SampleConverter {
    format: OutputFormat,
    plan: SamplingPlan,
}

impl SampleConverter {
    /// Creates a converter from the accessory format to `format`.
    #[must_use]
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            plan: SamplingPlan::new(ACCESSORY_FORMAT.sample_rate, format.sample_rate),
        }
    }

    /// The format this converter produces.
    #[must_use]
    pub fn output_format(&self) -> &OutputFormat {
        &self.format
    }

    /// The rate conversion plan.
    #[must_use]
    pub fn plan(&self) -> &SamplingPlan {
        &self.plan
    }

    /// Upper bound of output frames produced for `source_len` bytes of input.
    #[must_use]
    pub fn max_output_frames(&self, source_len: usize) -> usize {
        let frames = source_len / ACCESSORY_FORMAT.block_align();
        // Each source frame yields at most two output frames.
        frames * 2
    }

    /// Converts every whole source frame in `source` into `output`.
    ///
    /// Never writes past `output.len()`: owed frames that do not fit are
    /// counted as discarded, but the counter still advances for them so the
    /// time base is the same whether or not the output had room. A trailing
    /// partial frame is ignored.
    pub fn convert(
        &self,
        source: &[u8],
        output: &mut [u8],
        counter: &mut SamplingCounter,
    ) -> Conversion {
        let block = self.format.block_align();
        let capacity = output.len() / block;
        let mut result = Conversion::default();

        for frame in source.chunks_exact(ACCESSORY_FORMAT.block_align()) {
            let emission = counter.advance(&self.plan);
            if emission == Emission::None {
                continue;
            }

            if result.frames_written == capacity {
                result.frames_discarded += emission.frames();
                continue;
            }

            let start = result.frames_written * block;
            self.encode_frame(frame, &mut output[start..start + block]);
            result.frames_written += 1;

            if emission == Emission::Twice {
                if result.frames_written < capacity {
                    output.copy_within(start..start + block, start + block);
                    result.frames_written += 1;
                } else {
                    result.frames_discarded += 1;
                }
            }
        }

        result
    }

    /// Advances `counter` over `source` without producing output.
    ///
    /// Returns the number of output frames that were owed and dropped.
    pub fn skip(&self, source: &[u8], counter: &mut SamplingCounter) -> usize {
        source
            .chunks_exact(ACCESSORY_FORMAT.block_align())
            .map(|_| counter.advance(&self.plan).frames())
            .sum()
    }

    fn encode_frame(&self, frame: &[u8], dst: &mut [u8]) {
        let width = self.format.encoding.bytes();
        let source_channels = usize::from(ACCESSORY_FORMAT.channels);

        for (channel, out) in dst.chunks_exact_mut(width).enumerate() {
            let offset = (channel % source_channels) * SOURCE_SAMPLE_BYTES;
            let sample = i16::from_le_bytes([frame[offset], frame[offset + 1]]);
            encode_sample(self.format.encoding, sample, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(sample_rate: u32, encoding: SampleEncoding) -> OutputFormat {
        OutputFormat {
            channels: 2,
            sample_rate,
            encoding,
        }
    }

    fn frames(pairs: &[(i16, i16)]) -> Vec<u8> {
        pairs
            .iter()
            .flat_map(|&(l, r)| {
                let [l0, l1] = l.to_le_bytes();
                let [r0, r1] = r.to_le_bytes();
                [l0, l1, r0, r1]
            })
            .collect()
    }

    fn decode_i16(bytes: &[u8]) -> Vec<i16> {
        bytes
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect()
    }

    #[test]
    fn test_sample_helpers() {
        assert_eq!(i16_to_f32(0), 0.0);
        assert_eq!(i16_to_f32(i16::MIN), -1.0);
        assert_eq!(i16_to_f32(0x4000), 0.5);
        assert_eq!(f32_to_i8(1.0), 127);
        assert_eq!(f32_to_i8(-1.0), -128);
        assert_eq!(f32_to_i8(0.5), 64);
        assert_eq!(f32_to_i32(1.0), i32::MAX);
        assert_eq!(f32_to_i32(-1.0), i32::MIN);
        assert_eq!(f32_to_i32(0.5), 1 << 30);
    }

    #[test]
    fn test_same_rate_i16_is_identity() {
        let converter = SampleConverter::new(format(44_100, SampleEncoding::Int16));
        let source = frames(&[(1, -1), (1000, -1000), (i16::MAX, i16::MIN)]);
        let mut output = vec![0u8; 64];
        let mut counter = SamplingCounter::new();

        let result = converter.convert(&source, &mut output, &mut counter);

        assert_eq!(result.frames_written, 3);
        assert_eq!(&output[..source.len()], &source[..]);
        assert!(counter.ticks() <= converter.plan().interval());
    }

    #[test]
    fn test_44k1_to_48k_constant_amplitude() {
        let converter = SampleConverter::new(format(48_000, SampleEncoding::Int16));
        let source = frames(&vec![(0x4000, 0x4000); 441]);
        let mut output = vec![0u8; converter.max_output_frames(source.len()) * 4];
        let mut counter = SamplingCounter::new();

        let result = converter.convert(&source, &mut output, &mut counter);

        assert!((479..=481).contains(&result.frames_written));
        assert_eq!(result.frames_discarded, 0);
        let samples = decode_i16(&output[..result.frames_written * 4]);
        assert!(samples.iter().all(|&s| s == 0x4000));
    }

    #[test]
    fn test_upsample_2x_duplicates_each_frame() {
        let converter = SampleConverter::new(format(88_200, SampleEncoding::Int16));
        let source = frames(&[(1, 2), (3, 4), (5, 6)]);
        let mut output = vec![0u8; 64];
        let mut counter = SamplingCounter::new();

        let result = converter.convert(&source, &mut output, &mut counter);

        assert_eq!(result.frames_written, 6);
        assert_eq!(
            decode_i16(&output[..24]),
            vec![1, 2, 1, 2, 3, 4, 3, 4, 5, 6, 5, 6]
        );
    }

    #[test]
    fn test_downsample_2x_keeps_every_other_frame() {
        let converter = SampleConverter::new(format(22_050, SampleEncoding::Int16));
        let pairs: Vec<(i16, i16)> = (0..8).map(|i| (i, -i)).collect();
        let source = frames(&pairs);
        let mut output = vec![0u8; 64];
        let mut counter = SamplingCounter::new();

        let result = converter.convert(&source, &mut output, &mut counter);

        assert_eq!(result.frames_written, 4);
        assert_eq!(
            decode_i16(&output[..16]),
            vec![1, -1, 3, -3, 5, -5, 7, -7]
        );
    }

    #[test]
    fn test_never_writes_past_output() {
        let converter = SampleConverter::new(format(88_200, SampleEncoding::Int16));
        let source = frames(&vec![(7, 7); 10]);
        // Room for 5 frames, followed by a guard region.
        let mut buffer = vec![0xAAu8; 5 * 4 + 16];
        let mut counter = SamplingCounter::new();

        let (output, guard) = buffer.split_at_mut(5 * 4);
        let result = converter.convert(&source, output, &mut counter);

        assert_eq!(result.frames_written, 5);
        assert_eq!(result.frames_discarded, 15);
        assert!(guard.iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn test_skip_advances_like_convert() {
        let converter = SampleConverter::new(format(48_000, SampleEncoding::Float32));
        let source = frames(&vec![(100, 100); 37]);
        let mut output = vec![0u8; converter.max_output_frames(source.len()) * 8];

        let mut converted = SamplingCounter::new();
        let mut skipped = SamplingCounter::new();
        let mut owed = 0;
        let mut dropped = 0;
        for _ in 0..20 {
            owed += converter.convert(&source, &mut output, &mut converted).frames_owed();
            dropped += converter.skip(&source, &mut skipped);
        }

        assert_eq!(converted, skipped);
        assert_eq!(owed, dropped);
    }

    #[test]
    fn test_zero_frame_is_zero_in_every_encoding() {
        for encoding in [
            SampleEncoding::Int8,
            SampleEncoding::Int16,
            SampleEncoding::Int32,
            SampleEncoding::Float32,
        ] {
            let converter = SampleConverter::new(format(44_100, encoding));
            let source = frames(&[(0, 0)]);
            let mut output = vec![0xFFu8; 2 * encoding.bytes()];
            let mut counter = SamplingCounter::new();

            let result = converter.convert(&source, &mut output, &mut counter);

            assert_eq!(result.frames_written, 1);
            assert!(output.iter().all(|&b| b == 0), "{encoding} not zero");
        }
    }

    #[test]
    fn test_float_output_values() {
        let converter = SampleConverter::new(format(44_100, SampleEncoding::Float32));
        let source = frames(&[(0x4000, i16::MIN)]);
        let mut output = vec![0u8; 8];
        let mut counter = SamplingCounter::new();

        converter.convert(&source, &mut output, &mut counter);

        let left = f32::from_le_bytes([output[0], output[1], output[2], output[3]]);
        let right = f32::from_le_bytes([output[4], output[5], output[6], output[7]]);
        assert_eq!(left, 0.5);
        assert_eq!(right, -1.0);
    }

    #[test]
    fn test_int8_and_int32_output_values() {
        let source = frames(&[(i16::MAX, i16::MIN)]);
        let mut counter = SamplingCounter::new();

        let narrow = SampleConverter::new(format(44_100, SampleEncoding::Int8));
        let mut output = vec![0u8; 2];
        narrow.convert(&source, &mut output, &mut counter);
        assert_eq!(output, vec![127u8, 0x80]);

        let wide = SampleConverter::new(format(44_100, SampleEncoding::Int32));
        let mut output = vec![0u8; 8];
        wide.convert(&source, &mut output, &mut counter);
        let left = i32::from_le_bytes([output[0], output[1], output[2], output[3]]);
        let right = i32::from_le_bytes([output[4], output[5], output[6], output[7]]);
        assert_eq!(left, 2_147_418_112);
        assert_eq!(right, i32::MIN);
    }

    #[test]
    fn test_channel_mapping() {
        let source = frames(&[(11, 22)]);
        let mut counter = SamplingCounter::new();

        let mono = SampleConverter::new(OutputFormat {
            channels: 1,
            sample_rate: 44_100,
            encoding: SampleEncoding::Int16,
        });
        let mut output = vec![0u8; 2];
        mono.convert(&source, &mut output, &mut counter);
        assert_eq!(decode_i16(&output), vec![11]);

        let quad = SampleConverter::new(OutputFormat {
            channels: 4,
            sample_rate: 44_100,
            encoding: SampleEncoding::Int16,
        });
        let mut output = vec![0u8; 8];
        quad.convert(&source, &mut output, &mut counter);
        assert_eq!(decode_i16(&output), vec![11, 22, 11, 22]);
    }

    #[test]
    fn test_trailing_partial_frame_ignored() {
        let converter = SampleConverter::new(format(44_100, SampleEncoding::Int16));
        let mut source = frames(&[(5, 6)]);
        source.extend_from_slice(&[1, 2, 3]);
        let mut output = vec![0u8; 16];
        let mut counter = SamplingCounter::new();

        let result = converter.convert(&source, &mut output, &mut counter);
        assert_eq!(result.frames_written, 1);
    }
}

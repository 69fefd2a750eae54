//! C1 — AudioFrame: an owned, immutable buffer of interleaved samples.

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    Int16,
    Int32,
    Float32,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::Int16 => 2,
            SampleFormat::Int32 => 4,
            SampleFormat::Float32 => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelLayout {
    Mono,
    Stereo,
    Stereo21,
    Surround51,
    Surround71,
    Unknown,
}

impl ChannelLayout {
    /// Guesses a layout from a raw channel count only; callers needing a
    /// non-default mapping (e.g. 6-channel but not 5.1) pass their own.
    pub fn from_channel_count(channels: u16) -> Self {
        match channels {
            1 => ChannelLayout::Mono,
            2 => ChannelLayout::Stereo,
            3 => ChannelLayout::Stereo21,
            6 => ChannelLayout::Surround51,
            8 => ChannelLayout::Surround71,
            _ => ChannelLayout::Unknown,
        }
    }
}

/// Rational timestamp, `num / den` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timestamp {
    pub num: i64,
    pub den: i64,
}

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp { num: 0, den: 1 };

    pub fn new(num: i64, den: i64) -> Self {
        debug_assert!(den != 0);
        Self { num, den }
    }

    pub fn seconds(self) -> f64 {
        self.num as f64 / self.den as f64
    }
}

/// An immutable, owned buffer of interleaved audio samples.
///
/// Once constructed a frame never changes: consumers read it through
/// [`AudioFrame::sample`] (which converts to a normalized `f32`) and share it
/// by `Arc` rather than mutating in place. This replaces the source's
/// `enable_shared_from_this` pattern — ordinary reference counting is enough
/// once frames can't be mutated after creation.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    sample_rate: u32,
    channel_count: u16,
    sample_count: u32,
    format: SampleFormat,
    timestamp: Timestamp,
    data: Vec<u8>,
}

impl AudioFrame {
    fn expected_len(channel_count: u16, sample_count: u32, format: SampleFormat) -> usize {
        sample_count as usize * channel_count as usize * format.bytes_per_sample()
    }

    /// Allocates a zeroed (silent) frame.
    pub fn create(
        sample_rate: u32,
        channel_count: u16,
        sample_count: u32,
        format: SampleFormat,
        timestamp: Timestamp,
    ) -> Result<Self> {
        if channel_count == 0 || sample_count == 0 {
            return Err(Error::InvalidArg(
                "channel_count and sample_count must be >= 1".into(),
            ));
        }
        let len = Self::expected_len(channel_count, sample_count, format);
        Ok(Self {
            sample_rate,
            channel_count,
            sample_count,
            format,
            timestamp,
            data: vec![0u8; len],
        })
    }

    /// Copies `bytes` into a new frame; fails if the length disagrees with
    /// the `sample_count * channel_count * bytes_per_sample` invariant.
    pub fn create_from_bytes(
        sample_rate: u32,
        channel_count: u16,
        sample_count: u32,
        format: SampleFormat,
        timestamp: Timestamp,
        bytes: &[u8],
    ) -> Result<Self> {
        if channel_count == 0 || sample_count == 0 {
            return Err(Error::InvalidArg(
                "channel_count and sample_count must be >= 1".into(),
            ));
        }
        let expected = Self::expected_len(channel_count, sample_count, format);
        if bytes.len() != expected {
            return Err(Error::BufferTooSmall {
                needed: expected,
                got: bytes.len(),
            });
        }
        Ok(Self {
            sample_rate,
            channel_count,
            sample_count,
            format,
            timestamp,
            data: bytes.to_vec(),
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> u16 {
        self.channel_count
    }

    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn is_valid(&self) -> bool {
        self.sample_rate > 0
            && self.channel_count > 0
            && self.sample_count > 0
            && self.data.len() == Self::expected_len(self.channel_count, self.sample_count, self.format)
    }

    fn byte_offset(&self, channel: u16, index: u32) -> usize {
        let frame_stride = self.channel_count as usize * self.format.bytes_per_sample();
        index as usize * frame_stride + channel as usize * self.format.bytes_per_sample()
    }

    /// Reads sample `(channel, index)`, converted to `f32` in `[-1, 1]`.
    ///
    /// Uses the *read* scale factor (÷32768 for Int16, ÷2³¹ for Int32) which
    /// differs from the *write* factor used by [`AudioFrame::set_sample`] on
    /// purpose: it keeps round-tripping of already-scaled values exact while
    /// the write path avoids overflow at the extrema.
    pub fn sample(&self, channel: u16, index: u32) -> f32 {
        let off = self.byte_offset(channel, index);
        match self.format {
            SampleFormat::Int16 => {
                let raw = i16::from_le_bytes([self.data[off], self.data[off + 1]]);
                raw as f32 / 32768.0
            }
            SampleFormat::Int32 => {
                let raw = i32::from_le_bytes([
                    self.data[off],
                    self.data[off + 1],
                    self.data[off + 2],
                    self.data[off + 3],
                ]);
                raw as f32 / 2147483648.0
            }
            SampleFormat::Float32 => f32::from_le_bytes([
                self.data[off],
                self.data[off + 1],
                self.data[off + 2],
                self.data[off + 3],
            ]),
        }
    }

    /// Writes `value` (clamped to `[-1, 1]`) at `(channel, index)`.
    ///
    /// Uses the *write* scale factor (×32767 / ×(2³¹−1)) so that ±1.0 never
    /// overflows the integer representation.
    pub fn set_sample(&mut self, channel: u16, index: u32, value: f32) {
        let value = value.clamp(-1.0, 1.0);
        let off = self.byte_offset(channel, index);
        match self.format {
            SampleFormat::Int16 => {
                let raw = (value * 32767.0) as i16;
                self.data[off..off + 2].copy_from_slice(&raw.to_le_bytes());
            }
            SampleFormat::Int32 => {
                let raw = (value * 2147483647.0) as i32;
                self.data[off..off + 4].copy_from_slice(&raw.to_le_bytes());
            }
            SampleFormat::Float32 => {
                self.data[off..off + 4].copy_from_slice(&value.to_le_bytes());
            }
        }
    }

    pub fn clone_as(&self, format: SampleFormat) -> Result<AudioFrame> {
        let mut out = AudioFrame::create(
            self.sample_rate,
            self.channel_count,
            self.sample_count,
            format,
            self.timestamp,
        )?;
        for i in 0..self.sample_count {
            for c in 0..self.channel_count {
                out.set_sample(c, i, self.sample(c, i));
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_allocates_silence() {
        let frame = AudioFrame::create(48_000, 2, 4, SampleFormat::Float32, Timestamp::ZERO).unwrap();
        assert!(frame.is_valid());
        assert_eq!(frame.sample(0, 0), 0.0);
    }

    #[test]
    fn from_bytes_rejects_wrong_length() {
        let bytes = vec![0u8; 3];
        let res = AudioFrame::create_from_bytes(48_000, 2, 4, SampleFormat::Float32, Timestamp::ZERO, &bytes);
        assert!(res.is_err());
    }

    #[test]
    fn int16_round_trip_scale_asymmetry() {
        let mut frame = AudioFrame::create(48_000, 1, 1, SampleFormat::Int16, Timestamp::ZERO).unwrap();
        frame.set_sample(0, 0, 1.0);
        // write uses *32767, so max positive is 32767/32768, not exactly 1.0
        let back = frame.sample(0, 0);
        assert!((back - (32767.0 / 32768.0)).abs() < 1e-6);
    }

    #[test]
    fn float32_clone_as_int16_round_trip_within_tolerance() {
        let mut frame = AudioFrame::create(48_000, 1, 1, SampleFormat::Float32, Timestamp::ZERO).unwrap();
        frame.set_sample(0, 0, 0.5);
        let as_i16 = frame.clone_as(SampleFormat::Int16).unwrap();
        let back = as_i16.clone_as(SampleFormat::Float32).unwrap();
        assert!((back.sample(0, 0) - 0.5).abs() <= 2f32.powi(-15));
    }

    #[test]
    fn layout_guess_by_count() {
        assert_eq!(ChannelLayout::from_channel_count(1), ChannelLayout::Mono);
        assert_eq!(ChannelLayout::from_channel_count(2), ChannelLayout::Stereo);
        assert_eq!(ChannelLayout::from_channel_count(6), ChannelLayout::Surround51);
        assert_eq!(ChannelLayout::from_channel_count(5), ChannelLayout::Unknown);
    }
}

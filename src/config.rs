//! Validated configuration records.
//!
//! Construction is the only place values are checked; everything downstream
//! trusts a `MixerConfig`/`PipelineConfig` it was handed.

use crate::error::{Error, Result};
use crate::frame::SampleFormat;

/// Bounds shared by per-channel and master gain.
pub const GAIN_DB_MIN: f32 = -60.0;
pub const GAIN_DB_MAX: f32 = 12.0;
pub const PAN_MIN: f32 = -1.0;
pub const PAN_MAX: f32 = 1.0;

pub fn clamp_gain_db(db: f32) -> f32 {
    db.clamp(GAIN_DB_MIN, GAIN_DB_MAX)
}

pub fn clamp_pan(pan: f32) -> f32 {
    pan.clamp(PAN_MIN, PAN_MAX)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MixerConfig {
    pub sample_rate: u32,
    pub channel_count: u16,
    pub format: SampleFormat,
    pub max_channels: u32,
    pub master_gain_db: f32,
    pub master_muted: bool,
    pub clip_protection: bool,
}

impl MixerConfig {
    pub fn new(sample_rate: u32, channel_count: u16, format: SampleFormat) -> Result<Self> {
        if !(8_000..=384_000).contains(&sample_rate) {
            return Err(Error::InvalidConfiguration(format!(
                "sample_rate {sample_rate} out of range [8000, 384000]"
            )));
        }
        if channel_count == 0 {
            return Err(Error::InvalidConfiguration(
                "channel_count must be >= 1".into(),
            ));
        }
        Ok(Self {
            sample_rate,
            channel_count,
            format,
            max_channels: 64,
            master_gain_db: 0.0,
            master_muted: false,
            clip_protection: true,
        })
    }

    pub fn with_max_channels(mut self, max_channels: u32) -> Self {
        self.max_channels = max_channels;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineConfig {
    pub sample_rate: u32,
    pub channel_count: u16,
    pub format: SampleFormat,
    pub buffer_size: usize,
    pub max_channels: u32,
    pub enable_clipping_protection: bool,
    /// FIFO capacity expressed as seconds of audio; default 0.5s, floor 0.1s.
    pub fifo_seconds: f32,
}

impl PipelineConfig {
    pub fn new(sample_rate: u32, channel_count: u16, format: SampleFormat) -> Result<Self> {
        if !(8_000..=384_000).contains(&sample_rate) {
            return Err(Error::InvalidConfiguration(format!(
                "sample_rate {sample_rate} out of range [8000, 384000]"
            )));
        }
        if channel_count == 0 {
            return Err(Error::InvalidConfiguration(
                "channel_count must be >= 1".into(),
            ));
        }
        Ok(Self {
            sample_rate,
            channel_count,
            format,
            buffer_size: 1024,
            max_channels: 16,
            enable_clipping_protection: true,
            fifo_seconds: 0.5,
        })
    }

    pub fn mixer_config(&self) -> MixerConfig {
        MixerConfig::new(self.sample_rate, self.channel_count, self.format)
            .expect("pipeline config was already validated")
            .with_max_channels(self.max_channels)
    }

    pub fn fifo_capacity(&self) -> usize {
        let seconds = self.fifo_seconds.max(0.1);
        (seconds * self.sample_rate as f32 * self.channel_count as f32).ceil() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_absurd_sample_rate() {
        assert!(MixerConfig::new(1, 2, SampleFormat::Float32).is_err());
        assert!(MixerConfig::new(48_000, 0, SampleFormat::Float32).is_err());
    }

    #[test]
    fn fifo_capacity_has_a_floor() {
        let mut cfg = PipelineConfig::new(48_000, 2, SampleFormat::Float32).unwrap();
        cfg.fifo_seconds = 0.0;
        assert_eq!(cfg.fifo_capacity(), (0.1 * 48_000.0 * 2.0).ceil() as usize);
    }
}

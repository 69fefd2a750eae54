//! Real-time audio processing core for a non-linear video editor.
//!
//! This crate owns the signal path from decoded timeline frames to the
//! playback device: sample format conversion, resampling, mixing with
//! gain/pan/mute/solo, a lock-free hand-off to the device callback, and the
//! loudness/level metering that runs alongside it off the audio thread.
//!
//! ```ignore
//! let pipeline = Pipeline::new(PipelineConfig::new(48_000, 2, SampleFormat::Float32, 512)?)?;
//! pipeline.initialize()?;
//! pipeline.start_output()?;
//! ```

pub mod error;
pub use error::{Error, ErrorKind, LastError, Result};

pub mod config;
pub use config::{MixerConfig, PipelineConfig};

pub mod lockfree;

pub mod frame;
pub use frame::{AudioFrame, ChannelLayout, SampleFormat, Timestamp};

pub mod convert;
pub use convert::DownmixMatrix;

pub mod resample;
pub use resample::Resampler;

pub mod mixer;
pub use mixer::{ChannelSnapshot, Mixer, MixerStats};

pub mod fifo;
pub use fifo::{DeviceFifo, DeviceFifoConsumer, DeviceFifoProducer};

pub mod pipeline;
pub use pipeline::{Pipeline, PipelineStats};

pub mod timeline;
pub use timeline::{TimelineAudioChannel, TimelineBinder, TimelineSnapshot, TimelineTrack};

pub mod metering;
pub use metering::{
    LoudnessAnalyzer, LoudnessMeasurement, LoudnessTarget, MeterBank, MonitoringHub,
    MonitoringSnapshot, MonitoringTap,
};

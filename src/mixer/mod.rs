//! C4 — Mixer: per-channel gain/pan/mute/solo summing with clip protection.
//!
//! The source guarded channels, the accumulator, stats and the last error
//! behind four separate mutexes, reacquired repeatedly per sample block —
//! a well-known deadlock hazard the design notes call out explicitly. This
//! mixer holds all of that state behind a single `parking_lot::Mutex`,
//! matching the teacher's lock of choice throughout its audio graph.

pub mod channel;

use parking_lot::Mutex;

use crate::config::MixerConfig;
use crate::error::{Error, Result};
use crate::frame::{AudioFrame, SampleFormat, Timestamp};

pub use channel::{db_to_linear, linear_to_db, pan_coefficients, MixerChannel};

/// Samples louder than this (pre-tanh) count as a clipping event even though
/// the soft-clip stage below keeps the final output within `[-1, 1]`.
pub const CLIP_EVENT_THRESHOLD: f32 = 0.99;
/// Soft-clip knee: `|x| > threshold` is passed through `threshold*tanh(x/threshold)`.
pub const SOFT_CLIP_THRESHOLD: f32 = 0.9;

pub fn soft_clip(sample: f32, threshold: f32) -> f32 {
    if sample.abs() <= threshold {
        sample
    } else {
        threshold * (sample / threshold).tanh()
    }
}

/// Read-only mirror of one channel's current control-surface state, for
/// callers (like `TimelineBinder`) that need to track mute/solo/gain/pan
/// without holding a reference into the mixer's channel table.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ChannelSnapshot {
    pub id: u32,
    pub name: String,
    pub gain_db: f32,
    pub pan: f32,
    pub muted: bool,
    pub solo: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MixerStats {
    pub samples_processed: u64,
    pub clipping_events: u64,
    pub peak_left: f32,
    pub peak_right: f32,
    pub rms_left: f32,
    pub rms_right: f32,
    pub active_channels: u32,
}

struct MixerState {
    config: MixerConfig,
    channels: Vec<MixerChannel>,
    next_channel_id: u32,
    accumulator: Vec<f32>,
    accumulator_frames: usize,
    stats: MixerStats,
}

impl MixerState {
    fn any_solo(&self) -> bool {
        self.channels.iter().any(|c| c.solo)
    }

    fn channel_mut(&mut self, id: u32) -> Result<&mut MixerChannel> {
        self.channels
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(Error::ChannelNotFound(id))
    }
}

/// Fixed-topology channel-summing mixer. No generic DSP graph: this is a
/// direct accumulator per the source's `SimpleMixer`, not tutti-core's
/// `Net`/`AudioUnit` composition — nothing in the spec calls for arbitrary
/// node graphs, so none is built.
pub struct Mixer {
    state: Mutex<MixerState>,
}

impl Mixer {
    pub fn new(config: MixerConfig) -> Self {
        Self {
            state: Mutex::new(MixerState {
                config,
                channels: Vec::new(),
                next_channel_id: 1,
                accumulator: Vec::new(),
                accumulator_frames: 0,
                stats: MixerStats::default(),
            }),
        }
    }

    pub fn config(&self) -> MixerConfig {
        self.state.lock().config
    }

    /// Adds a channel, returning its id, or `0` on failure (too many
    /// channels) — matching the source's "return 0 means failure" contract
    /// rather than a `Result`, since callers already branch on `id != 0`.
    pub fn add_channel(&self, name: impl Into<String>, gain_db: f32, pan: f32) -> u32 {
        let mut state = self.state.lock();
        if state.channels.len() as u32 >= state.config.max_channels {
            return 0;
        }
        let id = state.next_channel_id;
        state.next_channel_id += 1;
        let channel = MixerChannel::new(id, name.into(), gain_db, pan);
        state.channels.push(channel);
        id
    }

    pub fn remove_channel(&self, id: u32) -> bool {
        let mut state = self.state.lock();
        let before = state.channels.len();
        state.channels.retain(|c| c.id != id);
        state.channels.len() != before
    }

    pub fn channel_count(&self) -> usize {
        self.state.lock().channels.len()
    }

    /// Snapshot of a single channel's mute/solo/gain/pan, or `None` if `id`
    /// doesn't exist. Used by `TimelineBinder` to mirror per-channel state
    /// into its own bookkeeping without holding the mixer lock.
    pub fn channel_snapshot(&self, id: u32) -> Option<ChannelSnapshot> {
        self.state.lock().channels.iter().find(|c| c.id == id).map(|c| ChannelSnapshot {
            id: c.id(),
            name: c.name.clone(),
            gain_db: c.gain_db(),
            pan: c.pan(),
            muted: c.muted,
            solo: c.solo,
        })
    }

    pub fn set_channel_gain(&self, id: u32, gain_db: f32) -> Result<()> {
        self.state.lock().channel_mut(id)?.set_gain_db(gain_db);
        Ok(())
    }

    pub fn set_channel_pan(&self, id: u32, pan: f32) -> Result<()> {
        self.state.lock().channel_mut(id)?.set_pan(pan);
        Ok(())
    }

    pub fn set_channel_mute(&self, id: u32, muted: bool) -> Result<()> {
        self.state.lock().channel_mut(id)?.muted = muted;
        Ok(())
    }

    pub fn set_channel_solo(&self, id: u32, solo: bool) -> Result<()> {
        self.state.lock().channel_mut(id)?.solo = solo;
        Ok(())
    }

    pub fn set_channel_name(&self, id: u32, name: impl Into<String>) -> Result<()> {
        self.state.lock().channel_mut(id)?.name = name.into();
        Ok(())
    }

    pub fn set_master_gain_db(&self, gain_db: f32) {
        self.state.lock().config.master_gain_db = crate::config::clamp_gain_db(gain_db);
    }

    pub fn set_master_mute(&self, muted: bool) {
        self.state.lock().config.master_muted = muted;
    }

    /// Resizes and zeroes the accumulator for a mix block of `frames` stereo
    /// samples. Must be called before the first `process_channel` of a
    /// block unless the previous `mix_to_output` already cleared it at the
    /// same length.
    pub fn clear_accumulator(&self, frames: usize) {
        let mut state = self.state.lock();
        let channel_count = state.config.channel_count as usize;
        state.accumulator = vec![0.0; frames * channel_count];
        state.accumulator_frames = frames;
    }

    /// Adds `frame`'s contribution (post gain/pan, unclipped) into the
    /// accumulator. Clip protection is applied exactly once, in
    /// [`Mixer::mix_to_output`], after all channels have summed and the
    /// master gain has been applied — not here. A non-existent channel, a
    /// muted channel, or a channel silenced by another channel's solo is a
    /// no-op that still returns `Ok`.
    pub fn process_channel(&self, id: u32, frame: &AudioFrame) -> Result<()> {
        let mut state = self.state.lock();
        let any_solo = state.any_solo();
        let frames = state.accumulator_frames;
        let out_channels = state.config.channel_count as usize;

        if frame.sample_count() as usize != frames {
            return Err(Error::FormatMismatch(format!(
                "channel frame has {} samples, accumulator expects {}",
                frame.sample_count(),
                frames
            )));
        }

        let (gain, pan, active) = {
            let channel = state
                .channels
                .iter()
                .find(|c| c.id == id)
                .ok_or(Error::ChannelNotFound(id))?;
            (channel.gain_linear(), channel.pan(), channel.is_active(any_solo))
        };
        if !active {
            return Ok(());
        }
        let (pan_l, pan_r) = pan_coefficients(pan);
        let in_channels = frame.channel_count();

        for i in 0..frames as u32 {
            let (left_in, right_in) = if in_channels == 1 {
                let m = frame.sample(0, i);
                (m, m)
            } else {
                (frame.sample(0, i), frame.sample(1, i))
            };
            let left = left_in * gain * pan_l;
            let right = right_in * gain * pan_r;
            let idx = i as usize * out_channels;
            state.accumulator[idx] += left;
            if out_channels > 1 {
                state.accumulator[idx + 1] += right;
            }
        }
        state.channel_mut(id)?.samples_processed += frames as u64;
        Ok(())
    }

    /// Applies master gain/mute and a final clip-protection pass, writes the
    /// result into a new [`AudioFrame`], updates stats, and optionally
    /// clears the accumulator for the next block.
    pub fn mix_to_output(&self, timestamp: Timestamp, clear: bool) -> Result<AudioFrame> {
        let mut state = self.state.lock();
        let frames = state.accumulator_frames;
        let out_channels = state.config.channel_count;
        let sample_rate = state.config.sample_rate;
        let clip_protection = state.config.clip_protection;
        let master_gain = if state.config.master_muted {
            0.0
        } else {
            db_to_linear(state.config.master_gain_db)
        };

        let mut out = AudioFrame::create(
            sample_rate,
            out_channels,
            frames.max(1) as u32,
            SampleFormat::Float32,
            timestamp,
        )?;

        let mut clipping_events = 0u64;
        let mut peak_left = 0f32;
        let mut peak_right = 0f32;
        let mut sum_sq_left = 0f64;
        let mut sum_sq_right = 0f64;

        for i in 0..frames {
            let idx = i * out_channels as usize;
            let raw_left = state.accumulator[idx] * master_gain;
            let raw_right = if out_channels > 1 {
                state.accumulator[idx + 1] * master_gain
            } else {
                raw_left
            };

            if raw_left.abs() > CLIP_EVENT_THRESHOLD {
                clipping_events += 1;
            }
            if out_channels > 1 && raw_right.abs() > CLIP_EVENT_THRESHOLD {
                clipping_events += 1;
            }

            let (out_left, out_right) = if clip_protection {
                (
                    soft_clip(raw_left, SOFT_CLIP_THRESHOLD),
                    soft_clip(raw_right, SOFT_CLIP_THRESHOLD),
                )
            } else {
                (raw_left, raw_right)
            };

            out.set_sample(0, i as u32, out_left);
            if out_channels > 1 {
                out.set_sample(1, i as u32, out_right);
            }

            peak_left = peak_left.max(out_left.abs());
            peak_right = peak_right.max(out_right.abs());
            sum_sq_left += (out_left as f64) * (out_left as f64);
            sum_sq_right += (out_right as f64) * (out_right as f64);
        }

        let active_channels = {
            let any_solo = state.any_solo();
            state
                .channels
                .iter()
                .filter(|c| c.is_active(any_solo))
                .count() as u32
        };

        state.stats = MixerStats {
            samples_processed: state.stats.samples_processed + frames as u64,
            clipping_events: state.stats.clipping_events + clipping_events,
            peak_left,
            peak_right,
            rms_left: if frames > 0 {
                ((sum_sq_left / frames as f64).sqrt()) as f32
            } else {
                0.0
            },
            rms_right: if frames > 0 {
                ((sum_sq_right / frames as f64).sqrt()) as f32
            } else {
                0.0
            },
            active_channels,
        };

        if clear {
            let len = state.accumulator.len();
            state.accumulator.iter_mut().for_each(|s| *s = 0.0);
            debug_assert_eq!(len, frames * out_channels as usize);
        }

        Ok(out)
    }

    pub fn stats(&self) -> MixerStats {
        self.state.lock().stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::SampleFormat;

    fn make_mixer(max_channels: u32) -> Mixer {
        let config = MixerConfig::new(48_000, 2, SampleFormat::Float32)
            .unwrap()
            .with_max_channels(max_channels);
        Mixer::new(config)
    }

    fn sine_frame(samples: u32, amplitude: f32, mono: bool) -> AudioFrame {
        let channels = if mono { 1 } else { 2 };
        let mut f = AudioFrame::create(48_000, channels, samples, SampleFormat::Float32, Timestamp::ZERO).unwrap();
        for i in 0..samples {
            let v = amplitude * (i as f32 * 0.1).sin();
            for c in 0..channels {
                f.set_sample(c, i, v);
            }
        }
        f
    }

    #[test]
    fn identity_single_channel_unity_gain() {
        let mixer = make_mixer(4);
        let id = mixer.add_channel("a", 0.0, 0.0);
        assert_ne!(id, 0);
        let input = sine_frame(32, 0.5, false);
        mixer.clear_accumulator(32);
        mixer.process_channel(id, &input).unwrap();
        let out = mixer.mix_to_output(Timestamp::ZERO, true).unwrap();
        for i in 0..32 {
            assert!((out.sample(0, i) - input.sample(0, i)).abs() < 2e-6);
        }
    }

    #[test]
    fn silence_on_empty_mixer() {
        let mixer = make_mixer(4);
        mixer.clear_accumulator(16);
        let out = mixer.mix_to_output(Timestamp::ZERO, true).unwrap();
        for i in 0..16 {
            assert_eq!(out.sample(0, i), 0.0);
            assert_eq!(out.sample(1, i), 0.0);
        }
    }

    #[test]
    fn gain_is_monotonic() {
        let louder = make_mixer(4);
        let id = louder.add_channel("a", 6.0, 0.0);
        let quieter = make_mixer(4);
        let id2 = quieter.add_channel("a", -6.0, 0.0);
        let input = sine_frame(64, 0.3, false);
        louder.clear_accumulator(64);
        louder.process_channel(id, &input).unwrap();
        let out_loud = louder.mix_to_output(Timestamp::ZERO, true).unwrap();
        quieter.clear_accumulator(64);
        quieter.process_channel(id2, &input).unwrap();
        let out_quiet = quieter.mix_to_output(Timestamp::ZERO, true).unwrap();
        assert!(out_loud.stats_peak() > out_quiet.stats_peak());
    }

    #[test]
    fn pan_hard_left_silences_right_channel() {
        let mixer = make_mixer(4);
        let id = mixer.add_channel("a", 0.0, -1.0);
        let input = sine_frame(16, 0.5, false);
        mixer.clear_accumulator(16);
        mixer.process_channel(id, &input).unwrap();
        let out = mixer.mix_to_output(Timestamp::ZERO, true).unwrap();
        for i in 0..16 {
            assert!(out.sample(1, i).abs() < 1e-6);
        }
    }

    #[test]
    fn master_mute_forces_exact_silence() {
        let mixer = make_mixer(4);
        let id = mixer.add_channel("a", 12.0, 0.0);
        mixer.set_master_mute(true);
        let input = sine_frame(16, 0.9, false);
        mixer.clear_accumulator(16);
        mixer.process_channel(id, &input).unwrap();
        let out = mixer.mix_to_output(Timestamp::ZERO, true).unwrap();
        for i in 0..16 {
            assert_eq!(out.sample(0, i), 0.0);
            assert_eq!(out.sample(1, i), 0.0);
        }
    }

    #[test]
    fn solo_excludes_non_soloed_channels() {
        let mixer = make_mixer(4);
        let a = mixer.add_channel("a", 0.0, 0.0);
        let b = mixer.add_channel("b", 0.0, 0.0);
        mixer.set_channel_solo(b, true).unwrap();
        let frame_a = sine_frame(16, 0.5, false);
        let frame_b = sine_frame(16, 0.2, false);
        mixer.clear_accumulator(16);
        mixer.process_channel(a, &frame_a).unwrap();
        mixer.process_channel(b, &frame_b).unwrap();
        let out = mixer.mix_to_output(Timestamp::ZERO, true).unwrap();
        for i in 0..16 {
            assert!((out.sample(0, i) - frame_b.sample(0, i)).abs() < 2e-6);
        }
    }

    #[test]
    fn clip_protection_bounds_output() {
        let mixer = make_mixer(4);
        let a = mixer.add_channel("a", 12.0, 0.0);
        let b = mixer.add_channel("b", 12.0, 0.0);
        let frame = sine_frame(32, 0.95, false);
        mixer.clear_accumulator(32);
        mixer.process_channel(a, &frame).unwrap();
        mixer.process_channel(b, &frame).unwrap();
        let out = mixer.mix_to_output(Timestamp::ZERO, true).unwrap();
        for i in 0..32 {
            assert!(out.sample(0, i).abs() <= 1.0);
            assert!(out.sample(1, i).abs() <= 1.0);
        }
    }

    #[test]
    fn too_many_channels_returns_zero_id() {
        let mixer = make_mixer(1);
        let first = mixer.add_channel("a", 0.0, 0.0);
        assert_ne!(first, 0);
        let second = mixer.add_channel("b", 0.0, 0.0);
        assert_eq!(second, 0);
    }

    #[test]
    fn channel_churn_leaves_no_residue() {
        let mixer = make_mixer(200);
        let mut ids = Vec::new();
        for i in 0..100 {
            ids.push(mixer.add_channel(format!("ch{i}"), 0.0, 0.0));
        }
        assert_eq!(mixer.channel_count(), 100);
        mixer.clear_accumulator(16);
        let out = mixer.mix_to_output(Timestamp::ZERO, true).unwrap();
        assert_eq!(out.sample(0, 0), 0.0);
        for id in ids {
            assert!(mixer.remove_channel(id));
        }
        assert_eq!(mixer.channel_count(), 0);
        mixer.clear_accumulator(16);
        let out2 = mixer.mix_to_output(Timestamp::ZERO, true).unwrap();
        assert_eq!(out2.sample(0, 0), 0.0);
    }

    trait PeakExt {
        fn stats_peak(&self) -> f32;
    }

    impl PeakExt for AudioFrame {
        fn stats_peak(&self) -> f32 {
            let mut peak = 0f32;
            for i in 0..self.sample_count() {
                peak = peak.max(self.sample(0, i).abs());
            }
            peak
        }
    }
}

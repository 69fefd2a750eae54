//! C2 — SampleConverter: channel layout rules and format conversion.
//!
//! Sample-rate conversion is delegated entirely to [`crate::resample`];
//! this module only handles channel-count layout guesses, up/downmix, and
//! integer<->float format conversion.

use crate::error::{Error, Result};
use crate::frame::{AudioFrame, ChannelLayout, SampleFormat};

/// ITU-R BS.775 center/surround attenuation used by the default 5.1->stereo
/// downmix matrix.
pub const DOWNMIX_COEFFICIENT: f32 = 0.707;

/// A downmix matrix mapping N input channels to M output channels, applied
/// as `out[m] = sum_n matrix[m][n] * in[n]`.
#[derive(Debug, Clone)]
pub struct DownmixMatrix {
    pub rows: Vec<Vec<f32>>,
}

impl DownmixMatrix {
    /// The standard ITU-R BS.775 5.1 (L,R,C,LFE,SL,SR) -> stereo matrix:
    /// `L' = L + 0.707*C + 0.707*SL`, `R' = R + 0.707*C + 0.707*SR`, LFE
    /// omitted.
    pub fn bs775_51_to_stereo() -> Self {
        Self {
            rows: vec![
                vec![1.0, 0.0, DOWNMIX_COEFFICIENT, 0.0, DOWNMIX_COEFFICIENT, 0.0],
                vec![0.0, 1.0, DOWNMIX_COEFFICIENT, 0.0, 0.0, DOWNMIX_COEFFICIENT],
            ],
        }
    }

    pub fn apply(&self, inputs: &[f32]) -> Vec<f32> {
        self.rows
            .iter()
            .map(|row| row.iter().zip(inputs).map(|(w, x)| w * x).sum())
            .collect()
    }
}

/// Upmixes a mono frame to stereo by duplicating the mono sample to both
/// output channels, or downmixes a 5.1 frame to stereo using `matrix`
/// (defaults to the BS.775 matrix when `None`).
pub fn convert_channels(
    frame: &AudioFrame,
    out_channels: u16,
    matrix: Option<&DownmixMatrix>,
) -> Result<AudioFrame> {
    let in_channels = frame.channel_count();
    if in_channels == out_channels {
        return Ok(frame.clone());
    }

    let mut out = AudioFrame::create(
        frame.sample_rate(),
        out_channels,
        frame.sample_count(),
        frame.format(),
        frame.timestamp(),
    )?;

    if in_channels == 1 && out_channels == 2 {
        for i in 0..frame.sample_count() {
            let m = frame.sample(0, i);
            out.set_sample(0, i, m);
            out.set_sample(1, i, m);
        }
        return Ok(out);
    }

    if in_channels == 6 && out_channels == 2 {
        let default_matrix = DownmixMatrix::bs775_51_to_stereo();
        let matrix = matrix.unwrap_or(&default_matrix);
        for i in 0..frame.sample_count() {
            let inputs: Vec<f32> = (0..6).map(|c| frame.sample(c, i)).collect();
            let outputs = matrix.apply(&inputs);
            for (c, v) in outputs.into_iter().enumerate() {
                out.set_sample(c as u16, i, v.clamp(-1.0, 1.0));
            }
        }
        return Ok(out);
    }

    // No specific rule: take the first `out_channels`, or pad with silence.
    for i in 0..frame.sample_count() {
        for c in 0..out_channels {
            let v = if c < in_channels { frame.sample(c, i) } else { 0.0 };
            out.set_sample(c, i, v);
        }
    }
    Ok(out)
}

/// Converts between integer/float sample formats via [`AudioFrame::clone_as`].
pub fn convert_format(frame: &AudioFrame, format: SampleFormat) -> Result<AudioFrame> {
    frame.clone_as(format)
}

/// Guesses a [`ChannelLayout`] from the frame's channel count.
pub fn guess_layout(frame: &AudioFrame) -> ChannelLayout {
    ChannelLayout::from_channel_count(frame.channel_count())
}

pub fn require_stereo(frame: &AudioFrame) -> Result<()> {
    if frame.channel_count() != 2 {
        return Err(Error::FormatMismatch(format!(
            "expected stereo, got {} channels",
            frame.channel_count()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Timestamp;

    fn mono_frame(value: f32) -> AudioFrame {
        let mut f = AudioFrame::create(48_000, 1, 4, SampleFormat::Float32, Timestamp::ZERO).unwrap();
        for i in 0..4 {
            f.set_sample(0, i, value);
        }
        f
    }

    #[test]
    fn mono_to_stereo_duplicates() {
        let mono = mono_frame(0.5);
        let stereo = convert_channels(&mono, 2, None).unwrap();
        assert_eq!(stereo.channel_count(), 2);
        assert_eq!(stereo.sample(0, 0), 0.5);
        assert_eq!(stereo.sample(1, 0), 0.5);
    }

    #[test]
    fn downmix_51_matches_bs775() {
        let mut f = AudioFrame::create(48_000, 6, 1, SampleFormat::Float32, Timestamp::ZERO).unwrap();
        // L, R, C, LFE, SL, SR
        let values = [0.8, 0.8, 1.0, 0.3, 0.4, 0.4];
        for (c, v) in values.iter().enumerate() {
            f.set_sample(c as u16, 0, *v);
        }
        let stereo = convert_channels(&f, 2, None).unwrap();
        let expected_l = (0.8 + DOWNMIX_COEFFICIENT + DOWNMIX_COEFFICIENT * 0.4).clamp(-1.0, 1.0);
        assert!((stereo.sample(0, 0) - expected_l).abs() <= 2f32.powi(-10));
    }
}

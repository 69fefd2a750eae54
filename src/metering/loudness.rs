//! C8 — LoudnessAnalyzer: EBU R128 K-weighted momentary/short-term/
//! integrated LUFS.
//!
//! The K-weighting coefficients and window lengths below are copied from
//! the fixed constants in `loudness_monitor.hpp`'s `ebu_r128` namespace and
//! `KWeightingFilter`, not re-derived — ITU-R BS.1770's filter design is
//! exact-coefficient sensitive and the source already carries the correct
//! values for a 48 kHz design sample rate.

use std::collections::VecDeque;

use parking_lot::Mutex;

pub const REFERENCE_LUFS: f64 = -23.0;
pub const GATING_THRESHOLD_ABSOLUTE: f64 = -70.0;
pub const GATING_THRESHOLD_RELATIVE: f64 = -10.0;
pub const MOMENTARY_WINDOW_MS: f64 = 400.0;
pub const SHORT_TERM_WINDOW_MS: f64 = 3000.0;
pub const PEAK_CEILING_DBFS: f32 = -1.0;
const GATING_BLOCK_MS: f64 = 100.0;

/// Direct Form I biquad: `y[n] = b0*x[n] + b1*x[n-1] + b2*x[n-2] - a1*y[n-1] - a2*y[n-2]`.
#[derive(Debug, Clone, Copy)]
struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl Biquad {
    fn new(b0: f64, b1: f64, b2: f64, a1: f64, a2: f64) -> Self {
        Self {
            b0,
            b1,
            b2,
            a1,
            a2,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        }
    }

    #[inline]
    fn process(&mut self, x0: f64) -> f64 {
        let y0 = self.b0 * x0 + self.b1 * self.x1 + self.b2 * self.x2
            - self.a1 * self.y1
            - self.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = x0;
        self.y2 = self.y1;
        self.y1 = y0;
        y0
    }
}

/// Cascade of a high-shelf (1681 Hz, +4 dB) and a high-pass (38 Hz) biquad,
/// per ITU-R BS.1770's K-weighting pre-filter.
#[derive(Debug, Clone)]
pub struct KWeightingFilter {
    high_shelf: Biquad,
    high_pass: Biquad,
}

impl KWeightingFilter {
    pub fn new() -> Self {
        Self {
            high_shelf: Biquad::new(
                1.53512485958697,
                -2.69169618940638,
                1.19839281085285,
                -1.69065929318241,
                0.73248077421585,
            ),
            high_pass: Biquad::new(
                1.0,
                -2.0,
                1.0,
                -1.99004745483398,
                0.99007225036621,
            ),
        }
    }

    #[inline]
    pub fn process_sample(&mut self, x: f32) -> f64 {
        let shelved = self.high_shelf.process(x as f64);
        self.high_pass.process(shelved)
    }
}

impl Default for KWeightingFilter {
    fn default() -> Self {
        Self::new()
    }
}

/// Circular buffer maintaining a running mean of the last `capacity`
/// mean-square values, used for both the momentary and short-term windows.
struct MeanSquareWindow {
    buffer: VecDeque<f64>,
    capacity: usize,
    sum: f64,
}

impl MeanSquareWindow {
    fn new(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            sum: 0.0,
        }
    }

    fn push(&mut self, value: f64) {
        self.buffer.push_back(value);
        self.sum += value;
        if self.buffer.len() > self.capacity {
            if let Some(old) = self.buffer.pop_front() {
                self.sum -= old;
            }
        }
    }

    fn mean(&self) -> f64 {
        if self.buffer.is_empty() {
            0.0
        } else {
            self.sum / self.buffer.len() as f64
        }
    }

    fn is_full(&self) -> bool {
        self.buffer.len() >= self.capacity
    }
}

fn mean_square_to_lufs(mean_square: f64) -> f64 {
    if mean_square <= 0.0 {
        f64::NEG_INFINITY
    } else {
        -0.691 + 10.0 * mean_square.log10()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoudnessTarget {
    pub integrated_lufs: f64,
    pub tolerance_lu: f64,
    pub peak_ceiling_dbfs: f32,
}

impl Default for LoudnessTarget {
    fn default() -> Self {
        Self {
            integrated_lufs: REFERENCE_LUFS,
            tolerance_lu: 1.0,
            peak_ceiling_dbfs: PEAK_CEILING_DBFS,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LoudnessMeasurement {
    pub momentary_lufs: f64,
    pub short_term_lufs: f64,
    pub integrated_lufs: f64,
    pub peak_left_dbfs: f32,
    pub peak_right_dbfs: f32,
    pub rms_left_dbfs: f32,
    pub rms_right_dbfs: f32,
    pub correlation: f32,
    pub valid: bool,
    pub integrated_within_target: bool,
    pub peak_within_target: bool,
}

struct IntegratedGate {
    block_len: usize,
    block_pos: usize,
    block_sum: f64,
    gated_sum: f64,
    gated_blocks: u64,
}

impl IntegratedGate {
    fn new(block_len: usize) -> Self {
        Self {
            block_len: block_len.max(1),
            block_pos: 0,
            block_sum: 0.0,
            gated_sum: 0.0,
            gated_blocks: 0,
        }
    }

    /// Accumulates one K-weighted mean-square sample; on completing a
    /// 100 ms block, applies the absolute gate (-70 LUFS). Relative gating
    /// (-10 LU below ungated integrated) is documented in DESIGN.md as a
    /// placeholder per spec §9's open question — tests must not depend on
    /// it.
    fn push(&mut self, mean_square: f64) {
        self.block_sum += mean_square;
        self.block_pos += 1;
        if self.block_pos >= self.block_len {
            let block_mean = self.block_sum / self.block_len as f64;
            let block_lufs = mean_square_to_lufs(block_mean);
            if block_lufs > GATING_THRESHOLD_ABSOLUTE {
                self.gated_sum += block_mean;
                self.gated_blocks += 1;
            }
            self.block_sum = 0.0;
            self.block_pos = 0;
        }
    }

    fn integrated_lufs(&self) -> f64 {
        if self.gated_blocks == 0 {
            f64::NEG_INFINITY
        } else {
            mean_square_to_lufs(self.gated_sum / self.gated_blocks as f64)
        }
    }
}

/// One entry in [`LoudnessAnalyzer`]'s bounded history ring, keyed by audio
/// position (seconds since this analyzer was created) rather than wall
/// clock, so history is reproducible in tests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoudnessHistoryEntry {
    pub position_seconds: f64,
    pub momentary_lufs: f64,
    pub short_term_lufs: f64,
}

/// Bounded ring of recent loudness history, per SPEC_FULL.md §C
/// (`professional_monitoring.hpp`'s `LoudnessHistory`); capped at 1024
/// entries rather than the original's 10000 so an embedder's meter-history
/// UI has enough to draw from without unbounded growth.
const HISTORY_CAPACITY: usize = 1024;

/// Real-time K-weighted loudness analyzer, run off the audio thread by
/// [`crate::metering::hub::MonitoringHub`].
pub struct LoudnessAnalyzer {
    sample_rate: u32,
    k_weight_l: KWeightingFilter,
    k_weight_r: KWeightingFilter,
    momentary: MeanSquareWindow,
    short_term: MeanSquareWindow,
    integrated: IntegratedGate,
    target: LoudnessTarget,
    measurement: Mutex<LoudnessMeasurement>,
    history: VecDeque<LoudnessHistoryEntry>,
    samples_seen: u64,
}

impl LoudnessAnalyzer {
    pub fn new(sample_rate: u32, target: LoudnessTarget) -> Self {
        let momentary_len = (sample_rate as f64 * MOMENTARY_WINDOW_MS / 1000.0).round() as usize;
        let short_term_len = (sample_rate as f64 * SHORT_TERM_WINDOW_MS / 1000.0).round() as usize;
        let block_len = (sample_rate as f64 * GATING_BLOCK_MS / 1000.0).round() as usize;
        Self {
            sample_rate,
            k_weight_l: KWeightingFilter::new(),
            k_weight_r: KWeightingFilter::new(),
            momentary: MeanSquareWindow::new(momentary_len),
            short_term: MeanSquareWindow::new(short_term_len),
            integrated: IntegratedGate::new(block_len),
            target,
            measurement: Mutex::new(LoudnessMeasurement::default()),
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
            samples_seen: 0,
        }
    }

    /// Snapshot of the most recent history entries, oldest first.
    pub fn history(&self) -> &VecDeque<LoudnessHistoryEntry> {
        &self.history
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Processes a block of interleaved-free left/right slices (same
    /// length) and republishes the measurement snapshot.
    pub fn process(&mut self, left: &[f32], right: &[f32]) {
        debug_assert_eq!(left.len(), right.len());
        let mut peak_l = 0f32;
        let mut peak_r = 0f32;
        let mut sum_sq_l = 0f64;
        let mut sum_sq_r = 0f64;

        for (&l, &r) in left.iter().zip(right.iter()) {
            let kl = self.k_weight_l.process_sample(l);
            let kr = self.k_weight_r.process_sample(r);
            let mean_square = (kl * kl + kr * kr) / 2.0;
            self.momentary.push(mean_square);
            self.short_term.push(mean_square);
            self.integrated.push(mean_square);

            peak_l = peak_l.max(l.abs());
            peak_r = peak_r.max(r.abs());
            sum_sq_l += (l as f64) * (l as f64);
            sum_sq_r += (r as f64) * (r as f64);
        }

        let n = left.len().max(1) as f64;
        let rms_l = (sum_sq_l / n).sqrt() as f32;
        let rms_r = (sum_sq_r / n).sqrt() as f32;
        let correlation = crate::metering::meter::pearson_correlation(left, right);

        let momentary_lufs = mean_square_to_lufs(self.momentary.mean());
        let short_term_lufs = mean_square_to_lufs(self.short_term.mean());
        let integrated_lufs = self.integrated.integrated_lufs();
        let peak_left_dbfs = amplitude_to_dbfs(peak_l);
        let peak_right_dbfs = amplitude_to_dbfs(peak_r);

        self.samples_seen += left.len() as u64;
        if self.history.len() >= HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(LoudnessHistoryEntry {
            position_seconds: self.samples_seen as f64 / self.sample_rate as f64,
            momentary_lufs,
            short_term_lufs,
        });

        let mut measurement = self.measurement.lock();
        *measurement = LoudnessMeasurement {
            momentary_lufs,
            short_term_lufs,
            integrated_lufs,
            peak_left_dbfs,
            peak_right_dbfs,
            rms_left_dbfs: amplitude_to_dbfs(rms_l),
            rms_right_dbfs: amplitude_to_dbfs(rms_r),
            correlation,
            valid: self.momentary.is_full(),
            integrated_within_target: integrated_lufs.is_finite()
                && (integrated_lufs - self.target.integrated_lufs).abs() <= self.target.tolerance_lu,
            peak_within_target: peak_left_dbfs <= self.target.peak_ceiling_dbfs
                && peak_right_dbfs <= self.target.peak_ceiling_dbfs,
        };
    }

    pub fn measurement(&self) -> LoudnessMeasurement {
        *self.measurement.lock()
    }
}

fn amplitude_to_dbfs(amplitude: f32) -> f32 {
    if amplitude <= 0.0 {
        f32::NEG_INFINITY
    } else {
        20.0 * amplitude.log10()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(sample_rate: u32, freq: f32, amplitude: f32, n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| amplitude * (std::f32::consts::TAU * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    #[test]
    fn silence_yields_negative_infinity_momentary() {
        let mut analyzer = LoudnessAnalyzer::new(48_000, LoudnessTarget::default());
        let zeros = vec![0f32; 48_000 / 2];
        analyzer.process(&zeros, &zeros);
        let m = analyzer.measurement();
        assert!(m.momentary_lufs.is_infinite());
    }

    #[test]
    fn reference_sine_lands_near_minus_23_lufs_within_loose_tolerance() {
        // 1 kHz sine at -20 dBFS RMS stereo should integrate close to the
        // EBU R128 reference point after K-weighting; K-weighting is close
        // to flat at 1 kHz so the result should be in the right ballpark.
        let mut analyzer = LoudnessAnalyzer::new(48_000, LoudnessTarget::default());
        let amplitude = 10f32.powf(-20.0 / 20.0) * std::f32::consts::SQRT_2;
        for _ in 0..20 {
            let block = sine(48_000, 1_000.0, amplitude, 4800);
            analyzer.process(&block, &block);
        }
        let m = analyzer.measurement();
        assert!(m.integrated_lufs.is_finite());
        assert!((m.integrated_lufs - (-23.0)).abs() < 5.0);
    }

    #[test]
    fn history_ring_is_capped_and_tracks_audio_position() {
        let mut analyzer = LoudnessAnalyzer::new(48_000, LoudnessTarget::default());
        let block = sine(48_000, 1_000.0, 0.1, 480);
        for _ in 0..(HISTORY_CAPACITY + 10) {
            analyzer.process(&block, &block);
        }
        assert_eq!(analyzer.history().len(), HISTORY_CAPACITY);
        let last = analyzer.history().back().unwrap();
        let expected_seconds = (HISTORY_CAPACITY + 10) as f64 * 480.0 / 48_000.0;
        assert!((last.position_seconds - expected_seconds).abs() < 1e-6);
    }

    #[test]
    fn k_weighting_is_stable_over_long_runs() {
        let mut filter = KWeightingFilter::new();
        for i in 0..48_000 {
            let x = (i as f32 * 0.01).sin();
            let y = filter.process_sample(x);
            assert!(y.is_finite());
        }
    }
}

//! C9 — MeterBank: peak/RMS meters with professional ballistics, plus a
//! correlation meter.
//!
//! Ballistics math (`time_to_coeff`, recompute-coefficients-only-on-change)
//! is grounded on `tutti-dsp/src/envelope_follower.rs`'s
//! `EnvelopeFollowerNode`; the three named presets and the peak-hold rule
//! come from `loudness_monitor.hpp`'s `MeterBallistics`/`AudioLevelMeter`.

use crate::lockfree::AtomicFloat;

/// Attack/decay/hold time constants (milliseconds) for one ballistics
/// profile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeterBallistics {
    pub attack_time_ms: f32,
    pub decay_time_ms: f32,
    pub hold_time_ms: f32,
}

impl MeterBallistics {
    /// Instantaneous attack, 1700 ms decay, 1000 ms hold.
    pub fn digital_peak() -> Self {
        Self {
            attack_time_ms: 0.0,
            decay_time_ms: 1700.0,
            hold_time_ms: 1000.0,
        }
    }

    /// 300 ms attack and decay, no hold.
    pub fn vu() -> Self {
        Self {
            attack_time_ms: 300.0,
            decay_time_ms: 300.0,
            hold_time_ms: 0.0,
        }
    }

    /// Instantaneous attack, 1700 ms decay, 500 ms hold.
    pub fn bbc_ppm() -> Self {
        Self {
            attack_time_ms: 0.0,
            decay_time_ms: 1700.0,
            hold_time_ms: 500.0,
        }
    }
}

impl Default for MeterBallistics {
    fn default() -> Self {
        // Instantaneous, no hold: tracks input directly.
        Self {
            attack_time_ms: 0.0,
            decay_time_ms: 0.0,
            hold_time_ms: 0.0,
        }
    }
}

fn smoothing_factor(elapsed_ms: f32, time_constant_ms: f32) -> f32 {
    if time_constant_ms <= 0.0 {
        1.0
    } else {
        1.0 - (-elapsed_ms / time_constant_ms).exp()
    }
}

/// A single ballistics-driven level meter, tracking a level expressed in dB.
pub struct LevelMeter {
    ballistics: MeterBallistics,
    current_db: f32,
    peak_hold_db: f32,
    ms_since_peak: f32,
    initialized: bool,
}

impl LevelMeter {
    pub fn new(ballistics: MeterBallistics) -> Self {
        Self {
            ballistics,
            current_db: f32::NEG_INFINITY,
            peak_hold_db: f32::NEG_INFINITY,
            ms_since_peak: 0.0,
            initialized: false,
        }
    }

    pub fn current_db(&self) -> f32 {
        self.current_db
    }

    pub fn peak_hold_db(&self) -> f32 {
        self.peak_hold_db
    }

    /// Advances the meter by `elapsed_ms` toward new instantaneous level
    /// `level_db`, applying attack/decay/hold per spec §4.9.
    pub fn update(&mut self, level_db: f32, elapsed_ms: f32) {
        if !self.initialized {
            self.current_db = level_db;
            self.peak_hold_db = level_db;
            self.initialized = true;
            return;
        }

        if level_db > self.current_db {
            let factor = smoothing_factor(elapsed_ms, self.ballistics.attack_time_ms);
            self.current_db += factor * (level_db - self.current_db);
        } else {
            let factor = smoothing_factor(elapsed_ms, self.ballistics.decay_time_ms);
            self.current_db += factor * (level_db - self.current_db);
        }

        if level_db > self.peak_hold_db {
            self.peak_hold_db = level_db;
            self.ms_since_peak = 0.0;
        } else {
            self.ms_since_peak += elapsed_ms;
            if self.ballistics.hold_time_ms > 0.0 && self.ms_since_peak > self.ballistics.hold_time_ms {
                let factor = smoothing_factor(elapsed_ms, self.ballistics.decay_time_ms);
                let target = level_db.max(self.current_db);
                self.peak_hold_db += factor * (target - self.peak_hold_db);
            }
        }
    }
}

pub fn pearson_correlation(left: &[f32], right: &[f32]) -> f32 {
    let n = left.len().min(right.len());
    if n == 0 {
        return 0.0;
    }
    let mut sum_lr = 0f64;
    let mut sum_l_sq = 0f64;
    let mut sum_r_sq = 0f64;
    for i in 0..n {
        let l = left[i] as f64;
        let r = right[i] as f64;
        sum_lr += l * r;
        sum_l_sq += l * l;
        sum_r_sq += r * r;
    }
    if sum_l_sq <= 0.0 || sum_r_sq <= 0.0 {
        return 0.0;
    }
    (sum_lr / (sum_l_sq.sqrt() * sum_r_sq.sqrt())) as f32
}

/// Pearson correlation of L/R over a rolling 1 s window.
pub struct CorrelationMeter {
    window: std::collections::VecDeque<(f32, f32)>,
    capacity: usize,
    correlation: AtomicFloat,
}

impl CorrelationMeter {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            window: std::collections::VecDeque::with_capacity(sample_rate as usize),
            capacity: sample_rate as usize,
            correlation: AtomicFloat::new(1.0),
        }
    }

    pub fn push_block(&mut self, left: &[f32], right: &[f32]) {
        for (&l, &r) in left.iter().zip(right.iter()) {
            if self.window.len() >= self.capacity {
                self.window.pop_front();
            }
            self.window.push_back((l, r));
        }
        let lefts: Vec<f32> = self.window.iter().map(|(l, _)| *l).collect();
        let rights: Vec<f32> = self.window.iter().map(|(_, r)| *r).collect();
        self.correlation.set(pearson_correlation(&lefts, &rights));
    }

    pub fn correlation(&self) -> f32 {
        self.correlation.get()
    }

    pub fn is_mono_compatible(&self) -> bool {
        self.correlation() > 0.5
    }

    pub fn has_phase_issue(&self) -> bool {
        self.correlation() < -0.5
    }
}

/// Per-channel bank of level meters (peak with digital-peak ballistics, RMS
/// with instantaneous ballistics) plus a correlation meter.
pub struct MeterBank {
    pub peak_left: LevelMeter,
    pub peak_right: LevelMeter,
    pub rms_left: LevelMeter,
    pub rms_right: LevelMeter,
    pub correlation: CorrelationMeter,
}

impl MeterBank {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            peak_left: LevelMeter::new(MeterBallistics::digital_peak()),
            peak_right: LevelMeter::new(MeterBallistics::digital_peak()),
            rms_left: LevelMeter::new(MeterBallistics::default()),
            rms_right: LevelMeter::new(MeterBallistics::default()),
            correlation: CorrelationMeter::new(sample_rate),
        }
    }

    pub fn update(&mut self, left: &[f32], right: &[f32], elapsed_ms: f32) {
        let peak_l = left.iter().fold(0f32, |acc, v| acc.max(v.abs()));
        let peak_r = right.iter().fold(0f32, |acc, v| acc.max(v.abs()));
        let rms_l = rms(left);
        let rms_r = rms(right);

        self.peak_left.update(amplitude_to_db(peak_l), elapsed_ms);
        self.peak_right.update(amplitude_to_db(peak_r), elapsed_ms);
        self.rms_left.update(amplitude_to_db(rms_l), elapsed_ms);
        self.rms_right.update(amplitude_to_db(rms_r), elapsed_ms);
        self.correlation.push_block(left, right);
    }
}

fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    ((sum_sq / samples.len() as f64).sqrt()) as f32
}

fn amplitude_to_db(amplitude: f32) -> f32 {
    if amplitude <= 0.0 {
        -144.0
    } else {
        20.0 * amplitude.log10()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mono_signal_has_unity_correlation() {
        let samples: Vec<f32> = (0..1000).map(|i| (i as f32 * 0.05).sin()).collect();
        let corr = pearson_correlation(&samples, &samples);
        assert!((corr - 1.0).abs() < 1e-4);
    }

    #[test]
    fn inverted_signal_has_negative_correlation() {
        let samples: Vec<f32> = (0..1000).map(|i| (i as f32 * 0.05).sin()).collect();
        let inverted: Vec<f32> = samples.iter().map(|v| -v).collect();
        let corr = pearson_correlation(&samples, &inverted);
        assert!((corr - (-1.0)).abs() < 1e-4);
    }

    #[test]
    fn digital_peak_meter_snaps_up_and_decays_slowly() {
        let mut meter = LevelMeter::new(MeterBallistics::digital_peak());
        meter.update(-20.0, 0.0);
        meter.update(0.0, 1.0);
        assert_eq!(meter.current_db(), 0.0); // instantaneous attack
        meter.update(-60.0, 1.0);
        assert!(meter.current_db() > -60.0); // decay is gradual, not instant
    }

    #[test]
    fn peak_hold_decays_after_hold_time_elapses() {
        let mut meter = LevelMeter::new(MeterBallistics::bbc_ppm());
        meter.update(-20.0, 0.0);
        meter.update(0.0, 1.0);
        assert_eq!(meter.peak_hold_db(), 0.0);
        meter.update(-20.0, 600.0); // beyond the 500ms hold window
        assert!(meter.peak_hold_db() < 0.0);
    }
}

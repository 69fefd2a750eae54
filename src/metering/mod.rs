//! Metering subsystem: C8 LoudnessAnalyzer, C9 MeterBank, C10 MonitoringHub.

pub mod hub;
pub mod loudness;
pub mod meter;

pub use hub::{MonitoringHub, MonitoringSnapshot, MonitoringTap};
pub use loudness::{LoudnessAnalyzer, LoudnessMeasurement, LoudnessTarget};
pub use meter::{CorrelationMeter, LevelMeter, MeterBallistics, MeterBank};

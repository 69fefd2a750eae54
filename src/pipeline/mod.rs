//! C6 — Pipeline: orchestrates the producer thread, mixer, FIFO and device
//! callback behind the state machine in [`state`].

pub mod device;
pub mod state;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::PipelineConfig;
use crate::error::{Error, LastError, Result};
use crate::fifo::{DeviceFifo, DeviceFifoProducer, FifoOverrunHandle};
use crate::frame::{AudioFrame, ChannelLayout, Timestamp};
use crate::metering::{LoudnessTarget, MonitoringHub, MonitoringSnapshot, MonitoringTap};
use crate::mixer::Mixer;
use crate::resample::Resampler;

pub use state::{PipelineEvent, PipelineState, PipelineStateCell, TransitionResult};

/// Bounded submitter buffer capacity, per spec §4.6.
const SUBMITTER_BUFFER_CAPACITY: usize = 8;
const WORKER_SLEEP: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PipelineStats {
    pub frames_processed: u64,
    pub samples_processed: u64,
    pub underruns: u64,
    pub overruns: u64,
    pub cpu_percent: f32,
    pub active_channels: u32,
    pub master_gain_db: f32,
    pub master_muted: bool,
}

#[derive(Default)]
struct AtomicStatCounters {
    frames_processed: AtomicU64,
    decode_errors: AtomicU64,
}

struct SubmitterBuffer {
    frames: Mutex<VecDeque<AudioFrame>>,
}

impl SubmitterBuffer {
    fn new() -> Self {
        Self {
            frames: Mutex::new(VecDeque::with_capacity(SUBMITTER_BUFFER_CAPACITY)),
        }
    }

    /// Returns `false` (dropping the frame) when the buffer is already at
    /// capacity — this is the pipeline's back-pressure point.
    fn push(&self, frame: AudioFrame) -> bool {
        let mut q = self.frames.lock();
        if q.len() >= SUBMITTER_BUFFER_CAPACITY {
            return false;
        }
        q.push_back(frame);
        true
    }

    fn drain(&self) -> Vec<AudioFrame> {
        let mut q = self.frames.lock();
        q.drain(..).collect()
    }
}

struct WorkerHandle {
    should_exit: Arc<std::sync::atomic::AtomicBool>,
    join: Option<JoinHandle<()>>,
}

pub struct Pipeline {
    config: PipelineConfig,
    mixer: Arc<Mixer>,
    internal_channel_id: u32,
    state: PipelineStateCell,
    submitter: Arc<SubmitterBuffer>,
    resampler: Arc<Mutex<Resampler>>,
    fifo_producer: Mutex<Option<DeviceFifoProducer>>,
    fifo_consumer: Mutex<Option<crate::fifo::DeviceFifoConsumer>>,
    fifo_overruns: FifoOverrunHandle,
    counters: Arc<AtomicStatCounters>,
    last_error: Mutex<LastError>,
    worker: Mutex<Option<WorkerHandle>>,
    /// Background loudness/meter analysis tee off the mixed signal, per
    /// spec §4.10. Lives for the whole lifetime of the pipeline object
    /// (not just while Playing) so `get_monitoring()` keeps returning the
    /// last-known snapshot across pause/stop/restart.
    monitoring: MonitoringHub,
    #[cfg(feature = "std")]
    device_stream: Mutex<Option<device::StreamHandle>>,
    #[cfg(feature = "std")]
    device_counters: Mutex<Option<Arc<device::DeviceCounters>>>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let mixer = Arc::new(Mixer::new(config.mixer_config()));
        let internal_channel_id = mixer.add_channel("pipeline", 0.0, 0.0);
        if internal_channel_id == 0 {
            return Err(Error::InvalidConfiguration(
                "mixer rejected the pipeline's internal channel".into(),
            ));
        }
        let (producer, consumer) = DeviceFifo::with_capacity(config.fifo_capacity());
        let fifo_overruns = producer.overrun_handle();
        let monitoring = MonitoringHub::new(config.sample_rate, LoudnessTarget::default());
        Ok(Self {
            config,
            mixer,
            internal_channel_id,
            state: PipelineStateCell::new(PipelineState::Uninitialized),
            submitter: Arc::new(SubmitterBuffer::new()),
            resampler: Arc::new(Mutex::new(Resampler::new())),
            fifo_producer: Mutex::new(Some(producer)),
            fifo_consumer: Mutex::new(Some(consumer)),
            fifo_overruns,
            counters: Arc::new(AtomicStatCounters::default()),
            last_error: Mutex::new(LastError::default()),
            worker: Mutex::new(None),
            monitoring,
            #[cfg(feature = "std")]
            device_stream: Mutex::new(None),
            #[cfg(feature = "std")]
            device_counters: Mutex::new(None),
        })
    }

    pub fn state(&self) -> PipelineState {
        self.state.load()
    }

    pub fn mixer(&self) -> &Arc<Mixer> {
        &self.mixer
    }

    fn fail(&self, err: Error) -> Error {
        self.last_error.lock().set(&err);
        err
    }

    pub fn initialize(&self) -> Result<()> {
        match self.state.transition(PipelineEvent::Initialize) {
            TransitionResult::Moved(_) => Ok(()),
            TransitionResult::Rejected(s) => Err(self.fail(Error::InvalidConfiguration(format!(
                "cannot initialize from state {s:?}"
            )))),
        }
    }

    /// Starts the worker thread and (when the `std` feature is on) the
    /// default output device stream.
    pub fn start_output(&self) -> Result<()> {
        match self.state.transition(PipelineEvent::StartOutput) {
            TransitionResult::Rejected(s) => {
                return Err(self.fail(Error::InvalidConfiguration(format!(
                    "cannot start output from state {s:?}"
                ))))
            }
            TransitionResult::Moved(_) => {}
        }

        if self.worker.lock().is_none() {
            self.spawn_worker();
        }

        #[cfg(feature = "std")]
        {
            if self.device_stream.lock().is_none() {
                if let Some(consumer) = self.take_fifo_consumer() {
                    match device::start_default_output_stream(consumer, self.config.channel_count) {
                        Ok((stream, counters)) => {
                            *self.device_stream.lock() = Some(stream);
                            *self.device_counters.lock() = Some(counters);
                        }
                        Err(e) => {
                            self.state.transition(PipelineEvent::Fault);
                            return Err(self.fail(e));
                        }
                    }
                }
            }
        }

        Ok(())
    }

    pub fn pause_output(&self) -> Result<()> {
        match self.state.transition(PipelineEvent::PauseOutput) {
            TransitionResult::Moved(_) => Ok(()),
            TransitionResult::Rejected(s) => Err(self.fail(Error::InvalidConfiguration(format!(
                "cannot pause from state {s:?}"
            )))),
        }
    }

    pub fn resume_output(&self) -> Result<()> {
        match self.state.transition(PipelineEvent::ResumeOutput) {
            TransitionResult::Moved(_) => Ok(()),
            TransitionResult::Rejected(s) => Err(self.fail(Error::InvalidConfiguration(format!(
                "cannot resume from state {s:?}"
            )))),
        }
    }

    pub fn stop_output(&self) -> Result<()> {
        match self.state.transition(PipelineEvent::StopOutput) {
            TransitionResult::Moved(_) => Ok(()),
            TransitionResult::Rejected(s) => Err(self.fail(Error::InvalidConfiguration(format!(
                "cannot stop from state {s:?}"
            )))),
        }
    }

    /// Idempotent: signals the worker to exit, joins it, drains the FIFO
    /// producer side and resets resampler state, then returns to
    /// Uninitialized regardless of the prior state.
    pub fn shutdown(&self) -> Result<()> {
        if let Some(mut handle) = self.worker.lock().take() {
            handle
                .should_exit
                .store(true, std::sync::atomic::Ordering::Release);
            if let Some(join) = handle.join.take() {
                let _ = join.join();
            }
        }
        #[cfg(feature = "std")]
        {
            *self.device_stream.lock() = None;
        }
        self.resampler.lock().reset();
        self.state.transition(PipelineEvent::Shutdown);
        Ok(())
    }

    fn take_fifo_consumer(&self) -> Option<crate::fifo::DeviceFifoConsumer> {
        // The producer/consumer pair is split at construction; the consumer
        // is handed to the device backend exactly once.
        self.fifo_consumer.lock().take()
    }

    fn spawn_worker(&self) {
        let should_exit = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let join = {
            let should_exit = should_exit.clone();
            let submitter = self.submitter.clone();
            let mixer = self.mixer.clone();
            let counters = self.counters.clone();
            let channel_id = self.internal_channel_id;
            let buffer_size = self.config.buffer_size;
            let device_rate = self.config.sample_rate;
            let device_channels = self.config.channel_count;
            let device_layout = ChannelLayout::from_channel_count(device_channels);
            let device_format = self.config.format;
            let tap = self.monitoring.tap();
            let resampler = self.resampler.clone();
            // SAFETY note: the producer is only ever touched by this worker
            // thread; it is taken out of the mutex once and moved in.
            let producer = self.fifo_producer.lock().take();
            std::thread::spawn(move || {
                let Some(mut producer) = producer else {
                    return;
                };
                while !should_exit.load(std::sync::atomic::Ordering::Acquire) {
                    let pending = submitter.drain();
                    if pending.is_empty() {
                        std::thread::sleep(WORKER_SLEEP);
                        continue;
                    }
                    // Each drained frame is mixed and emitted as its own
                    // output block — frames may arrive at any length (e.g.
                    // 480-sample decoder blocks against a 1024-sample
                    // `buffer_size`), and summing several sequential blocks
                    // into one shared accumulator would mix time-domain
                    // content that belongs in separate, ordered blocks.
                    for frame in &pending {
                        let frame_len = frame.sample_count() as usize;
                        mixer.clear_accumulator(frame_len);
                        if mixer.process_channel(channel_id, frame).is_err() {
                            counters.decode_errors.fetch_add(1, Ordering::Relaxed);
                            continue;
                        }
                        let mixed = match mixer.mix_to_output(Timestamp::ZERO, true) {
                            Ok(out) => out,
                            Err(_) => {
                                counters.decode_errors.fetch_add(1, Ordering::Relaxed);
                                continue;
                            }
                        };

                        let left: Vec<f32> =
                            (0..mixed.sample_count()).map(|i| mixed.sample(0, i)).collect();
                        let right: Vec<f32> = if mixed.channel_count() > 1 {
                            (0..mixed.sample_count()).map(|i| mixed.sample(1, i)).collect()
                        } else {
                            left.clone()
                        };
                        tap.push(&left, &right);

                        let converted = {
                            let mut r = resampler.lock();
                            r.convert(&mixed, device_rate, device_layout, device_format)
                        };
                        let converted = match converted {
                            Ok(c) => c,
                            Err(_) => {
                                counters.decode_errors.fetch_add(1, Ordering::Relaxed);
                                continue;
                            }
                        };

                        let mut interleaved =
                            Vec::with_capacity(converted.sample_count() as usize * device_channels as usize);
                        for i in 0..converted.sample_count() {
                            for c in 0..device_channels {
                                interleaved.push(converted.sample(c, i));
                            }
                        }
                        producer.write(&interleaved);
                    }
                    counters
                        .frames_processed
                        .fetch_add(pending.len() as u64, Ordering::Relaxed);

                    if producer.available_write() < buffer_size * device_channels as usize {
                        std::thread::sleep(WORKER_SLEEP);
                    }
                }
            })
        };
        *self.worker.lock() = Some(WorkerHandle {
            should_exit,
            join: Some(join),
        });
    }

    /// Submits a frame for mixing. Only valid while Playing or Paused;
    /// returns `NotRunning` otherwise with no side effects. The frame is
    /// appended to the bounded submitter buffer; the worker thread performs
    /// the actual `mixer.process_channel` call on its own cadence so the
    /// accumulator it mixes into always matches the worker's current block
    /// size.
    pub fn process_audio_frame(&self, frame: AudioFrame) -> Result<()> {
        match self.state.load() {
            PipelineState::Playing | PipelineState::Paused => {}
            _ => return Err(self.fail(Error::NotRunning)),
        }
        if !self.submitter.push(frame) {
            self.counters.decode_errors.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    pub fn get_stats(&self) -> PipelineStats {
        let mixer_stats = self.mixer.stats();
        let mixer_config = self.mixer.config();
        #[cfg(feature = "std")]
        let underruns = self
            .device_counters
            .lock()
            .as_ref()
            .map(|c| c.underruns.load(Ordering::Relaxed))
            .unwrap_or(0);
        #[cfg(not(feature = "std"))]
        let underruns = 0;
        PipelineStats {
            frames_processed: self.counters.frames_processed.load(Ordering::Relaxed),
            samples_processed: mixer_stats.samples_processed,
            underruns,
            overruns: self.fifo_overruns.overruns(),
            cpu_percent: 0.0,
            active_channels: mixer_stats.active_channels,
            master_gain_db: mixer_config.master_gain_db,
            master_muted: mixer_config.master_muted,
        }
    }

    /// Latest loudness/meter snapshot from the monitoring tee, per spec
    /// §6's `get_monitoring() -> { loudness, meters }` external interface.
    pub fn get_monitoring(&self) -> MonitoringSnapshot {
        self.monitoring.snapshot()
    }

    pub fn get_last_error(&self) -> Option<String> {
        self.last_error.lock().message().map(|s| s.to_string())
    }

    pub fn clear_error(&self) {
        self.last_error.lock().clear();
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

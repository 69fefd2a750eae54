//! Device callback wiring — cpal output stream reading from a [`DeviceFifoConsumer`].
//!
//! Grounded on the teacher's `output.rs`: a panic in the callback must never
//! bring down the audio thread (cpal has no way to propagate a panic back to
//! the host gracefully), so the body is wrapped in `catch_unwind` and falls
//! back to silence. The callback itself never allocates: the FIFO is read
//! directly into the host-provided buffer.

#![cfg(feature = "std")]

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Sample, SampleFormat as CpalSampleFormat};

use crate::error::{Error, Result};
use crate::fifo::DeviceFifoConsumer;

/// Wraps a `cpal::Stream`. cpal streams aren't `Send` on every platform
/// backend, but by construction we only ever touch this handle from the
/// thread that created it plus drop it from wherever `Pipeline` is dropped;
/// the OS audio thread drives the stream through its own callback, never
/// through this handle.
pub struct StreamHandle(pub cpal::Stream);
unsafe impl Send for StreamHandle {}

#[derive(Debug, Default)]
pub struct DeviceCounters {
    pub underruns: AtomicU64,
}

/// Opens the default output device and starts a stream that pulls samples
/// from `consumer`, padding any shortfall with silence and counting it as an
/// underrun.
pub fn start_default_output_stream(
    mut consumer: DeviceFifoConsumer,
    channels: u16,
) -> Result<(StreamHandle, Arc<DeviceCounters>)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::DeviceFailure("no default output device".into()))?;
    let supported = device.default_output_config()?;
    let format = supported.sample_format();
    let config = supported.config();

    let counters = Arc::new(DeviceCounters::default());
    let counters_cb = counters.clone();
    let err_fn = |err| eprintln!("audio stream error: {err}");

    let stream = match format {
        CpalSampleFormat::F32 => device.build_output_stream(
            &config,
            move |data: &mut [f32], _| run_callback(data, &mut consumer, &counters_cb, channels),
            err_fn,
            None,
        )?,
        CpalSampleFormat::I16 => {
            // Pre-sized once outside the callback: the host always calls
            // back with the same buffer length for a given stream, and the
            // callback itself must never allocate.
            let mut scratch = vec![0f32; max_buffer_frames(&config) * channels as usize];
            device.build_output_stream(
                &config,
                move |data: &mut [i16], _| {
                    let n = data.len().min(scratch.len());
                    run_callback(&mut scratch[..n], &mut consumer, &counters_cb, channels);
                    for (dst, src) in data[..n].iter_mut().zip(scratch[..n].iter()) {
                        *dst = i16::from_sample(*src);
                    }
                    for dst in &mut data[n..] {
                        *dst = 0;
                    }
                },
                err_fn,
                None,
            )?
        }
        CpalSampleFormat::U16 => {
            let mut scratch = vec![0f32; max_buffer_frames(&config) * channels as usize];
            device.build_output_stream(
                &config,
                move |data: &mut [u16], _| {
                    let n = data.len().min(scratch.len());
                    run_callback(&mut scratch[..n], &mut consumer, &counters_cb, channels);
                    for (dst, src) in data[..n].iter_mut().zip(scratch[..n].iter()) {
                        *dst = u16::from_sample(*src);
                    }
                    for dst in &mut data[n..] {
                        *dst = u16::from_sample(0f32);
                    }
                },
                err_fn,
                None,
            )?
        }
        other => {
            return Err(Error::DeviceFailure(format!(
                "unsupported sample format: {other:?}"
            )))
        }
    };

    stream.play()?;
    Ok((StreamHandle(stream), counters))
}

/// Upper bound on the number of frames the host will ever hand the callback
/// in one call, used to size the scratch buffer once at stream-build time.
/// Hosts that don't pin a fixed buffer size can still request arbitrarily
/// large callbacks; 8192 is generous for anything this pipeline targets and
/// `run_callback` clamps to whatever actually arrived.
fn max_buffer_frames(config: &cpal::StreamConfig) -> usize {
    match config.buffer_size {
        cpal::BufferSize::Fixed(n) => n as usize,
        cpal::BufferSize::Default => 8192,
    }
}

fn run_callback(
    data: &mut [f32],
    consumer: &mut DeviceFifoConsumer,
    counters: &DeviceCounters,
    _channels: u16,
) {
    let result = catch_unwind(AssertUnwindSafe(|| {
        let padded = consumer.read_or_silence(data);
        if padded > 0 {
            counters.underruns.fetch_add(padded as u64, Ordering::Relaxed);
        }
    }));
    if result.is_err() {
        // The callback panicked; leave the host with silence rather than
        // garbage or a half-written buffer.
        for s in data.iter_mut() {
            *s = 0.0;
        }
    }
}

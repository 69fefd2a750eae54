//! C5 — DeviceFifo: SPSC ring of device-format f32 samples.
//!
//! Exactly one producer (the pipeline worker) writes, exactly one consumer
//! (the device callback) reads. `read` never pads with silence — per spec
//! §4.4 that's the caller's responsibility — and `write` never blocks,
//! dropping what doesn't fit while bumping an overrun counter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapCons, HeapProd, HeapRb,
};

const MIN_CAPACITY: usize = 4096;

#[derive(Debug, Default)]
struct FifoCounters {
    samples_written: AtomicU64,
    samples_read: AtomicU64,
    overruns: AtomicU64,
    underrun_samples: AtomicU64,
}

pub struct DeviceFifoProducer {
    prod: HeapProd<f32>,
    counters: Arc<FifoCounters>,
}

/// Cheap, cloneable handle onto a FIFO's shared counters, so a caller that
/// moved the producer into a worker thread can still read `overruns()`
/// (e.g. for `PipelineStats`) without touching the producer itself.
#[derive(Clone)]
pub struct FifoOverrunHandle(Arc<FifoCounters>);

impl FifoOverrunHandle {
    pub fn overruns(&self) -> u64 {
        self.0.overruns.load(Ordering::Relaxed)
    }
}

pub struct DeviceFifoConsumer {
    cons: HeapCons<f32>,
    counters: Arc<FifoCounters>,
}

/// Builds a connected producer/consumer pair sized for `capacity` samples
/// (clamped to a sane minimum so a misconfigured tiny buffer doesn't thrash).
pub struct DeviceFifo;

impl DeviceFifo {
    pub fn with_capacity(capacity: usize) -> (DeviceFifoProducer, DeviceFifoConsumer) {
        let capacity = capacity.max(MIN_CAPACITY);
        let rb = HeapRb::<f32>::new(capacity);
        let (prod, cons) = rb.split();
        let counters = Arc::new(FifoCounters::default());
        (
            DeviceFifoProducer {
                prod,
                counters: counters.clone(),
            },
            DeviceFifoConsumer { cons, counters },
        )
    }
}

impl DeviceFifoProducer {
    pub fn capacity(&self) -> usize {
        self.prod.capacity().get()
    }

    pub fn overrun_handle(&self) -> FifoOverrunHandle {
        FifoOverrunHandle(self.counters.clone())
    }

    pub fn available_write(&self) -> usize {
        self.prod.vacant_len()
    }

    /// Writes as many samples from `samples` as fit; never blocks. Whatever
    /// doesn't fit is dropped and counted as an overrun (the producer is
    /// outpacing the consumer).
    pub fn write(&mut self, samples: &[f32]) -> usize {
        let mut written = 0usize;
        for &s in samples {
            if self.prod.try_push(s).is_ok() {
                written += 1;
            } else {
                let dropped = (samples.len() - written) as u64;
                self.counters.overruns.fetch_add(dropped, Ordering::Relaxed);
                break;
            }
        }
        self.counters
            .samples_written
            .fetch_add(written as u64, Ordering::Relaxed);
        written
    }
}

unsafe impl Send for DeviceFifoProducer {}

impl DeviceFifoConsumer {
    pub fn available_read(&self) -> usize {
        self.cons.occupied_len()
    }

    /// Reads up to `dst.len()` samples, returning how many were actually
    /// read. Callers (the device callback) must pad the remainder of `dst`
    /// with silence themselves and count it as an underrun.
    pub fn read(&mut self, dst: &mut [f32]) -> usize {
        let mut read = 0usize;
        for slot in dst.iter_mut() {
            match self.cons.try_pop() {
                Some(s) => {
                    *slot = s;
                    read += 1;
                }
                None => break,
            }
        }
        self.counters
            .samples_read
            .fetch_add(read as u64, Ordering::Relaxed);
        if read < dst.len() {
            self.counters
                .underrun_samples
                .fetch_add((dst.len() - read) as u64, Ordering::Relaxed);
        }
        read
    }

    /// Fills `dst` from the FIFO, padding any shortfall with `0.0` per the
    /// device callback contract (§4.6). Returns the number of samples that
    /// had to be padded.
    pub fn read_or_silence(&mut self, dst: &mut [f32]) -> usize {
        let read = self.read(dst);
        for slot in &mut dst[read..] {
            *slot = 0.0;
        }
        dst.len() - read
    }

    pub fn samples_written(&self) -> u64 {
        self.counters.samples_written.load(Ordering::Relaxed)
    }

    pub fn samples_read(&self) -> u64 {
        self.counters.samples_read.load(Ordering::Relaxed)
    }

    pub fn overruns(&self) -> u64 {
        self.counters.overruns.load(Ordering::Relaxed)
    }

    pub fn underrun_samples(&self) -> u64 {
        self.counters.underrun_samples.load(Ordering::Relaxed)
    }
}

unsafe impl Send for DeviceFifoConsumer {}
unsafe impl Sync for DeviceFifoConsumer {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let (mut prod, mut cons) = DeviceFifo::with_capacity(4096);
        let samples: Vec<f32> = (0..100).map(|i| i as f32).collect();
        assert_eq!(prod.write(&samples), 100);
        let mut dst = vec![0.0; 100];
        assert_eq!(cons.read(&mut dst), 100);
        assert_eq!(dst, samples);
    }

    #[test]
    fn overrun_is_counted() {
        let (mut prod, _cons) = DeviceFifo::with_capacity(4096);
        let samples = vec![1.0f32; 5000];
        let written = prod.write(&samples);
        assert!(written < 5000);
        assert!(prod.counters.overruns.load(Ordering::Relaxed) > 0);
    }

    #[test]
    fn underrun_pads_with_silence() {
        let (mut prod, mut cons) = DeviceFifo::with_capacity(4096);
        prod.write(&[1.0, 2.0, 3.0]);
        let mut dst = vec![9.0; 10];
        let padded = cons.read_or_silence(&mut dst);
        assert_eq!(padded, 7);
        assert_eq!(&dst[0..3], &[1.0, 2.0, 3.0]);
        assert_eq!(&dst[3..], &[0.0; 7]);
        assert_eq!(cons.underrun_samples(), 7);
    }

    #[test]
    fn conservation_property() {
        let (mut prod, mut cons) = DeviceFifo::with_capacity(8192);
        let samples = vec![0.5f32; 2000];
        prod.write(&samples);
        let mut dst = vec![0.0; 1500];
        cons.read(&mut dst);
        let size_at_end = cons.available_read() as u64;
        assert_eq!(
            cons.samples_written(),
            cons.samples_read() + size_at_end + prod.counters.overruns.load(Ordering::Relaxed)
        );
    }
}

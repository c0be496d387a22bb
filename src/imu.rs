//! Fixed-capacity FIFO of inertial samples.
//!
//! Per §5 of the spec this is the one object shared across threads: the
//! ingest collaborator pushes samples, the orchestrator reads them. A
//! single [`std::sync::Mutex`] around the ring buffer is sufficient since
//! contention is microsecond-scale — mirrors `align3d::memory`'s
//! recycle-buffer discipline (fixed-size storage reused in place) applied
//! here to a FIFO instead of scratch arrays.

use nalgebra::Vector3;
use std::collections::VecDeque;
use std::sync::Mutex;

/// One inertial measurement: linear acceleration and angular velocity.
#[derive(Clone, Copy, Debug)]
pub struct ImuSample {
    pub t: f64,
    pub accel: Vector3<f64>,
    pub gyro: Vector3<f64>,
}

/// Fixed-capacity FIFO of [`ImuSample`]s, oldest first.
pub struct ImuQueue {
    capacity: usize,
    buf: VecDeque<ImuSample>,
}

impl ImuQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            buf: VecDeque::with_capacity(capacity),
        }
    }

    pub fn size(&self) -> usize {
        self.buf.len()
    }

    pub fn full(&self) -> bool {
        self.buf.len() >= self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn latest(&self) -> Option<&ImuSample> {
        self.buf.back()
    }

    /// Pushes a sample. Returns `false` (and drops the sample) if its
    /// timestamp does not strictly increase over the last one — the
    /// out-of-order case the ingest collaborator is responsible for
    /// filtering, re-checked here defensively.
    pub fn add(&mut self, sample: ImuSample) -> bool {
        if let Some(last) = self.buf.back() {
            if sample.t <= last.t {
                return false;
            }
        }

        if self.buf.len() == self.capacity {
            self.buf.pop_front();
        }
        self.buf.push_back(sample);
        true
    }

    /// Mean acceleration of the oldest `k` samples, used at init to estimate gravity.
    pub fn calc_mean(&self, k: usize) -> Option<Vector3<f64>> {
        if self.buf.is_empty() || k == 0 {
            return None;
        }
        let k = k.min(self.buf.len());
        let sum: Vector3<f64> = self.buf.iter().take(k).map(|s| s.accel).sum();
        Some(sum / k as f64)
    }

    /// Samples with `t0 <= t <= t1`, oldest first.
    pub fn samples_in_range(&self, t0: f64, t1: f64) -> Vec<ImuSample> {
        self.buf
            .iter()
            .filter(|s| s.t >= t0 && s.t <= t1)
            .copied()
            .collect()
    }

    /// Linearly interpolates (accel, gyro) at time `t`. Clamps (zero-order
    /// hold) when `t` falls outside the buffered range; returns zeros when
    /// the queue is empty.
    pub fn interpolate(&self, t: f64) -> (Vector3<f64>, Vector3<f64>) {
        if self.buf.is_empty() {
            return (Vector3::zeros(), Vector3::zeros());
        }
        if self.buf.len() == 1 || t <= self.buf.front().unwrap().t {
            let s = self.buf.front().unwrap();
            return (s.accel, s.gyro);
        }
        if t >= self.buf.back().unwrap().t {
            let s = self.buf.back().unwrap();
            return (s.accel, s.gyro);
        }

        for window in self.buf.as_slices().0.windows(2) {
            let (a, b) = (window[0], window[1]);
            if a.t <= t && t <= b.t {
                let span = b.t - a.t;
                let w = if span > 0.0 { (t - a.t) / span } else { 0.0 };
                let accel = a.accel * (1.0 - w) + b.accel * w;
                let gyro = a.gyro * (1.0 - w) + b.gyro * w;
                return (accel, gyro);
            }
        }
        // `VecDeque::as_slices` can split the contiguous region; fall back to a
        // linear scan over a materialized view if the window above missed the
        // split point.
        let linear: Vec<&ImuSample> = self.buf.iter().collect();
        for window in linear.windows(2) {
            let (a, b) = (window[0], window[1]);
            if a.t <= t && t <= b.t {
                let span = b.t - a.t;
                let w = if span > 0.0 { (t - a.t) / span } else { 0.0 };
                let accel = a.accel * (1.0 - w) + b.accel * w;
                let gyro = a.gyro * (1.0 - w) + b.gyro * w;
                return (accel, gyro);
            }
        }
        let s = self.buf.back().unwrap();
        (s.accel, s.gyro)
    }
}

/// Mutex-guarded [`ImuQueue`] for the ingest-thread / orchestrator-thread boundary.
pub struct SharedImuQueue(Mutex<ImuQueue>);

impl SharedImuQueue {
    pub fn new(capacity: usize) -> Self {
        Self(Mutex::new(ImuQueue::new(capacity)))
    }

    pub fn push(&self, sample: ImuSample) -> bool {
        self.0.lock().unwrap().add(sample)
    }

    pub fn with_queue<R>(&self, f: impl FnOnce(&ImuQueue) -> R) -> R {
        f(&self.0.lock().unwrap())
    }
}

//! Incremental mean/covariance accumulation for small point sets.
//!
//! Used both for the sweep-side cell statistics ([`crate::grid`]) and the
//! pano-side window statistics gathered during grid-to-pano matching
//! ([`crate::pano::DepthPano::mean_covar_at`]). The update rule is
//! Welford's online algorithm generalized to vectors, which
//! is numerically stable and, critically, invariant to the order in which
//! points are added (§8 of the spec requires this to 1e-5 tolerance).

use nalgebra::{Matrix3, Vector3};

/// Running mean and (co-)variance of a stream of 3D points.
#[derive(Clone, Copy, Debug)]
pub struct MeanCovar3 {
    n: usize,
    mean: Vector3<f32>,
    m2: Matrix3<f32>,
}

impl Default for MeanCovar3 {
    fn default() -> Self {
        Self::new()
    }
}

impl MeanCovar3 {
    pub fn new() -> Self {
        Self {
            n: 0,
            mean: Vector3::zeros(),
            m2: Matrix3::zeros(),
        }
    }

    pub fn count(&self) -> usize {
        self.n
    }

    /// Adds a point to the accumulator.
    pub fn add(&mut self, point: &Vector3<f32>) {
        self.n += 1;
        let delta = point - self.mean;
        self.mean += delta / self.n as f32;
        let delta2 = point - self.mean;
        self.m2 += delta * delta2.transpose();
    }

    /// Merges another accumulator into this one (Chan et al. parallel variance formula).
    pub fn merge(&mut self, other: &Self) {
        if other.n == 0 {
            return;
        }
        if self.n == 0 {
            *self = *other;
            return;
        }

        let n_a = self.n as f32;
        let n_b = other.n as f32;
        let n_ab = n_a + n_b;
        let delta = other.mean - self.mean;

        let mean = self.mean + delta * (n_b / n_ab);
        let m2 = self.m2 + other.m2 + delta * delta.transpose() * (n_a * n_b / n_ab);

        self.n += other.n;
        self.mean = mean;
        self.m2 = m2;
    }

    pub fn mean(&self) -> Vector3<f32> {
        self.mean
    }

    /// Sample covariance (Bessel-corrected). Only meaningful for `n >= 2`.
    pub fn covar(&self) -> Matrix3<f32> {
        if self.n < 2 {
            return Matrix3::zeros();
        }
        self.m2 / (self.n - 1) as f32
    }

    /// Whether there are enough points for the covariance to be meaningful.
    pub fn is_valid(&self, min_pts: usize) -> bool {
        self.n >= min_pts.max(2)
    }
}

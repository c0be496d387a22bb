//! Image-shaped containers for one LiDAR revolution (sweep) and the
//! column slice of it carried by a single incoming message (scan).
//!
//! Grounded on `align3d::range_image::structure::RangeImage`'s use of a
//! `ndarray::Array3` for the point grid and an `Array2` validity mask,
//! generalized here from a one-shot depth image to a ring-buffered sweep
//! that is mutated in place, column slice by column slice.

use ndarray::Array3;
use std::ops::Range;

use crate::transform::Pose3F32;
use crate::trajectory::Trajectory;

/// A column slice of one revolution, as delivered by the ingest collaborator.
///
/// `pixels` has shape `(height, width, 4)` with channels `(x, y, z, range)`;
/// `range <= 0` marks an invalid beam return.
pub struct LidarScan {
    pub pixels: Array3<f32>,
    pub col_range: Range<usize>,
    pub t0: f64,
    pub dt: f64,
}

impl LidarScan {
    pub fn width(&self) -> usize {
        self.pixels.shape()[1]
    }

    pub fn height(&self) -> usize {
        self.pixels.shape()[0]
    }

    /// Timestamp of column `c` (a column index into this scan, not the sweep).
    pub fn time_at_col(&self, c: usize) -> f64 {
        self.t0 + c as f64 * self.dt
    }

    pub fn range_at(&self, row: usize, col: usize) -> f32 {
        self.pixels[(row, col, 3)]
    }
}

/// Full-width accumulator covering one revolution. Allocated once at init
/// (sized from sensor geometry) and mutated in place every scan.
pub struct LidarSweep {
    pixels: Array3<f32>,
    width: usize,
    height: usize,
    /// Pose mapping a point in sensor frame, sampled at column `c`'s time,
    /// into the current panorama frame.
    tf_p_s: Vec<Pose3F32>,
    times: Vec<f64>,
    pub curr: Range<usize>,
    pub t0: f64,
    pub dt: f64,
}

impl LidarSweep {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            pixels: Array3::zeros((height, width, 4)),
            width,
            height,
            tf_p_s: vec![Pose3F32::identity(); width],
            times: vec![0.0; width],
            curr: 0..0,
            t0: 0.0,
            dt: 0.0,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn full(&self) -> bool {
        self.curr.end >= self.width
    }

    pub fn range_at(&self, row: usize, col: usize) -> f32 {
        self.pixels[(row, col, 3)]
    }

    pub fn point_at(&self, row: usize, col: usize) -> nalgebra::Vector3<f32> {
        nalgebra::Vector3::new(
            self.pixels[(row, col, 0)],
            self.pixels[(row, col, 1)],
            self.pixels[(row, col, 2)],
        )
    }

    pub fn pose_at(&self, col: usize) -> Pose3F32 {
        self.tf_p_s[col]
    }

    pub fn time_at(&self, col: usize) -> f64 {
        self.times[col]
    }

    /// Copies the scan's pixel slab into the sweep at `scan.col_range`, and
    /// updates `t0`/`dt`/`curr` from the scan. Fails only on a size mismatch.
    pub fn add(&mut self, scan: &LidarScan) -> Result<(), crate::error::OdomError> {
        if scan.height() != self.height {
            return Err(crate::error::OdomError::SizeMismatch {
                expected: (self.width, self.height),
                got: (scan.width(), scan.height()),
            });
        }
        if scan.col_range.end > self.width || scan.col_range.start >= scan.col_range.end {
            return Err(crate::error::OdomError::SizeMismatch {
                expected: (self.width, self.height),
                got: (scan.width(), scan.height()),
            });
        }

        for (local_c, c) in scan.col_range.clone().enumerate() {
            for r in 0..self.height {
                for ch in 0..4 {
                    self.pixels[(r, c, ch)] = scan.pixels[(r, local_c, ch)];
                }
            }
            self.times[c] = scan.time_at_col(local_c);
        }

        self.t0 = scan.t0;
        self.dt = scan.dt;
        self.curr = scan.col_range.clone();

        Ok(())
    }

    /// Fills `tf_p_s[c]` for every column in `curr` by interpolating between
    /// the trajectory knots bracketing that column's timestamp. Rotation is
    /// lerp-then-normalize (not slerp), translation is linear, per spec.
    /// `grain_size` selects fork-join granularity (0 = sequential).
    pub fn interp(&mut self, traj: &Trajectory, grain_size: usize) {
        let cols: Vec<usize> = self.curr.clone().collect();
        let times = &self.times;
        let compute = |c: usize| -> Pose3F32 { traj.pose_at_time(times[c]) };

        if grain_size == 0 {
            for &c in &cols {
                self.tf_p_s[c] = compute(c);
            }
        } else {
            use rayon::prelude::*;
            let results: Vec<(usize, Pose3F32)> = cols
                .par_chunks(grain_size.max(1))
                .flat_map(|chunk| chunk.iter().map(|&c| (c, compute(c))).collect::<Vec<_>>())
                .collect();
            for (c, pose) in results {
                self.tf_p_s[c] = pose;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector6;

    fn make_scan(width: usize, height: usize, start: usize, range_value: f32) -> LidarScan {
        let mut pixels = Array3::zeros((height, width, 4));
        for r in 0..height {
            for c in 0..width {
                pixels[(r, c, 0)] = 1.0;
                pixels[(r, c, 3)] = range_value;
            }
        }
        LidarScan {
            pixels,
            col_range: start..start + width,
            t0: start as f64 * 0.001,
            dt: 0.001,
        }
    }

    #[test]
    fn add_copies_slab_into_sweep_columns() {
        let mut sweep = LidarSweep::new(8, 4);
        let scan = make_scan(4, 4, 2, 5.0);
        sweep.add(&scan).unwrap();

        assert_eq!(sweep.curr, 2..6);
        for c in 2..6 {
            for r in 0..4 {
                assert_eq!(sweep.range_at(r, c), 5.0);
            }
        }
        assert_eq!(sweep.range_at(0, 0), 0.0);
    }

    #[test]
    fn add_rejects_height_mismatch() {
        let mut sweep = LidarSweep::new(8, 4);
        let scan = make_scan(4, 2, 0, 5.0);
        assert!(sweep.add(&scan).is_err());
    }

    #[test]
    fn interp_matches_trajectory_pose_at_column_time() {
        let mut sweep = LidarSweep::new(4, 2);
        let scan = make_scan(4, 2, 0, 3.0);
        sweep.add(&scan).unwrap();

        let mut traj = Trajectory::new(9.8);
        traj.push_knot(Pose3F32::identity().to_f64(), nalgebra::Vector3::zeros(), 0.0);
        traj.push_knot(
            crate::transform::Pose3F64::exp(&Vector6::new(0.0, 0.0, 0.0, 4.0, 0.0, 0.0)),
            nalgebra::Vector3::zeros(),
            0.01,
        );

        sweep.interp(&traj, 0);

        let pose_start = sweep.pose_at(0);
        let pose_end = sweep.pose_at(3);
        assert!(pose_start.translation().norm() < pose_end.translation().norm());
    }
}

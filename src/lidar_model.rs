//! Projective model mapping 3D points in the sensor frame to panoramic
//! (row, column) pixels and back.
//!
//! Generalizes `align3d::camera::Camera`'s pinhole `backproject`/`project`
//! pair to the azimuth/elevation parameterization a rotating LiDAR needs:
//! columns are uniform in azimuth over the horizontal FOV, rows are
//! uniform in elevation over the vertical FOV.

use nalgebra::Vector3;
use std::f32::consts::TAU;

/// Image size and field-of-view for the panoramic projection shared by the
/// sweep, the grid and the pano.
#[derive(Clone, Debug)]
pub struct LidarModel {
    width: usize,
    height: usize,
    hfov: f32,
    vfov: f32,
    /// Per-row elevation angle, precomputed, row 0 = top (most positive elevation).
    elevations: Vec<f32>,
    elevation_step: f32,
}

impl LidarModel {
    /// Builds a model for a `width x height` image covering `vfov` radians
    /// of elevation (uniformly split around 0) and `hfov` radians of azimuth
    /// (column 0 at azimuth 0, increasing with column index).
    pub fn new(width: usize, height: usize, hfov: f32, vfov: f32) -> Self {
        assert!(width > 0 && height > 0);

        let elevation_step = if height > 1 {
            vfov / (height - 1) as f32
        } else {
            0.0
        };
        let elevations: Vec<f32> = (0..height)
            .map(|row| vfov / 2.0 - row as f32 * elevation_step)
            .collect();

        Self {
            width,
            height,
            hfov,
            vfov,
            elevations,
            elevation_step,
        }
    }

    /// Convenience constructor with the default full-circle horizontal FOV.
    pub fn with_vfov(width: usize, height: usize, vfov: f32) -> Self {
        Self::new(width, height, TAU, vfov)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn vfov(&self) -> f32 {
        self.vfov
    }

    fn azimuth_step(&self) -> f32 {
        self.hfov / self.width as f32
    }

    fn azimuth_of_col(&self, col: usize) -> f32 {
        col as f32 * self.azimuth_step()
    }

    fn elevation_of_row(&self, row: usize) -> f32 {
        self.elevations[row]
    }

    /// Projects a 3D point (with precomputed range `r`) into (column, row).
    /// Returns `None` if the elevation falls outside the covered band.
    pub fn forward(&self, x: f32, y: f32, z: f32, r: f32) -> Option<(usize, usize)> {
        if !(r > 0.0) {
            return None;
        }

        let azimuth = y.atan2(x).rem_euclid(TAU);
        let col = ((azimuth / self.azimuth_step()).round() as i64).rem_euclid(self.width as i64)
            as usize;

        let elevation = (z / r).clamp(-1.0, 1.0).asin();
        if elevation > self.vfov / 2.0 || elevation < -self.vfov / 2.0 {
            return None;
        }

        let row = if self.elevation_step.abs() < f32::EPSILON {
            0
        } else {
            (((self.vfov / 2.0 - elevation) / self.elevation_step).round() as i64)
                .clamp(0, self.height as i64 - 1) as usize
        };

        Some((col, row))
    }

    /// Projects a 3D point, computing its range internally.
    pub fn forward_point(&self, p: &Vector3<f32>) -> Option<(usize, usize)> {
        self.forward(p.x, p.y, p.z, p.norm())
    }

    /// Recovers the 3D direction (scaled by `r`) at the center of pixel `(row, col)`.
    pub fn backward(&self, row: usize, col: usize, r: f32) -> Vector3<f32> {
        let azimuth = self.azimuth_of_col(col);
        let elevation = self.elevation_of_row(row);

        let horizontal = r * elevation.cos();
        Vector3::new(
            horizontal * azimuth.cos(),
            horizontal * azimuth.sin(),
            r * elevation.sin(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1024, 64, 45f32)]
    #[case(512, 32, 33.2f32)]
    #[case(2048, 128, 90f32)]
    fn backward_then_forward_round_trips_across_geometries(
        #[case] width: usize,
        #[case] height: usize,
        #[case] vfov_deg: f32,
    ) {
        let model = LidarModel::with_vfov(width, height, vfov_deg.to_radians());
        let mid_row = height / 2;
        let mid_col = width / 2;
        let p = model.backward(mid_row, mid_col, 4.0);
        let (col, row) = model.forward_point(&p).expect("mid-band point stays in band");
        assert_eq!((col, row), (mid_col, mid_row));
    }

    #[test]
    fn backward_then_forward_is_exact_at_pixel_centers() {
        let model = LidarModel::with_vfov(1024, 64, 45f32.to_radians());

        for row in [0usize, 1, 31, 32, 63] {
            for col in [0usize, 1, 255, 512, 1023] {
                let p = model.backward(row, col, 5.0);
                let (got_col, got_row) = model.forward_point(&p).expect("in-band point");
                assert_eq!((got_col, got_row), (col, row), "row={row} col={col}");
            }
        }
    }

    #[test]
    fn forward_then_backward_recovers_direction_within_a_pixel() {
        let model = LidarModel::with_vfov(1024, 64, 45f32.to_radians());
        let r = 7.3f32;
        let dir = Vector3::new(0.6, 0.3, 0.2).normalize() * r;

        let (col, row) = model.forward_point(&dir).expect("in-band point");
        let recovered = model.backward(row, col, r);

        let angle = (dir.normalize().dot(&recovered.normalize())).clamp(-1.0, 1.0).acos();
        // One pixel of azimuth or elevation, whichever is larger, as the angular tolerance.
        let tol = (model.azimuth_step()).max(model.elevation_step);
        assert!(angle <= tol, "angle {angle} exceeds pixel tolerance {tol}");
    }

    #[test]
    fn out_of_band_elevation_returns_none() {
        let model = LidarModel::with_vfov(1024, 64, 10f32.to_radians());
        // Straight up: elevation = 90 deg, well outside a 10 deg band.
        assert_eq!(model.forward(0.0, 0.0, 1.0, 1.0), None);
    }

    #[test]
    fn invalid_range_returns_none() {
        let model = LidarModel::with_vfov(1024, 64, 45f32.to_radians());
        assert_eq!(model.forward(1.0, 0.0, 0.0, 0.0), None);
        assert_eq!(model.forward(1.0, 0.0, 0.0, -1.0), None);
    }
}

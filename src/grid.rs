//! Coarsened feature map over a sweep: each cell summarizes a small
//! column x row window of the sweep with a planarity score and a 3D
//! mean-covariance, then (once matched) the corresponding panorama-side
//! statistics and the square-root information matrix GICP needs.
//!
//! Grounded on `align3d::range_image::structure::RangeImage` for the
//! "points as an `Array3`, validity as a side array" shape, coarsened
//! here into per-cell aggregates instead of per-pixel ones. The grid
//! geometry (`size`, `Sweep2Grid`/`Grid2Sweep`, `pano_win_size`) follows
//! the shapes exercised by `original_source/sv/llol/grid_test.cpp`.

use nalgebra::{Matrix3, Vector3};
use std::ops::Range;

use crate::lidar_model::LidarModel;
use crate::mean_covar::MeanCovar3;
use crate::pano::DepthPano;
use crate::sweep::LidarScan;
use crate::trajectory::Trajectory;
use crate::transform::Pose3F32;

#[derive(Clone, Debug)]
pub struct GridConfig {
    pub cell_cols: usize,
    pub cell_rows: usize,
    pub pano_win_half_rows: usize,
    pub pano_win_half_cols: usize,
    pub max_curve: f32,
    pub min_pts: usize,
    pub range_ratio: f32,
    /// `match.min_dist`: candidate cells whose projected pano range falls
    /// below this are skipped (near-range returns are noisier).
    pub min_dist: f32,
    pub lambda: f32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            cell_cols: 16,
            cell_rows: 2,
            pano_win_half_rows: 2,
            pano_win_half_cols: 4,
            max_curve: 0.01,
            min_pts: 5,
            range_ratio: 0.1,
            min_dist: 2.0,
            lambda: 1e-6,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchState {
    Unmatched,
    Candidate,
    Matched,
}

#[derive(Clone, Debug)]
pub struct GridCell {
    pub score: f32,
    pub state: MatchState,
    pub mc_s: MeanCovar3,
    pub mc_p: MeanCovar3,
    pub pano_pixel: Option<(usize, usize)>,
    pub sqrt_info: Option<Matrix3<f32>>,
}

impl Default for GridCell {
    fn default() -> Self {
        Self {
            score: f32::NAN,
            state: MatchState::Unmatched,
            mc_s: MeanCovar3::new(),
            mc_p: MeanCovar3::new(),
            pano_pixel: None,
            sqrt_info: None,
        }
    }
}

/// Coarse mapping at `(sweep_width / cell_cols) x (sweep_height / cell_rows)`
/// resolution, mirroring the sweep's `curr` column range at that coarser
/// scale.
pub struct SweepGrid {
    sweep_width: usize,
    sweep_height: usize,
    grid_width: usize,
    grid_height: usize,
    config: GridConfig,
    cells: Vec<GridCell>,
    poses: Vec<Pose3F32>,
    pub col_rg: Range<usize>,
    pub t0: f64,
    pub dt: f64,
}

impl SweepGrid {
    pub fn new(sweep_width: usize, sweep_height: usize, config: GridConfig) -> Self {
        let grid_width = sweep_width / config.cell_cols;
        let grid_height = sweep_height / config.cell_rows;
        Self {
            sweep_width,
            sweep_height,
            grid_width,
            grid_height,
            cells: vec![GridCell::default(); grid_width * grid_height],
            poses: vec![Pose3F32::identity(); grid_width],
            col_rg: 0..0,
            t0: 0.0,
            dt: 0.0,
            config,
        }
    }

    pub fn size(&self) -> (usize, usize) {
        (self.grid_width, self.grid_height)
    }

    pub fn total(&self) -> usize {
        self.grid_width * self.grid_height
    }

    pub fn full(&self) -> bool {
        self.col_rg.end >= self.grid_width
    }

    pub fn pano_win_size(&self) -> (usize, usize) {
        (
            2 * self.config.pano_win_half_rows + 1,
            2 * self.config.pano_win_half_cols + 1,
        )
    }

    pub fn sweep_to_grid(&self, sweep_col: usize, sweep_row: usize) -> (usize, usize) {
        (sweep_col / self.config.cell_cols, sweep_row / self.config.cell_rows)
    }

    pub fn grid_to_sweep(&self, grid_col: usize, grid_row: usize) -> (usize, usize) {
        (grid_col * self.config.cell_cols, grid_row * self.config.cell_rows)
    }

    fn cell_index(&self, col: usize, row: usize) -> usize {
        row * self.grid_width + col
    }

    pub fn cell(&self, col: usize, row: usize) -> &GridCell {
        &self.cells[self.cell_index(col, row)]
    }

    pub fn pose_at(&self, col: usize) -> Pose3F32 {
        self.poses[col]
    }

    fn col_time(&self, grid_col: usize) -> f64 {
        self.t0 + grid_col as f64 * self.dt
    }

    /// Per-row planarity score over a cell's full column width: mean
    /// relative radial deviation from the window's mean range. NaN if any
    /// beam in the window is invalid (unscored, not merely "bad").
    fn score_cell(&self, scan: &LidarScan, grid_col: usize, grid_row: usize) -> f32 {
        let (sweep_col0, sweep_row0) = self.grid_to_sweep(grid_col, grid_row);
        let mid_row = sweep_row0 + self.config.cell_rows / 2;
        if mid_row >= scan.height() {
            return f32::NAN;
        }

        let local_col0 = sweep_col0 - scan.col_range.start;
        let mut ranges = Vec::with_capacity(self.config.cell_cols);
        for c in 0..self.config.cell_cols {
            let local_col = local_col0 + c;
            if local_col >= scan.width() {
                return f32::NAN;
            }
            let r = scan.range_at(mid_row, local_col);
            if !(r > 0.0) {
                return f32::NAN;
            }
            ranges.push(r);
        }

        let mean: f32 = ranges.iter().sum::<f32>() / ranges.len() as f32;
        if mean <= 0.0 {
            return f32::NAN;
        }
        ranges.iter().map(|r| (r - mean).abs() / mean).sum::<f32>() / ranges.len() as f32
    }

    fn accumulate_cell(&self, scan: &LidarScan, grid_col: usize, grid_row: usize) -> MeanCovar3 {
        let (sweep_col0, sweep_row0) = self.grid_to_sweep(grid_col, grid_row);
        let local_col0 = sweep_col0 - scan.col_range.start;

        let mut mc = MeanCovar3::new();
        for r in 0..self.config.cell_rows {
            let row = sweep_row0 + r;
            if row >= scan.height() {
                continue;
            }
            for c in 0..self.config.cell_cols {
                let local_col = local_col0 + c;
                if local_col >= scan.width() {
                    continue;
                }
                if scan.range_at(row, local_col) > 0.0 {
                    let p = Vector3::new(
                        scan.pixels[(row, local_col, 0)],
                        scan.pixels[(row, local_col, 1)],
                        scan.pixels[(row, local_col, 2)],
                    );
                    mc.add(&p);
                }
            }
        }
        mc
    }

    /// Scores every grid cell covered by `scan`'s column range. Returns the
    /// number of cells with a computable (non-NaN) score.
    pub fn score(&mut self, scan: &LidarScan) -> usize {
        let (grid_col0, _) = self.sweep_to_grid(scan.col_range.start, 0);
        let (grid_col1, _) = self.sweep_to_grid(scan.col_range.end, 0);

        let mut n_valid = 0;
        for gc in grid_col0..grid_col1 {
            for gr in 0..self.grid_height {
                let score = self.score_cell(scan, gc, gr);
                let idx = self.cell_index(gc, gr);
                self.cells[idx].score = score;
                if score.is_finite() {
                    n_valid += 1;
                }
            }
        }
        self.col_rg = grid_col0..grid_col1;
        n_valid
    }

    /// Accumulates each scored cell's sweep-side mean-covariance and
    /// classifies it `Candidate` (score <= max_curve and enough points) or
    /// `Unmatched`. Returns the number of good cells.
    pub fn filter(&mut self, scan: &LidarScan) -> usize {
        let (grid_col0, grid_col1) = (self.col_rg.start, self.col_rg.end);
        let mut n_good = 0;
        for gc in grid_col0..grid_col1 {
            for gr in 0..self.grid_height {
                let mc = self.accumulate_cell(scan, gc, gr);
                let idx = self.cell_index(gc, gr);
                let good = self.cells[idx].score.is_finite()
                    && self.cells[idx].score <= self.config.max_curve
                    && mc.is_valid(self.config.min_pts);
                self.cells[idx].mc_s = mc;
                self.cells[idx].state = if good {
                    MatchState::Candidate
                } else {
                    MatchState::Unmatched
                };
                if good {
                    n_good += 1;
                }
            }
        }
        n_good
    }

    /// `Score(scan) + Filter(scan)`. Returns `(n_valid, n_good)`.
    pub fn add(&mut self, scan: &LidarScan) -> (usize, usize) {
        self.t0 = scan.t0;
        self.dt = scan.dt * self.config.cell_cols as f64;
        let n_valid = self.score(scan);
        let n_good = self.filter(scan);
        (n_valid, n_good)
    }

    /// For each `Candidate` cell, projects its sweep-side mean into the
    /// panorama via the cell's column pose, recomputes the pano-side
    /// mean-covariance with occlusion filtering, and populates the
    /// square-root information matrix. Returns the number of cells
    /// promoted to `Matched`.
    pub fn match_pano(&mut self, pano: &DepthPano, model: &LidarModel) -> usize {
        let mut n_matched = 0;
        let (win_h, win_w) = self.pano_win_size();

        for gc in self.col_rg.clone() {
            let pose = self.poses[gc];
            for gr in 0..self.grid_height {
                let idx = self.cell_index(gc, gr);
                if self.cells[idx].state != MatchState::Candidate {
                    continue;
                }

                let mean_s = self.cells[idx].mc_s.mean();
                let p_pano = pose.transform_point(&mean_s);
                let seed_range = p_pano.norm();
                if seed_range < self.config.min_dist {
                    continue;
                }

                let Some((pcol, prow)) = model.forward_point(&p_pano) else {
                    continue;
                };

                let mc_p = pano.mean_covar_at(prow, pcol, win_h, win_w, seed_range, self.config.range_ratio);
                if !mc_p.is_valid(self.config.min_pts) {
                    continue;
                }

                let sum = self.cells[idx].mc_s.covar()
                    + mc_p.covar()
                    + Matrix3::identity() * self.config.lambda;
                let Some(sqrt_info) = cholesky_sqrt_info(&sum) else {
                    continue;
                };

                self.cells[idx].mc_p = mc_p;
                self.cells[idx].pano_pixel = Some((pcol, prow));
                self.cells[idx].sqrt_info = Some(sqrt_info);
                self.cells[idx].state = MatchState::Matched;
                n_matched += 1;
            }
        }
        n_matched
    }

    /// Refreshes every grid column's pose from the trajectory, by
    /// timestamp lookup — the same mechanism as [`crate::sweep::LidarSweep::interp`].
    /// The orchestrator calls this twice per cycle: once right after
    /// `Trajectory::predict_new` (to seed [`Self::match_pano`]'s initial
    /// guess) and again after the solver converges (to refine for the
    /// next cycle's use).
    pub fn interp(&mut self, traj: &Trajectory) {
        for gc in self.col_rg.clone() {
            self.poses[gc] = traj.pose_at_time(self.col_time(gc));
        }
    }

    pub fn matched_cells(&self) -> impl Iterator<Item = (usize, usize, &GridCell)> {
        let grid_width = self.grid_width;
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, c)| c.state == MatchState::Matched)
            .map(move |(i, c)| (i % grid_width, i / grid_width, c))
    }
}

/// Computes `U` such that `U^T U = M^{-1}` via Cholesky of `M`, then
/// inverting and re-factoring the triangular factor. Returns `None` if `M`
/// is not positive definite.
fn cholesky_sqrt_info(m: &Matrix3<f32>) -> Option<Matrix3<f32>> {
    let chol = nalgebra::linalg::Cholesky::new(*m)?;
    let l = chol.l();
    let l_inv = l.try_inverse()?;
    Some(l_inv.transpose())
}

//! Typed, `serde`-deserializable configuration mirroring every parameter
//! enumerated in `spec.md` §6, with `Default` impls matching the listed
//! defaults.
//!
//! Grounded on `align3d::io::slamtb`'s nested `serde_derive::Deserialize`
//! structs parsed from JSON-shaped data: one struct per subsystem, a
//! `Document`-like top-level `Config` aggregating them, loaded with
//! `serde_json::from_reader`.

use serde_derive::Deserialize;

use crate::grid::GridConfig as GridParams;
use crate::pano::PanoConfig as PanoParams;
use crate::solver::SolverConfig as SolverParams;

/// Lidar geometry: image size and field-of-view, shared by the sweep,
/// grid and pano.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct LidarModelConfig {
    pub width: usize,
    pub height: usize,
    pub hfov: f32,
    pub vfov: f32,
}

impl Default for LidarModelConfig {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 64,
            hfov: std::f32::consts::TAU,
            vfov: 45f32.to_radians(),
        }
    }
}

/// `pano.*` in `spec.md` §6.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PanoConfig {
    pub max_cnt: u16,
    pub range_ratio: f32,
    pub min_range: f32,
    pub align_gravity: bool,
    pub max_translation: f32,
    pub min_match_ratio: f32,
}

impl Default for PanoConfig {
    fn default() -> Self {
        Self {
            max_cnt: 10,
            range_ratio: 0.1,
            min_range: 0.5,
            align_gravity: false,
            max_translation: 2.0,
            min_match_ratio: 0.5,
        }
    }
}

impl PanoConfig {
    pub fn to_pano_params(&self) -> PanoParams {
        PanoParams {
            max_cnt: self.max_cnt,
            range_ratio: self.range_ratio,
            min_range: self.min_range,
        }
    }
}

/// `grid.*` and `match.*` in `spec.md` §6 (the matcher is folded into
/// [`crate::grid::SweepGrid::match_pano`], so both sets of knobs live on
/// the one grid config).
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub cell_cols: usize,
    pub cell_rows: usize,
    pub max_curve: f32,
    pub min_pts: usize,
    pub half_rows: usize,
    pub half_cols: usize,
    pub range_ratio: f32,
    pub min_dist: f32,
    pub cov_lambda: f32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            cell_cols: 16,
            cell_rows: 2,
            max_curve: 0.01,
            min_pts: 5,
            half_rows: 2,
            half_cols: 4,
            range_ratio: 0.1,
            min_dist: 2.0,
            cov_lambda: 1e-6,
        }
    }
}

impl GridConfig {
    pub fn to_grid_params(&self) -> GridParams {
        GridParams {
            cell_cols: self.cell_cols,
            cell_rows: self.cell_rows,
            pano_win_half_rows: self.half_rows,
            pano_win_half_cols: self.half_cols,
            max_curve: self.max_curve,
            min_pts: self.min_pts,
            range_ratio: self.range_ratio,
            min_dist: self.min_dist,
            lambda: self.cov_lambda,
        }
    }
}

/// `solver.*` in `spec.md` §6.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub max_iters: usize,
    pub grad_tol: f32,
    pub step_tol: f32,
    pub cost_tol: f32,
    pub rigid: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iters: 10,
            grad_tol: 1e-8,
            step_tol: 1e-6,
            cost_tol: 1e-6,
            rigid: true,
        }
    }
}

impl SolverConfig {
    pub fn to_solver_params(&self) -> SolverParams {
        SolverParams {
            max_iterations: self.max_iters,
            step_tol: self.step_tol,
            grad_tol: self.grad_tol,
            cost_tol: self.cost_tol,
        }
    }
}

/// `imuq.*` in `spec.md` §6.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ImuQueueConfig {
    pub capacity: usize,
    pub init_gravity_samples: usize,
}

impl Default for ImuQueueConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            init_gravity_samples: 10,
        }
    }
}

/// `grain_size` for each parallel stage.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct GrainSizeConfig {
    pub sweep_interp: usize,
    pub grid_score: usize,
    pub grid_filter: usize,
    pub grid_match: usize,
    pub pano_add: usize,
    pub pano_render: usize,
}

impl Default for GrainSizeConfig {
    fn default() -> Self {
        Self {
            sweep_interp: 0,
            grid_score: 0,
            grid_filter: 0,
            grid_match: 0,
            pano_add: 0,
            pano_render: 0,
        }
    }
}

/// Root configuration aggregating every subsystem's knobs, loadable from a
/// JSON document the way `align3d::io::slamtb::SlamTbDataset::load` reads
/// `frames.json` (`Config::from_reader`/`Config::from_json_str` below).
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub lidar_model: LidarModelConfig,
    pub pano: PanoConfig,
    pub grid: GridConfig,
    pub solver: SolverConfig,
    pub imuq: ImuQueueConfig,
    pub grain_size: GrainSizeConfig,
}

impl Config {
    pub fn from_json_str(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    pub fn from_reader<R: std::io::Read>(reader: R) -> Result<Self, serde_json::Error> {
        serde_json::from_reader(reader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let cfg = Config::default();
        assert_eq!(cfg.pano.max_cnt, 10);
        assert_eq!(cfg.pano.range_ratio, 0.1);
        assert_eq!(cfg.pano.min_range, 0.5);
        assert_eq!(cfg.grid.cell_cols, 16);
        assert_eq!(cfg.grid.cell_rows, 2);
        assert_eq!(cfg.grid.max_curve, 0.01);
        assert_eq!(cfg.grid.half_rows, 2);
        assert_eq!(cfg.grid.cov_lambda, 1e-6);
        assert_eq!(cfg.imuq.capacity, 100);
    }

    #[test]
    fn partial_json_overrides_fall_back_to_defaults() {
        let cfg: Config = Config::from_json_str(r#"{"pano": {"max_cnt": 20}}"#).unwrap();
        assert_eq!(cfg.pano.max_cnt, 20);
        assert_eq!(cfg.pano.range_ratio, 0.1);
        assert_eq!(cfg.grid.cell_cols, 16);
    }

    #[test]
    fn empty_json_document_is_all_defaults() {
        let cfg: Config = Config::from_json_str("{}").unwrap();
        assert_eq!(cfg.grid.min_pts, 5);
    }
}

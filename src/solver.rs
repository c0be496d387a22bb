//! Small-dimensional nonlinear least squares over a rigid (6-DoF) or
//! linear-motion (12-DoF) pose increment, built from GICP correspondences
//! and iterated with Gauss-Newton on the rigid-motion manifold.
//!
//! Reuses `align3d::optim::gaussnewton::GaussNewton<DIM>` unchanged: a
//! 3-row correspondence Jacobian is fed in one row at a time (three
//! `step()` calls), which accumulates the exact same `H = J^T J`, `g = J^T r`
//! a block update would, since both are sums over individual rows.
//! `SolverStatus` names follow `original_source/sv/util/solver.cpp`'s
//! `SolverStatus` enum.

use nalgebra::{Matrix3, Vector3, Vector6};

use crate::optim::GaussNewton;
use crate::transform::Pose3F32;

/// One GICP correspondence: sweep-side mean (in sensor/local frame, not yet
/// transformed), matched pano-side mean, and the precomputed square-root
/// information matrix.
#[derive(Clone, Copy, Debug)]
pub struct Correspondence {
    pub grid_col: usize,
    pub p_s: Vector3<f32>,
    pub p_p: Vector3<f32>,
    pub sqrt_info: Matrix3<f32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MotionModel {
    /// Same 6-DoF increment applied to every column.
    Rigid,
    /// 12-DoF: a base 6-DoF increment plus a velocity twist scaled by each
    /// column's fractional position in the sweep window.
    Linear,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SolverStatus {
    CostTooSmall,
    GradientTooSmall,
    RelativeStepSizeTooSmall,
    HitMaxIterations,
    NoCorrespondences,
    /// `H` stayed non-positive-definite even after Levenberg damping; the
    /// poses from the last successful iteration (if any) are kept.
    DegenerateHessian,
}

#[derive(Clone, Copy, Debug)]
pub struct SolverSummary {
    pub initial_cost: f32,
    pub final_cost: f32,
    pub max_gradient_norm: f32,
    pub iterations: usize,
    pub status: SolverStatus,
}

impl SolverSummary {
    pub fn is_converged(&self) -> bool {
        !matches!(
            self.status,
            SolverStatus::HitMaxIterations
                | SolverStatus::NoCorrespondences
                | SolverStatus::DegenerateHessian
        )
    }
}

impl std::fmt::Display for SolverSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?} after {} iters, cost {:.6} -> {:.6}, |g|_inf {:.6}",
            self.status, self.iterations, self.initial_cost, self.final_cost, self.max_gradient_norm
        )
    }
}

#[derive(Clone, Debug)]
pub struct SolverConfig {
    pub max_iterations: usize,
    pub step_tol: f32,
    pub grad_tol: f32,
    pub cost_tol: f32,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            step_tol: 1e-6,
            grad_tol: 1e-8,
            cost_tol: 1e-6,
        }
    }
}

/// Per-column corrected pose after (or during) solving, keyed by grid column.
pub struct GicpSolution {
    pub summary: SolverSummary,
    pub corrected_poses: Vec<(usize, Pose3F32)>,
}

pub struct GicpSolver {
    config: SolverConfig,
    model: MotionModel,
}

/// Analytic point-motion Jacobian block `R * (-[p]_x) | R` (left-trivialized
/// SE(3) derivative, the `Dx_this_mul_exp_x_at_0` identity), as a 3x6
/// row-major matrix: columns `[0..3)` are the rotational block, `[3..6)`
/// the translational block.
fn point_motion_jacobian(rotation: &nalgebra::UnitQuaternion<f32>, p: &Vector3<f32>) -> nalgebra::Matrix3x6<f32> {
    let r = rotation.to_rotation_matrix();
    let skew_p = p.cross_matrix();
    let rot_block = r.matrix() * (-skew_p);
    let trans_block = *r.matrix();

    let mut j = nalgebra::Matrix3x6::zeros();
    j.fixed_view_mut::<3, 3>(0, 0).copy_from(&rot_block);
    j.fixed_view_mut::<3, 3>(0, 3).copy_from(&trans_block);
    j
}

impl GicpSolver {
    pub fn new(config: SolverConfig, model: MotionModel) -> Self {
        Self { config, model }
    }

    /// `predicted_pose(grid_col)` supplies the current best-guess pose for
    /// a column (from `SweepGrid::pose_at`), `time_frac(grid_col)` its
    /// fractional position in `[0, 1]` across the active sweep window (only
    /// consulted for [`MotionModel::Linear`]).
    pub fn solve(
        &self,
        correspondences: &[Correspondence],
        predicted_pose: impl Fn(usize) -> Pose3F32,
        time_frac: impl Fn(usize) -> f32,
    ) -> GicpSolution {
        if correspondences.is_empty() {
            return GicpSolution {
                summary: SolverSummary {
                    initial_cost: 0.0,
                    final_cost: 0.0,
                    max_gradient_norm: 0.0,
                    iterations: 0,
                    status: SolverStatus::NoCorrespondences,
                },
                corrected_poses: Vec::new(),
            };
        }

        let cols: Vec<usize> = {
            let mut c: Vec<usize> = correspondences.iter().map(|m| m.grid_col).collect();
            c.sort_unstable();
            c.dedup();
            c
        };
        let mut corrected: Vec<Pose3F32> = cols.iter().map(|&c| predicted_pose(c)).collect();
        let col_index = |grid_col: usize| cols.iter().position(|&c| c == grid_col).unwrap();

        let mut initial_cost = 0.0;
        let mut final_cost = 0.0;
        let mut max_gradient_norm = 0.0;
        let mut status = SolverStatus::HitMaxIterations;
        let mut iterations = 0;
        let mut prev_cost: Option<f32> = None;

        for iter in 0..self.config.max_iterations {
            iterations = iter + 1;

            let (cost, delta, grad_inf_norm) = match self.model {
                MotionModel::Rigid => {
                    let mut gn = GaussNewton::<6>::new();
                    let mut gradient = Vector6::<f32>::zeros();
                    let mut cost = 0.0;
                    for m in correspondences {
                        let pose = corrected[col_index(m.grid_col)];
                        let raw_residual = m.p_p - pose.transform_point(&m.p_s);
                        let raw_jac = point_motion_jacobian(&pose.rotation(), &m.p_s);
                        let w_res = m.sqrt_info * raw_residual;
                        let w_jac = m.sqrt_info * raw_jac;
                        cost += w_res.norm_squared();
                        gradient += w_jac.transpose() * w_res;
                        for row in 0..3 {
                            let jac_row: [f32; 6] = std::array::from_fn(|c| w_jac[(row, c)]);
                            gn.step(w_res[row], &jac_row);
                        }
                    }
                    let delta6 = gn.solve();
                    let grad = gradient.amax();
                    (cost, delta6.map(Delta::Rigid), grad)
                }
                MotionModel::Linear => {
                    let mut gn = GaussNewton::<12>::new();
                    let mut gradient = nalgebra::SVector::<f32, 12>::zeros();
                    let mut cost = 0.0;
                    for m in correspondences {
                        let pose = corrected[col_index(m.grid_col)];
                        let t = time_frac(m.grid_col);
                        let raw_residual = m.p_p - pose.transform_point(&m.p_s);
                        let raw_jac = point_motion_jacobian(&pose.rotation(), &m.p_s);
                        let w_res = m.sqrt_info * raw_residual;
                        let w_jac_base = m.sqrt_info * raw_jac;
                        let w_jac_vel = w_jac_base * t;
                        cost += w_res.norm_squared();
                        let mut jac_row = [0.0f32; 12];
                        for row in 0..3 {
                            for c in 0..6 {
                                jac_row[c] = w_jac_base[(row, c)];
                                jac_row[c + 6] = w_jac_vel[(row, c)];
                            }
                            for c in 0..12 {
                                gradient[c] += jac_row[c] * w_res[row];
                            }
                            gn.step(w_res[row], &jac_row);
                        }
                    }
                    let delta12 = gn.solve();
                    let grad = gradient.amax();
                    (cost, delta12.map(Delta::Linear), grad)
                }
            };

            if iter == 0 {
                initial_cost = cost;
            }
            final_cost = cost;
            max_gradient_norm = grad_inf_norm;

            if let Some(prev) = prev_cost {
                if prev > 0.0 && ((prev - cost) / prev).abs() < self.config.cost_tol {
                    status = SolverStatus::CostTooSmall;
                    break;
                }
            }
            prev_cost = Some(cost);

            if max_gradient_norm < self.config.grad_tol {
                status = SolverStatus::GradientTooSmall;
                break;
            }

            let Some(delta) = delta else {
                status = SolverStatus::DegenerateHessian;
                break;
            };

            let step_norm = delta.norm();
            match delta {
                Delta::Rigid(d) => {
                    for pose in corrected.iter_mut() {
                        *pose = pose.plus(&d);
                    }
                }
                Delta::Linear(d12) => {
                    let base = Vector6::new(d12[0], d12[1], d12[2], d12[3], d12[4], d12[5]);
                    let vel = Vector6::new(d12[6], d12[7], d12[8], d12[9], d12[10], d12[11]);
                    for (i, &grid_col) in cols.iter().enumerate() {
                        let t = time_frac(grid_col);
                        corrected[i] = corrected[i].plus(&(base + vel * t));
                    }
                }
            }

            if step_norm < self.config.step_tol {
                status = SolverStatus::RelativeStepSizeTooSmall;
                break;
            }
        }

        let corrected_poses = cols.into_iter().zip(corrected).collect();

        GicpSolution {
            summary: SolverSummary {
                initial_cost,
                final_cost,
                max_gradient_norm,
                iterations,
                status,
            },
            corrected_poses,
        }
    }
}

enum Delta {
    Rigid(Vector6<f32>),
    Linear(nalgebra::SVector<f32, 12>),
}

impl Delta {
    fn norm(&self) -> f32 {
        match self {
            Delta::Rigid(d) => d.norm(),
            Delta::Linear(d) => d.norm(),
        }
    }
}

use itertools::izip;

use nalgebra::{ArrayStorage, Cholesky, Const, SMatrix, SVector};
use num::Zero;

#[derive(Clone)]
pub struct GaussNewtonBatch<const BATCH_SIZE: usize, const JACOBIAN_DIM: usize> {
    jacobians: [[f32; JACOBIAN_DIM]; BATCH_SIZE],
    residuals: [f32; BATCH_SIZE],
    costs: [f32; BATCH_SIZE],
    dirty: [bool; BATCH_SIZE],
}

impl<const BATCH_SIZE: usize, const JACOBIAN_DIM: usize>
    GaussNewtonBatch<BATCH_SIZE, JACOBIAN_DIM>
{
    pub fn new() -> Self {
        Self {
            jacobians: [[0.0f32; JACOBIAN_DIM]; BATCH_SIZE],
            residuals: [0.0f32; BATCH_SIZE],
            costs: [0.0f32; BATCH_SIZE],
            dirty: [true; BATCH_SIZE],
        }
    }

    pub fn assign(&mut self, i: usize, cost: f32, residual: f32, jacobian: &[f32]) {
        if !self.dirty[i] && self.costs[i] < cost {
            return;
        }

        for j in 0..JACOBIAN_DIM {
            self.jacobians[i][j] = jacobian[j];
        }
        self.residuals[i] = residual;
        self.dirty[i] = false;
        self.costs[i] = cost;
    }

    pub fn clear(&mut self) {
        self.dirty.fill(true);
    }
}

/// Implements the standard Gauss Newton optimization
pub struct GaussNewton<const DIM: usize> {
    hessian: SMatrix<f32, DIM, DIM>,
    gradient: SVector<f32, DIM>,
    squared_residual_sum: f32,
    count: usize,
}

impl<const DIM: usize> Default for GaussNewton<DIM> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const DIM: usize> GaussNewton<DIM> {
    pub fn new() -> Self {
        Self {
            hessian: SMatrix::zeros(),
            gradient: SVector::zeros(),
            squared_residual_sum: 0.0,
            count: 0,
        }
    }

    pub fn reset(&mut self) {
        self.hessian.set_zero();
        self.gradient.set_zero();
        self.squared_residual_sum = 0.0;
        self.count = 0;
    }

    pub fn step(&mut self, residual: f32, jacobian: &[f32]) {
        self.squared_residual_sum += residual * residual;

        let jt_r = SMatrix::from_row_slice(jacobian) * residual;

        let mut jt_j = [[0.0; DIM]; DIM];
        for i in 0..DIM {
            for j in 0..DIM {
                jt_j[i][j] += jacobian[i] * jacobian[j];
            }
        }

        self.hessian += SMatrix::from_data(ArrayStorage(jt_j));
        self.gradient += jt_r;
        self.count += 1;
    }

    pub fn step_batch<const BATCH_SIZE: usize>(
        &mut self,
        batch: &GaussNewtonBatch<BATCH_SIZE, DIM>,
    ) {
        for (dirty, residual, jacobian) in
            izip!(batch.dirty.iter(), batch.residuals.iter(), batch.jacobians)
        {
            if !*dirty {
                self.step(*residual, &jacobian);
            }
        }
    }

    /// Solves `H delta = g` by Cholesky. `H` is only ever close to singular
    /// along directions with too few correspondences (a rank-deficient
    /// cell group); per spec, that case gets Levenberg damping added to the
    /// diagonal rather than a retry from scratch. Returns `None` if `H` is
    /// still not positive-definite after the last damping step (e.g. zero
    /// correspondences contributed to some parameter), which the solver
    /// surfaces as a skipped/failed iteration rather than a panic.
    pub fn solve(&self) -> Option<SVector<f32, DIM>> {
        if self.count == 0 {
            return None;
        }
        let hessian: SMatrix<f64, DIM, DIM> = nalgebra::convert(self.hessian);
        let gradient: SVector<f64, DIM> = nalgebra::convert(self.gradient);

        const DAMPING_STEPS: [f64; 4] = [0.0, 1e-6, 1e-3, 1.0];
        for lambda in DAMPING_STEPS {
            let damped = if lambda == 0.0 {
                hessian
            } else {
                hessian + SMatrix::<f64, DIM, DIM>::identity() * lambda
            };
            if let Some(chol) = Cholesky::<f64, Const<DIM>>::new(damped) {
                let update = chol.solve(&gradient);
                return Some(nalgebra::convert(update));
            }
        }
        None
    }

    pub fn combine(&mut self, other: &Self, weight1: f32, weight2: f32) {
        self.hessian = self.hessian * (weight1 * weight1) + other.hessian * (weight2 * weight2);
        self.gradient = self.gradient * weight1 + other.gradient * weight2;
        self.squared_residual_sum =
            self.squared_residual_sum * weight1 + other.squared_residual_sum * weight2;
        self.count += other.count;
    }

    pub fn weight(&mut self, weight: f32) {
        self.hessian *= weight * weight;
        self.gradient *= weight;
        self.squared_residual_sum *= weight;
    }

    pub fn mean_squared_residual(&self) -> f32 {
        self.squared_residual_sum / self.count as f32
    }
}

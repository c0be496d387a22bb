//! Rigid-body poses on the 3D rigid-motion manifold.
//!
//! Two concrete precisions are kept, mirroring the sizes they are used at:
//! [`Pose3F32`] for the large per-column arrays carried by the sweep and
//! grid, and [`Pose3F64`] for the single world pose tracked by the
//! trajectory and solved for by the GICP optimizer.

use nalgebra::{
    Isometry3, Matrix3, Quaternion, Translation3, UnitQuaternion, Vector3, Vector6,
};

use std::ops;

macro_rules! impl_pose3 {
    ($name:ident, $scalar:ty) => {
        /// A rigid-body transform: rotation (as a unit quaternion) plus translation.
        #[derive(Clone, Copy, Debug, PartialEq)]
        pub struct $name(pub Isometry3<$scalar>);

        impl Default for $name {
            fn default() -> Self {
                Self::identity()
            }
        }

        impl $name {
            /// The identity transform.
            pub fn identity() -> Self {
                Self(Isometry3::identity())
            }

            /// Builds a transform from a translation and a unit quaternion.
            pub fn new(translation: &Vector3<$scalar>, rotation: UnitQuaternion<$scalar>) -> Self {
                Self(Isometry3::from_parts(
                    Translation3::from(*translation),
                    rotation,
                ))
            }

            /// Exponential map: builds a transform from a 6D twist `[rx, ry, rz, tx, ty, tz]`
            /// on the tangent space (rotation first, as in the Sophus/Ceres `SE3::exp` convention
            /// referenced by the solver's left-trivialized Jacobian).
            pub fn exp(twist: &Vector6<$scalar>) -> Self {
                const EPSILON: $scalar = 1e-8;

                let omega = Vector3::new(twist[0], twist[1], twist[2]);
                let upsilon = Vector3::new(twist[3], twist[4], twist[5]);

                let theta_sq = omega.norm_squared();
                let (theta, imag_factor, real_factor) = if theta_sq < EPSILON * EPSILON {
                    let theta_po4 = theta_sq * theta_sq;
                    (
                        0.0,
                        0.5 - (1.0 / 48.0) * theta_sq + (1.0 / 3840.0) * theta_po4,
                        1.0 - (1.0 / 8.0) * theta_sq + (1.0 / 384.0) * theta_po4,
                    )
                } else {
                    let theta = theta_sq.sqrt();
                    let half_theta = 0.5 * theta;
                    (theta, half_theta.sin() / theta, half_theta.cos())
                };

                let rotation = UnitQuaternion::from_quaternion(Quaternion::new(
                    real_factor,
                    imag_factor * omega[0],
                    imag_factor * omega[1],
                    imag_factor * omega[2],
                ));

                let theta_sq_ = theta * theta;
                let big_omega = omega.cross_matrix();
                let left_jacobian = if theta_sq_ < EPSILON {
                    Matrix3::identity() + big_omega * 0.5
                } else {
                    let big_omega_sq = big_omega * big_omega;
                    Matrix3::identity()
                        + (1.0 - theta.cos()) / theta_sq_ * big_omega
                        + (theta - theta.sin()) / (theta_sq_ * theta) * big_omega_sq
                };

                Self(Isometry3::from_parts(
                    Translation3::from(left_jacobian * upsilon),
                    rotation,
                ))
            }

            /// Inverse of [`exp`](Self::exp): recovers the 6D twist that produced this transform.
            /// Only used by tests to check the exp/log pair round-trips.
            pub fn log(&self) -> Vector6<$scalar> {
                let omega = self.0.rotation.scaled_axis();
                let theta_sq = omega.norm_squared();

                let big_omega = omega.cross_matrix();
                const EPSILON: $scalar = 1e-8;
                let left_jacobian = if theta_sq < EPSILON {
                    Matrix3::identity() + big_omega * 0.5
                } else {
                    let theta = theta_sq.sqrt();
                    let big_omega_sq = big_omega * big_omega;
                    Matrix3::identity()
                        + (1.0 - theta.cos()) / theta_sq * big_omega
                        + (theta - theta.sin()) / (theta_sq * theta) * big_omega_sq
                };

                let upsilon = left_jacobian
                    .try_inverse()
                    .unwrap_or_else(Matrix3::identity)
                    * self.0.translation.vector;

                Vector6::new(
                    omega[0], omega[1], omega[2], upsilon[0], upsilon[1], upsilon[2],
                )
            }

            /// `T ⊞ δ = T · exp(δ)`: composes this pose with an increment on its tangent space.
            pub fn plus(&self, delta: &Vector6<$scalar>) -> Self {
                Self(self.0 * Self::exp(delta).0)
            }

            /// Transforms a 3D point (rotation + translation).
            pub fn transform_point(&self, p: &Vector3<$scalar>) -> Vector3<$scalar> {
                self.0.rotation * p + self.0.translation.vector
            }

            /// Transforms a 3D direction (rotation only).
            pub fn transform_vector(&self, v: &Vector3<$scalar>) -> Vector3<$scalar> {
                self.0.rotation * v
            }

            pub fn inverse(&self) -> Self {
                Self(self.0.inverse())
            }

            pub fn translation(&self) -> Vector3<$scalar> {
                self.0.translation.vector
            }

            pub fn rotation(&self) -> UnitQuaternion<$scalar> {
                self.0.rotation
            }

            /// Rotation angle in radians, in `[0, pi]`.
            pub fn angle(&self) -> $scalar {
                self.0.rotation.angle()
            }
        }

        impl ops::Mul<&$name> for &$name {
            type Output = $name;

            /// Composes two transforms: `self * rhs` applies `rhs` first.
            fn mul(self, rhs: &$name) -> $name {
                $name(self.0 * rhs.0)
            }
        }

        impl ops::Mul<$name> for $name {
            type Output = $name;

            fn mul(self, rhs: $name) -> $name {
                $name(self.0 * rhs.0)
            }
        }
    };
}

impl_pose3!(Pose3F32, f32);
impl_pose3!(Pose3F64, f64);

impl Pose3F64 {
    pub fn to_f32(&self) -> Pose3F32 {
        let t = self.0.translation.vector;
        let q = self.0.rotation;
        Pose3F32::new(
            &Vector3::new(t.x as f32, t.y as f32, t.z as f32),
            UnitQuaternion::from_quaternion(Quaternion::new(
                q.w as f32, q.i as f32, q.j as f32, q.k as f32,
            )),
        )
    }
}

impl Pose3F32 {
    pub fn to_f64(&self) -> Pose3F64 {
        let t = self.0.translation.vector;
        let q = self.0.rotation;
        Pose3F64::new(
            &Vector3::new(t.x as f64, t.y as f64, t.z as f64),
            UnitQuaternion::from_quaternion(Quaternion::new(
                q.w as f64, q.i as f64, q.j as f64, q.k as f64,
            )),
        )
    }

    /// Linear interpolation between two single-precision poses: the translation is
    /// linearly interpolated and the rotation is normalized-quaternion-lerp'd (not
    /// slerp'd), matching the column-pose interpolation contract in `Sweep::Interp`.
    pub fn lerp(&self, other: &Self, t: f32) -> Self {
        let t0 = self.0.translation.vector;
        let t1 = other.0.translation.vector;
        let translation = t0 * (1.0 - t) + t1 * t;

        let q0 = self.0.rotation;
        let mut q1 = other.0.rotation;
        if q0.coords.dot(&q1.coords) < 0.0 {
            q1 = UnitQuaternion::new_unchecked(-q1.into_inner());
        }
        let coords = q0.coords * (1.0 - t) + q1.coords * t;
        let rotation = UnitQuaternion::new_normalize(Quaternion::from(coords));

        Self(Isometry3::from_parts(Translation3::from(translation), rotation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exp_log_round_trip() {
        let twist = Vector6::new(0.1, -0.2, 0.05, 1.0, 2.0, 3.0);
        let pose = Pose3F64::exp(&twist);
        let recovered = pose.log();
        assert!((twist - recovered).norm() < 1e-9);
    }

    #[test]
    fn plus_identity_is_noop() {
        let pose = Pose3F32::exp(&Vector6::new(0.1, 0.0, 0.0, 1.0, 0.0, 0.0));
        let zero = Vector6::zeros();
        let out = pose.plus(&zero);
        assert!((out.translation() - pose.translation()).norm() < 1e-6);
        assert!((out.angle() - pose.angle()).abs() < 1e-6);
    }

    #[test]
    fn compose_matches_isometry_mul() {
        let a = Pose3F32::exp(&Vector6::new(0.0, 0.0, 0.3, 1.0, 0.0, 0.0));
        let b = Pose3F32::exp(&Vector6::new(0.0, 0.2, 0.0, 0.0, 1.0, 0.0));
        let composed = &a * &b;
        let p = Vector3::new(1.0, 2.0, 3.0);
        let direct = a.transform_point(&b.transform_point(&p));
        let via_compose = composed.transform_point(&p);
        assert!((direct - via_compose).norm() < 1e-5);
    }

    #[test]
    fn lerp_at_zero_and_one_returns_endpoints() {
        let a = Pose3F32::exp(&Vector6::new(0.0, 0.0, 0.0, 1.0, 2.0, 3.0));
        let b = Pose3F32::exp(&Vector6::new(0.0, 0.0, 0.5, 4.0, 5.0, 6.0));
        let at0 = a.lerp(&b, 0.0);
        let at1 = a.lerp(&b, 1.0);
        assert!((at0.translation() - a.translation()).norm() < 1e-6);
        assert!((at1.translation() - b.translation()).norm() < 1e-6);
    }

    #[test]
    fn move_frame_preserves_world_pose() {
        // T_new_old composed on the left, then un-composed, should be identity.
        let t_new_old = Pose3F64::exp(&Vector6::new(0.1, 0.0, 0.0, 2.0, 0.0, 0.0));
        let knot = Pose3F64::exp(&Vector6::new(0.0, 0.2, 0.0, 1.0, 1.0, 1.0));

        let moved = &t_new_old * &knot;
        let back = &t_new_old.inverse() * &moved;

        assert!((back.translation() - knot.translation()).norm() < 1e-9);
        assert!((back.angle() - knot.angle()).abs() < 1e-9);
    }
}

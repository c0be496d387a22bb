//! The trajectory: a short history of poses ("knots") plus the velocity and
//! orientation state an IMU-driven predictor needs, and the one running
//! state that spans a panorama's lifetime — the `pano`-to-`odom` pose
//! that gets rebased every time the map re-centers.
//!
//! Replaces `align3d::trajectory_builder::TrajectoryBuilder`'s simple
//! "accumulate one `Transform` per frame" contract with knot storage a
//! predictor can integrate into and a solver can read initial guesses
//! from, following the same "plain `Vec` of poses" shape.

use nalgebra::{Unit, UnitQuaternion, Vector3};

use crate::error::OdomError;
use crate::imu::ImuQueue;
use crate::transform::{Pose3F32, Pose3F64};

/// One trajectory sample: pose, linear velocity (both in the current
/// panorama frame) and the timestamp they were valid at.
#[derive(Clone, Copy, Debug)]
pub struct Knot {
    pub pose: Pose3F64,
    pub vel: Vector3<f64>,
    pub time: f64,
}

/// Number of evenly spaced sub-steps used by [`Trajectory::predict_new`] to
/// integrate between two grid-column knots; higher resolves curvature in
/// the IMU rate better at the cost of more interpolation lookups.
const PREDICT_SUBSTEPS: usize = 4;

/// Ongoing estimate of the sensor's motion: one knot per grid column plus
/// the state needed to keep predicting forward as new IMU samples arrive.
pub struct Trajectory {
    knots: Vec<Knot>,
    gravity_norm: f64,
    /// Maps a pose in the *current* panorama frame to the fixed odom frame.
    /// Rebased every time the pano is re-centered ([`Trajectory::move_frame`]).
    t_odom_pano: Pose3F64,
}

impl Trajectory {
    pub fn new(gravity_norm: f64) -> Self {
        Self {
            knots: Vec::new(),
            gravity_norm,
            t_odom_pano: Pose3F64::identity(),
        }
    }

    pub fn gravity_norm(&self) -> f64 {
        self.gravity_norm
    }

    pub fn is_initialized(&self) -> bool {
        !self.knots.is_empty()
    }

    pub fn knots(&self) -> &[Knot] {
        &self.knots
    }

    /// Appends a knot directly, bypassing prediction. Used by tests and by
    /// [`Trajectory::init`].
    pub fn push_knot(&mut self, pose: Pose3F64, vel: Vector3<f64>, time: f64) {
        self.knots.push(Knot { pose, vel, time });
    }

    /// Seeds the trajectory with a single knot at `t0` whose orientation
    /// levels the sensor's +z axis against the measured gravity direction,
    /// zero velocity, and the pano frame coincident with the odom frame.
    /// `t_imu_lidar` is accepted for API symmetry with the ingest side but
    /// unused beyond this point: initial leveling only needs the gravity
    /// direction, not the lidar/IMU lever arm.
    pub fn init(&mut self, _t_imu_lidar: &Pose3F64, accel_sample: &Vector3<f64>, t0: f64) {
        let measured = accel_sample.normalize();
        let up = Vector3::z();
        let axis = measured.cross(&up);
        let angle = measured.dot(&up).clamp(-1.0, 1.0).acos();

        let rotation = if axis.norm() < 1e-9 {
            if angle > 1.0 {
                UnitQuaternion::from_axis_angle(&Vector3::x_axis(), std::f64::consts::PI)
            } else {
                UnitQuaternion::identity()
            }
        } else {
            UnitQuaternion::from_axis_angle(&Unit::new_normalize(axis), angle)
        };

        self.knots.clear();
        self.knots.push(Knot {
            pose: Pose3F64::new(&Vector3::zeros(), rotation),
            vel: Vector3::zeros(),
            time: t0,
        });
        self.t_odom_pano = Pose3F64::identity();
    }

    /// Integrates `cols` new knots, one per grid column of width `dt`
    /// starting at `t0`, from the last knot's state using samples drawn
    /// from `imuq`. Orientation uses the midpoint rule on interpolated
    /// gyro readings; velocity and position use the trapezoidal rule on
    /// interpolated, gravity-compensated acceleration, expressed in the
    /// current panorama frame.
    pub fn predict_new(
        &mut self,
        imuq: &ImuQueue,
        t0: f64,
        dt: f64,
        cols: usize,
    ) -> Result<(), OdomError> {
        let last = self
            .knots
            .last()
            .copied()
            .ok_or(OdomError::Uninitialized("trajectory has no knots to predict from"))?;

        let mut pose = last.pose;
        let mut vel = last.vel;
        let mut t_cur = last.time;
        let gravity = Vector3::new(0.0, 0.0, self.gravity_norm);

        for i in 1..=cols {
            let t_next = t0 + i as f64 * dt;
            let span = t_next - t_cur;

            if span <= 0.0 {
                self.knots.push(Knot { pose, vel, time: t_next });
                continue;
            }

            let sub_dt = span / PREDICT_SUBSTEPS as f64;
            for s in 0..PREDICT_SUBSTEPS {
                let ta = t_cur + s as f64 * sub_dt;
                let tb = ta + sub_dt;
                let tm = 0.5 * (ta + tb);

                let (_, gyro_mid) = imuq.interpolate(tm);
                let dq = Pose3F64::exp(&nalgebra::Vector6::new(
                    gyro_mid.x * sub_dt,
                    gyro_mid.y * sub_dt,
                    gyro_mid.z * sub_dt,
                    0.0,
                    0.0,
                    0.0,
                ));

                let (accel_a, _) = imuq.interpolate(ta);
                let accel_world_a = pose.rotation() * accel_a - gravity;

                let new_rotation = pose.rotation() * dq.rotation();

                let (accel_b, _) = imuq.interpolate(tb);
                let accel_world_b = new_rotation * accel_b - gravity;

                let new_vel = vel + 0.5 * (accel_world_a + accel_world_b) * sub_dt;
                let new_pos = pose.translation() + 0.5 * (vel + new_vel) * sub_dt;

                pose = Pose3F64::new(&new_pos, new_rotation);
                vel = new_vel;
            }

            t_cur = t_next;
            self.knots.push(Knot { pose, vel, time: t_cur });
        }

        Ok(())
    }

    /// Single-precision pose at an arbitrary time, lerp'd between the two
    /// bracketing knots (clamped at the ends). Used by [`crate::sweep::LidarSweep::interp`].
    pub fn pose_at_time(&self, t: f64) -> Pose3F32 {
        if self.knots.is_empty() {
            return Pose3F32::identity();
        }
        if self.knots.len() == 1 || t <= self.knots.first().unwrap().time {
            return self.knots.first().unwrap().pose.to_f32();
        }
        if t >= self.knots.last().unwrap().time {
            return self.knots.last().unwrap().pose.to_f32();
        }

        for w in self.knots.windows(2) {
            let (a, b) = (w[0], w[1]);
            if a.time <= t && t <= b.time {
                let span = b.time - a.time;
                let frac = if span > 0.0 { (t - a.time) / span } else { 0.0 };
                return a.pose.to_f32().lerp(&b.pose.to_f32(), frac as f32);
            }
        }
        self.knots.last().unwrap().pose.to_f32()
    }

    /// Overwrites the most recent knot's pose (velocity and timestamp
    /// unchanged) with a solver-corrected estimate. Used after GICP
    /// convergence: the solved poses are each grid column's full corrected
    /// estimate (`predicted ⊞ delta`), and the latest one is both the next
    /// `predict_new` integration seed and `tf_pano_lidar`.
    pub fn correct_last_pose(&mut self, pose: Pose3F64) {
        if let Some(knot) = self.knots.last_mut() {
            knot.pose = pose;
        }
    }

    /// The most recent knot's pose, i.e. the current sensor pose expressed
    /// in the current panorama frame.
    pub fn tf_pano_lidar(&self) -> Pose3F64 {
        self.knots
            .last()
            .map(|k| k.pose)
            .unwrap_or_else(Pose3F64::identity)
    }

    /// The current sensor pose expressed in the fixed odom frame.
    pub fn tf_odom_lidar(&self) -> Pose3F64 {
        &self.t_odom_pano * &self.tf_pano_lidar()
    }

    /// Re-expresses every knot (and the running `t_odom_pano`) in a new
    /// panorama frame related to the old one by `t_new_old`, keeping every
    /// knot's pose in the fixed odom frame unchanged. Called whenever the
    /// pano is re-rendered into a re-centered frame.
    pub fn move_frame(&mut self, t_new_old: &Pose3F64) {
        for knot in &mut self.knots {
            knot.pose = t_new_old * &knot.pose;
        }
        self.t_odom_pano = &self.t_odom_pano * &t_new_old.inverse();
    }

    /// Drops knots older than `keep_last`, retaining at least one.
    pub fn trim(&mut self, keep_last: usize) {
        let keep_last = keep_last.max(1);
        if self.knots.len() > keep_last {
            let drop = self.knots.len() - keep_last;
            self.knots.drain(0..drop);
        }
    }
}

//! Real-time LiDAR-inertial odometry via scan-to-panorama GICP.
//!
//! The modules below mirror the dependency order of the pipeline: a
//! projective [`lidar_model`] underlies the [`sweep`] buffer and its
//! coarsened [`grid`], which are matched against the rolling [`pano`]
//! and registered by the [`solver`]; an IMU-driven [`trajectory`] both
//! predicts the registration's initial guess and undistorts scans after
//! convergence. [`orchestrator`] wires the whole per-scan cycle together.

pub mod config;
pub mod error;
pub mod grid;
pub mod imu;
pub mod lidar_model;
pub mod mean_covar;
pub mod metrics;
pub mod optim;
pub mod orchestrator;
pub mod pano;
pub mod solver;
pub mod sweep;
pub mod trajectory;
pub mod transform;

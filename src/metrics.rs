//! Pose-difference metrics and the injected scan-processing counters.
//!
//! `PoseMetrics` keeps `align3d::metrics::TransformMetrics`'s angle/translation
//! decomposition, generalized from the single-precision `Transform` to
//! [`crate::transform::Pose3F64`]. `Metrics` replaces the original llol
//! C++'s global `StatsManager`/`TimerManager` singletons with a plain struct
//! the orchestrator owns and hands out `&mut` to, per the REDESIGN FLAGS.

use crate::transform::Pose3F64;

/// Angle/translation decomposition of the difference between two poses.
#[derive(Clone, Copy, Debug)]
pub struct PoseMetrics {
    /// Angle between the two poses' rotations, in radians.
    pub angle: f64,
    /// Translation vector size between the two poses.
    pub translation: f64,
}

impl PoseMetrics {
    pub fn new(lhs: &Pose3F64, rhs: &Pose3F64) -> Self {
        let diff = &lhs.inverse() * rhs;
        Self {
            angle: diff.angle(),
            translation: diff.translation().norm(),
        }
    }

    pub fn total(&self) -> f64 {
        self.angle + self.translation
    }
}

impl std::fmt::Display for PoseMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "angle: {:.2} deg, translation: {:.5}",
            self.angle.to_degrees(),
            self.translation
        )
    }
}

/// Running counters for one orchestrator's lifetime. Owned, not global:
/// every collaborator that wants to report a count takes `&mut Metrics`.
#[derive(Clone, Debug, Default)]
pub struct Metrics {
    pub scans_processed: u64,
    pub grids_matched: u64,
    pub matches_formed: u64,
    pub matches_dropped_degenerate: u64,
    pub solver_iterations: u64,
    pub solver_converged: u64,
    pub solver_diverged: u64,
    pub pano_renders: u64,
    pub imu_samples_dropped: u64,
    pub scan_sequence_gaps: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Display for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "scans={} grids={} matches={} (dropped={}) solver_iters={} (converged={} diverged={}) renders={} imu_dropped={} scan_gaps={}",
            self.scans_processed,
            self.grids_matched,
            self.matches_formed,
            self.matches_dropped_degenerate,
            self.solver_iterations,
            self.solver_converged,
            self.solver_diverged,
            self.pano_renders,
            self.imu_samples_dropped,
            self.scan_sequence_gaps,
        )
    }
}

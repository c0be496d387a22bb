//! Crate-wide error type.
//!
//! Grounded on `align3d::io::dataset::core::DatasetError`: a plain enum
//! implementing `std::error::Error` + `Display` by hand, no `thiserror`.

use std::fmt;

#[derive(Debug)]
pub enum OdomError {
    /// An array's shape didn't match what the receiving structure expected.
    SizeMismatch {
        expected: (usize, usize),
        got: (usize, usize),
    },
    /// An operation that needs an initialized trajectory/pano ran before init.
    Uninitialized(&'static str),
    /// A scan or IMU sample arrived with a timestamp that violates ordering,
    /// or with a gap beyond what the predictor can bridge.
    SequenceGap { expected_after: f64, got: f64 },
    /// A point set was too small or too collinear/coplanar for its
    /// covariance to be trusted (e.g. fewer than the minimum neighbor count).
    DegenerateGeometry(&'static str),
    /// A finite-ness check (no NaN/Inf) failed on a solved increment or pose.
    NonFinite(&'static str),
    /// Two frames expected to carry the same geometry/coordinate convention did not.
    FrameMismatch(&'static str),
}

impl fmt::Display for OdomError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OdomError::SizeMismatch { expected, got } => write!(
                f,
                "size mismatch: expected {expected:?}, got {got:?}"
            ),
            OdomError::Uninitialized(what) => write!(f, "uninitialized: {what}"),
            OdomError::SequenceGap {
                expected_after,
                got,
            } => write!(
                f,
                "sequence gap: expected a timestamp after {expected_after}, got {got}"
            ),
            OdomError::DegenerateGeometry(what) => write!(f, "degenerate geometry: {what}"),
            OdomError::NonFinite(what) => write!(f, "non-finite value: {what}"),
            OdomError::FrameMismatch(what) => write!(f, "frame mismatch: {what}"),
        }
    }
}

impl std::error::Error for OdomError {}
